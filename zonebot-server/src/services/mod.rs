//! The operations behind every command, button and sweep step.
//!
//! Each service is a thin handle on a shared [`Context`]. Operations load a
//! few rows, check who may act, call the platform and store the outcome.
//! Database connections are only held between platform calls, never across
//! them, and never two at a time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::Sqlite;
use tokio::sync::RwLock;
use zonebot::model::{Request, RequestStatus, Zone};
use zonebot::platform::Platform;
use zonebot::Snowflake;

use crate::config::Settings;
use crate::db::{self, Connector};
use crate::errors::BotError;

mod anon;
mod hub;
mod policy;
pub mod render;
mod staff_panel;
mod temp_group;

pub use anon::AnonRelayService;
pub use hub::{HubService, ZoneInfo};
pub use policy::{JoinOutcome, PolicyService};
pub use staff_panel::{Decision, StaffPanelService};
pub use temp_group::TempGroupService;

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Snowflake,
    pub is_staff: bool,
}

impl Actor {
    pub fn member(id: Snowflake) -> Self {
        Actor {
            id,
            is_staff: false,
        }
    }

    pub fn staff(id: Snowflake) -> Self {
        Actor { id, is_staff: true }
    }
}

#[derive(Clone)]
pub struct Context {
    pub connector: Arc<RwLock<Connector>>,
    pub platform: Arc<dyn Platform>,
    pub settings: Arc<Settings>,
}

impl Context {
    pub fn hub(&self) -> HubService {
        HubService::new(self.clone())
    }

    pub fn policy(&self) -> PolicyService {
        PolicyService::new(self.clone())
    }

    pub fn staff_panel(&self) -> StaffPanelService {
        StaffPanelService::new(self.clone())
    }

    pub fn temp_groups(&self) -> TempGroupService {
        TempGroupService::new(self.clone())
    }

    pub fn anon(&self) -> AnonRelayService {
        AnonRelayService::new(self.clone())
    }

    pub async fn connection(&self) -> Result<PoolConnection<Sqlite>, BotError> {
        self.connector
            .read()
            .await
            .connection()
            .await
            .map_err(BotError::Storage)
    }

    pub async fn connection_mut(&self) -> Result<PoolConnection<Sqlite>, BotError> {
        self.connector
            .write()
            .await
            .connection_mut()
            .await
            .map_err(BotError::Storage)
    }

    pub(crate) async fn load_zone(&self, name: &str) -> Result<Zone, BotError> {
        let mut connection = self.connection().await?;
        db::get_zone_by_name(&mut connection, self.settings.guild_id, name)
            .await
            .map_err(BotError::Storage)?
            .ok_or_else(|| BotError::UnknownZone(name.trim().to_string()))
    }

    pub(crate) async fn load_zone_by_id(&self, id: i64) -> Result<Zone, BotError> {
        let mut connection = self.connection().await?;
        db::get_zone(&mut connection, id)
            .await
            .map_err(BotError::Storage)?
            .filter(|x| x.is_live())
            .ok_or_else(|| BotError::UnknownZone(format!("#{}", id)))
    }

    pub(crate) async fn load_request(&self, id: i64) -> Result<Request, BotError> {
        let mut connection = self.connection().await?;
        db::get_request(&mut connection, id)
            .await
            .map_err(BotError::Storage)?
            .ok_or(BotError::UnknownRequest(id))
    }

    /// Move `request` to `to` if its workflow allows it and nobody moved it
    /// meanwhile, returning the updated request.
    pub(crate) async fn set_status(
        &self,
        request: &Request,
        to: RequestStatus,
        decided_by: Option<Snowflake>,
        now: DateTime<Utc>,
    ) -> Result<Request, BotError> {
        request.status.transition(request.kind, to)?;
        let mut connection = self.connection_mut().await?;
        if !db::update_request_status(
            &mut connection,
            request.id,
            request.status,
            to,
            decided_by,
            now,
        )
        .await
        .map_err(BotError::Storage)?
        {
            return Err(BotError::Conflict);
        }
        tracing::info!(
            request = request.id,
            kind = %request.kind,
            from = %request.status,
            to = %to,
            "request status changed"
        );
        Ok(Request {
            status: to,
            decided_by: decided_by.or(request.decided_by),
            updated_at: now,
            ..request.clone()
        })
    }
}
