use std::str::FromStr;
use std::time::Duration;

use anyhow::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use zonebot::Snowflake;

mod anon;
mod invites;
mod markers;
mod moderation_log;
mod requests;
mod temp_groups;
mod zones;

pub use anon::*;
pub use invites::*;
pub use markers::*;
pub use moderation_log::*;
pub use requests::*;
pub use temp_groups::*;
pub use zones::*;

const MEMORY_URL: &str = "sqlite::memory:";

fn joint_id(ids: &[&str]) -> String {
    // JSON quoting keeps ["a,b", "c"] and ["a", "b,c"] apart
    let ids = serde_json::to_string(ids).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(ids.as_bytes());
    let hash = hasher.finalize();
    base64::encode(hash)
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(Error::msg("timestamp is out of range"))
}

fn get_time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    from_millis(row.try_get(column)?)
}

fn get_time_opt(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let millis: Option<i64> = row.try_get(column)?;
    millis.map(from_millis).transpose()
}

fn get_snowflake(row: &SqliteRow, column: &str) -> Result<Snowflake> {
    let id: &str = row.try_get(column)?;
    Snowflake::from_str(id)
}

fn get_snowflake_opt(row: &SqliteRow, column: &str) -> Result<Option<Snowflake>> {
    let id: Option<&str> = row.try_get(column)?;
    id.map(Snowflake::from_str).transpose()
}

#[derive(Debug)]
pub struct Connector {
    pool_read: Option<SqlitePool>,
    pool_write: SqlitePool,
}

impl Connector {
    pub async fn new(url: &str) -> Result<Self> {
        // every connection to `sqlite::memory:` opens a distinct database, so
        // the in-memory pool must hold exactly one connection forever
        let pool_write = if url == MEMORY_URL {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(10))
        }
        .connect_with(
            SqliteConnectOptions::from_str(url)?
                .create_if_missing(true)
                .read_only(false),
        )
        .await?;

        let mut connection = pool_write.acquire().await?;
        create_zones(&mut *connection).await?;
        create_zone_members(&mut *connection).await?;
        create_invites(&mut *connection).await?;
        create_requests(&mut *connection).await?;
        create_temp_groups(&mut *connection).await?;
        create_anon(&mut *connection).await?;
        create_moderation_log(&mut *connection).await?;
        create_markers(&mut *connection).await?;
        drop(connection);

        let pool_read = if url == MEMORY_URL {
            None
        } else {
            Some(
                SqlitePoolOptions::new()
                    .connect_with(
                        SqliteConnectOptions::from_str(url)?
                            .create_if_missing(false)
                            .read_only(true),
                    )
                    .await?,
            )
        };

        Ok(Connector {
            pool_read,
            pool_write,
        })
    }

    pub async fn connection(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self
            .pool_read
            .as_ref()
            .unwrap_or(&self.pool_write)
            .acquire()
            .await?)
    }

    pub async fn connection_mut(&mut self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool_write.acquire().await?)
    }
}
