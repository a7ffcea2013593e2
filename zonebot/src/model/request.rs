//! Requests move through a small approval workflow:
//!
//! ```text
//! Draft ──► Pending ──► Accepted ──► Sent | Running ──► Ended
//!   │          ├──────► Denied
//!   │          └──────► Scheduled ──► Sent | Running
//!   └──► Cancelled ◄── (Pending, Scheduled)
//! ```
//!
//! `Sent` only applies to announcements, `Running` to zones and events,
//! `Ended` to events. Join requests start out `Pending` and are only ever
//! accepted, denied or cancelled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snowflake::Snowflake;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Zone,
    Announcement,
    Event,
    Join,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Draft,
    Pending,
    Accepted,
    Denied,
    Scheduled,
    Sent,
    Running,
    Ended,
    Cancelled,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{kind} request cannot go from {from} to {to}")]
pub struct TransitionError {
    pub kind: RequestKind,
    pub from: RequestStatus,
    pub to: RequestStatus,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zone => "zone",
            Self::Announcement => "announcement",
            Self::Event => "event",
            Self::Join => "join",
        }
    }

    /// The status a new request of this kind is created with.
    pub fn initial_status(&self) -> RequestStatus {
        match self {
            Self::Join => RequestStatus::Pending,
            _ => RequestStatus::Draft,
        }
    }

    /// Whether staff decide on this kind (as opposed to a zone owner).
    pub fn decided_by_staff(&self) -> bool {
        !matches!(self, Self::Join)
    }
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 9] = [
        RequestStatus::Draft,
        RequestStatus::Pending,
        RequestStatus::Accepted,
        RequestStatus::Denied,
        RequestStatus::Scheduled,
        RequestStatus::Sent,
        RequestStatus::Running,
        RequestStatus::Ended,
        RequestStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Denied => "denied",
            Self::Scheduled => "scheduled",
            Self::Sent => "sent",
            Self::Running => "running",
            Self::Ended => "ended",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Denied | Self::Sent | Self::Ended | Self::Cancelled
        )
    }

    /// Whether a request of `kind` may move from this status to `to`.
    pub fn can_transition(&self, kind: RequestKind, to: RequestStatus) -> bool {
        use RequestKind as K;
        use RequestStatus as S;
        match (kind, *self, to) {
            (K::Join, S::Pending, S::Accepted | S::Denied | S::Cancelled) => true,
            (K::Join, _, _) => false,
            (_, S::Draft, S::Pending | S::Cancelled) => true,
            (_, S::Pending, S::Accepted | S::Denied | S::Cancelled) => true,
            (K::Announcement | K::Event, S::Pending, S::Scheduled) => true,
            (K::Announcement, S::Accepted | S::Scheduled, S::Sent) => true,
            (K::Zone, S::Accepted, S::Running) => true,
            (K::Event, S::Accepted | S::Scheduled, S::Running) => true,
            (K::Announcement | K::Event, S::Scheduled, S::Cancelled) => true,
            (K::Event, S::Running, S::Ended) => true,
            _ => false,
        }
    }

    pub fn transition(
        &self,
        kind: RequestKind,
        to: RequestStatus,
    ) -> Result<RequestStatus, TransitionError> {
        if self.can_transition(kind, to) {
            Ok(to)
        } else {
            Err(TransitionError {
                kind,
                from: *self,
                to,
            })
        }
    }
}

impl core::str::FromStr for RequestKind {
    type Err = anyhow::Error;
    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "zone" => Ok(Self::Zone),
            "announcement" => Ok(Self::Announcement),
            "event" => Ok(Self::Event),
            "join" => Ok(Self::Join),
            _ => Err(anyhow::Error::msg("unknown request kind")),
        }
    }
}

impl core::str::FromStr for RequestStatus {
    type Err = anyhow::Error;
    fn from_str(status: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .into_iter()
            .find(|x| x.as_str() == status)
            .ok_or(anyhow::Error::msg("unknown request status"))
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored request. Zone requests carry the zone name as `title` and its
/// description as `body`; join requests reference the zone in `zone_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: i64,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub guild_id: Snowflake,
    pub author_id: Snowflake,
    pub zone_id: Option<i64>,
    pub title: String,
    pub body: String,
    pub send_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub panel_message_id: Option<Snowflake>,
    pub decided_by: Option<Snowflake>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The fields needed to create a request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub kind: RequestKind,
    pub guild_id: Snowflake,
    pub author_id: Snowflake,
    pub zone_id: Option<i64>,
    pub title: String,
    pub body: String,
    pub send_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

impl Request {
    /// Whether the request is timed and its time lies after `now`.
    pub fn is_due_after(&self, now: DateTime<Utc>) -> bool {
        self.send_at.map_or(false, |x| x > now)
    }
}
