use chrono::{DateTime, Utc};

use super::Policy;
use crate::snowflake::Snowflake;

/// A sub-community: a category holding a few channels, plus an owner role
/// and a member role which gate access to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub id: i64,
    pub guild_id: Snowflake,
    pub name: String,
    pub description: String,
    pub owner_id: Snowflake,
    pub channels: ZoneChannels,
    pub owner_role_id: Snowflake,
    pub member_role_id: Snowflake,
    pub policy: Policy,
    pub frozen: bool,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

/// The platform resources created for a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneChannels {
    pub category_id: Snowflake,
    pub general_id: Snowflake,
    pub announcements_id: Snowflake,
    pub anon_id: Snowflake,
    pub voice_id: Snowflake,
}

impl ZoneChannels {
    pub fn all(&self) -> [Snowflake; 5] {
        [
            self.general_id,
            self.announcements_id,
            self.anon_id,
            self.voice_id,
            self.category_id,
        ]
    }

    pub fn contains(&self, channel_id: Snowflake) -> bool {
        self.all().contains(&channel_id)
    }
}

impl Zone {
    pub fn is_live(&self) -> bool {
        !self.archived
    }

    /// Frozen zones admit nobody regardless of their stored policy.
    pub fn effective_policy(&self) -> Policy {
        if self.frozen {
            Policy::Closed
        } else {
            self.policy
        }
    }
}

/// An outstanding invitation for `user_id` to join a zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    pub zone_id: i64,
    pub user_id: Snowflake,
    pub invited_by: Snowflake,
    pub expires_at: DateTime<Utc>,
}

impl Invite {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
