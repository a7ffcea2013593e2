use chrono::{DateTime, Duration, Utc};

use crate::snowflake::Snowflake;

/// An ad-hoc channel with a role, archived once `expires_at` passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempGroup {
    pub id: i64,
    pub guild_id: Snowflake,
    pub name: String,
    pub owner_id: Snowflake,
    pub channel_id: Snowflake,
    pub role_id: Snowflake,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub archived: bool,
}

impl TempGroup {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// The new expiry after adding `hours`, capped at `max_hours` from `now`.
    pub fn extended_expiry(&self, hours: u32, max_hours: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let base = self.expires_at.max(now);
        let extended = base + Duration::hours(hours as i64);
        extended.min(now + Duration::hours(max_hours as i64))
    }
}

/// Checks a requested time to live against the configured maximum.
pub fn validate_ttl_hours(hours: i64, max_hours: u32) -> Result<u32, String> {
    if hours < 1 || hours > max_hours as i64 {
        Err(format!("time to live must be 1 to {} hours", max_hours))
    } else {
        Ok(hours as u32)
    }
}
