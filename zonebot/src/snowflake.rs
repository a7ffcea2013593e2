use anyhow::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Milliseconds between the Unix epoch and the first second of 2015, which
/// the platform uses as the origin of its IDs.
const PLATFORM_EPOCH_MILLIS: i64 = 1_420_070_400_000;

/// A platform ID: users, guilds, channels, roles, messages and webhooks all
/// share this 64 bit format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Snowflake(u64);

impl Snowflake {
    pub const fn new(id: u64) -> Self {
        Snowflake(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// The time at which the object with this ID was created.
    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        let millis = (self.0 >> 22) as i64 + PLATFORM_EPOCH_MILLIS;
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or(Error::msg("snowflake timestamp is out of range"))
    }
}

impl From<u64> for Snowflake {
    fn from(id: u64) -> Self {
        Snowflake(id)
    }
}

impl core::str::FromStr for Snowflake {
    type Err = Error;
    fn from_str(id: &str) -> Result<Self, Self::Err> {
        let id = id.trim();
        // mentions are accepted so that IDs can be pasted from the client
        let id = id
            .strip_prefix("<@&")
            .or_else(|| id.strip_prefix("<@!"))
            .or_else(|| id.strip_prefix("<@"))
            .or_else(|| id.strip_prefix("<#"))
            .and_then(|x| x.strip_suffix('>'))
            .unwrap_or(id);
        let id: u64 = id
            .parse()
            .map_err(|_| Error::msg("snowflake is not an unsigned integer"))?;
        if id == 0 {
            Err(Error::msg("snowflake cannot be zero"))?;
        }
        Ok(Snowflake(id))
    }
}

impl std::fmt::Display for Snowflake {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct SnowflakeVisitor;

impl<'de> Visitor<'de> for SnowflakeVisitor {
    type Value = Snowflake;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a snowflake as a decimal string or integer")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(Snowflake(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        u64::try_from(value)
            .map(Snowflake)
            .map_err(|_| E::custom("snowflake cannot be negative"))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        value.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SnowflakeVisitor)
    }
}
