//! The chat platform as seen by the services.
//!
//! Services only ever create, edit and delete roles, channels, messages and
//! webhooks. [`Platform`] collects those calls so that the REST client can
//! be swapped for a recording fake in tests.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::OutgoingMessage;
use crate::snowflake::Snowflake;

pub const PERMISSION_VIEW_CHANNEL: u64 = 1 << 10;
pub const PERMISSION_SEND_MESSAGES: u64 = 1 << 11;
pub const PERMISSION_MANAGE_MESSAGES: u64 = 1 << 13;
pub const PERMISSION_READ_MESSAGE_HISTORY: u64 = 1 << 16;
pub const PERMISSION_CONNECT: u64 = 1 << 20;
pub const PERMISSION_SPEAK: u64 = 1 << 21;
pub const PERMISSION_MANAGE_CHANNELS: u64 = 1 << 4;

/// Everything a member needs to take part in a channel.
pub const PERMISSIONS_PARTICIPATE: u64 = PERMISSION_VIEW_CHANNEL
    | PERMISSION_SEND_MESSAGES
    | PERMISSION_READ_MESSAGE_HISTORY
    | PERMISSION_CONNECT
    | PERMISSION_SPEAK;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(into = "u8", try_from = "u8")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
}

impl From<ChannelKind> for u8 {
    fn from(kind: ChannelKind) -> u8 {
        match kind {
            ChannelKind::Text => 0,
            ChannelKind::Voice => 2,
            ChannelKind::Category => 4,
        }
    }
}

impl std::convert::TryFrom<u8> for ChannelKind {
    type Error = String;
    fn try_from(kind: u8) -> Result<Self, Self::Error> {
        match kind {
            0 => Ok(ChannelKind::Text),
            2 => Ok(ChannelKind::Voice),
            4 => Ok(ChannelKind::Category),
            _ => Err(format!("unsupported channel type {}", kind)),
        }
    }
}

/// A permission overwrite on a channel for a role (`kind` 0) or a member
/// (`kind` 1). Bit sets are sent as decimal strings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Overwrite {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(with = "bits")]
    pub allow: u64,
    #[serde(with = "bits")]
    pub deny: u64,
}

impl Overwrite {
    pub fn role(id: Snowflake, allow: u64, deny: u64) -> Self {
        Overwrite {
            id,
            kind: 0,
            allow,
            deny,
        }
    }

    pub fn member(id: Snowflake, allow: u64, deny: u64) -> Self {
        Overwrite {
            id,
            kind: 1,
            allow,
            deny,
        }
    }
}

mod bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bits: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(bits)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let bits = String::deserialize(deserializer)?;
        bits.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub permission_overwrites: Vec<Overwrite>,
}

/// A partial channel edit; `None` members are left unchanged.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ChannelEdit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_overwrites: Option<Vec<Overwrite>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NewRole {
    pub name: String,
    #[serde(with = "bits")]
    pub permissions: u64,
    pub color: u32,
    pub mentionable: bool,
}

impl NewRole {
    pub fn new(name: impl Into<String>) -> Self {
        NewRole {
            name: name.into(),
            permissions: 0,
            color: 0,
            mentionable: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Webhook {
    pub id: Snowflake,
    pub token: String,
}

/// A message posted through a webhook under a custom name.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WebhookPost {
    pub username: String,
    pub content: String,
    #[serde(default)]
    pub allowed_mentions: crate::message::AllowedMentions,
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn create_role(&self, guild_id: Snowflake, role: &NewRole) -> Result<Snowflake>;

    async fn delete_role(&self, guild_id: Snowflake, role_id: Snowflake) -> Result<()>;

    async fn add_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> Result<()>;

    async fn remove_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> Result<()>;

    async fn create_channel(&self, guild_id: Snowflake, channel: &NewChannel) -> Result<Snowflake>;

    async fn edit_channel(&self, channel_id: Snowflake, edit: &ChannelEdit) -> Result<()>;

    async fn delete_channel(&self, channel_id: Snowflake) -> Result<()>;

    async fn send_message(
        &self,
        channel_id: Snowflake,
        message: &OutgoingMessage,
    ) -> Result<Snowflake>;

    async fn edit_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        message: &OutgoingMessage,
    ) -> Result<()>;

    async fn delete_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()>;

    /// Open (or reuse) the DM channel with `user_id` and post there.
    async fn send_direct_message(
        &self,
        user_id: Snowflake,
        message: &OutgoingMessage,
    ) -> Result<Snowflake>;

    async fn create_webhook(&self, channel_id: Snowflake, name: &str) -> Result<Webhook>;

    /// Post through `webhook`, returning the ID of the created message.
    async fn execute_webhook(&self, webhook: &Webhook, post: &WebhookPost) -> Result<Snowflake>;

    /// Replace the response to a deferred interaction.
    async fn edit_original_response(
        &self,
        application_id: Snowflake,
        token: &str,
        message: &OutgoingMessage,
    ) -> Result<()>;

    /// Send an extra message after a deferred interaction.
    async fn send_followup(
        &self,
        application_id: Snowflake,
        token: &str,
        message: &OutgoingMessage,
    ) -> Result<()>;
}
