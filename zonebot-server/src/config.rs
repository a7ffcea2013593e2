use std::time::Duration;

use anyhow::{Error, Result};
use clap::Args;
use zonebot::Snowflake;

/// Credentials and the guild served, shared with the CLI tools.
#[derive(Args, Debug, Clone)]
pub struct DiscordArgs {
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    pub token: String,
    #[arg(long, env = "DISCORD_APPLICATION_ID")]
    pub application_id: Snowflake,
    #[arg(long, env = "DISCORD_GUILD_ID")]
    pub guild_id: Snowflake,
}

#[derive(Args, Debug, Clone)]
pub struct BotArgs {
    /// Hex encoded Ed25519 key used to verify interaction requests.
    #[arg(long, env = "DISCORD_PUBLIC_KEY")]
    pub public_key: String,
    #[arg(long, env = "ZONEBOT_STAFF_ROLE_ID")]
    pub staff_role_id: Snowflake,
    #[arg(long, env = "ZONEBOT_PANEL_CHANNEL_ID")]
    pub panel_channel_id: Snowflake,
    #[arg(long, env = "ZONEBOT_HUB_CHANNEL_ID")]
    pub hub_channel_id: Snowflake,
    /// Archived channels are moved here; without it they are deleted.
    #[arg(long, env = "ZONEBOT_ARCHIVE_CATEGORY_ID")]
    pub archive_category_id: Option<Snowflake>,
    #[arg(long, env = "ZONEBOT_ANON_SALT", hide_env_values = true)]
    pub anon_salt: String,
    #[arg(long, env = "ZONEBOT_SWEEP_SECONDS", default_value_t = 60)]
    pub sweep_seconds: u64,
    #[arg(long, env = "ZONEBOT_MAX_ZONES", default_value_t = 1)]
    pub max_zones_per_user: u64,
    #[arg(long, env = "ZONEBOT_MAX_TEMP_GROUPS", default_value_t = 3)]
    pub max_temp_groups_per_user: u64,
    #[arg(long, env = "ZONEBOT_MAX_TTL_HOURS", default_value_t = 168)]
    pub max_ttl_hours: u32,
    #[arg(long, env = "ZONEBOT_INVITE_DAYS", default_value_t = 7)]
    pub invite_days: i64,
}

/// The immutable configuration of a running bot.
#[derive(Debug, Clone)]
pub struct Settings {
    pub token: String,
    pub application_id: Snowflake,
    pub guild_id: Snowflake,
    pub staff_role_id: Snowflake,
    pub panel_channel_id: Snowflake,
    pub hub_channel_id: Snowflake,
    pub archive_category_id: Option<Snowflake>,
    pub anon_salt: String,
    pub sweep_interval: Duration,
    pub max_zones_per_user: u64,
    pub max_temp_groups_per_user: u64,
    pub max_ttl_hours: u32,
    pub invite_ttl: chrono::Duration,
}

impl Settings {
    pub fn new(discord: &DiscordArgs, bot: &BotArgs) -> Result<Self> {
        if bot.anon_salt.len() < 8 {
            Err(Error::msg("anon salt must have at least 8 characters"))?;
        }
        if bot.sweep_seconds == 0 {
            Err(Error::msg("sweep interval must be at least one second"))?;
        }
        if bot.max_ttl_hours == 0 {
            Err(Error::msg("maximum time to live must be at least one hour"))?;
        }
        if bot.invite_days <= 0 {
            Err(Error::msg("invites must last at least one day"))?;
        }
        Ok(Settings {
            token: discord.token.clone(),
            application_id: discord.application_id,
            guild_id: discord.guild_id,
            staff_role_id: bot.staff_role_id,
            panel_channel_id: bot.panel_channel_id,
            hub_channel_id: bot.hub_channel_id,
            archive_category_id: bot.archive_category_id,
            anon_salt: bot.anon_salt.clone(),
            sweep_interval: Duration::from_secs(bot.sweep_seconds),
            max_zones_per_user: bot.max_zones_per_user,
            max_temp_groups_per_user: bot.max_temp_groups_per_user,
            max_ttl_hours: bot.max_ttl_hours,
            invite_ttl: chrono::Duration::days(bot.invite_days),
        })
    }
}
