use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use zonebot::model::{Policy, Zone, ZoneChannels};
use zonebot::Snowflake;

use super::{get_snowflake, get_time, joint_id, to_millis};

pub async fn create_zones(connection: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "\
        CREATE TABLE IF NOT EXISTS `Zones` \
        (\
            `id` INTEGER PRIMARY KEY AUTOINCREMENT, \
            `guild_id` TEXT NOT NULL, \
            `name` TEXT NOT NULL, \
            `name_key` TEXT NOT NULL, \
            `description` TEXT NOT NULL, \
            `owner_id` TEXT NOT NULL, \
            `category_id` TEXT NOT NULL, \
            `general_id` TEXT NOT NULL, \
            `announcements_id` TEXT NOT NULL, \
            `anon_id` TEXT NOT NULL, \
            `voice_id` TEXT NOT NULL, \
            `owner_role_id` TEXT NOT NULL, \
            `member_role_id` TEXT NOT NULL, \
            `policy` TEXT NOT NULL, \
            `frozen` BOOLEAN NOT NULL DEFAULT 0, \
            `archived` BOOLEAN NOT NULL DEFAULT 0, \
            `created_millis` BIGINT NOT NULL\
        );\
        ",
    )
    .execute(&mut *connection)
    .await?;
    // only one live zone per name, archived ones keep theirs
    sqlx::query(
        "\
        CREATE UNIQUE INDEX IF NOT EXISTS `zones_live_name` \
        ON `Zones`(`guild_id`, `name_key`) WHERE `archived` = 0;\
        ",
    )
    .execute(&mut *connection)
    .await?;
    sqlx::query(
        "\
        CREATE INDEX IF NOT EXISTS `zones_owner_id` \
        ON `Zones`(`owner_id`);\
        ",
    )
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn create_zone_members(connection: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "\
        CREATE TABLE IF NOT EXISTS `ZoneMembers` \
        (\
            `joint_id` TEXT PRIMARY KEY, \
            `zone_id` INTEGER NOT NULL, \
            `user_id` TEXT NOT NULL, \
            `joined_millis` BIGINT NOT NULL\
        );\
        ",
    )
    .execute(&mut *connection)
    .await?;
    sqlx::query(
        "\
        CREATE INDEX IF NOT EXISTS `zone_members_zone_id` \
        ON `ZoneMembers`(`zone_id`);\
        ",
    )
    .execute(&mut *connection)
    .await?;
    Ok(())
}

/// The fields of a zone whose platform resources were just created.
#[derive(Debug, Clone)]
pub struct NewZone<'a> {
    pub guild_id: Snowflake,
    pub name: &'a str,
    pub description: &'a str,
    pub owner_id: Snowflake,
    pub channels: ZoneChannels,
    pub owner_role_id: Snowflake,
    pub member_role_id: Snowflake,
    pub policy: Policy,
}

fn zone_from_row(row: &SqliteRow) -> Result<Zone> {
    Ok(Zone {
        id: row.try_get("id")?,
        guild_id: get_snowflake(row, "guild_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        owner_id: get_snowflake(row, "owner_id")?,
        channels: ZoneChannels {
            category_id: get_snowflake(row, "category_id")?,
            general_id: get_snowflake(row, "general_id")?,
            announcements_id: get_snowflake(row, "announcements_id")?,
            anon_id: get_snowflake(row, "anon_id")?,
            voice_id: get_snowflake(row, "voice_id")?,
        },
        owner_role_id: get_snowflake(row, "owner_role_id")?,
        member_role_id: get_snowflake(row, "member_role_id")?,
        policy: Policy::from_str(row.try_get("policy")?)?,
        frozen: row.try_get("frozen")?,
        archived: row.try_get("archived")?,
        created_at: get_time(row, "created_millis")?,
    })
}

pub async fn put_zone(
    connection: &mut SqliteConnection,
    zone: &NewZone<'_>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        "\
        INSERT INTO `Zones` \
        (`guild_id`, `name`, `name_key`, `description`, `owner_id`, \
        `category_id`, `general_id`, `announcements_id`, `anon_id`, `voice_id`, \
        `owner_role_id`, `member_role_id`, `policy`, `created_millis`) \
        VALUES($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14);\
        ",
    )
    .bind(zone.guild_id.to_string())
    .bind(zone.name)
    .bind(zone.name.to_lowercase())
    .bind(zone.description)
    .bind(zone.owner_id.to_string())
    .bind(zone.channels.category_id.to_string())
    .bind(zone.channels.general_id.to_string())
    .bind(zone.channels.announcements_id.to_string())
    .bind(zone.channels.anon_id.to_string())
    .bind(zone.channels.voice_id.to_string())
    .bind(zone.owner_role_id.to_string())
    .bind(zone.member_role_id.to_string())
    .bind(zone.policy.as_str())
    .bind(to_millis(now))
    .execute(&mut *connection)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_zone(connection: &mut SqliteConnection, id: i64) -> Result<Option<Zone>> {
    sqlx::query(
        "\
        SELECT * FROM `Zones` \
        WHERE `id` = $1;\
        ",
    )
    .bind(id)
    .fetch_optional(&mut *connection)
    .await?
    .as_ref()
    .map(zone_from_row)
    .transpose()
}

/// Find a live zone by name, ignoring case.
pub async fn get_zone_by_name(
    connection: &mut SqliteConnection,
    guild_id: Snowflake,
    name: &str,
) -> Result<Option<Zone>> {
    sqlx::query(
        "\
        SELECT * FROM `Zones` \
        WHERE `guild_id` = $1 \
        AND `name_key` = $2 \
        AND `archived` = 0;\
        ",
    )
    .bind(guild_id.to_string())
    .bind(name.trim().to_lowercase())
    .fetch_optional(&mut *connection)
    .await?
    .as_ref()
    .map(zone_from_row)
    .transpose()
}

/// Find the live zone whose anonymous relay channel is `channel_id`.
pub async fn get_zone_by_anon_channel(
    connection: &mut SqliteConnection,
    channel_id: Snowflake,
) -> Result<Option<Zone>> {
    sqlx::query(
        "\
        SELECT * FROM `Zones` \
        WHERE `anon_id` = $1 \
        AND `archived` = 0;\
        ",
    )
    .bind(channel_id.to_string())
    .fetch_optional(&mut *connection)
    .await?
    .as_ref()
    .map(zone_from_row)
    .transpose()
}

pub async fn get_live_zones(
    connection: &mut SqliteConnection,
    guild_id: Snowflake,
) -> Result<Vec<Zone>> {
    let query = sqlx::query(
        "\
        SELECT * FROM `Zones` \
        WHERE `guild_id` = $1 \
        AND `archived` = 0 \
        ORDER BY `name_key`;\
        ",
    )
    .bind(guild_id.to_string());
    let mut zones = Vec::new();
    let mut rows = query.fetch(&mut *connection);
    while let Some(row) = rows.try_next().await? {
        zones.push(zone_from_row(&row)?);
    }
    Ok(zones)
}

pub async fn count_owned_zones(
    connection: &mut SqliteConnection,
    guild_id: Snowflake,
    owner_id: Snowflake,
) -> Result<u64> {
    let count: i64 = sqlx::query(
        "\
        SELECT COUNT(*) FROM `Zones` \
        WHERE `guild_id` = $1 \
        AND `owner_id` = $2 \
        AND `archived` = 0;\
        ",
    )
    .bind(guild_id.to_string())
    .bind(owner_id.to_string())
    .fetch_one(&mut *connection)
    .await?
    .try_get(0)?;
    Ok(count as u64)
}

pub async fn update_zone_policy(
    connection: &mut SqliteConnection,
    id: i64,
    policy: Policy,
) -> Result<()> {
    sqlx::query(
        "\
        UPDATE `Zones` SET `policy` = $2 \
        WHERE `id` = $1;\
        ",
    )
    .bind(id)
    .bind(policy.as_str())
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn update_zone_frozen(
    connection: &mut SqliteConnection,
    id: i64,
    frozen: bool,
) -> Result<()> {
    sqlx::query(
        "\
        UPDATE `Zones` SET `frozen` = $2 \
        WHERE `id` = $1;\
        ",
    )
    .bind(id)
    .bind(frozen)
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn update_zone_owner(
    connection: &mut SqliteConnection,
    id: i64,
    owner_id: Snowflake,
) -> Result<()> {
    sqlx::query(
        "\
        UPDATE `Zones` SET `owner_id` = $2 \
        WHERE `id` = $1;\
        ",
    )
    .bind(id)
    .bind(owner_id.to_string())
    .execute(&mut *connection)
    .await?;
    Ok(())
}

/// Un-archiving fails when a live zone took the name in the meantime.
pub async fn update_zone_archived(
    connection: &mut SqliteConnection,
    id: i64,
    archived: bool,
) -> Result<()> {
    sqlx::query(
        "\
        UPDATE `Zones` SET `archived` = $2 \
        WHERE `id` = $1;\
        ",
    )
    .bind(id)
    .bind(archived)
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn put_zone_member(
    connection: &mut SqliteConnection,
    zone_id: i64,
    user_id: Snowflake,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "\
        INSERT OR IGNORE INTO `ZoneMembers` \
        (`joint_id`, `zone_id`, `user_id`, `joined_millis`) \
        VALUES($1, $2, $3, $4);\
        ",
    )
    .bind(joint_id(&[&zone_id.to_string(), &user_id.to_string()]))
    .bind(zone_id)
    .bind(user_id.to_string())
    .bind(to_millis(now))
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn delete_zone_member(
    connection: &mut SqliteConnection,
    zone_id: i64,
    user_id: Snowflake,
) -> Result<()> {
    sqlx::query(
        "\
        DELETE FROM `ZoneMembers` \
        WHERE `joint_id` = $1;\
        ",
    )
    .bind(joint_id(&[&zone_id.to_string(), &user_id.to_string()]))
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn is_zone_member(
    connection: &mut SqliteConnection,
    zone_id: i64,
    user_id: Snowflake,
) -> Result<bool> {
    Ok(sqlx::query(
        "\
        SELECT 1 FROM `ZoneMembers` \
        WHERE `joint_id` = $1 \
        LIMIT 1;\
        ",
    )
    .bind(joint_id(&[&zone_id.to_string(), &user_id.to_string()]))
    .fetch_optional(&mut *connection)
    .await?
    .is_some())
}

pub async fn get_zone_members(
    connection: &mut SqliteConnection,
    zone_id: i64,
) -> Result<Vec<Snowflake>> {
    let query = sqlx::query(
        "\
        SELECT `user_id` FROM `ZoneMembers` \
        WHERE `zone_id` = $1 \
        ORDER BY `joined_millis`, `user_id`;\
        ",
    )
    .bind(zone_id);
    let mut members = Vec::new();
    let mut rows = query.fetch(&mut *connection);
    while let Some(row) = rows.try_next().await? {
        members.push(get_snowflake(&row, "user_id")?);
    }
    Ok(members)
}
