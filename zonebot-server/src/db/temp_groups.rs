use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use zonebot::model::TempGroup;
use zonebot::Snowflake;

use super::{get_snowflake, get_time, to_millis};

pub async fn create_temp_groups(connection: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "\
        CREATE TABLE IF NOT EXISTS `TempGroups` \
        (\
            `id` INTEGER PRIMARY KEY AUTOINCREMENT, \
            `guild_id` TEXT NOT NULL, \
            `name` TEXT NOT NULL, \
            `owner_id` TEXT NOT NULL, \
            `channel_id` TEXT NOT NULL, \
            `role_id` TEXT NOT NULL, \
            `created_millis` BIGINT NOT NULL, \
            `expires_millis` BIGINT NOT NULL, \
            `archived` BOOLEAN NOT NULL DEFAULT 0\
        );\
        ",
    )
    .execute(&mut *connection)
    .await?;
    sqlx::query(
        "\
        CREATE INDEX IF NOT EXISTS `temp_groups_channel_id` \
        ON `TempGroups`(`channel_id`);\
        ",
    )
    .execute(&mut *connection)
    .await?;
    Ok(())
}

fn temp_group_from_row(row: &SqliteRow) -> Result<TempGroup> {
    Ok(TempGroup {
        id: row.try_get("id")?,
        guild_id: get_snowflake(row, "guild_id")?,
        name: row.try_get("name")?,
        owner_id: get_snowflake(row, "owner_id")?,
        channel_id: get_snowflake(row, "channel_id")?,
        role_id: get_snowflake(row, "role_id")?,
        created_at: get_time(row, "created_millis")?,
        expires_at: get_time(row, "expires_millis")?,
        archived: row.try_get("archived")?,
    })
}

/// Insert a group; the `id` and `archived` members of `group` are ignored.
pub async fn put_temp_group(connection: &mut SqliteConnection, group: &TempGroup) -> Result<i64> {
    let result = sqlx::query(
        "\
        INSERT INTO `TempGroups` \
        (`guild_id`, `name`, `owner_id`, `channel_id`, `role_id`, \
        `created_millis`, `expires_millis`) \
        VALUES($1, $2, $3, $4, $5, $6, $7);\
        ",
    )
    .bind(group.guild_id.to_string())
    .bind(&group.name)
    .bind(group.owner_id.to_string())
    .bind(group.channel_id.to_string())
    .bind(group.role_id.to_string())
    .bind(to_millis(group.created_at))
    .bind(to_millis(group.expires_at))
    .execute(&mut *connection)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_temp_group(
    connection: &mut SqliteConnection,
    id: i64,
) -> Result<Option<TempGroup>> {
    sqlx::query(
        "\
        SELECT * FROM `TempGroups` \
        WHERE `id` = $1;\
        ",
    )
    .bind(id)
    .fetch_optional(&mut *connection)
    .await?
    .as_ref()
    .map(temp_group_from_row)
    .transpose()
}

/// The live group whose channel is `channel_id`.
pub async fn get_temp_group_by_channel(
    connection: &mut SqliteConnection,
    channel_id: Snowflake,
) -> Result<Option<TempGroup>> {
    sqlx::query(
        "\
        SELECT * FROM `TempGroups` \
        WHERE `channel_id` = $1 \
        AND `archived` = 0;\
        ",
    )
    .bind(channel_id.to_string())
    .fetch_optional(&mut *connection)
    .await?
    .as_ref()
    .map(temp_group_from_row)
    .transpose()
}

pub async fn get_expired_temp_groups(
    connection: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<Vec<TempGroup>> {
    let query = sqlx::query(
        "\
        SELECT * FROM `TempGroups` \
        WHERE `archived` = 0 \
        AND `expires_millis` <= $1 \
        ORDER BY `expires_millis`;\
        ",
    )
    .bind(to_millis(now));
    let mut groups = Vec::new();
    let mut rows = query.fetch(&mut *connection);
    while let Some(row) = rows.try_next().await? {
        groups.push(temp_group_from_row(&row)?);
    }
    Ok(groups)
}

pub async fn count_live_temp_groups(
    connection: &mut SqliteConnection,
    owner_id: Snowflake,
) -> Result<u64> {
    let count: i64 = sqlx::query(
        "\
        SELECT COUNT(*) FROM `TempGroups` \
        WHERE `owner_id` = $1 \
        AND `archived` = 0;\
        ",
    )
    .bind(owner_id.to_string())
    .fetch_one(&mut *connection)
    .await?
    .try_get(0)?;
    Ok(count as u64)
}

pub async fn update_temp_group_expiry(
    connection: &mut SqliteConnection,
    id: i64,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "\
        UPDATE `TempGroups` SET `expires_millis` = $2 \
        WHERE `id` = $1;\
        ",
    )
    .bind(id)
    .bind(to_millis(expires_at))
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn update_temp_group_archived(connection: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query(
        "\
        UPDATE `TempGroups` SET `archived` = 1 \
        WHERE `id` = $1;\
        ",
    )
    .bind(id)
    .execute(&mut *connection)
    .await?;
    Ok(())
}
