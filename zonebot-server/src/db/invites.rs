use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use zonebot::model::Invite;
use zonebot::Snowflake;

use super::{get_snowflake, get_time, joint_id, to_millis};

pub async fn create_invites(connection: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "\
        CREATE TABLE IF NOT EXISTS `ZoneInvites` \
        (\
            `joint_id` TEXT PRIMARY KEY, \
            `zone_id` INTEGER NOT NULL, \
            `user_id` TEXT NOT NULL, \
            `invited_by` TEXT NOT NULL, \
            `expires_millis` BIGINT NOT NULL\
        );\
        ",
    )
    .execute(&mut *connection)
    .await?;
    Ok(())
}

/// Store an invite, replacing any earlier one for the same user and zone.
pub async fn put_invite(connection: &mut SqliteConnection, invite: &Invite) -> Result<()> {
    sqlx::query(
        "\
        INSERT OR REPLACE INTO `ZoneInvites` \
        (`joint_id`, `zone_id`, `user_id`, `invited_by`, `expires_millis`) \
        VALUES($1, $2, $3, $4, $5);\
        ",
    )
    .bind(joint_id(&[
        &invite.zone_id.to_string(),
        &invite.user_id.to_string(),
    ]))
    .bind(invite.zone_id)
    .bind(invite.user_id.to_string())
    .bind(invite.invited_by.to_string())
    .bind(to_millis(invite.expires_at))
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn get_invite(
    connection: &mut SqliteConnection,
    zone_id: i64,
    user_id: Snowflake,
) -> Result<Option<Invite>> {
    let row = sqlx::query(
        "\
        SELECT * FROM `ZoneInvites` \
        WHERE `joint_id` = $1;\
        ",
    )
    .bind(joint_id(&[&zone_id.to_string(), &user_id.to_string()]))
    .fetch_optional(&mut *connection)
    .await?;
    Ok(match row {
        Some(row) => Some(Invite {
            zone_id: row.try_get("zone_id")?,
            user_id: get_snowflake(&row, "user_id")?,
            invited_by: get_snowflake(&row, "invited_by")?,
            expires_at: get_time(&row, "expires_millis")?,
        }),
        None => None,
    })
}

pub async fn delete_invite(
    connection: &mut SqliteConnection,
    zone_id: i64,
    user_id: Snowflake,
) -> Result<()> {
    sqlx::query(
        "\
        DELETE FROM `ZoneInvites` \
        WHERE `joint_id` = $1;\
        ",
    )
    .bind(joint_id(&[&zone_id.to_string(), &user_id.to_string()]))
    .execute(&mut *connection)
    .await?;
    Ok(())
}

/// Remove invites which expired at or before `now`, returning how many.
pub async fn delete_expired_invites(
    connection: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<u64> {
    Ok(sqlx::query(
        "\
        DELETE FROM `ZoneInvites` \
        WHERE `expires_millis` <= $1;\
        ",
    )
    .bind(to_millis(now))
    .execute(&mut *connection)
    .await?
    .rows_affected())
}
