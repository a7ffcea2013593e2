use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::{Row, SqliteConnection};
use zonebot::Snowflake;

use super::{get_snowflake, get_time, to_millis};

pub async fn create_moderation_log(connection: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "\
        CREATE TABLE IF NOT EXISTS `ModerationLog` \
        (\
            `idx` INTEGER PRIMARY KEY AUTOINCREMENT, \
            `staff_id` TEXT NOT NULL, \
            `action` TEXT NOT NULL, \
            `target` TEXT NOT NULL, \
            `detail` TEXT NOT NULL, \
            `created_millis` BIGINT NOT NULL\
        );\
        ",
    )
    .execute(&mut *connection)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub staff_id: Snowflake,
    pub action: String,
    pub target: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

pub async fn put_log_entry(connection: &mut SqliteConnection, entry: &LogEntry) -> Result<()> {
    sqlx::query(
        "\
        INSERT INTO `ModerationLog` \
        (`staff_id`, `action`, `target`, `detail`, `created_millis`) \
        VALUES($1, $2, $3, $4, $5);\
        ",
    )
    .bind(entry.staff_id.to_string())
    .bind(&entry.action)
    .bind(&entry.target)
    .bind(&entry.detail)
    .bind(to_millis(entry.created_at))
    .execute(&mut *connection)
    .await?;
    Ok(())
}

/// The `count` most recent entries, newest first.
pub async fn get_log_entries(
    connection: &mut SqliteConnection,
    count: u64,
) -> Result<Vec<LogEntry>> {
    let query = sqlx::query(
        "\
        SELECT * FROM `ModerationLog` \
        ORDER BY `idx` DESC \
        LIMIT $1;\
        ",
    )
    .bind(i64::try_from(count)?);
    let mut entries = Vec::new();
    let mut rows = query.fetch(&mut *connection);
    while let Some(row) = rows.try_next().await? {
        entries.push(LogEntry {
            staff_id: get_snowflake(&row, "staff_id")?,
            action: row.try_get("action")?,
            target: row.try_get("target")?,
            detail: row.try_get("detail")?,
            created_at: get_time(&row, "created_millis")?,
        });
    }
    Ok(entries)
}
