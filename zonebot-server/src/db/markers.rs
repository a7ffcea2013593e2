use anyhow::Result;
use sqlx::{Row, SqliteConnection};

/// Named values the bot keeps between restarts, such as the ID of the staff
/// panel message.
pub const MARKER_PANEL_MESSAGE: &str = "staff_panel_message";

pub async fn create_markers(connection: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "\
        CREATE TABLE IF NOT EXISTS `Markers` \
        (\
            `key` TEXT PRIMARY KEY, \
            `value` TEXT NOT NULL\
        );\
        ",
    )
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn put_marker(connection: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "\
        INSERT OR REPLACE INTO `Markers` \
        (`key`, `value`) \
        VALUES($1, $2);\
        ",
    )
    .bind(key)
    .bind(value)
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn get_marker(connection: &mut SqliteConnection, key: &str) -> Result<Option<String>> {
    Ok(sqlx::query(
        "\
        SELECT `value` FROM `Markers` \
        WHERE `key` = $1;\
        ",
    )
    .bind(key)
    .fetch_optional(&mut *connection)
    .await?
    .map(|x| x.get(0)))
}

pub async fn delete_marker(connection: &mut SqliteConnection, key: &str) -> Result<()> {
    sqlx::query(
        "\
        DELETE FROM `Markers` \
        WHERE `key` = $1;\
        ",
    )
    .bind(key)
    .execute(&mut *connection)
    .await?;
    Ok(())
}
