use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use zonebot::platform::Webhook;
use zonebot::Snowflake;

use super::{get_snowflake, get_time, to_millis};

pub async fn create_anon(connection: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "\
        CREATE TABLE IF NOT EXISTS `AnonWebhooks` \
        (\
            `channel_id` TEXT PRIMARY KEY, \
            `webhook_id` TEXT NOT NULL, \
            `token` TEXT NOT NULL\
        );\
        ",
    )
    .execute(&mut *connection)
    .await?;
    sqlx::query(
        "\
        CREATE TABLE IF NOT EXISTS `AnonPosts` \
        (\
            `id` INTEGER PRIMARY KEY AUTOINCREMENT, \
            `guild_id` TEXT NOT NULL, \
            `author_id` TEXT NOT NULL, \
            `pseudonym` TEXT NOT NULL, \
            `origin_channel_id` TEXT NOT NULL, \
            `origin_message_id` TEXT NOT NULL, \
            `created_millis` BIGINT NOT NULL\
        );\
        ",
    )
    .execute(&mut *connection)
    .await?;
    sqlx::query(
        "\
        CREATE TABLE IF NOT EXISTS `AnonCopies` \
        (\
            `message_id` TEXT PRIMARY KEY, \
            `post_id` INTEGER NOT NULL, \
            `channel_id` TEXT NOT NULL\
        );\
        ",
    )
    .execute(&mut *connection)
    .await?;
    sqlx::query(
        "\
        CREATE INDEX IF NOT EXISTS `anon_copies_post_id` \
        ON `AnonCopies`(`post_id`);\
        ",
    )
    .execute(&mut *connection)
    .await?;
    sqlx::query(
        "\
        CREATE TABLE IF NOT EXISTS `AnonMutes` \
        (\
            `user_id` TEXT PRIMARY KEY, \
            `muted_by` TEXT NOT NULL, \
            `created_millis` BIGINT NOT NULL\
        );\
        ",
    )
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn put_anon_webhook(
    connection: &mut SqliteConnection,
    channel_id: Snowflake,
    webhook: &Webhook,
) -> Result<()> {
    sqlx::query(
        "\
        INSERT OR REPLACE INTO `AnonWebhooks` \
        (`channel_id`, `webhook_id`, `token`) \
        VALUES($1, $2, $3);\
        ",
    )
    .bind(channel_id.to_string())
    .bind(webhook.id.to_string())
    .bind(&webhook.token)
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn get_anon_webhook(
    connection: &mut SqliteConnection,
    channel_id: Snowflake,
) -> Result<Option<Webhook>> {
    let row = sqlx::query(
        "\
        SELECT `webhook_id`, `token` FROM `AnonWebhooks` \
        WHERE `channel_id` = $1;\
        ",
    )
    .bind(channel_id.to_string())
    .fetch_optional(&mut *connection)
    .await?;
    Ok(match row {
        Some(row) => Some(Webhook {
            id: get_snowflake(&row, "webhook_id")?,
            token: row.try_get("token")?,
        }),
        None => None,
    })
}

/// Forget the webhook of `channel_id`, e.g. after it was deleted by hand.
pub async fn delete_anon_webhook(
    connection: &mut SqliteConnection,
    channel_id: Snowflake,
) -> Result<()> {
    sqlx::query(
        "\
        DELETE FROM `AnonWebhooks` \
        WHERE `channel_id` = $1;\
        ",
    )
    .bind(channel_id.to_string())
    .execute(&mut *connection)
    .await?;
    Ok(())
}

/// Who wrote a relayed message, kept for staff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonPost {
    pub id: i64,
    pub guild_id: Snowflake,
    pub author_id: Snowflake,
    pub pseudonym: String,
    pub origin_channel_id: Snowflake,
    pub origin_message_id: Snowflake,
    pub created_at: DateTime<Utc>,
}

/// Insert a post; the `id` member is ignored and the new ID returned.
pub async fn put_anon_post(connection: &mut SqliteConnection, post: &AnonPost) -> Result<i64> {
    let result = sqlx::query(
        "\
        INSERT INTO `AnonPosts` \
        (`guild_id`, `author_id`, `pseudonym`, `origin_channel_id`, \
        `origin_message_id`, `created_millis`) \
        VALUES($1, $2, $3, $4, $5, $6);\
        ",
    )
    .bind(post.guild_id.to_string())
    .bind(post.author_id.to_string())
    .bind(&post.pseudonym)
    .bind(post.origin_channel_id.to_string())
    .bind(post.origin_message_id.to_string())
    .bind(to_millis(post.created_at))
    .execute(&mut *connection)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn put_anon_copy(
    connection: &mut SqliteConnection,
    post_id: i64,
    channel_id: Snowflake,
    message_id: Snowflake,
) -> Result<()> {
    sqlx::query(
        "\
        INSERT OR IGNORE INTO `AnonCopies` \
        (`message_id`, `post_id`, `channel_id`) \
        VALUES($1, $2, $3);\
        ",
    )
    .bind(message_id.to_string())
    .bind(post_id)
    .bind(channel_id.to_string())
    .execute(&mut *connection)
    .await?;
    Ok(())
}

/// Resolve a relayed copy, or the original message, to its post.
pub async fn get_anon_post_by_message(
    connection: &mut SqliteConnection,
    message_id: Snowflake,
) -> Result<Option<AnonPost>> {
    let row = sqlx::query(
        "\
        SELECT * FROM `AnonPosts` \
        WHERE `id` IN (\
            SELECT `post_id` FROM `AnonCopies` \
            WHERE `message_id` = $1\
        ) \
        OR `origin_message_id` = $1 \
        LIMIT 1;\
        ",
    )
    .bind(message_id.to_string())
    .fetch_optional(&mut *connection)
    .await?;
    Ok(match row {
        Some(row) => Some(AnonPost {
            id: row.try_get("id")?,
            guild_id: get_snowflake(&row, "guild_id")?,
            author_id: get_snowflake(&row, "author_id")?,
            pseudonym: row.try_get("pseudonym")?,
            origin_channel_id: get_snowflake(&row, "origin_channel_id")?,
            origin_message_id: get_snowflake(&row, "origin_message_id")?,
            created_at: get_time(&row, "created_millis")?,
        }),
        None => None,
    })
}

/// Delete posts created before `before` together with their copies,
/// returning the number of posts removed.
pub async fn delete_anon_posts_before(
    connection: &mut SqliteConnection,
    before: DateTime<Utc>,
) -> Result<u64> {
    sqlx::query(
        "\
        DELETE FROM `AnonCopies` \
        WHERE `post_id` IN (\
            SELECT `id` FROM `AnonPosts` \
            WHERE `created_millis` < $1\
        );\
        ",
    )
    .bind(to_millis(before))
    .execute(&mut *connection)
    .await?;
    Ok(sqlx::query(
        "\
        DELETE FROM `AnonPosts` \
        WHERE `created_millis` < $1;\
        ",
    )
    .bind(to_millis(before))
    .execute(&mut *connection)
    .await?
    .rows_affected())
}

pub async fn put_anon_mute(
    connection: &mut SqliteConnection,
    user_id: Snowflake,
    muted_by: Snowflake,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "\
        INSERT OR REPLACE INTO `AnonMutes` \
        (`user_id`, `muted_by`, `created_millis`) \
        VALUES($1, $2, $3);\
        ",
    )
    .bind(user_id.to_string())
    .bind(muted_by.to_string())
    .bind(to_millis(now))
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn delete_anon_mute(connection: &mut SqliteConnection, user_id: Snowflake) -> Result<()> {
    sqlx::query(
        "\
        DELETE FROM `AnonMutes` \
        WHERE `user_id` = $1;\
        ",
    )
    .bind(user_id.to_string())
    .execute(&mut *connection)
    .await?;
    Ok(())
}

pub async fn is_anon_muted(connection: &mut SqliteConnection, user_id: Snowflake) -> Result<bool> {
    Ok(sqlx::query(
        "\
        SELECT 1 FROM `AnonMutes` \
        WHERE `user_id` = $1 \
        LIMIT 1;\
        ",
    )
    .bind(user_id.to_string())
    .fetch_optional(&mut *connection)
    .await?
    .is_some())
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use tokio;

    use super::super::{from_millis, Connector};
    use super::*;

    fn post(author: u64, origin: u64, created_at: DateTime<Utc>) -> AnonPost {
        AnonPost {
            id: 0,
            guild_id: Snowflake::new(1),
            author_id: Snowflake::new(author),
            pseudonym: "Quiet Heron 0a".to_string(),
            origin_channel_id: Snowflake::new(2),
            origin_message_id: Snowflake::new(origin),
            created_at,
        }
    }

    #[tokio::test]
    async fn caches_webhooks() {
        let connector = Connector::new("sqlite::memory:").await.unwrap();
        let mut connection = connector.connection().await.unwrap();
        let webhook = Webhook {
            id: Snowflake::new(5),
            token: "secret".to_string(),
        };
        put_anon_webhook(&mut connection, Snowflake::new(3), &webhook)
            .await
            .unwrap();
        assert_eq!(
            get_anon_webhook(&mut connection, Snowflake::new(3))
                .await
                .unwrap(),
            Some(webhook)
        );
        delete_anon_webhook(&mut connection, Snowflake::new(3))
            .await
            .unwrap();
        assert!(get_anon_webhook(&mut connection, Snowflake::new(3))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn resolves_copies_to_posts() {
        let connector = Connector::new("sqlite::memory:").await.unwrap();
        let mut connection = connector.connection().await.unwrap();
        let now = from_millis(1_000_000).unwrap();
        let id = put_anon_post(&mut connection, &post(7, 100, now))
            .await
            .unwrap();
        put_anon_copy(&mut connection, id, Snowflake::new(2), Snowflake::new(200))
            .await
            .unwrap();
        put_anon_copy(&mut connection, id, Snowflake::new(3), Snowflake::new(201))
            .await
            .unwrap();
        let back = get_anon_post_by_message(&mut connection, Snowflake::new(201))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back.id, id);
        assert_eq!(back.author_id, Snowflake::new(7));
        let back = get_anon_post_by_message(&mut connection, Snowflake::new(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back.id, id);
        assert!(get_anon_post_by_message(&mut connection, Snowflake::new(999))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn purges_old_posts() {
        let connector = Connector::new("sqlite::memory:").await.unwrap();
        let mut connection = connector.connection().await.unwrap();
        let now = from_millis(100_000_000).unwrap();
        let old = put_anon_post(&mut connection, &post(7, 100, now - Duration::days(2)))
            .await
            .unwrap();
        put_anon_copy(&mut connection, old, Snowflake::new(2), Snowflake::new(200))
            .await
            .unwrap();
        put_anon_post(&mut connection, &post(8, 101, now))
            .await
            .unwrap();
        assert_eq!(
            delete_anon_posts_before(&mut connection, now - Duration::days(1))
                .await
                .unwrap(),
            1
        );
        assert!(get_anon_post_by_message(&mut connection, Snowflake::new(200))
            .await
            .unwrap()
            .is_none());
        assert!(get_anon_post_by_message(&mut connection, Snowflake::new(101))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn mutes_and_unmutes() {
        let connector = Connector::new("sqlite::memory:").await.unwrap();
        let mut connection = connector.connection().await.unwrap();
        put_anon_mute(&mut connection, Snowflake::new(7), Snowflake::new(1), Utc::now())
            .await
            .unwrap();
        assert!(is_anon_muted(&mut connection, Snowflake::new(7)).await.unwrap());
        assert!(!is_anon_muted(&mut connection, Snowflake::new(8)).await.unwrap());
        delete_anon_mute(&mut connection, Snowflake::new(7))
            .await
            .unwrap();
        assert!(!is_anon_muted(&mut connection, Snowflake::new(7)).await.unwrap());
    }
}
