use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use zonebot::model::{NewRequest, Request, RequestKind, RequestStatus};
use zonebot::Snowflake;

use super::{get_snowflake, get_snowflake_opt, get_time, get_time_opt, to_millis};

pub async fn create_requests(connection: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "\
        CREATE TABLE IF NOT EXISTS `Requests` \
        (\
            `id` INTEGER PRIMARY KEY AUTOINCREMENT, \
            `kind` TEXT NOT NULL, \
            `status` TEXT NOT NULL, \
            `guild_id` TEXT NOT NULL, \
            `author_id` TEXT NOT NULL, \
            `zone_id` INTEGER, \
            `title` TEXT NOT NULL, \
            `body` TEXT NOT NULL, \
            `send_at_millis` BIGINT, \
            `end_at_millis` BIGINT, \
            `panel_message_id` TEXT, \
            `decided_by` TEXT, \
            `created_millis` BIGINT NOT NULL, \
            `updated_millis` BIGINT NOT NULL\
        );\
        ",
    )
    .execute(&mut *connection)
    .await?;
    sqlx::query(
        "\
        CREATE INDEX IF NOT EXISTS `requests_status` \
        ON `Requests`(`status`, `send_at_millis`);\
        ",
    )
    .execute(&mut *connection)
    .await?;
    Ok(())
}

fn request_from_row(row: &SqliteRow) -> Result<Request> {
    Ok(Request {
        id: row.try_get("id")?,
        kind: RequestKind::from_str(row.try_get("kind")?)?,
        status: RequestStatus::from_str(row.try_get("status")?)?,
        guild_id: get_snowflake(row, "guild_id")?,
        author_id: get_snowflake(row, "author_id")?,
        zone_id: row.try_get("zone_id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        send_at: get_time_opt(row, "send_at_millis")?,
        end_at: get_time_opt(row, "end_at_millis")?,
        panel_message_id: get_snowflake_opt(row, "panel_message_id")?,
        decided_by: get_snowflake_opt(row, "decided_by")?,
        created_at: get_time(row, "created_millis")?,
        updated_at: get_time(row, "updated_millis")?,
    })
}

async fn collect_requests(
    rows: impl futures::Stream<Item = Result<SqliteRow, sqlx::Error>>,
) -> Result<Vec<Request>> {
    futures::pin_mut!(rows);
    let mut requests = Vec::new();
    while let Some(row) = rows.try_next().await? {
        requests.push(request_from_row(&row)?);
    }
    Ok(requests)
}

/// Insert a request in its kind's initial status, returning its ID.
pub async fn put_request(
    connection: &mut SqliteConnection,
    request: &NewRequest,
    now: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        "\
        INSERT INTO `Requests` \
        (`kind`, `status`, `guild_id`, `author_id`, `zone_id`, `title`, `body`, \
        `send_at_millis`, `end_at_millis`, `created_millis`, `updated_millis`) \
        VALUES($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10);\
        ",
    )
    .bind(request.kind.as_str())
    .bind(request.kind.initial_status().as_str())
    .bind(request.guild_id.to_string())
    .bind(request.author_id.to_string())
    .bind(request.zone_id)
    .bind(&request.title)
    .bind(&request.body)
    .bind(request.send_at.map(to_millis))
    .bind(request.end_at.map(to_millis))
    .bind(to_millis(now))
    .execute(&mut *connection)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_request(connection: &mut SqliteConnection, id: i64) -> Result<Option<Request>> {
    sqlx::query(
        "\
        SELECT * FROM `Requests` \
        WHERE `id` = $1;\
        ",
    )
    .bind(id)
    .fetch_optional(&mut *connection)
    .await?
    .as_ref()
    .map(request_from_row)
    .transpose()
}

/// Move a request from `from` to `to`. Returns `false`, changing nothing,
/// when the stored status is no longer `from`, which happens when two
/// people act on the same request at once.
pub async fn update_request_status(
    connection: &mut SqliteConnection,
    id: i64,
    from: RequestStatus,
    to: RequestStatus,
    decided_by: Option<Snowflake>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "\
        UPDATE `Requests` \
        SET `status` = $3, \
        `decided_by` = COALESCE($4, `decided_by`), \
        `updated_millis` = $5 \
        WHERE `id` = $1 AND `status` = $2;\
        ",
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(decided_by.map(|x| x.to_string()))
    .bind(to_millis(now))
    .execute(&mut *connection)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn update_request_panel_message(
    connection: &mut SqliteConnection,
    id: i64,
    message_id: Snowflake,
) -> Result<()> {
    sqlx::query(
        "\
        UPDATE `Requests` SET `panel_message_id` = $2 \
        WHERE `id` = $1;\
        ",
    )
    .bind(id)
    .bind(message_id.to_string())
    .execute(&mut *connection)
    .await?;
    Ok(())
}

/// Requests of `guild_id` in `status`, oldest first.
pub async fn get_requests_by_status(
    connection: &mut SqliteConnection,
    guild_id: Snowflake,
    status: RequestStatus,
    count: u64,
) -> Result<Vec<Request>> {
    let query = sqlx::query(
        "\
        SELECT * FROM `Requests` \
        WHERE `guild_id` = $1 \
        AND `status` = $2 \
        ORDER BY `id` \
        LIMIT $3;\
        ",
    )
    .bind(guild_id.to_string())
    .bind(status.as_str())
    .bind(i64::try_from(count)?);
    collect_requests(query.fetch(&mut *connection)).await
}

/// The most recent requests, newest first, optionally of one status.
pub async fn get_recent_requests(
    connection: &mut SqliteConnection,
    status: Option<RequestStatus>,
    count: u64,
) -> Result<Vec<Request>> {
    let query_str = format!(
        "\
        SELECT * FROM `Requests` \
        {} \
        ORDER BY `id` DESC \
        LIMIT $1;\
        ",
        if status.is_some() {
            "WHERE `status` = $2"
        } else {
            ""
        }
    );
    let query = match status {
        Some(status) => sqlx::query(&query_str)
            .bind(i64::try_from(count)?)
            .bind(status.as_str()),
        None => sqlx::query(&query_str).bind(i64::try_from(count)?),
    };
    collect_requests(query.fetch(&mut *connection)).await
}

/// Requests of `kind` in `status` whose send time is at or before `now`.
pub async fn get_due_requests(
    connection: &mut SqliteConnection,
    kind: RequestKind,
    status: RequestStatus,
    now: DateTime<Utc>,
) -> Result<Vec<Request>> {
    let query = sqlx::query(
        "\
        SELECT * FROM `Requests` \
        WHERE `kind` = $1 \
        AND `status` = $2 \
        AND `send_at_millis` <= $3 \
        ORDER BY `send_at_millis`;\
        ",
    )
    .bind(kind.as_str())
    .bind(status.as_str())
    .bind(to_millis(now));
    collect_requests(query.fetch(&mut *connection)).await
}

/// Running events whose end time is at or before `now`.
pub async fn get_finished_events(
    connection: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<Vec<Request>> {
    let query = sqlx::query(
        "\
        SELECT * FROM `Requests` \
        WHERE `kind` = 'event' \
        AND `status` = 'running' \
        AND `end_at_millis` <= $1 \
        ORDER BY `end_at_millis`;\
        ",
    )
    .bind(to_millis(now));
    collect_requests(query.fetch(&mut *connection)).await
}

/// The pending join request of `author_id` for `zone_id`, if any.
pub async fn get_pending_join(
    connection: &mut SqliteConnection,
    zone_id: i64,
    author_id: Snowflake,
) -> Result<Option<Request>> {
    sqlx::query(
        "\
        SELECT * FROM `Requests` \
        WHERE `kind` = 'join' \
        AND `status` = 'pending' \
        AND `zone_id` = $1 \
        AND `author_id` = $2 \
        LIMIT 1;\
        ",
    )
    .bind(zone_id)
    .bind(author_id.to_string())
    .fetch_optional(&mut *connection)
    .await?
    .as_ref()
    .map(request_from_row)
    .transpose()
}

/// Requests of any kind tied to `zone_id` that are still awaiting an outcome.
pub async fn get_open_zone_requests(
    connection: &mut SqliteConnection,
    zone_id: i64,
) -> Result<Vec<Request>> {
    let query = sqlx::query(
        "\
        SELECT * FROM `Requests` \
        WHERE `zone_id` = $1 \
        AND `status` IN ('draft', 'pending', 'scheduled') \
        ORDER BY `id`;\
        ",
    )
    .bind(zone_id);
    collect_requests(query.fetch(&mut *connection)).await
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    pub fn new_request(kind: RequestKind, author: u64) -> NewRequest {
        NewRequest {
            kind,
            guild_id: Snowflake::new(1),
            author_id: Snowflake::new(author),
            zone_id: None,
            title: "title".to_string(),
            body: "body".to_string(),
            send_at: None,
            end_at: None,
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use tokio;

    use super::super::{from_millis, Connector};
    use super::test_utils::*;
    use super::*;

    #[tokio::test]
    async fn puts_and_gets_request() {
        let connector = Connector::new("sqlite::memory:").await.unwrap();
        let mut connection = connector.connection().await.unwrap();
        let now = from_millis(1_000_000).unwrap();
        let mut request = new_request(RequestKind::Event, 7);
        request.send_at = Some(now + Duration::hours(1));
        request.end_at = Some(now + Duration::hours(2));
        let id = put_request(&mut connection, &request, now).await.unwrap();
        let back = get_request(&mut connection, id).await.unwrap().unwrap();
        assert_eq!(back.kind, RequestKind::Event);
        assert_eq!(back.status, RequestStatus::Draft);
        assert_eq!(back.author_id, Snowflake::new(7));
        assert_eq!(back.send_at, request.send_at);
        assert_eq!(back.end_at, request.end_at);
        assert_eq!(back.created_at, now);
        assert!(back.decided_by.is_none());
        assert!(get_request(&mut connection, id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn join_requests_start_pending() {
        let connector = Connector::new("sqlite::memory:").await.unwrap();
        let mut connection = connector.connection().await.unwrap();
        let mut request = new_request(RequestKind::Join, 7);
        request.zone_id = Some(3);
        let id = put_request(&mut connection, &request, Utc::now())
            .await
            .unwrap();
        let pending = get_pending_join(&mut connection, 3, Snowflake::new(7))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.id, id);
        assert_eq!(pending.status, RequestStatus::Pending);
        assert!(get_pending_join(&mut connection, 3, Snowflake::new(8))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn updates_status_only_from_expected() {
        let connector = Connector::new("sqlite::memory:").await.unwrap();
        let mut connection = connector.connection().await.unwrap();
        let id = put_request(
            &mut connection,
            &new_request(RequestKind::Zone, 7),
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(update_request_status(
            &mut connection,
            id,
            RequestStatus::Draft,
            RequestStatus::Pending,
            None,
            Utc::now()
        )
        .await
        .unwrap());
        // a second identical update sees the status already moved
        assert!(!update_request_status(
            &mut connection,
            id,
            RequestStatus::Draft,
            RequestStatus::Pending,
            None,
            Utc::now()
        )
        .await
        .unwrap());
        assert!(update_request_status(
            &mut connection,
            id,
            RequestStatus::Pending,
            RequestStatus::Accepted,
            Some(Snowflake::new(9)),
            Utc::now()
        )
        .await
        .unwrap());
        // a later update without a decider keeps the recorded one
        update_request_status(
            &mut connection,
            id,
            RequestStatus::Accepted,
            RequestStatus::Running,
            None,
            Utc::now(),
        )
        .await
        .unwrap();
        let back = get_request(&mut connection, id).await.unwrap().unwrap();
        assert_eq!(back.status, RequestStatus::Running);
        assert_eq!(back.decided_by, Some(Snowflake::new(9)));
    }

    #[tokio::test]
    async fn gets_due_and_finished() {
        let connector = Connector::new("sqlite::memory:").await.unwrap();
        let mut connection = connector.connection().await.unwrap();
        let now = from_millis(10_000_000).unwrap();
        let mut due = new_request(RequestKind::Announcement, 7);
        due.send_at = Some(now - Duration::minutes(1));
        let mut later = new_request(RequestKind::Announcement, 7);
        later.send_at = Some(now + Duration::minutes(1));
        let mut event = new_request(RequestKind::Event, 7);
        event.send_at = Some(now - Duration::hours(2));
        event.end_at = Some(now - Duration::hours(1));
        let due_id = put_request(&mut connection, &due, now).await.unwrap();
        let later_id = put_request(&mut connection, &later, now).await.unwrap();
        let event_id = put_request(&mut connection, &event, now).await.unwrap();
        for (id, kind) in [
            (due_id, RequestKind::Announcement),
            (later_id, RequestKind::Announcement),
            (event_id, RequestKind::Event),
        ] {
            let mut status = RequestStatus::Draft;
            for to in [RequestStatus::Pending, RequestStatus::Scheduled] {
                status.transition(kind, to).unwrap();
                update_request_status(&mut connection, id, status, to, None, now)
                    .await
                    .unwrap();
                status = to;
            }
        }
        let out = get_due_requests(
            &mut connection,
            RequestKind::Announcement,
            RequestStatus::Scheduled,
            now,
        )
        .await
        .unwrap();
        assert_eq!(out.iter().map(|x| x.id).collect::<Vec<_>>(), [due_id]);
        assert!(get_finished_events(&mut connection, now)
            .await
            .unwrap()
            .is_empty());
        update_request_status(
            &mut connection,
            event_id,
            RequestStatus::Scheduled,
            RequestStatus::Running,
            None,
            now,
        )
        .await
        .unwrap();
        let out = get_finished_events(&mut connection, now).await.unwrap();
        assert_eq!(out.iter().map(|x| x.id).collect::<Vec<_>>(), [event_id]);
    }

    #[tokio::test]
    async fn lists_requests_by_status() {
        let connector = Connector::new("sqlite::memory:").await.unwrap();
        let mut connection = connector.connection().await.unwrap();
        let a = put_request(&mut connection, &new_request(RequestKind::Zone, 7), Utc::now())
            .await
            .unwrap();
        let b = put_request(&mut connection, &new_request(RequestKind::Zone, 8), Utc::now())
            .await
            .unwrap();
        update_request_status(
            &mut connection,
            b,
            RequestStatus::Draft,
            RequestStatus::Pending,
            None,
            Utc::now(),
        )
        .await
        .unwrap();
        let pending = get_requests_by_status(
            &mut connection,
            Snowflake::new(1),
            RequestStatus::Pending,
            10,
        )
        .await
        .unwrap();
        assert_eq!(pending.iter().map(|x| x.id).collect::<Vec<_>>(), [b]);
        let recent = get_recent_requests(&mut connection, None, 10).await.unwrap();
        assert_eq!(recent.iter().map(|x| x.id).collect::<Vec<_>>(), [b, a]);
        let drafts = get_recent_requests(&mut connection, Some(RequestStatus::Draft), 10)
            .await
            .unwrap();
        assert_eq!(drafts.iter().map(|x| x.id).collect::<Vec<_>>(), [a]);
    }

    #[tokio::test]
    async fn gets_open_zone_requests() {
        let connector = Connector::new("sqlite::memory:").await.unwrap();
        let mut connection = connector.connection().await.unwrap();
        let now = Utc::now();
        let mut join = new_request(RequestKind::Join, 8);
        join.zone_id = Some(3);
        let mut sent = new_request(RequestKind::Announcement, 7);
        sent.zone_id = Some(3);
        let mut elsewhere = new_request(RequestKind::Announcement, 7);
        elsewhere.zone_id = Some(4);
        let join_id = put_request(&mut connection, &join, now).await.unwrap();
        let sent_id = put_request(&mut connection, &sent, now).await.unwrap();
        put_request(&mut connection, &elsewhere, now).await.unwrap();
        put_request(&mut connection, &new_request(RequestKind::Announcement, 7), now)
            .await
            .unwrap();
        let mut status = RequestStatus::Draft;
        for to in [RequestStatus::Pending, RequestStatus::Accepted, RequestStatus::Sent] {
            update_request_status(&mut connection, sent_id, status, to, None, now)
                .await
                .unwrap();
            status = to;
        }
        let open = get_open_zone_requests(&mut connection, 3).await.unwrap();
        assert_eq!(open.iter().map(|x| x.id).collect::<Vec<_>>(), [join_id]);
    }
}
