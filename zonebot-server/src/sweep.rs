//! The periodic pass which moves time-driven state forward.
//!
//! Each step loads what is due and handles it item by item. A failing item
//! is logged and left as it was, so the next pass retries it.

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use zonebot::model::{RequestKind, RequestStatus};

use crate::db;
use crate::errors::BotError;
use crate::services::Context;

/// How many items each step of a pass handled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub announcements_sent: usize,
    pub events_started: usize,
    pub events_ended: usize,
    pub groups_archived: usize,
    pub invites_purged: u64,
    pub failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

fn tally<T>(result: Result<T, BotError>, id: i64, step: &str, count: &mut usize, failures: &mut usize) {
    match result {
        Ok(_) => *count += 1,
        Err(error) => {
            *failures += 1;
            tracing::error!(request = id, step, %error, "sweep step failed");
        }
    }
}

/// Run one pass at `now`.
pub async fn sweep(context: &Context, now: DateTime<Utc>) -> Result<SweepReport, BotError> {
    let mut report = SweepReport::default();
    let hub = context.hub();

    let (announcements, starting, ending) = {
        let mut connection = context.connection().await?;
        let announcements = db::get_due_requests(
            &mut connection,
            RequestKind::Announcement,
            RequestStatus::Scheduled,
            now,
        )
        .await
        .map_err(BotError::Storage)?;
        let starting =
            db::get_due_requests(&mut connection, RequestKind::Event, RequestStatus::Scheduled, now)
                .await
                .map_err(BotError::Storage)?;
        let ending = db::get_finished_events(&mut connection, now)
            .await
            .map_err(BotError::Storage)?;
        (announcements, starting, ending)
    };

    for request in &announcements {
        tally(
            hub.deliver_announcement(request, None, now).await,
            request.id,
            "deliver announcement",
            &mut report.announcements_sent,
            &mut report.failures,
        );
    }
    for request in &starting {
        tally(
            hub.start_event(request, now).await,
            request.id,
            "start event",
            &mut report.events_started,
            &mut report.failures,
        );
    }
    for request in &ending {
        tally(
            hub.end_event(request, now).await,
            request.id,
            "end event",
            &mut report.events_ended,
            &mut report.failures,
        );
    }

    match context.temp_groups().archive_expired(now).await {
        Ok(archived) => report.groups_archived = archived,
        Err(error) => {
            report.failures += 1;
            tracing::error!(%error, "could not archive expired temporary groups");
        }
    }

    let purged = {
        let mut connection = context.connection_mut().await?;
        db::delete_expired_invites(&mut connection, now).await
    };
    match purged {
        Ok(purged) => report.invites_purged = purged,
        Err(error) => {
            report.failures += 1;
            tracing::error!(%error, "could not purge expired invites");
        }
    }

    Ok(report)
}

/// Sweep every `sweep_interval` until the task is dropped.
pub async fn run_sweep(context: Context) {
    let mut interval = tokio::time::interval(context.settings.sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(
        seconds = context.settings.sweep_interval.as_secs(),
        "sweep started"
    );
    loop {
        interval.tick().await;
        match sweep(&context, Utc::now()).await {
            Ok(report) if report.is_empty() => tracing::trace!("sweep found nothing due"),
            Ok(report) => tracing::info!(?report, "sweep done"),
            Err(error) => tracing::error!(%error, "sweep failed"),
        }
    }
}
