use std::path::PathBuf;

use anyhow::{Error, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tokio;
use zonebot::model::RequestStatus;

use zonebot_server::db::{self, Connector};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    path_db: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the most recent requests.
    ListRequests {
        #[arg(long)]
        status: Option<RequestStatus>,
        #[arg(long, default_value_t = 20)]
        count: u64,
    },
    /// Move a request to another status.
    SetStatus {
        id: i64,
        status: RequestStatus,
        /// Skip the workflow check.
        #[arg(long)]
        force: bool,
    },
    /// Mark an archived zone as live again. Its channels and roles are not
    /// recreated.
    UnarchiveZone { id: i64 },
    /// Forget who wrote anonymous posts older than `days`.
    PurgeAnon { days: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut connector = Connector::new(&format!(
        "sqlite:{}",
        args.path_db.to_str().ok_or(Error::msg("invalid DB path"))?
    ))
    .await?;
    let mut connection = connector.connection_mut().await?;

    match args.command {
        Commands::ListRequests { status, count } => {
            for request in db::get_recent_requests(&mut *connection, status, count).await? {
                println!(
                    "#{}\t{}\t{}\t{}\t{}",
                    request.id, request.kind, request.status, request.author_id, request.title
                );
            }
        }
        Commands::SetStatus { id, status, force } => {
            let request = db::get_request(&mut *connection, id)
                .await?
                .ok_or(Error::msg("request does not exist"))?;
            if !force {
                request.status.transition(request.kind, status)?;
            }
            if !db::update_request_status(
                &mut *connection,
                id,
                request.status,
                status,
                None,
                Utc::now(),
            )
            .await?
            {
                Err(Error::msg("request was changed meanwhile"))?;
            }
            println!("#{}: {} -> {}", id, request.status, status);
        }
        Commands::UnarchiveZone { id } => {
            let zone = db::get_zone(&mut *connection, id)
                .await?
                .ok_or(Error::msg("zone does not exist"))?;
            if zone.is_live() {
                Err(Error::msg("zone is not archived"))?;
            }
            if db::get_zone_by_name(&mut *connection, zone.guild_id, &zone.name)
                .await?
                .is_some()
            {
                Err(Error::msg("a live zone already has this name"))?;
            }
            db::update_zone_archived(&mut *connection, id, false).await?;
            println!("zone {} is live again", zone.name);
        }
        Commands::PurgeAnon { days } => {
            if days < 0 {
                Err(Error::msg("days cannot be negative"))?;
            }
            let purged =
                db::delete_anon_posts_before(&mut *connection, Utc::now() - Duration::days(days))
                    .await?;
            println!("purged {} anonymous posts", purged);
        }
    };

    Ok(())
}
