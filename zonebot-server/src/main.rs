use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Error, Result};
use axum;
use clap::Parser;
use tokio;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;
use zonebot::signature::public_key_from_hex;

use zonebot_server::config::{BotArgs, DiscordArgs, Settings};
use zonebot_server::db::Connector;
use zonebot_server::discord::gateway::run_gateway;
use zonebot_server::discord::RestClient;
use zonebot_server::handlers::{build_api, AppState, DEFER_AFTER};
use zonebot_server::services::Context;
use zonebot_server::sweep::run_sweep;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    port: u16,
    path_db: PathBuf,
    #[arg(short = 'l')]
    loopback: bool,
    /// Path under which the API is served, without slashes.
    #[arg(long, default_value = "")]
    prefix: String,
    /// Serve interactions only; anonymous channels are not relayed.
    #[arg(long)]
    no_gateway: bool,
    #[command(flatten)]
    discord: DiscordArgs,
    #[command(flatten)]
    bot: BotArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Arc::new(Settings::new(&args.discord, &args.bot)?);
    let public_key = Arc::new(public_key_from_hex(&args.bot.public_key)?);

    let connector = Arc::new(RwLock::new(
        Connector::new(&format!(
            "sqlite:{}",
            args.path_db.to_str().ok_or(Error::msg("invalid DB path"))?
        ))
        .await?,
    ));
    let rest = Arc::new(RestClient::new(&settings.token)?);
    let context = Context {
        connector,
        platform: rest.clone(),
        settings: settings.clone(),
    };

    tokio::spawn(run_sweep(context.clone()));
    if args.no_gateway {
        tracing::warn!("gateway disabled, anonymous channels are not relayed");
    } else {
        tokio::spawn(run_gateway(context.clone(), rest));
    }

    let state = AppState {
        context,
        public_key,
        defer_after: DEFER_AFTER,
    };
    let app = build_api(state, args.prefix.trim_matches('/'));
    let address: SocketAddr = format!(
        "{}:{}",
        if args.loopback { "127.0.0.1" } else { "0.0.0.0" },
        args.port
    )
    .parse()?;
    tracing::info!(%address, guild = %settings.guild_id, "zonebot listening");

    axum::Server::bind(&address)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
