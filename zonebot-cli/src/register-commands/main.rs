use anyhow::Result;
use clap::Parser;
use tokio;
use zonebot::commands::command_definitions;

use zonebot_server::config::DiscordArgs;
use zonebot_server::discord::RestClient;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    discord: DiscordArgs,
    /// Register for every guild instead of the configured one. Global
    /// commands can take up to an hour to appear.
    #[arg(long)]
    global: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let rest = RestClient::new(&args.discord.token)?;
    let guild_id = if args.global {
        None
    } else {
        Some(args.discord.guild_id)
    };
    let registered = rest
        .register_commands(
            args.discord.application_id,
            guild_id,
            &command_definitions(),
        )
        .await?;
    match guild_id {
        Some(guild_id) => println!("registered {} commands in guild {}", registered, guild_id),
        None => println!("registered {} global commands", registered),
    }

    Ok(())
}
