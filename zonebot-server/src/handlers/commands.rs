//! Slash command routing.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use zonebot::interaction::{option_int, option_str, option_user, CommandOption, Interaction};
use zonebot::message::{Component, InteractionResponse, Modal, OutgoingMessage};
use zonebot::model::Policy;
use zonebot::Snowflake;

use crate::errors::BotError;
use crate::services::{render, Actor, Context, JoinOutcome};

pub const MODAL_ANNOUNCE: &str = "announce";
pub const HUB_TARGET: &str = "hub";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Parse a `YYYY-MM-DD HH:MM` time, read as UTC.
pub(super) fn parse_time(text: &str) -> Result<DateTime<Utc>, BotError> {
    NaiveDateTime::parse_from_str(text.trim(), TIME_FORMAT)
        .map(|x| Utc.from_utc_datetime(&x))
        .map_err(|_| BotError::invalid(format!("`{}` is not a YYYY-MM-DD HH:MM time", text.trim())))
}

fn required_str<'a>(options: &'a [CommandOption], name: &str) -> Result<&'a str, BotError> {
    option_str(options, name).ok_or_else(|| BotError::invalid(format!("`{}` is required", name)))
}

fn required_int(options: &[CommandOption], name: &str) -> Result<i64, BotError> {
    option_int(options, name).ok_or_else(|| BotError::invalid(format!("`{}` is required", name)))
}

fn required_user(options: &[CommandOption], name: &str) -> Result<Snowflake, BotError> {
    option_user(options, name).ok_or_else(|| BotError::invalid(format!("`{}` is required", name)))
}

fn reply(message: OutgoingMessage) -> Result<InteractionResponse, BotError> {
    Ok(InteractionResponse::Message(message))
}

fn notice(text: impl Into<String>) -> Result<InteractionResponse, BotError> {
    reply(render::notice(text))
}

/// The modal collecting an announcement for `target`, a zone name or
/// [`HUB_TARGET`].
pub(super) fn announce_modal(target: &str) -> Modal {
    Modal::new(
        format!("{}:{}", MODAL_ANNOUNCE, target),
        "Draft an announcement",
        vec![
            Component::text_input("title", "Title", false, true, 100),
            Component::text_input("body", "Text", true, true, 2000),
            Component::text_input(
                "send_at",
                "Send at, YYYY-MM-DD HH:MM UTC (empty: on approval)",
                false,
                false,
                16,
            ),
        ],
    )
}

pub async fn run_command(
    context: &Context,
    interaction: &Interaction,
    actor: Actor,
) -> Result<InteractionResponse, BotError> {
    let name = interaction.command_name().unwrap_or_default();
    let (path, options) = interaction.subcommand_path();
    let sub = path.first().copied().unwrap_or_default();
    match name {
        "zone" => run_zone(context, sub, options, actor).await,
        "announce" => {
            let target = option_str(options, "zone").unwrap_or(HUB_TARGET);
            if target != HUB_TARGET {
                // checked again when the draft is stored
                let zone = context.load_zone(target).await?;
                if zone.owner_id != actor.id {
                    return Err(BotError::NotOwner(zone.name));
                }
            }
            Ok(InteractionResponse::Modal(announce_modal(target.trim())))
        }
        "event" if sub == "create" => {
            let start = parse_time(required_str(options, "start")?)?;
            let request = context
                .hub()
                .draft_event(
                    actor,
                    option_str(options, "zone"),
                    required_str(options, "title")?,
                    required_str(options, "description")?,
                    start,
                    required_int(options, "minutes")?,
                )
                .await?;
            reply(render::draft_preview(&request))
        }
        "temp" => run_temp(context, interaction, sub, options, actor).await,
        "staff" => run_staff(context, sub, options, actor).await,
        _ => Err(BotError::invalid(format!("unknown command `{}`", name))),
    }
}

async fn run_zone(
    context: &Context,
    sub: &str,
    options: &[CommandOption],
    actor: Actor,
) -> Result<InteractionResponse, BotError> {
    let hub = context.hub();
    let policy = context.policy();
    match sub {
        "request" => {
            let request = hub
                .request_zone(
                    actor.id,
                    required_str(options, "name")?,
                    required_str(options, "description")?,
                )
                .await?;
            reply(render::draft_preview(&request))
        }
        "info" => reply(render::zone_info(
            &hub.zone_info(required_str(options, "zone")?).await?,
        )),
        "list" => reply(render::zone_list(&hub.list_zones().await?)),
        "policy" => {
            let mode: Policy = required_str(options, "mode")?
                .parse()
                .map_err(|x: anyhow::Error| BotError::invalid(x.to_string()))?;
            let zone = policy
                .set_policy(required_str(options, "zone")?, actor, mode)
                .await?;
            notice(format!("**{}** is now {}.", zone.name, zone.policy))
        }
        "join" => match policy.join(required_str(options, "zone")?, actor.id).await? {
            JoinOutcome::Joined(zone) => notice(format!("Welcome to **{}**!", zone.name)),
            JoinOutcome::Requested(request) => notice(format!(
                "Asked the owner of **{}** to let you in.",
                request.title
            )),
        },
        "leave" => {
            let zone = policy.leave(required_str(options, "zone")?, actor.id).await?;
            notice(format!("You left **{}**.", zone.name))
        }
        "invite" => {
            let user = required_user(options, "user")?;
            let invite = policy
                .invite(required_str(options, "zone")?, actor, user)
                .await?;
            notice(format!(
                "Invited <@{}> until {}.",
                invite.user_id,
                render::timestamp(invite.expires_at)
            ))
        }
        "kick" => {
            let user = required_user(options, "user")?;
            let zone = policy.kick(required_str(options, "zone")?, actor, user).await?;
            notice(format!("Removed <@{}> from **{}**.", user, zone.name))
        }
        "transfer" => {
            let user = required_user(options, "user")?;
            let zone = hub
                .transfer(required_str(options, "zone")?, actor, user)
                .await?;
            notice(format!("<@{}> now owns **{}**.", zone.owner_id, zone.name))
        }
        "archive" => {
            let zone = hub.archive_zone(required_str(options, "zone")?, actor).await?;
            notice(format!("Archived **{}**.", zone.name))
        }
        _ => Err(BotError::invalid(format!("unknown zone command `{}`", sub))),
    }
}

async fn run_temp(
    context: &Context,
    interaction: &Interaction,
    sub: &str,
    options: &[CommandOption],
    actor: Actor,
) -> Result<InteractionResponse, BotError> {
    let temp = context.temp_groups();
    let channel = interaction.channel_id.ok_or(BotError::UnknownGroup);
    match sub {
        "create" => {
            let members: Vec<Snowflake> = option_user(options, "user").into_iter().collect();
            let group = temp
                .create(
                    actor.id,
                    required_str(options, "name")?,
                    required_int(options, "hours")?,
                    &members,
                )
                .await?;
            reply(render::temp_group(&group))
        }
        "add" => {
            let user = required_user(options, "user")?;
            let group = temp.add(channel?, actor, user).await?;
            notice(format!("Added <@{}> to **{}**.", user, group.name))
        }
        "extend" => {
            let group = temp
                .extend(channel?, actor, required_int(options, "hours")?)
                .await?;
            reply(render::temp_group(&group))
        }
        "close" => {
            let group = temp.close(channel?, actor).await?;
            notice(format!("Closed **{}**.", group.name))
        }
        _ => Err(BotError::invalid(format!("unknown temp command `{}`", sub))),
    }
}

async fn run_staff(
    context: &Context,
    sub: &str,
    options: &[CommandOption],
    actor: Actor,
) -> Result<InteractionResponse, BotError> {
    let staff = context.staff_panel();
    match sub {
        "panel" => {
            let pending = staff.refresh_panel(actor).await?;
            notice(format!("Panel refreshed, {} pending.", pending))
        }
        "freeze" | "unfreeze" => {
            let zone = staff
                .freeze(required_str(options, "zone")?, actor, sub == "freeze")
                .await?;
            notice(format!("**{}** {}.", zone.name, if zone.frozen { "frozen" } else { "unfrozen" }))
        }
        "archive" => {
            let zone = staff.archive(required_str(options, "zone")?, actor).await?;
            notice(format!("Archived **{}**.", zone.name))
        }
        "mute-anon" | "unmute-anon" => {
            let user = required_user(options, "user")?;
            let muted = sub == "mute-anon";
            staff.mute_anon(user, actor, muted).await?;
            notice(format!(
                "<@{}> {} in anonymous channels.",
                user,
                if muted { "is muted" } else { "may post again" }
            ))
        }
        "reveal" => {
            let message: Snowflake = required_str(options, "message")?
                .parse()
                .map_err(|_| BotError::UnknownMessage)?;
            reply(render::reveal(&staff.reveal(message, actor).await?))
        }
        "log" => {
            let count = option_int(options, "count").unwrap_or(10).max(1) as u64;
            reply(render::moderation_log(&staff.recent_log(actor, count).await?))
        }
        _ => Err(BotError::invalid(format!("unknown staff command `{}`", sub))),
    }
}
