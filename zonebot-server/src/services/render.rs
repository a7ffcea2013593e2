//! Message layouts and the custom IDs carried by their buttons.

use chrono::{DateTime, Utc};
use zonebot::message::{
    ButtonStyle, Component, Embed, OutgoingMessage, COLOR_DANGER, COLOR_INFO, COLOR_SUCCESS,
    COLOR_WARNING,
};
use zonebot::model::{Request, RequestKind, RequestStatus, TempGroup, Zone};

use super::hub::ZoneInfo;
use crate::db::{AnonPost, LogEntry};

/// What a pressed button asks for, as encoded in its custom ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Submit(i64),
    Cancel(i64),
    StaffAccept(i64),
    StaffDeny(i64),
    StaffSchedule(i64),
    JoinAccept(i64),
    JoinDeny(i64),
}

impl ButtonAction {
    pub fn custom_id(&self) -> String {
        match self {
            Self::Submit(id) => format!("req:submit:{}", id),
            Self::Cancel(id) => format!("req:cancel:{}", id),
            Self::StaffAccept(id) => format!("staff:accept:{}", id),
            Self::StaffDeny(id) => format!("staff:deny:{}", id),
            Self::StaffSchedule(id) => format!("staff:schedule:{}", id),
            Self::JoinAccept(id) => format!("join:accept:{}", id),
            Self::JoinDeny(id) => format!("join:deny:{}", id),
        }
    }

    pub fn parse(custom_id: &str) -> Option<Self> {
        let (prefix, id) = custom_id.rsplit_once(':')?;
        let id: i64 = id.parse().ok()?;
        match prefix {
            "req:submit" => Some(Self::Submit(id)),
            "req:cancel" => Some(Self::Cancel(id)),
            "staff:accept" => Some(Self::StaffAccept(id)),
            "staff:deny" => Some(Self::StaffDeny(id)),
            "staff:schedule" => Some(Self::StaffSchedule(id)),
            "join:accept" => Some(Self::JoinAccept(id)),
            "join:deny" => Some(Self::JoinDeny(id)),
            _ => None,
        }
    }
}

fn button(style: ButtonStyle, label: &str, action: ButtonAction) -> Component {
    Component::button(style, label, action.custom_id())
}

/// A timestamp rendered in each reader's own time zone.
pub fn timestamp(time: DateTime<Utc>) -> String {
    format!("<t:{}:f>", time.timestamp())
}

fn status_color(status: RequestStatus) -> u32 {
    match status {
        RequestStatus::Draft | RequestStatus::Pending => COLOR_INFO,
        RequestStatus::Accepted
        | RequestStatus::Scheduled
        | RequestStatus::Sent
        | RequestStatus::Running => COLOR_SUCCESS,
        RequestStatus::Ended => COLOR_WARNING,
        RequestStatus::Denied | RequestStatus::Cancelled => COLOR_DANGER,
    }
}

fn request_embed(request: &Request) -> Embed {
    let title = match request.kind {
        RequestKind::Zone => format!("Zone request: {}", request.title),
        RequestKind::Announcement => format!("Announcement: {}", request.title),
        RequestKind::Event => format!("Event: {}", request.title),
        RequestKind::Join => format!("Join request: {}", request.title),
    };
    let mut embed = Embed::new(title)
        .description(request.body.clone())
        .color(status_color(request.status))
        .field("Request", format!("#{}", request.id))
        .field("Author", format!("<@{}>", request.author_id))
        .field("Status", request.status.as_str());
    if let Some(send_at) = request.send_at {
        let name = if request.kind == RequestKind::Event {
            "Starts"
        } else {
            "Send at"
        };
        embed = embed.field(name, timestamp(send_at));
    }
    if let Some(end_at) = request.end_at {
        embed = embed.field("Ends", timestamp(end_at));
    }
    if let Some(decided_by) = request.decided_by {
        embed = embed.field("Decided by", format!("<@{}>", decided_by));
    }
    embed
}

/// The reply to a new draft, with buttons to submit or drop it.
pub fn draft_preview(request: &Request) -> OutgoingMessage {
    OutgoingMessage::embed(request_embed(request))
        .buttons(vec![
            button(ButtonStyle::Primary, "Submit", ButtonAction::Submit(request.id)),
            button(ButtonStyle::Secondary, "Cancel", ButtonAction::Cancel(request.id)),
        ])
        .ephemeral()
}

/// The request as the author sees it after acting on it.
pub fn request_status(request: &Request) -> OutgoingMessage {
    OutgoingMessage::embed(request_embed(request)).ephemeral()
}

/// One request on the staff panel; pending requests get decision buttons.
pub fn panel_entry(request: &Request) -> OutgoingMessage {
    let message = OutgoingMessage::embed(request_embed(request));
    if request.status != RequestStatus::Pending {
        return message;
    }
    let mut buttons = vec![
        button(
            ButtonStyle::Success,
            "Accept",
            ButtonAction::StaffAccept(request.id),
        ),
        button(ButtonStyle::Danger, "Deny", ButtonAction::StaffDeny(request.id)),
    ];
    if request.send_at.is_some() {
        buttons.push(button(
            ButtonStyle::Secondary,
            "Schedule",
            ButtonAction::StaffSchedule(request.id),
        ));
    }
    message.buttons(buttons)
}

/// The pinned panel summary of everything waiting for staff.
pub fn panel_summary(pending: &[Request]) -> OutgoingMessage {
    let description = if pending.is_empty() {
        "Nothing is waiting for a decision.".to_string()
    } else {
        pending
            .iter()
            .map(|x| format!("#{} {} `{}` by <@{}>", x.id, x.kind, x.title, x.author_id))
            .collect::<Vec<_>>()
            .join("\n")
    };
    OutgoingMessage::embed(
        Embed::new(format!("Staff panel: {} pending", pending.len()))
            .description(description)
            .color(COLOR_INFO),
    )
}

/// Sent to a zone owner when someone asks to join.
pub fn join_request(request: &Request, zone: &Zone) -> OutgoingMessage {
    OutgoingMessage::embed(
        Embed::new(format!("Join request for {}", zone.name))
            .description(format!("<@{}> would like to join.", request.author_id))
            .color(COLOR_INFO),
    )
    .buttons(vec![
        button(
            ButtonStyle::Success,
            "Accept",
            ButtonAction::JoinAccept(request.id),
        ),
        button(ButtonStyle::Danger, "Deny", ButtonAction::JoinDeny(request.id)),
    ])
}

pub fn announcement(request: &Request) -> OutgoingMessage {
    OutgoingMessage::embed(
        Embed::new(request.title.clone())
            .description(request.body.clone())
            .color(COLOR_INFO),
    )
}

pub fn event_started(request: &Request) -> OutgoingMessage {
    let mut embed = Embed::new(format!("Starting now: {}", request.title))
        .description(request.body.clone())
        .color(COLOR_SUCCESS);
    if let Some(end_at) = request.end_at {
        embed = embed.field("Ends", timestamp(end_at));
    }
    OutgoingMessage::embed(embed)
}

pub fn event_ended(request: &Request) -> OutgoingMessage {
    OutgoingMessage::embed(
        Embed::new(format!("Ended: {}", request.title)).color(COLOR_WARNING),
    )
}

pub fn zone_info(info: &ZoneInfo) -> OutgoingMessage {
    let zone = &info.zone;
    let mut embed = Embed::new(zone.name.clone())
        .description(zone.description.clone())
        .color(COLOR_INFO)
        .field("Owner", format!("<@{}>", zone.owner_id))
        .field("Members", info.member_count.to_string())
        .field("Policy", zone.effective_policy().as_str())
        .field("Created", timestamp(zone.created_at));
    if zone.frozen {
        embed = embed.field("Frozen", "yes");
    }
    OutgoingMessage::embed(embed).ephemeral()
}

pub fn zone_list(zones: &[Zone]) -> OutgoingMessage {
    let description = if zones.is_empty() {
        "There are no zones yet.".to_string()
    } else {
        zones
            .iter()
            .map(|x| format!("**{}** ({}) {}", x.name, x.effective_policy(), x.description))
            .collect::<Vec<_>>()
            .join("\n")
    };
    OutgoingMessage::embed(
        Embed::new("Zones")
            .description(description)
            .color(COLOR_INFO),
    )
    .ephemeral()
}

pub fn temp_group(group: &TempGroup) -> OutgoingMessage {
    OutgoingMessage::embed(
        Embed::new(group.name.clone())
            .color(COLOR_INFO)
            .field("Channel", format!("<#{}>", group.channel_id))
            .field("Expires", timestamp(group.expires_at)),
    )
    .ephemeral()
}

pub fn reveal(post: &AnonPost) -> OutgoingMessage {
    OutgoingMessage::embed(
        Embed::new("Relayed message")
            .color(COLOR_WARNING)
            .field("Author", format!("<@{}>", post.author_id))
            .field("Pseudonym", post.pseudonym.clone())
            .field("Origin", format!("<#{}>", post.origin_channel_id))
            .field("Posted", timestamp(post.created_at)),
    )
    .ephemeral()
}

pub fn moderation_log(entries: &[LogEntry]) -> OutgoingMessage {
    let description = if entries.is_empty() {
        "No moderation actions yet.".to_string()
    } else {
        entries
            .iter()
            .map(|x| {
                let mut line = format!(
                    "{} <@{}> {} {}",
                    timestamp(x.created_at),
                    x.staff_id,
                    x.action,
                    x.target
                );
                if !x.detail.is_empty() {
                    line.push_str(&format!(": {}", x.detail));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    OutgoingMessage::embed(
        Embed::new("Moderation log")
            .description(description)
            .color(COLOR_INFO),
    )
    .ephemeral()
}

pub fn notice(text: impl Into<String>) -> OutgoingMessage {
    OutgoingMessage::text(text).ephemeral()
}
