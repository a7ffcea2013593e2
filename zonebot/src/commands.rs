//! Definitions of the slash commands, as registered with the platform.

use serde_json::{json, Value};

use crate::interaction::{OPTION_INTEGER, OPTION_STRING, OPTION_SUB_COMMAND, OPTION_USER};

fn option(kind: u8, name: &str, description: &str, required: bool) -> Value {
    json!({
        "type": kind,
        "name": name,
        "description": description,
        "required": required,
    })
}

fn choice_option(name: &str, description: &str, choices: &[&str]) -> Value {
    json!({
        "type": OPTION_STRING,
        "name": name,
        "description": description,
        "required": true,
        "choices": choices
            .iter()
            .map(|x| json!({"name": x, "value": x}))
            .collect::<Vec<_>>(),
    })
}

fn subcommand(name: &str, description: &str, options: Vec<Value>) -> Value {
    json!({
        "type": OPTION_SUB_COMMAND,
        "name": name,
        "description": description,
        "options": options,
    })
}

fn zone_option(required: bool) -> Value {
    option(OPTION_STRING, "zone", "Zone name", required)
}

/// All commands, in the shape expected by the bulk overwrite endpoint.
pub fn command_definitions() -> Value {
    json!([
        {
            "name": "zone",
            "description": "Zones: request, join and manage sub-communities",
            "options": [
                subcommand("request", "Ask staff for a new zone", vec![
                    option(OPTION_STRING, "name", "Zone name", true),
                    option(OPTION_STRING, "description", "What the zone is about", true),
                ]),
                subcommand("info", "Show a zone", vec![zone_option(true)]),
                subcommand("list", "List the zones", vec![]),
                subcommand("policy", "Set how members join your zone", vec![
                    zone_option(true),
                    choice_option("mode", "Admission policy", &["closed", "ask", "invite", "open"]),
                ]),
                subcommand("join", "Join a zone", vec![zone_option(true)]),
                subcommand("leave", "Leave a zone", vec![zone_option(true)]),
                subcommand("invite", "Invite a user to your zone", vec![
                    zone_option(true),
                    option(OPTION_USER, "user", "User to invite", true),
                ]),
                subcommand("kick", "Remove a member from your zone", vec![
                    zone_option(true),
                    option(OPTION_USER, "user", "Member to remove", true),
                ]),
                subcommand("transfer", "Hand your zone to another member", vec![
                    zone_option(true),
                    option(OPTION_USER, "user", "New owner", true),
                ]),
                subcommand("archive", "Archive your zone", vec![zone_option(true)]),
            ],
        },
        {
            "name": "announce",
            "description": "Draft an announcement for the hub or one of your zones",
            "options": [zone_option(false)],
        },
        {
            "name": "event",
            "description": "Events",
            "options": [
                subcommand("create", "Draft an event", vec![
                    option(OPTION_STRING, "title", "Event title", true),
                    option(OPTION_STRING, "start", "Start time, YYYY-MM-DD HH:MM (UTC)", true),
                    option(OPTION_INTEGER, "minutes", "Duration in minutes", true),
                    option(OPTION_STRING, "description", "Details", true),
                    zone_option(false),
                ]),
            ],
        },
        {
            "name": "temp",
            "description": "Temporary groups",
            "options": [
                subcommand("create", "Create a temporary group", vec![
                    option(OPTION_STRING, "name", "Group name", true),
                    option(OPTION_INTEGER, "hours", "Time to live in hours", true),
                    option(OPTION_USER, "user", "A first member", false),
                ]),
                subcommand("add", "Add a member to your group", vec![
                    option(OPTION_USER, "user", "Member to add", true),
                ]),
                subcommand("extend", "Extend your group", vec![
                    option(OPTION_INTEGER, "hours", "Hours to add", true),
                ]),
                subcommand("close", "Close your group now", vec![]),
            ],
        },
        {
            "name": "staff",
            "description": "Staff moderation panel",
            "default_member_permissions": "0",
            "options": [
                subcommand("panel", "Post or refresh the request panel", vec![]),
                subcommand("freeze", "Close a zone to new members", vec![zone_option(true)]),
                subcommand("unfreeze", "Lift a zone freeze", vec![zone_option(true)]),
                subcommand("archive", "Archive a zone", vec![zone_option(true)]),
                subcommand("mute-anon", "Stop relaying a user's anonymous messages", vec![
                    option(OPTION_USER, "user", "User to mute", true),
                ]),
                subcommand("unmute-anon", "Relay a user's anonymous messages again", vec![
                    option(OPTION_USER, "user", "User to unmute", true),
                ]),
                subcommand("reveal", "Show who wrote a relayed message", vec![
                    option(OPTION_STRING, "message", "Relayed message ID", true),
                ]),
                subcommand("log", "Recent moderation actions", vec![
                    option(OPTION_INTEGER, "count", "Number of entries", false),
                ]),
            ],
        },
    ])
}

/// `(command, subcommand)` pairs of every registered command; commands
/// without sub-commands have an empty subcommand.
pub fn command_paths() -> Vec<(String, String)> {
    let mut paths = Vec::new();
    if let Value::Array(commands) = command_definitions() {
        for command in commands {
            let name = command["name"].as_str().unwrap_or_default().to_string();
            let subcommands: Vec<String> = command["options"]
                .as_array()
                .map(|x| {
                    x.iter()
                        .filter(|x| x["type"] == OPTION_SUB_COMMAND)
                        .filter_map(|x| x["name"].as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            if subcommands.is_empty() {
                paths.push((name, String::new()));
            } else {
                paths.extend(subcommands.into_iter().map(|x| (name.clone(), x)));
            }
        }
    }
    paths
}
