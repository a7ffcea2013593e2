//! Incoming interactions: slash commands, button presses and modal submits
//! delivered to the interactions endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::snowflake::Snowflake;

pub const INTERACTION_PING: u8 = 1;
pub const INTERACTION_APPLICATION_COMMAND: u8 = 2;
pub const INTERACTION_MESSAGE_COMPONENT: u8 = 3;
pub const INTERACTION_AUTOCOMPLETE: u8 = 4;
pub const INTERACTION_MODAL_SUBMIT: u8 = 5;

pub const OPTION_SUB_COMMAND: u8 = 1;
pub const OPTION_SUB_COMMAND_GROUP: u8 = 2;
pub const OPTION_STRING: u8 = 3;
pub const OPTION_INTEGER: u8 = 4;
pub const OPTION_USER: u8 = 6;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Snowflake,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Member {
    pub user: Option<User>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CommandOption {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CommandOption>,
}

/// A text input inside a submitted modal, wrapped in action rows.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ModalRow {
    #[serde(default)]
    pub components: Vec<ModalInput>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ModalInput {
    pub custom_id: String,
    #[serde(default)]
    pub value: String,
}

/// The union of the command, component and modal data payloads; which
/// members are present depends on the interaction type.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct InteractionData {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub component_type: Option<u8>,
    #[serde(default)]
    pub components: Vec<ModalRow>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Interaction {
    pub id: Snowflake,
    pub application_id: Snowflake,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub data: Option<InteractionData>,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    #[serde(default)]
    pub member: Option<Member>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub token: String,
}

impl Interaction {
    /// The invoking user: from `member` in guilds, from `user` in DMs.
    pub fn user_id(&self) -> Option<Snowflake> {
        self.member
            .as_ref()
            .and_then(|x| x.user.as_ref())
            .or(self.user.as_ref())
            .map(|x| x.id)
    }

    pub fn has_role(&self, role_id: Snowflake) -> bool {
        self.member
            .as_ref()
            .map_or(false, |x| x.roles.contains(&role_id))
    }

    pub fn command_name(&self) -> Option<&str> {
        self.data.as_ref().and_then(|x| x.name.as_deref())
    }

    pub fn custom_id(&self) -> Option<&str> {
        self.data.as_ref().and_then(|x| x.custom_id.as_deref())
    }

    /// The chain of sub-command (group) names below the command, and the
    /// options given to the innermost one.
    pub fn subcommand_path(&self) -> (Vec<&str>, &[CommandOption]) {
        let mut path = Vec::new();
        let mut options: &[CommandOption] = self
            .data
            .as_ref()
            .map(|x| x.options.as_slice())
            .unwrap_or(&[]);
        while let [option] = options {
            if option.kind != OPTION_SUB_COMMAND && option.kind != OPTION_SUB_COMMAND_GROUP {
                break;
            }
            path.push(option.name.as_str());
            options = option.options.as_slice();
        }
        (path, options)
    }

    /// The value of a text input in a submitted modal.
    pub fn modal_value(&self, custom_id: &str) -> Option<&str> {
        self.data
            .as_ref()?
            .components
            .iter()
            .flat_map(|x| x.components.iter())
            .find(|x| x.custom_id == custom_id)
            .map(|x| x.value.as_str())
            .filter(|x| !x.trim().is_empty())
    }
}

fn find_option<'a>(options: &'a [CommandOption], name: &str) -> Option<&'a Value> {
    options
        .iter()
        .find(|x| x.name == name)
        .and_then(|x| x.value.as_ref())
}

pub fn option_str<'a>(options: &'a [CommandOption], name: &str) -> Option<&'a str> {
    find_option(options, name).and_then(|x| x.as_str())
}

pub fn option_int(options: &[CommandOption], name: &str) -> Option<i64> {
    find_option(options, name).and_then(|x| x.as_i64())
}

/// User options arrive as the user ID string.
pub fn option_user(options: &[CommandOption], name: &str) -> Option<Snowflake> {
    option_str(options, name).and_then(|x| x.parse().ok())
}

/// A guild message as received from the gateway.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GuildMessage {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub webhook_id: Option<Snowflake>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: Snowflake,
    pub url: String,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn command() -> Interaction {
        serde_json::from_value(json!({
            "id": "10",
            "application_id": "11",
            "type": 2,
            "guild_id": "12",
            "channel_id": "13",
            "token": "tok",
            "member": {
                "user": {"id": "14", "username": "ada"},
                "roles": ["15", "16"]
            },
            "data": {
                "id": "17",
                "name": "zone",
                "type": 1,
                "options": [{
                    "name": "invite",
                    "type": 1,
                    "options": [
                        {"name": "user", "type": 6, "value": "18"},
                        {"name": "hours", "type": 4, "value": 3},
                        {"name": "zone", "type": 3, "value": "Book Club"}
                    ]
                }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn reads_command_options() {
        let interaction = command();
        assert_eq!(interaction.command_name(), Some("zone"));
        let (path, options) = interaction.subcommand_path();
        assert_eq!(path, ["invite"]);
        assert_eq!(option_user(options, "user"), Some(Snowflake::new(18)));
        assert_eq!(option_int(options, "hours"), Some(3));
        assert_eq!(option_str(options, "zone"), Some("Book Club"));
        assert_eq!(option_str(options, "missing"), None);
    }

    #[test]
    fn reads_member_user_and_roles() {
        let interaction = command();
        assert_eq!(interaction.user_id(), Some(Snowflake::new(14)));
        assert!(interaction.has_role(Snowflake::new(16)));
        assert!(!interaction.has_role(Snowflake::new(99)));
    }

    #[test]
    fn reads_dm_user() {
        let interaction: Interaction = serde_json::from_value(json!({
            "id": "1",
            "application_id": "2",
            "type": 3,
            "user": {"id": "3"},
            "token": "tok",
            "data": {"custom_id": "join:accept:4", "component_type": 2}
        }))
        .unwrap();
        assert_eq!(interaction.user_id(), Some(Snowflake::new(3)));
        assert_eq!(interaction.custom_id(), Some("join:accept:4"));
        assert!(!interaction.has_role(Snowflake::new(3)));
    }

    #[test]
    fn reads_modal_values() {
        let interaction: Interaction = serde_json::from_value(json!({
            "id": "1",
            "application_id": "2",
            "type": 5,
            "token": "tok",
            "data": {
                "custom_id": "announce:hub",
                "components": [
                    {"type": 1, "components": [{"type": 4, "custom_id": "title", "value": "Hi"}]},
                    {"type": 1, "components": [{"type": 4, "custom_id": "send_at", "value": " "}]}
                ]
            }
        }))
        .unwrap();
        assert_eq!(interaction.modal_value("title"), Some("Hi"));
        assert_eq!(interaction.modal_value("send_at"), None);
        assert_eq!(interaction.modal_value("body"), None);
    }

    #[test]
    fn reads_gateway_message() {
        let message: GuildMessage = serde_json::from_value(json!({
            "id": "1",
            "channel_id": "2",
            "guild_id": "3",
            "author": {"id": "4", "username": "ada"},
            "content": "hello",
            "attachments": [{"id": "5", "url": "https://cdn.example/a.png", "size": 3}],
            "tts": false
        }))
        .unwrap();
        assert_eq!(message.author.id, Snowflake::new(4));
        assert!(!message.author.bot);
        assert_eq!(message.attachments[0].url, "https://cdn.example/a.png");
    }
}
