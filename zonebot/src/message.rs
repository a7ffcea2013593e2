//! Outgoing messages and interaction responses.

use serde::{Deserialize, Serialize};

const FLAG_EPHEMERAL: u64 = 1 << 6;

const RESPONSE_PONG: u8 = 1;
const RESPONSE_MESSAGE: u8 = 4;
const RESPONSE_DEFERRED_MESSAGE: u8 = 5;
const RESPONSE_DEFERRED_UPDATE: u8 = 6;
const RESPONSE_UPDATE_MESSAGE: u8 = 7;
const RESPONSE_MODAL: u8 = 9;

pub const COLOR_INFO: u32 = 0x5865f2;
pub const COLOR_SUCCESS: u32 = 0x57f287;
pub const COLOR_WARNING: u32 = 0xfee75c;
pub const COLOR_DANGER: u32 = 0xed4245;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

impl Embed {
    pub fn new(title: impl Into<String>) -> Self {
        Embed {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline: true,
        });
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(into = "u8", try_from = "u8")]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

impl From<ButtonStyle> for u8 {
    fn from(style: ButtonStyle) -> u8 {
        match style {
            ButtonStyle::Primary => 1,
            ButtonStyle::Secondary => 2,
            ButtonStyle::Success => 3,
            ButtonStyle::Danger => 4,
        }
    }
}

impl std::convert::TryFrom<u8> for ButtonStyle {
    type Error = String;
    fn try_from(style: u8) -> Result<Self, Self::Error> {
        match style {
            1 => Ok(ButtonStyle::Primary),
            2 => Ok(ButtonStyle::Secondary),
            3 => Ok(ButtonStyle::Success),
            4 => Ok(ButtonStyle::Danger),
            _ => Err(format!("unsupported button style {}", style)),
        }
    }
}

/// A component inside an action row. Only buttons and text inputs are used.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Component {
    Button {
        #[serde(rename = "type")]
        kind: u8,
        style: ButtonStyle,
        label: String,
        custom_id: String,
        #[serde(default)]
        disabled: bool,
    },
    TextInput {
        #[serde(rename = "type")]
        kind: u8,
        custom_id: String,
        label: String,
        /// 1 for a single line, 2 for a paragraph.
        style: u8,
        required: bool,
        max_length: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<String>,
    },
}

impl Component {
    pub fn button(style: ButtonStyle, label: impl Into<String>, custom_id: impl Into<String>) -> Self {
        Component::Button {
            kind: 2,
            style,
            label: label.into(),
            custom_id: custom_id.into(),
            disabled: false,
        }
    }

    pub fn text_input(
        custom_id: impl Into<String>,
        label: impl Into<String>,
        paragraph: bool,
        required: bool,
        max_length: u32,
    ) -> Self {
        Component::TextInput {
            kind: 4,
            custom_id: custom_id.into(),
            label: label.into(),
            style: if paragraph { 2 } else { 1 },
            required,
            max_length,
            placeholder: None,
        }
    }

    pub fn custom_id(&self) -> &str {
        match self {
            Component::Button { custom_id, .. } => custom_id,
            Component::TextInput { custom_id, .. } => custom_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ActionRow {
    #[serde(rename = "type")]
    kind: u8,
    pub components: Vec<Component>,
}

impl ActionRow {
    pub fn new(components: Vec<Component>) -> Self {
        ActionRow {
            kind: 1,
            components,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub components: Vec<ActionRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u64>,
    /// Messages never ping anyone unless mentions are explicitly allowed.
    #[serde(default = "no_mentions")]
    pub allowed_mentions: AllowedMentions,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct AllowedMentions {
    pub parse: Vec<String>,
}

fn no_mentions() -> AllowedMentions {
    AllowedMentions::default()
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        OutgoingMessage {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        OutgoingMessage {
            embeds: vec![embed],
            ..Default::default()
        }
    }

    pub fn buttons(mut self, buttons: Vec<Component>) -> Self {
        if !buttons.is_empty() {
            self.components.push(ActionRow::new(buttons));
        }
        self
    }

    /// Only the invoking user sees the reply.
    pub fn ephemeral(mut self) -> Self {
        self.flags = Some(self.flags.unwrap_or(0) | FLAG_EPHEMERAL);
        self
    }

    pub fn is_ephemeral(&self) -> bool {
        self.flags.map_or(false, |x| x & FLAG_EPHEMERAL != 0)
    }

    /// Any text: the content or the first embed's title and description.
    pub fn summary(&self) -> String {
        if let Some(content) = &self.content {
            return content.clone();
        }
        self.embeds
            .first()
            .map(|x| {
                format!(
                    "{} {}",
                    x.title.as_deref().unwrap_or(""),
                    x.description.as_deref().unwrap_or("")
                )
                .trim()
                .to_string()
            })
            .unwrap_or_default()
    }

    pub fn custom_ids(&self) -> Vec<&str> {
        self.components
            .iter()
            .flat_map(|x| x.components.iter())
            .map(|x| x.custom_id())
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Modal {
    pub custom_id: String,
    pub title: String,
    pub components: Vec<ActionRow>,
}

impl Modal {
    pub fn new(custom_id: impl Into<String>, title: impl Into<String>, inputs: Vec<Component>) -> Self {
        Modal {
            custom_id: custom_id.into(),
            title: title.into(),
            components: inputs
                .into_iter()
                .map(|x| ActionRow::new(vec![x]))
                .collect(),
        }
    }
}

/// The body returned to the interactions endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionResponse {
    Pong,
    Message(OutgoingMessage),
    /// Acknowledge now, edit the original response later.
    Deferred { ephemeral: bool },
    /// Acknowledge a button press now, edit its message later.
    DeferredUpdate,
    /// Replace the message holding the pressed button.
    UpdateMessage(OutgoingMessage),
    Modal(Modal),
}

#[derive(Serialize)]
struct ResponseBody<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
}

impl InteractionResponse {
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Pong => serde_json::to_value(ResponseBody::<()> {
                kind: RESPONSE_PONG,
                data: None,
            }),
            Self::Message(message) => serde_json::to_value(ResponseBody {
                kind: RESPONSE_MESSAGE,
                data: Some(message),
            }),
            Self::Deferred { ephemeral } => {
                let flags = serde_json::json!({
                    "flags": if *ephemeral { FLAG_EPHEMERAL } else { 0 }
                });
                serde_json::to_value(ResponseBody {
                    kind: RESPONSE_DEFERRED_MESSAGE,
                    data: Some(&flags),
                })
            }
            Self::DeferredUpdate => serde_json::to_value(ResponseBody::<()> {
                kind: RESPONSE_DEFERRED_UPDATE,
                data: None,
            }),
            Self::UpdateMessage(message) => serde_json::to_value(ResponseBody {
                kind: RESPONSE_UPDATE_MESSAGE,
                data: Some(message),
            }),
            Self::Modal(modal) => serde_json::to_value(ResponseBody {
                kind: RESPONSE_MODAL,
                data: Some(modal),
            }),
        }
    }
}
