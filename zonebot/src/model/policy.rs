use anyhow::Error;
use serde::{Deserialize, Serialize};

/// A zone's admission rule.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Nobody can join.
    Closed,
    /// Anyone can ask, the owner decides. Invited users join directly.
    Ask,
    /// Only invited users can join.
    Invite,
    /// Anyone can join.
    Open,
}

/// What happens when a user tries to join a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Join,
    Request,
    Refuse(&'static str),
}

impl Policy {
    pub const ALL: [Policy; 4] = [Policy::Closed, Policy::Ask, Policy::Invite, Policy::Open];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Ask => "ask",
            Self::Invite => "invite",
            Self::Open => "open",
        }
    }

    pub fn admission(&self, has_invite: bool) -> Admission {
        match (self, has_invite) {
            (Self::Closed, _) => Admission::Refuse("this zone is closed to new members"),
            (Self::Open, _) | (Self::Ask, true) | (Self::Invite, true) => Admission::Join,
            (Self::Ask, false) => Admission::Request,
            (Self::Invite, false) => Admission::Refuse("this zone is invite only"),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Policy::Ask
    }
}

impl core::str::FromStr for Policy {
    type Err = Error;
    fn from_str(policy: &str) -> Result<Self, Self::Err> {
        match policy.trim().to_lowercase().as_str() {
            "closed" => Ok(Self::Closed),
            "ask" => Ok(Self::Ask),
            "invite" => Ok(Self::Invite),
            "open" => Ok(Self::Open),
            _ => Err(Error::msg("policy is not one of closed, ask, invite, open")),
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
