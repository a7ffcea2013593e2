use thiserror::Error;
use zonebot::message::{Embed, OutgoingMessage, COLOR_DANGER};
use zonebot::model::request::TransitionError;

/// Failures of a service operation, shown to the invoking user.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("there is no zone named `{0}`")]
    UnknownZone(String),
    #[error("request {0} does not exist")]
    UnknownRequest(i64),
    #[error("this channel is not a temporary group")]
    UnknownGroup,
    #[error("no relayed message has that ID")]
    UnknownMessage,
    #[error("only the owner of `{0}` can do this")]
    NotOwner(String),
    #[error("only the author of the request can do this")]
    NotAuthor,
    #[error("only staff can do this")]
    NotStaff,
    #[error("{0}")]
    Refused(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("the request was changed by someone else, try again")]
    Conflict,
    #[error("{0}")]
    Invalid(String),
    #[error("the database is unavailable")]
    Storage(#[source] anyhow::Error),
    #[error("the chat platform refused the operation")]
    Platform(#[source] anyhow::Error),
}

impl BotError {
    pub fn invalid(message: impl Into<String>) -> Self {
        BotError::Invalid(message.into())
    }

    /// Whether the failure is on our side rather than the user's.
    pub fn is_internal(&self) -> bool {
        matches!(self, BotError::Storage(_) | BotError::Platform(_))
    }

    pub fn to_reply(&self) -> OutgoingMessage {
        OutgoingMessage::embed(
            Embed::new("Could not do that")
                .description(self.to_string())
                .color(COLOR_DANGER),
        )
        .ephemeral()
    }
}

#[cfg(test)]
mod test {
    use zonebot::model::{RequestKind, RequestStatus};

    use super::*;

    #[test]
    fn renders_as_ephemeral_reply() {
        let reply = BotError::UnknownZone("chess".to_string()).to_reply();
        assert!(reply.is_ephemeral());
        assert!(reply.summary().contains("`chess`"));
    }

    #[test]
    fn shows_transition_errors() {
        let error: BotError = RequestStatus::Sent
            .transition(RequestKind::Announcement, RequestStatus::Pending)
            .unwrap_err()
            .into();
        assert_eq!(
            error.to_string(),
            "announcement request cannot go from sent to pending"
        );
        assert!(!error.is_internal());
        assert!(BotError::Storage(anyhow::Error::msg("x")).is_internal());
    }
}
