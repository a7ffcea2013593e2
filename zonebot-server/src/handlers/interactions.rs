use axum::body::Bytes;
use axum::extract::{Json, State};
use axum::http::HeaderMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use zonebot::interaction::{
    Interaction, INTERACTION_APPLICATION_COMMAND, INTERACTION_MESSAGE_COMPONENT,
    INTERACTION_MODAL_SUBMIT, INTERACTION_PING,
};
use zonebot::message::InteractionResponse;
use zonebot::signature::{verify_interaction, HEADER_SIGNATURE, HEADER_TIMESTAMP};

use super::commands::run_command;
use super::components::{run_component, run_modal};
use super::{error::AppError, AppState};
use crate::errors::BotError;
use crate::services::{Actor, Context};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|x| x.to_str().ok())
        .ok_or(AppError::SignatureMissing)
}

/// The user behind `interaction`, staff when they hold the staff role.
pub(super) fn actor(context: &Context, interaction: &Interaction) -> Result<Actor, BotError> {
    let id = interaction
        .user_id()
        .ok_or_else(|| BotError::invalid("this interaction has no user"))?;
    Ok(Actor {
        id,
        is_staff: interaction.has_role(context.settings.staff_role_id),
    })
}

async fn run(context: &Context, interaction: &Interaction) -> Result<InteractionResponse, BotError> {
    if interaction.guild_id != Some(context.settings.guild_id) {
        return Err(BotError::invalid("zonebot only works in its own server"));
    }
    let actor = actor(context, interaction)?;
    match interaction.kind {
        INTERACTION_APPLICATION_COMMAND => run_command(context, interaction, actor).await,
        INTERACTION_MESSAGE_COMPONENT => run_component(context, interaction, actor).await,
        INTERACTION_MODAL_SUBMIT => run_modal(context, interaction, actor).await,
        _ => Err(BotError::invalid("unsupported interaction")),
    }
}

/// Run `interaction` to a response; failures become an ephemeral reply.
async fn dispatch(context: Context, interaction: Interaction) -> InteractionResponse {
    match run(&context, &interaction).await {
        Ok(response) => response,
        Err(error) => {
            if error.is_internal() {
                tracing::error!(
                    interaction = %interaction.id,
                    error = ?error,
                    "interaction failed"
                );
            } else {
                tracing::debug!(interaction = %interaction.id, %error, "interaction refused");
            }
            InteractionResponse::Message(error.to_reply())
        }
    }
}

/// The acknowledgement sent when `kind` takes too long: button presses
/// defer an update of their message, everything else a new reply.
fn deferral(kind: u8) -> InteractionResponse {
    match kind {
        INTERACTION_MESSAGE_COMPONENT => InteractionResponse::DeferredUpdate,
        _ => InteractionResponse::Deferred { ephemeral: true },
    }
}

/// Finish the interaction behind `token` once `task` is done, following
/// up on the acknowledgement `deferred` that was already sent.
async fn finish_deferred(
    context: Context,
    token: String,
    deferred: InteractionResponse,
    task: JoinHandle<InteractionResponse>,
) {
    let response = match task.await {
        Ok(response) => response,
        Err(error) => {
            tracing::error!(%error, "interaction task failed");
            InteractionResponse::Message(BotError::Platform(error.into()).to_reply())
        }
    };
    let platform = &context.platform;
    let application_id = context.settings.application_id;
    let sent = match (deferred, response) {
        // a button's message is only replaced by an update, other replies follow it
        (InteractionResponse::DeferredUpdate, InteractionResponse::Message(message)) => {
            platform.send_followup(application_id, &token, &message).await
        }
        (_, InteractionResponse::Message(message))
        | (_, InteractionResponse::UpdateMessage(message)) => {
            platform
                .edit_original_response(application_id, &token, &message)
                .await
        }
        (_, response) => {
            tracing::warn!(?response, "response cannot follow a deferral");
            return;
        }
    };
    if let Err(error) = sent {
        tracing::error!(%error, "could not finish deferred response");
    }
}

pub async fn handle_interaction(
    State(AppState {
        context,
        public_key,
        defer_after,
    }): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = header(&headers, HEADER_SIGNATURE)?;
    let timestamp = header(&headers, HEADER_TIMESTAMP)?;
    verify_interaction(&public_key, signature, timestamp, &body)
        .map_err(|_| AppError::SignatureNotValid)?;
    let interaction: Interaction =
        serde_json::from_slice(&body).map_err(|_| AppError::PayloadNotValid)?;

    let response = match interaction.kind {
        INTERACTION_PING => InteractionResponse::Pong,
        INTERACTION_APPLICATION_COMMAND
        | INTERACTION_MESSAGE_COMPONENT
        | INTERACTION_MODAL_SUBMIT => {
            tracing::info!(
                interaction = %interaction.id,
                kind = interaction.kind,
                command = interaction.command_name().unwrap_or_default(),
                custom_id = interaction.custom_id().unwrap_or_default(),
                "interaction received"
            );
            let token = interaction.token.clone();
            let deferred = deferral(interaction.kind);
            let mut task = tokio::spawn(dispatch(context.clone(), interaction));
            match tokio::time::timeout(defer_after, &mut task).await {
                Ok(Ok(response)) => response,
                Ok(Err(error)) => {
                    tracing::error!(%error, "interaction task failed");
                    return Err(AppError::ResponseFailed);
                }
                Err(_) => {
                    tokio::spawn(finish_deferred(context, token, deferred.clone(), task));
                    deferred
                }
            }
        }
        _ => return Err(AppError::InteractionNotKnown),
    };
    let response = response.to_json().map_err(|_| AppError::ResponseFailed)?;
    Ok(Json(response))
}

#[cfg(test)]
mod test {
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tokio;
    use tower::ServiceExt;
    use zonebot::message::OutgoingMessage;

    use super::super::test_utils::*;
    use super::*;
    use crate::services::test_utils::*;

    #[tokio::test]
    async fn answers_ping() {
        let TestApi { api, keypair, .. } = build_test_api().await;
        let ping = json!({"id": "1", "application_id": "9", "type": 1, "token": "t"});
        let response = api.oneshot(request_signed(&keypair, &ping)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = get_body(response).await;
        assert_eq!(body, json!({"type": 1}));
    }

    #[tokio::test]
    async fn rejects_bad_signatures() {
        let TestApi { api, keypair, .. } = build_test_api().await;
        let ping = json!({"id": "1", "application_id": "9", "type": 1, "token": "t"});

        let mut request = request_signed(&keypair, &ping);
        request.headers_mut().insert(
            "x-signature-timestamp",
            "1700000001".parse().unwrap(),
        );
        let response = api.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut request = request_signed(&keypair, &ping);
        request.headers_mut().remove("x-signature-ed25519");
        let response = api.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = b"not json";
        let request = Request::builder()
            .method("POST")
            .uri("/interactions")
            .header("x-signature-ed25519", sign(&keypair, TIMESTAMP, body))
            .header("x-signature-timestamp", TIMESTAMP)
            .body(axum::body::Body::from(body.to_vec()))
            .unwrap();
        let response = api.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn replies_to_commands_inline() {
        let TestApi { api, keypair, .. } = build_test_api().await;
        let request = command(7, "zone", Some("list"), json!([]));
        let response = api.oneshot(request_signed(&keypair, &request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = get_body(response).await;
        assert_eq!(body["type"], 4);
        assert_eq!(body["data"]["embeds"][0]["title"], "Zones");
    }

    #[tokio::test]
    async fn rejects_other_guilds() {
        let TestApi { api, keypair, .. } = build_test_api().await;
        let mut request = command(7, "zone", Some("list"), json!([]));
        request["guild_id"] = json!("12345");
        let response = api.oneshot(request_signed(&keypair, &request)).await.unwrap();
        let body: Value = get_body(response).await;
        assert_eq!(body["data"]["embeds"][0]["title"], "Could not do that");
        assert_eq!(body["data"]["flags"], 64);
    }

    #[tokio::test]
    async fn edits_deferred_response_when_done() {
        let (context, platform) = build_test_context().await;
        let task = tokio::spawn(async {
            InteractionResponse::Message(OutgoingMessage::text("done"))
        });
        let deferred = deferral(INTERACTION_APPLICATION_COMMAND);
        finish_deferred(context, "late-token".to_string(), deferred, task).await;
        assert_eq!(
            platform.calls(),
            vec![Call::EditOriginal(
                "late-token".to_string(),
                OutgoingMessage::text("done")
            )]
        );
    }

    #[tokio::test]
    async fn defers_button_presses_as_updates() {
        assert_eq!(
            deferral(INTERACTION_MESSAGE_COMPONENT),
            InteractionResponse::DeferredUpdate
        );
        assert_eq!(
            deferral(INTERACTION_MODAL_SUBMIT),
            InteractionResponse::Deferred { ephemeral: true }
        );

        let (context, platform) = build_test_context().await;
        let task = tokio::spawn(async {
            InteractionResponse::UpdateMessage(OutgoingMessage::text("accepted"))
        });
        let deferred = deferral(INTERACTION_MESSAGE_COMPONENT);
        finish_deferred(context.clone(), "panel".to_string(), deferred.clone(), task).await;
        let task = tokio::spawn(async {
            InteractionResponse::Message(OutgoingMessage::text("joined").ephemeral())
        });
        finish_deferred(context, "join".to_string(), deferred, task).await;
        assert_eq!(
            platform.calls(),
            vec![
                Call::EditOriginal("panel".to_string(), OutgoingMessage::text("accepted")),
                Call::Followup(
                    "join".to_string(),
                    OutgoingMessage::text("joined").ephemeral()
                ),
            ]
        );
    }
}
