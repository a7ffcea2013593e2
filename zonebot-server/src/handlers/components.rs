//! Button presses and modal submits.

use zonebot::interaction::Interaction;
use zonebot::message::InteractionResponse;

use super::commands::{parse_time, HUB_TARGET, MODAL_ANNOUNCE};
use crate::errors::BotError;
use crate::services::render::{self, ButtonAction};
use crate::services::{Actor, Context, Decision};

pub async fn run_component(
    context: &Context,
    interaction: &Interaction,
    actor: Actor,
) -> Result<InteractionResponse, BotError> {
    let custom_id = interaction.custom_id().unwrap_or_default();
    let action = ButtonAction::parse(custom_id)
        .ok_or_else(|| BotError::invalid(format!("unknown button `{}`", custom_id)))?;
    let staff = context.staff_panel();
    let request = match action {
        ButtonAction::Submit(id) => context.hub().submit(id, actor).await?,
        ButtonAction::Cancel(id) => context.hub().cancel(id, actor).await?,
        ButtonAction::StaffAccept(id) => staff.decide(id, actor, Decision::Accept).await?,
        ButtonAction::StaffDeny(id) => staff.decide(id, actor, Decision::Deny).await?,
        ButtonAction::StaffSchedule(id) => staff.decide(id, actor, Decision::Schedule).await?,
        ButtonAction::JoinAccept(id) => context.policy().decide_join(id, actor, true).await?,
        ButtonAction::JoinDeny(id) => context.policy().decide_join(id, actor, false).await?,
    };
    Ok(match action {
        // the draft preview is replaced by its outcome
        ButtonAction::Submit(_) | ButtonAction::Cancel(_) => {
            InteractionResponse::UpdateMessage(render::request_status(&request))
        }
        ButtonAction::JoinAccept(_) | ButtonAction::JoinDeny(_) => {
            let mut message = render::request_status(&request);
            message.flags = None;
            InteractionResponse::UpdateMessage(message)
        }
        _ => InteractionResponse::Message(render::notice(format!(
            "Request #{} is now {}.",
            request.id, request.status
        ))),
    })
}

pub async fn run_modal(
    context: &Context,
    interaction: &Interaction,
    actor: Actor,
) -> Result<InteractionResponse, BotError> {
    let custom_id = interaction.custom_id().unwrap_or_default();
    let target = match custom_id.split_once(':') {
        Some((MODAL_ANNOUNCE, target)) => target,
        _ => return Err(BotError::invalid(format!("unknown form `{}`", custom_id))),
    };
    let zone = Some(target).filter(|x| *x != HUB_TARGET);
    let title = interaction
        .modal_value("title")
        .ok_or_else(|| BotError::invalid("the title is required"))?;
    let body = interaction
        .modal_value("body")
        .ok_or_else(|| BotError::invalid("the text is required"))?;
    let send_at = interaction.modal_value("send_at").map(parse_time).transpose()?;
    let request = context
        .hub()
        .draft_announcement(actor, zone, title, body, send_at)
        .await?;
    Ok(InteractionResponse::Message(render::draft_preview(&request)))
}

#[cfg(test)]
mod test {
    use serde_json::{json, Value};
    use tokio;
    use tower::ServiceExt;
    use zonebot::interaction::{INTERACTION_MESSAGE_COMPONENT, INTERACTION_MODAL_SUBMIT};
    use zonebot::model::RequestStatus;
    use zonebot::Snowflake;

    use super::super::test_utils::*;
    use crate::services::test_utils::*;

    async fn send(api: &TestApi, request: Value) -> Value {
        let response = api
            .api
            .clone()
            .oneshot(request_signed(&api.keypair, &request))
            .await
            .unwrap();
        get_body(response).await
    }

    fn press(user: u64, roles: &[Snowflake], custom_id: &str) -> Value {
        interaction(
            INTERACTION_MESSAGE_COMPONENT,
            user,
            roles,
            json!({"custom_id": custom_id, "component_type": 2}),
        )
    }

    fn announce_form(target: &str, send_at: &str) -> Value {
        interaction(
            INTERACTION_MODAL_SUBMIT,
            7,
            &[],
            json!({
                "custom_id": format!("announce:{}", target),
                "components": [
                    {"type": 1, "components": [{"type": 4, "custom_id": "title", "value": "News"}]},
                    {"type": 1, "components": [{"type": 4, "custom_id": "body", "value": "Hello all"}]},
                    {"type": 1, "components": [{"type": 4, "custom_id": "send_at", "value": send_at}]}
                ]
            }),
        )
    }

    #[tokio::test]
    async fn drafts_announcement_from_form() {
        let api = build_test_api().await;
        let body = send(&api, announce_form("hub", "")).await;
        assert_eq!(body["type"], 4);
        let request = api.context.load_request(1).await.unwrap();
        assert_eq!(request.title, "News");
        assert_eq!(request.zone_id, None);
        assert_eq!(request.send_at, None);

        let body = send(&api, announce_form("hub", "2099-01-01 10:00")).await;
        assert_eq!(body["type"], 4);
        let request = api.context.load_request(2).await.unwrap();
        assert!(request.send_at.is_some());

        let body = send(&api, announce_form("hub", "soon")).await;
        assert_eq!(body["data"]["embeds"][0]["title"], "Could not do that");
    }

    #[tokio::test]
    async fn walks_request_through_buttons() {
        let api = build_test_api().await;
        send(&api, announce_form("hub", "")).await;

        let body = send(&api, press(7, &[], "req:submit:1")).await;
        assert_eq!(body["type"], 7);
        assert_eq!(
            api.context.load_request(1).await.unwrap().status,
            RequestStatus::Pending
        );

        // members cannot decide
        let body = send(&api, press(8, &[], "staff:accept:1")).await;
        assert_eq!(body["data"]["embeds"][0]["title"], "Could not do that");

        let body = send(&api, press(8, &[STAFF_ROLE], "staff:accept:1")).await;
        assert_eq!(body["type"], 4);
        assert_eq!(
            api.context.load_request(1).await.unwrap().status,
            RequestStatus::Sent
        );
        assert_eq!(api.platform.sent_to(HUB_CHANNEL).len(), 1);
    }

    #[tokio::test]
    async fn rejects_unknown_buttons() {
        let api = build_test_api().await;
        let body = send(&api, press(7, &[], "nope:1")).await;
        assert!(body["data"]["embeds"][0]["description"]
            .as_str()
            .unwrap()
            .contains("unknown button"));
    }
}
