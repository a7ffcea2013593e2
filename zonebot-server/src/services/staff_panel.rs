use chrono::Utc;
use zonebot::message::OutgoingMessage;
use zonebot::model::{Request, RequestKind, RequestStatus, Zone};
use zonebot::Snowflake;

use super::{render, Actor, Context};
use crate::db::{self, AnonPost, LogEntry, MARKER_PANEL_MESSAGE};
use crate::errors::BotError;

/// Most requests listed on the panel summary.
const PANEL_LIMIT: u64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Deny,
    Schedule,
}

impl Decision {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Deny => "deny",
            Self::Schedule => "schedule",
        }
    }
}

/// The staff moderation panel: decisions on requests, zone freezes and the
/// anonymous relay.
pub struct StaffPanelService {
    context: Context,
}

impl StaffPanelService {
    pub fn new(context: Context) -> Self {
        StaffPanelService { context }
    }

    fn require_staff(actor: Actor) -> Result<(), BotError> {
        if actor.is_staff {
            Ok(())
        } else {
            Err(BotError::NotStaff)
        }
    }

    async fn log(&self, actor: Actor, action: &str, target: String, detail: String) -> Result<(), BotError> {
        tracing::info!(staff = %actor.id, action, target = %target, "moderation action");
        let mut connection = self.context.connection_mut().await?;
        db::put_log_entry(
            &mut connection,
            &LogEntry {
                staff_id: actor.id,
                action: action.to_string(),
                target,
                detail,
                created_at: Utc::now(),
            },
        )
        .await
        .map_err(BotError::Storage)
    }

    /// Post the panel summary, or edit the one posted earlier. Returns the
    /// number of pending requests listed.
    pub async fn refresh_panel(&self, actor: Actor) -> Result<usize, BotError> {
        Self::require_staff(actor)?;
        let settings = &self.context.settings;
        let (pending, marker) = {
            let mut connection = self.context.connection().await?;
            let pending: Vec<Request> = db::get_requests_by_status(
                &mut connection,
                settings.guild_id,
                RequestStatus::Pending,
                PANEL_LIMIT,
            )
            .await
            .map_err(BotError::Storage)?
            .into_iter()
            .filter(|x| x.kind.decided_by_staff())
            .collect();
            let marker = db::get_marker(&mut connection, MARKER_PANEL_MESSAGE)
                .await
                .map_err(BotError::Storage)?;
            (pending, marker)
        };
        let message = render::panel_summary(&pending);
        let platform = &self.context.platform;
        if let Some(message_id) = marker.and_then(|x| x.parse::<Snowflake>().ok()) {
            match platform
                .edit_message(settings.panel_channel_id, message_id, &message)
                .await
            {
                Ok(()) => return Ok(pending.len()),
                // the old panel message was probably deleted
                Err(error) => tracing::warn!(%error, "could not edit the staff panel, posting anew"),
            }
        }
        let message_id = platform
            .send_message(settings.panel_channel_id, &message)
            .await
            .map_err(BotError::Platform)?;
        let mut connection = self.context.connection_mut().await?;
        db::put_marker(&mut connection, MARKER_PANEL_MESSAGE, &message_id.to_string())
            .await
            .map_err(BotError::Storage)?;
        Ok(pending.len())
    }

    /// Act on a pending zone, announcement or event request.
    pub async fn decide(
        &self,
        request_id: i64,
        actor: Actor,
        decision: Decision,
    ) -> Result<Request, BotError> {
        Self::require_staff(actor)?;
        let request = self.context.load_request(request_id).await?;
        if !request.kind.decided_by_staff() {
            return Err(BotError::invalid("this request is decided by the zone owner"));
        }
        let now = Utc::now();
        let decided = Some(actor.id);
        let request = match (decision, request.kind) {
            (Decision::Accept, RequestKind::Zone) => {
                let (zone, request) = self.context.hub().create_zone(&request, decided).await?;
                self.direct_message(
                    request.author_id,
                    format!(
                        "Your zone **{}** is ready: <#{}>.",
                        zone.name, zone.channels.general_id
                    ),
                )
                .await;
                request
            }
            (Decision::Accept, RequestKind::Announcement) if !request.is_due_after(now) => {
                self.context
                    .hub()
                    .deliver_announcement(&request, decided, now)
                    .await?
            }
            // timed announcements and events wait for the sweep
            (Decision::Accept | Decision::Schedule, RequestKind::Announcement | RequestKind::Event) => {
                if request.send_at.is_none() {
                    return Err(BotError::invalid("only timed requests can be scheduled"));
                }
                self.context
                    .set_status(&request, RequestStatus::Scheduled, decided, now)
                    .await?
            }
            (Decision::Schedule, _) => {
                return Err(BotError::invalid("only timed requests can be scheduled"));
            }
            (Decision::Deny, _) => {
                let request = self
                    .context
                    .set_status(&request, RequestStatus::Denied, decided, now)
                    .await?;
                self.direct_message(
                    request.author_id,
                    format!(
                        "Your {} request `{}` was declined by staff.",
                        request.kind, request.title
                    ),
                )
                .await;
                request
            }
            (Decision::Accept, RequestKind::Join) => {
                return Err(BotError::invalid("this request is decided by the zone owner"));
            }
        };
        if let Some(message_id) = request.panel_message_id {
            if let Err(error) = self
                .context
                .platform
                .edit_message(
                    self.context.settings.panel_channel_id,
                    message_id,
                    &render::panel_entry(&request),
                )
                .await
            {
                tracing::warn!(request = request.id, %error, "could not update the staff panel");
            }
        }
        self.log(
            actor,
            decision.as_str(),
            format!("request {}", request.id),
            format!("{} `{}` is now {}", request.kind, request.title, request.status),
        )
        .await?;
        Ok(request)
    }

    async fn direct_message(&self, user_id: Snowflake, text: String) {
        if let Err(error) = self
            .context
            .platform
            .send_direct_message(user_id, &OutgoingMessage::text(text))
            .await
        {
            tracing::warn!(user = %user_id, %error, "could not send direct message");
        }
    }

    /// Freezing closes a zone to new members whatever its policy.
    pub async fn freeze(&self, zone: &str, actor: Actor, frozen: bool) -> Result<Zone, BotError> {
        Self::require_staff(actor)?;
        let zone = self.context.load_zone(zone).await?;
        {
            let mut connection = self.context.connection_mut().await?;
            db::update_zone_frozen(&mut connection, zone.id, frozen)
                .await
                .map_err(BotError::Storage)?;
        }
        let action = if frozen { "freeze" } else { "unfreeze" };
        self.log(actor, action, format!("zone {}", zone.name), String::new())
            .await?;
        Ok(Zone { frozen, ..zone })
    }

    pub async fn archive(&self, zone: &str, actor: Actor) -> Result<Zone, BotError> {
        Self::require_staff(actor)?;
        let zone = self.context.hub().archive_zone(zone, actor).await?;
        self.log(actor, "archive", format!("zone {}", zone.name), String::new())
            .await?;
        Ok(zone)
    }

    pub async fn mute_anon(&self, user_id: Snowflake, actor: Actor, muted: bool) -> Result<(), BotError> {
        Self::require_staff(actor)?;
        {
            let mut connection = self.context.connection_mut().await?;
            if muted {
                db::put_anon_mute(&mut connection, user_id, actor.id, Utc::now()).await
            } else {
                db::delete_anon_mute(&mut connection, user_id).await
            }
            .map_err(BotError::Storage)?;
        }
        let action = if muted { "mute-anon" } else { "unmute-anon" };
        self.log(actor, action, format!("user {}", user_id), String::new())
            .await
    }

    /// Resolve a relayed message to its author. Every reveal is logged.
    pub async fn reveal(&self, message_id: Snowflake, actor: Actor) -> Result<AnonPost, BotError> {
        Self::require_staff(actor)?;
        let post = {
            let mut connection = self.context.connection().await?;
            db::get_anon_post_by_message(&mut connection, message_id)
                .await
                .map_err(BotError::Storage)?
                .ok_or(BotError::UnknownMessage)?
        };
        self.log(
            actor,
            "reveal",
            format!("message {}", message_id),
            format!("post {}", post.id),
        )
        .await?;
        Ok(post)
    }

    pub async fn recent_log(&self, actor: Actor, count: u64) -> Result<Vec<LogEntry>, BotError> {
        Self::require_staff(actor)?;
        let mut connection = self.context.connection().await?;
        db::get_log_entries(&mut connection, count.clamp(1, 25))
            .await
            .map_err(BotError::Storage)
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use tokio;

    use super::super::hub::test_utils::create_test_zone;
    use super::super::test_utils::*;
    use super::*;

    const AUTHOR: Snowflake = Snowflake::new(7);
    const STAFF: Snowflake = Snowflake::new(20);

    fn staff() -> Actor {
        Actor::staff(STAFF)
    }

    #[tokio::test]
    async fn accepting_zone_request_creates_zone() {
        let (context, platform) = build_test_context().await;
        let hub = context.hub();
        let request = hub.request_zone(AUTHOR, "chess", "about").await.unwrap();
        let request = hub.submit(request.id, Actor::member(AUTHOR)).await.unwrap();
        let panel = context.staff_panel();
        assert!(matches!(
            panel
                .decide(request.id, Actor::member(AUTHOR), Decision::Accept)
                .await,
            Err(BotError::NotStaff)
        ));
        let request = panel
            .decide(request.id, staff(), Decision::Accept)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Running);
        assert_eq!(request.decided_by, Some(STAFF));
        let zone = hub.zone_info("chess").await.unwrap().zone;
        assert_eq!(zone.owner_id, AUTHOR);
        assert_eq!(platform.direct_messages_to(AUTHOR).len(), 1);
        // the panel entry lost its buttons
        let edited = platform.calls().into_iter().find_map(|x| match x {
            Call::EditMessage(channel, id, message) if channel == PANEL_CHANNEL => {
                Some((id, message))
            }
            _ => None,
        });
        let (id, message) = edited.unwrap();
        assert_eq!(Some(id), request.panel_message_id);
        assert!(message.custom_ids().is_empty());
        let log = panel.recent_log(staff(), 10).await.unwrap();
        assert_eq!(log[0].action, "accept");
        // deciding again fails
        panel
            .decide(request.id, staff(), Decision::Deny)
            .await
            .unwrap_err();
    }

    #[tokio::test]
    async fn failed_zone_accept_leaves_request_pending() {
        let (context, _) = build_test_context().await;
        let hub = context.hub();
        let other = Snowflake::new(8);
        let first = hub.request_zone(AUTHOR, "chess", "about").await.unwrap();
        let first = hub.submit(first.id, Actor::member(AUTHOR)).await.unwrap();
        let second = hub.request_zone(other, "Chess", "about").await.unwrap();
        let second = hub.submit(second.id, Actor::member(other)).await.unwrap();
        let panel = context.staff_panel();
        panel
            .decide(first.id, staff(), Decision::Accept)
            .await
            .unwrap();
        assert!(matches!(
            panel.decide(second.id, staff(), Decision::Accept).await,
            Err(BotError::Invalid(_))
        ));
        let second = context.load_request(second.id).await.unwrap();
        assert_eq!(second.status, RequestStatus::Pending);
        assert_eq!(second.decided_by, None);
        // still open to a decision
        let second = panel
            .decide(second.id, staff(), Decision::Deny)
            .await
            .unwrap();
        assert_eq!(second.status, RequestStatus::Denied);
    }

    #[tokio::test]
    async fn accepting_keeps_zone_limit() {
        let (context, _) = build_test_context().await;
        let hub = context.hub();
        let chess = hub.request_zone(AUTHOR, "chess", "about").await.unwrap();
        let chess = hub.submit(chess.id, Actor::member(AUTHOR)).await.unwrap();
        let go = hub.request_zone(AUTHOR, "go", "about").await.unwrap();
        let go = hub.submit(go.id, Actor::member(AUTHOR)).await.unwrap();
        let panel = context.staff_panel();
        panel.decide(chess.id, staff(), Decision::Accept).await.unwrap();
        assert!(matches!(
            panel.decide(go.id, staff(), Decision::Accept).await,
            Err(BotError::Refused(_))
        ));
        let go = context.load_request(go.id).await.unwrap();
        assert_eq!(go.status, RequestStatus::Pending);
        assert!(context.load_zone("go").await.is_err());
    }

    #[tokio::test]
    async fn accepting_announcement_delivers_now() {
        let (context, platform) = build_test_context().await;
        let hub = context.hub();
        let request = hub
            .draft_announcement(Actor::member(AUTHOR), None, "News", "Body", None)
            .await
            .unwrap();
        hub.submit(request.id, Actor::member(AUTHOR)).await.unwrap();
        let request = context
            .staff_panel()
            .decide(request.id, staff(), Decision::Accept)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Sent);
        assert_eq!(platform.sent_to(HUB_CHANNEL).len(), 1);
    }

    #[tokio::test]
    async fn accepting_timed_announcement_schedules_it() {
        let (context, platform) = build_test_context().await;
        let hub = context.hub();
        let request = hub
            .draft_announcement(
                Actor::member(AUTHOR),
                None,
                "News",
                "Body",
                Some(Utc::now() + Duration::hours(2)),
            )
            .await
            .unwrap();
        hub.submit(request.id, Actor::member(AUTHOR)).await.unwrap();
        let request = context
            .staff_panel()
            .decide(request.id, staff(), Decision::Accept)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Scheduled);
        assert!(platform.sent_to(HUB_CHANNEL).is_empty());
    }

    #[tokio::test]
    async fn schedule_needs_a_time() {
        let (context, _) = build_test_context().await;
        let hub = context.hub();
        let request = hub.request_zone(AUTHOR, "chess", "about").await.unwrap();
        hub.submit(request.id, Actor::member(AUTHOR)).await.unwrap();
        let panel = context.staff_panel();
        panel
            .decide(request.id, staff(), Decision::Schedule)
            .await
            .unwrap_err();
        let request = panel
            .decide(request.id, staff(), Decision::Deny)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Denied);
    }

    #[tokio::test]
    async fn drafts_cannot_be_decided() {
        let (context, _) = build_test_context().await;
        let request = context
            .hub()
            .request_zone(AUTHOR, "chess", "about")
            .await
            .unwrap();
        assert!(matches!(
            context
                .staff_panel()
                .decide(request.id, staff(), Decision::Deny)
                .await,
            Err(BotError::Transition(_))
        ));
    }

    #[tokio::test]
    async fn refreshes_panel_in_place() {
        let (context, platform) = build_test_context().await;
        let hub = context.hub();
        let request = hub.request_zone(AUTHOR, "chess", "about").await.unwrap();
        hub.submit(request.id, Actor::member(AUTHOR)).await.unwrap();
        let panel = context.staff_panel();
        panel.refresh_panel(Actor::member(AUTHOR)).await.unwrap_err();
        platform.clear();
        assert_eq!(panel.refresh_panel(staff()).await.unwrap(), 1);
        assert_eq!(platform.sent_to(PANEL_CHANNEL).len(), 1);
        panel.refresh_panel(staff()).await.unwrap();
        // the second refresh edits instead of posting
        assert_eq!(platform.sent_to(PANEL_CHANNEL).len(), 1);
        assert!(platform
            .calls()
            .iter()
            .any(|x| matches!(x, Call::EditMessage(..))));
    }

    #[tokio::test]
    async fn freezes_and_logs() {
        let (context, _) = build_test_context().await;
        create_test_zone(&context, "chess", AUTHOR.get()).await;
        let panel = context.staff_panel();
        let zone = panel.freeze("chess", staff(), true).await.unwrap();
        assert!(zone.frozen);
        let zone = context.hub().zone_info("chess").await.unwrap().zone;
        assert_eq!(zone.effective_policy(), zonebot::model::Policy::Closed);
        panel.freeze("chess", staff(), false).await.unwrap();
        let log = panel.recent_log(staff(), 10).await.unwrap();
        assert_eq!(
            log.iter().map(|x| x.action.as_str()).collect::<Vec<_>>(),
            ["unfreeze", "freeze"]
        );
    }

    #[tokio::test]
    async fn staff_archive_overrides_ownership() {
        let (context, _) = build_test_context().await;
        create_test_zone(&context, "chess", AUTHOR.get()).await;
        let zone = context
            .staff_panel()
            .archive("chess", staff())
            .await
            .unwrap();
        assert!(zone.archived);
        assert!(context.hub().list_zones().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mutes_and_reveals() {
        let (context, _) = build_test_context().await;
        let panel = context.staff_panel();
        panel
            .mute_anon(AUTHOR, Actor::member(Snowflake::new(8)), true)
            .await
            .unwrap_err();
        panel.mute_anon(AUTHOR, staff(), true).await.unwrap();
        {
            let mut connection = context.connection().await.unwrap();
            assert!(db::is_anon_muted(&mut connection, AUTHOR).await.unwrap());
        }
        assert!(matches!(
            panel.reveal(Snowflake::new(555), staff()).await,
            Err(BotError::UnknownMessage)
        ));
        let post_id = {
            let mut connection = context.connection_mut().await.unwrap();
            let post_id = db::put_anon_post(
                &mut connection,
                &AnonPost {
                    id: 0,
                    guild_id: GUILD,
                    author_id: AUTHOR,
                    pseudonym: "Calm Otter 01".to_string(),
                    origin_channel_id: Snowflake::new(30),
                    origin_message_id: Snowflake::new(31),
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();
            db::put_anon_copy(&mut connection, post_id, Snowflake::new(32), Snowflake::new(555))
                .await
                .unwrap();
            post_id
        };
        let post = panel.reveal(Snowflake::new(555), staff()).await.unwrap();
        assert_eq!(post.id, post_id);
        assert_eq!(post.author_id, AUTHOR);
        let log = panel.recent_log(staff(), 1).await.unwrap();
        assert_eq!(log[0].action, "reveal");
    }
}
