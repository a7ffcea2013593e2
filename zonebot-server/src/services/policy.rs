use chrono::Utc;
use zonebot::message::OutgoingMessage;
use zonebot::model::{Admission, Invite, NewRequest, Policy, Request, RequestKind, RequestStatus, Zone};
use zonebot::Snowflake;

use super::{render, Actor, Context};
use crate::db;
use crate::errors::BotError;

/// The result of asking to join a zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(Zone),
    /// The owner was asked to decide.
    Requested(Request),
}

/// Admission to zones: policies, invites, joins, leaves and kicks.
pub struct PolicyService {
    context: Context,
}

impl PolicyService {
    pub fn new(context: Context) -> Self {
        PolicyService { context }
    }

    async fn owned_zone(&self, zone: &str, actor: Actor) -> Result<Zone, BotError> {
        let zone = self.context.load_zone(zone).await?;
        if zone.owner_id != actor.id {
            return Err(BotError::NotOwner(zone.name));
        }
        Ok(zone)
    }

    async fn is_member(&self, zone: &Zone, user_id: Snowflake) -> Result<bool, BotError> {
        let mut connection = self.context.connection().await?;
        db::is_zone_member(&mut connection, zone.id, user_id)
            .await
            .map_err(BotError::Storage)
    }

    async fn direct_message(&self, user_id: Snowflake, message: &OutgoingMessage) {
        if let Err(error) = self
            .context
            .platform
            .send_direct_message(user_id, message)
            .await
        {
            // members may have direct messages turned off
            tracing::warn!(user = %user_id, %error, "could not send direct message");
        }
    }

    /// Grant the member role and record the membership.
    async fn admit(&self, zone: &Zone, user_id: Snowflake) -> Result<(), BotError> {
        self.context
            .platform
            .add_member_role(self.context.settings.guild_id, user_id, zone.member_role_id)
            .await
            .map_err(BotError::Platform)?;
        let mut connection = self.context.connection_mut().await?;
        db::put_zone_member(&mut connection, zone.id, user_id, Utc::now())
            .await
            .map_err(BotError::Storage)?;
        db::delete_invite(&mut connection, zone.id, user_id)
            .await
            .map_err(BotError::Storage)?;
        tracing::info!(zone = zone.id, user = %user_id, "member joined");
        Ok(())
    }

    /// Revoke the member role and forget the membership.
    async fn remove(&self, zone: &Zone, user_id: Snowflake) -> Result<(), BotError> {
        self.context
            .platform
            .remove_member_role(self.context.settings.guild_id, user_id, zone.member_role_id)
            .await
            .map_err(BotError::Platform)?;
        let mut connection = self.context.connection_mut().await?;
        db::delete_zone_member(&mut connection, zone.id, user_id)
            .await
            .map_err(BotError::Storage)?;
        Ok(())
    }

    pub async fn set_policy(&self, zone: &str, actor: Actor, policy: Policy) -> Result<Zone, BotError> {
        let zone = self.owned_zone(zone, actor).await?;
        if zone.frozen && policy != Policy::Closed {
            return Err(BotError::Refused(
                "the zone is frozen by staff and can only be closed".to_string(),
            ));
        }
        let mut connection = self.context.connection_mut().await?;
        db::update_zone_policy(&mut connection, zone.id, policy)
            .await
            .map_err(BotError::Storage)?;
        tracing::info!(zone = zone.id, %policy, "zone policy changed");
        Ok(Zone { policy, ..zone })
    }

    pub async fn join(&self, zone: &str, user_id: Snowflake) -> Result<JoinOutcome, BotError> {
        let zone = self.context.load_zone(zone).await?;
        if self.is_member(&zone, user_id).await? {
            return Err(BotError::invalid(format!(
                "you are already a member of `{}`",
                zone.name
            )));
        }
        let now = Utc::now();
        let has_invite = {
            let mut connection = self.context.connection().await?;
            db::get_invite(&mut connection, zone.id, user_id)
                .await
                .map_err(BotError::Storage)?
                .map_or(false, |x| x.is_valid_at(now))
        };
        match zone.effective_policy().admission(has_invite) {
            Admission::Join => {
                self.admit(&zone, user_id).await?;
                Ok(JoinOutcome::Joined(zone))
            }
            Admission::Request => {
                let request = {
                    let mut connection = self.context.connection_mut().await?;
                    if db::get_pending_join(&mut connection, zone.id, user_id)
                        .await
                        .map_err(BotError::Storage)?
                        .is_some()
                    {
                        return Err(BotError::invalid(
                            "you already asked to join, the owner has not decided yet",
                        ));
                    }
                    let id = db::put_request(
                        &mut connection,
                        &NewRequest {
                            kind: RequestKind::Join,
                            guild_id: self.context.settings.guild_id,
                            author_id: user_id,
                            zone_id: Some(zone.id),
                            title: zone.name.clone(),
                            body: String::new(),
                            send_at: None,
                            end_at: None,
                        },
                        now,
                    )
                    .await
                    .map_err(BotError::Storage)?;
                    db::get_request(&mut connection, id)
                        .await
                        .map_err(BotError::Storage)?
                        .ok_or(BotError::UnknownRequest(id))?
                };
                tracing::info!(zone = zone.id, user = %user_id, request = request.id, "join requested");
                self.direct_message(zone.owner_id, &render::join_request(&request, &zone))
                    .await;
                Ok(JoinOutcome::Requested(request))
            }
            Admission::Refuse(reason) => Err(BotError::Refused(reason.to_string())),
        }
    }

    /// Invite `user_id` into the zone, valid for the configured time.
    pub async fn invite(&self, zone: &str, actor: Actor, user_id: Snowflake) -> Result<Invite, BotError> {
        let zone = self.owned_zone(zone, actor).await?;
        if zone.effective_policy() == Policy::Closed {
            return Err(BotError::Refused(format!(
                "`{}` is closed, invites would not admit anyone",
                zone.name
            )));
        }
        if self.is_member(&zone, user_id).await? {
            return Err(BotError::invalid("they are already a member"));
        }
        let invite = Invite {
            zone_id: zone.id,
            user_id,
            invited_by: actor.id,
            expires_at: Utc::now() + self.context.settings.invite_ttl,
        };
        {
            let mut connection = self.context.connection_mut().await?;
            db::put_invite(&mut connection, &invite)
                .await
                .map_err(BotError::Storage)?;
        }
        self.direct_message(
            user_id,
            &OutgoingMessage::text(format!(
                "You are invited to the zone **{}** until {}. Use `/zone join zone:{}` to accept.",
                zone.name,
                render::timestamp(invite.expires_at),
                zone.name
            )),
        )
        .await;
        Ok(invite)
    }

    /// The zone owner accepts or denies a pending join request.
    pub async fn decide_join(
        &self,
        request_id: i64,
        actor: Actor,
        accept: bool,
    ) -> Result<Request, BotError> {
        let request = self.context.load_request(request_id).await?;
        let zone_id = match (request.kind, request.zone_id) {
            (RequestKind::Join, Some(zone_id)) => zone_id,
            _ => return Err(BotError::invalid("not a join request")),
        };
        let zone = self.context.load_zone_by_id(zone_id).await?;
        if zone.owner_id != actor.id {
            return Err(BotError::NotOwner(zone.name));
        }
        let to = if accept {
            RequestStatus::Accepted
        } else {
            RequestStatus::Denied
        };
        request.status.transition(request.kind, to)?;
        if accept && zone.effective_policy() == Policy::Closed {
            return Err(BotError::Refused(if zone.frozen {
                "the zone is frozen by staff, nobody can join it now".to_string()
            } else {
                "the zone is closed, open it before accepting members".to_string()
            }));
        }
        // admit first so a failed grant leaves the request pending
        if accept {
            self.admit(&zone, request.author_id).await?;
        }
        let request = match self
            .context
            .set_status(&request, to, Some(actor.id), Utc::now())
            .await
        {
            Ok(request) => request,
            Err(error) => {
                if accept {
                    if let Err(error) = self.remove(&zone, request.author_id).await {
                        tracing::warn!(zone = zone.id, %error, "could not undo admission");
                    }
                }
                return Err(error);
            }
        };
        let text = if accept {
            format!("You joined the zone **{}**.", zone.name)
        } else {
            format!("Your request to join **{}** was declined.", zone.name)
        };
        self.direct_message(request.author_id, &OutgoingMessage::text(text))
            .await;
        Ok(request)
    }

    pub async fn leave(&self, zone: &str, user_id: Snowflake) -> Result<Zone, BotError> {
        let zone = self.context.load_zone(zone).await?;
        if zone.owner_id == user_id {
            return Err(BotError::invalid(
                "owners cannot leave, transfer or archive the zone instead",
            ));
        }
        if !self.is_member(&zone, user_id).await? {
            return Err(BotError::invalid("you are not a member"));
        }
        self.remove(&zone, user_id).await?;
        tracing::info!(zone = zone.id, user = %user_id, "member left");
        Ok(zone)
    }

    pub async fn kick(&self, zone: &str, actor: Actor, user_id: Snowflake) -> Result<Zone, BotError> {
        let zone = self.owned_zone(zone, actor).await?;
        if user_id == zone.owner_id {
            return Err(BotError::invalid("you cannot remove yourself"));
        }
        if !self.is_member(&zone, user_id).await? {
            return Err(BotError::invalid("they are not a member"));
        }
        self.remove(&zone, user_id).await?;
        {
            let mut connection = self.context.connection_mut().await?;
            db::delete_invite(&mut connection, zone.id, user_id)
                .await
                .map_err(BotError::Storage)?;
        }
        tracing::info!(zone = zone.id, user = %user_id, by = %actor.id, "member removed");
        Ok(zone)
    }
}

#[cfg(test)]
mod test {
    use tokio;

    use super::super::hub::test_utils::create_test_zone;
    use super::super::test_utils::*;
    use super::*;

    const OWNER: Snowflake = Snowflake::new(7);
    const USER: Snowflake = Snowflake::new(8);

    #[tokio::test]
    async fn open_zone_admits_directly() {
        let (context, platform) = build_test_context().await;
        let zone = create_test_zone(&context, "chess", OWNER.get()).await;
        let policy = context.policy();
        policy
            .set_policy("chess", Actor::member(OWNER), Policy::Open)
            .await
            .unwrap();
        let outcome = policy.join("chess", USER).await.unwrap();
        assert!(matches!(outcome, JoinOutcome::Joined(_)));
        assert!(platform.roles_of(USER).contains(&zone.member_role_id));
        // joining twice fails
        policy.join("chess", USER).await.unwrap_err();
        policy.leave("chess", USER).await.unwrap();
        assert!(!platform.roles_of(USER).contains(&zone.member_role_id));
        policy.leave("chess", USER).await.unwrap_err();
    }

    #[tokio::test]
    async fn ask_zone_creates_join_request_for_owner() {
        let (context, platform) = build_test_context().await;
        let zone = create_test_zone(&context, "chess", OWNER.get()).await;
        let policy = context.policy();
        let request = match policy.join("chess", USER).await.unwrap() {
            JoinOutcome::Requested(request) => request,
            outcome => panic!("unexpected {:?}", outcome),
        };
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.zone_id, Some(zone.id));
        let messages = platform.direct_messages_to(OWNER);
        assert_eq!(
            messages[0].custom_ids(),
            [
                format!("join:accept:{}", request.id).as_str(),
                format!("join:deny:{}", request.id).as_str()
            ]
        );
        // one open request at a time
        policy.join("chess", USER).await.unwrap_err();
        // only the owner decides
        assert!(matches!(
            policy.decide_join(request.id, Actor::staff(USER), true).await,
            Err(BotError::NotOwner(_))
        ));
        let request = policy
            .decide_join(request.id, Actor::member(OWNER), true)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Accepted);
        assert_eq!(request.decided_by, Some(OWNER));
        assert!(platform.roles_of(USER).contains(&zone.member_role_id));
        assert_eq!(platform.direct_messages_to(USER).len(), 1);
        policy
            .decide_join(request.id, Actor::member(OWNER), false)
            .await
            .unwrap_err();
    }

    #[tokio::test]
    async fn denied_join_does_not_admit() {
        let (context, platform) = build_test_context().await;
        let zone = create_test_zone(&context, "chess", OWNER.get()).await;
        let policy = context.policy();
        let request = match policy.join("chess", USER).await.unwrap() {
            JoinOutcome::Requested(request) => request,
            outcome => panic!("unexpected {:?}", outcome),
        };
        let request = policy
            .decide_join(request.id, Actor::member(OWNER), false)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Denied);
        assert!(!platform.roles_of(USER).contains(&zone.member_role_id));
    }

    #[tokio::test]
    async fn invite_zone_needs_invite() {
        let (context, _) = build_test_context().await;
        create_test_zone(&context, "chess", OWNER.get()).await;
        let policy = context.policy();
        policy
            .set_policy("chess", Actor::member(OWNER), Policy::Invite)
            .await
            .unwrap();
        assert!(matches!(
            policy.join("chess", USER).await,
            Err(BotError::Refused(_))
        ));
        policy
            .invite("chess", Actor::member(USER), USER)
            .await
            .unwrap_err();
        let invite = policy
            .invite("chess", Actor::member(OWNER), USER)
            .await
            .unwrap();
        assert!(invite.expires_at > Utc::now() + chrono::Duration::days(6));
        assert!(matches!(
            policy.join("chess", USER).await.unwrap(),
            JoinOutcome::Joined(_)
        ));
        // the invite was consumed
        let mut connection = context.connection().await.unwrap();
        assert!(db::get_invite(&mut connection, invite.zone_id, USER)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn frozen_zone_is_closed() {
        let (context, _) = build_test_context().await;
        let zone = create_test_zone(&context, "chess", OWNER.get()).await;
        {
            let mut connection = context.connection_mut().await.unwrap();
            db::update_zone_frozen(&mut connection, zone.id, true)
                .await
                .unwrap();
        }
        let policy = context.policy();
        assert!(matches!(
            policy
                .set_policy("chess", Actor::member(OWNER), Policy::Open)
                .await,
            Err(BotError::Refused(_))
        ));
        policy
            .set_policy("chess", Actor::member(OWNER), Policy::Closed)
            .await
            .unwrap();
        policy
            .invite("chess", Actor::member(OWNER), USER)
            .await
            .unwrap_err();
        assert!(matches!(
            policy.join("chess", USER).await,
            Err(BotError::Refused(_))
        ));
    }

    #[tokio::test]
    async fn frozen_zone_refuses_pending_joins() {
        let (context, platform) = build_test_context().await;
        let zone = create_test_zone(&context, "chess", OWNER.get()).await;
        let policy = context.policy();
        let request = match policy.join("chess", USER).await.unwrap() {
            JoinOutcome::Requested(request) => request,
            outcome => panic!("unexpected {:?}", outcome),
        };
        context
            .staff_panel()
            .freeze("chess", Actor::staff(Snowflake::new(20)), true)
            .await
            .unwrap();
        assert!(matches!(
            policy
                .decide_join(request.id, Actor::member(OWNER), true)
                .await,
            Err(BotError::Refused(_))
        ));
        assert!(!platform.roles_of(USER).contains(&zone.member_role_id));
        let request = context.load_request(request.id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        // the owner can still turn it down
        let request = policy
            .decide_join(request.id, Actor::member(OWNER), false)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Denied);
    }

    #[tokio::test]
    async fn owner_kicks_but_cannot_leave() {
        let (context, platform) = build_test_context().await;
        let zone = create_test_zone(&context, "chess", OWNER.get()).await;
        let policy = context.policy();
        policy.leave("chess", OWNER).await.unwrap_err();
        policy
            .set_policy("chess", Actor::member(OWNER), Policy::Open)
            .await
            .unwrap();
        policy.join("chess", USER).await.unwrap();
        policy
            .kick("chess", Actor::member(USER), OWNER)
            .await
            .unwrap_err();
        policy
            .kick("chess", Actor::member(OWNER), OWNER)
            .await
            .unwrap_err();
        policy
            .kick("chess", Actor::member(OWNER), USER)
            .await
            .unwrap();
        assert!(!platform.roles_of(USER).contains(&zone.member_role_id));
        policy
            .kick("chess", Actor::member(OWNER), USER)
            .await
            .unwrap_err();
    }
}
