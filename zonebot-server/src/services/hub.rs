use chrono::{DateTime, Duration, Utc};
use sqlx::Connection;
use zonebot::message::OutgoingMessage;
use zonebot::model::{
    Body, Description, NewRequest, Policy, Request, RequestKind, RequestStatus, Title, Zone,
    ZoneChannels, ZoneName,
};
use zonebot::platform::{
    ChannelEdit, ChannelKind, NewChannel, NewRole, Overwrite, PERMISSIONS_PARTICIPATE,
    PERMISSION_MANAGE_MESSAGES, PERMISSION_READ_MESSAGE_HISTORY, PERMISSION_SEND_MESSAGES,
    PERMISSION_VIEW_CHANNEL,
};
use zonebot::Snowflake;

use super::{render, Actor, Context};
use crate::db::{self, NewZone};
use crate::errors::BotError;

/// Longest event a member can schedule.
const MAX_EVENT_MINUTES: i64 = 7 * 24 * 60;

/// Roles and channels created so far for a new zone.
#[derive(Debug, Default)]
struct Built {
    roles: Vec<Snowflake>,
    channels: Vec<Snowflake>,
}

/// The platform side of a new zone, ready to be stored.
struct BuiltZone {
    guild_id: Snowflake,
    owner_id: Snowflake,
    channels: ZoneChannels,
    owner_role_id: Snowflake,
    member_role_id: Snowflake,
}

impl BuiltZone {
    fn with_name<'a>(&self, name: &'a ZoneName, description: &'a str) -> NewZone<'a> {
        NewZone {
            guild_id: self.guild_id,
            name: name.as_str(),
            description,
            owner_id: self.owner_id,
            channels: self.channels,
            owner_role_id: self.owner_role_id,
            member_role_id: self.member_role_id,
            policy: Policy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneInfo {
    pub zone: Zone,
    pub member_count: usize,
}

/// Zones, announcements and events: everything created through the hub.
pub struct HubService {
    context: Context,
}

fn invalid(error: impl std::fmt::Display) -> BotError {
    BotError::invalid(error.to_string())
}

impl HubService {
    pub fn new(context: Context) -> Self {
        HubService { context }
    }

    async fn put_request(&self, request: NewRequest) -> Result<Request, BotError> {
        let now = Utc::now();
        let mut connection = self.context.connection_mut().await?;
        let id = db::put_request(&mut connection, &request, now)
            .await
            .map_err(BotError::Storage)?;
        let request = db::get_request(&mut connection, id)
            .await
            .map_err(BotError::Storage)?
            .ok_or(BotError::UnknownRequest(id))?;
        tracing::info!(request = id, kind = %request.kind, author = %request.author_id, "request drafted");
        Ok(request)
    }

    /// Draft a request for a new zone owned by `author`.
    pub async fn request_zone(
        &self,
        author: Snowflake,
        name: &str,
        description: &str,
    ) -> Result<Request, BotError> {
        let settings = &self.context.settings;
        let name = ZoneName::try_from(name).map_err(invalid)?;
        let description = Description::try_from(description).map_err(invalid)?;
        {
            let mut connection = self.context.connection().await?;
            let owned = db::count_owned_zones(&mut connection, settings.guild_id, author)
                .await
                .map_err(BotError::Storage)?;
            if owned >= settings.max_zones_per_user {
                return Err(BotError::Refused(format!(
                    "you already own {} zone(s), the most allowed",
                    owned
                )));
            }
            if db::get_zone_by_name(&mut connection, settings.guild_id, name.as_str())
                .await
                .map_err(BotError::Storage)?
                .is_some()
            {
                return Err(BotError::invalid(format!(
                    "a zone named `{}` already exists",
                    name
                )));
            }
        }
        self.put_request(NewRequest {
            kind: RequestKind::Zone,
            guild_id: settings.guild_id,
            author_id: author,
            zone_id: None,
            title: name.into(),
            body: description.into(),
            send_at: None,
            end_at: None,
        })
        .await
    }

    /// The author hands a draft to staff: it becomes pending and appears on
    /// the staff panel.
    pub async fn submit(&self, request_id: i64, actor: Actor) -> Result<Request, BotError> {
        let request = self.context.load_request(request_id).await?;
        if request.author_id != actor.id {
            return Err(BotError::NotAuthor);
        }
        let request = self
            .context
            .set_status(&request, RequestStatus::Pending, None, Utc::now())
            .await?;
        let settings = &self.context.settings;
        match self
            .context
            .platform
            .send_message(settings.panel_channel_id, &render::panel_entry(&request))
            .await
        {
            Ok(message_id) => {
                let mut connection = self.context.connection_mut().await?;
                db::update_request_panel_message(&mut connection, request.id, message_id)
                    .await
                    .map_err(BotError::Storage)?;
                Ok(Request {
                    panel_message_id: Some(message_id),
                    ..request
                })
            }
            Err(error) => {
                // the request still shows up when staff refresh the panel
                tracing::warn!(request = request.id, %error, "could not post to the staff panel");
                Ok(request)
            }
        }
    }

    pub async fn cancel(&self, request_id: i64, actor: Actor) -> Result<Request, BotError> {
        let request = self.context.load_request(request_id).await?;
        if request.author_id != actor.id {
            return Err(BotError::NotAuthor);
        }
        let request = self
            .context
            .set_status(&request, RequestStatus::Cancelled, None, Utc::now())
            .await?;
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
        Ok(request)
    }

    /// Build the zone of a pending zone request. The request only moves on,
    /// through Accepted to Running, once the zone is stored; when any step
    /// fails the request stays pending and the roles and channels made so
    /// far are removed again.
    pub async fn create_zone(
        &self,
        request: &Request,
        decided_by: Option<Snowflake>,
    ) -> Result<(Zone, Request), BotError> {
        if request.kind != RequestKind::Zone {
            return Err(BotError::invalid("not a zone request"));
        }
        request
            .status
            .transition(request.kind, RequestStatus::Accepted)?;
        let settings = &self.context.settings;
        let guild_id = settings.guild_id;
        let name = ZoneName::try_from(request.title.as_str()).map_err(invalid)?;
        {
            let mut connection = self.context.connection().await?;
            // several requests can be pending at once, so the limit holds here too
            let owned = db::count_owned_zones(&mut connection, guild_id, request.author_id)
                .await
                .map_err(BotError::Storage)?;
            if owned >= settings.max_zones_per_user {
                return Err(BotError::Refused(format!(
                    "<@{}> already owns {} zone(s), the most allowed",
                    request.author_id, owned
                )));
            }
            if db::get_zone_by_name(&mut connection, guild_id, name.as_str())
                .await
                .map_err(BotError::Storage)?
                .is_some()
            {
                return Err(BotError::invalid(format!(
                    "a zone named `{}` already exists",
                    name
                )));
            }
        }

        let mut built = Built::default();
        let now = Utc::now();
        let stored = match self.build_zone(&name, request, &mut built).await {
            Ok(zone) => {
                self.store_zone(request, decided_by, &zone.with_name(&name, &request.body), now)
                    .await
            }
            Err(error) => Err(error),
        };
        let zone_id = match stored {
            Ok(zone_id) => zone_id,
            Err(error) => {
                tracing::warn!(request = request.id, %error, "zone creation failed, cleaning up");
                self.discard(built).await;
                return Err(error);
            }
        };
        tracing::info!(zone = zone_id, name = %name, owner = %request.author_id, "zone created");
        let zone = self.context.load_zone_by_id(zone_id).await?;
        Ok((
            zone,
            Request {
                status: RequestStatus::Running,
                decided_by: decided_by.or(request.decided_by),
                updated_at: now,
                ..request.clone()
            },
        ))
    }

    /// Create the roles and channels of a zone named `name`, recording each
    /// one in `built` as soon as it exists.
    async fn build_zone(
        &self,
        name: &ZoneName,
        request: &Request,
        built: &mut Built,
    ) -> Result<BuiltZone, BotError> {
        let platform = &self.context.platform;
        let guild_id = self.context.settings.guild_id;

        let owner_role_id = platform
            .create_role(guild_id, &NewRole::new(format!("{} owner", name)))
            .await
            .map_err(BotError::Platform)?;
        built.roles.push(owner_role_id);
        let member_role_id = platform
            .create_role(guild_id, &NewRole::new(format!("{} member", name)))
            .await
            .map_err(BotError::Platform)?;
        built.roles.push(member_role_id);

        // the @everyone role shares the guild's ID
        let hidden = Overwrite::role(guild_id, 0, PERMISSION_VIEW_CHANNEL);
        let members = Overwrite::role(member_role_id, PERMISSIONS_PARTICIPATE, 0);
        let owners = Overwrite::role(
            owner_role_id,
            PERMISSIONS_PARTICIPATE | PERMISSION_MANAGE_MESSAGES,
            0,
        );
        let category_id = platform
            .create_channel(
                guild_id,
                &NewChannel {
                    name: name.to_string(),
                    kind: ChannelKind::Category,
                    parent_id: None,
                    topic: None,
                    permission_overwrites: vec![hidden.clone(), members.clone(), owners.clone()],
                },
            )
            .await
            .map_err(BotError::Platform)?;
        built.channels.push(category_id);
        let child = |name: &str, kind: ChannelKind, overwrites: Vec<Overwrite>| NewChannel {
            name: name.to_string(),
            kind,
            parent_id: Some(category_id),
            topic: None,
            permission_overwrites: overwrites,
        };
        let channels = [
            NewChannel {
                topic: Some(request.body.clone()),
                ..child(
                    "general",
                    ChannelKind::Text,
                    vec![hidden.clone(), members.clone(), owners.clone()],
                )
            },
            child(
                "announcements",
                ChannelKind::Text,
                vec![
                    hidden.clone(),
                    Overwrite::role(
                        member_role_id,
                        PERMISSION_VIEW_CHANNEL | PERMISSION_READ_MESSAGE_HISTORY,
                        PERMISSION_SEND_MESSAGES,
                    ),
                    owners.clone(),
                ],
            ),
            child(
                "anon",
                ChannelKind::Text,
                vec![hidden.clone(), members.clone(), owners.clone()],
            ),
            child("voice", ChannelKind::Voice, vec![hidden, members, owners]),
        ];
        let mut ids = Vec::with_capacity(channels.len());
        for channel in &channels {
            let id = platform
                .create_channel(guild_id, channel)
                .await
                .map_err(BotError::Platform)?;
            built.channels.push(id);
            ids.push(id);
        }
        for role_id in [owner_role_id, member_role_id] {
            platform
                .add_member_role(guild_id, request.author_id, role_id)
                .await
                .map_err(BotError::Platform)?;
        }
        Ok(BuiltZone {
            guild_id,
            owner_id: request.author_id,
            channels: ZoneChannels {
                category_id,
                general_id: ids[0],
                announcements_id: ids[1],
                anon_id: ids[2],
                voice_id: ids[3],
            },
            owner_role_id,
            member_role_id,
        })
    }

    /// Store the zone and its owner, and move `request` to Running, all or
    /// nothing.
    async fn store_zone(
        &self,
        request: &Request,
        decided_by: Option<Snowflake>,
        zone: &NewZone<'_>,
        now: DateTime<Utc>,
    ) -> Result<i64, BotError> {
        let mut connection = self.context.connection_mut().await?;
        let mut connection = connection
            .begin()
            .await
            .map_err(|x| BotError::Storage(x.into()))?;
        let steps = [
            (request.status, RequestStatus::Accepted, decided_by),
            (RequestStatus::Accepted, RequestStatus::Running, None),
        ];
        for (from, to, by) in steps {
            // dropping the transaction rolls it back
            if !db::update_request_status(&mut *connection, request.id, from, to, by, now)
                .await
                .map_err(BotError::Storage)?
            {
                return Err(BotError::Conflict);
            }
        }
        let zone_id = db::put_zone(&mut *connection, zone, now)
            .await
            .map_err(BotError::Storage)?;
        db::put_zone_member(&mut *connection, zone_id, request.author_id, now)
            .await
            .map_err(BotError::Storage)?;
        connection
            .commit()
            .await
            .map_err(|x| BotError::Storage(x.into()))?;
        tracing::info!(
            request = request.id,
            from = %request.status,
            to = %RequestStatus::Running,
            "request status changed"
        );
        Ok(zone_id)
    }

    /// Best-effort removal of what a failed zone creation left behind.
    async fn discard(&self, built: Built) {
        let platform = &self.context.platform;
        // children before their category
        for channel_id in built.channels.into_iter().rev() {
            if let Err(error) = platform.delete_channel(channel_id).await {
                tracing::warn!(channel = %channel_id, %error, "could not delete channel");
            }
        }
        for role_id in built.roles {
            if let Err(error) = platform
                .delete_role(self.context.settings.guild_id, role_id)
                .await
            {
                tracing::warn!(role = %role_id, %error, "could not delete role");
            }
        }
    }

    /// Look up a zone that `actor` owns.
    async fn owned_zone(&self, zone: &str, actor: Actor) -> Result<Zone, BotError> {
        let zone = self.context.load_zone(zone).await?;
        if zone.owner_id != actor.id {
            return Err(BotError::NotOwner(zone.name));
        }
        Ok(zone)
    }

    /// Draft an announcement for the hub, or for `zone` when given.
    pub async fn draft_announcement(
        &self,
        actor: Actor,
        zone: Option<&str>,
        title: &str,
        body: &str,
        send_at: Option<DateTime<Utc>>,
    ) -> Result<Request, BotError> {
        let title = Title::try_from(title).map_err(invalid)?;
        let body = Body::try_from(body).map_err(invalid)?;
        let zone_id = match zone {
            Some(zone) => Some(self.owned_zone(zone, actor).await?.id),
            None => None,
        };
        self.put_request(NewRequest {
            kind: RequestKind::Announcement,
            guild_id: self.context.settings.guild_id,
            author_id: actor.id,
            zone_id,
            title: title.into(),
            body: body.into(),
            send_at,
            end_at: None,
        })
        .await
    }

    pub async fn draft_event(
        &self,
        actor: Actor,
        zone: Option<&str>,
        title: &str,
        body: &str,
        start: DateTime<Utc>,
        minutes: i64,
    ) -> Result<Request, BotError> {
        let title = Title::try_from(title).map_err(invalid)?;
        let body = Body::try_from(body).map_err(invalid)?;
        if start <= Utc::now() {
            return Err(BotError::invalid("the event must start in the future"));
        }
        if !(1..=MAX_EVENT_MINUTES).contains(&minutes) {
            return Err(BotError::invalid(format!(
                "an event lasts 1 to {} minutes",
                MAX_EVENT_MINUTES
            )));
        }
        let zone_id = match zone {
            Some(zone) => Some(self.owned_zone(zone, actor).await?.id),
            None => None,
        };
        self.put_request(NewRequest {
            kind: RequestKind::Event,
            guild_id: self.context.settings.guild_id,
            author_id: actor.id,
            zone_id,
            title: title.into(),
            body: body.into(),
            send_at: Some(start),
            end_at: Some(start + Duration::minutes(minutes)),
        })
        .await
    }

    /// Channels reached by a request: its zone's announcements channel, or
    /// the hub channel plus, when `all_zones`, every live zone's.
    async fn targets(&self, request: &Request, all_zones: bool) -> Result<Vec<Snowflake>, BotError> {
        let settings = &self.context.settings;
        let mut connection = self.context.connection().await?;
        Ok(match request.zone_id {
            Some(zone_id) => db::get_zone(&mut connection, zone_id)
                .await
                .map_err(BotError::Storage)?
                .filter(|x| x.is_live())
                .map(|x| vec![x.channels.announcements_id])
                .unwrap_or_default(),
            None if all_zones => {
                let mut targets = vec![settings.hub_channel_id];
                targets.extend(
                    db::get_live_zones(&mut connection, settings.guild_id)
                        .await
                        .map_err(BotError::Storage)?
                        .into_iter()
                        .map(|x| x.channels.announcements_id),
                );
                targets
            }
            None => vec![settings.hub_channel_id],
        })
    }

    /// Post `message` to every target, returning how many posts succeeded.
    async fn post_all(
        &self,
        request: &Request,
        targets: &[Snowflake],
        message: &OutgoingMessage,
    ) -> usize {
        let mut posted = 0;
        for channel_id in targets {
            match self.context.platform.send_message(*channel_id, message).await {
                Ok(_) => posted += 1,
                Err(error) => tracing::warn!(
                    request = request.id,
                    channel = %channel_id,
                    %error,
                    "could not post"
                ),
            }
        }
        posted
    }

    /// Post an announcement and mark it sent. A pending one is accepted by
    /// `decided_by` on the way; its status only changes once it is posted.
    pub async fn deliver_announcement(
        &self,
        request: &Request,
        decided_by: Option<Snowflake>,
        now: DateTime<Utc>,
    ) -> Result<Request, BotError> {
        if request.kind != RequestKind::Announcement {
            return Err(BotError::invalid("not an announcement"));
        }
        let steps: &[RequestStatus] = if request.status == RequestStatus::Pending {
            &[RequestStatus::Accepted, RequestStatus::Sent]
        } else {
            &[RequestStatus::Sent]
        };
        request.status.transition(request.kind, steps[0])?;
        let targets = self.targets(request, true).await?;
        if targets.is_empty() {
            // it can never be delivered
            if request
                .status
                .can_transition(request.kind, RequestStatus::Cancelled)
            {
                self.context
                    .set_status(request, RequestStatus::Cancelled, decided_by, now)
                    .await?;
            }
            return Err(BotError::invalid("the zone of this announcement is gone"));
        }
        let posted = self
            .post_all(request, &targets, &render::announcement(request))
            .await;
        if posted == 0 {
            return Err(BotError::Platform(anyhow::Error::msg(
                "the announcement reached no channel",
            )));
        }
        tracing::info!(request = request.id, posted, "announcement delivered");
        let mut request = request.clone();
        for to in steps {
            request = self
                .context
                .set_status(&request, *to, decided_by, now)
                .await?;
        }
        Ok(request)
    }

    pub async fn start_event(&self, request: &Request, now: DateTime<Utc>) -> Result<Request, BotError> {
        if request.kind != RequestKind::Event {
            return Err(BotError::invalid("not an event"));
        }
        let request = self
            .context
            .set_status(request, RequestStatus::Running, None, now)
            .await?;
        let targets = self.targets(&request, false).await?;
        self.post_all(&request, &targets, &render::event_started(&request))
            .await;
        Ok(request)
    }

    pub async fn end_event(&self, request: &Request, now: DateTime<Utc>) -> Result<Request, BotError> {
        let request = self
            .context
            .set_status(request, RequestStatus::Ended, None, now)
            .await?;
        let targets = self.targets(&request, false).await?;
        self.post_all(&request, &targets, &render::event_ended(&request))
            .await;
        Ok(request)
    }

    pub async fn zone_info(&self, zone: &str) -> Result<ZoneInfo, BotError> {
        let zone = self.context.load_zone(zone).await?;
        let mut connection = self.context.connection().await?;
        let member_count = db::get_zone_members(&mut connection, zone.id)
            .await
            .map_err(BotError::Storage)?
            .len();
        Ok(ZoneInfo { zone, member_count })
    }

    pub async fn list_zones(&self) -> Result<Vec<Zone>, BotError> {
        let mut connection = self.context.connection().await?;
        db::get_live_zones(&mut connection, self.context.settings.guild_id)
            .await
            .map_err(BotError::Storage)
    }

    /// Hand the zone over to one of its members.
    pub async fn transfer(
        &self,
        zone: &str,
        actor: Actor,
        new_owner: Snowflake,
    ) -> Result<Zone, BotError> {
        let zone = self.owned_zone(zone, actor).await?;
        if new_owner == zone.owner_id {
            return Err(BotError::invalid("you already own this zone"));
        }
        let settings = &self.context.settings;
        {
            let mut connection = self.context.connection().await?;
            if !db::is_zone_member(&mut connection, zone.id, new_owner)
                .await
                .map_err(BotError::Storage)?
            {
                return Err(BotError::invalid("the new owner must be a member of the zone"));
            }
            if db::count_owned_zones(&mut connection, settings.guild_id, new_owner)
                .await
                .map_err(BotError::Storage)?
                >= settings.max_zones_per_user
            {
                return Err(BotError::Refused(
                    "the new owner already owns as many zones as allowed".to_string(),
                ));
            }
        }
        let platform = &self.context.platform;
        platform
            .add_member_role(settings.guild_id, new_owner, zone.owner_role_id)
            .await
            .map_err(BotError::Platform)?;
        platform
            .remove_member_role(settings.guild_id, zone.owner_id, zone.owner_role_id)
            .await
            .map_err(BotError::Platform)?;
        {
            let mut connection = self.context.connection_mut().await?;
            db::update_zone_owner(&mut connection, zone.id, new_owner)
                .await
                .map_err(BotError::Storage)?;
        }
        tracing::info!(zone = zone.id, from = %zone.owner_id, to = %new_owner, "zone transferred");
        Ok(Zone {
            owner_id: new_owner,
            ..zone
        })
    }

    /// Cancel what was still waiting on an archived zone: join requests and
    /// zone announcements or events not yet delivered.
    async fn cancel_zone_requests(&self, zone: &Zone) -> Result<(), BotError> {
        let open = {
            let mut connection = self.context.connection().await?;
            db::get_open_zone_requests(&mut connection, zone.id)
                .await
                .map_err(BotError::Storage)?
        };
        let now = Utc::now();
        for request in open {
            let request = match self
                .context
                .set_status(&request, RequestStatus::Cancelled, None, now)
                .await
            {
                Ok(request) => request,
                Err(error) => {
                    tracing::warn!(request = request.id, %error, "could not cancel request");
                    continue;
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
            if request.kind == RequestKind::Join {
                let text = format!(
                    "The zone **{}** was archived, your request to join it is closed.",
                    zone.name
                );
                if let Err(error) = self
                    .context
                    .platform
                    .send_direct_message(request.author_id, &OutgoingMessage::text(text))
                    .await
                {
                    tracing::warn!(user = %request.author_id, %error, "could not send direct message");
                }
            }
        }
        Ok(())
    }

    /// Retire a zone: its roles go away and its channels are moved to the
    /// archive category, or deleted when there is none. The owner or staff
    /// may archive.
    pub async fn archive_zone(&self, zone: &str, actor: Actor) -> Result<Zone, BotError> {
        let zone = self.context.load_zone(zone).await?;
        if zone.owner_id != actor.id && !actor.is_staff {
            return Err(BotError::NotOwner(zone.name));
        }
        let settings = &self.context.settings;
        let platform = &self.context.platform;
        let children = [
            zone.channels.general_id,
            zone.channels.announcements_id,
            zone.channels.anon_id,
            zone.channels.voice_id,
        ];
        for channel_id in children {
            let result = match settings.archive_category_id {
                Some(archive_id) => {
                    platform
                        .edit_channel(
                            channel_id,
                            &ChannelEdit {
                                name: None,
                                parent_id: Some(archive_id),
                                permission_overwrites: Some(vec![Overwrite::role(
                                    settings.guild_id,
                                    0,
                                    PERMISSION_VIEW_CHANNEL,
                                )]),
                            },
                        )
                        .await
                }
                None => platform.delete_channel(channel_id).await,
            };
            if let Err(error) = result {
                tracing::warn!(zone = zone.id, channel = %channel_id, %error, "could not archive channel");
            }
        }
        if let Err(error) = platform.delete_channel(zone.channels.category_id).await {
            tracing::warn!(zone = zone.id, %error, "could not delete category");
        }
        for role_id in [zone.owner_role_id, zone.member_role_id] {
            if let Err(error) = platform.delete_role(settings.guild_id, role_id).await {
                tracing::warn!(zone = zone.id, role = %role_id, %error, "could not delete role");
            }
        }
        {
            let mut connection = self.context.connection_mut().await?;
            db::update_zone_archived(&mut connection, zone.id, true)
                .await
                .map_err(BotError::Storage)?;
        }
        tracing::info!(zone = zone.id, by = %actor.id, "zone archived");
        self.cancel_zone_requests(&zone).await?;
        Ok(Zone {
            archived: true,
            ..zone
        })
    }
}
