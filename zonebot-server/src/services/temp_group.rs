use chrono::{DateTime, Duration, Utc};
use zonebot::model::{validate_ttl_hours, TempGroup, ZoneName};
use zonebot::platform::{
    ChannelEdit, ChannelKind, NewChannel, NewRole, Overwrite, PERMISSIONS_PARTICIPATE,
    PERMISSION_VIEW_CHANNEL,
};
use zonebot::Snowflake;

use super::{Actor, Context};
use crate::db;
use crate::errors::BotError;

/// The role and channel created so far for a new group.
#[derive(Debug, Default)]
struct Made {
    role_id: Option<Snowflake>,
    channel_id: Option<Snowflake>,
}

/// Short-lived private channels, archived by the sweep once they expire.
pub struct TempGroupService {
    context: Context,
}

impl TempGroupService {
    pub fn new(context: Context) -> Self {
        TempGroupService { context }
    }

    /// The live group of `channel_id`, if `actor` may manage it.
    async fn managed_group(&self, channel_id: Snowflake, actor: Actor) -> Result<TempGroup, BotError> {
        let group = {
            let mut connection = self.context.connection().await?;
            db::get_temp_group_by_channel(&mut connection, channel_id)
                .await
                .map_err(BotError::Storage)?
                .ok_or(BotError::UnknownGroup)?
        };
        if group.owner_id != actor.id && !actor.is_staff {
            return Err(BotError::NotOwner(group.name));
        }
        Ok(group)
    }

    pub async fn create(
        &self,
        owner: Snowflake,
        name: &str,
        ttl_hours: i64,
        members: &[Snowflake],
    ) -> Result<TempGroup, BotError> {
        let settings = &self.context.settings;
        let name = ZoneName::try_from(name).map_err(|x| BotError::invalid(x.to_string()))?;
        let ttl_hours =
            validate_ttl_hours(ttl_hours, settings.max_ttl_hours).map_err(BotError::Invalid)?;
        {
            let mut connection = self.context.connection().await?;
            if db::count_live_temp_groups(&mut connection, owner)
                .await
                .map_err(BotError::Storage)?
                >= settings.max_temp_groups_per_user
            {
                return Err(BotError::Refused(format!(
                    "you already have {} temporary groups open",
                    settings.max_temp_groups_per_user
                )));
            }
        }
        let now = Utc::now();
        let expires_at = now + Duration::hours(ttl_hours as i64);
        let mut made = Made::default();
        let built = self
            .build_group(&name, owner, members, expires_at, &mut made)
            .await;
        let stored = match built {
            Ok((role_id, channel_id)) => {
                let group = TempGroup {
                    id: 0,
                    guild_id: settings.guild_id,
                    name: name.into(),
                    owner_id: owner,
                    channel_id,
                    role_id,
                    created_at: now,
                    expires_at,
                    archived: false,
                };
                self.store_group(&group).await
            }
            Err(error) => Err(error),
        };
        match stored {
            Ok(group) => {
                tracing::info!(group = group.id, owner = %owner, %expires_at, "temporary group created");
                Ok(group)
            }
            Err(error) => {
                tracing::warn!(owner = %owner, %error, "temporary group creation failed, cleaning up");
                self.discard(made).await;
                Err(error)
            }
        }
    }

    /// Create the role and channel of a group, recording each in `made` as
    /// soon as it exists, and hand the role to its members.
    async fn build_group(
        &self,
        name: &ZoneName,
        owner: Snowflake,
        members: &[Snowflake],
        expires_at: DateTime<Utc>,
        made: &mut Made,
    ) -> Result<(Snowflake, Snowflake), BotError> {
        let guild_id = self.context.settings.guild_id;
        let platform = &self.context.platform;
        let role_id = platform
            .create_role(guild_id, &NewRole::new(format!("temp {}", name)))
            .await
            .map_err(BotError::Platform)?;
        made.role_id = Some(role_id);
        let channel_id = platform
            .create_channel(
                guild_id,
                &NewChannel {
                    name: name.slug(),
                    kind: ChannelKind::Text,
                    parent_id: None,
                    topic: Some(format!("Temporary group, closes <t:{}:R>", expires_at.timestamp())),
                    permission_overwrites: vec![
                        Overwrite::role(guild_id, 0, PERMISSION_VIEW_CHANNEL),
                        Overwrite::role(role_id, PERMISSIONS_PARTICIPATE, 0),
                    ],
                },
            )
            .await
            .map_err(BotError::Platform)?;
        made.channel_id = Some(channel_id);
        let mut users = vec![owner];
        users.extend(members.iter().filter(|x| **x != owner));
        for user_id in users {
            platform
                .add_member_role(guild_id, user_id, role_id)
                .await
                .map_err(BotError::Platform)?;
        }
        Ok((role_id, channel_id))
    }

    async fn store_group(&self, group: &TempGroup) -> Result<TempGroup, BotError> {
        let mut connection = self.context.connection_mut().await?;
        let id = db::put_temp_group(&mut connection, group)
            .await
            .map_err(BotError::Storage)?;
        db::get_temp_group(&mut connection, id)
            .await
            .map_err(BotError::Storage)?
            .ok_or(BotError::UnknownGroup)
    }

    /// Best-effort removal of what a failed creation left behind.
    async fn discard(&self, made: Made) {
        let platform = &self.context.platform;
        if let Some(channel_id) = made.channel_id {
            if let Err(error) = platform.delete_channel(channel_id).await {
                tracing::warn!(channel = %channel_id, %error, "could not delete channel");
            }
        }
        if let Some(role_id) = made.role_id {
            if let Err(error) = platform
                .delete_role(self.context.settings.guild_id, role_id)
                .await
            {
                tracing::warn!(role = %role_id, %error, "could not delete role");
            }
        }
    }

    pub async fn add(&self, channel_id: Snowflake, actor: Actor, user_id: Snowflake) -> Result<TempGroup, BotError> {
        let group = self.managed_group(channel_id, actor).await?;
        self.context
            .platform
            .add_member_role(self.context.settings.guild_id, user_id, group.role_id)
            .await
            .map_err(BotError::Platform)?;
        Ok(group)
    }

    /// Push the expiry back by `hours`, never past the maximum time to live
    /// counted from now.
    pub async fn extend(&self, channel_id: Snowflake, actor: Actor, hours: i64) -> Result<TempGroup, BotError> {
        let max_hours = self.context.settings.max_ttl_hours;
        let hours = validate_ttl_hours(hours, max_hours).map_err(BotError::Invalid)?;
        let group = self.managed_group(channel_id, actor).await?;
        let expires_at = group.extended_expiry(hours, max_hours, Utc::now());
        let mut connection = self.context.connection_mut().await?;
        db::update_temp_group_expiry(&mut connection, group.id, expires_at)
            .await
            .map_err(BotError::Storage)?;
        Ok(TempGroup { expires_at, ..group })
    }

    pub async fn close(&self, channel_id: Snowflake, actor: Actor) -> Result<TempGroup, BotError> {
        let group = self.managed_group(channel_id, actor).await?;
        self.archive_group(&group).await?;
        Ok(TempGroup {
            archived: true,
            ..group
        })
    }

    /// Archive every group expired at `now`; failures are logged and the
    /// group is retried on the next call. Returns the number archived.
    pub async fn archive_expired(&self, now: DateTime<Utc>) -> Result<usize, BotError> {
        let groups = {
            let mut connection = self.context.connection().await?;
            db::get_expired_temp_groups(&mut connection, now)
                .await
                .map_err(BotError::Storage)?
        };
        let mut archived = 0;
        for group in groups {
            match self.archive_group(&group).await {
                Ok(()) => archived += 1,
                Err(error) => {
                    tracing::error!(group = group.id, %error, "could not archive temporary group")
                }
            }
        }
        Ok(archived)
    }

    async fn archive_group(&self, group: &TempGroup) -> Result<(), BotError> {
        let settings = &self.context.settings;
        let platform = &self.context.platform;
        match settings.archive_category_id {
            Some(archive_id) => {
                platform
                    .edit_channel(
                        group.channel_id,
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
            None => platform.delete_channel(group.channel_id).await,
        }
        .map_err(BotError::Platform)?;
        if let Err(error) = platform.delete_role(settings.guild_id, group.role_id).await {
            tracing::warn!(group = group.id, %error, "could not delete role");
        }
        let mut connection = self.context.connection_mut().await?;
        db::update_temp_group_archived(&mut connection, group.id)
            .await
            .map_err(BotError::Storage)?;
        tracing::info!(group = group.id, "temporary group archived");
        Ok(())
    }
}
