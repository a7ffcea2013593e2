use chrono::{DateTime, Utc};
use zonebot::interaction::GuildMessage;
use zonebot::message::AllowedMentions;
use zonebot::model::Zone;
use zonebot::platform::{Webhook, WebhookPost};
use zonebot::pseudonym::pseudonym;
use zonebot::Snowflake;

use super::render;
use super::Context;
use crate::db::{self, AnonPost};
use crate::errors::BotError;

const WEBHOOK_NAME: &str = "zonebot relay";
const MAX_CONTENT_CHARS: usize = 2000;

/// Text and attachment links of `message`, cut to what a message can hold.
/// The text is cut first; links that no longer fit are left out whole.
fn relayed_content(message: &GuildMessage) -> Option<String> {
    let mut content: String = message
        .content
        .trim()
        .chars()
        .take(MAX_CONTENT_CHARS)
        .collect();
    let mut length = content.chars().count();
    for url in message.attachments.iter().map(|x| x.url.as_str()) {
        let separator = usize::from(!content.is_empty());
        let added = separator + url.chars().count();
        if length + added > MAX_CONTENT_CHARS {
            continue;
        }
        if separator > 0 {
            content.push('\n');
        }
        content.push_str(url);
        length += added;
    }
    if content.is_empty() {
        None
    } else {
        Some(content)
    }
}

/// Reposts messages from zone anon channels under a daily pseudonym.
pub struct AnonRelayService {
    context: Context,
}

impl AnonRelayService {
    pub fn new(context: Context) -> Self {
        AnonRelayService { context }
    }

    /// Relay `message` if it was written in an anon channel. Returns the ID
    /// of the stored post, or `None` when the message was left alone or
    /// dropped.
    pub async fn relay(
        &self,
        message: &GuildMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, BotError> {
        if message.author.bot || message.webhook_id.is_some() {
            return Ok(None);
        }
        let author = message.author.id;
        let (origin, muted) = {
            let mut connection = self.context.connection().await?;
            let origin = db::get_zone_by_anon_channel(&mut connection, message.channel_id)
                .await
                .map_err(BotError::Storage)?;
            let muted = match origin {
                Some(_) => db::is_anon_muted(&mut connection, author)
                    .await
                    .map_err(BotError::Storage)?,
                None => false,
            };
            (origin, muted)
        };
        let origin = match origin {
            Some(zone) => zone,
            None => return Ok(None),
        };
        let platform = &self.context.platform;
        if let Err(error) = platform.delete_message(message.channel_id, message.id).await {
            tracing::warn!(message = %message.id, %error, "could not delete anonymous original");
        }
        if muted {
            tracing::info!(user = %author, zone = origin.id, "dropped message from muted user");
            let notice = render::notice("You are muted in anonymous channels.");
            if let Err(error) = platform.send_direct_message(author, &notice).await {
                tracing::warn!(user = %author, %error, "could not notify muted user");
            }
            return Ok(None);
        }
        let content = match relayed_content(message) {
            Some(content) => content,
            None => return Ok(None),
        };
        let settings = &self.context.settings;
        let pseudonym = pseudonym(&settings.anon_salt, settings.guild_id, author, now.date_naive());
        let (post_id, zones) = {
            let mut connection = self.context.connection_mut().await?;
            let post_id = db::put_anon_post(
                &mut connection,
                &AnonPost {
                    id: 0,
                    guild_id: settings.guild_id,
                    author_id: author,
                    pseudonym: pseudonym.clone(),
                    origin_channel_id: message.channel_id,
                    origin_message_id: message.id,
                    created_at: now,
                },
            )
            .await
            .map_err(BotError::Storage)?;
            let zones = db::get_live_zones(&mut connection, settings.guild_id)
                .await
                .map_err(BotError::Storage)?;
            (post_id, zones)
        };
        let post = WebhookPost {
            username: pseudonym,
            content,
            allowed_mentions: AllowedMentions::default(),
        };
        let mut copies = 0;
        for zone in zones.iter().filter(|x| !x.frozen) {
            match self.post_copy(zone, post_id, &post).await {
                Ok(()) => copies += 1,
                Err(error) => {
                    tracing::warn!(zone = zone.id, post = post_id, %error, "could not relay anonymous post")
                }
            }
        }
        tracing::info!(post = post_id, zone = origin.id, copies, "relayed anonymous post");
        Ok(Some(post_id))
    }

    async fn webhook(&self, channel_id: Snowflake) -> Result<Webhook, BotError> {
        let cached = {
            let mut connection = self.context.connection().await?;
            db::get_anon_webhook(&mut connection, channel_id)
                .await
                .map_err(BotError::Storage)?
        };
        if let Some(webhook) = cached {
            return Ok(webhook);
        }
        let webhook = self
            .context
            .platform
            .create_webhook(channel_id, WEBHOOK_NAME)
            .await
            .map_err(BotError::Platform)?;
        let mut connection = self.context.connection_mut().await?;
        db::put_anon_webhook(&mut connection, channel_id, &webhook)
            .await
            .map_err(BotError::Storage)?;
        Ok(webhook)
    }

    async fn post_copy(&self, zone: &Zone, post_id: i64, post: &WebhookPost) -> Result<(), BotError> {
        let channel_id = zone.channels.anon_id;
        let webhook = self.webhook(channel_id).await?;
        let message_id = match self.context.platform.execute_webhook(&webhook, post).await {
            Ok(message_id) => message_id,
            Err(error) => {
                // a stale webhook is recreated next time
                let mut connection = self.context.connection_mut().await?;
                db::delete_anon_webhook(&mut connection, channel_id)
                    .await
                    .map_err(BotError::Storage)?;
                return Err(BotError::Platform(error));
            }
        };
        let mut connection = self.context.connection_mut().await?;
        db::put_anon_copy(&mut connection, post_id, channel_id, message_id)
            .await
            .map_err(BotError::Storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use zonebot::interaction::{Attachment, User};

    use super::super::hub::test_utils::create_test_zone;
    use super::super::test_utils::*;
    use super::super::Actor;
    use super::*;

    fn message(channel_id: Snowflake, author: u64, content: &str) -> GuildMessage {
        GuildMessage {
            id: Snowflake::new(500),
            channel_id,
            guild_id: Some(GUILD),
            author: User {
                id: Snowflake::new(author),
                username: "someone".to_string(),
                bot: false,
            },
            content: content.to_string(),
            attachments: Vec::new(),
            webhook_id: None,
        }
    }

    fn relayed(platform: &RecordingPlatform) -> Vec<(Webhook, WebhookPost, Snowflake)> {
        platform
            .calls()
            .into_iter()
            .filter_map(|x| match x {
                Call::ExecuteWebhook(webhook, post, id) => Some((webhook, post, id)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn relays_to_every_live_zone() {
        let (context, platform) = build_test_context().await;
        let chess = create_test_zone(&context, "chess", 7).await;
        let go = create_test_zone(&context, "go", 8).await;
        platform.clear();
        let now = Utc::now();
        let post_id = context
            .anon()
            .relay(&message(chess.channels.anon_id, 20, "hello"), now)
            .await
            .unwrap()
            .unwrap();
        assert!(platform
            .calls()
            .contains(&Call::DeleteMessage(chess.channels.anon_id, Snowflake::new(500))));
        let posts = relayed(&platform);
        assert_eq!(posts.len(), 2);
        let expected = pseudonym("test salt", GUILD, Snowflake::new(20), now.date_naive());
        assert!(posts.iter().all(|x| x.1.username == expected && x.1.content == "hello"));
        let staff = context.staff_panel();
        let revealed = staff.reveal(posts[1].2, Actor::staff(Snowflake::new(99))).await.unwrap();
        assert_eq!(revealed.id, post_id);
        assert_eq!(revealed.author_id, Snowflake::new(20));
        // webhooks are created once per channel
        context
            .anon()
            .relay(&message(go.channels.anon_id, 21, "again"), now)
            .await
            .unwrap();
        let created = platform
            .calls()
            .into_iter()
            .filter(|x| matches!(x, Call::CreateWebhook(..)))
            .count();
        assert_eq!(created, 2);
    }

    #[tokio::test]
    async fn ignores_other_channels_and_bots() {
        let (context, platform) = build_test_context().await;
        let chess = create_test_zone(&context, "chess", 7).await;
        platform.clear();
        let anon = context.anon();
        let now = Utc::now();
        assert_eq!(
            anon.relay(&message(chess.channels.general_id, 20, "hi"), now)
                .await
                .unwrap(),
            None
        );
        let mut from_bot = message(chess.channels.anon_id, 20, "hi");
        from_bot.author.bot = true;
        assert_eq!(anon.relay(&from_bot, now).await.unwrap(), None);
        let mut from_webhook = message(chess.channels.anon_id, 20, "hi");
        from_webhook.webhook_id = Some(Snowflake::new(30));
        assert_eq!(anon.relay(&from_webhook, now).await.unwrap(), None);
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn drops_messages_from_muted_users() {
        let (context, platform) = build_test_context().await;
        let chess = create_test_zone(&context, "chess", 7).await;
        context
            .staff_panel()
            .mute_anon(Snowflake::new(20), Actor::staff(Snowflake::new(99)), true)
            .await
            .unwrap();
        platform.clear();
        let relayed_id = context
            .anon()
            .relay(&message(chess.channels.anon_id, 20, "hi"), Utc::now())
            .await
            .unwrap();
        assert_eq!(relayed_id, None);
        assert!(relayed(&platform).is_empty());
        assert_eq!(platform.direct_messages_to(Snowflake::new(20)).len(), 1);
    }

    #[tokio::test]
    async fn skips_frozen_zones_and_appends_attachments() {
        let (context, platform) = build_test_context().await;
        let chess = create_test_zone(&context, "chess", 7).await;
        create_test_zone(&context, "go", 8).await;
        context
            .staff_panel()
            .freeze("go", Actor::staff(Snowflake::new(99)), true)
            .await
            .unwrap();
        platform.clear();
        let mut with_file = message(chess.channels.anon_id, 20, "");
        with_file.attachments.push(Attachment {
            id: Snowflake::new(40),
            url: "https://cdn.example/a.png".to_string(),
        });
        context.anon().relay(&with_file, Utc::now()).await.unwrap();
        let posts = relayed(&platform);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1.content, "https://cdn.example/a.png");
    }

    #[test]
    fn truncates_long_content() {
        let long = "é".repeat(MAX_CONTENT_CHARS + 10);
        let content = relayed_content(&message(Snowflake::new(1), 2, &long)).unwrap();
        assert_eq!(content.chars().count(), MAX_CONTENT_CHARS);
        assert_eq!(relayed_content(&message(Snowflake::new(1), 2, "  ")), None);
    }

    #[test]
    fn keeps_links_whole_when_cutting() {
        let mut long = message(Snowflake::new(1), 2, &"a".repeat(MAX_CONTENT_CHARS - 20));
        for (id, url) in [(40, "https://cdn.example/long-name.png"), (41, "https://x.io/b")] {
            long.attachments.push(Attachment {
                id: Snowflake::new(id),
                url: url.to_string(),
            });
        }
        let content = relayed_content(&long).unwrap();
        assert!(content.chars().count() <= MAX_CONTENT_CHARS);
        assert!(content.ends_with("a\nhttps://x.io/b"));
        assert!(!content.contains("cdn.example"));

        let mut full = message(Snowflake::new(1), 2, &"a".repeat(MAX_CONTENT_CHARS + 5));
        full.attachments = long.attachments.clone();
        let content = relayed_content(&full).unwrap();
        assert_eq!(content, "a".repeat(MAX_CONTENT_CHARS));
    }
}
