use std::time::Duration;

use anyhow::{Context as _, Error, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use zonebot::message::OutgoingMessage;
use zonebot::platform::{ChannelEdit, NewChannel, NewRole, Platform, Webhook, WebhookPost};
use zonebot::Snowflake;

pub const API_BASE: &str = "https://discord.com/api/v10";

const MAX_ATTEMPTS: u32 = 3;
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct Created {
    id: Snowflake,
}

#[derive(Deserialize)]
struct RateLimited {
    retry_after: f64,
}

#[derive(Deserialize)]
struct GatewayBot {
    url: String,
}

/// How long to wait before retrying a rate limited call, if it is worth it.
fn retry_delay(body: &str) -> Option<Duration> {
    let limited: RateLimited = serde_json::from_str(body).ok()?;
    if !limited.retry_after.is_finite() || limited.retry_after < 0.0 {
        return None;
    }
    let delay = Duration::from_secs_f64(limited.retry_after);
    (delay <= MAX_RETRY_AFTER).then_some(delay)
}

/// Talks to the platform's HTTP API with the bot token.
pub struct RestClient {
    client: reqwest::Client,
    token: String,
    base: String,
}

impl RestClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base(token, API_BASE)
    }

    pub fn with_base(token: &str, base: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("zonebot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to create HTTP client")?;
        Ok(RestClient {
            client,
            token: token.to_string(),
            base: base.trim_end_matches('/').to_string(),
        })
    }

    /// Send one call, retrying when rate limited. Empty responses are
    /// returned as `Value::Null`.
    async fn call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", format!("Bot {}", self.token));
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request
                .send()
                .await
                .with_context(|| format!("failed to send {} {}", method, path))?;
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_ATTEMPTS {
                if let Some(delay) = retry_delay(&text) {
                    tracing::warn!(%method, path, ?delay, "rate limited");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
            if !status.is_success() {
                anyhow::bail!("{} {} failed with {}: {}", method, path, status, text);
            }
            tracing::debug!(%method, path, %status, "platform call");
            if text.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .with_context(|| format!("{} {} returned invalid JSON", method, path));
        }
    }

    async fn call_for<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let value = self.call(method, path, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn call_empty(&self, method: Method, path: &str) -> Result<()> {
        self.call::<Value>(method, path, None).await?;
        Ok(())
    }

    /// Overwrite the application's commands, in `guild_id` only when given.
    pub async fn register_commands(
        &self,
        application_id: Snowflake,
        guild_id: Option<Snowflake>,
        definitions: &Value,
    ) -> Result<usize> {
        let path = match guild_id {
            Some(guild_id) => format!(
                "/applications/{}/guilds/{}/commands",
                application_id, guild_id
            ),
            None => format!("/applications/{}/commands", application_id),
        };
        let registered = self.call(Method::PUT, &path, Some(definitions)).await?;
        Ok(registered.as_array().map_or(0, |x| x.len()))
    }

    /// The websocket URL to open the gateway with.
    pub async fn gateway_url(&self) -> Result<String> {
        let gateway: GatewayBot = self
            .call_for(Method::GET, "/gateway/bot", None::<&Value>)
            .await?;
        Ok(gateway.url)
    }
}

#[async_trait]
impl Platform for RestClient {
    async fn create_role(&self, guild_id: Snowflake, role: &NewRole) -> Result<Snowflake> {
        let path = format!("/guilds/{}/roles", guild_id);
        let created: Created = self.call_for(Method::POST, &path, Some(role)).await?;
        Ok(created.id)
    }

    async fn delete_role(&self, guild_id: Snowflake, role_id: Snowflake) -> Result<()> {
        let path = format!("/guilds/{}/roles/{}", guild_id, role_id);
        self.call_empty(Method::DELETE, &path).await
    }

    async fn add_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> Result<()> {
        let path = format!("/guilds/{}/members/{}/roles/{}", guild_id, user_id, role_id);
        self.call_empty(Method::PUT, &path).await
    }

    async fn remove_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> Result<()> {
        let path = format!("/guilds/{}/members/{}/roles/{}", guild_id, user_id, role_id);
        self.call_empty(Method::DELETE, &path).await
    }

    async fn create_channel(&self, guild_id: Snowflake, channel: &NewChannel) -> Result<Snowflake> {
        let path = format!("/guilds/{}/channels", guild_id);
        let created: Created = self.call_for(Method::POST, &path, Some(channel)).await?;
        Ok(created.id)
    }

    async fn edit_channel(&self, channel_id: Snowflake, edit: &ChannelEdit) -> Result<()> {
        let path = format!("/channels/{}", channel_id);
        self.call(Method::PATCH, &path, Some(edit)).await?;
        Ok(())
    }

    async fn delete_channel(&self, channel_id: Snowflake) -> Result<()> {
        self.call_empty(Method::DELETE, &format!("/channels/{}", channel_id))
            .await
    }

    async fn send_message(
        &self,
        channel_id: Snowflake,
        message: &OutgoingMessage,
    ) -> Result<Snowflake> {
        let path = format!("/channels/{}/messages", channel_id);
        let created: Created = self.call_for(Method::POST, &path, Some(message)).await?;
        Ok(created.id)
    }

    async fn edit_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        message: &OutgoingMessage,
    ) -> Result<()> {
        let path = format!("/channels/{}/messages/{}", channel_id, message_id);
        self.call(Method::PATCH, &path, Some(message)).await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        let path = format!("/channels/{}/messages/{}", channel_id, message_id);
        self.call_empty(Method::DELETE, &path).await
    }

    async fn send_direct_message(
        &self,
        user_id: Snowflake,
        message: &OutgoingMessage,
    ) -> Result<Snowflake> {
        let channel: Created = self
            .call_for(
                Method::POST,
                "/users/@me/channels",
                Some(&json!({ "recipient_id": user_id })),
            )
            .await?;
        self.send_message(channel.id, message).await
    }

    async fn create_webhook(&self, channel_id: Snowflake, name: &str) -> Result<Webhook> {
        let path = format!("/channels/{}/webhooks", channel_id);
        let webhook: Webhook = self
            .call_for(Method::POST, &path, Some(&json!({ "name": name })))
            .await?;
        Ok(webhook)
    }

    async fn execute_webhook(&self, webhook: &Webhook, post: &WebhookPost) -> Result<Snowflake> {
        let path = format!("/webhooks/{}/{}?wait=true", webhook.id, webhook.token);
        let created: Created = self.call_for(Method::POST, &path, Some(post)).await?;
        Ok(created.id)
    }

    async fn edit_original_response(
        &self,
        application_id: Snowflake,
        token: &str,
        message: &OutgoingMessage,
    ) -> Result<()> {
        if token.is_empty() {
            Err(Error::msg("interaction token is empty"))?;
        }
        let path = format!("/webhooks/{}/{}/messages/@original", application_id, token);
        self.call(Method::PATCH, &path, Some(message)).await?;
        Ok(())
    }

    async fn send_followup(
        &self,
        application_id: Snowflake,
        token: &str,
        message: &OutgoingMessage,
    ) -> Result<()> {
        if token.is_empty() {
            Err(Error::msg("interaction token is empty"))?;
        }
        let path = format!("/webhooks/{}/{}", application_id, token);
        self.call(Method::POST, &path, Some(message)).await?;
        Ok(())
    }
}
