//! A minimal gateway client: it identifies, keeps the heartbeat going and
//! hands every guild message to the anon relay.
//!
//! Sessions are never resumed. Whenever the connection drops or the gateway
//! asks for it, a fresh session is identified after a growing delay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, Result};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use zonebot::interaction::GuildMessage;

use super::RestClient;
use crate::services::Context;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

const INTENT_GUILDS: u64 = 1;
const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;
pub const INTENTS: u64 = INTENT_GUILDS | INTENT_GUILD_MESSAGES | INTENT_MESSAGE_CONTENT;

#[derive(Debug, Deserialize)]
struct Payload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

fn identify(token: &str) -> String {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {"os": std::env::consts::OS, "browser": "zonebot", "device": "zonebot"}
        }
    })
    .to_string()
}

fn heartbeat(sequence: Option<u64>) -> String {
    json!({"op": OP_HEARTBEAT, "d": sequence}).to_string()
}

/// Ticks every `period`; a late tick pushes the next ones back rather than
/// firing them in a burst.
fn heartbeat_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Doubling delay between reconnection attempts.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Backoff {
            current: initial,
            initial,
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Why a session ended.
#[derive(Debug, PartialEq, Eq)]
enum Ended {
    /// The gateway asked for a new session.
    Requested,
    /// The socket closed or stopped answering heartbeats.
    Lost,
}

/// Keep a gateway session open for the lifetime of the process.
pub async fn run_gateway(context: Context, rest: Arc<RestClient>) {
    let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
    loop {
        match session(&context, &rest).await {
            Ok(Ended::Requested) => {
                tracing::info!("gateway asked to reconnect");
                backoff.reset();
            }
            Ok(Ended::Lost) => tracing::warn!("gateway connection lost"),
            Err(error) => tracing::error!(%error, "gateway session failed"),
        }
        let delay = backoff.next_delay();
        tracing::info!(?delay, "reconnecting to gateway");
        tokio::time::sleep(delay).await;
    }
}

async fn session(context: &Context, rest: &RestClient) -> Result<Ended> {
    let url = format!("{}/?v=10&encoding=json", rest.gateway_url().await?);
    let (socket, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = socket.split();

    let hello = match stream.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<Payload>(&text)?,
        _ => return Ok(Ended::Lost),
    };
    if hello.op != OP_HELLO {
        Err(Error::msg(format!("expected hello, got op {}", hello.op)))?;
    }
    let hello: Hello = serde_json::from_value(hello.d)?;
    sink.send(Message::Text(identify(&context.settings.token)))
        .await?;
    tracing::info!(heartbeat_ms = hello.heartbeat_interval, "gateway identified");

    let mut ticker = heartbeat_ticker(Duration::from_millis(hello.heartbeat_interval));
    // the first tick fires at once
    ticker.tick().await;
    let mut sequence: Option<u64> = None;
    let mut acknowledged = true;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !acknowledged {
                    return Ok(Ended::Lost);
                }
                acknowledged = false;
                sink.send(Message::Text(heartbeat(sequence))).await?;
            }
            message = stream.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(data))) => {
                        sink.send(Message::Pong(data)).await?;
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::warn!(?frame, "gateway closed the connection");
                        return Ok(Ended::Lost);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(error)) => return Err(error.into()),
                    None => return Ok(Ended::Lost),
                };
                let payload: Payload = match serde_json::from_str(&text) {
                    Ok(payload) => payload,
                    Err(error) => {
                        tracing::warn!(%error, "unreadable gateway payload");
                        continue;
                    }
                };
                if payload.s.is_some() {
                    sequence = payload.s;
                }
                match payload.op {
                    OP_DISPATCH => {
                        dispatch(context, payload.t.as_deref(), payload.d);
                    }
                    OP_HEARTBEAT => sink.send(Message::Text(heartbeat(sequence))).await?,
                    OP_HEARTBEAT_ACK => acknowledged = true,
                    OP_RECONNECT | OP_INVALID_SESSION => return Ok(Ended::Requested),
                    op => tracing::debug!(op, "ignored gateway op"),
                }
            }
        }
    }
}

/// Handle a dispatched event. Relays run in their own task so the session
/// keeps reading and heartbeating meanwhile.
fn dispatch(context: &Context, event: Option<&str>, data: Value) -> Option<JoinHandle<()>> {
    match event {
        Some("READY") => {
            tracing::info!("gateway ready");
            None
        }
        Some("MESSAGE_CREATE") => {
            let message: GuildMessage = match serde_json::from_value(data) {
                Ok(message) => message,
                Err(error) => {
                    tracing::warn!(%error, "unreadable message event");
                    return None;
                }
            };
            if message.guild_id != Some(context.settings.guild_id) {
                return None;
            }
            let context = context.clone();
            Some(tokio::spawn(async move {
                if let Err(error) = context.anon().relay(&message, Utc::now()).await {
                    tracing::error!(message = %message.id, %error, "could not relay message");
                }
            }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use tokio;
    use zonebot::Snowflake;

    use super::*;
    use crate::services::test_utils::*;
    use crate::services::{Actor, Decision};

    #[test]
    fn builds_identify_payload() {
        let payload: Value = serde_json::from_str(&identify("secret")).unwrap();
        assert_eq!(payload["op"], 2);
        assert_eq!(payload["d"]["token"], "secret");
        assert_eq!(payload["d"]["intents"], 33281);
    }

    #[test]
    fn heartbeat_carries_last_sequence() {
        let payload: Value = serde_json::from_str(&heartbeat(None)).unwrap();
        assert_eq!(payload, json!({"op": 1, "d": null}));
        let payload: Value = serde_json::from_str(&heartbeat(Some(42))).unwrap();
        assert_eq!(payload["d"], 42);
    }

    #[test]
    fn parses_dispatch_payload() {
        let payload: Payload = serde_json::from_str(
            r#"{"op": 0, "s": 3, "t": "MESSAGE_CREATE", "d": {"id": "1"}}"#,
        )
        .unwrap();
        assert_eq!(payload.op, OP_DISPATCH);
        assert_eq!(payload.s, Some(3));
        assert_eq!(payload.t.as_deref(), Some("MESSAGE_CREATE"));
        let ack: Payload = serde_json::from_str(r#"{"op": 11}"#).unwrap();
        assert_eq!(ack.d, Value::Null);
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn heartbeat_ticker_delays_missed_ticks() {
        let ticker = heartbeat_ticker(Duration::from_millis(41250));
        assert_eq!(ticker.missed_tick_behavior(), MissedTickBehavior::Delay);
        assert_eq!(ticker.period(), Duration::from_millis(41250));
    }

    #[tokio::test]
    async fn relays_guild_messages_in_a_task() {
        let (context, platform) = build_test_context().await;
        let owner = Snowflake::new(7);
        let request = context
            .hub()
            .request_zone(owner, "chess", "about")
            .await
            .unwrap();
        context
            .hub()
            .submit(request.id, Actor::member(owner))
            .await
            .unwrap();
        context
            .staff_panel()
            .decide(request.id, Actor::staff(Snowflake::new(20)), Decision::Accept)
            .await
            .unwrap();
        let zone = context.hub().zone_info("chess").await.unwrap().zone;
        platform.clear();

        let event = |guild: Snowflake| {
            json!({
                "id": "500",
                "channel_id": zone.channels.anon_id.to_string(),
                "guild_id": guild.to_string(),
                "author": {"id": "21", "username": "someone"},
                "content": "hello"
            })
        };
        assert!(dispatch(&context, Some("MESSAGE_CREATE"), event(Snowflake::new(12345))).is_none());
        assert!(dispatch(&context, Some("READY"), json!({})).is_none());
        let task = dispatch(&context, Some("MESSAGE_CREATE"), event(GUILD)).unwrap();
        task.await.unwrap();
        assert!(platform
            .calls()
            .contains(&Call::DeleteMessage(zone.channels.anon_id, Snowflake::new(500))));
        assert!(platform
            .calls()
            .iter()
            .any(|x| matches!(x, Call::ExecuteWebhook(..))));
    }
}
