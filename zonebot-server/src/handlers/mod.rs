use std::sync::Arc;
use std::time::Duration;

use axum::extract::Json;
use axum::routing::{get, post};
use axum::Router;
use ed25519_dalek::PublicKey;
use tower_http::trace::TraceLayer;

use crate::services::Context;

mod commands;
mod components;
mod error;
mod interactions;

use interactions::*;

/// How long an interaction may run before it is answered with a deferred
/// response.
pub const DEFER_AFTER: Duration = Duration::from_millis(2500);

#[derive(Clone)]
pub struct AppState {
    pub context: Context,
    pub public_key: Arc<PublicKey>,
    pub defer_after: Duration,
}

pub fn build_api(state: AppState, prefix: &str) -> Router {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let routes = Router::new()
        .route("/version", get(|| async { Json(VERSION) }))
        .route("/interactions", post(handle_interaction));
    let router = if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&format!("/{}", prefix), routes)
    };
    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod test_utils {
    use std::fmt::Debug;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{self, Request, Response};
    use axum::routing::Router;
    use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signer};
    use hyper;
    use hyper::body::HttpBody;
    use mime;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use zonebot::interaction::INTERACTION_APPLICATION_COMMAND;
    use zonebot::Snowflake;

    use super::{build_api, AppState, DEFER_AFTER};
    use crate::services::test_utils::*;
    use crate::services::Context;

    pub const TIMESTAMP: &str = "1700000000";

    pub fn build_keypair() -> Keypair {
        let secret = SecretKey::from_bytes(&[7u8; 32]).unwrap();
        let public: PublicKey = (&secret).into();
        Keypair { secret, public }
    }

    pub struct TestApi {
        pub api: Router,
        pub context: Context,
        pub platform: Arc<RecordingPlatform>,
        pub keypair: Keypair,
    }

    pub async fn build_test_api() -> TestApi {
        let (context, platform) = build_test_context().await;
        let keypair = build_keypair();
        let state = AppState {
            context: context.clone(),
            public_key: Arc::new(keypair.public),
            defer_after: DEFER_AFTER,
        };
        TestApi {
            api: build_api(state, ""),
            context,
            platform,
            keypair,
        }
    }

    pub fn sign(keypair: &Keypair, timestamp: &str, body: &[u8]) -> String {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        hex::encode(keypair.sign(&message).to_bytes())
    }

    pub fn request_signed(keypair: &Keypair, value: &Value) -> Request<Body> {
        let body = serde_json::to_vec(value).unwrap();
        Request::builder()
            .method("POST")
            .uri("/interactions")
            .header(http::header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
            .header("x-signature-ed25519", sign(keypair, TIMESTAMP, &body))
            .header("x-signature-timestamp", TIMESTAMP)
            .body(Body::from(body))
            .unwrap()
    }

    pub async fn get_body<T, U>(response: Response<T>) -> U
    where
        T: HttpBody,
        <T as HttpBody>::Error: Debug,
        U: DeserializeOwned,
    {
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&body[..]).unwrap()
    }

    /// An interaction from `user` in the test guild, with `data` as payload.
    pub fn interaction(kind: u8, user: u64, roles: &[Snowflake], data: Value) -> Value {
        json!({
            "id": "100",
            "application_id": "9",
            "type": kind,
            "guild_id": GUILD,
            "channel_id": "50",
            "member": {"user": {"id": user.to_string(), "username": "someone"}, "roles": roles},
            "token": "interaction-token",
            "data": data,
        })
    }

    /// `/command sub` with string or integer options.
    pub fn command(user: u64, name: &str, sub: Option<&str>, options: Value) -> Value {
        let options = match sub {
            Some(sub) => json!([{"name": sub, "type": 1, "options": options}]),
            None => options,
        };
        interaction(
            INTERACTION_APPLICATION_COMMAND,
            user,
            &[],
            json!({"name": name, "options": options}),
        )
    }
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tokio;
    use tower::ServiceExt;

    use super::test_utils::*;

    #[tokio::test]
    async fn api_handles_version() {
        let TestApi { api, .. } = build_test_api().await;
        const VERSION: &str = env!("CARGO_PKG_VERSION");
        let response = api
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/version")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: String = get_body(response).await;
        assert_eq!(body, VERSION);
    }
}
