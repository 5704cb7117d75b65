//! Slack channel — Events API webhook in, Web API `chat.postMessage` out.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use futures::stream;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::config::SlackConfig;
use crate::error::ChannelError;

/// Slack Web API base URL.
pub const SLACK_API_BASE: &str = "https://slack.com/api";

/// Requests older (or newer) than this many seconds are rejected.
const SIGNATURE_WINDOW_SECS: u64 = 300;

const CHANNEL_NAME: &str = "slack";

// ── Events API payloads ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EventEnvelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        team_id: String,
        event: SlackEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct SlackEvent {
    #[serde(rename = "type")]
    kind: String,
    subtype: Option<String>,
    user: Option<String>,
    bot_id: Option<String>,
    text: Option<String>,
    ts: Option<String>,
    thread_ts: Option<String>,
    channel: Option<String>,
    /// Sender's team; differs from the envelope team in shared channels.
    team: Option<String>,
}

/// Common envelope of every Web API response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    error: Option<String>,
}

// ── Shared State ────────────────────────────────────────────────────────

struct SlackChannelInner {
    /// Webhook handler → `Channel::start` stream.
    incoming_tx: mpsc::UnboundedSender<IncomingMessage>,
    signing_secret: Option<SecretString>,
}

#[derive(Clone)]
struct WebhookState {
    inner: Arc<SlackChannelInner>,
}

// ── SlackChannel ────────────────────────────────────────────────────────

/// Slack workspace connection.
///
/// - `router()` serves `POST /slack/events`; verified message events are
///   pushed into an mpsc sender.
/// - `start()` hands out the receiving side as a stream, once.
/// - `respond()` posts into the originating conversation, threaded under the
///   triggering message.
pub struct SlackChannel {
    inner: Arc<SlackChannelInner>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<IncomingMessage>>>,
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(config: &SlackConfig) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        if config.signing_secret.is_none() {
            warn!("SLACK_SIGNING_SECRET not set, webhook signatures will not be verified");
        }

        Self {
            inner: Arc::new(SlackChannelInner {
                incoming_tx,
                signing_secret: config.signing_secret.clone(),
            }),
            incoming_rx: Mutex::new(Some(incoming_rx)),
            bot_token: config.bot_token.clone(),
            api_base: SLACK_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point Web API calls somewhere other than slack.com.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    /// Axum router with the `/slack/events` endpoint.
    pub fn router(&self) -> Router {
        let state = WebhookState {
            inner: Arc::clone(&self.inner),
        };

        Router::new()
            .route("/slack/events", post(events_handler))
            .with_state(state)
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<(), String> {
        let resp = self
            .client
            .post(self.api_url(method))
            .bearer_auth(self.bot_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("{method} returned {status}"));
        }

        let api: ApiResponse = resp.json().await.map_err(|e| e.to_string())?;
        if api.ok {
            Ok(())
        } else {
            Err(format!(
                "{method} failed: {}",
                api.error.unwrap_or_else(|| "unknown_error".into())
            ))
        }
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let rx = self
            .incoming_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: "start() already called".into(),
            })?;

        info!("Slack channel listening for events");
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let conversation = msg
            .metadata
            .get("channel")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: "No channel in message metadata".into(),
            })?;

        let mut body = serde_json::json!({
            "channel": conversation,
            "text": response.content,
        });
        if let Some(thread_ts) = response.thread_id {
            body["thread_ts"] = serde_json::Value::String(thread_ts);
        }

        self.call("chat.postMessage", body)
            .await
            .map_err(|reason| ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason,
            })
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.call("auth.test", serde_json::json!({}))
            .await
            .map_err(|reason| {
                warn!(reason = %reason, "Slack health check failed");
                ChannelError::HealthCheckFailed {
                    name: CHANNEL_NAME.into(),
                }
            })
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        info!("Slack channel shutting down");
        Ok(())
    }
}

// ── Webhook ─────────────────────────────────────────────────────────────

async fn events_handler(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(ref secret) = state.inner.signing_secret {
        let verified = verify_signature(
            secret.expose_secret(),
            header(&headers, "x-slack-request-timestamp"),
            &body,
            header(&headers, "x-slack-signature"),
            Utc::now().timestamp(),
        );
        if !verified {
            warn!("Rejected Slack request with invalid signature");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    // Slack redelivers when we are slow to ack; the first delivery is
    // already being handled.
    if let Some(retry) = header(&headers, "x-slack-retry-num") {
        debug!(retry, "Ignoring Slack retry");
        return StatusCode::OK.into_response();
    }

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Undecodable Slack payload");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match envelope {
        EventEnvelope::UrlVerification { challenge } => {
            info!("Answering Slack URL verification");
            Json(serde_json::json!({ "challenge": challenge })).into_response()
        }
        EventEnvelope::EventCallback { team_id, event } => {
            if let Some(msg) = incoming_from_event(&team_id, event) {
                if state.inner.incoming_tx.send(msg).is_err() {
                    warn!("Slack event dropped, dispatcher not listening");
                }
            }
            StatusCode::OK.into_response()
        }
        EventEnvelope::Other => StatusCode::OK.into_response(),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Convert a `message` event. Other event types yield `None`.
///
/// Bot posts are tagged with subtype `bot_message` and thread replies carry
/// their parent `thread_ts`, so the dispatcher can drop both.
fn incoming_from_event(team_id: &str, event: SlackEvent) -> Option<IncomingMessage> {
    if event.kind != "message" {
        debug!(kind = %event.kind, "Ignoring Slack event type");
        return None;
    }

    let workspace_id = event.team.unwrap_or_else(|| team_id.to_string());
    let mut msg = IncomingMessage::new(
        CHANNEL_NAME,
        workspace_id,
        event.user.unwrap_or_default(),
        event.text.unwrap_or_default(),
    )
    .with_metadata(serde_json::json!({ "channel": event.channel }));

    if let Some(ref ts) = event.ts {
        msg = msg.with_id(ts.clone());
    }
    // A thread parent has `thread_ts == ts`; only replies differ.
    if let Some(thread_ts) = event.thread_ts.filter(|t| Some(t) != event.ts.as_ref()) {
        msg = msg.with_thread(thread_ts);
    }
    match (event.subtype, event.bot_id) {
        (Some(subtype), _) => msg = msg.with_subtype(subtype),
        (None, Some(_)) => msg = msg.with_subtype("bot_message"),
        (None, None) => {}
    }

    Some(msg)
}

/// Check Slack's `v0` request signature: hex HMAC-SHA256 over
/// `v0:{timestamp}:{body}`, with the timestamp within five minutes of `now`.
pub fn verify_signature(
    signing_secret: &str,
    timestamp: Option<&str>,
    body: &[u8],
    signature: Option<&str>,
    now: i64,
) -> bool {
    let Some(timestamp) = timestamp.map(str::trim) else {
        return false;
    };
    let Ok(sent_at) = timestamp.parse::<i64>() else {
        return false;
    };
    if now.abs_diff(sent_at) > SIGNATURE_WINDOW_SECS {
        return false;
    }

    let Some(signature) = signature.and_then(|s| s.trim().strip_prefix("v0=")) else {
        return false;
    };
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("v0:{timestamp}:").as_bytes());
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use futures::StreamExt;
    use tower::ServiceExt;
    use wiremock::matchers::{body_partial_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";

    fn config(signing_secret: Option<&str>) -> SlackConfig {
        SlackConfig {
            bot_token: SecretString::from("xoxb-test"),
            signing_secret: signing_secret.map(SecretString::from),
            port: 3000,
        }
    }

    fn sign(secret: &str, timestamp: &str, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("v0:{timestamp}:{body}").as_bytes());
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn message_event(extra: serde_json::Value) -> serde_json::Value {
        let mut event = serde_json::json!({
            "type": "message",
            "user": "U1",
            "text": "hello",
            "ts": "1700000000.000100",
            "channel": "C1"
        });
        if let (Some(event), Some(extra)) = (event.as_object_mut(), extra.as_object()) {
            event.extend(extra.clone());
        }
        serde_json::json!({ "type": "event_callback", "team_id": "T1", "event": event })
    }

    fn post(body: &str, headers: &[(&str, String)]) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("content-type", "application/json");
        for (name, value) in headers {
            req = req.header(*name, value);
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    // ── Signatures ──────────────────────────────────────────────────

    #[test]
    fn signature_valid() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        let sig = sign(SECRET, &ts, "payload");
        assert!(verify_signature(SECRET, Some(&ts), b"payload", Some(&sig), now));
    }

    #[test]
    fn signature_rejects_tampered_body() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        let sig = sign(SECRET, &ts, "payload");
        assert!(!verify_signature(SECRET, Some(&ts), b"payload!", Some(&sig), now));
    }

    #[test]
    fn signature_rejects_stale_timestamp() {
        let now = 1_700_000_000;
        let ts = (now - 301).to_string();
        let sig = sign(SECRET, &ts, "payload");
        assert!(!verify_signature(SECRET, Some(&ts), b"payload", Some(&sig), now));
    }

    #[test]
    fn signature_rejects_extreme_timestamps() {
        let now = 1_700_000_000;
        for ts in [i64::MIN.to_string(), i64::MAX.to_string()] {
            let sig = sign(SECRET, &ts, "{}");
            assert!(!verify_signature(SECRET, Some(&ts), b"{}", Some(&sig), now));
            assert!(!verify_signature("s", Some(&ts), b"{}", Some("v0=00"), now));
        }
    }

    #[test]
    fn signature_rejects_missing_or_garbled_headers() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        assert!(!verify_signature(SECRET, None, b"x", Some("v0=00"), now));
        assert!(!verify_signature(SECRET, Some(&ts), b"x", None, now));
        assert!(!verify_signature(SECRET, Some(&ts), b"x", Some("v0=zz"), now));
        assert!(!verify_signature(SECRET, Some(&ts), b"x", Some("v1=00"), now));
    }

    // ── Event conversion ────────────────────────────────────────────

    fn event(extra: serde_json::Value) -> SlackEvent {
        let envelope: EventEnvelope = serde_json::from_value(message_event(extra)).unwrap();
        match envelope {
            EventEnvelope::EventCallback { event, .. } => event,
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[test]
    fn top_level_message_converts() {
        let msg = incoming_from_event("T1", event(serde_json::json!({}))).unwrap();
        assert_eq!(msg.id, "1700000000.000100");
        assert_eq!(msg.workspace_id, "T1");
        assert_eq!(msg.user_id, "U1");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.metadata["channel"], "C1");
        assert!(msg.thread_id.is_none());
        assert!(msg.subtype.is_none());
    }

    #[test]
    fn thread_reply_keeps_parent() {
        let msg = incoming_from_event(
            "T1",
            event(serde_json::json!({ "thread_ts": "1699999999.000001" })),
        )
        .unwrap();
        assert_eq!(msg.thread_id.as_deref(), Some("1699999999.000001"));
    }

    #[test]
    fn thread_parent_is_top_level() {
        let msg = incoming_from_event(
            "T1",
            event(serde_json::json!({ "thread_ts": "1700000000.000100" })),
        )
        .unwrap();
        assert!(msg.thread_id.is_none());
    }

    #[test]
    fn bot_posts_get_bot_subtype() {
        let msg =
            incoming_from_event("T1", event(serde_json::json!({ "bot_id": "B1" }))).unwrap();
        assert_eq!(msg.subtype.as_deref(), Some("bot_message"));

        let edited = incoming_from_event(
            "T1",
            event(serde_json::json!({ "subtype": "message_changed" })),
        )
        .unwrap();
        assert_eq!(edited.subtype.as_deref(), Some("message_changed"));
    }

    #[test]
    fn non_message_events_are_skipped() {
        assert!(incoming_from_event("T1", event(serde_json::json!({ "type": "reaction_added" }))).is_none());
    }

    // ── Webhook router ──────────────────────────────────────────────

    #[tokio::test]
    async fn url_verification_echoes_challenge() {
        let channel = SlackChannel::new(&config(None));
        let body = r#"{"type":"url_verification","challenge":"abc123","token":"x"}"#;

        let resp = channel.router().oneshot(post(body, &[])).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["challenge"], "abc123");
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let channel = SlackChannel::new(&config(Some(SECRET)));
        let body = message_event(serde_json::json!({})).to_string();
        let ts = Utc::now().timestamp().to_string();

        let resp = channel
            .router()
            .oneshot(post(
                &body,
                &[
                    ("x-slack-request-timestamp", ts),
                    ("x-slack-signature", "v0=deadbeef".into()),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_message_event_reaches_stream() {
        let channel = SlackChannel::new(&config(Some(SECRET)));
        let mut messages = channel.start().await.unwrap();
        let body = message_event(serde_json::json!({})).to_string();
        let ts = Utc::now().timestamp().to_string();
        let sig = sign(SECRET, &ts, &body);

        let resp = channel
            .router()
            .oneshot(post(
                &body,
                &[
                    ("x-slack-request-timestamp", ts),
                    ("x-slack-signature", sig),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let msg = messages.next().await.unwrap();
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.workspace_id, "T1");
    }

    #[tokio::test]
    async fn retries_are_acknowledged_but_dropped() {
        let channel = SlackChannel::new(&config(None));
        let rx_holder = channel.incoming_rx.lock().await.take().unwrap();
        let body = message_event(serde_json::json!({})).to_string();

        let resp = channel
            .router()
            .oneshot(post(&body, &[("x-slack-retry-num", "1".into())]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let mut rx = rx_holder;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let channel = SlackChannel::new(&config(None));
        assert!(channel.start().await.is_ok());
        assert!(matches!(
            channel.start().await,
            Err(ChannelError::StartupFailed { .. })
        ));
    }

    // ── Web API ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn respond_posts_threaded_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(header_eq("authorization", "Bearer xoxb-test"))
            .and(body_partial_json(serde_json::json!({
                "channel": "C1",
                "text": "Ticket SUP-1 created",
                "thread_ts": "1700000000.000100"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let channel = SlackChannel::new(&config(None)).with_api_base(server.uri());
        let msg = IncomingMessage::new("slack", "T1", "U1", "hi")
            .with_id("1700000000.000100")
            .with_metadata(serde_json::json!({ "channel": "C1" }));

        channel
            .respond(
                &msg,
                OutgoingResponse::text("Ticket SUP-1 created").in_thread("1700000000.000100"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn respond_surfaces_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({ "ok": false, "error": "channel_not_found" }),
            ))
            .mount(&server)
            .await;

        let channel = SlackChannel::new(&config(None)).with_api_base(server.uri());
        let msg = IncomingMessage::new("slack", "T1", "U1", "hi")
            .with_metadata(serde_json::json!({ "channel": "C404" }));

        let err = channel
            .respond(&msg, OutgoingResponse::text("x"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
    }

    #[tokio::test]
    async fn respond_without_conversation_fails() {
        let channel = SlackChannel::new(&config(None));
        let msg = IncomingMessage::new("slack", "T1", "U1", "hi");
        assert!(matches!(
            channel.respond(&msg, OutgoingResponse::text("x")).await,
            Err(ChannelError::SendFailed { .. })
        ));
    }

    #[tokio::test]
    async fn health_check_uses_auth_test() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({ "ok": false, "error": "invalid_auth" }),
            ))
            .mount(&server)
            .await;

        let channel = SlackChannel::new(&config(None)).with_api_base(server.uri());
        assert!(channel.health_check().await.is_ok());
        assert!(matches!(
            channel.health_check().await,
            Err(ChannelError::HealthCheckFailed { .. })
        ));
    }
}
