//! Discord gateway: REST v10 for outbound calls, gateway websocket for
//! inbound messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::channels::{Attachment, ChatGateway, IncomingMessage, MessageId, MessageStream};
use crate::error::ChannelError;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Maximum message length for Discord's create-message API.
pub const DISCORD_MAX_MESSAGE_LENGTH: usize = 2000;

/// Most messages a single history request returns.
const DISCORD_HISTORY_PAGE: usize = 100;

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Close code sent when the bot token is rejected.
const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;

const INITIAL_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(60);

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: serde_json::Value,
    s: Option<i64>,
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct Ready {
    user: DiscordUser,
}

#[derive(Debug, Deserialize)]
struct GatewayBot {
    url: String,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct DiscordAttachment {
    id: String,
    filename: String,
    url: String,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
    channel_id: String,
    #[serde(default)]
    content: String,
    author: DiscordUser,
    #[serde(default)]
    attachments: Vec<DiscordAttachment>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// JSON error code Discord returns for a deleted or unknown message.
const UNKNOWN_MESSAGE: u64 = 10008;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: u64,
}

impl From<DiscordMessage> for IncomingMessage {
    fn from(msg: DiscordMessage) -> Self {
        let name = msg
            .author
            .global_name
            .clone()
            .unwrap_or_else(|| msg.author.username.clone());
        let mut incoming = IncomingMessage::new(msg.id, msg.channel_id, msg.author.id, msg.content)
            .with_author_name(name);
        incoming.author_is_bot = msg.author.bot;
        incoming.attachments = msg
            .attachments
            .into_iter()
            .map(|a| Attachment {
                id: a.id,
                filename: a.filename,
                url: a.url,
                content_type: a.content_type,
            })
            .collect();
        incoming
    }
}

// ── REST client ─────────────────────────────────────────────────────

struct DiscordHttp {
    token: SecretString,
    client: reqwest::Client,
    api_base: String,
}

impl DiscordHttp {
    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token.expose_secret())
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ChannelError> {
        let mut req = self
            .client
            .request(method, self.api_url(path))
            .header(reqwest::header::AUTHORIZATION, self.authorization());
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        check_status(resp).await
    }

    async fn gateway_url(&self) -> Result<String, ChannelError> {
        let resp = self.request(Method::GET, "/gateway/bot", None).await?;
        let body: GatewayBot = resp
            .json()
            .await
            .map_err(|e| ChannelError::InvalidMessage(format!("gateway/bot: {e}")))?;
        Ok(format!("{}/?v=10&encoding=json", body.url))
    }
}

/// Map non-success responses to channel errors; 429 carries `retry_after`.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ChannelError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(classify_failure(status, body))
}

fn classify_failure(status: StatusCode, body: String) -> ChannelError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChannelError::RateLimited {
            name: "discord".into(),
            retry_after: parse_retry_after(&body),
        },
        StatusCode::UNAUTHORIZED => ChannelError::AuthFailed {
            name: "discord".into(),
            reason: body,
        },
        StatusCode::NOT_FOUND if is_unknown_message(&body) => ChannelError::MessageGone {
            name: "discord".into(),
            reason: body,
        },
        _ => ChannelError::Http(format!("{status}: {body}")),
    }
}

fn is_unknown_message(body: &str) -> bool {
    serde_json::from_str::<ApiErrorBody>(body).is_ok_and(|b| b.code == UNKNOWN_MESSAGE)
}

fn parse_retry_after(body: &str) -> Option<Duration> {
    serde_json::from_str::<RateLimitBody>(body)
        .ok()
        .filter(|b| b.retry_after.is_finite() && b.retry_after >= 0.0)
        .map(|b| Duration::from_secs_f64(b.retry_after))
}

// ── Gateway ─────────────────────────────────────────────────────────

/// Discord bot connection.
pub struct DiscordGateway {
    http: Arc<DiscordHttp>,
}

impl DiscordGateway {
    pub fn new(token: SecretString) -> Self {
        Self {
            http: Arc::new(DiscordHttp {
                token,
                client: reqwest::Client::new(),
                api_base: DISCORD_API_BASE.to_string(),
            }),
        }
    }

    /// Point REST calls at a different API root.
    pub fn with_api_base(token: SecretString, api_base: impl Into<String>) -> Self {
        Self {
            http: Arc::new(DiscordHttp {
                token,
                client: reqwest::Client::new(),
                api_base: api_base.into(),
            }),
        }
    }
}

#[async_trait]
impl ChatGateway for DiscordGateway {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let http = Arc::clone(&self.http);

        tokio::spawn(async move {
            run_listener(http, tx).await;
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<MessageId, ChannelError> {
        let resp = self
            .http
            .request(
                Method::POST,
                &format!("/channels/{channel_id}/messages"),
                Some(serde_json::json!({ "content": text })),
            )
            .await
            .map_err(|e| match e {
                ChannelError::Http(reason) => ChannelError::SendFailed {
                    name: "discord".into(),
                    reason,
                },
                other => other,
            })?;

        let created: MessageRef = resp
            .json()
            .await
            .map_err(|e| ChannelError::InvalidMessage(format!("create message: {e}")))?;
        Ok(created.id)
    }

    async fn delete(&self, channel_id: &str, message_id: &str) -> Result<(), ChannelError> {
        self.http
            .request(
                Method::DELETE,
                &format!("/channels/{channel_id}/messages/{message_id}"),
                None,
            )
            .await
            .map_err(|e| match e {
                ChannelError::Http(reason) => ChannelError::DeleteFailed {
                    name: "discord".into(),
                    message_id: message_id.to_string(),
                    reason,
                },
                other => other,
            })?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageId>, ChannelError> {
        let limit = limit.clamp(1, DISCORD_HISTORY_PAGE);
        let resp = self
            .http
            .request(
                Method::GET,
                &format!("/channels/{channel_id}/messages?limit={limit}"),
                None,
            )
            .await?;
        let page: Vec<MessageRef> = resp
            .json()
            .await
            .map_err(|e| ChannelError::InvalidMessage(format!("message history: {e}")))?;
        Ok(page.into_iter().map(|m| m.id).collect())
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError> {
        let resp = self
            .http
            .client
            .get(&attachment.url)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        let resp = check_status(resp).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.http
            .request(Method::GET, "/users/@me", None)
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "discord".into(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

// ── Listener loop ───────────────────────────────────────────────────

enum ListenExit {
    Reconnect,
    ReceiverDropped,
}

async fn run_listener(http: Arc<DiscordHttp>, tx: mpsc::UnboundedSender<IncomingMessage>) {
    let mut backoff = INITIAL_RECONNECT_BACKOFF;

    loop {
        match listen_once(&http, &tx).await {
            Ok(ListenExit::ReceiverDropped) => {
                tracing::info!("Discord listener channel closed");
                return;
            }
            Ok(ListenExit::Reconnect) => {
                tracing::info!("Discord gateway asked to reconnect");
                backoff = INITIAL_RECONNECT_BACKOFF;
            }
            Err(e @ ChannelError::AuthFailed { .. }) => {
                tracing::error!("Discord gateway stopped: {e}");
                return;
            }
            Err(e) => {
                tracing::warn!(backoff = ?backoff, "Discord gateway error: {e}");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
    }
}

async fn listen_once(
    http: &DiscordHttp,
    tx: &mpsc::UnboundedSender<IncomingMessage>,
) -> Result<ListenExit, ChannelError> {
    let url = http.gateway_url().await?;
    let (ws, _) = connect_async(url.as_str()).await.map_err(disconnected)?;
    let (mut sink, mut stream) = ws.split();

    let hello = next_payload(&mut stream).await?;
    if hello.op != OP_HELLO {
        return Err(ChannelError::InvalidMessage(format!(
            "expected hello, got op {}",
            hello.op
        )));
    }
    let hello: Hello = serde_json::from_value(hello.d)
        .map_err(|e| ChannelError::InvalidMessage(format!("hello: {e}")))?;
    let interval = Duration::from_millis(hello.heartbeat_interval);

    send_json(&mut sink, identify_payload(http.token.expose_secret())).await?;

    let jitter = interval.mul_f64(rand::random::<f64>());
    let mut heartbeat = tokio::time::interval_at(Instant::now() + jitter, interval);
    let mut seq: Option<i64> = None;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                send_json(&mut sink, heartbeat_payload(seq)).await?;
            }
            frame = stream.next() => {
                let Some(frame) = frame else {
                    return Ok(ListenExit::Reconnect);
                };
                match frame.map_err(disconnected)? {
                    Message::Text(text) => {
                        let payload: GatewayPayload = serde_json::from_str(text.as_str())
                            .map_err(|e| ChannelError::InvalidMessage(format!("gateway frame: {e}")))?;
                        if payload.s.is_some() {
                            seq = payload.s;
                        }
                        match payload.op {
                            OP_DISPATCH => {
                                if let Some(msg) = dispatch_event(payload) {
                                    if tx.send(msg).is_err() {
                                        return Ok(ListenExit::ReceiverDropped);
                                    }
                                }
                            }
                            OP_HEARTBEAT => send_json(&mut sink, heartbeat_payload(seq)).await?,
                            OP_RECONNECT | OP_INVALID_SESSION => return Ok(ListenExit::Reconnect),
                            OP_HEARTBEAT_ACK => {}
                            op => tracing::debug!(op, "Ignoring gateway opcode"),
                        }
                    }
                    Message::Close(frame) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        if code == Some(CLOSE_AUTHENTICATION_FAILED) {
                            return Err(ChannelError::AuthFailed {
                                name: "discord".into(),
                                reason: "gateway rejected the bot token".into(),
                            });
                        }
                        tracing::info!(?code, "Discord gateway closed");
                        return Ok(ListenExit::Reconnect);
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Turn a dispatch event into an inbound message, if it is one.
fn dispatch_event(payload: GatewayPayload) -> Option<IncomingMessage> {
    match payload.t.as_deref() {
        Some("READY") => {
            if let Ok(ready) = serde_json::from_value::<Ready>(payload.d) {
                tracing::info!(user = %ready.user.username, "Discord gateway ready");
            }
            None
        }
        Some("MESSAGE_CREATE") => match serde_json::from_value::<DiscordMessage>(payload.d) {
            Ok(msg) => Some(msg.into()),
            Err(e) => {
                tracing::warn!("Discord: unparseable MESSAGE_CREATE: {e}");
                None
            }
        },
        _ => None,
    }
}

fn identify_payload(token: &str) -> serde_json::Value {
    serde_json::json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "roster-bot",
                "device": "roster-bot"
            }
        }
    })
}

fn heartbeat_payload(seq: Option<i64>) -> serde_json::Value {
    serde_json::json!({ "op": OP_HEARTBEAT, "d": seq })
}

fn disconnected(e: WsError) -> ChannelError {
    ChannelError::Disconnected {
        name: "discord".into(),
        reason: e.to_string(),
    }
}

async fn send_json<S>(sink: &mut S, value: serde_json::Value) -> Result<(), ChannelError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    sink.send(Message::Text(value.to_string().into()))
        .await
        .map_err(disconnected)
}

async fn next_payload<S>(stream: &mut S) -> Result<GatewayPayload, ChannelError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        if let Message::Text(text) = frame.map_err(disconnected)? {
            return serde_json::from_str(text.as_str())
                .map_err(|e| ChannelError::InvalidMessage(format!("gateway frame: {e}")));
        }
    }
    Err(ChannelError::Disconnected {
        name: "discord".into(),
        reason: "gateway closed before hello".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> DiscordGateway {
        DiscordGateway::new(SecretString::from("fake-token"))
    }

    #[test]
    fn discord_gateway_name() {
        assert_eq!(gateway().name(), "discord");
    }

    #[test]
    fn discord_api_url() {
        assert_eq!(
            gateway().http.api_url("/gateway/bot"),
            "https://discord.com/api/v10/gateway/bot"
        );
    }

    #[test]
    fn authorization_uses_bot_scheme() {
        assert_eq!(gateway().http.authorization(), "Bot fake-token");
    }

    #[test]
    fn message_create_maps_to_incoming() {
        let payload: GatewayPayload = serde_json::from_value(serde_json::json!({
            "op": 0,
            "s": 42,
            "t": "MESSAGE_CREATE",
            "d": {
                "id": "111",
                "channel_id": "222",
                "content": "!update",
                "author": { "id": "333", "username": "arwen", "global_name": "Arwen" },
                "attachments": [{
                    "id": "444",
                    "filename": "shot.png",
                    "url": "https://cdn.discordapp.com/shot.png",
                    "content_type": "image/png",
                    "size": 1024
                }]
            }
        }))
        .unwrap();

        let msg = dispatch_event(payload).unwrap();
        assert_eq!(msg.id, "111");
        assert_eq!(msg.channel_id, "222");
        assert_eq!(msg.author_id, "333");
        assert_eq!(msg.author_name, "Arwen");
        assert!(!msg.author_is_bot);
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].mime_type(), "image/png");
    }

    #[test]
    fn bot_authors_are_flagged() {
        let payload: GatewayPayload = serde_json::from_value(serde_json::json!({
            "op": 0,
            "t": "MESSAGE_CREATE",
            "d": {
                "id": "1",
                "channel_id": "2",
                "author": { "id": "3", "username": "roster", "bot": true }
            }
        }))
        .unwrap();
        let msg = dispatch_event(payload).unwrap();
        assert!(msg.author_is_bot);
        assert_eq!(msg.content, "");
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn other_dispatch_events_are_ignored() {
        let payload: GatewayPayload = serde_json::from_value(serde_json::json!({
            "op": 0,
            "t": "TYPING_START",
            "d": {}
        }))
        .unwrap();
        assert!(dispatch_event(payload).is_none());
    }

    #[test]
    fn identify_carries_token_and_intents() {
        let payload = identify_payload("abc");
        assert_eq!(payload["op"], OP_IDENTIFY);
        assert_eq!(payload["d"]["token"], "abc");
        let intents = payload["d"]["intents"].as_u64().unwrap();
        assert_ne!(intents & (1 << 15), 0, "message content intent required");
    }

    #[test]
    fn heartbeat_sends_last_sequence() {
        assert_eq!(heartbeat_payload(Some(7))["d"], 7);
        assert!(heartbeat_payload(None)["d"].is_null());
    }

    #[test]
    fn retry_after_parsing() {
        assert_eq!(
            parse_retry_after(r#"{"message":"You are being rate limited.","retry_after":1.5,"global":false}"#),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_retry_after("not json"), None);
    }

    #[test]
    fn unknown_message_is_gone() {
        let err = classify_failure(
            StatusCode::NOT_FOUND,
            r#"{"message": "Unknown Message", "code": 10008}"#.into(),
        );
        assert!(err.is_message_gone(), "got {err:?}");

        let err = classify_failure(
            StatusCode::NOT_FOUND,
            r#"{"message": "Unknown Channel", "code": 10003}"#.into(),
        );
        assert!(matches!(err, ChannelError::Http(_)), "got {err:?}");

        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, r#"{"retry_after":2.0}"#.into());
        assert!(matches!(
            err,
            ChannelError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(2)
        ));
    }

    #[tokio::test]
    async fn send_to_unreachable_api_fails() {
        let gw = DiscordGateway::with_api_base(
            SecretString::from("fake-token"),
            "http://127.0.0.1:9/api/v10",
        );
        let err = gw.send("123", "hello").await.unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn delete_to_unreachable_api_fails() {
        let gw = DiscordGateway::with_api_base(
            SecretString::from("fake-token"),
            "http://127.0.0.1:9/api/v10",
        );
        assert!(gw.delete("123", "456").await.is_err());
    }
}
