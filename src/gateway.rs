//! Gateway (WebSocket) transport for the Discord API.
//!
//! This module owns the WebSocket connection lifecycle:
//!   - connect → receive HELLO → send IDENTIFY (or RESUME)
//!   - background heartbeat task
//!   - sequence number + session_id tracking
//!   - automatic reconnect with backoff
//!   - gateway send rate limiting (120 events / 60s)
//!
//! The rest of the bot consumes a channel of [`GatewayEvent`] values and
//! never touches `tokio_tungstenite` directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::events::GatewayEvent;
use crate::types::{GatewayPayload, Intents};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Discord allows at most 120 gateway sends per 60 seconds.
const SEND_BUDGET_MAX: usize = 120;
const SEND_BUDGET_WINDOW: Duration = Duration::from_secs(60);

/// Maximum number of consecutive reconnect attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

/// Slash commands arrive as interactions and need nothing beyond GUILDS.
pub const DEFAULT_INTENTS: Intents = Intents::GUILDS;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed gateway payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timed out waiting for HELLO")]
    HelloTimeout,

    #[error("unexpected gateway message while waiting for HELLO: {0}")]
    UnexpectedHello(String),

    #[error("stream ended")]
    Closed,
}

// ---------------------------------------------------------------------------
// Gateway send rate limiter
// ---------------------------------------------------------------------------

/// Sliding-window rate limiter for outbound gateway messages.
#[derive(Debug)]
struct SendRateLimiter {
    timestamps: Vec<Instant>,
    budget: usize,
    window: Duration,
}

impl SendRateLimiter {
    fn new(budget: usize, window: Duration) -> Self {
        Self {
            timestamps: Vec::with_capacity(budget),
            budget,
            window,
        }
    }

    /// How long to wait before the next send, if at all. Does not record it.
    fn delay(&self, now: Instant) -> Option<Duration> {
        let mut in_window = self
            .timestamps
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window);
        if in_window.clone().count() < self.budget {
            return None;
        }
        let oldest = in_window.next()?;
        (*oldest + self.window).checked_duration_since(now)
    }

    fn record(&mut self, now: Instant) {
        let window = self.window;
        self.timestamps
            .retain(|&t| now.duration_since(t) < window);
        self.timestamps.push(now);
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: Intents,
}

#[derive(Debug, Clone, Default)]
struct SessionState {
    /// From the READY event.
    session_id: Option<String>,
    /// Resume URL provided by Discord in the READY event.
    resume_gateway_url: Option<String>,
    sequence: Option<u64>,
}

impl SessionState {
    /// RESUME if we have something to resume, IDENTIFY otherwise.
    fn handshake(&self, config: &GatewayConfig) -> serde_json::Value {
        match (&self.session_id, self.sequence) {
            (Some(session_id), Some(seq)) => json!({
                "op": 6,
                "d": { "token": config.token, "session_id": session_id, "seq": seq }
            }),
            _ => json!({
                "op": 2,
                "d": {
                    "token": config.token,
                    "properties": { "os": std::env::consts::OS, "browser": "heist-bot", "device": "heist-bot" },
                    "intents": config.intents.bits(),
                }
            }),
        }
    }

    fn url(&self) -> String {
        let url = self
            .resume_gateway_url
            .as_deref()
            .unwrap_or(DEFAULT_GATEWAY_URL);
        if url.contains("v=10") {
            url.to_string()
        } else if url.contains('?') {
            format!("{}&v=10&encoding=json", url)
        } else {
            format!("{}/?v=10&encoding=json", url.trim_end_matches('/'))
        }
    }
}

type WsConnection =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsConnection, WsMessage>;
type WsStream = futures_util::stream::SplitStream<WsConnection>;

struct Writer {
    sink: Mutex<WsSink>,
    limiter: Mutex<SendRateLimiter>,
}

impl Writer {
    /// Send a JSON payload, waiting for send budget first.
    async fn send(&self, payload: &serde_json::Value) -> Result<(), GatewayError> {
        loop {
            let delay = self.limiter.lock().await.delay(Instant::now());
            match delay {
                Some(d) => {
                    debug!(delay_ms = d.as_millis() as u64, "gateway send rate-limited, waiting");
                    tokio::time::sleep(d).await;
                }
                None => break,
            }
        }
        self.limiter.lock().await.record(Instant::now());

        let text = serde_json::to_string(payload)?;
        self.sink.lock().await.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    async fn heartbeat(&self, seq: Option<u64>) -> Result<(), GatewayError> {
        self.send(&json!({ "op": 1, "d": seq })).await
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// A running gateway connection.
pub struct GatewayHandle {
    /// Typed events, minus internal plumbing (heartbeats).
    pub events: mpsc::Receiver<GatewayEvent>,
    /// The background driver; finishes when the gateway gives up for good.
    pub driver: tokio::task::JoinHandle<()>,
}

/// Spawn the gateway driver and return the event stream.
pub fn connect(config: GatewayConfig) -> GatewayHandle {
    let (event_tx, events) = mpsc::channel::<GatewayEvent>(256);
    let driver = tokio::spawn(gateway_driver(config, event_tx));
    GatewayHandle { events, driver }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisconnectReason {
    ShouldResume,
    ShouldReidentify,
    Fatal,
    EventChannelClosed,
}

async fn gateway_driver(config: GatewayConfig, event_tx: mpsc::Sender<GatewayEvent>) {
    let session = Arc::new(Mutex::new(SessionState::default()));
    let mut reconnect_attempts: u32 = 0;

    loop {
        let reason = match run_session(&config, &session, &event_tx, &mut reconnect_attempts).await
        {
            Ok(reason) => reason,
            Err(e) => {
                error!(error = %e, "gateway connection failed");
                DisconnectReason::ShouldResume
            }
        };

        match reason {
            DisconnectReason::ShouldResume => info!("will attempt RESUME"),
            DisconnectReason::ShouldReidentify => {
                info!("session invalidated, will re-IDENTIFY");
                let mut s = session.lock().await;
                s.session_id = None;
                s.sequence = None;
            }
            DisconnectReason::Fatal => {
                error!("fatal gateway error, shutting down");
                return;
            }
            DisconnectReason::EventChannelClosed => {
                info!("event channel closed, shutting down gateway driver");
                return;
            }
        }

        reconnect_attempts += 1;
        if reconnect_attempts > MAX_RECONNECT_ATTEMPTS {
            error!("exceeded max reconnect attempts, giving up");
            return;
        }
        let backoff = backoff_delay(reconnect_attempts);
        warn!(
            delay_ms = backoff.as_millis() as u64,
            attempt = reconnect_attempts,
            "reconnecting after backoff"
        );
        tokio::time::sleep(backoff).await;
    }
}

/// One connection from dial to disconnect.
async fn run_session(
    config: &GatewayConfig,
    session: &Arc<Mutex<SessionState>>,
    event_tx: &mpsc::Sender<GatewayEvent>,
    reconnect_attempts: &mut u32,
) -> Result<DisconnectReason, GatewayError> {
    let url = session.lock().await.url();
    info!(url = %url, "connecting to Discord gateway");
    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;

    let (sink, mut ws_read) = ws_stream.split();
    let writer = Arc::new(Writer {
        sink: Mutex::new(sink),
        limiter: Mutex::new(SendRateLimiter::new(SEND_BUDGET_MAX, SEND_BUDGET_WINDOW)),
    });

    let heartbeat_interval = read_hello(&mut ws_read).await?;
    info!(interval_ms = heartbeat_interval.as_millis() as u64, "received HELLO");

    let handshake = session.lock().await.handshake(config);
    let resuming = handshake["op"] == 6;
    writer.send(&handshake).await?;
    info!(resuming, "sent handshake");
    *reconnect_attempts = 0;

    let heartbeat = tokio::spawn(heartbeat_task(
        Arc::clone(&writer),
        Arc::clone(session),
        heartbeat_interval,
    ));

    let reason = read_loop(&mut ws_read, &writer, event_tx, session).await;

    heartbeat.abort();
    let _ = writer.sink.lock().await.send(WsMessage::Close(None)).await;
    Ok(reason)
}

async fn heartbeat_task(
    writer: Arc<Writer>,
    session: Arc<Mutex<SessionState>>,
    interval: Duration,
) {
    // First heartbeat after `interval * jitter`, jitter in [0, 1).
    let first = interval.mul_f64(rand::random::<f64>());
    let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + first, interval);
    loop {
        ticks.tick().await;
        let seq = session.lock().await.sequence;
        if let Err(e) = writer.heartbeat(seq).await {
            warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
            return;
        }
        debug!(seq = ?seq, "sent heartbeat");
    }
}

async fn read_loop(
    ws_read: &mut WsStream,
    writer: &Writer,
    event_tx: &mpsc::Sender<GatewayEvent>,
    session: &Mutex<SessionState>,
) -> DisconnectReason {
    loop {
        let msg = match ws_read.next().await {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket read error");
                return DisconnectReason::ShouldResume;
            }
            None => {
                info!("WebSocket stream ended");
                return DisconnectReason::ShouldResume;
            }
        };

        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(frame) => {
                let code = frame.map(|f| u16::from(f.code));
                warn!(close_code = ?code, "WebSocket closed by server");
                return code.map_or(DisconnectReason::ShouldResume, close_code_action);
            }
            // Ping, pong and binary frames are ignored.
            _ => continue,
        };

        let payload: GatewayPayload = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to parse gateway payload");
                continue;
            }
        };
        if let Some(s) = payload.s {
            session.lock().await.sequence = Some(s);
        }

        let event = GatewayEvent::from_payload(payload);
        match &event {
            GatewayEvent::Ready(ready) => {
                let mut s = session.lock().await;
                s.session_id = Some(ready.session_id.clone());
                s.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                info!(session_id = %ready.session_id, user = %ready.user.tag(), "gateway READY");
            }
            GatewayEvent::HeartbeatRequest => {
                let seq = session.lock().await.sequence;
                if let Err(e) = writer.heartbeat(seq).await {
                    warn!(error = %e, "failed to send requested heartbeat");
                }
                continue;
            }
            GatewayEvent::HeartbeatAck => {
                debug!("heartbeat acknowledged");
                continue;
            }
            GatewayEvent::Reconnect => {
                info!("gateway requested reconnect (op 7)");
                return DisconnectReason::ShouldResume;
            }
            GatewayEvent::InvalidSession(resumable) => {
                warn!(resumable, "session invalidated (op 9)");
                tokio::time::sleep(Duration::from_secs(2)).await;
                return if *resumable {
                    DisconnectReason::ShouldResume
                } else {
                    DisconnectReason::ShouldReidentify
                };
            }
            _ => {}
        }

        if event_tx.send(event).await.is_err() {
            info!("event channel closed by consumer");
            return DisconnectReason::EventChannelClosed;
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn read_hello(stream: &mut WsStream) -> Result<Duration, GatewayError> {
    let msg = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .map_err(|_| GatewayError::HelloTimeout)?
        .ok_or(GatewayError::Closed)??;

    match msg {
        WsMessage::Text(text) => parse_hello(&text),
        other => Err(GatewayError::UnexpectedHello(format!("{:?}", other))),
    }
}

fn parse_hello(text: &str) -> Result<Duration, GatewayError> {
    let payload: GatewayPayload = serde_json::from_str(text)?;
    if payload.op != 10 {
        return Err(GatewayError::UnexpectedHello(format!("op {}", payload.op)));
    }
    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(|v| v.as_u64())
        .map(Duration::from_millis)
        .ok_or_else(|| GatewayError::UnexpectedHello("missing heartbeat_interval".to_string()))
}

/// What to do after the server closes the socket with `code`.
fn close_code_action(code: u16) -> DisconnectReason {
    match code {
        // Authentication failed, invalid shard, sharding required, invalid
        // API version, invalid intents, disallowed intents.
        4004 | 4010..=4014 => {
            error!(code, "unrecoverable gateway close code");
            DisconnectReason::Fatal
        }
        // Invalid seq or session timed out.
        4007 | 4009 => DisconnectReason::ShouldReidentify,
        _ => DisconnectReason::ShouldResume,
    }
}

/// Exponential backoff with jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jitter = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jitter.min(60_000.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        GatewayConfig {
            token: "tok".to_string(),
            intents: DEFAULT_INTENTS,
        }
    }

    #[test]
    fn identifies_without_a_session() {
        let payload = SessionState::default().handshake(&config());
        assert_eq!(payload["op"], 2);
        assert_eq!(payload["d"]["intents"], 1);
    }

    #[test]
    fn resumes_with_a_session() {
        let session = SessionState {
            session_id: Some("abc".to_string()),
            resume_gateway_url: Some("wss://resume.discord.gg".to_string()),
            sequence: Some(42),
        };
        let payload = session.handshake(&config());
        assert_eq!(payload["op"], 6);
        assert_eq!(payload["d"]["seq"], 42);
        assert_eq!(session.url(), "wss://resume.discord.gg/?v=10&encoding=json");
    }

    #[test]
    fn parses_hello() {
        let interval = parse_hello(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();
        assert_eq!(interval, Duration::from_millis(41_250));
        assert!(parse_hello(r#"{"op":0,"d":{}}"#).is_err());
    }

    #[test]
    fn close_codes() {
        assert_eq!(close_code_action(4004), DisconnectReason::Fatal);
        assert_eq!(close_code_action(4014), DisconnectReason::Fatal);
        assert_eq!(close_code_action(4009), DisconnectReason::ShouldReidentify);
        assert_eq!(close_code_action(1001), DisconnectReason::ShouldResume);
    }

    #[test]
    fn send_budget_is_enforced() {
        let now = Instant::now();
        let mut limiter = SendRateLimiter::new(2, Duration::from_secs(60));
        limiter.record(now);
        assert_eq!(limiter.delay(now), None);
        limiter.record(now);
        assert_eq!(limiter.delay(now), Some(Duration::from_secs(60)));
        assert_eq!(limiter.delay(now + Duration::from_secs(61)), None);
    }

    #[test]
    fn backoff_is_capped() {
        for attempt in 0..20 {
            assert!(backoff_delay(attempt) <= Duration::from_secs(60));
        }
    }
}
