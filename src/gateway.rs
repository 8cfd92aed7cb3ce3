//! Gateway (WebSocket) transport for the Discord API.
//!
//! This module owns the WebSocket connection lifecycle:
//!   - connect → receive HELLO → send IDENTIFY
//!   - background heartbeat task
//!   - sequence number + session_id tracking
//!   - automatic reconnect + RESUME on disconnect
//!
//! The rest of the codebase consumes a stream of [`GatewayEvent`] values
//! without ever touching `tokio_tungstenite` directly. When the driver gives
//! up it emits a final [`GatewayEvent::Closing`] before ending the stream.

use std::sync::Arc;
use std::time::Duration;

use async_lock::Mutex;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::events::GatewayEvent;
use crate::types::{GatewayPayload, Intents};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Maximum number of consecutive reconnect attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons the gateway connection ended for good.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Discord rejected the bot token (close 4004).
    #[error("authentication failed: the gateway rejected DISCORD_TOKEN")]
    AuthenticationFailed,
    /// A close code we cannot recover from by reconnecting.
    #[error("gateway closed the connection ({code}): {reason}")]
    Rejected { code: u16, reason: &'static str },
    /// Too many reconnects in a row without a successful handshake.
    #[error("gave up after {0} reconnect attempts")]
    ReconnectsExhausted(u32),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Options for connecting to the Discord gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: Intents,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Internal session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct ResumeState {
    /// From the READY event.
    session_id: Option<String>,
    /// Resume URL provided by Discord in the READY event.
    resume_gateway_url: Option<String>,
    /// Last sequence number seen.
    sequence: Option<u64>,
}

// ---------------------------------------------------------------------------
// WebSocket halves
// ---------------------------------------------------------------------------

type WsConnection =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsConnection, WsMessage>;
type WsStream = futures_util::stream::SplitStream<WsConnection>;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Handle to a running gateway connection.
pub struct GatewayHandle {
    /// Receive typed events. The stream ends after a final `Closing` event.
    pub events: async_channel::Receiver<GatewayEvent>,
    /// Handle to the background driver task so callers can abort it.
    pub driver_handle: tokio::task::JoinHandle<()>,
}

/// Spawn the gateway driver and return a [`GatewayHandle`].
///
/// The driver reads from the WebSocket, heartbeats at the interval Discord
/// asks for, and reconnects + resumes on recoverable disconnects.
pub fn connect(config: GatewayConfig) -> GatewayHandle {
    let (event_tx, event_rx) = async_channel::bounded::<GatewayEvent>(256);
    let driver_handle = tokio::spawn(gateway_driver(config, event_tx));

    GatewayHandle {
        events: event_rx,
        driver_handle,
    }
}

// ---------------------------------------------------------------------------
// The main driver loop (runs in a spawned task)
// ---------------------------------------------------------------------------

async fn gateway_driver(config: GatewayConfig, event_tx: async_channel::Sender<GatewayEvent>) {
    let session = Arc::new(Mutex::new(ResumeState::default()));
    let mut reconnect_attempts: u32 = 0;

    let fatal = loop {
        if reconnect_attempts > MAX_RECONNECT_ATTEMPTS {
            error!("exceeded max reconnect attempts, giving up");
            break Some(GatewayError::ReconnectsExhausted(MAX_RECONNECT_ATTEMPTS));
        }
        if reconnect_attempts > 0 {
            let backoff = backoff_delay(reconnect_attempts);
            warn!(
                delay_ms = backoff.as_millis() as u64,
                attempt = reconnect_attempts,
                "backing off before reconnect"
            );
            tokio::time::sleep(backoff).await;
        }

        let url = {
            let s = session.lock().await;
            gateway_url(s.resume_gateway_url.as_deref())
        };

        info!(url = %url, "connecting to Discord gateway");

        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                error!(error = %e, "failed to connect to gateway");
                reconnect_attempts += 1;
                continue;
            }
        };

        info!("WebSocket connected");

        let (ws_write, mut ws_read) = ws_stream.split();
        let ws_write = Arc::new(Mutex::new(ws_write));

        // 1. HELLO
        let heartbeat_interval = match read_hello(&mut ws_read).await {
            Ok(interval) => interval,
            Err(e) => {
                error!(error = %e, "failed to read HELLO from gateway");
                reconnect_attempts += 1;
                continue;
            }
        };

        debug!(interval_ms = heartbeat_interval, "received HELLO");

        // 2. IDENTIFY or RESUME
        let handshake = {
            let s = session.lock().await;
            match (&s.session_id, s.sequence) {
                (Some(session_id), Some(seq)) => resume_payload(&config.token, session_id, seq),
                _ => identify_payload(&config),
            }
        };
        let resuming = handshake["op"] == 6;

        if let Err(e) = send_json(&ws_write, &handshake).await {
            error!(error = %e, resuming, "failed to send handshake");
            reconnect_attempts += 1;
            continue;
        }
        info!(resuming, "sent handshake");

        // 3. Heartbeat task
        let heartbeat_handle = tokio::spawn(heartbeat_loop(
            Arc::clone(&ws_write),
            Arc::clone(&session),
            heartbeat_interval,
        ));

        // 4. Read loop
        let disconnect = read_loop(&mut ws_read, &ws_write, &event_tx, &session).await;

        // 5. Cleanup, then decide what to do next
        heartbeat_handle.abort();
        {
            let mut w = ws_write.lock().await;
            let _ = w.send(WsMessage::Close(None)).await;
        }

        match disconnect {
            DisconnectReason::ShouldResume => {
                info!("will attempt RESUME");
                // A known session means the last handshake worked, so the
                // failure streak starts over.
                let had_session = session.lock().await.session_id.is_some();
                reconnect_attempts = if had_session { 1 } else { reconnect_attempts + 1 };
            }
            DisconnectReason::ShouldReidentify => {
                info!("session invalidated, will re-IDENTIFY");
                let mut s = session.lock().await;
                s.session_id = None;
                s.sequence = None;
                reconnect_attempts += 1;
            }
            DisconnectReason::Fatal(e) => {
                error!(error = %e, "fatal gateway error, shutting down");
                break Some(e);
            }
            DisconnectReason::EventChannelClosed => {
                info!("event channel closed, shutting down gateway driver");
                return;
            }
        }
    };

    let _ = event_tx.send(GatewayEvent::Closing(fatal)).await;
    event_tx.close();
}

async fn heartbeat_loop(
    ws_write: Arc<Mutex<WsSink>>,
    session: Arc<Mutex<ResumeState>>,
    heartbeat_interval: u64,
) {
    // Discord says the first heartbeat goes out after
    // `heartbeat_interval * jitter` where jitter ∈ [0, 1).
    let jitter = rand::random::<f64>();
    tokio::time::sleep(Duration::from_millis(
        (heartbeat_interval as f64 * jitter) as u64,
    ))
    .await;

    let mut interval = tokio::time::interval(Duration::from_millis(heartbeat_interval));
    loop {
        interval.tick().await;
        let seq = session.lock().await.sequence;
        if let Err(e) = send_json(&ws_write, &heartbeat_payload(seq)).await {
            warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
            return;
        }
        debug!(seq = ?seq, "sent heartbeat");
    }
}

// ---------------------------------------------------------------------------
// Disconnect reason
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum DisconnectReason {
    ShouldResume,
    ShouldReidentify,
    Fatal(GatewayError),
    EventChannelClosed,
}

/// Classify a WebSocket close code sent by Discord.
fn classify_close(code: u16) -> DisconnectReason {
    let rejected = |reason| DisconnectReason::Fatal(GatewayError::Rejected { code, reason });
    match code {
        4004 => DisconnectReason::Fatal(GatewayError::AuthenticationFailed),
        4010 => rejected("invalid shard"),
        4011 => rejected("sharding required"),
        4012 => rejected("invalid API version"),
        4013 => rejected("invalid intents"),
        4014 => rejected("disallowed intents"),
        // Invalid seq or session timed out.
        4007 | 4009 => DisconnectReason::ShouldReidentify,
        _ => DisconnectReason::ShouldResume,
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

async fn read_loop(
    ws_read: &mut WsStream,
    ws_write: &Arc<Mutex<WsSink>>,
    event_tx: &async_channel::Sender<GatewayEvent>,
    session: &Arc<Mutex<ResumeState>>,
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
                let code = frame.as_ref().map(|f| u16::from(f.code));
                warn!(close_code = ?code, "WebSocket closed by server");
                return code.map_or(DisconnectReason::ShouldResume, classify_close);
            }
            // Ping/Pong/Binary: ignore.
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
                debug!(session_id = %ready.session_id, "gateway READY");
            }

            GatewayEvent::HeartbeatRequest => {
                let seq = session.lock().await.sequence;
                if let Err(e) = send_json(ws_write, &heartbeat_payload(seq)).await {
                    warn!(error = %e, "failed to send requested heartbeat");
                }
                // Internal plumbing, not forwarded.
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

/// Pick the URL to connect to, appending the version query if the resume URL
/// Discord handed us lacks it.
fn gateway_url(resume_url: Option<&str>) -> String {
    match resume_url {
        None => DEFAULT_GATEWAY_URL.to_string(),
        Some(url) if url.contains("v=10") => url.to_string(),
        Some(url) if url.contains('?') => format!("{}&v=10&encoding=json", url),
        Some(url) => format!("{}/?v=10&encoding=json", url.trim_end_matches('/')),
    }
}

fn identify_payload(config: &GatewayConfig) -> serde_json::Value {
    json!({
        "op": 2,
        "d": {
            "token": config.token,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "anime-discord",
                "device": "anime-discord"
            },
            "intents": config.intents.bits(),
        }
    })
}

fn resume_payload(token: &str, session_id: &str, seq: u64) -> serde_json::Value {
    json!({
        "op": 6,
        "d": {
            "token": token,
            "session_id": session_id,
            "seq": seq,
        }
    })
}

fn heartbeat_payload(seq: Option<u64>) -> serde_json::Value {
    json!({ "op": 1, "d": seq })
}

/// Read the HELLO payload and return its heartbeat interval in milliseconds.
async fn read_hello(stream: &mut WsStream) -> Result<u64, String> {
    let msg = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .map_err(|_| "timed out waiting for HELLO".to_string())?
        .ok_or_else(|| "stream ended before HELLO".to_string())?
        .map_err(|e| format!("WS error reading HELLO: {}", e))?;

    let text = match msg {
        WsMessage::Text(t) => t,
        other => return Err(format!("expected text message for HELLO, got {:?}", other)),
    };

    let payload: GatewayPayload =
        serde_json::from_str(&text).map_err(|e| format!("failed to parse HELLO: {}", e))?;

    if payload.op != 10 {
        return Err(format!("expected op 10 (HELLO), got op {}", payload.op));
    }

    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| "HELLO missing heartbeat_interval".to_string())
}

async fn send_json(
    ws_write: &Arc<Mutex<WsSink>>,
    payload: &serde_json::Value,
) -> Result<(), String> {
    let text = serde_json::to_string(payload).map_err(|e| e.to_string())?;
    let mut w = ws_write.lock().await;
    w.send(WsMessage::Text(text))
        .await
        .map_err(|e| format!("WS send error: {}", e))
}

/// Exponential backoff with jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jittered = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jittered.min(60_000.0) as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
