//! The live gateway session and the HTTP client it owns.
//!
//! A [`Session`] is shared (`Arc<Session>`) between the event loop and every
//! in-flight command. It holds the bot identity, the connection state, and
//! the one [`Transport`] used for all outbound API calls. The transport is
//! created on the first READY and released on close. Handles given out
//! before close refuse every request made after it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_lock::RwLock;
use async_trait::async_trait;
use tracing::{error, info};

use crate::lookup::{JsonResponse, LookupError, Transport};
use crate::types::ReadyEvent;

/// Builds the session's HTTP client when the gateway reports READY.
pub type TransportFactory =
    Box<dyn Fn() -> Result<Arc<dyn Transport>, reqwest::Error> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Closed,
}

/// Who the gateway says we are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
    pub tag: String,
}

struct SessionState {
    connection: ConnectionState,
    identity: Option<BotIdentity>,
    transport: Option<Arc<dyn Transport>>,
    /// Set once the transport has been built, so a later READY (after a
    /// re-identify) or a READY after close does not build another.
    transport_created: bool,
}

pub struct Session {
    state: RwLock<SessionState>,
    factory: TransportFactory,
    released: Arc<AtomicBool>,
}

/// The session's HTTP client as handed to a command.
///
/// Checks the session's released flag before every request, so a lookup
/// that spans a close fails at its next call.
#[derive(Clone)]
pub struct SessionTransport {
    inner: Arc<dyn Transport>,
    released: Arc<AtomicBool>,
}

impl SessionTransport {
    fn ensure_open(&self) -> Result<(), LookupError> {
        if self.released.load(Ordering::SeqCst) {
            Err(LookupError::ClientUnavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for SessionTransport {
    async fn get_json(&self, url: &str) -> Result<JsonResponse, LookupError> {
        self.ensure_open()?;
        self.inner.get_json(url).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<JsonResponse, LookupError> {
        self.ensure_open()?;
        self.inner.post_json(url, body).await
    }
}

impl Session {
    pub fn new(factory: TransportFactory) -> Self {
        Self {
            state: RwLock::new(SessionState {
                connection: ConnectionState::Disconnected,
                identity: None,
                transport: None,
                transport_created: false,
            }),
            factory,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.read().await.connection
    }

    pub async fn identity(&self) -> Option<BotIdentity> {
        self.state.read().await.identity.clone()
    }

    /// Mark the gateway handshake as in progress.
    pub async fn on_connecting(&self) {
        let mut state = self.state.write().await;
        if state.connection == ConnectionState::Disconnected {
            state.connection = ConnectionState::Connecting;
        }
    }

    /// Handle READY: remember who we are and build the HTTP client once.
    pub async fn on_ready(&self, ready: &ReadyEvent) {
        let mut state = self.state.write().await;
        if state.connection == ConnectionState::Closed {
            return;
        }

        let identity = BotIdentity {
            user_id: ready.user.id.clone(),
            tag: ready.user.tag(),
        };
        info!("Logged in as {} (ID: {})", identity.tag, identity.user_id);
        state.identity = Some(identity);
        state.connection = ConnectionState::Ready;

        if !state.transport_created {
            match (self.factory)() {
                Ok(transport) => {
                    state.transport = Some(transport);
                    state.transport_created = true;
                    info!("created shared HTTP client");
                }
                Err(e) => error!(error = %e, "failed to create shared HTTP client"),
            }
        }
    }

    /// Handle closing: release the HTTP client if there is one. Safe to call
    /// any number of times.
    pub async fn on_close(&self) {
        let mut state = self.state.write().await;
        state.connection = ConnectionState::Closed;
        self.released.store(true, Ordering::SeqCst);
        if state.transport.take().is_some() {
            info!("released shared HTTP client");
        }
    }

    /// The shared HTTP client, if the session is ready and not yet closed.
    pub async fn transport(&self) -> Result<SessionTransport, LookupError> {
        let inner = self
            .state
            .read()
            .await
            .transport
            .clone()
            .ok_or(LookupError::ClientUnavailable)?;
        Ok(SessionTransport {
            inner,
            released: Arc::clone(&self.released),
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
