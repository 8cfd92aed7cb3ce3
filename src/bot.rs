//! Bot wiring: session, command router, gateway, and the event loop that
//! connects them.
//!
//! The loop only reacts to three things: READY (build the shared HTTP
//! client), MESSAGE_CREATE (route commands), and the final closing event
//! (release the client). Everything else the gateway driver handles itself.

use std::sync::Arc;

use tracing::{error, info, trace, warn};

use crate::config::{BotConfig, StartupError};
use crate::events::GatewayEvent;
use crate::gateway::{self, GatewayConfig, GatewayError};
use crate::handlers;
use crate::http::{DiscordHttpClient, Outbox};
use crate::lookup::{ReqwestTransport, Transport};
use crate::router::CommandRouter;
use crate::session::Session;
use crate::types::Intents;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

// ---------------------------------------------------------------------------
// Bot entry point
// ---------------------------------------------------------------------------

/// Connect to Discord and serve commands until the gateway closes or the
/// process is interrupted.
///
/// Returns an error if the command set cannot be built or the gateway
/// rejects the session (for example a bad token).
pub async fn start(config: BotConfig) -> Result<(), BotError> {
    let router = handlers::build_router(&config.prefix, config.profile)
        .map_err(StartupError::from)?;

    let timeout = config.http_timeout;
    let session = Arc::new(Session::new(Box::new(move || {
        ReqwestTransport::new(timeout).map(|t| Arc::new(t) as Arc<dyn Transport>)
    })));
    let outbox: Arc<dyn Outbox> = Arc::new(DiscordHttpClient::new(&config.token));

    session.on_connecting().await;
    let gw = gateway::connect(GatewayConfig {
        token: config.token.clone(),
        intents: Intents::prefix_commands(),
    });
    info!(prefix = router.prefix(), "gateway connecting, entering event loop");

    let result = tokio::select! {
        result = run_event_loop(&session, &router, &outbox, gw.events.clone()) => result,
        () = shutdown_signal() => {
            info!("interrupt received, shutting down");
            session.on_close().await;
            Ok(())
        }
    };

    gw.driver_handle.abort();
    result.map_err(BotError::from)
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Consume gateway events until the closing event or the end of the
/// stream. Either way the session is closed before returning.
pub async fn run_event_loop(
    session: &Arc<Session>,
    router: &CommandRouter,
    outbox: &Arc<dyn Outbox>,
    events: async_channel::Receiver<GatewayEvent>,
) -> Result<(), GatewayError> {
    while let Ok(event) = events.recv().await {
        match event {
            GatewayEvent::Ready(ready) => {
                session.on_ready(&ready).await;
                info!(guilds = ready.guilds.len(), "connected to guilds");
            }

            GatewayEvent::MessageCreate(msg) => {
                if msg.author.bot {
                    continue;
                }
                router.dispatch(&msg, session, outbox);
            }

            GatewayEvent::Closing(fatal) => {
                session.on_close().await;
                return match fatal {
                    Some(e) => {
                        error!(error = %e, "gateway closed the session");
                        Err(e)
                    }
                    None => {
                        info!("gateway closed, bot shutting down");
                        Ok(())
                    }
                };
            }

            // Heartbeats, reconnects and invalid sessions are handled inside
            // the gateway driver.
            GatewayEvent::HeartbeatAck
            | GatewayEvent::HeartbeatRequest
            | GatewayEvent::Reconnect
            | GatewayEvent::InvalidSession(_) => {}

            GatewayEvent::Unknown {
                event_name: Some(ref name),
                ..
            } => {
                trace!(event = %name, "unhandled gateway event");
            }

            GatewayEvent::Unknown { .. } => {}
        }
    }

    warn!("event stream ended, bot shutting down");
    session.on_close().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Profile;
    use crate::lookup::testing::FakeTransport;
    use crate::router::tests::{message, RecordingOutbox};
    use crate::session::tests::{counted_session, ready_event, Counters};
    use crate::session::ConnectionState;
    use crate::types::{CreateMessage, Message};

    struct Loop {
        counters: Counters,
        session: Arc<Session>,
        router: CommandRouter,
        outbox: Arc<RecordingOutbox>,
        tx: async_channel::Sender<GatewayEvent>,
        rx: async_channel::Receiver<GatewayEvent>,
    }

    impl Loop {
        fn new() -> Self {
            let counters = Counters::default();
            let session = Arc::new(counted_session(&counters, FakeTransport::new));
            let (tx, rx) = async_channel::unbounded();
            Self {
                counters,
                session,
                router: handlers::build_router("!", Profile::All).unwrap(),
                outbox: Arc::new(RecordingOutbox::default()),
                tx,
                rx,
            }
        }

        async fn push(&self, event: GatewayEvent) {
            self.tx.send(event).await.unwrap();
        }

        async fn run(&self) -> Result<(), GatewayError> {
            let outbox: Arc<dyn Outbox> = self.outbox.clone();
            run_event_loop(&self.session, &self.router, &outbox, self.rx.clone()).await
        }

        /// Replies land from spawned tasks, so give them a moment.
        async fn wait_for_messages(&self, n: usize) -> Vec<CreateMessage> {
            for _ in 0..200 {
                let sent = self.outbox.messages().await;
                if sent.len() >= n {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.outbox.messages().await
        }
    }

    fn bot_message(content: &str) -> Message {
        let mut msg = message(content);
        msg.author.bot = true;
        msg
    }

    // -- lifecycle ---------------------------------------------------------

    #[tokio::test]
    async fn ready_then_closing_creates_and_releases_client_once() {
        let l = Loop::new();
        l.push(GatewayEvent::Ready(ready_event())).await;
        l.push(GatewayEvent::Ready(ready_event())).await;
        l.push(GatewayEvent::Closing(None)).await;

        assert_eq!(l.run().await, Ok(()));
        assert_eq!(l.counters.created(), 1);
        assert_eq!(l.counters.dropped(), 1);
        assert_eq!(l.session.connection_state().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn fatal_close_is_returned() {
        let l = Loop::new();
        l.push(GatewayEvent::Closing(Some(GatewayError::AuthenticationFailed)))
            .await;

        assert_eq!(l.run().await, Err(GatewayError::AuthenticationFailed));
        assert_eq!(l.counters.created(), 0);
        assert_eq!(l.session.connection_state().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn stream_end_closes_session() {
        let l = Loop::new();
        l.push(GatewayEvent::Ready(ready_event())).await;
        l.tx.close();

        assert_eq!(l.run().await, Ok(()));
        assert_eq!(l.counters.dropped(), 1);
    }

    #[tokio::test]
    async fn housekeeping_events_are_ignored() {
        let l = Loop::new();
        l.push(GatewayEvent::HeartbeatAck).await;
        l.push(GatewayEvent::Reconnect).await;
        l.push(GatewayEvent::InvalidSession(true)).await;
        l.push(GatewayEvent::Unknown {
            event_name: Some("TYPING_START".to_string()),
            op: 0,
        })
        .await;
        l.push(GatewayEvent::Closing(None)).await;

        assert_eq!(l.run().await, Ok(()));
        assert_eq!(l.counters.created(), 0);
    }

    // -- messages ----------------------------------------------------------

    #[tokio::test]
    async fn commands_are_routed() {
        let l = Loop::new();
        l.push(GatewayEvent::Ready(ready_event())).await;
        l.push(GatewayEvent::MessageCreate(message("!ping"))).await;
        l.push(GatewayEvent::Closing(None)).await;

        assert_eq!(l.run().await, Ok(()));
        assert_eq!(
            l.wait_for_messages(1).await,
            vec![CreateMessage::new().content("pong")]
        );
    }

    #[tokio::test]
    async fn bot_authors_are_ignored() {
        let l = Loop::new();
        l.push(GatewayEvent::MessageCreate(bot_message("!ping"))).await;
        l.push(GatewayEvent::MessageCreate(message("!hello"))).await;
        l.push(GatewayEvent::Closing(None)).await;

        assert_eq!(l.run().await, Ok(()));
        let sent = l.wait_for_messages(1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sent, vec![CreateMessage::new().content("World!")]);
        assert_eq!(l.outbox.messages().await.len(), 1);
    }
}
