//! A prefix-command Discord bot that looks anime up on AniList and Jikan.
//!
//! The gateway (WebSocket) and REST details live in [`gateway`] and
//! [`http`]; the anime APIs in [`lookup`]. [`bot::start`] wires them to the
//! command [`router`] and runs the event loop.

pub mod bot;
pub mod config;
pub mod events;
pub mod format;
pub mod gateway;
pub mod handlers;
pub mod http;
pub mod logging;
pub mod lookup;
pub mod router;
pub mod session;
pub mod types;

pub use bot::BotError;
pub use config::{BotConfig, Profile, StartupError};

/// Run the bot with the given settings until it shuts down.
pub async fn run(config: BotConfig) -> Result<(), BotError> {
    bot::start(config).await
}
