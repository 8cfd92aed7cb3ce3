//! HTTP client for the Discord REST API.
//!
//! Replies leave the bot through the [`Outbox`] trait. [`DiscordHttpClient`]
//! is the production implementation, and tests swap in a recorder so the
//! command path can be exercised without a network.

use async_trait::async_trait;
use tracing::debug;

use crate::types::*;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://discord.com/api/v10";
const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/anime-discord, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Non-success status from Discord.
    #[error("Discord API error {status} on {route}: {body}")]
    Api {
        status: u16,
        body: String,
        route: String,
    },
    /// Transport / network error.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Where replies go. Every reply is addressed to a channel.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Send a message body to a channel.
    async fn create_message(&self, channel_id: &str, msg: &CreateMessage) -> Result<(), HttpError>;
}

// ---------------------------------------------------------------------------
// DiscordHttpClient
// ---------------------------------------------------------------------------

/// A thin HTTP client for the Discord REST API.
///
/// Cheap to clone (`reqwest::Client` is an `Arc` internally).
#[derive(Clone)]
pub struct DiscordHttpClient {
    token: String,
    client: reqwest::Client,
    base_url: String,
}

impl DiscordHttpClient {
    /// Create a new client with the given bot token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Outbox for DiscordHttpClient {
    async fn create_message(
        &self,
        channel_id: &str,
        msg: &CreateMessage,
    ) -> Result<(), HttpError> {
        let route = format!("POST /channels/{}/messages", channel_id);
        let url = self.url(&format!("channels/{}/messages", channel_id));

        let resp = self
            .client
            .post(&url)
            .header("authorization", format!("Bot {}", self.token))
            .header("user-agent", USER_AGENT)
            .json(msg)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!(route = %route, "message sent");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(HttpError::Api {
            status: status.as_u16(),
            body,
            route,
        })
    }
}

impl std::fmt::Debug for DiscordHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHttpClient")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
