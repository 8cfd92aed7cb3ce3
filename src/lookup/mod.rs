//! Anime lookups against third-party APIs.
//!
//! Each source ([`anilist`], [`jikan`]) builds its request, sends it through a
//! shared [`Transport`], and validates the JSON against an explicit schema.
//! Anything unexpected becomes a [`LookupError`]. A search that matches
//! nothing is a normal [`Lookup::NotFound`], not an error.

pub mod anilist;
pub mod jikan;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Number of description characters kept before the ellipsis.
pub const DESCRIPTION_LIMIT: usize = 300;

// ---------------------------------------------------------------------------
// Errors + outcomes
// ---------------------------------------------------------------------------

/// Any failure while talking to an external API.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("HTTP client is not available (session not ready or already closed)")]
    ClientUnavailable,
}

/// Result of a lookup that reached the API successfully.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Display-ready details for one anime.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaQueryResult {
    /// English title, else Romaji. `None` when AniList has neither.
    pub title: Option<String>,
    pub episodes: Option<u32>,
    /// Already truncated, see [`truncate_description`].
    pub description: String,
    pub site_url: Option<String>,
    pub score: Option<u32>,
    pub genres: Vec<String>,
}

impl MediaQueryResult {
    pub fn episodes_display(&self) -> String {
        self.episodes.map_or_else(|| "Unknown".to_string(), |n| n.to_string())
    }

    pub fn score_display(&self) -> String {
        self.score.map_or_else(|| "N/A".to_string(), |n| n.to_string())
    }

    pub fn genres_display(&self) -> String {
        if self.genres.is_empty() {
            "N/A".to_string()
        } else {
            self.genres.join(", ")
        }
    }
}

/// The first episodes of a searched anime.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeList {
    pub anime_title: String,
    pub episodes: Vec<Episode>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Episode {
    pub mal_id: u64,
    pub title: String,
}

/// Keep the first [`DESCRIPTION_LIMIT`] characters and always append `...`,
/// even when nothing was cut.
pub fn truncate_description(text: &str) -> String {
    let mut out: String = text.chars().take(DESCRIPTION_LIMIT).collect();
    out.push_str("...");
    out
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A decoded JSON response and the status it came with.
#[derive(Debug, Clone)]
pub struct JsonResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl JsonResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx status into a [`LookupError::Status`].
    pub fn ensure_success(self, url: &str) -> Result<Self, LookupError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(LookupError::Status {
                url: url.to_string(),
                status: self.status,
            })
        }
    }
}

/// The shared HTTP client every lookup goes through.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<JsonResponse, LookupError>;

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<JsonResponse, LookupError>;
}

/// [`Transport`] backed by one pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the client. `timeout` is optional: without it a hung API call
    /// hangs its command.
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder().user_agent(concat!(
            "anime-discord/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    async fn read(url: &str, resp: reqwest::Response) -> Result<JsonResponse, LookupError> {
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(|source| LookupError::Transport {
            url: url.to_string(),
            source,
        })?;
        match serde_json::from_slice(&bytes) {
            Ok(body) => Ok(JsonResponse { status, body }),
            Err(_) if !(200..300).contains(&status) => Err(LookupError::Status {
                url: url.to_string(),
                status,
            }),
            Err(e) => Err(LookupError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get_json(&self, url: &str) -> Result<JsonResponse, LookupError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| LookupError::Transport {
                url: url.to_string(),
                source,
            })?;
        Self::read(url, resp).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<JsonResponse, LookupError> {
        let resp = self
            .client
            .post(url)
            .header("accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|source| LookupError::Transport {
                url: url.to_string(),
                source,
            })?;
        Self::read(url, resp).await
    }
}

/// Deserialize a response body into a source-specific schema.
pub(crate) fn decode<T: DeserializeOwned>(
    url: &str,
    body: serde_json::Value,
) -> Result<T, LookupError> {
    serde_json::from_value(body).map_err(|e| LookupError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
