//! AniList GraphQL lookup.

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{decode, truncate_description, Lookup, LookupError, MediaQueryResult, Transport};

pub const ANILIST_URL: &str = "https://graphql.anilist.co";

const MEDIA_QUERY: &str = r#"
query ($search: String) {
  Media(search: $search, type: ANIME) {
    title {
      romaji
      english
    }
    episodes
    description
    siteUrl
    averageScore
    genres
  }
}
"#;

const NO_DESCRIPTION: &str = "No description available.";

// ---------------------------------------------------------------------------
// Response schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<MediaData>,
}

#[derive(Debug, Deserialize)]
struct MediaData {
    #[serde(rename = "Media")]
    media: Option<MediaNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaNode {
    title: MediaTitle,
    episodes: Option<u32>,
    description: Option<String>,
    site_url: Option<String>,
    average_score: Option<u32>,
    genres: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct MediaTitle {
    romaji: Option<String>,
    english: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Searches AniList for a single anime by name.
#[derive(Debug, Clone)]
pub struct AniList {
    endpoint: String,
}

impl Default for AniList {
    fn default() -> Self {
        Self::new(ANILIST_URL)
    }
}

impl AniList {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Look up the anime best matching `search`.
    ///
    /// AniList answers an unknown title with HTTP 404 and a null `Media`, so
    /// that combination counts as [`Lookup::NotFound`] rather than an error.
    pub async fn lookup(
        &self,
        transport: &dyn Transport,
        search: &str,
    ) -> Result<Lookup<MediaQueryResult>, LookupError> {
        let body = json!({
            "query": MEDIA_QUERY,
            "variables": { "search": search },
        });

        debug!(search, "querying AniList");
        let resp = transport.post_json(&self.endpoint, &body).await?;
        let status = resp.status;
        let resp = if status == 404 {
            resp
        } else {
            resp.ensure_success(&self.endpoint)?
        };

        let parsed: GraphqlResponse = decode(&self.endpoint, resp.body)?;
        match parsed.data.and_then(|d| d.media) {
            Some(media) => Ok(Lookup::Found(Self::to_result(media))),
            None => Ok(Lookup::NotFound),
        }
    }

    fn to_result(media: MediaNode) -> MediaQueryResult {
        let title = non_empty(media.title.english).or_else(|| non_empty(media.title.romaji));
        let description =
            non_empty(media.description).unwrap_or_else(|| NO_DESCRIPTION.to_string());

        MediaQueryResult {
            title,
            // Zero means "not announced yet" on AniList.
            episodes: media.episodes.filter(|&n| n > 0),
            description: truncate_description(&description),
            site_url: media.site_url,
            score: media.average_score.filter(|&n| n > 0),
            genres: media.genres.unwrap_or_default(),
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
