//! Jikan (MyAnimeList) REST lookup: search, then fetch the episode list.

use serde::Deserialize;
use tracing::debug;

use super::{decode, Episode, EpisodeList, Lookup, LookupError, Transport};

pub const JIKAN_BASE_URL: &str = "https://api.jikan.moe/v4";

/// Episodes kept from the list endpoint.
pub const MAX_EPISODES: usize = 10;

// ---------------------------------------------------------------------------
// Response schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchPage {
    data: Vec<AnimeSummary>,
}

#[derive(Debug, Deserialize)]
struct AnimeSummary {
    mal_id: u64,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodePage {
    data: Vec<Episode>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Jikan {
    base_url: String,
}

impl Default for Jikan {
    fn default() -> Self {
        Self::new(JIKAN_BASE_URL)
    }
}

impl Jikan {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn search_url(&self, term: &str) -> Result<String, LookupError> {
        let base = format!("{}/anime", self.base_url);
        reqwest::Url::parse_with_params(&base, &[("q", term), ("limit", "1")])
            .map(String::from)
            .map_err(|e| LookupError::Decode {
                url: base,
                message: e.to_string(),
            })
    }

    fn episodes_url(&self, mal_id: u64) -> String {
        format!("{}/anime/{}/episodes", self.base_url, mal_id)
    }

    /// Find the top search hit for `term` and return its first
    /// [`MAX_EPISODES`] episodes. The two requests run one after the other.
    pub async fn lookup(
        &self,
        transport: &dyn Transport,
        term: &str,
    ) -> Result<Lookup<EpisodeList>, LookupError> {
        let search_url = self.search_url(term)?;
        debug!(url = %search_url, "searching Jikan");
        let resp = transport
            .get_json(&search_url)
            .await?
            .ensure_success(&search_url)?;
        let page: SearchPage = decode(&search_url, resp.body)?;

        let Some(anime) = page.data.into_iter().next() else {
            return Ok(Lookup::NotFound);
        };

        let episodes_url = self.episodes_url(anime.mal_id);
        debug!(url = %episodes_url, mal_id = anime.mal_id, "fetching Jikan episodes");
        let resp = transport
            .get_json(&episodes_url)
            .await?
            .ensure_success(&episodes_url)?;
        let page: EpisodePage = decode(&episodes_url, resp.body)?;

        Ok(Lookup::Found(EpisodeList {
            anime_title: anime.title.unwrap_or_else(|| term.to_string()),
            episodes: page.data.into_iter().take(MAX_EPISODES).collect(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::testing::FakeTransport;
    use serde_json::json;

    const SEARCH: &str = "https://api.jikan.moe/v4/anime?q=naruto&limit=1";
    const EPISODES: &str = "https://api.jikan.moe/v4/anime/20/episodes";

    fn episodes(n: u64) -> serde_json::Value {
        let data: Vec<_> = (1..=n)
            .map(|i| {
                json!({ "mal_id": i, "title": format!("Episode title {}", i), "filler": false })
            })
            .collect();
        json!({ "pagination": { "has_next_page": false }, "data": data })
    }

    fn search_hit() -> serde_json::Value {
        json!({ "data": [{ "mal_id": 20, "title": "Naruto", "episodes": 220 }] })
    }

    #[test]
    fn search_url_encodes_term() {
        let jikan = Jikan::default();
        assert_eq!(jikan.search_url("naruto").unwrap(), SEARCH);
        assert_eq!(
            jikan.search_url("one piece").unwrap(),
            "https://api.jikan.moe/v4/anime?q=one+piece&limit=1"
        );
    }

    #[tokio::test]
    async fn keeps_first_ten_episodes_in_order() {
        let transport = FakeTransport::new()
            .respond(SEARCH, 200, search_hit())
            .respond(EPISODES, 200, episodes(15));

        let result = Jikan::default().lookup(&transport, "naruto").await.unwrap();
        let Lookup::Found(list) = result else {
            panic!("expected Found");
        };
        assert_eq!(list.anime_title, "Naruto");
        assert_eq!(list.episodes.len(), MAX_EPISODES);
        let ids: Vec<u64> = list.episodes.iter().map(|e| e.mal_id).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<u64>>());

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].0, SEARCH);
        assert_eq!(requests[1].0, EPISODES);
    }

    #[tokio::test]
    async fn short_episode_list_is_kept_whole() {
        let transport = FakeTransport::new()
            .respond(SEARCH, 200, search_hit())
            .respond(EPISODES, 200, episodes(3));
        let result = Jikan::default().lookup(&transport, "naruto").await.unwrap();
        assert!(matches!(result, Lookup::Found(list) if list.episodes.len() == 3));
    }

    #[tokio::test]
    async fn empty_search_is_not_found_without_second_call() {
        let transport = FakeTransport::new().respond(SEARCH, 200, json!({ "data": [] }));
        let result = Jikan::default().lookup(&transport, "naruto").await.unwrap();
        assert_eq!(result, Lookup::NotFound);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn search_failure_is_lookup_error() {
        let transport = FakeTransport::new().respond(SEARCH, 503, json!({}));
        let err = Jikan::default().lookup(&transport, "naruto").await.unwrap_err();
        assert!(matches!(err, LookupError::Status { status: 503, .. }));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn episode_failure_is_lookup_error() {
        let transport = FakeTransport::new()
            .respond(SEARCH, 200, search_hit())
            .respond(EPISODES, 429, json!({ "status": 429 }));
        let err = Jikan::default().lookup(&transport, "naruto").await.unwrap_err();
        assert!(matches!(err, LookupError::Status { status: 429, .. }));
    }

    #[tokio::test]
    async fn malformed_search_is_decode_error() {
        let transport = FakeTransport::new()
            .respond(SEARCH, 200, json!({ "data": [{ "id": 20 }] }));
        let err = Jikan::default().lookup(&transport, "naruto").await.unwrap_err();
        assert!(matches!(err, LookupError::Decode { .. }));
    }

    #[tokio::test]
    async fn episode_without_title_is_decode_error() {
        let transport = FakeTransport::new()
            .respond(SEARCH, 200, search_hit())
            .respond(EPISODES, 200, json!({ "data": [{ "mal_id": 1, "title": null }] }));
        let err = Jikan::default().lookup(&transport, "naruto").await.unwrap_err();
        assert!(matches!(err, LookupError::Decode { .. }));
    }
}
