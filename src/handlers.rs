//! Command handlers and the command sets each profile registers.
//!
//! Lookup commands follow the same path: acknowledge right away, query
//! through the session's shared HTTP client, then send exactly one final
//! reply (the result, a not-found notice, or a generic error). Lookup
//! failures are logged here and never leave the handler.

use async_trait::async_trait;
use tracing::{error, info};

use crate::config::Profile;
use crate::format::{anime_embed, episodes_embed, Reply};
use crate::http::HttpError;
use crate::lookup::anilist::AniList;
use crate::lookup::jikan::Jikan;
use crate::lookup::{EpisodeList, Lookup, LookupError, MediaQueryResult};
use crate::router::{Arity, CommandContext, CommandHandler, CommandRouter, RouterError};

pub const LOOKUP_FAILED: &str = "Something went wrong fetching data.";
pub const ANIME_NOT_FOUND: &str = "Anime not found.";

// ---------------------------------------------------------------------------
// Command sets
// ---------------------------------------------------------------------------

/// Build the router for a profile.
pub fn build_router(prefix: &str, profile: Profile) -> Result<CommandRouter, RouterError> {
    let mut router = CommandRouter::new(prefix);
    router.register("ping", Arity::None, StaticReply("pong"))?;

    if matches!(profile, Profile::Ping | Profile::All) {
        router.register("hello", Arity::None, StaticReply("World!"))?;
    }
    if matches!(profile, Profile::AniList | Profile::All) {
        router.register("anime", Arity::Text, AnimeSearch::new(AniList::default()))?;
    }
    if matches!(profile, Profile::Jikan | Profile::All) {
        router.register(
            "naruto",
            Arity::None,
            EpisodeSearch::new(Jikan::default(), "naruto", "Naruto"),
        )?;
    }

    info!(?profile, commands = ?router.command_names(), "registered commands");
    Ok(router)
}

// ---------------------------------------------------------------------------
// !ping / !hello
// ---------------------------------------------------------------------------

/// Always answers with the same text.
pub struct StaticReply(pub &'static str);

#[async_trait]
impl CommandHandler for StaticReply {
    async fn call(&self, ctx: &CommandContext, _args: &str) -> Result<(), HttpError> {
        ctx.say(self.0).await
    }
}

// ---------------------------------------------------------------------------
// !anime <name>
// ---------------------------------------------------------------------------

/// Looks an anime up on AniList by name.
pub struct AnimeSearch {
    anilist: AniList,
}

impl AnimeSearch {
    pub fn new(anilist: AniList) -> Self {
        Self { anilist }
    }

    async fn search(
        &self,
        ctx: &CommandContext,
        name: &str,
    ) -> Result<Lookup<MediaQueryResult>, LookupError> {
        let transport = ctx.session.transport().await?;
        self.anilist.lookup(&transport, name).await
    }
}

#[async_trait]
impl CommandHandler for AnimeSearch {
    async fn call(&self, ctx: &CommandContext, name: &str) -> Result<(), HttpError> {
        ctx.say(format!("Searching for '{}' on AniList...", name))
            .await?;

        let reply = match self.search(ctx, name).await {
            Ok(Lookup::Found(media)) => Reply::Rich(anime_embed(&media)),
            Ok(Lookup::NotFound) => Reply::text(ANIME_NOT_FOUND),
            Err(e) => {
                error!(error = %e, command = "anime", search = name, "lookup failed");
                Reply::text(LOOKUP_FAILED)
            }
        };
        ctx.reply(reply).await
    }
}

// ---------------------------------------------------------------------------
// !naruto
// ---------------------------------------------------------------------------

/// Lists the first episodes of a fixed title from Jikan.
pub struct EpisodeSearch {
    jikan: Jikan,
    term: String,
    label: String,
}

impl EpisodeSearch {
    pub fn new(jikan: Jikan, term: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            jikan,
            term: term.into(),
            label: label.into(),
        }
    }

    async fn search(&self, ctx: &CommandContext) -> Result<Lookup<EpisodeList>, LookupError> {
        let transport = ctx.session.transport().await?;
        self.jikan.lookup(&transport, &self.term).await
    }
}

#[async_trait]
impl CommandHandler for EpisodeSearch {
    async fn call(&self, ctx: &CommandContext, _args: &str) -> Result<(), HttpError> {
        ctx.say(format!("Searching for '{}' on Jikan...", self.term))
            .await?;

        let reply = match self.search(ctx).await {
            Ok(Lookup::Found(list)) => Reply::Rich(episodes_embed(&list)),
            Ok(Lookup::NotFound) => Reply::text(format!("{} not found.", self.label)),
            Err(e) => {
                error!(error = %e, command = "episodes", term = %self.term, "lookup failed");
                Reply::text(LOOKUP_FAILED)
            }
        };
        ctx.reply(reply).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, OnceLock, Weak};

    use serde_json::json;

    use super::*;
    use crate::http::Outbox;
    use crate::lookup::anilist::ANILIST_URL;
    use crate::lookup::testing::FakeTransport;
    use crate::lookup::{JsonResponse, Transport};
    use crate::router::tests::{message, RecordingOutbox};
    use crate::session::tests::ready_event;
    use crate::session::Session;
    use crate::types::{CreateMessage, Embed};

    const JIKAN_SEARCH: &str = "https://api.jikan.moe/v4/anime?q=naruto&limit=1";
    const JIKAN_EPISODES: &str = "https://api.jikan.moe/v4/anime/20/episodes";

    /// Wraps the canned transport to see what the bot had already sent
    /// when each request went out, and optionally close the session right
    /// after a request.
    struct Observed {
        fake: Arc<FakeTransport>,
        outbox: Arc<RecordingOutbox>,
        sent_at_request: std::sync::Mutex<Vec<usize>>,
        close_after_request: AtomicBool,
        session: OnceLock<Weak<Session>>,
    }

    impl Observed {
        async fn before(&self) {
            let sent = self.outbox.sent.lock().await.len();
            self.sent_at_request.lock().unwrap().push(sent);
        }

        async fn after(&self) {
            if !self.close_after_request.load(Ordering::SeqCst) {
                return;
            }
            if let Some(session) = self.session.get().and_then(Weak::upgrade) {
                session.on_close().await;
            }
        }
    }

    #[async_trait]
    impl Transport for Observed {
        async fn get_json(&self, url: &str) -> Result<JsonResponse, LookupError> {
            self.before().await;
            let resp = self.fake.get_json(url).await;
            self.after().await;
            resp
        }

        async fn post_json(
            &self,
            url: &str,
            body: &serde_json::Value,
        ) -> Result<JsonResponse, LookupError> {
            self.before().await;
            let resp = self.fake.post_json(url, body).await;
            self.after().await;
            resp
        }
    }

    /// A ready session wired to `fake`, plus a recorder for replies.
    struct Bot {
        router: CommandRouter,
        session: Arc<Session>,
        fake: Arc<FakeTransport>,
        observed: Arc<Observed>,
        outbox: Arc<RecordingOutbox>,
    }

    impl Bot {
        async fn new(profile: Profile, fake: FakeTransport) -> Self {
            let fake = Arc::new(fake);
            let outbox = Arc::new(RecordingOutbox::default());
            let observed = Arc::new(Observed {
                fake: Arc::clone(&fake),
                outbox: Arc::clone(&outbox),
                sent_at_request: std::sync::Mutex::default(),
                close_after_request: AtomicBool::new(false),
                session: OnceLock::new(),
            });
            let for_session = Arc::clone(&observed);
            let session = Arc::new(Session::new(Box::new(move || {
                let transport: Arc<dyn Transport> = for_session.clone();
                Ok(transport)
            })));
            let _ = observed.session.set(Arc::downgrade(&session));
            session.on_ready(&ready_event()).await;
            Self {
                router: build_router("!", profile).unwrap(),
                session,
                fake,
                observed,
                outbox,
            }
        }

        async fn send(&self, content: &str) -> Vec<CreateMessage> {
            let outbox: Arc<dyn Outbox> = self.outbox.clone();
            let msg = message(content);
            if let Some(handle) = self.router.dispatch(&msg, &self.session, &outbox) {
                handle.await.unwrap();
            }
            self.outbox.messages().await
        }

        fn sent_at_request(&self) -> Vec<usize> {
            self.observed.sent_at_request.lock().unwrap().clone()
        }
    }

    /// Collects formatted log lines written while it is the default
    /// subscriber.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    fn text(s: &str) -> CreateMessage {
        CreateMessage::new().content(s)
    }

    fn only_embed(msg: &CreateMessage) -> &Embed {
        let embeds = msg.embeds.as_ref().expect("embed reply");
        assert_eq!(embeds.len(), 1);
        &embeds[0]
    }

    fn naruto_hit() -> serde_json::Value {
        json!({ "data": [{ "mal_id": 20, "title": "Naruto" }] })
    }

    fn episodes(n: u64) -> serde_json::Value {
        let data: Vec<_> = (1..=n)
            .map(|i| json!({ "mal_id": i, "title": format!("Title {}", i) }))
            .collect();
        json!({ "data": data })
    }

    // -- build_router() ----------------------------------------------------

    #[test]
    fn profiles_register_expected_commands() {
        let names = |p| {
            build_router("!", p)
                .unwrap()
                .command_names()
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        assert_eq!(names(Profile::Ping), ["hello", "ping"]);
        assert_eq!(names(Profile::AniList), ["anime", "ping"]);
        assert_eq!(names(Profile::Jikan), ["naruto", "ping"]);
        assert_eq!(names(Profile::All), ["anime", "hello", "naruto", "ping"]);
    }

    // -- static replies ----------------------------------------------------

    #[tokio::test]
    async fn ping_replies_pong_without_network() {
        let bot = Bot::new(Profile::All, FakeTransport::new()).await;
        assert_eq!(bot.send("!ping").await, vec![text("pong")]);
        assert_eq!(bot.fake.request_count(), 0);
    }

    #[tokio::test]
    async fn hello_replies_world() {
        let bot = Bot::new(Profile::Ping, FakeTransport::new()).await;
        assert_eq!(bot.send("!hello").await, vec![text("World!")]);
    }

    #[tokio::test]
    async fn unregistered_profile_command_is_silent() {
        let bot = Bot::new(Profile::Ping, FakeTransport::new()).await;
        assert!(bot.send("!anime naruto").await.is_empty());
        assert_eq!(bot.fake.request_count(), 0);
    }

    // -- !anime ------------------------------------------------------------

    fn bebop() -> serde_json::Value {
        json!({ "data": { "Media": {
            "title": { "romaji": "Cowboy Bebop", "english": "Cowboy Bebop" },
            "episodes": 26,
            "description": "In the year 2071...",
            "siteUrl": "https://anilist.co/anime/1",
            "averageScore": 86,
            "genres": ["Action", "Drama", "Sci-Fi"],
        }}})
    }

    #[tokio::test]
    async fn anime_acknowledges_then_sends_card() {
        let fake = FakeTransport::new().respond(ANILIST_URL, 200, bebop());
        let bot = Bot::new(Profile::AniList, fake).await;
        let sent = bot.send("!anime cowboy bebop").await;

        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], text("Searching for 'cowboy bebop' on AniList..."));
        let embed = only_embed(&sent[1]);
        assert_eq!(embed.title.as_deref(), Some("Cowboy Bebop"));
        assert_eq!(embed.description.as_deref(), Some("In the year 2071......"));
        assert_eq!(embed.fields[2].value, "Action, Drama, Sci-Fi");
        assert_eq!(bot.fake.request_count(), 1);
    }

    #[tokio::test]
    async fn anime_acknowledgment_goes_out_before_the_query() {
        let fake = FakeTransport::new().respond(ANILIST_URL, 200, bebop());
        let bot = Bot::new(Profile::AniList, fake).await;
        bot.send("!anime cowboy bebop").await;
        assert_eq!(bot.sent_at_request(), vec![1]);
    }

    #[tokio::test]
    async fn anime_untitled_media_still_sends_card() {
        let fake = FakeTransport::new().respond(
            ANILIST_URL,
            200,
            json!({ "data": { "Media": {
                "title": { "romaji": null, "english": null },
                "episodes": 12,
                "genres": ["Drama"],
            }}}),
        );
        let bot = Bot::new(Profile::AniList, fake).await;
        let sent = bot.send("!anime mystery").await;

        assert_eq!(sent.len(), 2);
        let embed = only_embed(&sent[1]);
        assert!(embed.title.is_none());
        assert_eq!(embed.fields[0].value, "12");
    }

    #[tokio::test]
    async fn anime_not_found_reply() {
        let fake = FakeTransport::new()
            .respond(ANILIST_URL, 404, json!({ "data": { "Media": null } }));
        let bot = Bot::new(Profile::AniList, fake).await;
        let sent = bot.send("!anime qwertyuiop").await;
        assert_eq!(
            sent,
            vec![
                text("Searching for 'qwertyuiop' on AniList..."),
                text(ANIME_NOT_FOUND)
            ]
        );
    }

    #[tokio::test]
    async fn anime_failure_sends_generic_error() {
        let fake = FakeTransport::new().respond(ANILIST_URL, 500, json!({ "error": "boom" }));
        let bot = Bot::new(Profile::AniList, fake).await;
        let sent = bot.send("!anime naruto").await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], text(LOOKUP_FAILED));
    }

    #[tokio::test]
    async fn anime_failure_is_logged_with_its_cause() {
        let (logs, _guard) = capture_logs();
        let fake = FakeTransport::new().respond(ANILIST_URL, 500, json!({ "error": "boom" }));
        let bot = Bot::new(Profile::AniList, fake).await;
        bot.send("!anime naruto").await;

        let logs = logs.contents();
        assert!(logs.contains("ERROR"), "{}", logs);
        assert!(logs.contains("lookup failed"), "{}", logs);
        assert!(
            logs.contains("https://graphql.anilist.co answered with status 500"),
            "{}",
            logs
        );
    }

    #[tokio::test]
    async fn anime_after_close_sends_generic_error() {
        let bot = Bot::new(Profile::AniList, FakeTransport::new()).await;
        bot.session.on_close().await;
        let sent = bot.send("!anime naruto").await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], text(LOOKUP_FAILED));
        assert_eq!(bot.fake.request_count(), 0);
    }

    // -- !naruto -----------------------------------------------------------

    #[tokio::test]
    async fn naruto_lists_first_ten_episodes() {
        let fake = FakeTransport::new()
            .respond(JIKAN_SEARCH, 200, naruto_hit())
            .respond(JIKAN_EPISODES, 200, episodes(15));
        let bot = Bot::new(Profile::Jikan, fake).await;
        let sent = bot.send("!naruto").await;

        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], text("Searching for 'naruto' on Jikan..."));
        let embed = only_embed(&sent[1]);
        assert_eq!(embed.fields.len(), 10);
        for (i, field) in embed.fields.iter().enumerate() {
            assert_eq!(field.name, format!("Episode {}", i + 1));
            assert_eq!(field.value, format!("Title {}", i + 1));
        }
        assert_eq!(bot.fake.request_count(), 2);
    }

    #[tokio::test]
    async fn naruto_acknowledgment_goes_out_before_both_queries() {
        let fake = FakeTransport::new()
            .respond(JIKAN_SEARCH, 200, naruto_hit())
            .respond(JIKAN_EPISODES, 200, episodes(3));
        let bot = Bot::new(Profile::Jikan, fake).await;
        bot.send("!naruto").await;
        assert_eq!(bot.sent_at_request(), vec![1, 1]);
    }

    #[tokio::test]
    async fn naruto_stops_calling_out_once_session_closes() {
        let fake = FakeTransport::new()
            .respond(JIKAN_SEARCH, 200, naruto_hit())
            .respond(JIKAN_EPISODES, 200, episodes(15));
        let bot = Bot::new(Profile::Jikan, fake).await;
        bot.observed.close_after_request.store(true, Ordering::SeqCst);

        let sent = bot.send("!naruto").await;

        let requests = bot.fake.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, JIKAN_SEARCH);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], text(LOOKUP_FAILED));
    }

    #[tokio::test]
    async fn naruto_not_found_reply() {
        let fake = FakeTransport::new().respond(JIKAN_SEARCH, 200, json!({ "data": [] }));
        let bot = Bot::new(Profile::Jikan, fake).await;
        let sent = bot.send("!naruto").await;
        assert_eq!(sent[1], text("Naruto not found."));
        assert_eq!(bot.fake.request_count(), 1);
    }

    #[tokio::test]
    async fn naruto_failure_sends_generic_error() {
        let fake = FakeTransport::new()
            .respond(JIKAN_SEARCH, 200, json!({ "data": [{ "mal_id": 20 }] }))
            .respond(JIKAN_EPISODES, 200, json!({ "unexpected": true }));
        let bot = Bot::new(Profile::Jikan, fake).await;
        let sent = bot.send("!naruto").await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], text(LOOKUP_FAILED));
    }
}
