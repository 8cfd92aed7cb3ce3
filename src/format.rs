//! Reply formatting: lookup results → Discord messages.

use crate::lookup::{EpisodeList, MediaQueryResult};
use crate::types::{CreateMessage, Embed};

/// Accent color for anime cards (Discord's "orange").
pub const ANIME_COLOR: u32 = 0xE67E22;
/// Color for plain list embeds.
pub const DEFAULT_COLOR: u32 = 0x5865F2;

/// A reply as a command produces it, before it becomes a REST body.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Rich(Embed),
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    pub fn into_message(self) -> CreateMessage {
        match self {
            Reply::Text(text) => CreateMessage::new().content(text),
            Reply::Rich(embed) => CreateMessage::new().embed(embed),
        }
    }
}

/// Anime card: linked title, description, episodes and score side by side,
/// genres underneath.
pub fn anime_embed(media: &MediaQueryResult) -> Embed {
    let mut embed = Embed::new()
        .description(&media.description)
        .color(ANIME_COLOR);
    if let Some(title) = &media.title {
        embed = embed.title(title);
    }
    if let Some(url) = &media.site_url {
        embed = embed.url(url);
    }
    embed
        .field("Episodes", media.episodes_display(), true)
        .field("Average Score", media.score_display(), true)
        .field("Genres", media.genres_display(), false)
}

/// One block field per episode, in the order given.
pub fn episodes_embed(list: &EpisodeList) -> Embed {
    list.episodes.iter().fold(
        Embed::new()
            .title(format!("{} Episodes", list.anime_title))
            .color(DEFAULT_COLOR),
        |embed, ep| embed.field(format!("Episode {}", ep.mal_id), &ep.title, false),
    )
}
