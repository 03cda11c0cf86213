//! Content provider interface
//!
//! Playback depends only on this trait, never on a concrete catalog. Every
//! method is infallible at this boundary: network and parse failures are
//! logged by the implementation and surface as empty results or `None`.

use async_trait::async_trait;

use crate::models::{Episode, Language, StreamDescriptor, Title};

#[async_trait]
pub trait Provider: Send + Sync {
    /// Titles matching a free-text query, in provider relevance order
    async fn search(&self, query: &str) -> Vec<Title>;

    /// Look a title up by id; providers without direct lookup return None
    async fn title(&self, _id: &str) -> Option<Title> {
        None
    }

    /// Episode numbers available for a title, ascending
    async fn episodes(&self, title: &Title, language: Language) -> Vec<Episode>;

    /// Playable streams for one episode. `quality` is a hint: providers may
    /// return every variant and leave the pick to the stream selector.
    async fn streams(
        &self,
        title: &Title,
        episode: Episode,
        language: Language,
        quality: u32,
    ) -> Vec<StreamDescriptor>;
}
