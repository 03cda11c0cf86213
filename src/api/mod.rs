//! Content providers
//!
//! - Provider: the catalog interface playback depends on
//! - AllAnime: GraphQL client for the AllAnime catalog

pub mod allanime;
pub mod provider;

pub use allanime::AllAnimeClient;
pub use provider::Provider;
