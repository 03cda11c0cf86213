//! Playback orchestration
//!
//! - Coordinator: play, resume, stop, and the final progress write
//! - Cache: titles and episode lists seen through the provider

pub mod cache;
pub mod coordinator;

pub use cache::TitleCache;
pub use coordinator::{NowPlaying, PlaybackCoordinator, PlaybackError, PlaybackSettings};
