//! Stream selection by target quality
//!
//! Picks the exact resolution when offered, otherwise the closest one below
//! the target, otherwise the best available.

use thiserror::Error;

use crate::models::StreamDescriptor;

/// Errors from stream selection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("No streams available")]
    NoStreamsAvailable,
}

/// Choose the stream that best fits `target_quality`
pub fn choose(
    streams: &[StreamDescriptor],
    target_quality: u32,
) -> Result<&StreamDescriptor, SelectError> {
    let mut sorted: Vec<&StreamDescriptor> = streams.iter().collect();
    // Stable: equal resolutions keep provider order
    sorted.sort_by(|a, b| b.resolution.cmp(&a.resolution));

    if let Some(exact) = sorted.iter().find(|s| s.resolution == target_quality) {
        return Ok(*exact);
    }

    if let Some(below) = sorted.iter().find(|s| s.resolution < target_quality) {
        return Ok(*below);
    }

    sorted.first().copied().ok_or(SelectError::NoStreamsAvailable)
}
