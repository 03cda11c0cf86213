//! Progress tracking for a running player session
//!
//! Polls the session on a fixed interval and hands each reading to a
//! callback (normally a progress-store write). The loop ends by itself
//! when the session exits; the terminal save is not the tracker's job.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::player::PlayerError;
use super::session::{PlaybackSnapshot, PlayerSession};

/// Added to the position when the real duration is unknown
pub const ESTIMATED_TAIL_SECONDS: u64 = 300;

/// One progress reading, in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTick {
    pub position_seconds: u64,
    pub duration_seconds: u64,
    /// Duration is a placeholder rather than reported by the player
    pub estimated: bool,
}

impl ProgressTick {
    /// Known position, placeholder duration
    pub fn estimated(position_seconds: u64) -> Self {
        Self {
            position_seconds,
            duration_seconds: position_seconds + ESTIMATED_TAIL_SECONDS,
            estimated: true,
        }
    }

    /// Reading from a player snapshot; None when there is no position at all
    pub fn from_snapshot(snapshot: PlaybackSnapshot) -> Option<Self> {
        let position = snapshot.position.filter(|p| p.is_finite())?.max(0.0) as u64;
        match snapshot.duration.filter(|d| d.is_finite() && *d > 0.0) {
            Some(duration) => Some(Self {
                position_seconds: position,
                duration_seconds: duration as u64,
                estimated: false,
            }),
            None => Some(Self::estimated(position)),
        }
    }

    /// Best reading for a session that has stopped: the last reported
    /// values, or the wall-clock estimate when the player never reported any
    pub fn final_for(session: &PlayerSession) -> Self {
        Self::from_snapshot(session.last_known())
            .unwrap_or_else(|| Self::estimated(session.elapsed_estimate()))
    }
}

/// Background polling loop bound to one session
#[derive(Debug)]
pub struct ProgressTracker {
    handle: JoinHandle<()>,
}

impl ProgressTracker {
    /// Start polling `session` every `interval`, calling `on_tick` with each reading
    pub fn start<F>(session: Arc<PlayerSession>, interval: Duration, mut on_tick: F) -> Self
    where
        F: FnMut(ProgressTick) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = session.exited() => break,
                }
                if !session.is_running() {
                    break;
                }

                let tick = match session.query_state().await {
                    Ok(snapshot) => ProgressTick::from_snapshot(snapshot),
                    Err(PlayerError::ChannelUnavailable) if !session.has_channel() => {
                        Some(ProgressTick::estimated(session.elapsed_estimate()))
                    }
                    Err(e) => {
                        debug!(session = %session.id(), error = %e, "progress query failed");
                        None
                    }
                };

                // The exit path owns the final write
                if !session.is_running() {
                    break;
                }
                match tick {
                    Some(tick) => on_tick(tick),
                    None => debug!(session = %session.id(), "no progress reading this tick"),
                }
            }
            debug!(session = %session.id(), "progress tracker stopped");
        });

        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop polling; once this returns no further tick will be delivered
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}
