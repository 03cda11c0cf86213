//! mpv JSON IPC protocol
//!
//! The control channel is a newline-delimited JSON stream over a local socket.
//! Outbound commands carry a `request_id`; inbound lines are either replies
//! echoing that id or unsolicited events. Replies and events interleave freely,
//! so replies are matched to requests by id, never by arrival order.

use serde::Serialize;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Playback position property (seconds, float)
pub const PROPERTY_POSITION: &str = "time-pos";
/// Total duration property (seconds, float)
pub const PROPERTY_DURATION: &str = "duration";

/// Event emitted when the current file stops playing
pub const EVENT_END_FILE: &str = "end-file";
/// Events emitted once playback of the file is underway
pub const EVENT_FILE_LOADED: &str = "file-loaded";
pub const EVENT_PLAYBACK_RESTART: &str = "playback-restart";

// =============================================================================
// Outbound
// =============================================================================

/// A command sent to the player
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpcCommand {
    pub command: Vec<Value>,
    pub request_id: u64,
}

impl IpcCommand {
    pub fn new(request_id: u64, name: &str, args: impl IntoIterator<Item = Value>) -> Self {
        let mut command = vec![Value::from(name)];
        command.extend(args);
        Self {
            command,
            request_id,
        }
    }

    /// `get_property <name>`
    pub fn get_property(request_id: u64, property: &str) -> Self {
        Self::new(request_id, "get_property", [Value::from(property)])
    }

    /// `quit`: ask the player to exit
    pub fn quit(request_id: u64) -> Self {
        Self::new(request_id, "quit", [])
    }

    /// Serialize as one wire line, newline included
    pub fn to_line(&self) -> io::Result<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        Ok(line)
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// A parsed line from the player
#[derive(Debug, Clone, PartialEq)]
pub enum IpcMessage {
    /// Unsolicited event, e.g. `{"event":"end-file","reason":"eof"}`
    Event { name: String, reason: Option<String> },
    /// Reply to a request, e.g. `{"data":12.5,"error":"success","request_id":3}`
    Reply {
        request_id: u64,
        error: String,
        data: Option<Value>,
    },
}

impl IpcMessage {
    /// Parse one line; returns None for blank, malformed, or unrecognized lines
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let value: Value = serde_json::from_str(line).ok()?;
        let obj = value.as_object()?;

        if let Some(name) = obj.get("event").and_then(Value::as_str) {
            return Some(IpcMessage::Event {
                name: name.to_string(),
                reason: obj
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        let request_id = obj.get("request_id").and_then(Value::as_u64)?;
        let error = obj.get("error").and_then(Value::as_str)?.to_string();
        let data = obj.get("data").filter(|v| !v.is_null()).cloned();
        Some(IpcMessage::Reply {
            request_id,
            error,
            data,
        })
    }

    /// True for replies reporting success
    pub fn is_success(&self) -> bool {
        matches!(self, IpcMessage::Reply { error, .. } if error == "success")
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// The filesystem socket a single session listens on.
///
/// Removing the socket file is idempotent and also happens on drop, so every
/// teardown path (including panics and failed launches) leaves nothing behind.
#[derive(Debug)]
pub struct IpcEndpoint {
    path: PathBuf,
}

impl IpcEndpoint {
    /// Endpoint at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Fresh, uniquely named endpoint inside `dir`
    pub fn unique(dir: &Path) -> Self {
        Self::new(dir.join(format!("kitsunari-mpv-{}.sock", Uuid::new_v4().simple())))
    }

    /// Default directory for endpoints: the user runtime dir, else the temp dir
    pub fn default_dir() -> PathBuf {
        dirs::runtime_dir().unwrap_or_else(std::env::temp_dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the socket file if present
    pub fn release(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "released ipc endpoint"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove ipc endpoint")
            }
        }
    }
}

impl Drop for IpcEndpoint {
    fn drop(&mut self) {
        self.release();
    }
}
