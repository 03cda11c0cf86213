//! Player session - one mpv process and its control channel
//!
//! A session is created by [`PlayerSession::launch`] and is never reused:
//! once it reaches [`SessionState::Exited`] a new launch makes a new session.
//!
//! Two background tasks run per session:
//! - the **watcher** owns the child process and marks the session exited when
//!   it terminates (or kills it on request);
//! - the **listener** reads the control channel, routes replies to waiting
//!   queries by `request_id`, records the last known position/duration, and
//!   marks the session exited on `end-file`.
//!
//! The exit signal is single-fire: whichever of the two observes the end first
//! wins, later triggers are ignored.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ipc::{
    IpcCommand, IpcEndpoint, IpcMessage, EVENT_END_FILE, EVENT_FILE_LOADED,
    EVENT_PLAYBACK_RESTART, PROPERTY_DURATION, PROPERTY_POSITION,
};
use super::player::{LaunchRequest, PlayerConfig, PlayerError};

/// Bounded wait for the process to be reaped after a force kill
const KILL_WAIT: Duration = Duration::from_secs(2);

type ChannelReader = Box<dyn AsyncRead + Send + Unpin>;
type ChannelWriter = Box<dyn AsyncWrite + Send + Unpin>;

// =============================================================================
// State
// =============================================================================

/// Lifecycle of a player session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Launching,
    Connected,
    Playing,
    Exited,
}

impl SessionState {
    fn as_u8(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Launching => 1,
            SessionState::Connected => 2,
            SessionState::Playing => 3,
            SessionState::Exited => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Launching,
            2 => SessionState::Connected,
            3 => SessionState::Playing,
            _ => SessionState::Exited,
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The player reported the end of the file
    EndOfMedia,
    /// The player process exited, with its exit code when it had one
    ProcessExited(Option<i32>),
    /// Torn down without the process ever being observed to exit
    Terminated,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::EndOfMedia => write!(f, "end of media"),
            ExitReason::ProcessExited(Some(code)) => write!(f, "player exited (code {})", code),
            ExitReason::ProcessExited(None) => write!(f, "player exited"),
            ExitReason::Terminated => write!(f, "terminated"),
        }
    }
}

/// Position and duration as last reported by the player, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackSnapshot {
    pub position: Option<f64>,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Property {
    Position,
    Duration,
}

impl Property {
    fn name(self) -> &'static str {
        match self {
            Property::Position => PROPERTY_POSITION,
            Property::Duration => PROPERTY_DURATION,
        }
    }
}

struct PendingReply {
    property: Property,
    tx: oneshot::Sender<Option<Value>>,
}

/// A registered query awaiting its reply. Dropping it unregisters the
/// waiter, so every early return and timeout leaves `pending` clean.
struct PendingQuery<'a> {
    shared: &'a Shared,
    request_id: u64,
    rx: oneshot::Receiver<Option<Value>>,
}

impl<'a> PendingQuery<'a> {
    fn register(shared: &'a Shared, property: Property) -> Self {
        let request_id = shared.next_request_id();
        let (tx, rx) = oneshot::channel();
        lock(&shared.pending).insert(request_id, PendingReply { property, tx });
        Self {
            shared,
            request_id,
            rx,
        }
    }
}

impl Drop for PendingQuery<'_> {
    fn drop(&mut self) {
        lock(&self.shared.pending).remove(&self.request_id);
    }
}

/// State shared between the session handle and its background tasks
struct Shared {
    id: Uuid,
    state: AtomicU8,
    next_request_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingReply>>,
    /// Written by the listener only
    last_known: Mutex<PlaybackSnapshot>,
    exit: watch::Sender<Option<ExitReason>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn new(id: Uuid) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            id,
            state: AtomicU8::new(SessionState::Idle.as_u8()),
            next_request_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            last_known: Mutex::new(PlaybackSnapshot::default()),
            exit,
        }
    }

    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` unless the session already exited
    fn advance(&self, next: SessionState) {
        let exited = SessionState::Exited.as_u8();
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != exited).then_some(next.as_u8())
            });
    }

    /// Returns true only for the call that actually ended the session
    fn mark_exited(&self, reason: ExitReason) -> bool {
        self.state
            .store(SessionState::Exited.as_u8(), Ordering::Release);
        let fired = self.exit.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        });
        if fired {
            info!(session = %self.id, ?reason, "player session exited");
            // Waiting queries resolve as unavailable
            lock(&self.pending).clear();
        }
        fired
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn resolve_reply(&self, reply: IpcMessage) {
        let success = reply.is_success();
        let IpcMessage::Reply {
            request_id, data, ..
        } = reply
        else {
            return;
        };
        let Some(pending) = lock(&self.pending).remove(&request_id) else {
            debug!(session = %self.id, request_id, "reply without a waiting request");
            return;
        };

        let data = if success { data } else { None };
        if let Some(seconds) = data.as_ref().and_then(Value::as_f64) {
            let mut last = lock(&self.last_known);
            match pending.property {
                Property::Position => last.position = Some(seconds),
                Property::Duration => last.duration = Some(seconds),
            }
        }
        let _ = pending.tx.send(data);
    }
}

async fn wait_for_exit(mut rx: watch::Receiver<Option<ExitReason>>) -> ExitReason {
    loop {
        if let Some(reason) = *rx.borrow_and_update() {
            return reason;
        }
        if rx.changed().await.is_err() {
            return ExitReason::Terminated;
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// One running player process plus its control channel
pub struct PlayerSession {
    shared: Arc<Shared>,
    endpoint: IpcEndpoint,
    writer: AsyncMutex<Option<ChannelWriter>>,
    has_channel: bool,
    pid: Option<u32>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    launched_at: Instant,
    start_seconds: u64,
    query_timeout: Duration,
    grace_period: Duration,
}

impl std::fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSession")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("endpoint", &self.endpoint.path())
            .field("has_channel", &self.has_channel)
            .field("pid", &self.pid)
            .finish()
    }
}

impl PlayerSession {
    /// Launch the player with a fresh, uniquely named control endpoint
    pub async fn launch(config: &PlayerConfig, request: LaunchRequest) -> Result<Self, PlayerError> {
        let endpoint = IpcEndpoint::unique(&config.ipc_dir);
        Self::launch_at(config, endpoint, request).await
    }

    /// Launch the player against a specific control endpoint
    pub async fn launch_at(
        config: &PlayerConfig,
        endpoint: IpcEndpoint,
        request: LaunchRequest,
    ) -> Result<Self, PlayerError> {
        // A stale socket from a crashed run would make the player fail to bind
        endpoint.release();

        let id = Uuid::new_v4();
        let shared = Arc::new(Shared::new(id));
        shared.advance(SessionState::Launching);

        let args = config.build_args(&request, endpoint.path());
        info!(session = %id, player = %config.binary, url = %request.url, start = request.start_seconds, "launching player");
        debug!(session = %id, ?args, "player arguments");

        let mut cmd = Command::new(&config.binary);
        cmd.args(&config.launcher_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlayerError::NotFound(config.binary.clone())
            } else {
                PlayerError::LaunchFailed(e)
            }
        })?;
        let pid = child.id();
        let launched_at = Instant::now();

        let (kill_tx, kill_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_process(child, kill_rx, shared.clone()));

        let channel = connect_with_retry(
            endpoint.path(),
            config.connect_timeout,
            config.connect_interval,
            &shared,
        )
        .await;

        let (writer, listener, has_channel) = match channel {
            Some((reader, writer)) => {
                shared.advance(SessionState::Connected);
                info!(session = %id, "control channel connected");
                let listener = tokio::spawn(listen(reader, shared.clone()));
                (Some(writer), Some(listener), true)
            }
            None => {
                warn!(session = %id, "control channel unavailable, progress will be estimated");
                (None, None, false)
            }
        };

        Ok(Self {
            shared,
            endpoint,
            writer: AsyncMutex::new(writer),
            has_channel,
            pid,
            kill_tx: Mutex::new(Some(kill_tx)),
            watcher: Mutex::new(Some(watcher)),
            listener: Mutex::new(listener),
            launched_at,
            start_seconds: request.start_seconds,
            query_timeout: config.query_timeout,
            grace_period: config.grace_period,
        })
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() != SessionState::Exited
    }

    /// False when the control channel never came up
    pub fn has_channel(&self) -> bool {
        self.has_channel
    }

    pub fn ipc_path(&self) -> &Path {
        self.endpoint.path()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Why the session ended, if it has
    pub fn exit_reason(&self) -> Option<ExitReason> {
        *self.shared.exit.borrow()
    }

    /// Resolves once the session has exited
    pub async fn exited(&self) -> ExitReason {
        wait_for_exit(self.shared.exit.subscribe()).await
    }

    /// Run `callback` once when the session exits (immediately if it already has)
    pub fn on_exit<F>(&self, callback: F)
    where
        F: FnOnce(ExitReason) + Send + 'static,
    {
        let rx = self.shared.exit.subscribe();
        tokio::spawn(async move {
            callback(wait_for_exit(rx).await);
        });
    }

    /// Last position/duration the player reported
    pub fn last_known(&self) -> PlaybackSnapshot {
        *lock(&self.shared.last_known)
    }

    /// Wall-clock estimate of the playback position: start offset plus time since launch
    pub fn elapsed_estimate(&self) -> u64 {
        self.start_seconds + self.launched_at.elapsed().as_secs()
    }

    /// Ask the player for position and duration.
    ///
    /// Each value is `None` when the player has no answer yet (e.g. still
    /// buffering) or the reply did not arrive within the query timeout.
    pub async fn query_state(&self) -> Result<PlaybackSnapshot, PlayerError> {
        if !self.has_channel || !self.is_running() {
            return Err(PlayerError::ChannelUnavailable);
        }

        // A failed duration send drops the position query and its waiter
        let position = self.request(Property::Position).await?;
        let duration = self.request(Property::Duration).await?;
        let (position, duration) =
            tokio::join!(self.await_reply(position), self.await_reply(duration));

        let snapshot = PlaybackSnapshot {
            position: position.as_ref().and_then(Value::as_f64),
            duration: duration.as_ref().and_then(Value::as_f64),
        };
        if snapshot.position.is_some() {
            self.shared.advance(SessionState::Playing);
        }
        Ok(snapshot)
    }

    async fn request(&self, property: Property) -> Result<PendingQuery<'_>, PlayerError> {
        // Registered before sending so a fast reply always finds its waiter
        let query = PendingQuery::register(&self.shared, property);
        let command = IpcCommand::get_property(query.request_id, property.name());
        self.send(&command).await?;
        Ok(query)
    }

    async fn await_reply(&self, mut query: PendingQuery<'_>) -> Option<Value> {
        match tokio::time::timeout(self.query_timeout, &mut query.rx).await {
            Ok(Ok(data)) => data,
            Ok(Err(_)) => None,
            Err(_) => {
                debug!(session = %self.id(), request_id = query.request_id, "query timed out");
                None
            }
        }
    }

    async fn send(&self, command: &IpcCommand) -> Result<(), PlayerError> {
        let line = command.to_line()?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(PlayerError::ChannelUnavailable)?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        debug!(session = %self.id(), command = %line.trim_end(), "sent ipc command");
        Ok(())
    }

    /// Ask the player to exit on its own; false when there is no way to ask
    async fn request_graceful_exit(&self) -> bool {
        if self.has_channel {
            let command = IpcCommand::quit(self.shared.next_request_id());
            match self.send(&command).await {
                Ok(()) => return true,
                Err(e) => debug!(session = %self.id(), error = %e, "quit over ipc failed"),
            }
        }

        self.pid.is_some_and(send_sigterm)
    }

    fn force_kill(&self) {
        if let Some(tx) = lock(&self.kill_tx).take() {
            let _ = tx.send(());
        }
    }

    /// Stop the player: graceful request, bounded wait, then force kill.
    ///
    /// The control endpoint is released on every path. Safe to call repeatedly.
    pub async fn terminate(&self) {
        let watcher = lock(&self.watcher).take();

        if let Some(mut watcher) = watcher {
            if !watcher.is_finished() {
                info!(session = %self.id(), "terminating player");
                let graceful = self.request_graceful_exit().await
                    && tokio::time::timeout(self.grace_period, &mut watcher)
                        .await
                        .is_ok();

                if !graceful {
                    warn!(session = %self.id(), "player did not exit in time, killing");
                    self.force_kill();
                    if tokio::time::timeout(KILL_WAIT, &mut watcher).await.is_err() {
                        watcher.abort();
                    }
                }
            }
        }

        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
        *self.writer.lock().await = None;
        self.endpoint.release();
        self.shared.mark_exited(ExitReason::Terminated);
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        // Aborting the watcher drops the child, which kills it (kill_on_drop)
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
        self.shared.mark_exited(ExitReason::Terminated);
    }
}

// =============================================================================
// Background tasks
// =============================================================================

async fn watch_process(mut child: Child, mut kill_rx: oneshot::Receiver<()>, shared: Arc<Shared>) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            if let Err(e) = child.kill().await {
                warn!(session = %shared.id, error = %e, "failed to kill player");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(session = %shared.id, error = %e, "failed waiting on player");
            None
        }
    };
    debug!(session = %shared.id, ?code, "player process ended");
    shared.mark_exited(ExitReason::ProcessExited(code));
}

async fn listen(reader: ChannelReader, shared: Arc<Shared>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(session = %shared.id, "control channel closed");
                break;
            }
            Err(e) => {
                debug!(session = %shared.id, error = %e, "control channel read failed");
                break;
            }
        };

        match IpcMessage::parse(&line) {
            Some(reply @ IpcMessage::Reply { .. }) => shared.resolve_reply(reply),
            Some(IpcMessage::Event { name, reason }) => match name.as_str() {
                EVENT_END_FILE => {
                    debug!(session = %shared.id, ?reason, "end of media");
                    shared.mark_exited(ExitReason::EndOfMedia);
                    break;
                }
                EVENT_FILE_LOADED | EVENT_PLAYBACK_RESTART => {
                    shared.advance(SessionState::Playing);
                }
                _ => {}
            },
            None => debug!(session = %shared.id, line = %line, "ignoring ipc line"),
        }
    }
}

async fn connect_with_retry(
    path: &Path,
    timeout: Duration,
    interval: Duration,
    shared: &Shared,
) -> Option<(ChannelReader, ChannelWriter)> {
    let deadline = Instant::now() + timeout;
    loop {
        if shared.state() == SessionState::Exited {
            return None;
        }
        match connect(path).await {
            Ok(channel) => return Some(channel),
            Err(e) => {
                if Instant::now() >= deadline {
                    debug!(session = %shared.id, error = %e, "giving up on control channel");
                    return None;
                }
            }
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: plain signal delivery to our own child's pid
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
async fn connect(path: &Path) -> std::io::Result<(ChannelReader, ChannelWriter)> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    let (reader, writer) = stream.into_split();
    Ok((Box::new(reader), Box::new(writer)))
}

#[cfg(not(unix))]
async fn connect(_path: &Path) -> std::io::Result<(ChannelReader, ChannelWriter)> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "ipc sockets are only supported on unix",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(request_id: u64, error: &str, data: Option<Value>) -> IpcMessage {
        IpcMessage::Reply {
            request_id,
            error: error.to_string(),
            data,
        }
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            SessionState::Idle,
            SessionState::Launching,
            SessionState::Connected,
            SessionState::Playing,
            SessionState::Exited,
        ] {
            assert_eq!(SessionState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_exit_fires_once() {
        let shared = Shared::new(Uuid::new_v4());
        assert!(shared.mark_exited(ExitReason::EndOfMedia));
        assert!(!shared.mark_exited(ExitReason::ProcessExited(Some(0))));
        assert_eq!(*shared.exit.borrow(), Some(ExitReason::EndOfMedia));
    }

    #[test]
    fn test_exited_is_terminal() {
        let shared = Shared::new(Uuid::new_v4());
        shared.advance(SessionState::Connected);
        shared.mark_exited(ExitReason::Terminated);
        shared.advance(SessionState::Playing);
        assert_eq!(shared.state(), SessionState::Exited);
    }

    #[test]
    fn test_reply_updates_last_known_and_wakes_waiter() {
        let shared = Shared::new(Uuid::new_v4());
        let (tx, mut rx) = oneshot::channel();
        lock(&shared.pending).insert(
            5,
            PendingReply {
                property: Property::Duration,
                tx,
            },
        );

        shared.resolve_reply(reply(5, "success", Some(Value::from(1420.5))));

        assert_eq!(rx.try_recv().unwrap(), Some(Value::from(1420.5)));
        assert_eq!(lock(&shared.last_known).duration, Some(1420.5));
        assert!(lock(&shared.pending).is_empty());
    }

    #[test]
    fn test_failed_reply_yields_none() {
        let shared = Shared::new(Uuid::new_v4());
        let (tx, mut rx) = oneshot::channel();
        lock(&shared.pending).insert(
            9,
            PendingReply {
                property: Property::Position,
                tx,
            },
        );

        shared.resolve_reply(reply(9, "property unavailable", Some(Value::from(3.0))));

        assert_eq!(rx.try_recv().unwrap(), None);
        assert_eq!(lock(&shared.last_known).position, None);
    }

    #[test]
    fn test_dropped_query_unregisters_waiter() {
        let shared = Shared::new(Uuid::new_v4());
        let position = PendingQuery::register(&shared, Property::Position);
        let duration = PendingQuery::register(&shared, Property::Duration);
        assert_eq!(lock(&shared.pending).len(), 2);

        // e.g. the duration send failed after position went out
        drop(duration);
        drop(position);
        assert!(lock(&shared.pending).is_empty());
    }

    #[test]
    fn test_answered_query_drop_is_harmless() {
        let shared = Shared::new(Uuid::new_v4());
        let mut query = PendingQuery::register(&shared, Property::Duration);
        let request_id = query.request_id;
        shared.resolve_reply(reply(request_id, "success", Some(Value::from(60.0))));

        assert_eq!(query.rx.try_recv().unwrap(), Some(Value::from(60.0)));
        drop(query);
        assert!(lock(&shared.pending).is_empty());
        assert_eq!(lock(&shared.last_known).duration, Some(60.0));
    }

    #[tokio::test]
    async fn test_exit_clears_pending_waiters() {
        let shared = Shared::new(Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        lock(&shared.pending).insert(
            1,
            PendingReply {
                property: Property::Position,
                tx,
            },
        );
        shared.mark_exited(ExitReason::EndOfMedia);
        assert!(rx.await.is_err());
    }
}
