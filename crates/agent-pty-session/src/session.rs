//! A single interactive CLI session on a pseudo-terminal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agent_pty_core::{Error, OwnerId, Result, SessionId, SessionSettings, SessionState};
use agent_pty_detector::BoundaryDetector;
use agent_pty_emulator::{ProcessIo, ProcessSpawner, SpawnRequest};

use crate::input::{sanitize_input, SanitizedInput};
use crate::output::{describe_exit, OutputState, ReadRules, ResponseStream};

/// Poll cadence while waiting for a graceful exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Session state shared between the session and its response streams.
#[derive(Debug)]
pub(crate) struct StateCell {
    id: SessionId,
    state: Mutex<SessionState>,
}

impl StateCell {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState::Initializing),
        }
    }

    pub(crate) fn get(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Move to `next` if the lifecycle allows it; returns whether it moved.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let mut state = lock(&self.state);
        if *state == next || !state.can_transition_to(next) {
            return false;
        }
        info!("Session state change: id={}, {} -> {}", self.id, *state, next);
        *state = next;
        true
    }
}

/// One long-lived AI CLI child attached to a PTY.
///
/// The session owns the child for its whole life. Writes are serialized by
/// an async mutex; reads hold the output lock for the lifetime of the
/// [`ResponseStream`] they return, so exactly one consumer drains output at
/// a time.
pub struct InteractiveSession {
    id: SessionId,
    owner: OwnerId,
    settings: Arc<SessionSettings>,
    spawner: Arc<dyn ProcessSpawner>,
    detector: Arc<dyn BoundaryDetector>,
    state: Arc<StateCell>,
    process: Mutex<Option<Arc<dyn ProcessIo>>>,
    output: Arc<tokio::sync::Mutex<OutputState>>,
    write_lock: tokio::sync::Mutex<()>,
    closed: CancellationToken,
    disposed: AtomicBool,
    initialized: AtomicBool,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for InteractiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveSession")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("state", &self.state.get())
            .field("executable", &self.settings.executable)
            .finish_non_exhaustive()
    }
}

impl InteractiveSession {
    /// Create a session in the `Initializing` state. No process is started
    /// until [`initialize`](Self::initialize).
    pub fn new(
        id: SessionId,
        owner: OwnerId,
        settings: Arc<SessionSettings>,
        spawner: Arc<dyn ProcessSpawner>,
        detector: Arc<dyn BoundaryDetector>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            settings,
            spawner,
            detector,
            state: Arc::new(StateCell::new(id)),
            process: Mutex::new(None),
            output: Arc::new(tokio::sync::Mutex::new(OutputState::new())),
            write_lock: tokio::sync::Mutex::new(()),
            closed: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            created_at,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Owner the session belongs to.
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the child is running.
    pub fn is_alive(&self) -> bool {
        self.current_process()
            .map(|process| process.is_alive())
            .unwrap_or(false)
    }

    /// OS process id of the child, if started.
    pub fn process_id(&self) -> Option<u32> {
        self.current_process().and_then(|process| process.process_id())
    }

    fn current_process(&self) -> Option<Arc<dyn ProcessIo>> {
        lock(&self.process).clone()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Start the child and wait for its ready prompt.
    ///
    /// Resolves to `Ready` when the prompt appears. If `timeout` elapses after
    /// the child produced some output the session is still made `Ready`,
    /// since many CLIs redraw instead of printing a recognizable prompt.
    pub async fn initialize(&self, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidInput(format!(
                "session {} is already initialized",
                self.id
            )));
        }
        if self.is_disposed() {
            return Err(Error::Disposed);
        }

        let settings = &self.settings;
        let request = SpawnRequest::new(settings.executable.clone(), settings.dimensions())
            .with_cwd(settings.working_directory.clone())
            .with_env("TERM", settings.term.clone());

        info!(
            "Starting session process: id={}, owner={}, executable={}, cwd={}",
            self.id,
            self.owner,
            settings.executable,
            settings.working_directory.display()
        );

        let spawned = match self.spawner.spawn(&request) {
            Ok(spawned) => spawned,
            Err(e) => {
                self.state.transition(SessionState::Error);
                return Err(e);
            }
        };

        let mut output = self.output.lock().await;
        output.attach(spawned.events);
        *lock(&self.process) = Some(Arc::clone(&spawned.io));

        // dispose() may have run while the child was starting
        if self.is_disposed() {
            drop(output);
            if let Err(e) = spawned.io.kill() {
                debug!("Kill after concurrent dispose failed: id={}, {}", self.id, e);
            }
            return Err(Error::Disposed);
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.detector.is_ready(output.buffer()) {
                output.clear();
                self.state.transition(SessionState::Ready);
                info!("Session ready: id={}, pid={:?}", self.id, spawned.io.process_id());
                return Ok(());
            }

            if let Some(code) = output.exit() {
                self.state.transition(SessionState::Error);
                return Err(Error::ProcessExited(format!(
                    "exited during handshake ({})",
                    describe_exit(code)
                )));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Session initialization cancelled: id={}", self.id);
                    return Err(Error::Cancelled);
                }
                _ = self.closed.cancelled() => return Err(Error::Disposed),
                event = output.recv() => output.apply(event),
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        if output.bytes_seen() > 0 {
            warn!(
                "Ready prompt not seen within {:?}, assuming ready: id={}, {} bytes received",
                timeout,
                self.id,
                output.bytes_seen()
            );
            output.clear();
            self.state.transition(SessionState::Ready);
            Ok(())
        } else {
            self.state.transition(SessionState::Error);
            Err(Error::InitializationTimeout(timeout.as_millis() as u64))
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        match self.state.get() {
            SessionState::Ready => Ok(()),
            SessionState::Error => Err(Error::ProcessExited(
                "session process is no longer running".to_string(),
            )),
            SessionState::Closed => Err(Error::Disposed),
            state => Err(Error::SessionNotReady(state)),
        }
    }

    /// Send one message to the child.
    ///
    /// The output buffer is cleared first, so the next
    /// [`read_response`](Self::read_response) sees only the reply to this
    /// message.
    pub async fn write(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        self.check_writable()?;

        let len = text.chars().count();
        let max = self.settings.max_prompt_length;
        if len > max {
            return Err(Error::PromptTooLong { len, max });
        }

        let text = match sanitize_input(text, &self.settings.exit_command) {
            SanitizedInput::Text(text) => text,
            SanitizedInput::ExitCommand => {
                warn!("Ignoring exit command sent as input: id={}", self.id);
                return Ok(());
            }
        };

        let _write_guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = self.closed.cancelled() => return Err(Error::Disposed),
            guard = self.write_lock.lock() => guard,
        };

        {
            let mut output = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.closed.cancelled() => return Err(Error::Disposed),
                guard = self.output.lock() => guard,
            };
            output.clear();
        }

        // State may have changed while waiting for the locks
        self.check_writable()?;

        let process = self.current_process().ok_or(Error::Disposed)?;
        let mut payload = text;
        payload.push_str(&self.settings.line_terminator);

        debug!("Writing to session: id={}, {} bytes", self.id, payload.len());
        match process.write(payload.as_bytes()) {
            Ok(_) => Ok(()),
            Err(_) if self.is_disposed() => Err(Error::Disposed),
            Err(e) => Err(e),
        }
    }

    /// Begin reading the response to the last message.
    ///
    /// Waits for any other reader (or a write clearing the buffer) to finish.
    pub async fn read_response(&self, cancel: CancellationToken) -> Result<ResponseStream> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = self.closed.cancelled() => return Err(Error::Disposed),
            guard = Arc::clone(&self.output).lock_owned() => guard,
        };

        Ok(ResponseStream::new(
            self.id,
            output,
            Arc::clone(&self.state),
            Arc::clone(&self.detector),
            self.closed.clone(),
            cancel,
            ReadRules::from_settings(&self.settings),
        ))
    }

    /// Release the child and all session resources.
    ///
    /// Idempotent. The exit command is offered first; a child still running
    /// after the grace period is killed.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Disposing session: id={}, owner={}", self.id, self.owner);
        self.state.transition(SessionState::Closed);
        self.closed.cancel();

        let process = lock(&self.process).take();
        let mut result = Ok(());

        if let Some(process) = process {
            if process.is_alive() && !self.settings.exit_command.is_empty() {
                let mut command = self.settings.exit_command.clone();
                command.push_str(&self.settings.line_terminator);
                if let Err(e) = process.write(command.as_bytes()) {
                    debug!("Exit command not delivered: id={}, {}", self.id, e);
                }

                let deadline = Instant::now() + self.settings.graceful_exit_timeout();
                while process.is_alive() && Instant::now() < deadline {
                    tokio::time::sleep(EXIT_POLL_INTERVAL).await;
                }
            }

            if process.is_alive() {
                warn!(
                    "Process did not exit gracefully, killing: id={}, pid={:?}",
                    self.id,
                    process.process_id()
                );
            }
            if let Err(e) = process.kill() {
                warn!("Failed to kill session process: id={}, {}", self.id, e);
                result = Err(e);
            }
        }

        // A reader still holding the output releases it once it sees the close
        if let Ok(mut output) = self.output.try_lock() {
            output.close();
        }

        info!("Session disposed: id={}", self.id);
        result
    }
}

impl Drop for InteractiveSession {
    fn drop(&mut self) {
        if self.is_disposed() {
            return;
        }
        if let Some(process) = lock(&self.process).take() {
            if process.is_alive() {
                warn!("Session dropped without dispose, killing process: id={}", self.id);
                if let Err(e) = process.kill() {
                    warn!("Failed to kill session process: id={}, {}", self.id, e);
                }
            }
        }
    }
}
