//! Output accumulation and boundary-aware response streaming.
//!
//! The PTY reader thread is the single producer of [`ProcessEvent`]s; the
//! session's read path is the single consumer. [`OutputState`] owns the
//! receiving end together with the control-sequence filter and the plain-text
//! buffer, and sits behind the session's read lock. A [`ResponseStream`]
//! holds that lock for as long as it lives.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use agent_pty_core::{Error, Result, SessionId, SessionSettings, SessionState};
use agent_pty_detector::BoundaryDetector;
use agent_pty_emulator::{AnsiFilter, ProcessEvent};

use crate::session::StateCell;

/// Plain-text output received from the child since the last boundary.
#[derive(Debug, Default)]
pub(crate) struct OutputState {
    events: Option<mpsc::UnboundedReceiver<ProcessEvent>>,
    filter: AnsiFilter,
    buffer: String,
    bytes_seen: usize,
    exit: Option<Option<u32>>,
}

impl OutputState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start consuming a freshly spawned child's events.
    pub(crate) fn attach(&mut self, events: mpsc::UnboundedReceiver<ProcessEvent>) {
        self.events = Some(events);
        self.buffer.clear();
        self.bytes_seen = 0;
        self.exit = None;
    }

    /// Accumulated plain text.
    pub(crate) fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Raw bytes received since attach, including pure control sequences.
    pub(crate) fn bytes_seen(&self) -> usize {
        self.bytes_seen
    }

    /// Exit code once the child is known to be gone.
    pub(crate) fn exit(&self) -> Option<Option<u32>> {
        self.exit
    }

    /// Wait for the next event; `None` once the producer is gone.
    pub(crate) async fn recv(&mut self) -> Option<ProcessEvent> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    /// Fold an event (or the end of the queue) into the buffer, then take
    /// whatever else is already queued.
    pub(crate) fn apply(&mut self, event: Option<ProcessEvent>) {
        self.apply_one(event);
        self.drain_pending();
    }

    fn apply_one(&mut self, event: Option<ProcessEvent>) {
        match event {
            Some(ProcessEvent::Output(bytes)) => {
                self.bytes_seen += bytes.len();
                let text = self.filter.feed(&bytes);
                self.buffer.push_str(&text);
            }
            Some(ProcessEvent::Exited { code }) => {
                self.exit.get_or_insert(code);
                self.events = None;
            }
            None => {
                self.exit.get_or_insert(None);
                self.events = None;
            }
        }
    }

    fn drain_pending(&mut self) {
        while let Some(events) = self.events.as_mut() {
            match events.try_recv() {
                Ok(event) => self.apply_one(Some(event)),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => self.apply_one(None),
            }
        }
    }

    /// Discard everything received so far; a fresh response is about to begin.
    ///
    /// The filter keeps its parser state so a sequence in flight is still
    /// recognised when its tail arrives.
    pub(crate) fn clear(&mut self) {
        self.drain_pending();
        self.buffer.clear();
    }

    /// Take the whole buffer.
    pub(crate) fn take(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    /// Split off an intermediate chunk: everything through the last newline,
    /// or the whole buffer when it holds a single partial line.
    pub(crate) fn split_chunk(&mut self) -> String {
        let cut = self
            .buffer
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(self.buffer.len());
        let rest = self.buffer.split_off(cut);
        std::mem::replace(&mut self.buffer, rest)
    }

    /// Stop consuming events and free the buffer.
    pub(crate) fn close(&mut self) {
        if let Some(mut events) = self.events.take() {
            events.close();
        }
        self.buffer = String::new();
        self.exit.get_or_insert(None);
    }
}

/// Describe an exit code for error messages.
pub(crate) fn describe_exit(code: Option<u32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminal closed".to_string(),
    }
}

/// Final chunks drop the trailing whitespace left in front of the prompt.
fn finalize(text: &str) -> Option<String> {
    let text = text.trim_end();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Timing and size rules for delimiting a response.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadRules {
    pub(crate) poll_interval: Duration,
    pub(crate) idle_timeout: Duration,
    pub(crate) chunk_threshold: usize,
    pub(crate) empty_poll_limit: u32,
}

impl ReadRules {
    pub(crate) fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            idle_timeout: settings.prompt_detection_timeout(),
            chunk_threshold: settings.chunk_threshold,
            empty_poll_limit: settings.empty_poll_limit,
        }
    }
}

/// One response from the child, delivered as plain-text chunks.
///
/// Created by [`InteractiveSession::read_response`](crate::InteractiveSession::read_response).
/// The stream is finite and cannot be restarted: once it ends (or fails)
/// every further call returns `Ok(None)`. While it is alive no other reader
/// can drain the session.
pub struct ResponseStream {
    session_id: SessionId,
    output: OwnedMutexGuard<OutputState>,
    state: Arc<StateCell>,
    detector: Arc<dyn BoundaryDetector>,
    closed: CancellationToken,
    cancel: CancellationToken,
    rules: ReadRules,
    last_len: usize,
    last_growth: Instant,
    poll: Interval,
    empty_polls: u32,
    finished: bool,
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("session_id", &self.session_id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ResponseStream {
    pub(crate) fn new(
        session_id: SessionId,
        output: OwnedMutexGuard<OutputState>,
        state: Arc<StateCell>,
        detector: Arc<dyn BoundaryDetector>,
        closed: CancellationToken,
        cancel: CancellationToken,
        rules: ReadRules,
    ) -> Self {
        let mut poll =
            tokio::time::interval_at(Instant::now() + rules.poll_interval, rules.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            session_id,
            output,
            state,
            detector,
            closed,
            cancel,
            rules,
            last_len: 0,
            last_growth: Instant::now(),
            poll,
            empty_polls: 0,
            finished: false,
        }
    }

    /// Whether the stream has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self, chunk: Option<String>) -> Result<Option<String>> {
        self.finished = true;
        Ok(chunk)
    }

    fn fail(&mut self, error: Error) -> Result<Option<String>> {
        self.finished = true;
        Err(error)
    }

    /// Produce the next chunk of the response.
    ///
    /// Returns `Ok(None)` when the response is complete. The prompt is
    /// checked before the size threshold, so a buffer holding a complete
    /// response is never split.
    pub async fn next_chunk(&mut self) -> Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            if self.cancel.is_cancelled() {
                debug!("Response read cancelled: id={}", self.session_id);
                return self.fail(Error::Cancelled);
            }
            if self.closed.is_cancelled() {
                return self.fail(Error::Disposed);
            }

            if let Some(boundary) = self.detector.find_prompt(self.output.buffer()) {
                let chunk = finalize(boundary.before(self.output.buffer()));
                self.output.take();
                debug!(
                    "Prompt boundary detected: id={}, detector={}",
                    self.session_id,
                    self.detector.name()
                );
                return self.finish(chunk);
            }

            if let Some(code) = self.output.exit() {
                if !self.output.buffer().is_empty() {
                    let pending = self.output.take();
                    self.last_len = 0;
                    if let Some(chunk) = finalize(&pending) {
                        return Ok(Some(chunk));
                    }
                }
                let reason = describe_exit(code);
                if self.state.transition(SessionState::Error) {
                    info!(
                        "Process exited during response: id={}, {}",
                        self.session_id, reason
                    );
                }
                return self.fail(Error::ProcessExited(reason));
            }

            let len = self.output.buffer().len();
            if len != self.last_len {
                self.last_len = len;
                self.last_growth = Instant::now();
                self.empty_polls = 0;

                if self.output.buffer().chars().count() >= self.rules.chunk_threshold {
                    let chunk = self.output.split_chunk();
                    self.last_len = self.output.buffer().len();
                    if !chunk.is_empty() {
                        return Ok(Some(chunk));
                    }
                }
            } else if !self.output.buffer().is_empty() {
                if self.last_growth.elapsed() >= self.rules.idle_timeout {
                    debug!(
                        "No output for {:?}, finalizing response: id={}",
                        self.rules.idle_timeout, self.session_id
                    );
                    let pending = self.output.take();
                    return self.finish(finalize(&pending));
                }
            } else if self.empty_polls >= self.rules.empty_poll_limit {
                debug!(
                    "No output after {} polls, ending response: id={}",
                    self.empty_polls, self.session_id
                );
                return self.finish(None);
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {}
                _ = self.closed.cancelled() => {}
                event = self.output.recv() => self.output.apply(event),
                // Ticks survive wake-ups from the queue, so output that
                // filters to nothing still counts towards the empty limit.
                _ = self.poll.tick() => {
                    if self.output.buffer().is_empty() {
                        self.empty_polls += 1;
                    }
                }
            }
        }
    }

    /// Adapt into a [`Stream`] of chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<String>> + Send {
        futures::stream::unfold(self, |mut reader| async move {
            match reader.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), reader)),
                Ok(None) => None,
                Err(e) => Some((Err(e), reader)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(text: &str) -> OutputState {
        let mut state = OutputState::new();
        let (tx, rx) = mpsc::unbounded_channel();
        state.attach(rx);
        tx.send(ProcessEvent::Output(text.as_bytes().to_vec()))
            .unwrap();
        state.drain_pending();
        state
    }

    #[test]
    fn test_apply_filters_output() {
        let state = state_with("\x1b[32mgreen\x1b[0m\r\n");
        assert_eq!(state.buffer(), "green\n");
        assert_eq!(state.bytes_seen(), "\x1b[32mgreen\x1b[0m\r\n".len());
    }

    #[test]
    fn test_exit_event_recorded() {
        let mut state = OutputState::new();
        let (tx, rx) = mpsc::unbounded_channel();
        state.attach(rx);
        tx.send(ProcessEvent::Exited { code: Some(2) }).unwrap();
        state.clear();
        assert_eq!(state.exit(), Some(Some(2)));
    }

    #[test]
    fn test_dropped_producer_counts_as_exit() {
        let mut state = OutputState::new();
        let (tx, rx) = mpsc::unbounded_channel();
        state.attach(rx);
        drop(tx);
        state.clear();
        assert_eq!(state.exit(), Some(None));
    }

    #[test]
    fn test_clear_discards_queued_output() {
        let mut state = OutputState::new();
        let (tx, rx) = mpsc::unbounded_channel();
        state.attach(rx);
        tx.send(ProcessEvent::Output(b"stale".to_vec())).unwrap();
        state.clear();
        assert_eq!(state.buffer(), "");
        assert_eq!(state.exit(), None);
    }

    #[test]
    fn test_split_chunk_at_last_newline() {
        let mut state = state_with("one\ntwo\nthr");
        assert_eq!(state.split_chunk(), "one\ntwo\n");
        assert_eq!(state.buffer(), "thr");
    }

    #[test]
    fn test_split_chunk_without_newline_takes_all() {
        let mut state = state_with("no newline here");
        assert_eq!(state.split_chunk(), "no newline here");
        assert_eq!(state.buffer(), "");
    }

    #[test]
    fn test_close_releases_queue() {
        let mut state = state_with("text");
        state.close();
        assert_eq!(state.buffer(), "");
        assert!(state.exit().is_some());
    }

    #[test]
    fn test_finalize_trims_trailing_whitespace() {
        assert_eq!(finalize("answer text\n"), Some("answer text".to_string()));
        assert_eq!(finalize("  \n"), None);
        assert_eq!(finalize("  indented"), Some("  indented".to_string()));
    }

    #[test]
    fn test_describe_exit() {
        assert_eq!(describe_exit(Some(1)), "exit code 1");
        assert_eq!(describe_exit(None), "terminal closed");
    }
}
