//! Scripted child processes for exercising sessions without a real CLI.
//!
//! [`ScriptedSpawner`] implements [`ProcessSpawner`] by handing out
//! [`ScriptedProcess`]es: in-memory children that print a banner, answer
//! writes through a responder closure, honour the exit command and record
//! everything written to them.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use agent_pty_core::{Error, Result};
use agent_pty_emulator::{ProcessEvent, ProcessIo, ProcessSpawner, SpawnRequest, SpawnedProcess};

type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

static NEXT_PID: AtomicU32 = AtomicU32::new(40_000);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Spawner producing [`ScriptedProcess`]es.
pub struct ScriptedSpawner {
    banner: Option<String>,
    responder: Option<Responder>,
    fail: bool,
    honour_exit: bool,
    exit_command: String,
    processes: Mutex<Vec<Arc<ScriptedProcess>>>,
    requests: Mutex<Vec<SpawnRequest>>,
}

impl std::fmt::Debug for ScriptedSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedSpawner")
            .field("banner", &self.banner)
            .field("fail", &self.fail)
            .field("spawned", &self.spawn_count())
            .finish_non_exhaustive()
    }
}

impl Default for ScriptedSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSpawner {
    /// Spawner whose children print nothing and never reply.
    pub fn new() -> Self {
        Self {
            banner: None,
            responder: None,
            fail: false,
            honour_exit: true,
            exit_command: "/exit".to_string(),
            processes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Spawner whose every spawn attempt fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Output printed by each child as soon as it starts.
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    /// Reply produced for each line written (terminator removed).
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Exit command the children obey.
    pub fn with_exit_command(mut self, command: impl Into<String>) -> Self {
        self.exit_command = command.into();
        self
    }

    /// Children keep running when sent the exit command.
    pub fn ignoring_exit(mut self) -> Self {
        self.honour_exit = false;
        self
    }

    /// Every child spawned so far, oldest first.
    pub fn processes(&self) -> Vec<Arc<ScriptedProcess>> {
        lock(&self.processes).clone()
    }

    /// Most recently spawned child.
    pub fn last(&self) -> Option<Arc<ScriptedProcess>> {
        lock(&self.processes).last().cloned()
    }

    /// Number of successful spawns.
    pub fn spawn_count(&self) -> usize {
        lock(&self.processes).len()
    }

    /// Every spawn request received, including failed ones.
    pub fn requests(&self) -> Vec<SpawnRequest> {
        lock(&self.requests).clone()
    }
}

impl ProcessSpawner for ScriptedSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess> {
        lock(&self.requests).push(request.clone());
        if self.fail {
            return Err(Error::PtyError(format!(
                "failed to spawn '{}': scripted failure",
                request.program
            )));
        }

        let (tx, events) = mpsc::unbounded_channel();
        let process = Arc::new(ScriptedProcess {
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            sender: Mutex::new(Some(tx)),
            writes: Mutex::new(Vec::new()),
            alive: AtomicBool::new(true),
            killed: AtomicBool::new(false),
            responder: self.responder.clone(),
            exit_command: self.honour_exit.then(|| self.exit_command.clone()),
        });
        if let Some(banner) = &self.banner {
            process.emit(banner);
        }
        lock(&self.processes).push(Arc::clone(&process));

        Ok(SpawnedProcess {
            io: process,
            events,
        })
    }
}

/// In-memory child process.
pub struct ScriptedProcess {
    pid: u32,
    sender: Mutex<Option<mpsc::UnboundedSender<ProcessEvent>>>,
    writes: Mutex<Vec<String>>,
    alive: AtomicBool,
    killed: AtomicBool,
    responder: Option<Responder>,
    exit_command: Option<String>,
}

impl std::fmt::Debug for ScriptedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProcess")
            .field("pid", &self.pid)
            .field("alive", &self.alive.load(Ordering::SeqCst))
            .field("killed", &self.killed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ScriptedProcess {
    /// Print raw terminal output, as the child would.
    pub fn emit(&self, output: &str) {
        if let Some(sender) = lock(&self.sender).as_ref() {
            let _ = sender.send(ProcessEvent::Output(output.as_bytes().to_vec()));
        }
    }

    /// Terminate the child with `code`, closing its output.
    pub fn exit(&self, code: Option<u32>) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(sender) = lock(&self.sender).take() {
            let _ = sender.send(ProcessEvent::Exited { code });
        }
    }

    /// Everything written to the child, one entry per write.
    pub fn writes(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    /// Whether `kill` was called.
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

impl ProcessIo for ScriptedProcess {
    fn write(&self, data: &[u8]) -> Result<usize> {
        if !self.is_alive() {
            return Err(Error::PtyError("process has exited".to_string()));
        }

        let text = String::from_utf8_lossy(data).into_owned();
        lock(&self.writes).push(text.clone());

        let line = text.trim_end_matches(['\r', '\n']);
        if let Some(exit) = &self.exit_command {
            if line.trim().eq_ignore_ascii_case(exit) {
                self.exit(Some(0));
                return Ok(data.len());
            }
        }
        if let Some(reply) = self.responder.as_ref().and_then(|respond| respond(line)) {
            self.emit(&reply);
        }
        Ok(data.len())
    }

    fn kill(&self) -> Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        if self.is_alive() {
            self.exit(None);
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn process_id(&self) -> Option<u32> {
        Some(self.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_pty_core::Dimensions;

    fn request() -> SpawnRequest {
        SpawnRequest::new("claude", Dimensions::default())
    }

    #[test]
    fn test_banner_and_responder() {
        let spawner = ScriptedSpawner::new()
            .with_banner("> ")
            .with_responder(|line| Some(format!("echo: {line}\r\n> ")));
        let mut spawned = spawner.spawn(&request()).unwrap();

        assert_eq!(
            spawned.events.try_recv().unwrap(),
            ProcessEvent::Output(b"> ".to_vec())
        );
        spawned.io.write(b"hi\r").unwrap();
        assert_eq!(
            spawned.events.try_recv().unwrap(),
            ProcessEvent::Output(b"echo: hi\r\n> ".to_vec())
        );
        assert_eq!(spawner.spawn_count(), 1);
    }

    #[test]
    fn test_exit_command_ends_process() {
        let spawner = ScriptedSpawner::new();
        let mut spawned = spawner.spawn(&request()).unwrap();

        spawned.io.write(b"/exit\r").unwrap();
        assert!(!spawned.io.is_alive());
        assert_eq!(
            spawned.events.try_recv().unwrap(),
            ProcessEvent::Exited { code: Some(0) }
        );
        assert!(spawned.io.write(b"more\r").is_err());
    }

    #[test]
    fn test_ignoring_exit_requires_kill() {
        let spawner = ScriptedSpawner::new().ignoring_exit();
        let spawned = spawner.spawn(&request()).unwrap();

        spawned.io.write(b"/exit\r").unwrap();
        assert!(spawned.io.is_alive());
        spawned.io.kill().unwrap();
        assert!(!spawned.io.is_alive());
        assert!(spawner.last().unwrap().was_killed());
    }

    #[test]
    fn test_failing_spawner_records_request() {
        let spawner = ScriptedSpawner::failing();
        assert!(matches!(spawner.spawn(&request()), Err(Error::PtyError(_))));
        assert_eq!(spawner.requests().len(), 1);
        assert_eq!(spawner.spawn_count(), 0);
    }
}
