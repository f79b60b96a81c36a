//! PTY (Pseudo-Terminal) handling with portable-pty.

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use agent_pty_core::{Error, Result};

use crate::process::{ProcessEvent, ProcessIo, ProcessSpawner, SpawnRequest, SpawnedProcess};

/// Size of each read from the PTY master.
const READ_CHUNK: usize = 4096;

/// Handle to a spawned PTY process.
pub struct PtyHandle {
    /// The master PTY end, kept alive for the lifetime of the child
    _master: Mutex<Box<dyn MasterPty + Send>>,
    /// The child process
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    /// PTY writer
    writer: Mutex<Box<dyn Write + Send>>,
    /// OS process id captured at spawn
    pid: Option<u32>,
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        warn!("PTY lock was poisoned, recovering");
        e.into_inner()
    })
}

impl PtyHandle {
    /// Spawn a child attached to a new PTY.
    ///
    /// Output is pumped by a dedicated reader thread into the returned
    /// queue; an [`ProcessEvent::Exited`] event is queued once the terminal
    /// reports EOF.
    ///
    /// # Example
    /// ```no_run
    /// use agent_pty_emulator::{PtyHandle, SpawnRequest};
    /// use agent_pty_core::Dimensions;
    ///
    /// # fn example() -> agent_pty_core::Result<()> {
    /// let (pty, mut events) = PtyHandle::spawn(&SpawnRequest::new("/bin/sh", Dimensions::new(24, 80)))?;
    /// pty.write(b"echo hello\r")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(
        request: &SpawnRequest,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ProcessEvent>)> {
        info!(
            "Spawning PTY: command='{}' args={:?}, dimensions={}, cwd={:?}",
            request.program, request.args, request.dimensions, request.cwd
        );

        if !request.dimensions.is_valid() {
            return Err(Error::InvalidInput(format!(
                "invalid PTY dimensions: {}",
                request.dimensions
            )));
        }

        let pty_system = native_pty_system();
        let pty_size = PtySize {
            rows: request.dimensions.rows,
            cols: request.dimensions.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        debug!("Opening PTY with native system");
        let pair = pty_system.openpty(pty_size).map_err(|e| {
            error!("Failed to open PTY: {}", e);
            Error::PtyError(format!("Failed to open PTY: {e}"))
        })?;

        let mut cmd = CommandBuilder::new(&request.program);
        for arg in &request.args {
            cmd.arg(arg);
        }
        if let Some(dir) = &request.cwd {
            debug!("Setting working directory to: {}", dir.display());
            cmd.cwd(dir);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", request.program, e);
            Error::PtyError(format!("Failed to spawn command: {e}"))
        })?;
        // Only the child may hold the slave, otherwise the master never sees EOF.
        drop(pair.slave);

        let pid = child.process_id();

        let writer = pair.master.take_writer().map_err(|e| {
            error!("Failed to take PTY writer: {}", e);
            Error::PtyError(format!("Failed to take writer: {e}"))
        })?;

        let reader = pair.master.try_clone_reader().map_err(|e| {
            error!("Failed to clone PTY reader: {}", e);
            Error::PtyError(format!("Failed to clone reader: {e}"))
        })?;

        let child = Arc::new(Mutex::new(child));
        let (tx, rx) = mpsc::unbounded_channel();
        Self::start_reader(reader, Arc::clone(&child), tx, pid)?;

        info!(
            "PTY spawned successfully: command='{}', pid={:?}",
            request.program, pid
        );

        Ok((
            Self {
                _master: Mutex::new(pair.master),
                child,
                writer: Mutex::new(writer),
                pid,
            },
            rx,
        ))
    }

    /// Pump blocking PTY reads into the event queue on a dedicated thread.
    fn start_reader(
        mut reader: Box<dyn Read + Send>,
        child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
        tx: mpsc::UnboundedSender<ProcessEvent>,
        pid: Option<u32>,
    ) -> Result<()> {
        std::thread::Builder::new()
            .name(format!("pty-reader-{}", pid.unwrap_or_default()))
            .spawn(move || {
                let mut buffer = vec![0u8; READ_CHUNK];
                loop {
                    match reader.read(&mut buffer) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(ProcessEvent::Output(buffer[..n].to_vec())).is_err() {
                                debug!("PTY output receiver dropped, stopping reader");
                                return;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        // Linux reports EIO on the master once the child side closes
                        Err(e) => {
                            debug!("PTY read ended: {}", e);
                            break;
                        }
                    }
                }

                let code = lock(&child)
                    .try_wait()
                    .ok()
                    .flatten()
                    .map(|status| status.exit_code());
                info!("PTY closed: pid={:?}, exit_code={:?}", pid, code);
                let _ = tx.send(ProcessEvent::Exited { code });
            })
            .map_err(|e| Error::PtyError(format!("Failed to start reader thread: {e}")))?;
        Ok(())
    }

    /// Write data to the PTY.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        debug!("Writing {} bytes to PTY", data.len());
        let mut writer = lock(&self.writer);
        writer.write_all(data).map_err(Error::Io)?;
        writer.flush().map_err(Error::Io)?;
        Ok(data.len())
    }

    /// Check if the child process is still running.
    pub fn is_alive(&self) -> bool {
        lock(&self.child).try_wait().ok().flatten().is_none()
    }

    /// Kill the child process.
    pub fn kill(&self) -> Result<()> {
        info!("Killing PTY process: pid={:?}", self.pid);
        let mut child = lock(&self.child);
        if child.try_wait().ok().flatten().is_some() {
            debug!("PTY process already exited");
            return Ok(());
        }
        child
            .kill()
            .map_err(|e| Error::PtyError(format!("Kill failed: {e}")))
    }
}

impl ProcessIo for PtyHandle {
    fn write(&self, data: &[u8]) -> Result<usize> {
        PtyHandle::write(self, data)
    }

    fn kill(&self) -> Result<()> {
        PtyHandle::kill(self)
    }

    fn is_alive(&self) -> bool {
        PtyHandle::is_alive(self)
    }

    fn process_id(&self) -> Option<u32> {
        self.pid
    }
}

/// Spawns children on real pseudo-terminals.
#[derive(Debug, Clone, Copy, Default)]
pub struct PtySpawner;

impl ProcessSpawner for PtySpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess> {
        let (handle, events) = PtyHandle::spawn(request)?;
        Ok(SpawnedProcess {
            io: Arc::new(handle),
            events,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use agent_pty_core::Dimensions;
    use std::time::Duration;

    fn sh() -> SpawnRequest {
        SpawnRequest::new("/bin/sh", Dimensions::new(24, 80))
    }

    async fn collect_until(
        events: &mut mpsc::UnboundedReceiver<ProcessEvent>,
        needle: &str,
    ) -> String {
        let mut seen = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(5), events.recv()).await
        {
            match event {
                ProcessEvent::Output(bytes) => {
                    seen.extend_from_slice(&bytes);
                    if String::from_utf8_lossy(&seen).contains(needle) {
                        break;
                    }
                }
                ProcessEvent::Exited { .. } => break,
            }
        }
        String::from_utf8_lossy(&seen).into_owned()
    }

    #[test]
    fn test_pty_spawn() {
        let (pty, _events) = PtyHandle::spawn(&sh()).unwrap();
        assert!(pty.is_alive());
        assert!(pty.process_id().is_some());
        pty.kill().unwrap();
    }

    #[test]
    fn test_pty_rejects_zero_dimensions() {
        let request = SpawnRequest::new("/bin/sh", Dimensions::new(0, 80));
        assert!(matches!(
            PtyHandle::spawn(&request),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_pty_spawn_missing_program() {
        let request = SpawnRequest::new("/definitely/not/here", Dimensions::new(24, 80));
        assert!(PtyHandle::spawn(&request).is_err());
    }

    #[tokio::test]
    async fn test_pty_write_and_read() {
        let (pty, mut events) = PtyHandle::spawn(&sh()).unwrap();

        pty.write(b"echo hello-from-pty\n").unwrap();

        let output = collect_until(&mut events, "hello-from-pty").await;
        assert!(output.contains("hello-from-pty"));

        pty.kill().unwrap();
    }

    #[tokio::test]
    async fn test_pty_exit_event() {
        let (pty, mut events) = PtyHandle::spawn(&sh()).unwrap();
        pty.write(b"exit\n").unwrap();

        let mut exited = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(5), events.recv()).await
        {
            if matches!(event, ProcessEvent::Exited { .. }) {
                exited = true;
                break;
            }
        }
        assert!(exited);
    }

    #[tokio::test]
    async fn test_pty_cwd_is_applied() {
        let dir = std::env::temp_dir();
        let (pty, mut events) = PtyHandle::spawn(&sh().with_cwd(&dir)).unwrap();
        pty.write(b"pwd\n").unwrap();

        let expected = dir.canonicalize().unwrap_or(dir);
        let needle = expected.file_name().unwrap().to_string_lossy().into_owned();
        let output = collect_until(&mut events, &needle).await;
        assert!(output.contains(&needle));

        pty.kill().unwrap();
    }

    #[test]
    fn test_pty_kill() {
        let (pty, _events) = PtyHandle::spawn(&sh()).unwrap();
        assert!(pty.is_alive());

        pty.kill().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        assert!(!pty.is_alive());
        // Killing an already-dead child is a no-op
        assert!(pty.kill().is_ok());
    }
}
