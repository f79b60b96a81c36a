//! JSON-lines request loop.
//!
//! Requests are read one per line and handled concurrently. Responses from
//! all requests are funnelled through a single writer task so lines never
//! interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use agent_pty_core::Error;

use crate::protocol::{Command, Request, Response, ResponseBody};
use crate::service::SessionService;

type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Request dispatcher bound to a [`SessionService`].
#[derive(Debug, Clone)]
pub struct Server {
    service: Arc<SessionService>,
    in_flight: InFlight,
    shutdown: CancellationToken,
}

impl Server {
    /// Serve requests against `service`.
    pub fn new(service: Arc<SessionService>) -> Self {
        Self {
            service,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Read requests from `input` until EOF or shutdown, writing responses to
    /// `output`. Every session is disposed before this returns.
    pub async fn run<R, W>(&self, input: R, output: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_responses(rx, output));

        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, closing request loop");
                    break;
                }
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => self.dispatch(&line, &tx),
                Ok(None) => {
                    debug!("Input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read request: {}", e);
                    break;
                }
            }
        }

        for (_, token) in self.lock_in_flight().drain() {
            token.cancel();
        }
        self.service.shutdown().await;

        drop(tx);
        writer.await??;
        Ok(())
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Parse one line and start handling it.
    fn dispatch(&self, line: &str, tx: &mpsc::UnboundedSender<Response>) {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed request: {}", e);
                let error = Error::InvalidInput(format!("malformed request: {e}"));
                let _ = tx.send(Response::error(None, &error));
                return;
            }
        };

        debug!("Request received: id={}, {:?}", request.id, request.command);
        let id = request.id;
        match request.command {
            Command::Count => {
                let body = ResponseBody::Count {
                    active_sessions: self.service.active_session_count(),
                };
                let _ = tx.send(Response::new(id, body));
            }
            Command::Cancel { request_id } => {
                let token = self.lock_in_flight().remove(&request_id);
                let found = token.is_some();
                if let Some(token) = token {
                    info!("Cancelling request: id={}", request_id);
                    token.cancel();
                }
                let _ = tx.send(Response::new(id, ResponseBody::CancelRequested { found }));
            }
            Command::StartSession { owner } => {
                let service = Arc::clone(&self.service);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = match service.start_session(&owner).await {
                        Ok(session_id) => {
                            Response::new(id, ResponseBody::SessionStarted { session_id })
                        }
                        Err(e) => Response::error(Some(id), &e),
                    };
                    let _ = tx.send(response);
                });
            }
            Command::EndSession { owner, session_id } => {
                let service = Arc::clone(&self.service);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = match service.end_session(&owner, session_id).await {
                        Ok(ack) => Response::new(id, ack.into()),
                        Err(e) => Response::error(Some(id), &e),
                    };
                    let _ = tx.send(response);
                });
            }
            Command::SendMessage {
                owner,
                session_id,
                prompt,
            } => {
                let cancel = CancellationToken::new();
                self.lock_in_flight().insert(id.clone(), cancel.clone());

                let service = Arc::clone(&self.service);
                let in_flight = Arc::clone(&self.in_flight);
                let tx = tx.clone();
                tokio::spawn(async move {
                    match service
                        .send_message(&owner, session_id, &prompt, cancel)
                        .await
                    {
                        Ok(mut events) => {
                            while let Some(event) = events.recv().await {
                                if tx.send(Response::new(id.clone(), event.into())).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Response::error(Some(id.clone()), &e));
                        }
                    }
                    in_flight
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&id);
                });
            }
        }
    }
}

async fn write_responses<W>(
    mut rx: mpsc::UnboundedReceiver<Response>,
    mut output: W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response)?;
        line.push(b'\n');
        output.write_all(&line).await?;
        output.flush().await?;
    }
    Ok(())
}
