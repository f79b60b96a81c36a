//! Session pool: one session per owner under a global capacity ceiling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use agent_pty_core::{
    Clock, EngineConfig, Error, OwnerId, PoolSettings, Result, SessionId, SessionSettings,
    SessionState, SystemClock,
};
use agent_pty_detector::{BoundaryDetector, PromptPatternDetector};
use agent_pty_emulator::{ProcessSpawner, PtySpawner};

use crate::session::InteractiveSession;

/// Public view of a pooled session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Session identifier
    pub session_id: SessionId,
    /// Owning caller
    pub owner: OwnerId,
    /// Lifecycle state
    pub state: SessionState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last lookup or completed exchange
    pub last_activity: DateTime<Utc>,
}

/// Sessions evicted by one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Evicted for exceeding the idle timeout
    pub idle_evicted: Vec<SessionId>,
    /// Evicted, oldest first, to get back under capacity
    pub capacity_evicted: Vec<SessionId>,
}

impl SweepReport {
    /// Total number of sessions evicted.
    pub fn total(&self) -> usize {
        self.idle_evicted.len() + self.capacity_evicted.len()
    }
}

struct Entry {
    session: Arc<InteractiveSession>,
    owner: OwnerId,
    last_activity: DateTime<Utc>,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, Entry>,
    owners: HashMap<OwnerId, SessionId>,
}

impl Registry {
    fn remove(&mut self, id: &SessionId) -> Option<Entry> {
        let entry = self.sessions.remove(id)?;
        if self.owners.get(&entry.owner) == Some(id) {
            self.owners.remove(&entry.owner);
        }
        Some(entry)
    }

    fn remove_owned(&mut self, owner: &OwnerId, id: &SessionId) -> Option<Entry> {
        match self.sessions.get(id) {
            Some(entry) if entry.owner == *owner => self.remove(id),
            _ => None,
        }
    }

    /// Least recently active session, other than `except`.
    fn oldest(&self, except: Option<SessionId>) -> Option<SessionId> {
        self.sessions
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .min_by_key(|(_, entry)| entry.last_activity)
            .map(|(id, _)| *id)
    }

    /// Evict least recently active sessions until at most `max` remain.
    fn shrink_to(&mut self, max: usize, except: Option<SessionId>) -> Vec<Entry> {
        let mut evicted = Vec::new();
        while self.sessions.len() > max {
            let Some(id) = self.oldest(except) else {
                break;
            };
            if let Some(entry) = self.remove(&id) {
                evicted.push(entry);
            }
        }
        evicted
    }
}

struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct PoolInner {
    registry: RwLock<Registry>,
    pool: PoolSettings,
    session: Arc<SessionSettings>,
    spawner: Arc<dyn ProcessSpawner>,
    detector: Arc<dyn BoundaryDetector>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Builder for [`SessionPool`].
pub struct SessionPoolBuilder {
    pool: PoolSettings,
    session: SessionSettings,
    spawner: Option<Arc<dyn ProcessSpawner>>,
    detector: Option<Arc<dyn BoundaryDetector>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionPoolBuilder {
    /// Process spawner (default: real PTYs).
    pub fn spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Boundary detector (default: the configured prompt pattern).
    pub fn detector(mut self, detector: Arc<dyn BoundaryDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Activity clock (default: system time).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate settings and build the pool. The background sweep is not
    /// started; call [`SessionPool::start`].
    pub fn build(self) -> Result<SessionPool> {
        self.pool.validate()?;
        self.session.validate()?;

        let detector = match self.detector {
            Some(detector) => detector,
            None => Arc::new(PromptPatternDetector::new(&self.session.ready_prompt_pattern)?),
        };

        Ok(SessionPool {
            inner: Arc::new(PoolInner {
                registry: RwLock::new(Registry::default()),
                pool: self.pool,
                session: Arc::new(self.session),
                spawner: self.spawner.unwrap_or_else(|| Arc::new(PtySpawner)),
                detector,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                shutdown: CancellationToken::new(),
                sweeper: Mutex::new(None),
            }),
        })
    }
}

/// Registry of live sessions keyed by id, with an owner index.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("active_sessions", &self.active_session_count())
            .field("max_sessions", &self.inner.pool.max_sessions)
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    /// Start building a pool from settings.
    pub fn builder(pool: PoolSettings, session: SessionSettings) -> SessionPoolBuilder {
        SessionPoolBuilder {
            pool,
            session,
            spawner: None,
            detector: None,
            clock: None,
        }
    }

    /// Pool with real PTYs and the system clock.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Self::builder(config.pool.clone(), config.session.clone()).build()
    }

    /// Pool settings in effect.
    pub fn pool_settings(&self) -> &PoolSettings {
        &self.inner.pool
    }

    /// Session settings in effect.
    pub fn session_settings(&self) -> &SessionSettings {
        &self.inner.session
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    fn sweeper(&self) -> MutexGuard<'_, Option<Sweeper>> {
        self.inner.sweeper.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create and initialize a session for `owner`.
    ///
    /// Any session the owner already has is disposed first. When the pool is
    /// full, idle sessions are swept and then the least recently active
    /// session is evicted, so capacity never surfaces as an error.
    pub async fn create_session(&self, owner: &OwnerId) -> Result<SessionId> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Disposed);
        }

        let existing = {
            let mut registry = self.write();
            registry
                .owners
                .get(owner)
                .copied()
                .and_then(|id| registry.remove(&id))
        };
        if let Some(entry) = existing {
            info!(
                "Replacing existing session for owner: owner={}, id={}",
                owner,
                entry.session.id()
            );
            dispose_all(vec![entry.session]).await;
        }

        let max = self.inner.pool.max_sessions;
        if self.active_session_count() >= max {
            let report = self.sweep().await;
            debug!("Pool at capacity, swept {} sessions", report.total());

            let evicted = self.write().shrink_to(max.saturating_sub(1), None);
            if !evicted.is_empty() {
                for entry in &evicted {
                    warn!(
                        "Evicting least recently active session for capacity: id={}, owner={}",
                        entry.session.id(),
                        entry.owner
                    );
                }
                dispose_all(evicted.into_iter().map(|e| e.session).collect()).await;
            }
        }

        let id = SessionId::new();
        let session = Arc::new(InteractiveSession::new(
            id,
            owner.clone(),
            Arc::clone(&self.inner.session),
            Arc::clone(&self.inner.spawner),
            Arc::clone(&self.inner.detector),
            self.inner.clock.now(),
        ));

        let cancel = self.inner.shutdown.child_token();
        if let Err(e) = session
            .initialize(self.inner.session.handshake_timeout(), &cancel)
            .await
        {
            error!("Session initialization failed: owner={}, id={}, {}", owner, id, e);
            if let Err(dispose_err) = session.dispose().await {
                warn!("Failed to dispose session: id={}, {}", id, dispose_err);
            }
            return Err(e);
        }

        let displaced = {
            let mut registry = self.write();
            let mut displaced = Vec::new();
            if let Some(other) = registry.owners.get(owner).copied() {
                displaced.extend(registry.remove(&other));
            }
            registry.sessions.insert(
                id,
                Entry {
                    session: Arc::clone(&session),
                    owner: owner.clone(),
                    last_activity: self.inner.clock.now(),
                },
            );
            registry.owners.insert(owner.clone(), id);
            displaced.extend(registry.shrink_to(max, Some(id)));
            displaced
        };
        if !displaced.is_empty() {
            warn!(
                "Disposing {} sessions displaced during registration of id={}",
                displaced.len(),
                id
            );
            dispose_all(displaced.into_iter().map(|e| e.session).collect()).await;
        }

        if self.inner.shutdown.is_cancelled() {
            // shutdown() ran while we were registering
            let late = self.write().remove(&id);
            if let Some(entry) = late {
                dispose_all(vec![entry.session]).await;
            }
            return Err(Error::Disposed);
        }

        info!("Session created: owner={}, id={}", owner, id);
        Ok(id)
    }

    /// Look up `id` on behalf of `owner`, refreshing its activity.
    ///
    /// Unknown ids and ids owned by someone else are reported the same way.
    pub fn get_session(&self, owner: &OwnerId, id: &SessionId) -> Result<Arc<InteractiveSession>> {
        let now = self.inner.clock.now();
        let mut registry = self.write();
        match registry.sessions.get_mut(id) {
            Some(entry) if entry.owner == *owner => {
                entry.last_activity = now;
                Ok(Arc::clone(&entry.session))
            }
            _ => Err(Error::SessionNotFound(*id)),
        }
    }

    /// Remove and dispose `id` on behalf of `owner`.
    ///
    /// Returns `false` when there was nothing to remove.
    pub async fn remove_session(&self, owner: &OwnerId, id: &SessionId) -> bool {
        let removed = self.write().remove_owned(owner, id);
        match removed {
            Some(entry) => {
                info!("Removing session: owner={}, id={}", owner, id);
                dispose_all(vec![entry.session]).await;
                true
            }
            None => false,
        }
    }

    /// Refresh activity after a completed exchange.
    pub fn touch(&self, owner: &OwnerId, id: &SessionId) -> bool {
        let now = self.inner.clock.now();
        let mut registry = self.write();
        match registry.sessions.get_mut(id) {
            Some(entry) if entry.owner == *owner => {
                entry.last_activity = now;
                true
            }
            _ => false,
        }
    }

    /// Number of registered sessions.
    pub fn active_session_count(&self) -> usize {
        self.read().sessions.len()
    }

    /// The session currently registered for `owner`, if any.
    pub fn session_for_owner(&self, owner: &OwnerId) -> Option<SessionId> {
        self.read().owners.get(owner).copied()
    }

    /// Summaries of all sessions, oldest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let registry = self.read();
        let mut summaries: Vec<SessionSummary> = registry
            .sessions
            .iter()
            .map(|(id, entry)| SessionSummary {
                session_id: *id,
                owner: entry.owner.clone(),
                state: entry.session.state(),
                created_at: entry.session.created_at(),
                last_activity: entry.last_activity,
            })
            .collect();
        summaries.sort_by_key(|summary| summary.created_at);
        summaries
    }

    /// Evict idle sessions, then the least recently active ones while the
    /// pool is over capacity.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.inner.clock.now();
        let idle_timeout = self.inner.pool.idle_timeout();

        let (idle, over) = {
            let mut registry = self.write();
            let expired: Vec<SessionId> = registry
                .sessions
                .iter()
                .filter(|(_, entry)| idle_for(now, entry.last_activity) > idle_timeout)
                .map(|(id, _)| *id)
                .collect();
            let idle: Vec<Entry> = expired
                .iter()
                .filter_map(|id| registry.remove(id))
                .collect();
            let over = registry.shrink_to(self.inner.pool.max_sessions, None);
            (idle, over)
        };

        let report = SweepReport {
            idle_evicted: idle.iter().map(|e| e.session.id()).collect(),
            capacity_evicted: over.iter().map(|e| e.session.id()).collect(),
        };

        for entry in &idle {
            info!(
                "Evicting idle session: id={}, owner={}, idle_for={:?}",
                entry.session.id(),
                entry.owner,
                idle_for(now, entry.last_activity)
            );
        }
        for entry in &over {
            warn!(
                "Evicting session over capacity: id={}, owner={}",
                entry.session.id(),
                entry.owner
            );
        }

        dispose_all(
            idle.into_iter()
                .chain(over)
                .map(|entry| entry.session)
                .collect(),
        )
        .await;
        report
    }

    /// Start the periodic background sweep. Calling it again while running
    /// has no effect.
    pub fn start(&self) {
        let mut sweeper = self.sweeper();
        if sweeper.is_some() {
            return;
        }

        let token = self.inner.shutdown.child_token();
        let period = self.inner.pool.sweep_interval();
        let handle = tokio::spawn(run_sweeper(
            Arc::downgrade(&self.inner),
            period,
            token.clone(),
        ));
        info!("Session sweeper started: interval={:?}", period);
        *sweeper = Some(Sweeper { token, handle });
    }

    /// Stop the background sweep.
    pub fn stop(&self) {
        if let Some(sweeper) = self.sweeper().take() {
            sweeper.token.cancel();
            drop(sweeper.handle);
            info!("Session sweeper stopped");
        }
    }

    /// Whether the background sweep is running.
    pub fn is_running(&self) -> bool {
        self.sweeper()
            .as_ref()
            .map(|sweeper| !sweeper.handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop the sweeper, cancel pending initializations and dispose every
    /// session. The pool accepts no new sessions afterwards.
    pub async fn shutdown(&self) {
        self.stop();
        self.inner.shutdown.cancel();

        let sessions: Vec<Arc<InteractiveSession>> = {
            let mut registry = self.write();
            registry.owners.clear();
            registry.sessions.drain().map(|(_, e)| e.session).collect()
        };
        info!("Shutting down session pool: {} sessions", sessions.len());
        dispose_all(sessions).await;
    }
}

fn idle_for(now: DateTime<Utc>, last_activity: DateTime<Utc>) -> Duration {
    (now - last_activity).to_std().unwrap_or_default()
}

async fn dispose_all(sessions: Vec<Arc<InteractiveSession>>) {
    let results = futures::future::join_all(sessions.iter().map(|s| s.dispose())).await;
    for (session, result) in sessions.iter().zip(results) {
        if let Err(e) = result {
            warn!("Failed to dispose session: id={}, {}", session.id(), e);
        }
    }
}

async fn run_sweeper(pool: Weak<PoolInner>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Session sweeper cancelled");
                break;
            }
            _ = ticker.tick() => {
                let Some(inner) = pool.upgrade() else {
                    break;
                };
                let report = SessionPool { inner }.sweep().await;
                if report.total() > 0 {
                    info!(
                        "Sweep evicted {} idle and {} over-capacity sessions",
                        report.idle_evicted.len(),
                        report.capacity_evicted.len()
                    );
                }
            }
        }
    }
}
