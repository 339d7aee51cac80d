//! Lifecycle of the single shared browser engine.
//!
//! The engine is launched lazily on first demand. Concurrent acquirers during
//! a launch await the same shared future, so at most one launch is ever in
//! flight. The session is closed after a period without activity and is
//! recycled after a number of uses, but only when no task holds it and
//! nothing is waiting in the queue.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::scraper::{BrowserHandle, BrowserLauncher, ContextOptions, QueueActivity, RemotePage, ScrapeError};

type LaunchResult = Result<Arc<dyn BrowserHandle>, ScrapeError>;
type LaunchFuture = Shared<BoxFuture<'static, LaunchResult>>;

/// Attempts to obtain a session before giving up when it keeps vanishing mid-launch
const MAX_ACQUIRE_ROUNDS: usize = 3;

struct Session {
    handle: Arc<dyn BrowserHandle>,
    created_at: Instant,
    use_count: u64,
    leases: usize,
    generation: u64,
}

#[derive(Default)]
struct State {
    session: Option<Session>,
    launching: Option<(u64, LaunchFuture)>,
    next_generation: u64,
    idle_timer: Option<JoinHandle<()>>,
}

struct Inner {
    launcher: Arc<dyn BrowserLauncher>,
    activity: Arc<dyn QueueActivity>,
    recycle_after_uses: u64,
    idle_timeout: Duration,
    launches: AtomicU64,
    state: Mutex<State>,
}

/// Snapshot of the current session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub generation: u64,
    pub use_count: u64,
    pub leases: usize,
    pub age: Duration,
}

/// Owns the shared browser; cheap to clone
#[derive(Clone)]
pub struct BrowserManager {
    inner: Arc<Inner>,
}

/// A task's claim on the current session, released on drop
pub struct BrowserLease {
    handle: Arc<dyn BrowserHandle>,
    generation: u64,
    inner: Arc<Inner>,
}

impl BrowserLease {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn handle(&self) -> &Arc<dyn BrowserHandle> {
        &self.handle
    }

    pub async fn open_context(&self, options: &ContextOptions) -> Result<Box<dyn RemotePage>, ScrapeError> {
        self.handle.open_context(options).await
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        self.inner.release(self.generation);
    }
}

fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(future);
        }
        Err(_) => warn!("No runtime available for background browser work"),
    }
}

fn close_in_background(handle: Arc<dyn BrowserHandle>) {
    spawn_detached(async move { handle.close().await });
}

impl BrowserManager {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        activity: Arc<dyn QueueActivity>,
        recycle_after_uses: u64,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                launcher,
                activity,
                recycle_after_uses: recycle_after_uses.max(1),
                idle_timeout,
                launches: AtomicU64::new(0),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Get a lease on the running browser, launching it if needed
    pub async fn acquire(&self) -> Result<BrowserLease, ScrapeError> {
        for _ in 0..MAX_ACQUIRE_ROUNDS {
            let (generation, launch) = {
                let mut state = self.inner.lock();
                if let Some(lease) = self.inner.try_lease(&mut state) {
                    return Ok(lease);
                }
                match &state.launching {
                    Some((generation, launch)) => {
                        debug!("Joining in-flight browser launch (generation {})", generation);
                        (*generation, launch.clone())
                    }
                    None => self.inner.start_launch(&mut state),
                }
            };

            launch.await?;

            let mut state = self.inner.lock();
            if state.session.as_ref().map(|s| s.generation) == Some(generation) {
                if let Some(lease) = self.inner.try_lease(&mut state) {
                    return Ok(lease);
                }
            }
            debug!("Browser generation {} went away before it could be leased", generation);
        }

        Err(ScrapeError::Browser(
            "browser session kept disappearing during launch".to_string(),
        ))
    }

    /// Close the session now; the next acquire launches a fresh one
    pub async fn shutdown(&self) {
        let session = {
            let mut state = self.inner.lock();
            state.launching = None;
            if let Some(timer) = state.idle_timer.take() {
                timer.abort();
            }
            state.session.take()
        };

        if let Some(session) = session {
            info!(
                "Shutting down browser (generation {}, {} uses)",
                session.generation, session.use_count
            );
            session.handle.close().await;
        }
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        let state = self.inner.lock();
        state.session.as_ref().map(|s| SessionInfo {
            generation: s.generation,
            use_count: s.use_count,
            leases: s.leases,
            age: s.created_at.elapsed(),
        })
    }

    /// Launches started since construction
    pub fn launch_count(&self) -> u64 {
        self.inner.launches.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // State stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lease the current session, first dropping it if it died or is due for recycling
    fn try_lease(self: &Arc<Self>, state: &mut State) -> Option<BrowserLease> {
        if let Some(session) = &state.session {
            if !session.handle.is_connected() {
                warn!(
                    "Browser generation {} disconnected, will relaunch",
                    session.generation
                );
                if let Some(dead) = state.session.take() {
                    close_in_background(dead.handle);
                }
            } else if session.leases == 0
                && session.use_count >= self.recycle_after_uses
                && self.activity.pending_count() == 0
            {
                info!(
                    "Recycling browser generation {} after {} uses",
                    session.generation, session.use_count
                );
                if let Some(old) = state.session.take() {
                    close_in_background(old.handle);
                }
            }
        }

        let session = state.session.as_mut()?;
        session.use_count += 1;
        session.leases += 1;
        let lease = BrowserLease {
            handle: session.handle.clone(),
            generation: session.generation,
            inner: self.clone(),
        };
        self.arm_idle_timer(state);
        Some(lease)
    }

    fn start_launch(self: &Arc<Self>, state: &mut State) -> (u64, LaunchFuture) {
        let generation = state.next_generation;
        state.next_generation += 1;
        self.launches.fetch_add(1, Ordering::SeqCst);

        let inner = self.clone();
        // Spawned so the launch finishes and installs the session even if every caller gives up
        let task = tokio::spawn(async move {
            info!("Launching browser (generation {})", generation);
            let result = inner.launcher.launch().await;

            let mut state = inner.lock();
            let current = matches!(&state.launching, Some((g, _)) if *g == generation);
            if current {
                state.launching = None;
            }

            match &result {
                Ok(handle) if current => {
                    state.session = Some(Session {
                        handle: handle.clone(),
                        created_at: Instant::now(),
                        use_count: 0,
                        leases: 0,
                        generation,
                    });
                    inner.arm_idle_timer(&mut state);
                    info!("Browser generation {} ready", generation);
                }
                Ok(handle) => {
                    debug!("Discarding browser generation {} launched during shutdown", generation);
                    close_in_background(handle.clone());
                }
                Err(e) => warn!("Browser launch failed: {}", e),
            }

            result
        });

        let launch: BoxFuture<'static, LaunchResult> = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Browser launch task failed: {}", e);
                    Err(ScrapeError::Browser(format!("launch task failed: {}", e)))
                }
            }
        }
        .boxed();
        let launch = launch.shared();

        state.launching = Some((generation, launch.clone()));
        (generation, launch)
    }

    fn release(self: &Arc<Self>, generation: u64) {
        let mut state = self.lock();

        let Some(session) = state.session.as_mut().filter(|s| s.generation == generation) else {
            // The session this lease belonged to is already gone
            return;
        };
        session.leases = session.leases.saturating_sub(1);
        if session.leases > 0 {
            return;
        }

        if session.use_count >= self.recycle_after_uses && self.activity.pending_count() == 0 {
            info!(
                "Recycling browser generation {} after {} uses",
                session.generation, session.use_count
            );
            if let Some(old) = state.session.take() {
                close_in_background(old.handle);
            }
            if let Some(timer) = state.idle_timer.take() {
                timer.abort();
            }
            return;
        }

        self.arm_idle_timer(&mut state);
    }

    fn arm_idle_timer(self: &Arc<Self>, state: &mut State) {
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
        if state.session.is_none() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak: Weak<Inner> = Arc::downgrade(self);
        let timeout = self.idle_timeout;
        state.idle_timer = Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_idle_timeout().await;
            }
        }));
    }

    async fn on_idle_timeout(self: &Arc<Self>) {
        let session = {
            let mut state = self.lock();
            state.idle_timer = None;

            let busy = match &state.session {
                None => return,
                Some(session) => session.leases > 0 || !self.activity.is_idle(),
            };
            if busy {
                debug!("Browser idle timer fired while busy, re-arming");
                self.arm_idle_timer(&mut state);
                return;
            }
            state.session.take()
        };

        if let Some(session) = session {
            info!(
                "Closing browser generation {} after {:?} idle",
                session.generation, self.idle_timeout
            );
            session.handle.close().await;
        }
    }
}
