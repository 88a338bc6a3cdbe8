//! The verification worker.
//!
//! One long-lived background thread owns every mutation of the verification
//! buffer. Producers hand it work through [`WorkerHandle::push_event`] and
//! [`WorkerHandle::set_online`]; a single mutex/condvar pair carries the
//! wake predicate: sleep while the queue is empty, no verification kick is
//! pending and no stop was requested.
//!
//! Each wake runs at most one drain pass (queue → buffer + store) followed
//! by at most one verification pass (classifier/prompt over a snapshot of
//! the buffer). A pass that leaves apps pending arms the [`RetryTimer`]
//! instead of looping back into verification synchronously, so `CheckAgain`
//! apps are retried on a bounded cadence rather than in a busy loop.
//!
//! Shutdown drains already-queued events one final time and never starts a
//! fresh verification pass, which keeps `join` prompt: the only thing that
//! can delay it is a collaborator call already in flight.

#[cfg(test)]
mod tests;

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::app::{App, Verified};
use crate::event::{Event, EventKind};
use crate::prompt::{Decision, UserPrompt};
use crate::queue::EventQueue;
use crate::store::AppStore;
use crate::timer::{RetryTimer, Tick};
use crate::verify::{CertVerifier, OcspVerdict};

/// Progress counters, maintained under the worker lock. Primarily an
/// observability surface; tests also key off them.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerStats {
    /// Events moved from the queue into buffer/store.
    pub events_drained: u64,
    /// Buffer entries visited by verification passes.
    pub apps_checked: u64,
    /// Completed verification passes.
    pub passes: u64,
}

struct State {
    buffer: Vec<App>,
    online: bool,
    /// Edge flag: a verification pass became possible (online transition or
    /// retry tick). Consumed on wake.
    kick: bool,
    stop: bool,
    /// True while the worker is parked on the condvar.
    idle: bool,
    stats: WorkerStats,
}

struct Shared {
    queue: EventQueue,
    state: Mutex<State>,
    wake: Condvar,
    /// Notified whenever the worker parks; `wait_quiescent` waits here.
    quiesce: Condvar,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        // Poisoning here could only come from a panicked test thread; the
        // state itself stays coherent, so keep going with it.
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn push_event(&self, event: Event) {
        // Taking the state lock pairs the push with the wake predicate, so
        // the worker cannot check emptiness between our push and notify.
        let st = self.state();
        self.queue.push(event);
        self.wake.notify_one();
        drop(st);
    }

    fn set_online(&self, online: bool) {
        let mut st = self.state();
        let was_online = st.online;
        st.online = online;
        if online && !was_online {
            debug!("network online, waking worker");
            st.kick = true;
            self.wake.notify_one();
        } else if !online && was_online {
            debug!("network offline");
        }
    }
}

/// The worker's collaborators plus scheduling parameters. `spawn` moves it
/// onto the background thread.
pub struct Worker {
    verifier: Arc<dyn CertVerifier>,
    store: Arc<dyn AppStore>,
    prompt: Arc<dyn UserPrompt>,
    retry_interval: Duration,
}

impl Worker {
    #[must_use]
    pub fn new(
        verifier: Arc<dyn CertVerifier>,
        store: Arc<dyn AppStore>,
        prompt: Arc<dyn UserPrompt>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            verifier,
            store,
            prompt,
            retry_interval,
        }
    }

    /// Start the worker thread with a pre-seeded buffer (from
    /// `AppStore::load_all`) and the initial connectivity state.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the thread cannot be spawned.
    pub fn spawn(self, seed: Vec<App>, online: bool) -> io::Result<WorkerHandle> {
        let shared = Arc::new(Shared {
            queue: EventQueue::new(),
            state: Mutex::new(State {
                buffer: seed,
                online,
                kick: online,
                stop: false,
                idle: false,
                stats: WorkerStats::default(),
            }),
            wake: Condvar::new(),
            quiesce: Condvar::new(),
        });

        let timer = {
            let shared = Arc::clone(&shared);
            RetryTimer::new(move || {
                let mut st = shared.state();
                if st.buffer.is_empty() {
                    debug!("retry tick: buffer empty");
                    Tick::Stop
                } else {
                    debug!(pending = st.buffer.len(), "retry tick: waking worker");
                    st.kick = true;
                    shared.wake.notify_one();
                    Tick::Continue
                }
            })
        };

        let runner = Runner {
            shared: Arc::clone(&shared),
            verifier: self.verifier,
            store: self.store,
            prompt: self.prompt,
            timer: timer.clone(),
            retry_interval: self.retry_interval,
        };
        let join = std::thread::Builder::new()
            .name("certwatch-worker".to_string())
            .spawn(move || runner.run())?;

        Ok(WorkerHandle {
            shared,
            timer,
            join: Some(join),
        })
    }
}

/// Producer-side handle: push events, report connectivity, inspect state,
/// shut down.
pub struct WorkerHandle {
    shared: Arc<Shared>,
    timer: RetryTimer,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Enqueue a package event and wake the worker. Never fails; the queue
    /// is unbounded and the worker drains it on its next cycle.
    pub fn push_event(&self, event: Event) {
        self.shared.push_event(event);
    }

    /// Report a connectivity transition. An offline→online edge makes a
    /// verification pass possible and wakes the worker.
    pub fn set_online(&self, online: bool) {
        self.shared.set_online(online);
    }

    /// Cheap cloneable producer endpoint for event sources; carries no
    /// join handle and cannot shut the worker down.
    #[must_use]
    pub fn producer(&self) -> WorkerRef {
        WorkerRef {
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.shared.state().online
    }

    /// Snapshot of the verification buffer. Only meaningful after
    /// [`Self::wait_quiescent`] when exactness matters.
    #[must_use]
    pub fn pending_apps(&self) -> Vec<App> {
        self.shared.state().buffer.clone()
    }

    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.shared.state().stats
    }

    /// Whether the retry timer is currently armed.
    #[must_use]
    pub fn retry_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// Block until the worker is parked with nothing left to do (empty
    /// queue, no pending kick), or until `timeout` elapses. Returns whether
    /// quiescence was reached.
    pub fn wait_quiescent(&self, timeout: Duration) -> bool {
        self.wait_stats(timeout, |_| true)
    }

    /// Like [`Self::wait_quiescent`], additionally requiring `pred` on the
    /// progress counters. Lets tests wait for "quiescent after at least N
    /// passes" without sleeping.
    pub fn wait_stats<F>(&self, timeout: Duration, pred: F) -> bool
    where
        F: Fn(&WorkerStats) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.state();
        loop {
            if st.idle && self.shared.queue.is_empty() && !st.kick && pred(&st.stats) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .quiesce
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            st = guard;
        }
    }

    /// Request shutdown without blocking. The worker drains already-queued
    /// events once more and exits without a fresh verification pass.
    pub fn request_stop(&self) {
        let mut st = self.shared.state();
        st.stop = true;
        self.shared.wake.notify_one();
    }

    /// Stop the worker and its retry timer, then join the thread.
    pub fn shutdown(mut self) {
        self.request_stop();
        self.timer.stop();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("worker thread panicked before join");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.request_stop();
            self.timer.stop();
            if let Some(join) = self.join.take() {
                let _ = join.join();
            }
        }
    }
}

/// Producer-only view of the worker, handed to event sources.
#[derive(Clone)]
pub struct WorkerRef {
    shared: Arc<Shared>,
}

impl WorkerRef {
    pub fn push_event(&self, event: Event) {
        self.shared.push_event(event);
    }

    pub fn set_online(&self, online: bool) {
        self.shared.set_online(online);
    }
}

/// What a verification step decided about one app.
enum AppOutcome {
    Resolved,
    Pending,
}

struct Runner {
    shared: Arc<Shared>,
    verifier: Arc<dyn CertVerifier>,
    store: Arc<dyn AppStore>,
    prompt: Arc<dyn UserPrompt>,
    timer: RetryTimer,
    retry_interval: Duration,
}

impl Runner {
    fn run(&self) {
        info!("verification worker started");
        loop {
            let mut st = self.shared.state();
            while !st.stop && self.shared.queue.is_empty() && !st.kick {
                st.idle = true;
                self.shared.quiesce.notify_all();
                debug!(
                    online = st.online,
                    pending = st.buffer.len(),
                    "worker waiting"
                );
                st = self
                    .shared
                    .wake
                    .wait(st)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            st.idle = false;
            st.kick = false;
            let stopping = st.stop;

            self.drain(&mut st);

            if stopping {
                break;
            }

            let online = st.online;
            let pending = st.buffer.len();
            drop(st);

            if online && pending > 0 {
                self.verify_pass();

                let mut st = self.shared.state();
                st.stats.passes += 1;
                let pending = st.buffer.len();
                let still_online = st.online;
                drop(st);

                if pending == 0 {
                    info!("verification buffer fully resolved");
                    self.timer.stop();
                } else if still_online {
                    debug!(pending, "apps still pending, arming retry timer");
                    self.timer.start(self.retry_interval);
                } else {
                    // Went offline during the pass; the next online
                    // transition wakes us anyway.
                    self.timer.stop();
                }
            } else if !online {
                debug!("offline, skipping verification pass");
                // No point ticking while offline; the online transition is
                // the wake source now.
                self.timer.stop();
            }
        }

        // Unblock quiescence waiters before the thread goes away.
        let mut st = self.shared.state();
        st.idle = true;
        self.shared.quiesce.notify_all();
        drop(st);
        info!("verification worker stopped");
    }

    /// Move every queued event into buffer + store, in arrival order.
    fn drain(&self, st: &mut State) {
        while let Some(event) = self.shared.queue.pop() {
            self.apply_event(st, event);
            st.stats.events_drained += 1;
        }
    }

    fn apply_event(&self, st: &mut State, event: Event) {
        match event.kind {
            EventKind::Install => {
                let mut app = event.app;
                match self.verifier.signatures(&app) {
                    Ok(bundle) => {
                        app.signatures = bundle.chains;
                        for entry in bundle.ocsp_urls {
                            if let Err(err) =
                                self.store.set_ocsp_url(&entry.issuer, &entry.url, entry.date)
                            {
                                warn!(issuer = %entry.issuer, %err, "failed to cache responder url");
                            }
                        }
                    }
                    Err(err) => {
                        warn!(%app, %err, "signature extraction failed, tracking as-is");
                    }
                }
                self.add_app(st, app);
            }
            EventKind::Uninstall => self.remove_app(st, &event.app),
        }
    }

    /// Store first, then buffer; a storage failure must not stop in-memory
    /// tracking. Duplicate identities are skipped.
    fn add_app(&self, st: &mut State, app: App) {
        match self.store.insert(&app) {
            Ok(true) => {}
            Ok(false) => debug!(%app, "already in store"),
            Err(err) => error!(%app, %err, "store insert failed, tracking in memory only"),
        }

        if st.buffer.iter().any(|entry| entry.same_identity(&app)) {
            debug!(%app, "already buffered, skipping duplicate");
            return;
        }
        st.buffer.push(app);
    }

    fn remove_app(&self, st: &mut State, app: &App) {
        if let Err(err) = self.store.remove(app) {
            error!(%app, %err, "store remove failed");
        }
        if let Some(pos) = st.buffer.iter().position(|entry| entry.same_identity(app)) {
            st.buffer.remove(pos);
        }
    }

    /// One full pass over a snapshot of the buffer. Collaborator calls run
    /// with the lock released; each entry's outcome is applied under the
    /// lock before moving to the next.
    fn verify_pass(&self) {
        let snapshot = self.shared.state().buffer.clone();
        debug!(apps = snapshot.len(), "verification pass");

        for mut app in snapshot {
            let outcome = self.process_app(&mut app);

            let mut st = self.shared.state();
            match outcome {
                AppOutcome::Resolved => self.remove_app(&mut st, &app),
                AppOutcome::Pending => {
                    // Carry a state advance (Unknown -> No) back into the
                    // live entry so the next pass goes straight to the
                    // prompt.
                    if let Some(live) = st
                        .buffer
                        .iter_mut()
                        .find(|entry| entry.same_identity(&app))
                    {
                        live.verified = app.verified;
                    }
                }
            }
            st.stats.apps_checked += 1;
        }
    }

    fn process_app(&self, app: &mut App) -> AppOutcome {
        // Already flagged revoked: the OCSP answer is known, only the user
        // decision is outstanding.
        if app.verified == Verified::No {
            debug!(%app, "flagged revoked earlier, asking user again");
            return self.ask_user(app);
        }

        match self.verifier.check_ocsp(app) {
            OcspVerdict::Ok => {
                debug!(%app, "ocsp verified");
                AppOutcome::Resolved
            }
            OcspVerdict::CertError => {
                debug!(%app, "chains cannot be verified, dropping");
                AppOutcome::Resolved
            }
            OcspVerdict::CheckAgain => {
                debug!(%app, "responder unavailable, will check again");
                AppOutcome::Pending
            }
            OcspVerdict::Revoked => {
                info!(%app, "certificate revoked");
                app.verified = Verified::No;
                if let Err(err) = self.store.mark_verified(app, Verified::No) {
                    error!(%app, %err, "failed to persist revoked state");
                }
                self.ask_user(app)
            }
        }
    }

    fn ask_user(&self, app: &App) -> AppOutcome {
        match self.prompt.ask(app) {
            Ok(Decision::Uninstall) => {
                info!(%app, "user chose uninstall");
                AppOutcome::Resolved
            }
            Ok(Decision::Keep) => {
                info!(%app, "user kept the app");
                AppOutcome::Resolved
            }
            Err(err) => {
                warn!(%app, %err, "prompt unavailable, app stays pending");
                AppOutcome::Pending
            }
        }
    }
}
