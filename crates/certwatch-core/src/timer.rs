//! Periodic retry timer.
//!
//! While apps sit in the buffer with a `CheckAgain` verdict, nothing else
//! would ever wake the worker: no new package event, no network transition.
//! The timer closes that gap. It never touches the buffer itself — its job
//! only signals the worker's wake condition, so buffer ownership stays with
//! the worker thread.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error};

/// What the job tells the timer after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    /// Disarm: nothing left that needs periodic retries.
    Stop,
}

struct TimerState {
    armed: bool,
    stop: bool,
}

struct TimerInner {
    state: Mutex<TimerState>,
    cv: Condvar,
}

/// Re-armable interval timer running a job on a dedicated thread.
///
/// `start` while armed is a no-op; `stop` interrupts the interval sleep
/// promptly instead of waiting it out. The first tick fires one full
/// interval after arming — the worker has just finished a pass when it arms
/// the timer, so an immediate tick would only repeat work.
#[derive(Clone)]
pub struct RetryTimer {
    inner: Arc<TimerInner>,
    job: Arc<dyn Fn() -> Tick + Send + Sync>,
}

impl RetryTimer {
    pub fn new<F>(job: F) -> Self
    where
        F: Fn() -> Tick + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(TimerInner {
                state: Mutex::new(TimerState {
                    armed: false,
                    stop: false,
                }),
                cv: Condvar::new(),
            }),
            job: Arc::new(job),
        }
    }

    /// Arm the timer. No-op when already armed.
    pub fn start(&self, interval: Duration) {
        {
            let mut st = self.lock();
            st.stop = false;
            if st.armed {
                return;
            }
            st.armed = true;
        }
        debug!(interval_secs = interval.as_secs(), "retry timer armed");

        let inner = Arc::clone(&self.inner);
        let job = Arc::clone(&self.job);
        let spawned = std::thread::Builder::new()
            .name("certwatch-retry-timer".to_string())
            .spawn(move || Self::run(&inner, &job, interval));
        if let Err(err) = spawned {
            error!(%err, "failed to spawn retry timer thread");
            self.lock().armed = false;
        }
    }

    /// Disarm the timer and interrupt its sleep.
    pub fn stop(&self) {
        let mut st = self.lock();
        if !st.armed {
            return;
        }
        st.stop = true;
        self.inner.cv.notify_all();
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    fn run(inner: &Arc<TimerInner>, job: &Arc<dyn Fn() -> Tick + Send + Sync>, interval: Duration) {
        loop {
            let deadline = Instant::now() + interval;
            let mut st = inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            loop {
                if st.stop {
                    st.armed = false;
                    debug!("retry timer stopped");
                    return;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (guard, _) = inner
                    .cv
                    .wait_timeout(st, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner);
                st = guard;
            }
            drop(st);

            if job() == Tick::Stop {
                let mut st = inner
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                st.armed = false;
                debug!("retry timer disarmed by job");
                return;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
