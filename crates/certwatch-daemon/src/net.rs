//! Connectivity probe and watch.
//!
//! The kernel exposes per-interface link state under
//! `/sys/class/net/<iface>/operstate`; the device counts as online when any
//! non-loopback interface reports `up`. A [`RetryTimer`] drives the
//! periodic re-probe and pushes transitions into the sink — the same push
//! contract a platform bus subscription would fulfil.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use certwatch_core::net::NetworkMonitor;
use certwatch_core::timer::{RetryTimer, Tick};
use tracing::{debug, warn};

pub struct OperstateMonitor {
    sys_net: PathBuf,
}

impl OperstateMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(Path::new("/sys/class/net"))
    }

    /// Probe an alternate tree; tests point this at a scratch directory.
    #[must_use]
    pub fn with_root(sys_net: &Path) -> Self {
        Self {
            sys_net: sys_net.to_path_buf(),
        }
    }

    /// Start polling for transitions. `initial` is the state already
    /// reported to the worker; only changes relative to it are pushed.
    /// Returns the timer so the caller can stop the watch at shutdown.
    pub fn watch<F>(self: Arc<Self>, interval: Duration, initial: bool, sink: F) -> RetryTimer
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let last = AtomicBool::new(initial);
        let timer = RetryTimer::new(move || {
            let online = self.is_online();
            if last.swap(online, Ordering::SeqCst) != online {
                debug!(online, "connectivity changed");
                sink(online);
            }
            Tick::Continue
        });
        timer.start(interval);
        timer
    }
}

impl Default for OperstateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor for OperstateMonitor {
    /// Any non-loopback interface in `up` state counts as online. An
    /// unreadable tree answers offline — the worker then waits for the
    /// first pushed transition.
    fn is_online(&self) -> bool {
        let entries = match std::fs::read_dir(&self.sys_net) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, path = %self.sys_net.display(), "cannot probe network state");
                return false;
            }
        };

        for entry in entries.flatten() {
            if entry.file_name() == "lo" {
                continue;
            }
            let operstate = entry.path().join("operstate");
            match std::fs::read_to_string(&operstate) {
                Ok(state) if state.trim() == "up" => return true,
                Ok(_) | Err(_) => {}
            }
        }
        false
    }
}
