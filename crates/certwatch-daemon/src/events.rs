//! Package event ingestion.
//!
//! The platform reports package operations in two phases: a begin
//! notification when the operation starts and an end notification carrying
//! the result. Only a begin matched by a successful end is worth a queue
//! event — failed or orphaned ends are dropped. [`PackageEventBridge`] does
//! that pairing; [`PackageFeed`] is the transport, a line-oriented unix
//! socket the platform integration writes JSON notices to.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use certwatch_core::app::{App, UNKNOWN_APP_ID};
use certwatch_core::event::Event;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageOperation {
    Install,
    Uninstall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackagePhase {
    Begin,
    EndOk,
    EndFail,
}

/// One raw platform notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageNotice {
    pub uid: i64,
    pub pkg_id: String,
    pub operation: PackageOperation,
    pub phase: PackagePhase,
}

/// Pairs begin/end notices per `(uid, pkg_id)` and emits a queue event for
/// each confirmed operation. The notification names the package only, so
/// the emitted app carries the [`UNKNOWN_APP_ID`] placeholder.
#[derive(Default)]
pub struct PackageEventBridge {
    pending: Mutex<HashMap<(i64, String), PackageOperation>>,
}

impl PackageEventBridge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notice through the pairing logic; returns the queue event
    /// when the notice completes an operation.
    pub fn handle(&self, notice: PackageNotice) -> Option<Event> {
        let key = (notice.uid, notice.pkg_id.clone());
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match notice.phase {
            PackagePhase::Begin => {
                // A repeated begin for the same package supersedes the
                // earlier one (rapid reinstall).
                pending.insert(key, notice.operation);
                None
            }
            PackagePhase::EndFail => {
                if pending.remove(&key).is_none() {
                    debug!(pkg = %notice.pkg_id, uid = notice.uid, "end-fail without begin");
                }
                None
            }
            PackagePhase::EndOk => {
                let Some(operation) = pending.remove(&key) else {
                    debug!(pkg = %notice.pkg_id, uid = notice.uid, "end without begin, dropping");
                    return None;
                };
                let app = App::new(UNKNOWN_APP_ID, &notice.pkg_id, notice.uid, Vec::new());
                debug!(pkg = %notice.pkg_id, uid = notice.uid, ?operation, "package operation confirmed");
                Some(match operation {
                    PackageOperation::Install => Event::install(app),
                    PackageOperation::Uninstall => Event::uninstall(app),
                })
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("cannot bind event socket {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Unix socket feed of newline-delimited JSON [`PackageNotice`] records.
///
/// Each accepted connection is read to EOF on the listener thread; the
/// platform integration is a single writer that connects per batch of
/// notices and closes, so there is no need for per-connection threads and
/// shutdown never waits on an idle connection.
pub struct PackageFeed {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PackageFeed {
    /// Bind the socket and start the listener thread. Every decoded notice
    /// goes through `bridge`; resulting events are handed to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Bind`] when the socket cannot be created.
    pub fn spawn<F>(
        path: &Path,
        bridge: Arc<PackageEventBridge>,
        sink: F,
    ) -> Result<Self, FeedError>
    where
        F: Fn(Event) + Send + 'static,
    {
        // A stale socket file from an unclean shutdown would make bind fail.
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        let listener = UnixListener::bind(path).map_err(|source| FeedError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| FeedError::Bind {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), "package event socket listening");

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let join = std::thread::Builder::new()
            .name("certwatch-pkg-feed".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            // Switch the accepted stream back to blocking
                            // reads; the writer closes when done.
                            let _ = stream.set_nonblocking(false);
                            let reader = BufReader::new(stream);
                            for line in reader.lines() {
                                let Ok(line) = line else { break };
                                if line.trim().is_empty() {
                                    continue;
                                }
                                match serde_json::from_str::<PackageNotice>(&line) {
                                    Ok(notice) => {
                                        if let Some(event) = bridge.handle(notice) {
                                            sink(event);
                                        }
                                    }
                                    Err(err) => {
                                        warn!(%err, "unparseable package notice, skipping");
                                    }
                                }
                            }
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            std::thread::sleep(Duration::from_millis(100));
                        }
                        Err(err) => {
                            warn!(%err, "event socket accept failed");
                            std::thread::sleep(Duration::from_millis(100));
                        }
                    }
                }
            })
            .map_err(|source| FeedError::Bind {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            stop,
            join: Some(join),
        })
    }

    /// Stop the listener thread and remove the socket file.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for PackageFeed {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}
