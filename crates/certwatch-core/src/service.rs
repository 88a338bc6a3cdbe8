//! Daemon assembly and lifecycle.
//!
//! [`Service`] ties the collaborators together: it seeds the verification
//! buffer from storage, queries initial connectivity, starts the worker
//! thread and later runs the ordered shutdown sequence. `setup` is guarded
//! — calling it twice is a caller bug, answered with an error instead of a
//! second initialization.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::net::NetworkMonitor;
use crate::prompt::UserPrompt;
use crate::store::{AppStore, StoreError};
use crate::verify::CertVerifier;
use crate::worker::{Worker, WorkerHandle};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("setup was already called")]
    AlreadyInitialized,
    #[error("cannot load check list from storage: {0}")]
    Store(#[from] StoreError),
    #[error("cannot start worker thread: {0}")]
    Thread(#[from] std::io::Error),
}

pub struct Service {
    verifier: Arc<dyn CertVerifier>,
    store: Arc<dyn AppStore>,
    prompt: Arc<dyn UserPrompt>,
    network: Arc<dyn NetworkMonitor>,
    retry_interval: Duration,
    worker: Option<WorkerHandle>,
}

impl Service {
    #[must_use]
    pub fn new(
        verifier: Arc<dyn CertVerifier>,
        store: Arc<dyn AppStore>,
        prompt: Arc<dyn UserPrompt>,
        network: Arc<dyn NetworkMonitor>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            verifier,
            store,
            prompt,
            network,
            retry_interval,
            worker: None,
        }
    }

    /// Seed the buffer from storage and start the worker thread.
    ///
    /// # Errors
    ///
    /// Fails when storage cannot be read or the thread cannot be spawned;
    /// on failure no worker is running. A second call returns
    /// [`SetupError::AlreadyInitialized`] without side effects.
    pub fn setup(&mut self) -> Result<(), SetupError> {
        if self.worker.is_some() {
            warn!("setup called twice");
            return Err(SetupError::AlreadyInitialized);
        }

        let seed = self.store.load_all()?;
        info!(apps = seed.len(), "loaded check list from storage");

        let online = self.network.is_online();
        debug!(online, "initial connectivity state");

        let worker = Worker::new(
            Arc::clone(&self.verifier),
            Arc::clone(&self.store),
            Arc::clone(&self.prompt),
            self.retry_interval,
        )
        .spawn(seed, online)?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Handle for producers (package bridge, network monitor). `None`
    /// before a successful `setup`.
    #[must_use]
    pub fn worker(&self) -> Option<&WorkerHandle> {
        self.worker.as_ref()
    }

    /// Ordered shutdown: stop the worker (which drains queued events one
    /// last time) and join its thread. Safe to call without a prior setup.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            info!("shutting down verification worker");
            worker.shutdown();
        }
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.shutdown();
    }
}
