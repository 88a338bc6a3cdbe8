//! Durable store contract.
//!
//! Storage answers one question across restarts: which apps still need a
//! verification decision. The worker keeps the in-memory buffer and the
//! store in lockstep; at startup `load_all` rebuilds the buffer, which is
//! also how any divergence from a crash between the two self-heals.

use thiserror::Error;

use crate::app::{App, Verified};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
}

/// Durable CRUD for tracked apps and the OCSP issuer-URL cache.
///
/// Implementations are only ever called from one thread at a time (the
/// worker, plus the startup load), but must be `Send + Sync` so the daemon
/// can share one handle between setup and the worker.
pub trait AppStore: Send + Sync {
    /// Insert an app into the check list.
    ///
    /// Returns `Ok(false)` when the identity triple is already present, in
    /// which case the stored row — including its `verified` state — is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Storage failures are reported but are non-fatal to the caller: the
    /// worker logs and keeps tracking the app in memory.
    fn insert(&self, app: &App) -> Result<bool, StoreError>;

    /// Remove an app and its certificate rows. Removing an unknown identity
    /// is a no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete statement itself fails.
    fn remove(&self, app: &App) -> Result<(), StoreError>;

    /// Persist a verification-state advance so it survives restart.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update fails.
    fn mark_verified(&self, app: &App, verified: Verified) -> Result<(), StoreError>;

    /// Load every tracked app, chains reassembled in certificate order.
    /// Used once at startup to seed the verification buffer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read; setup treats
    /// this as fatal.
    fn load_all(&self) -> Result<Vec<App>, StoreError>;

    /// Look up the cached OCSP responder URL for an issuer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn ocsp_url(&self, issuer: &str) -> Result<Option<String>, StoreError>;

    /// Insert or refresh a cached responder URL. The entry is only updated
    /// when `date` is strictly newer than the stored one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the upsert fails.
    fn set_ocsp_url(&self, issuer: &str, url: &str, date: i64) -> Result<(), StoreError>;
}
