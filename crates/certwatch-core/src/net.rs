//! Network connectivity probe contract.
//!
//! Verification passes only make sense online, so the worker keeps an
//! online flag fed by whatever connectivity source the daemon wires up.
//! The trait covers the synchronous startup query; ongoing transitions are
//! pushed straight into [`Worker::set_online`].
//!
//! [`Worker::set_online`]: crate::worker::WorkerHandle::set_online

pub trait NetworkMonitor: Send + Sync {
    /// Current connectivity, queried once at startup. Implementations
    /// should answer `false` when the state cannot be determined — the
    /// worker then simply waits for the first online transition.
    fn is_online(&self) -> bool;
}
