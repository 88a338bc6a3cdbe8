//! Install/uninstall events.
//!
//! Events are transient triggers produced by the platform package bridge and
//! consumed exactly once by the worker; they are never persisted. An
//! uninstall event may carry empty signatures and the [`UNKNOWN_APP_ID`]
//! placeholder since removal only needs the identity triple.
//!
//! [`UNKNOWN_APP_ID`]: crate::app::UNKNOWN_APP_ID

use crate::app::App;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Install,
    Uninstall,
}

/// One package-manager notification, immutable once enqueued.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub app: App,
}

impl Event {
    #[must_use]
    pub const fn new(kind: EventKind, app: App) -> Self {
        Self { kind, app }
    }

    #[must_use]
    pub fn install(app: App) -> Self {
        Self::new(EventKind::Install, app)
    }

    #[must_use]
    pub fn uninstall(app: App) -> Self {
        Self::new(EventKind::Uninstall, app)
    }
}
