//! User decision prompt contract.
//!
//! Only revoked apps ever reach the prompt. Whatever the backend is — a
//! native dialog, a forked popup process, a remote call — the worker sees a
//! single blocking question with three outcomes: keep, uninstall, or a
//! failure/timeout that leaves the app pending for a later re-ask. Asking
//! again for the same app must be side-effect free.

use thiserror::Error;

use crate::app::App;

/// The user's answer for a revoked app. Either answer resolves the app and
/// retires it from the pending set; executing an uninstall is the prompt
/// backend's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Uninstall,
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("no answer within {0} seconds")]
    Timeout(u64),
    #[error("prompt failed: {0}")]
    Failed(String),
}

pub trait UserPrompt: Send + Sync {
    /// Ask the user about a revoked app. Blocking; bounded by the
    /// implementation's own timeout.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] on display failure or timeout; the worker
    /// keeps the app pending and asks again on a later pass.
    fn ask(&self, app: &App) -> Result<Decision, PromptError>;
}
