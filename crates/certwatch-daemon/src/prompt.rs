//! User prompt backend.
//!
//! The question "keep or uninstall this revoked app?" is delegated to a
//! helper command — in production a popup binary, in tests a shell script.
//! The helper receives the app identity as JSON on stdin and answers
//! through its exit status, using the historical popup protocol: 2 keeps
//! the app, 3 uninstalls it, anything else is a failure. The helper is
//! expected to perform the actual uninstall itself before exiting with 3.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use certwatch_core::app::App;
use certwatch_core::prompt::{Decision, PromptError, UserPrompt};
use serde_json::json;
use tracing::debug;

const EXIT_KEEP: i32 = 2;
const EXIT_UNINSTALL: i32 = 3;

pub struct CommandPrompt {
    command: PathBuf,
    timeout: Duration,
}

impl CommandPrompt {
    #[must_use]
    pub fn new(command: PathBuf, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

impl UserPrompt for CommandPrompt {
    fn ask(&self, app: &App) -> Result<Decision, PromptError> {
        let mut child = Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| PromptError::Failed(format!("cannot start prompt helper: {err}")))?;

        if let Some(stdin) = child.stdin.take() {
            let payload = json!({
                "app_id": app.app_id,
                "pkg_id": app.pkg_id,
                "uid": app.uid,
            });
            // A helper that exits without reading is fine; the write error
            // then just mirrors its exit status.
            let _ = serde_json::to_writer(stdin, &payload);
        }

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(PromptError::Timeout(self.timeout.as_secs()));
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(err) => {
                    return Err(PromptError::Failed(format!("prompt helper wait: {err}")));
                }
            }
        };

        debug!(%app, ?status, "prompt helper finished");
        match status.code() {
            Some(EXIT_KEEP) => Ok(Decision::Keep),
            Some(EXIT_UNINSTALL) => Ok(Decision::Uninstall),
            Some(code) => Err(PromptError::Failed(format!(
                "prompt helper exited with {code}"
            ))),
            None => Err(PromptError::Failed(
                "prompt helper killed by signal".to_string(),
            )),
        }
    }
}

/// Backend used when no prompt command is configured: every ask fails, so
/// revoked apps stay pending until an operator provides a prompt.
pub struct NoPrompt;

impl UserPrompt for NoPrompt {
    fn ask(&self, _app: &App) -> Result<Decision, PromptError> {
        Err(PromptError::Failed(
            "no prompt command configured".to_string(),
        ))
    }
}
