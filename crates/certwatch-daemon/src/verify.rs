//! Certificate verifier backend.
//!
//! Certificate parsing and the OCSP exchange stay outside this daemon; a
//! helper command owns them. `<helper> signatures` prints a JSON
//! [`SignatureBundle`] for the app given on stdin; `<helper> check` reads
//! the app (chains included) and answers through its exit status:
//! 0 verified, 1 revoked, 2 check again, 3 certificate error. A helper
//! that crashes or is killed counts as a transient failure — the app is
//! retried rather than dropped.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use certwatch_core::app::App;
use certwatch_core::verify::{CertVerifier, OcspVerdict, SignatureBundle, VerifierError};
use tracing::{debug, warn};

const EXIT_OK: i32 = 0;
const EXIT_REVOKED: i32 = 1;
const EXIT_CHECK_AGAIN: i32 = 2;
const EXIT_CERT_ERROR: i32 = 3;

pub struct CommandVerifier {
    command: PathBuf,
}

impl CommandVerifier {
    #[must_use]
    pub fn new(command: PathBuf) -> Self {
        Self { command }
    }

    fn run(&self, subcommand: &str, app: &App) -> Result<(Option<i32>, Vec<u8>), VerifierError> {
        let mut child = Command::new(&self.command)
            .arg(subcommand)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| VerifierError::Backend(format!("cannot start helper: {err}")))?;

        if let Some(stdin) = child.stdin.take() {
            let _ = serde_json::to_writer(stdin, app);
        }

        let mut stdout = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_end(&mut stdout);
        }
        let status = child
            .wait()
            .map_err(|err| VerifierError::Backend(format!("helper wait: {err}")))?;
        Ok((status.code(), stdout))
    }
}

impl CertVerifier for CommandVerifier {
    fn signatures(&self, app: &App) -> Result<SignatureBundle, VerifierError> {
        let (code, stdout) = self.run("signatures", app)?;
        if code != Some(EXIT_OK) {
            return Err(VerifierError::Signatures(format!(
                "helper exited with {code:?}"
            )));
        }
        serde_json::from_slice(&stdout)
            .map_err(|err| VerifierError::Signatures(format!("bad helper output: {err}")))
    }

    fn check_ocsp(&self, app: &App) -> OcspVerdict {
        match self.run("check", app) {
            Ok((Some(EXIT_OK), _)) => OcspVerdict::Ok,
            Ok((Some(EXIT_REVOKED), _)) => OcspVerdict::Revoked,
            Ok((Some(EXIT_CHECK_AGAIN), _)) => OcspVerdict::CheckAgain,
            Ok((Some(EXIT_CERT_ERROR), _)) => OcspVerdict::CertError,
            Ok((code, _)) => {
                // Crashed or killed helpers are transient, like a responder
                // outage.
                warn!(%app, ?code, "verifier helper failed, will check again");
                OcspVerdict::CheckAgain
            }
            Err(err) => {
                warn!(%app, %err, "verifier helper unavailable, will check again");
                OcspVerdict::CheckAgain
            }
        }
    }
}

/// Backend used when no verifier command is configured. There is nothing
/// we could ever verify, so apps are dropped from the check list instead of
/// piling up forever.
pub struct UnconfiguredVerifier;

impl CertVerifier for UnconfiguredVerifier {
    fn signatures(&self, _app: &App) -> Result<SignatureBundle, VerifierError> {
        Ok(SignatureBundle::default())
    }

    fn check_ocsp(&self, app: &App) -> OcspVerdict {
        debug!(%app, "no verifier command configured, dropping from check list");
        OcspVerdict::CertError
    }
}
