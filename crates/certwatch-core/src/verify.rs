//! Certificate verifier contract.
//!
//! The cryptographic side of certificate handling is consumed as a black
//! box: one call extracts signature chains (and whatever OCSP responder
//! URLs the certificates advertise), another classifies an app's chains
//! against current revocation state. Implementations must fold transient
//! responder/network failures into [`OcspVerdict::CheckAgain`] so the
//! worker retries, and structural certificate problems into
//! [`OcspVerdict::CertError`] so it stops trying.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::{App, Chain, OcspUrl};

/// Outcome of one OCSP classification. Computed fresh each verification
/// pass, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspVerdict {
    /// All chains verified fine; stop tracking the app.
    Ok,
    /// At least one certificate is revoked; the user decides what happens.
    Revoked,
    /// Transient failure (responder unreachable, stale response); retry on
    /// a later pass.
    CheckAgain,
    /// The chains cannot be verified at all (malformed certificate, no
    /// responder URL). Terminal; stop tracking the app.
    CertError,
}

/// Signature material extracted from an installed app.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureBundle {
    /// One chain per signature, end-entity certificate first.
    pub chains: Vec<Chain>,
    /// Responder URLs found while walking the certificates, for the
    /// issuer-URL cache.
    pub ocsp_urls: Vec<OcspUrl>,
}

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("cannot read app signatures: {0}")]
    Signatures(String),
    #[error("verifier backend unavailable: {0}")]
    Backend(String),
}

/// Black-box certificate verifier.
///
/// Both calls are blocking and run on the worker thread; there is never
/// more than one in flight.
pub trait CertVerifier: Send + Sync {
    /// Extract signature chains for a freshly installed app.
    ///
    /// # Errors
    ///
    /// Returns [`VerifierError`] when the app's signature files cannot be
    /// read; the worker logs and tracks the app with the signatures it
    /// already carries.
    fn signatures(&self, app: &App) -> Result<SignatureBundle, VerifierError>;

    /// Classify the app's chains against current revocation state.
    fn check_ocsp(&self, app: &App) -> OcspVerdict;
}
