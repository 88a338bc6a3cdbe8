//! Tracked app data model.
//!
//! An [`App`] is one installed application the daemon still has to reach a
//! revocation decision about. Identity is the `(app_id, pkg_id, uid)` triple;
//! certificate content never participates in identity comparisons, so buffer
//! membership and removal work even when two notifications for the same app
//! disagree about its signatures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder app id used when the platform notification only carries
/// package-level identity. Install notifications currently name the package
/// but not the app inside it.
pub const UNKNOWN_APP_ID: &str = "unknown#app_id";

/// One certificate chain extracted from an app signature: base64 DER blobs,
/// end-entity first.
pub type Chain = Vec<String>;

/// Per-app verification state.
///
/// `No` means the certificate was confirmed revoked and the app is waiting
/// for a user decision; it is never regressed back to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verified {
    No,
    Yes,
    Unknown,
}

impl Verified {
    /// Storage encoding, stable across releases.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::No => 0,
            Self::Yes => 1,
            Self::Unknown => 2,
        }
    }

    /// Decode the storage representation; unknown values map to `Unknown`.
    #[must_use]
    pub const fn from_i64(raw: i64) -> Self {
        match raw {
            0 => Self::No,
            1 => Self::Yes,
            _ => Self::Unknown,
        }
    }
}

/// An application tracked for certificate verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    /// Storage-assigned row id. Opaque, ignored by every comparison.
    pub check_id: Option<i64>,
    pub app_id: String,
    pub pkg_id: String,
    pub uid: i64,
    /// Certificate chains, one per signature. May be empty until the
    /// verifier has extracted them.
    pub signatures: Vec<Chain>,
    pub verified: Verified,
}

impl App {
    #[must_use]
    pub fn new(app_id: &str, pkg_id: &str, uid: i64, signatures: Vec<Chain>) -> Self {
        Self {
            check_id: None,
            app_id: app_id.to_string(),
            pkg_id: pkg_id.to_string(),
            uid,
            signatures,
            verified: Verified::Unknown,
        }
    }

    /// True when `other` names the same installed app. This is the only
    /// equality the buffer and store key on.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.app_id == other.app_id && self.pkg_id == other.pkg_id && self.uid == other.uid
    }

    /// Exhaustive comparison for tests: identity, verification state and
    /// signature content (order-insensitive across chains), ignoring the
    /// storage-assigned `check_id`.
    #[must_use]
    pub fn deep_eq(&self, other: &Self) -> bool {
        if !self.same_identity(other) || self.verified != other.verified {
            return false;
        }
        let mut lhs = self.signatures.clone();
        let mut rhs = other.signatures.clone();
        lhs.sort();
        rhs.sort();
        lhs == rhs
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "app: {}, pkg: {}, uid: {}",
            self.app_id, self.pkg_id, self.uid
        )
    }
}

/// Cached OCSP responder location for one issuer, harvested while parsing
/// certificate chains. `date` is the platform-supplied timestamp of the
/// certificate the URL was taken from; the cache only ever moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcspUrl {
    pub issuer: String,
    pub url: String,
    pub date: i64,
}
