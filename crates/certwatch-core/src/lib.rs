//! certwatch-core - Certificate revocation watch engine
//!
//! This library implements the state engine of the certwatch daemon: a
//! thread-safe queue of install/uninstall events, a verification buffer of
//! apps whose certificates still need an OCSP revocation decision, and a
//! single background worker that drains the queue, keeps the buffer in
//! lockstep with durable storage, and resolves buffered apps whenever the
//! device is online.
//!
//! The cryptographic OCSP check itself, the persistent store, and the user
//! prompt are consumed through traits ([`CertVerifier`], [`AppStore`],
//! [`UserPrompt`]) so the engine can be exercised with deterministic fakes
//! and the daemon can plug in platform backends.
//!
//! # Modules
//!
//! - [`app`]: tracked app data model and the OCSP issuer-URL cache entry
//! - [`event`]: install/uninstall events
//! - [`queue`]: thread-safe FIFO of pending events
//! - [`verify`]: certificate verifier contract and OCSP verdicts
//! - [`store`]: durable store contract
//! - [`prompt`]: user decision prompt contract
//! - [`net`]: network connectivity probe contract
//! - [`worker`]: the background worker and its control loop
//! - [`timer`]: periodic retry timer
//! - [`config`]: TOML daemon configuration
//! - [`service`]: daemon assembly and lifecycle

pub mod app;
pub mod config;
pub mod event;
pub mod net;
pub mod prompt;
pub mod queue;
pub mod service;
pub mod store;
pub mod timer;
pub mod verify;
pub mod worker;

pub use app::{App, Chain, OcspUrl, Verified, UNKNOWN_APP_ID};
pub use config::{CertwatchConfig, ConfigError};
pub use event::{Event, EventKind};
pub use net::NetworkMonitor;
pub use prompt::{Decision, PromptError, UserPrompt};
pub use queue::EventQueue;
pub use service::{Service, SetupError};
pub use store::{AppStore, StoreError};
pub use verify::{CertVerifier, OcspVerdict, SignatureBundle, VerifierError};
pub use worker::{Worker, WorkerHandle, WorkerRef, WorkerStats};
