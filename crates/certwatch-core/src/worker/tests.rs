//! Worker state-machine tests with deterministic stub collaborators.
//!
//! The OCSP stub is keyed by a sentinel string in the first certificate of
//! the first chain; the prompt stub answers Uninstall for uids above 5000
//! and fails otherwise. Quiescence is awaited through the worker's own
//! counters — no sleeps to guess at scheduling.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::*;
use crate::app::OcspUrl;
use crate::prompt::PromptError;
use crate::store::StoreError;
use crate::verify::{SignatureBundle, VerifierError};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct StubVerifier {
    checks: AtomicU64,
    urls: Vec<OcspUrl>,
}

impl CertVerifier for StubVerifier {
    fn signatures(&self, app: &App) -> Result<SignatureBundle, VerifierError> {
        // Echo whatever chains the event carried, as the platform stub does.
        Ok(SignatureBundle {
            chains: app.signatures.clone(),
            ocsp_urls: self.urls.clone(),
        })
    }

    fn check_ocsp(&self, app: &App) -> OcspVerdict {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let sentinel = app
            .signatures
            .first()
            .and_then(|chain| chain.first())
            .map(String::as_str);
        match sentinel {
            Some("OCSP_APP_REVOKED") => OcspVerdict::Revoked,
            Some("OCSP_CHECK_AGAIN") => OcspVerdict::CheckAgain,
            Some("OCSP_CERT_ERROR") => OcspVerdict::CertError,
            _ => OcspVerdict::Ok,
        }
    }
}

#[derive(Default)]
struct MemStore {
    apps: Mutex<Vec<App>>,
    urls: Mutex<Vec<OcspUrl>>,
    fail_inserts: AtomicBool,
}

impl MemStore {
    fn contains(&self, app: &App) -> bool {
        self.apps
            .lock()
            .unwrap()
            .iter()
            .any(|entry| entry.same_identity(app))
    }

    fn verified_of(&self, app: &App) -> Option<Verified> {
        self.apps
            .lock()
            .unwrap()
            .iter()
            .find(|entry| entry.same_identity(app))
            .map(|entry| entry.verified)
    }
}

impl AppStore for MemStore {
    fn insert(&self, app: &App) -> Result<bool, StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        let mut apps = self.apps.lock().unwrap();
        if apps.iter().any(|entry| entry.same_identity(app)) {
            return Ok(false);
        }
        apps.push(app.clone());
        Ok(true)
    }

    fn remove(&self, app: &App) -> Result<(), StoreError> {
        self.apps
            .lock()
            .unwrap()
            .retain(|entry| !entry.same_identity(app));
        Ok(())
    }

    fn mark_verified(&self, app: &App, verified: Verified) -> Result<(), StoreError> {
        let mut apps = self.apps.lock().unwrap();
        if let Some(entry) = apps.iter_mut().find(|entry| entry.same_identity(app)) {
            entry.verified = verified;
        }
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<App>, StoreError> {
        Ok(self.apps.lock().unwrap().clone())
    }

    fn ocsp_url(&self, issuer: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .urls
            .lock()
            .unwrap()
            .iter()
            .find(|entry| entry.issuer == issuer)
            .map(|entry| entry.url.clone()))
    }

    fn set_ocsp_url(&self, issuer: &str, url: &str, date: i64) -> Result<(), StoreError> {
        let mut urls = self.urls.lock().unwrap();
        match urls.iter_mut().find(|entry| entry.issuer == issuer) {
            Some(entry) if entry.date < date => {
                entry.url = url.to_string();
                entry.date = date;
            }
            Some(_) => {}
            None => urls.push(OcspUrl {
                issuer: issuer.to_string(),
                url: url.to_string(),
                date,
            }),
        }
        Ok(())
    }
}

/// Uninstall for uid > 5000, error otherwise (mirrors the popup stub: the
/// prompt only succeeds for regular user sessions).
#[derive(Default)]
struct StubPrompt {
    asked: AtomicU64,
}

impl UserPrompt for StubPrompt {
    fn ask(&self, app: &App) -> Result<Decision, PromptError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        if app.uid > 5000 {
            Ok(Decision::Uninstall)
        } else {
            Err(PromptError::Failed("no display".to_string()))
        }
    }
}

struct Fixture {
    verifier: Arc<StubVerifier>,
    store: Arc<MemStore>,
    prompt: Arc<StubPrompt>,
    handle: WorkerHandle,
}

fn fixture_with(online: bool, seed: Vec<App>, retry: Duration) -> Fixture {
    let verifier = Arc::new(StubVerifier::default());
    let store = Arc::new(MemStore::default());
    let prompt = Arc::new(StubPrompt::default());
    let handle = Worker::new(
        Arc::clone(&verifier) as Arc<dyn CertVerifier>,
        Arc::clone(&store) as Arc<dyn AppStore>,
        Arc::clone(&prompt) as Arc<dyn UserPrompt>,
        retry,
    )
    .spawn(seed, online)
    .expect("worker thread should spawn");
    Fixture {
        verifier,
        store,
        prompt,
        handle,
    }
}

fn fixture(online: bool) -> Fixture {
    fixture_with(online, Vec::new(), Duration::from_secs(3600))
}

fn app(app_id: &str, pkg_id: &str, uid: i64, sentinel: Option<&str>) -> App {
    let signatures = sentinel
        .map(|s| vec![vec![s.to_string()]])
        .unwrap_or_default();
    App::new(app_id, pkg_id, uid, signatures)
}

fn buffer_ids(handle: &WorkerHandle) -> Vec<String> {
    handle
        .pending_apps()
        .iter()
        .map(|entry| entry.app_id.clone())
        .collect()
}

#[test]
fn install_dedups_on_identity() {
    let fx = fixture(false);
    fx.handle.push_event(Event::install(app("a", "p", 5001, None)));
    fx.handle.push_event(Event::install(app("a", "p", 5001, None)));
    assert!(fx.handle.wait_quiescent(WAIT));

    assert_eq!(buffer_ids(&fx.handle), vec!["a"]);
    assert_eq!(fx.handle.stats().events_drained, 2);
}

#[test]
fn uninstall_wins_over_earlier_install_in_same_drain() {
    let fx = fixture(false);
    let target = app("a", "p", 5001, None);
    fx.handle.push_event(Event::install(target.clone()));
    fx.handle.push_event(Event::install(app("b", "p", 5001, None)));
    fx.handle.push_event(Event::uninstall(target.clone()));
    assert!(fx.handle.wait_quiescent(WAIT));

    assert_eq!(buffer_ids(&fx.handle), vec!["b"]);
    assert!(!fx.store.contains(&target));
}

#[test]
fn install_after_uninstall_leaves_app_present() {
    let fx = fixture(false);
    let target = app("a", "p", 5001, None);
    fx.handle.push_event(Event::uninstall(target.clone()));
    fx.handle.push_event(Event::install(target.clone()));
    assert!(fx.handle.wait_quiescent(WAIT));

    assert_eq!(buffer_ids(&fx.handle), vec!["a"]);
    assert!(fx.store.contains(&target));
}

#[test]
fn removing_unknown_identity_is_a_noop() {
    let fx = fixture(false);
    fx.handle
        .push_event(Event::uninstall(app("ghost", "p", 5001, None)));
    assert!(fx.handle.wait_quiescent(WAIT));

    assert!(fx.handle.pending_apps().is_empty());
    assert_eq!(fx.handle.stats().events_drained, 1);
}

#[test]
fn offline_apps_accumulate_without_classifier_calls() {
    let fx = fixture(false);
    for i in 0..4 {
        fx.handle
            .push_event(Event::install(app(&format!("app_{i}"), "p", 5001, None)));
    }
    assert!(fx.handle.wait_quiescent(WAIT));

    assert_eq!(fx.handle.pending_apps().len(), 4);
    assert_eq!(fx.verifier.checks.load(Ordering::SeqCst), 0);
    assert_eq!(fx.handle.stats().passes, 0);
}

#[test]
fn online_transition_visits_each_app_exactly_once() {
    let fx = fixture(false);
    for i in 0..5 {
        fx.handle
            .push_event(Event::install(app(&format!("app_{i}"), "p", 5001, None)));
    }
    assert!(fx.handle.wait_quiescent(WAIT));

    fx.handle.set_online(true);
    assert!(fx.handle.wait_stats(WAIT, |stats| stats.passes >= 1));

    assert_eq!(fx.verifier.checks.load(Ordering::SeqCst), 5);
    assert_eq!(fx.handle.stats().apps_checked, 5);
    assert_eq!(fx.handle.stats().passes, 1);
    assert!(fx.handle.pending_apps().is_empty());
}

#[test]
fn verdicts_resolve_or_retain_apps() {
    let fx = fixture(false);
    fx.handle
        .push_event(Event::install(app("ok", "p1", 5001, Some("OCSP_APP_OK"))));
    fx.handle.push_event(Event::install(app(
        "bad_chain",
        "p2",
        5002,
        Some("OCSP_CERT_ERROR"),
    )));
    fx.handle.push_event(Event::install(app(
        "retry",
        "p3",
        5003,
        Some("OCSP_CHECK_AGAIN"),
    )));
    fx.handle.push_event(Event::install(app(
        "revoked_gone",
        "p4",
        5004,
        Some("OCSP_APP_REVOKED"),
    )));
    fx.handle.push_event(Event::install(app(
        "revoked_stuck",
        "p5",
        100,
        Some("OCSP_APP_REVOKED"),
    )));
    assert!(fx.handle.wait_quiescent(WAIT));
    assert_eq!(fx.handle.pending_apps().len(), 5);

    fx.handle.set_online(true);
    assert!(fx.handle.wait_stats(WAIT, |stats| stats.passes >= 1));

    // ok/cert-error resolved silently, revoked with a working prompt
    // resolved through the user, check-again and failed-prompt retained.
    assert_eq!(buffer_ids(&fx.handle), vec!["retry", "revoked_stuck"]);
    assert_eq!(fx.prompt.asked.load(Ordering::SeqCst), 2);
}

#[test]
fn revoked_app_is_marked_no_in_buffer_and_store() {
    let fx = fixture(false);
    let stuck = app("stuck", "p", 100, Some("OCSP_APP_REVOKED"));
    fx.handle.push_event(Event::install(stuck.clone()));
    assert!(fx.handle.wait_quiescent(WAIT));

    fx.handle.set_online(true);
    assert!(fx.handle.wait_stats(WAIT, |stats| stats.passes >= 1));

    let pending = fx.handle.pending_apps();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].verified, Verified::No);
    assert_eq!(fx.store.verified_of(&stuck), Some(Verified::No));
}

#[test]
fn flagged_app_goes_straight_to_prompt_on_retry() {
    let fx = fixture_with(false, Vec::new(), Duration::from_millis(20));
    fx.handle
        .push_event(Event::install(app("stuck", "p", 100, Some("OCSP_APP_REVOKED"))));
    assert!(fx.handle.wait_quiescent(WAIT));

    fx.handle.set_online(true);
    // Retry timer drives further passes; wait for a few.
    assert!(fx.handle.wait_stats(WAIT, |stats| stats.passes >= 3));

    // One classification on the first pass, prompt-only afterwards.
    assert_eq!(fx.verifier.checks.load(Ordering::SeqCst), 1);
    assert!(fx.prompt.asked.load(Ordering::SeqCst) >= 3);
    assert_eq!(fx.handle.pending_apps().len(), 1);
}

#[test]
fn check_again_app_survives_repeated_passes() {
    let fx = fixture_with(false, Vec::new(), Duration::from_millis(20));
    fx.handle.push_event(Event::install(app(
        "retry",
        "p",
        5001,
        Some("OCSP_CHECK_AGAIN"),
    )));
    assert!(fx.handle.wait_quiescent(WAIT));

    fx.handle.set_online(true);
    assert!(fx.handle.wait_stats(WAIT, |stats| stats.passes >= 4));

    assert_eq!(buffer_ids(&fx.handle), vec!["retry"]);
    // Never regressed, never flagged: still Unknown.
    assert_eq!(fx.handle.pending_apps()[0].verified, Verified::Unknown);
}

#[test]
fn going_offline_disarms_retries() {
    let fx = fixture_with(false, Vec::new(), Duration::from_millis(20));
    fx.handle.push_event(Event::install(app(
        "retry",
        "p",
        5001,
        Some("OCSP_CHECK_AGAIN"),
    )));
    assert!(fx.handle.wait_quiescent(WAIT));

    fx.handle.set_online(true);
    assert!(fx.handle.wait_stats(WAIT, |stats| stats.passes >= 2));
    assert!(fx.handle.retry_armed());

    fx.handle.set_online(false);
    // The next tick wakes the worker, which skips verification and stands
    // the timer down.
    let deadline = Instant::now() + WAIT;
    while fx.handle.retry_armed() {
        assert!(Instant::now() < deadline, "timer stayed armed while offline");
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(fx.handle.wait_quiescent(WAIT));
    let settled = fx.handle.stats().passes;
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(fx.handle.stats().passes, settled);
    assert_eq!(buffer_ids(&fx.handle), vec!["retry"]);
}

#[test]
fn resolved_buffer_disarms_retries() {
    let fx = fixture_with(false, Vec::new(), Duration::from_millis(20));
    fx.handle
        .push_event(Event::install(app("ok", "p", 5001, Some("OCSP_APP_OK"))));
    assert!(fx.handle.wait_quiescent(WAIT));

    fx.handle.set_online(true);
    assert!(fx.handle.wait_stats(WAIT, |stats| stats.passes >= 1));
    assert!(fx.handle.pending_apps().is_empty());

    // With the buffer empty no further passes may happen.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(fx.handle.stats().passes, 1);
}

#[test]
fn insert_failure_still_tracks_in_memory() {
    let fx = fixture(false);
    fx.store.fail_inserts.store(true, Ordering::SeqCst);
    let target = app("a", "p", 5001, None);
    fx.handle.push_event(Event::install(target.clone()));
    assert!(fx.handle.wait_quiescent(WAIT));

    assert_eq!(buffer_ids(&fx.handle), vec!["a"]);
    assert!(!fx.store.contains(&target));
}

#[test]
fn harvested_responder_urls_reach_the_store() {
    let verifier = Arc::new(StubVerifier {
        checks: AtomicU64::new(0),
        urls: vec![OcspUrl {
            issuer: "Test CA".to_string(),
            url: "http://ocsp.test".to_string(),
            date: 7,
        }],
    });
    let store = Arc::new(MemStore::default());
    let prompt = Arc::new(StubPrompt::default());
    let handle = Worker::new(
        Arc::clone(&verifier) as Arc<dyn CertVerifier>,
        Arc::clone(&store) as Arc<dyn AppStore>,
        prompt,
        Duration::from_secs(3600),
    )
    .spawn(Vec::new(), false)
    .expect("worker thread should spawn");

    handle.push_event(Event::install(app("a", "p", 5001, None)));
    assert!(handle.wait_quiescent(WAIT));

    assert_eq!(
        store.ocsp_url("Test CA").unwrap(),
        Some("http://ocsp.test".to_string())
    );
    handle.shutdown();
}

#[test]
fn seeded_buffer_is_processed_like_fresh_installs() {
    let mut flagged = app("flagged", "p1", 5001, Some("OCSP_APP_REVOKED"));
    flagged.verified = Verified::No;
    let seed = vec![
        app("ok", "p2", 5002, Some("OCSP_APP_OK")),
        app("retry", "p3", 5003, Some("OCSP_CHECK_AGAIN")),
        flagged,
    ];
    let fx = fixture_with(true, seed, Duration::from_secs(3600));
    assert!(fx.handle.wait_stats(WAIT, |stats| stats.passes >= 1));

    // Flagged app skipped classification and went straight to the prompt.
    assert_eq!(fx.verifier.checks.load(Ordering::SeqCst), 2);
    assert_eq!(fx.prompt.asked.load(Ordering::SeqCst), 1);
    assert_eq!(buffer_ids(&fx.handle), vec!["retry"]);
}

#[test]
fn shutdown_drains_queued_events_without_verifying() {
    // Offline keeps the drain/verify distinction deterministic: the final
    // drain must happen, a verification pass must not.
    let fx = fixture(false);
    let target = app("late", "p", 5001, None);
    fx.handle.push_event(Event::install(target.clone()));
    fx.handle.request_stop();

    let Fixture {
        verifier,
        store,
        handle,
        ..
    } = fx;
    handle.shutdown();

    assert!(store.contains(&target));
    assert_eq!(verifier.checks.load(Ordering::SeqCst), 0);
}

#[test]
fn online_while_buffer_empty_is_quiet() {
    let fx = fixture(false);
    fx.handle.set_online(true);
    assert!(fx.handle.wait_quiescent(WAIT));
    assert_eq!(fx.handle.stats().passes, 0);
}
