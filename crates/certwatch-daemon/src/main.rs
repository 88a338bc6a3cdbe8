//! certwatchd - certificate revocation watch daemon.
//!
//! Startup order matters: shutdown signals are blocked before any thread
//! exists so delivery funnels into the final `sigwait`; the store is opened
//! and the worker seeded before the event sources attach, so no
//! notification can race an uninitialized buffer. Shutdown reverses the
//! order: sources first, then the worker (which drains whatever they
//! already queued), then the store closes with the process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use certwatch_core::net::NetworkMonitor;
use certwatch_core::prompt::UserPrompt;
use certwatch_core::verify::CertVerifier;
use certwatch_core::{CertwatchConfig, Service};
use certwatch_daemon::events::{PackageEventBridge, PackageFeed};
use certwatch_daemon::net::OperstateMonitor;
use certwatch_daemon::prompt::{CommandPrompt, NoPrompt};
use certwatch_daemon::store::SqliteStore;
use certwatch_daemon::verify::{CommandVerifier, UnconfiguredVerifier};
use clap::Parser;
use nix::sys::signal::{SigSet, Signal};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "certwatchd", version, about = "Certificate revocation watch daemon")]
struct Cli {
    /// Daemon configuration file.
    #[arg(long, default_value = "/etc/certwatch/certwatch.toml")]
    config: PathBuf,

    /// Override the configured database path.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log filter (tracing `EnvFilter` syntax).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Assume connectivity instead of probing `/sys/class/net`; useful in
    /// containers without meaningful interface state.
    #[arg(long)]
    online: bool,
}

/// Connectivity source behind `--online`.
struct AlwaysOnline;

impl NetworkMonitor for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals
        .thread_block()
        .context("cannot block shutdown signals")?;

    let mut config = if cli.config.exists() {
        CertwatchConfig::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        info!(path = %cli.config.display(), "no config file, using defaults");
        CertwatchConfig::default()
    };
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let store = Arc::new(SqliteStore::open(&config.db_path).context("opening check-list database")?);

    let verifier: Arc<dyn CertVerifier> = match &config.verifier_command {
        Some(command) => Arc::new(CommandVerifier::new(command.clone())),
        None => {
            warn!("no verifier_command configured, nothing can be verified");
            Arc::new(UnconfiguredVerifier)
        }
    };
    let prompt: Arc<dyn UserPrompt> = match &config.prompt_command {
        Some(command) => Arc::new(CommandPrompt::new(
            command.clone(),
            Duration::from_secs(config.prompt_timeout_secs),
        )),
        None => {
            warn!("no prompt_command configured, revoked apps will stay pending");
            Arc::new(NoPrompt)
        }
    };

    let monitor = Arc::new(OperstateMonitor::new());
    let network: Arc<dyn NetworkMonitor> = if cli.online {
        Arc::new(AlwaysOnline)
    } else {
        Arc::clone(&monitor) as Arc<dyn NetworkMonitor>
    };
    let initial_online = network.is_online();

    let mut service = Service::new(
        verifier,
        store,
        prompt,
        network,
        Duration::from_secs(config.retry_interval_secs),
    );
    service.setup().context("daemon setup failed")?;
    let producer = service
        .worker()
        .context("worker not running after setup")?
        .producer();

    let net_watch = if cli.online {
        None
    } else {
        let worker = producer.clone();
        Some(monitor.watch(
            Duration::from_secs(config.net_poll_secs),
            initial_online,
            move |online| worker.set_online(online),
        ))
    };

    if let Some(dir) = config.event_socket.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let bridge = Arc::new(PackageEventBridge::new());
    let feed = PackageFeed::spawn(&config.event_socket, bridge, move |event| {
        producer.push_event(event);
    })
    .context("starting package event feed")?;

    info!(db = %config.db_path.display(), "certwatchd running");
    let signal = signals.wait().context("waiting for shutdown signal")?;
    info!(?signal, "shutdown signal received");

    feed.shutdown();
    if let Some(watch) = net_watch {
        watch.stop();
    }
    service.shutdown();
    info!("certwatchd stopped");
    Ok(())
}
