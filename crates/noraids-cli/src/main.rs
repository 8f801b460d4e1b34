mod config;
mod dispatch;
mod gate;
mod notify;
mod poller;
mod remote;
mod server;
mod session;
mod telegram;
#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use noraids_core::{
    TrackerRegistry, already_text, changed_text, now_unix_millis, unix_millis_to_iso8601,
};
use noraids_store::Store;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::dispatch::{DispatchSettings, Dispatcher, journal_toggle};
use crate::gate::{GateController, GateTarget, RemoteGate};
use crate::notify::Notifier;
use crate::remote::HttpGateClient;
use crate::session::{SessionManager, Transport};
use crate::telegram::BotApi;

/// How often idle tracker windows are dropped.
const PRUNE_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Parser)]
#[command(
    name = "noraids",
    about = "Anti-raid daemon: gates supergroups behind join requests during join bursts"
)]
struct Cli {
    /// Data directory (database and default config file)
    #[arg(long, global = true, env = "NORAIDS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Config file (defaults to <data-dir>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll for updates and serve the admin API
    Serve,

    /// Show the stored gate session and recent gate changes
    Status {
        /// Number of journal entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Require join requests in a space
    Enable {
        /// Public handle of the space
        handle: String,
    },

    /// Stop requiring join requests in a space
    Disable {
        /// Public handle of the space
        handle: String,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}

impl Cli {
    fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(noraids_store::default_base_dir)
    }

    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref(), &self.data_dir())?;
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }
}

fn open_store(data_dir: &Path) -> Result<Store> {
    noraids_store::open_data_dir(Some(data_dir)).context("failed to open store")
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::builder()
            .with_default_directive(tracing::Level::INFO.into())
            .from_env_lossy()
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Serve => cmd_serve(&cli).await,
        Commands::Status { limit } => cmd_status(&cli, *limit),
        Commands::Enable { handle } => cmd_toggle(&cli, handle, GateTarget::Required).await,
        Commands::Disable { handle } => cmd_toggle(&cli, handle, GateTarget::NotRequired).await,
        Commands::Config => cmd_config(&cli),
    }
}

async fn cmd_serve(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    let gate_url = config.require_gate_url()?;
    let bot_token = config.require_bot_token()?;
    let detector = config.detector()?;

    let store = Arc::new(tokio::sync::Mutex::new(open_store(&cli.data_dir())?));
    let client = Arc::new(HttpGateClient::new(
        gate_url,
        config.gate_api_key.clone(),
        config.app_version(),
        Arc::clone(&store),
    ));
    let session = SessionManager::new(client, config.idle_timeout());
    if let Err(e) = session.ensure_connected().await {
        tracing::warn!("gate session unavailable at startup, will retry on demand: {e}");
    }

    let api = Arc::new(BotApi::new(bot_token));
    let dispatcher = Arc::new(Dispatcher::new(
        TrackerRegistry::new(detector),
        GateController::new(session.clone()),
        Arc::clone(&api),
        Arc::clone(&store),
        DispatchSettings {
            log_chat_id: config.log_chat_id,
            count_messages: config.count_messages,
        },
    ));
    let started_at = unix_millis_to_iso8601(now_unix_millis());
    tracing::info!(
        window = detector.window_capacity(),
        timeframe_secs = detector.timeframe().as_secs(),
        "starting noraids"
    );

    let shutdown = CancellationToken::new();
    let tasks = TaskTracker::new();
    tasks.spawn(prune_idle_trackers(
        Arc::clone(&dispatcher),
        shutdown.clone(),
    ));

    if let Some(listen) = &config.listen {
        let listener = tokio::net::TcpListener::bind(listen)
            .await
            .with_context(|| format!("failed to bind admin API on {listen}"))?;
        tracing::info!("admin API listening on {}", listener.local_addr()?);
        let app = server::router(server::AppState {
            dispatcher: Arc::clone(&dispatcher),
            started_at: started_at.clone(),
        });
        let token = shutdown.clone();
        tasks.spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                tracing::error!("admin API stopped: {e}");
            }
        });
    }

    let mut poller = tokio::spawn(poller::run(
        api,
        Arc::clone(&dispatcher),
        started_at,
        shutdown.clone(),
        tasks.clone(),
    ));

    let polled = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!("failed to listen for ctrl-c: {e}");
            }
            tracing::info!("shutting down");
            None
        }
        polled = &mut poller => Some(polled),
    };

    shutdown.cancel();
    let polled = match polled {
        Some(polled) => polled,
        None => poller.await,
    };
    tasks.close();
    tasks.wait().await;
    session.shutdown().await;
    if let Err(e) = store.lock().await.checkpoint_truncate() {
        tracing::debug!("final checkpoint failed: {e}");
    }

    polled.context("update poller panicked")?
}

async fn prune_idle_trackers<C, N>(dispatcher: Arc<Dispatcher<C, N>>, shutdown: CancellationToken)
where
    C: Transport + RemoteGate,
    N: Notifier,
{
    let mut tick = tokio::time::interval(PRUNE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                let pruned = dispatcher.prune_idle(now_unix_millis());
                if pruned > 0 {
                    tracing::debug!("pruned {pruned} idle trackers");
                }
            }
        }
    }
}

fn cmd_status(cli: &Cli, limit: usize) -> Result<()> {
    let store = open_store(&cli.data_dir())?;
    let session = store
        .kv_get(remote::SESSION_NAMESPACE, remote::SESSION_KEY)
        .context("failed to read the stored session")?;
    let events = store
        .recent_gate_events(limit)
        .context("failed to read the gate journal")?;
    let version = store
        .schema_version()
        .context("failed to read the schema version")?;

    match version {
        Some(v) => println!("schema:    v{v}"),
        None => println!("schema:    unknown"),
    }
    println!(
        "session:   {}",
        if session.is_some() { "stored" } else { "none" }
    );
    if events.is_empty() {
        println!("(no gate events)");
        return Ok(());
    }
    for event in events {
        let detail = if event.detail.is_empty() {
            String::new()
        } else {
            format!("  {}", event.detail)
        };
        println!(
            "{}  {:<7}  {:<7}  {}{detail}",
            unix_millis_to_iso8601(event.created_at),
            event.action,
            event.outcome,
            event.handle
        );
    }
    Ok(())
}

async fn cmd_toggle(cli: &Cli, handle: &str, target: GateTarget) -> Result<()> {
    let config = cli.load_config()?;
    let gate_url = config.require_gate_url()?;

    let store = Arc::new(tokio::sync::Mutex::new(open_store(&cli.data_dir())?));
    let client = Arc::new(HttpGateClient::new(
        gate_url,
        config.gate_api_key.clone(),
        config.app_version(),
        Arc::clone(&store),
    ));
    let session = SessionManager::new(client, config.idle_timeout());
    let gate = GateController::new(session.clone());

    let started = Instant::now();
    let result = gate.set_gate(handle, target).await;
    journal_toggle(&*store.lock().await, handle, target.action(), &result);
    session.shutdown().await;

    let changed = result?;
    if changed {
        println!("{}", changed_text(target.action(), Some(handle), started.elapsed()));
    } else {
        println!("{}", already_text(target.action(), Some(handle)));
    }
    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    println!("# data dir: {}", cli.data_dir().display());
    print!("{}", config.redacted().to_toml()?);
    Ok(())
}
