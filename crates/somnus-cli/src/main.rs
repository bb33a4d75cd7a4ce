mod config;
mod control;
mod daemon;
mod digest;
mod kernel;
mod retry;
#[cfg(test)]
mod testing;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use somnus_core::{DigestStatus, LogKind, plan_digest};
use somnus_store::{DataDir, FileLogs, LogSource, StateStore, StateStoreExt, Store};

use crate::config::{Config, validate_replay_ratio};
use crate::control::ControlState;
use crate::daemon::{Daemon, DaemonSettings, StatusSnapshot};
use crate::digest::DigestExecutor;
use crate::kernel::{KernelClient, wait_for_kernel};

#[derive(Parser)]
#[command(name = "somnus", about = "Sleep-wake scheduler and memory digest for an autonomous agent")]
struct Cli {
    /// Data directory (default: $SOMNUS_DATA_DIR, then ~/.somnus)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: <data-dir>/somnus.toml)
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
    /// Run the sleep-wake daemon against the kernel
    Run {
        /// Seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Do not start the HTTP control API
        #[arg(long)]
        no_control: bool,
    },

    /// Show persisted state, cursors and the last digest
    Status,

    /// Dry-run the digest planner against the current logs
    Plan {
        #[arg(long, default_value_t = somnus_core::DEFAULT_REPLAY_RATIO)]
        replay_ratio: f64,

        /// Seed for the replay sample
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run one digest now, outside the daemon loop
    Digest {
        #[arg(long, default_value_t = somnus_core::DEFAULT_REPLAY_RATIO)]
        replay_ratio: f64,
    },

    /// List recent digest runs
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn data_dir(cli: &Cli) -> DataDir {
    DataDir::resolve(cli.data_dir.as_deref())
}

fn load_config(cli: &Cli, dir: &DataDir) -> Result<Config> {
    let path = cli.config.clone().unwrap_or_else(|| dir.config_path());
    Config::load(&path)
}

fn open_store(dir: &DataDir) -> Result<Store> {
    dir.open_store()
        .with_context(|| format!("failed to open state store in {}", dir.root().display()))
}

fn seeded_rng(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    }
}

fn init_tracing(verbose: bool, daemon: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else if daemon {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
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
    init_tracing(cli.verbose, matches!(cli.command, Commands::Run { .. }));

    match &cli.command {
        Commands::Run { seed, no_control } => cmd_run(&cli, *seed, *no_control).await,
        Commands::Status => cmd_status(&cli),
        Commands::Plan { replay_ratio, seed } => cmd_plan(&cli, *replay_ratio, *seed),
        Commands::Digest { replay_ratio } => cmd_digest(&cli, *replay_ratio).await,
        Commands::History { limit } => cmd_history(&cli, *limit),
    }
}

// ---------------------------------------------------------------------------
// Advisory pidfile and signals
// ---------------------------------------------------------------------------

fn live_pid(path: &Path) -> Option<u32> {
    let pid = std::fs::read_to_string(path).ok()?.trim().parse::<u32>().ok()?;
    is_process_alive(pid).then_some(pid)
}

/// Check for an existing pidfile and log accordingly, then write our own.
fn acquire_pidfile(path: &Path) -> Option<PathBuf> {
    if let Some(pid) = live_pid(path) {
        tracing::warn!("another somnus daemon (PID {pid}) is running; both will write the same store");
    } else if path.exists() {
        tracing::info!("cleaned up stale pidfile {}", path.display());
        let _ = std::fs::remove_file(path);
    }

    match std::fs::File::create(path) {
        Ok(mut f) => {
            let _ = write!(f, "{}", std::process::id());
            tracing::info!("wrote pidfile: {}", path.display());
            Some(path.to_path_buf())
        }
        Err(e) => {
            tracing::warn!("failed to write pidfile: {e}");
            None
        }
    }
}

fn release_pidfile(path: &Path) {
    let _ = std::fs::remove_file(path);
    tracing::info!("removed pidfile: {}", path.display());
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0) checks existence without sending a signal
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    false
}

/// Cancel `cancel` on SIGINT or SIGTERM. Handlers are installed before this
/// returns, so a signal arriving right after startup is not lost.
#[cfg(unix)]
fn watch_signals(cancel: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => tracing::info!("SIGINT received; shutting down"),
            _ = terminate.recv() => tracing::info!("SIGTERM received; shutting down"),
        }
        cancel.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn watch_signals(cancel: CancellationToken) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received; shutting down");
            cancel.cancel();
        }
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_run(cli: &Cli, seed: Option<u64>, no_control: bool) -> Result<()> {
    let dir = data_dir(cli);
    let config = load_config(cli, &dir)?;
    let store = open_store(&dir)?;

    let cancel = CancellationToken::new();
    watch_signals(cancel.clone())?;
    let pidfile = acquire_pidfile(&dir.pid_path());

    let result = run_daemon(&config, store, seeded_rng(seed), no_control, &cancel).await;
    cancel.cancel();

    if let Some(path) = pidfile {
        release_pidfile(&path);
    }
    result
}

async fn run_daemon(
    config: &Config,
    store: Store,
    rng: SmallRng,
    no_control: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut kernel = KernelClient::new(&config.kernel);
    if wait_for_kernel(&mut kernel, config.kernel.ping_interval(), cancel)
        .await
        .is_err()
    {
        tracing::info!("shutdown before the kernel became ready");
        return Ok(());
    }

    let (commands, command_rx) = mpsc::channel(config.control.queue);
    let (status, status_rx) = watch::channel(StatusSnapshot::default());

    let server = if config.control.enabled && !no_control {
        let listener = TcpListener::bind(config.control.listen)
            .await
            .with_context(|| format!("failed to bind control API on {}", config.control.listen))?;
        let state = ControlState::new(commands, status_rx, config.digest.default_replay_ratio);
        Some(tokio::spawn(control::serve(listener, state, cancel.clone())))
    } else {
        drop(commands);
        None
    };

    let logs = FileLogs::new(&config.kernel.history_path, &config.kernel.tool_log_path);
    let mut daemon = Daemon::new(
        store,
        kernel,
        logs,
        rng,
        DaemonSettings::from_config(config),
        command_rx,
        status,
        cancel.clone(),
    );
    let result = daemon.run().await;
    cancel.cancel();

    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("control API error: {e}"),
            Err(e) => tracing::warn!("control API task failed: {e}"),
        }
    }
    result
}

fn cmd_status(cli: &Cli) -> Result<()> {
    let dir = data_dir(cli);
    let store = open_store(&dir)?;

    println!("data_dir:   {}", dir.root().display());
    match store.load_state().context("failed to load daemon state")? {
        Some(state) => {
            println!("phase:      {}", state.phase);
            println!("cycles:     {}", state.cycles);
            println!("maturity:   {:.3}", state.maturity);
            println!("awake:      {}/{} heartbeats", state.awake_count, state.min_awake);
            println!("capacity:   {:.2}", state.capacity);
            println!("cooldown:   {:.1}s", state.cooldown_secs);
            if let Some(ratio) = state.replay_ratio {
                println!("replay:     {ratio:.2}");
            }
        }
        None => println!("phase:      (not started)"),
    }

    let cursors = store.load_cursors().context("failed to load cursors")?;
    println!(
        "cursors:    history={} tool_log={}",
        cursors.history, cursors.tool_log
    );
    let learnings = store.load_learnings().context("failed to load learnings")?;
    println!(
        "learnings:  {} chars",
        learnings.map_or(0, |l| l.chars().count())
    );

    match store.last_digest().context("failed to load last digest")? {
        Some(d) => println!(
            "last:       {} at {} ({}/{} chunks, replay_ratio={:.2})",
            d.status,
            d.finished_at,
            d.processed,
            d.total(),
            d.replay_ratio
        ),
        None => println!("last:       (no digest yet)"),
    }
    Ok(())
}

fn cmd_plan(cli: &Cli, replay_ratio: f64, seed: Option<u64>) -> Result<()> {
    validate_replay_ratio(replay_ratio)?;
    let dir = data_dir(cli);
    let config = load_config(cli, &dir)?;
    let store = open_store(&dir)?;

    let logs = FileLogs::new(&config.kernel.history_path, &config.kernel.tool_log_path);
    let history = logs.history().with_context(|| {
        format!("failed to read {}", config.kernel.history_path.display())
    })?;
    let tool_log = logs.tool_log().with_context(|| {
        format!("failed to read {}", config.kernel.tool_log_path.display())
    })?;
    let cursors = store.load_cursors().context("failed to load cursors")?;

    let plan = plan_digest(
        cursors,
        history.len(),
        tool_log.len(),
        config.digest.sizes(),
        replay_ratio,
        &mut seeded_rng(seed),
    );
    if plan.clamped {
        eprintln!("warning: stored cursors are past the end of the logs");
    }

    println!(
        "history:    {} records, cursor {}, {} new chunks",
        history.len(),
        cursors.history,
        plan.new_in(LogKind::History)
    );
    println!(
        "tool_log:   {} records, cursor {}, {} new chunks",
        tool_log.len(),
        cursors.tool_log,
        plan.new_in(LogKind::ToolLog)
    );
    println!(
        "N={} R={} pool={} W={} replay_ratio={replay_ratio:.2}",
        plan.new_count(),
        plan.replay_target,
        plan.replay_pool,
        plan.workload()
    );
    for (i, chunk) in plan.chunks().enumerate() {
        println!(
            "  {:>3}. {:<21} {}..{}",
            i + 1,
            chunk.label(),
            chunk.offset,
            chunk.end()
        );
    }
    Ok(())
}

async fn cmd_digest(cli: &Cli, replay_ratio: f64) -> Result<()> {
    validate_replay_ratio(replay_ratio)?;
    let dir = data_dir(cli);
    let config = load_config(cli, &dir)?;
    let store = open_store(&dir)?;

    if let Some(pid) = live_pid(&dir.pid_path()) {
        tracing::warn!("daemon (PID {pid}) is running; this digest races its sleep phases");
    }

    let cancel = CancellationToken::new();
    watch_signals(cancel.clone())?;

    let mut kernel = KernelClient::new(&config.kernel);
    let logs = FileLogs::new(&config.kernel.history_path, &config.kernel.tool_log_path);
    let settings = DaemonSettings::from_config(&config).digest;
    let report = DigestExecutor {
        store: &store,
        summarizer: &mut kernel,
        logs: &logs,
        settings: &settings,
        cancel: &cancel,
    }
    .run(replay_ratio, &mut SmallRng::from_os_rng(), |_| None)
    .await
    .context("digest interrupted before its outcome was recorded")?;

    let outcome = report.outcome;
    println!("status:     {}", outcome.status);
    println!(
        "chunks:     {}/{} ({} new, {} replay)",
        outcome.processed,
        outcome.total(),
        outcome.new_chunks,
        outcome.replay_chunks
    );
    println!("learnings:  {} chars", outcome.learnings_len);
    if let Some(reason) = &outcome.reason {
        println!("reason:     {reason}");
    }
    if outcome.status == DigestStatus::Aborted {
        anyhow::bail!("digest aborted");
    }
    Ok(())
}

fn cmd_history(cli: &Cli, limit: usize) -> Result<()> {
    let dir = data_dir(cli);
    let store = open_store(&dir)?;
    let runs = store.recent_runs(limit).context("failed to load digest runs")?;
    if runs.is_empty() {
        println!("(no digest runs)");
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {:<11} {:>3}/{:<3} new={} replay={} ratio={:.2}{}",
            run.finished_at,
            run.status.to_string(),
            run.processed,
            run.total(),
            run.new_chunks,
            run.replay_chunks,
            run.replay_ratio,
            run.reason.map(|r| format!("  ({r})")).unwrap_or_default()
        );
    }
    Ok(())
}
