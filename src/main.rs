//! UEScope binary — thin CLI shell over the [`uescope`] library crate.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use uescope::api::*;
use uescope::config::AppConfig;
use uescope::query::QueryEngine;
use uescope::scan::Indexer;
use uescope::store::Store;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Persistent code index and search server for Unreal Engine projects.
#[derive(Parser)]
#[command(name = "uescope", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to config.json (default: ./config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the index store (default: ./data)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the configured bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the configured bind port
    #[arg(long)]
    port: Option<u16>,

    /// Skip the filesystem watcher (index once, serve queries)
    #[arg(long)]
    no_watch: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

/// Resolves once the process is asked to stop: Ctrl+C anywhere, SIGTERM on
/// unix. The HTTP listener drains behind this future.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupt received, stopping"),
        _ = terminate => info!("Termination requested, stopping"),
    }
}

// ---------------------------------------------------------------------------
// Port takeover
// ---------------------------------------------------------------------------

/// The configured port belongs to exactly one service process. When an
/// earlier instance is still bound, signal it and wait for the socket to
/// free before binding ourselves.
#[cfg(target_os = "linux")]
fn terminate_stale_listener(port: u16) {
    let inodes = listening_socket_inodes(port);
    if inodes.is_empty() {
        return;
    }
    let Some(pid) = pid_owning_socket(&inodes, std::process::id()) else {
        warn!(port, "Port is busy but its owner could not be identified");
        return;
    };
    info!(pid, port, "Terminating previous listener");
    let _ = std::process::Command::new("kill").arg(pid.to_string()).status();
    for _ in 0..50 {
        if listening_socket_inodes(port).is_empty() {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    warn!(pid, port, "Previous listener did not release the port in time");
}

#[cfg(not(target_os = "linux"))]
fn terminate_stale_listener(port: u16) {
    // no portable by-port process lookup here; the bind below surfaces any
    // conflict
    let _ = port;
}

/// Inodes of sockets in LISTEN state on `port`, from `/proc/net/tcp{,6}`.
#[cfg(target_os = "linux")]
fn listening_socket_inodes(port: u16) -> Vec<u64> {
    const TCP_LISTEN: &str = "0A";
    let mut inodes = Vec::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(content) = std::fs::read_to_string(table) else {
            continue;
        };
        for line in content.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                continue;
            }
            let Some((_, hex_port)) = fields[1].rsplit_once(':') else {
                continue;
            };
            if u16::from_str_radix(hex_port, 16).ok() != Some(port) {
                continue;
            }
            if let Ok(inode) = fields[9].parse::<u64>() {
                inodes.push(inode);
            }
        }
    }
    inodes
}

/// The process (other than ourselves) whose fd table holds one of the
/// socket inodes.
#[cfg(target_os = "linux")]
fn pid_owning_socket(inodes: &[u64], own_pid: u32) -> Option<u32> {
    let targets: Vec<String> = inodes.iter().map(|i| format!("socket:[{i}]")).collect();
    let proc_dir = std::fs::read_dir("/proc").ok()?;
    for entry in proc_dir.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            let Ok(link) = std::fs::read_link(fd.path()) else {
                continue;
            };
            let link = link.to_string_lossy();
            if targets.iter().any(|t| *t == link) {
                return Some(pid);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // Structured logging; RUST_LOG overrides the default level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("uescope=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "uescope", &mut std::io::stdout());
        return;
    }

    // Configuration is fatal when missing or invalid
    let config_path = cli.config.unwrap_or_else(|| PathBuf::from("config.json"));
    let config = match AppConfig::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!(path = %config_path.display(), error = %err, "Could not load configuration");
            std::process::exit(1);
        }
    };
    info!(
        projects = config.projects.len(),
        languages = config.languages().len(),
        "Configuration loaded"
    );

    // Store open failure is fatal too
    let data_dir = cli.data_dir.unwrap_or_else(|| PathBuf::from("data"));
    let store = match Store::open(&data_dir) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(path = %data_dir.display(), error = %err, "Could not open index store");
            std::process::exit(1);
        }
    };
    info!(path = %store.path().display(), "Store open");

    let indexer = Arc::new(Indexer::new(Arc::clone(&store), Arc::clone(&config)));
    let engine = Arc::new(QueryEngine::new(Arc::clone(&store), Arc::clone(&config)));

    // Background build: full-scan empty languages, reconcile the rest,
    // repair missing trigram rows. Queries serve whatever is committed.
    {
        let indexer = Arc::clone(&indexer);
        std::thread::Builder::new()
            .name("index-startup".to_string())
            .spawn(move || {
                if let Err(err) = indexer.startup() {
                    error!(error = %err, "Index build failed");
                }
            })
            .expect("failed to spawn index thread");
    }

    // File watcher for incremental live re-indexing
    let _watcher = if cli.no_watch {
        None
    } else {
        uescope::watch::start_watcher(Arc::clone(&indexer))
    };

    let ctx = AppContext {
        store,
        config: Arc::clone(&config),
        engine,
        indexer,
        start_time: std::time::Instant::now(),
    };

    let app = router(ctx).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    let host = cli.host.unwrap_or_else(|| config.service.host.clone());
    let port = cli.port.unwrap_or(config.service.port);

    // the port belongs to this process: take it over from any earlier
    // instance before binding
    terminate_stale_listener(port);

    let listener = match tokio::net::TcpListener::bind(format!("{host}:{port}")).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(host = host.as_str(), port = port, error = %err, "Could not bind");
            std::process::exit(1);
        }
    };

    info!(port = port, "http://{host}:{port}");
    axum::serve(listener, app).with_graceful_shutdown(wait_for_shutdown()).await.unwrap();
}
