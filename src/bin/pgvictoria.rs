//! Process entry point: CLI parsing, privilege check, configuration and
//! user-store loading, logging setup, PID file, and the accept loop.
//!
//! The accept loop itself is one OS thread per accepted connection over a
//! blocking `TcpListener` — the simplest faithful stand-in for an external
//! event loop, matching the single-threaded-per-connection scheduling
//! model the rest of the crate assumes.

use std::fs::OpenOptions;
use std::net::TcpListener;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use clap::Parser;
use tracing::{error, info, warn};

use pgvictoria::config::MainConfig;
use pgvictoria::log;
use pgvictoria::master_key;
use pgvictoria::session::ClientSession;

#[derive(Parser)]
#[command(name = "pgvictoria", about = "PostgreSQL wire-protocol supervisor", disable_help_flag = true)]
struct Args {
    /// Path to the main configuration file.
    #[arg(short = 'c', long = "config", value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Path to the encrypted user store.
    #[arg(short = 'u', long = "users", value_name = "USERS")]
    users: Option<PathBuf>,

    /// Directory holding the default `pgvictoria.conf` / `pgvictoria_users.conf`.
    #[arg(short = 'D', long = "config-dir", value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Print version and exit.
    #[arg(short = 'V', long = "version")]
    version: bool,

    /// Print help and exit.
    #[arg(short = '?', long = "help", action = clap::ArgAction::Help)]
    help: Option<bool>,
}

fn resolve_paths(args: &Args) -> (PathBuf, PathBuf) {
    let dir = args
        .config_dir
        .clone()
        .or_else(|| std::env::var_os("PGVICTORIA_CONFIG_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("/etc/pgvictoria"));

    let config_path = args.config.clone().unwrap_or_else(|| dir.join("pgvictoria.conf"));
    let users_path = args.users.clone().unwrap_or_else(|| dir.join("pgvictoria_users.conf"));
    (config_path, users_path)
}

fn create_pid_file(path: &std::path::Path) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(path)?;
    write!(file, "{}\n", std::process::id())
}

fn listen_host(host: &str) -> &str {
    if host == "*" { "0.0.0.0" } else { host }
}

fn run() -> Result<(), ()> {
    let args = Args::parse();

    if args.version {
        println!("pgvictoria {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // SAFETY: getuid takes no arguments and cannot fail.
    if unsafe { libc::getuid() } == 0 {
        eprintln!("pgvictoria: refusing to run as root");
        return Err(());
    }

    let (config_path, users_path) = resolve_paths(&args);

    let master_key = master_key::resolve(config_path.parent().unwrap_or(std::path::Path::new(".")))
        .map_err(|e| eprintln!("pgvictoria: {e}"))?;

    let config = MainConfig::load(&config_path, &users_path, &master_key)
        .map_err(|e| eprintln!("pgvictoria: {e}"))?;
    config.validate().map_err(|e| eprintln!("pgvictoria: {e}"))?;

    let _guard = log::init(
        config.common.log_type,
        config.common.log_level.tracing_level(),
        config.common.log_path.as_deref(),
        config.common.log_mode,
    )
    .map_err(|e| eprintln!("pgvictoria: failed to initialize logging: {e}"))?;

    info!(version = env!("CARGO_PKG_VERSION"), "pgvictoria starting");

    if let Some(pidfile) = &config.pidfile {
        if let Err(e) = create_pid_file(pidfile) {
            error!(path = %pidfile.display(), error = %e, "failed to create PID file");
            return Err(());
        }
    }

    let host = listen_host(&config.host);
    let listener = match TcpListener::bind((host, config.port)) {
        Ok(l) => l,
        Err(e) => {
            error!(host, port = config.port, error = %e, "failed to bind listen socket");
            return Err(());
        }
    };

    info!(host, port = config.port, "listening");

    let config_handle: pgvictoria::config::ConfigHandle = Arc::new(ArcSwap::from_pointee(config));

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let config_handle = config_handle.clone();
        std::thread::spawn(move || {
            let peer = stream.peer_addr().ok();
            let session = ClientSession::new(stream, config_handle);
            if let Err(e) = session.run() {
                warn!(peer = ?peer, error = %e, "client session ended with error");
            }
        });
    }

    Ok(())
}

fn main() {
    match run() {
        Ok(()) => std::process::exit(0),
        Err(()) => std::process::exit(1),
    }
}
