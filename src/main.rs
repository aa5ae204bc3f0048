//! RNG Sanity CLI
//!
//! Runs the checking service, or a one-shot battery check for use in
//! scripts and boot-time health checks.

use clap::{Parser, Subcommand};
use rng_sanity::service::{
    serve, AppState, LogNotifier, MemoryRateLimiter, Orchestrator, PersistentUsage,
};
use rng_sanity::{FileConfig, RedbBackend, SanityTester, UniquenessStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "rng-sanity", version, about = "Sanity checks for random byte streams")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP checking service.
    Serve {
        /// Override the configured bind port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the sanity battery over one hex payload and exit.
    ///
    /// Prints "true" or "false"; a false verdict also sets a nonzero
    /// exit status so scripts can branch on it.
    Check {
        /// Hex-encoded bytes to test.
        payload: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => FileConfig::default(),
    };

    match cli.command {
        Command::Serve { port } => run_server(config, port).await,
        Command::Check { payload } => run_check(&config, &payload),
    }
}

async fn run_server(mut config: FileConfig, port: Option<u16>) -> ExitCode {
    if let Some(port) = port {
        config.server.bind_addr.set_port(port);
    }

    info!("rng-sanity v{}", rng_sanity::VERSION);

    let backend = match RedbBackend::open(&config.store.path) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            eprintln!("Failed to open database: {e}");
            return ExitCode::FAILURE;
        }
    };

    let usage = Arc::new(PersistentUsage::new(backend.clone()));
    let orchestrator = Orchestrator::new(
        SanityTester::new(config.sanity.clone()),
        UniquenessStore::new(backend, config.store.clone()),
        usage.clone(),
        Arc::new(LogNotifier),
    );

    let state = AppState {
        orchestrator,
        usage,
        limiter: Arc::new(MemoryRateLimiter::new()),
        config: config.server,
    };

    if let Err(e) = serve(state).await {
        eprintln!("Server failed: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run_check(config: &FileConfig, payload: &str) -> ExitCode {
    let bytes = match hex::decode(payload) {
        Ok(bytes) => bytes,
        Err(_) => {
            eprintln!("Invalid hex");
            return ExitCode::FAILURE;
        }
    };

    let tester = SanityTester::new(config.sanity.clone());
    match tester.looks_random(&bytes) {
        Ok(()) => {
            println!("true");
            ExitCode::SUCCESS
        }
        Err(reason) => {
            println!("false");
            eprintln!("{reason}");
            ExitCode::FAILURE
        }
    }
}
