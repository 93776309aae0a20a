//! Relay server binary entry point.
//!
//! Starts the roomcast signaling relay: a WebSocket endpoint that pairs
//! one owner with any number of viewers per room and forwards their
//! handshake messages. Media never touches this process.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (0.0.0.0:8080)
//! cargo run -p roomcast-relay-server
//!
//! # Pick a port explicitly
//! cargo run -p roomcast-relay-server -- --listen 0.0.0.0:9000
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use roomcast_relay::RoomRegistry;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// roomcast signaling relay.
///
/// Rooms and participants live in memory only; restarting the relay
/// forgets everything and peers re-join from scratch.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on for WebSocket connections
    #[arg(short, long, default_value = "0.0.0.0:8080", env = "ROOMCAST_LISTEN")]
    listen: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Set up Ctrl+C handling before anything can block.
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, initiating shutdown...");

        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }

        // Give the accept loop a moment; force exit if it wedges.
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            eprintln!("Graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })
    .expect("Failed to set Ctrl+C handler");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("relay-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %args.listen,
        "roomcast relay starting"
    );

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    let registry = Arc::new(RoomRegistry::new());
    let server = tokio::spawn(roomcast_relay::serve(listener, registry));

    info!("Relay running. Press Ctrl+C to shutdown.");

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, stopping relay...");
    server.abort();
    info!("Relay shut down");

    Ok(())
}

fn init_tracing() {
    // RUST_LOG overrides; info by default.
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
