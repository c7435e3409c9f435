mod bot;
mod network;
mod replica;

use clap::Parser;
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Identity token (display name for the offline provider)
    #[arg(short = 't', long, default_value = "wanderer")]
    token: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Disconnect after this many seconds (0 = run until dropped)
    #[arg(short = 'd', long, default_value = "0")]
    duration: u64,

    /// Request a round start this many seconds after connecting
    /// (0 = never; only honored for the host connection)
    #[arg(long, default_value = "0")]
    start_after: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {} as {}", args.server, args.token);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let run_for = if args.duration > 0 {
        Some(Duration::from_secs(args.duration))
    } else {
        None
    };
    let start_after = if args.start_after > 0 {
        Some(Duration::from_secs(args.start_after))
    } else {
        None
    };

    let mut client =
        network::Client::new(&args.server, &args.token, args.fake_ping, run_for, start_after)
            .await?;

    client.run().await?;

    Ok(())
}
