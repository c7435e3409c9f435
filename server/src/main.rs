use clap::Parser;
use log::info;
use server::identity::TokenIdentity;
use server::network::Server;
use server::physics::FlatWorld;
use server::session::{Session, SessionConfig};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Simulation tick rate (updates per second)
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Maximum number of concurrent clients
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// Players required before a round may start
    #[arg(long, default_value = "2")]
    min_players: usize,

    /// Base bomb countdown in seconds
    #[arg(long, default_value = "30.0")]
    bomb_duration: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = SessionConfig {
        min_players: args.min_players,
        bomb_duration: args.bomb_duration,
        ..SessionConfig::default()
    };
    let session = Session::new(config, Box::new(FlatWorld::default()));

    let addr = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate as f64);

    info!("Starting bomb-tag server on {}", addr);

    let mut server = Server::new(
        &addr,
        tick_duration,
        args.max_clients,
        session,
        Arc::new(TokenIdentity),
    )
    .await?;

    server.run().await?;

    Ok(())
}
