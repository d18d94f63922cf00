use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::{Server, ServerMessage};
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

    /// Ticks per second for invite expiry and matchmaking
    #[arg(short, long, default_value = "10")]
    tick_rate: u32,

    /// Maximum number of connected players
    #[arg(short, long, default_value = "64")]
    max_clients: usize,

    /// Seconds before an unanswered invite expires
    #[arg(long, default_value = "60")]
    invite_ttl_secs: u64,

    /// Seconds of silence before a player is dropped
    #[arg(long, default_value = "5")]
    client_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig::new(&format!("{}:{}", args.host, args.port))
        .with_tick_interval(Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64))
        .with_max_clients(args.max_clients)
        .with_invite_ttl(Duration::from_secs(args.invite_ttl_secs))
        .with_client_timeout(Duration::from_secs(args.client_timeout_secs));

    info!(
        "Starting server with {} Hz tick rate, up to {} players",
        args.tick_rate, args.max_clients
    );

    let mut server = Server::new(config).await?;
    let shutdown = server.shutdown_handle();
    let mut server_handle = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown.send(ServerMessage::Shutdown);
            let _ = server_handle.await;
            // let the sender task flush the goodbye broadcast
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    Ok(())
}
