use clap::Parser;
use log::info;
use server::config::{RoomConfig, ServerConfig};
use server::network::Server;
use std::net::SocketAddr;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,

    /// Frames per second
    #[clap(short, long, default_value = "20")]
    tick_rate: u32,

    /// Players per room
    #[clap(short, long, default_value = "2")]
    capacity: usize,

    /// Milliseconds between everyone being ready and frame 0
    #[clap(long, default_value = "3000")]
    countdown_ms: u64,

    /// Maximum number of concurrent sessions
    #[clap(short, long, default_value = "256")]
    max_sessions: usize,

    /// Seconds of silence before a session is dropped
    #[clap(long, default_value = "5")]
    session_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let bind_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let mut room = RoomConfig::from_tick_rate(args.tick_rate);
    room.capacity = args.capacity;
    room.start_countdown = Duration::from_millis(args.countdown_ms);

    let mut config = ServerConfig::new(bind_addr, room);
    config.max_sessions = args.max_sessions;
    config.session_timeout = Duration::from_secs(args.session_timeout);

    info!(
        "Starting server on {} at {}Hz with {}-player rooms",
        bind_addr, args.tick_rate, args.capacity
    );

    let mut server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
