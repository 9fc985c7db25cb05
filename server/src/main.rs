use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::game::{Lobby, LobbyConfig};
use server::network::ServerTransport;
use shared::io::ctrl_c_flag;
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Maximum number of sessions
    #[arg(short, long, default_value = "32")]
    max_sessions: usize,

    /// Seconds of silence before a session is dropped
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Map width sent to players
    #[arg(long, default_value = "1920")]
    map_width: u16,

    /// Map height sent to players
    #[arg(long, default_value = "1080")]
    map_height: u16,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig::default()
        .with_bind_address(args.host)
        .with_max_sessions(args.max_sessions)
        .with_session_timeout(Duration::from_secs(args.timeout));

    let mut server = ServerTransport::new(config);
    server.start(args.port)?;

    let mut lobby = Lobby::new(LobbyConfig {
        map_width: args.map_width,
        map_height: args.map_height,
        ..LobbyConfig::default()
    });

    let tick_duration = Duration::from_secs_f32(1.0 / args.tick_rate.max(1) as f32);
    // Cap the delta time to 50ms
    let max_delta_time = 1.0 / 20.0;

    let shutdown = ctrl_c_flag();
    let mut last_update = Instant::now();

    info!("Running at {} ticks per second", args.tick_rate);

    while !shutdown.load(Ordering::SeqCst) {
        let tick_start = Instant::now();
        let delta_time = (tick_start - last_update).as_secs_f32().min(max_delta_time);
        last_update = tick_start;

        server.update(&mut lobby);
        lobby.tick(&server, delta_time);

        if let Some(remaining) = tick_duration.checked_sub(tick_start.elapsed()) {
            thread::sleep(remaining);
        }
    }

    info!("Received Ctrl+C, shutting down gracefully...");
    server.stop();

    Ok(())
}
