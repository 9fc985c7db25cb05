use clap::Parser;
use client::input::InputScript;
use client::network::ClientTransport;
use log::{info, warn};
use shared::io::ctrl_c_flag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host name or IP address
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Name sent on login, at most 7 bytes are kept
    #[arg(short, long, default_value = "bot")]
    username: String,

    /// Milliseconds between ticks
    #[arg(short, long, default_value = "33")]
    tick_ms: u64,

    /// Seconds to play before disconnecting, 0 runs until Ctrl+C
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// Seed for the scripted inputs
    #[arg(long)]
    seed: Option<u64>,
}

/// How long to wait for a login response before asking again.
const LOGIN_RETRY: Duration = Duration::from_secs(1);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut transport = ClientTransport::new();
    let logged_in = Arc::new(AtomicBool::new(false));
    register_callbacks(&mut transport, Arc::clone(&logged_in));

    transport.connect(&args.server, args.port)?;

    let mut script = match args.seed {
        Some(seed) => InputScript::seeded(seed),
        None => InputScript::new(),
    };

    let tick = Duration::from_millis(args.tick_ms.max(1));
    let deadline = (args.duration > 0).then(|| Instant::now() + Duration::from_secs(args.duration));
    let shutdown = ctrl_c_flag();
    let mut last_login: Option<Instant> = None;

    while !shutdown.load(Ordering::SeqCst) && deadline.map_or(true, |d| Instant::now() < d) {
        let tick_start = Instant::now();

        if !logged_in.load(Ordering::SeqCst) {
            if last_login.map_or(true, |t| t.elapsed() >= LOGIN_RETRY) {
                info!("Logging in as '{}'", args.username);
                transport.send_login(&args.username);
                last_login = Some(Instant::now());
            }
        } else if let Some(input) = script.update() {
            transport.send_input(input);
        }

        transport.update();

        if !transport.is_connected() {
            warn!("Connection lost");
            break;
        }

        if let Some(remaining) = tick.checked_sub(tick_start.elapsed()) {
            thread::sleep(remaining);
        }
    }

    transport.disconnect();
    Ok(())
}

fn register_callbacks(transport: &mut ClientTransport, logged_in: Arc<AtomicBool>) {
    transport.on_connected(|| info!("Socket open"));
    transport.on_disconnected(|| info!("Disconnected from server"));
    transport.on_login_response(move |response| {
        info!(
            "Logged in as player {} on a {}x{} map",
            response.player_id, response.map_width, response.map_height
        );
        logged_in.store(true, Ordering::SeqCst);
    });
    transport.on_entity_spawn(|spawn| {
        info!(
            "Entity {} (type {}) spawned at ({:.1}, {:.1})",
            spawn.entity_id, spawn.entity_type, spawn.x, spawn.y
        );
    });
    transport.on_entity_position(|position| {
        log::debug!(
            "Entity {} at ({:.1}, {:.1})",
            position.entity_id,
            position.x,
            position.y
        );
    });
    transport.on_entity_dead(|entity_id| info!("Entity {} removed", entity_id));
    transport.on_score_update(|score| info!("Score: {}", score));
    transport.on_health_update(|health| {
        info!(
            "Entity {} health {:.0}/{:.0}",
            health.entity_id, health.current, health.max
        );
    });
    transport.on_error(|message| warn!("Network error: {}", message));
}
