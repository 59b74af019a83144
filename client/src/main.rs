use clap::Parser;
use client::{
    join_match, ClientEngine, EngineConfig, LocalEngine, MatchSetup, Published, RenderLoop,
    UdpTransport,
};
use log::info;
use shared::{DigestState, FrameInput, InputDigest, NO_SLOT};
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Frames the client may predict ahead of the server
    #[arg(short = 'p', long, default_value_t = shared::DEFAULT_MAX_PREDICTION_FRAME)]
    max_prediction: usize,

    /// Frames of local input delay (default: derived from the measured round trip)
    #[arg(long)]
    input_delay: Option<i64>,

    /// Seconds to play before leaving (0 plays until the engine stops)
    #[arg(short = 'd', long, default_value = "30")]
    duration: u64,

    /// Seconds to wait for matchmaking and room start
    #[arg(long, default_value = "60")]
    join_timeout: u64,

    /// Run the simulation locally without a server
    #[arg(long)]
    offline: bool,

    /// Tick rate for offline play
    #[arg(short = 't', long, default_value_t = shared::DEFAULT_TICK_RATE)]
    tick_rate: u32,
}

/// Scripted stand-in for a controller: sweeps yaw, taps a button now and then.
fn sample_input(slot: u8, started: Instant) -> FrameInput {
    let elapsed = started.elapsed().as_millis();
    let yaw = ((elapsed / 20) % 256) as u8;
    let button = if (elapsed / 500) % 4 == 0 { 1 } else { 0 };
    FrameInput::new(slot, yaw, button)
}

fn render_logger() -> RenderLoop<DigestState> {
    let mut last_frame = -1;
    RenderLoop::new(Duration::from_secs(1), move |published: &Published<DigestState>| {
        if published.frame != last_frame {
            last_frame = published.frame;
            info!(
                "Frame {}: digest {:016x}",
                published.frame, published.snapshot.hash
            );
        }
    })
}

fn play_until(deadline: Option<Instant>, mut step: impl FnMut() -> bool) {
    while deadline.map_or(true, |deadline| Instant::now() < deadline) {
        if !step() {
            break;
        }
        thread::sleep(Duration::from_millis(16));
    }
}

fn run_offline(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::from_tick_rate(args.tick_rate);
    let mut engine = LocalEngine::new(InputDigest, DigestState::new(1, 0), 1, 0, config)?;
    engine.start(Some(render_logger()))?;

    let started = Instant::now();
    let deadline = (args.duration > 0).then(|| started + Duration::from_secs(args.duration));
    play_until(deadline, || {
        engine.set_input(sample_input(0, started));
        engine.is_running()
    });

    if let Some(frames) = engine.stop() {
        let digest = client::replay(&InputDigest, &DigestState::new(1, 0), &frames);
        info!("Replayed {} frames, digest {:016x}", frames.len(), digest.hash);
    }
    Ok(())
}

fn run_online(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let mut transport = UdpTransport::connect(args.server, Duration::from_millis(args.fake_ping))?;
    let start = join_match(&mut transport, Duration::from_secs(args.join_timeout))?;

    let local_slot = (start.slot != NO_SLOT).then_some(start.slot as usize);
    let setup = MatchSetup {
        room_id: start.room_id,
        local_slot,
        width: start.capacity as usize,
        start_time: shared::time::instant_from_unix_millis(start.start_time_ms),
    };
    let config = EngineConfig::default()
        .with_tick_interval(start.tick_interval)
        .with_max_prediction_frame(args.max_prediction)
        .with_input_delay_for_rtt(start.rtt);
    let config = match args.input_delay {
        Some(frames) => config.with_input_delay(frames),
        None => config,
    };
    info!(
        "Input delay {} frames (rtt {:?})",
        config.input_delay, start.rtt
    );

    let initial = DigestState::new(setup.width, start.seed);
    let mut engine = ClientEngine::new(InputDigest, initial, setup, config)?;
    engine.start(transport, Some(render_logger()))?;

    let started = Instant::now();
    let deadline = (args.duration > 0).then(|| started + Duration::from_secs(args.duration));
    let mut last_report = Instant::now();
    play_until(deadline, || {
        engine.set_input(sample_input(start.slot, started));
        if last_report.elapsed() >= Duration::from_secs(5) {
            last_report = Instant::now();
            info!(
                "Authority {} / prediction {} ({} rollbacks, {} resends)",
                engine.authority_frame(),
                engine.prediction_frame(),
                engine.rollbacks(),
                engine.resend_requests()
            );
        }
        engine.is_running()
    });

    engine.stop();
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    if args.offline {
        run_offline(&args)
    } else {
        run_online(&args)
    }
}
