//! `rosbridge` – command-line rosbridge client for a mobile base.
//!
//! The binary:
//!
//! 1. Loads `~/.rosbridge/config.toml` (writing defaults on first run) and
//!    applies `ROSBRIDGE_*` environment overrides.
//! 2. Subscribes to the robot's odometry and ultrasound topics and advertises
//!    the velocity-command and debug-output topics.
//! 3. Connects, publishes the configured speed limits, then ticks at
//!    `tick_hz`, running one pending callback per tick.
//! 4. On **Ctrl-C** publishes a zero velocity command and disconnects.

mod config;
mod telemetry;

use colored::Colorize;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use rosbridge_client::{BridgeConnection, BridgeError, ConnectionState, DisconnectOutcome, Topic};
use rosbridge_types::geometry_msgs::Twist;
use rosbridge_types::nav_msgs::Odometry;
use rosbridge_types::std_msgs::{Float32Msg, StringMsg};

fn main() -> ExitCode {
    let _telemetry = telemetry::init_tracing("rosbridge");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let path = config::config_path();
    let cfg = match config::load_or_init(&path) {
        Ok(loaded) => {
            let verb = if loaded.created {
                "Default config written to"
            } else {
                "Config loaded from"
            };
            println!("  {} {}", verb, path.display().to_string().bold());
            loaded.config
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(
            error = %e,
            "Failed to install Ctrl-C handler; the loop can only end when the connection drops"
        );
    }

    // ── Topics ────────────────────────────────────────────────────────────
    let mut bridge = BridgeConnection::new(cfg.bridge_config());
    let cmd_vel = Topic::<Twist>::new(cfg.topics.cmd_vel.as_str());
    let debug_output = Topic::<StringMsg>::new(cfg.topics.debug_output.as_str());
    if let Err(e) = register_topics(&mut bridge, &cfg, &cmd_vel, &debug_output) {
        error!(error = %e, "topic registration failed");
        return ExitCode::FAILURE;
    }

    // ── Connect ───────────────────────────────────────────────────────────
    let url = bridge.config().url();
    print!("\n  Connecting to {} … ", url.dimmed());
    std::io::stdout().flush().ok();
    if let Err(e) = bridge.connect() {
        println!("{}", "failed".red());
        error!(error = %e, "could not start the connection");
        return ExitCode::FAILURE;
    }
    if !bridge.wait_until_connected(bridge.config().connect_timeout) {
        println!("{}", "offline".yellow());
        if let Some(e) = bridge.take_connection_error() {
            println!("  {}", e.to_string().dimmed());
        }
        println!(
            "  {}  Is `{}` running on the robot?",
            "No rosbridge server answered.".dimmed(),
            "roslaunch rosbridge_server rosbridge_websocket.launch".bold()
        );
        bridge.disconnect();
        return ExitCode::FAILURE;
    }
    println!("{}", "online".green());

    publish_speed_limits(&bridge, &cfg);
    if let Err(e) = bridge.publish_to(&debug_output, &StringMsg::new("rosbridge client online")) {
        warn!(error = %e, "failed to publish status");
    }

    // ── Tick loop ─────────────────────────────────────────────────────────
    let interval = cfg.tick_interval();
    info!(tick_hz = cfg.tick_hz, "entering tick loop");
    while !shutdown.load(Ordering::SeqCst) {
        let started = Instant::now();
        bridge.drain_one();
        if bridge.state() == ConnectionState::Disconnected {
            warn!(url = %url, "connection lost");
            break;
        }
        thread::sleep(interval.saturating_sub(started.elapsed()));
    }

    // ── Shutdown ──────────────────────────────────────────────────────────
    match bridge.publish_to(&cmd_vel, &Twist::stop()) {
        Ok(()) => println!("{}", "  ✓ Stop command published.".green()),
        Err(BridgeError::NotConnected) => {}
        Err(e) => warn!(error = %e, "failed to publish stop command"),
    }
    match bridge.disconnect() {
        DisconnectOutcome::Clean => println!("{}", "  ✓ Disconnected.".green()),
        DisconnectOutcome::Idle => println!("  Connection was already closed."),
        DisconnectOutcome::TimedOut => println!(
            "{}",
            "  ⚠  Network thread did not stop in time; exiting anyway.".yellow()
        ),
    }
    ExitCode::SUCCESS
}

// ─────────────────────────────────────────────────────────────────────────────
// Robot wiring
// ─────────────────────────────────────────────────────────────────────────────

fn register_topics(
    bridge: &mut BridgeConnection,
    cfg: &config::Config,
    cmd_vel: &Topic<Twist>,
    debug_output: &Topic<StringMsg>,
) -> Result<(), BridgeError> {
    bridge.add_subscriber(
        &Topic::<Odometry>::new(cfg.topics.odometry.as_str()),
        |odom: Odometry| {
            let p = odom.pose.pose.position;
            info!(x = p.x, y = p.y, z = p.z, "odometry");
        },
    )?;
    bridge.add_subscriber(
        &Topic::<StringMsg>::new(cfg.topics.ultrasound.as_str()),
        |reading: StringMsg| debug!(ranges = %reading.data, "ultrasound"),
    )?;
    bridge.add_publisher(cmd_vel)?;
    bridge.add_publisher(debug_output)?;
    bridge.add_publisher(&Topic::<Float32Msg>::new(cfg.topics.max_linear_speed.as_str()))?;
    bridge.add_publisher(&Topic::<Float32Msg>::new(cfg.topics.max_angular_speed.as_str()))?;
    Ok(())
}

fn publish_speed_limits(bridge: &BridgeConnection, cfg: &config::Config) {
    let limits = [
        (&cfg.topics.max_linear_speed, cfg.max_linear_speed),
        (&cfg.topics.max_angular_speed, cfg.max_angular_speed),
    ];
    for (topic, data) in limits {
        if let Err(e) = bridge.publish(topic, &Float32Msg { data }) {
            warn!(topic = %topic, error = %e, "failed to publish speed limit");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "rosbridge".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  WebSocket client for ROS robots");
    println!();
}
