//! Tester Simulator
//!
//! Stands in for the handheld Tester so the PC-side diagnostic software can
//! be developed without hardware. The serial link is carried over a Unix
//! domain socket.
//!
//! # Usage
//!
//! Connect to a socket the PC software is listening on:
//! ```bash
//! ./tester-sim /tmp/tester-sim.sock
//! ```
//!
//! Listen instead, with a config file and a preset RAM location:
//! ```bash
//! ./tester-sim --listen --config config/tester-sim.toml --poke 0x1234=0x56
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tester_core::{Emulator, EmulatorError, LinkEnd, SimConfig};
use tokio::net::UnixListener;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tester-sim")]
#[command(about = "Tester firmware simulator for PC-side diagnostic software development")]
struct Args {
    /// Unix socket carrying the link (overrides the config file)
    socket: Option<String>,

    /// Unix socket carrying the link (same as the positional argument)
    #[arg(short, long = "socket", conflicts_with = "socket")]
    socket_path: Option<String>,

    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<String>,

    /// Bind the socket and wait for the PC instead of connecting to it
    #[arg(short, long)]
    listen: bool,

    /// Flash filesystem state file (overrides the config file)
    #[arg(long)]
    state_file: Option<String>,

    /// Write the flash filesystem back to the state file on exit
    #[arg(long)]
    save_on_exit: bool,

    /// Preset a RAM location, e.g. "0x1234=0x56" (repeatable)
    #[arg(long, value_parser = parse_poke)]
    poke: Vec<(u16, u8)>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose {
        "tester_sim=debug,tester_core=debug"
    } else {
        "tester_sim=info,tester_core=info"
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading config from: {}", config_path);
        SimConfig::load(config_path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?
    } else {
        SimConfig::default()
    };
    if let Some(socket) = args.socket.clone().or_else(|| args.socket_path.clone()) {
        config.transport.socket_path = socket;
    }
    if let Some(state_file) = &args.state_file {
        config.transport.state_file = state_file.clone();
    }

    info!("Starting Tester Simulator");
    info!(
        socket = %config.transport.socket_path,
        state_file = %config.transport.state_file,
        listen = args.listen
    );

    let socket_path = PathBuf::from(&config.transport.socket_path);
    let state_file = PathBuf::from(&config.transport.state_file);
    let emulator = Emulator::new(config);
    info!(ecus = emulator.registry().len(), "ECU registry ready");

    if state_file.exists() {
        // Failures are reported through the event sink; start empty instead
        let _ = emulator.load_state(&state_file);
    }
    for (addr, value) in &args.poke {
        info!(
            addr = format!("0x{:04X}", addr),
            value = format!("0x{:02X}", value),
            "Presetting RAM"
        );
        emulator.state().poke_ram(*addr, *value);
    }

    info!("Press Ctrl+C to stop");

    let result = if args.listen {
        listen(&emulator, &socket_path).await
    } else {
        connect(&emulator, &socket_path).await
    };

    if args.save_on_exit {
        let _ = emulator.save_state(&state_file);
    }

    info!("Tester Simulator stopped");
    result
}

/// Connect to the PC side and serve that one connection.
async fn connect(emulator: &Emulator, socket_path: &Path) -> Result<()> {
    let stream = Emulator::connect(socket_path)?;
    info!(socket = %socket_path.display(), "Connected");
    run_session(emulator, stream).await?;
    Ok(())
}

/// Bind the socket and serve connections one after another until Ctrl+C.
async fn listen(emulator: &Emulator, socket_path: &Path) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    info!(socket = %socket_path.display(), "Waiting for connections");

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => accepted?.0,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        };
        info!("PC connected");

        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        if run_session(emulator, stream).await? == SessionExit::Interrupted {
            break;
        }
    }

    let _ = std::fs::remove_file(socket_path);
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum SessionExit {
    Ended,
    Interrupted,
}

/// Run one session on a blocking worker until the link ends or Ctrl+C.
async fn run_session(
    emulator: &Emulator,
    stream: std::os::unix::net::UnixStream,
) -> Result<SessionExit> {
    let handle = emulator.start(stream)?;
    let stop = handle.stop_handle();
    let mut worker = tokio::task::spawn_blocking(move || handle.join());

    let finished = tokio::select! {
        joined = &mut worker => Some(joined),
        _ = tokio::signal::ctrl_c() => None,
    };

    let (result, exit) = match finished {
        Some(joined) => (joined?, SessionExit::Ended),
        None => {
            info!("Shutting down...");
            stop.stop();
            match tokio::time::timeout(Duration::from_secs(2), worker).await {
                Ok(joined) => (joined?, SessionExit::Interrupted),
                Err(_) => {
                    warn!("Link thread did not stop in time");
                    return Ok(SessionExit::Interrupted);
                }
            }
        }
    };

    match result {
        Ok(LinkEnd::Closed) => info!("PC disconnected"),
        Ok(LinkEnd::Stopped) => {}
        Err(EmulatorError::Transport(e)) => {
            // The stream is out of step; the PC has to reconnect
            error!(error = %e, "Link failed");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(exit)
}

fn parse_poke(s: &str) -> std::result::Result<(u16, u8), String> {
    let (addr, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ADDR=VALUE, got {:?}", s))?;
    let addr = u16::from_str_radix(strip_hex_prefix(addr), 16)
        .map_err(|e| format!("Invalid address {:?}: {}", addr, e))?;
    let value = u8::from_str_radix(strip_hex_prefix(value), 16)
        .map_err(|e| format!("Invalid value {:?}: {}", value, e))?;
    Ok((addr, value))
}

fn strip_hex_prefix(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}
