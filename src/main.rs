mod command;
mod device;
mod devices;
mod dispatcher;
mod error;
mod persistence;
mod playback;
mod transport;
mod wire;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use device::FfAdapter;
use devices::linux::LinuxFfDevice;
use dispatcher::Dispatcher;
use persistence::{JsonStore, KeyValueStore};

const DEVICE_PATH_VAR: &str = "VIBRATORD_DEVICE";
const LOCAL_SOCKET_VAR: &str = "VIBRATORD_LOCAL_SOCKET";
const RPMSG_SOCKET_VAR: &str = "VIBRATORD_RPMSG_SOCKET";
const STORE_PATH_VAR: &str = "VIBRATORD_STORE";

const DEFAULT_DEVICE_PATH: &str = "/dev/input/by-path/platform-vibrator-event";
const DEFAULT_LOCAL_SOCKET: &str = "/var/run/vibratord/local.sock";
const DEFAULT_RPMSG_SOCKET: &str = "/var/run/vibratord/rpmsg.sock";
const DEFAULT_STORE_PATH: &str = "/var/lib/vibratord/store.json";

#[derive(Parser)]
#[command(name = "vibratord")]
#[command(about = "Dual-transport force-feedback vibrator service daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service daemon (default when no subcommand is given).
    Serve,
    /// Open the configured device, print its capabilities and persisted
    /// intensity, and exit — field diagnostics without a client.
    Selftest,
}

fn env_path(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn open_adapter() -> anyhow::Result<FfAdapter<LinuxFfDevice>> {
    let device_path = env_path(DEVICE_PATH_VAR, DEFAULT_DEVICE_PATH);
    let device = LinuxFfDevice::open(&device_path)
        .with_context(|| format!("opening force-feedback device at {device_path}"))?;
    let adapter = FfAdapter::open(device)?;
    Ok(adapter)
}

fn run_serve() -> anyhow::Result<()> {
    let adapter = open_adapter()?;
    let store_path = env_path(STORE_PATH_VAR, DEFAULT_STORE_PATH);
    let store = JsonStore::open(&store_path)
        .with_context(|| format!("opening persistence store at {store_path}"))?;
    let dispatcher = Dispatcher::new(adapter, Box::new(store));

    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(sig, Arc::clone(&shutdown))
            .with_context(|| format!("registering handler for signal {sig}"))?;
    }

    let local_socket = env_path(LOCAL_SOCKET_VAR, DEFAULT_LOCAL_SOCKET);
    let rpmsg_socket = env_path(RPMSG_SOCKET_VAR, DEFAULT_RPMSG_SOCKET);
    log::info!("vibratord listening on {local_socket} and {rpmsg_socket}");
    transport::run(dispatcher, &local_socket, &rpmsg_socket, shutdown)?;
    log::info!("vibratord shut down");
    Ok(())
}

fn run_selftest() -> anyhow::Result<()> {
    let adapter = open_adapter()?;
    let capabilities = adapter.capabilities();
    println!("constant:  {}", capabilities.constant);
    println!("periodic:  {}", capabilities.periodic);

    let store_path = env_path(STORE_PATH_VAR, DEFAULT_STORE_PATH);
    let store = JsonStore::open(&store_path)?;
    let intensity = store.get_u8(persistence::INTENSITY_KEY);
    println!("persisted intensity: {intensity:?}");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_serve(),
        Commands::Selftest => run_selftest(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_serve() {
        let cli = Cli::parse_from(["vibratord"]);
        assert!(matches!(cli.command, None));
    }

    #[test]
    fn cli_accepts_selftest() {
        let cli = Cli::parse_from(["vibratord", "selftest"]);
        assert!(matches!(cli.command, Some(Commands::Selftest)));
    }
}
