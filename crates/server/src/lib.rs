#![forbid(unsafe_code)]

pub mod command;
pub mod handler;
pub mod protocol;
pub mod service;
pub mod shutdown;
pub mod socket;

use handler::LicenseHandler;
use lm_storage::LicenseStore;
use shutdown::ShutdownToken;
use std::net::TcpListener;
use std::path::PathBuf;
use tracing::info;

/// Externally supplied settings: listening port, store location, and the
/// process-wide master serial added licenses must match.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub master_serial: String,
}

pub fn run(
    config: &ServiceConfig,
    shutdown: ShutdownToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = LicenseStore::open(&config.db_path)?;
    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    info!(port = config.port, db = %config.db_path.display(), "license manager listening");
    run_with_listener(store, &config.master_serial, listener, shutdown)
}

/// Wires the full service around an already-bound listener. Split out so
/// tests can run against an ephemeral port and an in-memory store.
pub fn run_with_listener(
    store: LicenseStore,
    master_serial: &str,
    listener: TcpListener,
    shutdown: ShutdownToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut handler = LicenseHandler::new(store, master_serial.to_string());
    // The table must be consistent before the first command is accepted.
    handler.startup()?;

    let (requests, service) = service::spawn(handler, shutdown.clone());
    socket::serve_with_listener(listener, requests, shutdown)?;

    service
        .join()
        .map_err(|_| "store service thread panicked")?;
    Ok(())
}
