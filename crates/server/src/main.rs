#![forbid(unsafe_code)]

use lm_server::ServiceConfig;
use lm_server::shutdown::ShutdownToken;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const SERVER_NAME: &str = "lm_server";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_PORT: u16 = 4100;
const DEFAULT_DB_PATH: &str = "licenses.db";
const DEFAULT_MASTER_SERIAL: &str = "0000-0000-0000";

fn usage() -> &'static str {
    "lm_server — license-management service (newline-JSON commands over TCP)\n\n\
USAGE:\n\
  lm_server [--port PORT] [--db-path FILE] [--master-serial SERIAL]\n\
\n\
FLAGS:\n\
  -h, --help       Print this help and exit\n\
  -V, --version    Print version and exit\n\
\n\
ENVIRONMENT:\n\
  LICENSED_PORT            Listening port (default 4100)\n\
  LICENSED_DB_PATH         SQLite database file (default ./licenses.db)\n\
  LICENSED_MASTER_SERIAL   Master serial added licenses must match\n\
  RUST_LOG                 Log filter (default info)\n"
}

fn version_line() -> String {
    format!("{SERVER_NAME} {SERVER_VERSION}")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = std::env::args().collect::<Vec<_>>();
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print!("{}", usage());
        return Ok(());
    }
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-V" | "--version"))
    {
        println!("{}", version_line());
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig {
        port: parse_port(&args),
        db_path: parse_db_path(&args),
        master_serial: parse_master_serial(&args),
    };

    let shutdown = ShutdownToken::new();
    lm_server::run(&config, shutdown)
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            return iter.next().cloned();
        }
    }
    None
}

fn parse_port(args: &[String]) -> u16 {
    let raw = flag_value(args, "--port").or_else(|| std::env::var("LICENSED_PORT").ok());
    match raw {
        Some(value) => value.trim().parse::<u16>().unwrap_or_else(|_| {
            warn!(%value, "unusable port, falling back to the default");
            DEFAULT_PORT
        }),
        None => DEFAULT_PORT,
    }
}

fn parse_db_path(args: &[String]) -> PathBuf {
    flag_value(args, "--db-path")
        .or_else(|| std::env::var("LICENSED_DB_PATH").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
}

fn parse_master_serial(args: &[String]) -> String {
    flag_value(args, "--master-serial")
        .or_else(|| std::env::var("LICENSED_MASTER_SERIAL").ok())
        .unwrap_or_else(|| {
            warn!("no master serial configured, using the development default");
            DEFAULT_MASTER_SERIAL.to_string()
        })
}
