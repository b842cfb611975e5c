//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "tetra", version, about = "Tetracycle device simulator and store bridge")]
pub struct Cli {
    /// Path to config TOML; built-in defaults are used when the file is absent
    #[arg(long, value_name = "FILE", default_value = "etc/tetra_config.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty, and print results as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bridge a device on a serial port to the remote store
    Bridge {
        /// Serial device path, e.g. /dev/ttyACM0
        #[arg(value_name = "PORT")]
        port: PathBuf,
        /// Baud rate (defaults to [serial].baud)
        #[arg(long, value_name = "BAUD")]
        baud: Option<u32>,
        /// Store base URL (defaults to [store].url; in-memory when neither is set)
        #[arg(long, value_name = "URL")]
        store_url: Option<String>,
    },
    /// Run the device and the bridge in-process over a loopback link
    Simulate {
        /// Simulated seconds to run
        #[arg(long, value_name = "SECS", default_value_t = 60)]
        seconds: u64,
        /// Set system=1 in the control document before the first pass
        #[arg(long, action = ArgAction::SetTrue)]
        start: bool,
        /// Run against the wall clock instead of accelerated time
        #[arg(long, action = ArgAction::SetTrue)]
        realtime: bool,
    },
    /// Read and stamp the control document to check store connectivity
    StoreCheck {
        /// Store base URL (defaults to [store].url)
        #[arg(long, value_name = "URL")]
        store_url: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bridge_takes_a_port_and_overrides() {
        let cli = Cli::try_parse_from([
            "tetra",
            "bridge",
            "/dev/ttyACM0",
            "--baud",
            "115200",
            "--store-url",
            "http://localhost:9000",
        ])
        .unwrap();
        match cli.cmd {
            Commands::Bridge {
                port,
                baud,
                store_url,
            } => {
                assert_eq!(port, PathBuf::from("/dev/ttyACM0"));
                assert_eq!(baud, Some(115_200));
                assert_eq!(store_url.as_deref(), Some("http://localhost:9000"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from("etc/tetra_config.toml"));
    }
}
