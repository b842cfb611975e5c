mod bridge;
mod cli;
mod error_fmt;
mod remote;
mod simulate;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;
use tetra_core::{StorePaths, TetraError};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    if let Err(e) = run(cli) {
        let code = exit_code_for_error(&e);
        tracing::error!(error = %e, code, "exiting");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(&cli.config)?;
    let level = cli
        .log_level
        .as_deref()
        .or(cfg.logging.level.as_deref())
        .unwrap_or("info");
    init_tracing(cli.json, level, &cfg.logging)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
            .wrap_err("install Ctrl-C handler")?;
    }

    match cli.cmd {
        Commands::Bridge {
            port,
            baud,
            store_url,
        } => {
            let stats = bridge::run_bridge(&cfg, &port, baud, store_url, &shutdown)?;
            println!("{}", bridge::render_stats(&stats, cli.json));
        }
        Commands::Simulate {
            seconds,
            start,
            realtime,
        } => {
            let report = simulate::run_simulation(&cfg, seconds, start, realtime, &shutdown)?;
            if cli.json {
                println!("{}", report.to_json());
            } else {
                println!("{}", report.render());
            }
        }
        Commands::StoreCheck { store_url } => {
            let url = bridge::require_url(store_url, &cfg)?;
            let mut store = remote::HttpStore::new(
                &url,
                StorePaths::from(&cfg.store),
                Duration::from_millis(cfg.store.timeout_ms),
            )?;
            let report = remote::probe(&mut store)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "store": url,
                        "control_present": report.control_present,
                        "missing_fields": report.missing_fields,
                    })
                );
            } else if report.control_present {
                println!("store ok: control document present at {url}");
                if !report.missing_fields.is_empty() {
                    println!("missing fields: {}", report.missing_fields.join(", "));
                }
            } else {
                println!("store ok: no control document yet at {url}");
            }
        }
    }
    Ok(())
}

/// Load and validate the config; an absent file means built-in defaults.
fn load_config(path: &Path) -> eyre::Result<tetra_config::Config> {
    if !path.exists() {
        return Ok(tetra_config::Config::default());
    }
    let text = std::fs::read_to_string(path).map_err(|e| {
        eyre::Report::new(TetraError::Config(format!("read {}: {e}", path.display())))
    })?;
    let cfg = tetra_config::load_toml(&text)
        .map_err(eyre::Report::new)
        .wrap_err_with(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .map_err(|e| eyre::Report::new(TetraError::Config(e.to_string())))?;
    Ok(cfg)
}

/// Console logs go to stderr (pretty or JSON lines). `[logging].file` adds a
/// JSON-lines file sink with the configured rotation. `RUST_LOG` directives
/// are layered over `level`.
fn init_tracing(json: bool, level: &str, logging: &tetra_config::Logging) -> eyre::Result<()> {
    let default_level: LevelFilter = level.parse().map_err(|_| {
        eyre::Report::new(TetraError::Config(format!(
            "unknown log level {level:?} (expected error|warn|info|debug|trace)"
        )))
    })?;
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let console = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    };

    let file = match logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path.file_name().ok_or_else(|| {
                eyre::Report::new(TetraError::Config(format!(
                    "logging.file {file:?} has no file name"
                )))
            })?;
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| eyre::eyre!("install tracing subscriber: {e}"))
}
