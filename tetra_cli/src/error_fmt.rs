//! Human-readable error descriptions and structured JSON error formatting.

/// Exit code for configuration problems (clap also uses 2 for usage errors).
pub const EXIT_CONFIG: i32 = 2;
/// Exit code when the device transport cannot be opened.
pub const EXIT_TRANSPORT: i32 = 3;
/// Exit code when the remote store cannot be reached.
pub const EXIT_STORE: i32 = 4;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use tetra_core::error::{BuildError, TetraError};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingTransport => {
                "What happened: No transport was provided to the device runtime.\nLikely causes: The link was not wired into the builder.\nHow to fix: Pass a transport via with_transport(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/tetra_config.toml for a sample."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<TetraError>() {
        return match te {
            TetraError::Transport(msg) => format!(
                "What happened: The device link could not be used ({msg}).\nLikely causes: Wrong port path, device unplugged, or no permission on the tty (dialout group).\nHow to fix: Check `ls /dev/tty*`, reconnect the board, and confirm the baud matches the firmware."
            ),
            TetraError::Store(msg) => format!(
                "What happened: The remote store did not answer ({msg}).\nLikely causes: Wrong store URL, no network, or the database rules reject unauthenticated access.\nHow to fix: Verify [store].url or --store-url and try `tetra store-check`."
            ),
            TetraError::Config(msg) => format!(
                "What happened: Configuration is invalid ({msg}).\nLikely causes: A typo in the TOML or an out-of-range value.\nHow to fix: Edit the config file, then rerun. See etc/tetra_config.toml for a sample."
            ),
            TetraError::Timeout(msg) => format!(
                "What happened: An operation timed out ({msg}).\nLikely causes: Slow network or an unresponsive device.\nHow to fix: Raise [store].timeout_ms or check the link."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<toml::de::Error>() {
        return format!(
            "What happened: The config file is not valid TOML.\nLikely causes: {}\nHow to fix: Fix the syntax at the reported position and rerun.",
            te.message()
        );
    }

    let msg = err.to_string();
    if msg.to_ascii_lowercase().contains("tracing subscriber") {
        return format!(
            "What happened: Logging could not be initialized ({msg}).\nLikely causes: The log file directory is missing or not writable.\nHow to fix: Check [logging].file or remove it to log to the console only."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per failure class; anything unclassified returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use tetra_core::error::{BuildError, TetraError};
    if let Some(te) = err.downcast_ref::<TetraError>() {
        return match te {
            TetraError::Config(_) => EXIT_CONFIG,
            TetraError::Transport(_) => EXIT_TRANSPORT,
            TetraError::Store(_) | TetraError::Timeout(_) => EXIT_STORE,
            _ => 1,
        };
    }
    if err.downcast_ref::<BuildError>().is_some() || err.downcast_ref::<toml::de::Error>().is_some()
    {
        return EXIT_CONFIG;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    use tetra_core::error::TetraError;
    match err.downcast_ref::<TetraError>() {
        Some(TetraError::Config(_)) => "Config",
        Some(TetraError::Transport(_)) => "Transport",
        Some(TetraError::Store(_)) => "Store",
        Some(TetraError::Timeout(_)) => "Timeout",
        _ if exit_code_for_error(err) == EXIT_CONFIG => "Config",
        _ => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;
    json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
