//! Logging bootstrap.
//!
//! Logs go to stderr through `tracing-subscriber`, pretty-printed for a
//! terminal or as JSON lines for machine consumption. stdout stays
//! reserved for command output.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `default_level` is any `EnvFilter`
/// directive ("info", "warn", "cardmap_core=debug", ...); a set
/// `RUST_LOG` takes precedence over it.
pub fn init(default_level: &str, json_format: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json_format {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Initialize logging from the `[logging]` config section and the
/// global CLI flags. `--verbose` forces debug, `--json-logs` forces
/// JSON output; otherwise the configured level and format apply as-is.
pub fn init_from_config(config: &cardmap_core::Config, verbose: bool, json_logs: bool) {
    let level = effective_level(&config.logging.level, verbose);
    let json_format = json_logs || config.logging.format == "json";
    init(level, json_format);
}

fn effective_level(configured: &str, verbose: bool) -> &str {
    if verbose {
        "debug"
    } else {
        configured
    }
}
