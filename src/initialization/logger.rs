//! Logger initialization.
//!
//! Two output formats over `env_logger`: a timestamped plain layout for
//! terminals and JSON lines for log shippers. `RUST_LOG` is honored as the
//! baseline so `RUST_LOG=debug` works for quick debugging, but the explicit
//! level from the CLI wins.

use std::io::Write;

use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter};

use crate::config::LogFormat;
use crate::error_handling::InitializationError;

fn level_badge(level: Level) -> ColoredString {
    match level {
        Level::Error => "ERROR".red().bold(),
        Level::Warn => " WARN".yellow(),
        Level::Info => " INFO".green(),
        Level::Debug => "DEBUG".dimmed(),
        Level::Trace => "TRACE".dimmed(),
    }
}

/// Initializes the logger with the specified level and format.
pub fn init_logger_with(level: LevelFilter, format: LogFormat) -> Result<(), InitializationError> {
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .filter_level(level)
        // Dependency noise stays out of the polling logs.
        .filter_module("sqlx", LevelFilter::Warn)
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("accrual_agent", level);

    match format {
        LogFormat::Json => builder.format(|buf, record| {
            let line = serde_json::json!({
                "time": chrono::Utc::now().to_rfc3339(),
                "level": record.level().as_str(),
                "module": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{line}")
        }),
        LogFormat::Plain => builder.format(|buf, record| {
            writeln!(
                buf,
                "{} {} {} {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                level_badge(record.level()),
                record.target().dimmed(),
                record.args()
            )
        }),
    };

    // try_init() instead of init(): tests may initialize more than once.
    builder.try_init()?;

    Ok(())
}
