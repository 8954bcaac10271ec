use slog::Logger;
use sloggers::{Config, LoggerConfig};

use crate::config::Log;

/// Builds the process-wide root logger from the `log` config section.
///
/// Grounded on `lib/flux/src/logging.rs`: that file builds a `sloggers::LoggerConfig` from a
/// literal TOML string (`type = "terminal"`, `level = "debug"`, `destination = "stderr"`) and
/// leaves three `TODO` lines about wiring it up to real config. This completes exactly that
/// sketch by rendering the TOML from our own `log` config section instead of a literal, so the
/// sink and level are operator-controlled rather than hardcoded.
pub fn init(config: &Log) -> Logger {
    let sink_type = match config.sink.as_str() {
        "json" => "file",
        _ => "terminal",
    };

    let toml = match sink_type {
        "file" => format!(
            "type = \"file\"\nlevel = \"{}\"\npath = \"gate.log\"\nformat = \"json\"\n",
            config.level
        ),
        _ => format!(
            "type = \"terminal\"\nlevel = \"{}\"\ndestination = \"stderr\"\n",
            config.level
        ),
    };

    let logger_config: LoggerConfig = serdeconv::from_toml_str(&toml)
        .expect("gate log config did not parse as a sloggers::LoggerConfig");
    logger_config
        .build_logger()
        .expect("failed to build the configured log sink")
}
