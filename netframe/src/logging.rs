//! Structured logging setup, following the same terminal-sink pattern the
//! rest of the stack uses: a small `sloggers::LoggerConfig` built from a toml
//! snippet, producing a root `slog::Logger` that callers attach component
//! tags to with `log.new(o!(...))`.

pub use slog::{debug, info, o, warn, Logger};
pub use sloggers::types::Severity;
use sloggers::{Build, Config};

/// Build the root logger for the runtime. `level` controls verbosity; callers
/// typically derive it from [`crate::config::ServerConfig::log_level`] or
/// [`crate::config::ClientConfig::log_level`].
pub fn init(level: Severity) -> Logger {
    let toml = format!(
        r#"
type = "terminal"
level = "{}"
destination = "stderr"
"#,
        severity_name(level)
    );

    let config: sloggers::LoggerConfig =
        serdeconv::from_toml_str(&toml).expect("invalid built-in logger config");
    config.build_logger().expect("failed to build logger")
}

/// A logger that discards everything, useful for tests that don't want
/// terminal noise.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, o!())
}

fn severity_name(level: Severity) -> &'static str {
    match level {
        Severity::Trace => "trace",
        Severity::Debug => "debug",
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Error => "error",
        Severity::Critical => "critical",
    }
}
