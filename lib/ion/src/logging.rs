pub use slog::{crit, debug, error, info, o, trace, warn};
pub use slog::{Discard, Drain, Logger};

/// Builds the root terminal logger. Components derive child loggers from this
/// via `Logger::new`, or run silent with `Logger::root(Discard, o!())`.
pub fn init() -> Logger {
    use sloggers::{Config, LoggerConfig};

    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("Malformed logger configuration");

    config.build_logger().expect("Logger construction failed")
}
