use env_logger::Env;
use log::LevelFilter;
use once_cell::sync::OnceCell;

static RUST_LOG_LEVEL: OnceCell<LevelFilter> = OnceCell::new();

fn env_level() -> LevelFilter {
    std::env::var("FLOATLINK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .as_deref()
        .and_then(parse_level)
        .unwrap_or(LevelFilter::Info)
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

fn parse_level(input: &str) -> Option<LevelFilter> {
    input.trim().parse::<LevelFilter>().ok()
}

/// Initialize stderr logging based on `FLOATLINK_LOG`/`RUST_LOG`.
///
/// Safe to call multiple times; the first call wins and its level is returned on every call.
pub fn init_logging() -> LevelFilter {
    init_logging_with(None)
}

/// Like [`init_logging`], but an explicit level (e.g. from a `--log-level` flag) takes
/// precedence over the environment.
pub fn init_logging_with(level: Option<&str>) -> LevelFilter {
    *RUST_LOG_LEVEL.get_or_init(|| {
        let level = level.and_then(parse_level).unwrap_or_else(env_level);
        let env = Env::default().default_filter_or(level_to_str(level));
        // try_init: a host application may already own the global logger
        let _ = env_logger::Builder::from_env(env)
            .filter_level(level)
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(true)
            .try_init();
        level
    })
}

/// Level applied by the first successful [`init_logging`] call, if any.
pub fn log_level() -> Option<LevelFilter> {
    RUST_LOG_LEVEL.get().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(parse_level("debug"), Some(LevelFilter::Debug));
        assert_eq!(parse_level(" WARN "), Some(LevelFilter::Warn));
        assert_eq!(parse_level("chatty"), None);
    }

    #[test]
    fn init_is_idempotent() {
        let first = init_logging_with(Some("trace"));
        let second = init_logging_with(Some("error"));
        assert_eq!(first, second);
        assert_eq!(log_level(), Some(first));
    }
}
