use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::parse_bool_var;

static INIT: OnceCell<()> = OnceCell::new();

pub const OBSERVABILITY_ENABLED_ENV: &str = "CHAT_RELAY_OBSERVABILITY_ENABLED";
pub const OBSERVABILITY_ENV: &str = "CHAT_RELAY_OBSERVABILITY";
pub const LOG_LEVEL_ENV: &str = "CHAT_RELAY_LOG_LEVEL";
pub const JSON_LOG_PATH_ENV: &str = "CHAT_RELAY_JSON_LOG_PATH";

const DEFAULT_LOG_FILE: &str = "chat-relay.logs.jsonl";

/// Where log lines go once tracing is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogSink {
    Disabled,
    /// Compact lines on stderr; stdout is reserved for wire events.
    Console,
    JsonFile { dir: PathBuf, file_name: String },
}

/// Reads the enable flag. The first variable that is set wins.
///
/// An unparseable value is reported on stderr and logging stays enabled,
/// since tracing is not installed yet and cannot carry the warning itself.
fn observability_enabled(lookup: &impl Fn(&str) -> Option<String>) -> bool {
    for key in [OBSERVABILITY_ENABLED_ENV, OBSERVABILITY_ENV] {
        match parse_bool_var(lookup, key) {
            Ok(Some(enabled)) => return enabled,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("chat-relay: {err}; keeping observability enabled");
                return true;
            }
        }
    }
    true
}

fn resolve_sink(lookup: &impl Fn(&str) -> Option<String>) -> LogSink {
    if !observability_enabled(lookup) {
        return LogSink::Disabled;
    }
    let Some(raw) = lookup(JSON_LOG_PATH_ENV).filter(|p| !p.trim().is_empty()) else {
        return LogSink::Console;
    };
    let path = PathBuf::from(raw.trim());
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    LogSink::JsonFile { dir, file_name }
}

fn resolve_env_filter(lookup: &impl Fn(&str) -> Option<String>) -> EnvFilter {
    if let Some(level) = lookup(LOG_LEVEL_ENV) {
        match EnvFilter::try_new(&level) {
            Ok(filter) => return filter,
            Err(err) => eprintln!("chat-relay: invalid {LOG_LEVEL_ENV} `{level}`: {err}"),
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing once per process.
///
/// Environment variables:
/// - `CHAT_RELAY_OBSERVABILITY_ENABLED` / `CHAT_RELAY_OBSERVABILITY`: enable flag
///   (default enabled; an invalid value is reported on stderr).
/// - `CHAT_RELAY_LOG_LEVEL`: level/filter override (`info`, `chat_relay=debug`, ...).
/// - `CHAT_RELAY_JSON_LOG_PATH`: JSONL log file. Without it, logs go to stderr.
/// - `RUST_LOG`: fallback filter.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let lookup = |key: &str| std::env::var(key).ok();
        let sink = resolve_sink(&lookup);
        if sink == LogSink::Disabled {
            return;
        }
        let env_filter = resolve_env_filter(&lookup);
        let registry = tracing_subscriber::registry().with(env_filter);

        match sink {
            LogSink::JsonFile { dir, file_name } => {
                let _ = std::fs::create_dir_all(&dir);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = registry.with(json_layer).try_init();
            }
            LogSink::Console | LogSink::Disabled => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = registry.with(console_layer).try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn init_is_idempotent() {
        init_observability();
        init_observability();
        assert!(INIT.get().is_some());
    }

    #[test]
    fn flag_defaults_on_and_first_set_variable_wins() {
        assert!(observability_enabled(&lookup(&[])));
        assert!(!observability_enabled(&lookup(&[(OBSERVABILITY_ENV, "off")])));
        assert!(observability_enabled(&lookup(&[
            (OBSERVABILITY_ENABLED_ENV, "yes"),
            (OBSERVABILITY_ENV, "off"),
        ])));
    }

    #[test]
    fn invalid_flag_keeps_logging_enabled() {
        assert!(observability_enabled(&lookup(&[(OBSERVABILITY_ENABLED_ENV, "sometimes")])));
        assert!(observability_enabled(&lookup(&[
            (OBSERVABILITY_ENABLED_ENV, "sometimes"),
            (OBSERVABILITY_ENV, "off"),
        ])));
    }

    #[test]
    fn sink_follows_flag_and_log_path() {
        assert_eq!(
            resolve_sink(&lookup(&[(OBSERVABILITY_ENV, "false")])),
            LogSink::Disabled
        );
        assert_eq!(resolve_sink(&lookup(&[])), LogSink::Console);
        assert_eq!(
            resolve_sink(&lookup(&[(JSON_LOG_PATH_ENV, "logs/relay.jsonl")])),
            LogSink::JsonFile {
                dir: PathBuf::from("logs"),
                file_name: "relay.jsonl".into()
            }
        );
        assert_eq!(
            resolve_sink(&lookup(&[(JSON_LOG_PATH_ENV, "relay.jsonl")])),
            LogSink::JsonFile {
                dir: PathBuf::from("."),
                file_name: "relay.jsonl".into()
            }
        );
    }
}
