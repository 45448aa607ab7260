//! Log output for the `servitor` CLI.
//!
//! Chat replies are printed on stdout, so every log record goes to stderr.
//! `RUST_LOG` wins when set; otherwise `--verbose` picks the servitor level
//! and the HTTP and database crates stay at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose request-level chatter drowns out bridge events.
const QUIET_CRATES: &[&str] = &["hyper", "reqwest", "surrealdb"];

/// Filter used when `RUST_LOG` is unset.
fn default_filter(level: Level) -> String {
    let mut directives = vec![level.as_str().to_lowercase()];
    directives.extend(QUIET_CRATES.iter().map(|c| format!("{c}=warn")));
    directives.join(",")
}

/// Install the process-wide subscriber; `json` switches to one JSON object
/// per line for log shippers. Only the first call in a process has effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_quiets_transport_crates() {
        assert_eq!(
            default_filter(Level::DEBUG),
            "debug,hyper=warn,reqwest=warn,surrealdb=warn"
        );
        assert!(default_filter(Level::INFO).starts_with("info,"));
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
    }
}
