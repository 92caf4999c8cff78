//! Logging setup shared by every binary
//!
//! `RUST_LOG` takes precedence; otherwise `feedgen=<level>,info`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Filter used when `RUST_LOG` is unset
pub fn default_directive(level: &str) -> String {
    format!("feedgen={},info", level.to_lowercase())
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive(level).into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive("DEBUG"), "feedgen=debug,info");
        assert!(EnvFilter::try_new(default_directive("warn")).is_ok());
    }
}
