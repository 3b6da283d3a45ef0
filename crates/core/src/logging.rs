//! Logging and observability
//!
//! Structured logging via `tracing-subscriber`, in text or JSON, selected at
//! runtime from the CLI flag or environment. All log output goes to stderr so
//! stdout stays reserved for command results.

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Environment variable selecting the log format ("json" or "text")
pub const ENV_LOG_FORMAT: &str = "BURROW_LOG_FORMAT";
/// Environment variable holding an `EnvFilter` directive
pub const ENV_LOG: &str = "BURROW_LOG";
/// Environment variable overriding span lifecycle events
pub const ENV_LOG_SPAN_EVENTS: &str = "BURROW_LOG_SPAN_EVENTS";

/// Initialize the logging system
///
/// Safe to call more than once; only the first call installs a subscriber.
///
/// * `format` - `None`/`"text"` for human-readable output, `"json"` for
///   structured output. When `None`, `BURROW_LOG_FORMAT` is consulted.
///
/// The filter comes from `BURROW_LOG`, then `RUST_LOG`, then `info`.
pub fn init(format: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter();

        let env_format = std::env::var(ENV_LOG_FORMAT).ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");
        let span_events = span_events_for_format(effective_format);

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_span_events(span_events)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .with_target(false)
                            .with_span_events(span_events)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

fn create_env_filter() -> EnvFilter {
    if let Ok(spec) = std::env::var(ENV_LOG) {
        EnvFilter::try_new(&spec).unwrap_or_else(|_| {
            eprintln!("Invalid {} specification '{}', using 'info'", ENV_LOG, spec);
            EnvFilter::new("info")
        })
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn span_events_for_format(format: &str) -> fmt::format::FmtSpan {
    use fmt::format::FmtSpan;

    if let Ok(raw) = std::env::var(ENV_LOG_SPAN_EVENTS) {
        let mut acc = FmtSpan::NONE;
        for token in raw.split(&[',', '|'][..]).map(|t| t.trim().to_lowercase()) {
            acc |= match token.as_str() {
                "new" => FmtSpan::NEW,
                "close" => FmtSpan::CLOSE,
                "enter" => FmtSpan::ENTER,
                "exit" => FmtSpan::EXIT,
                "active" => FmtSpan::ACTIVE,
                "full" => FmtSpan::FULL,
                _ => FmtSpan::NONE,
            };
        }
        return acc;
    }

    match format {
        "json" => FmtSpan::NEW | FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

/// Check if logging has been initialized
pub fn is_initialized() -> bool {
    INIT.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmt::format::FmtSpan;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_init_multiple_calls_safe() {
        assert!(init(None).is_ok());
        assert!(init(Some("json")).is_ok());
        assert!(init(Some("bogus")).is_ok());
        assert!(is_initialized());
    }

    #[test]
    #[serial]
    fn test_span_events_defaults() {
        std::env::remove_var(ENV_LOG_SPAN_EVENTS);
        assert_eq!(span_events_for_format("text"), FmtSpan::NONE);
        assert_eq!(
            span_events_for_format("json"),
            FmtSpan::NEW | FmtSpan::CLOSE
        );
    }

    #[test]
    #[serial]
    fn test_span_events_env_override() {
        std::env::set_var(ENV_LOG_SPAN_EVENTS, "new|close");
        assert_eq!(
            span_events_for_format("text"),
            FmtSpan::NEW | FmtSpan::CLOSE
        );
        std::env::remove_var(ENV_LOG_SPAN_EVENTS);
    }
}
