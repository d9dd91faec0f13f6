//! Structured logging with `tracing`.
//!
//! Every crate logs through `tracing` macros with structured fields
//! (`conn_id`, `user_id`, `event_type`). The binary calls [`init_subscriber`]
//! once at startup; `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::EnvFilter;

/// Output format of the stderr subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse a format name, defaulting to compact for anything unrecognized.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Compact
        }
    }
}

/// Build the filter: `RUST_LOG` if set and valid, otherwise `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber writing to stderr.
///
/// Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails only when a global subscriber already exists
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
