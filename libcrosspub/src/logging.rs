//! Logging setup shared by the Crosspub binaries
//!
//! Each binary picks its own default quietness: the daemon logs dispatch
//! activity at info, while the one-shot CLIs stay near-silent unless asked.
//! `--verbose` forces debug, `RUST_LOG` overrides everything, and
//! `CROSSPUB_LOG_FORMAT` switches between text, json, and pretty output.
//! Logs go to stderr so stdout stays pipeable.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain text without targets, for terminals and piping
    Text,
    /// One JSON object per line, for log shippers
    Json,
    /// Multi-line colored output, for development
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }

    /// The format selected by `CROSSPUB_LOG_FORMAT`, defaulting to text.
    /// An unrecognized value falls back to text rather than erroring, so a
    /// typo never silences a daemon.
    pub fn from_env() -> Self {
        std::env::var("CROSSPUB_LOG_FORMAT")
            .ok()
            .and_then(|s| Self::parse(&s))
            .unwrap_or(Self::Text)
    }
}

/// Install the global subscriber for a binary.
///
/// `default_level` applies when neither `verbose` nor `RUST_LOG` nor
/// `CROSSPUB_LOG_LEVEL` says otherwise.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed
pub fn init(verbose: bool, default_level: &str) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        let level =
            std::env::var("CROSSPUB_LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match LogFormat::from_env() {
        LogFormat::Json => builder.json().flatten_event(true).init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Text => builder.with_target(false).init(),
    }
}
