use clap::ValueEnum;
use std::fmt::Display;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, ErrorDetails};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Set up logs. Filtering defaults to `info` and is overridable with
/// `RUST_LOG`.
pub fn setup_observability(log_format: LogFormat) -> Result<(), Error> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match log_format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .try_init(),
    };

    result.map_err(|e| {
        Error::new(ErrorDetails::Observability {
            message: format!("Failed to initialize tracing subscriber: {e}"),
        })
    })
}
