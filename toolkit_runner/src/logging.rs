// THEORY:
// Library code only emits `tracing` events. This is the one place a subscriber
// is installed. `RUST_LOG` wins over the default directive when set, and the
// output is either pretty text or one JSON object per event.

use anyhow::{Result, anyhow};
use clap::ValueEnum;
use serde::Deserialize;
use std::io;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DIRECTIVE: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event, for log collectors
    Json,
    /// Human-readable output
    #[default]
    Pretty,
}

pub fn init(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_DIRECTIVE))?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_writer(io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}
