//! Logging initialization with a reloadable level filter.
//!
//! The configured log level is part of the dynamically reloadable
//! server configuration, so the `EnvFilter` is installed behind a
//! `tracing_subscriber::reload` layer and re-applied by the reload
//! pipeline whenever the configuration changes.

use tracing::warn;
use tracing_subscriber::{
    EnvFilter,
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::error::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "ranged=info,rangeql=info";

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle used by the reload pipeline to apply a configured log level.
#[derive(Clone)]
pub struct LogHandle {
    handle: FilterHandle,
}

impl LogHandle {
    /// Apply a level name from the configuration file.
    ///
    /// Unknown names leave the current filter in place with a warning.
    pub fn set_level(&self, level: &str) {
        let directive = match level.to_ascii_lowercase().as_str() {
            "fatal" | "error" => "error",
            "warn" | "warning" => "warn",
            "info" => "info",
            "debug" => "debug",
            "trace" => "trace",
            other => {
                warn!(level = %other, "unknown loglevel in config, keeping current filter");
                return;
            }
        };

        let filter = EnvFilter::new(format!("ranged={directive},rangeql={directive}"));
        if let Err(err) = self.handle.reload(filter) {
            warn!(error = %err, "failed to apply loglevel");
        }
    }
}

/// Initialize the global subscriber with a reloadable filter.
///
/// `RUST_LOG` takes precedence for the initial filter; the config
/// file's `loglevel` is applied on the first reload cycle.
pub fn init() -> Result<LogHandle> {
    let initial =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, handle) = reload::Layer::new(initial);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|err| Error::Other(format!("failed to set global subscriber: {err}")))?;

    Ok(LogHandle { handle })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_workspace_crates() {
        assert!(DEFAULT_LOG_FILTER.contains("ranged=info"));
        assert!(DEFAULT_LOG_FILTER.contains("rangeql=info"));
    }
}
