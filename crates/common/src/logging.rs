//! Logging utilities for VirtualGW components.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Handle for adjusting the active log filter after initialization.
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    base: String,
    debug: Arc<AtomicBool>,
}

impl LogHandle {
    fn new(filter: reload::Handle<EnvFilter, Registry>, base: String) -> Self {
        Self {
            filter,
            base,
            debug: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flip between the configured filter and `debug`.
    ///
    /// Returns whether debug logging is now active.
    pub fn toggle_debug(&self) -> Result<bool> {
        let enable = !self.debug.load(Ordering::SeqCst);
        let directives = if enable { "debug" } else { self.base.as_str() };
        self.filter
            .reload(build_filter(directives))
            .map_err(Error::other)?;
        self.debug.store(enable, Ordering::SeqCst);
        Ok(enable)
    }

    /// Whether the debug override is active.
    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::SeqCst)
    }

    /// The filter directives used outside of debug mode.
    pub fn base_directives(&self) -> &str {
        &self.base
    }
}

/// Initialize tracing with a reloadable filter.
///
/// The RUST_LOG environment variable takes precedence over `level`.
pub fn init(format: LogFormat, level: &str) -> LogHandle {
    let base = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    let (filter, handle) = reload::Layer::new(build_filter(&base));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }

    LogHandle::new(handle, base)
}

fn build_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}
