//! Log callback plumbing.
//!
//! Every diagnostic goes to `tracing`. When the settings allow it, the same
//! line is also handed to the user's callback.

use std::fmt;
use std::sync::Arc;

/// Callback receiving one human-readable diagnostic line per call.
///
/// The callback may be invoked from any thread that drives a socket, so it
/// must be thread-safe.
pub type LogFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Log capability handed to every socket object.
#[derive(Clone, Default)]
pub struct Logger {
    callback: Option<LogFn>,
    enabled: bool,
}

impl Logger {
    /// Forwards diagnostic lines to `callback`.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
            enabled: true,
        }
    }

    /// A logger without a callback. Lines still reach `tracing`.
    pub fn none() -> Self {
        Self::default()
    }

    /// Turns forwarding on or off without dropping the callback.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    // Settings can only switch forwarding off, never on.
    pub(crate) fn gated(mut self, allowed: bool) -> Self {
        self.enabled &= allowed;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.callback.is_some()
    }

    pub(crate) fn line(&self, line: &str) {
        if !self.enabled {
            return;
        }
        if let Some(callback) = &self.callback {
            callback(line);
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("callback", &self.callback.is_some())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Emits a `tracing` event and forwards the formatted line to a [`Logger`].
macro_rules! report {
    ($log:expr, $level:ident, $($arg:tt)+) => {{
        let line = format!($($arg)+);
        tracing::$level!("{}", line);
        $log.line(&line);
    }};
}

pub(crate) use report;
