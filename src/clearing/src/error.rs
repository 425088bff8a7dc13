//! Error types for the clearing pipeline.

use thiserror::Error;

/// A clear request that violates one of the request invariants.
///
/// These are caller bugs. The router returns them before any work is
/// dispatched and the completion callback is never invoked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("remove mask must select at least one data category")]
    EmptyRemoveMask,

    #[error("a storage key and a storage key matcher cannot both scope a request")]
    KeyAndMatcher,

    #[error("cookie filter already carries a {bound} bound while the request specifies one")]
    CookieFilterTimeBound { bound: &'static str },

    #[error("internal attribution data can only be cleared together with site-created data")]
    AttributionInternalOnly,

    #[error("time range is inverted: begins {begin} but ends {end}")]
    InvertedTimeRange { begin: String, end: String },
}

/// A failure reported by one collaborating storage subsystem.
///
/// Subsystem failures are logged by the adapters and never abort a request.
#[derive(Debug, Error)]
pub enum SubsystemError {
    #[error("{subsystem} was shut down before it replied")]
    Disconnected { subsystem: &'static str },

    #[error("{subsystem} failed: {message}")]
    Failed {
        subsystem: &'static str,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SubsystemError {
    pub fn failed(subsystem: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            subsystem,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BarrierError {
    #[error("barrier signalled beyond its {reserved} reserved slots")]
    Overrun { reserved: usize },
}

/// Top-level error returned by the partition entry points.
#[derive(Debug, Error)]
pub enum ClearDataError {
    #[error("invalid clear request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("no tokio runtime available to run clearing tasks")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("invalid partition configuration: {0}")]
    Config(#[from] common::config::ConfigError),
}
