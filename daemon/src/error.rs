//! Error types for the claim overlay mirror.

use shared::Rgb;
use std::fmt;

/// Everything that can go wrong while starting up or running a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The claims registry could not be read this cycle.
    SourceUnavailable { reason: String },
    /// The overlay refused to create a marker.
    MarkerCreateFailed { marker_id: String, claim_id: u64 },
    /// A configured color was not valid hex; `fallback` is used instead.
    StyleParseError {
        setting: String,
        value: String,
        fallback: Rgb,
    },
    /// A numeric setting was out of range and was replaced.
    InvalidSetting {
        setting: String,
        value: String,
        replacement: String,
    },
    /// A required collaborator is not present.
    DependencyMissing { name: String },
    /// A required collaborator is present but inactive.
    DependencyDisabled { name: String },
    /// The claims layer could neither be found nor created.
    LayerSetupFailed { layer_id: String },
    /// The configuration file exists but could not be read or parsed.
    Config(String),
    Io(String),
}

impl SyncError {
    /// True for errors that stop the subsystem from ever running a cycle.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::DependencyMissing { .. }
                | Self::DependencyDisabled { .. }
                | Self::LayerSetupFailed { .. }
                | Self::Config(_)
        )
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceUnavailable { reason } => {
                write!(f, "claims source unavailable: {reason}")
            }
            Self::MarkerCreateFailed {
                marker_id,
                claim_id,
            } => write!(
                f,
                "overlay rejected marker '{marker_id}' for claim {claim_id}"
            ),
            Self::StyleParseError {
                setting,
                value,
                fallback,
            } => write!(
                f,
                "setting '{setting}': cannot parse color '{value}', using {fallback}"
            ),
            Self::InvalidSetting {
                setting,
                value,
                replacement,
            } => write!(
                f,
                "setting '{setting}': value {value} out of range, using {replacement}"
            ),
            Self::DependencyMissing { name } => write!(f, "required dependency '{name}' not found"),
            Self::DependencyDisabled { name } => {
                write!(f, "required dependency '{name}' is disabled")
            }
            Self::LayerSetupFailed { layer_id } => {
                write!(f, "failed to set up overlay layer '{layer_id}'")
            }
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Failure of a single overlay mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    UnknownMarker(u64),
    UnknownLayer(String),
    Rejected(String),
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMarker(handle) => write!(f, "no marker with handle {handle}"),
            Self::UnknownLayer(id) => write!(f, "no layer with id '{id}'"),
            Self::Rejected(msg) => write!(f, "overlay rejected request: {msg}"),
        }
    }
}

impl std::error::Error for OverlayError {}
