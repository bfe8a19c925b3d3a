//! Settings loading and eager validation.
//!
//! The on-disk TOML is deserialized into `Raw*` structs where every field has a
//! default, then resolved once into [`Config`]. Resolution never fails: bad
//! values fall back to their defaults and are returned as warnings so the
//! caller decides how loudly to report them.

use crate::error::SyncError;
use log::info;
use serde::Deserialize;
use shared::{FillStyle, LineStyle, Rgb, DEFAULT_COLOR};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_UPDATE_RATE_SECONDS: u64 = 30;
/// Shortest period the runner will tick at.
pub const MIN_UPDATE_RATE: Duration = Duration::from_secs(1);
pub const DEFAULT_LAYER_ID: &str = "claims.markerset";
pub const DEFAULT_LAYER_NAME: &str = "Claims";
pub const DEFAULT_LAYER_PRIORITY: i32 = 10;
pub const DEFAULT_AVATAR_URL: &str = "https://minotar.net/helm/{owner}/32.png";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub update_rate_seconds: i64,
    pub show_child_claims: bool,
    pub layer: RawLayer,
    pub marker: RawMarker,
    pub popup: RawPopup,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            update_rate_seconds: DEFAULT_UPDATE_RATE_SECONDS as i64,
            show_child_claims: true,
            layer: RawLayer::default(),
            marker: RawMarker::default(),
            popup: RawPopup::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawLayer {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub hidden_by_default: bool,
}

impl Default for RawLayer {
    fn default() -> Self {
        Self {
            id: DEFAULT_LAYER_ID.to_string(),
            name: DEFAULT_LAYER_NAME.to_string(),
            priority: DEFAULT_LAYER_PRIORITY,
            hidden_by_default: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawMarker {
    pub line: RawLine,
    pub fill: RawFill,
    pub admin: RawStyle,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawStyle {
    pub line: RawLine,
    pub fill: RawFill,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawLine {
    pub color: String,
    pub weight: i64,
    pub opacity: f64,
}

impl Default for RawLine {
    fn default() -> Self {
        let line = LineStyle::default();
        Self {
            color: line.color.to_hex(),
            weight: line.weight as i64,
            opacity: line.opacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawFill {
    pub color: String,
    pub opacity: f64,
}

impl Default for RawFill {
    fn default() -> Self {
        let fill = FillStyle::default();
        Self {
            color: fill.color.to_hex(),
            opacity: fill.opacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawPopup {
    pub show_avatar: bool,
    pub avatar_url: String,
}

impl Default for RawPopup {
    fn default() -> Self {
        Self {
            show_avatar: true,
            avatar_url: DEFAULT_AVATAR_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerConfig {
    pub id: String,
    pub label: String,
    pub priority: i32,
    pub hidden_by_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MarkerStyle {
    pub line: LineStyle,
    pub fill: FillStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PopupConfig {
    pub show_avatar: bool,
    /// URL template; `{owner}` is replaced with the owner's name.
    pub avatar_url: String,
}

/// Fully validated runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub update_rate: Duration,
    pub show_child_claims: bool,
    pub layer: LayerConfig,
    pub style: MarkerStyle,
    pub admin_style: MarkerStyle,
    pub popup: PopupConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config::resolve(RawConfig::default()).0
    }
}

impl Config {
    /// Loads settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<(Config, Vec<SyncError>), SyncError> {
        if !path.exists() {
            info!(
                "No config at {}, using default settings",
                path.display()
            );
            return Ok((Config::default(), Vec::new()));
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        Config::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<(Config, Vec<SyncError>), SyncError> {
        let raw: RawConfig = toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        Ok(Config::resolve(raw))
    }

    /// Validates a raw config, replacing bad values with defaults.
    pub fn resolve(raw: RawConfig) -> (Config, Vec<SyncError>) {
        let mut warnings = Vec::new();

        let update_rate_seconds = if raw.update_rate_seconds < 1 {
            warnings.push(SyncError::InvalidSetting {
                setting: "update_rate_seconds".to_string(),
                value: raw.update_rate_seconds.to_string(),
                replacement: "1".to_string(),
            });
            1
        } else {
            raw.update_rate_seconds as u64
        };

        let style = resolve_style("marker", &raw.marker.line, &raw.marker.fill, &mut warnings);
        let admin_style = resolve_style(
            "marker.admin",
            &raw.marker.admin.line,
            &raw.marker.admin.fill,
            &mut warnings,
        );

        let config = Config {
            update_rate: Duration::from_secs(update_rate_seconds),
            show_child_claims: raw.show_child_claims,
            layer: LayerConfig {
                id: raw.layer.id,
                label: raw.layer.name,
                priority: raw.layer.priority,
                hidden_by_default: raw.layer.hidden_by_default,
            },
            style,
            admin_style,
            popup: PopupConfig {
                show_avatar: raw.popup.show_avatar,
                avatar_url: raw.popup.avatar_url,
            },
        };

        (config, warnings)
    }
}

fn resolve_style(
    prefix: &str,
    line: &RawLine,
    fill: &RawFill,
    warnings: &mut Vec<SyncError>,
) -> MarkerStyle {
    let defaults = MarkerStyle::default();

    let weight = if line.weight < 1 || line.weight > u32::MAX as i64 {
        warnings.push(SyncError::InvalidSetting {
            setting: format!("{prefix}.line.weight"),
            value: line.weight.to_string(),
            replacement: defaults.line.weight.to_string(),
        });
        defaults.line.weight
    } else {
        line.weight as u32
    };

    MarkerStyle {
        line: LineStyle {
            weight,
            opacity: resolve_opacity(
                &format!("{prefix}.line.opacity"),
                line.opacity,
                defaults.line.opacity,
                warnings,
            ),
            color: resolve_color(&format!("{prefix}.line.color"), &line.color, warnings),
        },
        fill: FillStyle {
            opacity: resolve_opacity(
                &format!("{prefix}.fill.opacity"),
                fill.opacity,
                defaults.fill.opacity,
                warnings,
            ),
            color: resolve_color(&format!("{prefix}.fill.color"), &fill.color, warnings),
        },
    }
}

fn resolve_color(setting: &str, value: &str, warnings: &mut Vec<SyncError>) -> Rgb {
    match Rgb::parse_hex(value) {
        Ok(color) => color,
        Err(_) => {
            warnings.push(SyncError::StyleParseError {
                setting: setting.to_string(),
                value: value.to_string(),
                fallback: DEFAULT_COLOR,
            });
            DEFAULT_COLOR
        }
    }
}

fn resolve_opacity(
    setting: &str,
    value: f64,
    fallback: f64,
    warnings: &mut Vec<SyncError>,
) -> f64 {
    if (0.0..=1.0).contains(&value) {
        value
    } else {
        warnings.push(SyncError::InvalidSetting {
            setting: setting.to_string(),
            value: value.to_string(),
            replacement: fallback.to_string(),
        });
        fallback
    }
}
