//! Claim and marker primitives shared by the claims source and the overlay mirror.
//!
//! Everything in here is pure data and geometry: no IO, no logging. The daemon
//! crate builds its registry adapters and reconciliation on top of these types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every marker identity derived from a claim.
pub const MARKER_ID_PREFIX: &str = "Claim_";

/// Registry document layout understood by this build.
pub const REGISTRY_FORMAT_VERSION: u32 = 1;

/// Fallback color for line and fill styles.
pub const DEFAULT_COLOR: Rgb = Rgb(0xFF0000);

/// One boundary corner of a claim.
///
/// `world` is `None` when the registry reports the corner but its world is not
/// loaded, which makes the corner unresolvable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    pub world: Option<String>,
    pub x: f64,
    pub z: f64,
}

impl Corner {
    pub fn new(world: &str, x: f64, z: f64) -> Self {
        Self {
            world: Some(world.to_string()),
            x,
            z,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.world.is_some()
    }
}

/// A player-owned rectangular region as reported by the claims registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: u64,
    pub owner_name: String,
    pub lesser: Option<Corner>,
    pub greater: Option<Corner>,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub children: Vec<Claim>,
}

impl Claim {
    pub fn new(id: u64, owner_name: &str, lesser: Corner, greater: Corner) -> Self {
        Self {
            id,
            owner_name: owner_name.to_string(),
            lesser: Some(lesser),
            greater: Some(greater),
            admin: false,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: Claim) -> Self {
        self.children.push(child);
        self
    }

    pub fn as_admin(mut self) -> Self {
        self.admin = true;
        self
    }

    pub fn marker_id(&self) -> String {
        marker_id(self.id)
    }

    /// Returns the world name and drawable outline, or `None` when either
    /// corner is missing or sits in an unloaded world.
    pub fn resolve_outline(&self) -> Option<(String, Outline)> {
        let lesser = self.lesser.as_ref()?;
        let greater = self.greater.as_ref()?;
        let world = lesser.world.as_ref()?;
        greater.world.as_ref()?;

        Some((world.clone(), Outline::from_corners(lesser, greater)))
    }
}

/// Marker identity for a claim ID.
pub fn marker_id(claim_id: u64) -> String {
    format!("{}{}", MARKER_ID_PREFIX, claim_id)
}

/// Four-vertex polygon outline in map (x, z) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub xs: [f64; 4],
    pub zs: [f64; 4],
}

impl Outline {
    /// Builds the rectangle covering both corners.
    ///
    /// The greater corner is inclusive of its whole block, so the far edges
    /// are pushed out by one unit.
    pub fn from_corners(lesser: &Corner, greater: &Corner) -> Self {
        let x_lo = lesser.x;
        let z_lo = lesser.z;
        let x_hi = greater.x + 1.0;
        let z_hi = greater.z + 1.0;

        Self {
            xs: [x_lo, x_lo, x_hi, x_hi],
            zs: [z_lo, z_hi, z_hi, z_lo],
        }
    }

    pub fn vertices(&self) -> Vec<(f64, f64)> {
        self.xs.iter().copied().zip(self.zs.iter().copied()).collect()
    }

    pub fn area(&self) -> f64 {
        (self.xs[2] - self.xs[0]).abs() * (self.zs[1] - self.zs[0]).abs()
    }
}

/// 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u32);

impl Rgb {
    /// Parses `RRGGBB`, optionally prefixed with `#` or `0x`.
    pub fn parse_hex(value: &str) -> Result<Self, ColorParseError> {
        let trimmed = value.trim();
        let digits = trimmed
            .strip_prefix('#')
            .or_else(|| trimmed.strip_prefix("0x"))
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let is_hex = digits.bytes().all(|b| b.is_ascii_hexdigit());
        if digits.is_empty() || digits.len() > 6 || !is_hex {
            return Err(ColorParseError {
                input: value.to_string(),
            });
        }

        u32::from_str_radix(digits, 16)
            .map(Rgb)
            .map_err(|_| ColorParseError {
                input: value.to_string(),
            })
    }

    pub fn to_hex(&self) -> String {
        format!("{:06X}", self.0)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorParseError {
    pub input: String,
}

impl fmt::Display for ColorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a hex RGB color", self.input)
    }
}

impl std::error::Error for ColorParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineStyle {
    pub weight: u32,
    pub opacity: f64,
    pub color: Rgb,
}

impl Default for LineStyle {
    fn default() -> Self {
        Self {
            weight: 3,
            opacity: 0.8,
            color: DEFAULT_COLOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FillStyle {
    pub opacity: f64,
    pub color: Rgb,
}

impl Default for FillStyle {
    fn default() -> Self {
        Self {
            opacity: 0.35,
            color: DEFAULT_COLOR,
        }
    }
}

/// Registry contents as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub format_version: u32,
    pub claims: Vec<Claim>,
}

impl RegistryDocument {
    pub fn new(claims: Vec<Claim>) -> Self {
        Self {
            format_version: REGISTRY_FORMAT_VERSION,
            claims,
        }
    }

    pub fn to_bincode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bincode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
