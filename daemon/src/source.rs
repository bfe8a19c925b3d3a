//! Claims registry adapters.
//!
//! The engine only ever sees [`ClaimsSource::fetch_claims`]. How the registry is
//! actually read (and every way that can break) stays inside the adapter, which
//! reports failures as [`SyncError::SourceUnavailable`] rather than returning an
//! empty list.

use crate::error::SyncError;
use log::debug;
use shared::{Claim, RegistryDocument, REGISTRY_FORMAT_VERSION};
use std::path::{Path, PathBuf};

/// Startup state of an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Ready,
    Missing,
    Disabled,
}

pub trait ClaimsSource {
    /// Name used in log lines and startup errors.
    fn name(&self) -> &str;

    fn availability(&self) -> Availability {
        Availability::Ready
    }

    /// Returns every top-level claim, each carrying its children.
    fn fetch_claims(&self) -> Result<Vec<Claim>, SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryFormat {
    Json,
    Bincode,
}

impl RegistryFormat {
    /// `.bin` files are bincode, anything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("bin") => RegistryFormat::Bincode,
            _ => RegistryFormat::Json,
        }
    }
}

/// Reads the registry's claim store from a file on disk.
#[derive(Debug, Clone)]
pub struct FileClaimsSource {
    path: PathBuf,
    format: RegistryFormat,
}

impl FileClaimsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = RegistryFormat::from_path(&path);
        Self { path, format }
    }

    fn decode(&self, bytes: &[u8]) -> Result<RegistryDocument, String> {
        match self.format {
            RegistryFormat::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            RegistryFormat::Bincode => {
                RegistryDocument::from_bincode(bytes).map_err(|e| e.to_string())
            }
        }
    }
}

impl ClaimsSource for FileClaimsSource {
    fn name(&self) -> &str {
        "claims registry"
    }

    fn availability(&self) -> Availability {
        if self.path.is_file() {
            Availability::Ready
        } else {
            Availability::Missing
        }
    }

    fn fetch_claims(&self) -> Result<Vec<Claim>, SyncError> {
        let bytes = std::fs::read(&self.path).map_err(|e| SyncError::SourceUnavailable {
            reason: format!("{}: {}", self.path.display(), e),
        })?;

        let document = self
            .decode(&bytes)
            .map_err(|reason| SyncError::SourceUnavailable {
                reason: format!("{}: {}", self.path.display(), reason),
            })?;

        if document.format_version != REGISTRY_FORMAT_VERSION {
            return Err(SyncError::SourceUnavailable {
                reason: format!(
                    "{}: unsupported registry layout version {} (expected {})",
                    self.path.display(),
                    document.format_version,
                    REGISTRY_FORMAT_VERSION
                ),
            });
        }

        debug!(
            "Read {} top-level claims from {}",
            document.claims.len(),
            self.path.display()
        );
        Ok(document.claims)
    }
}

/// Claims held in memory. Handy for embedding and for tests.
#[derive(Debug, Clone)]
pub struct StaticClaimsSource {
    claims: Result<Vec<Claim>, String>,
    availability: Availability,
}

impl StaticClaimsSource {
    pub fn new(claims: Vec<Claim>) -> Self {
        Self {
            claims: Ok(claims),
            availability: Availability::Ready,
        }
    }

    pub fn set_claims(&mut self, claims: Vec<Claim>) {
        self.claims = Ok(claims);
    }

    /// Makes every following fetch fail until claims are set again.
    pub fn fail(&mut self, reason: &str) {
        self.claims = Err(reason.to_string());
    }

    pub fn set_availability(&mut self, availability: Availability) {
        self.availability = availability;
    }
}

impl ClaimsSource for StaticClaimsSource {
    fn name(&self) -> &str {
        "static claims"
    }

    fn availability(&self) -> Availability {
        self.availability
    }

    fn fetch_claims(&self) -> Result<Vec<Claim>, SyncError> {
        self.claims
            .clone()
            .map_err(|reason| SyncError::SourceUnavailable { reason })
    }
}
