//! # Claim Overlay Mirror
//!
//! Mirrors the land claims of a game server's claims registry onto a web-map
//! overlay layer. On a fixed interval the registry is polled, every claim is
//! turned into a rectangular area marker, and the overlay is brought in line
//! with what the registry reports: new claims get markers, moved or renamed
//! claims have their markers updated in place, and markers of vanished claims
//! are deleted.
//!
//! ## Reconciliation Cycle
//!
//! The [`engine::Reconciler`] keeps a map from marker identity (`Claim_<id>`)
//! to overlay marker handle. Every cycle builds a brand-new map from the
//! current claims, taking handles out of the previous map whenever the
//! identity is still present, so a surviving claim keeps the very same marker.
//! Anything left in the previous map afterwards belongs to a claim that is gone
//! and is deleted before the new map replaces the old one.
//!
//! A registry read that fails aborts the cycle before anything is touched. A
//! transient failure never looks like "all claims were removed".
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! TOML settings resolved once into typed values. Colors are parsed at load
//! time and fall back to red with a warning when malformed.
//!
//! ### Source Module (`source`)
//! The [`source::ClaimsSource`] boundary and the file-backed registry adapter.
//! All knowledge of how the registry stores its claims lives here.
//!
//! ### Overlay Module (`overlay`)
//! The [`overlay::MapOverlay`] boundary with an in-memory implementation that
//! exports its layers and markers as JSON for the web map.
//!
//! ### Engine Module (`engine`)
//! Startup checks, layer setup, the cycle itself, and shutdown cleanup.
//!
//! ### Runner Module (`runner`)
//! The tokio interval loop. Cycles run inline, one at a time.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use daemon::{Config, FileClaimsSource, MemoryOverlay, Reconciler};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (config, _warnings) = Config::load(Path::new("claim-overlay.toml"))?;
//!     let source = FileClaimsSource::new("claims.json");
//!     let mut reconciler = Reconciler::start(config, source, MemoryOverlay::new())?;
//!
//!     daemon::runner::run_until(
//!         &mut reconciler,
//!         async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         },
//!         |r, _| {
//!             let _ = r.overlay().write_snapshot(Path::new("markers.json"));
//!         },
//!     )
//!     .await;
//!
//!     reconciler.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod overlay;
pub mod popup;
pub mod runner;
pub mod source;

pub use config::Config;
pub use engine::{CycleReport, Reconciler};
pub use error::{OverlayError, SyncError};
pub use overlay::{MapOverlay, MarkerHandle, MemoryOverlay};
pub use source::{Availability, ClaimsSource, FileClaimsSource, StaticClaimsSource};
