//! Reconciliation of registry claims against overlay markers.
//!
//! Each cycle builds a fresh identity → handle map from the current claims,
//! reusing handles from the previous cycle where the identity survives, then
//! deletes whatever is left of the previous map and swaps the new one in.
//! A failed registry read leaves everything exactly as it was.

use crate::config::{Config, MarkerStyle};
use crate::error::{OverlayError, SyncError};
use crate::overlay::{MapOverlay, MarkerHandle, NewMarker};
use crate::popup;
use crate::source::{Availability, ClaimsSource};
use log::{debug, error, info, warn};
use shared::{Claim, Outline};
use std::borrow::Cow;
use std::collections::HashMap;

/// Outcome counters of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Claims dropped because a corner was unresolvable or the id repeated.
    pub skipped: usize,
    /// Claims the overlay refused to create.
    pub failed: usize,
    /// Markers retained after the cycle.
    pub markers: usize,
}

/// Owns the retained marker map and drives one cycle at a time.
pub struct Reconciler<S, O> {
    config: Config,
    source: S,
    overlay: O,
    retained: HashMap<String, MarkerHandle>,
    owns_layer: bool,
    cycles: u64,
}

impl<S: ClaimsSource, O: MapOverlay> Reconciler<S, O> {
    /// Checks both collaborators and prepares the claims layer.
    ///
    /// Any error here means the mirror must not run at all.
    pub fn start(config: Config, source: S, overlay: O) -> Result<Self, SyncError> {
        check_dependency(source.name(), source.availability())?;
        check_dependency(overlay.name(), overlay.availability())?;

        let mut reconciler = Self {
            config,
            source,
            overlay,
            retained: HashMap::new(),
            owns_layer: false,
            cycles: 0,
        };
        reconciler.setup_layer()?;

        info!(
            "Mirroring claims onto layer '{}' every {}s",
            reconciler.config.layer.id,
            reconciler.config.update_rate.as_secs()
        );
        Ok(reconciler)
    }

    fn setup_layer(&mut self) -> Result<(), SyncError> {
        let layer = self.config.layer.clone();
        let setup_failed = |e: OverlayError| {
            error!("Layer '{}' setup failed: {}", layer.id, e);
            SyncError::LayerSetupFailed {
                layer_id: layer.id.clone(),
            }
        };

        if self.overlay.has_layer(&layer.id) {
            self.overlay
                .set_layer_label(&layer.id, &layer.label)
                .map_err(setup_failed)?;
        } else {
            self.overlay
                .create_layer(&layer.id, &layer.label, layer.hidden_by_default)
                .map_err(setup_failed)?;
            self.owns_layer = true;
        }

        self.overlay
            .set_layer_priority(&layer.id, layer.priority)
            .map_err(setup_failed)?;
        self.overlay
            .set_layer_hidden_by_default(&layer.id, layer.hidden_by_default)
            .map_err(setup_failed)?;

        Ok(())
    }

    /// Runs one reconciliation cycle.
    ///
    /// Returns `SourceUnavailable` without touching the overlay or the
    /// retained map when the registry cannot be read.
    pub fn run_cycle(&mut self) -> Result<CycleReport, SyncError> {
        let claims = match self.source.fetch_claims() {
            Ok(claims) => claims,
            Err(e) => {
                warn!("Skipping update, keeping {} markers: {}", self.retained.len(), e);
                return Err(e);
            }
        };

        let mut previous = std::mem::take(&mut self.retained);
        let mut current: HashMap<String, MarkerHandle> = HashMap::with_capacity(previous.len());
        let mut report = CycleReport::default();

        for claim in &claims {
            self.upsert_marker(claim, false, &mut previous, &mut current, &mut report);

            if self.config.show_child_claims {
                for child in &claim.children {
                    // Subdivisions of an admin claim are admin claims.
                    let child = if claim.admin && !child.admin {
                        Cow::Owned(child.clone().as_admin())
                    } else {
                        Cow::Borrowed(child)
                    };
                    self.upsert_marker(&child, true, &mut previous, &mut current, &mut report);
                }
            }
        }

        // Whatever was not claimed again is gone from the registry.
        for (marker_id, handle) in previous.drain() {
            match self.overlay.delete_marker(handle) {
                Ok(()) => report.deleted += 1,
                Err(e) => warn!("Failed to delete marker {}: {}", marker_id, e),
            }
        }

        self.retained = current;
        self.cycles += 1;
        report.markers = self.retained.len();

        debug!(
            "Cycle {}: {} created, {} updated, {} deleted, {} skipped, {} failed, {} markers",
            self.cycles,
            report.created,
            report.updated,
            report.deleted,
            report.skipped,
            report.failed,
            report.markers
        );
        Ok(report)
    }

    fn upsert_marker(
        &mut self,
        claim: &Claim,
        is_child: bool,
        previous: &mut HashMap<String, MarkerHandle>,
        current: &mut HashMap<String, MarkerHandle>,
        report: &mut CycleReport,
    ) {
        let marker_id = claim.marker_id();

        let Some((world, outline)) = claim.resolve_outline() else {
            debug!("Claim {} has an unresolvable corner, skipping", claim.id);
            report.skipped += 1;
            return;
        };

        if current.contains_key(&marker_id) {
            warn!("Claim {} reported more than once, skipping duplicate", claim.id);
            report.skipped += 1;
            return;
        }

        let label = popup::marker_label(claim).to_string();

        let reused = previous
            .remove(&marker_id)
            .and_then(|handle| self.reuse_marker(handle, &marker_id, &outline, &label));

        let handle = match reused {
            Some(handle) => {
                report.updated += 1;
                handle
            }
            None => {
                let created = self.overlay.create_marker(
                    &self.config.layer.id,
                    NewMarker {
                        id: &marker_id,
                        label: &label,
                        persistent: false,
                        world: &world,
                        outline: &outline,
                    },
                );
                match created {
                    Some(handle) => {
                        report.created += 1;
                        handle
                    }
                    None => {
                        let err = SyncError::MarkerCreateFailed {
                            marker_id,
                            claim_id: claim.id,
                        };
                        warn!("{}", err);
                        report.failed += 1;
                        return;
                    }
                }
            }
        };

        let style = if claim.admin {
            self.config.admin_style
        } else {
            self.config.style
        };
        self.apply_style(handle, &marker_id, style);

        let description = popup::describe(claim, is_child, &self.config.popup);
        if let Err(e) = self.overlay.set_description(handle, &description) {
            warn!("Failed to set description on {}: {}", marker_id, e);
        }

        current.insert(marker_id, handle);
    }

    /// Moves an existing marker to its new outline and label. Returns `None`
    /// if the overlay no longer knows the handle.
    fn reuse_marker(
        &mut self,
        handle: MarkerHandle,
        marker_id: &str,
        outline: &Outline,
        label: &str,
    ) -> Option<MarkerHandle> {
        if let Err(e) = self.overlay.set_outline(handle, outline) {
            warn!("Marker {} vanished from the overlay ({}), recreating", marker_id, e);
            return None;
        }
        if let Err(e) = self.overlay.set_label(handle, label) {
            warn!("Failed to relabel marker {}: {}", marker_id, e);
        }
        Some(handle)
    }

    fn apply_style(&mut self, handle: MarkerHandle, marker_id: &str, style: MarkerStyle) {
        if let Err(e) = self.overlay.set_line_style(handle, style.line) {
            warn!("Failed to set line style on {}: {}", marker_id, e);
        }
        if let Err(e) = self.overlay.set_fill_style(handle, style.fill) {
            warn!("Failed to set fill style on {}: {}", marker_id, e);
        }
    }

    /// Deletes every retained marker and, if this instance created it, the
    /// layer. Returns the overlay for a final export.
    pub fn shutdown(mut self) -> O {
        let mut deleted = 0;
        for (marker_id, handle) in self.retained.drain() {
            match self.overlay.delete_marker(handle) {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Failed to delete marker {} on shutdown: {}", marker_id, e),
            }
        }

        if self.owns_layer {
            if let Err(e) = self.overlay.delete_layer(&self.config.layer.id) {
                warn!("Failed to remove layer '{}': {}", self.config.layer.id, e);
            }
        }

        info!("Removed {} claim markers after {} cycles", deleted, self.cycles);
        self.overlay
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Style and child settings apply from the next cycle on. The layer is
    /// not re-created, and a running timer keeps the rate it started with.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn overlay(&self) -> &O {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut O {
        &mut self.overlay
    }

    pub fn owns_layer(&self) -> bool {
        self.owns_layer
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn retained_handle(&self, marker_id: &str) -> Option<MarkerHandle> {
        self.retained.get(marker_id).copied()
    }

    /// Retained marker ids, sorted.
    pub fn retained_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.retained.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn check_dependency(name: &str, availability: Availability) -> Result<(), SyncError> {
    match availability {
        Availability::Ready => Ok(()),
        Availability::Missing => {
            let err = SyncError::DependencyMissing {
                name: name.to_string(),
            };
            error!("{}", err);
            Err(err)
        }
        Availability::Disabled => {
            let err = SyncError::DependencyDisabled {
                name: name.to_string(),
            };
            error!("{}", err);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::MemoryOverlay;
    use crate::source::StaticClaimsSource;
    use assert_approx_eq::assert_approx_eq;
    use shared::{Corner, Rgb};

    fn claim(id: u64, owner: &str, lo: (f64, f64), hi: (f64, f64)) -> Claim {
        Claim::new(
            id,
            owner,
            Corner::new("world", lo.0, lo.1),
            Corner::new("world", hi.0, hi.1),
        )
    }

    fn start(claims: Vec<Claim>) -> Reconciler<StaticClaimsSource, MemoryOverlay> {
        Reconciler::start(
            Config::default(),
            StaticClaimsSource::new(claims),
            MemoryOverlay::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_start_creates_layer() {
        let reconciler = start(Vec::new());
        let layer = reconciler.overlay().layer("claims.markerset").unwrap();

        assert_eq!(layer.label, "Claims");
        assert_eq!(layer.priority, 10);
        assert!(!layer.hidden_by_default);
        assert!(reconciler.owns_layer());
    }

    #[test]
    fn test_start_reuses_existing_layer() {
        let mut overlay = MemoryOverlay::new();
        overlay.create_layer("claims.markerset", "Old", true).unwrap();

        let reconciler =
            Reconciler::start(Config::default(), StaticClaimsSource::new(Vec::new()), overlay)
                .unwrap();
        let layer = reconciler.overlay().layer("claims.markerset").unwrap();

        assert_eq!(layer.label, "Claims");
        assert!(!layer.hidden_by_default);
        assert!(!reconciler.owns_layer());
    }

    #[test]
    fn test_start_fails_on_missing_source() {
        let mut source = StaticClaimsSource::new(Vec::new());
        source.set_availability(Availability::Missing);

        let result = Reconciler::start(Config::default(), source, MemoryOverlay::new());
        assert!(matches!(result, Err(SyncError::DependencyMissing { .. })));
    }

    #[test]
    fn test_start_fails_on_disabled_overlay() {
        let mut overlay = MemoryOverlay::new();
        overlay.set_enabled(false);

        let result =
            Reconciler::start(Config::default(), StaticClaimsSource::new(Vec::new()), overlay);
        assert!(matches!(result, Err(SyncError::DependencyDisabled { .. })));
    }

    #[test]
    fn test_start_fails_without_layer() {
        let mut config = Config::default();
        config.layer.id = String::new();

        let result = Reconciler::start(
            config,
            StaticClaimsSource::new(Vec::new()),
            MemoryOverlay::new(),
        );
        assert!(matches!(result, Err(SyncError::LayerSetupFailed { .. })));
    }

    #[test]
    fn test_first_cycle_creates_markers() {
        let mut reconciler = start(vec![claim(10, "Steve", (10.0, 20.0), (30.0, 40.0))]);

        let report = reconciler.run_cycle().unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.markers, 1);

        let handle = reconciler.retained_handle("Claim_10").unwrap();
        let marker = reconciler.overlay().marker(handle).unwrap();
        assert_eq!(marker.label, "Steve");
        assert_eq!(marker.world, "world");
        assert!(!marker.persistent);
        assert_eq!(
            marker.outline.vertices(),
            vec![(10.0, 20.0), (10.0, 41.0), (31.0, 41.0), (31.0, 20.0)]
        );
        assert_eq!(marker.line.weight, 3);
        assert_approx_eq!(marker.fill.opacity, 0.35, 1e-9);
        assert!(marker.description.contains("Steve's claim"));
    }

    #[test]
    fn test_moved_claim_keeps_handle() {
        let mut reconciler = start(vec![claim(1, "Steve", (0.0, 0.0), (5.0, 5.0))]);
        reconciler.run_cycle().unwrap();
        let handle = reconciler.retained_handle("Claim_1").unwrap();

        reconciler
            .source_mut()
            .set_claims(vec![claim(1, "Alex", (100.0, 100.0), (105.0, 110.0))]);
        let report = reconciler.run_cycle().unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 0);
        assert_eq!(reconciler.retained_handle("Claim_1"), Some(handle));

        let marker = reconciler.overlay().marker(handle).unwrap();
        assert_eq!(marker.label, "Alex");
        assert_eq!(marker.outline.xs, [100.0, 100.0, 106.0, 106.0]);
        assert_eq!(marker.outline.zs, [100.0, 111.0, 111.0, 100.0]);
    }

    #[test]
    fn test_removed_claim_is_deleted() {
        let mut reconciler = start(vec![
            claim(1, "Steve", (0.0, 0.0), (5.0, 5.0)),
            claim(2, "Alex", (10.0, 10.0), (15.0, 15.0)),
        ]);
        reconciler.run_cycle().unwrap();

        reconciler
            .source_mut()
            .set_claims(vec![claim(2, "Alex", (10.0, 10.0), (15.0, 15.0))]);
        let report = reconciler.run_cycle().unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(reconciler.retained_ids(), vec!["Claim_2".to_string()]);
        assert_eq!(
            reconciler.overlay().marker_ids("claims.markerset"),
            vec!["Claim_2".to_string()]
        );
    }

    #[test]
    fn test_unresolvable_claim_is_dropped() {
        let mut reconciler = start(vec![claim(1, "Steve", (0.0, 0.0), (5.0, 5.0))]);
        reconciler.run_cycle().unwrap();

        let mut unloaded = claim(1, "Steve", (0.0, 0.0), (5.0, 5.0));
        unloaded.lesser = Some(Corner {
            world: None,
            x: 0.0,
            z: 0.0,
        });
        reconciler.source_mut().set_claims(vec![unloaded]);
        let report = reconciler.run_cycle().unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.deleted, 1);
        assert!(reconciler.retained_ids().is_empty());
    }

    #[test]
    fn test_duplicate_claim_ids_produce_one_marker() {
        let mut reconciler = start(vec![
            claim(1, "Steve", (0.0, 0.0), (5.0, 5.0)),
            claim(1, "Steve", (50.0, 50.0), (55.0, 55.0)),
        ]);

        let report = reconciler.run_cycle().unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(reconciler.overlay().marker_count(), 1);
    }

    #[test]
    fn test_source_failure_keeps_state() {
        let mut reconciler = start(vec![claim(1, "Steve", (0.0, 0.0), (5.0, 5.0))]);
        reconciler.run_cycle().unwrap();
        let stats_before = reconciler.overlay().stats();

        reconciler.source_mut().fail("datastore locked");
        let result = reconciler.run_cycle();

        assert!(matches!(result, Err(SyncError::SourceUnavailable { .. })));
        assert_eq!(reconciler.retained_ids(), vec!["Claim_1".to_string()]);
        assert_eq!(reconciler.overlay().stats(), stats_before);
        assert_eq!(reconciler.cycles(), 1);
    }

    #[test]
    fn test_rejected_create_is_retried_next_cycle() {
        let mut overlay = MemoryOverlay::new();
        overlay.create_layer("claims.markerset", "Claims", false).unwrap();
        let outline = Outline::from_corners(
            &Corner::new("world", 0.0, 0.0),
            &Corner::new("world", 1.0, 1.0),
        );
        // Another writer already holds this id on the shared layer.
        let foreign = overlay
            .create_marker(
                "claims.markerset",
                NewMarker {
                    id: "Claim_1",
                    label: "someone else",
                    persistent: false,
                    world: "world",
                    outline: &outline,
                },
            )
            .unwrap();

        let mut reconciler = Reconciler::start(
            Config::default(),
            StaticClaimsSource::new(vec![claim(1, "Steve", (0.0, 0.0), (5.0, 5.0))]),
            overlay,
        )
        .unwrap();

        let report = reconciler.run_cycle().unwrap();
        assert_eq!(report.failed, 1);
        assert!(reconciler.retained_ids().is_empty());

        reconciler.overlay_mut().delete_marker(foreign).unwrap();
        let report = reconciler.run_cycle().unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(reconciler.retained_ids(), vec!["Claim_1".to_string()]);
    }

    #[test]
    fn test_marker_deleted_externally_is_recreated() {
        let mut reconciler = start(vec![claim(1, "Steve", (0.0, 0.0), (5.0, 5.0))]);
        reconciler.run_cycle().unwrap();
        let handle = reconciler.retained_handle("Claim_1").unwrap();

        reconciler.overlay_mut().delete_marker(handle).unwrap();
        let report = reconciler.run_cycle().unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 0);
        assert_ne!(reconciler.retained_handle("Claim_1"), Some(handle));
    }

    #[test]
    fn test_admin_claims_use_admin_style() {
        let mut config = Config::default();
        config.admin_style.line.color = Rgb(0x0000FF);
        let mut reconciler = Reconciler::start(
            config,
            StaticClaimsSource::new(vec![claim(3, "", (0.0, 0.0), (5.0, 5.0)).as_admin()]),
            MemoryOverlay::new(),
        )
        .unwrap();

        reconciler.run_cycle().unwrap();
        let handle = reconciler.retained_handle("Claim_3").unwrap();
        let marker = reconciler.overlay().marker(handle).unwrap();

        assert_eq!(marker.line.color, Rgb(0x0000FF));
        assert_eq!(marker.label, "Administrator");
        assert!(marker.description.contains("Administrator claim"));
    }

    #[test]
    fn test_children_of_admin_claims_are_admin() {
        let mut config = Config::default();
        config.admin_style.line.color = Rgb(0x0000FF);
        let parent = claim(3, "", (0.0, 0.0), (20.0, 20.0))
            .as_admin()
            .with_child(claim(4, "", (2.0, 2.0), (5.0, 5.0)));
        let mut reconciler = Reconciler::start(
            config,
            StaticClaimsSource::new(vec![parent]),
            MemoryOverlay::new(),
        )
        .unwrap();

        reconciler.run_cycle().unwrap();
        let handle = reconciler.retained_handle("Claim_4").unwrap();
        let marker = reconciler.overlay().marker(handle).unwrap();

        assert_eq!(marker.label, "Administrator");
        assert_eq!(marker.line.color, Rgb(0x0000FF));
        assert!(marker.description.contains("Administrator claim (subdivision)"));
        assert!(!marker.description.contains("<img"));
    }

    #[test]
    fn test_style_change_applies_next_cycle() {
        let mut reconciler = start(vec![claim(1, "Steve", (0.0, 0.0), (5.0, 5.0))]);
        reconciler.run_cycle().unwrap();

        reconciler.config_mut().style.fill.color = Rgb(0x00FF00);
        reconciler.run_cycle().unwrap();

        let handle = reconciler.retained_handle("Claim_1").unwrap();
        assert_eq!(
            reconciler.overlay().marker(handle).unwrap().fill.color,
            Rgb(0x00FF00)
        );
    }

    #[test]
    fn test_shutdown_removes_markers_and_owned_layer() {
        let mut reconciler = start(vec![
            claim(1, "Steve", (0.0, 0.0), (5.0, 5.0)),
            claim(2, "Alex", (10.0, 10.0), (15.0, 15.0)),
        ]);
        reconciler.run_cycle().unwrap();

        let overlay = reconciler.shutdown();
        assert_eq!(overlay.marker_count(), 0);
        assert!(!overlay.has_layer("claims.markerset"));
        assert_eq!(overlay.stats().markers_deleted, 2);
    }

    #[test]
    fn test_shutdown_leaves_shared_layer_and_foreign_markers() {
        let mut overlay = MemoryOverlay::new();
        overlay.create_layer("claims.markerset", "Claims", false).unwrap();
        let outline = Outline::from_corners(
            &Corner::new("world", 0.0, 0.0),
            &Corner::new("world", 1.0, 1.0),
        );
        overlay
            .create_marker(
                "claims.markerset",
                NewMarker {
                    id: "Claim_999",
                    label: "other instance",
                    persistent: false,
                    world: "world",
                    outline: &outline,
                },
            )
            .unwrap();

        let mut reconciler = Reconciler::start(
            Config::default(),
            StaticClaimsSource::new(vec![claim(1, "Steve", (0.0, 0.0), (5.0, 5.0))]),
            overlay,
        )
        .unwrap();
        reconciler.run_cycle().unwrap();

        let overlay = reconciler.shutdown();
        assert!(overlay.has_layer("claims.markerset"));
        assert_eq!(
            overlay.marker_ids("claims.markerset"),
            vec!["Claim_999".to_string()]
        );
    }
}
