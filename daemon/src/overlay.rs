//! Web-map overlay interface and an in-process implementation.
//!
//! [`MapOverlay`] mirrors the operations a map plugin exposes for area markers:
//! layers are addressed by id, markers by an opaque [`MarkerHandle`] returned at
//! creation. [`MemoryOverlay`] keeps everything in memory and can export its
//! state as JSON for the web map to pick up.

use crate::error::{OverlayError, SyncError};
use crate::source::Availability;
use log::debug;
use serde::Serialize;
use shared::{FillStyle, LineStyle, Outline};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MarkerHandle(pub u64);

/// Arguments for [`MapOverlay::create_marker`].
#[derive(Debug, Clone, Copy)]
pub struct NewMarker<'a> {
    pub id: &'a str,
    pub label: &'a str,
    pub persistent: bool,
    pub world: &'a str,
    pub outline: &'a Outline,
}

pub trait MapOverlay {
    fn name(&self) -> &str;

    fn availability(&self) -> Availability {
        Availability::Ready
    }

    fn has_layer(&self, layer_id: &str) -> bool;
    fn create_layer(
        &mut self,
        layer_id: &str,
        label: &str,
        hidden_by_default: bool,
    ) -> Result<(), OverlayError>;
    fn set_layer_label(&mut self, layer_id: &str, label: &str) -> Result<(), OverlayError>;
    fn set_layer_priority(&mut self, layer_id: &str, priority: i32) -> Result<(), OverlayError>;
    fn set_layer_hidden_by_default(
        &mut self,
        layer_id: &str,
        hidden: bool,
    ) -> Result<(), OverlayError>;
    fn delete_layer(&mut self, layer_id: &str) -> Result<(), OverlayError>;

    /// Returns `None` when the overlay refuses the marker.
    fn create_marker(&mut self, layer_id: &str, marker: NewMarker<'_>) -> Option<MarkerHandle>;
    fn set_outline(&mut self, marker: MarkerHandle, outline: &Outline) -> Result<(), OverlayError>;
    fn set_label(&mut self, marker: MarkerHandle, label: &str) -> Result<(), OverlayError>;
    fn set_line_style(&mut self, marker: MarkerHandle, style: LineStyle)
        -> Result<(), OverlayError>;
    fn set_fill_style(&mut self, marker: MarkerHandle, style: FillStyle)
        -> Result<(), OverlayError>;
    fn set_description(&mut self, marker: MarkerHandle, html: &str) -> Result<(), OverlayError>;
    fn delete_marker(&mut self, marker: MarkerHandle) -> Result<(), OverlayError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerRecord {
    pub id: String,
    #[serde(skip)]
    pub layer_id: String,
    pub label: String,
    pub persistent: bool,
    pub world: String,
    pub outline: Outline,
    pub line: LineStyle,
    pub fill: FillStyle,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerRecord {
    pub id: String,
    pub label: String,
    pub priority: i32,
    pub hidden_by_default: bool,
}

/// Counters of overlay calls, for tests and debug output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayStats {
    pub markers_created: u64,
    pub markers_deleted: u64,
    pub outlines_updated: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerSnapshot {
    #[serde(flatten)]
    pub layer: LayerRecord,
    pub markers: Vec<MarkerRecord>,
}

/// Serialisable view of the whole overlay, layers and markers sorted by id.
#[derive(Debug, Clone, Serialize)]
pub struct OverlaySnapshot {
    pub layers: Vec<LayerSnapshot>,
}

#[derive(Debug)]
pub struct MemoryOverlay {
    enabled: bool,
    next_handle: u64,
    layers: BTreeMap<String, LayerRecord>,
    markers: HashMap<MarkerHandle, MarkerRecord>,
    // (layer id, marker id) -> handle
    index: HashMap<(String, String), MarkerHandle>,
    stats: OverlayStats,
}

impl Default for MemoryOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOverlay {
    pub fn new() -> Self {
        Self {
            enabled: true,
            next_handle: 1,
            layers: BTreeMap::new(),
            markers: HashMap::new(),
            index: HashMap::new(),
            stats: OverlayStats::default(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn stats(&self) -> OverlayStats {
        self.stats
    }

    pub fn layer(&self, layer_id: &str) -> Option<&LayerRecord> {
        self.layers.get(layer_id)
    }

    pub fn marker(&self, handle: MarkerHandle) -> Option<&MarkerRecord> {
        self.markers.get(&handle)
    }

    /// Marker ids on a layer, sorted.
    pub fn marker_ids(&self, layer_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .markers
            .values()
            .filter(|m| m.layer_id == layer_id)
            .map(|m| m.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn snapshot(&self) -> OverlaySnapshot {
        let layers = self
            .layers
            .values()
            .map(|layer| {
                let mut markers: Vec<MarkerRecord> = self
                    .markers
                    .values()
                    .filter(|m| m.layer_id == layer.id)
                    .cloned()
                    .collect();
                markers.sort_by(|a, b| a.id.cmp(&b.id));
                LayerSnapshot {
                    layer: layer.clone(),
                    markers,
                }
            })
            .collect();

        OverlaySnapshot { layers }
    }

    /// Writes the snapshot as JSON, replacing `path` atomically.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), SyncError> {
        let json = serde_json::to_vec_pretty(&self.snapshot())
            .map_err(|e| SyncError::Io(e.to_string()))?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = Path::new(&tmp_name);

        std::fs::write(tmp_path, json)?;
        std::fs::rename(tmp_path, path)?;

        debug!(
            "Exported {} markers to {}",
            self.markers.len(),
            path.display()
        );
        Ok(())
    }

    fn marker_mut(&mut self, handle: MarkerHandle) -> Result<&mut MarkerRecord, OverlayError> {
        self.markers
            .get_mut(&handle)
            .ok_or(OverlayError::UnknownMarker(handle.0))
    }

    fn layer_mut(&mut self, layer_id: &str) -> Result<&mut LayerRecord, OverlayError> {
        self.layers
            .get_mut(layer_id)
            .ok_or_else(|| OverlayError::UnknownLayer(layer_id.to_string()))
    }
}

impl MapOverlay for MemoryOverlay {
    fn name(&self) -> &str {
        "map overlay"
    }

    fn availability(&self) -> Availability {
        if self.enabled {
            Availability::Ready
        } else {
            Availability::Disabled
        }
    }

    fn has_layer(&self, layer_id: &str) -> bool {
        self.layers.contains_key(layer_id)
    }

    fn create_layer(
        &mut self,
        layer_id: &str,
        label: &str,
        hidden_by_default: bool,
    ) -> Result<(), OverlayError> {
        if layer_id.is_empty() {
            return Err(OverlayError::Rejected("empty layer id".to_string()));
        }
        if self.layers.contains_key(layer_id) {
            return Err(OverlayError::Rejected(format!(
                "layer '{}' already exists",
                layer_id
            )));
        }

        self.layers.insert(
            layer_id.to_string(),
            LayerRecord {
                id: layer_id.to_string(),
                label: label.to_string(),
                priority: 0,
                hidden_by_default,
            },
        );
        Ok(())
    }

    fn set_layer_label(&mut self, layer_id: &str, label: &str) -> Result<(), OverlayError> {
        self.layer_mut(layer_id)?.label = label.to_string();
        Ok(())
    }

    fn set_layer_priority(&mut self, layer_id: &str, priority: i32) -> Result<(), OverlayError> {
        self.layer_mut(layer_id)?.priority = priority;
        Ok(())
    }

    fn set_layer_hidden_by_default(
        &mut self,
        layer_id: &str,
        hidden: bool,
    ) -> Result<(), OverlayError> {
        self.layer_mut(layer_id)?.hidden_by_default = hidden;
        Ok(())
    }

    fn delete_layer(&mut self, layer_id: &str) -> Result<(), OverlayError> {
        if self.layers.remove(layer_id).is_none() {
            return Err(OverlayError::UnknownLayer(layer_id.to_string()));
        }

        let before = self.markers.len();
        self.markers.retain(|_, m| m.layer_id != layer_id);
        self.index.retain(|(layer, _), _| layer != layer_id);
        self.stats.markers_deleted += (before - self.markers.len()) as u64;
        Ok(())
    }

    fn create_marker(&mut self, layer_id: &str, marker: NewMarker<'_>) -> Option<MarkerHandle> {
        if !self.layers.contains_key(layer_id) || marker.id.is_empty() || marker.world.is_empty() {
            return None;
        }
        let key = (layer_id.to_string(), marker.id.to_string());
        if self.index.contains_key(&key) {
            return None;
        }

        let handle = MarkerHandle(self.next_handle);
        self.next_handle += 1;
        self.index.insert(key, handle);

        self.markers.insert(
            handle,
            MarkerRecord {
                id: marker.id.to_string(),
                layer_id: layer_id.to_string(),
                label: marker.label.to_string(),
                persistent: marker.persistent,
                world: marker.world.to_string(),
                outline: *marker.outline,
                line: LineStyle::default(),
                fill: FillStyle::default(),
                description: String::new(),
            },
        );
        self.stats.markers_created += 1;
        Some(handle)
    }

    fn set_outline(&mut self, marker: MarkerHandle, outline: &Outline) -> Result<(), OverlayError> {
        self.marker_mut(marker)?.outline = *outline;
        self.stats.outlines_updated += 1;
        Ok(())
    }

    fn set_label(&mut self, marker: MarkerHandle, label: &str) -> Result<(), OverlayError> {
        self.marker_mut(marker)?.label = label.to_string();
        Ok(())
    }

    fn set_line_style(
        &mut self,
        marker: MarkerHandle,
        style: LineStyle,
    ) -> Result<(), OverlayError> {
        self.marker_mut(marker)?.line = style;
        Ok(())
    }

    fn set_fill_style(
        &mut self,
        marker: MarkerHandle,
        style: FillStyle,
    ) -> Result<(), OverlayError> {
        self.marker_mut(marker)?.fill = style;
        Ok(())
    }

    fn set_description(&mut self, marker: MarkerHandle, html: &str) -> Result<(), OverlayError> {
        self.marker_mut(marker)?.description = html.to_string();
        Ok(())
    }

    fn delete_marker(&mut self, marker: MarkerHandle) -> Result<(), OverlayError> {
        let record = self
            .markers
            .remove(&marker)
            .ok_or(OverlayError::UnknownMarker(marker.0))?;
        self.index.remove(&(record.layer_id, record.id));
        self.stats.markers_deleted += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Corner, Rgb};

    const LAYER: &str = "claims.markerset";

    fn outline() -> Outline {
        Outline::from_corners(&Corner::new("world", 0.0, 0.0), &Corner::new("world", 4.0, 4.0))
    }

    fn overlay_with_layer() -> MemoryOverlay {
        let mut overlay = MemoryOverlay::new();
        overlay.create_layer(LAYER, "Claims", false).unwrap();
        overlay
    }

    fn new_marker<'a>(id: &'a str, outline: &'a Outline) -> NewMarker<'a> {
        NewMarker {
            id,
            label: "Steve",
            persistent: false,
            world: "world",
            outline,
        }
    }

    #[test]
    fn test_layer_lifecycle() {
        let mut overlay = overlay_with_layer();
        assert!(overlay.has_layer(LAYER));

        overlay.set_layer_priority(LAYER, 10).unwrap();
        overlay.set_layer_hidden_by_default(LAYER, true).unwrap();
        overlay.set_layer_label(LAYER, "Land").unwrap();

        let layer = overlay.layer(LAYER).unwrap();
        assert_eq!(layer.priority, 10);
        assert!(layer.hidden_by_default);
        assert_eq!(layer.label, "Land");

        assert!(overlay.create_layer(LAYER, "again", false).is_err());
        overlay.delete_layer(LAYER).unwrap();
        assert!(!overlay.has_layer(LAYER));
        assert_eq!(
            overlay.delete_layer(LAYER),
            Err(OverlayError::UnknownLayer(LAYER.to_string()))
        );
    }

    #[test]
    fn test_create_and_update_marker() {
        let mut overlay = overlay_with_layer();
        let outline = outline();

        let handle = overlay.create_marker(LAYER, new_marker("Claim_1", &outline)).unwrap();
        overlay
            .set_line_style(
                handle,
                LineStyle {
                    weight: 2,
                    opacity: 0.5,
                    color: Rgb(0x00FF00),
                },
            )
            .unwrap();
        overlay.set_description(handle, "<b>hi</b>").unwrap();
        overlay.set_label(handle, "Alex").unwrap();

        let marker = overlay.marker(handle).unwrap();
        assert_eq!(marker.id, "Claim_1");
        assert_eq!(marker.label, "Alex");
        assert_eq!(marker.line.color, Rgb(0x00FF00));
        assert_eq!(marker.description, "<b>hi</b>");
        assert_eq!(overlay.stats().markers_created, 1);
    }

    #[test]
    fn test_duplicate_marker_id_is_rejected() {
        let mut overlay = overlay_with_layer();
        let outline = outline();

        assert!(overlay.create_marker(LAYER, new_marker("Claim_1", &outline)).is_some());
        assert!(overlay.create_marker(LAYER, new_marker("Claim_1", &outline)).is_none());
        assert!(overlay.create_marker("missing", new_marker("Claim_2", &outline)).is_none());
        assert_eq!(overlay.marker_count(), 1);
    }

    #[test]
    fn test_delete_marker() {
        let mut overlay = overlay_with_layer();
        let outline = outline();
        let handle = overlay.create_marker(LAYER, new_marker("Claim_1", &outline)).unwrap();

        overlay.delete_marker(handle).unwrap();
        assert!(overlay.marker(handle).is_none());
        assert_eq!(
            overlay.delete_marker(handle),
            Err(OverlayError::UnknownMarker(handle.0))
        );
        assert_eq!(overlay.stats().markers_deleted, 1);
    }

    #[test]
    fn test_deleting_layer_drops_its_markers() {
        let mut overlay = overlay_with_layer();
        overlay.create_layer("other", "Other", false).unwrap();
        let outline = outline();
        overlay.create_marker(LAYER, new_marker("Claim_1", &outline)).unwrap();
        overlay.create_marker("other", new_marker("Claim_1", &outline)).unwrap();

        overlay.delete_layer(LAYER).unwrap();
        assert_eq!(overlay.marker_count(), 1);
        assert_eq!(overlay.marker_ids("other"), vec!["Claim_1".to_string()]);
    }

    #[test]
    fn test_disabled_overlay_reports_availability() {
        let mut overlay = MemoryOverlay::new();
        assert_eq!(overlay.availability(), Availability::Ready);
        overlay.set_enabled(false);
        assert_eq!(overlay.availability(), Availability::Disabled);
    }

    #[test]
    fn test_write_snapshot() {
        let mut overlay = overlay_with_layer();
        let outline = outline();
        overlay.create_marker(LAYER, new_marker("Claim_2", &outline)).unwrap();
        overlay.create_marker(LAYER, new_marker("Claim_1", &outline)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.json");
        overlay.write_snapshot(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let layer = &value["layers"][0];
        assert_eq!(layer["id"], LAYER);
        assert_eq!(layer["markers"][0]["id"], "Claim_1");
        assert_eq!(layer["markers"][1]["id"], "Claim_2");
        assert_eq!(layer["markers"][0]["outline"]["xs"][2], 5.0);
        assert!(!dir.path().join("markers.json.tmp").exists());
    }
}
