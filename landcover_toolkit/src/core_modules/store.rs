// THEORY:
// Rasters and vector tables are addressed by asset identifier strings
// (`projects/.../collection9/..._v1`). The export workflow only needs three
// things from wherever they live: fetch a band stack, fetch a feature table, and
// list a folder for table discovery. `AssetStore` provides all three from
// memory, filled either programmatically or from a directory of JSON asset
// manifests.

use crate::core_modules::discovery::AssetLister;
use crate::core_modules::raster::{BandStack, ClassCode, GridSpec, Raster};
use crate::core_modules::vector::FeatureCollection;
use crate::error::{Result, ToolkitError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Band stacks by asset id.
pub trait RasterSource: Send + Sync {
    fn load_bands(&self, asset: &str) -> Result<BandStack>;
}

/// Feature tables by asset id.
pub trait VectorSource: Send + Sync {
    fn load_features(&self, asset: &str) -> Result<FeatureCollection>;
}

#[derive(Debug, Deserialize)]
struct AssetManifest {
    #[serde(default)]
    roots: Vec<String>,
    #[serde(default)]
    rasters: Vec<RasterManifest>,
    #[serde(default)]
    tables: Vec<FeatureCollection>,
}

#[derive(Debug, Deserialize)]
struct RasterManifest {
    id: String,
    grid: GridSpec,
    bands: Vec<BandManifest>,
}

#[derive(Debug, Deserialize)]
struct BandManifest {
    name: String,
    /// Row-major cells, `null` for no data.
    cells: Vec<Option<ClassCode>>,
}

#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    roots: Vec<String>,
    rasters: BTreeMap<String, BandStack>,
    tables: BTreeMap<String, FeatureCollection>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_raster(&mut self, asset: impl Into<String>, bands: BandStack) {
        self.rasters.insert(asset.into(), bands);
    }

    pub fn insert_table(&mut self, table: FeatureCollection) {
        self.tables.insert(table.id.clone(), table);
    }

    pub fn add_root(&mut self, root: impl Into<String>) {
        self.roots.push(root.into());
    }

    /// Loads every `*.json` manifest in `dir`, in file-name order.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut store = Self::new();
        for path in &paths {
            let text = fs::read_to_string(path)?;
            store.merge_manifest(&text)?;
            debug!(manifest = %path.display(), "asset manifest loaded");
        }
        info!(
            dir = %dir.display(),
            rasters = store.rasters.len(),
            tables = store.tables.len(),
            "asset store ready"
        );
        Ok(store)
    }

    /// Adds the assets of one JSON manifest.
    pub fn merge_manifest(&mut self, json: &str) -> Result<()> {
        let manifest: AssetManifest = serde_json::from_str(json)?;
        self.roots.extend(manifest.roots);
        for raster in manifest.rasters {
            let mut stack = BandStack::new(raster.grid);
            for band in raster.bands {
                stack.push_band(band.name, Raster::new(raster.grid, band.cells)?)?;
            }
            self.rasters.insert(raster.id, stack);
        }
        for table in manifest.tables {
            self.insert_table(table);
        }
        Ok(())
    }
}

impl RasterSource for AssetStore {
    fn load_bands(&self, asset: &str) -> Result<BandStack> {
        self.rasters
            .get(asset)
            .cloned()
            .ok_or_else(|| ToolkitError::AssetNotFound(asset.to_string()))
    }
}

impl VectorSource for AssetStore {
    fn load_features(&self, asset: &str) -> Result<FeatureCollection> {
        self.tables
            .get(asset)
            .cloned()
            .ok_or_else(|| ToolkitError::AssetNotFound(asset.to_string()))
    }
}

impl AssetLister for AssetStore {
    fn asset_roots(&self) -> Result<Vec<String>> {
        Ok(self.roots.clone())
    }

    fn list_assets(&self, folder: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", folder.trim_end_matches('/'));
        let children: Vec<String> = self
            .rasters
            .keys()
            .chain(self.tables.keys())
            .filter(|id| {
                id.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .cloned()
            .collect();
        if children.is_empty() && !self.roots.iter().any(|r| r == folder) {
            return Err(ToolkitError::RemoteLookupFailure {
                path: folder.to_string(),
                reason: "folder not found".to_string(),
            });
        }
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "roots": ["users/ana/MAPBIOMAS"],
        "rasters": [{
            "id": "projects/x/deforestation_v1",
            "grid": {"width": 2, "height": 1, "origin_x": 0.0, "origin_y": 30.0, "pixel_size": 30.0},
            "bands": [
                {"name": "product_2019", "cells": [403, null]},
                {"name": "product_2020", "cells": [215, 215]}
            ]
        }],
        "tables": [{
            "id": "users/ana/MAPBIOMAS/farms",
            "features": [{
                "properties": {"name": "Farm A"},
                "geometry": [{
                    "exterior": [
                        {"x": 0.0, "y": 0.0}, {"x": 30.0, "y": 0.0},
                        {"x": 30.0, "y": 30.0}, {"x": 0.0, "y": 30.0}, {"x": 0.0, "y": 0.0}
                    ],
                    "interiors": []
                }]
            }]
        }]
    }"#;

    fn store() -> AssetStore {
        let mut store = AssetStore::new();
        store.merge_manifest(MANIFEST).expect("manifest");
        store
    }

    #[test]
    fn loads_bands_and_tables_from_manifest() {
        let store = store();
        let bands = store.load_bands("projects/x/deforestation_v1").expect("bands");
        assert_eq!(bands.band_names(), vec!["product_2019", "product_2020"]);
        assert_eq!(bands.select("product_2019").expect("band").get(1, 0), None);

        let table = store.load_features("users/ana/MAPBIOMAS/farms").expect("table");
        assert_eq!(table.feature_names("name"), vec!["Farm A"]);
    }

    #[test]
    fn missing_assets_are_reported() {
        assert!(matches!(
            store().load_bands("projects/x/nothing"),
            Err(ToolkitError::AssetNotFound(_))
        ));
        assert!(matches!(
            store().list_assets("users/bob/MAPBIOMAS"),
            Err(ToolkitError::RemoteLookupFailure { .. })
        ));
    }

    #[test]
    fn lists_direct_children_only() {
        let mut store = store();
        store.insert_table(FeatureCollection::new("users/ana/MAPBIOMAS/sub/deep", Vec::new()));
        assert_eq!(
            store.list_assets("users/ana/MAPBIOMAS").expect("list"),
            vec!["users/ana/MAPBIOMAS/farms"]
        );
        assert_eq!(store.asset_roots().expect("roots"), vec!["users/ana/MAPBIOMAS"]);
    }

    #[test]
    fn rejects_bands_with_wrong_cell_count() {
        let bad = MANIFEST.replace("[215, 215]", "[215]");
        assert!(AssetStore::new().merge_manifest(&bad).is_err());
    }

    #[test]
    fn load_dir_reads_json_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("assets.json"), MANIFEST).expect("write");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write");
        let store = AssetStore::load_dir(dir.path()).expect("load");
        assert!(store.load_bands("projects/x/deforestation_v1").is_ok());
    }
}
