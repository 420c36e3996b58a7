// THEORY:
// The `pipeline` module is the top-level API of the toolkit. It wires the
// asset sources, export planning and the job queue into a single entry point:
// hand it a `Ready` selection and it writes one raster per checked period plus
// one statistics table.
//
// Stages of an export:
// 1.  **Resolve**: the selection is turned into an `ExportSelection`; anything
//     short of `Ready` stops here with `UserSelectionIncomplete`.
// 2.  **Load**: the product's band stack (with legacy band names normalised) and
//     the chosen vector table are fetched from the sources.
// 3.  **Plan**: `plan_export` clips, crops, aggregates and names everything. A
//     failure here means nothing has been submitted.
// 4.  **Write**: the image requests go to the export queue first. The table is
//     queued only after every image has been written, so a failed export never
//     leaves a statistics table behind.

use crate::config::ToolkitConfig;
use crate::core_modules::catalog::{DataProduct, ProductStyle, catalog};
use crate::core_modules::export::{
    ExportPlan, ExportReceipt, ExportSettings, ExportSink, ImageExportRequest, plan_export,
};
use crate::core_modules::jobs::{ExportQueue, JobHandle};
use crate::core_modules::raster::{BandStack, ClassCode, Raster};
use crate::core_modules::selection::{Dataset, Selection};
use crate::core_modules::store::{RasterSource, VectorSource};
use crate::error::{Result, ToolkitError};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

/// Files written by one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub images: Vec<ExportReceipt>,
    pub table: ExportReceipt,
}

/// A period band prepared for display, with the style that colours it.
#[derive(Debug, Clone, PartialEq)]
pub struct MapLayer {
    pub raster: Raster<ClassCode>,
    pub style: &'static ProductStyle,
}

impl MapLayer {
    /// Pixels per legend entry, in legend order. Entries with no pixels and
    /// values the legend does not name are left out.
    pub fn legend_counts(&self) -> Vec<(&'static str, usize)> {
        self.style
            .legend
            .iter()
            .map(|entry| {
                let count = self
                    .raster
                    .cells()
                    .iter()
                    .filter(|cell| **cell == Some(entry.value))
                    .count();
                (entry.label, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Pixels per palette colour.
    pub fn color_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for value in self.raster.cells().iter().flatten() {
            if let Some(color) = self.style.color_for(*value) {
                *counts.entry(color).or_insert(0) += 1;
            }
        }
        counts
    }
}

pub struct ExportPipeline {
    rasters: Arc<dyn RasterSource>,
    vectors: Arc<dyn VectorSource>,
    queue: ExportQueue,
    settings: ExportSettings,
}

impl ExportPipeline {
    /// Starts the export queue; must be called from within a tokio runtime.
    pub fn new(
        rasters: Arc<dyn RasterSource>,
        vectors: Arc<dyn VectorSource>,
        sink: Arc<dyn ExportSink>,
        config: &ToolkitConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            rasters,
            vectors,
            queue: ExportQueue::new(sink, config.worker_count()),
            settings: config.export.clone(),
        })
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    /// Band stack of a product with its current band names.
    pub fn load_bands(&self, dataset: Dataset, data_type: DataProduct) -> Result<BandStack> {
        let entry = catalog().product(dataset.region, dataset.collection, data_type)?;
        let bands = self.rasters.load_bands(entry.asset)?;
        Ok(match data_type.style().band_rename {
            Some((from, to)) => bands.rename_bands(from, to),
            None => bands,
        })
    }

    /// The map layer of one period: the band scaled for display, with zero
    /// cells masked.
    pub fn layer(&self, dataset: Dataset, data_type: DataProduct, period: &str) -> Result<MapLayer> {
        let entry = catalog().product(dataset.region, dataset.collection, data_type)?;
        if !entry.has_period(period) {
            return Err(ToolkitError::UnknownKey {
                kind: "period",
                key: period.to_string(),
            });
        }
        let bands = self.load_bands(dataset, data_type)?;
        let band = bands.select(&entry.band_name(period))?;
        let style = data_type.style();
        let shown = match style.display_divisor {
            Some(divisor) => band.divide(divisor)?,
            None => band.clone(),
        };
        Ok(MapLayer {
            raster: shown.self_mask(),
            style,
        })
    }

    pub fn plan(&self, selection: &Selection) -> Result<ExportPlan> {
        let export = selection.export_selection()?;
        let bands = self.load_bands(export.dataset, export.data_type)?;
        let table = self.vectors.load_features(&export.target.table)?;
        plan_export(&export, &bands, &table, &self.settings)
    }

    /// Queues image requests and waits for all of them. Every failure is
    /// logged; the first one is returned.
    pub async fn write_images(&self, images: Vec<ImageExportRequest>) -> Result<Vec<ExportReceipt>> {
        let handles = images
            .into_iter()
            .map(|request| self.queue.submit_image(request))
            .collect::<Result<Vec<_>>>()?;
        let outcomes = join_all(handles.into_iter().map(JobHandle::wait)).await;

        let mut receipts = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(receipt) => receipts.push(receipt),
                Err(error) => {
                    warn!(%error, "image export failed");
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(receipts),
        }
    }

    /// Plans and writes one export: all images, then the table.
    pub async fn export(&self, selection: &Selection) -> Result<ExportReport> {
        let plan = self.plan(selection)?;
        let span = info_span!("export", table = %plan.table.name, images = plan.images.len());
        async move {
            let ExportPlan { images, table } = plan;
            let images = self.write_images(images).await.inspect_err(|_| {
                warn!("table skipped after failed image export");
            })?;
            let table = self.queue.submit_table(table)?.wait().await?;
            info!(files = images.iter().map(|r| r.paths.len()).sum::<usize>() + 1, "export finished");
            Ok(ExportReport { images, table })
        }
        .instrument(span)
        .await
    }

    /// Waits for queued jobs and stops the workers.
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::catalog::{CollectionVersion, DataProduct, RegionKey};
    use crate::core_modules::export::FileSystemSink;
    use crate::core_modules::raster::{GridSpec, Raster};
    use crate::core_modules::selection::SelectionInput;
    use crate::core_modules::store::AssetStore;
    use crate::core_modules::vector::{Feature, FeatureCollection};
    use geo::{MultiPolygon, polygon};

    const BIOMES: &str =
        "projects/mapbiomas-territories/assets/TERRITORIES/LULC/BRAZIL/COLLECTION9/WORKSPACE/BIOMES";

    fn store() -> Arc<AssetStore> {
        let grid = GridSpec::new(4, 4, 0.0, 120.0, 30.0);
        let asset = catalog()
            .product(
                RegionKey::MapbiomasBrazil,
                CollectionVersion::C9_0,
                DataProduct::DeforestationSecondaryVegetation,
            )
            .expect("product")
            .asset;
        let mut first = Raster::filled(grid, 403);
        first.set(0, 0, Some(0));
        let bands = BandStack::new(grid)
            .with_band("product_2019", first)
            .and_then(|s| s.with_band("product_2020", Raster::filled(grid, 303)))
            .expect("bands");

        let pampa = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 120.0, y: 0.0),
            (x: 120.0, y: 120.0),
            (x: 0.0, y: 120.0),
            (x: 0.0, y: 0.0),
        ]]);
        let mut store = AssetStore::new();
        store.insert_raster(asset, bands);
        store.insert_table(FeatureCollection::new(
            BIOMES,
            vec![Feature::new(pampa).with_property("name", "Pampa")],
        ));
        Arc::new(store)
    }

    fn ready_selection() -> Selection {
        let mut selection = Selection::new();
        for input in [
            SelectionInput::ChooseRegion("mapbiomas-brazil".into()),
            SelectionInput::ChooseCollection("collection-9.0".into()),
            SelectionInput::ChooseTable(BIOMES.into()),
            SelectionInput::ChooseProperty("name".into()),
            SelectionInput::ChooseFeature("Pampa".into()),
            SelectionInput::ChooseDataType("deforestation_sec_vegetation".into()),
            SelectionInput::TogglePeriod {
                period: "2019".into(),
                checked: true,
            },
            SelectionInput::TogglePeriod {
                period: "2020".into(),
                checked: true,
            },
        ] {
            selection.apply(input).expect("transition");
        }
        selection
    }

    fn config(workers: usize) -> ToolkitConfig {
        ToolkitConfig {
            workers: Some(workers),
            ..ToolkitConfig::default()
        }
    }

    #[tokio::test]
    async fn end_to_end_writes_one_tiff_per_period_and_one_csv() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store();
        let pipeline = ExportPipeline::new(
            store.clone(),
            store,
            Arc::new(FileSystemSink::new(dir.path())),
            &config(2),
        )
        .expect("pipeline");

        let report = pipeline.export(&ready_selection()).await.expect("export");
        pipeline.shutdown().await;

        assert_eq!(report.images.len(), 2);
        assert!(report.images.iter().all(|r| r.paths.len() == 2 && r.paths.iter().all(|p| p.exists())));
        assert_eq!(report.table.name, "mapbiomas-brazil-collection-90-pampa-area");

        let text = std::fs::read_to_string(&report.table.paths[0]).expect("csv");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "0,0.0009,kilometers^2,Other,Non Observed,classification_2019");
        assert_eq!(
            lines[2],
            "403,0.0135,kilometers^2,Deforestation in  Primary Vegetation,Forest Formation,classification_2019"
        );
        assert_eq!(
            lines[3],
            "303,0.0144,kilometers^2,Secondary Vegetation,Forest Formation,classification_2020"
        );
    }

    #[tokio::test]
    async fn layer_shows_the_process_class_with_zero_masked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store();
        let pipeline = ExportPipeline::new(
            store.clone(),
            store,
            Arc::new(FileSystemSink::new(dir.path())),
            &config(1),
        )
        .expect("pipeline");
        let dataset = Dataset {
            region: RegionKey::MapbiomasBrazil,
            collection: CollectionVersion::C9_0,
        };

        let layer = pipeline
            .layer(dataset, DataProduct::DeforestationSecondaryVegetation, "2019")
            .expect("layer");
        assert_eq!(layer.raster.get(0, 0), None);
        assert_eq!(layer.raster.get(1, 0), Some(4));
        assert_eq!(layer.raster.valid_count(), 15);
        assert_eq!(layer.legend_counts(), vec![("Deforestation in  Primary Vegetation", 15)]);
        assert_eq!(layer.color_counts().into_iter().collect::<Vec<_>>(), vec![("#e31a1c", 15)]);

        let outside = pipeline.layer(dataset, DataProduct::DeforestationSecondaryVegetation, "1900");
        assert!(matches!(outside, Err(ToolkitError::UnknownKey { kind: "period", .. })));
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn incomplete_selection_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store();
        let pipeline = ExportPipeline::new(
            store.clone(),
            store,
            Arc::new(FileSystemSink::new(dir.path())),
            &config(1),
        )
        .expect("pipeline");

        let mut selection = Selection::new();
        selection
            .apply(SelectionInput::ChooseRegion("mapbiomas-brazil".into()))
            .expect("region");
        let result = pipeline.export(&selection).await;
        assert!(matches!(result, Err(ToolkitError::UserSelectionIncomplete(_))));
        pipeline.shutdown().await;
        assert_eq!(std::fs::read_dir(dir.path()).expect("dir").count(), 0);
    }

    fn csv_files(dir: &std::path::Path) -> Vec<String> {
        let folder = dir.join("MAPBIOMAS-EXPORT");
        let Ok(entries) = std::fs::read_dir(folder) else {
            return Vec::new();
        };
        entries
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".csv"))
            .collect()
    }

    #[tokio::test]
    async fn values_outside_16_bits_fail_before_any_file_is_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let grid = GridSpec::new(4, 4, 0.0, 120.0, 30.0);
        let age = catalog()
            .product(
                RegionKey::MapbiomasBrazil,
                CollectionVersion::C9_0,
                DataProduct::SecondaryVegetationAge,
            )
            .expect("product")
            .asset;
        let mut store = Arc::unwrap_or_clone(store());
        store.insert_raster(
            age,
            BandStack::new(grid)
                .with_band("secondary_vegetation_age_2019", Raster::filled(grid, -1))
                .expect("bands"),
        );
        let store = Arc::new(store);
        let pipeline = ExportPipeline::new(
            store.clone(),
            store,
            Arc::new(FileSystemSink::new(dir.path())),
            &config(1),
        )
        .expect("pipeline");

        let mut selection = ready_selection();
        selection
            .apply(SelectionInput::ChooseDataType("secondary_vegetation_age".into()))
            .expect("data type");
        selection
            .apply(SelectionInput::TogglePeriod {
                period: "2019".into(),
                checked: true,
            })
            .expect("period");

        let result = pipeline.export(&selection).await;
        pipeline.shutdown().await;
        assert!(matches!(result, Err(ToolkitError::InvalidParameter(_))));
        assert_eq!(std::fs::read_dir(dir.path()).expect("dir").count(), 0);
    }

    struct BrokenImageSink(FileSystemSink);

    impl ExportSink for BrokenImageSink {
        fn write_image(&self, request: &ImageExportRequest) -> Result<ExportReceipt> {
            Err(ToolkitError::Io(std::io::Error::other(format!("disk full writing {}", request.name))))
        }

        fn write_table(&self, request: &crate::core_modules::export::TableExportRequest) -> Result<ExportReceipt> {
            self.0.write_table(request)
        }
    }

    #[tokio::test]
    async fn failed_image_leaves_no_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store();
        let pipeline = ExportPipeline::new(
            store.clone(),
            store,
            Arc::new(BrokenImageSink(FileSystemSink::new(dir.path()))),
            &config(2),
        )
        .expect("pipeline");

        let result = pipeline.export(&ready_selection()).await;
        pipeline.shutdown().await;
        assert!(matches!(result, Err(ToolkitError::Io(_))));
        assert!(csv_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn missing_asset_fails_before_submission() {
        let dir = tempfile::tempdir().expect("tempdir");
        let empty = Arc::new(AssetStore::new());
        let pipeline = ExportPipeline::new(
            empty.clone(),
            empty,
            Arc::new(FileSystemSink::new(dir.path())),
            &config(1),
        )
        .expect("pipeline");
        let result = pipeline.plan(&ready_selection());
        assert!(matches!(result, Err(ToolkitError::AssetNotFound(_))));
        pipeline.shutdown().await;
    }
}
