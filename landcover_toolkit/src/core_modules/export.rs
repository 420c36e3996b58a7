// THEORY:
// An export turns a `Ready` selection into concrete requests for an export sink:
// one raster request per checked period and one table request holding the area
// statistics of every checked period.
//
// Key architectural principles:
// 1.  **Plan, then Write**: `plan_export` is pure. It reads the loaded bands and
//     features, runs the zonal aggregation for every band and returns an
//     `ExportPlan`. If any step fails (no matching feature, a missing band, a grid
//     mismatch) the whole plan fails and nothing reaches a sink.
// 2.  **Two Geometries**: Raster requests use the feature outline, grown by the
//     buffer when one is chosen, and cover the bounding box of that outline. The
//     statistics always use the unbuffered outline burned as territory `1` and
//     aggregated over its bounding box.
// 3.  **Sinks are Dumb**: An `ExportSink` only knows how to store a finished
//     request. Tiling, naming, decoration and value-range checks all happen
//     before it is called, so a plan that exists can be written in full.
// 4.  **Placed Tiles**: Every raster file is written with a world file beside
//     it, taken from the tile's own grid, so tiles land where they belong.

use crate::core_modules::catalog::{ClassEncoding, DataProduct};
use crate::core_modules::compound::compound::labels;
use crate::core_modules::naming::{image_file_name, table_file_name};
use crate::core_modules::raster::{BandStack, ClassCode, PixelWindow, Raster};
use crate::core_modules::selection::ExportSelection;
use crate::core_modules::territory::{BurnValue, burn};
use crate::core_modules::vector::FeatureCollection;
use crate::core_modules::zonal::{AreaRow, AreaUnit, aggregate};
use crate::error::{Result, ToolkitError};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Column order of the statistics table.
pub const TABLE_COLUMNS: [&str; 6] = ["class", "area", "unit", "class_name", "lulc_class_name", "band"];

/// Tunable constants of an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Destination folder, relative to the sink root.
    pub folder: String,
    /// Ground resolution in meters the rasters are exported and measured at.
    pub scale: f64,
    /// Largest raster, in pixels, a single request may cover.
    pub max_pixels: f64,
    /// Reporting unit for the statistics table.
    pub unit: AreaUnit,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            folder: "MAPBIOMAS-EXPORT".to_string(),
            scale: 30.0,
            max_pixels: 1e13,
            unit: AreaUnit::square_kilometers(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    GeoTiff,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::GeoTiff => "tif",
            ExportFormat::Csv => "csv",
        }
    }
}

/// One period's raster, clipped and cropped, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageExportRequest {
    pub name: String,
    pub folder: String,
    pub band: String,
    pub raster: Raster<ClassCode>,
    /// Largest tile side, in pixels.
    pub file_dimensions: u32,
    pub format: ExportFormat,
}

/// One tile of an image request.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTile {
    pub name: String,
    pub raster: Raster<ClassCode>,
}

impl ImageExportRequest {
    /// Splits the raster into tiles no larger than `file_dimensions` per side.
    /// A raster that fits in one tile keeps the bare request name; otherwise
    /// each tile is suffixed with its row and column pixel offsets.
    pub fn tiles(&self) -> Vec<ImageTile> {
        let grid = self.raster.grid();
        let side = self.file_dimensions.max(1);
        if grid.width <= side && grid.height <= side {
            return vec![ImageTile {
                name: self.name.clone(),
                raster: self.raster.clone(),
            }];
        }

        let mut tiles = Vec::new();
        for row_start in (0..grid.height).step_by(side as usize) {
            for col_start in (0..grid.width).step_by(side as usize) {
                let window = PixelWindow {
                    col_start,
                    col_end: (col_start + side).min(grid.width),
                    row_start,
                    row_end: (row_start + side).min(grid.height),
                };
                tiles.push(ImageTile {
                    name: format!("{}-{:010}-{:010}", self.name, row_start, col_start),
                    raster: self.raster.window(&window),
                });
            }
        }
        tiles
    }
}

/// One row of the exported statistics table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub class: ClassCode,
    pub area: f64,
    pub unit: String,
    pub class_name: Option<String>,
    pub lulc_class_name: Option<String>,
    pub band: String,
}

impl TableRow {
    pub fn from_area(row: &AreaRow, encoding: &ClassEncoding, band: &str) -> Self {
        let names = labels(row.class_code, encoding);
        Self {
            class: row.class_code,
            area: row.area,
            unit: row.unit.clone(),
            class_name: names.class_name.map(str::to_string),
            lulc_class_name: names.lulc_class_name.map(str::to_string),
            band: band.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableExportRequest {
    pub name: String,
    pub folder: String,
    pub rows: Vec<TableRow>,
    pub format: ExportFormat,
}

/// Everything one export writes.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPlan {
    pub images: Vec<ImageExportRequest>,
    pub table: TableExportRequest,
}

/// What a sink stored for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReceipt {
    pub name: String,
    pub paths: Vec<PathBuf>,
}

/// Storage for finished export requests.
pub trait ExportSink: Send + Sync {
    fn write_image(&self, request: &ImageExportRequest) -> Result<ExportReceipt>;
    fn write_table(&self, request: &TableExportRequest) -> Result<ExportReceipt>;
}

/// Builds every request for `selection` from already loaded inputs.
///
/// `bands` must carry the product's band names (`classification_2019`, …) and
/// `features` is the whole table the selection points at.
pub fn plan_export(
    selection: &ExportSelection,
    bands: &BandStack,
    features: &FeatureCollection,
    settings: &ExportSettings,
) -> Result<ExportPlan> {
    let grid = bands.grid();
    if (grid.pixel_size - settings.scale).abs() > f64::EPSILON * settings.scale.abs().max(1.0) {
        return Err(ToolkitError::InvalidParameter(format!(
            "rasters at {} m cannot be exported at {} m",
            grid.pixel_size, settings.scale
        )));
    }

    let chosen = select_features(selection, features)?;
    let outline = chosen.region();

    let product = selection.data_type;
    let style = product.style();
    let region_key = selection.dataset.region.as_str();
    let collection_key = selection.dataset.collection.as_str();
    let feature_name = selection.target.feature.as_deref().unwrap_or("");

    let image_region = if selection.buffer_distance > 0.0 {
        outline.buffered(selection.buffer_distance)?
    } else {
        outline.clone()
    };
    if image_region.is_degenerate() {
        return Err(ToolkitError::mismatch(format!(
            "selected features of '{}' have no area",
            chosen.id
        )));
    }
    let image_bounds = image_region
        .bounds()
        .ok_or_else(|| ToolkitError::mismatch("selected features have no extent"))?;
    let image_window = grid.window_for(&image_bounds).ok_or_else(|| {
        ToolkitError::mismatch(format!("'{}' does not overlap the raster", chosen.id))
    })?;
    let window_pixels = image_window.width() as f64 * image_window.height() as f64;
    if window_pixels > settings.max_pixels {
        return Err(ToolkitError::InvalidParameter(format!(
            "export covers {window_pixels} pixels, more than the limit of {}",
            settings.max_pixels
        )));
    }

    let band_names: Vec<String> = selection
        .periods
        .iter()
        .map(|period| band_name(product, period))
        .collect();

    let mut images = Vec::with_capacity(band_names.len());
    for (period, band) in selection.periods.iter().zip(&band_names) {
        let raster = bands.select(band)?.clip(&image_region).window(&image_window);
        tiff::check_range(&raster)?;
        images.push(ImageExportRequest {
            name: image_file_name(region_key, collection_key, feature_name, period),
            folder: settings.folder.clone(),
            band: band.clone(),
            raster,
            file_dimensions: style.file_dimensions,
            format: ExportFormat::GeoTiff,
        });
    }

    let territory = burn(&chosen, grid, &BurnValue::Uniform(1))?;
    // A point or line outline only reaches this point with a buffer; its own
    // footprint covers no area, so the table has no rows.
    let table_region = outline.bounds_region().filter(|region| !region.is_degenerate());
    let mut rows = Vec::new();
    if let Some(table_region) = &table_region {
        for band in &band_names {
            let areas = aggregate(bands.select(band)?, &territory, table_region, settings.scale, &settings.unit)?;
            debug!(band = %band, groups = areas.len(), "areas computed");
            rows.extend(
                areas
                    .iter()
                    .map(|area| TableRow::from_area(area, &style.encoding, band)),
            );
        }
    }

    let table = TableExportRequest {
        name: table_file_name(region_key, collection_key, feature_name),
        folder: settings.folder.clone(),
        rows,
        format: ExportFormat::Csv,
    };

    info!(
        table = %table.name,
        images = images.len(),
        rows = table.rows.len(),
        "export planned"
    );
    Ok(ExportPlan { images, table })
}

fn band_name(product: DataProduct, period: &str) -> String {
    format!("{}{}", product.style().band_prefix, period)
}

/// The features of the table the selection narrows to.
pub fn select_features(selection: &ExportSelection, table: &FeatureCollection) -> Result<FeatureCollection> {
    let target = &selection.target;
    let mut chosen = match target.state {
        Some(code) => table.filter_state(code),
        None => table.clone(),
    };
    if let (Some(property), Some(feature)) = (&target.property, &target.feature) {
        chosen = chosen.filter_by_label(property, feature);
    }
    if chosen.is_empty() {
        return Err(ToolkitError::mismatch(format!(
            "no feature of '{}' matches the selection",
            table.id
        )));
    }
    Ok(chosen)
}

/// Writes `rows` as CSV with a header line, even when there are no rows.
pub fn write_csv<W: Write>(output: W, rows: &[TableRow]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(output);
    writer.write_record(TABLE_COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub mod tiff {
    use crate::core_modules::raster::{ClassCode, GridSpec, Raster};
    use crate::error::{Result, ToolkitError};
    use image::ImageEncoder;
    use image::codecs::tiff::TiffEncoder;
    use std::fs::File;
    use std::io::BufWriter;
    use std::path::Path;

    /// Extension of the world file written next to each raster.
    pub const WORLD_FILE_EXTENSION: &str = "tfw";

    fn to_u16(value: ClassCode) -> Result<u16> {
        u16::try_from(value).map_err(|_| {
            ToolkitError::InvalidParameter(format!("class {value} does not fit a 16-bit raster"))
        })
    }

    /// Fails on the first valid cell a 16-bit raster cannot hold.
    pub fn check_range(raster: &Raster<ClassCode>) -> Result<()> {
        raster.cells().iter().flatten().try_for_each(|v| to_u16(*v).map(drop))
    }

    /// Saves a class raster as a single-channel 16-bit TIFF. Masked cells are
    /// written as 0.
    pub fn save(path: &Path, raster: &Raster<ClassCode>) -> Result<()> {
        let grid = raster.grid();
        let mut buffer = Vec::with_capacity(raster.cells().len() * 2);
        for cell in raster.cells() {
            let value = match cell {
                Some(v) => to_u16(*v)?,
                None => 0,
            };
            buffer.extend_from_slice(&value.to_ne_bytes());
        }

        let output = BufWriter::new(File::create(path)?);
        let encoder = TiffEncoder::new(output);
        encoder.write_image(&buffer, grid.width, grid.height, image::ExtendedColorType::L16)?;
        Ok(())
    }

    /// The six lines of an ESRI world file: pixel size, two rotation terms,
    /// negated pixel size, then the centre of the upper-left pixel.
    pub fn world_file(grid: &GridSpec) -> String {
        let (x, y) = grid.pixel_center(0, 0);
        format!("{}\n0\n0\n{}\n{}\n{}\n", grid.pixel_size, -grid.pixel_size, x, y)
    }

    pub fn save_world_file(path: &Path, grid: &GridSpec) -> Result<()> {
        std::fs::write(path, world_file(grid))?;
        Ok(())
    }
}

/// Writes requests under `<root>/<folder>/`.
#[derive(Debug, Clone)]
pub struct FileSystemSink {
    root: PathBuf,
}

impl FileSystemSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder(&self, folder: &str) -> Result<PathBuf> {
        let dir = self.root.join(folder);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl ExportSink for FileSystemSink {
    fn write_image(&self, request: &ImageExportRequest) -> Result<ExportReceipt> {
        let dir = self.folder(&request.folder)?;
        let mut paths = Vec::new();
        let tiles = request.tiles();
        for tile in &tiles {
            let path = dir.join(format!("{}.{}", tile.name, request.format.extension()));
            tiff::save(&path, &tile.raster)?;
            let world = path.with_extension(tiff::WORLD_FILE_EXTENSION);
            tiff::save_world_file(&world, tile.raster.grid())?;
            paths.push(path);
            paths.push(world);
        }
        debug!(name = %request.name, band = %request.band, tiles = tiles.len(), "image written");
        Ok(ExportReceipt {
            name: request.name.clone(),
            paths,
        })
    }

    fn write_table(&self, request: &TableExportRequest) -> Result<ExportReceipt> {
        let dir = self.folder(&request.folder)?;
        let path = dir.join(format!("{}.{}", request.name, request.format.extension()));
        write_csv(BufWriter::new(File::create(&path)?), &request.rows)?;
        debug!(name = %request.name, rows = request.rows.len(), "table written");
        Ok(ExportReceipt {
            name: request.name.clone(),
            paths: vec![path],
        })
    }
}
