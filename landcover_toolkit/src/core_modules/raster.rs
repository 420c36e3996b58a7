// THEORY:
// The `raster` module holds the gridded inputs of the toolkit. Like the rest of
// the low-level containers, a `Raster` is "dumb": it owns a grid description and
// a flat vector of cells and knows how to answer questions about its own data
// (cell centres, windows, per-cell arithmetic). It knows nothing about regions
// of interest beyond the clip helper that delegates the coverage test to
// `geometry::Region`.
//
// Key architectural principles:
// 1.  **Shared Grid Contract**: Every raster carries a `GridSpec`. Two rasters can
//     only be combined cell-by-cell when their `GridSpec`s are equal; the zonal
//     aggregator enforces this before touching any data.
// 2.  **Explicit No-Data**: Cells are `Option<T>`. `None` means masked, the same
//     way a clipped or self-masked layer behaves on a hosted engine. Reductions
//     skip masked cells.
// 3.  **Band Stacks**: A collection product is one multi-band asset where each
//     band is a time period (`classification_2019`). `BandStack` keeps the bands
//     in order and answers band selection by name.

use crate::core_modules::geometry::Region;
use crate::error::{Result, ToolkitError};
use geo::{Rect, coord};
use serde::{Deserialize, Serialize};

pub type ClassCode = i32;
pub type TerritoryId = i32;

/// Placement and resolution of a north-up raster grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Number of columns.
    pub width: u32,
    /// Number of rows.
    pub height: u32,
    /// X coordinate of the upper-left corner.
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner.
    pub origin_y: f64,
    /// Linear ground size of one (square) pixel, in meters.
    pub pixel_size: f64,
}

/// A rectangular block of pixel indices, `[col_start, col_end) x [row_start, row_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_start: u32,
    pub col_end: u32,
    pub row_start: u32,
    pub row_end: u32,
}

impl PixelWindow {
    pub fn width(&self) -> u32 {
        self.col_end - self.col_start
    }

    pub fn height(&self) -> u32 {
        self.row_end - self.row_start
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

impl GridSpec {
    pub fn new(width: u32, height: u32, origin_x: f64, origin_y: f64, pixel_size: f64) -> Self {
        Self {
            width,
            height,
            origin_x,
            origin_y,
            pixel_size,
        }
    }

    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major position of pixel `(col, row)` in a cell buffer.
    pub fn index(&self, col: u32, row: u32) -> usize {
        row as usize * self.width as usize + col as usize
    }

    /// Map coordinates of the centre of pixel `(col, row)`.
    pub fn pixel_center(&self, col: u32, row: u32) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_size,
            self.origin_y - (row as f64 + 0.5) * self.pixel_size,
        )
    }

    /// The full footprint of the grid.
    pub fn extent(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.origin_x, y: self.origin_y - self.height as f64 * self.pixel_size },
            coord! { x: self.origin_x + self.width as f64 * self.pixel_size, y: self.origin_y },
        )
    }

    /// Pixels whose centres fall inside `rect` (edges inclusive).
    pub fn window_for(&self, rect: &Rect<f64>) -> Option<PixelWindow> {
        if self.is_empty() || self.pixel_size <= 0.0 {
            return None;
        }
        let min = rect.min();
        let max = rect.max();
        let size = self.pixel_size;

        let col_min = ((min.x - self.origin_x) / size - 0.5).ceil().max(0.0);
        let col_max = ((max.x - self.origin_x) / size - 0.5)
            .floor()
            .min(self.width as f64 - 1.0);
        let row_min = ((self.origin_y - max.y) / size - 0.5).ceil().max(0.0);
        let row_max = ((self.origin_y - min.y) / size - 0.5)
            .floor()
            .min(self.height as f64 - 1.0);

        if col_min > col_max || row_min > row_max {
            return None;
        }

        Some(PixelWindow {
            col_start: col_min as u32,
            col_end: col_max as u32 + 1,
            row_start: row_min as u32,
            row_end: row_max as u32 + 1,
        })
    }

    /// The grid describing a sub-window of this grid.
    pub fn sub_grid(&self, window: &PixelWindow) -> GridSpec {
        GridSpec {
            width: window.width(),
            height: window.height(),
            origin_x: self.origin_x + window.col_start as f64 * self.pixel_size,
            origin_y: self.origin_y - window.row_start as f64 * self.pixel_size,
            pixel_size: self.pixel_size,
        }
    }
}

/// A single-band grid of optional cell values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster<T> {
    grid: GridSpec,
    cells: Vec<Option<T>>,
}

impl<T: Copy> Raster<T> {
    pub fn new(grid: GridSpec, cells: Vec<Option<T>>) -> Result<Self> {
        if cells.len() != grid.len() {
            return Err(ToolkitError::mismatch(format!(
                "grid {}x{} expects {} cells, got {}",
                grid.width,
                grid.height,
                grid.len(),
                cells.len()
            )));
        }
        Ok(Self { grid, cells })
    }

    /// Builds a fully valid raster from row-major values.
    pub fn from_values(grid: GridSpec, values: Vec<T>) -> Result<Self> {
        Self::new(grid, values.into_iter().map(Some).collect())
    }

    pub fn filled(grid: GridSpec, value: T) -> Self {
        Self {
            grid,
            cells: vec![Some(value); grid.len()],
        }
    }

    /// A raster with every cell masked.
    pub fn masked(grid: GridSpec) -> Self {
        Self {
            grid,
            cells: vec![None; grid.len()],
        }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn cells(&self) -> &[Option<T>] {
        &self.cells
    }

    pub fn get(&self, col: u32, row: u32) -> Option<T> {
        if col >= self.grid.width || row >= self.grid.height {
            return None;
        }
        self.cells[self.grid.index(col, row)]
    }

    pub fn set(&mut self, col: u32, row: u32, value: Option<T>) {
        if col < self.grid.width && row < self.grid.height {
            self.cells[self.grid.index(col, row)] = value;
        }
    }

    pub fn same_grid<U>(&self, other: &Raster<U>) -> bool {
        self.grid == other.grid
    }

    pub fn valid_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> Raster<U> {
        Raster {
            grid: self.grid,
            cells: self.cells.iter().map(|c| c.map(&f)).collect(),
        }
    }

    /// Copies out a sub-window as a raster of its own, keeping georeferencing.
    pub fn window(&self, window: &PixelWindow) -> Raster<T> {
        let grid = self.grid.sub_grid(window);
        let mut cells = Vec::with_capacity(grid.len());
        for row in window.row_start..window.row_end {
            let start = self.grid.index(window.col_start, row);
            let end = self.grid.index(window.col_end, row);
            cells.extend_from_slice(&self.cells[start..end]);
        }
        Raster { grid, cells }
    }

    /// Masks every cell whose centre is not covered by `region`.
    pub fn clip(&self, region: &Region) -> Raster<T> {
        let mut clipped = Raster::masked(self.grid);
        let Some(bounds) = region.bounds() else {
            return clipped;
        };
        let Some(window) = self.grid.window_for(&bounds) else {
            return clipped;
        };
        for row in window.row_start..window.row_end {
            for col in window.col_start..window.col_end {
                let (x, y) = self.grid.pixel_center(col, row);
                if region.covers(x, y) {
                    clipped.set(col, row, self.get(col, row));
                }
            }
        }
        clipped
    }
}

impl Raster<ClassCode> {
    /// Integer division of every valid cell, as used to pull the process
    /// class out of compound codes for display.
    pub fn divide(&self, divisor: ClassCode) -> Result<Raster<ClassCode>> {
        if divisor == 0 {
            return Err(ToolkitError::InvalidParameter("division by zero".into()));
        }
        Ok(self.map(|v| v.div_euclid(divisor)))
    }

    /// Masks cells equal to zero.
    pub fn self_mask(&self) -> Raster<ClassCode> {
        Raster {
            grid: self.grid,
            cells: self
                .cells
                .iter()
                .map(|c| c.filter(|v| *v != 0))
                .collect(),
        }
    }
}

/// A named band of a multi-band asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub raster: Raster<ClassCode>,
}

/// An ordered set of bands sharing one grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BandStack {
    grid: GridSpec,
    bands: Vec<Band>,
}

impl BandStack {
    pub fn new(grid: GridSpec) -> Self {
        Self {
            grid,
            bands: Vec::new(),
        }
    }

    pub fn with_band(mut self, name: impl Into<String>, raster: Raster<ClassCode>) -> Result<Self> {
        self.push_band(name, raster)?;
        Ok(self)
    }

    pub fn push_band(&mut self, name: impl Into<String>, raster: Raster<ClassCode>) -> Result<()> {
        let name = name.into();
        if *raster.grid() != self.grid {
            return Err(ToolkitError::mismatch(format!(
                "band '{name}' is not on the stack grid"
            )));
        }
        self.bands.retain(|b| b.name != name);
        self.bands.push(Band { name, raster });
        Ok(())
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn select(&self, name: &str) -> Result<&Raster<ClassCode>> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.raster)
            .ok_or_else(|| ToolkitError::UnknownKey {
                kind: "band",
                key: name.to_string(),
            })
    }

    /// Rewrites `from` to `to` in every band name.
    pub fn rename_bands(mut self, from: &str, to: &str) -> Self {
        for band in &mut self.bands {
            band.name = band.name.replace(from, to);
        }
        self
    }
}
