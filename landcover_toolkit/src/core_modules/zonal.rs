// THEORY:
// The `zonal` module is the one piece of the toolkit with real algorithmic shape:
// it crosses a categorical raster (one period of a land-cover or deforestation
// product) with a territory raster and reports how much area each class covers
// inside each territory.
//
// Key architectural principles:
// 1.  **Two-Level Grouping**: Pixels are grouped first by territory id and then,
//     within a territory, by class code. Grouping is exact integer matching.
// 2.  **Uniform Pixel Area**: Every covered pixel has the same nominal area,
//     `pixel_scale² / area_divisor`. Groups therefore accumulate pixel counts and
//     the area is produced once per group as `count · pixel_scale² / divisor`.
//     This keeps sums exact for realistic pixel counts and makes a change of
//     divisor rescale every row by exactly the divisor ratio.
// 3.  **All-or-Nothing**: Inputs are validated before any pixel is read. A grid
//     mismatch or a degenerate region fails the whole call; there is no partial
//     result to leak into an export.
// 4.  **Stateless Utility**: `aggregate` is a pure function of its arguments and
//     can be called from many tasks at once, one per period or per region.

use crate::core_modules::geometry::Region;
use crate::core_modules::raster::{ClassCode, Raster, TerritoryId};
use crate::error::{Result, ToolkitError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// One aggregated `(territory, class)` group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaRow {
    pub territory_id: TerritoryId,
    pub class_code: ClassCode,
    pub area: f64,
    pub unit: String,
}

/// Reporting unit: a divisor from square meters plus the label written next to
/// every area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaUnit {
    pub divisor: f64,
    pub label: String,
}

impl AreaUnit {
    pub fn new(divisor: f64, label: impl Into<String>) -> Self {
        Self {
            divisor,
            label: label.into(),
        }
    }

    pub fn square_meters() -> Self {
        Self::new(1.0, "meters^2")
    }

    pub fn hectares() -> Self {
        Self::new(10_000.0, "hectares")
    }

    pub fn square_kilometers() -> Self {
        Self::new(1_000_000.0, "kilometers^2")
    }
}

/// Total area per `(territory, class)` pair of pixels covered by `region`.
///
/// Rows come back ordered by territory then class, but callers should treat the
/// result as an unordered set.
pub fn aggregate(
    category: &Raster<ClassCode>,
    territory: &Raster<TerritoryId>,
    region: &Region,
    pixel_scale: f64,
    unit: &AreaUnit,
) -> Result<Vec<AreaRow>> {
    if !category.same_grid(territory) {
        return Err(ToolkitError::mismatch(format!(
            "category grid {:?} differs from territory grid {:?}",
            category.grid(),
            territory.grid()
        )));
    }
    if region.is_degenerate() {
        return Err(ToolkitError::mismatch("region geometry is empty or has no area"));
    }
    if !(pixel_scale.is_finite() && pixel_scale > 0.0) {
        return Err(ToolkitError::InvalidParameter(format!(
            "pixel scale must be positive, got {pixel_scale}"
        )));
    }
    if !(unit.divisor.is_finite() && unit.divisor > 0.0) {
        return Err(ToolkitError::InvalidParameter(format!(
            "area divisor must be positive, got {}",
            unit.divisor
        )));
    }

    let grid = category.grid();
    let mut counts: BTreeMap<(TerritoryId, ClassCode), u64> = BTreeMap::new();

    let window = region.bounds().and_then(|bounds| grid.window_for(&bounds));
    if let Some(window) = window {
        for row in window.row_start..window.row_end {
            for col in window.col_start..window.col_end {
                let (Some(territory_id), Some(class_code)) =
                    (territory.get(col, row), category.get(col, row))
                else {
                    continue;
                };
                let (x, y) = grid.pixel_center(col, row);
                if region.covers(x, y) {
                    *counts.entry((territory_id, class_code)).or_insert(0) += 1;
                }
            }
        }
    }

    let pixel_area = pixel_scale * pixel_scale;
    let rows: Vec<AreaRow> = counts
        .into_iter()
        .map(|((territory_id, class_code), count)| AreaRow {
            territory_id,
            class_code,
            area: count as f64 * pixel_area / unit.divisor,
            unit: unit.label.clone(),
        })
        .collect();

    debug!(groups = rows.len(), pixel_scale, divisor = unit.divisor, "zonal aggregation done");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::raster::GridSpec;
    use geo::{Rect, coord};
    use proptest::prelude::*;

    fn grid(width: u32, height: u32) -> GridSpec {
        GridSpec::new(width, height, 0.0, height as f64 * 30.0, 30.0)
    }

    fn whole(grid: &GridSpec) -> Region {
        Region::from_rect(grid.extent())
    }

    #[test]
    fn uniform_two_by_two_is_one_row() {
        let g = grid(2, 2);
        let category = Raster::filled(g, 3);
        let territory = Raster::filled(g, 1);
        let rows = aggregate(&category, &territory, &whole(&g), 30.0, &AreaUnit::square_kilometers())
            .expect("aggregate");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].territory_id, 1);
        assert_eq!(rows[0].class_code, 3);
        assert_eq!(rows[0].area, 4.0 * 900.0 / 1_000_000.0);
        assert_eq!(rows[0].unit, "kilometers^2");
    }

    #[test]
    fn two_territories_two_classes_even_split() {
        let g = grid(2, 2);
        let category = Raster::from_values(g, vec![1, 2, 1, 2]).expect("raster");
        let territory = Raster::from_values(g, vec![10, 10, 20, 20]).expect("raster");
        let rows = aggregate(&category, &territory, &whole(&g), 30.0, &AreaUnit::square_meters())
            .expect("aggregate");
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.area > 0.0));
        let total: f64 = rows.iter().map(|r| r.area).sum();
        assert!((total - 4.0 * 900.0).abs() < 1e-9);
        for territory_id in [10, 20] {
            let per_territory: f64 = rows
                .iter()
                .filter(|r| r.territory_id == territory_id)
                .map(|r| r.area)
                .sum();
            assert!((per_territory - 2.0 * 900.0).abs() < 1e-9);
        }
    }

    #[test]
    fn region_outside_extent_yields_no_rows() {
        let g = grid(2, 2);
        let far = Region::from_rect(Rect::new(
            coord! { x: 10_000.0, y: 10_000.0 },
            coord! { x: 20_000.0, y: 20_000.0 },
        ));
        let rows = aggregate(&Raster::filled(g, 1), &Raster::filled(g, 1), &far, 30.0, &AreaUnit::square_meters())
            .expect("aggregate");
        assert!(rows.is_empty());
    }

    #[test]
    fn grid_mismatch_fails() {
        let category = Raster::filled(grid(2, 2), 1);
        let territory = Raster::filled(grid(3, 2), 1);
        let result = aggregate(&category, &territory, &whole(&grid(2, 2)), 30.0, &AreaUnit::square_meters());
        assert!(matches!(result, Err(ToolkitError::InputMismatch(_))));
    }

    #[test]
    fn degenerate_region_fails() {
        let g = grid(2, 2);
        let empty = Region::new(geo::MultiPolygon::new(vec![]));
        let result = aggregate(&Raster::filled(g, 1), &Raster::filled(g, 1), &empty, 30.0, &AreaUnit::square_meters());
        assert!(matches!(result, Err(ToolkitError::InputMismatch(_))));
    }

    #[test]
    fn masked_cells_and_uncovered_pixels_are_skipped() {
        let g = grid(2, 2);
        let category = Raster::new(g, vec![Some(1), None, Some(1), Some(1)]).expect("raster");
        let territory = Raster::new(g, vec![Some(1), Some(1), None, Some(1)]).expect("raster");
        // left column only
        let left = Region::from_rect(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 30.0, y: 60.0 }));
        let rows = aggregate(&category, &territory, &left, 30.0, &AreaUnit::square_meters())
            .expect("aggregate");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].area, 900.0);
    }

    #[test]
    fn invalid_scale_or_divisor_fails() {
        let g = grid(1, 1);
        let r = Raster::filled(g, 1);
        assert!(aggregate(&r, &r, &whole(&g), 0.0, &AreaUnit::square_meters()).is_err());
        assert!(aggregate(&r, &r, &whole(&g), 30.0, &AreaUnit::new(0.0, "x")).is_err());
    }

    proptest! {
        #[test]
        fn divisor_rescales_every_row_exactly(
            classes in prop::collection::vec(0i32..5, 16),
            territories in prop::collection::vec(1i32..3, 16),
        ) {
            let g = grid(4, 4);
            let category = Raster::from_values(g, classes).unwrap();
            let territory = Raster::from_values(g, territories).unwrap();
            let region = whole(&g);
            let raw = aggregate(&category, &territory, &region, 30.0, &AreaUnit::new(1.0, "m2")).unwrap();
            let km = aggregate(&category, &territory, &region, 30.0, &AreaUnit::new(1_000_000.0, "m2")).unwrap();
            prop_assert_eq!(raw.len(), km.len());
            for (a, b) in raw.iter().zip(km.iter()) {
                prop_assert_eq!(a.territory_id, b.territory_id);
                prop_assert_eq!(a.class_code, b.class_code);
                prop_assert_eq!(&a.unit, &b.unit);
                prop_assert_eq!(b.area, a.area / 1_000_000.0);
            }
            let total: f64 = raw.iter().map(|r| r.area).sum();
            prop_assert!((total - 16.0 * 900.0).abs() < 1e-6);
        }
    }
}
