// THEORY:
// The zonal aggregator groups pixels by a Territory Raster, so vector
// membership has to be moved into raster space first. "Burning" paints a value
// into every cell of a target grid whose centre is covered by a feature, using
// the same pixel-centre rule as clipping, so the territory layer and the clip
// mask always agree on which pixels are in.
//
// Features are painted in order; where outlines overlap, the later feature wins.
// Cells no feature covers stay masked and are ignored by the aggregator.

use crate::core_modules::geometry::Region;
use crate::core_modules::raster::{GridSpec, Raster, TerritoryId};
use crate::core_modules::vector::FeatureCollection;
use crate::error::{Result, ToolkitError};

/// How burn values are chosen for each feature.
#[derive(Debug, Clone, PartialEq)]
pub enum BurnValue {
    /// Every feature burns the same id; the whole selection is one territory.
    Uniform(TerritoryId),
    /// Features are numbered 1, 2, 3… in collection order.
    FeatureIndex,
    /// Each feature burns the integer value of one of its properties.
    Property(String),
}

pub fn burn(features: &FeatureCollection, grid: &GridSpec, value: &BurnValue) -> Result<Raster<TerritoryId>> {
    let mut territory = Raster::masked(*grid);

    for (index, feature) in features.features.iter().enumerate() {
        let id = match value {
            BurnValue::Uniform(id) => *id,
            BurnValue::FeatureIndex => index as TerritoryId + 1,
            BurnValue::Property(name) => feature
                .properties
                .get(name)
                .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
                .and_then(|v| TerritoryId::try_from(v).ok())
                .ok_or_else(|| {
                    ToolkitError::InvalidParameter(format!(
                        "feature {index} of '{}' has no integer property '{name}'",
                        features.id
                    ))
                })?,
        };

        let region = Region::new(feature.geometry.clone());
        let Some(bounds) = region.bounds() else {
            continue;
        };
        let Some(window) = grid.window_for(&bounds) else {
            continue;
        };
        for row in window.row_start..window.row_end {
            for col in window.col_start..window.col_end {
                let (x, y) = grid.pixel_center(col, row);
                if region.covers(x, y) {
                    territory.set(col, row, Some(id));
                }
            }
        }
    }

    Ok(territory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::vector::Feature;
    use geo::{MultiPolygon, polygon};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
            (x: x0, y: y0),
        ]])
    }

    fn grid() -> GridSpec {
        GridSpec::new(4, 1, 0.0, 1.0, 1.0)
    }

    #[test]
    fn uniform_burn_marks_covered_cells() {
        let features = FeatureCollection::new("t", vec![Feature::new(rect(0.0, 0.0, 2.0, 1.0))]);
        let raster = burn(&features, &grid(), &BurnValue::Uniform(1)).expect("burn");
        assert_eq!(raster.cells(), &[Some(1), Some(1), None, None]);
    }

    #[test]
    fn feature_index_and_overlap_order() {
        let features = FeatureCollection::new(
            "t",
            vec![
                Feature::new(rect(0.0, 0.0, 3.0, 1.0)),
                Feature::new(rect(2.0, 0.0, 4.0, 1.0)),
            ],
        );
        let raster = burn(&features, &grid(), &BurnValue::FeatureIndex).expect("burn");
        assert_eq!(raster.cells(), &[Some(1), Some(1), Some(2), Some(2)]);
    }

    #[test]
    fn property_burn_requires_integer_property() {
        let good = FeatureCollection::new(
            "t",
            vec![Feature::new(rect(0.0, 0.0, 1.0, 1.0)).with_property("code", "1500")],
        );
        let raster = burn(&good, &grid(), &BurnValue::Property("code".into())).expect("burn");
        assert_eq!(raster.get(0, 0), Some(1500));

        let bad = FeatureCollection::new(
            "t",
            vec![Feature::new(rect(0.0, 0.0, 1.0, 1.0)).with_property("code", "x")],
        );
        assert!(burn(&bad, &grid(), &BurnValue::Property("code".into())).is_err());
    }
}
