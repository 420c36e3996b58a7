// THEORY:
// `Region` is the area of interest an export is constrained to: the outline of
// the selected feature(s), optionally grown by a buffer distance.
//
// Key architectural principles:
// 1.  **Pixel-Centre Coverage**: A pixel belongs to a region when its centre lies
//     inside the region or on its boundary. Partial pixels are never weighted;
//     a covered pixel contributes its full nominal area.
// 2.  **Lazy Buffering**: Buffering is not materialised as a new polygon. A
//     buffered region keeps the original shape plus a distance, and a point is
//     covered when it lies within that distance of the shape. This is an exact
//     round buffer for the coverage test, and the bounds grow by the distance.
// 3.  **Degeneracy is an Input Error**: An empty shape, or a zero-area shape
//     with no buffer, cannot constrain anything; the aggregator rejects it
//     instead of silently reporting nothing. A buffered point or line has area.

use crate::error::{Result, ToolkitError};
use geo::{
    Area, BoundingRect, EuclideanDistance, Intersects, MultiPolygon, Point, Polygon, Rect, coord,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    shape: MultiPolygon<f64>,
    buffer_distance: f64,
}

impl Region {
    pub fn new(shape: MultiPolygon<f64>) -> Self {
        Self {
            shape,
            buffer_distance: 0.0,
        }
    }

    pub fn from_polygon(polygon: Polygon<f64>) -> Self {
        Self::new(MultiPolygon::new(vec![polygon]))
    }

    pub fn from_rect(rect: Rect<f64>) -> Self {
        Self::from_polygon(rect.to_polygon())
    }

    /// The same shape grown by `distance` meters.
    pub fn buffered(&self, distance: f64) -> Result<Region> {
        if !distance.is_finite() || distance < 0.0 {
            return Err(ToolkitError::InvalidParameter(format!(
                "buffer distance must be a non-negative number, got {distance}"
            )));
        }
        Ok(Region {
            shape: self.shape.clone(),
            buffer_distance: self.buffer_distance + distance,
        })
    }

    pub fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }

    pub fn buffer_distance(&self) -> f64 {
        self.buffer_distance
    }

    pub fn is_degenerate(&self) -> bool {
        self.shape.0.is_empty() || (self.buffer_distance <= 0.0 && self.shape.unsigned_area() <= 0.0)
    }

    /// Pixel-centre coverage test.
    pub fn covers(&self, x: f64, y: f64) -> bool {
        let point = Point::new(x, y);
        if self.shape.intersects(&point) {
            return true;
        }
        if self.buffer_distance > 0.0 {
            return self
                .shape
                .0
                .iter()
                .any(|polygon| point.euclidean_distance(polygon) <= self.buffer_distance);
        }
        false
    }

    /// Bounding rectangle, grown by the buffer distance.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        let rect = self.shape.bounding_rect()?;
        let d = self.buffer_distance;
        Some(Rect::new(
            coord! { x: rect.min().x - d, y: rect.min().y - d },
            coord! { x: rect.max().x + d, y: rect.max().y + d },
        ))
    }

    /// The rectangle enclosing this region, as an unbuffered region of its own.
    pub fn bounds_region(&self) -> Option<Region> {
        self.bounds().map(Region::from_rect)
    }
}
