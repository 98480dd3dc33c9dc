//! `geometry`
//!
//! Points, polylines and bounding boxes, all expressed in millimetres.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in terms of mm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    /// Horizontal axis.
    pub x: f64,
    /// Vertical axis.
    pub y: f64,
}

impl Point2D {
    /// Creates a new [`Point2D`].
    ///
    /// # Arguments
    /// * `x`: Horizontal position in mm.
    /// * `y`: Vertical position in mm.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Point2D { x, y }
    }

    /// Whether both coordinates are finite numbers.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point2D {
    fn from((x, y): (f64, f64)) -> Self {
        Point2D { x, y }
    }
}

/// An already-flattened curve: the tool moves through these points in order.
///
/// The caller owns the tessellation, we only read the points.
pub type Polyline = Vec<Point2D>;

/// An axis-aligned box around some geometry, in mm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// The lower-left corner.
    pub min: Point2D,
    /// The upper-right corner.
    pub max: Point2D,
}

impl BoundingBox {
    /// Creates a box from two corners, normalising them so that `min <= max` on both axes.
    ///
    /// # Arguments
    /// * `a`: One corner.
    /// * `b`: The opposite corner.
    ///
    /// # Returns
    /// The box spanning both corners.
    #[must_use]
    pub fn new(a: Point2D, b: Point2D) -> Self {
        BoundingBox {
            min: Point2D::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point2D::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// Works out the bounding box of a polyline.
    ///
    /// # Arguments
    /// * `points`: The points to enclose.
    ///
    /// # Returns
    /// The box around every point, or `None` if there are no points. If any point has a
    /// non-finite coordinate the box is that point alone, so [`BoundingBox::is_finite`]
    /// reports it.
    #[must_use]
    pub fn of_points(points: &[Point2D]) -> Option<Self> {
        // f64::min/max skip NaN, a bad point would otherwise vanish from the fold.
        if let Some(bad) = points.iter().find(|point| !point.is_finite()) {
            return Some(BoundingBox {
                min: *bad,
                max: *bad,
            });
        }

        let (first, rest) = points.split_first()?;
        let start = BoundingBox {
            min: *first,
            max: *first,
        };
        Some(rest.iter().fold(start, |bbox, point| {
            bbox.union(&BoundingBox {
                min: *point,
                max: *point,
            })
        }))
    }

    /// Whether every corner coordinate is a finite number.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        [self.min.x, self.min.y, self.max.x, self.max.y]
            .iter()
            .all(|value| value.is_finite())
    }

    /// Whether `other` lies within this box, grown by `tolerance` on every side.
    ///
    /// # Arguments
    /// * `other`: The box that should be inside.
    /// * `tolerance`: How far, in mm, `other` may stick out.
    #[must_use]
    pub fn encloses(&self, other: &BoundingBox, tolerance: f64) -> bool {
        other.min.x >= self.min.x - tolerance
            && other.min.y >= self.min.y - tolerance
            && other.max.x <= self.max.x + tolerance
            && other.max.y <= self.max.y + tolerance
    }

    /// The smallest box containing both `self` and `other`.
    #[must_use]
    pub fn union(&self, other: &BoundingBox) -> Self {
        BoundingBox {
            min: Point2D::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point2D::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) to ({}, {}) mm",
            self.min.x, self.min.y, self.max.x, self.max.y
        )
    }
}

/// Works out one bounding box per non-empty polyline.
///
/// # Arguments
/// * `polylines`: The polylines to measure.
///
/// # Returns
/// A bounding box for each polyline that has at least one point, in the same order.
#[must_use]
pub fn bounding_boxes(polylines: &[Polyline]) -> Vec<BoundingBox> {
    polylines
        .iter()
        .filter_map(|polyline| BoundingBox::of_points(polyline))
        .collect()
}
