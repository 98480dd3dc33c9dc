//! `workspace`
//!
//! The travel area of the cutter and the check that a job fits inside it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// Dimensions of the cutter's working area.
///
/// All measurements are in millimetres. The defaults sit one millimetre outside the
/// real travel of the machine on every side, so geometry that touches the edge of
/// the bed is still accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workspace {
    /// Minimum X position of the X axis.
    pub min_x: f64,
    /// Minimum Y position of the Y axis.
    pub min_y: f64,
    /// Maximum X position of the X axis.
    pub max_x: f64,
    /// Maximum Y position of the Y axis.
    pub max_y: f64,
}

/// Workspace of the Zünd cutter, 1600mm by 1300mm plus a 1mm margin.
pub const WORKSPACE_ZUND: Workspace = Workspace {
    min_x: -1.0,
    min_y: -1.0,
    max_x: 1601.0,
    max_y: 1301.0,
};

impl Default for Workspace {
    fn default() -> Self {
        WORKSPACE_ZUND
    }
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) to ({}, {}) mm",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

impl Workspace {
    /// Checks whether a box lies within the workspace. Touching an edge counts as inside.
    ///
    /// # Arguments
    /// * `bbox`: The box to check.
    ///
    /// # Returns
    /// `true` if the box is within the workspace.
    #[must_use]
    pub fn contains(&self, bbox: &BoundingBox) -> bool {
        bbox.min.x >= self.min_x
            && bbox.min.y >= self.min_y
            && bbox.max.x <= self.max_x
            && bbox.max.y <= self.max_y
    }
}

/// Reasons a job's geometry is not accepted for cutting.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoundsError {
    /// There was nothing to cut.
    #[error("no geometry was supplied, there is nothing to cut")]
    NoGeometry,
    /// The geometry pokes out of the workspace.
    #[error("curves are not in the workspace: they span {extent} but the workspace is {workspace}")]
    OutOfWorkspace {
        /// The combined extent of the geometry.
        extent: BoundingBox,
        /// The workspace it was checked against.
        workspace: Workspace,
    },
    /// The polylines reach outside the bounding boxes declared for them.
    #[error("curves span {drawn} but the bounds declared for them are {declared}")]
    BoundsMismatch {
        /// The combined extent of the polylines.
        drawn: BoundingBox,
        /// The combined extent of the declared bounding boxes.
        declared: BoundingBox,
    },
}

/// How far, in mm, flattened polylines may stray outside the bounds declared for their curves.
pub const FLATTENING_TOLERANCE_MM: f64 = 0.01;

/// Combines every box into one.
///
/// # Arguments
/// * `boxes`: The boxes to combine.
///
/// # Returns
/// The union of all boxes, or `None` if there were none.
fn union_of(boxes: &[BoundingBox]) -> Option<BoundingBox> {
    let (first, rest) = boxes.split_first()?;
    Some(rest.iter().fold(*first, |acc, bbox| acc.union(bbox)))
}

/// Checks a set of bounding boxes against the workspace.
///
/// # Arguments
/// * `boxes`: Bounding boxes of the geometry to cut.
/// * `workspace`: The workspace to check against.
///
/// # Returns
/// The combined extent of the geometry if it fits.
///
/// # Errors
/// [`BoundsError::NoGeometry`] if `boxes` is empty, [`BoundsError::OutOfWorkspace`] if the
/// combined extent leaves the workspace or any box has a non-finite coordinate.
pub fn check(boxes: &[BoundingBox], workspace: &Workspace) -> Result<BoundingBox, BoundsError> {
    let extent = union_of(boxes).ok_or(BoundsError::NoGeometry)?;

    // f64::min/max skip NaN, so a bad box would vanish from the union.
    if let Some(bad) = boxes.iter().find(|bbox| !bbox.is_finite()) {
        return Err(BoundsError::OutOfWorkspace {
            extent: *bad,
            workspace: *workspace,
        });
    }

    if workspace.contains(&extent) {
        Ok(extent)
    } else {
        Err(BoundsError::OutOfWorkspace {
            extent,
            workspace: *workspace,
        })
    }
}

/// Checks a job whose bounding boxes were measured by the caller.
///
/// Both the declared boxes and the boxes of the polylines themselves have to fit, and the
/// polylines have to lie within the declared boxes, give or take
/// [`FLATTENING_TOLERANCE_MM`].
///
/// # Arguments
/// * `declared`: Bounding boxes supplied with the job.
/// * `drawn`: Bounding boxes of the polylines that will be sent.
/// * `workspace`: The workspace to check against.
///
/// # Returns
/// The combined extent of everything checked.
///
/// # Errors
/// [`BoundsError::NoGeometry`] if either set is empty, [`BoundsError::OutOfWorkspace`] if
/// either leaves the workspace, [`BoundsError::BoundsMismatch`] if the polylines leave the
/// declared boxes.
pub fn check_declared(
    declared: &[BoundingBox],
    drawn: &[BoundingBox],
    workspace: &Workspace,
) -> Result<BoundingBox, BoundsError> {
    let drawn = check(drawn, workspace)?;
    let declared = check(declared, workspace)?;

    if declared.encloses(&drawn, FLATTENING_TOLERANCE_MM) {
        Ok(declared.union(&drawn))
    } else {
        Err(BoundsError::BoundsMismatch { drawn, declared })
    }
}

/// Checks whether a set of bounding boxes fits in the workspace.
///
/// # Arguments
/// * `boxes`: Bounding boxes of the geometry to cut.
/// * `workspace`: The workspace to check against.
///
/// # Returns
/// `true` if the union of the boxes is inside the workspace.
///
/// # Errors
/// [`BoundsError::NoGeometry`] if `boxes` is empty: an empty job neither fits nor doesn't.
pub fn fits(boxes: &[BoundingBox], workspace: &Workspace) -> Result<bool, BoundsError> {
    match check(boxes, workspace) {
        Ok(_) => Ok(true),
        Err(BoundsError::OutOfWorkspace { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}
