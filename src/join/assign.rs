use anyhow::Result;
use geo::{Area, BooleanOps, BoundingRect, Contains, MultiPolygon, Point};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    feature::{FeatureGeometry, FeatureId, FeatureRecord},
    geom::is_usable,
    grid::{CellId, Grid},
};

/// How features are matched onto cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignMode {
    /// Each point goes to the cell whose footprint contains it.
    PointInCell,
    /// Each polygon is intersected with every cell it touches.
    PolygonOverlap,
    /// A cell matches a polygon when the cell centre lies inside it.
    CenterInPolygon,
}

/// One (cell, feature) pair that intersect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Assignment {
    pub cell_id: CellId,
    pub feature_id: FeatureId,
    pub overlap_weight: f64, // in [0, 1]
}

/// The join result plus bookkeeping for features that produced no rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Assignments {
    pub rows: Vec<Assignment>, // sorted by (cell_id, feature_id)
    pub unmatched: usize,      // valid features that fell outside every cell
    pub skipped: usize,        // features with invalid or unsupported geometry
}

impl Assignments {
    #[inline] pub fn len(&self) -> usize { self.rows.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    /// Iterate over assignments belonging to a single cell.
    pub fn for_cell(&self, cell_id: CellId) -> impl Iterator<Item = &Assignment> {
        let start = self.rows.partition_point(|a| a.cell_id < cell_id);
        self.rows[start..].iter().take_while(move |a| a.cell_id == cell_id)
    }
}

/// Join `features` (planar) onto the cells of `grid`.
///
/// Invalid geometries, and geometries of the wrong kind for `mode`, are skipped
/// and counted rather than failing the batch.
pub fn assign_features(grid: &Grid, features: &[FeatureRecord], mode: AssignMode) -> Result<Assignments> {
    let mut out = Assignments::default();

    for feature in features {
        let matched = match (mode, &feature.geometry) {
            (AssignMode::PointInCell, FeatureGeometry::Point(point)) if point.x().is_finite() && point.y().is_finite() => {
                point_in_cell(grid, feature.id, point, &mut out.rows)
            }
            (AssignMode::PolygonOverlap, FeatureGeometry::Polygon(shape)) if is_usable(shape) => {
                polygon_overlap(grid, feature.id, shape, &mut out.rows)
            }
            (AssignMode::CenterInPolygon, FeatureGeometry::Polygon(shape)) if is_usable(shape) => {
                center_in_polygon(grid, feature.id, shape, &mut out.rows)
            }
            _ => {
                debug!(feature = %feature.id, ?mode, "skipping feature with unusable geometry");
                out.skipped += 1;
                continue;
            }
        };
        if matched == 0 { out.unmatched += 1 }
    }

    out.rows.sort_by_key(|a| (a.cell_id, a.feature_id));

    if out.skipped > 0 {
        warn!(skipped = out.skipped, total = features.len(), "features skipped for invalid geometry");
    }
    debug!(assignments = out.rows.len(), unmatched = out.unmatched, ?mode, "assigned features");

    Ok(out)
}

fn point_in_cell(grid: &Grid, id: FeatureId, point: &Point<f64>, rows: &mut Vec<Assignment>) -> usize {
    match grid.nearest_cell(point.0) {
        Some(cell_id) => {
            rows.push(Assignment { cell_id, feature_id: id, overlap_weight: 1.0 });
            1
        }
        None => 0,
    }
}

fn polygon_overlap(grid: &Grid, id: FeatureId, shape: &MultiPolygon<f64>, rows: &mut Vec<Assignment>) -> usize {
    let Some(rect) = shape.bounding_rect() else { return 0 };
    let cell_area = grid.cell_area();
    let before = rows.len();

    for cell in grid.cells_near(&rect) {
        let footprint = MultiPolygon(vec![cell.footprint(grid.cell_size_m())]);
        let area = footprint.intersection(shape).unsigned_area();
        if area <= cell_area * 1e-12 { continue }

        // Snap full coverage to exactly 1 so interior cells are not perturbed by clipping noise
        let ratio = area / cell_area;
        let overlap_weight = if (ratio - 1.0).abs() < 1e-9 { 1.0 } else { ratio.min(1.0) };
        rows.push(Assignment { cell_id: cell.id, feature_id: id, overlap_weight });
    }

    rows.len() - before
}

fn center_in_polygon(grid: &Grid, id: FeatureId, shape: &MultiPolygon<f64>, rows: &mut Vec<Assignment>) -> usize {
    let Some(rect) = shape.bounding_rect() else { return 0 };
    let before = rows.len();

    for cell in grid.cells_near(&rect) {
        if shape.contains(&Point(cell.center())) {
            rows.push(Assignment { cell_id: cell.id, feature_id: id, overlap_weight: 1.0 });
        }
    }

    rows.len() - before
}
