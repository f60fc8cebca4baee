use anyhow::{bail, ensure, Result};
use geo::{Coord, Polygon, Rect};
use rstar::{primitives::GeomWithData, RTree, AABB};
use tracing::debug;

use crate::geom::Projector;
use super::{cell::{CellId, GridCell}, spec::{cells_along, GridSpec}};

/// Squared-distance slack used to detect equidistant cell centres.
const TIE_EPS: f64 = 1e-6;

type CenterEntry = GeomWithData<[f64; 2], u32>;

/// A uniform square grid in one planar CRS, with an index over cell centres.
#[derive(Debug, Clone)]
pub struct Grid {
    cells: Vec<GridCell>,
    cell_size_m: f64,
    rtree: RTree<CenterEntry>,
}

impl Grid {
    /// Construct a Grid from cells whose ids equal their positions.
    pub fn from_cells(cells: Vec<GridCell>, cell_size_m: f64) -> Result<Self> {
        ensure!(cell_size_m.is_finite() && cell_size_m > 0.0,
            "[grid] cell size must be a positive number of meters, got {cell_size_m}");
        for (idx, cell) in cells.iter().enumerate() {
            if cell.id.index() != idx {
                bail!("[grid] cell at position {idx} has id {}; ids must be sequential from 0", cell.id);
            }
        }

        Ok(Self {
            rtree: RTree::bulk_load(cells.iter()
                .map(|cell| GeomWithData::new([cell.x, cell.y], cell.id.0))
                .collect()),
            cells,
            cell_size_m,
        })
    }

    #[inline] pub fn len(&self) -> usize { self.cells.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.cells.is_empty() }

    #[inline] pub fn cells(&self) -> &[GridCell] { &self.cells }

    #[inline] pub fn cell(&self, id: CellId) -> Option<&GridCell> { self.cells.get(id.index()) }

    #[inline] pub fn cell_size_m(&self) -> f64 { self.cell_size_m }

    #[inline] pub fn half_side(&self) -> f64 { self.cell_size_m / 2.0 }

    /// Area of one cell in square meters.
    #[inline] pub fn cell_area(&self) -> f64 { self.cell_size_m * self.cell_size_m }

    /// Square footprint of a cell.
    pub fn footprint(&self, id: CellId) -> Option<Polygon<f64>> {
        self.cell(id).map(|cell| cell.footprint(self.cell_size_m))
    }

    /// The cell whose footprint contains `point` (planar).
    ///
    /// Finds the nearest cell centre and accepts it only if the point lies within
    /// half a side in both axes. Points on a shared edge go to the lowest id.
    pub fn nearest_cell(&self, point: Coord<f64>) -> Option<CellId> {
        if !(point.x.is_finite() && point.y.is_finite()) { return None }

        let mut best: Option<(f64, u32)> = None;
        for (entry, dist2) in self.rtree.nearest_neighbor_iter_with_distance_2(&[point.x, point.y]) {
            match best {
                None => best = Some((dist2, entry.data)),
                Some((best_dist2, _)) if dist2 > best_dist2 + TIE_EPS => break,
                Some((best_dist2, id)) => best = Some((best_dist2, id.min(entry.data))),
            }
        }

        let (_, id) = best?;
        let cell = &self.cells[id as usize];
        let half = self.half_side() + 1e-9;
        ((point.x - cell.x).abs() <= half && (point.y - cell.y).abs() <= half).then_some(cell.id)
    }

    /// Cells whose footprints may intersect `rect` (planar).
    pub fn cells_near(&self, rect: &Rect<f64>) -> impl Iterator<Item = &GridCell> {
        let half = self.half_side();
        let envelope = AABB::from_corners(
            [rect.min().x - half, rect.min().y - half],
            [rect.max().x + half, rect.max().y + half],
        );
        self.rtree.locate_in_envelope(&envelope)
            .map(|entry| &self.cells[entry.data as usize])
    }
}

/// Build the uniform grid described by `spec`.
///
/// Cells are numbered row-major from the south-west corner of the planar extent;
/// every centre is projected back to lon/lat with the same projector.
pub fn build_grid(spec: &GridSpec, projector: &Projector) -> Result<Grid> {
    let extent = spec.planar_extent(projector)?;
    let size = spec.cell_size_m;
    let (nx, ny) = (cells_along(extent.width(), size), cells_along(extent.height(), size));
    ensure!(nx > 0 && ny > 0, "[grid] bounds have an empty planar extent ({} x {} m)", extent.width(), extent.height());

    debug!(nx, ny, cell_size_m = size, crs = %projector.planar(), "building grid");

    let mut cells = Vec::with_capacity(nx as usize * ny as usize);
    for j in 0..ny {
        for i in 0..nx {
            let x = extent.min().x + (i as f64 + 0.5) * size;
            let y = extent.min().y + (j as f64 + 0.5) * size;
            let lonlat = projector.to_geographic(Coord { x, y })?;
            cells.push(GridCell {
                id: CellId(j * nx + i),
                i, j, x, y,
                center_lon: lonlat.x,
                center_lat: lonlat.y,
            });
        }
    }

    Grid::from_cells(cells, size)
}
