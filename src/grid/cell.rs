use std::fmt;

use geo::{Coord, Polygon};

use crate::geom::square;

/// Identifies a single cell within a `Grid`.
///
/// Ids are contiguous from `0` in row-major order (south-west first), so a
/// `CellId` doubles as an index into `Grid::cells`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub u32);

impl CellId {
    #[inline] pub fn index(self) -> usize { self.0 as usize }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One square tessellation unit.
#[derive(Clone, Debug, PartialEq)]
pub struct GridCell {
    pub id: CellId,
    pub i: u32, // column index (x)
    pub j: u32, // row index (y)
    pub x: f64, // planar centre
    pub y: f64,
    pub center_lon: f64,
    pub center_lat: f64,
}

impl GridCell {
    #[inline]
    pub fn center(&self) -> Coord<f64> { Coord { x: self.x, y: self.y } }

    #[inline]
    pub fn center_lonlat(&self) -> Coord<f64> { Coord { x: self.center_lon, y: self.center_lat } }

    /// Square footprint in the planar CRS.
    #[inline]
    pub fn footprint(&self, cell_size_m: f64) -> Polygon<f64> { square(self.center(), cell_size_m) }
}
