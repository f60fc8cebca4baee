mod cell;
mod grid;
mod spec;

pub use cell::{CellId, GridCell};
pub use grid::{build_grid, Grid};
pub use spec::{cells_along, Bounds, GridSpec};
