#![doc = "GridJoin public API"]
pub mod batch;
pub mod config;
pub mod feature;
pub mod geom;
pub mod grid;
pub mod io;
pub mod join;
pub mod registry;
pub mod remote;

#[doc(inline)]
pub use config::Config;

#[doc(inline)]
pub use feature::{AttrValue, FeatureGeometry, FeatureId, FeatureRecord};

#[doc(inline)]
pub use geom::{Epsg, Projector};

#[doc(inline)]
pub use grid::{build_grid, CellId, Grid, GridCell, GridSpec};

#[doc(inline)]
pub use join::{aggregate, assign_features, AggFn, AggSpec, AggValue, AggregateResult, AssignMode, Assignment};
