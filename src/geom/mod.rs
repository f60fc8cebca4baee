mod polygon;
mod proj;

pub use polygon::{is_usable, rings_to_geo, shp_to_geo, square};
pub use proj::{Epsg, Projector, Transformer};
