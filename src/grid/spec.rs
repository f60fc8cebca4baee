use anyhow::{ensure, Result};
use geo::{Coord, Rect};

use crate::geom::Projector;

/// The region a grid must cover.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Bounds {
    /// Geographic bounding box (lon/lat degrees); its projected envelope is tessellated.
    Geographic(Rect<f64>),
    /// Meters from the origin cell's centre to the outermost cell centres.
    Radius(f64),
}

/// Defines a tessellation: a reference point, a square cell size and an extent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridSpec {
    pub origin: Coord<f64>, // lon/lat
    pub cell_size_m: f64,
    pub bounds: Bounds,
}

impl GridSpec {
    /// Grid over a geographic box, anchored at its south-west corner.
    pub fn from_bounds(bounds: Rect<f64>, cell_size_m: f64) -> Self {
        Self { origin: bounds.min(), cell_size_m, bounds: Bounds::Geographic(bounds) }
    }

    /// Grid whose centre cell sits on `origin`, reaching `radius_m` in each direction.
    pub fn centered(origin: Coord<f64>, radius_m: f64, cell_size_m: f64) -> Self {
        Self { origin, cell_size_m, bounds: Bounds::Radius(radius_m) }
    }

    /// The planar rectangle that the cells tile.
    pub fn planar_extent(&self, projector: &Projector) -> Result<Rect<f64>> {
        ensure!(self.cell_size_m.is_finite() && self.cell_size_m > 0.0,
            "[grid] cell size must be a positive number of meters, got {}", self.cell_size_m);

        match self.bounds {
            Bounds::Geographic(rect) => {
                let corners = [
                    rect.min(),
                    Coord { x: rect.max().x, y: rect.min().y },
                    rect.max(),
                    Coord { x: rect.min().x, y: rect.max().y },
                ];
                let projected = corners.iter()
                    .map(|&c| projector.to_planar(c))
                    .collect::<Result<Vec<_>>>()?;
                let (mut min, mut max) = (projected[0], projected[0]);
                for c in &projected[1..] {
                    min = Coord { x: min.x.min(c.x), y: min.y.min(c.y) };
                    max = Coord { x: max.x.max(c.x), y: max.y.max(c.y) };
                }
                Ok(Rect::new(min, max))
            }
            Bounds::Radius(radius) => {
                ensure!(radius.is_finite() && radius >= 0.0, "[grid] radius must be non-negative, got {radius}");
                let center = projector.to_planar(self.origin)?;
                let reach = radius + self.cell_size_m / 2.0;
                Ok(Rect::new(
                    Coord { x: center.x - reach, y: center.y - reach },
                    Coord { x: center.x + reach, y: center.y + reach },
                ))
            }
        }
    }
}

/// Number of cells of `size` needed to span `length`: `ceil(length / size)`.
/// Quotients within 1e-9 of an integer are treated as exact.
pub fn cells_along(length: f64, size: f64) -> u32 {
    let q = length / size;
    let nearest = q.round();
    if (q - nearest).abs() < 1e-9 { nearest as u32 } else { q.ceil() as u32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_along_rounds_up() {
        assert_eq!(cells_along(500.0, 250.0), 2);
        assert_eq!(cells_along(501.0, 250.0), 3);
        assert_eq!(cells_along(499.0, 250.0), 2);
        assert_eq!(cells_along(10.0, 250.0), 1);
    }

    #[test]
    fn cells_along_absorbs_float_noise() {
        assert_eq!(cells_along(500.000_000_000_1, 250.0), 2);
        assert_eq!(cells_along(0.1 + 0.2, 0.3), 1);
    }

    #[test]
    fn centered_extent_puts_origin_on_a_cell_center() {
        let projector = Projector::seoul().unwrap();
        let origin = Coord { x: 126.9778222, y: 37.5664056 };
        let spec = GridSpec::centered(origin, 20_000.0, 250.0);
        let extent = spec.planar_extent(&projector).unwrap();
        assert!((extent.width() - 40_250.0).abs() < 1e-6);
        assert_eq!(cells_along(extent.width(), 250.0), 161);
    }

    #[test]
    fn invalid_cell_size_is_rejected() {
        let projector = Projector::seoul().unwrap();
        let origin = Coord { x: 127.0, y: 37.5 };
        assert!(GridSpec::centered(origin, 100.0, 0.0).planar_extent(&projector).is_err());
        assert!(GridSpec::centered(origin, 100.0, f64::NAN).planar_extent(&projector).is_err());
    }
}
