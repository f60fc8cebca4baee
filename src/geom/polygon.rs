use geo::{Area, Coord, CoordsIter, LineString, MultiPolygon, Polygon, Rect};
use shapefile as shp;

/// Axis-aligned square of side `size` centred on `center`.
pub fn square(center: Coord<f64>, size: f64) -> Polygon<f64> {
    let half = size / 2.0;
    Rect::new(
        Coord { x: center.x - half, y: center.y - half },
        Coord { x: center.x + half, y: center.y + half },
    ).to_polygon()
}

/// True when every vertex is finite and the shape encloses positive area.
pub fn is_usable(shape: &MultiPolygon<f64>) -> bool {
    !shape.0.is_empty()
        && shape.coords_iter().all(|c| c.x.is_finite() && c.y.is_finite())
        && shape.unsigned_area() > 0.0
}

/// Convert shapefile::Polygon to geo::MultiPolygon<f64>
pub fn shp_to_geo(p: &shp::Polygon) -> MultiPolygon<f64> {
    rings_to_geo(p.rings(), |pt| Coord { x: pt.x, y: pt.y })
}

/// Group shapefile rings of any point kind (plain, M or Z) into polygons.
pub fn rings_to_geo<P>(rings: &[shp::PolygonRing<P>], xy: impl Fn(&P) -> Coord<f64>) -> MultiPolygon<f64> {
    /// Ensure first and last are the same for geo::LineString coords
    fn ensure_closed(coords: &mut Vec<Coord<f64>>) {
        if let (Some(&first), Some(&last)) = (coords.first(), coords.last()) {
            if first != last { coords.push(first) }
        }
    }

    /// Signed shoelace area (negative for clockwise rings)
    fn signed_area(pts: &[Coord<f64>]) -> f64 {
        pts.windows(2).map(|w| w[0].x * w[1].y - w[1].x * w[0].y).sum::<f64>() / 2.0
    }

    // Shapefile stores each exterior (clockwise) followed by its holes
    let mut polys = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes = Vec::new();

    for ring in rings {
        let mut coords = ring.points().iter().map(&xy).collect::<Vec<_>>();
        ensure_closed(&mut coords);

        if signed_area(&coords) < 0.0 {
            if let Some(ext) = exterior.take() {
                polys.push(Polygon::new(ext, std::mem::take(&mut holes)));
            }
            exterior = Some(LineString(coords));
        } else {
            holes.push(LineString(coords));
        }
    }
    if let Some(ext) = exterior {
        polys.push(Polygon::new(ext, holes));
    }

    MultiPolygon(polys)
}
