use std::fmt;

use anyhow::{anyhow, bail, ensure, Context, Result};
use geo::{Coord, MapCoords, MultiPolygon};
use proj4rs::{proj::Proj as Proj4, transform::transform};
use serde::{Deserialize, Serialize};

/// An EPSG code from the small set of reference systems used for Seoul data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epsg(pub u32);

impl Epsg {
    /// WGS84 lon/lat.
    pub const WGS84: Self = Self(4326);
    /// Korea 2000 / Unified CS (national TM).
    pub const KOREA_UNIFIED: Self = Self(5179);
    /// Korea 2000 / Central Belt (Seoul TM, false northing 500 km).
    pub const KOREA_CENTRAL: Self = Self(5181);
    /// Korea 2000 / Central Belt 2010 (false northing 600 km).
    pub const KOREA_CENTRAL_2010: Self = Self(5186);

    /// PROJ.4 definition for this code.
    pub fn proj4(self) -> Result<&'static str> {
        Ok(match self.0 {
            4326 => "+proj=longlat +datum=WGS84 +no_defs +type=crs",
            5179 => "+proj=tmerc +lat_0=38 +lon_0=127.5 +k=0.9996 +x_0=1000000 +y_0=2000000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs +type=crs",
            5181 => "+proj=tmerc +lat_0=38 +lon_0=127 +k=1 +x_0=200000 +y_0=500000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs +type=crs",
            5186 => "+proj=tmerc +lat_0=38 +lon_0=127 +k=1 +x_0=200000 +y_0=600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs +type=crs",
            code => bail!("[geom::proj] unsupported EPSG code {code} (expected one of 4326, 5179, 5181, 5186)"),
        })
    }

    /// True for lon/lat systems (coordinates in degrees).
    #[inline]
    pub fn is_geographic(self) -> bool { self.0 == 4326 }
}

impl fmt::Display for Epsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// A coordinate transform between two fixed reference systems.
pub struct Transformer {
    from: Epsg,
    to: Epsg,
    src: Proj4,
    dst: Proj4,
}

impl Transformer {
    pub fn new(from: Epsg, to: Epsg) -> Result<Self> {
        let build = |epsg: Epsg| -> Result<Proj4> {
            let proj_string = epsg.proj4()?;
            Proj4::from_proj_string(proj_string)
                .with_context(|| anyhow!("failed to build PROJ.4 for {epsg}: {proj_string}"))
        };
        Ok(Self { from, to, src: build(from)?, dst: build(to)? })
    }

    #[inline] pub fn from(&self) -> Epsg { self.from }

    #[inline] pub fn to(&self) -> Epsg { self.to }

    #[inline] pub fn is_identity(&self) -> bool { self.from == self.to }

    /// Transform one coordinate. Geographic coordinates are in degrees on both ends.
    pub fn coord(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        if self.is_identity() { return Ok(coord) }
        ensure!(coord.x.is_finite() && coord.y.is_finite(),
            "[geom::proj] non-finite coordinate ({}, {})", coord.x, coord.y);

        let mut point = if self.from.is_geographic() {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };
        transform(&self.src, &self.dst, &mut point)
            .with_context(|| format!("CRS transform {} -> {} failed at ({}, {})", self.from, self.to, coord.x, coord.y))?;

        Ok(if self.to.is_geographic() {
            Coord { x: point.0.to_degrees(), y: point.1.to_degrees() }
        } else {
            Coord { x: point.0, y: point.1 }
        })
    }

    /// Transform every vertex of a MultiPolygon.
    pub fn multipolygon(&self, shape: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        if self.is_identity() { return Ok(shape.clone()) }
        shape.try_map_coords(|coord| self.coord(coord))
    }
}

/// The single geographic/planar pair used for every coordinate of one batch.
pub struct Projector {
    forward: Transformer,
    inverse: Transformer,
}

impl Projector {
    /// Bind a geographic source CRS to a planar metric CRS.
    pub fn new(geographic: Epsg, planar: Epsg) -> Result<Self> {
        ensure!(geographic.is_geographic(), "[geom::proj] source CRS {geographic} is not geographic");
        ensure!(!planar.is_geographic(), "[geom::proj] target CRS {planar} is not planar");
        Ok(Self {
            forward: Transformer::new(geographic, planar)?,
            inverse: Transformer::new(planar, geographic)?,
        })
    }

    /// WGS84 lon/lat onto Korea 2000 / Central Belt.
    pub fn seoul() -> Result<Self> { Self::new(Epsg::WGS84, Epsg::KOREA_CENTRAL) }

    #[inline] pub fn geographic(&self) -> Epsg { self.forward.from() }

    #[inline] pub fn planar(&self) -> Epsg { self.forward.to() }

    /// Lon/lat (degrees) to planar meters.
    #[inline]
    pub fn to_planar(&self, lonlat: Coord<f64>) -> Result<Coord<f64>> { self.forward.coord(lonlat) }

    /// Planar meters to lon/lat (degrees).
    #[inline]
    pub fn to_geographic(&self, xy: Coord<f64>) -> Result<Coord<f64>> { self.inverse.coord(xy) }

    /// Transform from a layer's native CRS into this projector's planar CRS.
    pub fn layer(&self, native: Epsg) -> Result<Transformer> {
        Transformer::new(native, self.planar())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CITY_HALL: Coord<f64> = Coord { x: 126.9778222, y: 37.5664056 };

    #[test]
    fn unsupported_code_is_rejected() {
        assert!(Epsg(3857).proj4().is_err());
        assert!(Transformer::new(Epsg::WGS84, Epsg(2154)).is_err());
    }

    #[test]
    fn projector_requires_geographic_then_planar() {
        assert!(Projector::new(Epsg::KOREA_CENTRAL, Epsg::WGS84).is_err());
        assert!(Projector::new(Epsg::WGS84, Epsg::WGS84).is_err());
    }

    #[test]
    fn city_hall_lands_near_central_belt_origin() {
        let projector = Projector::seoul().unwrap();
        let xy = projector.to_planar(CITY_HALL).unwrap();
        // Central meridian 127E, false easting 200 km; Seoul lies ~2 km west of it
        assert!((xy.x - 198_000.0).abs() < 2_000.0, "x = {}", xy.x);
        assert!((xy.y - 451_000.0).abs() < 2_000.0, "y = {}", xy.y);
    }

    #[test]
    fn planar_round_trip_is_sub_millimeter() {
        let projector = Projector::seoul().unwrap();
        for (dx, dy) in [(0.0, 0.0), (20_000.0, -20_000.0), (-12_345.6, 7_890.1)] {
            let xy = Coord { x: 198_000.0 + dx, y: 451_000.0 + dy };
            let back = projector.to_planar(projector.to_geographic(xy).unwrap()).unwrap();
            assert!((back.x - xy.x).abs() < 1e-3 && (back.y - xy.y).abs() < 1e-3,
                "{xy:?} -> {back:?}");
        }
    }

    #[test]
    fn identity_transform_is_passthrough() {
        let t = Transformer::new(Epsg::KOREA_CENTRAL, Epsg::KOREA_CENTRAL).unwrap();
        let c = Coord { x: 1.5, y: -2.5 };
        assert_eq!(t.coord(c).unwrap(), c);
    }

    #[test]
    fn non_finite_input_is_an_error() {
        let projector = Projector::seoul().unwrap();
        assert!(projector.to_planar(Coord { x: f64::NAN, y: 37.5 }).is_err());
    }
}
