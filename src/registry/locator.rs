use ahash::AHashMap;
use anyhow::Result;
use geo::{BooleanOps, Coord, Distance, Euclidean, MultiPolygon, Point};
use polars::frame::DataFrame;
use rstar::{primitives::GeomWithData, RTree};
use tracing::{debug, warn};

use crate::{
    feature::{FeatureGeometry, FeatureRecord},
    geom::Projector,
    grid::{CellId, Grid},
    io::csv::{f64_column, str_column},
    join::{apply_single_match_correction, Assignment},
};
use super::district::{district_from_address, normalize_district};

/// An emergency-service location (fire station or safety centre).
#[derive(Clone, Debug, PartialEq)]
pub struct Service {
    pub name: String,
    pub district: String,
    pub lon: f64,
    pub lat: f64,
    pub x: f64,
    pub y: f64,
}

/// Column names of a geocoded services table.
#[derive(Clone, Copy, Debug)]
pub struct ServiceColumns<'a> {
    pub name: &'a str,
    pub district: &'a str,
    pub lon: &'a str,
    pub lat: &'a str,
    /// Used to derive the district when the district column is empty.
    pub address: Option<&'a str>,
}

type ServiceEntry = GeomWithData<[f64; 2], usize>;

/// Services grouped by district, each group indexed by planar position.
#[derive(Debug, Default)]
pub struct ServiceLocator {
    services: Vec<Service>,
    by_district: AHashMap<String, RTree<ServiceEntry>>,
}

impl ServiceLocator {
    pub fn new(services: Vec<Service>) -> Self {
        let mut groups: AHashMap<String, Vec<ServiceEntry>> = AHashMap::new();
        for (idx, service) in services.iter().enumerate() {
            groups.entry(service.district.clone())
                .or_default()
                .push(GeomWithData::new([service.x, service.y], idx));
        }
        let by_district = groups.into_iter()
            .map(|(district, entries)| (district, RTree::bulk_load(entries)))
            .collect();
        Self { services, by_district }
    }

    /// Read a geocoded services table. Rows without coordinates or district are skipped.
    pub fn from_frame(df: &DataFrame, columns: &ServiceColumns, projector: &Projector) -> Result<Self> {
        let names = str_column(df, columns.name)?;
        let districts = str_column(df, columns.district)?;
        let lons = f64_column(df, columns.lon)?;
        let lats = f64_column(df, columns.lat)?;
        let addresses = match columns.address {
            Some(column) => Some(str_column(df, column)?),
            None => None,
        };

        let mut services = Vec::with_capacity(df.height());
        let mut skipped = 0;
        for row in 0..df.height() {
            let district = districts[row].as_deref()
                .and_then(normalize_district)
                .or_else(|| addresses.as_ref()
                    .and_then(|a| a[row].as_deref())
                    .and_then(district_from_address));
            let (Some(name), Some(district), Some(lon), Some(lat)) = (&names[row], district, lons[row], lats[row]) else {
                skipped += 1;
                continue;
            };
            let Ok(xy) = projector.to_planar(Coord { x: lon, y: lat }) else { skipped += 1; continue };
            services.push(Service { name: name.clone(), district, lon, lat, x: xy.x, y: xy.y });
        }
        if skipped > 0 {
            warn!(skipped, "service rows without name, district or coordinates");
        }
        debug!(services = services.len(), "loaded services");
        Ok(Self::new(services))
    }

    #[inline] pub fn len(&self) -> usize { self.services.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.services.is_empty() }

    pub fn services(&self) -> &[Service] { &self.services }

    /// Closest service within `district` to a planar point. Equidistant services
    /// resolve to the one listed first.
    pub fn nearest(&self, district: &str, point: Coord<f64>) -> Option<&Service> {
        self.nearest_index(district, point).map(|idx| &self.services[idx])
    }

    /// Position of the closest service in [`ServiceLocator::services`].
    pub fn nearest_index(&self, district: &str, point: Coord<f64>) -> Option<usize> {
        let tree = self.by_district.get(district)?;
        let mut best: Option<(f64, usize)> = None;
        for (entry, dist2) in tree.nearest_neighbor_iter_with_distance_2(&[point.x, point.y]) {
            match best {
                None => best = Some((dist2, entry.data)),
                Some((d, _)) if dist2 > d => break,
                Some((d, idx)) => best = Some((d, idx.min(entry.data))),
            }
        }
        best.map(|(_, idx)| idx)
    }

    /// Closest service within `district` to a planar shape, zero distance
    /// inside it. Equidistant services resolve to the one listed first.
    pub fn nearest_to_shape(&self, district: &str, shape: &MultiPolygon<f64>) -> Option<usize> {
        let tree = self.by_district.get(district)?;
        tree.iter()
            .map(|entry| {
                let [x, y] = *entry.geom();
                (Euclidean.distance(&Point::new(x, y), shape), entry.data)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(_, idx)| idx)
    }
}

/// One district share of a cell and the service answering it.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceShare {
    pub district: String,
    pub service: usize,
    pub weight: f64,
}

/// The services responsible for one cell.
#[derive(Clone, Debug, PartialEq)]
pub struct CellServices {
    pub cell_id: CellId,
    pub shares: Vec<ServiceShare>,
}

/// Map every cell to the nearest service of each district it overlaps.
///
/// `overlaps` comes from a polygon-overlap join against district polygons that
/// carry their name in `district_attr`. Distance is measured to the part of the
/// cell inside the district (the cell centre when that part cannot be formed).
/// Weights get the single-match correction; districts without any service are
/// left out of the cell.
pub fn assign_services(
    grid: &Grid,
    overlaps: &[Assignment],
    districts: &[FeatureRecord],
    district_attr: &str,
    locator: &ServiceLocator,
) -> Vec<CellServices> {
    let names = districts.iter()
        .map(|f| (f.id, f.label(district_attr).as_deref().and_then(normalize_district)))
        .collect::<AHashMap<_, _>>();
    let shapes = districts.iter()
        .filter_map(|f| match &f.geometry {
            FeatureGeometry::Polygon(shape) => Some((f.id, shape)),
            FeatureGeometry::Point(_) => None,
        })
        .collect::<AHashMap<_, _>>();

    let mut rows = overlaps.to_vec();
    rows.sort_by_key(|a| (a.cell_id, a.feature_id));
    apply_single_match_correction(&mut rows);

    let mut out = grid.cells().iter()
        .map(|cell| CellServices { cell_id: cell.id, shares: Vec::new() })
        .collect::<Vec<_>>();
    let mut unserved = 0;
    for a in &rows {
        let (Some(cell), Some(Some(district))) = (grid.cell(a.cell_id), names.get(&a.feature_id)) else { continue };
        let piece = shapes.get(&a.feature_id)
            .map(|shape| MultiPolygon(vec![cell.footprint(grid.cell_size_m())]).intersection(*shape))
            .filter(|piece| !piece.0.is_empty());
        let nearest = match &piece {
            Some(piece) => locator.nearest_to_shape(district, piece),
            None => locator.nearest_index(district, cell.center()),
        };
        match nearest {
            Some(service) => out[a.cell_id.index()].shares.push(ServiceShare {
                district: district.clone(),
                service,
                weight: a.overlap_weight,
            }),
            None => unserved += 1,
        }
    }
    if unserved > 0 {
        warn!(unserved, "cell/district overlaps with no service in that district");
    }
    out
}
