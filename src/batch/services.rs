use std::path::PathBuf;

use anyhow::{bail, ensure, Context, Result};
use polars::{frame::DataFrame, prelude::Column};
use tracing::{debug, info, warn};

use crate::{
    config::{Config, TravelConfig},
    feature::{FeatureId, FeatureRecord},
    geom::Projector,
    grid::{CellId, Grid},
    io::{
        csv::{f64_column, read_csv, str_column, write_csv, LIST_SEPARATOR},
        shp::features_from_shapefile,
    },
    join::{assign_features, format_weight, AssignMode},
    registry::{assign_services, ServiceColumns, ServiceLocator},
    remote::LonLat,
};
use super::{grid::load_grid, require_file};

pub const SERVICES_FILE: &str = "grid_services.csv";

/// One district share of a cell, with the service that answers it.
#[derive(Clone, Debug, PartialEq)]
pub struct MappedShare {
    pub district: String,
    pub service_name: String,
    pub service: LonLat,
    pub weight: f64,
}

/// A cell and the services responsible for it.
#[derive(Clone, Debug, PartialEq)]
pub struct MappedCell {
    pub cell_id: CellId,
    pub center: LonLat,
    /// Where trips from this cell start. `None` when the row names an origin
    /// column but leaves it empty.
    pub origin: Option<LonLat>,
    pub shares: Vec<MappedShare>,
}

/// District polygons, reprojected and restricted to the configured prefix.
pub fn load_districts(config: &Config, projector: &Projector) -> Result<Vec<FeatureRecord>> {
    let services = &config.services;
    let path = services.districts.as_ref()
        .context("[batch::services] services.districts (district boundary shapefile) is not configured")?;
    require_file(path)?;

    let transformer = projector.layer(services.districts_epsg)?;
    let loaded = features_from_shapefile(path, &transformer)?;
    let mut districts = loaded.features.into_iter()
        .filter(|f| f.label(&services.district_field)
            .is_some_and(|name| name.starts_with(services.district_prefix.as_str())))
        .collect::<Vec<_>>();
    for (k, district) in districts.iter_mut().enumerate() {
        district.id = FeatureId(k as u32);
    }
    ensure!(!districts.is_empty(), "[batch::services] no district in {} has {} starting with {:?}",
        path.display(), services.district_field, services.district_prefix);
    debug!(districts = districts.len(), "loaded districts");
    Ok(districts)
}

/// The geocoded services table, indexed by district.
pub fn load_locator(config: &Config, projector: &Projector) -> Result<ServiceLocator> {
    let services = &config.services;
    let path = services.csv.as_ref()
        .context("[batch::services] services.csv (geocoded services) is not configured")?;
    require_file(path)?;

    let df = read_csv(path)?;
    let has_address = df.get_column_names().iter().any(|name| name.as_str() == "address");
    let columns = ServiceColumns {
        name: &services.name,
        district: &services.district,
        lon: &services.lon,
        lat: &services.lat,
        address: has_address.then_some("address"),
    };
    let locator = ServiceLocator::from_frame(&df, &columns, projector)?;
    ensure!(!locator.is_empty(), "[batch::services] {} holds no usable service", path.display());
    Ok(locator)
}

/// Map each cell to the nearest service of every district it overlaps.
pub fn compute_mapping(
    grid: &Grid,
    districts: &[FeatureRecord],
    district_attr: &str,
    locator: &ServiceLocator,
) -> Result<Vec<MappedCell>> {
    let overlaps = assign_features(grid, districts, AssignMode::PolygonOverlap)?;
    let cells = assign_services(grid, &overlaps.rows, districts, district_attr, locator);

    let mut out = Vec::with_capacity(cells.len());
    for assigned in cells {
        let Some(cell) = grid.cell(assigned.cell_id) else { continue };
        let center = LonLat::new(cell.center_lon, cell.center_lat);
        let shares = assigned.shares.into_iter()
            .map(|share| {
                let service = &locator.services()[share.service];
                MappedShare {
                    district: share.district,
                    service_name: service.name.clone(),
                    service: LonLat::new(service.lon, service.lat),
                    weight: share.weight,
                }
            })
            .collect();
        out.push(MappedCell { cell_id: cell.id, center, origin: Some(center), shares });
    }

    let unserved = out.iter().filter(|c| c.shares.is_empty()).count();
    if unserved > 0 {
        debug!(unserved, "cells without any service");
    }
    Ok(out)
}

fn joined(cells: &[MappedCell], field: impl Fn(&MappedShare) -> String) -> Vec<Option<String>> {
    cells.iter()
        .map(|c| (!c.shares.is_empty())
            .then(|| c.shares.iter().map(&field).collect::<Vec<_>>().join(LIST_SEPARATOR)))
        .collect()
}

/// Flatten the mapping to one row per cell; per-share fields are `;`-joined.
pub fn mapping_to_frame(cells: &[MappedCell]) -> Result<DataFrame> {
    let df = DataFrame::new(vec![
        Column::new("cell_id".into(), cells.iter().map(|c| c.cell_id.0).collect::<Vec<_>>()),
        Column::new("center_lon".into(), cells.iter().map(|c| c.center.lon).collect::<Vec<_>>()),
        Column::new("center_lat".into(), cells.iter().map(|c| c.center.lat).collect::<Vec<_>>()),
        Column::new("district".into(), joined(cells, |s| s.district.clone())),
        Column::new("service_name".into(), joined(cells, |s| s.service_name.clone())),
        Column::new("service_lon".into(), joined(cells, |s| s.service.lon.to_string())),
        Column::new("service_lat".into(), joined(cells, |s| s.service.lat.to_string())),
        Column::new("area_ratio".into(), joined(cells, |s| format_weight(s.weight))),
    ])?;
    Ok(df)
}

fn split_list(value: &Option<String>) -> Vec<&str> {
    match value {
        Some(text) => text.split(LIST_SEPARATOR).map(str::trim).collect(),
        None => Vec::new(),
    }
}

/// Read a mapping written by [`mapping_to_frame`].
///
/// When the table carries the configured origin columns, they replace the cell
/// centre as travel origin. Shares with unreadable coordinates are dropped;
/// a missing `area_ratio` column counts every share as 1.
pub fn read_mapping(df: &DataFrame, travel: &TravelConfig) -> Result<Vec<MappedCell>> {
    let ids = f64_column(df, "cell_id")?;
    let center_lons = f64_column(df, "center_lon")?;
    let center_lats = f64_column(df, "center_lat")?;
    let districts = str_column(df, "district").ok();
    let names = str_column(df, "service_name")?;
    let service_lons = str_column(df, "service_lon")?;
    let service_lats = str_column(df, "service_lat")?;
    let ratios = str_column(df, "area_ratio").ok();
    let origins = match (f64_column(df, &travel.origin_lon), f64_column(df, &travel.origin_lat)) {
        (Ok(lons), Ok(lats)) => Some((lons, lats)),
        _ => None,
    };

    let mut cells = Vec::with_capacity(df.height());
    let mut dropped = 0;
    for row in 0..df.height() {
        let (Some(id), Some(lon), Some(lat)) = (ids[row], center_lons[row], center_lats[row]) else {
            bail!("[batch::services] mapping row {row} lacks cell_id or centre");
        };
        let center = LonLat::new(lon, lat);
        let origin = match &origins {
            Some((lons, lats)) => lons[row].zip(lats[row]).map(|(lon, lat)| LonLat::new(lon, lat)),
            None => Some(center),
        };

        let row_districts = districts.as_ref().map(|d| split_list(&d[row])).unwrap_or_default();
        let row_ratios = ratios.as_ref().map(|r| split_list(&r[row]));
        let slons = split_list(&service_lons[row]);
        let slats = split_list(&service_lats[row]);

        let mut shares = Vec::new();
        for (k, ((name, slon), slat)) in split_list(&names[row]).into_iter().zip(slons).zip(slats).enumerate() {
            let weight = match &row_ratios {
                Some(r) => r.get(k).and_then(|w| w.parse::<f64>().ok()),
                None => Some(1.0),
            };
            let (Ok(slon), Ok(slat), Some(weight)) = (slon.parse::<f64>(), slat.parse::<f64>(), weight) else {
                dropped += 1;
                continue;
            };
            shares.push(MappedShare {
                district: row_districts.get(k).map(|d| d.to_string()).unwrap_or_default(),
                service_name: name.to_string(),
                service: LonLat::new(slon, slat),
                weight,
            });
        }

        cells.push(MappedCell { cell_id: CellId(id as u32), center, origin, shares });
    }
    if dropped > 0 {
        warn!(dropped, "mapping shares with unreadable coordinates or ratio");
    }
    Ok(cells)
}

/// The run's cell -> service mapping: reused from `services.mapping` when
/// configured, computed from districts and services otherwise.
pub fn service_mapping(config: &Config, projector: &Projector) -> Result<Vec<MappedCell>> {
    if let Some(path) = &config.services.mapping {
        require_file(path)?;
        let df = read_csv(path)?;
        let cells = read_mapping(&df, &config.travel)
            .with_context(|| format!("[batch::services] Failed to read mapping {}", path.display()))?;
        info!(cells = cells.len(), path = %path.display(), "reusing service mapping");
        return Ok(cells);
    }

    let grid = load_grid(config, projector)?;
    let districts = load_districts(config, projector)?;
    let locator = load_locator(config, projector)?;
    compute_mapping(&grid, &districts, &config.services.district_field, &locator)
}

/// Compute the mapping and write `grid_services.csv`.
pub fn write_services(config: &Config) -> Result<PathBuf> {
    let projector = config.projector()?;
    let grid = load_grid(config, &projector)?;
    let districts = load_districts(config, &projector)?;
    let locator = load_locator(config, &projector)?;
    let cells = compute_mapping(&grid, &districts, &config.services.district_field, &locator)?;

    let path = config.output.path(SERVICES_FILE);
    let mut df = mapping_to_frame(&cells)?;
    write_csv(&mut df, &path, config.output.force)?;
    let served = cells.iter().filter(|c| !c.shares.is_empty()).count();
    info!(cells = cells.len(), served, services = locator.len(), path = %path.display(), "wrote service mapping");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    use crate::{
        feature::{AttrValue, FeatureGeometry},
        grid::GridCell,
        io::csv::{read_csv_bytes, write_csv_bytes},
        registry::Service,
    };

    /// Two 10 m cells side by side.
    fn grid() -> Grid {
        let cells = (0..2)
            .map(|i| GridCell {
                id: CellId(i),
                i, j: 0,
                x: i as f64 * 10.0 + 5.0,
                y: 5.0,
                center_lon: 127.0 + i as f64 * 0.0001,
                center_lat: 37.5,
            })
            .collect();
        Grid::from_cells(cells, 10.0).unwrap()
    }

    fn district(id: u32, name: &str, x0: f64, x1: f64) -> FeatureRecord {
        let shape = MultiPolygon(vec![polygon![(x: x0, y: 0.0), (x: x1, y: 0.0), (x: x1, y: 10.0), (x: x0, y: 10.0)]]);
        FeatureRecord::new(FeatureId(id), FeatureGeometry::Polygon(shape))
            .with("SGG_NM", AttrValue::Label(name.into()))
    }

    fn service(name: &str, district: &str, x: f64) -> Service {
        Service { name: name.into(), district: district.into(), lon: 127.0 + x, lat: 37.5, x, y: 5.0 }
    }

    #[test]
    fn straddling_cell_gets_one_share_per_district() {
        // 중구 covers x in [0, 15], 종로구 covers [15, 20]
        let districts = vec![
            district(0, "서울특별시 중구", 0.0, 15.0),
            district(1, "서울특별시 종로구", 15.0, 20.0),
        ];
        let locator = ServiceLocator::new(vec![
            service("중부소방서", "중구", 2.0),
            service("종로소방서", "종로구", 30.0),
        ]);
        let cells = compute_mapping(&grid(), &districts, "SGG_NM", &locator).unwrap();

        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].shares.len(), 1);
        assert_eq!(cells[0].shares[0].service_name, "중부소방서");
        assert_eq!(cells[0].shares[0].weight, 1.0);

        let names = cells[1].shares.iter().map(|s| s.service_name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["중부소방서", "종로소방서"]);
        let total: f64 = cells[1].shares.iter().map(|s| s.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn written_mapping_reads_back() {
        let districts = vec![district(0, "서울특별시 중구", 0.0, 20.0)];
        let locator = ServiceLocator::new(vec![service("중부소방서", "중구", 2.0)]);
        let cells = compute_mapping(&grid(), &districts, "SGG_NM", &locator).unwrap();

        let bytes = write_csv_bytes(&mapping_to_frame(&cells).unwrap()).unwrap();
        let back = read_mapping(&read_csv_bytes(&bytes).unwrap(), &TravelConfig::default()).unwrap();
        assert_eq!(back, cells);
    }

    #[test]
    fn origin_columns_replace_the_centre() {
        let csv = "cell_id,center_lon,center_lat,service_name,service_lon,service_lat,area_ratio,center_road_lon,center_road_lat\n\
                   0,127,37.5,a;b,127.1;127.2,37.5;37.6,0.25;0.75,127.01,37.51\n\
                   1,127,37.5,,,,,,\n";
        let cells = read_mapping(&read_csv_bytes(csv.as_bytes()).unwrap(), &TravelConfig::default()).unwrap();
        assert_eq!(cells[0].origin, Some(LonLat::new(127.01, 37.51)));
        assert_eq!(cells[0].shares[1].weight, 0.75);
        assert_eq!(cells[0].shares[1].district, "");
        assert_eq!(cells[1].origin, None);
        assert!(cells[1].shares.is_empty());
    }
}
