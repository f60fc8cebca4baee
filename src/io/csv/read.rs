//! CSV reading operations.

use std::{fs, io::Cursor, path::Path};

use anyhow::{bail, Context, Result};
use geo::{Coord, Point};
use polars::{frame::DataFrame, io::SerReader, prelude::{CsvReadOptions, CsvReader, DataType}};
use tracing::{debug, warn};

use crate::{
    feature::{AttrValue, FeatureGeometry, FeatureId, FeatureRecord},
    geom::{Projector, Transformer},
    grid::{CellId, Grid, GridCell},
};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Reads a CSV file from `path` into a Polars DataFrame (every column as String).
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    let bytes = fs::read(path)
        .with_context(|| format!("[io::csv::read] Failed to open CSV file: {}", path.display()))?;
    read_csv_bytes(&bytes)
        .with_context(|| format!("[io::csv::read] Failed to read CSV from {:?}", path))
}

/// Read DataFrame from CSV bytes, ignoring a leading UTF-8 byte-order mark.
pub fn read_csv_bytes(bytes: &[u8]) -> Result<DataFrame> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let options = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0));

    CsvReader::new(Cursor::new(body))
        .with_options(options)
        .finish()
        .context("[io::csv::read] Failed to parse CSV")
}

/// A column as optional strings (trimmed, empty -> None).
pub fn str_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let col = df.column(name)
        .with_context(|| format!("[io::csv::read] missing column {name:?}"))?
        .cast(&DataType::String)?;
    Ok(col.str()?.into_iter()
        .map(|v| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
        .collect())
}

/// A column parsed as finite numbers; unparseable cells become None.
pub fn f64_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    Ok(str_column(df, name)?.into_iter()
        .map(|v| v.and_then(|s| s.parse::<f64>().ok()).filter(|n| n.is_finite()))
        .collect())
}

/// Keep rows whose `column` contains `needle`.
#[derive(Clone, Debug)]
pub struct RowFilter<'a> {
    pub column: &'a str,
    pub contains: &'a str,
}

/// Column layout of a point layer.
#[derive(Clone, Debug)]
pub struct PointLayout<'a> {
    pub x: &'a str,
    pub y: &'a str,
    pub filter: Option<RowFilter<'a>>,
}

/// Features loaded from one source, with the count of rows that were dropped.
#[derive(Clone, Debug, Default)]
pub struct Loaded {
    pub features: Vec<FeatureRecord>,
    pub skipped: usize,
}

impl Loaded {
    /// Append another batch, renumbering its features after ours.
    pub fn extend(&mut self, other: Loaded) {
        let offset = self.features.len() as u32;
        self.features.extend(other.features.into_iter().map(|mut f| {
            f.id = FeatureId(f.id.0 + offset);
            f
        }));
        self.skipped += other.skipped;
    }
}

/// Build point features from a table. Every non-coordinate column becomes an attribute.
///
/// Rows with missing, non-finite or `(0, 0)` coordinates, rows rejected by the
/// filter and rows that fail to project are skipped.
pub fn points_from_frame(df: &DataFrame, layout: &PointLayout, transformer: &Transformer) -> Result<Loaded> {
    let xs = f64_column(df, layout.x)?;
    let ys = f64_column(df, layout.y)?;
    let keep: Vec<bool> = match &layout.filter {
        Some(filter) => str_column(df, filter.column)?.into_iter()
            .map(|v| v.is_some_and(|s| s.contains(filter.contains)))
            .collect(),
        None => vec![true; df.height()],
    };

    let attr_columns = df.get_column_names().into_iter()
        .map(|name| name.to_string())
        .filter(|name| name != layout.x && name != layout.y)
        .map(|name| str_column(df, &name).map(|values| (name, values)))
        .collect::<Result<Vec<_>>>()?;

    let mut loaded = Loaded::default();
    let mut filtered = 0;
    for row in 0..df.height() {
        if !keep[row] { filtered += 1; continue }

        let (Some(x), Some(y)) = (xs[row], ys[row]) else { loaded.skipped += 1; continue };
        if x == 0.0 && y == 0.0 { loaded.skipped += 1; continue }

        let coord = match transformer.coord(Coord { x, y }) {
            Ok(coord) => coord,
            Err(err) => {
                debug!(row, %err, "dropping row that failed to project");
                loaded.skipped += 1;
                continue;
            }
        };

        let mut record = FeatureRecord::new(
            FeatureId(loaded.features.len() as u32),
            FeatureGeometry::Point(Point(coord)),
        );
        for (name, values) in &attr_columns {
            if let Some(value) = &values[row] {
                record.attributes.insert(name.clone(), AttrValue::Label(value.as_str().into()));
            }
        }
        loaded.features.push(record);
    }

    if loaded.skipped > 0 {
        warn!(skipped = loaded.skipped, rows = df.height(), "point rows without usable coordinates");
    }
    debug!(kept = loaded.features.len(), filtered, "loaded point layer");
    Ok(loaded)
}

/// Reconstruct a grid from a table of cell centres (lon/lat), e.g. a previously written grid CSV.
///
/// Cell ids follow row order; `i`/`j` columns are used when present.
pub fn grid_from_frame(df: &DataFrame, projector: &Projector, cell_size_m: f64, lon: &str, lat: &str) -> Result<Grid> {
    let lons = f64_column(df, lon)?;
    let lats = f64_column(df, lat)?;
    let is = f64_column(df, "i").ok();
    let js = f64_column(df, "j").ok();

    let mut cells = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let (Some(center_lon), Some(center_lat)) = (lons[row], lats[row]) else {
            bail!("[io::csv::read] grid row {row} has no centre coordinate");
        };
        let xy = projector.to_planar(Coord { x: center_lon, y: center_lat })
            .with_context(|| format!("[io::csv::read] grid row {row}"))?;
        let index = |col: &Option<Vec<Option<f64>>>, default: u32| {
            col.as_ref().and_then(|v| v[row]).map(|n| n as u32).unwrap_or(default)
        };
        cells.push(GridCell {
            id: CellId(row as u32),
            i: index(&is, row as u32),
            j: index(&js, 0),
            x: xy.x,
            y: xy.y,
            center_lon,
            center_lat,
        });
    }

    Grid::from_cells(cells, cell_size_m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Epsg;

    #[test]
    fn bom_is_stripped_and_columns_stay_text() {
        let df = read_csv_bytes(b"\xEF\xBB\xBFcode,value\n01100,1.5\n").unwrap();
        assert_eq!(df.get_column_names()[0].as_str(), "code");
        assert_eq!(str_column(&df, "code").unwrap(), vec![Some("01100".to_string())]);
        assert_eq!(f64_column(&df, "value").unwrap(), vec![Some(1.5)]);
    }

    #[test]
    fn unparseable_numbers_become_none() {
        let df = read_csv_bytes(b"v\nabc\n\n2\n").unwrap();
        let values = f64_column(&df, "v").unwrap();
        assert_eq!(values.first(), Some(&None));
        assert_eq!(values.last(), Some(&Some(2.0)));
    }

    #[test]
    fn points_skip_bad_rows_and_apply_filter() {
        let csv = "LOC_INFO_X,LOC_INFO_Y,EGNCR_SCALE_NM\n\
                   127.0,37.5,대응출동\n\
                   0,0,대응출동\n\
                   ,37.5,대응출동\n\
                   127.01,37.51,상담\n\
                   127.02,37.52,출동\n";
        let df = read_csv_bytes(csv.as_bytes()).unwrap();
        let layout = PointLayout {
            x: "LOC_INFO_X",
            y: "LOC_INFO_Y",
            filter: Some(RowFilter { column: "EGNCR_SCALE_NM", contains: "출동" }),
        };
        let transformer = Transformer::new(Epsg::KOREA_CENTRAL, Epsg::KOREA_CENTRAL).unwrap();
        let loaded = points_from_frame(&df, &layout, &transformer).unwrap();

        assert_eq!(loaded.features.len(), 2);
        assert_eq!(loaded.skipped, 2);
        assert_eq!(loaded.features[1].id, FeatureId(1));
        assert_eq!(loaded.features[1].label("EGNCR_SCALE_NM").as_deref(), Some("출동"));
        assert!(loaded.features[0].attr("LOC_INFO_X").is_none());
    }

    #[test]
    fn extend_renumbers_features() {
        let point = |id| FeatureRecord::new(FeatureId(id), FeatureGeometry::Point(Point::new(0.0, 0.0)));
        let mut a = Loaded { features: vec![point(0), point(1)], skipped: 1 };
        a.extend(Loaded { features: vec![point(0)], skipped: 2 });
        assert_eq!(a.features[2].id, FeatureId(2));
        assert_eq!(a.skipped, 3);
    }

    #[test]
    fn grid_round_trips_through_centres() {
        let projector = Projector::seoul().unwrap();
        let df = read_csv_bytes(b"i,j,center_lon,center_lat\n0,0,126.97,37.56\n1,0,126.98,37.56\n").unwrap();
        let grid = grid_from_frame(&df, &projector, 250.0, "center_lon", "center_lat").unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.cells()[1].i, 1);
        assert_eq!(grid.cells()[1].id, CellId(1));
    }
}
