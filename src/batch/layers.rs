use std::path::PathBuf;

use ahash::{AHashMap, AHashSet};
use anyhow::{bail, ensure, Result};
use polars::frame::DataFrame;
use tracing::{debug, info, warn};

use crate::{
    config::{AttributeTableConfig, Config, FilterConfig, LayerConfig},
    feature::{merge_attributes, recode, AttrValue, AttributeTable, FeatureId},
    geom::Projector,
    grid::Grid,
    io::{
        csv::{points_from_frame, read_csv, results_to_frame, str_column, write_csv, Loaded, PointLayout, RowFilter},
        shp::features_from_shapefile,
    },
    join::{aggregate_with, assign_features, AggSpec, AggregateResult},
};
use super::{grid::load_grid, is_shapefile, require_file};

pub const JOIN_FILE: &str = "joined.csv";

const RESERVED_COLUMNS: [&str; 3] = ["cell_id", "center_lon", "center_lat"];

/// What happened to one layer during the join.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerSummary {
    pub name: String,
    pub features: usize,
    /// Input rows or shapes dropped while loading.
    pub skipped: usize,
    pub assignments: usize,
    /// Valid features that fell outside every cell.
    pub unmatched: usize,
    /// Features whose geometry did not suit the layer's mode.
    pub invalid: usize,
}

/// Every layer's aggregates side by side, one row per cell.
#[derive(Clone, Debug)]
pub struct JoinOutput {
    pub results: Vec<AggregateResult>,
    pub specs: Vec<AggSpec>,
    pub layers: Vec<LayerSummary>,
}

/// A key as compared between a table and a layer: prefix and whitespace removed.
pub fn table_key(raw: &str, strip_prefix: Option<&str>) -> String {
    let raw = raw.trim();
    let raw = strip_prefix.and_then(|p| raw.strip_prefix(p)).unwrap_or(raw);
    raw.split_whitespace().collect()
}

/// Rows of a keyed table as attributes. Numbers with thousands separators
/// are read as numbers; the first row of a repeated key wins.
pub fn attribute_table(df: &DataFrame, config: &AttributeTableConfig) -> Result<AttributeTable> {
    let keys = str_column(df, &config.key)?;
    let names = if config.columns.is_empty() {
        df.get_column_names().into_iter()
            .map(|n| n.to_string())
            .filter(|n| *n != config.key)
            .collect::<Vec<_>>()
    } else {
        config.columns.clone()
    };
    let columns = names.iter()
        .map(|name| str_column(df, name))
        .collect::<Result<Vec<_>>>()?;

    let mut table = AttributeTable::new();
    let mut repeated = 0;
    for (row, key) in keys.into_iter().enumerate() {
        let Some(key) = key.map(|k| table_key(&k, config.strip_prefix.as_deref())).filter(|k| !k.is_empty()) else { continue };
        if table.contains_key(&key) {
            repeated += 1;
            continue;
        }
        let values = names.iter().zip(&columns)
            .filter_map(|(name, column)| {
                let text = column.get(row)?.as_deref()?;
                let value = match text.replace(',', "").parse::<f64>() {
                    Ok(n) if n.is_finite() => AttrValue::Number(n),
                    _ => AttrValue::Label(text.into()),
                };
                Some((name.clone(), value))
            })
            .collect();
        table.insert(key, values);
    }

    if repeated > 0 {
        warn!(path = %config.path.display(), repeated, "repeated keys in attribute table, first row kept");
    }
    Ok(table)
}

/// Attach a keyed table to loaded features; returns how many found no row.
pub fn attach_attributes(loaded: &mut Loaded, table: &AttributeTable, config: &AttributeTableConfig) -> usize {
    let strip = config.strip_prefix.as_deref();
    merge_attributes(&mut loaded.features, &config.on, table, |raw| table_key(raw, strip))
}

/// Read every file of a layer into planar features, then filter, attach
/// the attribute table and recode them.
pub fn load_layer(layer: &LayerConfig, projector: &Projector) -> Result<Loaded> {
    let transformer = projector.layer(layer.epsg)?;
    let mut loaded = Loaded::default();

    for path in &layer.paths {
        require_file(path)?;
        let part = if is_shapefile(path) {
            let mut part = features_from_shapefile(path, &transformer)?;
            if let Some(filter) = &layer.filter {
                retain_matching(&mut part, filter);
            }
            part
        } else {
            let df = read_csv(path)?;
            let layout = PointLayout {
                x: &layer.x,
                y: &layer.y,
                filter: layer.filter.as_ref().map(|f| RowFilter { column: &f.column, contains: &f.contains }),
            };
            points_from_frame(&df, &layout, &transformer)?
        };
        debug!(layer = %layer.name, path = %path.display(), features = part.features.len(), skipped = part.skipped, "read layer file");
        loaded.extend(part);
    }

    if let Some(config) = &layer.attributes {
        require_file(&config.path)?;
        let table = attribute_table(&read_csv(&config.path)?, config)?;
        let unmatched = attach_attributes(&mut loaded, &table, config);
        if unmatched > 0 {
            warn!(layer = %layer.name, on = %config.on, unmatched, "features without a table row");
        }
        debug!(layer = %layer.name, rows = table.len(), "attached attribute table");
    }

    if let Some(rule) = &layer.recode {
        let table = rule.values.iter()
            .map(|(label, code)| (label.clone(), *code))
            .collect::<AHashMap<_, _>>();
        let unmapped = recode(&mut loaded.features, &rule.attribute, &rule.into, &table);
        if unmapped > 0 {
            warn!(layer = %layer.name, attribute = %rule.attribute, unmapped, "labels without a code");
        }
    }
    Ok(loaded)
}

/// Drop shapes whose attribute does not contain the filter text; ids stay dense.
fn retain_matching(loaded: &mut Loaded, filter: &FilterConfig) {
    let before = loaded.features.len();
    loaded.features.retain(|f| f.label(&filter.column).is_some_and(|v| v.contains(filter.contains.as_str())));
    for (k, feature) in loaded.features.iter_mut().enumerate() {
        feature.id = FeatureId(k as u32);
    }
    debug!(column = %filter.column, dropped = before - loaded.features.len(), "filtered shapes");
}

/// Join every configured layer onto `grid` and aggregate it.
///
/// All input files are checked before any layer is read. Output column names
/// must be unique across layers.
pub fn join_layers(config: &Config, grid: &Grid, projector: &Projector) -> Result<JoinOutput> {
    ensure!(!config.layers.is_empty(), "[batch::layers] no [[layer]] is configured");
    for path in config.layers.iter().flat_map(|layer| layer.paths.iter().chain(layer.attributes.as_ref().map(|a| &a.path))) {
        require_file(path)?;
    }

    let mut seen = RESERVED_COLUMNS.into_iter().map(str::to_string).collect::<AHashSet<_>>();
    for spec in config.layers.iter().flat_map(|layer| &layer.aggregates) {
        if !seen.insert(spec.column.clone()) {
            bail!("[batch::layers] output column {:?} is produced twice", spec.column);
        }
    }

    let mut results: Vec<AggregateResult> = Vec::new();
    let mut specs = Vec::new();
    let mut layers = Vec::new();
    for layer in &config.layers {
        let loaded = load_layer(layer, projector)?;
        let assignments = assign_features(grid, &loaded.features, layer.mode)?;
        let rows = aggregate_with(grid, &assignments.rows, &loaded.features, &layer.aggregates, layer.correct_single_match)?;

        if results.is_empty() {
            results = rows;
        } else {
            ensure!(rows.len() == results.len(), "[batch::layers] layer {:?} produced {} rows for {} cells",
                layer.name, rows.len(), results.len());
            for (acc, row) in results.iter_mut().zip(rows) {
                acc.values.extend(row.values);
            }
        }
        specs.extend(layer.aggregates.iter().cloned());

        let summary = LayerSummary {
            name: layer.name.clone(),
            features: loaded.features.len(),
            skipped: loaded.skipped,
            assignments: assignments.len(),
            unmatched: assignments.unmatched,
            invalid: assignments.skipped,
        };
        info!(
            layer = %summary.name,
            features = summary.features,
            skipped = summary.skipped,
            assignments = summary.assignments,
            unmatched = summary.unmatched,
            invalid = summary.invalid,
            "joined layer"
        );
        layers.push(summary);
    }

    Ok(JoinOutput { results, specs, layers })
}

/// Join all layers onto the run's grid and write `joined.csv`.
pub fn write_join(config: &Config) -> Result<PathBuf> {
    let projector = config.projector()?;
    let grid = load_grid(config, &projector)?;
    let output = join_layers(config, &grid, &projector)?;

    let path = config.output.path(JOIN_FILE);
    let mut df = results_to_frame(&output.results, &output.specs)?;
    write_csv(&mut df, &path, config.output.force)?;
    info!(cells = output.results.len(), columns = output.specs.len(), path = %path.display(), "wrote join");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{geom::Epsg, join::AggValue};

    fn config(dir: &std::path::Path, layers: &str) -> Config {
        let text = format!("[grid]\ncell_size_m = 250\nradius_m = 250\n{layers}");
        let mut config = Config::from_toml(&text).unwrap();
        config.output.dir = dir.to_path_buf();
        config
    }

    fn write_points(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn csv_layer_is_filtered_and_recoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_points(dir.path(), "p.csv",
            "lon,lat,kind,grade\n126.978414,37.56668,fire,B\n126.978414,37.56668,flood,A\n0,0,fire,A\n");
        let layer = LayerConfig {
            name: "p".into(),
            paths: vec![path],
            epsg: Epsg::WGS84,
            filter: Some(FilterConfig { column: "kind".into(), contains: "fire".into() }),
            recode: Some(crate::config::RecodeConfig {
                attribute: "grade".into(),
                into: "score".into(),
                values: [("A".to_string(), 1.0), ("B".to_string(), 4.0)].into_iter().collect(),
            }),
            ..LayerConfig::default()
        };
        let loaded = load_layer(&layer, &Projector::seoul().unwrap()).unwrap();
        assert_eq!(loaded.features.len(), 1);
        assert_eq!(loaded.skipped, 1);
        assert_eq!(loaded.features[0].number("score"), Some(4.0));
    }

    #[test]
    fn attribute_table_keys_are_normalised() {
        let df = crate::io::csv::read_csv_bytes(
            "자치구,소계_발생,비고\n서울특별시 강남 구,\"1,234\",a\n강남구,9,b\n중구,,c\n,5,d\n".as_bytes()).unwrap();
        let config = AttributeTableConfig {
            path: PathBuf::from("crime.csv"),
            key: "자치구".into(),
            on: "SGG_NM".into(),
            strip_prefix: Some("서울특별시".into()),
            columns: vec!["소계_발생".into()],
        };
        let table = attribute_table(&df, &config).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table["강남구"], vec![("소계_발생".to_string(), AttrValue::Number(1234.0))]);
        assert!(table["중구"].is_empty());
        assert_eq!(table_key(" 서울특별시 중 구 ", Some("서울특별시")), "중구");
    }

    #[test]
    fn layers_are_merged_column_wise() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_points(dir.path(), "a.csv", "lon,lat\n126.978414,37.56668\n126.978414,37.56668\n");
        let b = write_points(dir.path(), "b.csv", "lon,lat,v\n126.978414,37.56668,2.5\n");
        let layers = format!(
            "[[layer]]\nname = \"a\"\npaths = [{a:?}]\n[[layer.aggregate]]\ncolumn = \"a_n\"\nfunc = \"count\"\n\
             [[layer]]\nname = \"b\"\npaths = [{b:?}]\n[[layer.aggregate]]\ncolumn = \"b_sum\"\nattribute = \"v\"\nfunc = \"weighted_sum\"\n",
        );
        let config = config(dir.path(), &layers);
        let projector = config.projector().unwrap();
        let grid = load_grid(&config, &projector).unwrap();
        let out = join_layers(&config, &grid, &projector).unwrap();

        assert_eq!(out.results.len(), grid.len());
        assert_eq!(out.specs.len(), 2);
        assert_eq!(out.layers[0].assignments, 2);
        let total_a: f64 = out.results.iter().filter_map(|r| r.values[0].as_number()).sum();
        let total_b: f64 = out.results.iter().filter_map(|r| r.values[1].as_number()).sum();
        assert_eq!(total_a, 2.0);
        assert!((total_b - 2.5).abs() < 1e-9);
        assert!(out.results.iter().all(|r| r.values.len() == 2 && r.values[0] != AggValue::Missing));
    }

    #[test]
    fn duplicate_columns_are_rejected_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_points(dir.path(), "a.csv", "lon,lat\n");
        let layers = format!(
            "[[layer]]\nname = \"a\"\npaths = [{a:?}]\n[[layer.aggregate]]\ncolumn = \"n\"\nfunc = \"count\"\n\
             [[layer]]\nname = \"b\"\npaths = [{a:?}]\n[[layer.aggregate]]\ncolumn = \"n\"\nfunc = \"count\"\n",
        );
        let config = config(dir.path(), &layers);
        let projector = config.projector().unwrap();
        let grid = load_grid(&config, &projector).unwrap();
        let err = join_layers(&config, &grid, &projector).unwrap_err();
        assert!(err.to_string().contains("\"n\""));
    }

    #[test]
    fn missing_layer_file_fails_before_output() {
        let dir = tempfile::tempdir().unwrap();
        let layers = "[[layer]]\nname = \"a\"\npaths = [\"absent.csv\"]\n[[layer.aggregate]]\ncolumn = \"n\"\nfunc = \"count\"\n";
        let config = config(dir.path(), layers);
        assert!(write_join(&config).is_err());
        assert!(!dir.path().join(JOIN_FILE).exists());
    }
}
