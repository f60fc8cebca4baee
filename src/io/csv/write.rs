//! CSV writing operations.

use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use polars::{frame::DataFrame, io::SerWriter, prelude::{Column, CsvWriter}};

use crate::{
    grid::Grid,
    io::PendingWrite,
    join::{AggFn, AggSpec, AggValue, AggregateResult},
};

/// Separator used when a list-valued aggregate is flattened into one CSV field.
pub const LIST_SEPARATOR: &str = ";";

/// Write a DataFrame to a CSV file with a UTF-8 byte-order mark.
///
/// Nothing is visible at `path` until the whole frame has been written.
pub fn write_csv(df: &mut DataFrame, path: &Path, force: bool) -> Result<()> {
    let mut sink = PendingWrite::open(path, force)?;
    CsvWriter::new(&mut sink)
        .include_bom(true)
        .finish(df)
        .with_context(|| format!("[io::csv::write] Failed to write CSV to {:?}", path))?;
    sink.finalize()
}

/// Write a DataFrame to CSV bytes (no byte-order mark).
pub fn write_csv_bytes(df: &DataFrame) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    CsvWriter::new(&mut out)
        .finish(&mut df.clone())
        .context("[io::csv::write] Failed to write CSV to bytes")?;
    Ok(out)
}

/// The grid itself: one row per cell with lattice indices and both centres.
pub fn grid_to_frame(grid: &Grid) -> Result<DataFrame> {
    let cells = grid.cells();
    let df = DataFrame::new(vec![
        Column::new("cell_id".into(), cells.iter().map(|c| c.id.0).collect::<Vec<_>>()),
        Column::new("i".into(), cells.iter().map(|c| c.i).collect::<Vec<_>>()),
        Column::new("j".into(), cells.iter().map(|c| c.j).collect::<Vec<_>>()),
        Column::new("x".into(), cells.iter().map(|c| c.x).collect::<Vec<_>>()),
        Column::new("y".into(), cells.iter().map(|c| c.y).collect::<Vec<_>>()),
        Column::new("center_lon".into(), cells.iter().map(|c| c.center_lon).collect::<Vec<_>>()),
        Column::new("center_lat".into(), cells.iter().map(|c| c.center_lat).collect::<Vec<_>>()),
    ])?;
    Ok(df)
}

/// Aggregated rows in a stable column order: `cell_id`, `center_lon`, `center_lat`,
/// then one column per spec. Lists are `;`-joined; `Missing` and empty lists are empty fields.
pub fn results_to_frame(results: &[AggregateResult], specs: &[AggSpec]) -> Result<DataFrame> {
    let mut columns = vec![
        Column::new("cell_id".into(), results.iter().map(|r| r.cell_id.0).collect::<Vec<_>>()),
        Column::new("center_lon".into(), results.iter().map(|r| r.center_lon).collect::<Vec<_>>()),
        Column::new("center_lat".into(), results.iter().map(|r| r.center_lat).collect::<Vec<_>>()),
    ];

    for (k, spec) in specs.iter().enumerate() {
        let values = results.iter()
            .map(|r| r.values.get(k))
            .collect::<Option<Vec<_>>>();
        let Some(values) = values else {
            bail!("[io::csv::write] result rows have fewer values than the {} requested columns", specs.len());
        };

        let column = match spec.func {
            AggFn::Count => Column::new(
                spec.column.as_str().into(),
                values.iter().map(|v| v.as_number().map(|n| n.round() as i64)).collect::<Vec<_>>(),
            ),
            func if func.is_list() => Column::new(
                spec.column.as_str().into(),
                values.iter().map(|v| match v {
                    AggValue::List(items) if !items.is_empty() => Some(items.join(LIST_SEPARATOR)),
                    _ => None,
                }).collect::<Vec<_>>(),
            ),
            _ => Column::new(
                spec.column.as_str().into(),
                values.iter().map(|v| v.as_number()).collect::<Vec<_>>(),
            ),
        };
        columns.push(column);
    }

    let df = DataFrame::new(columns)?;
    ensure!(df.height() == results.len(), "[io::csv::write] frame height mismatch");
    Ok(df)
}

/// Convenience: aggregate rows straight to a CSV file.
pub fn write_results(results: &[AggregateResult], specs: &[AggSpec], path: &Path, force: bool) -> Result<()> {
    let mut df = results_to_frame(results, specs)?;
    write_csv(&mut df, path, force)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::grid::CellId;

    fn row(id: u32, values: Vec<AggValue>) -> AggregateResult {
        AggregateResult { cell_id: CellId(id), center_lon: 126.9, center_lat: 37.5, values }
    }

    #[test]
    fn lists_are_joined_and_missing_is_empty() {
        let specs = vec![
            AggSpec::count("n"),
            AggSpec::new("svc", AggFn::Labels, Some("name")),
            AggSpec::new("risk", AggFn::WeightedMean, Some("grade")),
        ];
        let results = vec![
            row(0, vec![AggValue::Number(2.0), AggValue::List(vec!["a".into(), "b".into()]), AggValue::Number(1.5)]),
            row(1, vec![AggValue::Number(0.0), AggValue::List(vec![]), AggValue::Missing]),
        ];
        let df = results_to_frame(&results, &specs).unwrap();
        let text = String::from_utf8(write_csv_bytes(&df).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "cell_id,center_lon,center_lat,n,svc,risk");
        assert_eq!(lines[1], "0,126.9,37.5,2,a;b,1.5");
        assert_eq!(lines[2], "1,126.9,37.5,0,,");
    }

    #[test]
    fn short_rows_are_rejected() {
        let specs = vec![AggSpec::count("n"), AggSpec::count("m")];
        assert!(results_to_frame(&[row(0, vec![AggValue::Number(1.0)])], &specs).is_err());
    }

    #[test]
    fn file_output_starts_with_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_results(&[row(0, vec![AggValue::Number(3.0)])], &[AggSpec::count("n")], &path, false).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"\xEF\xBB\xBFcell_id"));
        assert!(write_results(&[], &[AggSpec::count("n")], &path, false).is_err());
    }
}
