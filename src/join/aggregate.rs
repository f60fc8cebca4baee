use ahash::AHashMap;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    feature::{FeatureId, FeatureRecord},
    grid::{CellId, Grid},
};
use super::assign::Assignment;

/// Per-attribute aggregation over a cell's matched features.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFn {
    /// Number of matched features; weights are ignored.
    Count,
    /// Σ weight × value.
    WeightedSum,
    /// Σ weight × value, for scores that are already normalised per feature.
    WeightedMean,
    /// Σ weight × value / Σ weight.
    NormalizedMean,
    /// Each feature's value split over its cells in proportion to weight.
    EvenShare,
    /// Ordered list of the attribute's text per matched feature.
    Labels,
    /// Ordered list of the overlap weights per matched feature.
    Weights,
}

impl AggFn {
    /// Whether this function reads a feature attribute.
    pub fn needs_attribute(self) -> bool {
        !matches!(self, Self::Count | Self::Weights)
    }

    /// Whether this function produces a list rather than a number.
    pub fn is_list(self) -> bool {
        matches!(self, Self::Labels | Self::Weights)
    }
}

/// One requested output column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggSpec {
    pub column: String,
    #[serde(default)]
    pub attribute: Option<String>,
    pub func: AggFn,
    /// Emit `Missing` instead of 0 / empty for cells without matches.
    #[serde(default)]
    pub keep_missing: bool,
}

impl AggSpec {
    pub fn new(column: &str, func: AggFn, attribute: Option<&str>) -> Self {
        Self {
            column: column.to_string(),
            attribute: attribute.map(str::to_string),
            func,
            keep_missing: false,
        }
    }

    pub fn count(column: &str) -> Self { Self::new(column, AggFn::Count, None) }
}

/// One aggregated value.
#[derive(Clone, Debug, PartialEq)]
pub enum AggValue {
    Number(f64),
    Missing,
    List(Vec<String>),
}

impl AggValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// One output row per grid cell.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateResult {
    pub cell_id: CellId,
    pub center_lon: f64,
    pub center_lat: f64,
    pub values: Vec<AggValue>, // one per AggSpec, same order
}

/// Force the weight of a cell's only match to 1.0 when it falls short.
///
/// Compensates for the administrative layer not tiling the synthetic grid
/// exactly; cells with two or more matches are left as they are.
/// Returns the number of corrected rows. `rows` must be sorted by cell.
pub fn apply_single_match_correction(rows: &mut [Assignment]) -> usize {
    let mut corrected = 0;
    let mut start = 0;
    while start < rows.len() {
        let cell = rows[start].cell_id;
        let end = start + rows[start..].iter().take_while(|a| a.cell_id == cell).count();
        if end - start == 1 && rows[start].overlap_weight < 1.0 {
            rows[start].overlap_weight = 1.0;
            corrected += 1;
        }
        start = end;
    }
    corrected
}

/// Aggregate `assignments` into exactly one row per cell of `grid`.
///
/// The single-match correction is applied first. Features missing the
/// requested attribute are left out of that column only.
pub fn aggregate(
    grid: &Grid,
    assignments: &[Assignment],
    features: &[FeatureRecord],
    specs: &[AggSpec],
) -> Result<Vec<AggregateResult>> {
    aggregate_with(grid, assignments, features, specs, true)
}

/// [`aggregate`], with the single-match correction optional.
pub fn aggregate_with(
    grid: &Grid,
    assignments: &[Assignment],
    features: &[FeatureRecord],
    specs: &[AggSpec],
    correct_single_match: bool,
) -> Result<Vec<AggregateResult>> {
    for spec in specs {
        if spec.func.needs_attribute() && spec.attribute.is_none() {
            bail!("[join::aggregate] column {:?} uses {:?} but names no attribute", spec.column, spec.func);
        }
    }

    let lookup = features.iter()
        .map(|f| (f.id, f))
        .collect::<AHashMap<FeatureId, &FeatureRecord>>();

    let mut rows = assignments.to_vec();
    rows.sort_by_key(|a| (a.cell_id, a.feature_id));
    if correct_single_match {
        let corrected = apply_single_match_correction(&mut rows);
        debug!(corrected, "single-match overlap weights forced to 1.0");
    }

    // Bucket by cell
    let mut per_cell: Vec<Vec<(&FeatureRecord, f64)>> = vec![Vec::new(); grid.len()];
    for a in &rows {
        let Some(bucket) = per_cell.get_mut(a.cell_id.index()) else {
            bail!("[join::aggregate] assignment references cell {} outside the grid of {}", a.cell_id, grid.len());
        };
        let Some(&feature) = lookup.get(&a.feature_id) else {
            bail!("[join::aggregate] assignment references unknown feature {}", a.feature_id);
        };
        bucket.push((feature, a.overlap_weight));
    }

    // Total weight per feature, for proportional splitting
    let mut feature_weight = AHashMap::<FeatureId, f64>::new();
    for a in &rows {
        *feature_weight.entry(a.feature_id).or_default() += a.overlap_weight;
    }

    let results = grid.cells().iter()
        .map(|cell| {
            let matches = &per_cell[cell.id.index()];
            let values = specs.iter()
                .map(|spec| aggregate_cell(spec, matches, &feature_weight))
                .collect();
            AggregateResult {
                cell_id: cell.id,
                center_lon: cell.center_lon,
                center_lat: cell.center_lat,
                values,
            }
        })
        .collect();

    Ok(results)
}

fn aggregate_cell(
    spec: &AggSpec,
    matches: &[(&FeatureRecord, f64)],
    feature_weight: &AHashMap<FeatureId, f64>,
) -> AggValue {
    let attribute = spec.attribute.as_deref().unwrap_or_default();
    let numbers = || matches.iter()
        .filter_map(move |(f, w)| f.number(attribute).map(|v| (f.id, v, *w)));

    if matches.is_empty() && spec.keep_missing {
        return AggValue::Missing;
    }

    match spec.func {
        AggFn::Count => AggValue::Number(matches.len() as f64),
        AggFn::WeightedSum => AggValue::Number(numbers().map(|(_, v, w)| v * w).sum()),
        AggFn::WeightedMean => AggValue::Number(numbers().map(|(_, v, w)| v * w).sum()),
        AggFn::NormalizedMean => {
            let (sum, total) = numbers().fold((0.0, 0.0), |(s, t), (_, v, w)| (s + v * w, t + w));
            if total > 0.0 {
                AggValue::Number(sum / total)
            } else if spec.keep_missing {
                AggValue::Missing
            } else {
                AggValue::Number(0.0)
            }
        }
        AggFn::EvenShare => AggValue::Number(numbers()
            .map(|(id, v, w)| match feature_weight.get(&id) {
                Some(&total) if total > 0.0 => v * w / total,
                _ => 0.0,
            })
            .sum()),
        AggFn::Labels => AggValue::List(matches.iter()
            .map(|(f, _)| f.label(attribute).unwrap_or_default())
            .collect()),
        AggFn::Weights => AggValue::List(matches.iter()
            .map(|(_, w)| format_weight(*w))
            .collect()),
    }
}

/// Render a weight compactly: `1`, `0.5`, `0.3333`.
pub fn format_weight(w: f64) -> String {
    let rounded = (w * 1e4).round() / 1e4;
    format!("{rounded}")
}
