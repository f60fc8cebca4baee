use ahash::AHashMap;
use anyhow::{ensure, Result};
use polars::frame::DataFrame;
use tracing::{debug, warn};

use crate::io::csv::{f64_column, str_column};
use super::jurisdiction::JurisdictionMap;

/// Registered population.
pub const REGISTERED: &str = "RRPOP";
pub const SENIOR: &str = "SNR_POP";
pub const INFANT: &str = "BBY_POP";
pub const DISABLED: &str = "DSB_POP";
pub const ONE_PERSON: &str = "OPH";
/// Firefighters in charge; carried through when present.
pub const FIREFIGHTERS: &str = "FFOFCR_CHR";

/// Counts summed per cell alongside the index, in output order.
pub const WEIGHTED_COLUMNS: [&str; 5] = [FIREFIGHTERS, SENIOR, INFANT, DISABLED, ONE_PERSON];

/// Factor loadings of the four vulnerable-population ratios.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VulnLoadings {
    pub disabled: f64,
    pub senior: f64,
    pub infant: f64,
    pub one_person: f64,
}

impl Default for VulnLoadings {
    fn default() -> Self {
        Self { disabled: 0.48, senior: 0.42, infant: 0.35, one_person: 0.30 }
    }
}

impl VulnLoadings {
    /// Loadings rescaled to sum to 1.
    pub fn normalized(self) -> Self {
        let total = self.disabled + self.senior + self.infant + self.one_person;
        if total <= 0.0 { return self }
        Self {
            disabled: self.disabled / total,
            senior: self.senior / total,
            infant: self.infant / total,
            one_person: self.one_person / total,
        }
    }
}

/// One fire station's population profile.
#[derive(Clone, Debug, PartialEq)]
pub struct StationRecord {
    pub name: String,
    pub counts: AHashMap<&'static str, f64>,
    /// Min-max scaled, in [0, 1].
    pub vuln_index: f64,
}

impl StationRecord {
    #[inline]
    pub fn count(&self, column: &str) -> f64 { self.counts.get(column).copied().unwrap_or(0.0) }
}

/// Station name -> vulnerability profile.
#[derive(Clone, Debug, Default)]
pub struct StationRegistry {
    stations: Vec<StationRecord>,
    by_name: AHashMap<String, usize>,
}

/// Per-cell result of weighting station profiles by service share.
#[derive(Clone, Debug, PartialEq)]
pub struct CellVulnerability {
    pub index: f64,
    /// Same order as [`WEIGHTED_COLUMNS`].
    pub counts: [f64; 5],
    pub unresolved: usize,
}

impl StationRegistry {
    /// Build from a station table keyed by `name_column`.
    ///
    /// Rows without a name or with a non-positive registered population are skipped.
    pub fn from_frame(df: &DataFrame, name_column: &str, loadings: VulnLoadings) -> Result<Self> {
        let names = str_column(df, name_column)?;
        let mut columns = AHashMap::new();
        for column in [REGISTERED, SENIOR, INFANT, DISABLED, ONE_PERSON] {
            columns.insert(column, f64_column(df, column)?);
        }
        if let Ok(values) = f64_column(df, FIREFIGHTERS) {
            columns.insert(FIREFIGHTERS, values);
        }

        let mut rows = Vec::new();
        let mut skipped = 0;
        for (row, name) in names.into_iter().enumerate() {
            let registered = columns[&REGISTERED][row].filter(|&n| n > 0.0);
            let (Some(name), Some(_)) = (name, registered) else { skipped += 1; continue };
            let counts = columns.iter()
                .map(|(&column, values)| (column, values[row].unwrap_or(0.0)))
                .collect();
            rows.push(StationRecord { name, counts, vuln_index: 0.0 });
        }
        if skipped > 0 {
            warn!(skipped, "station rows without a name or registered population");
        }

        Self::from_records(rows, loadings)
    }

    /// Compute indices for prepared records (their `vuln_index` is overwritten).
    pub fn from_records(mut stations: Vec<StationRecord>, loadings: VulnLoadings) -> Result<Self> {
        ensure!(!stations.is_empty(), "[registry::station] no usable station rows");
        let w = loadings.normalized();

        let raw = stations.iter()
            .map(|s| {
                let ratio = |column| s.count(column) / s.count(REGISTERED);
                w.disabled * ratio(DISABLED)
                    + w.senior * ratio(SENIOR)
                    + w.infant * ratio(INFANT)
                    + w.one_person * ratio(ONE_PERSON)
            })
            .collect::<Vec<_>>();

        let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
        let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;
        for (station, value) in stations.iter_mut().zip(&raw) {
            // A single distinct value carries no contrast
            station.vuln_index = if span > 0.0 { (value - min) / span } else { 0.0 };
        }

        let by_name = stations.iter().enumerate().map(|(i, s)| (s.name.clone(), i)).collect();
        debug!(stations = stations.len(), "built station registry");
        Ok(Self { stations, by_name })
    }

    #[inline] pub fn len(&self) -> usize { self.stations.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.stations.is_empty() }

    #[inline] pub fn contains(&self, name: &str) -> bool { self.by_name.contains_key(name) }

    pub fn get(&self, name: &str) -> Option<&StationRecord> {
        self.by_name.get(name).map(|&i| &self.stations[i])
    }

    pub fn stations(&self) -> &[StationRecord] { &self.stations }

    /// Σ station index × share over a cell's services, plus the weighted counts.
    /// Services that resolve to no known station are counted and contribute nothing.
    pub fn weigh<'a>(&self, services: impl IntoIterator<Item = (&'a str, f64)>, map: &JurisdictionMap) -> CellVulnerability {
        let mut out = CellVulnerability { index: 0.0, counts: [0.0; 5], unresolved: 0 };
        for (name, share) in services {
            let Some(station) = map.resolve(name, |n| self.contains(n)).and_then(|s| self.get(&s)) else {
                out.unresolved += 1;
                continue;
            };
            out.index += station.vuln_index * share;
            for (acc, column) in out.counts.iter_mut().zip(WEIGHTED_COLUMNS) {
                *acc += station.count(column) * share;
            }
        }
        out
    }
}
