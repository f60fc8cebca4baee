use ahash::AHashMap;
use anyhow::{ensure, Result};
use polars::frame::DataFrame;

use crate::io::csv::str_column;

/// Safety centre -> fire station table, with administrative reassignments.
#[derive(Clone, Debug, Default)]
pub struct JurisdictionMap {
    center_to_station: AHashMap<String, String>,
    overrides: AHashMap<String, String>,
}

impl JurisdictionMap {
    pub fn new() -> Self { Self::default() }

    /// Build from `(fire_station, safety_center)` pairs. The first pairing of a centre wins.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut map = Self::new();
        for (station, center) in pairs {
            map.center_to_station.entry(center.into()).or_insert_with(|| station.into());
        }
        map
    }

    /// Read a two-column table: fire station, then safety centre.
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let names = df.get_column_names().into_iter().map(|n| n.to_string()).collect::<Vec<_>>();
        ensure!(names.len() >= 2, "[registry::jurisdiction] expected two columns (station, centre), got {}", names.len());

        let stations = str_column(df, &names[0])?;
        let centers = str_column(df, &names[1])?;
        Ok(Self::from_pairs(stations.into_iter().zip(centers)
            .filter_map(|(station, center)| Some((station?, center?)))))
    }

    /// Add a reassignment applied before and after centre lookup.
    pub fn with_override(mut self, from: &str, to: &str) -> Self {
        self.overrides.insert(from.to_string(), to.to_string());
        self
    }

    pub fn with_overrides<'a>(self, overrides: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        overrides.into_iter().fold(self, |map, (from, to)| map.with_override(from, to))
    }

    #[inline] pub fn len(&self) -> usize { self.center_to_station.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.center_to_station.is_empty() }

    /// The fire station responsible for `name` (a station or a safety centre).
    ///
    /// Order: override, known station, centre table; the override is applied
    /// once more to the result. `None` when nothing matches a known station.
    pub fn resolve(&self, name: &str, is_station: impl Fn(&str) -> bool) -> Option<String> {
        let name = name.trim();
        let station = if let Some(target) = self.overrides.get(name) {
            target.clone()
        } else if is_station(name) {
            name.to_string()
        } else {
            self.center_to_station.get(name)?.clone()
        };
        let station = self.overrides.get(&station).cloned().unwrap_or(station);
        is_station(&station).then_some(station)
    }
}
