//! Batch configuration.
//!
//! A [`Config`] is read from a TOML file; every section is optional and falls
//! back to the defaults below, so a minimal file only names its inputs.
//! Provider credentials may also come from the environment
//! (`KAKAO_REST_KEY`, `NAVER_CLIENT_ID`, `NAVER_CLIENT_SECRET`).

use std::{collections::BTreeMap, fs, path::{Path, PathBuf}, time::Duration};

use anyhow::{bail, ensure, Context, Result};
use geo::{Coord, Rect};
use serde::{Deserialize, Serialize};

use crate::{
    geom::{Epsg, Projector},
    grid::GridSpec,
    join::{AggSpec, AssignMode},
};

/// Seoul City Hall, the default grid origin.
pub const CITY_HALL: [f64; 2] = [126.977_822_2, 37.566_405_6];

pub const KAKAO_KEY_ENV: &str = "KAKAO_REST_KEY";
pub const NAVER_ID_ENV: &str = "NAVER_CLIENT_ID";
pub const NAVER_SECRET_ENV: &str = "NAVER_CLIENT_SECRET";

/// Top-level configuration for one batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crs: CrsConfig,
    pub grid: GridConfig,
    #[serde(rename = "layer")]
    pub layers: Vec<LayerConfig>,
    pub services: ServicesConfig,
    pub registry: RegistryConfig,
    pub remote: RemoteConfig,
    pub geocode: GeocodeConfig,
    pub travel: TravelConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("[config] Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("[config] Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("[config] Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot produce a meaningful batch.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.grid.cell_size_m.is_finite() && self.grid.cell_size_m > 0.0,
            "[config] grid.cell_size_m must be positive, got {}", self.grid.cell_size_m);
        ensure!(self.crs.geographic.is_geographic(),
            "[config] crs.geographic must be a lon/lat system, got {}", self.crs.geographic);
        ensure!(!self.crs.planar.is_geographic(),
            "[config] crs.planar must be a projected system, got {}", self.crs.planar);
        for layer in &self.layers {
            ensure!(!layer.paths.is_empty(), "[config] layer {:?} has no input paths", layer.name);
            ensure!(!layer.aggregates.is_empty(), "[config] layer {:?} requests no aggregates", layer.name);
        }
        Ok(())
    }

    /// The single projector used for every coordinate of the run.
    pub fn projector(&self) -> Result<Projector> {
        Projector::new(self.crs.geographic, self.crs.planar)
    }

    /// Fill credentials that the file left empty from the process environment.
    pub fn with_env_credentials(mut self) -> Self {
        let from_env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        if self.remote.kakao_key.is_none() {
            self.remote.kakao_key = from_env(KAKAO_KEY_ENV);
        }
        if self.remote.naver_client_id.is_none() {
            self.remote.naver_client_id = from_env(NAVER_ID_ENV);
        }
        if self.remote.naver_client_secret.is_none() {
            self.remote.naver_client_secret = from_env(NAVER_SECRET_ENV);
        }
        self
    }
}

/// Reference systems. One planar system is used for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrsConfig {
    pub geographic: Epsg,
    pub planar: Epsg,
}

impl Default for CrsConfig {
    fn default() -> Self {
        Self { geographic: Epsg::WGS84, planar: Epsg::KOREA_CENTRAL }
    }
}

/// Tessellation settings. `bounds` takes precedence over `radius_m`;
/// `csv` reuses a previously written grid instead of building one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub cell_size_m: f64,
    /// `[lon, lat]`.
    pub origin: [f64; 2],
    pub radius_m: Option<f64>,
    /// `[min_lon, min_lat, max_lon, max_lat]`.
    pub bounds: Option<[f64; 4]>,
    pub csv: Option<PathBuf>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size_m: 250.0,
            origin: CITY_HALL,
            radius_m: Some(20_000.0),
            bounds: None,
            csv: None,
        }
    }
}

impl GridConfig {
    pub fn spec(&self) -> Result<GridSpec> {
        let origin = Coord { x: self.origin[0], y: self.origin[1] };
        match (self.bounds, self.radius_m) {
            (Some([min_lon, min_lat, max_lon, max_lat]), _) => {
                ensure!(min_lon < max_lon && min_lat < max_lat,
                    "[config] grid.bounds must be [min_lon, min_lat, max_lon, max_lat]");
                let rect = Rect::new(Coord { x: min_lon, y: min_lat }, Coord { x: max_lon, y: max_lat });
                Ok(GridSpec::from_bounds(rect, self.cell_size_m))
            }
            (None, Some(radius)) => Ok(GridSpec::centered(origin, radius, self.cell_size_m)),
            (None, None) => bail!("[config] grid needs either radius_m or bounds"),
        }
    }
}

/// Keep rows whose `column` contains the text `contains`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub column: String,
    pub contains: String,
}

/// Translate a label attribute into numbers before aggregating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecodeConfig {
    pub attribute: String,
    pub into: String,
    pub values: BTreeMap<String, f64>,
}

/// A CSV whose rows are attached to features by a shared key
/// (e.g. per-district totals onto district polygons).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeTableConfig {
    pub path: PathBuf,
    /// Key column of the table.
    pub key: String,
    /// Feature attribute holding the same key.
    pub on: String,
    /// Removed from both sides before matching, along with all whitespace.
    #[serde(default)]
    pub strip_prefix: Option<String>,
    /// Columns to copy; every column but the key when empty.
    #[serde(default)]
    pub columns: Vec<String>,
}

/// One feature layer joined onto the grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub name: String,
    /// CSV or `.shp` files, concatenated in order.
    pub paths: Vec<PathBuf>,
    /// Native reference system of the files.
    pub epsg: Epsg,
    /// Coordinate columns for CSV point layers.
    pub x: String,
    pub y: String,
    pub filter: Option<FilterConfig>,
    pub attributes: Option<AttributeTableConfig>,
    pub recode: Option<RecodeConfig>,
    pub mode: AssignMode,
    /// Force a cell's only partial match to weight 1.
    pub correct_single_match: bool,
    #[serde(rename = "aggregate")]
    pub aggregates: Vec<AggSpec>,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            paths: Vec::new(),
            epsg: Epsg::WGS84,
            x: "lon".to_string(),
            y: "lat".to_string(),
            filter: None,
            attributes: None,
            recode: None,
            mode: AssignMode::PointInCell,
            correct_single_match: true,
            aggregates: Vec::new(),
        }
    }
}

/// Emergency-service points and the district polygons they are grouped by.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Geocoded services (output of `geocode`).
    pub csv: Option<PathBuf>,
    pub name: String,
    pub district: String,
    pub lon: String,
    pub lat: String,
    /// District boundary shapefile.
    pub districts: Option<PathBuf>,
    pub districts_epsg: Epsg,
    pub district_field: String,
    /// Only district names starting with this prefix are kept.
    pub district_prefix: String,
    /// A previously written cell -> service mapping, reused instead of recomputed.
    pub mapping: Option<PathBuf>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            csv: None,
            name: "service_name".to_string(),
            district: "district".to_string(),
            lon: "longitude".to_string(),
            lat: "latitude".to_string(),
            districts: None,
            districts_epsg: Epsg::KOREA_CENTRAL_2010,
            district_field: "SGG_NM".to_string(),
            district_prefix: "서울특별시".to_string(),
            mapping: None,
        }
    }
}

/// Station tables used for the vulnerability index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Per-station population counts.
    pub stations: Option<PathBuf>,
    pub station_column: String,
    /// Two columns: fire station, safety centre.
    pub jurisdiction: Option<PathBuf>,
    /// Names reassigned to another station.
    pub overrides: BTreeMap<String, String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stations: None,
            station_column: "FRSTT_NM".to_string(),
            jurisdiction: None,
            overrides: BTreeMap::from([("금천소방서".to_string(), "구로소방서".to_string())]),
        }
    }
}

/// Remote provider access: credentials, cache and call budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub kakao_key: Option<String>,
    pub naver_client_id: Option<String>,
    pub naver_client_secret: Option<String>,
    pub cache_dir: PathBuf,
    /// Minimum spacing between calls.
    pub min_interval_ms: u64,
    pub retries: u32,
    pub backoff_ms: u64,
    pub timeout_s: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            kakao_key: None,
            naver_client_id: None,
            naver_client_secret: None,
            cache_dir: PathBuf::from(".cache"),
            min_interval_ms: 200,
            retries: 3,
            backoff_ms: 500,
            timeout_s: 10,
        }
    }
}

impl RemoteConfig {
    #[inline] pub fn min_interval(&self) -> Duration { Duration::from_millis(self.min_interval_ms) }

    #[inline] pub fn backoff(&self) -> Duration { Duration::from_millis(self.backoff_ms) }

    #[inline] pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_s) }

    pub fn geocode_cache(&self) -> PathBuf { self.cache_dir.join("geocode.jsonl") }

    pub fn directions_cache(&self) -> PathBuf { self.cache_dir.join("directions.jsonl") }
}

/// One address table to geocode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeInput {
    pub path: PathBuf,
    pub name: String,
    pub address: String,
    /// Written to the `service_type` column of every row from this table.
    pub service_type: Option<String>,
}

impl Default for GeocodeInput {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            name: "service_name".to_string(),
            address: "address".to_string(),
            service_type: None,
        }
    }
}

/// Address tables to geocode into the services CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeConfig {
    #[serde(rename = "input")]
    pub inputs: Vec<GeocodeInput>,
    /// Only rows whose address contains this text are kept.
    pub address_contains: Option<String>,
    /// Use keyword search instead of address search.
    pub keyword: bool,
    /// Retried in order, prefixed to the query, when the bare query has no match.
    pub fallback_prefixes: Vec<String>,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            address_contains: Some("서울특별시".to_string()),
            keyword: false,
            fallback_prefixes: vec!["서울 ".to_string()],
        }
    }
}

/// Travel-time origins. When the mapping CSV carries these columns (e.g. cell
/// centres snapped to the road network) they replace the cell centre.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelConfig {
    pub origin_lon: String,
    pub origin_lat: String,
}

impl Default for TravelConfig {
    fn default() -> Self {
        Self {
            origin_lon: "center_road_lon".to_string(),
            origin_lat: "center_road_lat".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub force: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("."), force: false }
    }
}

impl OutputConfig {
    pub fn path(&self, file_name: &str) -> PathBuf { self.dir.join(file_name) }
}
