use anyhow::Result;
use polars::{frame::DataFrame, prelude::Column};
use tracing::{debug, warn};

use crate::{
    config::{GeocodeConfig, GeocodeInput},
    io::csv::str_column,
    registry::district_from_address,
    remote::{Geocoder, LonLat},
};

pub const GEOCODE_FILE: &str = "services_geocoded.csv";

/// One service row after geocoding.
#[derive(Clone, Debug, PartialEq)]
pub struct GeocodedService {
    pub service_type: Option<String>,
    pub name: String,
    pub address: String,
    pub district: Option<String>,
    pub position: Option<LonLat>,
}

/// Geocode the address column of one input table.
///
/// Rows without a name or address, or whose address lacks the configured
/// text, are left out. Addresses without a match keep an empty position.
pub fn geocode_services(
    df: &DataFrame,
    input: &GeocodeInput,
    config: &GeocodeConfig,
    geocoder: &mut impl Geocoder,
) -> Result<Vec<GeocodedService>> {
    let names = str_column(df, &input.name)?;
    let addresses = str_column(df, &input.address)?;

    let mut out = Vec::new();
    let mut dropped = 0;
    for (name, address) in names.into_iter().zip(addresses) {
        let (Some(name), Some(address)) = (name, address) else { dropped += 1; continue };
        if config.address_contains.as_deref().is_some_and(|needle| !address.contains(needle)) {
            dropped += 1;
            continue;
        }
        let position = geocoder.geocode(&address)?.found();
        out.push(GeocodedService {
            service_type: input.service_type.clone(),
            district: district_from_address(&address),
            name,
            address,
            position,
        });
    }

    let misses = out.iter().filter(|s| s.position.is_none()).count();
    if misses > 0 {
        warn!(path = %input.path.display(), misses, "addresses without a match");
    }
    debug!(path = %input.path.display(), rows = out.len(), dropped, "geocoded table");
    Ok(out)
}

/// `service_type`, `service_name`, `address`, `district`, `longitude`, `latitude`.
pub fn geocoded_frame(rows: &[GeocodedService]) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Column::new("service_type".into(), rows.iter().map(|r| r.service_type.clone()).collect::<Vec<_>>()),
        Column::new("service_name".into(), rows.iter().map(|r| r.name.clone()).collect::<Vec<_>>()),
        Column::new("address".into(), rows.iter().map(|r| r.address.clone()).collect::<Vec<_>>()),
        Column::new("district".into(), rows.iter().map(|r| r.district.clone()).collect::<Vec<_>>()),
        Column::new("longitude".into(), rows.iter().map(|r| r.position.map(|p| p.lon)).collect::<Vec<_>>()),
        Column::new("latitude".into(), rows.iter().map(|r| r.position.map(|p| p.lat)).collect::<Vec<_>>()),
    ])?)
}

#[cfg(feature = "remote")]
pub use remote::write_geocoded;

#[cfg(feature = "remote")]
mod remote {
    use std::path::PathBuf;

    use anyhow::{ensure, Context, Result};
    use tracing::info;

    use crate::{
        batch::require_file,
        config::{Config, KAKAO_KEY_ENV},
        io::csv::{read_csv, write_csv},
        remote::{client, CachedGeocoder, JsonCache, KakaoGeocoder, RateLimiter, RetryPolicy, SearchKind},
    };
    use super::{geocode_services, geocoded_frame, GEOCODE_FILE};

    /// Geocode every configured table through Kakao and write `services_geocoded.csv`.
    pub fn write_geocoded(config: &Config) -> Result<PathBuf> {
        let remote = &config.remote;
        let geocode = &config.geocode;
        ensure!(!geocode.inputs.is_empty(), "[batch::geocode] no [[geocode.input]] is configured");
        for input in &geocode.inputs {
            require_file(&input.path)?;
        }
        let key = remote.kakao_key.as_deref()
            .with_context(|| format!("[batch::geocode] Kakao credentials missing: set remote.kakao_key or {KAKAO_KEY_ENV}"))?;

        let kind = if geocode.keyword { SearchKind::Keyword } else { SearchKind::Address };
        let provider = KakaoGeocoder::new(
            client(remote.timeout())?,
            key,
            kind,
            RetryPolicy::new(remote.retries, remote.backoff()),
            RateLimiter::new(remote.min_interval()),
        );
        let mut geocoder = CachedGeocoder::new(provider, JsonCache::open(&remote.geocode_cache())?)
            .with_fallback_prefixes(geocode.fallback_prefixes.clone());

        let mut rows = Vec::new();
        for input in &geocode.inputs {
            let df = read_csv(&input.path)?;
            rows.extend(geocode_services(&df, input, geocode, &mut geocoder)?);
        }

        let path = config.output.path(GEOCODE_FILE);
        let mut df = geocoded_frame(&rows)?;
        write_csv(&mut df, &path, config.output.force)?;
        let found = rows.iter().filter(|r| r.position.is_some()).count();
        info!(rows = rows.len(), found, calls = geocoder.calls(), path = %path.display(), "wrote geocoded services");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{io::csv::read_csv_bytes, remote::Lookup};

    struct Table;

    impl Geocoder for Table {
        fn geocode(&mut self, query: &str) -> Result<Lookup<LonLat>> {
            Ok(Lookup::from_option(query.contains("세종대로").then(|| LonLat::new(126.978, 37.566))))
        }
    }

    #[test]
    fn rows_outside_the_city_are_dropped() {
        let csv = "소방서,주소\n\
                   중부소방서,서울특별시 중구 세종대로 110\n\
                   어딘가소방서,서울특별시 종로구 없는길 1\n\
                   수원소방서,경기도 수원시 팔달구 효원로 1\n\
                   ,서울특별시 중구 세종대로 1\n";
        let df = read_csv_bytes(csv.as_bytes()).unwrap();
        let input = GeocodeInput {
            name: "소방서".into(),
            address: "주소".into(),
            service_type: Some("fire_station".into()),
            ..GeocodeInput::default()
        };
        let rows = geocode_services(&df, &input, &GeocodeConfig::default(), &mut Table).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].district.as_deref(), Some("중구"));
        assert_eq!(rows[0].position, Some(LonLat::new(126.978, 37.566)));
        assert_eq!(rows[1].position, None);
        assert_eq!(rows[1].service_type.as_deref(), Some("fire_station"));

        let frame = geocoded_frame(&rows).unwrap();
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.column("longitude").unwrap().null_count(), 1);
    }
}
