use anyhow::Result;
use serde_json::Value;
use tracing::{debug, warn};

use super::{cache::JsonCache, geocode::LonLat, retry::Lookup};

/// Driving-time provider; `Lookup::NoMatch` means there is no route.
pub trait Directions {
    fn duration_s(&mut self, origin: LonLat, destination: LonLat) -> Result<Lookup<f64>>;
}

/// Cache key of an origin/destination pair: `"{o_lon},{o_lat}_{d_lon},{d_lat}"`.
pub fn directions_key(origin: LonLat, destination: LonLat) -> String {
    format!("{},{}_{},{}", origin.lon, origin.lat, destination.lon, destination.lat)
}

/// Optimal-route duration of a Naver driving response, converted from ms to s.
pub fn parse_naver(body: &Value) -> Option<f64> {
    let ms = body.get("route")?
        .get("traoptimal")?
        .as_array()?
        .first()?
        .get("summary")?
        .get("duration")?
        .as_f64()?;
    Some(ms / 1000.0)
}

/// Caching front for any [`Directions`] provider, keyed by [`directions_key`].
///
/// Pairs the provider failed on are not cached.
pub struct CachedDirections<D> {
    inner: D,
    cache: JsonCache<Option<f64>>,
    calls: usize,
}

impl<D: Directions> CachedDirections<D> {
    pub fn new(inner: D, cache: JsonCache<Option<f64>>) -> Self {
        Self { inner, cache, calls: 0 }
    }

    /// Provider calls made so far (cache hits excluded).
    #[inline] pub fn calls(&self) -> usize { self.calls }
}

impl<D: Directions> Directions for CachedDirections<D> {
    fn duration_s(&mut self, origin: LonLat, destination: LonLat) -> Result<Lookup<f64>> {
        let key = directions_key(origin, destination);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Lookup::from_option(*hit));
        }

        self.calls += 1;
        if self.calls % 100 == 0 {
            debug!(calls = self.calls, "directions calls issued");
        }
        let duration = self.inner.duration_s(origin, destination)?;
        match duration {
            Lookup::Found(seconds) => self.cache.insert(&key, Some(seconds))?,
            Lookup::NoMatch => self.cache.insert(&key, None)?,
            Lookup::Failed => warn!(pair = %key, "directions failed, not cached"),
        }
        Ok(duration)
    }
}

/// Σ duration(origin → target) × weight. Pairs without a duration count as 0.
pub fn weighted_travel_time(
    directions: &mut impl Directions,
    origin: LonLat,
    targets: &[(LonLat, f64)],
) -> Result<f64> {
    let mut total = 0.0;
    for &(target, weight) in targets {
        total += directions.duration_s(origin, target)?.found().unwrap_or(0.0) * weight;
    }
    Ok(total)
}

#[cfg(feature = "remote")]
pub use naver::NaverDirections;

#[cfg(feature = "remote")]
mod naver {
    use anyhow::Result;
    use reqwest::blocking::Client;

    use super::{parse_naver, Directions, LonLat};
    use crate::remote::{http::send_json, retry::{Lookup, RateLimiter, RetryPolicy}};

    const DRIVING_URL: &str = "https://maps.apigw.ntruss.com/map-direction/v1/driving";

    /// Naver Maps driving directions over HTTP.
    pub struct NaverDirections {
        client: Client,
        client_id: String,
        client_secret: String,
        retry: RetryPolicy,
        limiter: RateLimiter,
    }

    impl NaverDirections {
        pub fn new(client: Client, client_id: &str, client_secret: &str, retry: RetryPolicy, limiter: RateLimiter) -> Self {
            Self {
                client,
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
                retry,
                limiter,
            }
        }
    }

    impl Directions for NaverDirections {
        fn duration_s(&mut self, origin: LonLat, destination: LonLat) -> Result<Lookup<f64>> {
            let start = format!("{},{}", origin.lon, origin.lat);
            let goal = format!("{},{}", destination.lon, destination.lat);
            let Self { client, client_id, client_secret, retry, limiter } = self;
            let body = retry.run("naver directions", || {
                limiter.wait();
                send_json(client.get(DRIVING_URL)
                    .header("x-ncp-apigw-api-key-id", client_id.as_str())
                    .header("x-ncp-apigw-api-key", client_secret.as_str())
                    .query(&[("start", start.as_str()), ("goal", goal.as_str())]))
            })?;
            Ok(Lookup::from_response(body, parse_naver))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Returns 100 s per unit of longitude difference; no route to the origin itself.
    struct FakeDirections {
        calls: usize,
        down: bool,
    }

    impl Directions for FakeDirections {
        fn duration_s(&mut self, origin: LonLat, destination: LonLat) -> Result<Lookup<f64>> {
            self.calls += 1;
            if self.down { return Ok(Lookup::Failed) }
            let dlon = (destination.lon - origin.lon).abs();
            Ok(Lookup::from_option((dlon > 0.0).then_some(dlon * 100.0)))
        }
    }

    #[test]
    fn keys_follow_the_pair_format() {
        let key = directions_key(LonLat::new(126.97, 37.56), LonLat::new(127.0, 37.5));
        assert_eq!(key, "126.97,37.56_127,37.5");
    }

    #[test]
    fn naver_duration_is_converted_to_seconds() {
        let body = json!({ "route": { "traoptimal": [{ "summary": { "duration": 754_000 } }] } });
        assert_eq!(parse_naver(&body), Some(754.0));
        assert_eq!(parse_naver(&json!({ "code": 1, "route": {} })), None);
    }

    #[test]
    fn weighted_time_treats_missing_routes_as_zero() {
        let mut fake = FakeDirections { calls: 0, down: false };
        let origin = LonLat::new(1.0, 0.0);
        let total = weighted_travel_time(&mut fake, origin, &[
            (LonLat::new(3.0, 0.0), 0.25),
            (LonLat::new(1.0, 0.0), 0.75),
        ]).unwrap();
        assert!((total - 50.0).abs() < 1e-9);
    }

    #[test]
    fn repeated_pairs_hit_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonCache::open(&dir.path().join("directions.jsonl")).unwrap();
        let mut cached = CachedDirections::new(FakeDirections { calls: 0, down: false }, cache);
        let (a, b) = (LonLat::new(1.0, 0.0), LonLat::new(2.0, 0.0));

        assert_eq!(cached.duration_s(a, b).unwrap(), Lookup::Found(100.0));
        assert_eq!(cached.duration_s(a, b).unwrap(), Lookup::Found(100.0));
        assert_eq!(cached.duration_s(a, a).unwrap(), Lookup::NoMatch);
        assert_eq!(cached.duration_s(a, a).unwrap(), Lookup::NoMatch);
        assert_eq!(cached.calls(), 2);
        assert_eq!(cached.inner.calls, 2);
    }

    #[test]
    fn failed_pairs_are_asked_again_after_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directions.jsonl");
        let (a, b) = (LonLat::new(1.0, 0.0), LonLat::new(2.0, 0.0));
        {
            let mut cached = CachedDirections::new(FakeDirections { calls: 0, down: true }, JsonCache::open(&path).unwrap());
            assert_eq!(cached.duration_s(a, b).unwrap(), Lookup::Failed);
        }
        let mut cached = CachedDirections::new(FakeDirections { calls: 0, down: false }, JsonCache::open(&path).unwrap());
        assert_eq!(cached.duration_s(a, b).unwrap(), Lookup::Found(100.0));
        assert_eq!(cached.calls(), 1);
    }
}
