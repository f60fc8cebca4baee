use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{cache::JsonCache, retry::Lookup};

/// A WGS84 position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self { Self { lon, lat } }
}

/// Resolves free text (an address or a place name) to a position.
///
/// `Err` is reserved for failures that must stop the batch.
pub trait Geocoder {
    fn geocode(&mut self, query: &str) -> Result<Lookup<LonLat>>;
}

/// First document of a Kakao local-search response (`x`/`y` are strings).
pub fn parse_kakao(body: &Value) -> Option<LonLat> {
    let doc = body.get("documents")?.as_array()?.first()?;
    let field = |name: &str| -> Option<f64> {
        match doc.get(name)? {
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    };
    Some(LonLat { lon: field("x")?, lat: field("y")? }).filter(|p| p.lon.is_finite() && p.lat.is_finite())
}

/// Caching front for any [`Geocoder`].
///
/// Answers (including "no match") are keyed by the trimmed query. When the
/// bare query has no match, each fallback prefix is tried in turn. Queries
/// the provider failed on are left out of the cache so a later run retries them.
pub struct CachedGeocoder<G> {
    inner: G,
    cache: JsonCache<Option<LonLat>>,
    fallback_prefixes: Vec<String>,
    calls: usize,
}

impl<G: Geocoder> CachedGeocoder<G> {
    pub fn new(inner: G, cache: JsonCache<Option<LonLat>>) -> Self {
        Self { inner, cache, fallback_prefixes: Vec::new(), calls: 0 }
    }

    pub fn with_fallback_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.fallback_prefixes = prefixes;
        self
    }

    /// Provider calls made so far (cache hits excluded).
    #[inline] pub fn calls(&self) -> usize { self.calls }

    #[inline] pub fn cache(&self) -> &JsonCache<Option<LonLat>> { &self.cache }

    fn lookup(&mut self, query: &str) -> Result<Lookup<LonLat>> {
        self.calls += 1;
        if self.calls % 100 == 0 {
            debug!(calls = self.calls, "geocoding calls issued");
        }
        self.inner.geocode(query)
    }
}

impl<G: Geocoder> Geocoder for CachedGeocoder<G> {
    fn geocode(&mut self, query: &str) -> Result<Lookup<LonLat>> {
        let key = query.trim();
        if key.is_empty() { return Ok(Lookup::NoMatch) }
        if let Some(hit) = self.cache.get(key) {
            return Ok(Lookup::from_option(*hit));
        }

        let mut outcome = self.lookup(key)?;
        let prefixes = self.fallback_prefixes.clone();
        for prefix in prefixes.iter().filter(|p| !key.starts_with(p.trim())) {
            if let Lookup::Found(_) = outcome { break }
            let next = self.lookup(&format!("{prefix}{key}"))?;
            outcome = match (outcome, next) {
                (_, found @ Lookup::Found(_)) => found,
                (Lookup::Failed, _) | (_, Lookup::Failed) => Lookup::Failed,
                _ => Lookup::NoMatch,
            };
        }

        match outcome {
            Lookup::Found(position) => self.cache.insert(key, Some(position))?,
            Lookup::NoMatch => self.cache.insert(key, None)?,
            Lookup::Failed => warn!(query = key, "geocoding failed, not cached"),
        }
        Ok(outcome)
    }
}

#[cfg(feature = "remote")]
pub use kakao::{KakaoGeocoder, SearchKind};

#[cfg(feature = "remote")]
mod kakao {
    use anyhow::Result;
    use reqwest::blocking::Client;

    use super::{parse_kakao, Geocoder, LonLat};
    use crate::remote::{http::send_json, retry::{Lookup, RateLimiter, RetryPolicy}};

    const ADDRESS_URL: &str = "https://dapi.kakao.com/v2/local/search/address.json";
    const KEYWORD_URL: &str = "https://dapi.kakao.com/v2/local/search/keyword.json";

    /// Which Kakao local-search endpoint to query.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum SearchKind {
        Address,
        Keyword,
    }

    /// Kakao local search over HTTP.
    pub struct KakaoGeocoder {
        client: Client,
        auth: String,
        kind: SearchKind,
        retry: RetryPolicy,
        limiter: RateLimiter,
    }

    impl KakaoGeocoder {
        pub fn new(client: Client, rest_key: &str, kind: SearchKind, retry: RetryPolicy, limiter: RateLimiter) -> Self {
            Self { client, auth: format!("KakaoAK {rest_key}"), kind, retry, limiter }
        }
    }

    impl Geocoder for KakaoGeocoder {
        fn geocode(&mut self, query: &str) -> Result<Lookup<LonLat>> {
            let url = match self.kind {
                SearchKind::Address => ADDRESS_URL,
                SearchKind::Keyword => KEYWORD_URL,
            };
            let Self { client, auth, retry, limiter, .. } = self;
            let body = retry.run("kakao geocode", || {
                limiter.wait();
                send_json(client.get(url)
                    .header("Authorization", auth.as_str())
                    .query(&[("query", query)]))
            })?;
            Ok(Lookup::from_response(body, parse_kakao))
        }
    }
}
