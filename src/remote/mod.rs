//! Remote collaborators: geocoding and driving directions.
//!
//! Providers sit behind the [`Geocoder`] and [`Directions`] traits. The cached
//! wrappers answer repeated queries from a [`JsonCache`] without calling out.
//! The HTTP implementations (Kakao, Naver) need the `remote` feature.

mod cache;
mod directions;
mod geocode;
mod retry;

#[cfg(feature = "remote")]
mod http;

pub use cache::JsonCache;
pub use directions::{directions_key, parse_naver, weighted_travel_time, CachedDirections, Directions};
pub use geocode::{parse_kakao, CachedGeocoder, Geocoder, LonLat};
pub use retry::{CallError, Lookup, RateLimiter, RetryPolicy};

#[cfg(feature = "remote")]
pub use directions::NaverDirections;
#[cfg(feature = "remote")]
pub use geocode::{KakaoGeocoder, SearchKind};
#[cfg(feature = "remote")]
pub use http::client;
