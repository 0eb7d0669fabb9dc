//! Cache-key derivation — deterministic keys from request identity.
//!
//! Two strategies, chosen by the caller:
//!
//! - **Identity-keyed** ([`request_key`]) — method plus path, for caching whole
//!   endpoint responses.
//! - **Parameter-keyed** ([`locale_key`]) — semantic lookup parameters (city
//!   name or coordinates), for producers whose identity is not the URL.
//!
//! Both are pure functions: the same logical request always yields the same
//! key, and distinct requests never collide except where documented below.

use thiserror::Error;

/// The caller supplied inputs that cannot form a cache key.
///
/// A client error: never retried, never cached.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}

/// Derives an identity key from an HTTP method and path: `"METHOD:path"`.
///
/// The path is used exactly as requested — query strings are not folded in, so
/// two requests differing only in query parameters share a key. Callers that
/// need per-parameter entries must encode the parameters into the key
/// themselves (or use [`locale_key`]-style semantic keys).
///
/// # Examples
///
/// ```rust
/// assert_eq!(readthru::request_key("GET", "/posts/"), "GET:/posts/");
/// ```
pub fn request_key(method: &str, path: &str) -> String {
    format!("{method}:{path}")
}

/// Derives a parameter key from a city name or a coordinate pair.
///
/// - A city yields `"city:{name}"` with the name lowercased, so lookups are
///   case-insensitive.
/// - A full coordinate pair yields `"coords:{lat},{lon}"` with both values
///   rounded to four decimal places, so near-identical coordinates share an
///   entry (~11 m at the equator).
/// - City takes precedence when both forms are supplied.
///
/// # Errors
///
/// [`KeyError::InvalidInput`] when neither a city nor a complete coordinate
/// pair is given.
///
/// # Examples
///
/// ```rust
/// use readthru::locale_key;
///
/// assert_eq!(locale_key(Some("Manila"), None, None).unwrap(), "city:manila");
/// assert_eq!(
///     locale_key(None, Some(14.59951), Some(120.98421)).unwrap(),
///     "coords:14.5995,120.9842",
/// );
/// ```
pub fn locale_key(
    city: Option<&str>,
    lat: Option<f64>,
    lon: Option<f64>,
) -> Result<String, KeyError> {
    if let Some(city) = city.filter(|c| !c.is_empty()) {
        return Ok(format!("city:{}", city.to_lowercase()));
    }
    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok(format!("coords:{lat:.4},{lon:.4}")),
        _ => Err(KeyError::InvalidInput(
            "provide either a city or both latitude and longitude",
        )),
    }
}

/// Derives the status-tracker key for a logical source: `"status:{source}"`.
pub fn status_key(source: &str) -> String {
    format!("status:{source}")
}

/// Reports whether a raw query string requests a cache bypass.
///
/// The convention is a `nocache=true` (or `nocache=1`) parameter; its presence
/// sets `skip_cache` for that invocation. The cache key itself is never
/// mutated by the flag — bypassing happens around the lookup, not inside it.
///
/// # Examples
///
/// ```rust
/// use readthru::nocache_requested;
///
/// assert!(nocache_requested("nocache=true"));
/// assert!(nocache_requested("page=2&nocache=1"));
/// assert!(!nocache_requested("page=2"));
/// ```
pub fn nocache_requested(query: &str) -> bool {
    query.split('&').any(|pair| {
        let mut parts = pair.splitn(2, '=');
        let name = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        name == "nocache" && (value.eq_ignore_ascii_case("true") || value == "1")
    })
}
