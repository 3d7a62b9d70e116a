//! Place identity derived from coordinates
//!
//! A place is identified by a UUIDv5 over its coordinates rounded to seven decimals,
//! so the same place reached from two overlapping tiles maps to one identifier.

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

/// `/@lat,lng,` segment of a map link
static AT_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/@(-?\d+(?:\.\d+)?),(-?\d+(?:\.\d+)?),").unwrap());

/// `!3dlat!4dlng` data segment of a place link
static DATA_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!3d(-?\d+(?:\.\d+)?)!4d(-?\d+(?:\.\d+)?)").unwrap());

/// Extracts (lat, lng) from a place link
///
/// The `/@lat,lng,` form is preferred; the `!3d..!4d..` data segment is the fallback.
pub fn parse_lat_lng(href: &str) -> Option<(f64, f64)> {
    let caps = AT_SEGMENT
        .captures(href)
        .or_else(|| DATA_SEGMENT.captures(href))?;
    let lat = caps.get(1)?.as_str().parse().ok()?;
    let lng = caps.get(2)?.as_str().parse().ok()?;
    Some((lat, lng))
}

/// Deterministic identifier for a coordinate pair
pub fn make_place_id(lat: f64, lng: f64) -> String {
    let key = format!("{:.7},{:.7}", lat, lng);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

/// Identifier for the place a link points to, if the link carries coordinates
pub fn place_id_from_href(href: &str) -> Option<(String, f64, f64)> {
    let (lat, lng) = parse_lat_lng(href)?;
    Some((make_place_id(lat, lng), lat, lng))
}
