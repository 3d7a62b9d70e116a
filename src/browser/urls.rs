//! Search URL construction

use url::form_urlencoded;

/// Base of every search URL
pub const DEFAULT_MAPS_BASE: &str = "https://www.google.com/maps";

/// Builds the search URL for a query centered on a tile
///
/// The query is form-encoded (spaces become `+`). Only the viewport and language are
/// set, so the map keeps the requested frame.
///
/// # Example
///
/// ```
/// use gmaps_grid::browser::build_search_url;
///
/// let url = build_search_url("coffee shop", 48.85, 2.35, 16, "en");
/// assert_eq!(
///     url,
///     "https://www.google.com/maps/search/coffee+shop/@48.85,2.35,16z?hl=en"
/// );
/// ```
pub fn build_search_url(
    query: &str,
    latitude: f64,
    longitude: f64,
    zoom: u8,
    language: &str,
) -> String {
    let encoded: String = form_urlencoded::byte_serialize(query.as_bytes()).collect();
    format!(
        "{}/search/{}/@{},{},{}z?hl={}",
        DEFAULT_MAPS_BASE, encoded, latitude, longitude, zoom, language
    )
}
