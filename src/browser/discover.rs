//! Result-card discovery from search page HTML

use super::{DiscoveredPlace, DriverError, PlaceDiscoverer, Tab};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Discovers places from the result anchors of a loaded search page
///
/// A result card is an `<a>` whose href contains `/maps/place/`. The place name comes
/// from `aria-label`, falling back to the anchor text. Relative links are resolved
/// against the tab URL and repeated hrefs are reported once.
#[derive(Debug, Clone, Default)]
pub struct AnchorDiscoverer;

#[async_trait]
impl PlaceDiscoverer for AnchorDiscoverer {
    async fn discover(
        &self,
        tab: &mut dyn Tab,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredPlace>, DriverError> {
        if cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }

        let html = tab.html().await?;
        let base = tab.current_url().and_then(|u| Url::parse(&u).ok());
        let places = parse_result_cards(&html, base.as_ref());

        tracing::debug!("Discovered {} cards for '{}'", places.len(), query);
        Ok(places)
    }
}

/// Parses result cards out of a search page
pub fn parse_result_cards(html: &str, base: Option<&Url>) -> Vec<DiscoveredPlace> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(r#"a[href*="/maps/place/"]"#) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut places = Vec::new();

    for anchor in document.select(&selector) {
        let Some(raw_href) = anchor.value().attr("href") else {
            continue;
        };

        let href = match base {
            Some(base) => match base.join(raw_href) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            },
            None => raw_href.trim().to_string(),
        };

        if !seen.insert(href.clone()) {
            continue;
        }

        let name = anchor
            .value()
            .attr("aria-label")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| anchor.text().collect::<String>().trim().to_string());

        places.push(DiscoveredPlace { name, href });
    }

    places
}
