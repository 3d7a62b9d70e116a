//! Place page extraction
//!
//! Each field family has its own `FieldExtractor`. The address is required; every
//! other extractor that fails adds a `{field, error}` warning and leaves its field empty.

use super::{ExtractError, PlaceExtractor, Tab};
use crate::storage::{FieldWarning, PlaceFields};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

/// Why one field could not be read
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("element not found")]
    NotFound,

    #[error("unexpected format: {0}")]
    Format(String),
}

impl FieldError {
    pub fn code(&self) -> &'static str {
        match self {
            FieldError::NotFound => "not_found",
            FieldError::Format(_) => "format",
        }
    }
}

/// Reads one field family from a parsed place page
pub trait FieldExtractor: Send + Sync {
    /// Name recorded in warnings
    fn field(&self) -> &'static str;

    fn extract(&self, document: &Html, fields: &mut PlaceFields) -> Result<(), FieldError>;
}

/// Extracts place fields from static place page HTML
pub struct HtmlPlaceExtractor {
    address: Box<dyn FieldExtractor>,
    optional: Vec<Box<dyn FieldExtractor>>,
}

impl Default for HtmlPlaceExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlPlaceExtractor {
    /// Creates an extractor with the standard field set
    pub fn new() -> Self {
        Self {
            address: Box::new(AddressField),
            optional: vec![
                Box::new(PhoneField),
                Box::new(PlusCodeField),
                Box::new(WebsiteField),
                Box::new(SocialLinksField),
                Box::new(OpenTimeField),
            ],
        }
    }

    /// Adds another optional field extractor
    pub fn with_extractor(mut self, extractor: Box<dyn FieldExtractor>) -> Self {
        self.optional.push(extractor);
        self
    }

    /// Runs every extractor against a place page
    pub fn extract_from_html(&self, html: &str, city: &str) -> Result<PlaceFields, ExtractError> {
        let document = Html::parse_document(html);
        let mut fields = PlaceFields {
            location: city.to_string(),
            ..PlaceFields::default()
        };

        for extractor in &self.optional {
            if let Err(e) = extractor.extract(&document, &mut fields) {
                fields.warnings.push(FieldWarning {
                    field: extractor.field().to_string(),
                    error: e.code().to_string(),
                });
            }
        }

        let address = self.address.extract(&document, &mut fields);
        if address.is_err() || fields.address.is_empty() {
            return Err(ExtractError::MissingAddress {
                warnings: fields.warnings,
            });
        }

        Ok(fields)
    }
}

#[async_trait]
impl PlaceExtractor for HtmlPlaceExtractor {
    async fn extract(
        &self,
        tab: &mut dyn Tab,
        href: &str,
        city: &str,
    ) -> Result<PlaceFields, ExtractError> {
        if href.trim().is_empty() {
            return Err(ExtractError::EmptyHref);
        }

        tab.navigate(href).await?;
        let html = tab.html().await?;
        self.extract_from_html(&html, city)
    }
}

/// Strips icon-font glyphs and control characters, collapses whitespace
fn clean_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !('\u{e000}'..='\u{f8ff}').contains(c))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_match<'a>(document: &'a Html, selector: &str) -> Result<ElementRef<'a>, FieldError> {
    let selector = Selector::parse(selector).map_err(|e| FieldError::Format(e.to_string()))?;
    document.select(&selector).next().ok_or(FieldError::NotFound)
}

/// Value of an item button: the aria-label after its `Label:` prefix, else its text
fn item_value(element: ElementRef<'_>) -> String {
    if let Some(label) = element.value().attr("aria-label") {
        let value = label.split_once(':').map(|(_, v)| v).unwrap_or(label);
        let value = clean_text(value);
        if !value.is_empty() {
            return value;
        }
    }
    clean_text(&element.text().collect::<String>())
}

struct AddressField;

impl FieldExtractor for AddressField {
    fn field(&self) -> &'static str {
        "address"
    }

    fn extract(&self, document: &Html, fields: &mut PlaceFields) -> Result<(), FieldError> {
        let element = first_match(document, r#"[data-item-id="address"]"#)?;
        fields.address = item_value(element);
        Ok(())
    }
}

struct PhoneField;

impl FieldExtractor for PhoneField {
    fn field(&self) -> &'static str {
        "phone"
    }

    fn extract(&self, document: &Html, fields: &mut PlaceFields) -> Result<(), FieldError> {
        let element = first_match(document, r#"[data-item-id^="phone:tel:"]"#)?;
        fields.phone = item_value(element);
        Ok(())
    }
}

struct PlusCodeField;

impl FieldExtractor for PlusCodeField {
    fn field(&self) -> &'static str {
        "plus code"
    }

    fn extract(&self, document: &Html, fields: &mut PlaceFields) -> Result<(), FieldError> {
        let element = first_match(document, r#"[data-item-id="oloc"]"#)?;
        fields.plus_code = item_value(element);
        Ok(())
    }
}

struct WebsiteField;

impl FieldExtractor for WebsiteField {
    fn field(&self) -> &'static str {
        "website"
    }

    fn extract(&self, document: &Html, fields: &mut PlaceFields) -> Result<(), FieldError> {
        let element = first_match(document, r#"a[data-item-id="authority"]"#)?;
        fields.website = match element.value().attr("href") {
            Some(href) if !href.trim().is_empty() => href.trim().to_string(),
            _ => item_value(element),
        };
        Ok(())
    }
}

const SOCIAL_HOSTS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "youtube.com",
    "tiktok.com",
];

struct SocialLinksField;

impl FieldExtractor for SocialLinksField {
    fn field(&self) -> &'static str {
        "social media urls"
    }

    fn extract(&self, document: &Html, fields: &mut PlaceFields) -> Result<(), FieldError> {
        let selector =
            Selector::parse("a[href]").map_err(|e| FieldError::Format(e.to_string()))?;

        let mut seen = HashSet::new();
        let links: Vec<String> = document
            .select(&selector)
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| {
                Url::parse(href)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_lowercase))
                    .map(|host| {
                        SOCIAL_HOSTS
                            .iter()
                            .any(|s| host == *s || host.ends_with(&format!(".{}", s)))
                    })
                    .unwrap_or(false)
            })
            .map(String::from)
            .filter(|href| seen.insert(href.clone()))
            .collect();

        if links.is_empty() {
            return Err(FieldError::NotFound);
        }
        fields.social_media_urls = links;
        Ok(())
    }
}

/// Opening hours table; one row per weekday
struct OpenTimeField;

impl FieldExtractor for OpenTimeField {
    fn field(&self) -> &'static str {
        "open time"
    }

    fn extract(&self, document: &Html, fields: &mut PlaceFields) -> Result<(), FieldError> {
        let table = first_match(document, "table")?;
        let row_selector = Selector::parse("tr").map_err(|e| FieldError::Format(e.to_string()))?;
        let cell_selector =
            Selector::parse("td").map_err(|e| FieldError::Format(e.to_string()))?;

        let mut lines = Vec::new();
        for row in table.select(&row_selector) {
            let cells: Vec<String> = row
                .select(&cell_selector)
                .map(|cell| match cell.value().attr("aria-label") {
                    Some(label) => clean_text(label),
                    None => clean_text(&cell.text().collect::<String>()),
                })
                .filter(|text| !text.is_empty())
                .collect();
            if !cells.is_empty() {
                lines.push(cells.join(" "));
            }
        }

        if lines.len() != 7 {
            return Err(FieldError::Format(format!(
                "expected 7 day rows, got {}",
                lines.len()
            )));
        }

        fields.open_time = lines.join("\n");
        Ok(())
    }
}
