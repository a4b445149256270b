//! Listing page parser
//!
//! Extracts image URLs from forum and news listing pages with a single
//! configured CSS selector.

use crate::url::resolve_reference;
use crate::ConfigError;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Attributes that may carry an image location, most specific first
///
/// Lazy-loading pages keep the real image in `data-src`/`data-original`;
/// Discuz boards use `zoomfile`/`file` for the full-size attachment.
const IMAGE_ATTRIBUTES: &[&str] = &["zoomfile", "file", "data-original", "data-src", "src"];

/// Extracts image URLs from listing pages
#[derive(Debug, Clone)]
pub struct ImageExtractor {
    selector: Selector,
}

impl ImageExtractor {
    /// Creates an extractor for a CSS selector
    ///
    /// # Returns
    ///
    /// * `Ok(ImageExtractor)` - The selector parsed
    /// * `Err(ConfigError::InvalidSelector)` - The selector is not valid CSS
    pub fn new(selector: &str) -> Result<Self, ConfigError> {
        let selector = Selector::parse(selector)
            .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))?;
        Ok(Self { selector })
    }

    /// Returns the absolute image URLs on a page, in document order, without repeats
    ///
    /// # Extraction Rules
    ///
    /// **Include:**
    /// - The first of `zoomfile`, `file`, `data-original`, `data-src`, `src`
    ///   present on each matched element
    /// - Relative references, resolved against `base_url`
    ///
    /// **Exclude:**
    /// - `data:` URIs and other non-HTTP schemes
    /// - Empty attributes
    ///
    /// # Example
    ///
    /// ```
    /// use board_harvest::crawler::ImageExtractor;
    /// use url::Url;
    ///
    /// let html = r#"<div><img class="post" src="/a.jpg"><img src="/logo.png"></div>"#;
    /// let base = Url::parse("https://bbs.example.com/board?page=1").unwrap();
    /// let urls = ImageExtractor::new("img.post").unwrap().extract(html, &base);
    /// assert_eq!(urls[0].as_str(), "https://bbs.example.com/a.jpg");
    /// assert_eq!(urls.len(), 1);
    /// ```
    pub fn extract(&self, html: &str, base_url: &Url) -> Vec<Url> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        for element in document.select(&self.selector) {
            let reference = IMAGE_ATTRIBUTES
                .iter()
                .filter_map(|attr| element.value().attr(attr))
                .map(str::trim)
                .find(|value| !value.is_empty() && !value.starts_with("data:"));

            let Some(reference) = reference else {
                continue;
            };

            if let Some(url) = resolve_reference(base_url, reference) {
                if seen.insert(url.to_string()) {
                    urls.push(url);
                }
            }
        }

        urls
    }
}

/// Lowercase extension of the last path segment, if it has one
pub fn extension_of(path: &str) -> Option<&str> {
    let segment = path.rsplit('/').next()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 {
        None
    } else {
        Some(ext)
    }
}
