//! URL handling module for board-harvest
//!
//! This module provides URL normalization (the canonical form hashed by the URL
//! dedup tier), host extraction, and site-key canonicalization for checkpoints.

mod domain;
mod normalize;

// Re-export main functions
pub use domain::{canonical_site, extract_domain};
pub use normalize::{normalize_url, normalize_url_lossy};

use url::Url;

/// Resolves a possibly relative reference against a base URL
///
/// Returns `None` for references that cannot be joined or resolve to a
/// non-HTTP scheme (`data:`, `javascript:`, ...).
pub fn resolve_reference(base: &Url, reference: &str) -> Option<Url> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return None;
    }

    let joined = base.join(trimmed).ok()?;
    match joined.scheme() {
        "http" | "https" => Some(joined),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative() {
        let base = Url::parse("https://bbs.example.com/board/list?page=2").unwrap();
        let resolved = resolve_reference(&base, "/static/a.jpg").unwrap();
        assert_eq!(resolved.as_str(), "https://bbs.example.com/static/a.jpg");
    }

    #[test]
    fn test_resolve_protocol_relative() {
        let base = Url::parse("https://bbs.example.com/board").unwrap();
        let resolved = resolve_reference(&base, "//cdn.example.com/a.png").unwrap();
        assert_eq!(resolved.as_str(), "https://cdn.example.com/a.png");
    }

    #[test]
    fn test_resolve_rejects_data_uri() {
        let base = Url::parse("https://bbs.example.com/").unwrap();
        assert!(resolve_reference(&base, "data:image/png;base64,AAAA").is_none());
        assert!(resolve_reference(&base, "   ").is_none());
    }
}
