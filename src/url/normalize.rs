use crate::UrlError;
use url::Url;

/// Query parameters that never change which resource is served
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
    "spm",
    "from",
];

/// Normalizes a URL into the canonical form used for URL-tier deduplication
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Lowercase the host and remove a `www.` prefix
/// 3. Normalize the path: drop empty and `.` segments, resolve `..`,
///    remove a trailing slash (except for root)
/// 4. Remove the fragment
/// 5. Remove tracking query parameters and sort the rest by key
///
/// The scheme is kept as-is: image hosts frequently serve plain HTTP.
///
/// # Examples
///
/// ```
/// use board_harvest::url::normalize_url;
///
/// let url = normalize_url("https://WWW.EXAMPLE.COM/img/a.jpg?b=2&a=1#x").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/img/a.jpg?a=1&b=2");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url.host_str().ok_or(UrlError::MissingDomain)?;
    let mut normalized_host = host.to_lowercase();
    if let Some(stripped) = normalized_host.strip_prefix("www.") {
        normalized_host = stripped.to_string();
    }
    url.set_host(Some(&normalized_host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let filtered_params = filter_and_sort_query_params(&url);

        if filtered_params.is_empty() {
            url.set_query(None);
        } else {
            let query_string = filtered_params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query_string));
        }
    }

    Ok(url)
}

/// Normalizes a URL, falling back to the trimmed input for non-URL keys
///
/// Task keys are not always URLs (content identifiers, article ids), but
/// the URL tier must still hash them consistently.
pub fn normalize_url_lossy(key: &str) -> String {
    match normalize_url(key) {
        Ok(url) => url.to_string(),
        Err(_) => key.trim().to_string(),
    }
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", segments.join("/"))
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort();
    params
}

/// Checks if a query parameter is a tracking parameter
fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_scheme() {
        let result = normalize_url("http://example.com/a.jpg").unwrap();
        assert_eq!(result.as_str(), "http://example.com/a.jpg");
    }

    #[test]
    fn test_remove_www() {
        let result = normalize_url("https://www.example.com/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_remove_trailing_slash() {
        let result = normalize_url("https://example.com/page/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize_url("https://example.com/a.png#zoom").unwrap();
        assert_eq!(result.as_str(), "https://example.com/a.png");
    }

    #[test]
    fn test_remove_tracking_params() {
        let result = normalize_url("https://example.com/a.png?utm_source=feed&spm=1.2").unwrap();
        assert_eq!(result.as_str(), "https://example.com/a.png");
    }

    #[test]
    fn test_sort_query_params() {
        let result = normalize_url("https://example.com/img?w=2&id=1").unwrap();
        assert_eq!(result.as_str(), "https://example.com/img?id=1&w=2");
    }

    #[test]
    fn test_normalize_path_with_dots() {
        let result = normalize_url("https://example.com/a/../b/./c.jpg").unwrap();
        assert_eq!(result.as_str(), "https://example.com/b/c.jpg");
    }

    #[test]
    fn test_lowercase_host_only() {
        let result = normalize_url("https://EXAMPLE.COM/Img/A.JPG").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Img/A.JPG");
    }

    #[test]
    fn test_equivalent_urls_normalize_equal() {
        let a = normalize_url("https://www.example.com//img/x.jpg?utm_medium=e#top").unwrap();
        let b = normalize_url("https://example.com/img/x.jpg").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://example.com/page");
        assert!(matches!(result, Err(UrlError::InvalidScheme(_))));
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(normalize_url("not a url"), Err(UrlError::Parse(_))));
    }

    #[test]
    fn test_empty_path_becomes_root() {
        let result = normalize_url("https://example.com").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_lossy_falls_back_for_identifiers() {
        assert_eq!(normalize_url_lossy("  article-1234 "), "article-1234");
        assert_eq!(
            normalize_url_lossy("https://WWW.example.com/x.jpg"),
            "https://example.com/x.jpg"
        );
    }
}
