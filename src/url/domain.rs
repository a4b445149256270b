use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use board_harvest::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Canonicalizes a configured site into the host used in checkpoint keys
///
/// Accepts either a bare host ("bbs.example.com") or a full URL
/// ("https://bbs.example.com/forum"); both map to "bbs.example.com".
/// Inputs that do not parse as a host are returned trimmed and lowercased.
pub fn canonical_site(site: &str) -> String {
    let trimmed = site.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    match Url::parse(&candidate) {
        Ok(url) => match (extract_domain(&url), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host,
            (None, _) => trimmed.to_lowercase(),
        },
        Err(_) => trimmed.to_lowercase(),
    }
}
