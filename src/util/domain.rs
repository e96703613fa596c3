use std::net::Ipv6Addr;
use url::Url;

/// Normalizes a hostname into the key used by the watcher.
///
/// Trims whitespace, lowercases, and drops a trailing root dot. Input that is
/// empty or contains URL syntax (scheme, path, port, whitespace) is refused so
/// that `example.com` and `https://example.com/` never become two keys.
/// IPv6 hosts are accepted only in bracketed form (`[2001:db8::1]`) and are
/// stored in their canonical compressed spelling.
///
/// ```
/// use feedwatch::util::normalize_domain;
///
/// assert_eq!(normalize_domain(" Example.COM. ").as_deref(), Some("example.com"));
/// assert_eq!(normalize_domain("https://example.com"), None);
/// ```
pub fn normalize_domain(input: &str) -> Option<String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return None;
    }

    // Bracketed IPv6 literal, as `Url::host_str` reports it
    if let Some(inner) = trimmed.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        let addr = inner.parse::<Ipv6Addr>().ok()?;
        return Some(format!("[{}]", addr));
    }

    let invalid = trimmed
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | ':' | '@' | '?' | '#'));
    if invalid {
        return None;
    }

    Some(trimmed.to_lowercase())
}

/// Extracts the normalized domain from a page or favorite URL.
///
/// Pages without a host (`about:blank`, `data:` URLs) yield `None`.
pub fn domain_from_url(page_url: &str) -> Option<String> {
    let url = Url::parse(page_url.trim()).ok()?;
    normalize_domain(url.host_str()?)
}

/// Resolves a feed link reported by a page against the page's own URL.
///
/// Handles absolute, protocol-relative and relative hrefs. Returns `None` when
/// the result is not a parseable URL.
pub fn resolve_link(href: &str, page_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    if let Ok(absolute) = Url::parse(href) {
        return Some(absolute.to_string());
    }

    // Relative and protocol-relative links: resolve against the page
    let base = Url::parse(page_url.trim()).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}
