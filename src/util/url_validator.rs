use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors from feed source URL validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL points at a loopback or private network address.
    #[error("Private or loopback address not allowed: {0}")]
    PrivateHost(String),
}

/// Validate an RSS source URL: absolute, http or https, with a host.
///
/// # Examples
///
/// ```
/// use sift::util::validate_source_url;
///
/// assert!(validate_source_url("https://example.com/feed.xml").is_ok());
/// assert!(validate_source_url("http://localhost:8080/feed.xml").is_ok());
/// assert!(validate_source_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_source_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_owned()));
    }
    if url.host_str().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}

/// Refuse loopback and private-range hosts.
///
/// Applies to URLs a hosted service will fetch on the user's behalf.
///
/// # Examples
///
/// ```
/// use sift::util::{check_public_host, validate_source_url};
///
/// let public = validate_source_url("https://example.com/rss").unwrap();
/// assert!(check_public_host(&public).is_ok());
/// let private = validate_source_url("http://10.0.0.1/rss").unwrap();
/// assert!(check_public_host(&private).is_err());
/// ```
pub fn check_public_host(url: &Url) -> Result<(), UrlValidationError> {
    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if host.eq_ignore_ascii_case("localhost") {
        return Err(UrlValidationError::PrivateHost(host.to_owned()));
    }

    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_non_public(&ip) {
            return Err(UrlValidationError::PrivateHost(ip.to_string()));
        }
    }

    Ok(())
}

fn is_non_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_urls_accepted() {
        let url = validate_source_url("https://example.com/feed.xml").unwrap();
        assert!(check_public_host(&url).is_ok());
        assert!(validate_source_url("http://news.example.org/rss").is_ok());
        assert!(validate_source_url("  https://example.com/atom  ").is_ok());
    }

    #[test]
    fn test_non_http_schemes_rejected() {
        assert!(matches!(
            validate_source_url("ftp://example.com/feed"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_relative_url_rejected() {
        assert!(matches!(
            validate_source_url("/feed.xml"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_private_hosts_are_valid_sources() {
        let url = validate_source_url("http://localhost:8080/feed.xml").unwrap();
        assert_eq!(url.port(), Some(8080));
        assert!(validate_source_url("http://192.168.1.10/rss").is_ok());
    }

    #[test]
    fn test_private_hosts_not_public() {
        for url in [
            "http://localhost/feed",
            "http://127.0.0.1/feed",
            "http://192.168.1.10/feed",
            "http://169.254.0.1/feed",
            "http://[::1]/feed",
            "http://[fd00::1]/feed",
        ] {
            assert!(
                matches!(
                    check_public_host(&validate_source_url(url).unwrap()),
                    Err(UrlValidationError::PrivateHost(_))
                ),
                "{url} should be rejected"
            );
        }
    }
}
