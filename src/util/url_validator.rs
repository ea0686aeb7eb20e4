use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    /// Plain HTTP to a non-local host.
    #[error("Insecure URL: {0} (HTTPS required except for localhost)")]
    Insecure(String),
}

/// Parse a web address: absolute, `http` or `https`, with a host.
///
/// ```
/// use smartmarks::util::parse_web_url;
///
/// assert!(parse_web_url("https://example.com").is_ok());
/// assert!(parse_web_url("not-a-url").is_err());
/// assert!(parse_web_url("ftp://example.com").is_err());
/// ```
pub fn parse_web_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}

/// Check a stored bookmark URL before handing it to the system browser.
///
/// Rows arrive from the backend, not only from this client's validated form,
/// so `javascript:`, `file:` and the like are refused here as well.
pub fn validate_url_for_open(url_str: &str) -> Result<Url, UrlValidationError> {
    parse_web_url(url_str.trim())
}

/// Validate the backend base URL from configuration.
///
/// HTTPS is required, except for loopback hosts used in local development.
pub fn validate_backend_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = parse_web_url(url_str)?;
    if url.scheme() == "http" && !is_loopback_host(&url) {
        return Err(UrlValidationError::Insecure(url_str.to_owned()));
    }
    Ok(url)
}

fn is_loopback_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    if host == "localhost" {
        return true;
    }

    // Strip brackets from IPv6 addresses for parsing
    let host_for_parse = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    host_for_parse
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
