//! Turns the path-embedded source URL into a fetchable `http(s)` URL.

use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("missing source url")]
    Empty,
    #[error("invalid source url {url:?}: {reason}")]
    Invalid { url: String, reason: String },
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
}

/// Normalize a raw source URL.
///
/// - surrounding whitespace is trimmed
/// - `https:/host` (a `//` merged by a proxy) is repaired to `https://host`
/// - a missing scheme defaults to `https://`
/// - only `http` and `https` are accepted
pub fn normalize(raw: &str) -> Result<Url, UrlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::Empty);
    }

    let candidate = match raw.split_once(':') {
        Some((scheme, rest)) if is_scheme(scheme) => {
            if rest.starts_with("//") {
                raw.to_string()
            } else if let Some(rest) = rest.strip_prefix('/') {
                format!("{scheme}://{rest}")
            } else if is_port(rest) {
                // `localhost:8080/x.png` is a host and port, not a scheme
                format!("https://{raw}")
            } else {
                raw.to_string()
            }
        }
        _ => format!("https://{raw}"),
    };

    let url = Url::parse(&candidate).map_err(|e| UrlError::Invalid {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(UrlError::UnsupportedScheme(other.to_string())),
    }
}

/// RFC 3986 scheme: a letter, then letters, digits, `+`, `-` or `.`.
fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn is_port(rest: &str) -> bool {
    let digits = rest.split(['/', '?', '#']).next().unwrap_or("");
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_defaults_to_https() {
        let url = normalize("example.com/cat.jpg").unwrap();
        assert_eq!(url.as_str(), "https://example.com/cat.jpg");
    }

    #[test]
    fn explicit_schemes_are_kept() {
        assert_eq!(
            normalize("http://example.com/a.png").unwrap().as_str(),
            "http://example.com/a.png"
        );
        assert_eq!(
            normalize("https://example.com/a.png").unwrap().as_str(),
            "https://example.com/a.png"
        );
    }

    #[test]
    fn collapsed_separator_is_repaired() {
        assert_eq!(
            normalize("https:/example.com/a.png").unwrap().as_str(),
            "https://example.com/a.png"
        );
        assert_eq!(
            normalize("http:/example.com/a.png").unwrap().as_str(),
            "http://example.com/a.png"
        );
    }

    #[test]
    fn host_with_port_is_not_a_scheme() {
        let url = normalize("localhost:8080/a.png").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn query_on_source_is_preserved() {
        let url = normalize("cdn.example.com/a.png?v=3").unwrap();
        assert_eq!(url.query(), Some("v=3"));
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert_eq!(
            normalize("ftp://example.com/a.png"),
            Err(UrlError::UnsupportedScheme("ftp".into()))
        );
        assert_eq!(
            normalize("file:///etc/passwd"),
            Err(UrlError::UnsupportedScheme("file".into()))
        );
    }

    #[test]
    fn empty_and_garbage() {
        assert_eq!(normalize("   "), Err(UrlError::Empty));
        assert!(matches!(
            normalize("https://exa mple.com"),
            Err(UrlError::Invalid { .. })
        ));
    }
}
