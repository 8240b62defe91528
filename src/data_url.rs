//! Building and taking apart `data:` URLs.

use std::sync::LazyLock;

use base64::{Engine as _, prelude::BASE64_STANDARD};
use regex::Regex;

/// Regex for parsing a base64 `data:` URL.
static DATA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:(?P<mime_type>[^;,]+);base64,(?P<data>.*)$")
        .expect("failed to compile regex")
});

/// Convert binary data to a `data:` URL.
pub fn data_url(mime_type: &str, data: &[u8]) -> String {
    // Mistral expects the raw Base64 payload here. Percent-encoding it breaks
    // the request.
    format!("data:{};base64,{}", mime_type, BASE64_STANDARD.encode(data))
}

/// Parse a `data:` URL into a MIME type and Base64-encoded data.
pub fn parse_data_url(data_url: &str) -> Option<(&str, &str)> {
    let caps = DATA_URL_RE.captures(data_url)?;
    let mime_type = caps.name("mime_type")?.as_str();
    let data = caps.name("data")?.as_str();
    Some((mime_type, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_is_parseable() {
        let url = data_url("application/pdf", b"%PDF-1.7");
        assert_eq!(url, "data:application/pdf;base64,JVBERi0xLjc=");
        let (mime_type, data) = parse_data_url(&url).unwrap();
        assert_eq!(mime_type, "application/pdf");
        assert_eq!(BASE64_STANDARD.decode(data).unwrap(), b"%PDF-1.7");
    }

    #[test]
    fn test_plain_urls_are_not_data_urls() {
        assert!(parse_data_url("https://example.com/scan.png").is_none());
        assert!(parse_data_url("data:text/plain,hello").is_none());
    }
}
