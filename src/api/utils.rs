//! API utility functions
//!
//! Pure, stateless helpers for HTTP request processing, extracted for unit
//! testing and reuse across handlers.

use std::collections::BTreeMap;

use crate::api::error::ApiError;

/// Parses and validates Content-Type header for application/json
///
/// Accepts `application/json` (optionally with a charset parameter); rejects
/// everything else, including `text/json` and `application/json-patch+json`.
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Validates that body size does not exceed the maximum allowed size
pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

/// Parse an application/x-www-form-urlencoded body (webhook dialect)
pub fn parse_form(body: &str) -> BTreeMap<String, String> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((percent_decode(key)?, percent_decode(value)?))
        })
        .collect()
}

/// Minimal percent decoding: `+` is a space, `%XX` is a byte
fn percent_decode(input: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(input.len());
    let mut rest = input.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        match byte {
            b'+' => {
                bytes.push(b' ');
                rest = tail;
            }
            b'%' => {
                let hex = tail.get(..2)?;
                let value = u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?;
                bytes.push(value);
                rest = &tail[2..];
            }
            _ => {
                bytes.push(byte);
                rest = tail;
            }
        }
    }
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_type_valid() {
        assert!(parse_content_type("application/json").is_ok());
        assert!(parse_content_type("application/json; charset=utf-8").is_ok());
    }

    #[test]
    fn test_parse_content_type_invalid() {
        assert!(parse_content_type("application/jsonp").is_err());
        assert!(parse_content_type("application/json-patch+json").is_err());
        assert!(parse_content_type("text/json").is_err());
        assert!(parse_content_type("").is_err());
    }

    #[test]
    fn test_validate_body_size() {
        let data = vec![0u8; 1000];
        assert!(validate_body_size(&data, 1000).is_ok());
        assert!(matches!(
            validate_body_size(&data, 999),
            Err(ApiError::PayloadTooLarge(1000))
        ));
    }

    #[test]
    fn test_parse_form_basic() {
        let form = parse_form("From=%2B15551230000&Body=hello+world");
        assert_eq!(form["From"], "+15551230000");
        assert_eq!(form["Body"], "hello world");
    }

    #[test]
    fn test_parse_form_url_value() {
        let form = parse_form("Body=https%3A%2F%2Fboards.example.com%2Facme%2Fstaff");
        assert_eq!(form["Body"], "https://boards.example.com/acme/staff");
    }

    #[test]
    fn test_parse_form_edge_cases() {
        assert!(parse_form("").is_empty());
        let form = parse_form("novalue&key=");
        assert_eq!(form["novalue"], "");
        assert_eq!(form["key"], "");
        // Truncated escapes drop the pair instead of panicking
        let form = parse_form("bad=%2&ok=1");
        assert!(!form.contains_key("bad"));
        assert_eq!(form["ok"], "1");
    }
}
