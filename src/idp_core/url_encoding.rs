//! `application/x-www-form-urlencoded` helpers for query strings, form bodies
//! and redirect locations.

use std::str::Utf8Error;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Unreserved characters stay literal; everything else is escaped.
const FORM_URLENCODE_SET: &AsciiSet =
    &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Encodes a string for URL safety and returns an owned `String`.
///
/// ```
/// use starberry_idp::idp_core::url_encoding::encode_url_owned;
/// assert_eq!(encode_url_owned("a b/c"), "a%20b%2Fc");
/// ```
pub fn encode_url_owned(input: &str) -> String {
    utf8_percent_encode(input, FORM_URLENCODE_SET).to_string()
}

/// Decodes a form-encoded value, treating `+` as a space.
///
/// Bytes that do not form valid UTF-8 are an error rather than being replaced,
/// so distinct secrets can never decode to the same string.
pub fn decode_form_value(input: &str) -> Result<String, Utf8Error> {
    let spaced = input.replace('+', " ");
    Ok(percent_decode_str(&spaced).decode_utf8()?.into_owned())
}

/// Parses `a=1&b=2` into decoded pairs, preserving order. Empty segments are skipped.
pub fn parse_pairs(input: &str) -> Result<Vec<(String, String)>, Utf8Error> {
    input
        .trim_start_matches('?')
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((k, v)) => Ok((decode_form_value(k)?, decode_form_value(v)?)),
            None => Ok((decode_form_value(segment)?, String::new())),
        })
        .collect()
}

/// Encodes pairs as `a=1&b=2`.
pub fn encode_pairs<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode_url_owned(k.as_ref()), encode_url_owned(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&")
}

/// Appends parameters to a URI that may already carry a query string.
pub fn append_query<K: AsRef<str>, V: AsRef<str>>(base: &str, pairs: &[(K, V)]) -> String {
    if pairs.is_empty() {
        return base.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, encode_pairs(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_form_bodies() {
        let pairs = parse_pairs(
            "grant_type=authorization_code&redirect_uri=https%3A%2F%2Fapp%2Fcb\
             &scope=openid+profile&flag",
        )
        .unwrap();
        assert_eq!(
            pairs,
            vec![
                ("grant_type".to_string(), "authorization_code".to_string()),
                ("redirect_uri".to_string(), "https://app/cb".to_string()),
                ("scope".to_string(), "openid profile".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert!(decode_form_value("%FF").is_err());
        assert!(decode_form_value("%FE").is_err());
        assert!(parse_pairs("client_secret=a%C3").is_err());
        assert_eq!(decode_form_value("caf%C3%A9").unwrap(), "café");
    }

    #[test]
    fn appends_to_existing_query() {
        assert_eq!(append_query("https://app/cb", &[("code", "a b")]), "https://app/cb?code=a%20b");
        assert_eq!(
            append_query("https://app/cb?x=1", &[("state", "s")]),
            "https://app/cb?x=1&state=s"
        );
        assert_eq!(append_query::<&str, &str>("https://app/cb", &[]), "https://app/cb");
    }
}
