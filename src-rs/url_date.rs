//! Recovers the snapshot date the viewer embeds in its `data=` URL
//! parameter. The parameter is undocumented; every surprise is a miss,
//! never an error.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::NaiveDate;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("static regex"))
}

pub fn extract_date(url: &str) -> Option<NaiveDate> {
    let Some(raw) = data_param(url) else {
        log::warn!("no `data` parameter in {url}");
        return None;
    };
    let decoded = decode_lenient(&raw);
    let text = String::from_utf8_lossy(&decoded).replace('\u{FFFD}', "");
    let date = find_iso_date(&text);
    if date.is_none() {
        log::warn!("no date found in decoded `data` parameter");
    }
    date
}

/// The still percent-encoded value of `data=`, found in the path (where the
/// viewer writes it) or else in the query string. Ends at `&`.
fn data_param(url: &str) -> Option<String> {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::warn!("unparseable URL {url}: {err}");
            return None;
        }
    };
    if let Some((_, rest)) = parsed.path().split_once("data=") {
        let value = rest.split('&').next().unwrap_or_default();
        return Some(value.to_string());
    }
    parsed.query().and_then(|query| {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("data="))
            .map(str::to_string)
    })
}

/// First `YYYY-MM-DD` in `text` that is a real calendar date.
pub fn find_iso_date(text: &str) -> Option<NaiveDate> {
    iso_date_re()
        .find_iter(text)
        .find_map(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok())
}

/// Base64 decode that never fails: percent escapes are resolved, URL-safe
/// characters are mapped to the standard alphabet, anything else outside
/// the alphabet is dropped, a dangling single character is discarded and
/// the remainder is padded before decoding.
pub fn decode_lenient(encoded: &str) -> Vec<u8> {
    let mut cleaned: String = percent_decode_str(encoded)
        .decode_utf8_lossy()
        .chars()
        .filter_map(|ch| match ch {
            '-' => Some('+'),
            '_' => Some('/'),
            c if c.is_ascii_alphanumeric() || c == '+' || c == '/' => Some(c),
            _ => None,
        })
        .collect();
    if cleaned.len() % 4 == 1 {
        cleaned.pop();
    }
    while cleaned.len() % 4 != 0 {
        cleaned.push('=');
    }
    LENIENT.decode(cleaned.as_bytes()).unwrap_or_default()
}
