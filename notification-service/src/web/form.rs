//! Strict `application/x-www-form-urlencoded` decoding.
//!
//! Malformed percent escapes and `;` separators are errors, so a garbled
//! body is rejected rather than silently signed over something the provider
//! never sent. Decoded keys and values stay raw bytes: the provider signs
//! whatever bytes it sent, UTF-8 or not.

use std::collections::BTreeMap;

use percent_encoding::percent_decode;
use thiserror::Error;

/// Decoded form parameters, first value per key, in ascending byte order.
pub type FormParams = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("invalid percent escape at byte {0}")]
    InvalidEscape(usize),
    #[error("invalid semicolon separator")]
    Semicolon,
}

/// Decode `input` into key/value pairs in the order they appear.
///
/// Empty segments (`a=1&&b=2`) are skipped. A segment without `=` yields
/// an empty value.
pub fn parse(input: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, FormError> {
    validate(input)?;

    Ok(input
        .split(|&b| b == b'&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.iter().position(|&b| b == b'=') {
            Some(eq) => (decode(&segment[..eq]), decode(&segment[eq + 1..])),
            None => (decode(segment), Vec::new()),
        })
        .collect())
}

/// Keep the first value seen for every key.
pub fn first_values(pairs: Vec<(Vec<u8>, Vec<u8>)>) -> FormParams {
    let mut params = BTreeMap::new();
    for (key, value) in pairs {
        params.entry(key).or_insert(value);
    }
    params
}

/// Reject input a lenient decoder would pass through unchanged.
fn validate(input: &[u8]) -> Result<(), FormError> {
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b';' => return Err(FormError::Semicolon),
            b'%' => {
                let escape = input.get(i + 1..i + 3);
                if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                    return Err(FormError::InvalidEscape(i));
                }
                i += 3;
            }
            _ => i += 1,
        }
    }
    Ok(())
}

fn decode(raw: &[u8]) -> Vec<u8> {
    let spaced: Vec<u8> = raw
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    percent_decode(&spaced).collect()
}
