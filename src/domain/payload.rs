//! Traceability payload decoding
//!
//! Payload (GS1-style Data Matrix, no separators):
//! - 1 prefix byte (capture library artifact, discarded)
//! - "010" + 13-digit product code (AI 01, leading zero)
//! - "17" + YYMMDD expiry (AI 17)
//! - "10" + lot, `[A-Z0-9]+` to end of input (AI 10)
//!
//! Anything that is not an exact full-string match degrades to a bare
//! product code; only a blank payload is an error. Traceability codes are
//! optional on packaging, so the fallback path is the common one.

use crate::domain::types::{DecodedCode, ExpiryDate, ProductCode};
use thiserror::Error;

// Application identifiers as they appear on the wire
const AI_PRODUCT: &[u8] = b"010";
const AI_EXPIRY: &[u8] = b"17";
const AI_LOT: &[u8] = b"10";

const PRODUCT_CODE_LEN: usize = 13;
const DATE_LEN: usize = 6;

/// Minimum payload length: prefix + AIs + product code + date + 1 lot char
const MIN_TRACEABILITY_LEN: usize =
    1 + AI_PRODUCT.len() + PRODUCT_CODE_LEN + AI_EXPIRY.len() + DATE_LEN + AI_LOT.len() + 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Blank payload (cancelled or empty capture)
    #[error("empty scan payload")]
    Empty,
}

/// Decode a raw scan payload.
///
/// Pure and stateless: a full-string traceability match yields
/// `Traceability`, any other non-blank input is passed through verbatim as
/// `Bare` (digit-count validation is the resolver's job), blank input is
/// `DecodeError::Empty`.
pub fn decode(raw: &str) -> Result<DecodedCode, DecodeError> {
    if raw.trim().is_empty() {
        return Err(DecodeError::Empty);
    }

    match parse_traceability(raw) {
        Some(decoded) => Ok(decoded),
        None => Ok(DecodedCode::Bare { product_code: ProductCode(raw.to_string()) }),
    }
}

/// Parse the strict traceability grammar. Returns None on any deviation.
fn parse_traceability(raw: &str) -> Option<DecodedCode> {
    let bytes = raw.as_bytes();
    if bytes.len() < MIN_TRACEABILITY_LEN {
        return None;
    }

    // One prefix byte of any value, then AI 01 with its leading zero
    let mut cursor = 1;
    cursor = expect(bytes, cursor, AI_PRODUCT)?;

    let product_code = take_digits(bytes, cursor, PRODUCT_CODE_LEN)?;
    cursor += PRODUCT_CODE_LEN;

    cursor = expect(bytes, cursor, AI_EXPIRY)?;
    let year = take_digits_u16(bytes, cursor, 2)?;
    let month = take_digits_u16(bytes, cursor + 2, 2)? as u8;
    let day = take_digits_u16(bytes, cursor + 4, 2)? as u8;
    cursor += DATE_LEN;

    // An out-of-range month would break the ExpiryDate invariant; treat it
    // like any other grammar deviation
    if !(1..=12).contains(&month) {
        return None;
    }

    cursor = expect(bytes, cursor, AI_LOT)?;
    let lot = &bytes[cursor..];
    if lot.is_empty() || !lot.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
        return None;
    }

    Some(DecodedCode::Traceability {
        product_code: ProductCode(product_code),
        expiry: ExpiryDate { year: 2000 + year, month, day },
        // Lot bytes were just validated as ASCII
        lot: String::from_utf8_lossy(lot).into_owned(),
    })
}

/// Match a literal token at `cursor`, returning the position after it
fn expect(bytes: &[u8], cursor: usize, token: &[u8]) -> Option<usize> {
    let end = cursor + token.len();
    if bytes.len() >= end && &bytes[cursor..end] == token {
        Some(end)
    } else {
        None
    }
}

/// Extract exactly `len` ASCII digits starting at `cursor`
fn take_digits(bytes: &[u8], cursor: usize, len: usize) -> Option<String> {
    let end = cursor + len;
    if bytes.len() < end {
        return None;
    }
    let slice = &bytes[cursor..end];
    if !slice.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(String::from_utf8_lossy(slice).into_owned())
}

/// Extract `len` ASCII digits as a number
fn take_digits_u16(bytes: &[u8], cursor: usize, len: usize) -> Option<u16> {
    take_digits(bytes, cursor, len)?.parse().ok()
}
