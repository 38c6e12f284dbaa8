//! Shared types for the mediscan gateway

use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Newtype wrapper for product codes (CIP13 or raw scanned text) to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductCode(pub String);

impl ProductCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProductCode {
    fn from(s: &str) -> Self {
        ProductCode(s.to_string())
    }
}

/// Newtype wrapper for substance codes to provide type safety.
/// Interactions are computed between substances, never between product codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubstanceCode(pub String);

impl SubstanceCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubstanceCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubstanceCode {
    fn from(s: &str) -> Self {
        SubstanceCode(s.to_string())
    }
}

/// Expiry date extracted from a traceability payload.
///
/// Year is built by prefixing "20" to the two-digit token; there is no
/// century rollover past 2099. The day is carried through from the payload
/// but consumers typically track expiry at month granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl ExpiryDate {
    /// Month-granularity expiry check: a pack expiring 06/2024 is considered
    /// expired from 07/2024 onward.
    pub fn is_expired(&self, today: chrono::NaiveDate) -> bool {
        use chrono::Datelike;
        (self.year as i32, self.month as u32) < (today.year(), today.month())
    }
}

impl std::fmt::Display for ExpiryDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Same rendering the packaging uses: MM/YYYY
        write!(f, "{:02}/{}", self.month, self.year)
    }
}

/// Result of decoding a raw scan payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedCode {
    /// A direct product code, no metadata attached
    Bare { product_code: ProductCode },
    /// Fully structured traceability record
    Traceability { product_code: ProductCode, expiry: ExpiryDate, lot: String },
}

impl DecodedCode {
    pub fn product_code(&self) -> &ProductCode {
        match self {
            DecodedCode::Bare { product_code } => product_code,
            DecodedCode::Traceability { product_code, .. } => product_code,
        }
    }

    pub fn expiry(&self) -> Option<ExpiryDate> {
        match self {
            DecodedCode::Bare { .. } => None,
            DecodedCode::Traceability { expiry, .. } => Some(*expiry),
        }
    }

    pub fn lot(&self) -> Option<&str> {
        match self {
            DecodedCode::Bare { .. } => None,
            DecodedCode::Traceability { lot, .. } => Some(lot),
        }
    }
}

/// An interaction warning between two substances.
/// Message and severity come from the external lookup service verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub target: SubstanceCode,
    pub other: SubstanceCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

/// Active substance a product belongs to.
/// The interaction list starts empty and is filled in by aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substance {
    pub code: SubstanceCode,
    pub name: String,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

/// Product metadata resolved from the reference table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub code: ProductCode,
    pub name: String,
    pub substance: Substance,
}

/// One history entry. Created exactly once per accepted scan and never
/// mutated afterwards; owned exclusively by ScanHistory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// UUIDv7 record id
    pub id: String,
    pub product_code: ProductCode,
    /// Epoch milliseconds at commit time
    pub scanned_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<ExpiryDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot: Option<String>,
}

impl ScanRecord {
    /// Build a record from decoded fields, stamping id and scan time
    pub fn from_decoded(decoded: &DecodedCode) -> Self {
        Self {
            id: new_uuid_v7(),
            product_code: decoded.product_code().clone(),
            scanned_at: epoch_ms(),
            expiry: decoded.expiry(),
            lot: decoded.lot().map(|l| l.to_string()),
        }
    }
}

/// Where a raw scan came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSource {
    Serial,
    Tcp,
    Mqtt,
}

impl ScanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanSource::Serial => "serial",
            ScanSource::Tcp => "tcp",
            ScanSource::Mqtt => "mqtt",
        }
    }
}

/// One capture outcome from a scan source.
/// `contents: None` means the capture was cancelled, not that it failed.
#[derive(Debug, Clone)]
pub struct RawScan {
    pub contents: Option<String>,
    pub source: ScanSource,
    pub received_at: Instant,
}

impl RawScan {
    pub fn new(contents: Option<String>, source: ScanSource) -> Self {
        Self { contents, source, received_at: Instant::now() }
    }
}

/// Commands consumed by the scan session actor
#[derive(Debug, Clone)]
pub enum ScanCommand {
    /// Process one capture outcome
    Scan(RawScan),
    /// Remove all history records atomically
    ClearHistory,
    /// Re-query interactions for the history entry at `index`
    Refresh { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_display() {
        let exp = ExpiryDate { year: 2024, month: 6, day: 15 };
        assert_eq!(exp.to_string(), "06/2024");
    }

    #[test]
    fn test_expiry_month_granularity() {
        let exp = ExpiryDate { year: 2024, month: 6, day: 15 };
        let same_month = chrono::NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let next_month = chrono::NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        assert!(!exp.is_expired(same_month));
        assert!(exp.is_expired(next_month));
    }

    #[test]
    fn test_decoded_code_accessors() {
        let bare = DecodedCode::Bare { product_code: "3400930000120".into() };
        assert_eq!(bare.product_code().as_str(), "3400930000120");
        assert_eq!(bare.expiry(), None);
        assert_eq!(bare.lot(), None);

        let full = DecodedCode::Traceability {
            product_code: "3400930000120".into(),
            expiry: ExpiryDate { year: 2024, month: 6, day: 15 },
            lot: "9X4Z1Q".to_string(),
        };
        assert_eq!(full.expiry().unwrap().year, 2024);
        assert_eq!(full.lot(), Some("9X4Z1Q"));
    }

    #[test]
    fn test_scan_record_from_decoded() {
        let decoded = DecodedCode::Traceability {
            product_code: "3400930000120".into(),
            expiry: ExpiryDate { year: 2027, month: 1, day: 31 },
            lot: "A11111".to_string(),
        };
        let record = ScanRecord::from_decoded(&decoded);
        assert_eq!(record.product_code.as_str(), "3400930000120");
        assert_eq!(record.lot.as_deref(), Some("A11111"));
        assert!(record.expiry.is_some());
        assert!(!record.id.is_empty());
        assert!(record.scanned_at > 0);
    }
}
