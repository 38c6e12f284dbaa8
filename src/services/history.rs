//! Session scan history
//!
//! An ordered, append-only-except-clear collection of accepted scans.
//! Insertion order is scan order (oldest first) and is the sole source of
//! truth for the history of product codes the aggregator compares against.
//! Records are immutable once appended; `clear` removes everything
//! atomically. Mutation is serialized by the session actor that owns this
//! instance.

use crate::domain::types::{ProductCode, ScanRecord};

#[derive(Debug, Default)]
pub struct ScanHistory {
    records: Vec<ScanRecord>,
}

impl ScanHistory {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    /// Append a record to the end. Always succeeds; O(1) amortized.
    pub fn append(&mut self, record: ScanRecord) {
        self.records.push(record);
    }

    /// Ordered product codes for every record currently held.
    /// Computed at call time, never memoized across mutation.
    pub fn codes(&self) -> Vec<ProductCode> {
        self.records.iter().map(|r| r.product_code.clone()).collect()
    }

    /// Remove all records atomically
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Full ordered view, for egress and external rendering
    pub fn all(&self) -> &[ScanRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&ScanRecord> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::epoch_ms;

    fn record(code: &str) -> ScanRecord {
        ScanRecord {
            id: crate::domain::types::new_uuid_v7(),
            product_code: code.into(),
            scanned_at: epoch_ms(),
            expiry: None,
            lot: None,
        }
    }

    #[test]
    fn test_append_preserves_order() {
        let mut history = ScanHistory::new();
        history.append(record("3400930000120"));
        history.append(record("3400935955838"));
        history.append(record("3400930000120"));

        let codes = history.codes();
        assert_eq!(
            codes,
            vec![
                ProductCode("3400930000120".to_string()),
                ProductCode("3400935955838".to_string()),
                ProductCode("3400930000120".to_string()),
            ]
        );
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_codes_reflects_state_at_call_time() {
        let mut history = ScanHistory::new();
        assert!(history.codes().is_empty());

        history.append(record("3400930000120"));
        assert_eq!(history.codes().len(), 1);

        history.append(record("3400935955838"));
        assert_eq!(history.codes().len(), 2);
    }

    #[test]
    fn test_clear_removes_everything() {
        let mut history = ScanHistory::new();
        history.append(record("3400930000120"));
        history.append(record("3400935955838"));

        history.clear();

        assert!(history.is_empty());
        assert!(history.codes().is_empty());
        assert!(history.all().is_empty());
    }

    #[test]
    fn test_append_after_clear() {
        let mut history = ScanHistory::new();
        history.append(record("3400930000120"));
        history.clear();
        history.append(record("3400935955838"));

        assert_eq!(history.codes(), vec![ProductCode("3400935955838".to_string())]);
    }

    #[test]
    fn test_get_by_index() {
        let mut history = ScanHistory::new();
        history.append(record("3400930000120"));

        assert_eq!(history.get(0).unwrap().product_code.as_str(), "3400930000120");
        assert!(history.get(1).is_none());
    }
}
