//! Scan record egress - hands committed scans to the persistent store
//!
//! Records are written in JSONL format (one JSON object per line) to the
//! file specified in config. Durability beyond the append is the store's
//! concern, not ours.

use crate::domain::types::ScanRecord;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Egress writer for committed scan records
pub struct Egress {
    file_path: String,
}

impl Egress {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "egress_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write a record to the egress file
    /// Returns true if successful, false otherwise
    pub fn write_record(&self, record: &ScanRecord) -> bool {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                error!(record_id = %record.id, error = %e, "record_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                info!(
                    record_id = %record.id,
                    code = %record.product_code,
                    "record_egressed"
                );
                true
            }
            Err(e) => {
                error!(
                    record_id = %record.id,
                    error = %e,
                    "record_egress_failed"
                );
                false
            }
        }
    }

    /// Append a line to the egress file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "egress_written");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{DecodedCode, ExpiryDate, ScanRecord};
    use std::fs;
    use tempfile::tempdir;

    fn sample_record() -> ScanRecord {
        let decoded = DecodedCode::Traceability {
            product_code: "3400930000120".into(),
            expiry: ExpiryDate { year: 2027, month: 3, day: 31 },
            lot: "A11111".to_string(),
        };
        ScanRecord::from_decoded(&decoded)
    }

    #[test]
    fn test_egress_new() {
        let egress = Egress::new("records.jsonl");
        assert_eq!(egress.file_path, "records.jsonl");
    }

    #[test]
    fn test_write_record_round_trips() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("records.jsonl");
        let egress = Egress::new(file_path.to_str().unwrap());

        let record = sample_record();
        assert!(egress.write_record(&record));

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));

        let parsed: ScanRecord = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_append_mode() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("records.jsonl");
        let egress = Egress::new(file_path.to_str().unwrap());

        egress.write_record(&sample_record());
        egress.write_record(&sample_record());

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content.lines().count(), 2);
        for line in content.lines() {
            let _parsed: ScanRecord = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("dir").join("records.jsonl");
        let egress = Egress::new(nested.to_str().unwrap());

        assert!(egress.write_record(&sample_record()));
        assert!(nested.exists());
    }
}
