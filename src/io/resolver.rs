//! Product reference lookup
//!
//! Maps a scanned product code to product metadata (name + active
//! substance). The reference table is external; this module only defines
//! the boundary and ships a JSON-file-backed implementation for the table
//! the service is deployed with.

use crate::domain::types::{Product, ProductCode};
use anyhow::Context;
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::info;

/// Boundary to the medication reference table.
///
/// A miss is not fatal to the service, only to the scan event that
/// produced the code.
pub trait ProductResolver: Send + Sync {
    fn resolve(&self, code: &ProductCode) -> Option<Product>;
}

/// In-memory product table loaded from a JSON file at startup.
///
/// File format: a JSON array of products,
/// `[{"code": "...", "name": "...", "substance": {"code": "...", "name": "..."}}]`.
pub struct JsonProductDb {
    products: FxHashMap<ProductCode, Product>,
}

impl JsonProductDb {
    /// Load the table from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read product table {}", path.display()))?;

        let products: Vec<Product> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse product table {}", path.display()))?;

        info!(file = %path.display(), products = %products.len(), "product_table_loaded");
        Ok(Self::from_products(products))
    }

    /// Build a table from already-parsed products (tests, embedded tables)
    pub fn from_products(products: Vec<Product>) -> Self {
        let products =
            products.into_iter().map(|p| (p.code.clone(), p)).collect::<FxHashMap<_, _>>();
        Self { products }
    }

    /// Empty table; every resolve misses
    pub fn empty() -> Self {
        Self { products: FxHashMap::default() }
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl ProductResolver for JsonProductDb {
    fn resolve(&self, code: &ProductCode) -> Option<Product> {
        self.products.get(code).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Substance, SubstanceCode};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample_product(code: &str, substance: &str) -> Product {
        Product {
            code: code.into(),
            name: format!("Product {code}"),
            substance: Substance {
                code: SubstanceCode(substance.to_string()),
                name: format!("Substance {substance}"),
                interactions: Vec::new(),
            },
        }
    }

    #[test]
    fn test_resolve_hit_and_miss() {
        let db = JsonProductDb::from_products(vec![sample_product("3400930000120", "60002283")]);

        let product = db.resolve(&"3400930000120".into()).unwrap();
        assert_eq!(product.name, "Product 3400930000120");
        assert_eq!(product.substance.code.as_str(), "60002283");
        assert!(product.substance.interactions.is_empty());

        assert!(db.resolve(&"0000000000000".into()).is_none());
    }

    #[test]
    fn test_load_from_json_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let json = r#"[
            {
                "code": "3400930000120",
                "name": "Doliprane 1000mg",
                "substance": {"code": "60002283", "name": "Paracetamol"}
            },
            {
                "code": "3400935955838",
                "name": "Previscan 20mg",
                "substance": {"code": "64372098", "name": "Fluindione"}
            }
        ]"#;
        temp_file.write_all(json.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let db = JsonProductDb::from_file(temp_file.path()).unwrap();
        assert_eq!(db.len(), 2);

        let product = db.resolve(&"3400935955838".into()).unwrap();
        assert_eq!(product.name, "Previscan 20mg");
        assert_eq!(product.substance.name, "Fluindione");
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(JsonProductDb::from_file("/nonexistent/products.json").is_err());
    }

    #[test]
    fn test_empty_table() {
        let db = JsonProductDb::empty();
        assert!(db.is_empty());
        assert!(db.resolve(&"3400930000120".into()).is_none());
    }
}
