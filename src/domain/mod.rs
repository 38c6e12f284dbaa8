//! Domain models - payload decoding and core scan types
//!
//! This module contains the canonical data types used throughout the system:
//! - `DecodedCode` - result of decoding a raw scan payload
//! - `ScanRecord` - one immutable history entry
//! - `Product`/`Substance`/`Interaction` - resolved reference entities
//! - `RawScan`/`ScanCommand` - capture outcomes and session commands

pub mod payload;
pub mod types;
