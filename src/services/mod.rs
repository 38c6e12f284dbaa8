//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `session` - Central scan orchestrator (decode, resolve, aggregate, commit)
//! - `history` - Ordered scan history owned by the session
//! - `aggregator` - Batched interaction aggregation against the history

pub mod aggregator;
pub mod history;
pub mod session;

// Re-export commonly used types
pub use aggregator::{AggregationError, InteractionAggregator};
pub use history::ScanHistory;
pub use session::{ScanError, ScanOutcome, ScanSession};
