//! Interaction aggregation against the scan history
//!
//! One batched lookup per aggregation: the external service receives the
//! target substance and the history of other substances in a single query,
//! so the external-call cost stays O(1) per scan however long the history
//! grows. Pair de-duplication is part of the lookup's batched contract; the
//! aggregator passes the history through unfiltered (the target is already
//! excluded by how callers snapshot it).

use crate::domain::types::{Interaction, SubstanceCode};
use crate::io::interactions::{InteractionLookup, LookupError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("interaction lookup failed: {0}")]
    LookupFailed(#[source] LookupError),
}

pub struct InteractionAggregator {
    lookup: Arc<dyn InteractionLookup>,
}

impl InteractionAggregator {
    pub fn new(lookup: Arc<dyn InteractionLookup>) -> Self {
        Self { lookup }
    }

    /// Compute the interaction set between `target` and the history.
    ///
    /// `history` must not contain the target scan itself: on submit it is
    /// snapshotted before the history append, on refresh it is the codes of
    /// all other entries. Idempotent for fixed inputs as long as the lookup
    /// itself is deterministic.
    pub async fn aggregate(
        &self,
        target: &SubstanceCode,
        history: &[SubstanceCode],
    ) -> Result<Vec<Interaction>, AggregationError> {
        if history.is_empty() {
            // Nothing to interact with; skip the external call entirely
            return Ok(Vec::new());
        }

        let start = Instant::now();
        match self.lookup.lookup(target, history).await {
            Ok(interactions) => {
                debug!(
                    target = %target,
                    history_len = %history.len(),
                    interactions = %interactions.len(),
                    latency_us = %start.elapsed().as_micros() as u64,
                    "aggregation_ok"
                );
                Ok(interactions)
            }
            Err(e) => {
                warn!(
                    target = %target,
                    history_len = %history.len(),
                    latency_us = %start.elapsed().as_micros() as u64,
                    error = %e,
                    "aggregation_lookup_failed"
                );
                Err(AggregationError::LookupFailed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Records call count and echoes one interaction per history code
    struct EchoLookup {
        calls: AtomicU64,
    }

    impl EchoLookup {
        fn new() -> Self {
            Self { calls: AtomicU64::new(0) }
        }
    }

    #[async_trait]
    impl InteractionLookup for EchoLookup {
        async fn lookup(
            &self,
            target: &SubstanceCode,
            history: &[SubstanceCode],
        ) -> Result<Vec<Interaction>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(history
                .iter()
                .map(|other| Interaction {
                    target: target.clone(),
                    other: other.clone(),
                    message: format!("{target} with {other}"),
                    severity: None,
                })
                .collect())
        }
    }

    struct FailingLookup;

    #[async_trait]
    impl InteractionLookup for FailingLookup {
        async fn lookup(
            &self,
            _target: &SubstanceCode,
            _history: &[SubstanceCode],
        ) -> Result<Vec<Interaction>, LookupError> {
            Err(LookupError::Status(503))
        }
    }

    #[tokio::test]
    async fn test_single_batched_call() {
        let lookup = Arc::new(EchoLookup::new());
        let aggregator = InteractionAggregator::new(lookup.clone());

        let history: Vec<SubstanceCode> = vec!["A".into(), "B".into(), "C".into()];
        let result = aggregator.aggregate(&"T".into(), &history).await.unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_target_never_paired_with_itself() {
        let aggregator = InteractionAggregator::new(Arc::new(EchoLookup::new()));

        let target: SubstanceCode = "T".into();
        let history: Vec<SubstanceCode> = vec!["A".into(), "B".into()];
        let result = aggregator.aggregate(&target, &history).await.unwrap();

        assert!(result.iter().all(|i| i.other != target));
    }

    #[tokio::test]
    async fn test_empty_history_skips_lookup() {
        let lookup = Arc::new(EchoLookup::new());
        let aggregator = InteractionAggregator::new(lookup.clone());

        let result = aggregator.aggregate(&"T".into(), &[]).await.unwrap();

        assert!(result.is_empty());
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_idempotent_for_fixed_inputs() {
        let aggregator = InteractionAggregator::new(Arc::new(EchoLookup::new()));

        let history: Vec<SubstanceCode> = vec!["A".into(), "B".into()];
        let first = aggregator.aggregate(&"T".into(), &history).await.unwrap();
        let second = aggregator.aggregate(&"T".into(), &history).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_wrapped() {
        let aggregator = InteractionAggregator::new(Arc::new(FailingLookup));

        let history: Vec<SubstanceCode> = vec!["A".into()];
        let err = aggregator.aggregate(&"T".into(), &history).await.unwrap_err();

        assert!(matches!(err, AggregationError::LookupFailed(LookupError::Status(503))));
    }
}
