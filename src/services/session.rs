//! Scan session orchestration
//!
//! The session is the central processor for one scanning session. Each
//! accepted capture runs decode → resolve → aggregate → commit; the history
//! append always happens after that same scan's aggregation response, and
//! the command loop fully commits (or rejects) one scan before taking the
//! next, so a slow lookup can never attach its result to a different scan's
//! history position. The session owns the history exclusively; every
//! mutation goes through the command channel.

use crate::domain::payload::{self, DecodeError};
use crate::domain::types::{
    epoch_ms, Interaction, Product, ProductCode, ScanCommand, ScanRecord, SubstanceCode,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress::Egress;
use crate::io::egress_channel::{EgressSender, ScanErrorPayload, ScanPayload, WarningsPayload};
use crate::io::interactions::InteractionLookup;
use crate::io::resolver::ProductResolver;
use crate::services::aggregator::{AggregationError, InteractionAggregator};
use crate::services::history::ScanHistory;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-event error taxonomy. None of these are fatal to the service.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Blank payload reached the decoder
    #[error("empty scan payload")]
    EmptyPayload,
    /// The resolver has no product for this code
    #[error("unknown product {0}")]
    UnknownProduct(ProductCode),
    /// No history record at the given index (refresh only)
    #[error("no history record at index {0}")]
    UnknownRecord(usize),
    /// Interaction lookup failed (refresh only; a submit commits anyway)
    #[error(transparent)]
    LookupFailed(#[from] AggregationError),
}

/// Outcome of one capture
#[derive(Debug)]
pub enum ScanOutcome {
    /// Scan committed to history. `lookup_error` is set when interactions
    /// could not be computed; the commit still happened with an empty set.
    Committed {
        record: ScanRecord,
        product: Product,
        lookup_error: Option<AggregationError>,
    },
    /// The capture was cancelled before producing a payload
    Cancelled,
    /// The scan was rejected before any history mutation
    Rejected(ScanError),
}

/// Session orchestrator: owns the history and wires decoder, resolver and
/// aggregator together
pub struct ScanSession {
    history: ScanHistory,
    resolver: Arc<dyn ProductResolver>,
    aggregator: InteractionAggregator,
    metrics: Arc<Metrics>,
    egress: Egress,
    egress_sender: Option<EgressSender>,
}

impl ScanSession {
    pub fn new(
        config: &Config,
        resolver: Arc<dyn ProductResolver>,
        lookup: Arc<dyn InteractionLookup>,
        metrics: Arc<Metrics>,
        egress_sender: Option<EgressSender>,
    ) -> Self {
        Self {
            history: ScanHistory::new(),
            resolver,
            aggregator: InteractionAggregator::new(lookup),
            metrics,
            egress: Egress::new(config.egress_file()),
            egress_sender,
        }
    }

    /// Start the session, consuming commands from the channel
    pub async fn run(&mut self, mut command_rx: mpsc::Receiver<ScanCommand>) {
        while let Some(command) = command_rx.recv().await {
            self.metrics.set_command_queue_depth(command_rx.len() as u64);
            match command {
                ScanCommand::Scan(raw) => {
                    let outcome = self.submit(raw.contents.as_deref()).await;
                    let latency_us = raw.received_at.elapsed().as_micros() as u64;
                    self.metrics.record_scan_processed(latency_us);
                    debug!(
                        source = %raw.source.as_str(),
                        latency_us = %latency_us,
                        outcome = %outcome.as_str(),
                        "scan_processed"
                    );
                }
                ScanCommand::ClearHistory => {
                    self.clear_history();
                }
                ScanCommand::Refresh { index } => {
                    if let Err(e) = self.refresh(index).await {
                        warn!(index = %index, error = %e, "refresh_failed");
                    }
                }
            }
        }
    }

    /// Process one capture outcome.
    ///
    /// `None` is a cancelled capture and short-circuits before the decoder;
    /// everything else runs the full decode → resolve → aggregate → commit
    /// pipeline. Only a committed scan mutates history.
    pub async fn submit(&mut self, raw: Option<&str>) -> ScanOutcome {
        let Some(raw) = raw else {
            info!("scan_cancelled");
            self.metrics.record_cancelled();
            return ScanOutcome::Cancelled;
        };

        // Decode
        let decoded = match payload::decode(raw) {
            Ok(decoded) => decoded,
            Err(DecodeError::Empty) => {
                info!("scan_rejected_empty");
                self.metrics.record_empty_payload();
                self.publish_error("empty", None, "empty scan payload");
                return ScanOutcome::Rejected(ScanError::EmptyPayload);
            }
        };
        let traceability = decoded.expiry().is_some();
        self.metrics.record_decoded(traceability);

        // Resolve
        let code = decoded.product_code().clone();
        let Some(mut product) = self.resolver.resolve(&code) else {
            warn!(code = %code, "scan_unknown_product");
            self.metrics.record_unknown_product();
            self.publish_error(
                "unknown_product",
                Some(code.to_string()),
                &format!("unknown product {code}"),
            );
            return ScanOutcome::Rejected(ScanError::UnknownProduct(code));
        };

        let mut expired = false;
        if let Some(expiry) = decoded.expiry() {
            expired = expiry.is_expired(chrono::Utc::now().date_naive());
            if expired {
                warn!(code = %code, expiry = %expiry, "scan_pack_expired");
            }
        }

        // Aggregate against the history snapshot taken before the append
        let snapshot = self.substance_history(None);
        let (interactions, lookup_error) = self
            .aggregate_with_metrics(&product.substance.code, &snapshot)
            .await;
        product.substance.interactions = interactions;

        // Commit
        let record = ScanRecord::from_decoded(&decoded);
        self.history.append(record.clone());
        self.metrics.set_history_len(self.history.len());
        self.metrics.record_commit();
        self.egress.write_record(&record);

        info!(
            record_id = %record.id,
            code = %code,
            product = %product.name,
            substance = %product.substance.code,
            traceability = %traceability,
            warnings = %product.substance.interactions.len(),
            lookup_failed = %lookup_error.is_some(),
            history_len = %self.history.len(),
            "scan_committed"
        );

        self.publish_commit(&record, &product, expired, lookup_error.is_some());
        if lookup_error.is_some() {
            self.publish_error(
                "lookup_failed",
                Some(code.to_string()),
                "interaction warnings could not be computed",
            );
        }

        ScanOutcome::Committed { record, product, lookup_error }
    }

    /// Re-query interactions for the history entry at `index`.
    ///
    /// The comparison set is the substance codes of all *other* entries in
    /// the current history (positional exclusion, not a temporal snapshot).
    /// Idempotent: no commit, no history mutation.
    pub async fn refresh(&self, index: usize) -> Result<Vec<Interaction>, ScanError> {
        let record = self.history.get(index).ok_or(ScanError::UnknownRecord(index))?;

        let product = self
            .resolver
            .resolve(&record.product_code)
            .ok_or_else(|| ScanError::UnknownProduct(record.product_code.clone()))?;

        let others = self.substance_history(Some(index));
        let (interactions, lookup_error) =
            self.aggregate_with_metrics(&product.substance.code, &others).await;
        if let Some(e) = lookup_error {
            return Err(ScanError::LookupFailed(e));
        }

        self.metrics.record_refresh();
        debug!(
            index = %index,
            record_id = %record.id,
            substance = %product.substance.code,
            warnings = %interactions.len(),
            "scan_refreshed"
        );

        if let Some(ref sender) = self.egress_sender {
            sender.send_warnings(WarningsPayload {
                site: None,
                record_id: record.id.clone(),
                target: product.substance.code.clone(),
                ts: epoch_ms(),
                origin: "refresh".to_string(),
                interactions: interactions.clone(),
            });
        }

        Ok(interactions)
    }

    /// Ordered product codes for every record currently held
    pub fn history_codes(&self) -> Vec<ProductCode> {
        self.history.codes()
    }

    /// Full ordered history view
    pub fn records(&self) -> &[ScanRecord] {
        self.history.all()
    }

    /// Remove all history records atomically
    pub fn clear_history(&mut self) {
        let removed = self.history.len();
        self.history.clear();
        self.metrics.set_history_len(0);
        self.metrics.record_clear();
        info!(removed = %removed, "history_cleared");
    }

    /// Map history product codes to substance codes, skipping the entry at
    /// `exclude` (refresh) and any entry the resolver no longer knows.
    fn substance_history(&self, exclude: Option<usize>) -> SmallVec<[SubstanceCode; 8]> {
        self.history
            .all()
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != exclude)
            .filter_map(|(_, record)| {
                let resolved = self.resolver.resolve(&record.product_code);
                if resolved.is_none() {
                    debug!(code = %record.product_code, "history_entry_unresolvable");
                }
                resolved.map(|p| p.substance.code)
            })
            .collect()
    }

    /// Run the aggregator, recording lookup metrics. Returns the (possibly
    /// empty) interaction set and the error when the lookup failed.
    async fn aggregate_with_metrics(
        &self,
        target: &SubstanceCode,
        history: &[SubstanceCode],
    ) -> (Vec<Interaction>, Option<AggregationError>) {
        if history.is_empty() {
            return (Vec::new(), None);
        }

        let start = Instant::now();
        match self.aggregator.aggregate(target, history).await {
            Ok(interactions) => {
                self.metrics.record_lookup(start.elapsed().as_micros() as u64, false);
                (interactions, None)
            }
            Err(e) => {
                self.metrics.record_lookup(start.elapsed().as_micros() as u64, true);
                (Vec::new(), Some(e))
            }
        }
    }

    fn publish_commit(&self, record: &ScanRecord, product: &Product, expired: bool, lookup_failed: bool) {
        let Some(ref sender) = self.egress_sender else { return };

        let mut payload = ScanPayload::from_record(record);
        payload.product = product.name.clone();
        payload.substance = product.substance.code.to_string();
        payload.expired = expired;
        payload.warnings = product.substance.interactions.len();
        payload.lookup_failed = lookup_failed;
        sender.send_scan(payload);

        if !product.substance.interactions.is_empty() {
            sender.send_warnings(WarningsPayload {
                site: None,
                record_id: record.id.clone(),
                target: product.substance.code.clone(),
                ts: epoch_ms(),
                origin: "commit".to_string(),
                interactions: product.substance.interactions.clone(),
            });
        }
    }

    fn publish_error(&self, kind: &str, code: Option<String>, message: &str) {
        if let Some(ref sender) = self.egress_sender {
            sender.send_scan_error(ScanErrorPayload {
                site: None,
                ts: epoch_ms(),
                kind: kind.to_string(),
                code,
                message: message.to_string(),
            });
        }
    }
}

impl ScanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOutcome::Committed { lookup_error: None, .. } => "committed",
            ScanOutcome::Committed { lookup_error: Some(_), .. } => "committed_no_warnings",
            ScanOutcome::Cancelled => "cancelled",
            ScanOutcome::Rejected(_) => "rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{RawScan, ScanSource, Substance};
    use crate::io::interactions::LookupError;
    use crate::io::resolver::JsonProductDb;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    const CODE_A: &str = "3400930000120";
    const CODE_B: &str = "3400935955838";
    const CODE_C: &str = "3400930478579";

    fn product(code: &str, substance: &str) -> Product {
        Product {
            code: code.into(),
            name: format!("Product {code}"),
            substance: Substance {
                code: substance.into(),
                name: format!("Substance {substance}"),
                interactions: Vec::new(),
            },
        }
    }

    fn resolver() -> Arc<JsonProductDb> {
        Arc::new(JsonProductDb::from_products(vec![
            product(CODE_A, "S_A"),
            product(CODE_B, "S_B"),
            product(CODE_C, "S_C"),
        ]))
    }

    fn interaction(target: &str, other: &str) -> Interaction {
        Interaction {
            target: target.into(),
            other: other.into(),
            message: format!("{target} interacts with {other}"),
            severity: Some("warning".to_string()),
        }
    }

    /// Records every call and answers from a queue (empty once drained)
    struct RecordingLookup {
        calls: Mutex<Vec<(SubstanceCode, Vec<SubstanceCode>)>>,
        responses: Mutex<VecDeque<Vec<Interaction>>>,
        fail: bool,
    }

    impl RecordingLookup {
        fn new(responses: Vec<Vec<Interaction>>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                responses: Mutex::new(responses.into()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                responses: Mutex::new(VecDeque::new()),
                fail: true,
            })
        }

        fn calls(&self) -> Vec<(SubstanceCode, Vec<SubstanceCode>)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl InteractionLookup for RecordingLookup {
        async fn lookup(
            &self,
            target: &SubstanceCode,
            history: &[SubstanceCode],
        ) -> Result<Vec<Interaction>, LookupError> {
            self.calls.lock().push((target.clone(), history.to_vec()));
            if self.fail {
                return Err(LookupError::Status(503));
            }
            Ok(self.responses.lock().pop_front().unwrap_or_default())
        }
    }

    fn session(lookup: Arc<dyn InteractionLookup>) -> (ScanSession, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default()
            .with_egress_file(dir.path().join("records.jsonl").to_str().unwrap());
        let session = ScanSession::new(
            &config,
            resolver(),
            lookup,
            Arc::new(Metrics::new()),
            None,
        );
        (session, dir)
    }

    #[tokio::test]
    async fn test_commit_appends_and_attaches_interactions() {
        // History [A, B]; scanning C yields one warning with S_B
        let lookup = RecordingLookup::new(vec![
            Vec::new(),                            // scan B against [S_A]
            vec![interaction("S_C", "S_B")],       // scan C against [S_A, S_B]
        ]);
        let (mut session, _dir) = session(lookup.clone());

        session.submit(Some(CODE_A)).await;
        session.submit(Some(CODE_B)).await;
        let outcome = session.submit(Some(CODE_C)).await;

        let ScanOutcome::Committed { product, lookup_error, .. } = outcome else {
            panic!("expected commit");
        };
        assert!(lookup_error.is_none());
        assert_eq!(product.substance.interactions, vec![interaction("S_C", "S_B")]);

        assert_eq!(
            session.history_codes(),
            vec![
                ProductCode(CODE_A.to_string()),
                ProductCode(CODE_B.to_string()),
                ProductCode(CODE_C.to_string()),
            ]
        );

        // First scan skipped the lookup (empty history); the C call saw the
        // snapshot taken before its own append
        let calls = lookup.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, SubstanceCode("S_C".to_string()));
        assert_eq!(
            calls[1].1,
            vec![SubstanceCode("S_A".to_string()), SubstanceCode("S_B".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cancelled_capture_no_mutation() {
        let (mut session, _dir) = session(RecordingLookup::new(Vec::new()));

        let outcome = session.submit(None).await;

        assert!(matches!(outcome, ScanOutcome::Cancelled));
        assert!(session.records().is_empty());
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let (mut session, _dir) = session(RecordingLookup::new(Vec::new()));

        for raw in ["", "   "] {
            let outcome = session.submit(Some(raw)).await;
            assert!(matches!(outcome, ScanOutcome::Rejected(ScanError::EmptyPayload)));
        }
        assert!(session.records().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_product_rejected_before_append() {
        let (mut session, _dir) = session(RecordingLookup::new(Vec::new()));
        session.submit(Some(CODE_A)).await;

        let outcome = session.submit(Some("9999999999999")).await;

        let ScanOutcome::Rejected(ScanError::UnknownProduct(code)) = outcome else {
            panic!("expected unknown product rejection");
        };
        assert_eq!(code.as_str(), "9999999999999");
        assert_eq!(session.records().len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_still_commits() {
        let (mut session, _dir) = session(RecordingLookup::failing());

        session.submit(Some(CODE_A)).await;
        let outcome = session.submit(Some(CODE_B)).await;

        let ScanOutcome::Committed { product, lookup_error, .. } = outcome else {
            panic!("expected commit despite lookup failure");
        };
        assert!(lookup_error.is_some());
        assert!(product.substance.interactions.is_empty());
        assert_eq!(session.records().len(), 2);
    }

    #[tokio::test]
    async fn test_first_scan_skips_lookup() {
        let lookup = RecordingLookup::new(Vec::new());
        let (mut session, _dir) = session(lookup.clone());

        session.submit(Some(CODE_A)).await;

        assert!(lookup.calls().is_empty());
    }

    #[tokio::test]
    async fn test_traceability_fields_reach_the_record() {
        let (mut session, _dir) = session(RecordingLookup::new(Vec::new()));

        let outcome =
            session.submit(Some("]010340093000012017270331109X4Z1Q")).await;

        let ScanOutcome::Committed { record, .. } = outcome else {
            panic!("expected commit");
        };
        assert_eq!(record.product_code.as_str(), CODE_A);
        assert_eq!(record.expiry.unwrap().to_string(), "03/2027");
        assert_eq!(record.lot.as_deref(), Some("9X4Z1Q"));
    }

    #[tokio::test]
    async fn test_refresh_excludes_own_entry_positionally() {
        let lookup = RecordingLookup::new(vec![
            Vec::new(),
            Vec::new(),
            vec![interaction("S_B", "S_C")],   // the refresh call
        ]);
        let (mut session, _dir) = session(lookup.clone());
        session.submit(Some(CODE_A)).await;
        session.submit(Some(CODE_B)).await;
        session.submit(Some(CODE_C)).await;

        let interactions = session.refresh(1).await.unwrap();

        assert_eq!(interactions, vec![interaction("S_B", "S_C")]);
        assert_eq!(session.records().len(), 3);

        let calls = lookup.calls();
        let refresh_call = calls.last().unwrap();
        assert_eq!(refresh_call.0, SubstanceCode("S_B".to_string()));
        assert_eq!(
            refresh_call.1,
            vec![SubstanceCode("S_A".to_string()), SubstanceCode("S_C".to_string())]
        );
    }

    #[tokio::test]
    async fn test_refresh_unknown_index() {
        let (session, _dir) = session(RecordingLookup::new(Vec::new()));

        let err = session.refresh(0).await.unwrap_err();

        assert!(matches!(err, ScanError::UnknownRecord(0)));
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_history_unchanged() {
        let (mut session, _dir) = session(RecordingLookup::failing());
        session.submit(Some(CODE_A)).await;
        session.submit(Some(CODE_B)).await;

        let err = session.refresh(0).await.unwrap_err();

        assert!(matches!(err, ScanError::LookupFailed(_)));
        assert_eq!(session.records().len(), 2);
    }

    #[tokio::test]
    async fn test_clear_history() {
        let (mut session, _dir) = session(RecordingLookup::new(Vec::new()));
        session.submit(Some(CODE_A)).await;
        session.submit(Some(CODE_B)).await;

        session.clear_history();

        assert!(session.history_codes().is_empty());
        assert!(session.records().is_empty());
    }

    #[tokio::test]
    async fn test_run_consumes_commands_in_order() {
        let (mut session, _dir) = session(RecordingLookup::new(Vec::new()));
        let (tx, rx) = mpsc::channel(16);

        tx.send(ScanCommand::Scan(RawScan::new(Some(CODE_A.to_string()), ScanSource::Tcp)))
            .await
            .unwrap();
        tx.send(ScanCommand::Scan(RawScan::new(Some(CODE_B.to_string()), ScanSource::Tcp)))
            .await
            .unwrap();
        tx.send(ScanCommand::ClearHistory).await.unwrap();
        tx.send(ScanCommand::Scan(RawScan::new(Some(CODE_C.to_string()), ScanSource::Serial)))
            .await
            .unwrap();
        drop(tx);

        session.run(rx).await;

        assert_eq!(session.history_codes(), vec![ProductCode(CODE_C.to_string())]);
    }
}
