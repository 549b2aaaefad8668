//! # Sync Orchestrator
//!
//! Runs reconciliation passes that fold marketplace events into the order
//! ledger, one chain at a time.
//!
//! ## Pass
//!
//! 1. Read the chain cursor (the deployment block minus one when absent)
//! 2. Read the chain head; stop if the cursor already reached it and nothing
//!    is waiting in the quarantine
//! 3. For every classifier in scan order: retry its earlier failures, re-scan
//!    its deferred ranges, scan `[cursor + 1, head]` through the range
//!    splitter, classify each log
//! 4. Advance the cursor to the head through the forward-only guard
//!
//! Fetch failures and classifier failures never abort a pass. The cursor is
//! advanced even when a sub-range was skipped: passes run on a schedule and the
//! ledger updates are idempotent, so liveness wins over exactly-once delivery.
//! Skipped ranges and logs whose classification failed are kept by
//! [`LogQuarantine`] and retried by later passes.
//!
//! ## Single flight
//!
//! At most one pass per chain runs at a time. A pass requested while another
//! one for the same chain is in flight returns [`SyncOutcome::AlreadyRunning`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use marketplace_ledger_sdk::orchestrator::{ChainTarget, SyncOrchestrator};
//! # async fn run(
//! #     settings: marketplace_ledger_sdk::settings::Settings,
//! #     ledger: std::sync::Arc<dyn marketplace_ledger_sdk::ledger::OrderLedger>,
//! #     cursors: std::sync::Arc<dyn marketplace_ledger_sdk::cursor_store::CursorStore>,
//! # ) -> anyhow::Result<()> {
//! let mut orchestrator = SyncOrchestrator::from_settings(&settings, ledger, cursors);
//! for chain in &settings.chains {
//!     orchestrator = orchestrator.with_chain(ChainTarget::from_config(chain, &settings)?);
//! }
//! let outcome = orchestrator.sync_orders(4).await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    chain_reader::{ChainError, ChainReader, RpcLogSource},
    classifiers::{default_classifiers, ClassifyOutcome, EventClassifier},
    cursor_store::{advance_cursor, CursorAdvance, CursorError, CursorStore},
    events::{EventKind, LogId, RawLog},
    ledger::OrderLedger,
    metrics,
    quarantine::LogQuarantine,
    range_splitter::{RangeScan, RangeSplitter, SkippedRange, SplitPolicy},
    rpc_pool::RpcPool,
    settings::{ChainConfig, Settings},
};
use dashmap::DashMap;
use ethers::types::Address;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Chain {0} is not configured")]
    UnknownChain(u64),
    #[error("Failed to read chain head: {0}")]
    Head(#[from] ChainError),
    #[error("Cursor store failed: {0}")]
    Cursor(#[from] CursorError),
}

/// Everything a pass needs to know about one chain.
pub struct ChainTarget {
    pub chain_id: u64,
    pub marketplace: Address,
    pub deployment_block: u64,
    pub splitter: RangeSplitter,
}

impl ChainTarget {
    pub fn new(chain_id: u64, marketplace: Address, deployment_block: u64, splitter: RangeSplitter) -> Self {
        Self {
            chain_id,
            marketplace,
            deployment_block,
            splitter,
        }
    }

    /// Builds the provider pool, reader and splitter for a configured chain.
    pub fn from_config(chain: &ChainConfig, settings: &Settings) -> anyhow::Result<Self> {
        let urls = settings.rpc_urls_for(chain);
        let pool = Arc::new(RpcPool::new(&settings.rpc, &urls)?);
        let source = Arc::new(RpcLogSource::new(pool, &settings.rpc));
        let splitter = RangeSplitter::new(ChainReader::new(source), SplitPolicy::from_settings(&settings.rpc));
        Ok(Self::new(
            chain.chain_id,
            chain.marketplace_address()?,
            chain.deployment_block,
            splitter,
        ))
    }
}

/// Counters of one classifier scan within a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierReport {
    pub event: EventKind,
    pub fetched: usize,
    pub retried: usize,
    /// Ranges skipped by earlier passes and scanned again in this one
    pub rescanned: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub quarantined: usize,
    pub skipped_ranges: Vec<SkippedRange>,
}

impl ClassifierReport {
    fn new(event: EventKind) -> Self {
        Self {
            event,
            fetched: 0,
            retried: 0,
            rescanned: 0,
            applied: 0,
            unchanged: 0,
            failed: 0,
            quarantined: 0,
            skipped_ranges: Vec::new(),
        }
    }
}

/// `to_block < from_block` when the head had not moved and the pass only
/// worked through the quarantine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub chain_id: u64,
    pub from_block: u64,
    pub to_block: u64,
    pub classifiers: Vec<ClassifierReport>,
    pub cursor: CursorAdvance,
    pub duration: Duration,
}

impl SyncReport {
    pub fn applied(&self) -> usize {
        self.classifiers.iter().map(|c| c.applied).sum()
    }

    pub fn failed(&self) -> usize {
        self.classifiers.iter().map(|c| c.failed).sum()
    }

    /// No range was skipped and every log classified.
    pub fn is_complete(&self) -> bool {
        self.classifiers
            .iter()
            .all(|c| c.skipped_ranges.is_empty() && c.failed == 0)
    }

    pub fn for_event(&self, event: EventKind) -> Option<&ClassifierReport> {
        self.classifiers.iter().find(|c| c.event == event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cursor already covers the chain head
    UpToDate { cursor: u64, head: u64 },
    /// Another pass for the chain is in flight
    AlreadyRunning,
    Synced(SyncReport),
}

pub struct SyncOrchestrator {
    chains: HashMap<u64, ChainTarget>,
    classifiers: Vec<Arc<dyn EventClassifier>>,
    cursors: Arc<dyn CursorStore>,
    quarantine: Arc<LogQuarantine>,
    in_flight: DashMap<u64, Arc<Mutex<()>>>,
}

impl SyncOrchestrator {
    /// `classifiers` are scanned in the order given.
    pub fn new(
        classifiers: Vec<Arc<dyn EventClassifier>>,
        cursors: Arc<dyn CursorStore>,
        quarantine: Arc<LogQuarantine>,
    ) -> Self {
        Self {
            chains: HashMap::new(),
            classifiers,
            cursors,
            quarantine,
            in_flight: DashMap::new(),
        }
    }

    /// Default classifier set over `ledger`, quarantine threshold from settings.
    pub fn from_settings(settings: &Settings, ledger: Arc<dyn OrderLedger>, cursors: Arc<dyn CursorStore>) -> Self {
        Self::new(
            default_classifiers(ledger),
            cursors,
            Arc::new(LogQuarantine::new(settings.sync.quarantine_threshold)),
        )
    }

    pub fn with_chain(mut self, target: ChainTarget) -> Self {
        self.chains.insert(target.chain_id, target);
        self
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.chains.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn quarantine(&self) -> &Arc<LogQuarantine> {
        &self.quarantine
    }

    /// Runs one pass for `chain_id` unless one is already running.
    pub async fn sync_orders(&self, chain_id: u64) -> Result<SyncOutcome, SyncError> {
        let target = self
            .chains
            .get(&chain_id)
            .ok_or(SyncError::UnknownChain(chain_id))?;

        let lock = self
            .in_flight
            .entry(chain_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = match lock.try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                info!(chain_id, "Sync pass already running, skipping");
                return Ok(SyncOutcome::AlreadyRunning);
            }
        };

        self.run_pass(target)
            .instrument(info_span!("sync_pass", chain_id))
            .await
    }

    /// One pass per configured chain, chains in parallel.
    pub async fn sync_all(&self) -> Vec<(u64, Result<SyncOutcome, SyncError>)> {
        let ids = self.chain_ids();
        let passes = ids.iter().map(|id| self.sync_orders(*id));
        let results = futures::future::join_all(passes).await;
        ids.into_iter().zip(results).collect()
    }

    async fn run_pass(&self, target: &ChainTarget) -> Result<SyncOutcome, SyncError> {
        let chain_id = target.chain_id;
        let started = Instant::now();

        let cursor = match self.cursors.get(chain_id).await? {
            Some(cursor) => cursor,
            None => target.deployment_block.saturating_sub(1),
        };
        let head = target.splitter.reader().head_block().await?;
        if head <= cursor && !self.quarantine.has_pending_work(chain_id) {
            debug!(cursor, head, "Ledger up to date");
            return Ok(SyncOutcome::UpToDate { cursor, head });
        }

        let from_block = cursor + 1;
        let to_block = head.max(cursor);
        info!(from = from_block, to = to_block, "Starting sync pass");

        let mut reports = Vec::with_capacity(self.classifiers.len());
        for classifier in &self.classifiers {
            let report = self
                .run_classifier(target, classifier.as_ref(), from_block, to_block)
                .await;
            reports.push(report);
        }

        // Skipped ranges and failed logs do not hold the cursor back.
        let advance = if head > cursor {
            advance_cursor(self.cursors.as_ref(), chain_id, head).await?
        } else {
            CursorAdvance::Unchanged(cursor)
        };

        let report = SyncReport {
            chain_id,
            from_block,
            to_block,
            classifiers: reports,
            cursor: advance,
            duration: started.elapsed(),
        };
        metrics::record_sync_duration(chain_id, report.duration);
        if report.is_complete() {
            info!(
                from = from_block,
                to = to_block,
                applied = report.applied(),
                elapsed_ms = report.duration.as_millis() as u64,
                "Sync pass complete"
            );
        } else {
            warn!(
                from = from_block,
                to = to_block,
                applied = report.applied(),
                failed = report.failed(),
                elapsed_ms = report.duration.as_millis() as u64,
                "Sync pass finished with skipped ranges or failed logs"
            );
        }
        Ok(SyncOutcome::Synced(report))
    }

    async fn run_classifier(
        &self,
        target: &ChainTarget,
        classifier: &dyn EventClassifier,
        from_block: u64,
        to_block: u64,
    ) -> ClassifierReport {
        let chain_id = target.chain_id;
        let event = classifier.kind();
        let mut report = ClassifierReport::new(event);

        let retries = self.quarantine.pending_retries(chain_id, event);
        let retried_ids: HashSet<LogId> = retries.iter().map(RawLog::id).collect();
        for log in &retries {
            report.retried += 1;
            self.classify(chain_id, classifier, log, &mut report).await;
        }

        // deferred ranges lie below the cursor, so logs stay in block order
        let topics = [classifier.topic0()];
        let mut scan = RangeScan::default();
        for range in self.quarantine.take_deferred_ranges(chain_id, event) {
            report.rescanned += 1;
            let rescan = target
                .splitter
                .get_logs_with_split(target.marketplace, &topics, range.from_block, range.to_block)
                .await;
            scan.logs.extend(rescan.logs);
            scan.skipped.extend(rescan.skipped);
        }
        let fresh = target
            .splitter
            .get_logs_with_split(target.marketplace, &topics, from_block, to_block)
            .await;
        scan.logs.extend(fresh.logs);
        scan.skipped.extend(fresh.skipped);

        report.fetched = scan.logs.len();
        metrics::record_logs_fetched(event.name(), scan.logs.len());
        for skipped in &scan.skipped {
            metrics::increment_skipped_range(event.name(), skipped.reason.as_str());
            self.quarantine.defer_range(chain_id, event, skipped.clone());
        }
        report.skipped_ranges = scan.skipped;

        for log in &scan.logs {
            let id = log.id();
            if retried_ids.contains(&id) || self.quarantine.is_quarantined(chain_id, &id) {
                continue;
            }
            self.classify(chain_id, classifier, log, &mut report).await;
        }

        metrics::increment_classifier_logs(event.name(), "applied", report.applied as u64);
        metrics::increment_classifier_logs(event.name(), "unchanged", report.unchanged as u64);
        metrics::increment_classifier_logs(event.name(), "failed", report.failed as u64);
        debug!(
            event = event.name(),
            fetched = report.fetched,
            retried = report.retried,
            rescanned = report.rescanned,
            applied = report.applied,
            failed = report.failed,
            "Classifier scan done"
        );
        report
    }

    async fn classify(
        &self,
        chain_id: u64,
        classifier: &dyn EventClassifier,
        log: &RawLog,
        report: &mut ClassifierReport,
    ) {
        let event = classifier.kind();
        match classifier.apply(chain_id, log).await {
            Ok(ClassifyOutcome::Applied { .. }) => {
                report.applied += 1;
                self.quarantine.record_success(chain_id, &log.id());
            }
            Ok(ClassifyOutcome::Skipped(reason)) => {
                report.unchanged += 1;
                self.quarantine.record_success(chain_id, &log.id());
                debug!(event = event.name(), tx = ?log.transaction_hash, reason, "Log left ledger unchanged");
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    event = event.name(),
                    tx = ?log.transaction_hash,
                    log_index = log.log_index,
                    error = %e,
                    "Failed to classify log"
                );
                if self
                    .quarantine
                    .record_failure(chain_id, event, log, &e.to_string(), e.is_permanent())
                {
                    report.quarantined += 1;
                }
            }
        }
    }
}
