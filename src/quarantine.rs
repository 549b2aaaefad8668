//! Dead-letter register for work a pass could not finish.
//!
//! The cursor advances past a range even when part of it was not processed,
//! so that work would never be seen again by a later scan. Two kinds of
//! leftovers are kept here and picked up at the start of later passes:
//!
//! - logs whose classification failed. Once a log has failed `threshold`
//!   times it is quarantined: no longer retried, but listed for an operator
//!   until released.
//! - block ranges the range splitter skipped (provider failure, split depth
//!   exhausted). They are scanned again, and deferred again if they still fail.
//!
//! Everything lives in process memory. A restart forgets pending retries and
//! deferred ranges; to recover them, rewind the chain cursor with
//! [`CursorStore::set`](crate::cursor_store::CursorStore::set) below the
//! lowest affected block. Replay is safe since classifiers are idempotent.

use crate::events::{EventKind, LogId, RawLog};
use crate::range_splitter::SkippedRange;
use dashmap::DashMap;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedLog {
    pub chain_id: u64,
    pub event: EventKind,
    pub log: RawLog,
    pub failures: u32,
    pub last_error: String,
    pub quarantined_at: SystemTime,
}

impl QuarantinedLog {
    pub fn id(&self) -> LogId {
        self.log.id()
    }
}

#[derive(Debug, Clone)]
struct PendingRetry {
    event: EventKind,
    log: RawLog,
    failures: u32,
    last_error: String,
}

type Key = (u64, LogId);

/// Counts classification failures per `(chain_id, tx_hash, log_index)`.
pub struct LogQuarantine {
    threshold: u32,
    pending: DashMap<Key, PendingRetry>,
    quarantined: DashMap<Key, QuarantinedLog>,
    deferred: DashMap<(u64, EventKind), Vec<SkippedRange>>,
}

impl LogQuarantine {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            pending: DashMap::new(),
            quarantined: DashMap::new(),
            deferred: DashMap::new(),
        }
    }

    pub fn is_quarantined(&self, chain_id: u64, id: &LogId) -> bool {
        self.quarantined.contains_key(&(chain_id, *id))
    }

    /// Records one failure. Returns `true` when this failure quarantined the log.
    ///
    /// `permanent` failures (the log itself cannot be decoded) are quarantined
    /// immediately since a retry cannot succeed.
    pub fn record_failure(
        &self,
        chain_id: u64,
        event: EventKind,
        log: &RawLog,
        error: &str,
        permanent: bool,
    ) -> bool {
        let key = (chain_id, log.id());
        if self.quarantined.contains_key(&key) {
            return false;
        }

        let record = {
            let mut entry = self.pending.entry(key).or_insert_with(|| PendingRetry {
                event,
                log: log.clone(),
                failures: 0,
                last_error: String::new(),
            });
            entry.failures += 1;
            entry.last_error = error.to_string();
            entry.clone()
        };

        if !permanent && record.failures < self.threshold {
            return false;
        }

        self.pending.remove(&key);
        log::warn!(
            "Quarantining {} log {:?}#{} on chain {} after {} failure(s): {}",
            record.event.name(),
            key.1.transaction_hash,
            key.1.log_index,
            chain_id,
            record.failures,
            record.last_error
        );
        crate::metrics::increment_quarantined(record.event.name());
        self.quarantined.insert(
            key,
            QuarantinedLog {
                chain_id,
                event: record.event,
                log: record.log,
                failures: record.failures,
                last_error: record.last_error,
                quarantined_at: SystemTime::now(),
            },
        );
        true
    }

    /// Forgets earlier failures of a log that finally classified.
    pub fn record_success(&self, chain_id: u64, id: &LogId) {
        self.pending.remove(&(chain_id, *id));
    }

    /// Logs of `event` that failed before and are due for another attempt,
    /// in ascending block order.
    pub fn pending_retries(&self, chain_id: u64, event: EventKind) -> Vec<RawLog> {
        let mut logs: Vec<RawLog> = self
            .pending
            .iter()
            .filter(|e| e.key().0 == chain_id && e.value().event == event)
            .map(|e| e.value().log.clone())
            .collect();
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        logs
    }

    /// Keeps a range the splitter skipped so a later pass scans it again.
    pub fn defer_range(&self, chain_id: u64, event: EventKind, range: SkippedRange) {
        log::debug!(
            "Deferring {} blocks {}..={} on chain {} ({})",
            event.name(),
            range.from_block,
            range.to_block,
            chain_id,
            range.reason.as_str()
        );
        self.deferred.entry((chain_id, event)).or_default().push(range);
    }

    /// Removes and returns the deferred ranges of `event`, lowest block first.
    pub fn take_deferred_ranges(&self, chain_id: u64, event: EventKind) -> Vec<SkippedRange> {
        let mut ranges = self
            .deferred
            .remove(&(chain_id, event))
            .map(|(_, ranges)| ranges)
            .unwrap_or_default();
        ranges.sort_by_key(|r| r.from_block);
        ranges
    }

    /// Failed logs or deferred ranges are waiting for a pass on this chain.
    pub fn has_pending_work(&self, chain_id: u64) -> bool {
        self.pending.iter().any(|e| e.key().0 == chain_id)
            || self
                .deferred
                .iter()
                .any(|e| e.key().0 == chain_id && !e.value().is_empty())
    }

    /// Releases a quarantined log. It is retried by the next pass.
    pub fn release(&self, chain_id: u64, id: &LogId) -> Option<QuarantinedLog> {
        let (key, entry) = self.quarantined.remove(&(chain_id, *id))?;
        self.pending.insert(
            key,
            PendingRetry {
                event: entry.event,
                log: entry.log.clone(),
                failures: 0,
                last_error: entry.last_error.clone(),
            },
        );
        Some(entry)
    }

    /// Quarantined logs of a chain, oldest block first.
    pub fn list(&self, chain_id: u64) -> Vec<QuarantinedLog> {
        let mut entries: Vec<QuarantinedLog> = self
            .quarantined
            .iter()
            .filter(|e| e.key().0 == chain_id)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(|e| (e.log.block_number, e.log.log_index));
        entries
    }

    pub fn len(&self) -> usize {
        self.quarantined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quarantined.is_empty()
    }
}
