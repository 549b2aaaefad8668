//! Range Splitter: recursive bisection of block ranges that are too wide for one
//! `eth_getLogs` call.
//!
//! A range is split at `(from + to) >> 1` when its span exceeds `max_span`, or
//! when the provider rejects it as too large. Both halves are fetched
//! concurrently and merged back in ascending block order. Recursion past
//! `max_depth` drops that branch for this pass and reports it as skipped.

use crate::chain_reader::{ChainReader, FetchOutcome, SkipReason};
use crate::events::RawLog;
use crate::settings::Rpc;
use ethers::types::{Address, H256};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPolicy {
    pub max_span: u64,
    pub max_depth: u32,
}

impl SplitPolicy {
    pub fn new(max_span: u64, max_depth: u32) -> Self {
        Self {
            max_span: max_span.max(1),
            max_depth,
        }
    }

    pub fn from_settings(rpc: &Rpc) -> Self {
        Self::new(rpc.max_block_span, rpc.max_split_depth)
    }
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self::new(100_000, 400)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRange {
    pub from_block: u64,
    pub to_block: u64,
    pub reason: SkipReason,
}

/// Result of scanning one range: the logs that were fetched, in ascending
/// block order, and the sub-ranges that were not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeScan {
    pub logs: Vec<RawLog>,
    pub skipped: Vec<SkippedRange>,
}

impl RangeScan {
    fn skipped(from_block: u64, to_block: u64, reason: SkipReason) -> Self {
        Self {
            logs: Vec::new(),
            skipped: vec![SkippedRange {
                from_block,
                to_block,
                reason,
            }],
        }
    }

    fn merge(mut self, later: RangeScan) -> Self {
        self.logs.extend(later.logs);
        self.skipped.extend(later.skipped);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Midpoint used for bisection; equal to `(from + to) >> 1` without overflow.
pub fn midpoint(from_block: u64, to_block: u64) -> u64 {
    from_block + (to_block - from_block) / 2
}

#[derive(Clone)]
pub struct RangeSplitter {
    reader: ChainReader,
    policy: SplitPolicy,
}

impl RangeSplitter {
    pub fn new(reader: ChainReader, policy: SplitPolicy) -> Self {
        Self { reader, policy }
    }

    pub fn policy(&self) -> SplitPolicy {
        self.policy
    }

    pub fn reader(&self) -> &ChainReader {
        &self.reader
    }

    /// Scans `[from_block, to_block]` inclusive.
    pub async fn get_logs_with_split(
        &self,
        address: Address,
        topics: &[H256],
        from_block: u64,
        to_block: u64,
    ) -> RangeScan {
        let topics: Arc<[H256]> = Arc::from(topics);
        self.scan(address, topics, from_block, to_block, 0).await
    }

    fn scan(
        &self,
        address: Address,
        topics: Arc<[H256]>,
        from_block: u64,
        to_block: u64,
        depth: u32,
    ) -> BoxFuture<'_, RangeScan> {
        async move {
            if from_block > to_block {
                return RangeScan::default();
            }
            if depth > self.policy.max_depth {
                error!(
                    from = from_block,
                    to = to_block,
                    depth,
                    "Split depth exceeded, dropping range for this pass"
                );
                return RangeScan::skipped(from_block, to_block, SkipReason::DepthExceeded { depth });
            }
            if to_block - from_block > self.policy.max_span {
                return self.split(address, topics, from_block, to_block, depth).await;
            }

            match self
                .reader
                .fetch_logs(address, &topics, from_block, to_block)
                .await
            {
                FetchOutcome::Fetched(mut logs) => {
                    logs.sort_by_key(|l| (l.block_number, l.log_index));
                    RangeScan {
                        logs,
                        skipped: Vec::new(),
                    }
                }
                FetchOutcome::Skipped(SkipReason::ResponseTooLarge) if from_block < to_block => {
                    debug!(from = from_block, to = to_block, depth, "Provider refused range, bisecting");
                    self.split(address, topics, from_block, to_block, depth).await
                }
                FetchOutcome::Skipped(reason) => RangeScan::skipped(from_block, to_block, reason),
            }
        }
        .boxed()
    }

    async fn split(
        &self,
        address: Address,
        topics: Arc<[H256]>,
        from_block: u64,
        to_block: u64,
        depth: u32,
    ) -> RangeScan {
        let mid = midpoint(from_block, to_block);
        let (first, last) = futures::join!(
            self.scan(address, topics.clone(), from_block, mid, depth + 1),
            self.scan(address, topics, mid + 1, to_block, depth + 1),
        );
        first.merge(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_reader::{ChainError, LogSource};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns one synthetic log per call, rejects ranges wider than `limit`.
    struct RecordingSource {
        calls: Mutex<Vec<(u64, u64)>>,
        limit: u64,
    }

    #[async_trait]
    impl LogSource for RecordingSource {
        async fn get_logs(
            &self,
            _: Address,
            _: &[H256],
            from: u64,
            to: u64,
        ) -> Result<Vec<RawLog>, ChainError> {
            if to - from > self.limit {
                return Err(ChainError::ResponseTooLarge("too large".into()));
            }
            self.calls.lock().unwrap().push((from, to));
            Ok(vec![RawLog {
                address: Address::zero(),
                topics: vec![],
                data: Default::default(),
                block_number: from,
                transaction_hash: H256::zero(),
                log_index: 0,
            }])
        }

        async fn block_number(&self) -> Result<u64, ChainError> {
            Ok(0)
        }
    }

    fn splitter(limit: u64, policy: SplitPolicy) -> (RangeSplitter, Arc<RecordingSource>) {
        let source = Arc::new(RecordingSource {
            calls: Mutex::new(Vec::new()),
            limit,
        });
        let reader = ChainReader::new(source.clone());
        (RangeSplitter::new(reader, policy), source)
    }

    #[tokio::test]
    async fn splits_wide_range_into_ordered_leaves() {
        let (splitter, source) = splitter(u64::MAX, SplitPolicy::new(100_000, 400));
        let scan = splitter
            .get_logs_with_split(Address::zero(), &[], 0, 250_000)
            .await;

        let mut calls = source.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                (0, 62_500),
                (62_501, 125_000),
                (125_001, 187_500),
                (187_501, 250_000)
            ]
        );
        let starts: Vec<u64> = scan.logs.iter().map(|l| l.block_number).collect();
        assert_eq!(starts, vec![0, 62_501, 125_001, 187_501]);
        assert!(scan.is_complete());
    }

    #[tokio::test]
    async fn bisects_when_provider_refuses() {
        let (splitter, source) = splitter(9, SplitPolicy::new(1_000, 400));
        let scan = splitter.get_logs_with_split(Address::zero(), &[], 0, 39).await;
        assert!(scan.is_complete());
        let mut calls = source.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec![(0, 9), (10, 19), (20, 29), (30, 39)]);
    }

    #[tokio::test]
    async fn inverted_range_is_empty() {
        let (splitter, source) = splitter(u64::MAX, SplitPolicy::default());
        let scan = splitter.get_logs_with_split(Address::zero(), &[], 10, 9).await;
        assert_eq!(scan, RangeScan::default());
        assert!(source.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn depth_cap_drops_branch() {
        // provider refuses everything wider than one block; depth 1 is not enough
        let (splitter, _source) = splitter(0, SplitPolicy::new(1_000, 1));
        let scan = splitter.get_logs_with_split(Address::zero(), &[], 0, 7).await;
        assert!(!scan.is_complete());
        assert!(scan
            .skipped
            .iter()
            .all(|s| matches!(s.reason, SkipReason::DepthExceeded { .. })));
    }

    #[tokio::test]
    async fn single_block_refusal_is_skipped_not_split() {
        struct AlwaysTooLarge;
        #[async_trait]
        impl LogSource for AlwaysTooLarge {
            async fn get_logs(&self, _: Address, _: &[H256], _: u64, _: u64) -> Result<Vec<RawLog>, ChainError> {
                Err(ChainError::ResponseTooLarge("too large".into()))
            }
            async fn block_number(&self) -> Result<u64, ChainError> {
                Ok(0)
            }
        }
        let splitter = RangeSplitter::new(ChainReader::new(Arc::new(AlwaysTooLarge)), SplitPolicy::default());
        let scan = splitter.get_logs_with_split(Address::zero(), &[], 5, 5).await;
        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(scan.skipped[0].reason, SkipReason::ResponseTooLarge);
    }

    #[test]
    fn midpoint_matches_shift() {
        assert_eq!(midpoint(0, 250_000), 125_000);
        assert_eq!(midpoint(125_001, 250_000), (125_001u64 + 250_000) >> 1);
        assert_eq!(midpoint(u64::MAX - 1, u64::MAX), u64::MAX - 1);
    }
}
