//! Chain Reader: one `eth_getLogs` call for an address/topic set over a block range.
//!
//! Failures never propagate out of [`ChainReader::fetch_logs`]. They come back as
//! [`FetchOutcome::Skipped`] so callers can tell "no events" from "fetch failed".
//! A range the provider refuses as too large is reported with
//! [`SkipReason::ResponseTooLarge`], the signal the range splitter bisects on.

use crate::events::RawLog;
use crate::rpc_pool::{is_rate_limit_error, RpcPool};
use crate::settings::Rpc;
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{Address, Filter, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("Provider rejected the request as too large: {0}")]
    ResponseTooLarge(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("No provider available: {0}")]
    Unavailable(String),
}

const TOO_LARGE_MARKERS: [&str; 8] = [
    "too large",
    "too many results",
    "more than",
    "response size",
    "range too wide",
    "exceed maximum block range",
    "block range is too",
    "query timeout exceeded",
];

impl ChainError {
    /// Maps a provider error message onto the variants reconciliation reacts to.
    pub fn from_provider_message(message: String) -> Self {
        if is_rate_limit_error(&message) {
            return ChainError::RateLimited(message);
        }
        let lower = message.to_lowercase();
        if TOO_LARGE_MARKERS.iter().any(|m| lower.contains(m)) {
            return ChainError::ResponseTooLarge(message);
        }
        ChainError::Rpc(message)
    }

    /// Oversized ranges are not retried as-is; they get split instead.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ChainError::ResponseTooLarge(_))
    }
}

/// JSON-RPC log query primitive.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// `topics[i]` constrains topic position `i`.
    async fn get_logs(
        &self,
        address: Address,
        topics: &[H256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;
}

pub fn build_filter(address: Address, topics: &[H256], from_block: u64, to_block: u64) -> Filter {
    let mut filter = Filter::new()
        .address(address)
        .from_block(from_block)
        .to_block(to_block);
    for (position, topic) in topics.iter().take(4).enumerate() {
        filter = match position {
            0 => filter.topic0(*topic),
            1 => filter.topic1(*topic),
            2 => filter.topic2(*topic),
            _ => filter.topic3(*topic),
        };
    }
    filter
}

/// [`LogSource`] over the rate-limited provider pool, with bounded retries for
/// transient failures.
pub struct RpcLogSource {
    pool: Arc<RpcPool>,
    retry_attempts: usize,
    retry_base_delay_ms: u64,
    timeout: Duration,
}

impl RpcLogSource {
    pub fn new(pool: Arc<RpcPool>, settings: &Rpc) -> Self {
        Self {
            pool,
            retry_attempts: settings.retry_attempts,
            retry_base_delay_ms: settings.retry_base_delay_ms,
            timeout: Duration::from_secs(settings.request_timeout_seconds.max(1)),
        }
    }

    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        // 2^n * base/2 ms: base, 2*base, 4*base...
        ExponentialBackoff::from_millis(2)
            .factor((self.retry_base_delay_ms / 2).max(1))
            .map(jitter)
            .take(self.retry_attempts)
    }

    async fn query_logs(&self, filter: &Filter) -> Result<Vec<RawLog>, ChainError> {
        let (provider, _permit) = self
            .pool
            .get_next_provider()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;

        match tokio::time::timeout(self.timeout, provider.get_logs(filter)).await {
            Err(_) => {
                self.pool.report_failure(&provider);
                Err(ChainError::Timeout(self.timeout))
            }
            Ok(Err(e)) => {
                let err = ChainError::from_provider_message(e.to_string());
                match &err {
                    ChainError::RateLimited(_) => self.pool.report_rate_limit_error(&provider),
                    // the node answered; only the range was wrong
                    ChainError::ResponseTooLarge(_) => self.pool.report_success(&provider),
                    _ => self.pool.report_failure(&provider),
                }
                Err(err)
            }
            Ok(Ok(logs)) => {
                self.pool.report_success(&provider);
                Ok(logs.into_iter().map(RawLog::from).collect())
            }
        }
    }

    async fn query_block_number(&self) -> Result<u64, ChainError> {
        let (provider, _permit) = self
            .pool
            .get_next_provider()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;

        match tokio::time::timeout(self.timeout, provider.get_block_number()).await {
            Err(_) => {
                self.pool.report_failure(&provider);
                Err(ChainError::Timeout(self.timeout))
            }
            Ok(Err(e)) => {
                let err = ChainError::from_provider_message(e.to_string());
                if matches!(err, ChainError::RateLimited(_)) {
                    self.pool.report_rate_limit_error(&provider);
                } else {
                    self.pool.report_failure(&provider);
                }
                Err(err)
            }
            Ok(Ok(number)) => {
                self.pool.report_success(&provider);
                Ok(number.as_u64())
            }
        }
    }
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn get_logs(
        &self,
        address: Address,
        topics: &[H256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError> {
        let filter = build_filter(address, topics, from_block, to_block);
        RetryIf::spawn(
            self.retry_strategy(),
            || self.query_logs(&filter),
            |e: &ChainError| e.is_retryable(),
        )
        .await
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        RetryIf::spawn(
            self.retry_strategy(),
            || self.query_block_number(),
            |e: &ChainError| e.is_retryable(),
        )
        .await
    }
}

/// Why a range produced no logs this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ResponseTooLarge,
    RpcFailure(String),
    DepthExceeded { depth: u32 },
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ResponseTooLarge => "response_too_large",
            SkipReason::RpcFailure(_) => "rpc_failure",
            SkipReason::DepthExceeded { .. } => "depth_exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(Vec<RawLog>),
    Skipped(SkipReason),
}

impl FetchOutcome {
    /// Logs on success, empty otherwise.
    pub fn into_logs(self) -> Vec<RawLog> {
        match self {
            FetchOutcome::Fetched(logs) => logs,
            FetchOutcome::Skipped(_) => Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct ChainReader {
    source: Arc<dyn LogSource>,
}

impl ChainReader {
    pub fn new(source: Arc<dyn LogSource>) -> Self {
        Self { source }
    }

    pub async fn fetch_logs(
        &self,
        address: Address,
        topics: &[H256],
        from_block: u64,
        to_block: u64,
    ) -> FetchOutcome {
        match self
            .source
            .get_logs(address, topics, from_block, to_block)
            .await
        {
            Ok(logs) => {
                debug!(from = from_block, to = to_block, count = logs.len(), "Fetched logs");
                FetchOutcome::Fetched(logs)
            }
            Err(ChainError::ResponseTooLarge(message)) => {
                debug!(from = from_block, to = to_block, %message, "Range too large for provider");
                FetchOutcome::Skipped(SkipReason::ResponseTooLarge)
            }
            Err(e) => {
                warn!(from = from_block, to = to_block, error = %e, "Log fetch failed, skipping range");
                FetchOutcome::Skipped(SkipReason::RpcFailure(e.to_string()))
            }
        }
    }

    /// Chain head. Unlike log fetches this error is returned: without a head there is no pass.
    pub async fn head_block(&self) -> Result<u64, ChainError> {
        self.source.block_number().await
    }
}
