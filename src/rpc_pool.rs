// src/rpc_pool.rs

use crate::metrics;
use crate::settings::Rpc;
use anyhow::Result;
use ethers::prelude::{Http, Provider};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, info, warn};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type DefaultDirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerStateName {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker state for RPC provider health management.
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    state: CircuitBreakerStateName,
    failures: u32,
    last_failure: Option<Instant>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitBreakerStateName::Closed,
            failures: 0,
            last_failure: None,
        }
    }
}

/// Status information for an RPC provider in the pool.
#[derive(Clone)]
pub struct ProviderStatus {
    provider: Arc<Provider<Http>>,
    url: String,
    backoff_until: Arc<Mutex<Instant>>,
    limiter: Arc<DefaultDirectRateLimiter>,
    semaphore: Arc<Semaphore>,
    rate_limit_errors: Arc<AtomicU8>,
    circuit_breaker: Arc<Mutex<CircuitBreakerState>>,
}

/// Load-balanced pool of HTTP JSON-RPC providers.
///
/// Providers are handed out round-robin among those neither backing off nor
/// behind an open circuit breaker. Each provider
/// has its own QPS limiter and concurrency semaphore; the permit returned by
/// [`RpcPool::get_next_provider`] must be held for the duration of the request.
///
/// ```rust,ignore
/// let rpc_pool = Arc::new(RpcPool::new(&settings.rpc, &urls)?);
/// let (provider, _permit) = rpc_pool.get_next_provider().await?;
/// let head = provider.get_block_number().await?;
/// rpc_pool.report_success(&provider);
/// ```
#[derive(Clone)]
pub struct RpcPool {
    providers: Arc<Mutex<Vec<ProviderStatus>>>,
    current_index: Arc<AtomicUsize>,
    settings: Rpc,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// True for provider responses that mean "slow down".
pub fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit")
}

fn host_of(url: &str) -> &str {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or(url)
}

impl RpcPool {
    pub fn new(settings: &Rpc, urls: &[String]) -> Result<Self> {
        let quota = Quota::per_second(
            NonZeroU32::new(settings.qps_limit)
                .ok_or_else(|| anyhow::anyhow!("QPS must be non-zero"))?,
        );

        let mut providers_status = Vec::with_capacity(urls.len());
        for url in urls {
            let provider = Provider::<Http>::try_from(url.as_str())
                .map_err(|e| anyhow::anyhow!("Invalid RPC url {}: {}", url, e))?;
            providers_status.push(ProviderStatus {
                provider: Arc::new(provider),
                url: url.clone(),
                backoff_until: Arc::new(Mutex::new(Instant::now())),
                limiter: Arc::new(RateLimiter::direct(quota)),
                semaphore: Arc::new(Semaphore::new(settings.max_concurrency.max(1))),
                rate_limit_errors: Arc::new(AtomicU8::new(0)),
                circuit_breaker: Arc::new(Mutex::new(CircuitBreakerState::default())),
            });
            info!("RPC provider registered: {}", host_of(url));
        }

        if providers_status.is_empty() {
            return Err(anyhow::anyhow!("No RPC providers configured"));
        }

        Ok(Self {
            providers: Arc::new(Mutex::new(providers_status)),
            current_index: Arc::new(AtomicUsize::new(0)),
            settings: settings.clone(),
        })
    }

    /// Gets the next healthy provider, applying its rate limit and acquiring a concurrency permit.
    pub async fn get_next_provider(&self) -> Result<(Arc<Provider<Http>>, OwnedSemaphorePermit)> {
        let status = self.get_next_provider_internals()?;
        let permit = status.semaphore.clone().acquire_owned().await?;
        status.limiter.until_ready().await;
        debug!("RPC provider selected: {}", host_of(&status.url));
        Ok((status.provider, permit))
    }

    fn get_next_provider_internals(&self) -> Result<ProviderStatus> {
        let providers_guard = lock(&self.providers);
        let now = Instant::now();
        let cooldown = Duration::from_secs(self.settings.circuit_breaker.cooldown_seconds);

        let candidates: Vec<&ProviderStatus> = providers_guard
            .iter()
            .filter(|s| {
                let backoff_until = lock(&s.backoff_until);
                let mut cb = lock(&s.circuit_breaker);
                if cb.state == CircuitBreakerStateName::Open
                    && cb.last_failure.map_or(true, |t| now.duration_since(t) >= cooldown)
                {
                    cb.state = CircuitBreakerStateName::HalfOpen;
                    info!("Provider {} circuit breaker is now HalfOpen.", host_of(&s.url));
                }
                now >= *backoff_until && cb.state != CircuitBreakerStateName::Open
            })
            .collect();

        if candidates.is_empty() {
            return Err(anyhow::anyhow!("No healthy RPC providers available"));
        }

        let index = self.current_index.fetch_add(1, Ordering::SeqCst) % candidates.len();
        Ok(candidates[index].clone())
    }

    fn with_status<F>(&self, provider: &Arc<Provider<Http>>, f: F)
    where
        F: FnOnce(&mut ProviderStatus),
    {
        let mut providers_guard = lock(&self.providers);
        if let Some(status) = providers_guard
            .iter_mut()
            .find(|s| Arc::ptr_eq(&s.provider, provider))
        {
            f(status);
        }
    }

    /// Reports a rate-limit error, backing that provider off exponentially.
    pub fn report_rate_limit_error(&self, provider_to_backoff: &Arc<Provider<Http>>) {
        let base_ms = self.settings.retry_base_delay_ms.max(1);
        self.with_status(provider_to_backoff, |status| {
            let error_count = status
                .rate_limit_errors
                .fetch_add(1, Ordering::SeqCst)
                .saturating_add(1);

            let backoff_duration =
                Duration::from_millis(base_ms.saturating_mul(1u64 << std::cmp::min(error_count, 6)));
            *lock(&status.backoff_until) = Instant::now() + backoff_duration;
            metrics::increment_rpc_429(host_of(&status.url));
            warn!(
                "Rate limit error reported for provider: {}. Error count: {}. Backing off for {:?}",
                host_of(&status.url),
                error_count,
                backoff_duration
            );
        });
    }

    pub fn report_success(&self, provider: &Arc<Provider<Http>>) {
        self.with_status(provider, |status| {
            status.rate_limit_errors.store(0, Ordering::SeqCst);
            let mut cb = lock(&status.circuit_breaker);
            if cb.state != CircuitBreakerStateName::Closed {
                info!("Provider {} recovered, circuit breaker Closed.", host_of(&status.url));
                metrics::set_circuit_breaker_state(&status.url, 0.0);
            }
            cb.state = CircuitBreakerStateName::Closed;
            cb.failures = 0;
        });
    }

    pub fn report_failure(&self, provider: &Arc<Provider<Http>>) {
        let threshold = self.settings.circuit_breaker.failure_threshold;
        self.with_status(provider, |status| {
            let mut cb = lock(&status.circuit_breaker);
            match cb.state {
                CircuitBreakerStateName::HalfOpen => {
                    cb.state = CircuitBreakerStateName::Open;
                    cb.last_failure = Some(Instant::now());
                    warn!(
                        "Provider {} failed in HalfOpen state. Circuit breaker is now Open.",
                        host_of(&status.url)
                    );
                    metrics::set_circuit_breaker_state(&status.url, 1.0);
                }
                CircuitBreakerStateName::Closed => {
                    cb.failures += 1;
                    cb.last_failure = Some(Instant::now());
                    if cb.failures >= threshold {
                        cb.state = CircuitBreakerStateName::Open;
                        warn!(
                            "Provider {} circuit breaker is now Open due to {} consecutive failures.",
                            host_of(&status.url),
                            cb.failures
                        );
                        metrics::set_circuit_breaker_state(&status.url, 1.0);
                    }
                }
                CircuitBreakerStateName::Open => {}
            }
        });
    }
}
