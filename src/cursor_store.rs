//! Per-chain sync cursor: the highest block already folded into the ledger.
//!
//! Every backend provides an atomic max-update ([`CursorStore::advance`]) so
//! that concurrent writers, in this process or another, can never leave a
//! lower value behind. [`advance_cursor`] builds the forward-only guard on top
//! of it and reports whether the write moved the cursor.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{info, warn};

#[cfg(feature = "redis")]
use once_cell::sync::Lazy;
#[cfg(feature = "redis")]
use redis::aio::ConnectionManager;
#[cfg(feature = "redis")]
use redis::AsyncCommands;

#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("Cursor backend error: {0}")]
    Backend(String),
    #[error("Stored cursor for chain {chain_id} is corrupt: {value}")]
    Corrupt { chain_id: u64, value: String },
}

impl From<sqlx::Error> for CursorError {
    fn from(e: sqlx::Error) -> Self {
        CursorError::Backend(e.to_string())
    }
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get(&self, chain_id: u64) -> Result<Option<u64>, CursorError>;

    /// Stores `max(stored, value)` in one atomic step and returns the value
    /// that was stored before the call.
    async fn advance(&self, chain_id: u64, value: u64) -> Result<Option<u64>, CursorError>;

    /// Overwrites the cursor unconditionally. Meant for operator resets; the
    /// sync path only goes through [`advance_cursor`].
    async fn set(&self, chain_id: u64, value: u64) -> Result<(), CursorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorAdvance {
    Advanced { previous: Option<u64>, current: u64 },
    Unchanged(u64),
    /// A stale writer tried to move the cursor backwards
    Refused { stored: u64, attempted: u64 },
}

/// Moves the cursor to `value` unless a higher one is already stored.
pub async fn advance_cursor(
    store: &dyn CursorStore,
    chain_id: u64,
    value: u64,
) -> Result<CursorAdvance, CursorError> {
    match store.advance(chain_id, value).await? {
        Some(stored) if value < stored => {
            warn!(
                "Refusing to move cursor for chain {} backwards ({} -> {})",
                chain_id, stored, value
            );
            Ok(CursorAdvance::Refused {
                stored,
                attempted: value,
            })
        }
        Some(stored) if value == stored => Ok(CursorAdvance::Unchanged(stored)),
        previous => {
            info!("Cursor for chain {} advanced to {}", chain_id, value);
            crate::metrics::set_cursor_block(chain_id, value);
            Ok(CursorAdvance::Advanced {
                previous,
                current: value,
            })
        }
    }
}

#[derive(Default)]
pub struct InMemoryCursorStore {
    cursors: DashMap<u64, u64>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get(&self, chain_id: u64) -> Result<Option<u64>, CursorError> {
        Ok(self.cursors.get(&chain_id).map(|v| *v))
    }

    async fn advance(&self, chain_id: u64, value: u64) -> Result<Option<u64>, CursorError> {
        match self.cursors.entry(chain_id) {
            Entry::Occupied(mut entry) => {
                let previous = *entry.get();
                if value > previous {
                    entry.insert(value);
                }
                Ok(Some(previous))
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(None)
            }
        }
    }

    async fn set(&self, chain_id: u64, value: u64) -> Result<(), CursorError> {
        self.cursors.insert(chain_id, value);
        Ok(())
    }
}

// GET and conditional SET run as one script, so no other client can interleave.
#[cfg(feature = "redis")]
static ADVANCE_SCRIPT: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r"
        local previous = redis.call('GET', KEYS[1])
        if (not previous) or tonumber(previous) < tonumber(ARGV[1]) then
            redis.call('SET', KEYS[1], ARGV[1])
        end
        return previous
        ",
    )
});

/// Cursor kept in Redis under `cached_block_{chain_id}`.
#[cfg(feature = "redis")]
pub struct RedisCursorStore {
    conn: ConnectionManager,
}

#[cfg(feature = "redis")]
impl RedisCursorStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client = redis::Client::open(url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        info!("✅ Redis cursor store connected");
        Ok(Self { conn })
    }

    fn key(chain_id: u64) -> String {
        format!("cached_block_{}", chain_id)
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl CursorStore for RedisCursorStore {
    async fn get(&self, chain_id: u64) -> Result<Option<u64>, CursorError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::key(chain_id))
            .await
            .map_err(|e| CursorError::Backend(e.to_string()))?;
        match raw {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| CursorError::Corrupt { chain_id, value }),
        }
    }

    async fn advance(&self, chain_id: u64, value: u64) -> Result<Option<u64>, CursorError> {
        let mut conn = self.conn.clone();
        let previous: Option<String> = ADVANCE_SCRIPT
            .key(Self::key(chain_id))
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CursorError::Backend(e.to_string()))?;
        match previous {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| CursorError::Corrupt { chain_id, value }),
        }
    }

    async fn set(&self, chain_id: u64, value: u64) -> Result<(), CursorError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::key(chain_id), value)
            .await
            .map_err(|e| CursorError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_write_advances_from_nothing() {
        let store = InMemoryCursorStore::new();
        let result = advance_cursor(&store, 4, 100).await.unwrap();
        assert_eq!(
            result,
            CursorAdvance::Advanced {
                previous: None,
                current: 100
            }
        );
        assert_eq!(store.get(4).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn guard_keeps_maximum() {
        let store = InMemoryCursorStore::new();
        for v in [10u64, 50, 20, 50, 45, 70, 3] {
            advance_cursor(&store, 1, v).await.unwrap();
        }
        assert_eq!(store.get(1).await.unwrap(), Some(70));
    }

    #[tokio::test]
    async fn lower_value_is_refused() {
        let store = InMemoryCursorStore::new();
        store.set(1, 500).await.unwrap();
        let result = advance_cursor(&store, 1, 499).await.unwrap();
        assert_eq!(
            result,
            CursorAdvance::Refused {
                stored: 500,
                attempted: 499
            }
        );
        assert_eq!(
            advance_cursor(&store, 1, 500).await.unwrap(),
            CursorAdvance::Unchanged(500)
        );
        // chains are independent
        assert_eq!(store.get(2).await.unwrap(), None);
    }

    /// Suspends before every backend call so concurrent callers interleave.
    struct YieldingStore(InMemoryCursorStore);

    #[async_trait]
    impl CursorStore for YieldingStore {
        async fn get(&self, chain_id: u64) -> Result<Option<u64>, CursorError> {
            tokio::task::yield_now().await;
            self.0.get(chain_id).await
        }

        async fn advance(&self, chain_id: u64, value: u64) -> Result<Option<u64>, CursorError> {
            tokio::task::yield_now().await;
            self.0.advance(chain_id, value).await
        }

        async fn set(&self, chain_id: u64, value: u64) -> Result<(), CursorError> {
            tokio::task::yield_now().await;
            self.0.set(chain_id, value).await
        }
    }

    #[tokio::test]
    async fn interleaved_writers_keep_the_higher_value() {
        let store = YieldingStore(InMemoryCursorStore::new());
        store.set(1, 50).await.unwrap();

        let (high, low) = futures::join!(advance_cursor(&store, 1, 200), advance_cursor(&store, 1, 100));
        assert_eq!(
            high.unwrap(),
            CursorAdvance::Advanced {
                previous: Some(50),
                current: 200
            }
        );
        assert_eq!(
            low.unwrap(),
            CursorAdvance::Refused {
                stored: 200,
                attempted: 100
            }
        );
        assert_eq!(store.get(1).await.unwrap(), Some(200));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_advances_end_at_maximum() {
        let store = Arc::new(InMemoryCursorStore::new());
        let writers = (1..=64u64).rev().chain(1..=64).map(|v| {
            let store = store.clone();
            tokio::spawn(async move { advance_cursor(store.as_ref(), 7, v * 10).await })
        });
        let results = futures::future::join_all(writers).await;

        let advanced = results
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .filter(|r| matches!(r, CursorAdvance::Advanced { .. }))
            .count();
        assert!(advanced >= 1);
        assert_eq!(store.get(7).await.unwrap(), Some(640));
    }
}
