//! Postgres connection, schema bootstrap and the Postgres-backed
//! [`OrderLedger`] and [`CursorStore`].
//!
//! Addresses and hashes are stored as lowercase `0x` text, 256-bit integers as
//! `NUMERIC(78,0)` and asset lists as JSONB.

use crate::cursor_store::{CursorError, CursorStore};
use crate::ledger::{LedgerError, OrderLedger};
use crate::settings::Database as DatabaseSettings;
use crate::types::conversions::{
    address_to_string, decimal_string_to_u256, h256_to_string, i64_to_u64, string_to_address,
    string_to_h256, u256_to_decimal_string, u64_to_i64, ConversionError,
};
use crate::types::{Asset, AuctionType, Order, OrderKind, OrderPatch, OrderSignature, Swap};
use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Connection, Pool, Postgres, Row};
use std::time::Duration;
use uuid::Uuid;

/// PostgreSQL connection pool type alias.
pub type DbPool = Pool<Postgres>;

impl From<ConversionError> for LedgerError {
    fn from(e: ConversionError) -> Self {
        LedgerError::Backend(format!("corrupt row: {}", e))
    }
}

pub async fn connect(settings: &DatabaseSettings) -> Result<DbPool> {
    // Force UTF-8 client encoding to keep non-ASCII server messages decodable
    std::env::set_var("PGCLIENTENCODING", "UTF8");

    if settings.url.is_empty() {
        anyhow::bail!("database.url (or DATABASE_URL) must be set");
    }

    // Retries with exponential backoff to survive DNS/startup races in Compose
    let mut last_err: Option<anyhow::Error> = None;
    let max_attempts: u32 = 10;
    for attempt in 1..=max_attempts {
        match PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&settings.url)
            .await
        {
            Ok(pool) => {
                log::info!(
                    "✅ Connected to database (attempt {}/{}).",
                    attempt,
                    max_attempts
                );
                match initialize_database(&pool, &settings.schema).await {
                    Ok(()) => return Ok(pool),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(e) => last_err = Some(e.into()),
        }
        let delay_ms = (1u64 << attempt.min(6)) * 200; // 400ms .. 12.8s
        log::warn!(
            "DB connect/init attempt {}/{} failed. Retrying in {} ms...",
            attempt,
            max_attempts,
            delay_ms
        );
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Unknown DB connection error")))
}

/// Creates the schema and tables if missing. Serialised across processes by an
/// advisory lock held for the duration of the transaction.
pub async fn initialize_database(pool: &DbPool, schema: &str) -> Result<()> {
    const MIGRATION_LOCK_ID: i64 = 0x4D41524B4554; // "MARKET"

    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    log::info!("Acquiring database migration lock...");
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(tx.as_mut())
        .await?;

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
        .execute(tx.as_mut())
        .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {}.orders (
            id UUID PRIMARY KEY,
            chain_id BIGINT NOT NULL,
            kind VARCHAR(16) NOT NULL,
            order_hash VARCHAR(66) NOT NULL,
            maker_address VARCHAR(42) NOT NULL,
            taker_address VARCHAR(42) NOT NULL,
            make_assets JSONB NOT NULL DEFAULT '[]',
            take_assets JSONB NOT NULL DEFAULT '[]',
            start_time BIGINT NOT NULL DEFAULT 0,
            end_time BIGINT NOT NULL DEFAULT 0,
            nonce NUMERIC(78, 0) NOT NULL DEFAULT 0,
            salt NUMERIC(78, 0) NOT NULL DEFAULT 0,
            auction_type SMALLINT NOT NULL DEFAULT 0,
            signature JSONB,
            listing_id UUID,
            approval_tx_hash VARCHAR(66),
            cancel_tx_hash VARCHAR(66),
            matched_order_id UUID,
            swap_id UUID,
            buy_now_taker VARCHAR(42),
            accepted_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (chain_id, kind, order_hash)
        )",
        schema
    ))
    .execute(tx.as_mut())
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_orders_maker_nonce ON {}.orders (chain_id, maker_address, nonce)",
        schema
    ))
    .execute(tx.as_mut())
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {}.swaps (
            id UUID PRIMARY KEY,
            chain_id BIGINT NOT NULL,
            tx_hash VARCHAR(66) NOT NULL,
            block_number BIGINT NOT NULL,
            listing_id UUID NOT NULL,
            bid_id UUID,
            private_sale BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        schema
    ))
    .execute(tx.as_mut())
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_swaps_tx ON {}.swaps (chain_id, tx_hash, listing_id)",
        schema
    ))
    .execute(tx.as_mut())
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {}.cursors (
            chain_id BIGINT PRIMARY KEY,
            block_number BIGINT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        schema
    ))
    .execute(tx.as_mut())
    .await?;

    tx.commit().await?;
    log::info!("✅ Database schema '{}' ready.", schema);
    Ok(())
}

const ORDER_COLUMNS: &str = "id, chain_id, kind, order_hash, maker_address, taker_address, \
     make_assets, take_assets, start_time, end_time, nonce::text AS nonce, salt::text AS salt, \
     auction_type, signature, listing_id, approval_tx_hash, cancel_tx_hash, matched_order_id, \
     swap_id, buy_now_taker, accepted_at, created_at, updated_at";

fn opt_hash(row: &PgRow, column: &str) -> Result<Option<H256>, LedgerError> {
    let raw: Option<String> = row.try_get(column)?;
    Ok(raw.as_deref().map(string_to_h256).transpose()?)
}

fn opt_address(row: &PgRow, column: &str) -> Result<Option<Address>, LedgerError> {
    let raw: Option<String> = row.try_get(column)?;
    Ok(raw.as_deref().map(string_to_address).transpose()?)
}

fn row_to_order(row: &PgRow) -> Result<Order, LedgerError> {
    let kind: String = row.try_get("kind")?;
    let auction_type: i16 = row.try_get("auction_type")?;
    let signature: Option<Json<OrderSignature>> = row.try_get("signature")?;

    Ok(Order {
        id: row.try_get("id")?,
        chain_id: i64_to_u64(row.try_get("chain_id")?)?,
        kind: OrderKind::parse(&kind)
            .ok_or_else(|| LedgerError::Backend(format!("unknown order kind '{}'", kind)))?,
        order_hash: string_to_h256(row.try_get("order_hash")?)?,
        maker_address: string_to_address(row.try_get("maker_address")?)?,
        taker_address: string_to_address(row.try_get("taker_address")?)?,
        make_assets: row.try_get::<Json<Vec<Asset>>, _>("make_assets")?.0,
        take_assets: row.try_get::<Json<Vec<Asset>>, _>("take_assets")?.0,
        start: i64_to_u64(row.try_get("start_time")?)?,
        end: i64_to_u64(row.try_get("end_time")?)?,
        nonce: decimal_string_to_u256(row.try_get("nonce")?)?,
        salt: decimal_string_to_u256(row.try_get("salt")?)?,
        auction_type: u8::try_from(auction_type)
            .ok()
            .and_then(AuctionType::from_u8)
            .ok_or_else(|| LedgerError::Backend(format!("unknown auction type {}", auction_type)))?,
        signature: signature.map(|s| s.0),
        listing_id: row.try_get("listing_id")?,
        approval_tx_hash: opt_hash(row, "approval_tx_hash")?,
        cancel_tx_hash: opt_hash(row, "cancel_tx_hash")?,
        matched_order_id: row.try_get("matched_order_id")?,
        swap_id: row.try_get("swap_id")?,
        buy_now_taker: opt_address(row, "buy_now_taker")?,
        accepted_at: row.try_get("accepted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_swap(row: &PgRow) -> Result<Swap, LedgerError> {
    Ok(Swap {
        id: row.try_get("id")?,
        chain_id: i64_to_u64(row.try_get("chain_id")?)?,
        tx_hash: string_to_h256(row.try_get("tx_hash")?)?,
        block_number: i64_to_u64(row.try_get("block_number")?)?,
        listing_id: row.try_get("listing_id")?,
        bid_id: row.try_get("bid_id")?,
        private_sale: row.try_get("private_sale")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Postgres [`OrderLedger`].
#[derive(Clone)]
pub struct PgOrderLedger {
    pool: DbPool,
    schema: String,
}

impl PgOrderLedger {
    pub fn new(pool: DbPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    async fn write_order<'c, E>(&self, executor: E, order: &Order) -> Result<(), LedgerError>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        sqlx::query(&format!(
            "UPDATE {}.orders SET
                maker_address = $2, taker_address = $3, make_assets = $4, take_assets = $5,
                start_time = $6, end_time = $7, nonce = $8::numeric, salt = $9::numeric,
                auction_type = $10, signature = $11, listing_id = $12, approval_tx_hash = $13,
                cancel_tx_hash = $14, matched_order_id = $15, swap_id = $16, buy_now_taker = $17,
                accepted_at = $18, updated_at = $19
             WHERE id = $1",
            self.schema
        ))
        .bind(order.id)
        .bind(address_to_string(order.maker_address))
        .bind(address_to_string(order.taker_address))
        .bind(Json(&order.make_assets))
        .bind(Json(&order.take_assets))
        .bind(u64_to_i64(order.start)?)
        .bind(u64_to_i64(order.end)?)
        .bind(u256_to_decimal_string(order.nonce))
        .bind(u256_to_decimal_string(order.salt))
        .bind(order.auction_type.as_u8() as i16)
        .bind(order.signature.map(Json))
        .bind(order.listing_id)
        .bind(order.approval_tx_hash.map(h256_to_string))
        .bind(order.cancel_tx_hash.map(h256_to_string))
        .bind(order.matched_order_id)
        .bind(order.swap_id)
        .bind(order.buy_now_taker.map(address_to_string))
        .bind(order.accepted_at)
        .bind(order.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderLedger for PgOrderLedger {
    async fn find_by_hash(
        &self,
        chain_id: u64,
        kind: OrderKind,
        order_hash: H256,
    ) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {}.orders WHERE chain_id = $1 AND kind = $2 AND order_hash = $3",
            ORDER_COLUMNS, self.schema
        ))
        .bind(u64_to_i64(chain_id)?)
        .bind(kind.as_str())
        .bind(h256_to_string(order_hash))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {}.orders WHERE id = $1",
            ORDER_COLUMNS, self.schema
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn find_by_maker_with_nonce_below(
        &self,
        chain_id: u64,
        maker: Address,
        nonce: U256,
    ) -> Result<Vec<Order>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {}.orders
             WHERE chain_id = $1 AND maker_address = $2 AND nonce < $3::numeric
             ORDER BY created_at",
            ORDER_COLUMNS, self.schema
        ))
        .bind(u64_to_i64(chain_id)?)
        .bind(address_to_string(maker))
        .bind(u256_to_decimal_string(nonce))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    async fn save(&self, order: Order) -> Result<Order, LedgerError> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO {}.orders (id, chain_id, kind, order_hash, maker_address, taker_address,
                make_assets, take_assets, start_time, end_time, nonce, salt, auction_type, signature,
                listing_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11::numeric, $12::numeric, $13, $14, $15, $16, $17)
             ON CONFLICT (chain_id, kind, order_hash) DO NOTHING
             RETURNING id",
            self.schema
        ))
        .bind(order.id)
        .bind(u64_to_i64(order.chain_id)?)
        .bind(order.kind.as_str())
        .bind(h256_to_string(order.order_hash))
        .bind(address_to_string(order.maker_address))
        .bind(address_to_string(order.taker_address))
        .bind(Json(&order.make_assets))
        .bind(Json(&order.take_assets))
        .bind(u64_to_i64(order.start)?)
        .bind(u64_to_i64(order.end)?)
        .bind(u256_to_decimal_string(order.nonce))
        .bind(u256_to_decimal_string(order.salt))
        .bind(order.auction_type.as_u8() as i16)
        .bind(order.signature.map(Json))
        .bind(order.listing_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_none() {
            return Err(LedgerError::AlreadyExists {
                chain_id: order.chain_id,
                kind: order.kind,
                order_hash: order.order_hash,
            });
        }
        // lifecycle columns written at creation are rare (placeholders carry none)
        if order.approval_tx_hash.is_some()
            || order.cancel_tx_hash.is_some()
            || order.matched_order_id.is_some()
            || order.swap_id.is_some()
            || order.buy_now_taker.is_some()
            || order.accepted_at.is_some()
        {
            self.write_order(&self.pool, &order).await?;
        }
        Ok(order)
    }

    async fn update_fields(&self, id: Uuid, patch: &OrderPatch) -> Result<Order, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM {}.orders WHERE id = $1 FOR UPDATE",
            ORDER_COLUMNS, self.schema
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::NotFound(id))?;

        let mut order = row_to_order(&row)?;
        patch.apply(&mut order);
        self.write_order(&mut *tx, &order).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn find_swap(
        &self,
        chain_id: u64,
        tx_hash: H256,
        listing_id: Uuid,
        bid_id: Option<Uuid>,
    ) -> Result<Option<Swap>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT id, chain_id, tx_hash, block_number, listing_id, bid_id, private_sale, created_at
             FROM {}.swaps
             WHERE chain_id = $1 AND tx_hash = $2 AND listing_id = $3 AND bid_id IS NOT DISTINCT FROM $4",
            self.schema
        ))
        .bind(u64_to_i64(chain_id)?)
        .bind(h256_to_string(tx_hash))
        .bind(listing_id)
        .bind(bid_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_swap).transpose()
    }

    async fn save_swap(&self, swap: Swap) -> Result<Swap, LedgerError> {
        sqlx::query(&format!(
            "INSERT INTO {}.swaps (id, chain_id, tx_hash, block_number, listing_id, bid_id, private_sale, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            self.schema
        ))
        .bind(swap.id)
        .bind(u64_to_i64(swap.chain_id)?)
        .bind(h256_to_string(swap.tx_hash))
        .bind(u64_to_i64(swap.block_number)?)
        .bind(swap.listing_id)
        .bind(swap.bid_id)
        .bind(swap.private_sale)
        .bind(swap.created_at)
        .execute(&self.pool)
        .await?;
        Ok(swap)
    }
}

/// Postgres [`CursorStore`]. The upsert keeps the larger value, which also
/// covers two processes racing between read and write.
#[derive(Clone)]
pub struct PgCursorStore {
    pool: DbPool,
    schema: String,
}

impl PgCursorStore {
    pub fn new(pool: DbPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn get(&self, chain_id: u64) -> Result<Option<u64>, CursorError> {
        let chain = i64::try_from(chain_id).map_err(|_| CursorError::Backend("chain id overflow".into()))?;
        let row = sqlx::query(&format!(
            "SELECT block_number FROM {}.cursors WHERE chain_id = $1",
            self.schema
        ))
        .bind(chain)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let value: i64 = row.try_get("block_number")?;
                u64::try_from(value).map(Some).map_err(|_| CursorError::Corrupt {
                    chain_id,
                    value: value.to_string(),
                })
            }
        }
    }

    async fn advance(&self, chain_id: u64, value: u64) -> Result<Option<u64>, CursorError> {
        let chain = i64::try_from(chain_id).map_err(|_| CursorError::Backend("chain id overflow".into()))?;
        let block = i64::try_from(value).map_err(|_| CursorError::Backend("block overflow".into()))?;
        // Both CTEs read the same snapshot, so `previous` is the value before the upsert.
        let row = sqlx::query(&format!(
            "WITH previous AS (
                SELECT block_number FROM {0}.cursors WHERE chain_id = $1 FOR UPDATE
             ), upsert AS (
                INSERT INTO {0}.cursors (chain_id, block_number, updated_at) VALUES ($1, $2, NOW())
                ON CONFLICT (chain_id) DO UPDATE SET
                    block_number = GREATEST({0}.cursors.block_number, EXCLUDED.block_number),
                    updated_at = NOW()
             )
             SELECT (SELECT block_number FROM previous) AS previous",
            self.schema
        ))
        .bind(chain)
        .bind(block)
        .fetch_one(&self.pool)
        .await?;

        let previous: Option<i64> = row.try_get("previous")?;
        previous
            .map(|value| {
                u64::try_from(value).map_err(|_| CursorError::Corrupt {
                    chain_id,
                    value: value.to_string(),
                })
            })
            .transpose()
    }

    async fn set(&self, chain_id: u64, value: u64) -> Result<(), CursorError> {
        let chain = i64::try_from(chain_id).map_err(|_| CursorError::Backend("chain id overflow".into()))?;
        let block = i64::try_from(value).map_err(|_| CursorError::Backend("block overflow".into()))?;
        sqlx::query(&format!(
            "INSERT INTO {0}.cursors (chain_id, block_number, updated_at) VALUES ($1, $2, NOW())
             ON CONFLICT (chain_id) DO UPDATE SET block_number = EXCLUDED.block_number, updated_at = NOW()",
            self.schema
        ))
        .bind(chain)
        .bind(block)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor_store::advance_cursor;

    async fn test_pool(schema: &str) -> DbPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("connect");
        initialize_database(&pool, schema).await.expect("schema");
        pool
    }

    #[tokio::test]
    #[ignore] // requires a running Postgres (DATABASE_URL)
    async fn order_roundtrip_and_conflict() {
        let pool = test_pool("marketplace_test").await;
        let ledger = PgOrderLedger::new(pool, "marketplace_test");
        let hash = H256::random();

        let mut order = Order::placeholder(4, OrderKind::Listing, hash);
        order.nonce = U256::MAX;
        let saved = ledger.save(order.clone()).await.unwrap();
        let loaded = ledger.find_by_id(saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.nonce, U256::MAX);
        assert_eq!(loaded.order_hash, hash);

        let err = ledger.save(Order::placeholder(4, OrderKind::Listing, hash)).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyExists { .. }));

        let patch = OrderPatch {
            cancel_tx_hash: Some(H256::repeat_byte(1)),
            ..Default::default()
        };
        let updated = ledger.update_fields(saved.id, &patch).await.unwrap();
        assert!(updated.is_cancelled());
    }

    #[tokio::test]
    #[ignore] // requires a running Postgres (DATABASE_URL)
    async fn cursor_never_moves_back() {
        let pool = test_pool("marketplace_test").await;
        let store = PgCursorStore::new(pool, "marketplace_test");
        let chain = 900_000 + (rand_suffix() % 1_000);

        store.set(chain, 50).await.unwrap();
        let (high, low) = futures::join!(advance_cursor(&store, chain, 200), advance_cursor(&store, chain, 100));
        high.unwrap();
        low.unwrap();
        assert_eq!(store.get(chain).await.unwrap(), Some(200));

        assert_eq!(store.advance(chain, 150).await.unwrap(), Some(200));
        assert_eq!(store.get(chain).await.unwrap(), Some(200));
    }

    fn rand_suffix() -> u64 {
        Uuid::new_v4().as_u128() as u64
    }
}
