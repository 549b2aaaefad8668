//! Order Ledger repository seam and its in-memory backend.
//!
//! The ledger is the off-chain read model of listings, bids and swaps. Backends
//! enforce one invariant themselves: `(chain_id, kind, order_hash)` is unique.
//! Lifecycle preconditions (terminal orders stay terminal) are enforced by the
//! callers before they issue an update.

use crate::types::{Order, OrderKind, OrderPatch, Swap};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ethers::types::{Address, H256, U256};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{} {order_hash:?} already exists on chain {chain_id}", .kind.as_str())]
    AlreadyExists {
        chain_id: u64,
        kind: OrderKind,
        order_hash: H256,
    },
    #[error("Record {0} not found")]
    NotFound(Uuid),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Backend(e.to_string())
    }
}

#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn find_by_hash(
        &self,
        chain_id: u64,
        kind: OrderKind,
        order_hash: H256,
    ) -> Result<Option<Order>, LedgerError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, LedgerError>;

    /// Orders of either kind by `maker` whose nonce is strictly below `nonce`.
    async fn find_by_maker_with_nonce_below(
        &self,
        chain_id: u64,
        maker: Address,
        nonce: U256,
    ) -> Result<Vec<Order>, LedgerError>;

    /// Fails with [`LedgerError::AlreadyExists`] on a duplicate hash.
    async fn save(&self, order: Order) -> Result<Order, LedgerError>;

    async fn update_fields(&self, id: Uuid, patch: &OrderPatch) -> Result<Order, LedgerError>;

    async fn find_swap(
        &self,
        chain_id: u64,
        tx_hash: H256,
        listing_id: Uuid,
        bid_id: Option<Uuid>,
    ) -> Result<Option<Swap>, LedgerError>;

    async fn save_swap(&self, swap: Swap) -> Result<Swap, LedgerError>;

    /// Looks the hash up as a listing first, then as a bid.
    async fn find_any_by_hash(&self, chain_id: u64, order_hash: H256) -> Result<Option<Order>, LedgerError> {
        if let Some(order) = self
            .find_by_hash(chain_id, OrderKind::Listing, order_hash)
            .await?
        {
            return Ok(Some(order));
        }
        self.find_by_hash(chain_id, OrderKind::Bid, order_hash).await
    }

    /// Returns the existing order for the hash, or saves `placeholder`.
    async fn find_or_create(&self, placeholder: Order) -> Result<(Order, bool), LedgerError> {
        if let Some(existing) = self
            .find_by_hash(placeholder.chain_id, placeholder.kind, placeholder.order_hash)
            .await?
        {
            return Ok((existing, false));
        }
        match self.save(placeholder.clone()).await {
            Ok(saved) => Ok((saved, true)),
            // lost a race with a concurrent writer; theirs wins
            Err(LedgerError::AlreadyExists { .. }) => self
                .find_by_hash(placeholder.chain_id, placeholder.kind, placeholder.order_hash)
                .await?
                .map(|o| (o, false))
                .ok_or(LedgerError::NotFound(placeholder.id)),
            Err(e) => Err(e),
        }
    }
}

type HashKey = (u64, OrderKind, H256);

/// DashMap-backed ledger for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryLedger {
    orders: DashMap<Uuid, Order>,
    by_hash: DashMap<HashKey, Uuid>,
    swaps: DashMap<Uuid, Swap>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn swap_count(&self) -> usize {
        self.swaps.len()
    }

    /// Snapshot of every order, sorted by creation time.
    pub fn orders(&self) -> Vec<Order> {
        let mut all: Vec<Order> = self.orders.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|o| o.created_at);
        all
    }

    pub fn swaps(&self) -> Vec<Swap> {
        self.swaps.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl OrderLedger for InMemoryLedger {
    async fn find_by_hash(
        &self,
        chain_id: u64,
        kind: OrderKind,
        order_hash: H256,
    ) -> Result<Option<Order>, LedgerError> {
        let id = match self.by_hash.get(&(chain_id, kind, order_hash)) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, LedgerError> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn find_by_maker_with_nonce_below(
        &self,
        chain_id: u64,
        maker: Address,
        nonce: U256,
    ) -> Result<Vec<Order>, LedgerError> {
        Ok(self
            .orders
            .iter()
            .filter(|o| o.chain_id == chain_id && o.maker_address == maker && o.nonce < nonce)
            .map(|o| o.clone())
            .collect())
    }

    async fn save(&self, order: Order) -> Result<Order, LedgerError> {
        match self
            .by_hash
            .entry((order.chain_id, order.kind, order.order_hash))
        {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists {
                chain_id: order.chain_id,
                kind: order.kind,
                order_hash: order.order_hash,
            }),
            Entry::Vacant(slot) => {
                slot.insert(order.id);
                self.orders.insert(order.id, order.clone());
                Ok(order)
            }
        }
    }

    async fn update_fields(&self, id: Uuid, patch: &OrderPatch) -> Result<Order, LedgerError> {
        let mut entry = self.orders.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        patch.apply(entry.value_mut());
        Ok(entry.clone())
    }

    async fn find_swap(
        &self,
        chain_id: u64,
        tx_hash: H256,
        listing_id: Uuid,
        bid_id: Option<Uuid>,
    ) -> Result<Option<Swap>, LedgerError> {
        Ok(self
            .swaps
            .iter()
            .find(|s| {
                s.chain_id == chain_id
                    && s.tx_hash == tx_hash
                    && s.listing_id == listing_id
                    && s.bid_id == bid_id
            })
            .map(|s| s.clone()))
    }

    async fn save_swap(&self, swap: Swap) -> Result<Swap, LedgerError> {
        self.swaps.insert(swap.id, swap.clone());
        Ok(swap)
    }
}
