use super::asset::Asset;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of the book an order sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Maker offers assets for sale (an "ask")
    Listing,
    /// Maker offers to buy a listing (a "bid")
    Bid,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Listing => "listing",
            OrderKind::Bid => "bid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "listing" => Some(OrderKind::Listing),
            "bid" => Some(OrderKind::Bid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionType {
    #[default]
    FixedPrice,
    English,
    Decreasing,
}

impl AuctionType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AuctionType::FixedPrice),
            1 => Some(AuctionType::English),
            2 => Some(AuctionType::Decreasing),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AuctionType::FixedPrice => 0,
            AuctionType::English => 1,
            AuctionType::Decreasing => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSignature {
    pub v: u8,
    pub r: H256,
    pub s: H256,
}

/// The signed order payload, exactly as the marketplace contract hashes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStruct {
    pub maker: Address,
    pub make_assets: Vec<Asset>,
    pub taker: Address,
    pub take_assets: Vec<Asset>,
    pub salt: U256,
    pub start: u64,
    pub end: u64,
    pub nonce: U256,
    pub auction_type: AuctionType,
}

/// A client submission: the order payload, its claimed hash and signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSubmission {
    pub chain_id: u64,
    pub order_hash: H256,
    pub order: OrderStruct,
    pub signature: OrderSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Approved,
    Cancelled,
    Matched,
}

/// Persisted marketplace order, listing or bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub chain_id: u64,
    pub kind: OrderKind,
    pub order_hash: H256,
    pub maker_address: Address,
    pub taker_address: Address,
    pub make_assets: Vec<Asset>,
    pub take_assets: Vec<Asset>,
    pub start: u64,
    pub end: u64,
    pub nonce: U256,
    pub salt: U256,
    pub auction_type: AuctionType,
    /// `None` for placeholder rows created from chain events
    pub signature: Option<OrderSignature>,
    /// Listing a bid was placed against
    pub listing_id: Option<Uuid>,
    pub approval_tx_hash: Option<H256>,
    pub cancel_tx_hash: Option<H256>,
    pub matched_order_id: Option<Uuid>,
    pub swap_id: Option<Uuid>,
    pub buy_now_taker: Option<Address>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a fresh order from a validated submission.
    pub fn from_submission(kind: OrderKind, submission: &OrderSubmission) -> Self {
        let now = Utc::now();
        let order = &submission.order;
        Self {
            id: Uuid::new_v4(),
            chain_id: submission.chain_id,
            kind,
            order_hash: submission.order_hash,
            maker_address: order.maker,
            taker_address: order.taker,
            make_assets: order.make_assets.clone(),
            take_assets: order.take_assets.clone(),
            start: order.start,
            end: order.end,
            nonce: order.nonce,
            salt: order.salt,
            auction_type: order.auction_type,
            signature: Some(submission.signature),
            listing_id: None,
            approval_tx_hash: None,
            cancel_tx_hash: None,
            matched_order_id: None,
            swap_id: None,
            buy_now_taker: None,
            accepted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Minimal row for an order first seen on-chain. Only the hash is known.
    pub fn placeholder(chain_id: u64, kind: OrderKind, order_hash: H256) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            chain_id,
            kind,
            order_hash,
            maker_address: Address::zero(),
            taker_address: Address::zero(),
            make_assets: Vec::new(),
            take_assets: Vec::new(),
            start: 0,
            end: 0,
            nonce: U256::zero(),
            salt: U256::zero(),
            auction_type: AuctionType::FixedPrice,
            signature: None,
            listing_id: None,
            approval_tx_hash: None,
            cancel_tx_hash: None,
            matched_order_id: None,
            swap_id: None,
            buy_now_taker: None,
            accepted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_tx_hash.is_some()
    }

    pub fn is_matched(&self) -> bool {
        self.matched_order_id.is_some() || self.swap_id.is_some()
    }

    /// Cancelled or matched orders never change state again.
    pub fn is_terminal(&self) -> bool {
        self.is_cancelled() || self.is_matched()
    }

    pub fn status(&self) -> OrderStatus {
        if self.is_cancelled() {
            OrderStatus::Cancelled
        } else if self.is_matched() {
            OrderStatus::Matched
        } else if self.approval_tx_hash.is_some() {
            OrderStatus::Approved
        } else {
            OrderStatus::Pending
        }
    }

    pub fn to_struct(&self) -> OrderStruct {
        OrderStruct {
            maker: self.maker_address,
            make_assets: self.make_assets.clone(),
            taker: self.taker_address,
            take_assets: self.take_assets.clone(),
            salt: self.salt,
            start: self.start,
            end: self.end,
            nonce: self.nonce,
            auction_type: self.auction_type,
        }
    }
}

/// Partial update applied by `OrderLedger::update_fields`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub maker_address: Option<Address>,
    pub taker_address: Option<Address>,
    pub make_assets: Option<Vec<Asset>>,
    pub take_assets: Option<Vec<Asset>>,
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub nonce: Option<U256>,
    pub salt: Option<U256>,
    pub auction_type: Option<AuctionType>,
    pub signature: Option<OrderSignature>,
    pub listing_id: Option<Uuid>,
    pub approval_tx_hash: Option<H256>,
    pub cancel_tx_hash: Option<H256>,
    pub matched_order_id: Option<Uuid>,
    pub swap_id: Option<Uuid>,
    pub buy_now_taker: Option<Address>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl OrderPatch {
    pub fn is_empty(&self) -> bool {
        *self == OrderPatch::default()
    }

    pub fn apply(&self, order: &mut Order) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(value) = &self.$field {
                    order.$field = value.clone();
                })*
            };
        }
        macro_rules! set_opt {
            ($($field:ident),*) => {
                $(if let Some(value) = &self.$field {
                    order.$field = Some(value.clone());
                })*
            };
        }
        set!(
            maker_address,
            taker_address,
            make_assets,
            take_assets,
            start,
            end,
            nonce,
            salt,
            auction_type
        );
        set_opt!(
            signature,
            listing_id,
            approval_tx_hash,
            cancel_tx_hash,
            matched_order_id,
            swap_id,
            buy_now_taker,
            accepted_at
        );
        order.updated_at = Utc::now();
    }
}

/// On-chain settlement joining a listing and (optionally) a bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swap {
    pub id: Uuid,
    pub chain_id: u64,
    pub tx_hash: H256,
    pub block_number: u64,
    pub listing_id: Uuid,
    pub bid_id: Option<Uuid>,
    pub private_sale: bool,
    pub created_at: DateTime<Utc>,
}

impl Swap {
    pub fn new(chain_id: u64, tx_hash: H256, block_number: u64, listing_id: Uuid, bid_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_id,
            tx_hash,
            block_number,
            listing_id,
            bid_id,
            private_sale: false,
            created_at: Utc::now(),
        }
    }
}
