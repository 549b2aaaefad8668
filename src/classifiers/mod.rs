//! # Event Classifiers
//!
//! One classifier per marketplace event. Each turns a single [`RawLog`] into a
//! ledger update and is idempotent: a transition is only applied while its
//! precondition still holds (e.g. `cancel_tx_hash` is only written while it is
//! null), so re-delivering a log leaves the ledger unchanged.
//!
//! ## Adding an event
//!
//! 1. Add the variant and its signature to [`EventKind`]
//! 2. Add a typed decoder in `events.rs`
//! 3. Implement [`EventClassifier`] and register it in [`default_classifiers`]
//!    at the right position of the scan order

pub mod approval;
pub mod buy_now;
pub mod cancel;
pub mod match_assets;
pub mod match_parties;
pub mod match_swap;
pub mod nonce;

use crate::events::{DecodeError, EventKind, MatchSide, RawLog};
use crate::ledger::{LedgerError, OrderLedger};
use crate::types::OrderKind;
use async_trait::async_trait;
use ethers::types::H256;
use std::sync::Arc;

pub use approval::ApprovalClassifier;
pub use buy_now::BuyNowInfoClassifier;
pub use cancel::CancelClassifier;
pub use match_assets::MatchAssetsClassifier;
pub use match_parties::MatchPartiesClassifier;
pub use match_swap::MatchClassifier;
pub use nonce::NonceIncrementedClassifier;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("Ledger update failed: {0}")]
    Ledger(#[from] LedgerError),
}

impl ClassifyError {
    /// Decode failures are a property of the log and will fail again on replay.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ClassifyError::Decode(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyOutcome {
    /// The ledger changed; `orders` rows were written
    Applied { orders: usize },
    /// Nothing to do: unknown order, precondition no longer holds, or already applied
    Skipped(&'static str),
}

impl ClassifyOutcome {
    pub fn applied(orders: usize) -> Self {
        ClassifyOutcome::Applied { orders }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ClassifyOutcome::Applied { .. })
    }
}

/// Maps one on-chain event type to a ledger update.
#[async_trait]
pub trait EventClassifier: Send + Sync {
    fn kind(&self) -> EventKind;

    fn topic0(&self) -> H256 {
        self.kind().topic0()
    }

    async fn apply(&self, chain_id: u64, log: &RawLog) -> Result<ClassifyOutcome, ClassifyError>;
}

/// Order kind a match phase writes to: listings for the seller, bids for the buyer.
pub(crate) fn side_order_kind(side: MatchSide) -> OrderKind {
    match side {
        MatchSide::Seller => OrderKind::Listing,
        MatchSide::Buyer => OrderKind::Bid,
    }
}

/// Every classifier in scan order. Cancellations precede matches.
pub fn default_classifiers(ledger: Arc<dyn OrderLedger>) -> Vec<Arc<dyn EventClassifier>> {
    let classifiers: Vec<Arc<dyn EventClassifier>> = vec![
        Arc::new(ApprovalClassifier::new(ledger.clone())),
        Arc::new(NonceIncrementedClassifier::new(ledger.clone())),
        Arc::new(CancelClassifier::new(ledger.clone())),
        Arc::new(MatchPartiesClassifier::new(ledger.clone(), MatchSide::Seller)),
        Arc::new(MatchAssetsClassifier::new(ledger.clone(), MatchSide::Seller)),
        Arc::new(MatchPartiesClassifier::new(ledger.clone(), MatchSide::Buyer)),
        Arc::new(MatchAssetsClassifier::new(ledger.clone(), MatchSide::Buyer)),
        Arc::new(MatchClassifier::new(ledger.clone())),
        Arc::new(BuyNowInfoClassifier::new(ledger)),
    ];
    debug_assert!(classifiers
        .iter()
        .map(|c| c.kind())
        .eq(EventKind::SYNC_ORDER.into_iter()));
    classifiers
}
