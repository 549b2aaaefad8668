//! Order Validator
//!
//! Decides whether a submitted listing or bid may enter the ledger. Two gates:
//!
//! - **Gate 1** (every order): the marketplace contract recomputes the struct
//!   hash from the submitted fields and checks the signature. The submitted hash
//!   must equal the computed one and the signature must be valid.
//! - **Gate 2** (bids only): the bid is checked against its target listing.
//!   Time windows, then the listing's taker restriction, then the contract's
//!   asset match. The first failing check is reported.
//!
//! Authority errors fail closed: an unreachable contract rejects the order.
//! Both gates are read-only.

use crate::authority::{AuthorityError, ChainAuthority};
use crate::metrics;
use crate::types::{Order, OrderStruct, OrderSubmission};
use chrono::Utc;
use ethers::types::{Address, H256};
use log::{debug, warn};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("calculated structHash {computed:?} doesn't match input structHash {submitted:?}")]
    StructHashMismatch { submitted: H256, computed: H256 },
    #[error("Order signature is invalid")]
    BadSignature,
    #[error("Invalid listing end: {end} (expired)")]
    AskExpired { end: u64 },
    #[error("Invalid bid end: {end} (expired)")]
    BidExpired { end: u64 },
    #[error("Invalid listing start: {start} (not started)")]
    AskNotStarted { start: u64 },
    #[error("Invalid bid start: {start} (not started)")]
    BidNotStarted { start: u64 },
    #[error("Bidder {bidder:?} not equal to listing taker {taker:?}")]
    TakerMismatch { taker: Address, bidder: Address },
    #[error("Bid does not match the listing")]
    AssetMismatch,
    #[error("Listing is already cancelled or matched")]
    ListingClosed,
    #[error("Chain authority unavailable: {0}")]
    AuthorityUnavailable(#[from] AuthorityError),
}

impl ValidationError {
    /// Stable reason code for callers and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationError::StructHashMismatch { .. } => "struct_hash_mismatch",
            ValidationError::BadSignature => "bad_signature",
            ValidationError::AskExpired { .. } => "ask_expired",
            ValidationError::BidExpired { .. } => "bid_expired",
            ValidationError::AskNotStarted { .. } => "ask_not_started",
            ValidationError::BidNotStarted { .. } => "bid_not_started",
            ValidationError::TakerMismatch { .. } => "taker_mismatch",
            ValidationError::AssetMismatch => "asset_mismatch",
            ValidationError::ListingClosed => "listing_closed",
            ValidationError::AuthorityUnavailable(_) => "authority_unavailable",
        }
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Zero bounds are open. Checked in the order ask start, bid start, ask end, bid end.
pub fn check_time_windows(listing: &OrderStruct, bid: &OrderStruct, now: u64) -> Result<(), ValidationError> {
    if !(listing.start == 0 || listing.start < now) {
        return Err(ValidationError::AskNotStarted { start: listing.start });
    }
    if !(bid.start == 0 || bid.start < now) {
        return Err(ValidationError::BidNotStarted { start: bid.start });
    }
    if !(listing.end == 0 || listing.end > now) {
        return Err(ValidationError::AskExpired { end: listing.end });
    }
    if !(bid.end == 0 || bid.end > now) {
        return Err(ValidationError::BidExpired { end: bid.end });
    }
    Ok(())
}

/// A non-zero listing taker makes the listing private to that bidder.
pub fn check_taker(listing: &OrderStruct, bid: &OrderStruct) -> Result<(), ValidationError> {
    if listing.taker.is_zero() || listing.taker == bid.maker {
        return Ok(());
    }
    Err(ValidationError::TakerMismatch {
        taker: listing.taker,
        bidder: bid.maker,
    })
}

pub struct OrderValidator {
    authority: Arc<dyn ChainAuthority>,
}

impl OrderValidator {
    pub fn new(authority: Arc<dyn ChainAuthority>) -> Self {
        Self { authority }
    }

    /// Gate 1.
    pub async fn validate_order(&self, submission: &OrderSubmission) -> Result<(), ValidationError> {
        let result = self.structural(submission).await;
        record("order", &result);
        result
    }

    /// Gate 2 against the current time.
    pub async fn validate_bid(&self, listing: &Order, bid: &OrderSubmission) -> Result<(), ValidationError> {
        self.validate_bid_at(listing, bid, unix_now()).await
    }

    /// Gate 2 at `now` (unix seconds).
    pub async fn validate_bid_at(
        &self,
        listing: &Order,
        bid: &OrderSubmission,
        now: u64,
    ) -> Result<(), ValidationError> {
        let result = self.cross_validate(listing, bid, now).await;
        record("bid", &result);
        result
    }

    async fn structural(&self, submission: &OrderSubmission) -> Result<(), ValidationError> {
        let check = self
            .authority
            .validate_order(&submission.order, &submission.signature)
            .await
            .map_err(|e| {
                warn!("Order validation call failed for {:?}: {}", submission.order_hash, e);
                ValidationError::from(e)
            })?;

        if check.struct_hash != submission.order_hash {
            return Err(ValidationError::StructHashMismatch {
                submitted: submission.order_hash,
                computed: check.struct_hash,
            });
        }
        if !check.signature_valid {
            return Err(ValidationError::BadSignature);
        }
        Ok(())
    }

    async fn cross_validate(&self, listing: &Order, bid: &OrderSubmission, now: u64) -> Result<(), ValidationError> {
        if listing.is_terminal() {
            return Err(ValidationError::ListingClosed);
        }
        let ask = listing.to_struct();
        check_time_windows(&ask, &bid.order, now)?;
        check_taker(&ask, &bid.order)?;

        let matches = self
            .authority
            .validate_match(&ask, &bid.order, ask.maker, false)
            .await
            .map_err(|e| {
                warn!(
                    "Match validation call failed for listing {:?} / bid {:?}: {}",
                    listing.order_hash, bid.order_hash, e
                );
                ValidationError::from(e)
            })?;
        if !matches {
            return Err(ValidationError::AssetMismatch);
        }
        Ok(())
    }
}

fn record(kind: &'static str, result: &Result<(), ValidationError>) {
    match result {
        Ok(()) => metrics::increment_validation("accepted", kind),
        Err(e) => {
            debug!("{} rejected: {}", kind, e);
            metrics::increment_validation("rejected", e.as_str());
        }
    }
}
