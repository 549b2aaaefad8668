//! Listing and bid creation: duplicate check, validation gates, persistence.
//!
//! Nothing is written unless every gate passed.

use crate::ledger::{LedgerError, OrderLedger};
use crate::order_validator::{unix_now, OrderValidator, ValidationError};
use crate::types::{Order, OrderKind, OrderSubmission};
use log::info;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("Listing {0} not found")]
    ListingNotFound(Uuid),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl MarketError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, MarketError::Ledger(LedgerError::AlreadyExists { .. }))
    }
}

pub struct MarketService {
    ledger: Arc<dyn OrderLedger>,
    validator: OrderValidator,
}

impl MarketService {
    pub fn new(ledger: Arc<dyn OrderLedger>, validator: OrderValidator) -> Self {
        Self { ledger, validator }
    }

    async fn ensure_new(&self, kind: OrderKind, submission: &OrderSubmission) -> Result<(), MarketError> {
        let existing = self
            .ledger
            .find_by_hash(submission.chain_id, kind, submission.order_hash)
            .await?;
        match existing {
            Some(_) => Err(LedgerError::AlreadyExists {
                chain_id: submission.chain_id,
                kind,
                order_hash: submission.order_hash,
            }
            .into()),
            None => Ok(()),
        }
    }

    pub async fn create_listing(&self, submission: &OrderSubmission) -> Result<Order, MarketError> {
        self.ensure_new(OrderKind::Listing, submission).await?;
        self.validator.validate_order(submission).await?;

        let saved = self
            .ledger
            .save(Order::from_submission(OrderKind::Listing, submission))
            .await?;
        info!(
            "Listing {} created on chain {} by {:?}",
            saved.id, saved.chain_id, saved.maker_address
        );
        Ok(saved)
    }

    pub async fn create_bid(&self, listing_id: Uuid, submission: &OrderSubmission) -> Result<Order, MarketError> {
        self.create_bid_at(listing_id, submission, unix_now()).await
    }

    /// [`create_bid`](Self::create_bid) with the time windows checked at `now`.
    pub async fn create_bid_at(
        &self,
        listing_id: Uuid,
        submission: &OrderSubmission,
        now: u64,
    ) -> Result<Order, MarketError> {
        let listing = self
            .ledger
            .find_by_id(listing_id)
            .await?
            .filter(|l| l.kind == OrderKind::Listing && l.chain_id == submission.chain_id)
            .ok_or(MarketError::ListingNotFound(listing_id))?;
        self.ensure_new(OrderKind::Bid, submission).await?;

        self.validator.validate_order(submission).await?;
        self.validator
            .validate_bid_at(&listing, submission, now)
            .await?;

        let mut bid = Order::from_submission(OrderKind::Bid, submission);
        bid.listing_id = Some(listing.id);
        let saved = self.ledger.save(bid).await?;
        info!(
            "Bid {} on listing {} created on chain {} by {:?}",
            saved.id, listing.id, saved.chain_id, saved.maker_address
        );
        Ok(saved)
    }
}
