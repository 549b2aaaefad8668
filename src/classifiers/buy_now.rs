use super::{ClassifyError, ClassifyOutcome, EventClassifier};
use crate::events::{BuyNowInfoEvent, EventKind, MarketEvent, RawLog};
use crate::ledger::OrderLedger;
use crate::types::{OrderKind, OrderPatch};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// `BuyNowInfo(makerHash, taker)`: the buyer of a listing filled directly.
pub struct BuyNowInfoClassifier {
    ledger: Arc<dyn OrderLedger>,
}

impl BuyNowInfoClassifier {
    pub fn new(ledger: Arc<dyn OrderLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl EventClassifier for BuyNowInfoClassifier {
    fn kind(&self) -> EventKind {
        EventKind::BuyNowInfo
    }

    async fn apply(&self, chain_id: u64, log: &RawLog) -> Result<ClassifyOutcome, ClassifyError> {
        let event = BuyNowInfoEvent::decode(log)?;
        let listing = match self
            .ledger
            .find_by_hash(chain_id, OrderKind::Listing, event.maker_hash)
            .await?
        {
            Some(listing) => listing,
            None => return Ok(ClassifyOutcome::Skipped("unknown_order")),
        };
        if listing.buy_now_taker == Some(event.taker) {
            return Ok(ClassifyOutcome::Skipped("unchanged"));
        }

        let patch = OrderPatch {
            buy_now_taker: Some(event.taker),
            ..Default::default()
        };
        self.ledger.update_fields(listing.id, &patch).await?;
        debug!(chain_id, listing = %listing.id, taker = ?event.taker, "Buy-now taker recorded");
        Ok(ClassifyOutcome::applied(1))
    }
}
