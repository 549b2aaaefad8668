use super::{ClassifyError, ClassifyOutcome, EventClassifier};
use crate::events::{CancelEvent, EventKind, MarketEvent, RawLog};
use crate::ledger::OrderLedger;
use crate::types::{OrderKind, OrderPatch};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// `Cancel(structHash, maker)`: the maker withdrew one order.
///
/// Approved orders can still be cancelled; matched ones cannot.
pub struct CancelClassifier {
    ledger: Arc<dyn OrderLedger>,
}

impl CancelClassifier {
    pub fn new(ledger: Arc<dyn OrderLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl EventClassifier for CancelClassifier {
    fn kind(&self) -> EventKind {
        EventKind::Cancel
    }

    async fn apply(&self, chain_id: u64, log: &RawLog) -> Result<ClassifyOutcome, ClassifyError> {
        let event = CancelEvent::decode(log)?;

        for kind in [OrderKind::Listing, OrderKind::Bid] {
            let order = match self
                .ledger
                .find_by_hash(chain_id, kind, event.struct_hash)
                .await?
            {
                Some(order) if order.maker_address == event.maker => order,
                _ => continue,
            };
            if order.is_terminal() {
                return Ok(ClassifyOutcome::Skipped("already_settled"));
            }

            let patch = OrderPatch {
                cancel_tx_hash: Some(log.transaction_hash),
                ..Default::default()
            };
            self.ledger.update_fields(order.id, &patch).await?;
            debug!(chain_id, order = %order.id, kind = kind.as_str(), "Order cancelled");
            return Ok(ClassifyOutcome::applied(1));
        }

        Ok(ClassifyOutcome::Skipped("unknown_order"))
    }
}
