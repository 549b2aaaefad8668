use super::{side_order_kind, ClassifyError, ClassifyOutcome, EventClassifier};
use crate::events::{EventKind, MatchPartiesEvent, MatchSide, RawLog};
use crate::ledger::OrderLedger;
use crate::types::{Order, OrderPatch};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// `Match2A` / `Match3A`: records maker, taker, timing, nonce and salt of one
/// side of a match, creating the order if it was never submitted off-chain.
pub struct MatchPartiesClassifier {
    ledger: Arc<dyn OrderLedger>,
    side: MatchSide,
}

impl MatchPartiesClassifier {
    pub fn new(ledger: Arc<dyn OrderLedger>, side: MatchSide) -> Self {
        Self { ledger, side }
    }
}

fn diff(order: &Order, event: &MatchPartiesEvent) -> OrderPatch {
    fn changed<T: PartialEq + Clone>(current: &T, incoming: &T) -> Option<T> {
        (current != incoming).then(|| incoming.clone())
    }
    OrderPatch {
        maker_address: changed(&order.maker_address, &event.maker),
        taker_address: changed(&order.taker_address, &event.taker),
        start: changed(&order.start, &event.start),
        end: changed(&order.end, &event.end),
        nonce: changed(&order.nonce, &event.nonce),
        salt: changed(&order.salt, &event.salt),
        ..Default::default()
    }
}

#[async_trait]
impl EventClassifier for MatchPartiesClassifier {
    fn kind(&self) -> EventKind {
        self.side.parties_kind()
    }

    async fn apply(&self, chain_id: u64, log: &RawLog) -> Result<ClassifyOutcome, ClassifyError> {
        let event = MatchPartiesEvent::decode_side(self.side, log)?;
        let kind = side_order_kind(self.side);
        let (order, created) = self
            .ledger
            .find_or_create(Order::placeholder(chain_id, kind, event.order_hash))
            .await?;

        // No terminal check: phase events come from the settling transaction
        // itself and only fill in order data, never lifecycle columns.
        let patch = diff(&order, &event);
        if patch.is_empty() {
            return Ok(ClassifyOutcome::Skipped("unchanged"));
        }
        self.ledger.update_fields(order.id, &patch).await?;
        debug!(chain_id, order = %order.id, kind = kind.as_str(), created, "Match parties recorded");
        Ok(ClassifyOutcome::applied(1))
    }
}
