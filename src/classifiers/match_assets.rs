use super::{side_order_kind, ClassifyError, ClassifyOutcome, EventClassifier};
use crate::events::{EventKind, MatchAssetsEvent, MatchSide, RawLog};
use crate::ledger::OrderLedger;
use crate::types::{Order, OrderPatch};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// `Match2B` / `Match3B`: records the make and take asset lists of one side.
pub struct MatchAssetsClassifier {
    ledger: Arc<dyn OrderLedger>,
    side: MatchSide,
}

impl MatchAssetsClassifier {
    pub fn new(ledger: Arc<dyn OrderLedger>, side: MatchSide) -> Self {
        Self { ledger, side }
    }
}

#[async_trait]
impl EventClassifier for MatchAssetsClassifier {
    fn kind(&self) -> EventKind {
        self.side.assets_kind()
    }

    async fn apply(&self, chain_id: u64, log: &RawLog) -> Result<ClassifyOutcome, ClassifyError> {
        let event = MatchAssetsEvent::decode_side(self.side, log)?;
        let kind = side_order_kind(self.side);
        let (order, _) = self
            .ledger
            .find_or_create(Order::placeholder(chain_id, kind, event.order_hash))
            .await?;

        // No terminal check: phase events come from the settling transaction
        // itself and only fill in order data, never lifecycle columns.
        let patch = OrderPatch {
            make_assets: (order.make_assets != event.make_assets).then_some(event.make_assets),
            take_assets: (order.take_assets != event.take_assets).then_some(event.take_assets),
            ..Default::default()
        };
        if patch.is_empty() {
            return Ok(ClassifyOutcome::Skipped("unchanged"));
        }
        self.ledger.update_fields(order.id, &patch).await?;
        debug!(chain_id, order = %order.id, kind = kind.as_str(), "Match assets recorded");
        Ok(ClassifyOutcome::applied(1))
    }
}
