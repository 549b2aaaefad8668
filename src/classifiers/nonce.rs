use super::{ClassifyError, ClassifyOutcome, EventClassifier};
use crate::events::{EventKind, MarketEvent, NonceIncrementedEvent, RawLog};
use crate::ledger::OrderLedger;
use crate::types::OrderPatch;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// `NonceIncremented(maker, newNonce)`: every open order of the maker signed
/// with an older nonce is void.
pub struct NonceIncrementedClassifier {
    ledger: Arc<dyn OrderLedger>,
}

impl NonceIncrementedClassifier {
    pub fn new(ledger: Arc<dyn OrderLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl EventClassifier for NonceIncrementedClassifier {
    fn kind(&self) -> EventKind {
        EventKind::NonceIncremented
    }

    async fn apply(&self, chain_id: u64, log: &RawLog) -> Result<ClassifyOutcome, ClassifyError> {
        let event = NonceIncrementedEvent::decode(log)?;
        let stale = self
            .ledger
            .find_by_maker_with_nonce_below(chain_id, event.maker, event.new_nonce)
            .await?;

        let patch = OrderPatch {
            cancel_tx_hash: Some(log.transaction_hash),
            ..Default::default()
        };
        let mut cancelled = 0;
        for order in stale.into_iter().filter(|o| !o.is_terminal()) {
            self.ledger.update_fields(order.id, &patch).await?;
            cancelled += 1;
        }

        if cancelled == 0 {
            return Ok(ClassifyOutcome::Skipped("no_open_orders"));
        }
        debug!(chain_id, maker = ?event.maker, nonce = %event.new_nonce, cancelled, "Nonce bump cancelled orders");
        Ok(ClassifyOutcome::applied(cancelled))
    }
}
