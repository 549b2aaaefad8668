use super::{ClassifyError, ClassifyOutcome, EventClassifier};
use crate::events::{ApprovalEvent, EventKind, MarketEvent, RawLog};
use crate::ledger::OrderLedger;
use crate::types::{OrderKind, OrderPatch};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// `Approval(structHash, maker)`: the maker approved an order on-chain.
pub struct ApprovalClassifier {
    ledger: Arc<dyn OrderLedger>,
}

impl ApprovalClassifier {
    pub fn new(ledger: Arc<dyn OrderLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl EventClassifier for ApprovalClassifier {
    fn kind(&self) -> EventKind {
        EventKind::Approval
    }

    async fn apply(&self, chain_id: u64, log: &RawLog) -> Result<ClassifyOutcome, ClassifyError> {
        let event = ApprovalEvent::decode(log)?;

        for kind in [OrderKind::Listing, OrderKind::Bid] {
            let order = match self
                .ledger
                .find_by_hash(chain_id, kind, event.struct_hash)
                .await?
            {
                Some(order) => order,
                None => continue,
            };
            if order.maker_address != event.maker {
                continue;
            }
            if order.approval_tx_hash.is_some() || order.is_terminal() {
                return Ok(ClassifyOutcome::Skipped("already_settled"));
            }

            let patch = OrderPatch {
                approval_tx_hash: Some(log.transaction_hash),
                ..Default::default()
            };
            self.ledger.update_fields(order.id, &patch).await?;
            debug!(chain_id, order = %order.id, kind = kind.as_str(), "Order approved");
            return Ok(ClassifyOutcome::applied(1));
        }

        Ok(ClassifyOutcome::Skipped("unknown_order"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::fixtures::{log_of, order, CHAIN};
    use crate::ledger::InMemoryLedger;
    use ethers::types::{Address, H256};

    #[tokio::test]
    async fn approves_pending_order_once() {
        let ledger = Arc::new(InMemoryLedger::new());
        let maker = Address::from_low_u64_be(1);
        let hash = H256::repeat_byte(0xaa);
        let saved = ledger
            .save(order(OrderKind::Listing, hash, maker, 0))
            .await
            .unwrap();

        let classifier = ApprovalClassifier::new(ledger.clone());
        let log = log_of(
            &ApprovalEvent {
                struct_hash: hash,
                maker,
            },
            0x77,
            0,
        );

        assert!(classifier.apply(CHAIN, &log).await.unwrap().is_applied());
        let after_first = ledger.find_by_id(saved.id).await.unwrap().unwrap();
        assert_eq!(after_first.approval_tx_hash, Some(H256::repeat_byte(0x77)));
        assert_eq!(after_first.cancel_tx_hash, None);

        let second = classifier.apply(CHAIN, &log).await.unwrap();
        assert_eq!(second, ClassifyOutcome::Skipped("already_settled"));
        let after_second = ledger.find_by_id(saved.id).await.unwrap().unwrap();
        assert_eq!(after_first.approval_tx_hash, after_second.approval_tx_hash);
    }

    #[tokio::test]
    async fn approves_bids_too() {
        let ledger = Arc::new(InMemoryLedger::new());
        let maker = Address::from_low_u64_be(2);
        let hash = H256::repeat_byte(0xbb);
        let bid = ledger
            .save(order(OrderKind::Bid, hash, maker, 0))
            .await
            .unwrap();

        let classifier = ApprovalClassifier::new(ledger.clone());
        let log = log_of(&ApprovalEvent { struct_hash: hash, maker }, 1, 0);
        assert!(classifier.apply(CHAIN, &log).await.unwrap().is_applied());
        assert!(ledger
            .find_by_id(bid.id)
            .await
            .unwrap()
            .unwrap()
            .approval_tx_hash
            .is_some());
    }

    #[tokio::test]
    async fn ignores_other_makers() {
        let ledger = Arc::new(InMemoryLedger::new());
        let hash = H256::repeat_byte(0xaa);
        ledger
            .save(order(
                OrderKind::Listing,
                hash,
                Address::from_low_u64_be(1),
                0,
            ))
            .await
            .unwrap();

        let classifier = ApprovalClassifier::new(ledger.clone());
        let log = log_of(
            &ApprovalEvent {
                struct_hash: hash,
                maker: Address::from_low_u64_be(9),
            },
            1,
            0,
        );
        assert_eq!(
            classifier.apply(CHAIN, &log).await.unwrap(),
            ClassifyOutcome::Skipped("unknown_order")
        );
    }

    #[tokio::test]
    async fn cancelled_order_is_not_approved() {
        let ledger = Arc::new(InMemoryLedger::new());
        let maker = Address::from_low_u64_be(1);
        let hash = H256::repeat_byte(0xaa);
        let mut cancelled = order(OrderKind::Listing, hash, maker, 0);
        cancelled.cancel_tx_hash = Some(H256::repeat_byte(3));
        let saved = ledger.save(cancelled).await.unwrap();

        let classifier = ApprovalClassifier::new(ledger.clone());
        let log = log_of(&ApprovalEvent { struct_hash: hash, maker }, 1, 0);
        assert!(!classifier.apply(CHAIN, &log).await.unwrap().is_applied());
        assert!(ledger
            .find_by_id(saved.id)
            .await
            .unwrap()
            .unwrap()
            .approval_tx_hash
            .is_none());
    }
}
