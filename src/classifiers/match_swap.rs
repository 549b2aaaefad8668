use super::{ClassifyError, ClassifyOutcome, EventClassifier};
use crate::events::{EventKind, MarketEvent, MatchEvent, RawLog};
use crate::ledger::{LedgerError, OrderLedger};
use crate::types::{Order, OrderKind, OrderPatch, OrderSignature, Swap};
use async_trait::async_trait;
use chrono::Utc;
use ethers::types::H256;
use std::sync::Arc;
use tracing::{debug, info};

/// `Match(makerHash, takerHash, ...)`: links a listing and its bid through a
/// swap record.
///
/// The maker hash normally names the listing. When it is only known as a bid,
/// the roles are swapped. A zero taker hash means the listing was filled
/// without a bid order. A cancelled side is never linked, so a cancellation
/// seen earlier in the same pass wins over the match.
pub struct MatchClassifier {
    ledger: Arc<dyn OrderLedger>,
}

struct Resolved {
    listing: Option<Order>,
    bid: Option<Order>,
    listing_hash: H256,
    bid_hash: H256,
    listing_is_maker: bool,
}

impl MatchClassifier {
    pub fn new(ledger: Arc<dyn OrderLedger>) -> Self {
        Self { ledger }
    }

    async fn find(&self, chain_id: u64, kind: OrderKind, hash: H256) -> Result<Option<Order>, LedgerError> {
        if hash.is_zero() {
            return Ok(None);
        }
        self.ledger.find_by_hash(chain_id, kind, hash).await
    }

    async fn resolve(&self, chain_id: u64, event: &MatchEvent) -> Result<Resolved, LedgerError> {
        if let Some(listing) = self.find(chain_id, OrderKind::Listing, event.maker_hash).await? {
            return Ok(Resolved {
                listing: Some(listing),
                bid: self.find(chain_id, OrderKind::Bid, event.taker_hash).await?,
                listing_hash: event.maker_hash,
                bid_hash: event.taker_hash,
                listing_is_maker: true,
            });
        }
        if let Some(bid) = self.find(chain_id, OrderKind::Bid, event.maker_hash).await? {
            return Ok(Resolved {
                listing: self.find(chain_id, OrderKind::Listing, event.taker_hash).await?,
                bid: Some(bid),
                listing_hash: event.taker_hash,
                bid_hash: event.maker_hash,
                listing_is_maker: false,
            });
        }
        Ok(Resolved {
            listing: None,
            bid: self.find(chain_id, OrderKind::Bid, event.taker_hash).await?,
            listing_hash: event.maker_hash,
            bid_hash: event.taker_hash,
            listing_is_maker: true,
        })
    }

    async fn existing_or_placeholder(
        &self,
        chain_id: u64,
        kind: OrderKind,
        hash: H256,
        found: Option<Order>,
    ) -> Result<Order, LedgerError> {
        match found {
            Some(order) => Ok(order),
            None => {
                let (order, created) = self
                    .ledger
                    .find_or_create(Order::placeholder(chain_id, kind, hash))
                    .await?;
                if created {
                    debug!(chain_id, kind = kind.as_str(), hash = ?hash, "Created placeholder for matched order");
                }
                Ok(order)
            }
        }
    }
}

fn link_patch(
    order: &Order,
    swap_id: uuid::Uuid,
    counterpart: Option<uuid::Uuid>,
    signature: OrderSignature,
) -> OrderPatch {
    OrderPatch {
        swap_id: (order.swap_id != Some(swap_id)).then_some(swap_id),
        matched_order_id: counterpart.filter(|id| order.matched_order_id != Some(*id)),
        signature: (order.signature != Some(signature)).then_some(signature),
        accepted_at: order.accepted_at.is_none().then(Utc::now),
        ..Default::default()
    }
}

#[async_trait]
impl EventClassifier for MatchClassifier {
    fn kind(&self) -> EventKind {
        EventKind::Match
    }

    async fn apply(&self, chain_id: u64, log: &RawLog) -> Result<ClassifyOutcome, ClassifyError> {
        let event = MatchEvent::decode(log)?;
        let resolved = self.resolve(chain_id, &event).await?;

        let cancelled = resolved.listing.as_ref().map_or(false, Order::is_cancelled)
            || resolved.bid.as_ref().map_or(false, Order::is_cancelled);
        if cancelled {
            return Ok(ClassifyOutcome::Skipped("cancelled_order"));
        }
        if resolved.listing_hash.is_zero() {
            return Ok(ClassifyOutcome::Skipped("no_listing"));
        }

        let listing = self
            .existing_or_placeholder(chain_id, OrderKind::Listing, resolved.listing_hash, resolved.listing)
            .await?;
        let bid = if resolved.bid_hash.is_zero() {
            None
        } else {
            Some(
                self.existing_or_placeholder(chain_id, OrderKind::Bid, resolved.bid_hash, resolved.bid)
                    .await?,
            )
        };
        let bid_id = bid.as_ref().map(|b| b.id);

        let swap = match self
            .ledger
            .find_swap(chain_id, log.transaction_hash, listing.id, bid_id)
            .await?
        {
            Some(swap) => swap,
            None => {
                if listing.is_matched() || bid.as_ref().map_or(false, Order::is_matched) {
                    return Ok(ClassifyOutcome::Skipped("already_matched"));
                }
                let mut swap = Swap::new(chain_id, log.transaction_hash, log.block_number, listing.id, bid_id);
                swap.private_sale = event.private_sale;
                self.ledger.save_swap(swap).await?
            }
        };

        let (listing_signature, bid_signature) = if resolved.listing_is_maker {
            (event.maker_signature, event.taker_signature)
        } else {
            (event.taker_signature, event.maker_signature)
        };

        let mut written = 0;
        let mut listing_patch = link_patch(&listing, swap.id, bid_id, listing_signature);
        if listing.auction_type != event.auction_type {
            listing_patch.auction_type = Some(event.auction_type);
        }
        if !listing_patch.is_empty() {
            self.ledger.update_fields(listing.id, &listing_patch).await?;
            written += 1;
        }

        if let Some(bid) = &bid {
            let mut bid_patch = link_patch(bid, swap.id, Some(listing.id), bid_signature);
            if bid.listing_id.is_none() {
                bid_patch.listing_id = Some(listing.id);
            }
            if !bid_patch.is_empty() {
                self.ledger.update_fields(bid.id, &bid_patch).await?;
                written += 1;
            }
        }

        if written == 0 {
            return Ok(ClassifyOutcome::Skipped("already_linked"));
        }
        info!(
            chain_id,
            swap = %swap.id,
            listing = %listing.id,
            bid = ?bid_id,
            private_sale = swap.private_sale,
            "Match linked"
        );
        Ok(ClassifyOutcome::applied(written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::fixtures::{log_of, order, CHAIN};
    use crate::ledger::InMemoryLedger;
    use crate::types::AuctionType;
    use ethers::types::Address;

    fn sig(byte: u8) -> OrderSignature {
        OrderSignature {
            v: 27,
            r: H256::repeat_byte(byte),
            s: H256::repeat_byte(byte.wrapping_add(1)),
        }
    }

    fn match_event(maker_hash: H256, taker_hash: H256) -> MatchEvent {
        MatchEvent {
            maker_hash,
            taker_hash,
            auction_type: AuctionType::English,
            maker_signature: sig(0x10),
            taker_signature: sig(0x20),
            private_sale: false,
        }
    }

    #[tokio::test]
    async fn links_listing_and_bid_once() {
        let ledger = Arc::new(InMemoryLedger::new());
        let listing = ledger
            .save(order(OrderKind::Listing, H256::repeat_byte(1), Address::from_low_u64_be(1), 0))
            .await
            .unwrap();
        let bid = ledger
            .save(order(OrderKind::Bid, H256::repeat_byte(2), Address::from_low_u64_be(2), 0))
            .await
            .unwrap();

        let classifier = MatchClassifier::new(ledger.clone());
        let log = log_of(&match_event(listing.order_hash, bid.order_hash), 0x99, 4);

        assert_eq!(
            classifier.apply(CHAIN, &log).await.unwrap(),
            ClassifyOutcome::applied(2)
        );
        let listing_after = ledger.find_by_id(listing.id).await.unwrap().unwrap();
        let bid_after = ledger.find_by_id(bid.id).await.unwrap().unwrap();
        assert_eq!(listing_after.matched_order_id, Some(bid.id));
        assert_eq!(bid_after.matched_order_id, Some(listing.id));
        assert_eq!(bid_after.listing_id, Some(listing.id));
        assert_eq!(listing_after.swap_id, bid_after.swap_id);
        assert_eq!(listing_after.signature, Some(sig(0x10)));
        assert_eq!(bid_after.signature, Some(sig(0x20)));
        assert_eq!(listing_after.auction_type, AuctionType::English);
        assert!(listing_after.accepted_at.is_some());
        assert_eq!(ledger.swap_count(), 1);

        let before = ledger.orders();
        assert_eq!(
            classifier.apply(CHAIN, &log).await.unwrap(),
            ClassifyOutcome::Skipped("already_linked")
        );
        assert_eq!(ledger.orders(), before);
        assert_eq!(ledger.swap_count(), 1);
    }

    #[tokio::test]
    async fn bid_as_maker_swaps_roles() {
        let ledger = Arc::new(InMemoryLedger::new());
        let bid = ledger
            .save(order(OrderKind::Bid, H256::repeat_byte(2), Address::from_low_u64_be(2), 0))
            .await
            .unwrap();
        let listing_hash = H256::repeat_byte(1);

        let classifier = MatchClassifier::new(ledger.clone());
        let log = log_of(&match_event(bid.order_hash, listing_hash), 0x99, 0);
        assert!(classifier.apply(CHAIN, &log).await.unwrap().is_applied());

        let listing = ledger
            .find_by_hash(CHAIN, OrderKind::Listing, listing_hash)
            .await
            .unwrap()
            .expect("listing placeholder");
        let bid_after = ledger.find_by_id(bid.id).await.unwrap().unwrap();
        assert_eq!(bid_after.matched_order_id, Some(listing.id));
        assert_eq!(bid_after.signature, Some(sig(0x10)));
        assert_eq!(listing.signature, Some(sig(0x20)));
    }

    #[tokio::test]
    async fn zero_taker_hash_is_a_direct_fill() {
        let ledger = Arc::new(InMemoryLedger::new());
        let classifier = MatchClassifier::new(ledger.clone());
        let listing_hash = H256::repeat_byte(7);
        let mut event = match_event(listing_hash, H256::zero());
        event.private_sale = true;

        assert_eq!(
            classifier.apply(CHAIN, &log_of(&event, 0x31, 0)).await.unwrap(),
            ClassifyOutcome::applied(1)
        );
        let listing = ledger
            .find_by_hash(CHAIN, OrderKind::Listing, listing_hash)
            .await
            .unwrap()
            .unwrap();
        assert!(listing.swap_id.is_some());
        assert!(listing.matched_order_id.is_none());
        assert!(listing.is_matched());
        assert_eq!(ledger.order_count(), 1);
        let swaps = ledger.swaps();
        assert_eq!(swaps.len(), 1);
        assert!(swaps[0].private_sale);
        assert_eq!(swaps[0].bid_id, None);
    }

    #[tokio::test]
    async fn cancelled_side_is_never_linked() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut listing = order(OrderKind::Listing, H256::repeat_byte(1), Address::from_low_u64_be(1), 0);
        listing.cancel_tx_hash = Some(H256::repeat_byte(0xcc));
        let listing = ledger.save(listing).await.unwrap();

        let classifier = MatchClassifier::new(ledger.clone());
        let log = log_of(&match_event(listing.order_hash, H256::repeat_byte(2)), 0x99, 0);
        assert_eq!(
            classifier.apply(CHAIN, &log).await.unwrap(),
            ClassifyOutcome::Skipped("cancelled_order")
        );
        let stored = ledger.find_by_id(listing.id).await.unwrap().unwrap();
        assert!(stored.swap_id.is_none());
        assert!(stored.matched_order_id.is_none());
        assert_eq!(ledger.swap_count(), 0);
    }

    #[tokio::test]
    async fn second_match_of_same_listing_is_refused() {
        let ledger = Arc::new(InMemoryLedger::new());
        let classifier = MatchClassifier::new(ledger.clone());
        let listing_hash = H256::repeat_byte(1);

        classifier
            .apply(CHAIN, &log_of(&match_event(listing_hash, H256::repeat_byte(2)), 0xa1, 0))
            .await
            .unwrap();
        let other = classifier
            .apply(CHAIN, &log_of(&match_event(listing_hash, H256::repeat_byte(3)), 0xa2, 0))
            .await
            .unwrap();
        assert_eq!(other, ClassifyOutcome::Skipped("already_matched"));
        assert_eq!(ledger.swap_count(), 1);
    }
}
