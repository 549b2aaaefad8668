mod common;

use common::{marketplace, signature, splitter, submission, FakeChain, CHAIN};
use ethers::types::{Address, H256, U256};
use marketplace_ledger_sdk::classifiers::default_classifiers;
use marketplace_ledger_sdk::cursor_store::{advance_cursor, CursorAdvance, CursorStore, InMemoryCursorStore};
use marketplace_ledger_sdk::events::{
    ApprovalEvent, CancelEvent, EventKind, MatchAssetsEvent, MatchEvent, MatchPartiesEvent, MatchSide,
    NonceIncrementedEvent,
};
use marketplace_ledger_sdk::ledger::{InMemoryLedger, OrderLedger};
use marketplace_ledger_sdk::orchestrator::{ChainTarget, SyncOrchestrator, SyncOutcome, SyncReport};
use marketplace_ledger_sdk::quarantine::LogQuarantine;
use marketplace_ledger_sdk::types::{Asset, AssetClass, AuctionType, Order, OrderKind, OrderStatus};
use std::sync::Arc;

const DEPLOYED: u64 = 100;

fn orchestrator(
    chain: Arc<FakeChain>,
    ledger: Arc<InMemoryLedger>,
    cursors: Arc<InMemoryCursorStore>,
) -> SyncOrchestrator {
    SyncOrchestrator::new(default_classifiers(ledger), cursors, Arc::new(LogQuarantine::new(3)))
        .with_chain(ChainTarget::new(CHAIN, marketplace(), DEPLOYED, splitter(chain, 1_000)))
}

async fn synced(orch: &SyncOrchestrator) -> SyncReport {
    match orch.sync_orders(CHAIN).await.unwrap() {
        SyncOutcome::Synced(report) => report,
        other => panic!("expected a sync pass, got {other:?}"),
    }
}

async fn seed(ledger: &InMemoryLedger, kind: OrderKind, hash: u64, maker: Address, nonce: u64) -> Order {
    let sub = submission(H256::from_low_u64_be(hash), maker, nonce);
    ledger.save(Order::from_submission(kind, &sub)).await.unwrap()
}

async fn reload(ledger: &InMemoryLedger, order: &Order) -> Order {
    ledger.find_by_id(order.id).await.unwrap().unwrap()
}

fn seller() -> Address {
    Address::from_low_u64_be(0xa1)
}

fn buyer() -> Address {
    Address::from_low_u64_be(0xb2)
}

fn nft(id: u64) -> Asset {
    Asset::new(
        AssetClass::NonFungible {
            contract: Address::from_low_u64_be(0x721),
            token_id: U256::from(id),
            allow_all: false,
        },
        U256::one(),
        U256::zero(),
    )
}

/// Emits the full event sequence of one settled sale.
fn emit_sale(chain: &FakeChain, listing: &Order, bid: &Order, block: u64, tx: u8) {
    for (side, order, counterparty) in [
        (MatchSide::Seller, listing, bid.maker_address),
        (MatchSide::Buyer, bid, listing.maker_address),
    ] {
        chain.emit(
            &MatchPartiesEvent {
                side,
                order_hash: order.order_hash,
                maker: order.maker_address,
                taker: counterparty,
                start: 10,
                end: 20_000,
                nonce: order.nonce,
                salt: order.salt,
            },
            block,
            tx,
        );
        chain.emit(
            &MatchAssetsEvent {
                side,
                order_hash: order.order_hash,
                make_assets: vec![nft(7)],
                take_assets: Vec::new(),
            },
            block,
            tx,
        );
    }
    chain.emit(
        &MatchEvent {
            maker_hash: listing.order_hash,
            taker_hash: bid.order_hash,
            auction_type: AuctionType::English,
            maker_signature: signature(0x31),
            taker_signature: signature(0x41),
            private_sale: false,
        },
        block,
        tx,
    );
}

#[tokio::test]
async fn approval_sets_only_the_approval_hash() {
    let chain = Arc::new(FakeChain::new(500));
    let ledger = Arc::new(InMemoryLedger::new());
    let maker = Address::from_low_u64_be(0x01);
    let order = seed(&ledger, OrderKind::Listing, 0xAA, maker, 0).await;

    let log = chain.emit(
        &ApprovalEvent {
            struct_hash: H256::from_low_u64_be(0xAA),
            maker,
        },
        300,
        9,
    );
    let orch = orchestrator(chain, ledger.clone(), Arc::new(InMemoryCursorStore::new()));
    let report = synced(&orch).await;

    assert_eq!(report.for_event(EventKind::Approval).unwrap().applied, 1);
    let order = reload(&ledger, &order).await;
    assert_eq!(order.approval_tx_hash, Some(log.transaction_hash));
    assert_eq!(order.cancel_tx_hash, None);
    assert_eq!(order.status(), OrderStatus::Approved);
}

#[tokio::test]
async fn sale_links_listing_and_bid_once() {
    let chain = Arc::new(FakeChain::new(2_000));
    let ledger = Arc::new(InMemoryLedger::new());
    let listing = seed(&ledger, OrderKind::Listing, 0x11, seller(), 0).await;
    let bid = seed(&ledger, OrderKind::Bid, 0x22, buyer(), 0).await;

    chain.emit(
        &ApprovalEvent {
            struct_hash: listing.order_hash,
            maker: seller(),
        },
        150,
        1,
    );
    emit_sale(&chain, &listing, &bid, 1_200, 2);

    let orch = orchestrator(chain.clone(), ledger.clone(), Arc::new(InMemoryCursorStore::new()));
    let report = synced(&orch).await;
    assert!(report.is_complete());
    assert_eq!(ledger.swap_count(), 1);
    assert_eq!(ledger.order_count(), 2);

    let swap = ledger.swaps().remove(0);
    let listing = reload(&ledger, &listing).await;
    let bid = reload(&ledger, &bid).await;
    assert_eq!(swap.listing_id, listing.id);
    assert_eq!(swap.bid_id, Some(bid.id));
    assert_eq!(listing.swap_id, Some(swap.id));
    assert_eq!(listing.matched_order_id, Some(bid.id));
    assert_eq!(bid.matched_order_id, Some(listing.id));
    assert_eq!(listing.auction_type, AuctionType::English);
    assert_eq!(listing.make_assets, vec![nft(7)]);
    assert_eq!(listing.end, 20_000);
    assert!(listing.approval_tx_hash.is_some());
    assert_eq!(listing.status(), OrderStatus::Matched);

    // replay the same blocks from scratch: nothing changes
    let snapshot = ledger.orders();
    let replay = orchestrator(chain, ledger.clone(), Arc::new(InMemoryCursorStore::new()));
    let report = synced(&replay).await;
    assert_eq!(report.applied(), 0);
    assert_eq!(report.failed(), 0);
    assert_eq!(ledger.orders(), snapshot);
    assert_eq!(ledger.swap_count(), 1);
}

#[tokio::test]
async fn cancel_in_the_same_pass_wins_over_match() {
    let chain = Arc::new(FakeChain::new(1_000));
    let ledger = Arc::new(InMemoryLedger::new());
    let listing = seed(&ledger, OrderKind::Listing, 0x33, seller(), 0).await;

    // the match is emitted first, the cancel later in the range
    chain.emit(
        &MatchEvent {
            maker_hash: listing.order_hash,
            taker_hash: H256::zero(),
            auction_type: AuctionType::FixedPrice,
            maker_signature: signature(1),
            taker_signature: signature(2),
            private_sale: true,
        },
        400,
        3,
    );
    chain.emit(
        &CancelEvent {
            struct_hash: listing.order_hash,
            maker: seller(),
        },
        600,
        4,
    );

    let orch = orchestrator(chain, ledger.clone(), Arc::new(InMemoryCursorStore::new()));
    let report = synced(&orch).await;

    assert_eq!(report.for_event(EventKind::Cancel).unwrap().applied, 1);
    assert_eq!(report.for_event(EventKind::Match).unwrap().unchanged, 1);
    let listing = reload(&ledger, &listing).await;
    assert_eq!(listing.status(), OrderStatus::Cancelled);
    assert_eq!(listing.swap_id, None);
    assert_eq!(ledger.swap_count(), 0);
}

#[tokio::test]
async fn nonce_increment_cancels_older_orders_of_the_maker() {
    let chain = Arc::new(FakeChain::new(1_000));
    let ledger = Arc::new(InMemoryLedger::new());
    let old = seed(&ledger, OrderKind::Listing, 0x41, seller(), 0).await;
    let older_bid = seed(&ledger, OrderKind::Bid, 0x42, seller(), 1).await;
    let current = seed(&ledger, OrderKind::Listing, 0x43, seller(), 5).await;
    let other_maker = seed(&ledger, OrderKind::Listing, 0x44, buyer(), 0).await;

    chain.emit(
        &NonceIncrementedEvent {
            maker: seller(),
            new_nonce: U256::from(2),
        },
        500,
        5,
    );
    let orch = orchestrator(chain, ledger.clone(), Arc::new(InMemoryCursorStore::new()));
    synced(&orch).await;

    assert!(reload(&ledger, &old).await.is_cancelled());
    assert!(reload(&ledger, &older_bid).await.is_cancelled());
    assert!(!reload(&ledger, &current).await.is_cancelled());
    assert!(!reload(&ledger, &other_maker).await.is_cancelled());
}

#[tokio::test]
async fn match_for_unknown_orders_creates_placeholders() {
    let chain = Arc::new(FakeChain::new(1_000));
    let ledger = Arc::new(InMemoryLedger::new());
    let listing_hash = H256::repeat_byte(0x51);
    let bid_hash = H256::repeat_byte(0x52);

    chain.emit(
        &MatchEvent {
            maker_hash: listing_hash,
            taker_hash: bid_hash,
            auction_type: AuctionType::FixedPrice,
            maker_signature: signature(5),
            taker_signature: signature(6),
            private_sale: false,
        },
        700,
        6,
    );
    let orch = orchestrator(chain, ledger.clone(), Arc::new(InMemoryCursorStore::new()));
    synced(&orch).await;

    let listing = ledger
        .find_by_hash(CHAIN, OrderKind::Listing, listing_hash)
        .await
        .unwrap()
        .expect("listing placeholder");
    let bid = ledger
        .find_by_hash(CHAIN, OrderKind::Bid, bid_hash)
        .await
        .unwrap()
        .expect("bid placeholder");
    assert_eq!(listing.matched_order_id, Some(bid.id));
    assert_eq!(bid.listing_id, Some(listing.id));
    assert_eq!(listing.signature, Some(signature(5)));
    assert_eq!(ledger.swap_count(), 1);
}

#[tokio::test]
async fn cursor_only_moves_forward() {
    let ledger = Arc::new(InMemoryLedger::new());
    let cursors = Arc::new(InMemoryCursorStore::new());

    let orch = orchestrator(Arc::new(FakeChain::new(900)), ledger.clone(), cursors.clone());
    let report = synced(&orch).await;
    assert_eq!(report.from_block, DEPLOYED);
    assert_eq!(
        report.cursor,
        CursorAdvance::Advanced {
            previous: None,
            current: 900
        }
    );

    // a lagging node reports an older head
    let lagging = orchestrator(Arc::new(FakeChain::new(800)), ledger, cursors.clone());
    assert_eq!(
        lagging.sync_orders(CHAIN).await.unwrap(),
        SyncOutcome::UpToDate { cursor: 900, head: 800 }
    );

    assert_eq!(
        advance_cursor(cursors.as_ref(), CHAIN, 850).await.unwrap(),
        CursorAdvance::Refused {
            stored: 900,
            attempted: 850
        }
    );
    assert_eq!(cursors.get(CHAIN).await.unwrap(), Some(900));
}
