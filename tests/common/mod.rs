// Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use marketplace_ledger_sdk::chain_reader::{ChainError, ChainReader, LogSource};
use marketplace_ledger_sdk::events::{MarketEvent, RawLog};
use marketplace_ledger_sdk::range_splitter::{RangeSplitter, SplitPolicy};
use marketplace_ledger_sdk::types::{AuctionType, OrderSignature, OrderStruct, OrderSubmission};
use std::sync::Mutex;

pub const CHAIN: u64 = 4;

pub fn marketplace() -> Address {
    Address::from_low_u64_be(0x5000)
}

/// In-memory chain: serves `eth_getLogs` from a fixed log set and refuses
/// ranges wider than `refuse_wider_than` the way hosted nodes do.
pub struct FakeChain {
    pub head: u64,
    logs: Mutex<Vec<RawLog>>,
    pub refuse_wider_than: Option<u64>,
    calls: Mutex<Vec<(u64, u64)>>,
}

impl FakeChain {
    pub fn new(head: u64) -> Self {
        Self {
            head,
            logs: Mutex::new(Vec::new()),
            refuse_wider_than: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn refusing_wider_than(mut self, span: u64) -> Self {
        self.refuse_wider_than = Some(span);
        self
    }

    /// Appends `event` as the next log of transaction `tx` in `block`.
    pub fn emit<E: MarketEvent>(&self, event: &E, block: u64, tx: u8) -> RawLog {
        let mut logs = self.logs.lock().unwrap();
        let index = logs.iter().filter(|l| l.block_number == block).count() as u64;
        let log = event.into_log(marketplace(), block, H256::repeat_byte(tx), index);
        logs.push(log.clone());
        log
    }

    /// Accepted `(from, to)` queries, sorted.
    pub fn served_ranges(&self) -> Vec<(u64, u64)> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_unstable();
        calls
    }
}

#[async_trait]
impl LogSource for FakeChain {
    async fn get_logs(
        &self,
        address: Address,
        topics: &[H256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError> {
        if let Some(limit) = self.refuse_wider_than {
            if to_block - from_block > limit {
                return Err(ChainError::from_provider_message(
                    "query returned more than 10000 results".to_string(),
                ));
            }
        }
        self.calls.lock().unwrap().push((from_block, to_block));
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.address == address)
            .filter(|l| l.topics.first() == topics.first())
            .filter(|l| (from_block..=to_block).contains(&l.block_number))
            .cloned()
            .collect())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.head)
    }
}

pub fn splitter(chain: std::sync::Arc<FakeChain>, max_span: u64) -> RangeSplitter {
    RangeSplitter::new(ChainReader::new(chain), SplitPolicy::new(max_span, 64))
}

pub fn signature(byte: u8) -> OrderSignature {
    OrderSignature {
        v: 27,
        r: H256::repeat_byte(byte),
        s: H256::repeat_byte(byte.wrapping_add(1)),
    }
}

pub fn submission(order_hash: H256, maker: Address, nonce: u64) -> OrderSubmission {
    OrderSubmission {
        chain_id: CHAIN,
        order_hash,
        order: OrderStruct {
            maker,
            make_assets: Vec::new(),
            taker: Address::zero(),
            take_assets: Vec::new(),
            salt: U256::from(order_hash.to_low_u64_be()),
            start: 0,
            end: 0,
            nonce: U256::from(nonce),
            auction_type: AuctionType::FixedPrice,
        },
        signature: signature(order_hash.to_low_u64_be() as u8),
    }
}
