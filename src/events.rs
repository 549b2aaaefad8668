//! Typed decoding of the marketplace contract's events.
//!
//! Layouts (indexed arguments travel in topics, the rest ABI-encoded in data):
//!
//! ```text
//! Approval(bytes32 structHash, address indexed maker)
//! NonceIncremented(address indexed maker, uint256 newNonce)
//! Cancel(bytes32 structHash, address indexed maker)
//! Match(bytes32 indexed makerHash, bytes32 indexed takerHash, uint8 auctionType,
//!       Sig makerSig, Sig takerSig, bool privateSale)
//! Match2A / Match3A(bytes32 indexed hash, address makerAddress, address takerAddress,
//!       uint256 start, uint256 end, uint256 nonce, uint256 salt)
//! Match2B / Match3B(bytes32 indexed hash, bytes[] makeData, bytes[] makeTypeData,
//!       bytes4[] makeClass, bytes[] takeData, bytes[] takeTypeData, bytes4[] takeClass)
//! BuyNowInfo(bytes32 indexed makerHash, address takerAddress)
//! ```

use crate::types::{Asset, AuctionType, ClassTag, OrderSignature};
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, Log, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("ABI decode failed: {0}")]
    Abi(#[from] abi::Error),
    #[error("Missing topic {0}")]
    MissingTopic(usize),
    #[error("Unexpected topic0 {0:?}")]
    UnknownTopic(H256),
    #[error("Unexpected token, expected {0}")]
    UnexpectedToken(&'static str),
    #[error("Asset arrays differ in length (class {classes}, type data {type_data}, data {data})")]
    LengthMismatch {
        classes: usize,
        type_data: usize,
        data: usize,
    },
    #[error("Invalid auction type {0}")]
    InvalidAuctionType(u8),
    #[error("Value out of range for {0}")]
    OutOfRange(&'static str),
}

/// A log as returned by the chain, reduced to the fields reconciliation uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub log_index: u64,
}

/// Stable identity of a log across re-fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogId {
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl RawLog {
    pub fn id(&self) -> LogId {
        LogId {
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }

    pub fn topic(&self, index: usize) -> Result<H256, DecodeError> {
        self.topics
            .get(index)
            .copied()
            .ok_or(DecodeError::MissingTopic(index))
    }

    fn topic_address(&self, index: usize) -> Result<Address, DecodeError> {
        Ok(Address::from_slice(&self.topic(index)?.as_bytes()[12..]))
    }
}

impl From<Log> for RawLog {
    fn from(log: Log) -> Self {
        Self {
            address: log.address,
            topics: log.topics,
            data: log.data,
            block_number: log.block_number.map(|n| n.as_u64()).unwrap_or_default(),
            transaction_hash: log.transaction_hash.unwrap_or_default(),
            log_index: log.log_index.map(|i| i.low_u64()).unwrap_or_default(),
        }
    }
}

/// Every event the reconciliation engine consumes, in the order a sync pass scans them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Approval,
    NonceIncremented,
    Cancel,
    /// Seller side, parties and timing
    Match2A,
    /// Seller side, asset arrays
    Match2B,
    /// Buyer side, parties and timing
    Match3A,
    /// Buyer side, asset arrays
    Match3B,
    Match,
    BuyNowInfo,
}

impl EventKind {
    /// Cancellations come before any match event so a cancelled order is never linked.
    pub const SYNC_ORDER: [EventKind; 9] = [
        EventKind::Approval,
        EventKind::NonceIncremented,
        EventKind::Cancel,
        EventKind::Match2A,
        EventKind::Match2B,
        EventKind::Match3A,
        EventKind::Match3B,
        EventKind::Match,
        EventKind::BuyNowInfo,
    ];

    pub fn signature(&self) -> &'static str {
        match self {
            EventKind::Approval => "Approval(bytes32,address)",
            EventKind::NonceIncremented => "NonceIncremented(address,uint256)",
            EventKind::Cancel => "Cancel(bytes32,address)",
            EventKind::Match2A => "Match2A(bytes32,address,address,uint256,uint256,uint256,uint256)",
            EventKind::Match2B => "Match2B(bytes32,bytes[],bytes[],bytes4[],bytes[],bytes[],bytes4[])",
            EventKind::Match3A => "Match3A(bytes32,address,address,uint256,uint256,uint256,uint256)",
            EventKind::Match3B => "Match3B(bytes32,bytes[],bytes[],bytes4[],bytes[],bytes[],bytes4[])",
            EventKind::Match => {
                "Match(bytes32,bytes32,uint8,(uint8,bytes32,bytes32),(uint8,bytes32,bytes32),bool)"
            }
            EventKind::BuyNowInfo => "BuyNowInfo(bytes32,address)",
        }
    }

    pub fn topic0(&self) -> H256 {
        H256::from(keccak256(self.signature().as_bytes()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Approval => "approval",
            EventKind::NonceIncremented => "nonce_incremented",
            EventKind::Cancel => "cancel",
            EventKind::Match2A => "match_2a",
            EventKind::Match2B => "match_2b",
            EventKind::Match3A => "match_3a",
            EventKind::Match3B => "match_3b",
            EventKind::Match => "match",
            EventKind::BuyNowInfo => "buy_now_info",
        }
    }

    pub fn from_topic0(topic: H256) -> Option<Self> {
        Self::SYNC_ORDER.into_iter().find(|kind| kind.topic0() == topic)
    }
}

fn expect_topic0(log: &RawLog, kind: EventKind) -> Result<(), DecodeError> {
    let topic = log.topic(0)?;
    if topic != kind.topic0() {
        return Err(DecodeError::UnknownTopic(topic));
    }
    Ok(())
}

fn address_topic(address: Address) -> H256 {
    H256::from(address)
}

fn to_u64(value: U256, what: &'static str) -> Result<u64, DecodeError> {
    if value > U256::from(u64::MAX) {
        return Err(DecodeError::OutOfRange(what));
    }
    Ok(value.as_u64())
}

fn next_token(tokens: &mut std::vec::IntoIter<Token>, what: &'static str) -> Result<Token, DecodeError> {
    tokens.next().ok_or(DecodeError::UnexpectedToken(what))
}

fn next_address(tokens: &mut std::vec::IntoIter<Token>) -> Result<Address, DecodeError> {
    next_token(tokens, "address")?
        .into_address()
        .ok_or(DecodeError::UnexpectedToken("address"))
}

fn next_uint(tokens: &mut std::vec::IntoIter<Token>) -> Result<U256, DecodeError> {
    next_token(tokens, "uint")?
        .into_uint()
        .ok_or(DecodeError::UnexpectedToken("uint"))
}

fn next_bool(tokens: &mut std::vec::IntoIter<Token>) -> Result<bool, DecodeError> {
    next_token(tokens, "bool")?
        .into_bool()
        .ok_or(DecodeError::UnexpectedToken("bool"))
}

fn next_bytes32(tokens: &mut std::vec::IntoIter<Token>) -> Result<H256, DecodeError> {
    let bytes = next_token(tokens, "bytes32")?
        .into_fixed_bytes()
        .ok_or(DecodeError::UnexpectedToken("bytes32"))?;
    if bytes.len() != 32 {
        return Err(DecodeError::UnexpectedToken("bytes32"));
    }
    Ok(H256::from_slice(&bytes))
}

fn next_bytes_array(tokens: &mut std::vec::IntoIter<Token>) -> Result<Vec<Bytes>, DecodeError> {
    next_token(tokens, "bytes[]")?
        .into_array()
        .ok_or(DecodeError::UnexpectedToken("bytes[]"))?
        .into_iter()
        .map(|t| {
            t.into_bytes()
                .map(Bytes::from)
                .ok_or(DecodeError::UnexpectedToken("bytes"))
        })
        .collect()
}

fn next_class_array(tokens: &mut std::vec::IntoIter<Token>) -> Result<Vec<ClassTag>, DecodeError> {
    next_token(tokens, "bytes4[]")?
        .into_array()
        .ok_or(DecodeError::UnexpectedToken("bytes4[]"))?
        .into_iter()
        .map(|t| {
            t.into_fixed_bytes()
                .and_then(|b| <[u8; 4]>::try_from(b.as_slice()).ok())
                .ok_or(DecodeError::UnexpectedToken("bytes4"))
        })
        .collect()
}

fn next_signature(tokens: &mut std::vec::IntoIter<Token>) -> Result<OrderSignature, DecodeError> {
    let fields = next_token(tokens, "signature")?
        .into_tuple()
        .ok_or(DecodeError::UnexpectedToken("signature"))?;
    let mut fields = fields.into_iter();
    let v = next_uint(&mut fields)?;
    if v > U256::from(u8::MAX) {
        return Err(DecodeError::OutOfRange("signature v"));
    }
    Ok(OrderSignature {
        v: v.as_u32() as u8,
        r: next_bytes32(&mut fields)?,
        s: next_bytes32(&mut fields)?,
    })
}

fn signature_param() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Uint(8),
        ParamType::FixedBytes(32),
        ParamType::FixedBytes(32),
    ])
}

fn signature_token(sig: &OrderSignature) -> Token {
    Token::Tuple(vec![
        Token::Uint(U256::from(sig.v)),
        Token::FixedBytes(sig.r.as_bytes().to_vec()),
        Token::FixedBytes(sig.s.as_bytes().to_vec()),
    ])
}

fn asset_list_params() -> Vec<ParamType> {
    let bytes_array = ParamType::Array(Box::new(ParamType::Bytes));
    let class_array = ParamType::Array(Box::new(ParamType::FixedBytes(4)));
    vec![bytes_array.clone(), bytes_array, class_array]
}

fn asset_list_tokens(assets: &[Asset]) -> Vec<Token> {
    vec![
        Token::Array(assets.iter().map(|a| Token::Bytes(a.data.to_vec())).collect()),
        Token::Array(assets.iter().map(|a| Token::Bytes(a.type_data.to_vec())).collect()),
        Token::Array(
            assets
                .iter()
                .map(|a| Token::FixedBytes(a.class.tag().to_vec()))
                .collect(),
        ),
    ]
}

/// A decodable marketplace event.
///
/// `encode` produces the topics and data the contract would emit, so fixtures
/// and replays can build logs without a node.
pub trait MarketEvent: Sized {
    fn decode(log: &RawLog) -> Result<Self, DecodeError>;
    fn encode(&self) -> (Vec<H256>, Bytes);

    fn into_log(&self, address: Address, block_number: u64, transaction_hash: H256, log_index: u64) -> RawLog {
        let (topics, data) = self.encode();
        RawLog {
            address,
            topics,
            data,
            block_number,
            transaction_hash,
            log_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalEvent {
    pub struct_hash: H256,
    pub maker: Address,
}

impl MarketEvent for ApprovalEvent {
    fn decode(log: &RawLog) -> Result<Self, DecodeError> {
        expect_topic0(log, EventKind::Approval)?;
        let mut tokens = abi::decode(&[ParamType::FixedBytes(32)], &log.data)?.into_iter();
        Ok(Self {
            struct_hash: next_bytes32(&mut tokens)?,
            maker: log.topic_address(1)?,
        })
    }

    fn encode(&self) -> (Vec<H256>, Bytes) {
        (
            vec![EventKind::Approval.topic0(), address_topic(self.maker)],
            abi::encode(&[Token::FixedBytes(self.struct_hash.as_bytes().to_vec())]).into(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelEvent {
    pub struct_hash: H256,
    pub maker: Address,
}

impl MarketEvent for CancelEvent {
    fn decode(log: &RawLog) -> Result<Self, DecodeError> {
        expect_topic0(log, EventKind::Cancel)?;
        let mut tokens = abi::decode(&[ParamType::FixedBytes(32)], &log.data)?.into_iter();
        Ok(Self {
            struct_hash: next_bytes32(&mut tokens)?,
            maker: log.topic_address(1)?,
        })
    }

    fn encode(&self) -> (Vec<H256>, Bytes) {
        (
            vec![EventKind::Cancel.topic0(), address_topic(self.maker)],
            abi::encode(&[Token::FixedBytes(self.struct_hash.as_bytes().to_vec())]).into(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceIncrementedEvent {
    pub maker: Address,
    pub new_nonce: U256,
}

impl MarketEvent for NonceIncrementedEvent {
    fn decode(log: &RawLog) -> Result<Self, DecodeError> {
        expect_topic0(log, EventKind::NonceIncremented)?;
        let mut tokens = abi::decode(&[ParamType::Uint(256)], &log.data)?.into_iter();
        Ok(Self {
            maker: log.topic_address(1)?,
            new_nonce: next_uint(&mut tokens)?,
        })
    }

    fn encode(&self) -> (Vec<H256>, Bytes) {
        (
            vec![EventKind::NonceIncremented.topic0(), address_topic(self.maker)],
            abi::encode(&[Token::Uint(self.new_nonce)]).into(),
        )
    }
}

/// Which side of a match a phase event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchSide {
    /// Listing, keyed by the maker struct hash (`Match2A`/`Match2B`)
    Seller,
    /// Bid, keyed by the taker struct hash (`Match3A`/`Match3B`)
    Buyer,
}

impl MatchSide {
    pub fn parties_kind(&self) -> EventKind {
        match self {
            MatchSide::Seller => EventKind::Match2A,
            MatchSide::Buyer => EventKind::Match3A,
        }
    }

    pub fn assets_kind(&self) -> EventKind {
        match self {
            MatchSide::Seller => EventKind::Match2B,
            MatchSide::Buyer => EventKind::Match3B,
        }
    }
}

/// Phase A: parties and timing of one side of a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPartiesEvent {
    pub side: MatchSide,
    pub order_hash: H256,
    pub maker: Address,
    pub taker: Address,
    pub start: u64,
    pub end: u64,
    pub nonce: U256,
    pub salt: U256,
}

impl MatchPartiesEvent {
    pub fn decode_side(side: MatchSide, log: &RawLog) -> Result<Self, DecodeError> {
        expect_topic0(log, side.parties_kind())?;
        let mut tokens = abi::decode(
            &[
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
            ],
            &log.data,
        )?
        .into_iter();
        Ok(Self {
            side,
            order_hash: log.topic(1)?,
            maker: next_address(&mut tokens)?,
            taker: next_address(&mut tokens)?,
            start: to_u64(next_uint(&mut tokens)?, "start")?,
            end: to_u64(next_uint(&mut tokens)?, "end")?,
            nonce: next_uint(&mut tokens)?,
            salt: next_uint(&mut tokens)?,
        })
    }
}

impl MarketEvent for MatchPartiesEvent {
    fn decode(log: &RawLog) -> Result<Self, DecodeError> {
        let topic = log.topic(0)?;
        match EventKind::from_topic0(topic) {
            Some(EventKind::Match2A) => Self::decode_side(MatchSide::Seller, log),
            Some(EventKind::Match3A) => Self::decode_side(MatchSide::Buyer, log),
            _ => Err(DecodeError::UnknownTopic(topic)),
        }
    }

    fn encode(&self) -> (Vec<H256>, Bytes) {
        (
            vec![self.side.parties_kind().topic0(), self.order_hash],
            abi::encode(&[
                Token::Address(self.maker),
                Token::Address(self.taker),
                Token::Uint(U256::from(self.start)),
                Token::Uint(U256::from(self.end)),
                Token::Uint(self.nonce),
                Token::Uint(self.salt),
            ])
            .into(),
        )
    }
}

/// Phase B: asset arrays of one side of a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchAssetsEvent {
    pub side: MatchSide,
    pub order_hash: H256,
    pub make_assets: Vec<Asset>,
    pub take_assets: Vec<Asset>,
}

impl MatchAssetsEvent {
    pub fn decode_side(side: MatchSide, log: &RawLog) -> Result<Self, DecodeError> {
        expect_topic0(log, side.assets_kind())?;
        let mut params = asset_list_params();
        params.extend(asset_list_params());
        let mut tokens = abi::decode(&params, &log.data)?.into_iter();

        let make_data = next_bytes_array(&mut tokens)?;
        let make_type_data = next_bytes_array(&mut tokens)?;
        let make_class = next_class_array(&mut tokens)?;
        let take_data = next_bytes_array(&mut tokens)?;
        let take_type_data = next_bytes_array(&mut tokens)?;
        let take_class = next_class_array(&mut tokens)?;

        Ok(Self {
            side,
            order_hash: log.topic(1)?,
            make_assets: Asset::decode_list(&make_class, &make_type_data, &make_data)?,
            take_assets: Asset::decode_list(&take_class, &take_type_data, &take_data)?,
        })
    }
}

impl MarketEvent for MatchAssetsEvent {
    fn decode(log: &RawLog) -> Result<Self, DecodeError> {
        let topic = log.topic(0)?;
        match EventKind::from_topic0(topic) {
            Some(EventKind::Match2B) => Self::decode_side(MatchSide::Seller, log),
            Some(EventKind::Match3B) => Self::decode_side(MatchSide::Buyer, log),
            _ => Err(DecodeError::UnknownTopic(topic)),
        }
    }

    fn encode(&self) -> (Vec<H256>, Bytes) {
        let mut tokens = asset_list_tokens(&self.make_assets);
        tokens.extend(asset_list_tokens(&self.take_assets));
        (
            vec![self.side.assets_kind().topic0(), self.order_hash],
            abi::encode(&tokens).into(),
        )
    }
}

/// Aggregate match: both hashes, signatures and the sale mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEvent {
    pub maker_hash: H256,
    /// Zero when the listing was filled without a bid order
    pub taker_hash: H256,
    pub auction_type: AuctionType,
    pub maker_signature: OrderSignature,
    pub taker_signature: OrderSignature,
    pub private_sale: bool,
}

impl MarketEvent for MatchEvent {
    fn decode(log: &RawLog) -> Result<Self, DecodeError> {
        expect_topic0(log, EventKind::Match)?;
        let mut tokens = abi::decode(
            &[
                ParamType::Uint(8),
                signature_param(),
                signature_param(),
                ParamType::Bool,
            ],
            &log.data,
        )?
        .into_iter();

        let raw_auction = next_uint(&mut tokens)?;
        if raw_auction > U256::from(u8::MAX) {
            return Err(DecodeError::OutOfRange("auction type"));
        }
        let raw_auction = raw_auction.as_u32() as u8;
        let auction_type =
            AuctionType::from_u8(raw_auction).ok_or(DecodeError::InvalidAuctionType(raw_auction))?;

        Ok(Self {
            maker_hash: log.topic(1)?,
            taker_hash: log.topic(2)?,
            auction_type,
            maker_signature: next_signature(&mut tokens)?,
            taker_signature: next_signature(&mut tokens)?,
            private_sale: next_bool(&mut tokens)?,
        })
    }

    fn encode(&self) -> (Vec<H256>, Bytes) {
        (
            vec![EventKind::Match.topic0(), self.maker_hash, self.taker_hash],
            abi::encode(&[
                Token::Uint(U256::from(self.auction_type.as_u8())),
                signature_token(&self.maker_signature),
                signature_token(&self.taker_signature),
                Token::Bool(self.private_sale),
            ])
            .into(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyNowInfoEvent {
    pub maker_hash: H256,
    pub taker: Address,
}

impl MarketEvent for BuyNowInfoEvent {
    fn decode(log: &RawLog) -> Result<Self, DecodeError> {
        expect_topic0(log, EventKind::BuyNowInfo)?;
        let mut tokens = abi::decode(&[ParamType::Address], &log.data)?.into_iter();
        Ok(Self {
            maker_hash: log.topic(1)?,
            taker: next_address(&mut tokens)?,
        })
    }

    fn encode(&self) -> (Vec<H256>, Bytes) {
        (
            vec![EventKind::BuyNowInfo.topic0(), self.maker_hash],
            abi::encode(&[Token::Address(self.taker)]).into(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetClass;

    fn sig(byte: u8) -> OrderSignature {
        OrderSignature {
            v: 27,
            r: H256::repeat_byte(byte),
            s: H256::repeat_byte(byte.wrapping_add(1)),
        }
    }

    #[test]
    fn topics_are_keccak_of_signatures() {
        assert_eq!(
            EventKind::Approval.topic0(),
            H256::from(keccak256("Approval(bytes32,address)"))
        );
        let unique: std::collections::HashSet<H256> =
            EventKind::SYNC_ORDER.iter().map(|k| k.topic0()).collect();
        assert_eq!(unique.len(), EventKind::SYNC_ORDER.len());
    }

    #[test]
    fn sync_order_puts_cancellations_before_matches() {
        let position = |kind: EventKind| {
            EventKind::SYNC_ORDER
                .iter()
                .position(|k| *k == kind)
                .unwrap()
        };
        for cancel in [EventKind::Cancel, EventKind::NonceIncremented] {
            for matching in [
                EventKind::Match2A,
                EventKind::Match2B,
                EventKind::Match3A,
                EventKind::Match3B,
                EventKind::Match,
            ] {
                assert!(position(cancel) < position(matching));
            }
        }
    }

    #[test]
    fn approval_reads_maker_from_topic() {
        let event = ApprovalEvent {
            struct_hash: H256::repeat_byte(0xaa),
            maker: Address::from_low_u64_be(1),
        };
        let log = event.into_log(Address::zero(), 10, H256::repeat_byte(7), 0);
        assert_eq!(log.topics.len(), 2);
        assert_eq!(ApprovalEvent::decode(&log).unwrap(), event);
    }

    #[test]
    fn wrong_topic_is_rejected() {
        let event = CancelEvent {
            struct_hash: H256::repeat_byte(1),
            maker: Address::from_low_u64_be(2),
        };
        let log = event.into_log(Address::zero(), 1, H256::zero(), 0);
        assert!(matches!(
            ApprovalEvent::decode(&log),
            Err(DecodeError::UnknownTopic(_))
        ));
    }

    #[test]
    fn match_event_carries_both_hashes_and_signatures() {
        let event = MatchEvent {
            maker_hash: H256::repeat_byte(0x11),
            taker_hash: H256::zero(),
            auction_type: AuctionType::English,
            maker_signature: sig(3),
            taker_signature: sig(5),
            private_sale: true,
        };
        let log = event.into_log(Address::zero(), 99, H256::repeat_byte(9), 4);
        let decoded = MatchEvent::decode(&log).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn match_event_rejects_unknown_auction_type() {
        let event = MatchEvent {
            maker_hash: H256::repeat_byte(0x11),
            taker_hash: H256::repeat_byte(0x22),
            auction_type: AuctionType::FixedPrice,
            maker_signature: sig(1),
            taker_signature: sig(1),
            private_sale: false,
        };
        let (topics, _) = event.encode();
        let data = abi::encode(&[
            Token::Uint(U256::from(7)),
            signature_token(&sig(1)),
            signature_token(&sig(1)),
            Token::Bool(false),
        ]);
        let log = RawLog {
            address: Address::zero(),
            topics,
            data: data.into(),
            block_number: 1,
            transaction_hash: H256::zero(),
            log_index: 0,
        };
        assert!(matches!(
            MatchEvent::decode(&log),
            Err(DecodeError::InvalidAuctionType(7))
        ));
    }

    #[test]
    fn buyer_asset_phase_decodes_lists() {
        let nft = Asset::new(
            AssetClass::NonFungible {
                contract: Address::from_low_u64_be(0x721),
                token_id: U256::from(1),
                allow_all: false,
            },
            U256::one(),
            U256::zero(),
        );
        let eth = Asset::new(AssetClass::Native, U256::exp10(18), U256::zero());
        let event = MatchAssetsEvent {
            side: MatchSide::Buyer,
            order_hash: H256::repeat_byte(0x33),
            make_assets: vec![eth.clone()],
            take_assets: vec![nft.clone()],
        };
        let log = event.into_log(Address::zero(), 5, H256::repeat_byte(1), 2);
        assert_eq!(log.topics[0], EventKind::Match3B.topic0());

        let decoded = MatchAssetsEvent::decode(&log).unwrap();
        assert_eq!(decoded.side, MatchSide::Buyer);
        assert_eq!(decoded.make_assets, vec![eth]);
        assert_eq!(decoded.take_assets, vec![nft]);
    }

    #[test]
    fn truncated_data_is_a_decode_error() {
        let log = RawLog {
            address: Address::zero(),
            topics: vec![EventKind::Match2A.topic0(), H256::repeat_byte(1)],
            data: Bytes::from(vec![0u8; 40]),
            block_number: 1,
            transaction_hash: H256::zero(),
            log_index: 0,
        };
        assert!(MatchPartiesEvent::decode(&log).is_err());
    }
}
