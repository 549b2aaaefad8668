use ethers::abi::Token;
use ethers::prelude::abigen;

use crate::types::{Asset, OrderStruct};

// Order layout as hashed by the marketplace:
// (address maker, Asset[] makeAssets, address taker, Asset[] takeAssets,
//  uint256 salt, uint256 start, uint256 end, uint256 nonce, uint8 auctionType)
// with Asset = ((bytes4 assetClass, bytes data) assetType, bytes data)

abigen!(
    NftMarketplace,
    r#"[
        struct AssetType { bytes4 assetClass; bytes data; }
        struct Asset { AssetType assetType; bytes data; }
        struct Order { address maker; Asset[] makeAssets; address taker; Asset[] takeAssets; uint256 salt; uint256 start; uint256 end; uint256 nonce; uint8 auctionType; }
        function validateOrder_(Order order, uint8 v, bytes32 r, bytes32 s) external view returns (bool, bytes32)
        function validateMatch_(Order sellOrder, Order buyOrder, address sender, bool viewOnly) external view returns (bool)
    ]"#
);

fn asset_token(asset: &Asset) -> Token {
    Token::Tuple(vec![
        Token::Tuple(vec![
            Token::FixedBytes(asset.class.tag().to_vec()),
            Token::Bytes(asset.type_data.to_vec()),
        ]),
        Token::Bytes(asset.data.to_vec()),
    ])
}

/// Encodes an order exactly as submitted; no field is normalised.
pub fn order_token(order: &OrderStruct) -> Token {
    Token::Tuple(vec![
        Token::Address(order.maker),
        Token::Array(order.make_assets.iter().map(asset_token).collect()),
        Token::Address(order.taker),
        Token::Array(order.take_assets.iter().map(asset_token).collect()),
        Token::Uint(order.salt),
        Token::Uint(order.start.into()),
        Token::Uint(order.end.into()),
        Token::Uint(order.nonce),
        Token::Uint(order.auction_type.as_u8().into()),
    ])
}
