// Contracts Module - marketplace ABI bindings

pub mod nft_marketplace;

pub use nft_marketplace::{order_token, NftMarketplace};
