//! Marketplace asset model.
//!
//! Every asset on an order is identified on-chain by a 4-byte class tag,
//! `bytes4(keccak256(<class name>))`, followed by class-specific ABI-encoded
//! type data. The tag selects one fixed decode schema:
//!
//! | Tag name  | Type data                           |
//! |-----------|-------------------------------------|
//! | `ETH`     | (none)                              |
//! | `ERC20`   | `(address)`                         |
//! | `ERC721`  | `(address, uint256, bool)`          |
//! | `ERC1155` | `(address, uint256, bool)`          |
//!
//! The asset's own data is always `(uint256 value, uint256 minimumBid)`.

use crate::events::DecodeError;
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::keccak256;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub type ClassTag = [u8; 4];

fn class_tag(name: &str) -> ClassTag {
    let hash = keccak256(name.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub static ETH_ASSET_CLASS: Lazy<ClassTag> = Lazy::new(|| class_tag("ETH"));
pub static ERC20_ASSET_CLASS: Lazy<ClassTag> = Lazy::new(|| class_tag("ERC20"));
pub static ERC721_ASSET_CLASS: Lazy<ClassTag> = Lazy::new(|| class_tag("ERC721"));
pub static ERC1155_ASSET_CLASS: Lazy<ClassTag> = Lazy::new(|| class_tag("ERC1155"));

/// Asset class with the fields its decode schema carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum AssetClass {
    /// Chain native coin
    Native,
    /// ERC20 token
    Fungible { contract: Address },
    /// ERC721 token. `allow_all` lets the order match any id of the collection.
    NonFungible {
        contract: Address,
        token_id: U256,
        allow_all: bool,
    },
    /// ERC1155 token
    MultiToken {
        contract: Address,
        token_id: U256,
        allow_all: bool,
    },
}

impl AssetClass {
    pub fn tag(&self) -> ClassTag {
        match self {
            AssetClass::Native => *ETH_ASSET_CLASS,
            AssetClass::Fungible { .. } => *ERC20_ASSET_CLASS,
            AssetClass::NonFungible { .. } => *ERC721_ASSET_CLASS,
            AssetClass::MultiToken { .. } => *ERC1155_ASSET_CLASS,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AssetClass::Native => "ETH",
            AssetClass::Fungible { .. } => "ERC20",
            AssetClass::NonFungible { .. } => "ERC721",
            AssetClass::MultiToken { .. } => "ERC1155",
        }
    }

    /// Contract address of the asset; zero for the native coin.
    pub fn contract(&self) -> Address {
        match self {
            AssetClass::Native => Address::zero(),
            AssetClass::Fungible { contract }
            | AssetClass::NonFungible { contract, .. }
            | AssetClass::MultiToken { contract, .. } => *contract,
        }
    }

    pub fn token_id(&self) -> Option<U256> {
        match self {
            AssetClass::NonFungible { token_id, .. } | AssetClass::MultiToken { token_id, .. } => {
                Some(*token_id)
            }
            _ => None,
        }
    }

    /// Decodes the type data for `tag`.
    ///
    /// Returns `Ok(None)` for tags that are not one of the four known classes.
    pub fn decode(tag: ClassTag, type_data: &[u8]) -> Result<Option<Self>, DecodeError> {
        if tag == *ETH_ASSET_CLASS {
            return Ok(Some(AssetClass::Native));
        }
        if tag == *ERC20_ASSET_CLASS {
            let tokens = abi::decode(&[ParamType::Address], type_data)?;
            return Ok(Some(AssetClass::Fungible {
                contract: take_address(&tokens, 0)?,
            }));
        }
        let is_erc721 = tag == *ERC721_ASSET_CLASS;
        if is_erc721 || tag == *ERC1155_ASSET_CLASS {
            let tokens = abi::decode(
                &[ParamType::Address, ParamType::Uint(256), ParamType::Bool],
                type_data,
            )?;
            let contract = take_address(&tokens, 0)?;
            let token_id = take_uint(&tokens, 1)?;
            let allow_all = take_bool(&tokens, 2)?;
            return Ok(Some(if is_erc721 {
                AssetClass::NonFungible {
                    contract,
                    token_id,
                    allow_all,
                }
            } else {
                AssetClass::MultiToken {
                    contract,
                    token_id,
                    allow_all,
                }
            }));
        }
        Ok(None)
    }

    pub fn encode_type_data(&self) -> Bytes {
        match self {
            AssetClass::Native => Bytes::default(),
            AssetClass::Fungible { contract } => abi::encode(&[Token::Address(*contract)]).into(),
            AssetClass::NonFungible {
                contract,
                token_id,
                allow_all,
            }
            | AssetClass::MultiToken {
                contract,
                token_id,
                allow_all,
            } => abi::encode(&[
                Token::Address(*contract),
                Token::Uint(*token_id),
                Token::Bool(*allow_all),
            ])
            .into(),
        }
    }
}

/// One entry of an order's make or take list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub class: AssetClass,
    /// Raw class type data as signed
    pub type_data: Bytes,
    /// Raw `(value, minimumBid)` encoding as signed
    pub data: Bytes,
    pub value: U256,
    pub minimum_bid: U256,
}

impl Asset {
    pub fn new(class: AssetClass, value: U256, minimum_bid: U256) -> Self {
        let type_data = class.encode_type_data();
        let data = abi::encode(&[Token::Uint(value), Token::Uint(minimum_bid)]).into();
        Self {
            class,
            type_data,
            data,
            value,
            minimum_bid,
        }
    }

    /// Decodes a single entry. Unknown class tags yield `Ok(None)`.
    pub fn decode(tag: ClassTag, type_data: &[u8], data: &[u8]) -> Result<Option<Self>, DecodeError> {
        let class = match AssetClass::decode(tag, type_data)? {
            Some(class) => class,
            None => return Ok(None),
        };
        let amounts = abi::decode(&[ParamType::Uint(256), ParamType::Uint(256)], data)?;
        Ok(Some(Self {
            class,
            type_data: Bytes::from(type_data.to_vec()),
            data: Bytes::from(data.to_vec()),
            value: take_uint(&amounts, 0)?,
            minimum_bid: take_uint(&amounts, 1)?,
        }))
    }

    /// Decodes the three parallel arrays an event carries for one asset list.
    ///
    /// Entries with an unknown class tag are dropped; a malformed entry fails
    /// the whole list.
    pub fn decode_list(
        tags: &[ClassTag],
        type_data: &[Bytes],
        data: &[Bytes],
    ) -> Result<Vec<Self>, DecodeError> {
        if tags.len() != type_data.len() || tags.len() != data.len() {
            return Err(DecodeError::LengthMismatch {
                classes: tags.len(),
                type_data: type_data.len(),
                data: data.len(),
            });
        }
        let mut assets = Vec::with_capacity(tags.len());
        for ((tag, type_data), data) in tags.iter().zip(type_data).zip(data) {
            match Self::decode(*tag, type_data, data)? {
                Some(asset) => assets.push(asset),
                None => log::debug!("Dropping asset with unknown class tag 0x{}", hex::encode(tag)),
            }
        }
        Ok(assets)
    }
}

fn take_address(tokens: &[Token], index: usize) -> Result<Address, DecodeError> {
    tokens
        .get(index)
        .cloned()
        .and_then(Token::into_address)
        .ok_or(DecodeError::UnexpectedToken("address"))
}

fn take_uint(tokens: &[Token], index: usize) -> Result<U256, DecodeError> {
    tokens
        .get(index)
        .cloned()
        .and_then(Token::into_uint)
        .ok_or(DecodeError::UnexpectedToken("uint256"))
}

fn take_bool(tokens: &[Token], index: usize) -> Result<bool, DecodeError> {
    tokens
        .get(index)
        .cloned()
        .and_then(Token::into_bool)
        .ok_or(DecodeError::UnexpectedToken("bool"))
}
