use ethers::types::{Address, H256, U256};
use std::str::FromStr;

// Addresses and hashes are stored lowercase, 0x-prefixed
pub fn address_to_string(addr: Address) -> String {
    format!("{:?}", addr).to_lowercase()
}

pub fn string_to_address(s: &str) -> Result<Address, ConversionError> {
    Address::from_str(s).map_err(|e| ConversionError::InvalidAddress(e.to_string()))
}

pub fn h256_to_string(hash: H256) -> String {
    format!("{:?}", hash)
}

pub fn string_to_h256(s: &str) -> Result<H256, ConversionError> {
    H256::from_str(s).map_err(|e| ConversionError::InvalidHash(e.to_string()))
}

// NUMERIC columns travel as decimal text
pub fn u256_to_decimal_string(value: U256) -> String {
    value.to_string()
}

pub fn decimal_string_to_u256(s: &str) -> Result<U256, ConversionError> {
    U256::from_dec_str(s).map_err(|e| ConversionError::InvalidNumber(e.to_string()))
}

// Postgres has no unsigned BIGINT
pub fn u64_to_i64(value: u64) -> Result<i64, ConversionError> {
    i64::try_from(value).map_err(|_| ConversionError::Overflow)
}

pub fn i64_to_u64(value: i64) -> Result<u64, ConversionError> {
    u64::try_from(value).map_err(|_| ConversionError::Overflow)
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("Overflow in conversion")]
    Overflow,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid hash: {0}")]
    InvalidHash(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_lowercased() {
        let addr = string_to_address("0x00000000000000000000000000000000000000AB").unwrap();
        assert_eq!(address_to_string(addr), "0x00000000000000000000000000000000000000ab");
    }

    #[test]
    fn large_nonce_survives_text_form() {
        let nonce = U256::MAX - 1;
        let text = u256_to_decimal_string(nonce);
        assert_eq!(decimal_string_to_u256(&text).unwrap(), nonce);
    }

    #[test]
    fn block_numbers_reject_negative() {
        assert!(i64_to_u64(-1).is_err());
        assert!(u64_to_i64(u64::MAX).is_err());
        assert_eq!(i64_to_u64(10184159).unwrap(), 10184159);
    }
}
