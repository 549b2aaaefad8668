//! View functions of the marketplace contract used to validate orders before
//! they are accepted.

use crate::contracts::{order_token, NftMarketplace};
use crate::rpc_pool::RpcPool;
use crate::types::{OrderSignature, OrderStruct};
use async_trait::async_trait;
use ethers::contract::ContractError;
use ethers::prelude::{Http, Provider};
use ethers::types::{Address, H256};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    #[error("No provider available: {0}")]
    Unavailable(String),
    #[error("Authority call reverted: {0}")]
    Reverted(String),
    #[error("Authority call failed: {0}")]
    Call(String),
    #[error("Authority call timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of the contract's order check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderCheck {
    pub signature_valid: bool,
    /// Struct hash as the contract computes it from the submitted fields
    pub struct_hash: H256,
}

#[async_trait]
pub trait ChainAuthority: Send + Sync {
    async fn validate_order(
        &self,
        order: &OrderStruct,
        signature: &OrderSignature,
    ) -> Result<OrderCheck, AuthorityError>;

    /// `sender` is the account the match would be executed for.
    async fn validate_match(
        &self,
        listing: &OrderStruct,
        bid: &OrderStruct,
        sender: Address,
        view_only: bool,
    ) -> Result<bool, AuthorityError>;
}

/// [`ChainAuthority`] backed by the deployed marketplace contract.
pub struct ContractAuthority {
    pool: Arc<RpcPool>,
    address: Address,
    timeout: Duration,
}

impl ContractAuthority {
    pub fn new(pool: Arc<RpcPool>, address: Address, timeout: Duration) -> Self {
        Self {
            pool,
            address,
            timeout,
        }
    }

    async fn contract(&self) -> Result<(NftMarketplace<Provider<Http>>, Arc<Provider<Http>>, tokio::sync::OwnedSemaphorePermit), AuthorityError> {
        let (provider, permit) = self
            .pool
            .get_next_provider()
            .await
            .map_err(|e| AuthorityError::Unavailable(e.to_string()))?;
        Ok((NftMarketplace::new(self.address, provider.clone()), provider, permit))
    }

    fn map_error(&self, provider: &Arc<Provider<Http>>, e: ContractError<Provider<Http>>) -> AuthorityError {
        match e {
            // the node answered; the contract rejected the input
            ContractError::Revert(data) => {
                self.pool.report_success(provider);
                AuthorityError::Reverted(data.to_string())
            }
            other => {
                self.pool.report_failure(provider);
                AuthorityError::Call(other.to_string())
            }
        }
    }
}

#[async_trait]
impl ChainAuthority for ContractAuthority {
    async fn validate_order(
        &self,
        order: &OrderStruct,
        signature: &OrderSignature,
    ) -> Result<OrderCheck, AuthorityError> {
        let (contract, provider, _permit) = self.contract().await?;
        let call = contract
            .method::<_, (bool, H256)>(
                "validateOrder_",
                (order_token(order), signature.v, signature.r, signature.s),
            )
            .map_err(|e| AuthorityError::Call(e.to_string()))?;

        match tokio::time::timeout(self.timeout, call.call()).await {
            Err(_) => {
                self.pool.report_failure(&provider);
                Err(AuthorityError::Timeout(self.timeout))
            }
            Ok(Err(e)) => Err(self.map_error(&provider, e)),
            Ok(Ok((signature_valid, struct_hash))) => {
                self.pool.report_success(&provider);
                Ok(OrderCheck {
                    signature_valid,
                    struct_hash,
                })
            }
        }
    }

    async fn validate_match(
        &self,
        listing: &OrderStruct,
        bid: &OrderStruct,
        sender: Address,
        view_only: bool,
    ) -> Result<bool, AuthorityError> {
        let (contract, provider, _permit) = self.contract().await?;
        let call = contract
            .method::<_, bool>(
                "validateMatch_",
                (order_token(listing), order_token(bid), sender, view_only),
            )
            .map_err(|e| AuthorityError::Call(e.to_string()))?;

        match tokio::time::timeout(self.timeout, call.call()).await {
            Err(_) => {
                self.pool.report_failure(&provider);
                Err(AuthorityError::Timeout(self.timeout))
            }
            Ok(Err(e)) => Err(self.map_error(&provider, e)),
            Ok(Ok(matches)) => {
                self.pool.report_success(&provider);
                Ok(matches)
            }
        }
    }
}
