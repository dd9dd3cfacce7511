//! Transaction submission.
//!
//! A [`TransactionSubmitter`] proposes one contract call at a time through a
//! [`Wallet`] and publishes its lifecycle on a `watch` channel:
//! `Idle -> Pending -> Confirming -> Confirmed | Failed`.

use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use log::{info, warn};
use property_sale::PropertySale;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::errors::{categorize, Classification};

/// A state-changing call on the marketplace contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    ListProperty { location: String, price: U256, uri: String },
    BuyProperty { property_id: u64, price: U256 },
    RelistProperty { property_id: u64, new_price: U256 },
    DelistProperty { property_id: u64 },
    MakeOffer { property_id: u64, amount: U256 },
    WithdrawOffer { property_id: u64, offer_index: u64 },
    AcceptOffer { property_id: u64, offer_index: u64 },
    RefundOffer { property_id: u64, offer_index: u64 },
}

impl ContractCall {
    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::ListProperty { .. } => "listProperty",
            ContractCall::BuyProperty { .. } => "buyProperty",
            ContractCall::RelistProperty { .. } => "relistProperty",
            ContractCall::DelistProperty { .. } => "delistProperty",
            ContractCall::MakeOffer { .. } => "makeOffer",
            ContractCall::WithdrawOffer { .. } => "withdrawOffer",
            ContractCall::AcceptOffer { .. } => "acceptOffer",
            ContractCall::RefundOffer { .. } => "refundOffer",
        }
    }

    /// Native value sent along with the call.
    pub fn value(&self) -> U256 {
        match self {
            ContractCall::BuyProperty { price, .. } => *price,
            ContractCall::MakeOffer { amount, .. } => *amount,
            _ => U256::ZERO,
        }
    }

    pub fn calldata(&self) -> Bytes {
        let encoded = match self {
            ContractCall::ListProperty {
                location,
                price,
                uri,
            } => PropertySale::listPropertyCall {
                location: location.clone(),
                price: *price,
                uri: uri.clone(),
            }
            .abi_encode(),
            ContractCall::BuyProperty { property_id, .. } => PropertySale::buyPropertyCall {
                propertyId: U256::from(*property_id),
            }
            .abi_encode(),
            ContractCall::RelistProperty {
                property_id,
                new_price,
            } => PropertySale::relistPropertyCall {
                propertyId: U256::from(*property_id),
                newPrice: *new_price,
            }
            .abi_encode(),
            ContractCall::DelistProperty { property_id } => PropertySale::delistPropertyCall {
                propertyId: U256::from(*property_id),
            }
            .abi_encode(),
            ContractCall::MakeOffer { property_id, .. } => PropertySale::makeOfferCall {
                propertyId: U256::from(*property_id),
            }
            .abi_encode(),
            ContractCall::WithdrawOffer {
                property_id,
                offer_index,
            } => PropertySale::withdrawOfferCall {
                propertyId: U256::from(*property_id),
                offerIndex: U256::from(*offer_index),
            }
            .abi_encode(),
            ContractCall::AcceptOffer {
                property_id,
                offer_index,
            } => PropertySale::acceptOfferCall {
                propertyId: U256::from(*property_id),
                offerIndex: U256::from(*offer_index),
            }
            .abi_encode(),
            ContractCall::RefundOffer {
                property_id,
                offer_index,
            } => PropertySale::refundOfferCall {
                propertyId: U256::from(*property_id),
                offerIndex: U256::from(*offer_index),
            }
            .abi_encode(),
        };
        Bytes::from(encoded)
    }
}

/// Identity of a broadcast transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle(pub B256);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Idle,
    /// Signature requested.
    Pending,
    /// Broadcast, waiting for inclusion.
    Confirming(TxHandle),
    Confirmed(TxHandle),
    /// Carries the classified user-facing message.
    Failed(String),
}

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("no wallet connected")]
    NotConnected,
    #[error("invalid wallet key: {0}")]
    InvalidKey(String),
    #[error("{0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("execution reverted in transaction {0}")]
    Reverted(B256),
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("another transaction is already in flight")]
    InFlight,
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

impl SubmitError {
    pub fn classify(&self) -> Classification {
        categorize(&self.to_string())
    }
}

/// Signing and broadcasting provider.
#[async_trait]
pub trait Wallet: Send + Sync {
    fn address(&self) -> Option<Address>;

    /// Requests a signature and broadcasts. Returns once the node accepted
    /// the transaction.
    async fn send(&self, call: &ContractCall) -> Result<B256, WalletError>;

    /// Resolves when the transaction is included; a reverted receipt is an error.
    async fn wait_for_receipt(&self, hash: B256) -> Result<(), WalletError>;
}

/// Clears the in-flight flag when a submission resolves, however it resolves.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TransactionSubmitter {
    wallet: Arc<dyn Wallet>,
    status: watch::Sender<TxStatus>,
    in_flight: AtomicBool,
}

impl TransactionSubmitter {
    pub fn new(wallet: Arc<dyn Wallet>) -> Self {
        let (status, _) = watch::channel(TxStatus::Idle);
        Self {
            wallet,
            status,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn viewer(&self) -> Option<Address> {
        self.wallet.address()
    }

    pub fn subscribe(&self) -> watch::Receiver<TxStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> TxStatus {
        self.status.borrow().clone()
    }

    /// Submits `call` and waits for its receipt. At most one call per
    /// submitter is in flight; a second one fails with [`SubmitError::InFlight`].
    /// `on_broadcast` runs once the wallet has broadcast the transaction.
    pub async fn execute<F>(
        &self,
        call: &ContractCall,
        on_broadcast: F,
    ) -> Result<TxHandle, SubmitError>
    where
        F: FnOnce(TxHandle) + Send,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SubmitError::InFlight);
        }
        let _guard = InFlight(&self.in_flight);

        self.status.send_replace(TxStatus::Pending);
        info!("submitting {} (value {})", call.name(), call.value());

        let result = async move {
            let handle = TxHandle(self.wallet.send(call).await?);
            self.status.send_replace(TxStatus::Confirming(handle));
            info!("{} broadcast as {}", call.name(), handle);
            on_broadcast(handle);
            self.wallet.wait_for_receipt(handle.0).await?;
            Ok::<_, SubmitError>(handle)
        }
        .await;

        match &result {
            Ok(handle) => {
                info!("{} confirmed in {}", call.name(), handle);
                self.status.send_replace(TxStatus::Confirmed(*handle));
            }
            Err(e) => {
                warn!("{} failed: {}", call.name(), e);
                self.status.send_replace(TxStatus::Failed(e.classify().message));
            }
        }
        result
    }
}

/// Local-key wallet over JSON-RPC.
pub struct AlloyWallet {
    provider: DynProvider,
    signer: Address,
    contract: Address,
    poll_interval: Duration,
}

impl AlloyWallet {
    pub async fn connect(
        rpc_url: &str,
        private_key: &str,
        contract: Address,
    ) -> Result<Self, WalletError> {
        let signer: PrivateKeySigner = private_key.trim().parse().map_err(
            |e: alloy::signers::local::LocalSignerError| WalletError::InvalidKey(e.to_string()),
        )?;
        let address = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect(rpc_url)
            .await
            .map_err(|e| WalletError::Transport(e.to_string()))?
            .erased();
        Ok(Self {
            provider,
            signer: address,
            contract,
            poll_interval: Duration::from_secs(1),
        })
    }
}

#[async_trait]
impl Wallet for AlloyWallet {
    fn address(&self) -> Option<Address> {
        Some(self.signer)
    }

    async fn send(&self, call: &ContractCall) -> Result<B256, WalletError> {
        let tx = TransactionRequest::default()
            .with_from(self.signer)
            .with_to(self.contract)
            .with_input(call.calldata())
            .with_value(call.value());
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| WalletError::Rejected(e.to_string()))?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<(), WalletError> {
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| WalletError::Transport(e.to_string()))?;
            if let Some(receipt) = receipt {
                return if receipt.status() {
                    Ok(())
                } else {
                    Err(WalletError::Reverted(hash))
                };
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Wallet for a viewer without a key: every submission fails.
pub struct ReadOnlyWallet;

#[async_trait]
impl Wallet for ReadOnlyWallet {
    fn address(&self) -> Option<Address> {
        None
    }

    async fn send(&self, _call: &ContractCall) -> Result<B256, WalletError> {
        Err(WalletError::NotConnected)
    }

    async fn wait_for_receipt(&self, _hash: B256) -> Result<(), WalletError> {
        Err(WalletError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use tokio::sync::Notify;

    struct GatedWallet {
        gate: Notify,
        reject: bool,
    }

    #[async_trait]
    impl Wallet for GatedWallet {
        fn address(&self) -> Option<Address> {
            Some(address!("00000000000000000000000000000000000000bb"))
        }

        async fn send(&self, _call: &ContractCall) -> Result<B256, WalletError> {
            if self.reject {
                return Err(WalletError::Rejected("User rejected the request.".into()));
            }
            Ok(B256::with_last_byte(1))
        }

        async fn wait_for_receipt(&self, _hash: B256) -> Result<(), WalletError> {
            self.gate.notified().await;
            Ok(())
        }
    }

    #[test]
    fn buy_sends_price_as_value() {
        let call = ContractCall::BuyProperty {
            property_id: 7,
            price: U256::from(1000),
        };
        assert_eq!(call.value(), U256::from(1000));
        assert_eq!(&call.calldata()[..4], PropertySale::buyPropertyCall::SELECTOR.as_slice());
        assert_eq!(
            ContractCall::AcceptOffer {
                property_id: 7,
                offer_index: 0
            }
            .value(),
            U256::ZERO
        );
    }

    #[tokio::test]
    async fn second_submission_is_rejected_while_in_flight() {
        let wallet = Arc::new(GatedWallet {
            gate: Notify::new(),
            reject: false,
        });
        let submitter = Arc::new(TransactionSubmitter::new(wallet.clone()));
        let mut status = submitter.subscribe();
        let call = ContractCall::DelistProperty { property_id: 3 };

        let first = tokio::spawn({
            let submitter = submitter.clone();
            let call = call.clone();
            async move { submitter.execute(&call, |_| {}).await }
        });
        status
            .wait_for(|s| matches!(s, TxStatus::Confirming(_)))
            .await
            .unwrap();

        assert!(matches!(
            submitter.execute(&call, |_| {}).await,
            Err(SubmitError::InFlight)
        ));

        wallet.gate.notify_one();
        let handle = first.await.unwrap().unwrap();
        assert_eq!(submitter.status(), TxStatus::Confirmed(handle));
        // the slot is free again
        wallet.gate.notify_one();
        assert!(submitter.execute(&call, |_| {}).await.is_ok());
    }

    #[tokio::test]
    async fn rejection_is_published_classified() {
        let submitter = TransactionSubmitter::new(Arc::new(GatedWallet {
            gate: Notify::new(),
            reject: true,
        }));
        let err = submitter
            .execute(&ContractCall::DelistProperty { property_id: 3 }, |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.classify().kind, crate::errors::FailureKind::UserRejection);
        assert_eq!(
            submitter.status(),
            TxStatus::Failed("Transação rejeitada pelo usuário".into())
        );
    }

    #[tokio::test]
    async fn read_only_wallet_cannot_submit() {
        let submitter = TransactionSubmitter::new(Arc::new(ReadOnlyWallet));
        assert!(submitter.viewer().is_none());
        let err = submitter
            .execute(&ContractCall::DelistProperty { property_id: 1 }, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Wallet(WalletError::NotConnected)));
    }
}
