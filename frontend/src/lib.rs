//! Client side of the RWA Imob marketplace.
//!
//! Reads come from the indexer and the contract ([`read_model`]), writes go
//! through a [`submitter::TransactionSubmitter`], and each displayed property
//! is a [`session::PropertyCard`] reconciling the two ([`reconcile`]).

pub mod config;
pub mod errors;
pub mod listing;
pub mod model;
pub mod read_model;
pub mod reconcile;
pub mod session;
pub mod submitter;

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::read_model::{
    BackendClient, ContractReader, IndexedListings, PonderClient, ReadError, ReadModelClient,
};
use crate::submitter::{AlloyWallet, ReadOnlyWallet, TransactionSubmitter, Wallet, WalletError};

#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

/// Everything a marketplace page needs, built from [`ClientConfig`].
pub struct Marketplace {
    pub read_model: Arc<ReadModelClient>,
    wallet: Arc<dyn Wallet>,
    pub config: ClientConfig,
}

impl Marketplace {
    pub async fn connect(config: ClientConfig) -> Result<Self, ConnectError> {
        let contract = config.contract()?;
        let chain = ContractReader::connect(&config.rpc_url, contract).await?;
        let indexed: Arc<dyn IndexedListings> = match &config.backend_url {
            Some(url) => {
                log::info!("reading listings from backend at {}", url);
                Arc::new(BackendClient::new(url))
            }
            None => Arc::new(PonderClient::new(&config.ponder_url)),
        };
        let read_model = Arc::new(ReadModelClient::new(indexed, chain));

        let wallet: Arc<dyn Wallet> = match &config.wallet_private_key {
            Some(key) => Arc::new(AlloyWallet::connect(&config.rpc_url, key, contract).await?),
            None => {
                log::info!("no wallet key configured, running read-only");
                Arc::new(ReadOnlyWallet)
            }
        };

        Ok(Self {
            read_model,
            wallet,
            config,
        })
    }

    /// Card session for `property`. Each card has its own submitter, so one
    /// transaction can be in flight per card.
    pub fn card(&self, property: model::Property) -> session::PropertyCard {
        session::PropertyCard::spawn(
            property,
            self.read_model.clone(),
            Arc::new(TransactionSubmitter::new(self.wallet.clone())),
            self.config.timings(),
        )
    }

    pub fn listing_admin(&self) -> listing::ListingAdmin {
        listing::ListingAdmin::new(
            Arc::new(self.read_model.chain().clone()),
            Arc::new(TransactionSubmitter::new(self.wallet.clone())),
        )
    }
}
