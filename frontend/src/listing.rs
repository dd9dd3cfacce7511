//! Registering and delisting properties.
//!
//! Listing is reserved to the platform owner (`owner()` on the contract);
//! delisting to the property's current owner per `getPropertyDetails`.

use alloy::primitives::{Address, U256};
use log::info;
use std::sync::Arc;
use thiserror::Error;

use crate::read_model::{ContractReads, ReadError};
use crate::submitter::{ContractCall, SubmitError, TransactionSubmitter, TxHandle};

pub const DEFAULT_IMAGE_URI: &str = "https://images.unsplash.com/photo-1600585154340-be6161a56a0c";

#[derive(Error, Debug)]
pub enum ListingError {
    #[error("Conecte sua carteira para continuar.")]
    NotConnected,
    #[error("Apenas o owner da plataforma pode cadastrar imóveis.")]
    NotPlatformOwner,
    #[error("Informe a localização do imóvel.")]
    MissingLocation,
    #[error("Informe o preço do imóvel.")]
    MissingPrice,
    #[error("Informe um ID válido (maior que 0).")]
    InvalidPropertyId,
    #[error("Apenas o owner do imóvel pode remover.")]
    NotPropertyOwner,
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingDraft {
    pub location: String,
    pub price: U256,
    pub uri: String,
}

impl ListingDraft {
    pub fn new(location: impl Into<String>, price: U256) -> Self {
        Self {
            location: location.into(),
            price,
            uri: DEFAULT_IMAGE_URI.to_string(),
        }
    }
}

pub fn parse_property_id(input: &str) -> Result<u64, ListingError> {
    match input.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ListingError::InvalidPropertyId),
    }
}

pub fn register_call(
    viewer: Option<Address>,
    platform_owner: Address,
    draft: &ListingDraft,
) -> Result<ContractCall, ListingError> {
    let viewer = viewer.ok_or(ListingError::NotConnected)?;
    if viewer != platform_owner {
        return Err(ListingError::NotPlatformOwner);
    }
    if draft.location.trim().is_empty() {
        return Err(ListingError::MissingLocation);
    }
    if draft.price.is_zero() {
        return Err(ListingError::MissingPrice);
    }
    Ok(ContractCall::ListProperty {
        location: draft.location.trim().to_string(),
        price: draft.price,
        uri: draft.uri.clone(),
    })
}

pub fn delist_call(
    property_id: u64,
    viewer: Option<Address>,
    property_owner: Address,
) -> Result<ContractCall, ListingError> {
    if property_id == 0 {
        return Err(ListingError::InvalidPropertyId);
    }
    if viewer.ok_or(ListingError::NotConnected)? != property_owner {
        return Err(ListingError::NotPropertyOwner);
    }
    Ok(ContractCall::DelistProperty { property_id })
}

pub struct ListingAdmin {
    chain: Arc<dyn ContractReads>,
    submitter: Arc<TransactionSubmitter>,
}

impl ListingAdmin {
    pub fn new(chain: Arc<dyn ContractReads>, submitter: Arc<TransactionSubmitter>) -> Self {
        Self { chain, submitter }
    }

    /// Whether the connected viewer may list new properties.
    pub async fn can_register(&self) -> Result<bool, ListingError> {
        match self.submitter.viewer() {
            Some(viewer) => Ok(self.chain.platform_owner().await? == viewer),
            None => Ok(false),
        }
    }

    pub async fn register(&self, draft: ListingDraft) -> Result<TxHandle, ListingError> {
        let platform_owner = self.chain.platform_owner().await?;
        let call = register_call(self.submitter.viewer(), platform_owner, &draft)?;
        let handle = self.submitter.execute(&call, |_| {}).await?;
        info!("registered property at {}", draft.location);
        Ok(handle)
    }

    /// Property ids the viewer owns, from the contract.
    pub async fn removable(&self) -> Result<Vec<u64>, ListingError> {
        match self.submitter.viewer() {
            Some(viewer) => Ok(self.chain.owner_properties(viewer).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn delist(&self, property_id: u64) -> Result<TxHandle, ListingError> {
        if property_id == 0 {
            return Err(ListingError::InvalidPropertyId);
        }
        let viewer = self.submitter.viewer().ok_or(ListingError::NotConnected)?;
        let details = self.chain.property_details(property_id).await?;
        let call = delist_call(property_id, Some(viewer), details.owner)?;
        let handle = self.submitter.execute(&call, |_| {}).await?;
        info!("property {} removed from sale", property_id);
        Ok(handle)
    }
}
