use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use thiserror::Error;

use crate::PropertySale;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("log is missing {0} (pending or removed log?)")]
    MissingMeta(&'static str),
    #[error("failed to decode {event}: {source}")]
    Decode {
        event: &'static str,
        #[source]
        source: alloy::sol_types::Error,
    },
    #[error("property id {0} is out of range")]
    InvalidPropertyId(U256),
}

/// Where a log came from. `block_timestamp` is filled in by the caller when
/// the node does not include it in `eth_getLogs` responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMeta {
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub block_timestamp: Option<u64>,
}

impl EventMeta {
    /// Stable identity of the log, `<txHash>-<logIndex>`.
    pub fn log_id(&self) -> String {
        format!("{}-{}", self.tx_hash, self.log_index)
    }
}

/// Contract events with their fields validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketplaceEvent {
    PropertyListed {
        property_id: u64,
        seller: Address,
        price: U256,
        location: String,
        location_hash: String,
    },
    PropertySold {
        property_id: u64,
        seller: Address,
        buyer: Address,
        price: U256,
    },
    OfferMade {
        property_id: u64,
        buyer: Address,
        amount: U256,
    },
    OfferWithdrawn {
        property_id: u64,
        buyer: Address,
        amount: U256,
    },
    PropertyStatusChanged {
        property_id: u64,
        for_sale: bool,
    },
    PropertyPriceUpdated {
        property_id: u64,
        price: U256,
    },
}

impl MarketplaceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MarketplaceEvent::PropertyListed { .. } => "PropertyListed",
            MarketplaceEvent::PropertySold { .. } => "PropertySold",
            MarketplaceEvent::OfferMade { .. } => "OfferMade",
            MarketplaceEvent::OfferWithdrawn { .. } => "OfferWithdrawn",
            MarketplaceEvent::PropertyStatusChanged { .. } => "PropertyStatusChanged",
            MarketplaceEvent::PropertyPriceUpdated { .. } => "PropertyPriceUpdated",
        }
    }

    pub fn property_id(&self) -> u64 {
        match self {
            MarketplaceEvent::PropertyListed { property_id, .. }
            | MarketplaceEvent::PropertySold { property_id, .. }
            | MarketplaceEvent::OfferMade { property_id, .. }
            | MarketplaceEvent::OfferWithdrawn { property_id, .. }
            | MarketplaceEvent::PropertyStatusChanged { property_id, .. }
            | MarketplaceEvent::PropertyPriceUpdated { property_id, .. } => *property_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEvent {
    pub meta: EventMeta,
    pub event: MarketplaceEvent,
}

impl IndexedEvent {
    /// Decodes a raw log. Returns `Ok(None)` for logs whose topic0 is not one
    /// of the marketplace events.
    pub fn from_log(log: &Log) -> Result<Option<Self>, EventError> {
        let Some(event) = decode_event(log)? else {
            return Ok(None);
        };
        let meta = EventMeta {
            tx_hash: log
                .transaction_hash
                .ok_or(EventError::MissingMeta("transaction hash"))?,
            log_index: log.log_index.ok_or(EventError::MissingMeta("log index"))?,
            block_number: log
                .block_number
                .ok_or(EventError::MissingMeta("block number"))?,
            block_timestamp: log.block_timestamp,
        };
        Ok(Some(Self { meta, event }))
    }
}

/// Largest property id accepted from a log; read models key properties by
/// a signed 32-bit integer.
pub const MAX_PROPERTY_ID: u64 = i32::MAX as u64;

fn property_id(raw: U256) -> Result<u64, EventError> {
    u64::try_from(raw)
        .ok()
        .filter(|id| (1..=MAX_PROPERTY_ID).contains(id))
        .ok_or(EventError::InvalidPropertyId(raw))
}

fn decode<E: SolEvent>(log: &Log) -> Result<E, EventError> {
    log.log_decode::<E>()
        .map(|decoded| decoded.inner.data)
        .map_err(|source| EventError::Decode {
            event: E::SIGNATURE,
            source,
        })
}

/// Maps a log onto a [`MarketplaceEvent`] by its topic0.
pub fn decode_event(log: &Log) -> Result<Option<MarketplaceEvent>, EventError> {
    let Some(topic0) = log.topic0() else {
        return Ok(None);
    };

    let event = match *topic0 {
        t if t == PropertySale::PropertyListed::SIGNATURE_HASH => {
            let e = decode::<PropertySale::PropertyListed>(log)?;
            MarketplaceEvent::PropertyListed {
                property_id: property_id(e.propertyId)?,
                seller: e.seller,
                price: e.price,
                location: e.location,
                location_hash: e.locationHash,
            }
        }
        t if t == PropertySale::PropertySold::SIGNATURE_HASH => {
            let e = decode::<PropertySale::PropertySold>(log)?;
            MarketplaceEvent::PropertySold {
                property_id: property_id(e.propertyId)?,
                seller: e.seller,
                buyer: e.buyer,
                price: e.price,
            }
        }
        t if t == PropertySale::OfferMade::SIGNATURE_HASH => {
            let e = decode::<PropertySale::OfferMade>(log)?;
            MarketplaceEvent::OfferMade {
                property_id: property_id(e.propertyId)?,
                buyer: e.buyer,
                amount: e.amount,
            }
        }
        t if t == PropertySale::OfferWithdrawn::SIGNATURE_HASH => {
            let e = decode::<PropertySale::OfferWithdrawn>(log)?;
            MarketplaceEvent::OfferWithdrawn {
                property_id: property_id(e.propertyId)?,
                buyer: e.buyer,
                amount: e.amount,
            }
        }
        t if t == PropertySale::PropertyStatusChanged::SIGNATURE_HASH => {
            let e = decode::<PropertySale::PropertyStatusChanged>(log)?;
            MarketplaceEvent::PropertyStatusChanged {
                property_id: property_id(e.propertyId)?,
                for_sale: e.newStatus,
            }
        }
        t if t == PropertySale::PropertyPriceUpdated::SIGNATURE_HASH => {
            let e = decode::<PropertySale::PropertyPriceUpdated>(log)?;
            MarketplaceEvent::PropertyPriceUpdated {
                property_id: property_id(e.propertyId)?,
                price: e.newPrice,
            }
        }
        other => {
            log::debug!("ignoring log with unknown topic {}", other);
            return Ok(None);
        }
    };

    Ok(Some(event))
}
