//! Event-to-row projection. Each event updates exactly one property, offer
//! or transaction row (a sale also appends its transaction record).

use log::{debug, warn};
use property_sale::{IndexedEvent, MarketplaceEvent};

use crate::models::{normalize_address, wei_to_numeric, OfferRow, PropertyRow, TransactionRow};
use crate::store::{ReadModelStore, StoreError};

pub fn project<S: ReadModelStore + ?Sized>(
    store: &mut S,
    indexed: &IndexedEvent,
) -> Result<(), StoreError> {
    let meta = &indexed.meta;
    let timestamp = meta
        .block_timestamp
        .and_then(|ts| i64::try_from(ts).ok())
        .ok_or_else(|| {
            StoreError::Invalid(format!("log {} has no block timestamp", meta.log_id()))
        })?;
    let property_id = i32::try_from(indexed.event.property_id()).map_err(|_| {
        StoreError::Invalid(format!(
            "property id {} does not fit the read model",
            indexed.event.property_id()
        ))
    })?;

    debug!(
        "projecting {} for property {} (block {})",
        indexed.event.name(),
        property_id,
        meta.block_number
    );

    let touched = match &indexed.event {
        MarketplaceEvent::PropertyListed {
            seller,
            price,
            location,
            location_hash,
            ..
        } => {
            store.upsert_property(&PropertyRow {
                id: property_id,
                owner: normalize_address(seller),
                price: wei_to_numeric(price)?,
                for_sale: true,
                location: location.clone(),
                location_hash: location_hash.clone(),
                listed_at: timestamp,
                sold_at: None,
            })?;
            1
        }
        MarketplaceEvent::PropertySold {
            seller,
            buyer,
            price,
            ..
        } => {
            let buyer = normalize_address(buyer);
            let touched = store.mark_sold(property_id, &buyer, timestamp)?;
            store.insert_transaction(&TransactionRow {
                id: meta.log_id(),
                property_id,
                seller: normalize_address(seller),
                buyer,
                price: wei_to_numeric(price)?,
                timestamp,
            })?;
            touched
        }
        MarketplaceEvent::OfferMade { buyer, amount, .. } => {
            store.insert_offer(&OfferRow {
                id: meta.log_id(),
                property_id,
                buyer: normalize_address(buyer),
                amount: wei_to_numeric(amount)?,
                active: true,
                created_at: timestamp,
            })?;
            1
        }
        MarketplaceEvent::OfferWithdrawn { buyer, amount, .. } => store.deactivate_oldest_offer(
            property_id,
            &normalize_address(buyer),
            &wei_to_numeric(amount)?,
        )?,
        MarketplaceEvent::PropertyStatusChanged { for_sale, .. } => {
            store.set_for_sale(property_id, *for_sale)?
        }
        MarketplaceEvent::PropertyPriceUpdated { price, .. } => {
            store.set_price(property_id, &wei_to_numeric(price)?)?
        }
    };

    if touched == 0 {
        warn!(
            "{} at {} matched no row for property {}",
            indexed.event.name(),
            meta.log_id(),
            property_id
        );
    }
    Ok(())
}

/// Projects a batch and advances the checkpoint to `through_block`.
/// Callers run this inside one database transaction.
pub fn apply_batch<S: ReadModelStore + ?Sized>(
    store: &mut S,
    events: &[IndexedEvent],
    through_block: u64,
) -> Result<usize, StoreError> {
    for event in events {
        project(store, event)?;
    }
    store.save_checkpoint(through_block)?;
    Ok(events.len())
}
