use bigdecimal::BigDecimal;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;
use std::collections::HashMap;
use thiserror::Error;

use crate::db::DbPool;
use crate::models::{OfferRow, Profile, PropertyListing, PropertyRow, TransactionRow};
use crate::schema::{indexer_checkpoint, offer, profile, property, transaction};

const CHECKPOINT_ID: &str = "PropertySale";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("{0}")]
    Invalid(String),
}

/// Profile persistence, keyed by lowercase address.
pub trait ProfileStore: Send + Sync {
    fn find_profile(&self, address: &str) -> Result<Option<Profile>, StoreError>;
    fn upsert_profile(&self, profile: &Profile) -> Result<Profile, StoreError>;
}

/// Read side of the indexed marketplace.
pub trait PropertyQueries: Send + Sync {
    fn list_properties(&self) -> Result<Vec<PropertyListing>, StoreError>;
    fn find_property(&self, id: i32) -> Result<Option<PropertyListing>, StoreError>;
}

/// Write side used by the event projection. Every method touches at most
/// one logical row.
pub trait ReadModelStore {
    fn upsert_property(&mut self, row: &PropertyRow) -> Result<(), StoreError>;
    fn mark_sold(&mut self, property_id: i32, buyer: &str, sold_at: i64)
        -> Result<usize, StoreError>;
    fn insert_transaction(&mut self, row: &TransactionRow) -> Result<(), StoreError>;
    fn insert_offer(&mut self, row: &OfferRow) -> Result<(), StoreError>;
    fn deactivate_oldest_offer(
        &mut self,
        property_id: i32,
        buyer: &str,
        amount: &BigDecimal,
    ) -> Result<usize, StoreError>;
    fn set_for_sale(&mut self, property_id: i32, for_sale: bool) -> Result<usize, StoreError>;
    fn set_price(&mut self, property_id: i32, price: &BigDecimal) -> Result<usize, StoreError>;
    fn checkpoint(&mut self) -> Result<Option<u64>, StoreError>;
    fn save_checkpoint(&mut self, block: u64) -> Result<(), StoreError>;
}

impl ReadModelStore for PgConnection {
    fn upsert_property(&mut self, row: &PropertyRow) -> Result<(), StoreError> {
        diesel::insert_into(property::table)
            .values(row)
            .on_conflict(property::id)
            .do_update()
            .set((
                property::owner.eq(excluded(property::owner)),
                property::price.eq(excluded(property::price)),
                property::for_sale.eq(true),
                property::location.eq(excluded(property::location)),
                property::location_hash.eq(excluded(property::location_hash)),
                property::listed_at.eq(excluded(property::listed_at)),
            ))
            .execute(self)?;
        Ok(())
    }

    fn mark_sold(
        &mut self,
        property_id: i32,
        buyer: &str,
        sold_at: i64,
    ) -> Result<usize, StoreError> {
        Ok(diesel::update(property::table.find(property_id))
            .set((
                property::owner.eq(buyer),
                property::for_sale.eq(false),
                property::sold_at.eq(Some(sold_at)),
            ))
            .execute(self)?)
    }

    fn insert_transaction(&mut self, row: &TransactionRow) -> Result<(), StoreError> {
        diesel::insert_into(transaction::table)
            .values(row)
            .on_conflict_do_nothing()
            .execute(self)?;
        Ok(())
    }

    fn insert_offer(&mut self, row: &OfferRow) -> Result<(), StoreError> {
        diesel::insert_into(offer::table)
            .values(row)
            .on_conflict_do_nothing()
            .execute(self)?;
        Ok(())
    }

    fn deactivate_oldest_offer(
        &mut self,
        property_id: i32,
        buyer: &str,
        amount: &BigDecimal,
    ) -> Result<usize, StoreError> {
        let target = offer::table
            .filter(offer::property_id.eq(property_id))
            .filter(offer::buyer.eq(buyer))
            .filter(offer::amount.eq(amount))
            .filter(offer::active.eq(true))
            .order((offer::created_at.asc(), offer::id.asc()))
            .select(offer::id)
            .first::<String>(self)
            .optional()?;

        match target {
            Some(id) => Ok(diesel::update(offer::table.find(id))
                .set(offer::active.eq(false))
                .execute(self)?),
            None => Ok(0),
        }
    }

    fn set_for_sale(&mut self, property_id: i32, for_sale: bool) -> Result<usize, StoreError> {
        Ok(diesel::update(property::table.find(property_id))
            .set(property::for_sale.eq(for_sale))
            .execute(self)?)
    }

    fn set_price(&mut self, property_id: i32, price: &BigDecimal) -> Result<usize, StoreError> {
        Ok(diesel::update(property::table.find(property_id))
            .set(property::price.eq(price))
            .execute(self)?)
    }

    fn checkpoint(&mut self) -> Result<Option<u64>, StoreError> {
        let last = indexer_checkpoint::table
            .find(CHECKPOINT_ID)
            .select(indexer_checkpoint::last_block)
            .first::<i64>(self)
            .optional()?;
        Ok(last.and_then(|block| u64::try_from(block).ok()))
    }

    fn save_checkpoint(&mut self, block: u64) -> Result<(), StoreError> {
        let block = i64::try_from(block)
            .map_err(|_| StoreError::Invalid(format!("block {} exceeds int8", block)))?;
        diesel::insert_into(indexer_checkpoint::table)
            .values((
                indexer_checkpoint::id.eq(CHECKPOINT_ID),
                indexer_checkpoint::last_block.eq(block),
            ))
            .on_conflict(indexer_checkpoint::id)
            .do_update()
            .set(indexer_checkpoint::last_block.eq(excluded(indexer_checkpoint::last_block)))
            .execute(self)?;
        Ok(())
    }
}

/// Runs blocking diesel work on the blocking thread pool.
pub async fn run_blocking<T, F>(pool: DbPool, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await?
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn listings(
        conn: &mut PgConnection,
        properties: Vec<PropertyRow>,
    ) -> Result<Vec<PropertyListing>, StoreError> {
        let ids: Vec<i32> = properties.iter().map(|p| p.id).collect();
        let mut offers_by_property: HashMap<i32, Vec<OfferRow>> = HashMap::new();
        for row in offer::table
            .filter(offer::active.eq(true))
            .filter(offer::property_id.eq_any(ids))
            .order(offer::created_at.asc())
            .select(OfferRow::as_select())
            .load(conn)?
        {
            offers_by_property.entry(row.property_id).or_default().push(row);
        }

        Ok(properties
            .into_iter()
            .map(|property| PropertyListing {
                offers: offers_by_property.remove(&property.id).unwrap_or_default(),
                property,
            })
            .collect())
    }
}

impl ProfileStore for PgStore {
    fn find_profile(&self, address: &str) -> Result<Option<Profile>, StoreError> {
        let mut conn = self.pool.get()?;
        Ok(profile::table
            .find(address)
            .select(Profile::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn upsert_profile(&self, row: &Profile) -> Result<Profile, StoreError> {
        let mut conn = self.pool.get()?;
        Ok(diesel::insert_into(profile::table)
            .values(row)
            .on_conflict(profile::address)
            .do_update()
            .set((
                profile::name.eq(excluded(profile::name)),
                profile::bio.eq(excluded(profile::bio)),
                profile::avatar_url.eq(excluded(profile::avatar_url)),
                profile::updated_at.eq(excluded(profile::updated_at)),
            ))
            .returning(Profile::as_returning())
            .get_result(&mut conn)?)
    }
}

impl PropertyQueries for PgStore {
    fn list_properties(&self) -> Result<Vec<PropertyListing>, StoreError> {
        let mut conn = self.pool.get()?;
        let properties = property::table
            .order((property::listed_at.desc(), property::id.desc()))
            .select(PropertyRow::as_select())
            .load(&mut conn)?;
        Self::listings(&mut conn, properties)
    }

    fn find_property(&self, id: i32) -> Result<Option<PropertyListing>, StoreError> {
        let mut conn = self.pool.get()?;
        let found = property::table
            .find(id)
            .select(PropertyRow::as_select())
            .first(&mut conn)
            .optional()?;
        match found {
            Some(row) => Ok(Self::listings(&mut conn, vec![row])?.pop()),
            None => Ok(None),
        }
    }
}
