use alloy::primitives::{Address, U256};
use bigdecimal::BigDecimal;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::property)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRow {
    pub id: i32,
    pub owner: String,
    pub price: BigDecimal,
    pub for_sale: bool,
    pub location: String,
    pub location_hash: String,
    pub listed_at: i64,
    pub sold_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::offer)]
#[serde(rename_all = "camelCase")]
pub struct OfferRow {
    pub id: String,
    pub property_id: i32,
    pub buyer: String,
    pub amount: BigDecimal,
    pub active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::transaction)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRow {
    pub id: String,
    pub property_id: i32,
    pub seller: String,
    pub buyer: String,
    pub price: BigDecimal,
    pub timestamp: i64,
}

/// A property together with its currently active offers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyListing {
    #[serde(flatten)]
    pub property: PropertyRow,
    pub offers: Vec<OfferRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::profile)]
pub struct Profile {
    pub address: String,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub updated_at: i64, // epoch millis
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub address: Option<String>,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

/// Lowercase `0x`-prefixed hex, the form addresses are stored and compared in.
pub fn normalize_address(address: &Address) -> String {
    format!("{:#x}", address)
}

pub fn wei_to_numeric(value: &U256) -> Result<BigDecimal, StoreError> {
    BigDecimal::from_str(&value.to_string())
        .map_err(|e| StoreError::Invalid(format!("amount {} is not numeric: {}", value, e)))
}
