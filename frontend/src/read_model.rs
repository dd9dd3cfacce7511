//! Read side of the marketplace.
//!
//! Two sources with different consistency: the indexed GraphQL service lists
//! every property (eventually consistent, lags the chain by the indexer's
//! cadence) and the contract itself answers per-property reads as of the
//! latest block. All reads are idempotent; errors are retryable and left to
//! the caller's polling cadence.

use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use async_trait::async_trait;
use log::debug;
use property_sale::PropertySale::{self, PropertySaleInstance};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{Offer, Property};

// Ponder caps a page at 1000 rows; larger sets are walked by cursor.
const PROPERTIES_QUERY: &str = r#"query GetProperties($after: String) {
  propertys(limit: 1000, after: $after) {
    items { id owner price forSale location locationHash listedAt }
    pageInfo { hasNextPage endCursor }
  }
}"#;

const OFFERS_QUERY: &str = r#"query GetActiveOffers($after: String) {
  offers(where: { active: true }, limit: 1000, after: $after) {
    items { propertyId buyer amount active }
    pageInfo { hasNextPage endCursor }
  }
}"#;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("indexer request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("indexer query failed: {0}")]
    GraphQl(String),
    #[error("contract read failed: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("rpc connection failed: {0}")]
    Rpc(#[from] alloy::transports::TransportError),
    #[error("malformed {field}: {value}")]
    Malformed { field: &'static str, value: String },
}

/// A source of indexed listings.
#[async_trait]
pub trait IndexedListings: Send + Sync {
    async fn list_properties(&self) -> Result<Vec<Property>, ReadError>;
}

#[async_trait]
pub trait ReadModel: Send + Sync {
    /// All properties with their active offers embedded, from the indexer.
    async fn list_properties(&self) -> Result<Vec<Property>, ReadError>;
    /// The full offer array of one property, straight from the contract.
    async fn list_offers(&self, property_id: u64) -> Result<Vec<Offer>, ReadError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDetails {
    pub owner: Address,
    pub price: U256,
    pub for_sale: bool,
    pub location: String,
    pub location_hash: String,
}

#[async_trait]
pub trait ContractReads: Send + Sync {
    async fn list_offers(&self, property_id: u64) -> Result<Vec<Offer>, ReadError>;
    async fn property_details(&self, property_id: u64) -> Result<PropertyDetails, ReadError>;
    async fn owner_properties(&self, account: Address) -> Result<Vec<u64>, ReadError>;
    /// The platform owner, the only account allowed to list.
    async fn platform_owner(&self) -> Result<Address, ReadError>;
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    items: Vec<T>,
    page_info: Option<PageInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

impl<T> Page<T> {
    fn next_cursor(&self) -> Option<String> {
        self.page_info
            .as_ref()
            .filter(|info| info.has_next_page)
            .and_then(|info| info.end_cursor.clone())
    }
}

// bigint columns arrive as decimal strings
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyItem {
    id: u64,
    owner: String,
    price: String,
    for_sale: bool,
    location: String,
    location_hash: String,
    listed_at: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferItem {
    property_id: u64,
    buyer: String,
    amount: String,
    active: bool,
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, ReadError> {
    value.parse().map_err(|_| ReadError::Malformed {
        field,
        value: value.to_string(),
    })
}

fn parse_u256(field: &'static str, value: &str) -> Result<U256, ReadError> {
    value.parse().map_err(|_| ReadError::Malformed {
        field,
        value: value.to_string(),
    })
}

fn properties_from(
    properties: Vec<PropertyItem>,
    active_offers: Vec<OfferItem>,
) -> Result<Vec<Property>, ReadError> {
    let mut offers: HashMap<u64, Vec<Offer>> = HashMap::new();
    for item in active_offers {
        offers.entry(item.property_id).or_default().push(Offer {
            buyer: parse_address("offer buyer", &item.buyer)?,
            amount: parse_u256("offer amount", &item.amount)?,
            active: item.active,
        });
    }

    properties
        .into_iter()
        .map(|item| {
            Ok(Property {
                id: item.id,
                owner: parse_address("owner", &item.owner)?,
                price: parse_u256("price", &item.price)?,
                for_sale: item.for_sale,
                location: item.location,
                location_hash: item.location_hash,
                listed_at: item
                    .listed_at
                    .parse()
                    .map_err(|_| ReadError::Malformed {
                        field: "listedAt",
                        value: item.listed_at.clone(),
                    })?,
                offers: offers.remove(&item.id).unwrap_or_default(),
            })
        })
        .collect()
}

/// Client for the indexer's GraphQL endpoint.
#[derive(Clone)]
pub struct PonderClient {
    client: reqwest::Client,
    url: String,
}

impl PonderClient {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.trim_end_matches('/').to_string(),
        }
    }

    /// Runs `query` page by page, collecting the items of its `field`.
    async fn collect<T>(&self, query: &str, field: &str) -> Result<Vec<T>, ReadError>
    where
        T: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let response: GraphQlResponse<HashMap<String, Page<T>>> = self
                .client
                .post(&self.url)
                .json(&json!({ "query": query, "variables": { "after": after } }))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            if let Some(first) = response.errors.first() {
                return Err(ReadError::GraphQl(first.message.clone()));
            }
            let page = response
                .data
                .and_then(|mut data| data.remove(field))
                .ok_or_else(|| ReadError::GraphQl(format!("response without {}", field)))?;
            let next = page.next_cursor();
            items.extend(page.items);
            match next {
                Some(cursor) => after = Some(cursor),
                None => return Ok(items),
            }
        }
    }
}

#[async_trait]
impl IndexedListings for PonderClient {
    async fn list_properties(&self) -> Result<Vec<Property>, ReadError> {
        let items = self.collect(PROPERTIES_QUERY, "propertys").await?;
        let offers = self.collect(OFFERS_QUERY, "offers").await?;
        let properties = properties_from(items, offers)?;
        debug!("indexer returned {} properties", properties.len());
        Ok(properties)
    }
}

/// The backend's own read model, `GET {base}/properties`.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    url: String,
}

// numeric columns arrive as decimal strings, offers already filtered to active
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingItem {
    id: u64,
    owner: String,
    price: String,
    for_sale: bool,
    location: String,
    location_hash: String,
    listed_at: u64,
    #[serde(default)]
    offers: Vec<ListingOffer>,
}

#[derive(Deserialize)]
struct ListingOffer {
    buyer: String,
    amount: String,
    active: bool,
}

fn listings_from(items: Vec<ListingItem>) -> Result<Vec<Property>, ReadError> {
    items
        .into_iter()
        .map(|item| {
            let offers = item
                .offers
                .iter()
                .map(|offer| {
                    Ok(Offer {
                        buyer: parse_address("offer buyer", &offer.buyer)?,
                        amount: parse_u256("offer amount", &offer.amount)?,
                        active: offer.active,
                    })
                })
                .collect::<Result<Vec<_>, ReadError>>()?;
            Ok(Property {
                id: item.id,
                owner: parse_address("owner", &item.owner)?,
                price: parse_u256("price", &item.price)?,
                for_sale: item.for_sale,
                location: item.location,
                location_hash: item.location_hash,
                listed_at: item.listed_at,
                offers,
            })
        })
        .collect()
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/properties", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl IndexedListings for BackendClient {
    async fn list_properties(&self) -> Result<Vec<Property>, ReadError> {
        let items: Vec<ListingItem> = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let properties = listings_from(items)?;
        debug!("backend returned {} properties", properties.len());
        Ok(properties)
    }
}

/// Direct `eth_call` reads against the marketplace contract.
#[derive(Clone)]
pub struct ContractReader {
    contract: PropertySaleInstance<DynProvider>,
}

impl ContractReader {
    pub fn new(provider: DynProvider, address: Address) -> Self {
        Self {
            contract: PropertySale::new(address, provider),
        }
    }

    pub async fn connect(rpc_url: &str, address: Address) -> Result<Self, ReadError> {
        let provider = ProviderBuilder::new().connect(rpc_url).await?.erased();
        Ok(Self::new(provider, address))
    }

    pub fn address(&self) -> Address {
        *self.contract.address()
    }
}

#[async_trait]
impl ContractReads for ContractReader {
    async fn list_offers(&self, property_id: u64) -> Result<Vec<Offer>, ReadError> {
        let offers = self
            .contract
            .getPropertyOffers(U256::from(property_id))
            .call()
            .await?;
        Ok(offers.into_iter().map(Offer::from).collect())
    }

    async fn property_details(&self, property_id: u64) -> Result<PropertyDetails, ReadError> {
        let details = self
            .contract
            .getPropertyDetails(U256::from(property_id))
            .call()
            .await?;
        Ok(PropertyDetails {
            owner: details.owner,
            price: details.price,
            for_sale: details.forSale,
            location: details.location,
            location_hash: details.locationHash,
        })
    }

    async fn owner_properties(&self, account: Address) -> Result<Vec<u64>, ReadError> {
        let ids = self.contract.getOwnerProperties(account).call().await?;
        ids.into_iter()
            .map(|id| {
                u64::try_from(id).map_err(|_| ReadError::Malformed {
                    field: "property id",
                    value: id.to_string(),
                })
            })
            .collect()
    }

    async fn platform_owner(&self) -> Result<Address, ReadError> {
        Ok(self.contract.owner().call().await?)
    }
}

/// Indexer for listings, contract for offers.
#[derive(Clone)]
pub struct ReadModelClient {
    indexed: Arc<dyn IndexedListings>,
    chain: ContractReader,
}

impl ReadModelClient {
    pub fn new(indexed: Arc<dyn IndexedListings>, chain: ContractReader) -> Self {
        Self { indexed, chain }
    }

    pub fn chain(&self) -> &ContractReader {
        &self.chain
    }
}

#[async_trait]
impl ReadModel for ReadModelClient {
    async fn list_properties(&self) -> Result<Vec<Property>, ReadError> {
        self.indexed.list_properties().await
    }

    async fn list_offers(&self, property_id: u64) -> Result<Vec<Offer>, ReadError> {
        self.chain.list_offers(property_id).await
    }
}
