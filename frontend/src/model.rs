use alloy::primitives::{Address, U256};

/// A listed property as the marketplace renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub id: u64,
    pub owner: Address,
    pub price: U256,
    pub for_sale: bool,
    pub location: String,
    pub location_hash: String,
    pub listed_at: u64,
    /// Active offers as reported by the indexer.
    pub offers: Vec<Offer>,
}

impl Property {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            owner: self.owner,
            for_sale: self.for_sale,
            price: self.price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub buyer: Address,
    pub amount: U256,
    pub active: bool,
}

impl From<property_sale::PropertySale::Offer> for Offer {
    fn from(offer: property_sale::PropertySale::Offer) -> Self {
        Self {
            buyer: offer.buyer,
            amount: offer.amount,
            active: offer.active,
        }
    }
}

/// The fields of a property that transactions change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub owner: Address,
    pub for_sale: bool,
    pub price: U256,
}

/// An active offer together with its index in the contract's offer array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedOffer {
    pub index: u64,
    pub offer: Offer,
}

/// Active offers in contract order, keeping their on-chain indices.
pub fn active_offers(offers: &[Offer]) -> Vec<IndexedOffer> {
    offers
        .iter()
        .enumerate()
        .filter(|(_, o)| o.active)
        .map(|(index, offer)| IndexedOffer {
            index: index as u64,
            offer: offer.clone(),
        })
        .collect()
}

/// The viewer's first active offer, if any.
pub fn own_offer(offers: &[Offer], viewer: Address) -> Option<IndexedOffer> {
    active_offers(offers)
        .into_iter()
        .find(|o| o.offer.buyer == viewer)
}
