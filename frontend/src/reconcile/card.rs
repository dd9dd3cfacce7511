use alloy::primitives::{Address, U256};
use log::{debug, info};
use tokio::time::Instant;

use super::{
    Action, ActionKind, Effect, IntentError, OfferReconciler, PropertyReconciler, Timings,
};
use crate::model::{active_offers, own_offer, IndexedOffer, Offer, Property};
use crate::submitter::{ContractCall, TxHandle};

const CONFIRMED_NOTICE: &str = "Operação confirmada!";

/// A user request coming from the card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Buy,
    Relist { new_price: U256 },
    Delist,
    MakeOffer { amount: U256 },
    /// Withdraws the viewer's own active offer.
    WithdrawOffer,
    AcceptOffer { offer_index: u64 },
    RefundOffer { offer_index: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Notice,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub kind: MessageKind,
    pub text: String,
}

/// An accepted intent: the call to hand to the submitter and the timers it
/// starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub action: Action,
    pub call: ContractCall,
    pub effects: Vec<Effect>,
}

/// What the card renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardView {
    pub property_id: u64,
    pub owner: Address,
    pub for_sale: bool,
    pub price: U256,
    pub location: String,
    pub location_hash: String,
    pub pending: Option<ActionKind>,
    pub settling: bool,
    pub is_owner: bool,
    /// The viewer's own active offer, optimistic or read.
    pub own_offer: Option<U256>,
    pub offer_input_open: bool,
    /// Active offers with their contract indices; only filled for the owner.
    pub received_offers: Vec<IndexedOffer>,
    pub active_offer_count: usize,
    pub message: Option<Message>,
    pub read_error: Option<String>,
}

/// Property and offer reconciliation for one card and one viewer.
#[derive(Debug, Clone)]
pub struct Card {
    property_id: u64,
    location: String,
    location_hash: String,
    viewer: Option<Address>,
    timings: Timings,
    property: PropertyReconciler,
    offer: OfferReconciler,
    /// Full offer array from the contract.
    offers: Vec<Offer>,
    /// Whether the last contract offer read succeeded.
    offers_fresh: bool,
    /// Active offers embedded by the indexer.
    indexed_offers: Vec<Offer>,
    message: Option<Message>,
    next_message_id: u64,
    read_error: Option<String>,
}

impl Card {
    pub fn new(property: &Property, viewer: Option<Address>, timings: Timings) -> Self {
        Self {
            property_id: property.id,
            location: property.location.clone(),
            location_hash: property.location_hash.clone(),
            viewer,
            timings,
            property: PropertyReconciler::new(property.snapshot()),
            offer: OfferReconciler::default(),
            offers: Vec::new(),
            offers_fresh: false,
            indexed_offers: property.offers.clone(),
            message: None,
            next_message_id: 0,
            read_error: None,
        }
    }

    pub fn property_id(&self) -> u64 {
        self.property_id
    }

    pub fn property(&self) -> &PropertyReconciler {
        &self.property
    }

    pub fn offer(&self) -> &OfferReconciler {
        &self.offer
    }

    fn is_owner(&self) -> bool {
        self.viewer == Some(self.property.view().owner)
    }

    fn read_own_offer(&self) -> Option<IndexedOffer> {
        self.viewer.and_then(|viewer| own_offer(&self.offers, viewer))
    }

    /// Validates `intent`, enters `Pending` and returns the call to submit.
    pub fn intent(&mut self, intent: Intent, now: Instant) -> Result<Submission, IntentError> {
        if !self.property.is_idle() {
            return Err(IntentError::Busy);
        }
        let viewer = self.viewer.ok_or(IntentError::NotConnected)?;
        let shown = self.property.view();
        let id = self.property_id;

        let (action, call) = match intent {
            Intent::Buy => {
                if self.is_owner() {
                    return Err(IntentError::AlreadyOwner);
                }
                if !shown.for_sale {
                    return Err(IntentError::NotForSale);
                }
                (
                    Action::Buy { buyer: viewer },
                    ContractCall::BuyProperty {
                        property_id: id,
                        price: shown.price,
                    },
                )
            }
            Intent::Relist { new_price } => {
                if !self.is_owner() {
                    return Err(IntentError::NotOwner);
                }
                if shown.for_sale {
                    return Err(IntentError::AlreadyForSale);
                }
                if new_price.is_zero() {
                    return Err(IntentError::InvalidPrice);
                }
                (
                    Action::Relist { new_price },
                    ContractCall::RelistProperty {
                        property_id: id,
                        new_price,
                    },
                )
            }
            Intent::Delist => {
                if !self.is_owner() {
                    return Err(IntentError::NotOwner);
                }
                if !shown.for_sale {
                    return Err(IntentError::NotForSale);
                }
                (Action::Delist, ContractCall::DelistProperty { property_id: id })
            }
            Intent::MakeOffer { amount } => {
                if amount.is_zero() {
                    return Err(IntentError::InvalidOfferAmount);
                }
                if self.is_owner() {
                    return Err(IntentError::AlreadyOwner);
                }
                if !shown.for_sale {
                    return Err(IntentError::NotForSale);
                }
                let read = self.read_own_offer().map(|o| o.offer.amount);
                if self.offer.displayed(read).is_some() {
                    return Err(IntentError::OfferExists);
                }
                (
                    Action::Offer { amount },
                    ContractCall::MakeOffer {
                        property_id: id,
                        amount,
                    },
                )
            }
            Intent::WithdrawOffer => {
                let own = self.read_own_offer().ok_or(IntentError::NoOwnOffer)?;
                (
                    Action::Withdraw {
                        offer_index: own.index,
                    },
                    ContractCall::WithdrawOffer {
                        property_id: id,
                        offer_index: own.index,
                    },
                )
            }
            Intent::AcceptOffer { offer_index } => {
                self.received_offer(offer_index)?;
                (
                    Action::Accept { offer_index },
                    ContractCall::AcceptOffer {
                        property_id: id,
                        offer_index,
                    },
                )
            }
            Intent::RefundOffer { offer_index } => {
                self.received_offer(offer_index)?;
                (
                    Action::Refund { offer_index },
                    ContractCall::RefundOffer {
                        property_id: id,
                        offer_index,
                    },
                )
            }
        };

        self.property.submit(action.clone())?;
        self.message = None;
        let mut effects = Vec::new();
        if let Action::Offer { amount } = action {
            self.offer.begin(amount, now, self.timings.offer_grace);
            effects.push(Effect::RecheckOfferAfter(self.timings.offer_grace));
        }
        info!("property {}: {} pending", id, call.name());
        Ok(Submission {
            action,
            call,
            effects,
        })
    }

    fn received_offer(&self, index: u64) -> Result<(), IntentError> {
        if !self.is_owner() {
            return Err(IntentError::NotOwner);
        }
        let active = usize::try_from(index)
            .ok()
            .and_then(|i| self.offers.get(i))
            .is_some_and(|o| o.active);
        if active {
            Ok(())
        } else {
            Err(IntentError::UnknownOffer)
        }
    }

    pub fn toggle_offer_input(&mut self) {
        self.offer.toggle_input();
    }

    pub fn broadcast(&mut self, handle: TxHandle) {
        self.property.broadcast(handle);
    }

    pub fn confirmed(&mut self, handle: TxHandle, now: Instant) -> Vec<Effect> {
        let action = match self.property.pending() {
            Some(action) => action.clone(),
            None => return Vec::new(),
        };
        let kind = action.kind();
        let mut effects = self.property.confirm(handle, self.timings.settle_delay);
        if effects.is_empty() {
            debug!("property {}: ignoring confirmation {}", self.property_id, handle);
            return effects;
        }
        // the settled offer is inactive on chain even if the next read fails
        if let Some(index) = action.offer_index() {
            let settled = usize::try_from(index)
                .ok()
                .and_then(|i| self.offers.get_mut(i));
            if let Some(offer) = settled {
                offer.active = false;
            }
        }
        self.offer.confirmed(kind, now, self.timings.offer_grace);
        if kind == ActionKind::Offer {
            effects.push(Effect::RecheckOfferAfter(self.timings.offer_grace));
        }
        effects.push(self.show(MessageKind::Notice, CONFIRMED_NOTICE.to_string()));
        effects
    }

    /// `message` is already classified.
    pub fn failed(&mut self, message: String) -> Vec<Effect> {
        if let Some(action) = self.property.fail() {
            info!("property {}: {:?} failed: {}", self.property_id, action.kind(), message);
            self.offer.failed(action.kind());
        }
        vec![self.show(MessageKind::Error, message)]
    }

    pub fn settle_elapsed(&mut self, handle: TxHandle) -> Vec<Effect> {
        self.property.settle(handle)
    }

    pub fn observe_property(&mut self, property: &Property, now: Instant) {
        if property.id != self.property_id {
            return;
        }
        self.property.observe(property.snapshot());
        self.location = property.location.clone();
        self.location_hash = property.location_hash.clone();
        self.indexed_offers = property.offers.clone();
        if self.offers_in_sync() == Some(false) {
            debug!(
                "property {}: indexer reports {} active offers, contract {}",
                self.property_id,
                active_count(&self.indexed_offers),
                active_count(&self.offers)
            );
        }
        self.reconcile_offer(now);
    }

    pub fn observe_offers(&mut self, offers: Vec<Offer>, now: Instant) {
        self.offers = offers;
        self.offers_fresh = true;
        self.read_error = None;
        self.reconcile_offer(now);
    }

    pub fn read_failed(&mut self, error: String) {
        self.read_error = Some(error);
    }

    /// The contract offer read failed; counts fall back to the indexer.
    pub fn offers_read_failed(&mut self, error: String) {
        self.offers_fresh = false;
        self.read_error = Some(error);
    }

    /// Whether the indexer's active offers match the contract's, compared as
    /// (buyer, amount) pairs. `None` until a contract read has succeeded.
    pub fn offers_in_sync(&self) -> Option<bool> {
        if !self.offers_fresh {
            return None;
        }
        Some(offer_keys(&self.indexed_offers) == offer_keys(&self.offers))
    }

    pub fn recheck_offer(&mut self, now: Instant) {
        self.reconcile_offer(now);
    }

    pub fn message_expired(&mut self, id: u64) {
        if self.message.as_ref().is_some_and(|m| m.id == id) {
            self.message = None;
        }
    }

    fn reconcile_offer(&mut self, now: Instant) {
        let read = self.read_own_offer().map(|o| o.offer.amount);
        let pending = self.property.pending().is_some_and(Action::touches_offer);
        self.offer.reconcile(read, pending, now);
    }

    fn show(&mut self, kind: MessageKind, text: String) -> Effect {
        self.next_message_id += 1;
        let id = self.next_message_id;
        self.message = Some(Message { id, kind, text });
        Effect::ClearMessageAfter {
            id,
            delay: self.timings.message_display,
        }
    }

    pub fn view(&self) -> CardView {
        let shown = self.property.view();
        let is_owner = self.is_owner();
        let active = active_offers(&self.offers);
        let read = self.read_own_offer().map(|o| o.offer.amount);
        CardView {
            property_id: self.property_id,
            owner: shown.owner,
            for_sale: shown.for_sale,
            price: shown.price,
            location: self.location.clone(),
            location_hash: self.location_hash.clone(),
            pending: self.property.pending().map(Action::kind),
            settling: matches!(self.property.phase(), super::Phase::Settling { .. }),
            is_owner,
            own_offer: self.offer.displayed(read),
            offer_input_open: self.offer.input_open(),
            active_offer_count: if self.offers_fresh {
                active.len()
            } else {
                active_count(&self.indexed_offers)
            },
            received_offers: if is_owner { active } else { Vec::new() },
            message: self.message.clone(),
            read_error: self.read_error.clone(),
        }
    }
}

fn active_count(offers: &[Offer]) -> usize {
    offers.iter().filter(|o| o.active).count()
}

fn offer_keys(offers: &[Offer]) -> Vec<(Address, U256)> {
    let mut keys: Vec<_> = offers
        .iter()
        .filter(|o| o.active)
        .map(|o| (o.buyer, o.amount))
        .collect();
    keys.sort();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, B256};
    use std::time::Duration;

    const A: Address = address!("00000000000000000000000000000000000000aa");
    const B: Address = address!("00000000000000000000000000000000000000bb");

    fn listed(owner: Address, for_sale: bool) -> Property {
        Property {
            id: 7,
            owner,
            price: U256::from(1000),
            for_sale,
            location: "Botafogo".into(),
            location_hash: "QmHash".into(),
            listed_at: 1,
            offers: Vec::new(),
        }
    }

    fn tx(n: u8) -> TxHandle {
        TxHandle(B256::with_last_byte(n))
    }

    fn offer(buyer: Address, amount: u64, active: bool) -> Offer {
        Offer {
            buyer,
            amount: U256::from(amount),
            active,
        }
    }

    #[test]
    fn buy_guards() {
        let now = Instant::now();
        let mut anonymous = Card::new(&listed(A, true), None, Timings::default());
        assert_eq!(anonymous.intent(Intent::Buy, now), Err(IntentError::NotConnected));

        let mut owner = Card::new(&listed(A, true), Some(A), Timings::default());
        assert_eq!(owner.intent(Intent::Buy, now), Err(IntentError::AlreadyOwner));

        let mut buyer = Card::new(&listed(A, true), Some(B), Timings::default());
        let submission = buyer.intent(Intent::Buy, now).unwrap();
        assert_eq!(
            submission.call,
            ContractCall::BuyProperty {
                property_id: 7,
                price: U256::from(1000)
            }
        );
        assert_eq!(buyer.intent(Intent::Buy, now), Err(IntentError::Busy));

        let view = buyer.view();
        assert_eq!(view.pending, Some(ActionKind::Buy));
        assert!(!view.for_sale);
        assert!(view.is_owner);
    }

    #[test]
    fn confirmation_shows_notice_once() {
        let now = Instant::now();
        let mut card = Card::new(&listed(A, true), Some(A), Timings::default());
        card.intent(Intent::Delist, now).unwrap();
        card.broadcast(tx(1));

        let effects = card.confirmed(tx(1), now);
        assert!(effects.contains(&Effect::Refresh));
        assert!(matches!(effects.last(), Some(Effect::ClearMessageAfter { id: 1, .. })));
        assert_eq!(card.view().message.unwrap().text, CONFIRMED_NOTICE);

        assert!(card.confirmed(tx(1), now).is_empty());
        card.message_expired(1);
        assert!(card.view().message.is_none());
    }

    #[test]
    fn failed_offer_clears_and_reopens() {
        let now = Instant::now();
        let mut card = Card::new(&listed(A, true), Some(B), Timings::default());
        assert_eq!(
            card.intent(Intent::MakeOffer { amount: U256::ZERO }, now),
            Err(IntentError::InvalidOfferAmount)
        );

        let submission = card
            .intent(
                Intent::MakeOffer {
                    amount: U256::from(400),
                },
                now,
            )
            .unwrap();
        assert_eq!(
            submission.effects,
            vec![Effect::RecheckOfferAfter(Duration::from_secs(15))]
        );
        assert_eq!(card.view().own_offer, Some(U256::from(400)));

        card.failed("Transação rejeitada pelo usuário".into());
        let view = card.view();
        assert_eq!(view.pending, None);
        assert_eq!(view.own_offer, None);
        assert!(view.offer_input_open);
        assert_eq!(view.message.unwrap().kind, MessageKind::Error);
    }

    #[test]
    fn withdraw_uses_the_full_array_index() {
        let now = Instant::now();
        let mut card = Card::new(&listed(A, true), Some(B), Timings::default());
        assert_eq!(card.intent(Intent::WithdrawOffer, now), Err(IntentError::NoOwnOffer));

        card.observe_offers(
            vec![offer(A, 1, false), offer(A, 2, true), offer(B, 3, true)],
            now,
        );
        let submission = card.intent(Intent::WithdrawOffer, now).unwrap();
        assert_eq!(
            submission.call,
            ContractCall::WithdrawOffer {
                property_id: 7,
                offer_index: 2
            }
        );
    }

    #[test]
    fn owner_sees_received_offers_and_can_accept() {
        let now = Instant::now();
        let mut card = Card::new(&listed(A, true), Some(A), Timings::default());
        card.observe_offers(vec![offer(B, 5, false), offer(B, 9, true)], now);

        let view = card.view();
        assert_eq!(view.active_offer_count, 1);
        assert_eq!(view.received_offers[0].index, 1);

        assert_eq!(
            card.intent(Intent::AcceptOffer { offer_index: 0 }, now),
            Err(IntentError::UnknownOffer)
        );
        card.intent(Intent::AcceptOffer { offer_index: 1 }, now).unwrap();
        assert!(!card.view().for_sale);
    }

    #[test]
    fn offer_grace_expires_on_recheck() {
        let now = Instant::now();
        let mut card = Card::new(&listed(A, true), Some(B), Timings::default());
        card.intent(
            Intent::MakeOffer {
                amount: U256::from(400),
            },
            now,
        )
        .unwrap();
        card.broadcast(tx(1));
        card.confirmed(tx(1), now);
        card.settle_elapsed(tx(1));

        card.recheck_offer(now + Duration::from_secs(14));
        assert_eq!(card.view().own_offer, Some(U256::from(400)));
        card.recheck_offer(now + Duration::from_secs(15));
        assert_eq!(card.view().own_offer, None);
    }

    #[test]
    fn confirmed_withdraw_hides_the_offer_without_a_refresh() {
        let now = Instant::now();
        let mut card = Card::new(&listed(A, true), Some(B), Timings::default());
        card.observe_offers(vec![offer(A, 2, true), offer(B, 3, true)], now);
        card.intent(Intent::WithdrawOffer, now).unwrap();
        card.broadcast(tx(1));
        card.confirmed(tx(1), now);
        // the follow-up refresh fails
        card.offers_read_failed("contract read failed".into());

        let view = card.view();
        assert_eq!(view.own_offer, None);
        assert_eq!(view.read_error.as_deref(), Some("contract read failed"));
        assert_eq!(card.intent(Intent::WithdrawOffer, now), Err(IntentError::Busy));
        card.settle_elapsed(tx(1));
        assert_eq!(card.intent(Intent::WithdrawOffer, now), Err(IntentError::NoOwnOffer));
    }

    #[test]
    fn indexed_offers_are_checked_against_the_contract() {
        let now = Instant::now();
        let mut indexed = listed(A, true);
        indexed.offers = vec![offer(B, 9, true)];
        let mut card = Card::new(&indexed, Some(A), Timings::default());
        assert_eq!(card.offers_in_sync(), None);

        card.observe_offers(vec![offer(B, 5, false), offer(B, 9, true)], now);
        assert_eq!(card.offers_in_sync(), Some(true));

        // indexer has not seen a newer offer yet
        card.observe_offers(
            vec![offer(B, 5, false), offer(B, 9, true), offer(A, 4, true)],
            now,
        );
        assert_eq!(card.offers_in_sync(), Some(false));
        assert_eq!(card.view().active_offer_count, 2);
    }

    #[test]
    fn offer_count_falls_back_to_the_indexer() {
        let now = Instant::now();
        let mut indexed = listed(A, true);
        indexed.offers = vec![offer(B, 9, true), offer(A, 4, true)];
        let mut card = Card::new(&indexed, Some(A), Timings::default());
        assert_eq!(card.view().active_offer_count, 2);

        card.observe_offers(vec![offer(B, 9, true)], now);
        assert_eq!(card.view().active_offer_count, 1);

        card.offers_read_failed("rpc down".into());
        let view = card.view();
        assert_eq!(view.active_offer_count, 2);
        // accept/refund still need contract indices
        assert_eq!(view.received_offers.len(), 1);
        assert_eq!(card.offers_in_sync(), None);
    }
}
