//! Optimistic reconciliation for one property card.
//!
//! The machines here are synchronous and clock-free: callers pass `now` in
//! and receive [`Effect`]s describing refreshes and timers to schedule. The
//! async [`session`](crate::session) owns the timers.

mod card;
mod offer;
mod property;

pub use card::{Card, CardView, Intent, Message, MessageKind, Submission};
pub use offer::OfferReconciler;
pub use property::{Phase, PropertyReconciler};

use alloy::primitives::{Address, U256};
use std::time::Duration;
use thiserror::Error;

use crate::model::Snapshot;
use crate::submitter::TxHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Wait after confirmation before trusting the read model again.
    pub settle_delay: Duration,
    pub message_display: Duration,
    /// How long an unconfirmed own offer is shown without read-model backing.
    pub offer_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            message_display: Duration::from_secs(5),
            offer_grace: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Buy,
    Relist,
    Delist,
    Offer,
    Accept,
    Withdraw,
    Refund,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Buy { buyer: Address },
    Relist { new_price: U256 },
    Delist,
    Offer { amount: U256 },
    Accept { offer_index: u64 },
    Withdraw { offer_index: u64 },
    Refund { offer_index: u64 },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Buy { .. } => ActionKind::Buy,
            Action::Relist { .. } => ActionKind::Relist,
            Action::Delist => ActionKind::Delist,
            Action::Offer { .. } => ActionKind::Offer,
            Action::Accept { .. } => ActionKind::Accept,
            Action::Withdraw { .. } => ActionKind::Withdraw,
            Action::Refund { .. } => ActionKind::Refund,
        }
    }

    /// Predicted property fields once this action lands.
    pub fn overlay(&self) -> Overlay {
        match self {
            Action::Buy { buyer } => Overlay {
                owner: Some(*buyer),
                for_sale: Some(false),
                price: None,
            },
            Action::Relist { new_price } => Overlay {
                owner: None,
                for_sale: Some(true),
                price: Some(*new_price),
            },
            Action::Delist | Action::Accept { .. } => Overlay {
                for_sale: Some(false),
                ..Overlay::default()
            },
            Action::Offer { .. } | Action::Withdraw { .. } | Action::Refund { .. } => {
                Overlay::default()
            }
        }
    }

    /// Contract index of the offer this action deactivates.
    pub fn offer_index(&self) -> Option<u64> {
        match self {
            Action::Accept { offer_index }
            | Action::Withdraw { offer_index }
            | Action::Refund { offer_index } => Some(*offer_index),
            _ => None,
        }
    }

    pub fn touches_offer(&self) -> bool {
        matches!(
            self,
            Action::Offer { .. } | Action::Withdraw { .. } | Action::Refund { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overlay {
    pub owner: Option<Address>,
    pub for_sale: Option<bool>,
    pub price: Option<U256>,
}

impl Overlay {
    pub fn apply(&self, base: Snapshot) -> Snapshot {
        Snapshot {
            owner: self.owner.unwrap_or(base.owner),
            for_sale: self.for_sale.unwrap_or(base.for_sale),
            price: self.price.unwrap_or(base.price),
        }
    }
}

/// Work the driver performs on behalf of a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Refetch the read model now.
    Refresh,
    /// Deliver a settle for `handle` after `delay`.
    SettleAfter { handle: TxHandle, delay: Duration },
    /// Run offer reconciliation again after `delay`.
    RecheckOfferAfter(Duration),
    ClearMessageAfter { id: u64, delay: Duration },
}

/// Rejected before anything is sent to the wallet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntentError {
    #[error("Por favor, conecte sua carteira primeiro")]
    NotConnected,
    #[error("Você já é o dono deste imóvel!")]
    AlreadyOwner,
    #[error("Você não é o dono desta propriedade")]
    NotOwner,
    #[error("Propriedade não está à venda")]
    NotForSale,
    #[error("Propriedade já está à venda")]
    AlreadyForSale,
    #[error("Digite um valor válido para a oferta")]
    InvalidOfferAmount,
    #[error("Digite um preço válido")]
    InvalidPrice,
    #[error("Você já possui uma oferta ativa neste imóvel")]
    OfferExists,
    #[error("Você não possui oferta ativa neste imóvel")]
    NoOwnOffer,
    #[error("Índice de oferta inválido")]
    UnknownOffer,
    #[error("Aguarde a transação em andamento")]
    Busy,
    #[error("Sessão encerrada")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const A: Address = address!("00000000000000000000000000000000000000aa");
    const B: Address = address!("00000000000000000000000000000000000000bb");

    fn base() -> Snapshot {
        Snapshot {
            owner: A,
            for_sale: true,
            price: U256::from(1000),
        }
    }

    #[test]
    fn overlays_per_action() {
        let bought = Action::Buy { buyer: B }.overlay().apply(base());
        assert_eq!(bought.owner, B);
        assert!(!bought.for_sale);
        assert_eq!(bought.price, U256::from(1000));

        let delisted = base();
        let relisted = Action::Relist {
            new_price: U256::from(2000),
        }
        .overlay()
        .apply(Snapshot {
            for_sale: false,
            ..delisted
        });
        assert!(relisted.for_sale);
        assert_eq!(relisted.price, U256::from(2000));

        assert!(!Action::Delist.overlay().apply(base()).for_sale);
        assert!(!Action::Accept { offer_index: 0 }.overlay().apply(base()).for_sale);
        assert_eq!(
            Action::Offer {
                amount: U256::from(1)
            }
            .overlay()
            .apply(base()),
            base()
        );
    }
}
