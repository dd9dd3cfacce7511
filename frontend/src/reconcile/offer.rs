use alloy::primitives::U256;
use log::debug;
use std::time::Duration;
use tokio::time::Instant;

use super::ActionKind;

/// The viewer's own offer on one property, shown ahead of the read model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferReconciler {
    local_amount: Option<U256>,
    grace_until: Option<Instant>,
    input_open: bool,
}

impl OfferReconciler {
    pub fn local_amount(&self) -> Option<U256> {
        self.local_amount
    }

    pub fn grace_until(&self) -> Option<Instant> {
        self.grace_until
    }

    pub fn input_open(&self) -> bool {
        self.input_open
    }

    pub fn toggle_input(&mut self) {
        self.input_open = !self.input_open;
    }

    pub fn begin(&mut self, amount: U256, now: Instant, grace: Duration) {
        self.local_amount = Some(amount);
        self.grace_until = Some(now + grace);
        self.input_open = false;
    }

    pub fn confirmed(&mut self, kind: ActionKind, now: Instant, grace: Duration) {
        match kind {
            // the read model may still be behind: restart the window
            ActionKind::Offer if self.local_amount.is_some() => {
                self.grace_until = Some(now + grace);
            }
            ActionKind::Withdraw | ActionKind::Refund => self.clear(),
            _ => {}
        }
    }

    /// A failed offer leaves nothing behind and reopens the input.
    pub fn failed(&mut self, kind: ActionKind) {
        if kind == ActionKind::Offer {
            self.clear();
            self.input_open = true;
        }
    }

    /// Background pass against the viewer's active offer as read from the
    /// contract. Returns whether the local amount was dropped.
    pub fn reconcile(
        &mut self,
        read_own: Option<U256>,
        offer_pending: bool,
        now: Instant,
    ) -> bool {
        if self.local_amount.is_none() {
            return false;
        }
        if read_own.is_some() {
            debug!("read model reports own offer, dropping local amount");
            self.clear();
            return true;
        }
        if offer_pending {
            return false;
        }
        match self.grace_until {
            Some(until) if now < until => false,
            _ => {
                debug!("offer grace expired without a matching read");
                self.clear();
                true
            }
        }
    }

    /// Amount to display: the read model's once it has one, otherwise ours.
    pub fn displayed(&self, read_own: Option<U256>) -> Option<U256> {
        read_own.or(self.local_amount)
    }

    fn clear(&mut self) {
        self.local_amount = None;
        self.grace_until = None;
    }
}
