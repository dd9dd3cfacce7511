use log::debug;
use std::time::Duration;

use super::{Action, Effect, IntentError};
use crate::model::Snapshot;
use crate::submitter::TxHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Submitted; the overlay is applied on `base`, the snapshot current at
    /// submission. `handle` is set once the wallet broadcasts.
    Pending {
        action: Action,
        base: Snapshot,
        handle: Option<TxHandle>,
    },
    /// Confirmed; the overlay still wins until the settle timer for
    /// `handle` fires.
    Settling {
        action: Action,
        base: Snapshot,
        handle: TxHandle,
    },
}

/// Property fields shown for one card: the read model while idle, the
/// pending action's overlay otherwise.
#[derive(Debug, Clone)]
pub struct PropertyReconciler {
    latest: Snapshot,
    phase: Phase,
}

impl PropertyReconciler {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            latest: snapshot,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    pub fn pending(&self) -> Option<&Action> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Pending { action, .. } | Phase::Settling { action, .. } => Some(action),
        }
    }

    /// Records the latest read-model snapshot. It only becomes visible once
    /// the machine is idle again.
    pub fn observe(&mut self, snapshot: Snapshot) {
        if !self.is_idle() && snapshot != self.latest {
            debug!("holding overlay over read model update {:?}", snapshot);
        }
        self.latest = snapshot;
    }

    pub fn submit(&mut self, action: Action) -> Result<(), IntentError> {
        if !self.is_idle() {
            return Err(IntentError::Busy);
        }
        self.phase = Phase::Pending {
            action,
            base: self.latest,
            handle: None,
        };
        Ok(())
    }

    pub fn broadcast(&mut self, tx: TxHandle) {
        if let Phase::Pending { handle, .. } = &mut self.phase {
            if handle.is_none() {
                *handle = Some(tx);
            }
        }
    }

    /// Moves a pending action into its settle window. Only the first
    /// confirmation for the pending handle yields effects; repeats and
    /// confirmations for other handles are ignored.
    pub fn confirm(&mut self, tx: TxHandle, settle_delay: Duration) -> Vec<Effect> {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        match phase {
            Phase::Pending {
                action,
                base,
                handle,
            } if handle.map_or(true, |h| h == tx) => {
                self.phase = Phase::Settling {
                    action,
                    base,
                    handle: tx,
                };
                vec![
                    Effect::Refresh,
                    Effect::SettleAfter {
                        handle: tx,
                        delay: settle_delay,
                    },
                ]
            }
            other => {
                self.phase = other;
                Vec::new()
            }
        }
    }

    /// Ends the settle window for `tx`, whether or not the read model caught up.
    pub fn settle(&mut self, tx: TxHandle) -> Vec<Effect> {
        match &self.phase {
            Phase::Settling { handle, .. } if *handle == tx => {
                self.phase = Phase::Idle;
                vec![Effect::Refresh]
            }
            _ => Vec::new(),
        }
    }

    /// Drops the overlay. Returns the abandoned action, if any.
    pub fn fail(&mut self) -> Option<Action> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => None,
            Phase::Pending { action, .. } | Phase::Settling { action, .. } => Some(action),
        }
    }

    pub fn view(&self) -> Snapshot {
        match &self.phase {
            Phase::Idle => self.latest,
            Phase::Pending { action, base, .. } | Phase::Settling { action, base, .. } => {
                action.overlay().apply(*base)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Address, B256, U256};

    const A: Address = address!("00000000000000000000000000000000000000aa");
    const B: Address = address!("00000000000000000000000000000000000000bb");
    const SETTLE: Duration = Duration::from_secs(2);

    fn for_sale() -> Snapshot {
        Snapshot {
            owner: A,
            for_sale: true,
            price: U256::from(1000),
        }
    }

    fn tx(n: u8) -> TxHandle {
        TxHandle(B256::with_last_byte(n))
    }

    #[test]
    fn stale_reads_do_not_revert_a_sale() {
        let mut machine = PropertyReconciler::new(for_sale());
        machine.submit(Action::Buy { buyer: B }).unwrap();
        assert_eq!(machine.view().owner, B);

        machine.broadcast(tx(1));
        let effects = machine.confirm(tx(1), SETTLE);
        assert_eq!(
            effects,
            vec![
                Effect::Refresh,
                Effect::SettleAfter {
                    handle: tx(1),
                    delay: SETTLE
                }
            ]
        );

        machine.observe(for_sale());
        assert!(!machine.view().for_sale);
        assert_eq!(machine.view().owner, B);

        assert_eq!(machine.settle(tx(1)), vec![Effect::Refresh]);
        assert!(machine.is_idle());
        // read model never caught up; that gap is shown as is
        assert!(machine.view().for_sale);
    }

    #[test]
    fn repeated_confirmation_is_ignored() {
        let mut machine = PropertyReconciler::new(for_sale());
        machine.submit(Action::Delist).unwrap();
        machine.broadcast(tx(1));
        assert_eq!(machine.confirm(tx(1), SETTLE).len(), 2);
        assert!(machine.confirm(tx(1), SETTLE).is_empty());
        assert!(machine.confirm(tx(2), SETTLE).is_empty());
        assert!(matches!(machine.phase(), Phase::Settling { .. }));
    }

    #[test]
    fn confirmation_for_another_handle_is_ignored() {
        let mut machine = PropertyReconciler::new(for_sale());
        machine.submit(Action::Delist).unwrap();
        machine.broadcast(tx(1));
        assert!(machine.confirm(tx(9), SETTLE).is_empty());
        assert!(matches!(machine.phase(), Phase::Pending { .. }));
    }

    #[test]
    fn settle_for_old_handle_keeps_new_action() {
        let mut machine = PropertyReconciler::new(for_sale());
        machine.submit(Action::Delist).unwrap();
        machine.confirm(tx(1), SETTLE);
        machine.settle(tx(1));

        machine.submit(Action::Relist {
            new_price: U256::from(5),
        })
        .unwrap();
        machine.confirm(tx(2), SETTLE);
        assert!(machine.settle(tx(1)).is_empty());
        assert!(!machine.is_idle());
    }

    #[test]
    fn failure_discards_overlay() {
        let mut machine = PropertyReconciler::new(for_sale());
        machine.submit(Action::Buy { buyer: B }).unwrap();
        assert_eq!(machine.submit(Action::Delist), Err(IntentError::Busy));
        assert_eq!(machine.fail(), Some(Action::Buy { buyer: B }));
        assert_eq!(machine.view(), for_sale());
        assert_eq!(machine.fail(), None);
    }

    #[test]
    fn overlay_sits_on_the_submission_snapshot() {
        let mut machine = PropertyReconciler::new(for_sale());
        machine.submit(Action::Buy { buyer: B }).unwrap();
        machine.observe(Snapshot {
            price: U256::from(1),
            ..for_sale()
        });
        assert_eq!(machine.view().price, U256::from(1000));
        machine.fail();
        assert_eq!(machine.view().price, U256::from(1));
    }
}
