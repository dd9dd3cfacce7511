//! Async driver for one property card.
//!
//! A [`PropertyCard`] runs its [`Card`] machine on a dedicated task. Timers,
//! read-model fetches and the transaction watcher are child tasks held in a
//! [`TaskScope`]; dropping the card aborts the driver, which aborts them all.

use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::model::{Offer, Property};
use crate::read_model::ReadModel;
use crate::reconcile::{Card, CardView, Effect, Intent, IntentError, Timings};
use crate::submitter::{ContractCall, TransactionSubmitter, TxHandle, TxStatus};

#[derive(Debug)]
enum CardEvent {
    Intent(Intent, oneshot::Sender<Result<(), IntentError>>),
    ToggleOfferInput,
    Refresh,
    Property(Property),
    Offers(Vec<Offer>),
    ReadFailed(String),
    OffersFailed(String),
    Broadcast(TxHandle),
    Confirmed(TxHandle),
    Failed(String),
    SettleElapsed(TxHandle),
    RecheckOffer,
    MessageExpired(u64),
}

/// Child tasks that live exactly as long as their owner.
#[derive(Default)]
pub struct TaskScope {
    tasks: Vec<JoinHandle<()>>,
}

impl TaskScope {
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(tokio::spawn(future));
    }

    pub fn len(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct PropertyCard {
    events: mpsc::UnboundedSender<CardEvent>,
    view: watch::Receiver<CardView>,
    tx_status: watch::Receiver<TxStatus>,
    driver: JoinHandle<()>,
}

impl PropertyCard {
    /// Starts the card and fetches offers for it right away.
    pub fn spawn(
        property: Property,
        read_model: Arc<dyn ReadModel>,
        submitter: Arc<TransactionSubmitter>,
        timings: Timings,
    ) -> Self {
        let card = Card::new(&property, submitter.viewer(), timings);
        let (view_tx, view) = watch::channel(card.view());
        let (events, inbox) = mpsc::unbounded_channel();
        let tx_status = submitter.subscribe();

        let driver = Driver {
            card,
            read_model,
            submitter,
            events: events.clone(),
            view: view_tx,
            scope: TaskScope::default(),
        };
        let driver = tokio::spawn(driver.run(inbox));

        Self {
            events,
            view,
            tx_status,
            driver,
        }
    }

    /// Validates and submits `intent`. Returns once the intent is accepted;
    /// progress shows up in [`PropertyCard::subscribe`].
    pub async fn dispatch(&self, intent: Intent) -> Result<(), IntentError> {
        let (reply, accepted) = oneshot::channel();
        self.events
            .send(CardEvent::Intent(intent, reply))
            .map_err(|_| IntentError::Closed)?;
        accepted.await.map_err(|_| IntentError::Closed)?
    }

    pub fn toggle_offer_input(&self) {
        let _ = self.events.send(CardEvent::ToggleOfferInput);
    }

    /// Feeds a property from an outside poll of the read model.
    pub fn observe(&self, property: Property) {
        let _ = self.events.send(CardEvent::Property(property));
    }

    pub fn refresh(&self) {
        let _ = self.events.send(CardEvent::Refresh);
    }

    pub fn view(&self) -> CardView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CardView> {
        self.view.clone()
    }

    pub fn tx_status(&self) -> watch::Receiver<TxStatus> {
        self.tx_status.clone()
    }
}

impl Drop for PropertyCard {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

struct Driver {
    card: Card,
    read_model: Arc<dyn ReadModel>,
    submitter: Arc<TransactionSubmitter>,
    events: mpsc::UnboundedSender<CardEvent>,
    view: watch::Sender<CardView>,
    scope: TaskScope,
}

impl Driver {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<CardEvent>) {
        self.fetch();
        while let Some(event) = inbox.recv().await {
            let effects = self.handle(event);
            self.apply(effects);
            let next = self.card.view();
            self.view.send_if_modified(|current| {
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            });
        }
    }

    fn handle(&mut self, event: CardEvent) -> Vec<Effect> {
        let now = Instant::now();
        match event {
            CardEvent::Intent(intent, reply) => match self.card.intent(intent, now) {
                Ok(submission) => {
                    self.submit(submission.call);
                    let _ = reply.send(Ok(()));
                    submission.effects
                }
                Err(e) => {
                    debug!("property {}: intent rejected: {}", self.card.property_id(), e);
                    let _ = reply.send(Err(e));
                    Vec::new()
                }
            },
            CardEvent::ToggleOfferInput => {
                self.card.toggle_offer_input();
                Vec::new()
            }
            CardEvent::Refresh => vec![Effect::Refresh],
            CardEvent::Property(property) => {
                self.card.observe_property(&property, now);
                Vec::new()
            }
            CardEvent::Offers(offers) => {
                self.card.observe_offers(offers, now);
                Vec::new()
            }
            CardEvent::ReadFailed(error) => {
                self.card.read_failed(error);
                Vec::new()
            }
            CardEvent::OffersFailed(error) => {
                self.card.offers_read_failed(error);
                Vec::new()
            }
            CardEvent::Broadcast(handle) => {
                self.card.broadcast(handle);
                Vec::new()
            }
            CardEvent::Confirmed(handle) => self.card.confirmed(handle, now),
            CardEvent::Failed(message) => self.card.failed(message),
            CardEvent::SettleElapsed(handle) => self.card.settle_elapsed(handle),
            CardEvent::RecheckOffer => {
                self.card.recheck_offer(now);
                Vec::new()
            }
            CardEvent::MessageExpired(id) => {
                self.card.message_expired(id);
                Vec::new()
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Refresh => self.fetch(),
                Effect::SettleAfter { handle, delay } => {
                    self.after(delay, CardEvent::SettleElapsed(handle))
                }
                Effect::RecheckOfferAfter(delay) => self.after(delay, CardEvent::RecheckOffer),
                Effect::ClearMessageAfter { id, delay } => {
                    self.after(delay, CardEvent::MessageExpired(id))
                }
            }
        }
    }

    fn after(&mut self, delay: Duration, event: CardEvent) {
        let events = self.events.clone();
        self.scope.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
    }

    /// Refetches both sources. Fetches may overlap; the last one to land wins.
    fn fetch(&mut self) {
        let id = self.card.property_id();

        let read_model = self.read_model.clone();
        let events = self.events.clone();
        self.scope.spawn(async move {
            match read_model.list_properties().await {
                Ok(properties) => {
                    if let Some(property) = properties.into_iter().find(|p| p.id == id) {
                        let _ = events.send(CardEvent::Property(property));
                    }
                }
                Err(e) => {
                    warn!("property {}: listing refresh failed: {}", id, e);
                    let _ = events.send(CardEvent::ReadFailed(e.to_string()));
                }
            }
        });

        let read_model = self.read_model.clone();
        let events = self.events.clone();
        self.scope.spawn(async move {
            let event = match read_model.list_offers(id).await {
                Ok(offers) => CardEvent::Offers(offers),
                Err(e) => {
                    warn!("property {}: offer refresh failed: {}", id, e);
                    CardEvent::OffersFailed(e.to_string())
                }
            };
            let _ = events.send(event);
        });
    }

    fn submit(&mut self, call: ContractCall) {
        let submitter = self.submitter.clone();
        let events = self.events.clone();
        self.scope.spawn(async move {
            let broadcast = events.clone();
            let outcome = submitter
                .execute(&call, move |handle| {
                    let _ = broadcast.send(CardEvent::Broadcast(handle));
                })
                .await;
            let event = match outcome {
                Ok(handle) => CardEvent::Confirmed(handle),
                Err(e) => CardEvent::Failed(e.classify().message),
            };
            let _ = events.send(event);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn scope_aborts_children_on_drop() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let mut scope = TaskScope::default();
        scope.spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = tx.send(());
        });
        assert_eq!(scope.len(), 1);
        drop(scope);

        // the sender went away with the aborted task
        assert!(rx.recv().await.is_none());
    }
}
