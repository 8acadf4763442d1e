//! Tokio runner for the provisioner state machine.
//!
//! One task owns the [`ProvisionerState`] and processes inputs strictly one
//! at a time. Bus subscriptions, timers and handle-store calls run as
//! separate tasks that only ever feed inputs back into that loop.

use crate::bus::{BusError, Envelope, MessageBus, Subscription, SubscriptionId};
use crate::store::HandleStore;
use crate::ProvisionerHandle;
use fleet_core::{
    Action, CorrelationId, Event, Operation, OperationResult, RequestId, StateMachine, TimerId,
};
use fleet_messages::{
    CheckOrphanResponse, HandlesQuery, NodeAnnouncement, Subject, UpdateServiceHandle,
};
use fleet_provisioner::{
    NodeScorer, OrphanBindings, OrphanInstances, ProvisionerConfig, ProvisionerState,
    ProvisionerStatus,
};
use fleet_types::NodeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors that stop the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Per-node purge outcomes, streamed while a purge is in flight.
pub(crate) type PurgeSender = mpsc::UnboundedSender<(NodeId, OperationResult)>;

/// Inputs to the runner loop.
pub(crate) enum Input {
    Event(Event),
    Timer {
        id: TimerId,
        generation: u64,
    },
    Submit {
        op: Operation,
        reply: oneshot::Sender<OperationResult>,
        purge: Option<PurgeSender>,
    },
    Status(oneshot::Sender<ProvisionerStatus>),
    OrphanSnapshot(oneshot::Sender<(OrphanInstances, OrphanBindings)>),
    Shutdown,
}

struct Inbox {
    subscription: SubscriptionId,
    forwarder: JoinHandle<()>,
}

/// Production runner wiring a [`ProvisionerState`] to a [`MessageBus`] and
/// a [`HandleStore`].
pub struct ProductionRunner {
    state: ProvisionerState,
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn HandleStore>,
    tx: mpsc::UnboundedSender<Input>,
    rx: mpsc::UnboundedReceiver<Input>,
    started: Instant,

    /// Armed timers; a firing only counts if its generation still matches.
    timers: HashMap<TimerId, (u64, JoinHandle<()>)>,
    timer_generation: u64,
    inboxes: HashMap<CorrelationId, Inbox>,
    subscriptions: Vec<(SubscriptionId, JoinHandle<()>)>,

    clients: HashMap<RequestId, oneshot::Sender<OperationResult>>,
    purge_streams: HashMap<RequestId, PurgeSender>,
    next_request: u64,
}

impl ProductionRunner {
    pub fn new(
        config: ProvisionerConfig,
        scorer: Arc<dyn NodeScorer>,
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn HandleStore>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: ProvisionerState::new(config, scorer),
            bus,
            store,
            tx,
            rx,
            started: Instant::now(),
            timers: HashMap::new(),
            timer_generation: 0,
            inboxes: HashMap::new(),
            subscriptions: Vec::new(),
            clients: HashMap::new(),
            purge_streams: HashMap::new(),
            next_request: 0,
        }
    }

    /// A client handle; valid for as long as the runner loop runs.
    pub fn handle(&self) -> ProvisionerHandle {
        ProvisionerHandle::new(self.tx.clone())
    }

    /// Subscribe to the node-originated subjects, connect, and spawn the
    /// runner loop.
    ///
    /// Subscriptions are in place when this returns, so nodes may announce
    /// immediately.
    pub async fn spawn(mut self) -> Result<(ProvisionerHandle, JoinHandle<()>), RunnerError> {
        let service = self.state.service_name().to_string();

        let announce = self
            .bus
            .subscribe(Subject::broadcast::<NodeAnnouncement>(&service).as_str())
            .await?;
        self.forward(announce, |env| {
            Some(Event::NodeAnnounceReceived {
                payload: env.payload,
            })
        });

        let orphan_results = self
            .bus
            .subscribe(Subject::broadcast::<CheckOrphanResponse>(&service).as_str())
            .await?;
        self.forward(orphan_results, |env| {
            Some(Event::OrphanResultReceived {
                payload: env.payload,
            })
        });

        let handles = self
            .bus
            .subscribe(Subject::broadcast::<HandlesQuery>(&service).as_str())
            .await?;
        self.forward(handles, |env| {
            let reply_to = Subject::raw(env.reply_to?);
            Some(Event::HandlesQueryReceived {
                payload: env.payload,
                reply_to,
            })
        });

        let updates = self
            .bus
            .subscribe(Subject::broadcast::<UpdateServiceHandle>(&service).as_str())
            .await?;
        self.forward(updates, |env| {
            let reply_to = Subject::raw(env.reply_to?);
            Some(Event::UpdateServiceHandleReceived {
                payload: env.payload,
                reply_to,
            })
        });

        info!(service = %service, "Provisioner connected to bus");
        self.dispatch(Event::Connected).await;

        let handle = self.handle();
        let task = tokio::spawn(self.run());
        Ok((handle, task))
    }

    async fn run(mut self) {
        while let Some(input) = self.rx.recv().await {
            match input {
                Input::Event(event) => self.dispatch(event).await,
                Input::Timer { id, generation } => {
                    let armed = self.timers.get(&id).map(|(armed, _)| *armed);
                    if armed != Some(generation) {
                        debug!(?id, "Ignoring stale timer");
                        continue;
                    }
                    self.timers.remove(&id);
                    self.dispatch(Event::TimerFired { id }).await;
                }
                Input::Submit { op, reply, purge } => {
                    let request_id = RequestId(self.next_request);
                    self.next_request += 1;
                    debug!(%request_id, op = op.name(), "Client operation");
                    self.clients.insert(request_id, reply);
                    if let Some(purge) = purge {
                        self.purge_streams.insert(request_id, purge);
                    }
                    self.dispatch(Event::Client { request_id, op }).await;
                }
                Input::Status(reply) => {
                    self.state.set_time(self.started.elapsed());
                    let _ = reply.send(self.state.status());
                }
                Input::OrphanSnapshot(reply) => {
                    let _ = reply.send(self.state.orphan_snapshot());
                }
                Input::Shutdown => break,
            }
        }
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        info!("Provisioner shutting down");
        for (_, (_, timer)) in self.timers.drain() {
            timer.abort();
        }
        for (_, inbox) in self.inboxes.drain() {
            inbox.forwarder.abort();
            let _ = self.bus.unsubscribe(inbox.subscription).await;
        }
        for (id, forwarder) in self.subscriptions.drain(..) {
            forwarder.abort();
            let _ = self.bus.unsubscribe(id).await;
        }
    }

    /// Feed deliveries of `subscription` into the loop as events.
    fn forward<F>(&mut self, subscription: Subscription, to_event: F)
    where
        F: Fn(Envelope) -> Option<Event> + Send + 'static,
    {
        let Subscription { id, mut messages } = subscription;
        let tx = self.tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(envelope) = messages.recv().await {
                let subject = envelope.subject.clone();
                let Some(event) = to_event(envelope) else {
                    debug!(%subject, "Dropping message without reply subject");
                    continue;
                };
                if tx.send(Input::Event(event)).is_err() {
                    break;
                }
            }
        });
        self.subscriptions.push((id, forwarder));
    }

    async fn dispatch(&mut self, event: Event) {
        self.state.set_time(self.started.elapsed());
        let actions = self.state.handle(event);
        for action in actions {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::Publish { subject, message } => {
                let Ok(payload) = message.encode() else {
                    warn!(message = message.type_name(), "Failed to encode message");
                    return;
                };
                if let Err(e) = self.bus.publish(subject.as_str(), payload, None).await {
                    warn!(%subject, error = %e, "Publish failed");
                }
            }
            Action::Request {
                subject,
                message,
                correlation,
            } => self.request(subject, message, correlation).await,
            Action::Unsubscribe { correlation } => {
                if let Some(inbox) = self.inboxes.remove(&correlation) {
                    inbox.forwarder.abort();
                    if let Err(e) = self.bus.unsubscribe(inbox.subscription).await {
                        warn!(%correlation, error = %e, "Unsubscribe failed");
                    }
                }
            }
            Action::Reply { reply_to, message } => {
                let Ok(payload) = message.encode() else {
                    warn!(message = message.type_name(), "Failed to encode reply");
                    return;
                };
                if let Err(e) = self.bus.publish(reply_to.as_str(), payload, None).await {
                    warn!(%reply_to, error = %e, "Reply failed");
                }
            }
            Action::SetTimer { id, duration } => {
                self.timer_generation += 1;
                let generation = self.timer_generation;
                let tx = self.tx.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    let _ = tx.send(Input::Timer { id, generation });
                });
                if let Some((_, old)) = self.timers.insert(id, (generation, timer)) {
                    old.abort();
                }
            }
            Action::CancelTimer { id } => {
                if let Some((_, timer)) = self.timers.remove(&id) {
                    timer.abort();
                }
            }
            Action::UpdateHandle { ticket, handle } => {
                let store = Arc::clone(&self.store);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let success = store.update(handle).await;
                    let _ = tx.send(Input::Event(Event::HandleUpdateCompleted { ticket, success }));
                });
            }
            Action::EmitResult { request_id, result } => {
                self.purge_streams.remove(&request_id);
                match self.clients.remove(&request_id) {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => warn!(%request_id, "Result for unknown request"),
                }
            }
            Action::EmitPurgeResult {
                request_id,
                node_id,
                result,
            } => {
                if let Some(stream) = self.purge_streams.get(&request_id) {
                    let _ = stream.send((node_id, result));
                }
            }
        }
    }

    /// Open a reply inbox for `correlation` and publish with it.
    ///
    /// If the inbox cannot be opened the request is not sent; its timer
    /// still reports the timeout.
    async fn request(
        &mut self,
        subject: Subject,
        message: fleet_core::OutboundMessage,
        correlation: CorrelationId,
    ) {
        let Ok(payload) = message.encode() else {
            warn!(message = message.type_name(), "Failed to encode request");
            return;
        };
        let inbox = self.bus.new_inbox();
        let Subscription {
            id: subscription,
            mut messages,
        } = match self.bus.subscribe(&inbox).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(%correlation, error = %e, "Failed to open reply inbox");
                return;
            }
        };

        let tx = self.tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(envelope) = messages.recv().await {
                let event = Event::ReplyReceived {
                    correlation,
                    payload: envelope.payload,
                };
                if tx.send(Input::Event(event)).is_err() {
                    break;
                }
            }
        });
        self.inboxes.insert(
            correlation,
            Inbox {
                subscription,
                forwarder,
            },
        );

        if let Err(e) = self.bus.publish(subject.as_str(), payload, Some(inbox)).await {
            warn!(%subject, %correlation, error = %e, "Request publish failed");
        }
    }
}
