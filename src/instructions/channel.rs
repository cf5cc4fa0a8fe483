//! Event-driven instruction delivery.
//!
//! A channel hands each delivery to every registered handler concurrently and
//! reports per-handler outcomes. Observers can also subscribe to a broadcast
//! stream of deliveries without taking part in acknowledgement.

use crate::core::cancellation::CancellationSignal;
use crate::core::config::{ChannelConfig, HandlerFailurePolicy, LockstepConfig};
use crate::core::errors::{LockstepError, Result, UnitFailure};
use crate::core::telemetry::{EventContext, TelemetrySink, TracingSink};
use crate::instructions::delivery::{DeliveryReport, DeliveryStatus, HandlerFailure, InstructionDelivery};
use crate::instructions::instruction::Instruction;
use async_broadcast::{InactiveReceiver, Receiver, Sender};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Receives deliveries from a channel
#[async_trait]
pub trait InstructionHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Process one delivery. Long-running handlers should call
    /// [`InstructionDelivery::ensure_active`] between steps.
    async fn handle(&self, delivery: &InstructionDelivery) -> anyhow::Result<()>;
}

/// Adapts an async closure into a handler
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new<S, Fut>(name: S, f: F) -> Self
    where
        S: Into<String>,
        F: Fn(InstructionDelivery) -> Fut + Send + Sync,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F, Fut> InstructionHandler for FnHandler<F>
where
    F: Fn(InstructionDelivery) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, delivery: &InstructionDelivery) -> anyhow::Result<()> {
        (self.f)(delivery.clone()).await
    }
}

/// Registration handle returned by [`InstructionChannel::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

pub struct InstructionChannel {
    handlers: DashMap<HandlerId, Arc<dyn InstructionHandler>>,
    next_id: AtomicU64,
    sender: Sender<InstructionDelivery>,
    // Keeps the broadcast channel open while nobody is subscribed.
    idle: InactiveReceiver<InstructionDelivery>,
    config: ChannelConfig,
    sink: Arc<dyn TelemetrySink>,
}

impl InstructionChannel {
    pub fn new(config: ChannelConfig) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(config.broadcast_capacity.max(1));
        sender.set_overflow(true); // slow observers lose the oldest deliveries
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
            sender,
            idle: receiver.deactivate(),
            config,
            sink: Arc::new(TracingSink),
        }
    }

    /// Channel built from the `channel` section of a loaded configuration
    pub fn from_config(config: &LockstepConfig) -> Self {
        Self::new(config.channel.clone())
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn register(&self, handler: Arc<dyn InstructionHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(handler = handler.name(), id = id.0, "registered instruction handler");
        self.handlers.insert(id, handler);
        id
    }

    /// Returns false if the id was not registered
    pub fn unregister(&self, id: HandlerId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Stream of every delivery dispatched from now on
    pub fn subscribe(&self) -> Receiver<InstructionDelivery> {
        self.idle.activate_cloned()
    }

    /// Wrap `instruction` in a new delivery bound to `signal` and dispatch it
    pub async fn dispatch(
        &self,
        instruction: Instruction,
        signal: CancellationSignal,
    ) -> Result<DeliveryReport> {
        self.dispatch_delivery(InstructionDelivery::new(instruction, signal))
            .await
    }

    pub async fn dispatch_delivery(&self, delivery: InstructionDelivery) -> Result<DeliveryReport> {
        let context = EventContext::new(delivery.id())
            .add_context("instructionType", delivery.instruction().kind().as_str());
        let span = context.span("InstructionChannel.Dispatch");
        self.dispatch_inner(delivery, context).instrument(span).await
    }

    async fn dispatch_inner(
        &self,
        delivery: InstructionDelivery,
        context: EventContext,
    ) -> Result<DeliveryReport> {
        let mut handlers: Vec<(HandlerId, Arc<dyn InstructionHandler>)> = self
            .handlers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        handlers.sort_by_key(|(id, _)| *id);
        let names: Vec<String> = handlers.iter().map(|(_, h)| h.name().to_string()).collect();

        let mut report = DeliveryReport {
            delivery_id: delivery.id().to_string(),
            status: DeliveryStatus::Created,
            handlers_invoked: 0,
            handler_failures: Vec::new(),
        };

        if delivery.is_cancelled() {
            info!(handlers = names.len(), "delivery cancelled before dispatch");
            report.status = DeliveryStatus::Cancelled;
            report.handler_failures = names
                .iter()
                .map(|name| cancelled_failure(name, &delivery))
                .collect();
            self.emit(&context, &report);
            return Ok(report);
        }

        if self.sender.receiver_count() > 0 {
            // Overflow is on, so this only fails when every observer has gone.
            let _ = self.sender.try_broadcast(delivery.clone());
        }

        report.status = DeliveryStatus::Dispatched;
        info!(handlers = names.len(), "dispatching instruction");

        let mut pending: FuturesUnordered<_> = handlers
            .into_iter()
            .enumerate()
            .map(|(index, (_, handler))| {
                let delivery = delivery.clone();
                async move {
                    if delivery.is_cancelled() {
                        let error = anyhow::Error::from(LockstepError::delivery_cancelled(delivery.id()));
                        return (index, false, Err(error));
                    }
                    let outcome = AssertUnwindSafe(handler.handle(&delivery))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("handler panicked")));
                    (index, true, outcome)
                }
            })
            .collect();

        let mut finished = vec![false; names.len()];
        let mut errors: Vec<(usize, anyhow::Error)> = Vec::new();
        let signal = delivery.signal().clone();
        let mut cancelled = false;

        while !pending.is_empty() {
            tokio::select! {
                biased;
                next = pending.next() => {
                    if let Some((index, invoked, outcome)) = next {
                        finished[index] = true;
                        if invoked {
                            report.handlers_invoked += 1;
                        }
                        if let Err(error) = outcome {
                            errors.push((index, error));
                        }
                    }
                }
                _ = signal.cancelled() => {
                    cancelled = true;
                    break;
                }
            }
        }
        // Dropping the set stops handlers that never acknowledged.
        drop(pending);

        // Handlers that saw the signal may have returned before the select did.
        cancelled |= signal.is_cancelled()
            || errors.iter().any(|(_, error)| is_delivery_cancelled(error));

        if cancelled {
            for (index, done) in finished.iter().enumerate() {
                if !done {
                    errors.push((
                        index,
                        LockstepError::delivery_cancelled(delivery.id()).into(),
                    ));
                }
            }
        }
        errors.sort_by_key(|(index, _)| *index);

        report.status = if cancelled {
            DeliveryStatus::Cancelled
        } else {
            DeliveryStatus::Completed
        };
        report.handler_failures = errors
            .iter()
            .map(|(index, error)| HandlerFailure {
                handler: names[*index].clone(),
                message: format!("{:#}", error),
            })
            .collect();

        for failure in &report.handler_failures {
            warn!(handler = %failure.handler, error = %failure.message, "instruction handler failed");
        }
        self.emit(&context, &report);

        if !cancelled
            && !errors.is_empty()
            && self.config.failure_policy == HandlerFailurePolicy::Aggregate
        {
            let failures = errors
                .into_iter()
                .map(|(index, error)| UnitFailure::new(index, names[index].clone(), error))
                .collect();
            return Err(LockstepError::aggregate(
                format!("dispatch of delivery '{}'", delivery.id()),
                failures,
            ));
        }

        info!(status = ?report.status, failures = report.handler_failures.len(), "dispatch finished");
        Ok(report)
    }

    fn emit(&self, context: &EventContext, report: &DeliveryReport) {
        let context = context
            .clone()
            .add_context("status", report.status)
            .add_context("handlersInvoked", report.handlers_invoked)
            .add_context("failures", report.handler_failures.len());
        self.sink.emit("InstructionChannel.Dispatch", &context);
    }
}

impl Default for InstructionChannel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

fn is_delivery_cancelled(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<LockstepError>(),
        Some(LockstepError::DeliveryCancelled { .. })
    )
}

fn cancelled_failure(name: &str, delivery: &InstructionDelivery) -> HandlerFailure {
    HandlerFailure {
        handler: name.to_string(),
        message: LockstepError::delivery_cancelled(delivery.id()).to_string(),
    }
}
