//! The saga orchestrator: tracks in-flight sagas and drives each one
//! forward or through compensation as outcome events arrive.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use common::{Order, SagaId};
use event_bus::{Event, EventBus, EventHandler, EventType, HandlerError};

use crate::error::{OrchestratorError, Result};
use crate::instance::SagaInstance;
use crate::status::SagaStatus;
use crate::step::SagaStep;

/// Source tag carried by every event the orchestrator publishes.
pub const SOURCE: &str = "saga-orchestrator";

/// Status payload of the terminal `saga.completed`/`saga.failed` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaOutcome {
    /// `"completed"` or `"failed"`.
    pub status: String,
    /// For failed sagas, why compensation was triggered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SagaOutcome {
    fn completed() -> Self {
        Self {
            status: "completed".to_string(),
            reason: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: "failed".to_string(),
            reason: Some(reason.into()),
        }
    }
}

/// Central decider for the order processing saga.
///
/// Reacts to participant outcome events, publishes the next request, and on
/// failure walks the completed steps backwards, one observed undo round trip
/// at a time. The instance table is the only shared mutable state; every
/// mutation is a single read-decide-write critical section under the write
/// lock, and publishes happen after the lock is released, so two
/// concurrently delivered outcomes for the same saga cannot race into an
/// inconsistent status.
pub struct SagaOrchestrator<B: EventBus> {
    bus: Arc<B>,
    instances: RwLock<HashMap<SagaId, SagaInstance>>,
}

/// Outcome event types the orchestrator subscribes to.
const OUTCOME_TYPES: [EventType; 12] = [
    EventType::OrderCreateCompleted,
    EventType::OrderCreateFailed,
    EventType::InventoryReserveCompleted,
    EventType::InventoryReserveFailed,
    EventType::PaymentProcessCompleted,
    EventType::PaymentProcessFailed,
    EventType::OrderCancelCompleted,
    EventType::OrderCancelFailed,
    EventType::InventoryReleaseCompleted,
    EventType::InventoryReleaseFailed,
    EventType::PaymentRefundCompleted,
    EventType::PaymentRefundFailed,
];

impl<B: EventBus> SagaOrchestrator<B> {
    /// Creates a new orchestrator over the given bus.
    pub fn new(bus: Arc<B>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            instances: RwLock::new(HashMap::new()),
        })
    }

    /// Subscribes the orchestrator to every participant outcome type.
    pub async fn register(self: &Arc<Self>) -> Result<()> {
        for event_type in OUTCOME_TYPES {
            self.bus
                .subscribe(event_type, Arc::clone(self) as Arc<dyn EventHandler>)
                .await?;
        }
        Ok(())
    }

    /// Begins a new saga for the given order.
    ///
    /// The instance is inserted before the first request is published, so no
    /// outcome event can arrive for an id that is not yet in the table.
    /// Starting a second saga for the same order fails with
    /// [`OrchestratorError::SagaAlreadyExists`].
    pub async fn start_order_processing(&self, order: Order) -> Result<SagaId> {
        let saga_id = SagaId::for_order(&order.order_id);

        let request = {
            let mut instances = self.instances.write().await;
            if instances.contains_key(&saga_id) {
                return Err(OrchestratorError::SagaAlreadyExists(saga_id));
            }
            let instance = SagaInstance::new(saga_id.clone(), order);
            let request =
                self.request(EventType::OrderCreateRequested, instance.id(), instance.order())?;
            instances.insert(saga_id.clone(), instance);
            request
        };

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(%saga_id, "starting order processing saga");

        self.bus.publish(request).await?;
        Ok(saga_id)
    }

    /// Returns a snapshot of a saga instance, if it exists.
    pub async fn get_saga(&self, saga_id: &SagaId) -> Option<SagaInstance> {
        self.instances.read().await.get(saga_id).cloned()
    }

    /// Number of saga instances in the table, terminal ones included.
    pub async fn saga_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Handles a forward `*.completed` outcome: absorb the payload, record
    /// the step, and either request the next step or finish the saga.
    async fn on_forward_completed(
        &self,
        event: &Event,
        expected: SagaStatus,
        step: SagaStep,
        next_request: Option<EventType>,
    ) -> Result<()> {
        let outbound = {
            let mut instances = self.instances.write().await;
            let instance = instances
                .get_mut(&event.saga_id)
                .ok_or_else(|| OrchestratorError::SagaNotFound(event.saga_id.clone()))?;

            if instance.status() != expected {
                tracing::debug!(
                    saga_id = %event.saga_id,
                    status = %instance.status(),
                    event_type = %event.event_type,
                    "ignoring stale outcome event"
                );
                return Ok(());
            }

            if let Ok(outcome) = event.payload_as::<Order>() {
                instance.absorb_outcome(&outcome);
            }
            instance.record_step(step);
            tracing::info!(
                saga_id = %event.saga_id,
                step = %step,
                status = %instance.status(),
                "saga step completed"
            );

            match next_request {
                Some(event_type) => {
                    self.request(event_type, instance.id(), instance.order())?
                }
                None => {
                    let duration = instance
                        .ended_at()
                        .map(|ended| (ended - instance.started_at()).num_milliseconds() as f64 / 1000.0)
                        .unwrap_or_default();
                    metrics::counter!("saga_completed_total").increment(1);
                    metrics::histogram!("saga_duration_seconds").record(duration);
                    tracing::info!(saga_id = %event.saga_id, duration, "saga completed successfully");
                    self.terminal(EventType::SagaCompleted, instance.id(), SagaOutcome::completed())?
                }
            }
        };

        self.bus.publish(outbound).await?;
        Ok(())
    }

    /// Handles a forward `*.failed` outcome: enter compensation and issue
    /// the first undo request (or finish immediately when nothing completed).
    async fn on_step_failed(&self, event: &Event, default_reason: &str) -> Result<()> {
        let reason = event
            .data
            .as_ref()
            .and_then(|data| data.get("reason"))
            .and_then(|reason| reason.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| default_reason.to_string());

        let outbound = {
            let mut instances = self.instances.write().await;
            let instance = instances
                .get_mut(&event.saga_id)
                .ok_or_else(|| OrchestratorError::SagaNotFound(event.saga_id.clone()))?;

            if !instance.status().can_compensate() {
                tracing::debug!(
                    saga_id = %event.saga_id,
                    status = %instance.status(),
                    event_type = %event.event_type,
                    "ignoring failure event for saga no longer in flight"
                );
                return Ok(());
            }

            metrics::counter!("saga_compensations_total").increment(1);
            tracing::warn!(
                saga_id = %event.saga_id,
                event_type = %event.event_type,
                %reason,
                "saga step failed, starting compensation"
            );
            instance.begin_compensation(reason);
            self.advance_compensation(instance)?
        };

        self.bus.publish(outbound).await?;
        Ok(())
    }

    /// Handles an undo outcome. A failed undo is logged and treated as
    /// resolved: compensation is at-least-one-attempt, not
    /// guaranteed-success.
    async fn on_compensation_outcome(&self, event: &Event, success: bool) -> Result<()> {
        let outbound = {
            let mut instances = self.instances.write().await;
            let instance = instances
                .get_mut(&event.saga_id)
                .ok_or_else(|| OrchestratorError::SagaNotFound(event.saga_id.clone()))?;

            if instance.status() != SagaStatus::Compensating {
                tracing::debug!(
                    saga_id = %event.saga_id,
                    status = %instance.status(),
                    event_type = %event.event_type,
                    "ignoring undo outcome for saga not compensating"
                );
                return Ok(());
            }

            if success {
                tracing::info!(
                    saga_id = %event.saga_id,
                    event_type = %event.event_type,
                    "compensation step completed"
                );
            } else {
                tracing::warn!(
                    saga_id = %event.saga_id,
                    event_type = %event.event_type,
                    "compensating request failed, continuing"
                );
            }

            self.advance_compensation(instance)?
        };

        self.bus.publish(outbound).await?;
        Ok(())
    }

    /// Produces the next event of a compensation in progress: the undo
    /// request for the most recently completed remaining step, or the
    /// terminal `saga.failed` once the queue is exhausted. Unknown step
    /// names are reported and skipped.
    fn advance_compensation(&self, instance: &mut SagaInstance) -> Result<Event> {
        loop {
            match instance.next_compensation() {
                Some(name) => match SagaStep::parse(&name) {
                    Some(step) => {
                        tracing::info!(
                            saga_id = %instance.id(),
                            step = %step,
                            undo = %step.undo_request(),
                            "requesting compensation"
                        );
                        return self.request(step.undo_request(), instance.id(), instance.order());
                    }
                    None => {
                        let error = OrchestratorError::UnknownStep(name);
                        tracing::error!(saga_id = %instance.id(), %error, "skipping compensation step");
                    }
                },
                None => {
                    instance.mark_compensated();
                    let reason = instance.failure_reason().unwrap_or("unknown").to_string();
                    metrics::counter!("saga_failed_total").increment(1);
                    tracing::info!(saga_id = %instance.id(), %reason, "saga compensated");
                    return self.terminal(
                        EventType::SagaFailed,
                        instance.id(),
                        SagaOutcome::failed(reason),
                    );
                }
            }
        }
    }

    fn request(&self, event_type: EventType, saga_id: &SagaId, order: &Order) -> Result<Event> {
        Ok(Event::builder()
            .event_type(event_type)
            .saga_id(saga_id.clone())
            .payload(order)?
            .source(SOURCE)
            .build())
    }

    fn terminal(
        &self,
        event_type: EventType,
        saga_id: &SagaId,
        outcome: SagaOutcome,
    ) -> Result<Event> {
        Ok(Event::builder()
            .event_type(event_type)
            .saga_id(saga_id.clone())
            .payload(&outcome)?
            .source(SOURCE)
            .build())
    }
}

#[async_trait]
impl<B: EventBus> EventHandler for SagaOrchestrator<B> {
    async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError> {
        match event.event_type {
            EventType::OrderCreateCompleted => {
                self.on_forward_completed(
                    &event,
                    SagaStatus::Started,
                    SagaStep::OrderCreated,
                    Some(EventType::InventoryReserveRequested),
                )
                .await?
            }
            EventType::InventoryReserveCompleted => {
                self.on_forward_completed(
                    &event,
                    SagaStatus::OrderCreated,
                    SagaStep::InventoryReserved,
                    Some(EventType::PaymentProcessRequested),
                )
                .await?
            }
            EventType::PaymentProcessCompleted => {
                self.on_forward_completed(
                    &event,
                    SagaStatus::InventoryReserved,
                    SagaStep::PaymentProcessed,
                    None,
                )
                .await?
            }
            EventType::OrderCreateFailed => {
                self.on_step_failed(&event, "order creation failed").await?
            }
            EventType::InventoryReserveFailed => {
                self.on_step_failed(&event, "inventory reservation failed")
                    .await?
            }
            EventType::PaymentProcessFailed => {
                self.on_step_failed(&event, "payment processing failed")
                    .await?
            }
            EventType::OrderCancelCompleted
            | EventType::InventoryReleaseCompleted
            | EventType::PaymentRefundCompleted => {
                self.on_compensation_outcome(&event, true).await?
            }
            EventType::OrderCancelFailed
            | EventType::InventoryReleaseFailed
            | EventType::PaymentRefundFailed => {
                self.on_compensation_outcome(&event, false).await?
            }
            other => {
                tracing::debug!(event_type = %other, "orchestrator ignoring event type");
            }
        }
        Ok(())
    }
}
