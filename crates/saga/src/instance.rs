use chrono::{DateTime, Utc};
use common::{Order, SagaId};
use serde::{Deserialize, Serialize};

use crate::status::SagaStatus;
use crate::step::SagaStep;

/// A single in-flight (or finished) saga.
///
/// Owned exclusively by the orchestrator and mutated only inside its
/// critical sections; participant services never see this record. The
/// order snapshot evolves as steps complete, absorbing the reservation and
/// payment identifiers returned by the participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInstance {
    id: SagaId,
    status: SagaStatus,
    current_step: usize,
    completed_steps: Vec<String>,
    order: Order,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    // Steps still awaiting an undo round trip, in completion order.
    // Undone back-to-front so compensation runs in reverse.
    pending_compensation: Vec<String>,
}

impl SagaInstance {
    /// Creates a fresh instance in `Started` status.
    pub fn new(id: SagaId, order: Order) -> Self {
        Self {
            id,
            status: SagaStatus::Started,
            current_step: 0,
            completed_steps: Vec::new(),
            order,
            started_at: Utc::now(),
            ended_at: None,
            failure_reason: None,
            pending_compensation: Vec::new(),
        }
    }

    /// The saga identifier.
    pub fn id(&self) -> &SagaId {
        &self.id
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SagaStatus {
        self.status
    }

    /// Index of the next forward step.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Names of the completed forward steps, in completion order.
    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    /// The saga's snapshot of the order data.
    pub fn order(&self) -> &Order {
        &self.order
    }

    /// When the saga was started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the saga reached a terminal status, if it has.
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Why the saga entered compensation, if it did.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Copies participant-assigned identifiers out of an outcome payload
    /// into the order snapshot.
    pub(crate) fn absorb_outcome(&mut self, outcome: &Order) {
        if let Some(reservation_id) = &outcome.reservation_id {
            self.order.reservation_id = Some(reservation_id.clone());
        }
        if let Some(payment_id) = &outcome.payment_id {
            self.order.payment_id = Some(payment_id.clone());
        }
    }

    /// Records a completed forward step and advances the status.
    pub(crate) fn record_step(&mut self, step: SagaStep) {
        self.push_completed(step.as_str());
        self.status = match step {
            SagaStep::OrderCreated => SagaStatus::OrderCreated,
            SagaStep::InventoryReserved => SagaStatus::InventoryReserved,
            SagaStep::PaymentProcessed => {
                self.ended_at = Some(Utc::now());
                SagaStatus::Completed
            }
        };
    }

    pub(crate) fn push_completed(&mut self, name: &str) {
        self.completed_steps.push(name.to_string());
        self.current_step += 1;
    }

    /// Enters compensation: records the reason and queues every completed
    /// step for an undo round trip.
    pub(crate) fn begin_compensation(&mut self, reason: impl Into<String>) {
        self.status = SagaStatus::Compensating;
        self.failure_reason = Some(reason.into());
        self.pending_compensation = self.completed_steps.clone();
    }

    /// Takes the next step to undo, most recently completed first.
    pub(crate) fn next_compensation(&mut self) -> Option<String> {
        self.pending_compensation.pop()
    }

    /// Marks the saga compensated (terminal).
    pub(crate) fn mark_compensated(&mut self) {
        self.status = SagaStatus::Compensated;
        self.ended_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;

    fn sample() -> SagaInstance {
        let order = Order::new("order-001", "cust-123", "prod-123", 2, Money::from_cents(29999));
        SagaInstance::new(SagaId::for_order(&order.order_id.clone()), order)
    }

    #[test]
    fn new_instance_starts_at_step_zero() {
        let instance = sample();
        assert_eq!(instance.status(), SagaStatus::Started);
        assert_eq!(instance.current_step(), 0);
        assert!(instance.completed_steps().is_empty());
        assert!(instance.ended_at().is_none());
        assert!(instance.failure_reason().is_none());
    }

    #[test]
    fn record_step_advances_index_and_status() {
        let mut instance = sample();

        instance.record_step(SagaStep::OrderCreated);
        assert_eq!(instance.status(), SagaStatus::OrderCreated);
        assert_eq!(instance.current_step(), 1);

        instance.record_step(SagaStep::InventoryReserved);
        assert_eq!(instance.status(), SagaStatus::InventoryReserved);
        assert_eq!(instance.current_step(), 2);

        instance.record_step(SagaStep::PaymentProcessed);
        assert_eq!(instance.status(), SagaStatus::Completed);
        assert_eq!(instance.current_step(), 3);
        assert!(instance.ended_at().is_some());
        assert!(instance.ended_at().unwrap() >= instance.started_at());
        assert_eq!(
            instance.completed_steps(),
            &["order_created", "inventory_reserved", "payment_processed"]
        );
    }

    #[test]
    fn compensation_queue_is_reverse_completion_order() {
        let mut instance = sample();
        instance.record_step(SagaStep::OrderCreated);
        instance.record_step(SagaStep::InventoryReserved);

        instance.begin_compensation("payment declined");
        assert_eq!(instance.status(), SagaStatus::Compensating);
        assert_eq!(instance.failure_reason(), Some("payment declined"));

        assert_eq!(instance.next_compensation().as_deref(), Some("inventory_reserved"));
        assert_eq!(instance.next_compensation().as_deref(), Some("order_created"));
        assert_eq!(instance.next_compensation(), None);

        // The completed-steps record itself is preserved.
        assert_eq!(
            instance.completed_steps(),
            &["order_created", "inventory_reserved"]
        );
    }

    #[test]
    fn mark_compensated_is_terminal_with_end_time() {
        let mut instance = sample();
        instance.record_step(SagaStep::OrderCreated);
        instance.begin_compensation("inventory reservation failed");
        instance.mark_compensated();

        assert_eq!(instance.status(), SagaStatus::Compensated);
        assert!(instance.status().is_terminal());
        assert!(instance.ended_at().is_some());
    }

    #[test]
    fn absorb_outcome_merges_only_present_identifiers() {
        let mut instance = sample();

        let mut outcome = instance.order().clone();
        outcome.reservation_id = Some("res-0001".to_string());
        instance.absorb_outcome(&outcome);
        assert_eq!(instance.order().reservation_id.as_deref(), Some("res-0001"));
        assert!(instance.order().payment_id.is_none());

        let mut outcome = instance.order().clone();
        outcome.payment_id = Some("pay-0001".to_string());
        outcome.reservation_id = None;
        instance.absorb_outcome(&outcome);
        assert_eq!(instance.order().payment_id.as_deref(), Some("pay-0001"));
        // A later payload without a reservation must not clear the one we have.
        assert_eq!(instance.order().reservation_id.as_deref(), Some("res-0001"));
    }

    #[test]
    fn serialization_roundtrip() {
        let mut instance = sample();
        instance.record_step(SagaStep::OrderCreated);

        let json = serde_json::to_string(&instance).unwrap();
        let back: SagaInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), instance.id());
        assert_eq!(back.status(), SagaStatus::OrderCreated);
        assert_eq!(back.completed_steps(), instance.completed_steps());
    }
}
