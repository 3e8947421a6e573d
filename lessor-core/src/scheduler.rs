//! Event scheduler.
//!
//! Every period the scheduler looks at the earliest `UNDONE` event. If it is
//! due, the event is marked `IN_PROGRESS` before anything else happens, the
//! lease's trust is redeemed, and the matching handler runs under that
//! context. Exactly one event is considered per tick.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::actions::{ActionTable, LifecyclePhase};
use crate::context::{self, RequestContext};
use crate::error::{ConfigError, ManagerError, StoreError};
use crate::identity::Delegation;
use crate::infrastructure::{EventFilter, SharedStore, SortDirection};
use crate::types::{Event, EventStatus, EventType, Lease, ReservationStatus};

/// Handler for an event type beyond the built-in lifecycle ones
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, lease: &Lease, ctx: &RequestContext) -> Result<(), ManagerError>;
}

#[derive(Clone)]
enum Handler {
    /// Run `phase` for every reservation, then set `target` on success
    Basic {
        phase: LifecyclePhase,
        target: Option<ReservationStatus>,
    },
    Custom(Arc<dyn EventHandler>),
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No `UNDONE` events
    Idle,
    /// The earliest event is in the future
    NotDue { event_id: String, due: DateTime<Utc> },
    /// Someone else moved the event out of `UNDONE` first
    Lost { event_id: String },
    Completed { event_id: String, event_type: EventType },
    Failed {
        event_id: String,
        event_type: EventType,
        error: String,
    },
    StoreUnavailable(String),
}

pub struct EventScheduler {
    store: SharedStore,
    actions: Arc<ActionTable>,
    delegation: Delegation,
    handlers: HashMap<EventType, Handler>,
    period: Duration,
}

impl EventScheduler {
    /// Scheduler with `start_lease`, `end_lease` and one handler per named
    /// phase found in `actions`.
    pub fn new(
        store: SharedStore,
        actions: Arc<ActionTable>,
        delegation: Delegation,
        period: Duration,
    ) -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(
            EventType::StartLease,
            Handler::Basic {
                phase: LifecyclePhase::OnStart,
                target: Some(ReservationStatus::Active),
            },
        );
        handlers.insert(
            EventType::EndLease,
            Handler::Basic {
                phase: LifecyclePhase::OnEnd,
                target: Some(ReservationStatus::Deleted),
            },
        );
        for phase in actions.named_phases() {
            handlers.insert(
                EventType::from(phase.as_str()),
                Handler::Basic {
                    phase: LifecyclePhase::Named(phase),
                    target: None,
                },
            );
        }

        Self {
            store,
            actions,
            delegation,
            handlers,
            period,
        }
    }

    /// Attach a handler for `event_type`, replacing any previous one.
    pub fn register_handler(
        &mut self,
        event_type: impl Into<EventType>,
        handler: Arc<dyn EventHandler>,
    ) {
        self.handlers.insert(event_type.into(), Handler::Custom(handler));
    }

    pub fn handles(&self, event_type: &EventType) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Move events left `IN_PROGRESS` by a previous process to `ERROR`.
    ///
    /// Only one scheduler runs per deployment, so on startup nothing can
    /// legitimately be in progress. Whether their side effect happened is
    /// unknown; an operator has to look at them.
    pub async fn recover_stalled(&self) -> Result<usize, StoreError> {
        let mut store = self.store.lock().await;
        let stalled = store.list_events(
            &EventFilter::with_status(EventStatus::InProgress),
            SortDirection::Asc,
        )?;
        let mut recovered = 0;
        for event in stalled {
            if store.transition_event(&event.id, EventStatus::InProgress, EventStatus::Error)? {
                tracing::warn!(
                    event_id = %event.id,
                    lease_id = %event.lease_id,
                    event_type = %event.event_type,
                    "Event was left in progress by a previous run, marking it as error"
                );
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(Utc::now()).await
    }

    /// One scheduler pass with `now` as the current time.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        tracing::debug!("Trying to get event from store");
        let next = {
            let store = self.store.lock().await;
            store.list_events(
                &EventFilter::with_status(EventStatus::Undone),
                SortDirection::Asc,
            )
        };
        let event = match next {
            Ok(events) => match events.into_iter().next() {
                Some(event) => event,
                None => return TickOutcome::Idle,
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to query pending events");
                return TickOutcome::StoreUnavailable(e.to_string());
            }
        };

        if !event.is_due(now) {
            return TickOutcome::NotDue {
                event_id: event.id,
                due: event.time,
            };
        }

        let claimed = self.store.lock().await.transition_event(
            &event.id,
            EventStatus::Undone,
            EventStatus::InProgress,
        );
        match claimed {
            Ok(true) => {}
            Ok(false) => return TickOutcome::Lost { event_id: event.id },
            Err(e) => {
                tracing::error!(event_id = %event.id, error = %e, "Failed to claim event");
                return TickOutcome::StoreUnavailable(e.to_string());
            }
        }

        tracing::info!(
            event_id = %event.id,
            lease_id = %event.lease_id,
            event_type = %event.event_type,
            "Processing event"
        );

        let (status, outcome) = match self.execute(&event).await {
            Ok(()) => {
                tracing::info!(event_id = %event.id, lease_id = %event.lease_id, "Event processed");
                (
                    EventStatus::Done,
                    TickOutcome::Completed {
                        event_id: event.id.clone(),
                        event_type: event.event_type.clone(),
                    },
                )
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    lease_id = %event.lease_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Error occurred while event handling"
                );
                (
                    EventStatus::Error,
                    TickOutcome::Failed {
                        event_id: event.id.clone(),
                        event_type: event.event_type.clone(),
                        error: e.to_string(),
                    },
                )
            }
        };

        let recorded =
            self.store
                .lock()
                .await
                .transition_event(&event.id, EventStatus::InProgress, status);
        if let Err(e) = recorded {
            tracing::error!(event_id = %event.id, status = %status, error = %e, "Failed to record event status");
        }
        outcome
    }

    async fn execute(&self, event: &Event) -> Result<(), ManagerError> {
        let handler = self
            .handlers
            .get(&event.event_type)
            .cloned()
            .ok_or_else(|| ConfigError::UnsupportedEventType(event.event_type.to_string()))?;

        let lease = self
            .store
            .lock()
            .await
            .get_lease(&event.lease_id)?
            .ok_or_else(|| ManagerError::not_found("lease", &event.lease_id))?;

        let ctx = self.delegation.redeem(&lease.trust_id).await?;

        context::scope(ctx.clone(), async {
            match handler {
                Handler::Basic { phase, target } => {
                    run_basic_action(&self.store, &self.actions, &lease, &phase, target, &ctx).await
                }
                Handler::Custom(handler) => handler.handle(&lease, &ctx).await,
            }
        })
        .await
    }

    /// Tick every period until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_secs = self.period.as_secs(), "Event scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Event scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}

/// Run `phase` for every reservation of `lease` and move successful ones to
/// `target`. Reservations already deleted are left alone. A failure marks that
/// reservation `error`; the others still run.
pub(crate) async fn run_basic_action(
    store: &SharedStore,
    actions: &ActionTable,
    lease: &Lease,
    phase: &LifecyclePhase,
    target: Option<ReservationStatus>,
    ctx: &RequestContext,
) -> Result<(), ManagerError> {
    let mut failures = Vec::new();

    for reservation in &lease.reservations {
        if reservation.status == ReservationStatus::Deleted {
            tracing::debug!(reservation_id = %reservation.id, "Reservation already deleted, skipping");
            continue;
        }

        let result = match actions.lookup(&reservation.resource_type, phase) {
            Some(action) => {
                tracing::debug!(
                    reservation_id = %reservation.id,
                    plugin = action.plugin_name(),
                    action = action.action().name(),
                    "Running lifecycle action"
                );
                action
                    .invoke(&reservation.resource_id, ctx)
                    .await
                    .map_err(|e| e.to_string())
            }
            None => Err(format!(
                "no {} action for resource type '{}'",
                phase, reservation.resource_type
            )),
        };

        match result {
            Ok(_) => {
                if let Some(status) = target {
                    store
                        .lock()
                        .await
                        .update_reservation_status(&reservation.id, status)?;
                }
            }
            Err(msg) => {
                tracing::error!(
                    lease_id = %lease.id,
                    reservation_id = %reservation.id,
                    resource_type = %reservation.resource_type,
                    phase = %phase,
                    error = %msg,
                    "Lifecycle action failed"
                );
                store
                    .lock()
                    .await
                    .update_reservation_status(&reservation.id, ReservationStatus::Error)?;
                failures.push(format!("reservation {}: {}", reservation.id, msg));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ManagerError::HandlerFailure(failures.join("; ")))
    }
}
