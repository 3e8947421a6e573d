use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{Event, EventStatus, EventType, Lease, LeaseUpdate, ReservationStatus};

/// Sort order for event listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Event listing filter. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub statuses: Vec<EventStatus>,
    pub lease_id: Option<String>,
    pub event_types: Vec<EventType>,
}

impl EventFilter {
    pub fn with_status(status: EventStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&event.status))
            && self.lease_id.as_deref().is_none_or(|id| id == event.lease_id)
            && (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
    }
}

/// Defines the contract for lease storage backends.
///
/// Leases own their reservations and events: `create_lease` persists all three
/// atomically and `destroy_lease` removes them together. Event status only ever
/// moves forward (see [`EventStatus::can_transition_to`]).
pub trait LeaseStore {
    /// Persist a lease with its reservations and events.
    /// Fails with [`StoreError::Duplicate`] if any id already exists.
    fn create_lease(&mut self, lease: Lease) -> Result<Lease, StoreError>;

    /// Fetch a lease with its reservations and events
    fn get_lease(&self, lease_id: &str) -> Result<Option<Lease>, StoreError>;

    /// List leases, optionally restricted to one project
    fn list_leases(&self, project_id: Option<&str>) -> Result<Vec<Lease>, StoreError>;

    fn update_lease(&mut self, lease_id: &str, update: LeaseUpdate) -> Result<Lease, StoreError>;

    /// Remove a lease together with its reservations and events
    fn destroy_lease(&mut self, lease_id: &str) -> Result<(), StoreError>;

    fn update_reservation_status(
        &mut self,
        reservation_id: &str,
        status: ReservationStatus,
    ) -> Result<(), StoreError>;

    fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError>;

    /// Events matching `filter`, ordered by `(time, id)` in `direction`
    fn list_events(
        &self,
        filter: &EventFilter,
        direction: SortDirection,
    ) -> Result<Vec<Event>, StoreError>;

    /// Move an event from `from` to `to` iff it is currently in `from`.
    ///
    /// Returns `Ok(false)` when the event exists but is no longer in `from`.
    /// Backward or skipping transitions are rejected with
    /// [`StoreError::InvalidTransition`].
    fn transition_event(
        &mut self,
        event_id: &str,
        from: EventStatus,
        to: EventStatus,
    ) -> Result<bool, StoreError>;

    /// Move an event's scheduled time iff it is still `Undone`.
    fn reschedule_event(&mut self, event_id: &str, time: DateTime<Utc>) -> Result<bool, StoreError>;
}

/// A store shared by the request path and the scheduler. Hold the lock only
/// for store calls, never across a plugin or identity call.
pub type SharedStore = Arc<Mutex<Box<dyn LeaseStore + Send>>>;

pub fn shared<S>(store: S) -> SharedStore
where
    S: LeaseStore + Send + 'static,
{
    Arc::new(Mutex::new(Box::new(store)))
}

pub(crate) fn check_transition(
    event_id: &str,
    from: EventStatus,
    to: EventStatus,
) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            id: event_id.to_string(),
            from,
            to,
        })
    }
}
