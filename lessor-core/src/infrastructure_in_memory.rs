use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::error::StoreError;
use crate::infrastructure::{check_transition, EventFilter, LeaseStore, SortDirection};
use crate::types::{Event, EventStatus, Lease, LeaseUpdate, Reservation, ReservationStatus};

/// Lease row without its children; reservations and events are kept in
/// their own maps and stitched back together on read.
#[derive(Debug, Clone)]
struct LeaseRow {
    lease: Lease,
    reservation_ids: Vec<String>,
    event_ids: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryLeaseStore {
    // Map of Lease ID -> Lease row
    leases: BTreeMap<String, LeaseRow>,
    reservations: HashMap<String, Reservation>,
    events: HashMap<String, Event>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn assemble(&self, row: &LeaseRow) -> Lease {
        let mut lease = row.lease.clone();
        lease.reservations = row
            .reservation_ids
            .iter()
            .filter_map(|id| self.reservations.get(id).cloned())
            .collect();
        lease.events = row
            .event_ids
            .iter()
            .filter_map(|id| self.events.get(id).cloned())
            .collect();
        lease
            .events
            .sort_by(|a, b| (a.time, &a.id).cmp(&(b.time, &b.id)));
        lease
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn create_lease(&mut self, lease: Lease) -> Result<Lease, StoreError> {
        if self.leases.contains_key(&lease.id) {
            return Err(StoreError::Duplicate(format!("lease id {}", lease.id)));
        }
        if let Some(r) = lease
            .reservations
            .iter()
            .find(|r| self.reservations.contains_key(&r.id))
        {
            return Err(StoreError::Duplicate(format!("reservation id {}", r.id)));
        }
        if let Some(e) = lease.events.iter().find(|e| self.events.contains_key(&e.id)) {
            return Err(StoreError::Duplicate(format!("event id {}", e.id)));
        }

        let row = LeaseRow {
            reservation_ids: lease.reservations.iter().map(|r| r.id.clone()).collect(),
            event_ids: lease.events.iter().map(|e| e.id.clone()).collect(),
            lease: Lease {
                reservations: Vec::new(),
                events: Vec::new(),
                ..lease.clone()
            },
        };
        for r in lease.reservations {
            self.reservations.insert(r.id.clone(), r);
        }
        for e in lease.events {
            self.events.insert(e.id.clone(), e);
        }
        let assembled = self.assemble(&row);
        self.leases.insert(row.lease.id.clone(), row);
        Ok(assembled)
    }

    fn get_lease(&self, lease_id: &str) -> Result<Option<Lease>, StoreError> {
        Ok(self.leases.get(lease_id).map(|row| self.assemble(row)))
    }

    fn list_leases(&self, project_id: Option<&str>) -> Result<Vec<Lease>, StoreError> {
        Ok(self
            .leases
            .values()
            .filter(|row| project_id.is_none_or(|p| p == row.lease.project_id))
            .map(|row| self.assemble(row))
            .collect())
    }

    fn update_lease(&mut self, lease_id: &str, update: LeaseUpdate) -> Result<Lease, StoreError> {
        let row = self
            .leases
            .get_mut(lease_id)
            .ok_or_else(|| StoreError::not_found("lease", lease_id))?;
        if let Some(name) = update.name {
            row.lease.name = name;
        }
        if let Some(end_date) = update.end_date {
            row.lease.end_date = end_date;
        }
        let row = row.clone();
        Ok(self.assemble(&row))
    }

    fn destroy_lease(&mut self, lease_id: &str) -> Result<(), StoreError> {
        let row = self
            .leases
            .remove(lease_id)
            .ok_or_else(|| StoreError::not_found("lease", lease_id))?;
        for id in &row.reservation_ids {
            self.reservations.remove(id);
        }
        for id in &row.event_ids {
            self.events.remove(id);
        }
        Ok(())
    }

    fn update_reservation_status(
        &mut self,
        reservation_id: &str,
        status: ReservationStatus,
    ) -> Result<(), StoreError> {
        let reservation = self
            .reservations
            .get_mut(reservation_id)
            .ok_or_else(|| StoreError::not_found("reservation", reservation_id))?;
        reservation.status = status;
        Ok(())
    }

    fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        Ok(self.events.get(event_id).cloned())
    }

    fn list_events(
        &self,
        filter: &EventFilter,
        direction: SortDirection,
    ) -> Result<Vec<Event>, StoreError> {
        let mut events: Vec<Event> = self
            .events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        events.sort_by(|a, b| (a.time, &a.id).cmp(&(b.time, &b.id)));
        if direction == SortDirection::Desc {
            events.reverse();
        }
        Ok(events)
    }

    fn transition_event(
        &mut self,
        event_id: &str,
        from: EventStatus,
        to: EventStatus,
    ) -> Result<bool, StoreError> {
        check_transition(event_id, from, to)?;
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| StoreError::not_found("event", event_id))?;
        if event.status != from {
            return Ok(false);
        }
        event.status = to;
        Ok(true)
    }

    fn reschedule_event(&mut self, event_id: &str, time: DateTime<Utc>) -> Result<bool, StoreError> {
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| StoreError::not_found("event", event_id))?;
        if event.status != EventStatus::Undone {
            return Ok(false);
        }
        event.time = time;
        Ok(true)
    }
}
