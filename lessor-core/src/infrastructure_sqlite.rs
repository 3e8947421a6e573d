//! SQLite-backed LeaseStore implementation.
//! Keeps leases, reservations and events across manager restarts.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! lessor-core = { path = "../lessor-core", features = ["sqlite"] }
//! ```

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::infrastructure::{check_transition, EventFilter, LeaseStore, SortDirection};
use crate::types::*;

const LEASE_COLUMNS: &str = "id, name, user_id, project_id, start_date, end_date, trust_id";

/// A persistent lease store backed by SQLite.
///
/// Uses WAL mode for concurrent read performance. Times are stored as
/// milliseconds since the Unix epoch.
pub struct SqliteLeaseStore {
    conn: Connection,
}

impl SqliteLeaseStore {
    /// Open (or create) a SQLite database at the given path.
    /// `":memory:"` gives a throwaway database.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS leases (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                project_id  TEXT NOT NULL,
                start_date  INTEGER NOT NULL,
                end_date    INTEGER NOT NULL,
                trust_id    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_leases_project ON leases(project_id);

            CREATE TABLE IF NOT EXISTS reservations (
                id            TEXT PRIMARY KEY,
                lease_id      TEXT NOT NULL REFERENCES leases(id) ON DELETE CASCADE,
                position      INTEGER NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id   TEXT NOT NULL,
                status        TEXT NOT NULL DEFAULT 'pending'
            );
            CREATE INDEX IF NOT EXISTS idx_reservations_lease ON reservations(lease_id);

            CREATE TABLE IF NOT EXISTS events (
                id          TEXT PRIMARY KEY,
                lease_id    TEXT NOT NULL REFERENCES leases(id) ON DELETE CASCADE,
                event_type  TEXT NOT NULL,
                time        INTEGER NOT NULL,
                status      TEXT NOT NULL DEFAULT 'UNDONE'
            );
            CREATE INDEX IF NOT EXISTS idx_events_status_time ON events(status, time);
            CREATE INDEX IF NOT EXISTS idx_events_lease ON events(lease_id);",
        )?;

        Ok(Self { conn })
    }

    fn to_time(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::from_timestamp_millis(ms)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
    }

    fn invalid_text(idx: usize, value: &str) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::new(StoreError::Backend(format!("unexpected value '{}'", value))),
        )
    }

    fn row_to_lease(row: &rusqlite::Row) -> rusqlite::Result<Lease> {
        Ok(Lease {
            id: row.get(0)?,
            name: row.get(1)?,
            user_id: row.get(2)?,
            project_id: row.get(3)?,
            start_date: Self::to_time(4, row.get(4)?)?,
            end_date: Self::to_time(5, row.get(5)?)?,
            trust_id: row.get(6)?,
            reservations: Vec::new(),
            events: Vec::new(),
        })
    }

    fn row_to_reservation(row: &rusqlite::Row) -> rusqlite::Result<Reservation> {
        let status: String = row.get(4)?;
        Ok(Reservation {
            id: row.get(0)?,
            lease_id: row.get(1)?,
            resource_type: row.get(2)?,
            resource_id: row.get(3)?,
            status: ReservationStatus::parse(&status)
                .ok_or_else(|| Self::invalid_text(4, &status))?,
        })
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
        let event_type: String = row.get(2)?;
        let status: String = row.get(4)?;
        Ok(Event {
            id: row.get(0)?,
            lease_id: row.get(1)?,
            event_type: EventType::from(event_type),
            time: Self::to_time(3, row.get(3)?)?,
            status: EventStatus::parse(&status).ok_or_else(|| Self::invalid_text(4, &status))?,
        })
    }

    fn load_children(&self, mut lease: Lease) -> Result<Lease, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, lease_id, resource_type, resource_id, status
             FROM reservations WHERE lease_id = ?1 ORDER BY position",
        )?;
        lease.reservations = stmt
            .query_map(params![lease.id], Self::row_to_reservation)?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT id, lease_id, event_type, time, status
             FROM events WHERE lease_id = ?1 ORDER BY time, id",
        )?;
        lease.events = stmt
            .query_map(params![lease.id], Self::row_to_event)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(lease)
    }

    fn event_exists(&self, event_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM events WHERE id = ?1", params![event_id], |_| Ok(()))
            .optional()?
            .is_some())
    }
}

impl LeaseStore for SqliteLeaseStore {
    fn create_lease(&mut self, lease: Lease) -> Result<Lease, StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO leases (id, name, user_id, project_id, start_date, end_date, trust_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                lease.id,
                lease.name,
                lease.user_id,
                lease.project_id,
                lease.start_date.timestamp_millis(),
                lease.end_date.timestamp_millis(),
                lease.trust_id,
            ],
        )?;
        for (position, r) in lease.reservations.iter().enumerate() {
            tx.execute(
                "INSERT INTO reservations (id, lease_id, position, resource_type, resource_id, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    r.id,
                    lease.id,
                    position as i64,
                    r.resource_type,
                    r.resource_id,
                    r.status.as_str(),
                ],
            )?;
        }
        for e in &lease.events {
            tx.execute(
                "INSERT INTO events (id, lease_id, event_type, time, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    e.id,
                    lease.id,
                    e.event_type.as_str(),
                    e.time.timestamp_millis(),
                    e.status.as_str(),
                ],
            )?;
        }
        tx.commit()?;

        self.get_lease(&lease.id)?
            .ok_or_else(|| StoreError::not_found("lease", lease.id))
    }

    fn get_lease(&self, lease_id: &str) -> Result<Option<Lease>, StoreError> {
        let lease = self
            .conn
            .query_row(
                &format!("SELECT {} FROM leases WHERE id = ?1", LEASE_COLUMNS),
                params![lease_id],
                Self::row_to_lease,
            )
            .optional()?;
        lease.map(|l| self.load_children(l)).transpose()
    }

    fn list_leases(&self, project_id: Option<&str>) -> Result<Vec<Lease>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM leases WHERE ?1 IS NULL OR project_id = ?1 ORDER BY id",
            LEASE_COLUMNS
        ))?;
        let leases = stmt
            .query_map(params![project_id], Self::row_to_lease)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        leases.into_iter().map(|l| self.load_children(l)).collect()
    }

    fn update_lease(&mut self, lease_id: &str, update: LeaseUpdate) -> Result<Lease, StoreError> {
        let rows = self.conn.execute(
            "UPDATE leases SET name = COALESCE(?1, name), end_date = COALESCE(?2, end_date)
             WHERE id = ?3",
            params![
                update.name,
                update.end_date.map(|d| d.timestamp_millis()),
                lease_id,
            ],
        )?;
        if rows == 0 {
            return Err(StoreError::not_found("lease", lease_id));
        }
        self.get_lease(lease_id)?
            .ok_or_else(|| StoreError::not_found("lease", lease_id))
    }

    fn destroy_lease(&mut self, lease_id: &str) -> Result<(), StoreError> {
        let rows = self
            .conn
            .execute("DELETE FROM leases WHERE id = ?1", params![lease_id])?;
        if rows == 0 {
            return Err(StoreError::not_found("lease", lease_id));
        }
        Ok(())
    }

    fn update_reservation_status(
        &mut self,
        reservation_id: &str,
        status: ReservationStatus,
    ) -> Result<(), StoreError> {
        let rows = self.conn.execute(
            "UPDATE reservations SET status = ?1 WHERE id = ?2",
            params![status.as_str(), reservation_id],
        )?;
        if rows == 0 {
            return Err(StoreError::not_found("reservation", reservation_id));
        }
        Ok(())
    }

    fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, lease_id, event_type, time, status FROM events WHERE id = ?1",
                params![event_id],
                Self::row_to_event,
            )
            .optional()?)
    }

    fn list_events(
        &self,
        filter: &EventFilter,
        direction: SortDirection,
    ) -> Result<Vec<Event>, StoreError> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if !filter.statuses.is_empty() {
            clauses.push(format!("status IN ({})", vec!["?"; filter.statuses.len()].join(", ")));
            values.extend(filter.statuses.iter().map(|s| s.as_str().to_string()));
        }
        if let Some(lease_id) = &filter.lease_id {
            clauses.push("lease_id = ?".to_string());
            values.push(lease_id.clone());
        }
        if !filter.event_types.is_empty() {
            clauses.push(format!(
                "event_type IN ({})",
                vec!["?"; filter.event_types.len()].join(", ")
            ));
            values.extend(filter.event_types.iter().map(|t| t.as_str().to_string()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let order = match direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let sql = format!(
            "SELECT id, lease_id, event_type, time, status FROM events {} ORDER BY time {}, id {}",
            where_clause, order, order
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let events = stmt
            .query_map(params_from_iter(values.iter()), Self::row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn transition_event(
        &mut self,
        event_id: &str,
        from: EventStatus,
        to: EventStatus,
    ) -> Result<bool, StoreError> {
        check_transition(event_id, from, to)?;
        let rows = self.conn.execute(
            "UPDATE events SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to.as_str(), event_id, from.as_str()],
        )?;
        if rows > 0 {
            return Ok(true);
        }
        if self.event_exists(event_id)? {
            Ok(false)
        } else {
            Err(StoreError::not_found("event", event_id))
        }
    }

    fn reschedule_event(&mut self, event_id: &str, time: DateTime<Utc>) -> Result<bool, StoreError> {
        let rows = self.conn.execute(
            "UPDATE events SET time = ?1 WHERE id = ?2 AND status = 'UNDONE'",
            params![time.timestamp_millis(), event_id],
        )?;
        if rows > 0 {
            return Ok(true);
        }
        if self.event_exists(event_id)? {
            Ok(false)
        } else {
            Err(StoreError::not_found("event", event_id))
        }
    }
}
