#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use crate::error::StoreError;
    use crate::infrastructure::{EventFilter, LeaseStore, SortDirection};
    use crate::infrastructure_in_memory::InMemoryLeaseStore;
    use crate::test_support::at;
    use crate::types::{
        EventStatus, EventType, Lease, LeaseUpdate, ReservationRequest, ReservationStatus,
    };

    fn lease(project: &str, start: &str, end: &str) -> Lease {
        Lease::new(
            "l".to_string(),
            "alice".to_string(),
            project.to_string(),
            at(start),
            at(end),
            "trust-1".to_string(),
            vec![
                ReservationRequest {
                    resource_type: "virtual:instance".to_string(),
                    resource_id: "vm-1".to_string(),
                },
                ReservationRequest {
                    resource_type: "virtual:instance".to_string(),
                    resource_id: "vm-2".to_string(),
                },
            ],
        )
    }

    fn exercise_lease_roundtrip(store: &mut dyn LeaseStore) {
        let created = store
            .create_lease(lease("p1", "2030-01-01 10:00", "2030-01-01 12:00"))
            .unwrap();

        let fetched = store.get_lease(&created.id).unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.reservations.len(), 2);
        assert_eq!(fetched.reservations[0].resource_id, "vm-1");
        assert_eq!(fetched.reservations[1].resource_id, "vm-2");
        assert!(fetched
            .reservations
            .iter()
            .all(|r| r.status == ReservationStatus::Pending));
        assert_eq!(fetched.events.len(), 2);

        let renamed = store
            .update_lease(
                &created.id,
                LeaseUpdate {
                    name: Some("renamed".to_string()),
                    end_date: None,
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "renamed");
        assert_eq!(renamed.end_date, created.end_date);

        store
            .update_reservation_status(&created.reservations[0].id, ReservationStatus::Active)
            .unwrap();
        let fetched = store.get_lease(&created.id).unwrap().unwrap();
        assert_eq!(fetched.reservations[0].status, ReservationStatus::Active);
        assert_eq!(fetched.reservations[1].status, ReservationStatus::Pending);

        store.destroy_lease(&created.id).unwrap();
        assert!(store.get_lease(&created.id).unwrap().is_none());
        assert!(store
            .list_events(&EventFilter::default(), SortDirection::Asc)
            .unwrap()
            .is_empty());
        assert!(matches!(
            store.destroy_lease(&created.id),
            Err(StoreError::NotFound { .. })
        ));
    }

    fn exercise_duplicates(store: &mut dyn LeaseStore) {
        let original = lease("p1", "2030-01-01 10:00", "2030-01-01 12:00");
        store.create_lease(original.clone()).unwrap();
        assert!(matches!(
            store.create_lease(original),
            Err(StoreError::Duplicate(_))
        ));
    }

    fn exercise_event_ordering_and_filters(store: &mut dyn LeaseStore) {
        let late = store
            .create_lease(lease("p1", "2030-01-02 10:00", "2030-01-02 12:00"))
            .unwrap();
        let early = store
            .create_lease(lease("p2", "2030-01-01 10:00", "2030-01-01 12:00"))
            .unwrap();

        let undone = store
            .list_events(&EventFilter::with_status(EventStatus::Undone), SortDirection::Asc)
            .unwrap();
        let times: Vec<_> = undone.iter().map(|e| e.time).collect();
        assert_eq!(
            times,
            vec![
                at("2030-01-01 10:00"),
                at("2030-01-01 12:00"),
                at("2030-01-02 10:00"),
                at("2030-01-02 12:00"),
            ]
        );

        let desc = store
            .list_events(&EventFilter::default(), SortDirection::Desc)
            .unwrap();
        assert_eq!(desc[0].time, at("2030-01-02 12:00"));

        let end_of_late = store
            .list_events(
                &EventFilter {
                    lease_id: Some(late.id.clone()),
                    event_types: vec![EventType::EndLease],
                    ..EventFilter::default()
                },
                SortDirection::Asc,
            )
            .unwrap();
        assert_eq!(end_of_late.len(), 1);
        assert_eq!(end_of_late[0].lease_id, late.id);

        assert_eq!(store.list_leases(Some("p2")).unwrap(), vec![early]);
        assert_eq!(store.list_leases(None).unwrap().len(), 2);
    }

    fn exercise_transitions(store: &mut dyn LeaseStore) {
        let created = store
            .create_lease(lease("p1", "2030-01-01 10:00", "2030-01-01 12:00"))
            .unwrap();
        let start = created.event(&EventType::StartLease).unwrap().clone();

        assert!(store
            .transition_event(&start.id, EventStatus::Undone, EventStatus::InProgress)
            .unwrap());
        // Already claimed: a second claim loses
        assert!(!store
            .transition_event(&start.id, EventStatus::Undone, EventStatus::InProgress)
            .unwrap());
        assert!(matches!(
            store.transition_event(&start.id, EventStatus::InProgress, EventStatus::Undone),
            Err(StoreError::InvalidTransition { .. })
        ));
        assert!(store
            .transition_event(&start.id, EventStatus::InProgress, EventStatus::Done)
            .unwrap());
        assert_eq!(
            store.get_event(&start.id).unwrap().unwrap().status,
            EventStatus::Done
        );
        assert!(matches!(
            store.transition_event("nope", EventStatus::Undone, EventStatus::InProgress),
            Err(StoreError::NotFound { .. })
        ));

        // Rescheduling only touches UNDONE events
        let end = created.event(&EventType::EndLease).unwrap().clone();
        let later = end.time + TimeDelta::hours(1);
        assert!(store.reschedule_event(&end.id, later).unwrap());
        assert_eq!(store.get_event(&end.id).unwrap().unwrap().time, later);
        assert!(!store.reschedule_event(&start.id, later).unwrap());
    }

    #[test]
    fn test_in_memory_lease_roundtrip() {
        exercise_lease_roundtrip(&mut InMemoryLeaseStore::new());
    }

    #[test]
    fn test_in_memory_rejects_duplicates() {
        exercise_duplicates(&mut InMemoryLeaseStore::new());
    }

    #[test]
    fn test_in_memory_event_ordering_and_filters() {
        exercise_event_ordering_and_filters(&mut InMemoryLeaseStore::new());
    }

    #[test]
    fn test_in_memory_event_transitions() {
        exercise_transitions(&mut InMemoryLeaseStore::new());
    }

    #[cfg(feature = "sqlite")]
    mod sqlite {
        use super::*;
        use crate::infrastructure_sqlite::SqliteLeaseStore;

        fn store() -> SqliteLeaseStore {
            SqliteLeaseStore::open(":memory:").unwrap()
        }

        #[test]
        fn test_sqlite_lease_roundtrip() {
            exercise_lease_roundtrip(&mut store());
        }

        #[test]
        fn test_sqlite_rejects_duplicates() {
            exercise_duplicates(&mut store());
        }

        #[test]
        fn test_sqlite_event_ordering_and_filters() {
            exercise_event_ordering_and_filters(&mut store());
        }

        #[test]
        fn test_sqlite_event_transitions() {
            exercise_transitions(&mut store());
        }

        #[test]
        fn test_sqlite_persists_across_reopen() {
            let dir = std::env::temp_dir().join(format!("lessor-{}.db", nanoid::nanoid!()));
            let path = dir.to_string_lossy().to_string();

            let created = {
                let mut store = SqliteLeaseStore::open(&path).unwrap();
                store
                    .create_lease(lease("p1", "2030-01-01 10:00", "2030-01-01 12:00"))
                    .unwrap()
            };

            let reopened = SqliteLeaseStore::open(&path).unwrap();
            assert_eq!(reopened.get_lease(&created.id).unwrap(), Some(created));

            drop(reopened);
            let _ = std::fs::remove_file(&path);
        }
    }
}
