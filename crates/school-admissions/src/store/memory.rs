use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{AdmissionsStore, ChangeBus, ChangeTable, StoreError};
use crate::applications::{ApplicationId, ApplicationRecord, ApplicationStatus};
use crate::schools::{SchoolId, SchoolRecord, VerificationStatus};
use crate::session::{Identity, IdentityId};

/// In-process stand-in for the hosted backend.
///
/// Writes are announced on the attached [`ChangeBus`] after they are applied, the same
/// ordering a database change feed gives. Counters and fault injection let callers
/// observe exactly which requests were issued.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    changes: Option<ChangeBus>,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct MemoryState {
    schools: HashMap<SchoolId, SchoolRecord>,
    applications: HashMap<ApplicationId, ApplicationRecord>,
}

#[derive(Default)]
struct Counters {
    pending_faults: AtomicUsize,
    school_lookups: AtomicUsize,
    status_writes: AtomicUsize,
    school_sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_changes(mut self, changes: ChangeBus) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn insert_school(&self, school: SchoolRecord) {
        self.state().schools.insert(school.id.clone(), school);
    }

    pub fn insert_application(&self, application: ApplicationRecord) {
        self.state()
            .applications
            .insert(application.id.clone(), application);
    }

    /// Out-of-band review decision, as an operator would record it in the backend console.
    pub fn set_verification(
        &self,
        id: &SchoolId,
        status: Option<VerificationStatus>,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.state();
            let school = state.schools.get_mut(id).ok_or(StoreError::NoRows)?;
            school.verification_status = status;
        }
        self.announce(ChangeTable::Schools, &id.0);
        Ok(())
    }

    /// Makes the next `count` requests of any kind fail as if the backend were down.
    pub fn fail_next(&self, count: usize) {
        self.counters
            .pending_faults
            .store(count, Ordering::SeqCst);
    }

    pub fn school_lookups(&self) -> usize {
        self.counters.school_lookups.load(Ordering::SeqCst)
    }

    pub fn status_writes(&self) -> usize {
        self.counters.status_writes.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_fault(&self) -> Result<(), StoreError> {
        let injected = self
            .counters
            .pending_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();

        if injected {
            Err(StoreError::Unavailable("injected fault".to_string()))
        } else {
            Ok(())
        }
    }

    fn announce(&self, table: ChangeTable, record_id: &str) {
        if let Some(changes) = &self.changes {
            changes.publish(table, record_id);
        }
    }
}

#[async_trait]
impl AdmissionsStore for MemoryStore {
    async fn school_for_owner(&self, owner: &IdentityId) -> Result<SchoolRecord, StoreError> {
        self.counters.school_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_fault()?;
        self.state()
            .schools
            .values()
            .find(|school| &school.owner_id == owner)
            .cloned()
            .ok_or(StoreError::NoRows)
    }

    async fn school(&self, id: &SchoolId) -> Result<SchoolRecord, StoreError> {
        self.check_fault()?;
        self.state()
            .schools
            .get(id)
            .cloned()
            .ok_or(StoreError::NoRows)
    }

    async fn create_school(
        &self,
        owner: &Identity,
        name: &str,
    ) -> Result<SchoolRecord, StoreError> {
        self.check_fault()?;
        let record = {
            let mut state = self.state();
            if state.schools.values().any(|school| school.owner_id == owner.id) {
                return Err(StoreError::Api {
                    status: 409,
                    code: Some("23505".to_string()),
                    message: format!("owner {} already registered a school", owner.id),
                });
            }

            let sequence = self.counters.school_sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let record = SchoolRecord {
                id: SchoolId(format!("school-{sequence:04}")),
                name: name.to_string(),
                owner_id: owner.id.clone(),
                verification_status: Some(VerificationStatus::Pending),
                admissions_open: false,
            };
            state.schools.insert(record.id.clone(), record.clone());
            record
        };

        self.announce(ChangeTable::Schools, &record.id.0);
        Ok(record)
    }

    async fn set_admissions_open(
        &self,
        id: &SchoolId,
        open: bool,
    ) -> Result<SchoolRecord, StoreError> {
        self.check_fault()?;
        let record = {
            let mut state = self.state();
            let school = state.schools.get_mut(id).ok_or(StoreError::NoRows)?;
            school.admissions_open = open;
            school.clone()
        };

        self.announce(ChangeTable::Schools, &id.0);
        Ok(record)
    }

    async fn application(&self, id: &ApplicationId) -> Result<ApplicationRecord, StoreError> {
        self.check_fault()?;
        self.state()
            .applications
            .get(id)
            .cloned()
            .ok_or(StoreError::NoRows)
    }

    async fn applications_for_school(
        &self,
        id: &SchoolId,
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        self.check_fault()?;
        let mut records: Vec<ApplicationRecord> = self
            .state()
            .applications
            .values()
            .filter(|application| &application.school_id == id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(records)
    }

    async fn update_application_status(
        &self,
        id: &ApplicationId,
        status: ApplicationStatus,
    ) -> Result<(), StoreError> {
        self.counters.status_writes.fetch_add(1, Ordering::SeqCst);
        self.check_fault()?;
        {
            // A filtered PATCH that matches nothing still succeeds upstream.
            let mut state = self.state();
            if let Some(application) = state.applications.get_mut(id) {
                application.status = status;
            }
        }

        self.announce(ChangeTable::Applications, &id.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn school(owner: &str) -> SchoolRecord {
        SchoolRecord {
            id: SchoolId("s1".to_string()),
            name: "Northside Academy".to_string(),
            owner_id: IdentityId(owner.to_string()),
            verification_status: Some(VerificationStatus::Pending),
            admissions_open: true,
        }
    }

    #[tokio::test]
    async fn missing_owner_reports_no_rows() {
        let store = MemoryStore::new();
        store.insert_school(school("u1"));

        let err = store
            .school_for_owner(&IdentityId("u2".to_string()))
            .await
            .expect_err("no school for u2");
        assert!(err.is_no_rows());
        assert_eq!(store.school_lookups(), 1);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let store = MemoryStore::new();
        store.insert_school(school("u1"));
        store.fail_next(1);

        let owner = IdentityId("u1".to_string());
        assert!(matches!(
            store.school_for_owner(&owner).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.school_for_owner(&owner).await.is_ok());
    }

    #[tokio::test]
    async fn verification_change_is_announced() {
        let bus = ChangeBus::default();
        let mut rx = bus.subscribe();
        let store = MemoryStore::new().with_changes(bus);
        store.insert_school(school("u1"));

        store
            .set_verification(&SchoolId("s1".to_string()), Some(VerificationStatus::Verified))
            .expect("school exists");

        let event = rx.recv().await.expect("event published");
        assert_eq!(event.table, ChangeTable::Schools);
        assert_eq!(event.record_id, "s1");
    }

    #[tokio::test]
    async fn second_school_for_same_owner_conflicts() {
        let store = MemoryStore::new();
        let owner = Identity::new("u1", "owner@school.test");

        let created = store
            .create_school(&owner, "Lakeside Prep")
            .await
            .expect("first school created");
        assert_eq!(
            created.verification_status,
            Some(VerificationStatus::Pending)
        );

        match store.create_school(&owner, "Again").await {
            Err(StoreError::Api { status: 409, .. }) => {}
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
