use crate::schools::SchoolId;
use crate::store::{AdmissionsStore, StoreError};

use super::domain::{ApplicationId, ApplicationRecord, ApplicationStatus};

/// Local copy of a school's applications, as shown on the applicants page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicantBoard {
    school_id: SchoolId,
    records: Vec<ApplicationRecord>,
}

impl ApplicantBoard {
    pub fn new(school_id: SchoolId, records: Vec<ApplicationRecord>) -> Self {
        Self { school_id, records }
    }

    pub async fn load<S>(store: &S, school_id: &SchoolId) -> Result<Self, StoreError>
    where
        S: AdmissionsStore + ?Sized,
    {
        let records = store.applications_for_school(school_id).await?;
        Ok(Self::new(school_id.clone(), records))
    }

    pub fn school_id(&self) -> &SchoolId {
        &self.school_id
    }

    pub fn records(&self) -> &[ApplicationRecord] {
        &self.records
    }

    pub fn get(&self, id: &ApplicationId) -> Option<&ApplicationRecord> {
        self.records.iter().find(|record| &record.id == id)
    }

    /// Applications still waiting on a decision, oldest first.
    pub fn pending_actions(&self) -> Vec<&ApplicationRecord> {
        let mut pending: Vec<&ApplicationRecord> = self
            .records
            .iter()
            .filter(|record| record.status.awaits_decision())
            .collect();
        pending.sort_by_key(|record| record.submitted_at);
        pending
    }

    pub fn with_status(&self, status: ApplicationStatus) -> Vec<&ApplicationRecord> {
        self.records
            .iter()
            .filter(|record| record.status == status)
            .collect()
    }

    pub(crate) fn set_status(
        &mut self,
        id: &ApplicationId,
        status: ApplicationStatus,
    ) -> Option<&ApplicationRecord> {
        let record = self.records.iter_mut().find(|record| &record.id == id)?;
        record.status = status;
        Some(record)
    }
}
