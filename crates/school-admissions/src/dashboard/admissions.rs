//! Admissions settings page: whether the school is currently taking applications.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::schools::{SchoolId, SchoolRecord};
use crate::store::{AdmissionsStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdmissionsToggle {
    Unchanged { school: SchoolRecord },
    Updated { school: SchoolRecord },
}

pub struct AdmissionsSettings {
    store: Arc<dyn AdmissionsStore>,
}

impl AdmissionsSettings {
    pub fn new(store: Arc<dyn AdmissionsStore>) -> Self {
        Self { store }
    }

    /// Opens or closes admissions. Reads the current row first and skips the write when
    /// the flag already matches.
    pub async fn set_open(
        &self,
        school: &SchoolId,
        open: bool,
    ) -> Result<AdmissionsToggle, StoreError> {
        let current = self.store.school(school).await?;
        if current.admissions_open == open {
            return Ok(AdmissionsToggle::Unchanged { school: current });
        }

        let updated = self.store.set_admissions_open(school, open).await?;
        info!(school = %updated.id.0, open, "admissions flag updated");
        Ok(AdmissionsToggle::Updated { school: updated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schools::VerificationStatus;
    use crate::session::IdentityId;
    use crate::store::MemoryStore;

    fn store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_school(SchoolRecord {
            id: SchoolId("s1".to_string()),
            name: "Hillview".to_string(),
            owner_id: IdentityId("u1".to_string()),
            verification_status: Some(VerificationStatus::Verified),
            admissions_open: false,
        });
        store
    }

    #[tokio::test]
    async fn opening_closed_admissions_writes() {
        let settings = AdmissionsSettings::new(store());
        let toggle = settings
            .set_open(&SchoolId("s1".to_string()), true)
            .await
            .expect("toggle succeeds");
        match toggle {
            AdmissionsToggle::Updated { school } => assert!(school.admissions_open),
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn matching_flag_is_a_no_op() {
        let settings = AdmissionsSettings::new(store());
        let toggle = settings
            .set_open(&SchoolId("s1".to_string()), false)
            .await
            .expect("toggle succeeds");
        assert!(matches!(toggle, AdmissionsToggle::Unchanged { .. }));
    }

    #[tokio::test]
    async fn unknown_school_reports_no_rows() {
        let settings = AdmissionsSettings::new(store());
        let err = settings
            .set_open(&SchoolId("missing".to_string()), true)
            .await
            .expect_err("no such school");
        assert!(err.is_no_rows());
    }
}
