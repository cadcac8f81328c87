use std::sync::Arc;

use chrono::{TimeZone, Utc};

use crate::applications::domain::{
    ApplicantProfile, ApplicationId, ApplicationRecord, ApplicationStatus,
};
use crate::applications::ApplicantBoard;
use crate::schools::SchoolId;
use crate::session::IdentityId;
use crate::store::MemoryStore;

pub(super) fn school_id() -> SchoolId {
    SchoolId("s1".to_string())
}

pub(super) fn application(id: &str, status: ApplicationStatus, day: u32) -> ApplicationRecord {
    ApplicationRecord {
        id: ApplicationId(id.to_string()),
        school_id: school_id(),
        profile_id: IdentityId(format!("parent-{id}")),
        status,
        submitted_at: Utc
            .with_ymd_and_hms(2025, 3, day, 9, 0, 0)
            .single()
            .expect("valid timestamp"),
        essay: Some("Why our family chose this school.".to_string()),
        notes: None,
        applicant: Some(ApplicantProfile {
            id: IdentityId(format!("parent-{id}")),
            full_name: Some(format!("Applicant {id}")),
            email: Some(format!("{id}@family.test")),
        }),
    }
}

pub(super) fn seeded_store(records: &[ApplicationRecord]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for record in records {
        store.insert_application(record.clone());
    }
    store
}

pub(super) fn board(records: Vec<ApplicationRecord>) -> ApplicantBoard {
    ApplicantBoard::new(school_id(), records)
}
