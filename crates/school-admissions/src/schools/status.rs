use serde::{Deserialize, Serialize};

use super::domain::{SchoolRecord, VerificationStatus};
use crate::session::IdentityId;
use crate::store::{AdmissionsStore, StoreError};

/// Where an identity stands in onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchoolStatus {
    /// No identity yet.
    Unresolved,
    Loading,
    NoSchool,
    Pending,
    Verified,
    Rejected,
}

impl SchoolStatus {
    /// Whether a lookup has produced an answer for the current identity.
    pub const fn is_settled(self) -> bool {
        !matches!(self, SchoolStatus::Unresolved | SchoolStatus::Loading)
    }

    pub const fn label(self) -> &'static str {
        match self {
            SchoolStatus::Unresolved => "unresolved",
            SchoolStatus::Loading => "loading",
            SchoolStatus::NoSchool => "no-school",
            SchoolStatus::Pending => "pending",
            SchoolStatus::Verified => "verified",
            SchoolStatus::Rejected => "rejected",
        }
    }

    /// Rows written before verification existed carry no status; they are still awaiting review.
    pub fn of(record: &SchoolRecord) -> Self {
        match record.verification_status {
            Some(VerificationStatus::Verified) => SchoolStatus::Verified,
            Some(VerificationStatus::Rejected) => SchoolStatus::Rejected,
            Some(VerificationStatus::Pending) | None => SchoolStatus::Pending,
        }
    }
}

/// Outcome of a single successful lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub status: SchoolStatus,
    pub school: Option<SchoolRecord>,
}

impl Resolution {
    fn found(school: SchoolRecord) -> Self {
        Self {
            status: SchoolStatus::of(&school),
            school: Some(school),
        }
    }

    fn absent() -> Self {
        Self {
            status: SchoolStatus::NoSchool,
            school: None,
        }
    }
}

/// Looks up the school owned by `owner`. Idempotent; "no rows" is absence, not failure.
pub async fn resolve_once<S>(store: &S, owner: &IdentityId) -> Result<Resolution, StoreError>
where
    S: AdmissionsStore + ?Sized,
{
    match store.school_for_owner(owner).await {
        Ok(school) => Ok(Resolution::found(school)),
        Err(StoreError::NoRows) => Ok(Resolution::absent()),
        Err(err) => Err(err),
    }
}
