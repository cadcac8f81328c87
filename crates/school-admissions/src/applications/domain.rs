use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schools::SchoolId;
use crate::session::IdentityId;

/// Identifier wrapper for submitted applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Review status of a student's application. The backend accepts exactly these four values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    New,
    Reviewed,
    Accepted,
    Rejected,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 4] = [
        ApplicationStatus::New,
        ApplicationStatus::Reviewed,
        ApplicationStatus::Accepted,
        ApplicationStatus::Rejected,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::New => "new",
            ApplicationStatus::Reviewed => "reviewed",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    /// Applications still waiting on an administrator decision.
    pub const fn awaits_decision(self) -> bool {
        matches!(self, ApplicationStatus::New | ApplicationStatus::Reviewed)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown application status '{0}'; expected new, reviewed, accepted or rejected")]
pub struct UnknownStatus(pub String);

impl FromStr for ApplicationStatus {
    type Err = UnknownStatus;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        ApplicationStatus::ALL
            .into_iter()
            .find(|status| status.label() == normalized)
            .ok_or_else(|| UnknownStatus(raw.to_string()))
    }
}

/// Profile columns joined onto an application for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantProfile {
    pub id: IdentityId,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl ApplicantProfile {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id.0)
    }
}

/// A single student's submission to a school.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub school_id: SchoolId,
    pub profile_id: IdentityId,
    pub status: ApplicationStatus,
    #[serde(rename = "created_at")]
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub essay: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(rename = "profiles", default, skip_serializing_if = "Option::is_none")]
    pub applicant: Option<ApplicantProfile>,
}

impl ApplicationRecord {
    pub fn applicant_name(&self) -> &str {
        self.applicant
            .as_ref()
            .map(ApplicantProfile::display_name)
            .unwrap_or(&self.profile_id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_labels_case_insensitively() {
        assert_eq!(
            " Accepted ".parse::<ApplicationStatus>(),
            Ok(ApplicationStatus::Accepted)
        );
        assert_eq!(
            "reviewed".parse::<ApplicationStatus>(),
            Ok(ApplicationStatus::Reviewed)
        );
        assert!("waitlisted".parse::<ApplicationStatus>().is_err());
    }

    #[test]
    fn decodes_backend_row_with_joined_profile() {
        let row = serde_json::json!({
            "id": "a1",
            "school_id": "s1",
            "profile_id": "u9",
            "status": "new",
            "created_at": "2025-03-01T09:30:00Z",
            "essay": "I love robotics.",
            "profiles": { "id": "u9", "full_name": "Ada Park", "email": "ada@example.com" }
        });

        let record: ApplicationRecord = serde_json::from_value(row).expect("row decodes");
        assert_eq!(record.status, ApplicationStatus::New);
        assert_eq!(record.applicant_name(), "Ada Park");
        assert!(record.notes.is_none());
    }

    #[test]
    fn applicant_name_falls_back_to_profile_id() {
        let row = serde_json::json!({
            "id": "a2",
            "school_id": "s1",
            "profile_id": "u10",
            "status": "reviewed",
            "created_at": "2025-03-02T10:00:00Z"
        });

        let record: ApplicationRecord = serde_json::from_value(row).expect("row decodes");
        assert_eq!(record.applicant_name(), "u10");
    }
}
