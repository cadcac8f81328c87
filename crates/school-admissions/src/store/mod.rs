//! Boundary to the hosted backend that owns profiles, schools and applications.
//!
//! Persistence, uniqueness and row-level security live on the other side of this trait.
//! The only error distinction callers rely on is [`StoreError::NoRows`], which signals
//! absence rather than failure.

mod changes;
mod memory;
mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::applications::{ApplicationId, ApplicationRecord, ApplicationStatus};
use crate::schools::{SchoolId, SchoolRecord};
use crate::session::{Identity, IdentityId};

pub use changes::{ChangeBus, ChangeEvent, ChangeTable};
pub use memory::MemoryStore;
pub use rest::RestStore;

/// Reads and writes issued against the backend tables.
#[async_trait]
pub trait AdmissionsStore: Send + Sync {
    /// School owned by `owner`; [`StoreError::NoRows`] when the owner has none.
    async fn school_for_owner(&self, owner: &IdentityId) -> Result<SchoolRecord, StoreError>;

    async fn school(&self, id: &SchoolId) -> Result<SchoolRecord, StoreError>;

    /// Registers a new school for `owner`; it starts out pending verification.
    async fn create_school(&self, owner: &Identity, name: &str)
        -> Result<SchoolRecord, StoreError>;

    async fn set_admissions_open(
        &self,
        id: &SchoolId,
        open: bool,
    ) -> Result<SchoolRecord, StoreError>;

    async fn application(&self, id: &ApplicationId) -> Result<ApplicationRecord, StoreError>;

    /// Applications for a school, newest first.
    async fn applications_for_school(
        &self,
        id: &SchoolId,
    ) -> Result<Vec<ApplicationRecord>, StoreError>;

    /// Unconditional write; the last writer wins.
    async fn update_application_status(
        &self,
        id: &ApplicationId,
        status: ApplicationStatus,
    ) -> Result<(), StoreError>;

    /// Handle that issues requests as the user holding `access_token`, so row-level
    /// security sees that user. Stores without per-user credentials return `None`.
    fn scoped_to(&self, _access_token: SecretString) -> Option<Arc<dyn AdmissionsStore>> {
        None
    }
}

/// Error enumeration for backend failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no rows matched the query")]
    NoRows,
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend rejected the request ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("unexpected backend payload: {0}")]
    Decode(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_no_rows(&self) -> bool {
        matches!(self, StoreError::NoRows)
    }
}
