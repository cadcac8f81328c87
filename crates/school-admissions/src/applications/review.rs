use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::board::ApplicantBoard;
use super::domain::{ApplicationId, ApplicationRecord, ApplicationStatus};
use crate::store::{AdmissionsStore, StoreError};

/// Result of a status update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StatusChange {
    /// Target equals the current status; nothing was written.
    Unchanged { status: ApplicationStatus },
    Updated {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("application {0} is not on this board")]
    UnknownApplication(ApplicationId),
    #[error("status update failed: {0}")]
    Store(#[from] StoreError),
}

/// Writes administrator decisions to the backend.
///
/// There is no optimistic concurrency check and no retry: the last writer wins, and a
/// failed write leaves the board untouched for the administrator to try again.
pub struct ApplicationReviewService {
    store: Arc<dyn AdmissionsStore>,
}

impl ApplicationReviewService {
    pub fn new(store: Arc<dyn AdmissionsStore>) -> Self {
        Self { store }
    }

    /// Moves application `id` on `board` to `target`.
    ///
    /// `on_success` runs after the write lands and the board reflects it; the applicants
    /// page uses it to return to the list.
    pub async fn update_status<F>(
        &self,
        board: &mut ApplicantBoard,
        id: &ApplicationId,
        target: ApplicationStatus,
        on_success: F,
    ) -> Result<StatusChange, ReviewError>
    where
        F: FnOnce(&ApplicationRecord),
    {
        let current = board
            .get(id)
            .map(|record| record.status)
            .ok_or_else(|| ReviewError::UnknownApplication(id.clone()))?;

        if current == target {
            return Ok(StatusChange::Unchanged { status: current });
        }

        if let Err(err) = self.store.update_application_status(id, target).await {
            warn!(application = %id, to = target.label(), error = %err, "status update failed");
            return Err(err.into());
        }

        let record = board
            .set_status(id, target)
            .ok_or_else(|| ReviewError::UnknownApplication(id.clone()))?;
        info!(application = %id, from = current.label(), to = target.label(), "application status updated");
        on_success(record);

        Ok(StatusChange::Updated {
            from: current,
            to: target,
        })
    }

    /// Fetches the application and applies [`Self::update_status`] to it.
    pub async fn update_by_id(
        &self,
        id: &ApplicationId,
        target: ApplicationStatus,
    ) -> Result<(StatusChange, ApplicationRecord), ReviewError> {
        let record = match self.store.application(id).await {
            Ok(record) => record,
            Err(StoreError::NoRows) => return Err(ReviewError::UnknownApplication(id.clone())),
            Err(err) => return Err(err.into()),
        };

        let mut board = ApplicantBoard::new(record.school_id.clone(), vec![record]);
        let change = self.update_status(&mut board, id, target, |_| {}).await?;
        let updated = board
            .get(id)
            .cloned()
            .ok_or_else(|| ReviewError::UnknownApplication(id.clone()))?;
        Ok((change, updated))
    }
}
