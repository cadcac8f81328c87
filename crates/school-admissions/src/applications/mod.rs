//! Applicant list, status review and export for a school's administrators.

mod board;
pub mod domain;
mod export;
mod review;

#[cfg(test)]
mod tests;

pub use board::ApplicantBoard;
pub use domain::{
    ApplicantProfile, ApplicationId, ApplicationRecord, ApplicationStatus, UnknownStatus,
};
pub use export::{export_csv, ExportError};
pub use review::{ApplicationReviewService, ReviewError, StatusChange};
