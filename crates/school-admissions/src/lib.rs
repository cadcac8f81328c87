//! Admissions back office: school verification onboarding, applicant review and the
//! supporting dashboards, backed by a hosted database reached over PostgREST.

pub mod applications;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod navigation;
pub mod notify;
pub mod schools;
pub mod session;
pub mod store;
pub mod telemetry;
