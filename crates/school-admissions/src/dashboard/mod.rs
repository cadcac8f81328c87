pub mod admissions;
pub mod analytics;

pub use admissions::{AdmissionsSettings, AdmissionsToggle};
pub use analytics::{summarize, AdmissionsSummary, DailySubmissions};
