//! School verification status: one-shot resolution, the reconciliation loop that keeps it
//! current, and the pending-approval watch that hands off to the dashboard.

mod domain;
mod resolver;
mod status;
mod verification;


pub use domain::{SchoolId, SchoolRecord, VerificationStatus};
pub use resolver::{ResolverHandle, ResolverSnapshot, StatusResolver};
pub use status::{resolve_once, Resolution, SchoolStatus};
pub use verification::follow_until_verified;
