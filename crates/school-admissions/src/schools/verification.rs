use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::resolver::ResolverSnapshot;
use super::status::SchoolStatus;
use crate::navigation::{AppRoute, DashboardPage, Navigator};

/// Backs the pending-approval page: waits for the school to be verified and then navigates
/// to the dashboard exactly once.
///
/// Returns `false` without navigating when `cancel` fires or the resolver stops first.
pub async fn follow_until_verified(
    mut snapshots: watch::Receiver<ResolverSnapshot>,
    navigator: &dyn Navigator,
    cancel: &CancellationToken,
) -> bool {
    let verified = tokio::select! {
        _ = cancel.cancelled() => false,
        reached = reach_verified(&mut snapshots) => reached,
    };

    if verified {
        let destination = AppRoute::Dashboard(DashboardPage::Overview);
        info!(path = destination.path(), "school verified; leaving pending approval");
        navigator.navigate(destination);
    }
    verified
}

async fn reach_verified(snapshots: &mut watch::Receiver<ResolverSnapshot>) -> bool {
    loop {
        if snapshots.borrow_and_update().status == SchoolStatus::Verified {
            return true;
        }
        if snapshots.changed().await.is_err() {
            return false;
        }
    }
}
