use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError as ChangeRecvError;
use tokio::sync::watch::error::RecvError as IdentityClosed;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::domain::SchoolRecord;
use super::status::{resolve_once, Resolution, SchoolStatus};
use crate::config::ResolverConfig;
use crate::notify::{Notice, NoticeBoard};
use crate::session::Identity;
use crate::store::{AdmissionsStore, ChangeBus, ChangeEvent, StoreError};

/// Latest resolved view of the signed-in identity's school.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolverSnapshot {
    pub status: SchoolStatus,
    pub school: Option<SchoolRecord>,
    /// Bumped each time `status` or `school` changes.
    pub revision: u64,
}

impl ResolverSnapshot {
    fn initial() -> Self {
        Self {
            status: SchoolStatus::Unresolved,
            school: None,
            revision: 0,
        }
    }
}

/// Keeps an identity's school status current.
///
/// A single loop serves every trigger: identity changes, the poll timer, explicit
/// refreshes and change-feed events for school or profile rows. Change events whose
/// sequence was already visible when the latest lookup started are skipped.
pub struct StatusResolver {
    store: Arc<dyn AdmissionsStore>,
    notices: NoticeBoard,
    changes: Option<ChangeBus>,
    poll_interval: Duration,
}

impl StatusResolver {
    pub fn new(store: Arc<dyn AdmissionsStore>, notices: NoticeBoard, config: ResolverConfig) -> Self {
        Self {
            store,
            notices,
            changes: None,
            poll_interval: config.poll_interval,
        }
    }

    pub fn with_changes(mut self, changes: ChangeBus) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Starts the loop. It runs until `cancel` fires, the handle is dropped, or the session
    /// feeding `identity` is torn down.
    pub fn spawn(
        self,
        identity: watch::Receiver<Option<Identity>>,
        cancel: CancellationToken,
    ) -> ResolverHandle {
        let (snapshot_tx, snapshot_rx) = watch::channel(ResolverSnapshot::initial());
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let changes = self.changes.as_ref().map(ChangeBus::subscribe);

        let reconcile = ReconcileLoop {
            resolver: self,
            identity,
            refresh: refresh_rx,
            changes,
            snapshot: snapshot_tx,
            cancel: cancel.clone(),
            current: None,
            covered: 0,
            generation: 0,
        };
        let task = tokio::spawn(reconcile.run());

        ResolverHandle {
            snapshot: snapshot_rx,
            refresh: refresh_tx,
            cancel,
            task: Some(task),
        }
    }
}

/// Owned by the consuming view. Dropping it cancels the loop and any in-flight lookup.
pub struct ResolverHandle {
    snapshot: watch::Receiver<ResolverSnapshot>,
    refresh: mpsc::Sender<()>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ResolverHandle {
    pub fn status(&self) -> SchoolStatus {
        self.snapshot.borrow().status
    }

    pub fn snapshot(&self) -> ResolverSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResolverSnapshot> {
        self.snapshot.clone()
    }

    /// Requests an immediate lookup. Requests made while one is queued coalesce.
    pub fn refresh(&self) {
        let _ = self.refresh.try_send(());
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "status resolver task ended abnormally");
            }
        }
    }
}

impl Drop for ResolverHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Identity,
    Poll,
    Refresh,
    Change(u64),
}

enum Wake {
    Stop,
    Skip,
    Run(Trigger),
}

enum Lookup {
    Cancelled,
    Superseded(Result<(), IdentityClosed>),
    Done(Result<Resolution, StoreError>),
}

struct ReconcileLoop {
    resolver: StatusResolver,
    identity: watch::Receiver<Option<Identity>>,
    refresh: mpsc::Receiver<()>,
    changes: Option<broadcast::Receiver<ChangeEvent>>,
    snapshot: watch::Sender<ResolverSnapshot>,
    cancel: CancellationToken,
    current: Option<Identity>,
    covered: u64,
    generation: u64,
}

impl ReconcileLoop {
    async fn run(mut self) {
        let mut ticker = time::interval(self.resolver.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.current = self.identity.borrow_and_update().clone();

        let mut carried = None;
        loop {
            let trigger = match carried.take() {
                Some(trigger) => trigger,
                None => match self.wait(&mut ticker).await {
                    Wake::Stop => break,
                    Wake::Skip => continue,
                    Wake::Run(trigger) => trigger,
                },
            };

            let Some(identity) = self.current.clone() else {
                self.publish(SchoolStatus::Unresolved, None);
                continue;
            };

            if matches!(trigger, Trigger::Identity)
                || self.snapshot.borrow().status == SchoolStatus::Unresolved
            {
                self.publish(SchoolStatus::Loading, None);
            }

            self.covered = self
                .resolver
                .changes
                .as_ref()
                .map_or(0, ChangeBus::latest_sequence);
            self.generation += 1;
            debug!(
                identity = %identity.id,
                generation = self.generation,
                ?trigger,
                "resolving school status"
            );

            let lookup = {
                let pending = resolve_once(self.resolver.store.as_ref(), &identity.id);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Lookup::Cancelled,
                    changed = self.identity.changed() => Lookup::Superseded(changed),
                    outcome = pending => Lookup::Done(outcome),
                }
            };

            match lookup {
                Lookup::Cancelled => break,
                Lookup::Superseded(Err(_)) => {
                    self.session_closed();
                    break;
                }
                Lookup::Superseded(Ok(())) => {
                    debug!(generation = self.generation, "identity changed mid-lookup; result discarded");
                    carried = Some(if self.adopt_identity() {
                        Trigger::Identity
                    } else {
                        Trigger::Refresh
                    });
                }
                Lookup::Done(Ok(resolution)) => {
                    let previous = self.snapshot.borrow().status;
                    if self.publish(resolution.status, resolution.school) && previous != resolution.status {
                        info!(
                            identity = %identity.id,
                            from = previous.label(),
                            to = resolution.status.label(),
                            "school status changed"
                        );
                        if resolution.status == SchoolStatus::Verified
                            && matches!(previous, SchoolStatus::Pending | SchoolStatus::Rejected)
                        {
                            self.resolver.notices.publish(Notice::info(
                                "School verified",
                                "Your dashboard is now available.",
                            ));
                        }
                    }
                }
                Lookup::Done(Err(err)) => {
                    warn!(identity = %identity.id, error = %err, "school status lookup failed");
                    self.resolver.notices.publish(Notice::error(
                        "Could not load school status",
                        err.to_string(),
                    ));
                }
            }
        }

        debug!("status resolver stopped");
    }

    async fn wait(&mut self, ticker: &mut Interval) -> Wake {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Wake::Stop,
            changed = self.identity.changed() => match changed {
                Ok(()) if self.adopt_identity() => Wake::Run(Trigger::Identity),
                Ok(()) => Wake::Skip,
                Err(_) => {
                    self.session_closed();
                    Wake::Stop
                }
            },
            Some(()) = self.refresh.recv() => Wake::Run(Trigger::Refresh),
            event = next_change(&mut self.changes) => self.on_change(event),
            _ = ticker.tick() => Wake::Run(Trigger::Poll),
        }
    }

    fn on_change(&mut self, event: Result<ChangeEvent, ChangeRecvError>) -> Wake {
        match event {
            Ok(event) if !event.table.affects_school_status() => Wake::Skip,
            Ok(event) if event.sequence <= self.covered => {
                debug!(sequence = event.sequence, covered = self.covered, "change already covered");
                Wake::Skip
            }
            Ok(event) => Wake::Run(Trigger::Change(event.sequence)),
            Err(ChangeRecvError::Lagged(missed)) => {
                debug!(missed, "change feed lagged; resolving");
                Wake::Run(Trigger::Refresh)
            }
            Err(ChangeRecvError::Closed) => {
                self.changes = None;
                Wake::Skip
            }
        }
    }

    /// Takes the newest identity; reports whether the subject actually changed.
    fn adopt_identity(&mut self) -> bool {
        let next = self.identity.borrow_and_update().clone();
        let changed = next.as_ref().map(|identity| &identity.id)
            != self.current.as_ref().map(|identity| &identity.id);
        self.current = next;
        changed
    }

    fn session_closed(&mut self) {
        self.current = None;
        self.publish(SchoolStatus::Unresolved, None);
    }

    fn publish(&self, status: SchoolStatus, school: Option<SchoolRecord>) -> bool {
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.status == status && snapshot.school == school {
                return false;
            }
            snapshot.status = status;
            snapshot.school = school;
            snapshot.revision += 1;
            true
        })
    }
}

async fn next_change(
    changes: &mut Option<broadcast::Receiver<ChangeEvent>>,
) -> Result<ChangeEvent, ChangeRecvError> {
    match changes {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
