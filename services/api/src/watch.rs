use clap::Args;
use school_admissions::config::AppConfig;
use school_admissions::error::AppError;
use school_admissions::navigation::{AppRoute, Navigator};
use school_admissions::notify::NoticeBoard;
use school_admissions::schools::{follow_until_verified, StatusResolver};
use school_admissions::session::{Identity, SessionContext};
use school_admissions::store::RestStore;
use school_admissions::telemetry;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Args, Debug)]
pub(crate) struct WatchArgs {
    /// Identity id of the school administrator
    #[arg(long)]
    pub(crate) identity: String,
    /// Email shown alongside status updates
    #[arg(long)]
    pub(crate) email: Option<String>,
}

struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn navigate(&self, route: AppRoute) {
        println!("-> navigating to {}", route.path());
    }
}

pub(crate) async fn run_watch(args: WatchArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let identity = Identity::new(args.identity, args.email.unwrap_or_default());
    println!(
        "Watching school verification for {} (polling every {}s)",
        identity.id,
        config.resolver.poll_interval.as_secs()
    );

    let store = Arc::new(RestStore::new(&config.backend)?);
    let notices = NoticeBoard::default();
    let mut notice_rx = notices.subscribe();
    let session = SessionContext::signed_in(identity);
    let cancel = CancellationToken::new();
    let handle = StatusResolver::new(store, notices, config.resolver)
        .spawn(session.subscribe(), cancel.clone());

    let mut snapshots = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = snapshots.borrow_and_update().status;
                    println!("status: {}", status.label());
                }
                notice = notice_rx.recv() => match notice {
                    Ok(notice) => println!("{}: {}", notice.title, notice.detail),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for interrupt");
            return;
        }
        interrupt.cancel();
    });

    let verified = follow_until_verified(handle.subscribe(), &ConsoleNavigator, &cancel).await;

    handle.shutdown().await;
    session.shutdown();
    if let Err(err) = printer.await {
        warn!(error = %err, "status printer ended abnormally");
    }

    if verified {
        println!("School verified; the dashboard is unlocked.");
    } else {
        println!("Stopped before the school was verified.");
    }
    Ok(())
}
