use chrono::{Duration as Days, TimeZone, Utc};
use clap::Args;
use school_admissions::applications::{
    export_csv, ApplicantBoard, ApplicantProfile, ApplicationId, ApplicationRecord,
    ApplicationReviewService, ApplicationStatus, StatusChange,
};
use school_admissions::config::ResolverConfig;
use school_admissions::dashboard::summarize;
use school_admissions::error::AppError;
use school_admissions::navigation::{gate, AppRoute, DashboardPage, GateDecision, Navigator};
use school_admissions::notify::NoticeBoard;
use school_admissions::schools::{
    follow_until_verified, ResolverSnapshot, SchoolId, SchoolStatus, StatusResolver,
    VerificationStatus,
};
use school_admissions::session::{Identity, IdentityId, SessionContext};
use school_admissions::store::{AdmissionsStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const STEP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Seconds between status polls while waiting for approval
    #[arg(long, default_value_t = 1)]
    pub(crate) poll_secs: u64,
}

struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn navigate(&self, route: AppRoute) {
        println!("  -> navigating to {}", route.path());
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    println!("School admissions demo");

    // No change feed: approval is only noticed by polling.
    let store = Arc::new(MemoryStore::new());
    let session = SessionContext::new();
    let cancel = CancellationToken::new();
    let handle = StatusResolver::new(
        store.clone(),
        NoticeBoard::default(),
        ResolverConfig {
            poll_interval: Duration::from_secs(args.poll_secs.max(1)),
        },
    )
    .spawn(session.subscribe(), cancel.clone());
    let mut snapshots = handle.subscribe();

    let overview = AppRoute::Dashboard(DashboardPage::Overview);
    println!("\nOnboarding");
    render_gate(&overview, handle.status());

    let admin = Identity::new("admin-hillview", "principal@hillview.test");
    println!("- {} signs in", admin.email);
    session.sign_in(admin.clone());
    if !reach(&mut snapshots, SchoolStatus::NoSchool).await {
        println!("  Status never settled; stopping");
        return Ok(());
    }
    render_gate(&overview, handle.status());

    let school = store.create_school(&admin, "Hillview Academy").await?;
    println!("- Registered {} ({})", school.name, school.id);
    handle.refresh();
    if !reach(&mut snapshots, SchoolStatus::Pending).await {
        println!("  Status never settled; stopping");
        return Ok(());
    }
    render_gate(&overview, handle.status());

    println!(
        "- Waiting on the pending approval page (polling every {}s)",
        args.poll_secs.max(1)
    );
    let approver = {
        let store = store.clone();
        let school_id = school.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            println!("  Reviewer verifies the school out of band");
            store.set_verification(&school_id, Some(VerificationStatus::Verified))
        })
    };
    let verified = tokio::time::timeout(
        STEP_TIMEOUT,
        follow_until_verified(handle.subscribe(), &ConsoleNavigator, &cancel),
    )
    .await
    .unwrap_or(false);
    match approver.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => println!("  Verification failed: {err}"),
        Err(err) => println!("  Reviewer task failed: {err}"),
    }
    if !verified {
        println!("  School was not verified in time; stopping");
        return Ok(());
    }
    render_gate(&overview, handle.status());

    handle.shutdown().await;
    session.shutdown();

    review_applicants(store, &school.id).await
}

async fn review_applicants(store: Arc<MemoryStore>, school_id: &SchoolId) -> Result<(), AppError> {
    println!("\nApplicant review");
    let opened = Utc
        .with_ymd_and_hms(2025, 1, 6, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let applicants = [
        ("a-1", "Maya Chen", ApplicationStatus::New),
        ("a-2", "Jonah Alvarez", ApplicationStatus::Reviewed),
        ("a-3", "Priya Nair", ApplicationStatus::Rejected),
    ];
    for (offset, (id, name, status)) in applicants.into_iter().enumerate() {
        let profile_id = IdentityId(format!("parent-{id}"));
        store.insert_application(ApplicationRecord {
            id: ApplicationId(id.to_string()),
            school_id: school_id.clone(),
            profile_id: profile_id.clone(),
            status,
            submitted_at: opened + Days::days(offset as i64),
            essay: None,
            notes: None,
            applicant: Some(ApplicantProfile {
                id: profile_id,
                full_name: Some(name.to_string()),
                email: None,
            }),
        });
    }

    let mut board = ApplicantBoard::load(store.as_ref(), school_id).await?;
    println!("- {} applications loaded", board.records().len());
    for record in board.pending_actions() {
        println!(
            "  - awaiting decision: {} ({})",
            record.applicant_name(),
            record.status
        );
    }

    let service = ApplicationReviewService::new(store.clone());
    let target = ApplicationId("a-1".to_string());
    let change = service
        .update_status(&mut board, &target, ApplicationStatus::Accepted, |record| {
            println!(
                "  Accepted {}; returning to the applicant list",
                record.applicant_name()
            );
        })
        .await?;
    describe(&target, change);

    let change = service
        .update_status(&mut board, &target, ApplicationStatus::Accepted, |_| {
            println!("  (unexpected) callback on unchanged status");
        })
        .await?;
    describe(&target, change);
    println!("- Status writes issued: {}", store.status_writes());

    let summary = summarize(board.records());
    println!("\nAnalytics");
    for (status, count) in &summary.by_status {
        println!("- {status}: {count}");
    }
    println!("- awaiting decision: {}", summary.awaiting_decision);
    match summary.acceptance_rate {
        Some(rate) => println!("- acceptance rate: {:.0}%", rate * 100.0),
        None => println!("- acceptance rate: no decisions yet"),
    }

    println!("\nCSV export");
    print!("{}", export_csv(&board)?);
    Ok(())
}

fn describe(id: &ApplicationId, change: StatusChange) {
    match change {
        StatusChange::Updated { from, to } => println!("- {id}: {from} -> {to}"),
        StatusChange::Unchanged { status } => {
            println!("- {id}: already {status}; nothing written")
        }
    }
}

fn render_gate(route: &AppRoute, status: SchoolStatus) {
    let outcome = match gate(route, status) {
        GateDecision::Render => "render".to_string(),
        GateDecision::Wait => "wait".to_string(),
        GateDecision::Redirect(to) => format!("redirect to {}", to.path()),
    };
    println!(
        "  [{}] {} -> {}",
        status.label(),
        route.path(),
        outcome
    );
}

async fn reach(snapshots: &mut watch::Receiver<ResolverSnapshot>, status: SchoolStatus) -> bool {
    let wait = async {
        loop {
            if snapshots.borrow_and_update().status == status {
                return true;
            }
            if snapshots.changed().await.is_err() {
                return false;
            }
        }
    };
    tokio::time::timeout(STEP_TIMEOUT, wait).await.unwrap_or(false)
}
