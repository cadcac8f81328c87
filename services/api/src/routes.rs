use crate::infra::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use school_admissions::applications::{
    export_csv, ApplicantBoard, ApplicationId, ApplicationRecord, ApplicationReviewService,
    ApplicationStatus, StatusChange,
};
use school_admissions::dashboard::{summarize, AdmissionsSettings, AdmissionsSummary, AdmissionsToggle};
use school_admissions::error::AppError;
use school_admissions::navigation::{gate, AppRoute, GateDecision};
use school_admissions::notify::{Notice, NoticeBoard, NoticeLevel};
use school_admissions::schools::{
    resolve_once, ResolverSnapshot, SchoolId, SchoolRecord, SchoolStatus, StatusResolver,
};
use school_admissions::session::{Identity, IdentityId, SessionContext};
use school_admissions::store::{ChangeEvent, ChangeTable};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_WAIT_SECS: u64 = 25;
const MIN_WAIT_SECS: u64 = 1;
const MAX_WAIT_SECS: u64 = 60;
const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Debug, Deserialize)]
pub(crate) struct OnboardingQuery {
    #[serde(default)]
    pub(crate) path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WaitQuery {
    #[serde(default)]
    pub(crate) path: Option<String>,
    /// Status the caller already shows; the request returns once it differs.
    #[serde(default)]
    pub(crate) known: Option<SchoolStatus>,
    #[serde(default)]
    pub(crate) timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OnboardingView {
    pub(crate) identity_id: IdentityId,
    pub(crate) status: SchoolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) school: Option<SchoolRecord>,
    pub(crate) route: AppRoute,
    pub(crate) decision: GateDecision,
    /// Latest lookup failure seen while the status was already settled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) notice: Option<Notice>,
}

impl OnboardingView {
    fn new(
        identity_id: IdentityId,
        status: SchoolStatus,
        school: Option<SchoolRecord>,
        path: Option<&str>,
    ) -> Self {
        let route = AppRoute::parse(path.unwrap_or("/dashboard"));
        let decision = gate(&route, status);
        Self {
            identity_id,
            status,
            school,
            route,
            decision,
            notice: None,
        }
    }

    fn with_notice(mut self, notice: Option<Notice>) -> Self {
        self.notice = notice;
        self
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ApplicantsResponse {
    pub(crate) school_id: SchoolId,
    pub(crate) pending_actions: Vec<ApplicationId>,
    pub(crate) applications: Vec<ApplicationRecord>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusUpdateRequest {
    pub(crate) status: ApplicationStatus,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusUpdateResponse {
    pub(crate) change: StatusChange,
    pub(crate) application: ApplicationRecord,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdmissionsRequest {
    pub(crate) open: bool,
}

/// Database webhook payload announcing a row change.
#[derive(Debug, Deserialize)]
pub(crate) struct ChangeWebhook {
    pub(crate) table: ChangeTable,
    #[serde(default)]
    pub(crate) record: Option<Value>,
    #[serde(default)]
    pub(crate) old_record: Option<Value>,
}

impl ChangeWebhook {
    fn record_id(&self) -> Option<String> {
        [&self.record, &self.old_record]
            .into_iter()
            .flatten()
            .find_map(|row| match row.get("id") {
                Some(Value::String(id)) => Some(id.clone()),
                Some(Value::Number(id)) => Some(id.to_string()),
                _ => None,
            })
    }
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/onboarding/:identity_id", get(onboarding_endpoint))
        .route(
            "/api/v1/onboarding/:identity_id/wait",
            get(onboarding_wait_endpoint),
        )
        .route(
            "/api/v1/schools/:school_id/applications",
            get(applicants_endpoint),
        )
        .route(
            "/api/v1/schools/:school_id/applications/export",
            get(export_endpoint),
        )
        .route(
            "/api/v1/schools/:school_id/analytics",
            get(analytics_endpoint),
        )
        .route(
            "/api/v1/schools/:school_id/admissions",
            put(admissions_endpoint),
        )
        .route("/api/v1/applications/:application_id", get(application_endpoint))
        .route(
            "/api/v1/applications/:application_id/status",
            put(status_endpoint),
        )
        .route("/api/v1/changes", post(change_webhook_endpoint))
        .with_state(state)
}

pub(crate) async fn healthcheck() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn onboarding_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(identity_id): Path<String>,
    Query(query): Query<OnboardingQuery>,
) -> Result<Json<OnboardingView>, AppError> {
    let identity_id = IdentityId(identity_id);
    let store = state.store_for(&headers);
    let resolution = resolve_once(store.as_ref(), &identity_id).await?;
    Ok(Json(OnboardingView::new(
        identity_id,
        resolution.status,
        resolution.school,
        query.path.as_deref(),
    )))
}

/// Long poll backing the pending-approval page. A resolver lives only as long as the
/// request: it is cancelled when the answer is ready, the wait times out, or the client
/// disconnects and the handler future is dropped.
///
/// A lookup failure before any status has settled ends the wait with `502` and the
/// resolver's notice as the body.
pub(crate) async fn onboarding_wait_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(identity_id): Path<String>,
    Query(query): Query<WaitQuery>,
) -> Result<Json<OnboardingView>, (StatusCode, Json<Notice>)> {
    let identity = Identity::new(identity_id, String::new());
    let identity_id = identity.id.clone();
    let session = SessionContext::signed_in(identity);
    let notices = NoticeBoard::default();
    let mut notice_rx = notices.subscribe();
    let handle = StatusResolver::new(state.store_for(&headers), notices, state.resolver)
        .with_changes(state.changes.clone())
        .spawn(session.subscribe(), CancellationToken::new());

    let mut snapshots = handle.subscribe();
    let mut last_error = None;
    let outcome = tokio::time::timeout(
        wait_duration(query.timeout_secs),
        settle(&mut snapshots, &mut notice_rx, query.known, &mut last_error),
    )
    .await;

    let snapshot = handle.snapshot();
    handle.shutdown().await;
    session.shutdown();

    if let Ok(Err(notice)) = outcome {
        warn!(identity = %identity_id, detail = %notice.detail, "onboarding wait failed");
        return Err((StatusCode::BAD_GATEWAY, Json(notice)));
    }

    info!(
        identity = %identity_id,
        status = snapshot.status.label(),
        settled = outcome.is_ok(),
        "onboarding wait finished"
    );
    Ok(Json(
        OnboardingView::new(
            identity_id,
            snapshot.status,
            snapshot.school,
            query.path.as_deref(),
        )
        .with_notice(last_error),
    ))
}

fn wait_duration(timeout_secs: Option<u64>) -> Duration {
    Duration::from_secs(
        timeout_secs
            .unwrap_or(DEFAULT_WAIT_SECS)
            .clamp(MIN_WAIT_SECS, MAX_WAIT_SECS),
    )
}

/// Returns once the status settles on something other than `known`. Errors with the
/// failure notice when a lookup fails while nothing has settled yet; later failures are
/// kept in `last_error` and the wait goes on.
async fn settle(
    snapshots: &mut watch::Receiver<ResolverSnapshot>,
    notices: &mut broadcast::Receiver<Notice>,
    known: Option<SchoolStatus>,
    last_error: &mut Option<Notice>,
) -> Result<(), Notice> {
    loop {
        let status = snapshots.borrow_and_update().status;
        if status.is_settled() && Some(status) != known {
            return Ok(());
        }

        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) if notice.level == NoticeLevel::Error => {
                    if !snapshots.borrow().status.is_settled() {
                        return Err(notice);
                    }
                    *last_error = Some(notice);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

pub(crate) async fn applicants_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(school_id): Path<String>,
) -> Result<Json<ApplicantsResponse>, AppError> {
    let store = state.store_for(&headers);
    let board = ApplicantBoard::load(store.as_ref(), &SchoolId(school_id)).await?;
    let pending_actions = board
        .pending_actions()
        .into_iter()
        .map(|record| record.id.clone())
        .collect();

    Ok(Json(ApplicantsResponse {
        school_id: board.school_id().clone(),
        pending_actions,
        applications: board.records().to_vec(),
    }))
}

pub(crate) async fn export_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(school_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.store_for(&headers);
    let board = ApplicantBoard::load(store.as_ref(), &SchoolId(school_id)).await?;
    let csv = export_csv(&board)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        csv,
    ))
}

pub(crate) async fn analytics_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(school_id): Path<String>,
) -> Result<Json<AdmissionsSummary>, AppError> {
    let records = state
        .store_for(&headers)
        .applications_for_school(&SchoolId(school_id))
        .await?;
    Ok(Json(summarize(&records)))
}

pub(crate) async fn admissions_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(school_id): Path<String>,
    Json(request): Json<AdmissionsRequest>,
) -> Result<Json<AdmissionsToggle>, AppError> {
    let toggle = AdmissionsSettings::new(state.store_for(&headers))
        .set_open(&SchoolId(school_id), request.open)
        .await?;
    Ok(Json(toggle))
}

pub(crate) async fn application_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Result<Json<ApplicationRecord>, AppError> {
    let record = state
        .store_for(&headers)
        .application(&ApplicationId(application_id))
        .await?;
    Ok(Json(record))
}

pub(crate) async fn status_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<StatusUpdateResponse>, AppError> {
    let (change, application) = ApplicationReviewService::new(state.store_for(&headers))
        .update_by_id(&ApplicationId(application_id), request.status)
        .await?;
    Ok(Json(StatusUpdateResponse {
        change,
        application,
    }))
}

pub(crate) async fn change_webhook_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChangeWebhook>,
) -> Result<(StatusCode, Json<ChangeEvent>), (StatusCode, Json<Value>)> {
    if let Some(secret) = &state.webhook_secret {
        let presented = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if presented != Some(secret.expose_secret()) {
            warn!(table = ?payload.table, "change webhook rejected: bad or missing secret");
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "change webhook secret missing or invalid" })),
            ));
        }
    }

    let Some(record_id) = payload.record_id() else {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "change payload carries no record id" })),
        ));
    };

    let event = state.changes.publish(payload.table, record_id);
    Ok((StatusCode::ACCEPTED, Json(event)))
}
