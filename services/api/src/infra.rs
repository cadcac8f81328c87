use axum::http::{header, HeaderMap};
use chrono::{Duration, TimeZone, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use school_admissions::applications::{
    ApplicantProfile, ApplicationId, ApplicationRecord, ApplicationStatus,
};
use school_admissions::config::ResolverConfig;
use school_admissions::schools::{SchoolId, SchoolRecord, VerificationStatus};
use school_admissions::session::IdentityId;
use school_admissions::store::{AdmissionsStore, ChangeBus, MemoryStore};
use secrecy::SecretString;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub(crate) const VERIFIED_SCHOOL: &str = "school-hillview";
pub(crate) const VERIFIED_OWNER: &str = "admin-hillview";
pub(crate) const PENDING_SCHOOL: &str = "school-lakeside";
pub(crate) const PENDING_OWNER: &str = "admin-lakeside";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) store: Arc<dyn AdmissionsStore>,
    pub(crate) changes: ChangeBus,
    pub(crate) resolver: ResolverConfig,
    pub(crate) webhook_secret: Option<Arc<SecretString>>,
}

impl AppState {
    pub(crate) fn new(
        store: Arc<dyn AdmissionsStore>,
        changes: ChangeBus,
        resolver: ResolverConfig,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            readiness: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(metrics),
            store,
            changes,
            resolver,
            webhook_secret: None,
        }
    }

    pub(crate) fn with_webhook_secret(mut self, secret: Option<SecretString>) -> Self {
        self.webhook_secret = secret.map(Arc::new);
        self
    }

    /// Store acting for the caller: scoped to their access token when the request carries one.
    pub(crate) fn store_for(&self, headers: &HeaderMap) -> Arc<dyn AdmissionsStore> {
        bearer_token(headers)
            .and_then(|token| self.store.scoped_to(token))
            .unwrap_or_else(|| self.store.clone())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<SecretString> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| SecretString::from(token.to_string()))
}

/// Two schools, one verified with a handful of applicants and one still awaiting review.
pub(crate) fn sample_store(changes: ChangeBus) -> MemoryStore {
    let store = MemoryStore::new().with_changes(changes);
    store.insert_school(SchoolRecord {
        id: SchoolId(VERIFIED_SCHOOL.to_string()),
        name: "Hillview Academy".to_string(),
        owner_id: IdentityId(VERIFIED_OWNER.to_string()),
        verification_status: Some(VerificationStatus::Verified),
        admissions_open: true,
    });
    store.insert_school(SchoolRecord {
        id: SchoolId(PENDING_SCHOOL.to_string()),
        name: "Lakeside Preparatory".to_string(),
        owner_id: IdentityId(PENDING_OWNER.to_string()),
        verification_status: Some(VerificationStatus::Pending),
        admissions_open: false,
    });

    let applicants = [
        ("a-1001", "Maya Chen", ApplicationStatus::New),
        ("a-1002", "Jonah Alvarez", ApplicationStatus::Reviewed),
        ("a-1003", "Priya Nair", ApplicationStatus::Accepted),
        ("a-1004", "Theo Brooks", ApplicationStatus::Rejected),
        ("a-1005", "Amara Okafor", ApplicationStatus::New),
    ];
    let opened = Utc
        .with_ymd_and_hms(2025, 1, 6, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);

    for (offset, (id, name, status)) in applicants.into_iter().enumerate() {
        let profile_id = IdentityId(format!("parent-{id}"));
        store.insert_application(ApplicationRecord {
            id: ApplicationId(id.to_string()),
            school_id: SchoolId(VERIFIED_SCHOOL.to_string()),
            profile_id: profile_id.clone(),
            status,
            submitted_at: opened + Duration::days(offset as i64),
            essay: Some(format!("{name} is excited to join Hillview.")),
            notes: None,
            applicant: Some(ApplicantProfile {
                id: profile_id,
                full_name: Some(name.to_string()),
                email: Some(format!("{id}@families.test")),
            }),
        });
    }

    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use secrecy::ExposeSecret;

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer  "));
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer user-jwt"));
        let token = bearer_token(&headers).expect("token parsed");
        assert_eq!(token.expose_secret(), "user-jwt");
    }
}
