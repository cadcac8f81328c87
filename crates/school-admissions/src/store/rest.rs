//! PostgREST client for the hosted backend.
//!
//! Every request carries the project's public key as `apikey`. The bearer token is the same
//! key unless the store is scoped to a signed-in user, whose access token then takes its place.
//! Single-row reads ask for `application/vnd.pgrst.object+json`, which makes the backend
//! answer `406` with code `PGRST116` when nothing matched; that response maps to
//! [`StoreError::NoRows`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{AdmissionsStore, StoreError};
use crate::applications::{ApplicationId, ApplicationRecord, ApplicationStatus};
use crate::config::BackendConfig;
use crate::schools::{SchoolId, SchoolRecord, VerificationStatus};
use crate::session::{Identity, IdentityId};

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const NO_ROWS_CODE: &str = "PGRST116";
const APPLICATION_SELECT: &str = "*,profiles(id,full_name,email)";

#[derive(Clone)]
pub struct RestStore {
    inner: Arc<RestStoreInner>,
    access_token: Option<Arc<SecretString>>,
}

struct RestStoreInner {
    client: reqwest::Client,
    base: Url,
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RestStore {
    pub fn new(config: &BackendConfig) -> Result<Self, StoreError> {
        let key = config.anon_key.expose_secret();
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(key)
                .map_err(|e| StoreError::Decode(format!("invalid API key format: {e}")))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| StoreError::Decode(format!("invalid API key format: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            inner: Arc::new(RestStoreInner {
                client,
                base: rest_base(&config.url)?,
            }),
            access_token: None,
        })
    }

    /// Shares the connection pool but authenticates as the user holding `access_token`.
    pub fn with_access_token(&self, access_token: SecretString) -> Self {
        Self {
            inner: self.inner.clone(),
            access_token: Some(Arc::new(access_token)),
        }
    }

    fn table(&self, name: &str) -> Result<Url, StoreError> {
        self.inner
            .base
            .join(name)
            .map_err(|e| StoreError::Decode(format!("invalid table path '{name}': {e}")))
    }

    fn request(&self, method: Method, table: &str) -> Result<RequestBuilder, StoreError> {
        let request = self.inner.client.request(method, self.table(table)?);
        Ok(match &self.access_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        })
    }

    fn get(&self, table: &str) -> Result<RequestBuilder, StoreError> {
        self.request(Method::GET, table)
    }

    fn patch(&self, table: &str) -> Result<RequestBuilder, StoreError> {
        self.request(Method::PATCH, table)
    }

    fn post(&self, table: &str) -> Result<RequestBuilder, StoreError> {
        self.request(Method::POST, table)
    }

    async fn single<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StoreError> {
        let response = request.header(ACCEPT, SINGLE_OBJECT).send().await?;
        decode(response).await
    }
}

#[async_trait]
impl AdmissionsStore for RestStore {
    async fn school_for_owner(&self, owner: &IdentityId) -> Result<SchoolRecord, StoreError> {
        debug!(owner = %owner, "looking up school for owner");
        let owner_filter = eq(&owner.0);
        let request = self
            .get("schools")?
            .query(&[("select", "*"), ("owner_id", owner_filter.as_str())]);
        self.single(request).await
    }

    async fn school(&self, id: &SchoolId) -> Result<SchoolRecord, StoreError> {
        let id_filter = eq(&id.0);
        let request = self
            .get("schools")?
            .query(&[("select", "*"), ("id", id_filter.as_str())]);
        self.single(request).await
    }

    async fn create_school(
        &self,
        owner: &Identity,
        name: &str,
    ) -> Result<SchoolRecord, StoreError> {
        let request = self
            .post("schools")?
            .header("Prefer", "return=representation")
            .json(&json!({
                "name": name,
                "owner_id": owner.id,
                "verification_status": VerificationStatus::Pending,
                "admissions_open": false,
            }));
        self.single(request).await
    }

    async fn set_admissions_open(
        &self,
        id: &SchoolId,
        open: bool,
    ) -> Result<SchoolRecord, StoreError> {
        let request = self
            .patch("schools")?
            .query(&[("id", eq(&id.0))])
            .header("Prefer", "return=representation")
            .json(&json!({ "admissions_open": open }));
        self.single(request).await
    }

    async fn application(&self, id: &ApplicationId) -> Result<ApplicationRecord, StoreError> {
        let id_filter = eq(&id.0);
        let request = self
            .get("applications")?
            .query(&[("select", APPLICATION_SELECT), ("id", id_filter.as_str())]);
        self.single(request).await
    }

    async fn applications_for_school(
        &self,
        id: &SchoolId,
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        let school_filter = eq(&id.0);
        let response = self
            .get("applications")?
            .query(&[
                ("select", APPLICATION_SELECT),
                ("school_id", school_filter.as_str()),
                ("order", "created_at.desc"),
            ])
            .send()
            .await?;
        decode(response).await
    }

    async fn update_application_status(
        &self,
        id: &ApplicationId,
        status: ApplicationStatus,
    ) -> Result<(), StoreError> {
        let response = self
            .patch("applications")?
            .query(&[("id", eq(&id.0))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "status": status }))
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(api_error(response).await)
    }

    fn scoped_to(&self, access_token: SecretString) -> Option<Arc<dyn AdmissionsStore>> {
        Some(Arc::new(self.with_access_token(access_token)))
    }
}

fn rest_base(url: &Url) -> Result<Url, StoreError> {
    let mut root = url.clone();
    if !root.path().ends_with('/') {
        let path = format!("{}/", root.path());
        root.set_path(&path);
    }
    root.join("rest/v1/")
        .map_err(|e| StoreError::Decode(format!("invalid backend url: {e}")))
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Decode(e.to_string()))
}

async fn api_error(response: Response) -> StoreError {
    let status = response.status().as_u16();
    let body = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return StoreError::Http(err),
    };
    classify_error(status, &body)
}

fn classify_error(status: u16, body: &[u8]) -> StoreError {
    let parsed: Option<PostgrestError> = serde_json::from_slice(body).ok();
    let code = parsed.as_ref().and_then(|error| error.code.clone());
    if code.as_deref() == Some(NO_ROWS_CODE) {
        return StoreError::NoRows;
    }

    let message = parsed
        .and_then(|error| error.message)
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    StoreError::Api {
        status,
        code,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rows_code_maps_to_absence() {
        let body = br#"{"code":"PGRST116","message":"JSON object requested, multiple (or no) rows returned","details":"The result contains 0 rows","hint":null}"#;
        assert!(classify_error(406, body).is_no_rows());
    }

    #[test]
    fn other_codes_keep_status_and_message() {
        let body = br#"{"code":"42501","message":"permission denied for table schools"}"#;
        match classify_error(401, body) {
            StoreError::Api {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 401);
                assert_eq!(code.as_deref(), Some("42501"));
                assert!(message.contains("permission denied"));
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[test]
    fn non_json_error_bodies_are_preserved() {
        match classify_error(502, b"upstream timeout") {
            StoreError::Api { message, code, .. } => {
                assert_eq!(message, "upstream timeout");
                assert!(code.is_none());
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[test]
    fn rest_base_appends_rest_path() {
        let base = rest_base(&Url::parse("https://project.example.co").expect("url")).expect("base");
        assert_eq!(base.as_str(), "https://project.example.co/rest/v1/");

        let nested =
            rest_base(&Url::parse("http://localhost:54321/proxy").expect("url")).expect("base");
        assert_eq!(nested.as_str(), "http://localhost:54321/proxy/rest/v1/");
    }

    mod wire {
        use std::sync::Mutex;

        use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
        use axum::Router;
        use secrecy::SecretString;

        use super::*;
        use crate::schools::{resolve_once, SchoolStatus};

        #[derive(Debug, Clone)]
        struct Received {
            method: Method,
            path: String,
            query: Vec<(String, String)>,
            headers: HeaderMap,
            body: String,
        }

        impl Received {
            fn param(&self, name: &str) -> Option<&str> {
                self.query
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.as_str())
            }

            fn header(&self, name: &str) -> Option<&str> {
                self.headers.get(name).and_then(|value| value.to_str().ok())
            }
        }

        struct Backend {
            url: Url,
            received: Arc<Mutex<Vec<Received>>>,
        }

        impl Backend {
            /// Answers every request with `status` and `reply`, recording what it was sent.
            async fn start(status: StatusCode, reply: &'static str) -> Self {
                let received = Arc::new(Mutex::new(Vec::new()));
                let log = received.clone();
                let app = Router::new().fallback(
                    move |method: Method, uri: Uri, headers: HeaderMap, body: String| {
                        let log = log.clone();
                        async move {
                            let query = Url::parse(&format!("http://backend{uri}"))
                                .map(|url| url.query_pairs().into_owned().collect())
                                .unwrap_or_default();
                            log.lock().expect("request log poisoned").push(Received {
                                method,
                                path: uri.path().to_string(),
                                query,
                                headers,
                                body,
                            });
                            (status, [(header::CONTENT_TYPE, "application/json")], reply)
                        }
                    },
                );

                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind stub backend");
                let addr = listener.local_addr().expect("stub address");
                tokio::spawn(async move {
                    let _ = axum::serve(listener, app).await;
                });

                Self {
                    url: Url::parse(&format!("http://{addr}")).expect("stub url"),
                    received,
                }
            }

            fn store(&self) -> RestStore {
                RestStore::new(&BackendConfig {
                    url: self.url.clone(),
                    anon_key: SecretString::from("anon-key".to_string()),
                    webhook_secret: None,
                })
                .expect("store builds")
            }

            fn only_request(&self) -> Received {
                let received = self.received.lock().expect("request log poisoned");
                assert_eq!(received.len(), 1, "expected exactly one request");
                received[0].clone()
            }
        }

        const SCHOOL_ROW: &str = r#"{"id":"s1","name":"Hillview Academy","owner_id":"u1","verification_status":"pending","admissions_open":false}"#;

        #[tokio::test]
        async fn school_lookup_filters_by_owner_and_asks_for_one_object() {
            let backend = Backend::start(StatusCode::OK, SCHOOL_ROW).await;
            let school = backend
                .store()
                .school_for_owner(&IdentityId("u1".to_string()))
                .await
                .expect("school decodes");
            assert_eq!(school.id, SchoolId("s1".to_string()));
            assert_eq!(school.verification_status, Some(VerificationStatus::Pending));

            let request = backend.only_request();
            assert_eq!(request.method, Method::GET);
            assert_eq!(request.path, "/rest/v1/schools");
            assert_eq!(request.param("owner_id"), Some("eq.u1"));
            assert_eq!(request.param("select"), Some("*"));
            assert_eq!(request.header("accept"), Some(SINGLE_OBJECT));
            assert_eq!(request.header("apikey"), Some("anon-key"));
            assert_eq!(request.header("authorization"), Some("Bearer anon-key"));
        }

        #[tokio::test]
        async fn missing_school_resolves_to_no_school() {
            let backend = Backend::start(
                StatusCode::NOT_ACCEPTABLE,
                r#"{"code":"PGRST116","message":"JSON object requested, multiple (or no) rows returned","details":"The result contains 0 rows","hint":null}"#,
            )
            .await;
            let store = backend.store();

            let err = store
                .school_for_owner(&IdentityId("u1".to_string()))
                .await
                .expect_err("no rows");
            assert!(err.is_no_rows());

            let resolution = resolve_once(&store, &IdentityId("u1".to_string()))
                .await
                .expect("absence is not an error");
            assert_eq!(resolution.status, SchoolStatus::NoSchool);
        }

        #[tokio::test]
        async fn applications_join_profiles_newest_first() {
            let backend = Backend::start(
                StatusCode::OK,
                r#"[{"id":"a1","school_id":"s1","profile_id":"u9","status":"new","created_at":"2025-03-01T09:30:00Z","profiles":{"id":"u9","full_name":"Ada Park","email":"ada@families.test"}}]"#,
            )
            .await;
            let records = backend
                .store()
                .applications_for_school(&SchoolId("s1".to_string()))
                .await
                .expect("applications decode");
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].applicant_name(), "Ada Park");

            let request = backend.only_request();
            assert_eq!(request.method, Method::GET);
            assert_eq!(request.path, "/rest/v1/applications");
            assert_eq!(request.param("select"), Some(APPLICATION_SELECT));
            assert_eq!(request.param("school_id"), Some("eq.s1"));
            assert_eq!(request.param("order"), Some("created_at.desc"));
            assert_ne!(request.header("accept"), Some(SINGLE_OBJECT));
        }

        #[tokio::test]
        async fn status_update_patches_one_row() {
            let backend = Backend::start(StatusCode::NO_CONTENT, "").await;
            backend
                .store()
                .update_application_status(
                    &ApplicationId("a1".to_string()),
                    ApplicationStatus::Accepted,
                )
                .await
                .expect("write accepted");

            let request = backend.only_request();
            assert_eq!(request.method, Method::PATCH);
            assert_eq!(request.path, "/rest/v1/applications");
            assert_eq!(request.param("id"), Some("eq.a1"));
            assert_eq!(request.header("prefer"), Some("return=minimal"));
            let body: serde_json::Value =
                serde_json::from_str(&request.body).expect("json body");
            assert_eq!(body, json!({ "status": "accepted" }));
        }

        #[tokio::test]
        async fn rejected_write_surfaces_backend_message() {
            let backend = Backend::start(
                StatusCode::FORBIDDEN,
                r#"{"code":"42501","message":"permission denied for table applications"}"#,
            )
            .await;
            let err = backend
                .store()
                .update_application_status(
                    &ApplicationId("a1".to_string()),
                    ApplicationStatus::Rejected,
                )
                .await
                .expect_err("write refused");
            assert!(matches!(err, StoreError::Api { status: 403, .. }));
        }

        #[tokio::test]
        async fn user_scoped_store_sends_access_token() {
            let backend = Backend::start(StatusCode::OK, SCHOOL_ROW).await;
            let store = backend
                .store()
                .scoped_to(SecretString::from("user-jwt".to_string()))
                .expect("rest store supports user scope");
            store
                .school_for_owner(&IdentityId("u1".to_string()))
                .await
                .expect("school decodes");

            let request = backend.only_request();
            assert_eq!(request.header("authorization"), Some("Bearer user-jwt"));
            assert_eq!(request.header("apikey"), Some("anon-key"));
        }
    }
}
