//! HTTP client for the external credential authority.
//!
//! # Architecture
//!
//! The crate is organized around a single seam:
//!
//! - [`AuthorityClient`] - the interface the issuance coordinator calls
//! - [`HttpAuthorityClient`] - the production implementation over the
//!   authority's REST API
//! - [`retry`] - bounded exponential backoff shared by all authority calls
//!
//! The authority deduplicates issuance by the (learner, course) pair: a
//! repeat request for an already-issued credential returns
//! `already_issued` together with the existing credential, which callers
//! must treat as success. [`AuthorityClient::find`] queries by the same pair
//! without side effects; the coordinator uses it to reconcile claims whose
//! outcome is unknown (process crashed mid-call).
//!
//! # Error Handling
//!
//! Transient failures (connect, timeout, HTTP 408/429/5xx) are retried up to
//! the configured bound and then surface as [`AuthorityError::Unavailable`].
//! Hard rejections (other 4xx, or an explicit failure payload) surface as
//! [`AuthorityError::Rejected`] without retry.

pub mod retry;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use learnova_config::AuthorityConfig;
use learnova_types::{EnrollmentKey, IssuedCredential};

/// Issuance endpoint, relative to the authority base URL.
pub const ISSUE_PATH: &str = "/internal/issue-certificate";
/// Idempotency lookup endpoint, relative to the authority base URL.
pub const CERTIFICATE_LOOKUP_PATH: &str = "/internal/certificates";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY_CHARS: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    #[error("failed to build authority HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("invalid authority endpoint: {0}")]
    Endpoint(url::ParseError),
    #[error("credential authority unreachable after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },
    #[error("credential authority rejected the request: {reason}")]
    Rejected { reason: String },
    #[error("credential authority returned an unusable response: {detail}")]
    InvalidResponse { detail: String },
}

impl AuthorityError {
    /// Whether a later manual retry could plausibly succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, AuthorityError::Unavailable { .. })
    }
}

/// Metadata sent with an issuance request.
///
/// Field names follow the authority's wire format (camelCase).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub user_id: String,
    pub course_id: String,
    pub course_name: String,
    pub learner_name: String,
    pub grade: String,
    pub duration_hours: f64,
    pub modules: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Successful result of an issuance call.
#[derive(Debug, Clone)]
pub enum IssueOutcome {
    /// The authority issued a new credential.
    Issued(IssuedCredential),
    /// The authority had already issued one for this (learner, course) pair
    /// and returned it instead. Treated as success.
    AlreadyIssued(IssuedCredential),
}

impl IssueOutcome {
    #[must_use]
    pub fn into_credential(self) -> IssuedCredential {
        match self {
            IssueOutcome::Issued(c) | IssueOutcome::AlreadyIssued(c) => c,
        }
    }

    #[must_use]
    pub const fn was_already_issued(&self) -> bool {
        matches!(self, IssueOutcome::AlreadyIssued(_))
    }
}

/// Interface to the external credential authority.
///
/// `issue` performs the (side-effecting) issuance call; `find` is the
/// side-effect-free idempotency lookup by enrollment key.
pub trait AuthorityClient: Send + Sync {
    fn issue(
        &self,
        request: &IssueRequest,
    ) -> impl Future<Output = Result<IssueOutcome, AuthorityError>> + Send;

    fn find(
        &self,
        key: &EnrollmentKey,
    ) -> impl Future<Output = Result<Option<IssuedCredential>, AuthorityError>> + Send;
}

/// Wire shape shared by the issuance and lookup responses.
#[derive(Debug, Deserialize)]
struct WireResponse {
    status: String,
    #[serde(default)]
    cert_id: Option<String>,
    #[serde(default)]
    verify_url: Option<String>,
    #[serde(default)]
    proof_url: Option<String>,
    #[serde(default)]
    tx_hash: Option<String>,
    #[serde(default)]
    issued_on: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl WireResponse {
    fn into_credential(self) -> Result<IssuedCredential, AuthorityError> {
        let credential_id = self.cert_id.ok_or_else(|| AuthorityError::InvalidResponse {
            detail: format!("{:?} response is missing cert_id", self.status),
        })?;
        Ok(IssuedCredential {
            credential_id,
            verify_url: self.verify_url,
            proof_url: self.proof_url,
            chain_reference: self.tx_hash,
            issued_on: self.issued_on.as_deref().and_then(parse_issued_on),
        })
    }
}

/// Production [`AuthorityClient`] over the authority's REST API.
#[derive(Debug, Clone)]
pub struct HttpAuthorityClient {
    client: reqwest::Client,
    config: AuthorityConfig,
    retry: retry::RetryConfig,
}

impl HttpAuthorityClient {
    pub fn new(config: AuthorityConfig) -> Result<Self, AuthorityError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::none());
        // Plain http stays possible for local authorities; anything remote
        // is expected to be https and is then enforced as such.
        if config.base_url().scheme() == "https" {
            builder = builder.https_only(true);
        }
        let client = builder.build().map_err(AuthorityError::Client)?;

        let retry = retry::RetryConfig {
            max_retries: config.max_retries(),
            ..retry::RetryConfig::default()
        };
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    /// Override the retry policy (tests use millisecond backoff).
    #[must_use]
    pub fn with_retry_config(mut self, retry: retry::RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthorityError> {
        self.config
            .base_url()
            .join(path)
            .map_err(AuthorityError::Endpoint)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key() {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn fail_from_http(
        attempts: u32,
        response: reqwest::Response,
    ) -> AuthorityError {
        let status = response.status();
        let body = read_capped_body(response).await;
        let reason = extract_error_reason(&body)
            .unwrap_or_else(|| format!("HTTP {status}"));
        if retry::is_transient_status(status) {
            AuthorityError::Unavailable { attempts, reason }
        } else {
            AuthorityError::Rejected { reason }
        }
    }

    async fn parse_body(response: reqwest::Response) -> Result<WireResponse, AuthorityError> {
        let body = response
            .text()
            .await
            .map_err(|e| AuthorityError::InvalidResponse {
                detail: format!("failed to read response body: {e}"),
            })?;
        serde_json::from_str(&body).map_err(|e| AuthorityError::InvalidResponse {
            detail: format!("failed to parse response body: {e}"),
        })
    }
}

impl AuthorityClient for HttpAuthorityClient {
    async fn issue(&self, request: &IssueRequest) -> Result<IssueOutcome, AuthorityError> {
        let url = self.endpoint(ISSUE_PATH)?;
        tracing::info!(
            learner = %request.user_id,
            course = %request.course_id,
            "requesting credential issuance"
        );

        let outcome = retry::send_with_retry(
            || self.authorize(self.client.post(url.clone())).json(request),
            &self.retry,
        )
        .await;

        let response = match outcome {
            retry::RetryOutcome::Success(response) => response,
            retry::RetryOutcome::HttpError { attempts, response } => {
                return Err(Self::fail_from_http(attempts, response).await);
            }
            retry::RetryOutcome::Transport { attempts, source } => {
                return Err(AuthorityError::Unavailable {
                    attempts,
                    reason: source.to_string(),
                });
            }
        };

        let wire = Self::parse_body(response).await?;
        let status = wire.status.clone();
        match status.as_str() {
            "success" => Ok(IssueOutcome::Issued(wire.into_credential()?)),
            "already_issued" => Ok(IssueOutcome::AlreadyIssued(wire.into_credential()?)),
            other => Err(AuthorityError::Rejected {
                reason: wire
                    .error
                    .unwrap_or_else(|| format!("authority reported status {other:?}")),
            }),
        }
    }

    async fn find(
        &self,
        key: &EnrollmentKey,
    ) -> Result<Option<IssuedCredential>, AuthorityError> {
        let mut url = self.endpoint(CERTIFICATE_LOOKUP_PATH)?;
        url.query_pairs_mut()
            .append_pair("userId", key.learner.as_str())
            .append_pair("courseId", key.course.as_str());

        let outcome =
            retry::send_with_retry(|| self.authorize(self.client.get(url.clone())), &self.retry)
                .await;

        let response = match outcome {
            retry::RetryOutcome::Success(response) => response,
            retry::RetryOutcome::HttpError { response, .. }
                if response.status() == reqwest::StatusCode::NOT_FOUND =>
            {
                return Ok(None);
            }
            retry::RetryOutcome::HttpError { attempts, response } => {
                return Err(Self::fail_from_http(attempts, response).await);
            }
            retry::RetryOutcome::Transport { attempts, source } => {
                return Err(AuthorityError::Unavailable {
                    attempts,
                    reason: source.to_string(),
                });
            }
        };

        let wire = Self::parse_body(response).await?;
        let status = wire.status.clone();
        match status.as_str() {
            "issued" | "success" | "already_issued" => Ok(Some(wire.into_credential()?)),
            "not_found" => Ok(None),
            other => Err(AuthorityError::InvalidResponse {
                detail: format!("unexpected lookup status {other:?}"),
            }),
        }
    }
}

/// Parse the authority's issuance timestamp.
///
/// Accepts RFC 3339 and the naive ISO 8601 form (no offset) some authority
/// deployments emit; naive timestamps are taken as UTC.
fn parse_issued_on(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

async fn read_capped_body(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY_CHARS {
        let mut cut = MAX_ERROR_BODY_CHARS;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...(truncated)");
    }
    body
}

/// Pull a human-readable reason out of an error body, if it is JSON with one
/// of the conventional fields.
fn extract_error_reason(body: &str) -> Option<String> {
    let payload: serde_json::Value = serde_json::from_str(body).ok()?;
    for pointer in ["/error", "/detail", "/message"] {
        if let Some(reason) = payload.pointer(pointer).and_then(|v| v.as_str()) {
            return Some(reason.to_string());
        }
    }
    None
}


#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use learnova_types::{CourseId, LearnerId};

    fn client_for(server: &MockServer) -> HttpAuthorityClient {
        let config = AuthorityConfig::new(&server.uri()).unwrap();
        HttpAuthorityClient::new(config)
            .unwrap()
            .with_retry_config(retry::RetryConfig {
                max_retries: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                jitter_factor: 0.0,
            })
    }

    fn request() -> IssueRequest {
        IssueRequest {
            user_id: "u1".to_string(),
            course_id: "c1".to_string(),
            course_name: "Intro to Rust".to_string(),
            learner_name: "Ada".to_string(),
            grade: "Pass".to_string(),
            duration_hours: 4.0,
            modules: 3,
            metadata: None,
        }
    }

    fn key() -> EnrollmentKey {
        EnrollmentKey::new(
            LearnerId::new("u1").unwrap(),
            CourseId::new("c1").unwrap(),
        )
    }

    #[tokio::test]
    async fn issue_success_maps_credential_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ISSUE_PATH))
            .and(body_partial_json(serde_json::json!({
                "userId": "u1",
                "courseId": "c1",
                "grade": "Pass",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "cert_id": "CERT-1",
                "verify_url": "https://verify.example/?certId=CERT-1",
                "proof_url": "https://ipfs.example/proof",
                "tx_hash": "0xabc",
                "issued_on": "2026-08-08T10:00:00Z",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server).issue(&request()).await.unwrap();
        assert!(!outcome.was_already_issued());
        let credential = outcome.into_credential();
        assert_eq!(credential.credential_id, "CERT-1");
        assert_eq!(credential.chain_reference.as_deref(), Some("0xabc"));
        assert!(credential.issued_on.is_some());
    }

    #[tokio::test]
    async fn already_issued_is_success_with_existing_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ISSUE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "already_issued",
                "cert_id": "CERT-OLD",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server).issue(&request()).await.unwrap();
        assert!(outcome.was_already_issued());
        assert_eq!(outcome.into_credential().credential_id, "CERT-OLD");
    }

    #[tokio::test]
    async fn hard_rejection_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ISSUE_PATH))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(serde_json::json!({"detail": "grade missing"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).issue(&request()).await.unwrap_err();
        assert!(!err.is_transient());
        match err {
            AuthorityError::Rejected { reason } => assert_eq!(reason, "grade missing"),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_failure_then_success_issues() {
        let server = MockServer::start().await;
        let attempt = AtomicU32::new(0);
        Mock::given(method("POST"))
            .and(path(ISSUE_PATH))
            .respond_with(move |_: &wiremock::Request| {
                if attempt.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({
                        "status": "success",
                        "cert_id": "CERT-2",
                    }))
                }
            })
            .expect(2)
            .mount(&server)
            .await;

        let outcome = client_for(&server).issue(&request()).await.unwrap();
        assert_eq!(outcome.into_credential().credential_id, "CERT-2");
    }

    #[tokio::test]
    async fn exhausted_retries_surface_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ISSUE_PATH))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server).issue(&request()).await.unwrap_err();
        match err {
            AuthorityError::Unavailable { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected Unavailable, got {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn failed_status_in_success_response_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ISSUE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "failed",
                "error": "ledger write refused",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).issue(&request()).await.unwrap_err();
        match err {
            AuthorityError::Rejected { reason } => {
                assert_eq!(reason, "ledger write refused");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn find_returns_existing_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CERTIFICATE_LOOKUP_PATH))
            .and(query_param("userId", "u1"))
            .and(query_param("courseId", "c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "issued",
                "cert_id": "CERT-7",
                "verify_url": "https://verify.example/?certId=CERT-7",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let found = client_for(&server).find(&key()).await.unwrap();
        assert_eq!(found.unwrap().credential_id, "CERT-7");
    }

    #[tokio::test]
    async fn find_maps_404_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CERTIFICATE_LOOKUP_PATH))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let found = client_for(&server).find(&key()).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn api_key_is_sent_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ISSUE_PATH))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "cert_id": "CERT-3",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = AuthorityConfig::new(&server.uri())
            .unwrap()
            .with_api_key("sekrit");
        let client = HttpAuthorityClient::new(config).unwrap();
        let outcome = client.issue(&request()).await.unwrap();
        assert_eq!(outcome.into_credential().credential_id, "CERT-3");
    }
}
