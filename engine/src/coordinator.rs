//! Credential issuance coordination.
//!
//! At-most-once issuance under concurrent triggers is enforced by a
//! compare-and-swap claim on the credential status: of N near-simultaneous
//! callers, exactly one transitions the record to `pending` and talks to the
//! authority; the rest observe [`EngineError::IssuanceInProgress`] and make
//! no network call. The (learner, course) key is the only mutual-exclusion
//! boundary -- unrelated enrollments never contend.
//!
//! A claim is never left dangling: the winning caller either persists a
//! terminal outcome (`issued` or `failed`), or -- if its future is dropped
//! mid-call -- a guard downgrades the claim to `failed` so the record stays
//! retryable. Claims that still end up stuck in `pending` (process crash)
//! are resolved by [`CredentialIssuanceCoordinator::reconcile_stale_pending`],
//! which re-queries the authority by the idempotency key instead of blindly
//! re-submitting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use learnova_authority::{AuthorityClient, IssueRequest};
use learnova_store::{CasOutcome, EnrollmentStore};
use learnova_types::{
    CredentialRecord, CredentialStatus, Enrollment, EnrollmentKey, PassThreshold,
};

use crate::errors::EngineError;
use crate::events::{EngineEvent, EventSink};
use crate::evaluator;

/// Course and learner metadata carried in the issuance request.
///
/// Supplied by the caller: display names come from the identity provider and
/// course catalog, which this engine does not own.
#[derive(Debug, Clone)]
pub struct IssuanceContext {
    pub course_name: String,
    pub learner_name: String,
    pub duration_hours: f64,
    pub metadata: Option<serde_json::Value>,
}

/// How one stale `pending` enrollment was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The authority had the credential: the crashed call had landed.
    Issued { credential_id: String },
    /// The authority had nothing: the crashed call never landed.
    Failed,
    /// The authority could not be reached; the record stays `pending` for a
    /// later pass.
    Indeterminate,
}

/// Serializes issuance per enrollment key and talks to the authority.
pub struct CredentialIssuanceCoordinator<A> {
    store: Arc<EnrollmentStore>,
    authority: A,
    pass_threshold: PassThreshold,
    events: EventSink,
}

impl<A: AuthorityClient> CredentialIssuanceCoordinator<A> {
    #[must_use]
    pub fn new(
        store: Arc<EnrollmentStore>,
        authority: A,
        pass_threshold: PassThreshold,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            authority,
            pass_threshold,
            events,
        }
    }

    /// Issue the completion credential if the enrollment is fully complete
    /// and no credential exists yet.
    ///
    /// Idempotent against an already-issued record (returns it unchanged)
    /// and safe under concurrent invocation: losers of the claim return
    /// [`EngineError::IssuanceInProgress`] without any authority call. A
    /// failed issuance leaves module and completion state untouched and the
    /// record retryable.
    pub async fn issue_credential_if_eligible(
        &self,
        key: &EnrollmentKey,
        context: &IssuanceContext,
    ) -> Result<CredentialRecord, EngineError> {
        let enrollment = self
            .store
            .get(key)?
            .ok_or_else(|| EngineError::UnknownEnrollment(key.clone()))?;

        if enrollment.credential.status == CredentialStatus::Issued {
            return Ok(enrollment.credential);
        }
        if !evaluator::is_complete(&enrollment) {
            return Err(EngineError::NotEligible {
                completion: evaluator::evaluate(&enrollment),
            });
        }

        // Claim: none/failed -> pending. Exactly one concurrent caller wins.
        let claimed = self.store.compare_and_swap(
            key,
            &[CredentialStatus::None, CredentialStatus::Failed],
            CredentialStatus::Pending,
            |_| {},
        )?;
        let enrollment = match claimed {
            CasOutcome::Swapped(enrollment) => enrollment,
            CasOutcome::Lost {
                actual: CredentialStatus::Issued,
            } => {
                // Raced with a caller that already finished successfully.
                let current = self
                    .store
                    .get(key)?
                    .ok_or_else(|| EngineError::UnknownEnrollment(key.clone()))?;
                return Ok(current.credential);
            }
            CasOutcome::Lost { actual } => {
                tracing::debug!(%key, actual = actual.as_str(), "issuance claim lost");
                return Err(EngineError::IssuanceInProgress);
            }
        };

        let guard = ClaimGuard::new(Arc::clone(&self.store), key.clone());
        let request = self.build_request(&enrollment, context);
        let result = self.authority.issue(&request).await;

        match result {
            Ok(outcome) => {
                if outcome.was_already_issued() {
                    tracing::info!(%key, "authority already held a credential; adopting it");
                }
                let credential = outcome.into_credential();
                let credential_id = credential.credential_id.clone();
                let updated = self.store.compare_and_swap(
                    key,
                    &[CredentialStatus::Pending],
                    CredentialStatus::Issued,
                    |e| e.credential.mark_issued(credential),
                )?;
                guard.disarm();

                self.events.emit(EngineEvent::CredentialIssued {
                    key: key.clone(),
                    credential_id: credential_id.clone(),
                });
                tracing::info!(%key, %credential_id, "credential issued");

                match updated {
                    CasOutcome::Swapped(enrollment) => Ok(enrollment.credential),
                    CasOutcome::Lost { .. } => {
                        // The claim was downgraded underneath us (e.g. by a
                        // reconciliation pass). The store is authoritative.
                        let current = self
                            .store
                            .get(key)?
                            .ok_or_else(|| EngineError::UnknownEnrollment(key.clone()))?;
                        Ok(current.credential)
                    }
                }
            }
            Err(err) => {
                let reason = err.to_string();
                let updated = self.store.compare_and_swap(
                    key,
                    &[CredentialStatus::Pending],
                    CredentialStatus::Failed,
                    |e| e.credential.mark_failed(reason.as_str()),
                )?;
                guard.disarm();

                let retry_count = match &updated {
                    CasOutcome::Swapped(enrollment) => enrollment.credential.retry_count,
                    CasOutcome::Lost { .. } => 0,
                };
                self.events.emit(EngineEvent::CredentialFailed {
                    key: key.clone(),
                    reason: reason.clone(),
                    retry_count,
                });
                tracing::warn!(%key, %reason, retry_count, "credential issuance failed");
                Err(err.into())
            }
        }
    }

    /// Resolve enrollments stuck in `pending` for longer than
    /// `staleness_window` (the issuing process crashed mid-call).
    ///
    /// The outcome of the crashed call is unknown, so each record is
    /// reconciled against the authority's idempotency lookup before anything
    /// else: `issued` if the credential exists, `failed` if it does not.
    /// A fresh `issue()` is never submitted here.
    pub async fn reconcile_stale_pending(
        &self,
        staleness_window: Duration,
    ) -> Result<Vec<(EnrollmentKey, ReconcileOutcome)>, EngineError> {
        let window = chrono::Duration::from_std(staleness_window)
            .map_err(|_| EngineError::Validation("staleness window too large".to_string()))?;
        let cutoff = Utc::now() - window;
        let keys = self.store.stale_pending(cutoff)?;

        let mut resolved = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = match self.authority.find(&key).await {
                Ok(Some(credential)) => {
                    let credential_id = credential.credential_id.clone();
                    self.store.compare_and_swap(
                        &key,
                        &[CredentialStatus::Pending],
                        CredentialStatus::Issued,
                        |e| e.credential.mark_issued(credential),
                    )?;
                    self.events.emit(EngineEvent::CredentialIssued {
                        key: key.clone(),
                        credential_id: credential_id.clone(),
                    });
                    tracing::info!(%key, %credential_id, "stale claim reconciled as issued");
                    ReconcileOutcome::Issued { credential_id }
                }
                Ok(None) => {
                    const REASON: &str = "issuance interrupted; no credential found on authority";
                    let updated = self.store.compare_and_swap(
                        &key,
                        &[CredentialStatus::Pending],
                        CredentialStatus::Failed,
                        |e| e.credential.mark_failed(REASON),
                    )?;
                    let retry_count = match &updated {
                        CasOutcome::Swapped(enrollment) => enrollment.credential.retry_count,
                        CasOutcome::Lost { .. } => 0,
                    };
                    self.events.emit(EngineEvent::CredentialFailed {
                        key: key.clone(),
                        reason: REASON.to_string(),
                        retry_count,
                    });
                    tracing::info!(%key, "stale claim reconciled as failed");
                    ReconcileOutcome::Failed
                }
                Err(err) => {
                    tracing::warn!(%key, error = %err, "reconciliation deferred; authority unreachable");
                    ReconcileOutcome::Indeterminate
                }
            };
            resolved.push((key, outcome));
        }
        Ok(resolved)
    }

    fn build_request(&self, enrollment: &Enrollment, context: &IssuanceContext) -> IssueRequest {
        IssueRequest {
            user_id: enrollment.key.learner.as_str().to_string(),
            course_id: enrollment.key.course.as_str().to_string(),
            course_name: context.course_name.clone(),
            learner_name: context.learner_name.clone(),
            grade: evaluator::grade_for(enrollment, self.pass_threshold),
            duration_hours: context.duration_hours,
            modules: enrollment.module_count() as u32,
            metadata: context.metadata.clone(),
        }
    }
}

/// Downgrades an abandoned claim so no record is left `pending` forever.
///
/// Armed from the moment the claim is won until a terminal outcome has been
/// persisted. If the issuance future is dropped mid-call (caller navigated
/// away, task aborted), the drop handler moves the record to `failed`, which
/// keeps it visible to manual retry and reconciliation.
struct ClaimGuard {
    store: Arc<EnrollmentStore>,
    key: EnrollmentKey,
    armed: bool,
}

impl ClaimGuard {
    fn new(store: Arc<EnrollmentStore>, key: EnrollmentKey) -> Self {
        Self {
            store,
            key,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(key = %self.key, "issuance abandoned mid-call; downgrading claim");
        let result = self.store.compare_and_swap(
            &self.key,
            &[CredentialStatus::Pending],
            CredentialStatus::Failed,
            |e| {
                e.credential
                    .mark_failed("issuance aborted before a result was recorded");
            },
        );
        if let Err(err) = result {
            tracing::error!(key = %self.key, error = %err, "failed to downgrade abandoned claim");
        }
    }
}
