//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use learnova_authority::{AuthorityClient, AuthorityError, IssueOutcome, IssueRequest};
use learnova_engine::{Engine, EventSink, IssuanceContext};
use learnova_store::EnrollmentStore;
use learnova_types::{CourseId, EnrollmentKey, IssuedCredential, LearnerId, PassThreshold};

pub fn key(learner: &str, course: &str) -> EnrollmentKey {
    EnrollmentKey::new(
        LearnerId::new(learner).unwrap(),
        CourseId::new(course).unwrap(),
    )
}

pub fn context() -> IssuanceContext {
    IssuanceContext {
        course_name: "Intro to Rust".to_string(),
        learner_name: "Ada Lovelace".to_string(),
        duration_hours: 6.0,
        metadata: None,
    }
}

pub fn credential(id: &str) -> IssuedCredential {
    IssuedCredential {
        credential_id: id.to_string(),
        verify_url: Some(format!("https://verify.example/?certId={id}")),
        proof_url: None,
        chain_reference: Some("0xabc".to_string()),
        issued_on: None,
    }
}

/// One scripted reply for [`MockAuthority::issue`].
#[derive(Debug, Clone)]
pub enum ScriptedIssue {
    Success(&'static str),
    AlreadyIssued(&'static str),
    Unavailable,
    Rejected(&'static str),
}

/// Scriptable in-process authority double.
///
/// `issue` replies are consumed front-to-back; an empty script issues
/// `CERT-DEFAULT`. `find` answers from a per-key map. Both count their
/// calls so tests can assert the at-most-once property.
#[derive(Clone, Default)]
pub struct MockAuthority {
    pub issue_calls: Arc<AtomicU32>,
    pub find_calls: Arc<AtomicU32>,
    pub delay: Duration,
    script: Arc<Mutex<VecDeque<ScriptedIssue>>>,
    found: Arc<Mutex<HashMap<String, IssuedCredential>>>,
}

impl MockAuthority {
    pub fn issuing(id: &'static str) -> Self {
        Self::default().then(ScriptedIssue::Success(id))
    }

    #[must_use]
    pub fn then(self, reply: ScriptedIssue) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make `find` return a credential for this key.
    pub fn holds(&self, key: &EnrollmentKey, credential: IssuedCredential) {
        self.found.lock().unwrap().insert(key.to_string(), credential);
    }

    pub fn issue_count(&self) -> u32 {
        self.issue_calls.load(Ordering::SeqCst)
    }

    pub fn find_count(&self) -> u32 {
        self.find_calls.load(Ordering::SeqCst)
    }
}

impl AuthorityClient for MockAuthority {
    async fn issue(&self, _request: &IssueRequest) -> Result<IssueOutcome, AuthorityError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.issue_calls.fetch_add(1, Ordering::SeqCst);

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedIssue::Success("CERT-DEFAULT"));
        match reply {
            ScriptedIssue::Success(id) => Ok(IssueOutcome::Issued(credential(id))),
            ScriptedIssue::AlreadyIssued(id) => Ok(IssueOutcome::AlreadyIssued(credential(id))),
            ScriptedIssue::Unavailable => Err(AuthorityError::Unavailable {
                attempts: 3,
                reason: "connection refused".to_string(),
            }),
            ScriptedIssue::Rejected(reason) => Err(AuthorityError::Rejected {
                reason: reason.to_string(),
            }),
        }
    }

    async fn find(
        &self,
        key: &EnrollmentKey,
    ) -> Result<Option<IssuedCredential>, AuthorityError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.found.lock().unwrap().get(&key.to_string()).cloned())
    }
}

pub const THRESHOLD: f64 = 60.0;
pub const STALENESS: Duration = Duration::from_secs(300);

pub fn engine(authority: MockAuthority) -> Engine<MockAuthority> {
    engine_with(authority, EventSink::disabled())
}

pub fn engine_with(authority: MockAuthority, events: EventSink) -> Engine<MockAuthority> {
    Engine::with_store(
        Arc::new(EnrollmentStore::open_in_memory().unwrap()),
        authority,
        PassThreshold::new(THRESHOLD).unwrap(),
        STALENESS,
        events,
    )
}

pub fn engine_on(
    store: Arc<EnrollmentStore>,
    authority: MockAuthority,
    staleness: Duration,
) -> Engine<MockAuthority> {
    Engine::with_store(
        store,
        authority,
        PassThreshold::new(THRESHOLD).unwrap(),
        staleness,
        EventSink::disabled(),
    )
}

pub fn engine_on_with_events(
    store: Arc<EnrollmentStore>,
    authority: MockAuthority,
    events: EventSink,
) -> Engine<MockAuthority> {
    Engine::with_store(
        store,
        authority,
        PassThreshold::new(THRESHOLD).unwrap(),
        STALENESS,
        events,
    )
}
