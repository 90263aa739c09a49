//! Tool invocation ledger.
//!
//! Every tool request is keyed by session, tool name and canonical arguments.
//! The ledger decides whether a request runs, replays a stored result, or is
//! suppressed because an earlier attempt may already have reached a
//! side-effecting service.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::execution::{InvocationKey, InvocationRecord, InvocationState};

#[derive(Clone, Debug)]
pub struct InvocationLedgerConfig {
    /// Replay and suppression window.
    pub ttl_seconds: i64,
}

impl Default for InvocationLedgerConfig {
    fn default() -> Self {
        Self { ttl_seconds: 300 }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invocation not found: {0:?}")]
    NotFound(InvocationKey),
    #[error("invalid invocation transition from {from:?} to {to:?}")]
    InvalidTransition { from: InvocationState, to: InvocationState },
}

#[derive(Clone, Debug, PartialEq)]
pub enum InvocationDecision {
    Execute { key: InvocationKey, attempt: u32 },
    Replay { key: InvocationKey, result: Value },
    Suppress { key: InvocationKey, reason: SuppressReason },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuppressReason {
    InFlight,
    UncertainPriorAttempt,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::UncertainPriorAttempt => "uncertain_prior_attempt",
        }
    }
}

/// Pure decision rules; storage lives in the caller.
#[derive(Clone, Debug, Default)]
pub struct InvocationEngine {
    config: InvocationLedgerConfig,
}

impl InvocationEngine {
    pub fn new(config: InvocationLedgerConfig) -> Self {
        Self { config }
    }

    pub fn key_for(session_id: &str, tool_name: &str, arguments: &Value) -> InvocationKey {
        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update(b"|");
        hasher.update(tool_name.as_bytes());
        hasher.update(b"|");
        hasher.update(canonical_json(arguments).as_bytes());
        InvocationKey(format!("{:x}", hasher.finalize()))
    }

    pub fn hash_payload(arguments: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(arguments).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Decides what to do with a request given the existing record, and
    /// returns the record to store when the request should execute.
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        &self,
        existing: Option<&InvocationRecord>,
        session_id: &str,
        tool_name: &str,
        arguments: &Value,
        idempotent: bool,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> (InvocationDecision, Option<InvocationRecord>) {
        let key = Self::key_for(session_id, tool_name, arguments);
        let live = existing.filter(|record| record.expires_at > now);

        if let Some(record) = live {
            match record.state {
                InvocationState::Completed => {
                    if let Some(result) = record.result_snapshot.clone() {
                        return (InvocationDecision::Replay { key, result }, None);
                    }
                }
                InvocationState::Running => {
                    return (
                        InvocationDecision::Suppress { key, reason: SuppressReason::InFlight },
                        None,
                    );
                }
                InvocationState::Failed => {
                    if record.outcome_uncertain && !idempotent {
                        return (
                            InvocationDecision::Suppress {
                                key,
                                reason: SuppressReason::UncertainPriorAttempt,
                            },
                            None,
                        );
                    }
                }
            }
        }

        let attempt = live.map(|record| record.attempt_count + 1).unwrap_or(1);
        let first_seen_at = live.map(|record| record.first_seen_at).unwrap_or(now);
        let record = InvocationRecord {
            key: key.clone(),
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            payload_hash: Self::hash_payload(arguments),
            state: InvocationState::Running,
            attempt_count: attempt,
            idempotent,
            first_seen_at,
            last_seen_at: now,
            expires_at: now + Duration::seconds(self.config.ttl_seconds),
            result_snapshot: None,
            error_kind: None,
            outcome_uncertain: false,
            correlation_id: correlation_id.to_string(),
        };

        (InvocationDecision::Execute { key, attempt }, Some(record))
    }

    pub fn complete(
        &self,
        record: &mut InvocationRecord,
        result: Value,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        Self::require_running(record, InvocationState::Completed)?;
        record.state = InvocationState::Completed;
        record.result_snapshot = Some(result);
        record.last_seen_at = now;
        record.expires_at = now + Duration::seconds(self.config.ttl_seconds);
        Ok(())
    }

    pub fn fail(
        &self,
        record: &mut InvocationRecord,
        error_kind: impl Into<String>,
        outcome_uncertain: bool,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        Self::require_running(record, InvocationState::Failed)?;
        record.state = InvocationState::Failed;
        record.error_kind = Some(error_kind.into());
        record.outcome_uncertain = outcome_uncertain;
        record.last_seen_at = now;
        record.expires_at = now + Duration::seconds(self.config.ttl_seconds);
        Ok(())
    }

    fn require_running(record: &InvocationRecord, to: InvocationState) -> Result<(), LedgerError> {
        if record.state == InvocationState::Running {
            Ok(())
        } else {
            Err(LedgerError::InvalidTransition { from: record.state.clone(), to })
        }
    }
}

/// Thread-safe in-process ledger shared by every session of one runtime.
#[derive(Debug, Default)]
pub struct InMemoryInvocationLedger {
    engine: InvocationEngine,
    records: Mutex<HashMap<InvocationKey, InvocationRecord>>,
}

impl InMemoryInvocationLedger {
    pub fn new(config: InvocationLedgerConfig) -> Self {
        Self { engine: InvocationEngine::new(config), records: Mutex::new(HashMap::new()) }
    }

    pub fn begin(
        &self,
        session_id: &str,
        tool_name: &str,
        arguments: &Value,
        idempotent: bool,
        correlation_id: &str,
    ) -> InvocationDecision {
        self.begin_at(session_id, tool_name, arguments, idempotent, correlation_id, Utc::now())
    }

    /// Records whose window closed before `now` are dropped first.
    pub fn begin_at(
        &self,
        session_id: &str,
        tool_name: &str,
        arguments: &Value,
        idempotent: bool,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> InvocationDecision {
        let key = InvocationEngine::key_for(session_id, tool_name, arguments);
        let mut records = self.lock();
        records.retain(|_, record| record.expires_at > now);
        let (decision, record) = self.engine.begin(
            records.get(&key),
            session_id,
            tool_name,
            arguments,
            idempotent,
            correlation_id,
            now,
        );
        if let Some(record) = record {
            records.insert(key, record);
        }
        decision
    }

    pub fn complete(&self, key: &InvocationKey, result: Value) -> Result<(), LedgerError> {
        let mut records = self.lock();
        let record = records.get_mut(key).ok_or_else(|| LedgerError::NotFound(key.clone()))?;
        self.engine.complete(record, result, Utc::now())
    }

    pub fn fail(
        &self,
        key: &InvocationKey,
        error_kind: impl Into<String>,
        outcome_uncertain: bool,
    ) -> Result<(), LedgerError> {
        let mut records = self.lock();
        let record = records.get_mut(key).ok_or_else(|| LedgerError::NotFound(key.clone()))?;
        self.engine.fail(record, error_kind, outcome_uncertain, Utc::now())
    }

    pub fn get(&self, key: &InvocationKey) -> Option<InvocationRecord> {
        self.lock().get(key).cloned()
    }

    /// Drops every record that belongs to `session_id`.
    pub fn forget_session(&self, session_id: &str) {
        self.lock().retain(|_, record| record.session_id != session_id);
    }

    /// Drops records whose window closed before `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| record.expires_at > now);
        before - records.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<InvocationKey, InvocationRecord>> {
        match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Serialises JSON with object keys in sorted order.
pub fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(object) => {
                let mut keys = object.keys().collect::<Vec<_>>();
                keys.sort();
                let mut sorted = Map::new();
                for key in keys {
                    if let Some(inner) = object.get(key) {
                        sorted.insert(key.clone(), sort(inner));
                    }
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}
