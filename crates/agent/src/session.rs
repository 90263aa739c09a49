//! Explicit per-conversation state and the registry that serialises access
//! to it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use underwrite_core::domain::claim::ClaimRecord;
use underwrite_core::domain::conversation::{ConversationThread, ThreadHandle};
use underwrite_core::domain::metrics::{MetricsAggregator, UsageMetrics};
use underwrite_db::repositories::ThreadRepository;

use crate::errors::AgentError;
use crate::intent::ToolIntent;

/// State owned by one conversation. Never shared between sessions.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub thread: ConversationThread,
    pub metrics: MetricsAggregator,
    /// Latest usable claim structured in this conversation.
    pub claim: Option<ClaimRecord>,
    /// Most recently uploaded document, used as the structuring source.
    pub document: Option<String>,
    /// Model requests the user has made but not yet had answered, carried
    /// while the assistant waits on a clarification.
    pub pending_intent: BTreeSet<ToolIntent>,
    folded_documents: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_thread(id, ConversationThread::new())
    }

    pub fn with_thread(id: impl Into<String>, thread: ConversationThread) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            thread,
            metrics: MetricsAggregator::new(),
            claim: None,
            document: None,
            pending_intent: BTreeSet::new(),
            folded_documents: HashSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Session over a persisted thread. Metrics are rebuilt from the usage
    /// and step markers stored on its turns. Uploaded documents, their
    /// memory passages and the structured claim stay with the original
    /// session, so a resumed conversation needs the document uploaded again.
    pub fn resumed(id: impl Into<String>, thread: ConversationThread) -> Self {
        let mut session = Self::with_thread(id, thread);
        for turn in session.thread.turns() {
            let usage = turn.metadata.as_ref().and_then(|metadata| metadata.usage);
            let steps = u64::from(turn.counts_as_step());
            session.metrics.record(usage.unwrap_or_default(), steps);
        }
        session
    }

    pub fn thread_handle(&self) -> &ThreadHandle {
        self.thread.continuation_handle()
    }

    pub fn metrics(&self) -> UsageMetrics {
        self.metrics.snapshot()
    }

    pub fn has_folded(&self, content_hash: &str) -> bool {
        self.folded_documents.contains(content_hash)
    }

    pub(crate) fn mark_folded(&mut self, content_hash: String) {
        self.folded_documents.insert(content_hash);
    }

    /// Starts a fresh thread and zeroes metrics. The previous thread is
    /// returned untouched so existing references stay inspectable.
    pub fn reset(&mut self) -> ConversationThread {
        let previous = std::mem::replace(&mut self.thread, ConversationThread::new());
        self.metrics.reset();
        self.claim = None;
        self.document = None;
        self.pending_intent.clear();
        self.folded_documents.clear();
        self.updated_at = Utc::now();
        previous
    }
}

/// Live sessions keyed by id. A session runs at most one turn at a time; a
/// second caller gets `SessionBusy` instead of queueing.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    threads: Option<Arc<dyn ThreadRepository>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists threads after every turn so they can be resumed later.
    pub fn with_thread_store(threads: Arc<dyn ThreadRepository>) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), threads: Some(threads) }
    }

    pub async fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.insert(Session::new(id.clone())).await;
        info!(event_name = "agent.session.created", session_id = %id);
        id
    }

    pub async fn insert(&self, session: Session) {
        let id = session.id.clone();
        self.sessions.write().await.insert(id, Arc::new(Mutex::new(session)));
    }

    /// Reopens a persisted thread under a new session id. See
    /// [`Session::resumed`] for what carries over.
    pub async fn resume(&self, handle: &ThreadHandle) -> Result<Option<String>, AgentError> {
        let Some(threads) = &self.threads else {
            return Ok(None);
        };
        let thread = match threads.load(handle).await {
            Ok(Some(thread)) => thread,
            Ok(None) => return Ok(None),
            Err(error) => {
                warn!(event_name = "agent.session.resume_failed", error = %error);
                return Err(AgentError::SessionNotFound(handle.0.clone()));
            }
        };
        let id = Uuid::new_v4().to_string();
        self.insert(Session::resumed(id.clone(), thread)).await;
        info!(event_name = "agent.session.resumed", session_id = %id, thread_handle = %handle.0);
        Ok(Some(id))
    }

    pub async fn get(&self, session_id: &str) -> Result<Arc<Mutex<Session>>, AgentError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }

    /// Exclusive access for one orchestration call.
    pub async fn acquire(&self, session_id: &str) -> Result<OwnedMutexGuard<Session>, AgentError> {
        self.get(session_id)
            .await?
            .try_lock_owned()
            .map_err(|_| AgentError::SessionBusy(session_id.to_string()))
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Best-effort save; a storage failure never fails the turn.
    pub async fn persist(&self, session: &Session) {
        let Some(threads) = &self.threads else {
            return;
        };
        if let Err(error) = threads.save(Some(&session.id), &session.thread).await {
            warn!(
                event_name = "agent.session.persist_failed",
                session_id = %session.id,
                error = %error,
                "thread could not be saved"
            );
        }
    }
}
