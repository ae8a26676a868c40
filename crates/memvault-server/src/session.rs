//! Per-run activity counters and their durable session record.
//!
//! The record is written twice per run: once when the session opens and once
//! when it closes. Counters in between live only in memory. A run that is
//! killed leaves its record with an empty `end_time`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use memvault_core::{DistanceMetric, VectorRecord};
use memvault_storage::{GetRequest, StorageError, VectorStore};
use parking_lot::Mutex;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Session rows are looked up by id only; every row carries this vector.
const SESSION_EMBEDDING: [f32; 1] = [1.0];
const SESSION_ID_SUFFIX_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not started")]
    NotStarted,
    #[error("session {0} already started")]
    AlreadyStarted(String),
    #[error("session {0} is closed")]
    Closed(String),
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("session record {id} is malformed: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// `ses_<epoch-ms>_<6 lowercase alphanumerics>`.
pub fn new_session_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("ses_{}_{suffix}", now.timestamp_millis())
}

/// Persisted shape of a session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub start_time: String,
    pub end_time: String,
    pub memory_count: u64,
    pub projects: Vec<String>,
    pub types_seen: Vec<String>,
    pub summary: String,
}

impl SessionRecord {
    pub fn is_open(&self) -> bool {
        self.end_time.is_empty()
    }

    fn to_vector_record(&self) -> Result<VectorRecord, SessionError> {
        let projects = serde_json::to_string(&self.projects).map_err(StorageError::from)?;
        let types_seen = serde_json::to_string(&self.types_seen).map_err(StorageError::from)?;
        Ok(VectorRecord::new(&self.session_id, &self.summary)
            .with_embedding(SESSION_EMBEDDING.to_vec())
            .with_meta("session_id", &self.session_id)
            .with_meta("start_time", &self.start_time)
            .with_meta("end_time", &self.end_time)
            .with_meta("memory_count", self.memory_count.to_string())
            .with_meta("projects", projects)
            .with_meta("types_seen", types_seen))
    }

    fn from_vector_record(record: &VectorRecord) -> Result<Self, SessionError> {
        let corrupt = |reason: String| SessionError::Corrupt {
            id: record.id.clone(),
            reason,
        };
        let field = |key: &str| {
            record
                .meta(key)
                .map(str::to_string)
                .ok_or_else(|| corrupt(format!("missing `{key}`")))
        };
        let list = |key: &str| -> Result<Vec<String>, SessionError> {
            let raw = field(key)?;
            serde_json::from_str(&raw).map_err(|e| corrupt(format!("`{key}`: {e}")))
        };
        let memory_count = field("memory_count")?
            .parse::<u64>()
            .map_err(|e| corrupt(format!("`memory_count`: {e}")))?;

        Ok(Self {
            session_id: record.id.clone(),
            start_time: field("start_time")?,
            end_time: record.meta("end_time").unwrap_or_default().to_string(),
            memory_count,
            projects: list("projects")?,
            types_seen: list("types_seen")?,
            summary: record.content.clone(),
        })
    }
}

/// Live view of a session's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub memory_count: u64,
    pub projects: Vec<String>,
    pub types_seen: Vec<String>,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.memory_count == 1 { "memory" } else { "memories" };
        write!(f, "Session {}: {} {noun} saved", self.session_id, self.memory_count)?;
        if !self.projects.is_empty() {
            let noun = if self.projects.len() == 1 { "project" } else { "projects" };
            write!(
                f,
                " across {} {noun} ({})",
                self.projects.len(),
                self.projects.join(", ")
            )?;
        }
        if !self.types_seen.is_empty() {
            write!(f, "; types: {}", self.types_seen.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct Counters {
    memory_count: u64,
    projects: BTreeSet<String>,
    types_seen: BTreeSet<String>,
}

impl Counters {
    fn summary(&self, session_id: &str) -> SessionSummary {
        SessionSummary {
            session_id: session_id.to_string(),
            memory_count: self.memory_count,
            projects: self.projects.iter().cloned().collect(),
            types_seen: self.types_seen.iter().cloned().collect(),
        }
    }
}

#[derive(Debug)]
enum SessionState {
    Unstarted,
    Open {
        id: String,
        started_at: String,
        counters: Counters,
    },
    Closed {
        summary: SessionSummary,
    },
}

/// Owns the session state machine (`Unstarted -> Open -> Closed`).
pub struct SessionAggregator {
    store: Arc<dyn VectorStore>,
    collection: String,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
}

impl SessionAggregator {
    pub fn new(store: Arc<dyn VectorStore>, collection: impl Into<String>) -> Self {
        Self::with_clock(store, collection, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            clock,
            state: Mutex::new(SessionState::Unstarted),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Fresh id stamped with this aggregator's clock.
    pub fn next_session_id(&self) -> String {
        new_session_id(self.clock.now())
    }

    pub async fn start_session(&self, id: impl Into<String>) -> Result<(), SessionError> {
        let id = id.into();
        let started_at = timestamp(self.clock.now());
        {
            let mut state = self.state.lock();
            match &*state {
                SessionState::Unstarted => {}
                SessionState::Open { id: open, .. } => {
                    return Err(SessionError::AlreadyStarted(open.clone()));
                }
                SessionState::Closed { summary } => {
                    return Err(SessionError::AlreadyStarted(summary.session_id.clone()));
                }
            }
            *state = SessionState::Open {
                id: id.clone(),
                started_at: started_at.clone(),
                counters: Counters::default(),
            };
        }

        let record = SessionRecord {
            session_id: id.clone(),
            start_time: started_at,
            end_time: String::new(),
            memory_count: 0,
            projects: Vec::new(),
            types_seen: Vec::new(),
            summary: String::new(),
        };
        if let Err(err) = self.persist(&record).await {
            *self.state.lock() = SessionState::Unstarted;
            return Err(err);
        }
        info!(session_id = %id, "session started");
        Ok(())
    }

    /// In-memory only. Callers treat `NotStarted` as "record without session".
    pub fn record_activity(&self, project: &str, memory_type: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        match &mut *state {
            SessionState::Unstarted => Err(SessionError::NotStarted),
            SessionState::Closed { summary } => Err(SessionError::Closed(summary.session_id.clone())),
            SessionState::Open { counters, .. } => {
                counters.memory_count += 1;
                let project = project.trim();
                if !project.is_empty() {
                    counters.projects.insert(project.to_string());
                }
                let memory_type = memory_type.trim();
                if !memory_type.is_empty() {
                    counters.types_seen.insert(memory_type.to_string());
                }
                Ok(())
            }
        }
    }

    pub fn current_session_id(&self) -> Result<String, SessionError> {
        match &*self.state.lock() {
            SessionState::Open { id, .. } => Ok(id.clone()),
            SessionState::Unstarted => Err(SessionError::NotStarted),
            SessionState::Closed { summary } => Err(SessionError::Closed(summary.session_id.clone())),
        }
    }

    pub fn snapshot(&self) -> Result<SessionSummary, SessionError> {
        match &*self.state.lock() {
            SessionState::Open { id, counters, .. } => Ok(counters.summary(id)),
            SessionState::Closed { summary } => Ok(summary.clone()),
            SessionState::Unstarted => Err(SessionError::NotStarted),
        }
    }

    /// Writes the final record once and closes the session. On a storage
    /// failure the session stays open with its counters intact.
    pub async fn end_session(&self, id: &str) -> Result<SessionRecord, SessionError> {
        let (started_at, counters) = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, SessionState::Unstarted) {
                SessionState::Open {
                    id: open,
                    started_at,
                    counters,
                } if open == id => {
                    *state = SessionState::Closed {
                        summary: counters.summary(id),
                    };
                    (started_at, counters)
                }
                other => {
                    let err = match &other {
                        SessionState::Unstarted => SessionError::NotStarted,
                        SessionState::Closed { summary } if summary.session_id == id => {
                            SessionError::Closed(id.to_string())
                        }
                        _ => SessionError::UnknownSession(id.to_string()),
                    };
                    *state = other;
                    return Err(err);
                }
            }
        };

        match self.finish(id, &started_at, &counters).await {
            Ok(record) => {
                info!(
                    session_id = %id,
                    memory_count = record.memory_count,
                    "session closed"
                );
                Ok(record)
            }
            Err(err) => {
                *self.state.lock() = SessionState::Open {
                    id: id.to_string(),
                    started_at,
                    counters,
                };
                Err(err)
            }
        }
    }

    pub async fn load(&self, id: &str) -> Result<Option<SessionRecord>, SessionError> {
        let rows = self
            .store
            .get(&self.collection, GetRequest::by_ids(vec![id.to_string()]))
            .await?;
        rows.iter()
            .find(|r| r.id == id)
            .map(SessionRecord::from_vector_record)
            .transpose()
    }

    async fn finish(
        &self,
        id: &str,
        started_at: &str,
        counters: &Counters,
    ) -> Result<SessionRecord, SessionError> {
        let start_time = match self.load(id).await? {
            Some(persisted) => persisted.start_time,
            None => {
                warn!(session_id = %id, "open session record missing, rewriting it");
                started_at.to_string()
            }
        };
        let summary = counters.summary(id);
        let record = SessionRecord {
            session_id: id.to_string(),
            start_time,
            end_time: timestamp(self.clock.now()),
            memory_count: summary.memory_count,
            projects: summary.projects.clone(),
            types_seen: summary.types_seen.clone(),
            summary: summary.to_string(),
        };
        self.persist(&record).await?;
        Ok(record)
    }

    async fn persist(&self, record: &SessionRecord) -> Result<(), SessionError> {
        self.store
            .get_or_create_collection(&self.collection, DistanceMetric::L2)
            .await?;
        self.store
            .upsert(&self.collection, vec![record.to_vector_record()?])
            .await?;
        Ok(())
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
