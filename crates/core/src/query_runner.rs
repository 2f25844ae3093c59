use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::connection_dispatcher::BackendError;
use crate::session::{SessionError, SessionHandle};

/// One result row: column name to value, in the order the backend sent them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryRow {
    fields: Map<String, Value>,
}

impl QueryRow {
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Builds a row from positional values, pairing them with `columns`.
    #[must_use]
    pub fn from_values(columns: &[String], values: Vec<Value>) -> Self {
        let fields = columns
            .iter()
            .cloned()
            .zip(values)
            .collect::<Map<String, Value>>();
        Self { fields }
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub rows: Vec<QueryRow>,
    pub error: Option<String>,
}

impl QueryResult {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            rows: Vec::new(),
            error: Some(message.into()),
        }
    }

    /// Column names taken from the first row.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| row.columns().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn run_query(&self, statement: &str) -> Result<Vec<QueryRow>, BackendError>;
}

#[derive(Debug)]
pub struct QueryRunner<B: QueryBackend> {
    backend: B,
    session: SessionHandle,
}

impl<B: QueryBackend> QueryRunner<B> {
    #[must_use]
    pub fn new(backend: B, session: SessionHandle) -> Self {
        Self { backend, session }
    }

    /// Sends `statement` verbatim. Backend errors come back inside the
    /// result so they can be rendered inline.
    pub async fn run_query(&self, statement: &str) -> Result<QueryResult, SessionError> {
        let generation = self.session.require_connected()?;

        debug!(statement, "running query");
        let outcome = self.backend.run_query(statement).await;

        if self.session.require_connected().ok() != Some(generation) {
            warn!(statement, "discarding query result from a previous session");
            return Err(SessionError::StaleResponse);
        }

        match outcome {
            Ok(rows) => Ok(QueryResult { rows, error: None }),
            Err(BackendError::Rejected(message)) => Ok(QueryResult::failed(message)),
            Err(BackendError::Transport(message)) => Err(SessionError::Transport(message)),
        }
    }
}
