use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::connection_dispatcher::BackendError;
use crate::query_runner::QueryRow;
use crate::session::{SessionError, SessionHandle};
use crate::settings::DEFAULT_PREVIEW_ROW_LIMIT;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TablePreview {
    pub name: String,
    pub columns: Vec<String>,
    /// First rows of the table, as returned by the backend.
    pub rows: Vec<QueryRow>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableMetadata {
    pub database: String,
    pub tables: Vec<TablePreview>,
}

impl TableMetadata {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TablePreview> {
        self.tables.iter().find(|table| table.name == name)
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|table| table.name.as_str()).collect()
    }
}

#[async_trait]
pub trait SchemaBackend: Send + Sync {
    async fn list_databases(&self) -> Result<Vec<String>, BackendError>;
    async fn fetch_tables(&self, database: &str) -> Result<Vec<TablePreview>, BackendError>;
}

#[derive(Debug)]
pub struct SchemaBrowser<B: SchemaBackend> {
    backend: B,
    session: SessionHandle,
    preview_row_limit: usize,
}

impl<B: SchemaBackend> SchemaBrowser<B> {
    #[must_use]
    pub fn new(backend: B, session: SessionHandle) -> Self {
        Self::with_preview_limit(backend, session, DEFAULT_PREVIEW_ROW_LIMIT)
    }

    #[must_use]
    pub fn with_preview_limit(backend: B, session: SessionHandle, preview_row_limit: usize) -> Self {
        Self {
            backend,
            session,
            preview_row_limit: preview_row_limit.max(1),
        }
    }

    #[must_use]
    pub fn preview_row_limit(&self) -> usize {
        self.preview_row_limit
    }

    pub async fn list_databases(&self) -> Result<Vec<String>, SessionError> {
        let generation = self.session.require_connected()?;
        let databases = self.backend.list_databases().await?;
        self.ensure_current(generation)?;
        Ok(databases)
    }

    /// Fetches the table previews of `database` and makes them the current
    /// schema, replacing whatever was cached before.
    pub async fn list_tables(&self, database: &str) -> Result<Arc<TableMetadata>, SessionError> {
        let generation = self.session.require_connected()?;

        debug!(database, "requesting table previews");
        let tables = self.backend.fetch_tables(database).await?;
        let metadata = Arc::new(TableMetadata {
            database: database.to_string(),
            tables,
        });

        self.session.try_update(|state| {
            if state.session.generation != generation || !state.session.is_connected() {
                return Err(SessionError::StaleResponse);
            }
            state.tables = Some(Arc::clone(&metadata));
            state.session.selected_database = Some(database.to_string());
            Ok(())
        })
        .inspect_err(|_| warn!(database, "discarding stale table previews"))?;

        Ok(metadata)
    }

    #[must_use]
    pub fn cached_tables(&self) -> Option<Arc<TableMetadata>> {
        self.session.cached_tables()
    }

    /// Preview statement for a table of the current schema.
    pub fn preview_statement(&self, table: &str) -> Result<String, SessionError> {
        self.session.require_connected()?;
        let known = self
            .cached_tables()
            .is_some_and(|metadata| metadata.table(table).is_some());
        if !known {
            return Err(SessionError::UnknownTable(table.to_string()));
        }
        Ok(format!("SELECT * FROM {table} LIMIT {}", self.preview_row_limit))
    }

    fn ensure_current(&self, generation: u64) -> Result<(), SessionError> {
        match self.session.require_connected() {
            Ok(current) if current == generation => Ok(()),
            _ => Err(SessionError::StaleResponse),
        }
    }
}
