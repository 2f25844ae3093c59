use std::time::Duration;

use async_trait::async_trait;
use connector_core::connection_dispatcher::{BackendError, ConnectionBackend};
use connector_core::query_runner::{QueryBackend, QueryRow};
use connector_core::schema_browser::{SchemaBackend, TablePreview};
use connector_core::session::{Credentials, Dialect};
use connector_core::settings::ConnectorSettings;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HttpBackendError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Client of the local connector backend. Cloning shares the connection pool.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn from_settings(settings: &ConnectorSettings) -> Result<Self, HttpBackendError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout_ms) = settings.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        Ok(Self::with_client(builder.build()?, &settings.backend_url))
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, BackendError> {
        let url = format!("{}/{endpoint}", self.base_url);
        debug!(%url, "backend request");
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|error| BackendError::transport(error.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| BackendError::transport(error.to_string()))?;
        let envelope = serde_json::from_str::<Envelope<T>>(&body).map_err(|error| {
            if status.is_success() {
                BackendError::transport(format!("invalid response from /{endpoint}: {error}"))
            } else {
                BackendError::transport(format!("HTTP {status}"))
            }
        })?;

        if let Some(message) = envelope.error {
            return Err(BackendError::rejected(message));
        }
        if !status.is_success() {
            return Err(BackendError::transport(format!("HTTP {status}")));
        }
        Ok(envelope.payload)
    }
}

/// Every backend answer carries `error`; non-null means rejected.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    payload: T,
}

#[derive(Debug, Deserialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
struct DatabasesPayload {
    #[serde(default)]
    databases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TablesPayload {
    #[serde(default)]
    tables: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct RowsPayload {
    #[serde(default)]
    rows: Vec<QueryRow>,
}

fn credential_params(dialect: Dialect, credentials: &Credentials) -> Vec<(&'static str, &str)> {
    let mut params = vec![("dialect", dialect.as_str())];
    params.extend(
        credentials
            .iter()
            .map(|(field, value)| (field.as_str(), value.as_str())),
    );
    params
}

/// Converts the `[{ "<table>": { "columns": [..], "rows": [..] } }]` shape.
/// Rows may be objects or positional arrays.
fn table_previews(entries: Vec<Map<String, Value>>) -> Vec<TablePreview> {
    entries
        .into_iter()
        .flat_map(Map::into_iter)
        .map(|(name, body)| table_preview(name, body))
        .collect()
}

fn table_preview(name: String, body: Value) -> TablePreview {
    let (columns_value, rows_value) = match body {
        Value::Object(mut fields) => (fields.remove("columns"), fields.remove("rows")),
        Value::Array(rows) => (None, Some(Value::Array(rows))),
        _ => (None, None),
    };

    let mut columns = match columns_value {
        Some(Value::Array(columns)) => columns.into_iter().map(column_name).collect(),
        _ => Vec::new(),
    };
    let raw_rows = match rows_value {
        Some(Value::Array(rows)) => rows,
        _ => Vec::new(),
    };

    let rows = raw_rows
        .into_iter()
        .filter_map(|row| match row {
            Value::Object(fields) => Some(QueryRow::new(fields)),
            Value::Array(values) => Some(QueryRow::from_values(&columns, values)),
            _ => None,
        })
        .collect::<Vec<_>>();

    if columns.is_empty() {
        if let Some(first) = rows.first() {
            columns = first.columns().map(str::to_string).collect();
        }
    }

    TablePreview {
        name,
        columns,
        rows,
    }
}

fn column_name(value: Value) -> String {
    match value {
        Value::String(name) => name,
        other => other.to_string(),
    }
}

#[async_trait]
impl ConnectionBackend for HttpBackend {
    async fn connect(
        &self,
        dialect: Dialect,
        credentials: &Credentials,
    ) -> Result<(), BackendError> {
        let params = credential_params(dialect, credentials);
        self.get::<Empty>("connect", &params).await.map(|_| ())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.get::<Empty>("disconnect", &[]).await.map(|_| ())
    }
}

#[async_trait]
impl SchemaBackend for HttpBackend {
    async fn list_databases(&self) -> Result<Vec<String>, BackendError> {
        let payload = self.get::<DatabasesPayload>("databases", &[]).await?;
        Ok(payload.databases)
    }

    async fn fetch_tables(&self, database: &str) -> Result<Vec<TablePreview>, BackendError> {
        let payload = self
            .get::<TablesPayload>("tables", &[("database", database)])
            .await?;
        Ok(table_previews(payload.tables))
    }
}

#[async_trait]
impl QueryBackend for HttpBackend {
    async fn run_query(&self, statement: &str) -> Result<Vec<QueryRow>, BackendError> {
        let payload = self
            .get::<RowsPayload>("query", &[("statement", statement)])
            .await?;
        Ok(payload.rows)
    }
}
