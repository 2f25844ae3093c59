//! In-memory session: selected dialect, typed credentials and connection
//! status. One [`SessionHandle`] is created at startup and cloned into every
//! component that needs to read or mutate it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observers::{SubscriptionId, Subscribers};
use crate::schema_browser::TableMetadata;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Mysql,
    Mariadb,
    Postgres,
    Redshift,
    Mssql,
}

const NETWORK_FIELDS: &[CredentialField] = &[
    CredentialField::Username,
    CredentialField::Password,
    CredentialField::Host,
    CredentialField::Port,
];

const NETWORK_FIELDS_WITH_DATABASE: &[CredentialField] = &[
    CredentialField::Username,
    CredentialField::Password,
    CredentialField::Host,
    CredentialField::Port,
    CredentialField::Database,
];

impl Dialect {
    pub const ALL: [Self; 5] = [
        Self::Mysql,
        Self::Mariadb,
        Self::Postgres,
        Self::Redshift,
        Self::Mssql,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Mariadb => "mariadb",
            Self::Postgres => "postgres",
            Self::Redshift => "redshift",
            Self::Mssql => "mssql",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Mysql => "MySQL",
            Self::Mariadb => "MariaDB",
            Self::Postgres => "PostgreSQL",
            Self::Redshift => "Redshift",
            Self::Mssql => "SQL Server",
        }
    }

    #[must_use]
    pub fn required_fields(self) -> &'static [CredentialField] {
        match self {
            Self::Mysql | Self::Mariadb | Self::Mssql => NETWORK_FIELDS,
            Self::Postgres | Self::Redshift => NETWORK_FIELDS_WITH_DATABASE,
        }
    }

    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Mysql | Self::Mariadb => 3306,
            Self::Postgres => 5432,
            Self::Redshift => 5439,
            Self::Mssql => 1433,
        }
    }

    /// Required fields that are absent or blank in `credentials`.
    #[must_use]
    pub fn missing_fields(self, credentials: &Credentials) -> Vec<CredentialField> {
        self.required_fields()
            .iter()
            .copied()
            .filter(|field| {
                credentials
                    .get(field)
                    .map_or(true, |value| value.trim().is_empty())
            })
            .collect()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = SessionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|dialect| dialect.as_str().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| SessionError::UnknownDialect(raw.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CredentialField {
    Username,
    Password,
    Host,
    Port,
    Database,
}

impl CredentialField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Password => "password",
            Self::Host => "host",
            Self::Port => "port",
            Self::Database => "database",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Username => "Username",
            Self::Password => "Password",
            Self::Host => "Host",
            Self::Port => "Port",
            Self::Database => "Database",
        }
    }

    #[must_use]
    pub fn is_secret(self) -> bool {
        matches!(self, Self::Password)
    }
}

pub type Credentials = BTreeMap<CredentialField, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub dialect: Dialect,
    pub credentials: Credentials,
    pub status: ConnectionStatus,
    pub error_message: Option<String>,
    pub selected_database: Option<String>,
    /// Bumped whenever a connection is established or torn down. Responses
    /// issued under an older generation are never applied.
    pub generation: u64,
}

impl Session {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            credentials: Credentials::new(),
            status: ConnectionStatus::Disconnected,
            error_message: None,
            selected_database: None,
            generation: 0,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    #[must_use]
    pub fn missing_fields(&self) -> Vec<CredentialField> {
        self.dialect.missing_fields(&self.credentials)
    }

    #[must_use]
    pub fn credential(&self, field: CredentialField) -> &str {
        self.credentials.get(&field).map_or("", String::as_str)
    }

    /// Switches dialect, wiping every credential value when it changes.
    /// Returns whether the dialect actually changed.
    pub fn select_dialect(&mut self, dialect: Dialect) -> bool {
        if self.dialect == dialect {
            return false;
        }
        self.dialect = dialect;
        self.credentials.clear();
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("missing required fields: {}", join_fields(.missing))]
    MissingCredentials { missing: Vec<CredentialField> },
    #[error("unknown dialect `{0}`")]
    UnknownDialect(String),
    #[error("a connection request is already in flight")]
    Busy,
    #[error("session is already connected; disconnect first")]
    AlreadyConnected,
    #[error("session is not connected")]
    NotConnected,
    #[error("response discarded because the session changed while it was in flight")]
    StaleResponse,
    #[error("table `{0}` is not part of the current schema preview")]
    UnknownTable(String),
    #[error("{0}")]
    Backend(String),
    #[error("could not reach the connector backend: {0}")]
    Transport(String),
}

fn join_fields(fields: &[CredentialField]) -> String {
    fields
        .iter()
        .map(|field| field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) session: Session,
    pub(crate) tables: Option<Arc<TableMetadata>>,
    pub(crate) operation_in_flight: bool,
}

/// Shared handle to the single process-wide session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: Arc<Mutex<SessionState>>,
    subscribers: Arc<Subscribers<Session>>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new(Dialect::default())
    }
}

impl SessionHandle {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                session: Session::new(dialect),
                tables: None,
                operation_in_flight: false,
            })),
            subscribers: Arc::new(Subscribers::new()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.lock().session.clone()
    }

    /// Registers a listener that receives a session snapshot after every
    /// change, in change order. Listeners must not call back into the handle.
    pub fn subscribe(&self, listener: impl Fn(&Session) + Send + Sync + 'static) -> SubscriptionId {
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub fn select_dialect(&self, dialect: Dialect) -> Result<Session, SessionError> {
        self.try_update(|state| {
            if state.operation_in_flight {
                return Err(SessionError::Busy);
            }
            if state.session.dialect != dialect && state.session.is_connected() {
                return Err(SessionError::AlreadyConnected);
            }
            if state.session.select_dialect(dialect) && state.session.status == ConnectionStatus::Error {
                state.session.status = ConnectionStatus::Disconnected;
                state.session.error_message = None;
            }
            Ok(state.session.clone())
        })
    }

    pub fn set_credential(&self, field: CredentialField, value: impl Into<String>) -> Session {
        let value = value.into();
        self.update(|state| {
            state.session.credentials.insert(field, value);
            state.session.clone()
        })
    }

    /// Table metadata from the most recent schema request, if still valid.
    #[must_use]
    pub fn cached_tables(&self) -> Option<Arc<TableMetadata>> {
        self.lock().tables.clone()
    }

    /// Generation of the live connection, or `NotConnected`.
    pub fn require_connected(&self) -> Result<u64, SessionError> {
        let state = self.lock();
        if state.session.is_connected() {
            Ok(state.session.generation)
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// Listeners run under the state lock so snapshots arrive in the order
    /// the changes were made.
    pub(crate) fn update<R>(&self, apply: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.lock();
        let result = apply(&mut state);
        self.subscribers.notify(&state.session);
        result
    }

    pub(crate) fn try_update<R>(
        &self,
        apply: impl FnOnce(&mut SessionState) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        let mut state = self.lock();
        let result = apply(&mut state)?;
        self.subscribers.notify(&state.session);
        Ok(result)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
