use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::connection_log::{unix_timestamp_millis, ConnectionLog, ConnectionLogEntry};
use crate::session::{
    ConnectionStatus, CredentialField, Credentials, Dialect, Session, SessionError, SessionHandle,
};

/// Failure reported by a backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend answered with a non-null `error` field.
    #[error("{0}")]
    Rejected(String),
    /// The request never produced a usable answer.
    #[error("{0}")]
    Transport(String),
}

impl BackendError {
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

impl From<BackendError> for SessionError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Rejected(message) => Self::Backend(message),
            BackendError::Transport(message) => Self::Transport(message),
        }
    }
}

#[async_trait]
pub trait ConnectionBackend: Send + Sync {
    async fn connect(&self, dialect: Dialect, credentials: &Credentials)
        -> Result<(), BackendError>;
    async fn disconnect(&self) -> Result<(), BackendError>;
}

#[derive(Debug)]
pub struct ConnectionDispatcher<B: ConnectionBackend> {
    backend: B,
    session: SessionHandle,
    log: ConnectionLog,
}

impl<B: ConnectionBackend> ConnectionDispatcher<B> {
    #[must_use]
    pub fn new(backend: B, session: SessionHandle) -> Self {
        Self::with_log(backend, session, ConnectionLog::in_memory())
    }

    #[must_use]
    pub fn with_log(backend: B, session: SessionHandle, log: ConnectionLog) -> Self {
        Self {
            backend,
            session,
            log,
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    #[must_use]
    pub fn log(&self) -> &ConnectionLog {
        &self.log
    }

    /// Connects with `credentials`. A rejection from the backend resolves
    /// with `status = error`; only transport failures are returned as `Err`.
    pub async fn connect(
        &self,
        dialect: Dialect,
        credentials: Credentials,
    ) -> Result<Session, SessionError> {
        let missing = dialect.missing_fields(&credentials);
        if !missing.is_empty() {
            return Err(SessionError::MissingCredentials { missing });
        }

        self.session.try_update(|state| {
            if state.operation_in_flight {
                return Err(SessionError::Busy);
            }
            if state.session.is_connected() {
                return Err(SessionError::AlreadyConnected);
            }
            state.operation_in_flight = true;
            state.session.dialect = dialect;
            state.session.credentials.clone_from(&credentials);
            state.session.status = ConnectionStatus::Connecting;
            state.session.error_message = None;
            Ok(())
        })?;

        debug!(%dialect, "sending connect request");
        let outcome = self.backend.connect(dialect, &credentials).await;

        let snapshot = self.session.update(|state| {
            state.operation_in_flight = false;
            match &outcome {
                Ok(()) => {
                    state.session.status = ConnectionStatus::Connected;
                    state.session.error_message = None;
                    state.session.selected_database =
                        non_blank(credentials.get(&CredentialField::Database));
                    state.session.generation += 1;
                    state.tables = None;
                }
                Err(error) => {
                    state.session.status = ConnectionStatus::Error;
                    state.session.error_message = Some(SessionError::from(error.clone()).to_string());
                }
            }
            state.session.clone()
        });

        match outcome {
            Ok(()) => {
                info!(%dialect, generation = snapshot.generation, "connected");
                self.log.record(ConnectionLogEntry {
                    timestamp_unix_ms: unix_timestamp_millis(),
                    dialect,
                    host: non_blank(credentials.get(&CredentialField::Host)),
                    database: snapshot.selected_database.clone(),
                });
                Ok(snapshot)
            }
            Err(BackendError::Rejected(message)) => {
                info!(%dialect, error = %message, "backend rejected connection");
                Ok(snapshot)
            }
            Err(BackendError::Transport(message)) => {
                warn!(%dialect, error = %message, "connect request failed");
                Err(SessionError::Transport(message))
            }
        }
    }

    /// Tears down the connection. Calling it while disconnected is a no-op.
    pub async fn disconnect(&self) -> Result<Session, SessionError> {
        let needs_request = self.session.try_update(|state| {
            if state.operation_in_flight {
                return Err(SessionError::Busy);
            }
            match state.session.status {
                ConnectionStatus::Disconnected => Ok(false),
                ConnectionStatus::Error => {
                    state.session.status = ConnectionStatus::Disconnected;
                    state.session.error_message = None;
                    Ok(false)
                }
                ConnectionStatus::Connected | ConnectionStatus::Connecting => {
                    state.operation_in_flight = true;
                    state.session.generation += 1;
                    Ok(true)
                }
            }
        })?;
        if !needs_request {
            return Ok(self.session.snapshot());
        }

        debug!("sending disconnect request");
        let outcome = self.backend.disconnect().await;

        let snapshot = self.session.update(|state| {
            state.operation_in_flight = false;
            match &outcome {
                Ok(()) => {
                    state.session.status = ConnectionStatus::Disconnected;
                    state.session.error_message = None;
                    state.session.selected_database = None;
                    state.tables = None;
                }
                Err(error) => {
                    state.session.error_message = Some(SessionError::from(error.clone()).to_string());
                }
            }
            state.session.clone()
        });

        match outcome {
            Ok(()) => {
                info!(generation = snapshot.generation, "disconnected");
                Ok(snapshot)
            }
            Err(BackendError::Rejected(message)) => {
                warn!(error = %message, "backend rejected disconnect");
                Ok(snapshot)
            }
            Err(BackendError::Transport(message)) => {
                warn!(error = %message, "disconnect request failed");
                Err(SessionError::Transport(message))
            }
        }
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|raw| raw.trim())
        .filter(|raw| !raw.is_empty())
        .map(str::to_string)
}
