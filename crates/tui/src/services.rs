use connector_core::connection_dispatcher::{ConnectionBackend, ConnectionDispatcher};
use connector_core::connection_log::ConnectionLog;
use connector_core::query_runner::{QueryBackend, QueryRunner};
use connector_core::schema_browser::{SchemaBackend, SchemaBrowser};
use connector_core::session::SessionHandle;

use crate::app::{Completion, SessionCommand};

/// Session-bound operations, shared by every spawned command.
#[derive(Debug)]
pub struct Services<B>
where
    B: ConnectionBackend + SchemaBackend + QueryBackend,
{
    dispatcher: ConnectionDispatcher<B>,
    browser: SchemaBrowser<B>,
    runner: QueryRunner<B>,
}

impl<B> Services<B>
where
    B: ConnectionBackend + SchemaBackend + QueryBackend + Clone,
{
    #[must_use]
    pub fn new(
        backend: B,
        session: SessionHandle,
        log: ConnectionLog,
        preview_row_limit: usize,
    ) -> Self {
        Self {
            dispatcher: ConnectionDispatcher::with_log(backend.clone(), session.clone(), log),
            browser: SchemaBrowser::with_preview_limit(
                backend.clone(),
                session.clone(),
                preview_row_limit,
            ),
            runner: QueryRunner::new(backend, session),
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionHandle {
        self.dispatcher.session()
    }

    pub async fn execute(&self, command: SessionCommand) -> Completion {
        match command {
            SessionCommand::Connect {
                dialect,
                credentials,
            } => Completion::Connected(self.dispatcher.connect(dialect, credentials).await),
            SessionCommand::Disconnect => Completion::Disconnected(self.dispatcher.disconnect().await),
            SessionCommand::ListDatabases => {
                Completion::Databases(self.browser.list_databases().await)
            }
            SessionCommand::ListTables(database) => {
                Completion::Tables(self.browser.list_tables(&database).await)
            }
            SessionCommand::PreviewTable(table) => match self.browser.preview_statement(&table) {
                Ok(statement) => {
                    let result = self.runner.run_query(&statement).await;
                    Completion::Query { statement, result }
                }
                Err(error) => Completion::Query {
                    statement: String::new(),
                    result: Err(error),
                },
            },
            SessionCommand::RunQuery(statement) => {
                let result = self.runner.run_query(&statement).await;
                Completion::Query { statement, result }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use connector_core::connection_dispatcher::{BackendError, ConnectionBackend};
    use connector_core::connection_log::ConnectionLog;
    use connector_core::query_runner::{QueryBackend, QueryRow};
    use connector_core::schema_browser::{SchemaBackend, TablePreview};
    use connector_core::session::{
        ConnectionStatus, CredentialField, Credentials, Dialect, SessionError, SessionHandle,
    };
    use serde_json::json;

    use super::Services;
    use crate::app::{Completion, SessionCommand};

    #[derive(Debug, Default)]
    struct FakeBackendState {
        connect_calls: AtomicUsize,
        statements: Mutex<Vec<String>>,
    }

    #[derive(Debug, Clone, Default)]
    struct FakeBackend {
        state: Arc<FakeBackendState>,
    }

    #[async_trait::async_trait]
    impl ConnectionBackend for FakeBackend {
        async fn connect(
            &self,
            _dialect: Dialect,
            _credentials: &Credentials,
        ) -> Result<(), BackendError> {
            self.state.connect_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl SchemaBackend for FakeBackend {
        async fn list_databases(&self) -> Result<Vec<String>, BackendError> {
            Ok(vec!["plotly_datasets".to_string()])
        }

        async fn fetch_tables(&self, _database: &str) -> Result<Vec<TablePreview>, BackendError> {
            Ok(vec![TablePreview {
                name: "ebola_2014".to_string(),
                columns: vec!["country".to_string()],
                rows: Vec::new(),
            }])
        }
    }

    #[async_trait::async_trait]
    impl QueryBackend for FakeBackend {
        async fn run_query(&self, statement: &str) -> Result<Vec<QueryRow>, BackendError> {
            self.state
                .statements
                .lock()
                .unwrap()
                .push(statement.to_string());
            Ok(vec![serde_json::from_value(json!({"country": "Guinea"}))
                .expect("valid row")])
        }
    }

    fn credentials() -> Credentials {
        [
            (CredentialField::Username, "root"),
            (CredentialField::Password, "secret"),
            (CredentialField::Host, "localhost"),
            (CredentialField::Port, "3306"),
        ]
        .into_iter()
        .map(|(field, value)| (field, value.to_string()))
        .collect()
    }

    fn services(backend: FakeBackend) -> Services<FakeBackend> {
        Services::new(
            backend,
            SessionHandle::new(Dialect::Mysql),
            ConnectionLog::in_memory(),
            3,
        )
    }

    #[tokio::test]
    async fn listed_table_can_be_previewed_through_the_query_runner() {
        let backend = FakeBackend::default();
        let services = services(backend.clone());

        let connected = services
            .execute(SessionCommand::Connect {
                dialect: Dialect::Mysql,
                credentials: credentials(),
            })
            .await;
        assert!(matches!(
            connected,
            Completion::Connected(Ok(ref session)) if session.status == ConnectionStatus::Connected
        ));

        let Completion::Tables(Ok(metadata)) = services
            .execute(SessionCommand::ListTables("plotly_datasets".to_string()))
            .await
        else {
            panic!("table listing should succeed");
        };
        let table = metadata.table_names()[0].to_string();

        let completion = services.execute(SessionCommand::PreviewTable(table)).await;

        let Completion::Query { statement, result } = completion else {
            panic!("preview should run a query");
        };
        assert_eq!(statement, "SELECT * FROM ebola_2014 LIMIT 3");
        assert_eq!(result.expect("query should succeed").rows.len(), 1);
        assert_eq!(
            *backend.state.statements.lock().unwrap(),
            vec!["SELECT * FROM ebola_2014 LIMIT 3".to_string()]
        );
    }

    #[tokio::test]
    async fn previewing_before_listing_tables_fails_without_a_query() {
        let backend = FakeBackend::default();
        let services = services(backend.clone());

        let completion = services
            .execute(SessionCommand::PreviewTable("users".to_string()))
            .await;

        assert_eq!(
            completion,
            Completion::Query {
                statement: String::new(),
                result: Err(SessionError::NotConnected),
            }
        );
        assert!(backend.state.statements.lock().unwrap().is_empty());
        assert_eq!(backend.state.connect_calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn disconnect_clears_cached_tables() {
        let services = services(FakeBackend::default());
        services
            .execute(SessionCommand::Connect {
                dialect: Dialect::Mysql,
                credentials: credentials(),
            })
            .await;
        services
            .execute(SessionCommand::ListTables("plotly_datasets".to_string()))
            .await;
        assert!(services.session().cached_tables().is_some());

        services.execute(SessionCommand::Disconnect).await;

        assert!(services.session().cached_tables().is_none());
    }
}
