use std::io;
use std::time::{Duration, Instant};

use connector_adapters::http::HttpBackend;
use connector_core::connection_dispatcher::ConnectionDispatcher;
use connector_core::query_runner::QueryRunner;
use connector_core::schema_browser::SchemaBrowser;
use connector_core::session::{
    ConnectionStatus, CredentialField, Credentials, Dialect, SessionHandle,
};
use connector_core::settings::ConnectorSettings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const PASSWORD_ENV: &str = "CONNECTOR_DB_PASSWORD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseOutcome {
    Config,
    HelpRequested,
}

#[derive(Debug, Clone)]
struct ProbeConfig {
    backend_url: Option<String>,
    dialect: Dialect,
    username: String,
    password: Option<String>,
    host: String,
    port: Option<u16>,
    database: Option<String>,
    statement: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            dialect: Dialect::Mysql,
            username: "root".to_string(),
            password: None,
            host: "127.0.0.1".to_string(),
            port: None,
            database: None,
            statement: None,
        }
    }
}

impl ProbeConfig {
    fn credentials(&self) -> Credentials {
        let mut credentials = Credentials::new();
        credentials.insert(CredentialField::Username, self.username.clone());
        credentials.insert(
            CredentialField::Password,
            self.password.clone().unwrap_or_default(),
        );
        credentials.insert(CredentialField::Host, self.host.clone());
        credentials.insert(
            CredentialField::Port,
            self.port
                .unwrap_or_else(|| self.dialect.default_port())
                .to_string(),
        );
        if let Some(database) = &self.database {
            credentials.insert(CredentialField::Database, database.clone());
        }
        credentials
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut config = parse_args()?;
    if config.password.is_none() {
        config.password = std::env::var(PASSWORD_ENV).ok();
    }

    let mut settings = ConnectorSettings::load_default().unwrap_or_default();
    if let Some(url) = config.backend_url.clone() {
        settings = settings.with_backend_url_override(Some(url.into()));
    }
    let backend = HttpBackend::from_settings(&settings)?;
    println!("probe.backend_url={}", backend.base_url());

    let session = SessionHandle::new(config.dialect);
    let dispatcher = ConnectionDispatcher::new(backend.clone(), session.clone());
    let browser =
        SchemaBrowser::with_preview_limit(backend.clone(), session.clone(), settings.preview_row_limit);
    let runner = QueryRunner::new(backend, session);

    let started_at = Instant::now();
    let connected = dispatcher
        .connect(config.dialect, config.credentials())
        .await?;
    println!("probe.connect_ms={:.3}", millis(started_at.elapsed()));
    println!("probe.status={}", connected.status.as_str());
    if connected.status != ConnectionStatus::Connected {
        return Err(io_other(
            connected
                .error_message
                .unwrap_or_else(|| "connection was not established".to_string()),
        )
        .into());
    }

    let mut statement = config.statement.clone();
    if let Some(database) = &config.database {
        let metadata = browser.list_tables(database).await?;
        println!("probe.tables={}", metadata.tables.len());
        if statement.is_none() {
            if let Some(table) = metadata.table_names().first() {
                statement = Some(browser.preview_statement(table)?);
            }
        }
    }

    let statement = statement.unwrap_or_else(|| "SELECT 1".to_string());
    let started_at = Instant::now();
    let result = runner.run_query(&statement).await?;
    println!("probe.query_ms={:.3}", millis(started_at.elapsed()));
    println!("probe.rows={}", result.rows.len());
    if let Some(first) = result.rows.first() {
        println!("probe.first_row={}", serde_json::to_string(first)?);
    }
    if let Some(message) = &result.error {
        println!("probe.query_error={message}");
    }

    let disconnected = dispatcher.disconnect().await?;
    println!("probe.disconnect={}", disconnected.status.as_str());
    Ok(())
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

fn parse_args() -> io::Result<ProbeConfig> {
    let mut config = ProbeConfig::default();
    let outcome = parse_args_from(std::env::args().skip(1), &mut config)?;
    if outcome == ParseOutcome::HelpRequested {
        print_help();
        std::process::exit(0);
    }
    Ok(config)
}

fn parse_args_from(
    args: impl IntoIterator<Item = String>,
    config: &mut ProbeConfig,
) -> io::Result<ParseOutcome> {
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::HelpRequested),
            "--backend-url" => config.backend_url = Some(next_value(&mut args, "--backend-url")?),
            "--dialect" => {
                config.dialect = next_value(&mut args, "--dialect")?
                    .parse::<Dialect>()
                    .map_err(io_other)?;
            }
            "--username" => config.username = next_value(&mut args, "--username")?,
            "--password" => config.password = Some(next_value(&mut args, "--password")?),
            "--host" => config.host = next_value(&mut args, "--host")?,
            "--port" => {
                config.port = Some(
                    next_value(&mut args, "--port")?
                        .parse::<u16>()
                        .map_err(|error| io_other(format!("invalid --port value: {error}")))?,
                );
            }
            "--database" => config.database = Some(next_value(&mut args, "--database")?),
            "--statement" => config.statement = Some(next_value(&mut args, "--statement")?),
            _ => {
                return Err(io_other(format!("unknown argument `{flag}`")));
            }
        }
    }

    Ok(ParseOutcome::Config)
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<String> {
    args.next()
        .ok_or_else(|| io_other(format!("missing value for `{flag}`")))
}

fn print_help() {
    println!(
        "connector probe\n\n\
Walks connect, tables, query and disconnect against the local backend.\n\n\
Usage:\n  cargo run -p connector-app --bin connector-probe -- [OPTIONS]\n\n\
Options:\n  --backend-url <url>     Backend base URL (default: settings.toml, then http://localhost:5000)\n  --dialect <name>        mysql, mariadb, postgres, redshift or mssql (default: mysql)\n  --username <user>       Database user (default: root)\n  --password <password>   Database password\n  --host <host>           Database host (default: 127.0.0.1)\n  --port <port>           Database port (default: the dialect's port)\n  --database <name>       Database to list tables from\n  --statement <sql>       Statement to run (default: preview of the first table)\n\n\
Environment:\n  {PASSWORD_ENV} is used when --password is absent.\n"
    );
}

fn io_other(error: impl std::fmt::Display) -> io::Error {
    io::Error::other(error.to_string())
}
