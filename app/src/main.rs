use std::error::Error;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use connector_core::settings::{default_config_dir, ConnectorSettings, SettingsError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_NAME: &str = "connector.log";

/// The terminal owns stdout, so logs go to a file in the config directory.
fn init_file_logging(config_dir: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(config_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config_dir.join(LOG_FILE_NAME))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init()?;
    Ok(())
}

fn run_app(
    load_settings: impl FnOnce() -> Result<ConnectorSettings, SettingsError>,
    run_tui: impl FnOnce(&ConnectorSettings) -> Result<(), connector_tui::TuiError>,
) -> Result<(), Box<dyn Error>> {
    let settings = load_settings()?;
    tracing::info!(backend_url = %settings.backend_url, "settings loaded");
    run_tui(&settings)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    match default_config_dir() {
        Ok(config_dir) => {
            if let Err(error) = init_file_logging(&config_dir) {
                eprintln!("logging disabled: {error}");
            }
        }
        Err(error) => eprintln!("logging disabled: {error}"),
    }

    run_app(ConnectorSettings::load_default, connector_tui::run)
}
