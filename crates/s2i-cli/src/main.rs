//! S2I CLI - source to Iceberg table loading tool.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use s2i_core::config::LogFormat;
use s2i_core::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, write mode, column declarations)
    ConfigError = 1,
    /// Source read error (ClickHouse, Google Sheets)
    SourceError = 2,
    /// Iceberg-related error (catalog, schema mismatch, write)
    IcebergError = 3,
    /// Batch error (cast failure, null key, duplicate key)
    BatchError = 4,
    /// CRM publishing error
    CrmError = 5,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Convert an error to an exit code from the first library error in its chain.
    fn from_error(error: &anyhow::Error) -> Self {
        let core = error
            .chain()
            .find_map(|cause| cause.downcast_ref::<s2i_core::Error>());

        match core {
            Some(e) if e.is_config() => ExitCode::ConfigError,
            Some(s2i_core::Error::Source(_)) => ExitCode::SourceError,
            Some(s2i_core::Error::Iceberg(_)) => ExitCode::IcebergError,
            Some(s2i_core::Error::Batch(_)) => ExitCode::BatchError,
            Some(s2i_core::Error::Crm(_)) => ExitCode::CrmError,
            Some(_) => ExitCode::RuntimeError,
            None if error.chain().any(|c| c.is::<toml::de::Error>()) => ExitCode::ConfigError,
            None => ExitCode::RuntimeError,
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "s2i")]
#[command(about = "Load ClickHouse and Google Sheets data into Iceberg tables", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    secrets: Secrets,
}

/// Secrets that may be kept out of the configuration file.
#[derive(Args, Debug, Default)]
struct Secrets {
    /// Catalog credential (bearer token or `client_id:client_secret`)
    #[arg(long, env = "LAKEKEEPER_CREDENTIAL", global = true, hide_env_values = true)]
    catalog_credential: Option<String>,

    /// ClickHouse password
    #[arg(long, env = "CLICKHOUSE_PASSWORD", global = true, hide_env_values = true)]
    clickhouse_password: Option<String>,

    /// Google Sheets OAuth access token
    #[arg(long, env = "GOOGLE_SHEETS_TOKEN", global = true, hide_env_values = true)]
    sheets_token: Option<String>,

    /// CRM client secret
    #[arg(long, env = "CRM_API_CLIENT_SECRET", global = true, hide_env_values = true)]
    crm_client_secret: Option<String>,
}

impl Secrets {
    /// Fill the config's secrets from flags and environment. Sections the
    /// config does not declare are left absent.
    fn apply(self, config: &mut Config) {
        if let Some(credential) = self.catalog_credential {
            config.catalog.rest.credential = Some(credential);
        }
        if let (Some(password), Some(clickhouse)) =
            (self.clickhouse_password, config.clickhouse.as_mut())
        {
            clickhouse.password = Some(password);
        }
        if let (Some(token), Some(sheets)) = (self.sheets_token, config.sheets.as_mut()) {
            sheets.access_token = Some(token);
        }
        if let (Some(secret), Some(crm)) = (self.crm_client_secret, config.crm.as_mut()) {
            crm.client_secret = Some(secret);
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Read configured sources and write them into Iceberg tables
    Ingest {
        /// Only run these tables (`name` or `namespace.name`); repeatable
        #[arg(long = "table")]
        tables: Vec<String>,
    },

    /// Push Iceberg table rows to the CRM
    Publish {
        /// Only run these publications; repeatable
        #[arg(long = "publication")]
        publications: Vec<String>,
    },

    /// Show catalog connectivity and configured jobs
    Status,

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Try to load config for log format settings (optional - falls back to JSON)
    let log_format = std::fs::read_to_string(config_path(&cli.config))
        .ok()
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring.log_format)
        .unwrap_or(LogFormat::Json);

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config, cli.secrets)?;

    match cli.command {
        Commands::Ingest { tables } => {
            commands::ingest::run(config, &tables).await?;
        }

        Commands::Publish { publications } => {
            commands::publish::run(config, &publications).await?;
        }

        Commands::Status => {
            commands::status::run(config).await?;
        }

        Commands::Validate => {
            config.validate()?;
            println!("Configuration is valid");
            println!(
                "  {} table(s), {} publication(s)",
                config.tables.len(),
                config.publications.len()
            );
        }
    }

    Ok(())
}

fn config_path(path: &Option<PathBuf>) -> PathBuf {
    path.clone().unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Parse the config file and apply secret overrides. Validation happens
/// after the overrides, since a credential may only arrive via environment.
fn load_config(path: &Option<PathBuf>, secrets: Secrets) -> Result<Config> {
    let path = config_path(path);
    let content = read_config(&path)?;
    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    secrets.apply(&mut config);
    Ok(config)
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        s2i_core::Error::from(s2i_core::ConfigError::Invalid(format!(
            "Failed to read config {}: {}",
            path.display(),
            e
        )))
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use s2i_core::{ConfigError, IcebergError};

    const CONFIG: &str = r#"
[catalog]
catalog_type = "rest"
uri = "http://localhost:8181/catalog"

[clickhouse]
url = "http://localhost:8123"
"#;

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from([
            "s2i",
            "-c",
            "jobs.toml",
            "ingest",
            "--table",
            "sales.orders",
            "--table",
            "customers",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("jobs.toml")));
        match cli.command {
            Commands::Ingest { tables } => assert_eq!(tables, vec!["sales.orders", "customers"]),
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn test_exit_code_from_core_error() {
        let config: anyhow::Error =
            s2i_core::Error::from(ConfigError::UpsertWithoutKeys { table: "t".into() }).into();
        assert_eq!(ExitCode::from_error(&config), ExitCode::ConfigError);

        let iceberg: anyhow::Error =
            s2i_core::Error::from(IcebergError::TableNotFound("a.b".into())).into();
        assert_eq!(
            ExitCode::from_error(&iceberg.context("while writing")),
            ExitCode::IcebergError
        );

        assert_eq!(
            ExitCode::from_error(&anyhow::anyhow!("something else")),
            ExitCode::RuntimeError
        );
    }

    #[test]
    fn test_secrets_fill_declared_sections() {
        let mut config: Config = toml::from_str(CONFIG).unwrap();
        Secrets {
            catalog_credential: Some("id:secret".into()),
            clickhouse_password: Some("pw".into()),
            sheets_token: Some("token".into()),
            crm_client_secret: Some("crm".into()),
        }
        .apply(&mut config);

        assert_eq!(config.catalog.rest.credential.as_deref(), Some("id:secret"));
        assert_eq!(
            config.clickhouse.as_ref().unwrap().password.as_deref(),
            Some("pw")
        );
        assert!(config.sheets.is_none());
        assert!(config.crm.is_none());
    }
}
