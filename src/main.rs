//! olap - query and process tabular analytical models over XMLA.

use std::sync::Arc;

use olap_bridge::cli::{render_outcome, render_result, Cli, Command, OutputFormat};
use olap_bridge::config::{Config, ConnectionConfig};
use olap_bridge::db::{MockEngineClient, MockTable, NativeEngineClient, XmlaClient, XmlaConfig};
use olap_bridge::error::{BridgeError, Result};
use olap_bridge::logging;
use olap_bridge::processing::ModelProcessor;
use olap_bridge::query::QueryExecutor;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();
    match &cli.log_file {
        Some(path) => {
            if let Err(e) = logging::init_file_logging(Some(path)) {
                logging::init_stderr_logging();
                warn!("{}; logging to stderr", e.detail());
            }
        }
        None => logging::init_stderr_logging(),
    }

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}: {}", e.category(), e);
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Runs the command, returning whether it succeeded.
async fn run(cli: Cli) -> Result<bool> {
    let config_path = cli.config_path();
    debug!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    let format = cli
        .output_format(config.defaults.output.as_deref())
        .map_err(BridgeError::invalid_configuration)?;

    // Build connection config with precedence:
    // 1. CLI arguments (highest)
    // 2. Named connection from config
    // 3. Default connection from config
    // 4. Environment variables
    let mut connection = resolve_connection(&cli, &config)?;
    let client: Arc<dyn NativeEngineClient> = if cli.mock {
        if connection.server.is_none() {
            connection.server = Some("mock".to_string());
        }
        if connection.database.is_none() {
            connection.database = Some("Model".to_string());
        }
        Arc::new(sample_model())
    } else {
        let timeout = cli.timeout.or(config.defaults.timeout_secs);
        let xmla_config = match timeout {
            Some(secs) => XmlaConfig::new().with_timeout(secs),
            None => XmlaConfig::new(),
        };
        Arc::new(XmlaClient::new(xmla_config)?)
    };

    if connection.server.is_none() || connection.database.is_none() {
        return Err(BridgeError::invalid_configuration(
            "No connection configured. Use --server and --database, --connection, or OLAP_SERVER and OLAP_DATABASE",
        ));
    }
    let descriptor = connection.to_descriptor()?;
    info!("Connection: {}", descriptor.display_string());

    match cli.command {
        Command::Query { query } => {
            let result = QueryExecutor::new(client).execute(&descriptor, &query).await?;
            println!("{}", render_result(&result, format));
            Ok(true)
        }
        Command::Process { path, mode } => {
            let processor = ModelProcessor::new(client);
            if format == OutputFormat::Json {
                let outcome = processor.process_report(&descriptor, &path, mode).await;
                println!("{}", render_outcome(&outcome, format));
                return Ok(outcome.is_success());
            }
            let outcome = processor.process(&descriptor, &path, mode).await?;
            println!("{}", render_outcome(&outcome, format));
            Ok(true)
        }
    }
}

/// Resolves the final connection configuration from CLI args, config file, and environment.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<ConnectionConfig> {
    let mut connection = match cli.connection_name() {
        Some(name) => config.get_connection(Some(name)).cloned().ok_or_else(|| {
            BridgeError::invalid_configuration(format!(
                "Connection '{}' not found in config file",
                name
            ))
        })?,
        None => config.get_connection(None).cloned().unwrap_or_default(),
    };

    if let Some(overrides) = cli.to_connection_config()? {
        connection.merge(&overrides);
    }

    connection.apply_env_defaults();
    Ok(connection)
}

/// A small in-memory model for `--mock`.
fn sample_model() -> MockEngineClient {
    MockEngineClient::new()
        .with_table(
            "Model",
            MockTable::new("Product")
                .with_integer_column("ProductKey")
                .with_column("Name", "xsd:string")
                .with_column("ListPrice", "xsd:decimal")
                .with_rows([
                    vec![Some("1"), Some("Mountain-100"), Some("3399.99")],
                    vec![Some("2"), Some("Road-150"), Some("3578.27")],
                    vec![Some("3"), Some("Touring-1000"), None],
                ]),
        )
        .with_table(
            "Model",
            MockTable::new("Sales")
                .with_integer_column("OrderId")
                .with_integer_column("ProductKey")
                .with_column("OrderDate", "xsd:dateTime")
                .with_column("Amount", "xsd:decimal")
                .with_rows([
                    ["1001", "1", "2024-01-05T00:00:00", "3399.99"],
                    ["1002", "2", "2024-01-06T00:00:00", "3578.27"],
                ])
                .with_source_rows([
                    ["1001", "1", "2024-01-05T00:00:00", "3399.99"],
                    ["1002", "2", "2024-01-06T00:00:00", "3578.27"],
                    ["1003", "1", "2024-02-11T00:00:00", "3399.99"],
                ])
                .with_partition("Sales 2024"),
        )
}
