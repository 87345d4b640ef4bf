//! Command-line argument parsing and output rendering for the `olap` binary.

use crate::config::ConnectionConfig;
use crate::db::TabularResult;
use crate::error::Result;
use crate::processing::{ProcessingMode, ProcessingOutcome};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Output format for results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned text table.
    #[default]
    Text,
    /// JSON document.
    Json,
    /// Comma-separated values with a header row.
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "table" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(format!(
                "Invalid output format: {s}. Expected: text, json, or csv"
            )),
        }
    }
}

/// Query and process tabular analytical models over XMLA.
#[derive(Parser, Debug)]
#[command(name = "olap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Full connection string (e.g. "Data Source=olap01;Initial Catalog=Model")
    #[arg(long, value_name = "CONNECTION_STRING", global = true)]
    pub connection_string: Option<String>,

    /// Server host name or http(s) XMLA endpoint
    #[arg(short = 'S', long, value_name = "SERVER", global = true)]
    pub server: Option<String>,

    /// Database (catalog) name
    #[arg(short = 'd', long, value_name = "DATABASE", global = true)]
    pub database: Option<String>,

    /// Username
    #[arg(short = 'U', long, value_name = "USER", global = true)]
    pub user: Option<String>,

    /// Password (prefer OLAP_PASSWORD in the environment)
    #[arg(long, value_name = "PASSWORD", global = true)]
    pub password: Option<String>,

    /// Use named connection from config
    #[arg(short = 'c', long, value_name = "NAME", global = true)]
    pub connection: Option<String>,

    /// Config file path
    #[arg(long, value_name = "PATH", env = "OLAP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format: text, json, or csv
    #[arg(short = 'o', long, value_name = "FORMAT", global = true)]
    pub output: Option<String>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Use an in-memory sample model instead of a server
    #[arg(long, global = true)]
    pub mock: bool,

    /// Write logs to a file instead of stderr
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run a DAX or MDX query and print its rows
    Query {
        /// Query text, passed to the server verbatim
        #[arg(value_name = "QUERY")]
        query: String,
    },
    /// Refresh the model, a table, or a partition and wait for completion
    Process {
        /// Object path: empty for the model, TABLE, or TABLE/PARTITION
        #[arg(value_name = "PATH", default_value = "")]
        path: String,

        /// Refresh mode
        #[arg(short, long, value_enum, default_value_t = ProcessingMode::Full)]
        mode: ProcessingMode,
    },
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Converts CLI arguments to a ConnectionConfig.
    ///
    /// A connection string is the starting point when given; individual
    /// flags override its fields.
    pub fn to_connection_config(&self) -> Result<Option<ConnectionConfig>> {
        let mut config = match &self.connection_string {
            Some(conn_str) => ConnectionConfig::from_connection_string(conn_str)?,
            None => ConnectionConfig::default(),
        };

        config.merge(&ConnectionConfig {
            server: self.server.clone(),
            database: self.database.clone(),
            username: self.user.clone(),
            password: self.password.clone(),
            ..Default::default()
        });

        if config.is_empty() {
            return Ok(None);
        }
        Ok(Some(config))
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::Config::default_path)
    }

    /// Returns the named connection to use, if specified.
    pub fn connection_name(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    /// Parses the output format, falling back to `default` when --output is absent.
    pub fn output_format(&self, default: Option<&str>) -> std::result::Result<OutputFormat, String> {
        match self.output.as_deref().or(default) {
            Some(format) => format.parse(),
            None => Ok(OutputFormat::default()),
        }
    }
}

/// Renders a query result.
pub fn render_result(result: &TabularResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => render_table(result),
        OutputFormat::Json => {
            let document = serde_json::json!({
                "columns": result.columns,
                "rows": result.to_records(),
                "row_count": result.row_count(),
                "execution_time_ms": result.execution_time.as_millis() as u64,
            });
            serde_json::to_string_pretty(&document).unwrap_or_else(|e| e.to_string())
        }
        OutputFormat::Csv => result.to_csv(),
    }
}

/// Renders a processing outcome.
pub fn render_outcome(outcome: &ProcessingOutcome, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(outcome).unwrap_or_else(|e| e.to_string())
        }
        OutputFormat::Text | OutputFormat::Csv => {
            let mut out = match &outcome.error {
                None => format!(
                    "Processed {} ({}) in {:.2}s",
                    outcome.target,
                    outcome.mode,
                    outcome.duration.as_secs_f64()
                ),
                Some(error) => format!(
                    "Processing {} ({}) failed: {}",
                    outcome.target, outcome.mode, error
                ),
            };
            for warning in &outcome.warnings {
                out.push_str("\nwarning: ");
                out.push_str(warning);
            }
            out
        }
    }
}

/// Aligned text table with a row count footer.
fn render_table(result: &TabularResult) -> String {
    let header: Vec<String> = result.columns.iter().map(|c| c.name.clone()).collect();
    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_display_string()).collect())
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{v:<w$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(&header));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in &cells {
        out.push_str(&line(row));
        out.push('\n');
    }

    let rows = result.row_count();
    out.push_str(&format!(
        "({} row{})",
        rows,
        if rows == 1 { "" } else { "s" }
    ));
    out
}
