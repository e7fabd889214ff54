mod ingest;
mod job;
mod monitor;
mod record;
mod report;
mod sources;

use barvault_core::{PipelineConfig, StoreKind, Symbol, TradeDate};
use serde_json::Value;

use crate::cli::{Cli, Command, StoreArg};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    /// Maps to exit code 3 after the output is printed.
    pub failed: bool,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            failed: false,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn failed_if(mut self, failed: bool) -> Self {
        self.failed = failed;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<(&'static str, CommandResult), CliError> {
    let config = load_config(cli)?;

    let result = match &cli.command {
        Command::Ingest(args) => ("ingest", ingest::run(args, &config).await?),
        Command::Job(args) => ("job", job::run(args, &config).await?),
        Command::Record(args) => ("record", record::run(args, &config).await?),
        Command::Monitor(args) => ("monitor", monitor::run(args, &config).await?),
        Command::Sources(args) => ("sources", sources::run(args, &config).await?),
        Command::Report(args) => ("report", report::run(args, &config).await?),
    };
    Ok(result)
}

fn load_config(cli: &Cli) -> Result<PipelineConfig, CliError> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(root) = &cli.data_root {
        config.data_root = root.clone();
    }
    if let Some(store) = cli.store {
        config.store = match store {
            StoreArg::Fs => StoreKind::Fs,
            StoreArg::Duckdb => StoreKind::DuckDb,
        };
    }
    Ok(config)
}

fn parse_symbol(value: &str) -> Result<Symbol, CliError> {
    Ok(Symbol::parse(value)?)
}

fn parse_date(flag: &str, value: &str) -> Result<TradeDate, CliError> {
    TradeDate::parse(value)
        .map_err(|error| CliError::Command(format!("--{flag} '{value}': {error}")))
}
