use std::collections::BTreeMap;

use barvault_core::{CompletenessScorer, PipelineConfig, QualityValidator, RecordRepository};

use crate::cli::{ReportArgs, ReportCommand};
use crate::error::CliError;

use super::{parse_date, parse_symbol, CommandResult};

pub async fn run(args: &ReportArgs, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    match &args.command {
        ReportCommand::Validation { symbol, start, end } => {
            let instrument = parse_symbol(symbol)?;
            let start = parse_date("start", start)?;
            let end = parse_date("end", end)?;

            let repository = RecordRepository::new(config.open_store()?);
            let records = repository.load_range(&instrument, start, end).await?;
            let completeness = CompletenessScorer::default().score_batch(&records);
            let validator = QualityValidator::new(config.validator);
            let batch = validator.validate_batch(records);

            let mut categories: BTreeMap<&str, usize> = BTreeMap::new();
            let rejected: Vec<_> = batch
                .quarantined
                .iter()
                .map(|candidate| {
                    *categories.entry(candidate.category.as_str()).or_default() += 1;
                    serde_json::json!({
                        "date": candidate.record.date(),
                        "category": candidate.category.as_str(),
                        "violations": candidate.violations,
                    })
                })
                .collect();

            Ok(CommandResult::ok(serde_json::json!({
                "instrument": instrument,
                "summary": validator.report(),
                "categories": categories,
                "rejected": rejected,
                "completeness": completeness,
            })))
        }
        ReportCommand::Storage => {
            let store = config.open_store()?;
            let stats = RecordRepository::new(store.clone()).storage_stats().await?;
            store.shutdown().await;
            Ok(CommandResult::ok(serde_json::to_value(stats)?))
        }
    }
}
