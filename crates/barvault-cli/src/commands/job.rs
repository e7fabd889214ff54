use barvault_core::{CoreError, PipelineConfig, RecordRepository};

use crate::cli::JobArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &JobArgs, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    let repository = RecordRepository::new(config.open_store()?);
    let job = repository
        .load_job(&args.job_id)
        .await?
        .ok_or_else(|| CoreError::JobNotFound {
            job_id: args.job_id.clone(),
        })?;
    let failed = !job.errors.is_empty();
    Ok(CommandResult::ok(serde_json::to_value(job)?).failed_if(failed))
}
