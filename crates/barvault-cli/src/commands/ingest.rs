use barvault_core::{CancellationHandle, JobStatus, PipelineConfig, Symbol, TradeDate};
use tracing::{info, warn};

use crate::cli::IngestArgs;
use crate::error::CliError;

use super::{parse_date, CommandResult};

pub async fn run(
    args: &IngestArgs,
    config: &PipelineConfig,
) -> Result<CommandResult, CliError> {
    let instruments = Symbol::parse_list(&args.symbols.join(","))?;
    let end = match &args.end {
        Some(value) => parse_date("end", value)?,
        None => TradeDate::today(),
    };
    let start = match &args.start {
        Some(value) => parse_date("start", value)?,
        None => end.minus_days(i64::from(args.days)),
    };

    let orchestrator = config.build_orchestrator()?;
    let cancel = CancellationHandle::new();
    let signal = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing the current instrument");
            signal.cancel();
        }
    });

    let result = orchestrator.ingest(instruments, start, end, &cancel).await;
    watcher.abort();
    orchestrator.shutdown().await;
    let job = result?;

    info!(job_id = %job.job_id, status = ?job.status, "ingestion finished");
    let mut output = CommandResult::ok(serde_json::json!({
        "job": job,
        "validation": orchestrator.validation_report(),
        "writer": orchestrator.writer_stats(),
    }))
    .failed_if(job.status != JobStatus::Completed);

    if job.monitor.as_ref().is_some_and(|check| check.exceeded) {
        output = output.with_warning("error rate above threshold");
    }
    if cancel.is_cancelled() {
        output = output.with_warning("job was interrupted");
    }
    Ok(output)
}
