use barvault_core::{ErrorRateMonitor, PipelineConfig};

use crate::cli::{MonitorArgs, MonitorCommand};
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &MonitorArgs, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    let monitor = ErrorRateMonitor::new(config.open_store()?, config.monitor);

    match &args.command {
        MonitorCommand::Check { window_hours } => {
            let check = monitor.check_error_rate(*window_hours).await?;
            let exceeded = check.exceeded;
            Ok(CommandResult::ok(serde_json::to_value(check)?).failed_if(exceeded))
        }
        MonitorCommand::Trend { days } => {
            let report = monitor.trend(*days as usize).await?;
            Ok(CommandResult::ok(serde_json::to_value(report)?))
        }
    }
}
