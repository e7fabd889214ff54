use barvault_core::{HealthState, PipelineConfig};

use crate::cli::{SourcesArgs, SourcesCommand};
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &SourcesArgs, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    let orchestrator = config.build_orchestrator()?;

    let result = match args.command {
        SourcesCommand::List => {
            let mut result = CommandResult::ok(serde_json::json!({
                "order": config.fallback.provider_order,
                "registered": orchestrator.sources(),
            }));
            if config.alpaca.is_none() {
                result = result.with_warning("alpaca credentials not configured");
            }
            result
        }
        SourcesCommand::Health => {
            let probes = orchestrator.source_health().await;
            let all_down = probes
                .values()
                .all(|probe| probe.status == HealthState::Unhealthy);
            CommandResult::ok(serde_json::to_value(probes)?).failed_if(all_down)
        }
    };
    orchestrator.shutdown().await;
    Ok(result)
}
