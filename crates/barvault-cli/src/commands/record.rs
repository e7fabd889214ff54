use barvault_core::{PipelineConfig, RecordRepository};

use crate::cli::RecordArgs;
use crate::error::CliError;

use super::{parse_date, parse_symbol, CommandResult};

pub async fn run(args: &RecordArgs, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    let instrument = parse_symbol(&args.symbol)?;
    let repository = RecordRepository::new(config.open_store()?);

    match (&args.date, &args.start, &args.end) {
        (Some(date), _, _) => {
            let date = parse_date("date", date)?;
            let record = repository.load(&instrument, date).await?;
            let missing = record.is_none();
            let mut result = CommandResult::ok(serde_json::to_value(record)?).failed_if(missing);
            if missing {
                result = result.with_warning(format!("no record for {instrument} on {date}"));
            }
            Ok(result)
        }
        (None, Some(start), Some(end)) => {
            let start = parse_date("start", start)?;
            let end = parse_date("end", end)?;
            let records = repository.load_range(&instrument, start, end).await?;
            Ok(CommandResult::ok(serde_json::json!({
                "instrument": instrument,
                "count": records.len(),
                "records": records,
            })))
        }
        _ => Err(CliError::Command(String::from(
            "pass --date or both --start and --end",
        ))),
    }
}
