use niftyrag_core::NiftyConfig;
use niftyrag_warehouse::QueryGuardrails;
use serde_json::json;

use crate::cli::{LogsArgs, SqlArgs};
use crate::error::CliError;

use super::{open_warehouse, CommandOutput};

pub fn logs(args: &LogsArgs, config: &NiftyConfig) -> Result<CommandOutput, CliError> {
    if args.limit == 0 {
        return Err(CliError::Command(String::from("--limit must be greater than zero")));
    }
    let runs = open_warehouse(config)?.ingestion_logs(args.limit)?;
    Ok(CommandOutput::Json(json!({ "runs": runs })))
}

pub fn sql(args: &SqlArgs, config: &NiftyConfig) -> Result<CommandOutput, CliError> {
    let query = args.query.trim();
    if query.is_empty() {
        return Err(CliError::Command(String::from("query must not be empty")));
    }
    let guardrails = QueryGuardrails {
        max_rows: args.max_rows,
        query_timeout_ms: args.query_timeout_ms,
    };
    let result = open_warehouse(config)?.execute_query(query, guardrails)?;
    Ok(CommandOutput::Json(serde_json::to_value(result)?))
}
