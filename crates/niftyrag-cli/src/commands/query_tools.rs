use niftyrag_agent::{DocumentSearchTool, PriceOutlookTool, Tool, TopMoversTool};
use niftyrag_core::NiftyConfig;

use crate::cli::SearchArgs;
use crate::error::CliError;

use super::{open_warehouse, CommandOutput};

pub fn movers(config: &NiftyConfig) -> Result<CommandOutput, CliError> {
    let tool = TopMoversTool::new(open_warehouse(config)?);
    Ok(CommandOutput::Text(tool.call("")?))
}

pub fn search(args: &SearchArgs, config: &NiftyConfig) -> Result<CommandOutput, CliError> {
    let query = args.query.join(" ");
    let tool = DocumentSearchTool::new(open_warehouse(config)?);
    Ok(CommandOutput::Text(tool.call(query.trim())?))
}

pub fn outlook() -> Result<CommandOutput, CliError> {
    Ok(CommandOutput::Text(PriceOutlookTool::new().call("")?))
}
