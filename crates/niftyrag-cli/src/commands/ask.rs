use std::sync::Arc;

use niftyrag_agent::{MarketAgent, OpenAiChatClient};
use niftyrag_core::{NiftyConfig, ReqwestHttpClient};

use crate::cli::AskArgs;
use crate::error::CliError;

use super::{open_warehouse, CommandOutput};

pub async fn run(args: &AskArgs, config: &NiftyConfig) -> Result<CommandOutput, CliError> {
    let question = args.question.join(" ");
    if question.trim().is_empty() {
        return Err(CliError::Command(String::from("question must not be empty")));
    }

    let model = OpenAiChatClient::from_settings(Arc::new(ReqwestHttpClient::new()), &config.agent)?;
    let warehouse = open_warehouse(config)?;
    let agent = MarketAgent::new(Arc::new(model))
        .with_market_tools(&warehouse)
        .with_max_steps(config.agent.max_steps);

    let answer = agent.ask(question.trim()).await?;
    tracing::info!(tools = ?answer.tools_used, steps = answer.steps, "assistant answered");
    Ok(CommandOutput::Text(answer.text))
}
