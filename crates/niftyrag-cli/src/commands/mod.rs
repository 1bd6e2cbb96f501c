mod ask;
mod audit;
mod ingest;
mod query_tools;

use niftyrag_core::NiftyConfig;
use niftyrag_warehouse::Warehouse;
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// What a command prints: JSON for machine-readable results, plain text
/// for tool and assistant answers.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    Json(Value),
    Text(String),
}

impl CommandOutput {
    pub fn render(&self, pretty: bool) -> Result<String, serde_json::Error> {
        match self {
            Self::Json(value) if pretty => serde_json::to_string_pretty(value),
            Self::Json(value) => serde_json::to_string(value),
            Self::Text(text) => Ok(text.clone()),
        }
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let config = NiftyConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Ingest(args) => ingest::run(args, config).await,
        Command::Ask(args) => ask::run(args, &config).await,
        Command::Movers => query_tools::movers(&config),
        Command::Search(args) => query_tools::search(args, &config),
        Command::Outlook => query_tools::outlook(),
        Command::Logs(args) => audit::logs(args, &config),
        Command::Sql(args) => audit::sql(args, &config),
    }
}

fn open_warehouse(config: &NiftyConfig) -> Result<Warehouse, CliError> {
    Ok(Warehouse::open(config.warehouse_config())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_output_is_printed_verbatim() {
        let output = CommandOutput::Text(String::from("Top Gainers: []"));
        assert_eq!(output.render(true).expect("render"), "Top Gainers: []");
    }

    #[test]
    fn json_output_honours_pretty_flag() {
        let output = CommandOutput::Json(json!({ "a": 1 }));
        assert_eq!(output.render(false).expect("render"), r#"{"a":1}"#);
        assert_eq!(output.render(true).expect("render"), "{\n  \"a\": 1\n}");
    }
}
