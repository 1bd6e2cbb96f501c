use std::sync::Arc;

use niftyrag_core::{
    HttpClient, IngestionPipeline, NiftyConfig, PersistenceSink, ReqwestHttpClient, StrategyKind,
    WebDriverLauncher,
};
use serde_json::json;

use crate::cli::IngestArgs;
use crate::error::CliError;

use super::{open_warehouse, CommandOutput};

pub const SUCCESS_MESSAGE: &str = "Pipeline executed successfully. Data updated.";

pub async fn run(args: &IngestArgs, mut config: NiftyConfig) -> Result<CommandOutput, CliError> {
    if !args.strategies.is_empty() {
        config.source.strategies = args
            .strategies
            .iter()
            .map(|name| StrategyKind::parse(name))
            .collect::<Result<_, _>>()?;
    }
    if args.no_fallback {
        config.fallback.enabled = false;
    }

    let warehouse = open_warehouse(&config)?;
    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    let launcher = Arc::new(WebDriverLauncher::new(
        config.browser.webdriver_url.clone(),
        Arc::clone(&http),
    ));
    let pipeline =
        IngestionPipeline::from_config(&config, launcher, http, PersistenceSink::new(warehouse));
    tracing::info!(strategies = ?pipeline.strategy_names(), "ingest requested");

    let report = pipeline.run().await?;
    Ok(CommandOutput::Json(json!({
        "message": SUCCESS_MESSAGE,
        "report": report,
    })))
}
