use std::sync::Arc;

use niftyrag_warehouse::Warehouse;
use serde::Serialize;
use serde_json::Value;

use crate::error::AgentError;
use crate::llm::{ChatMessage, ChatModel, ToolCall, ToolSpec};
use crate::tools::{DocumentSearchTool, PriceOutlookTool, Tool, TopMoversTool};

pub const SYSTEM_PROMPT: &str = "You are a Nifty 50 Market Assistant. Use the available tools to answer \
financial queries. For 'gainers/losers', ALWAYS use the get_top_gainers_losers tool. For predictions, \
use the prediction tool. Also use search_market_documents for answering queries.";

pub const DEFAULT_MAX_STEPS: usize = 4;

/// Final answer plus the tools consulted on the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentAnswer {
    pub text: String,
    pub tools_used: Vec<String>,
    pub steps: usize,
}

/// Tool-calling loop over a [`ChatModel`].
pub struct MarketAgent {
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    max_steps: usize,
}

impl MarketAgent {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            tools: Vec::new(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Register the search, movers and outlook tools.
    pub fn with_market_tools(self, warehouse: &Warehouse) -> Self {
        self.with_tool(Arc::new(DocumentSearchTool::new(warehouse.clone())))
            .with_tool(Arc::new(TopMoversTool::new(warehouse.clone())))
            .with_tool(Arc::new(PriceOutlookTool::new()))
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Answer `question`, running whatever tools the model asks for.
    ///
    /// Tool failures are reported back to the model as text rather than
    /// ending the conversation.
    pub async fn ask(&self, question: &str) -> Result<AgentAnswer, AgentError> {
        let specs = self.tool_specs();
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(question)];
        let mut tools_used = Vec::new();

        for step in 1..=self.max_steps {
            let reply = self.model.complete(&messages, &specs).await?;
            if reply.tool_calls.is_empty() {
                return Ok(AgentAnswer {
                    text: reply.content.unwrap_or_default().trim().to_string(),
                    tools_used,
                    steps: step,
                });
            }

            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in &calls {
                tracing::info!(tool = %call.function.name, step, "agent invoking tool");
                tools_used.push(call.function.name.clone());
                let output = self.dispatch(call);
                messages.push(ChatMessage::tool_result(call.id.clone(), output));
            }
        }

        Err(AgentError::StepLimit {
            max_steps: self.max_steps,
        })
    }

    fn dispatch(&self, call: &ToolCall) -> String {
        let Some(tool) = self.tools.iter().find(|tool| tool.name() == call.function.name) else {
            tracing::warn!(tool = %call.function.name, "model requested an unknown tool");
            return format!("Unknown tool: {}", call.function.name);
        };

        match tool.call(&query_argument(&call.function.arguments)) {
            Ok(output) => output,
            Err(error) => {
                tracing::warn!(tool = tool.name(), %error, "tool failed");
                format!("Tool error: {error}")
            }
        }
    }
}

/// The `query` string of a tool call; falls back to the raw argument text.
fn query_argument(arguments: &str) -> String {
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => map
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Ok(Value::String(text)) => text,
        _ => arguments.to_string(),
    }
}
