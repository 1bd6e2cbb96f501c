//! Behavior-driven tests for the query tools and the agent loop.
//!
//! Tools run against a throwaway warehouse; the chat model is replaced by a
//! scripted one that replays assistant turns and records what it was sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use niftyrag_agent::{
    AgentError, ChatFuture, ChatMessage, ChatModel, DocumentSearchTool, FunctionCall,
    MarketAgent, Tool, ToolCall, ToolSpec, TopMoversTool, NO_DOCUMENTS_MESSAGE,
    NO_MARKET_DATA_MESSAGE, SYSTEM_PROMPT,
};
use niftyrag_warehouse::{ChunkRow, MarketStatRow, Warehouse, WarehouseConfig};
use tempfile::{tempdir, TempDir};

fn warehouse() -> (TempDir, Warehouse) {
    let temp = tempdir().expect("tempdir");
    let warehouse = Warehouse::open(WarehouseConfig::for_home(temp.path())).expect("warehouse");
    (temp, warehouse)
}

fn stat(symbol: &str, change_percent: f64) -> MarketStatRow {
    MarketStatRow {
        symbol: symbol.to_string(),
        open: 100.0,
        high: 101.0,
        low: 99.0,
        ltp: 100.0 + change_percent,
        change_percent,
        volume: 1_000,
        as_of: String::from("2026-10-16"),
        origin: String::from("internal_api"),
    }
}

fn chunk(key: &str, label: &str, content: &str) -> ChunkRow {
    ChunkRow {
        dedup_key: key.to_string(),
        content: content.to_string(),
        source: String::from("announcement"),
        record_type: String::from("announcement"),
        label: label.to_string(),
    }
}

/// Replays queued assistant turns and keeps every conversation it saw.
struct ScriptedChatModel {
    replies: Mutex<VecDeque<ChatMessage>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChatModel {
    fn new(replies: Vec<ChatMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn conversations(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().expect("seen mutex").clone()
    }
}

impl ChatModel for ScriptedChatModel {
    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        _tools: &'a [ToolSpec],
    ) -> ChatFuture<'a> {
        Box::pin(async move {
            self.seen.lock().expect("seen mutex").push(messages.to_vec());
            let reply = self.replies.lock().expect("replies mutex").pop_front();
            reply.ok_or_else(|| AgentError::MalformedResponse(String::from("script exhausted")))
        })
    }
}

fn call(id: &str, name: &str, query: &str) -> ChatMessage {
    ChatMessage::assistant_tool_calls(vec![ToolCall {
        id: id.to_string(),
        kind: String::from("function"),
        function: FunctionCall {
            name: name.to_string(),
            arguments: serde_json::json!({ "query": query }).to_string(),
        },
    }])
}

// =============================================================================
// Top movers
// =============================================================================

#[test]
fn when_no_ingestion_has_run_movers_reports_no_data() {
    // Given: An empty structured store
    let (_temp, warehouse) = warehouse();

    // When: Movers are requested
    let text = TopMoversTool::new(warehouse).call("who gained?").expect("movers");

    // Then: The no-data message is returned, not an error
    assert_eq!(text, NO_MARKET_DATA_MESSAGE);
}

#[test]
fn when_the_snapshot_is_large_movers_lists_five_each_way() {
    // Given: Twelve stocks with distinct changes
    let (_temp, warehouse) = warehouse();
    let rows = (0..12)
        .map(|i| stat(&format!("S{i:02}"), f64::from(i) - 6.0))
        .collect::<Vec<_>>();
    warehouse.replace_market_stats(&rows).expect("seed");

    // When: Movers are requested
    let text = TopMoversTool::new(warehouse).call("").expect("movers");

    // Then: Gainers are the five best, losers the five worst, both descending
    assert_eq!(
        text,
        "Top Gainers: [S11 (5%), S10 (4%), S09 (3%), S08 (2%), S07 (1%)]\n\
         Top Losers: [S04 (-2%), S03 (-3%), S02 (-4%), S01 (-5%), S00 (-6%)]"
    );
}

#[test]
fn when_few_stocks_exist_movers_lists_each_of_them_on_both_sides() {
    let (_temp, warehouse) = warehouse();
    warehouse
        .replace_market_stats(&[stat("INFY", 0.63), stat("TCS", 1.0)])
        .expect("seed");

    let text = TopMoversTool::new(warehouse).call("").expect("movers");

    assert_eq!(text, "Top Gainers: [TCS (1%), INFY (0.63%)]\nTop Losers: [TCS (1%), INFY (0.63%)]");
}

// =============================================================================
// Document search
// =============================================================================

#[test]
fn when_documents_exist_search_returns_three_attributed_hits() {
    // Given: Five stored chunks
    let (_temp, warehouse) = warehouse();
    warehouse
        .upsert_chunks(&[
            chunk("a", "RELIANCE", "RELIANCE INDUSTRIES: Board meeting scheduled for Dividend"),
            chunk(
                "b",
                "market_live",
                "Stock: RELIANCE. Price: 2980. Change: 1.02%. Volume: 12345678.",
            ),
            chunk("c", "market_live", "Stock: TCS. Price: 3434. Change: 1%. Volume: 900000."),
            chunk("d", "NIFTY", "Option chain for NIFTY (underlying 24150)."),
            chunk("e", "market_live", "Stock: ITC. Price: 412. Change: 0.5%. Volume: 1234567."),
        ])
        .expect("seed");

    // When: A search runs
    let text = DocumentSearchTool::new(warehouse)
        .call("RELIANCE dividend board meeting")
        .expect("search");

    // Then: Three hits, best first, each with its source label
    let hits = text.split("\n\n").collect::<Vec<_>>();
    assert_eq!(hits.len(), 3);
    assert_eq!(
        hits[0],
        "[Source: RELIANCE] RELIANCE INDUSTRIES: Board meeting scheduled for Dividend"
    );
    assert!(hits.iter().all(|hit| hit.starts_with("[Source: ")));
}

#[test]
fn when_the_semantic_store_is_empty_search_says_so() {
    let (_temp, warehouse) = warehouse();
    let text = DocumentSearchTool::new(warehouse).call("anything").expect("search");
    assert_eq!(text, NO_DOCUMENTS_MESSAGE);
}

// =============================================================================
// Agent loop
// =============================================================================

#[tokio::test]
async fn when_the_model_asks_for_a_tool_its_output_is_fed_back() {
    // Given: A snapshot and a model that calls the movers tool, then answers
    let (_temp, warehouse) = warehouse();
    warehouse
        .replace_market_stats(&[stat("INFY", 0.63), stat("TCS", 1.0)])
        .expect("seed");
    let model = Arc::new(ScriptedChatModel::new(vec![
        call("call_1", "get_top_gainers_losers", "top gainers today"),
        ChatMessage::assistant("TCS led with 1%."),
    ]));
    let agent = MarketAgent::new(model.clone()).with_market_tools(&warehouse);

    // When: The user asks a question
    let answer = agent.ask("Who are the top gainers?").await.expect("answer");

    // Then: The final text is returned and the tool was used once
    assert_eq!(answer.text, "TCS led with 1%.");
    assert_eq!(answer.tools_used, vec!["get_top_gainers_losers".to_string()]);
    assert_eq!(answer.steps, 2);

    // And: The second turn carried the system prompt and the tool output
    let conversations = model.conversations();
    assert_eq!(conversations.len(), 2);
    let second = &conversations[1];
    assert_eq!(second[0].content.as_deref(), Some(SYSTEM_PROMPT));
    let tool_message = second.last().expect("tool message");
    assert_eq!(tool_message.role, "tool");
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
    assert!(tool_message
        .content
        .as_deref()
        .is_some_and(|text| text.starts_with("Top Gainers: [TCS (1%)")));
}

#[tokio::test]
async fn when_the_model_names_an_unknown_tool_it_is_told_so() {
    let (_temp, warehouse) = warehouse();
    let model = Arc::new(ScriptedChatModel::new(vec![
        call("call_9", "fetch_live_prices", ""),
        ChatMessage::assistant("I could not fetch that."),
    ]));
    let agent = MarketAgent::new(model.clone()).with_market_tools(&warehouse);

    let answer = agent.ask("price of INFY").await.expect("answer");

    assert_eq!(answer.text, "I could not fetch that.");
    let conversations = model.conversations();
    assert_eq!(
        conversations[1].last().and_then(|m| m.content.clone()).as_deref(),
        Some("Unknown tool: fetch_live_prices")
    );
}

#[tokio::test]
async fn when_the_model_never_answers_the_loop_stops() {
    // Given: A model that only ever calls tools
    let (_temp, warehouse) = warehouse();
    let model = Arc::new(ScriptedChatModel::new(vec![
        call("c1", "predict_stock_price", "nifty"),
        call("c2", "predict_stock_price", "nifty"),
        call("c3", "predict_stock_price", "nifty"),
    ]));
    let agent = MarketAgent::new(model)
        .with_market_tools(&warehouse)
        .with_max_steps(2);

    // When: The user asks
    let error = agent.ask("will it rise?").await.expect_err("no answer");

    // Then: The step limit ends the conversation
    assert!(matches!(error, AgentError::StepLimit { max_steps: 2 }));
}

#[test]
fn agent_advertises_all_three_tools() {
    let (_temp, warehouse) = warehouse();
    let agent = MarketAgent::new(Arc::new(ScriptedChatModel::new(Vec::new())))
        .with_market_tools(&warehouse);

    let names = agent
        .tool_specs()
        .into_iter()
        .map(|spec| spec.name)
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec!["search_market_documents", "get_top_gainers_losers", "predict_stock_price"]
    );
}
