//! # niftyrag-agent
//!
//! Query tools over the market stores and the chat agent that calls them.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`tools`] | Document search, top movers, price outlook |
//! | [`llm`] | OpenAI-compatible chat-completions client |
//! | [`agent`] | Tool-invocation loop |

pub mod agent;
pub mod error;
pub mod llm;
pub mod tools;

pub use agent::{AgentAnswer, MarketAgent, SYSTEM_PROMPT};
pub use error::AgentError;
pub use llm::{
    ChatFuture, ChatMessage, ChatModel, FunctionCall, OpenAiChatClient, ToolCall, ToolSpec,
};
pub use tools::{
    DocumentSearchTool, PriceOutlookTool, Tool, ToolError, TopMoversTool, NO_DOCUMENTS_MESSAGE,
    NO_MARKET_DATA_MESSAGE,
};
