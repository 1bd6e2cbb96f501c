use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no API key configured for the chat model (set GROQ_API_KEY or NIFTYRAG_LLM_API_KEY)")]
    MissingApiKey,

    #[error("chat model transport error: {0}")]
    Transport(String),

    #[error("chat model returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed chat model response: {0}")]
    MalformedResponse(String),

    #[error("model gave no answer within {max_steps} steps")]
    StepLimit { max_steps: usize },
}

impl AgentError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "agent.missing_api_key",
            Self::Transport(_) => "agent.transport",
            Self::Api { .. } => "agent.api",
            Self::MalformedResponse(_) => "agent.malformed_response",
            Self::StepLimit { .. } => "agent.step_limit",
        }
    }
}
