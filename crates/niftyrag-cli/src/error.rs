use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Config(#[from] niftyrag_core::ConfigError),

    #[error(transparent)]
    Warehouse(#[from] niftyrag_warehouse::WarehouseError),

    #[error(transparent)]
    Pipeline(#[from] niftyrag_core::PipelineError),

    #[error(transparent)]
    Agent(#[from] niftyrag_agent::AgentError),

    #[error(transparent)]
    Tool(#[from] niftyrag_agent::ToolError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Command(_) | Self::Config(_) => 2,
            Self::Pipeline(niftyrag_core::PipelineError::AlreadyRunning) => 7,
            Self::Pipeline(_) => 3,
            Self::Agent(_) => 6,
            Self::Serialization(_) => 4,
            Self::Warehouse(_) | Self::Tool(_) => 8,
            Self::Io(_) => 10,
        }
    }
}
