//! Command-line arguments.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ingest` | Run the acquisition pipeline once |
//! | `ask` | Ask the market assistant a question |
//! | `movers` | Top 5 gainers and losers of the latest snapshot |
//! | `search` | Semantic search over stored documents |
//! | `outlook` | Heuristic (random) price outlook |
//! | `logs` | Recent ingestion runs |
//! | `sql` | Read-only SQL against the warehouse |

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "niftyrag",
    author,
    version,
    about = "NIFTY 50 market data ingestion and assistant",
    long_about = "Scrapes the NIFTY 50 live market snapshot into a local DuckDB warehouse \
(structured table plus searchable documents) and answers questions over it.\n\
\n\
Use 'niftyrag <command> --help' for command-specific help."
)]
pub struct Cli {
    /// TOML configuration file (default: <home>/niftyrag.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one ingestion: browser strategies in order, then the fallback.
    ///
    /// # Examples
    ///
    ///   niftyrag ingest
    ///   niftyrag ingest --strategy internal_api --strategy csv_download
    Ingest(IngestArgs),

    /// Ask the market assistant (needs GROQ_API_KEY).
    ///
    /// # Examples
    ///
    ///   niftyrag ask "Who are today's top gainers?"
    Ask(AskArgs),

    /// Top 5 gainers and bottom 5 losers.
    Movers,

    /// Top matching documents for a query.
    Search(SearchArgs),

    /// Random up/down/sideways outlook. Not financial advice.
    Outlook,

    /// Recent ingestion runs, newest first.
    Logs(LogsArgs),

    /// Read-only SQL against the warehouse.
    ///
    /// # Examples
    ///
    ///   niftyrag sql "SELECT symbol, change_percent FROM market_stats ORDER BY 2 DESC LIMIT 5"
    Sql(SqlArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Override the configured strategy order (repeatable).
    #[arg(long = "strategy")]
    pub strategies: Vec<String>,

    /// Skip the fallback provider.
    #[arg(long, default_value_t = false)]
    pub no_fallback: bool,
}

#[derive(Debug, Args)]
pub struct AskArgs {
    #[arg(required = true, num_args = 1..)]
    pub question: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(required = true, num_args = 1..)]
    pub query: Vec<String>,
}

#[derive(Debug, Args)]
pub struct LogsArgs {
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    pub query: String,

    #[arg(long, default_value_t = 1_000)]
    pub max_rows: usize,

    #[arg(long, default_value_t = 5_000)]
    pub query_timeout_ms: u64,
}
