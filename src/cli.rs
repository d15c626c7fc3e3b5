use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use pocketrag::{config::EmbedderKind, search::SearchMode};

#[derive(Debug, Parser)]
#[command(
    name = "pocketrag",
    version,
    about = "Ask questions about your PDFs and notes, entirely on your machine"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the ColBERT model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Embedding provider to use
    #[arg(long, value_enum, global = true)]
    pub embedder: Option<EmbedderKind>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import documents (files or directories)
    Add(AddArgs),
    /// Remove a document and its chunks
    Remove(RemoveArgs),
    /// List imported documents
    List(ListArgs),
    /// Remove every document
    Clear(ClearArgs),
    /// Show the passages that best match a query
    Search(SearchArgs),
    /// Answer a question from the imported documents
    Ask(AskArgs),
    /// Read and change persistent settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show system status and statistics
    Status(StatusArgs),
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Documents --

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// PDF, text or markdown files, or directories containing them
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Only import files in directories matching this glob (repeatable)
    #[arg(long = "glob")]
    pub globs: Vec<String>,

    /// Use 500 character chunks without overlap
    #[arg(long, conflicts_with_all = ["chunk_size", "overlap"])]
    pub legacy: bool,

    /// Maximum chunk size in characters
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Characters shared by consecutive chunks
    #[arg(long)]
    pub overlap: Option<usize>,

    /// Re-import files even if they have not changed
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// Document id (or prefix) or file name
    pub document: String,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ClearArgs {
    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

// -- Retrieval --

#[derive(Debug, Parser)]
pub struct RetrievalArgs {
    /// Number of chunks to retrieve
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Search only within this document (repeatable)
    #[arg(short = 'd', long = "document")]
    pub documents: Vec<String>,

    /// Minimum score threshold
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Ranking strategy
    #[arg(long, value_enum)]
    pub mode: Option<SearchMode>,

    /// Weight of embedding similarity against keyword match (0 to 1)
    #[arg(long)]
    pub embedding_weight: Option<f32>,
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    #[command(flatten)]
    pub retrieval: RetrievalArgs,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question
    pub query: String,

    #[command(flatten)]
    pub retrieval: RetrievalArgs,

    /// Print the context the answer was grounded on
    #[arg(long)]
    pub show_context: bool,

    /// Output the answer as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the stored value of a setting
    Get {
        key: String,
    },
    /// Store a setting
    Set {
        key: String,
        value: String,
    },
    /// Remove a stored setting (revert to default)
    Unset {
        key: String,
    },
    /// List stored settings
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "pocketrag",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_ask_defaults() {
        let cli = Cli::parse_from(["pocketrag", "ask", "what is X?"]);
        match cli.command {
            Command::Ask(args) => {
                assert_eq!(args.query, "what is X?");
                assert_eq!(args.retrieval.count, None);
                assert!(args.retrieval.documents.is_empty());
                assert_eq!(args.retrieval.mode, None);
                assert!(!args.show_context);
                assert!(!args.json);
            }
            _ => panic!("expected ask command"),
        }
    }

    #[test]
    fn parse_search_flags() {
        let cli = Cli::parse_from([
            "pocketrag",
            "--embedder",
            "hashing",
            "search",
            "pumps",
            "-n",
            "3",
            "-d",
            "manual.pdf",
            "-d",
            "#abcd",
            "--mode",
            "keyword",
            "--min-score",
            "0.2",
        ]);
        assert_eq!(cli.embedder, Some(EmbedderKind::Hashing));
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.retrieval.count, Some(3));
                assert_eq!(args.retrieval.documents, vec!["manual.pdf", "#abcd"]);
                assert_eq!(args.retrieval.mode, Some(SearchMode::Keyword));
                assert_eq!(args.retrieval.min_score, Some(0.2));
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn legacy_conflicts_with_chunk_size() {
        assert!(
            Cli::try_parse_from([
                "pocketrag",
                "add",
                "a.pdf",
                "--legacy",
                "--chunk-size",
                "300"
            ])
            .is_err()
        );
        let cli = Cli::parse_from(["pocketrag", "add", "a.pdf", "docs", "--force"]);
        match cli.command {
            Command::Add(args) => {
                assert_eq!(args.paths.len(), 2);
                assert!(args.force);
                assert!(!args.legacy);
            }
            _ => panic!("expected add command"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["pocketrag", "status", "-vv", "--json"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Status(StatusArgs { json: true })));
    }
}
