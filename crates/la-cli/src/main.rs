use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use la_engine::{
    CancelToken, ContinueRequest, EngineConfig, HighlightRequest, InferenceService, NextTokenRequest,
};
use la_model::{BpeTokenizer, ChatMessage, LlamaModel};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lookahead", version, about = "Next-token lookahead over a local GGUF model")]
struct Cli {
    /// Config file (defaults to $LOOKAHEAD_CONFIG, then ./lookahead.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// GGUF model file, overriding `model_path` from the config
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Per-token loss and alternatives for a document
    Highlights {
        #[arg(long)]
        document: String,

        /// Instruction the document answers
        #[arg(long)]
        instruction: Option<String>,

        /// Revised text to score instead of the document
        #[arg(long)]
        edited: Option<String>,

        /// Alternatives per token
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// The K most likely next tokens, each with its greedy follow-up
    NextTokens {
        #[arg(long)]
        document: String,

        #[arg(long)]
        instruction: Option<String>,

        /// Text of the rewrite written so far
        #[arg(long, default_value = "")]
        continuation: String,

        /// Branch width
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Continue a conversation along K branches
    Continue {
        /// JSON file with an array of {"role", "content"} messages
        path: PathBuf,

        /// Branch width
        #[arg(short, long)]
        k: Option<usize>,

        /// Greedy tokens after each branch token
        #[arg(short, long)]
        n: Option<usize>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::load()?,
    };
    if let Some(model) = cli.model {
        config.model_path = Some(model);
    }

    let service: InferenceService<LlamaModel, BpeTokenizer> = InferenceService::new(config);
    service
        .init_from_gguf(None)
        .context("failed to load model (pass --model or set model_path)")?;
    let cancel = CancelToken::new();
    // First Ctrl-C cancels before the next forward pass; a second one exits.
    #[cfg(unix)]
    {
        use signal_hook::consts::SIGINT;
        signal_hook::flag::register_conditional_shutdown(SIGINT, 130, cancel.flag())
            .context("failed to install Ctrl-C handler")?;
        signal_hook::flag::register(SIGINT, cancel.flag())
            .context("failed to install Ctrl-C handler")?;
    }

    match cli.command {
        Commands::Highlights {
            document,
            instruction,
            edited,
            k,
        } => {
            let req = HighlightRequest {
                document,
                instruction,
                edited_document: edited,
                k,
            };
            print_json(&service.highlights(&req, &cancel)?)?;
        }
        Commands::NextTokens {
            document,
            instruction,
            continuation,
            k,
        } => {
            let req = NextTokenRequest {
                original_document: document,
                instruction,
                continuation,
                k,
            };
            print_json(&service.next_token_predictions(&req, &cancel)?.texts())?;
        }
        Commands::Continue { path, k, n } => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let messages: Vec<ChatMessage> = serde_json::from_str(&raw)
                .with_context(|| format!("invalid messages in {}", path.display()))?;
            let req = ContinueRequest {
                messages,
                n_branch_tokens: k,
                n_future_tokens: n,
            };
            let branches = service.continue_messages(&req, &cancel)?;
            let texts: Vec<&str> = branches.iter().map(|b| b.text.as_str()).collect();
            print_json(&texts)?;
        }
    }

    service.close();
    info!("done");
    Ok(())
}
