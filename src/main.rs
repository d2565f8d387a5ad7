//! CLI entry point for assistant-stream.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use reqwest::StatusCode;

use assistant_stream::cancellation::CancellationRegistry;
use assistant_stream::client::{ChatClient, ChatMessage};
use assistant_stream::config::Config;
use assistant_stream::logging;
use assistant_stream::pacer::{PacerConfigUpdate, timing};
use assistant_stream::reasoning::{ReasoningStreamTransformer, TagStyle};
use assistant_stream::relay::{RelayOptions, RelayOutcome, run_session};
use assistant_stream::sse::{StreamResponse, event_stream_headers};

#[derive(Parser, Debug)]
#[command(
    name = "assistant-stream",
    author,
    version,
    about = "Stream assistant responses with reasoning tags and adaptive pacing"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Config profile name
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print text as soon as it arrives
    #[arg(long, global = true)]
    no_pacing: bool,

    /// Tag style for reasoning spans (thinking or reasoning)
    #[arg(long, global = true, value_name = "STYLE")]
    tags: Option<TagStyle>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a prompt and stream the answer to stdout
    Chat(ChatArgs),
    /// Run a captured SSE file through the pipeline
    Replay(ReplayArgs),
    /// Show how text is split into paced tokens
    Tokenize {
        /// Text to tokenize
        text: String,
    },
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// Prompt to send to the model
    #[arg(short, long)]
    prompt: String,
    /// Conversation thread id (defaults to a fresh id)
    #[arg(long)]
    thread: Option<String>,
    /// Override model for this run
    #[arg(long)]
    model: Option<String>,
    /// System prompt sent ahead of the user prompt
    #[arg(long)]
    system: Option<String>,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Captured `text/event-stream` body
    file: PathBuf,
    /// Feed the file in chunks of this many bytes
    #[arg(long, default_value_t = 64)]
    chunk_size: usize,
    /// Print the rewritten SSE instead of the paced text
    #[arg(long)]
    raw: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = Config::load(cli.config.clone(), cli.profile.as_deref())?;
    apply_cli_overrides(&cli, &mut config);

    match cli.command {
        Commands::Chat(args) => run_chat(config, args).await,
        Commands::Replay(args) => run_replay(&config, args).await,
        Commands::Tokenize { text } => run_tokenize(&config, &text),
    }
}

fn apply_cli_overrides(cli: &Cli, config: &mut Config) {
    if let Some(tags) = cli.tags {
        config.tags = Some(tags);
    }
    if cli.no_pacing {
        config.apply_pacer_update(&PacerConfigUpdate {
            enabled: Some(false),
            ..PacerConfigUpdate::default()
        });
    }
}

fn relay_options(config: &Config) -> Result<RelayOptions> {
    Ok(RelayOptions {
        tags: config.tags(),
        pacer: config.pacer_config()?,
    })
}

fn stdout_sink(text: &str) {
    let mut out = io::stdout().lock();
    if let Err(err) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
        logging::warn(format!("Failed to write output: {err}"));
    }
}

/// Cancel `thread_id` through the registry when Ctrl-C arrives.
fn spawn_interrupt_handler(registry: Arc<CancellationRegistry>, thread_id: String) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && registry.cancel(&thread_id) {
            logging::info("Interrupted");
        }
    });
}

fn report(outcome: &RelayOutcome) {
    println!();
    if outcome.cancelled {
        logging::info("Stream cancelled");
    }
    if logging::is_verbose() {
        eprintln!(
            "{} events, {} chars at {:.1} chars/s",
            outcome.events, outcome.content_chars, outcome.stats.average_speed
        );
    }
    tracing::debug!(
        events = outcome.events,
        chars = outcome.content_chars,
        finish_reason = outcome.finish_reason.as_deref().unwrap_or("none"),
        average_speed = outcome.stats.average_speed,
        elapsed_ms = outcome.stats.elapsed.as_millis() as u64,
        "Session finished"
    );
}

async fn run_chat(mut config: Config, args: ChatArgs) -> Result<()> {
    if let Some(model) = args.model {
        config.model = Some(model);
    }
    let client = ChatClient::new(&config)?;
    let options = relay_options(&config)?;
    let registry: Arc<CancellationRegistry> = Arc::new(CancellationRegistry::new());
    let thread_id = args
        .thread
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    spawn_interrupt_handler(Arc::clone(&registry), thread_id.clone());

    let mut messages: Vec<ChatMessage> =
        args.system.map(ChatMessage::system).into_iter().collect();
    messages.push(ChatMessage::user(args.prompt));
    let outcome = run_session(&registry, &thread_id, &options, stdout_sink, |token| {
        let client = &client;
        let messages = &messages;
        async move { client.stream_chat(messages, &token).await }
    })
    .await?;
    report(&outcome);
    Ok(())
}

async fn run_replay(config: &Config, args: ReplayArgs) -> Result<()> {
    if args.chunk_size == 0 {
        bail!("--chunk-size must be greater than zero");
    }
    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let chunks: Vec<Vec<u8>> = bytes.chunks(args.chunk_size).map(<[u8]>::to_vec).collect();
    let response = StreamResponse::from_chunks(StatusCode::OK, event_stream_headers(), chunks);

    if args.raw {
        let rewritten = ReasoningStreamTransformer::new(config.tags())
            .transform_response(response)
            .text()
            .await?;
        print!("{rewritten}");
        return Ok(());
    }

    let options = relay_options(config)?;
    let registry: Arc<CancellationRegistry> = Arc::new(CancellationRegistry::new());
    let thread_id = format!("replay-{}", args.file.display());
    spawn_interrupt_handler(Arc::clone(&registry), thread_id.clone());

    let outcome = run_session(&registry, &thread_id, &options, stdout_sink, |_token| async move {
        Ok(response)
    })
    .await?;
    report(&outcome);
    Ok(())
}

fn run_tokenize(config: &Config, text: &str) -> Result<()> {
    let pacer = config.pacer_config()?;
    let mut out = io::stdout().lock();
    for token in timing::schedule(text, 0, &pacer) {
        writeln!(
            out,
            "{:<12} {:>6}ms  {:?}",
            token.category.to_string(),
            token.delay.as_millis(),
            token.content
        )?;
    }
    Ok(())
}
