mod config;

use clap::{Parser, Subcommand};
use conduit_core::Message;
use conduit_llm::{
    estimate_prompt_tokens, CallOptions, CallOutcome, ChannelEventSink, EventBinding, EventContext,
    LlmOrchestrator, OpenAiTransport,
};
use config::ConduitConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conduit", about = "Streaming LLM calls with unified retries")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conduit.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one orchestrated call, printing events as JSON lines
    Call {
        /// User message to send
        #[arg(short, long)]
        prompt: String,
        /// System prompt
        #[arg(long)]
        system: Option<String>,
        /// Stream id for the first attempt
        #[arg(long)]
        stream_id: Option<String>,
    },
    /// Estimate prompt tokens for a text
    Tokens {
        #[arg(short, long)]
        text: String,
        /// System prompt counted ahead of the text
        #[arg(long)]
        system: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConduitConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Call {
            prompt,
            system,
            stream_id,
        } => run_call(config, prompt, system, stream_id).await,
        Commands::Tokens { text, system } => {
            let count = estimate_prompt_tokens(
                &config.call.model,
                Some(&text),
                None,
                system.as_deref(),
                config.call.token_counter_model.as_deref(),
            )?;
            println!("{count}");
            Ok(())
        }
    }
}

async fn run_call(
    config: ConduitConfig,
    prompt: String,
    system: Option<String>,
    stream_id: Option<String>,
) -> anyhow::Result<()> {
    let transport = Arc::new(OpenAiTransport::new(config.provider.clone())?);
    let orchestrator = LlmOrchestrator::new(transport);

    let (sink, mut rx) = ChannelEventSink::new();
    let run_id = uuid::Uuid::new_v4().to_string();
    let events = EventBinding::new(Arc::new(sink), EventContext::new(&run_id, "cli"));

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to serialize event"),
            }
        }
    });

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, cancelling call");
            on_ctrl_c.cancel();
        }
    });

    let mut options = CallOptions::new().with_events(events).with_cancel(cancel);
    if let Some(system) = system {
        options = options.with_system_prompt(system);
    }
    if let Some(stream_id) = stream_id {
        options = options.with_stream_id(stream_id);
    }

    info!(run_id = %run_id, model = %config.call.model, "Starting call");
    let result = orchestrator
        .execute(&[Message::user(prompt)], &config.call, options)
        .await;

    // The options (and with them the sink) are gone; drain remaining events.
    printer.await?;

    let outcome = result?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    match outcome {
        CallOutcome::Success(_) => Ok(()),
        CallOutcome::Failure(err) => anyhow::bail!("{}", err.error),
    }
}
