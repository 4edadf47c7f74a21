//! Terminal client for the CoresAI chat, search and streaming backends.

use std::time::Duration;

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use cores_stream::observability::ObservabilityConfig;
use cores_stream::prelude::*;

#[derive(Debug, Parser)]
#[command(name = "cores", version, about = "Talk to the CoresAI backends from a terminal")]
struct Cli {
    /// Base URL of the chat/search backend (overrides CORES_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Base URL of the streaming backend (overrides CORES_STREAMING_URL).
    #[arg(long, global = true)]
    streaming_url: Option<String>,
    /// Request timeout in seconds (overrides CORES_TIMEOUT_SECS).
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    /// Log filter, e.g. `debug` or `cores_stream=trace` (overrides CORES_LOG_LEVEL).
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the API backend's health report.
    Health,
    /// Send a single chat message and print the reply.
    Chat {
        message: String,
        /// Optional system prompt sent before the message.
        #[arg(long)]
        system: Option<String>,
    },
    /// Run a web search.
    Search { query: String },
    /// Ask the streaming backend which schema fits a message.
    DetectSchema { message: String },
    /// Stream a structured response, printing each chunk as it arrives.
    Stream {
        message: String,
        #[arg(long)]
        output_mode: Option<OutputMode>,
        #[arg(long)]
        schema_type: Option<SchemaType>,
        #[arg(long)]
        context: Option<String>,
    },
    /// Look up creative-software knowledge.
    Creative { query: String },
    /// Print server status.
    ServerStatus {
        #[arg(long)]
        game: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut logging = ObservabilityConfig::from_env();
    if let Some(level) = &cli.log_level {
        logging = logging.filter(level);
    }
    logging.init();

    let client = build_client(&cli)?;
    let credential = Credential::from_env();

    match cli.command {
        Command::Health => match client.health_details().await {
            Some(health) => print_json(&health)?,
            None => bail!("backend at {} is unreachable", client.config().api_base_url),
        },
        Command::Chat { message, system } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(Message::system(system));
            }
            messages.push(Message::user(message));
            let response = client.send_chat(messages, credential.as_ref()).await?;
            match response.reply() {
                Some(reply) => println!("{}", reply.content),
                None => print_json(&response)?,
            }
        }
        Command::Search { query } => {
            let response = client.web_search(&query, credential.as_ref()).await?;
            print_json(&response)?;
        }
        Command::DetectSchema { message } => {
            let detection = client.detect_schema(&message, credential.as_ref()).await?;
            print_json(&detection)?;
        }
        Command::Stream {
            message,
            output_mode,
            schema_type,
            context,
        } => {
            let mut request = StreamingRequest::user(message);
            request.output_mode = output_mode;
            request.schema_type = schema_type;
            request.context = context;
            stream(&client, request, credential).await?;
        }
        Command::Creative { query } => {
            match client
                .creative_software_knowledge(&query, credential.as_ref())
                .await?
            {
                Some(knowledge) => print_json(&knowledge)?,
                None => println!("no knowledge returned"),
            }
        }
        Command::ServerStatus { game } => {
            let status = client
                .server_status(game.as_deref(), credential.as_ref())
                .await?;
            print_json(&status)?;
        }
    }
    Ok(())
}

fn build_client(cli: &Cli) -> anyhow::Result<StreamingClient> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &cli.api_url {
        config = config.api_base_url(url.clone());
    }
    if let Some(url) = &cli.streaming_url {
        config = config.streaming_base_url(url.clone());
    }
    if let Some(secs) = cli.timeout_secs {
        config = config.timeout(Duration::from_secs(secs));
    }
    StreamingClient::new(config).context("invalid client configuration")
}

async fn stream(
    client: &StreamingClient,
    request: StreamingRequest,
    credential: Option<Credential>,
) -> anyhow::Result<()> {
    let mut subscription = client.start_stream(request, credential)?;
    let abort = subscription.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    while let Some(event) = subscription.next_event().await {
        match event {
            ChunkEvent::Chunk { chunk, .. } => {
                println!(
                    "#{} [{}] {}",
                    chunk.chunk_index,
                    chunk.chunk_type,
                    serde_json::to_string(&chunk.data)?
                );
            }
            ChunkEvent::Completed { chunks, .. } => {
                tracing::info!(chunks, "streaming completed");
            }
            ChunkEvent::Error { error, .. } if error.is_cancelled() => {
                eprintln!("streaming stopped");
            }
            ChunkEvent::Error { error, .. } => {
                bail!("streaming failed: {error}");
            }
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
