use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use inkstream_core::{
    client::InkClient,
    config::Config,
    error::CoreError,
    model::{
        BookContext, ChunkUsage, CompletionChunk, GenerationKind, GenerationRequest,
        GenerationSettings, ModelId, StreamBookContext, StreamRequest,
    },
    orchestrator::Orchestrator,
    server::{self, AppState},
    sse::{DecodeOutcome, StreamHandler},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "inkstream writing-assistant proxy", long_about = None)]
struct Cli {
    /// JSON or TOML config file; built-in defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Overrides `server.bind`
        #[arg(long)]
        bind: Option<String>,
    },
    /// Request a complete generation from a running server
    Generate {
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,
        #[arg(long, default_value = "continue")]
        kind: GenerationKind,
        #[arg(short, long, help = "Text to continue or work on")]
        context: String,
        #[arg(long, default_value = "deepseek-chat")]
        model: ModelId,
        #[arg(long, default_value = "fantasy")]
        genre: String,
        #[arg(long, default_value = "literary")]
        style: String,
        #[arg(long, default_value_t = 0.7)]
        temperature: f32,
        #[arg(long, default_value_t = 2000)]
        max_tokens: u32,
    },
    /// Stream a generation from a running server (prints deltas live)
    Stream {
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,
        #[arg(short, long)]
        prompt: String,
        #[arg(long, default_value = "fantasy")]
        genre: String,
        #[arg(long, default_value = "literary")]
        style: String,
    },
}

#[derive(Default)]
struct Printer {
    saw_delta: bool,
    usage: Option<ChunkUsage>,
    error: Option<CoreError>,
}

impl StreamHandler for Printer {
    fn on_chunk(&mut self, chunk: CompletionChunk) {
        for part in chunk.contents() {
            self.saw_delta = true;
            print!("{part}");
        }
        io::stdout().flush().ok();
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
    }

    fn on_error(&mut self, err: CoreError) {
        self.error = Some(err);
    }

    fn on_done(&mut self) {
        if self.saw_delta {
            println!();
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
            let orchestrator = Orchestrator::from_config(&cfg)?;
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            server::run(listener, AppState::new(orchestrator), shutdown_signal()).await?;
        }
        Commands::Generate {
            url,
            kind,
            context,
            model,
            genre,
            style,
            temperature,
            max_tokens,
        } => {
            let client = InkClient::new(url, &cfg.http)?;
            let req = GenerationRequest {
                kind,
                context,
                model,
                book_context: BookContext {
                    genre,
                    style,
                    characters: None,
                    plot_summary: None,
                },
                settings: GenerationSettings {
                    temperature,
                    max_tokens,
                    streaming: false,
                },
            };
            let resp = client.generate(&req).await?;
            println!("{}", resp.content);
            eprintln!(
                "[{} | {} tokens | {} ms | {}]",
                resp.model,
                resp.usage.total_tokens,
                resp.metadata.processing_time,
                resp.metadata.request_id
            );
        }
        Commands::Stream {
            url,
            prompt,
            genre,
            style,
        } => {
            let client = InkClient::new(url, &cfg.http)?;
            let req = StreamRequest {
                prompt,
                book_context: StreamBookContext { genre, style },
            };
            let mut printer = Printer::default();
            match client.stream(&req, &mut printer).await? {
                DecodeOutcome::Completed => {
                    if let Some(u) = printer.usage {
                        eprintln!("[{} tokens]", u.total_tokens);
                    }
                }
                DecodeOutcome::ServerError | DecodeOutcome::TransportError => {
                    if printer.saw_delta {
                        println!();
                    }
                    if let Some(err) = printer.error {
                        return Err(err.into());
                    }
                }
            }
        }
    }

    Ok(())
}
