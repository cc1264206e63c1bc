use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lmserve::cli::{self, ServeOverrides};
use lmserve::config::DEFAULT_MODEL_DIR;

#[derive(Parser)]
#[command(name = "lmserve")]
#[command(about = "Inference service for a fine-tuned causal language model", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP inference server
    Serve {
        /// JSON config file (optional; defaults apply otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Local model artifact directory
        #[arg(short, long)]
        model_dir: Option<PathBuf>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Default max length when a request omits it
        #[arg(long)]
        max_length: Option<usize>,

        /// Device: auto, cpu, cuda, or metal
        #[arg(long)]
        device: Option<String>,

        /// Disable /metrics and the host sampler
        #[arg(long)]
        no_metrics: bool,
    },

    /// Generate one completion and print it
    Generate {
        /// Prompt text
        #[arg(long, default_value = "What are the symptoms of ")]
        prompt: String,

        /// Local model artifact directory
        #[arg(long, default_value = DEFAULT_MODEL_DIR)]
        model_path: PathBuf,

        /// Max total length (prompt + continuation)
        #[arg(long, default_value = "50")]
        max_length: usize,

        /// Device: auto, cpu, cuda, or metal
        #[arg(long, default_value = "auto")]
        device: String,
    },

    /// Re-save a model artifact in another weight format
    Export {
        /// Source artifact directory
        #[arg(long)]
        model_path: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// JSON config file whose `save_format` is the default format
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Weight format: npz or safetensors (default: config `save_format`)
        #[arg(short, long)]
        format: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lmserve=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            model_dir,
            host,
            port,
            max_length,
            device,
            no_metrics,
        } => {
            let overrides = ServeOverrides {
                model_dir,
                host,
                port,
                max_length,
                device,
                no_metrics,
            };
            cli::serve(config, overrides).await?;
        }

        Commands::Generate {
            prompt,
            model_path,
            max_length,
            device,
        } => {
            cli::generate(prompt, model_path, max_length, device).await?;
        }

        Commands::Export {
            model_path,
            output,
            config,
            format,
        } => {
            cli::export(model_path, output, config, format).await?;
        }
    }

    Ok(())
}
