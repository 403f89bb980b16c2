//! CLI binary for receipt-extract.
//!
//! A thin shim over the library crate: maps CLI flags to
//! `ExtractionConfig`, runs one synchronous extraction (the same
//! orchestrator/reconciliation contract the queued workers use) and prints
//! the result as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use receipt_extract::{
    ExtractionConfig, ExtractionRequest, Extractor, HttpRecognizer, LocalOrHttpSource,
    MemoryStore, NoHistory, OpenAiVision, ReconcilePolicy, Worker,
};
use std::io;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a local receipt photo (stdout JSON)
  receipt-extract receipt.jpg

  # Pre-signed object-storage URL, explicit identities
  receipt-extract https://storage.local/receipts/17.jpg --receipt-id 17 --user-id 3

  # Local Ollama endpoint with a vision model
  receipt-extract receipt.jpg --vision-url http://localhost:11434/v1 --model gemma3:27b

  # Strict reconciliation: totals must add up, mismatches block
  receipt-extract receipt.jpg --strict

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY         API key for the vision endpoint
  RECEIPT_OCR_URL        OCR sidecar base URL (default http://localhost:8001)
  RECEIPT_VISION_URL     Vision endpoint base URL (default https://api.openai.com/v1)

SETUP:
  1. Start the OCR sidecar:  docker run -p 8001:8001 pantrypilot/ocr-sidecar
  2. Set API key:            export OPENAI_API_KEY=sk-...
  3. Extract:                receipt-extract receipt.jpg | jq .
"#;

/// Extract structured data from a receipt photo using OCR + a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "receipt-extract",
    version,
    about = "Extract structured data from receipt photos using OCR + Vision LLMs",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image path or HTTP/HTTPS URL of the receipt photo.
    image: String,

    /// Receipt identity (used for the deterministic job key and logging).
    #[arg(long, default_value_t = 1)]
    receipt_id: i64,

    /// Owning-user identity.
    #[arg(long, default_value_t = 1)]
    user_id: i64,

    /// OCR sidecar base URL.
    #[arg(long, env = "RECEIPT_OCR_URL", default_value = "http://localhost:8001")]
    ocr_url: String,

    /// Vision endpoint base URL (any OpenAI-compatible server).
    #[arg(
        long,
        env = "RECEIPT_VISION_URL",
        default_value = "https://api.openai.com/v1"
    )]
    vision_url: String,

    /// API key for the vision endpoint.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Vision model ID (e.g. gpt-4o, gemma3:27b).
    #[arg(long, env = "RECEIPT_MODEL", default_value = "gpt-4o")]
    model: String,

    /// Max model output tokens.
    #[arg(long, default_value_t = 4096)]
    max_tokens: usize,

    /// Retries on transient vision API failure.
    #[arg(long, default_value_t = 2)]
    max_retries: u32,

    /// End-to-end extraction timeout in seconds.
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// Longest image edge after normalization, in pixels.
    #[arg(long, default_value_t = 2048)]
    max_image_edge: u32,

    /// Strict reconciliation policy: grand-total mismatches block.
    #[arg(long)]
    strict: bool,

    /// Compact JSON output instead of pretty-printed.
    #[arg(long)]
    compact: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let policy = if cli.strict {
        ReconcilePolicy::strict()
    } else {
        ReconcilePolicy::lenient()
    };
    let config = ExtractionConfig::builder()
        .model(&cli.model)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .extract_timeout_secs(cli.timeout)
        .max_image_edge(cli.max_image_edge)
        .policy(policy)
        .build()
        .context("invalid configuration")?;

    let recognizer = Arc::new(
        HttpRecognizer::new(&cli.ocr_url, config.api_timeout_secs)
            .context("building OCR adapter")?,
    );
    let vision = Arc::new(
        OpenAiVision::new(
            &cli.vision_url,
            cli.api_key.clone(),
            &config.model,
            config.temperature,
            config.max_tokens,
            config.api_timeout_secs,
        )
        .context("building vision adapter")?,
    );
    let images = Arc::new(LocalOrHttpSource::new(config.api_timeout_secs)?);
    let store = Arc::new(MemoryStore::new());

    let extractor = Arc::new(Extractor::new(
        recognizer,
        vision,
        Arc::new(NoHistory),
        config,
    ));
    let worker = Worker::new(
        "cli",
        Arc::new(receipt_extract::JobQueue::new()),
        extractor,
        images,
        store,
    );

    let request = ExtractionRequest {
        receipt_id: cli.receipt_id,
        image_location: cli.image.clone(),
        user_id: cli.user_id,
    };
    let result = worker.trigger_now(&request).await;

    let json = if cli.compact {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{json}");

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
