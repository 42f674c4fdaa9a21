// Splitbot - image-generation admission queue
// Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use splitbot::config::{load_config, load_config_from, Config};
use splitbot::logging;
use splitbot::{
    Admission, ChannelSink, GenerationOutcome, GenerationParams, ImageQueue, SafetyGate,
    SharedBackend,
};

/// Actor key used for requests made from the command line
const CLI_ACTOR: &str = "cli:local";

/// Upper bound on flushing queued status lines before exit
const STATUS_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "splitbot", version, about = "Moderated, rate-limited image generation queue")]
struct Cli {
    /// Config file (defaults to ~/.splitbot/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a prompt through the moderation checks
    Check {
        prompt: String,
    },
    /// Generate one image through the queue
    Generate {
        prompt: String,
        #[arg(long)]
        negative: Option<String>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        #[arg(long)]
        steps: Option<u32>,
        #[arg(long)]
        guidance: Option<f32>,
        /// Output PNG path
        #[arg(long, short)]
        out: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    logging::init(&level)?;

    match cli.command {
        Command::Check { prompt } => check(&config, &prompt),
        Command::Generate {
            prompt,
            negative,
            width,
            height,
            steps,
            guidance,
            out,
        } => {
            let mut params = GenerationParams::new(prompt);
            params.negative_prompt = negative;
            if let Some(width) = width {
                params.width = width;
            }
            if let Some(height) = height {
                params.height = height;
            }
            if let Some(steps) = steps {
                params.steps = steps;
            }
            if let Some(guidance) = guidance {
                params.guidance_scale = guidance;
            }
            generate(&config, params, &out).await
        }
        Command::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

fn check(config: &Config, prompt: &str) -> Result<()> {
    let gate = SafetyGate::with_policy(&config.moderation);
    let assessment = gate.assess(prompt);
    let verdict = gate.check(prompt);

    println!("safe:              {}", verdict.safe);
    if !verdict.safe {
        println!("reason:            {}", verdict.reason);
    }
    println!(
        "blocked term:      {}",
        assessment.blocked_term.as_deref().unwrap_or("-")
    );
    println!("override pattern:  {}", assessment.override_pattern);
    println!(
        "suspicion score:   {} (threshold {})",
        assessment.suspicion_score, assessment.suspicion_threshold
    );
    Ok(())
}

async fn generate(config: &Config, params: GenerationParams, out: &Path) -> Result<()> {
    let backend = SharedBackend::from_config(&config.backend)?;
    let queue = ImageQueue::from_config(config);

    let (sink, mut events) = ChannelSink::pair();
    queue.register_status(CLI_ACTOR, Arc::new(sink));
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            eprintln!("{event}");
        }
    });

    let outcome = match queue.submit(backend.request(CLI_ACTOR, params)) {
        Admission::Accepted { message, ticket, .. } => {
            info!("{message}");
            ticket.outcome().await
        }
        Admission::Rejected { rejection, .. } => anyhow::bail!("{rejection}"),
    };

    // Dropping the last queue handle closes the status stream once the
    // worker exits, so the printer drains every event and stops
    drop(queue);
    if tokio::time::timeout(STATUS_DRAIN_TIMEOUT, printer).await.is_err() {
        warn!("Timed out waiting for status messages");
    }

    match outcome {
        GenerationOutcome::Complete(bytes) => {
            std::fs::write(out, &bytes)
                .with_context(|| format!("Failed to write image: {}", out.display()))?;
            println!("Wrote {} bytes to {}", bytes.len(), out.display());
            Ok(())
        }
        GenerationOutcome::Failed(reason) => anyhow::bail!("Image generation failed: {reason}"),
    }
}
