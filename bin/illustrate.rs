// Command-line front end: run one request, or prune the output directory
// Usage: illustrate run "I lost my job today" --style aquarelle --intensity 1.4

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use emotion_illustrator::artifacts::{self, RetentionPolicy};
use emotion_illustrator::config::AppConfig;
use emotion_illustrator::diffusion::DevicePreference;
use emotion_illustrator::logging;
use emotion_illustrator::pipeline::{LogProgress, Outcome};
use emotion_illustrator::presenter::emotion_message;
use emotion_illustrator::startup::build_illustrator;
use emotion_illustrator::submission::{Style, Submission, DEFAULT_INTENSITY};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::info;

#[derive(Parser)]
#[command(name = "illustrate", version, about = "Turn a written feeling into an image, a track and a score")]
struct Cli {
    /// Output directory (overrides config and environment)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the five artifacts for one narrative
    Run {
        /// Narrative text; use --file to read it from disk
        narrative: Option<String>,

        #[arg(long, conflicts_with = "narrative")]
        file: Option<PathBuf>,

        #[arg(long)]
        title: Option<String>,

        /// 0.1 to 2.0
        #[arg(long, default_value_t = DEFAULT_INTENSITY)]
        intensity: f64,

        /// abstract/abstrait, impressionist, photographic, surrealist, watercolor/aquarelle
        #[arg(long, default_value = "abstrait")]
        style: Style,

        /// auto, cuda or cpu
        #[arg(long)]
        device: Option<DevicePreference>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove old artifact sets
    Sweep {
        #[arg(long)]
        max_sets: Option<usize>,

        #[arg(long)]
        max_age_hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::setup_tracing()?;
    let cli = Cli::parse();

    let mut config = AppConfig::load()?;
    if let Some(dir) = cli.output_dir {
        config.set_output_dir(dir);
    }

    match cli.command {
        Command::Run {
            narrative,
            file,
            title,
            intensity,
            style,
            device,
            json,
        } => {
            let narrative = match (narrative, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, None) => bail!("give a narrative or --file"),
            };
            if let Some(device) = device {
                config.set_device(device);
            }

            let submission = Submission::new(title, narrative, intensity, style);
            run(&config, submission, json).await
        }
        Command::Sweep {
            max_sets,
            max_age_hours,
        } => {
            let mut policy = config.retention();
            if max_sets.is_some() || max_age_hours.is_some() {
                policy = RetentionPolicy {
                    max_sets,
                    max_age: max_age_hours.map(|h| Duration::from_secs(h * 3600)),
                };
            }
            if policy.max_sets == Some(0) {
                bail!("--max-sets must be at least 1");
            }

            let report = artifacts::sweep(config.output_dir(), policy, SystemTime::now())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn run(config: &AppConfig, submission: Submission, json: bool) -> Result<()> {
    if submission.is_blank() {
        info!("Nothing to illustrate");
        return Ok(());
    }

    let illustrator = build_illustrator(config).await?;
    let outcome = illustrator.handle(submission, &LogProgress).await?;

    let Outcome::Completed(result) = outcome else {
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", result.submission.heading());
    println!("{}", emotion_message(&result.classification.label.capitalized()));
    for (kind, path) in result.artifacts.paths() {
        println!("  {:<13} {}", kind.to_string(), path.display());
    }
    Ok(())
}
