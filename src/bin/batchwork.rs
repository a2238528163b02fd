//! Command-line driver for batchwork queues.
//!
//! Runs a list of payloads through a simulated processor so queue settings can
//! be tried out before wiring in a real one.
//!
//! Usage:
//!   batchwork run https://shop.example.com/p/1 https://shop.example.com/p/2
//!   batchwork run --file urls.txt --concurrency 5 --failure-rate 0.1
//!   batchwork config --preset production > batchwork.toml

use batchwork::{
    BatchworkConfig, BatchworkError, ConfigOverrides, QueueEvent, QueueTopic, Result, WorkQueue,
    logging::init_logging,
    processor::{ItemProcessor, ProcessOutput, processor},
};
use clap::{Parser, Subcommand, ValueEnum};
use rand::Rng;
use serde_json::{Value, json};
use std::{fs, process, time::Duration};
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "batchwork",
    version,
    about = "Batched work queue runner"
)]
struct Cli {
    #[arg(
        long = "config",
        global = true,
        help = "Path to a TOML configuration file",
        value_name = "PATH"
    )]
    config: Option<String>,

    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Process payloads with a simulated processor")]
    Run {
        #[arg(help = "Payloads to enqueue (JSON values or plain strings)")]
        payloads: Vec<String>,

        #[arg(
            long = "file",
            help = "Read payloads from a file: a JSON array or one payload per line",
            value_name = "PATH"
        )]
        file: Option<String>,

        #[arg(long, help = "Maximum items in flight per batch")]
        concurrency: Option<usize>,

        #[arg(long = "retry-budget", help = "Attempts allowed per item")]
        retry_budget: Option<u32>,

        #[arg(long = "delay-ms", help = "Pause between batches in milliseconds")]
        delay_ms: Option<u64>,

        #[arg(long = "timeout-ms", help = "Per-item processing timeout in milliseconds")]
        timeout_ms: Option<u64>,

        #[arg(
            long = "failure-rate",
            default_value_t = 0.0,
            help = "Probability in [0, 1] that a simulated attempt fails"
        )]
        failure_rate: f64,

        #[arg(
            long = "latency-ms",
            default_value_t = 50,
            help = "Upper bound of simulated processing latency"
        )]
        latency_ms: u64,
    },

    #[command(about = "Print a configuration file")]
    Config {
        #[arg(long, value_enum, default_value_t = Preset::Default)]
        preset: Preset,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    Default,
    Development,
    Production,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => BatchworkConfig::from_file(path)?,
        None => BatchworkConfig::from_env()?,
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    match cli.command {
        Command::Config { preset } => {
            let config = match preset {
                Preset::Default => config,
                Preset::Development => BatchworkConfig::development(),
                Preset::Production => BatchworkConfig::production(),
            };
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Run {
            payloads,
            file,
            concurrency,
            retry_budget,
            delay_ms,
            timeout_ms,
            failure_rate,
            latency_ms,
        } => {
            init_logging(&config.logging)?;

            if !(0.0..=1.0).contains(&failure_rate) {
                return Err(BatchworkError::Configuration(format!(
                    "failure rate must be between 0 and 1, got {}",
                    failure_rate
                )));
            }

            let mut items: Vec<Value> = payloads.iter().map(|p| parse_payload(p)).collect();
            if let Some(path) = file {
                items.extend(read_payload_file(&path)?);
            }

            let mut overrides = ConfigOverrides::new();
            if let Some(concurrency) = concurrency {
                overrides = overrides.concurrency(concurrency);
            }
            if let Some(retry_budget) = retry_budget {
                overrides = overrides.retry_budget(retry_budget);
            }
            if let Some(ms) = delay_ms {
                overrides = overrides.inter_batch_delay(Duration::from_millis(ms));
            }
            if let Some(ms) = timeout_ms {
                overrides = overrides.item_timeout(Duration::from_millis(ms));
            }

            let queue = WorkQueue::with_event_config(config.queue, config.events)
                .with_processor(simulated_processor(failure_rate, latency_ms));

            queue.subscribe(QueueTopic::Progress, |event| {
                if let QueueEvent::Progress(progress) = event {
                    info!(
                        "Progress {}% ({}/{}, {} failed)",
                        progress.percentage, progress.processed, progress.total, progress.failed
                    );
                }
                Ok(())
            });

            queue.add_to_queue(items);
            let report = queue.start(Some(overrides)).await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn simulated_processor(failure_rate: f64, latency_ms: u64) -> ItemProcessor {
    processor(move |payload, options| async move {
        let (latency, fails) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..=latency_ms), rng.gen_bool(failure_rate))
        };
        tokio::time::sleep(Duration::from_millis(latency)).await;

        if fails {
            return Err(BatchworkError::processing(format!(
                "simulated failure on attempt {}",
                options.attempt
            )));
        }
        Ok(ProcessOutput::completed(json!({
            "payload": payload,
            "attempt": options.attempt,
            "latency_ms": latency,
        })))
    })
}

fn parse_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn read_payload_file(path: &str) -> Result<Vec<Value>> {
    let content = fs::read_to_string(path)?;
    if let Ok(Value::Array(values)) = serde_json::from_str::<Value>(&content) {
        return Ok(values);
    }
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_payload)
        .collect())
}
