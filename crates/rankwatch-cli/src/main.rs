// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Rankwatch operator CLI.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};

use rankwatch::cache::{self, Namespace};
use rankwatch::config::CacheBackend;
use rankwatch::{EngineConfig, Orchestrator, PageInspector, RankReport, TierPreference};

#[derive(Parser)]
#[command(
    name = "rankwatch",
    about = "Tiered best-sellers rank tracking: HTTP first, a humanized browser when blocked",
    version
)]
struct Cli {
    /// Path to a JSON config file.
    /// Falls back to RANKWATCH_CONFIG, ./rankwatch.json, ~/.rankwatch/config.json.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TierArg {
    /// HTTP first, browser when blocked.
    Auto,
    /// HTTP only.
    Http,
    /// Browser only.
    Browser,
}

impl From<TierArg> for TierPreference {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::Auto => TierPreference::Auto,
            TierArg::Http => TierPreference::HttpOnly,
            TierArg::Browser => TierPreference::BrowserOnly,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the rank of one product page.
    Fetch {
        url: String,

        #[arg(long, value_enum, default_value_t = TierArg::Auto)]
        tier: TierArg,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Resolve every URL in a file (one per line, `#` starts a comment).
    Batch {
        file: PathBuf,

        /// Concurrent requests; overrides the config.
        #[arg(short, long)]
        workers: Option<usize>,

        #[arg(long, value_enum, default_value_t = TierArg::Auto)]
        tier: TierArg,

        /// Print one JSON report per line.
        #[arg(long)]
        json: bool,
    },

    /// Run extraction and classification over a saved HTML page.
    Inspect { file: PathBuf },

    /// Delete cache entries whose key starts with PREFIX (`html:`, `rank:`,
    /// `block:`), or `all`.
    Purge { prefix: String },

    /// Print the effective configuration as JSON.
    Config,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   rankwatch completions bash > ~/.local/share/bash-completion/completions/rankwatch
    ///   rankwatch completions zsh > ~/.zfunc/_rankwatch
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Fetch { url, tier, json } => {
            let config = EngineConfig::resolve(cli.config.as_deref())?;
            let engine = Orchestrator::from_config(&config).await?;
            let result = engine.resolve(&url, tier.into()).await;
            engine.shutdown().await?;

            let report = result?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", format_report(&report));
            }
        }

        Commands::Batch {
            file,
            workers,
            tier,
            json,
        } => {
            let mut config = EngineConfig::resolve(cli.config.as_deref())?;
            if let Some(workers) = workers {
                config.workers = workers;
                config.validate()?;
            }
            let urls = read_targets(&file)?;
            run_batch(&config, urls, tier.into(), json).await?;
        }

        Commands::Inspect { file } => {
            let config = EngineConfig::resolve(cli.config.as_deref())?;
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let inspector = PageInspector::from_config(&config)?;

            let matched = inspector.extractor().extract_detailed(&html);
            let classification = inspector
                .classifier()
                .classify(&html, matched.map(|m| m.rank));

            let out = serde_json::json!({
                "file": file.display().to_string(),
                "length": html.len(),
                "rank": matched,
                "verdict": classification.verdict,
                "reason": classification.reason,
                "captcha_phrase": inspector.classifier().has_captcha_phrase(&html),
                "indicators": inspector.classifier().indicator_count(&html),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }

        Commands::Purge { prefix } => {
            let config = EngineConfig::resolve(cli.config.as_deref())?;
            if config.cache.backend == CacheBackend::Memory {
                tracing::warn!("memory cache backend: nothing outlives a single run");
            }
            let cache = cache::connect(&config.cache).await?;

            let prefixes: Vec<&str> = if prefix == "all" {
                Namespace::ALL.iter().map(|ns| ns.prefix()).collect()
            } else {
                vec![prefix.as_str()]
            };

            let mut total = 0;
            for prefix in prefixes {
                let removed = cache.delete_pattern(prefix).await?;
                println!("{prefix}*  {removed}");
                total += removed;
            }
            println!("purged {total} entries");
        }

        Commands::Config => {
            let config = EngineConfig::resolve(cli.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "rankwatch", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

async fn run_batch(
    config: &EngineConfig,
    urls: Vec<String>,
    preference: TierPreference,
    json: bool,
) -> anyhow::Result<()> {
    let engine = Orchestrator::from_config(config).await?;
    tracing::info!("resolving {} targets with {} workers", urls.len(), config.workers);

    let bar = ProgressBar::new(urls.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?,
    );

    let mut fatal = None;
    {
        let mut reports = std::pin::pin!(engine.resolve_stream(urls, preference));
        while let Some((url, result)) = reports.next().await {
            match result {
                Ok(report) => {
                    bar.set_message(report.status.to_string());
                    if json {
                        bar.println(serde_json::to_string(&report)?);
                    } else {
                        bar.println(format_report(&report));
                    }
                }
                // Every remaining target would fail the same way.
                Err(e) if e.is_configuration() => {
                    fatal = Some(e);
                    break;
                }
                Err(e) => bar.println(format!("{url}  error: {e}")),
            }
            bar.inc(1);
        }
    }
    bar.finish_and_clear();

    engine.metrics().log_stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&engine.metrics().snapshot())?
    );
    engine.shutdown().await?;

    match fatal {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn read_targets(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_targets(&raw))
}

fn parse_targets(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn format_report(report: &RankReport) -> String {
    let rank = report
        .rank
        .map(|r| format!("#{r}"))
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{}  {}  {}  {}ms",
        report.url, report.status, rank, report.duration_ms
    );
    if let Some(tier) = report.tier {
        line.push_str(&format!("  {tier}"));
    }
    if report.retried {
        line.push_str("  retried");
    }
    if let Some(detail) = &report.detail {
        line.push_str(&format!("  ({detail})"));
    }
    if report.rank.is_none() {
        if let Some(last) = report.last_known {
            line.push_str(&format!("  last known #{last}"));
        }
    }
    if let Some(until) = report.blocked_until {
        line.push_str(&format!("  until {}", until.to_rfc3339()));
    }
    line
}
