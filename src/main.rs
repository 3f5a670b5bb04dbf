use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use proxy_sub::{
    cache::{CacheHandle, SqliteCacheStore},
    pipeline::{Pipeline, RunStats},
    proxy::{ProbeResult, ProbeStatus, ProxyParser, RankedProxy, RegionCode, SourceFormat},
    render_clash, render_json, AppConfig, ListQuery,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Free proxy aggregator producing a ranked, region-grouped subscription
#[derive(Parser)]
#[command(name = "proxy-sub")]
#[command(about = "Harvest, probe, geolocate and rank free proxies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(short, long, default_value = "proxy-sub.json")]
    config: PathBuf,

    /// SQLite cache database (path or sqlite: URL)
    #[arg(long, default_value = "proxy-sub.db", conflicts_with = "no_cache")]
    cache: String,

    /// Run without any persistent cache
    #[arg(long)]
    no_cache: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Clash,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    Line,
    Html,
    JsonApi,
}

impl From<InputFormat> for SourceFormat {
    fn from(format: InputFormat) -> Self {
        match format {
            InputFormat::Line => SourceFormat::Line,
            InputFormat::Html => SourceFormat::Html,
            InputFormat::JsonApi => SourceFormat::JsonApi,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline now and refresh the cache
    Run,
    /// Print the subscription, refreshing it when the cache is stale
    Get {
        /// Output format
        #[arg(short, long, value_enum, default_value = "clash")]
        format: OutputFormat,
        /// Only this source tag (FP, 66 or all)
        #[arg(short, long, default_value = "all")]
        source: String,
        /// Only this region code
        #[arg(short, long)]
        region: Option<String>,
        /// Maximum number of entries, 0 for all
        #[arg(short, long, default_value = "0")]
        limit: usize,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show statistics of the last cached run
    Status {
        /// Also list every probe result (live and failed) with its status
        #[arg(short, long)]
        details: bool,
    },
    /// Show the best proxies across all regions
    Top {
        /// Number of entries
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Decode a saved source payload without touching the network
    Parse {
        /// Input file
        input: PathBuf,
        /// Payload format
        #[arg(short, long, value_enum, default_value = "line")]
        format: InputFormat,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_cache(cli: &Cli) -> Result<CacheHandle> {
    if cli.no_cache {
        return Ok(CacheHandle::disabled());
    }
    let store = SqliteCacheStore::new(&cli.cache)
        .await
        .with_context(|| format!("opening cache {}", cli.cache))?;
    match store.purge_expired().await {
        Ok(purged) if purged > 0 => tracing::debug!("purged {} expired cache entries", purged),
        Ok(_) => {}
        Err(e) => tracing::warn!("cache purge failed: {}", e),
    }
    Ok(CacheHandle::new(Arc::new(store)))
}

fn print_summary(stats: &RunStats) {
    println!("Run {}", stats.run_id);
    println!(
        "  Finished: {} ({}ms)",
        stats.end_time.to_rfc3339(),
        stats.duration_ms
    );
    println!(
        "  Sources: {} ({} failed)",
        stats.source_count,
        stats.sources.iter().filter(|s| s.error.is_some()).count()
    );
    println!(
        "  Candidates: {} unique, {} rejected",
        stats.candidates_found, stats.rejected_count
    );
    println!(
        "  Probed: {} tested, {} valid, {} failed ({}%)",
        stats.tested_count, stats.valid_count, stats.failed_count, stats.success_rate_percent
    );
    if stats.untested_count > 0 {
        println!("  Placeholder entries: {}", stats.untested_count);
    }
    for (tag, counts) in &stats.per_source_counts {
        println!(
            "  [{}] found {}, valid {}, failed {}",
            tag, counts.found, counts.valid, counts.failed
        );
    }
}

fn print_entry(proxy: &RankedProxy) {
    println!(
        "  {:<16} {:>15}:{:<5} {:>6}ms {:>6.1}MB/s score {}",
        proxy.display_name,
        proxy.host(),
        proxy.port(),
        proxy.latency_ms(),
        proxy.throughput_mbps(),
        proxy.score()
    );
}

fn parse_file(input: &PathBuf, format: InputFormat) -> Result<()> {
    let candidates = ProxyParser::parse_file(input, SourceFormat::from(format))
        .with_context(|| format!("parsing {:?}", input))?;

    println!("Parsed {} candidates from {:?}", candidates.len(), input);
    for candidate in &candidates {
        println!("{}", candidate.to_simple_string());
    }
    Ok(())
}

fn print_detail(result: &ProbeResult) {
    let status = match &result.status {
        ProbeStatus::Ok => "ok".to_string(),
        ProbeStatus::Failed(reason) => format!("failed: {}", reason),
        ProbeStatus::Timeout => "timeout".to_string(),
        ProbeStatus::Skipped => "skipped".to_string(),
        ProbeStatus::Untested => "untested".to_string(),
    };
    println!(
        "  [{}] {:>21} {:<2} {:>6}ms {:>6.1}MB/s {}",
        result.candidate.source,
        result.candidate.to_simple_string(),
        result.region_code,
        result.latency_ms,
        result.throughput_mbps,
        status
    );
}

async fn build_pipeline(cli: &Cli) -> Result<Pipeline> {
    let config = AppConfig::load(&cli.config)?;
    let cache = open_cache(cli).await?;
    Ok(Pipeline::new(config, cache)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Parse { input, format } => parse_file(input, *format)?,
        Commands::Run => {
            let pipeline = build_pipeline(&cli).await?;
            let output = pipeline.refresh().await?;
            print_summary(&output.stats);
            println!("\nRanked {} proxies", output.ranked.len());
        }
        Commands::Get {
            format,
            source,
            region,
            limit,
            output,
        } => {
            let pipeline = build_pipeline(&cli).await?;
            let mut query = ListQuery::new().with_source(source)?.with_limit(*limit);
            if let Some(region) = region {
                query = query.with_region(RegionCode::try_new(region)?.as_str());
            }
            let proxies = query.apply(&pipeline.proxies().await?);

            let text = match format {
                OutputFormat::Clash => render_clash(&proxies, Utc::now()),
                OutputFormat::Json => render_json(&proxies)?,
            };

            if let Some(output_path) = output {
                std::fs::write(output_path, text)?;
                println!("Saved {} proxies to {:?}", proxies.len(), output_path);
            } else {
                print!("{}", text);
            }
        }
        Commands::Status { details } => {
            let pipeline = build_pipeline(&cli).await?;
            let stats = pipeline
                .stats()
                .await
                .ok_or_else(|| anyhow!("No cached run found. Use `proxy-sub run` first."))?;
            print_summary(&stats);
            if !stats.per_region_counts.is_empty() {
                println!("\nLive proxies per region:");
                let mut regions: Vec<_> = stats.per_region_counts.iter().collect();
                regions.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
                for (region, count) in regions {
                    println!("  {}: {}", region, count);
                }
            }
            if *details {
                let results = pipeline.details().await.unwrap_or_default();
                println!("\nProbe results ({}):", results.len());
                for result in &results {
                    print_detail(result);
                }
            }
        }
        Commands::Top { limit } => {
            let pipeline = build_pipeline(&cli).await?;
            let mut proxies = pipeline.proxies().await?;
            proxies.sort_by(|a, b| b.score().cmp(&a.score()));
            proxies.truncate(*limit);

            if proxies.is_empty() {
                println!("No proxies available.");
            } else {
                println!("Top {} proxies:", proxies.len());
                for proxy in &proxies {
                    print_entry(proxy);
                }
            }
        }
    }

    Ok(())
}
