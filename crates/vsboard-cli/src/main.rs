use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vsboard_core::ClassificationResult;
use vsboard_storage::JsonlStore;
use vsboard_sync::PipelineConfig;
use vsboard_web::ignore::{IgnoreSet, JsonFileStore};
use vsboard_web::stats::{self, FilterState, Weighting};
use vsboard_web::AppState;

#[derive(Debug, Parser)]
#[command(name = "vsboard")]
#[command(about = "Claude Code vs Codex discussion pipeline and board")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Find new threads mentioning every required term.
    Discover,
    /// Fetch full reply trees for discovered threads.
    Scrape,
    /// Classify the next batch of eligible replies.
    Classify {
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Discover, scrape and classify in one go.
    Run,
    /// Serve the browsing UI.
    Serve {
        /// Enable the ignore toggles.
        #[arg(long)]
        admin: bool,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print aggregate statistics for the stored results.
    Stats {
        #[arg(long)]
        weighted: bool,
        #[arg(long)]
        subreddit: Option<String>,
        #[arg(long)]
        include_ignored: bool,
        #[arg(long)]
        json: bool,
    },
    /// Remove references found by a retired discovery query, and their threads.
    CleanDataset {
        #[arg(long)]
        exclude_query: String,
    },
    /// Write Parquet snapshots of the results.
    Export {
        #[arg(long, default_value = "exports")]
        out: PathBuf,
    },
    /// Run the pipeline on `VSBOARD_SYNC_CRON` until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vsboard=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Discover => {
            let s = vsboard_sync::run_discovery_stage(&config).await?;
            println!(
                "discovery complete: groups={} pages={} new={} known={} group_errors={}",
                s.groups, s.pages_fetched, s.appended, s.already_known, s.group_errors
            );
        }
        Commands::Scrape => {
            let s = vsboard_sync::run_scrape_stage(&config).await?;
            println!(
                "scrape complete: scraped={} skipped={} replies={} errors={}",
                s.scraped, s.already_scraped, s.replies, s.errors
            );
        }
        Commands::Classify { batch_size } => {
            let s = vsboard_sync::run_classify_stage(&config, batch_size).await?;
            println!(
                "classification complete: analyzed={} errors={} remaining={} cost=${:.4}",
                s.analyzed,
                s.errors,
                s.eligible.saturating_sub(s.analyzed),
                s.estimated_cost
            );
        }
        Commands::Run => {
            let s = vsboard_sync::run_pipeline_once(&config).await?;
            println!(
                "pipeline complete: run_id={} discovered={} scraped={} classified={} errors={}",
                s.run_id,
                s.discovery.appended,
                s.scrape.scraped,
                s.classify.analyzed,
                s.scrape.errors + s.classify.errors
            );
        }
        Commands::Serve { admin, port } => match port {
            Some(port) => {
                let state = AppState::new(config.data_dir.clone())?.with_admin(admin);
                vsboard_web::serve(state, port).await?;
            }
            None => vsboard_web::serve_from_env(admin).await?,
        },
        Commands::Stats {
            weighted,
            subreddit,
            include_ignored,
            json,
        } => {
            print_stats(&config, weighted, subreddit, include_ignored, json).await?;
        }
        Commands::CleanDataset { exclude_query } => {
            let s = vsboard_sync::clean_dataset(&config.paths(), &exclude_query).await?;
            println!(
                "clean complete: references_removed={} threads_removed={} references_kept={} threads_kept={}",
                s.references_removed, s.threads_removed, s.references_kept, s.threads_kept
            );
        }
        Commands::Export { out } => {
            let manifest = vsboard_sync::export_results_parquet(&config.paths(), &out).await?;
            println!("export complete: manifest={}", manifest.display());
        }
        Commands::Schedule => {
            let config = PipelineConfig {
                scheduler_enabled: true,
                ..config
            };
            config.require_api_key()?;
            if let Some(sched) = vsboard_sync::maybe_build_scheduler(&config).await? {
                sched.start().await?;
                info!(cron = %config.sync_cron, "scheduler started; ctrl-c to stop");
                tokio::signal::ctrl_c().await?;
            }
        }
    }

    Ok(())
}

async fn print_stats(
    config: &PipelineConfig,
    weighted: bool,
    subreddit: Option<String>,
    include_ignored: bool,
    json: bool,
) -> Result<()> {
    let paths = config.paths();
    let results: Vec<ClassificationResult> = JsonlStore::new(&paths.analysis).scan_all().await?;
    let ignores = IgnoreSet::load(&JsonFileStore::new(paths.ignored.clone()))?;
    let state = FilterState {
        subgroup: subreddit,
        weighting: if weighted {
            Weighting::Score
        } else {
            Weighting::Count
        },
        include_ignored,
        ..Default::default()
    };
    let summary = stats::summarize(&results, &ignores, &state);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("results: {} (ignored {})", summary.total, summary.ignored);
    for c in &summary.categories {
        println!(
            "  {:<28} {:>6} {:>8} {:>6.1}%",
            c.label, c.count, c.score, c.percentage
        );
    }
    for g in &summary.groups {
        println!("  {:<28} {:>6} {:>6.1}%", g.label, g.value, g.percentage);
    }
    println!("clear preference for Claude Code: {:.1}%", summary.clear_preference_pct);
    Ok(())
}
