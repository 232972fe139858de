mod config;
mod crawl;
mod error;
mod media;
mod metadata;
mod models;
mod pipeline;
mod sanitize;
mod sheet;
mod text;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::{RunArgs, RunConfig, ScrapeArgs, SessionPaths, DEFAULT_CONFIG_FILE};
use crate::crawl::BrowserLauncher;
use crate::pipeline::RunOutcome;

#[derive(Parser)]
#[command(name = "shopee_lister", about = "MakerWorld → Shopee mass-upload listing harvester")]
struct Cli {
    /// Optional settings file (TOML/JSON/YAML), overridden by LISTER_* env vars and flags
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape, normalize and append listings to the upload template
    Run(RunArgs),
    /// Scrape only and print the listings as JSON
    Scrape(ScrapeArgs),
    /// Show how a template's header row resolves
    Headers {
        /// Workbook to inspect
        template: PathBuf,
        /// Worksheet name (default: Template, else the first sheet)
        #[arg(long)]
        sheet: Option<String>,
    },
}

fn launcher(paths: &SessionPaths, navigation_timeout: Duration) -> BrowserLauncher {
    BrowserLauncher {
        profile_dir: paths.profile_dir.clone(),
        state_path: paths.state_path.clone(),
        chrome: paths.chrome.clone(),
        navigation_timeout,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => {
            let cfg = RunConfig::load(&args, &cli.config)?;
            let launcher = launcher(&cfg.session, cfg.scrape.timings.navigation);
            match pipeline::run(&cfg, &launcher).await? {
                RunOutcome::NoListings => {
                    println!("No listings found for '{}'. Workbook left untouched.", cfg.scrape.keyword);
                }
                RunOutcome::NothingUsable { dropped } => {
                    println!(
                        "Scraped {} listings but none had usable media. Workbook left untouched.",
                        dropped
                    );
                }
                RunOutcome::Written(s) => {
                    println!(
                        "Scraped {} listings, dropped {} without media.",
                        s.scraped, s.dropped
                    );
                    println!(
                        "Wrote {} rows to '{}' in {} from row {} ({} image slots{}).",
                        s.sheet.rows_written,
                        cfg.output.display(),
                        s.sheet.sheet,
                        s.sheet.first_row,
                        s.sheet.image_slots,
                        if s.sheet.synthesized { ", blank template" } else { "" },
                    );
                    if !s.sheet.created_columns.is_empty() {
                        let names: Vec<&str> = s.sheet.created_columns.iter().map(|f| f.label()).collect();
                        println!("Added columns: {}", names.join(", "));
                    }
                    println!(
                        "Saved {} images, {} videos to '{}'. Metadata: '{}'.",
                        s.images_saved,
                        s.videos_saved,
                        cfg.download_dir.display(),
                        s.metadata_path.display()
                    );
                }
            }
            Ok(())
        }
        Commands::Scrape(args) => {
            let (req, paths) = crate::config::scrape_config(&args, &cli.config)?;
            let launcher = launcher(&paths, req.timings.navigation);
            let listings = crawl::scrape(&launcher, &req).await;
            println!("{}", serde_json::to_string_pretty(&listings)?);
            eprintln!("{} listings for '{}'", listings.len(), req.keyword);
            Ok(())
        }
        Commands::Headers { template, sheet: wanted } => {
            let book = sheet::workbook::open_template(&template)?;
            let name = sheet::workbook::select_sheet(&book, wanted.as_deref())
                .context("workbook has no worksheets")?;
            let ws = book
                .get_sheet_by_name(&name)
                .with_context(|| format!("worksheet '{}' not found", name))?;
            match sheet::header::resolve_header(ws) {
                Some(map) => {
                    println!("Sheet '{}':", name);
                    println!("{}", serde_json::to_string_pretty(&map)?);
                }
                None => println!("Sheet '{}': no recognizable header in the first rows.", name),
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nFinished in {}", format_elapsed(elapsed));
    }

    result
}

/// Compact run time for the closing summary: `4.2s`, `3m07s`, `1h02m05s`.
fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{:.1}s", d.as_secs_f64()),
        (0, _) => format!("{}m{:02}s", m, s),
        _ => format!("{}h{:02}m{:02}s", h, m, s),
    }
}
