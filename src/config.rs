use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, ValueEnum};
use config::Config;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crawl::{Engine, ScrapeRequest, Timings};

pub const DEFAULT_CONFIG_FILE: &str = "lister.toml";
const ENV_PREFIX: &str = "LISTER";

/// What goes into image cells: the remote URLs or the normalized local files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageRefMode {
    #[default]
    Url,
    Path,
}

// ── Command line ──

#[derive(Args, Debug, Clone)]
pub struct ScrapeArgs {
    /// Search keyword
    #[arg(short, long)]
    pub keyword: String,
    /// Max detail pages to visit
    #[arg(short = 'm', long = "max", default_value_t = 1)]
    pub max_results: usize,
    /// Start browsers headless (a bot check restarts once headed)
    #[arg(long)]
    pub headless: bool,
    /// Proxy server, e.g. http://host:port
    #[arg(long)]
    pub proxy: Option<String>,
    /// Engine order, comma separated
    #[arg(long, value_delimiter = ',')]
    pub engines: Vec<Engine>,
    /// Also collect animated GIFs and convert them to video
    #[arg(long)]
    pub animated: bool,
    #[arg(long)]
    pub profile_dir: Option<PathBuf>,
    #[arg(long)]
    pub state_path: Option<PathBuf>,
    /// Chrome/Chromium executable (autodetected when omitted)
    #[arg(long)]
    pub chrome: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub scrape: ScrapeArgs,
    /// Marketplace upload template (.xlsx)
    #[arg(long)]
    pub template: PathBuf,
    #[arg(short = 'o', long = "out")]
    pub output: Option<PathBuf>,
    /// Sheet to fill when the template has several tabs
    #[arg(long)]
    pub sheet: Option<String>,
    #[arg(long)]
    pub category_id: Option<String>,
    #[arg(long)]
    pub brand: Option<String>,
    #[arg(long)]
    pub price: Option<f64>,
    #[arg(long)]
    pub stock: Option<u32>,
    #[arg(long)]
    pub weight_kg: Option<f64>,
    /// Package dimensions L,W,H in cm
    #[arg(long)]
    pub dims: Option<String>,
    #[arg(long)]
    pub sku_prefix: Option<String>,
    #[arg(long)]
    pub warranty: Option<String>,
    /// Metadata CSV output
    #[arg(long)]
    pub metadata: Option<PathBuf>,
    /// Where normalized images and videos are written
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
    /// Text file with a single {{DESCRIPTION}} placeholder
    #[arg(long)]
    pub description_template: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub image_ref: Option<ImageRefMode>,
    #[arg(long)]
    pub ffmpeg: Option<PathBuf>,
}

// ── Layered settings ──

/// Operator constants after defaults, config file, environment and flags.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub category_id: Option<String>,
    pub brand: String,
    pub price: f64,
    pub stock: u32,
    pub weight_kg: f64,
    pub dims: String,
    pub sku_prefix: String,
    pub warranty: String,
    pub engines: String,
    pub output: PathBuf,
    pub metadata: PathBuf,
    pub download_dir: PathBuf,
    pub profile_dir: PathBuf,
    pub state_path: PathBuf,
    pub ffmpeg: PathBuf,
    pub image_ref: ImageRefMode,
}

fn path_str(p: &Option<PathBuf>) -> Option<String> {
    p.as_ref().map(|p| p.to_string_lossy().into_owned())
}

/// Defaults → optional config file → `LISTER_*` env → overrides.
pub fn layered(file: &Path, overrides: &[(&str, Option<String>)]) -> Result<Settings> {
    let mut builder = Config::builder()
        .set_default("brand", "No Brand")?
        .set_default("price", 45000.0)?
        .set_default("stock", 20)?
        .set_default("weight_kg", 0.15)?
        .set_default("dims", "10,10,3")?
        .set_default("sku_prefix", "MW")?
        .set_default("warranty", crate::sheet::writer::DEFAULT_WARRANTY)?
        .set_default("engines", "chromium,http")?
        .set_default("output", "shopee_ready.xlsx")?
        .set_default("metadata", "shopee_metadata.csv")?
        .set_default("download_dir", "downloads")?
        .set_default("profile_dir", ".mw_profile")?
        .set_default("state_path", "makerworld_state.json")?
        .set_default("ffmpeg", "ffmpeg")?
        .set_default("image_ref", "url")?
        .add_source(config::File::from(file.to_path_buf()).required(false))
        .add_source(config::Environment::with_prefix(ENV_PREFIX));

    for (key, value) in overrides {
        builder = builder.set_override_option(*key, value.clone())?;
    }

    let settings: Settings = builder
        .build()
        .with_context(|| format!("loading configuration ({})", file.display()))?
        .try_deserialize()
        .context("invalid configuration value")?;
    debug!(?settings, "Configuration loaded");
    Ok(settings)
}

fn scrape_overrides(args: &ScrapeArgs) -> Vec<(&'static str, Option<String>)> {
    let engines = (!args.engines.is_empty()).then(|| {
        args.engines
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(",")
    });
    vec![
        ("engines", engines),
        ("profile_dir", path_str(&args.profile_dir)),
        ("state_path", path_str(&args.state_path)),
    ]
}

fn run_overrides(args: &RunArgs) -> Vec<(&'static str, Option<String>)> {
    let mut o = scrape_overrides(&args.scrape);
    o.extend([
        ("output", path_str(&args.output)),
        ("category_id", args.category_id.clone()),
        ("brand", args.brand.clone()),
        ("price", args.price.map(|v| v.to_string())),
        ("stock", args.stock.map(|v| v.to_string())),
        ("weight_kg", args.weight_kg.map(|v| v.to_string())),
        ("dims", args.dims.clone()),
        ("sku_prefix", args.sku_prefix.clone()),
        ("warranty", args.warranty.clone()),
        ("metadata", path_str(&args.metadata)),
        ("download_dir", path_str(&args.download_dir)),
        ("ffmpeg", path_str(&args.ffmpeg)),
        ("image_ref", args.image_ref.map(|m| format!("{:?}", m).to_lowercase())),
    ]);
    o
}

pub fn parse_dims(raw: &str) -> Result<(u32, u32, u32)> {
    let parts = raw
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("dimensions '{}': {}", raw, e))?;
    match parts.as_slice() {
        [l, w, h, ..] => Ok((*l, *w, *h)),
        _ => bail!("dimensions '{}' need three values L,W,H", raw),
    }
}

pub fn parse_engines(raw: &str) -> Result<Vec<Engine>> {
    let engines = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Engine::from_str(s, true).map_err(|e| anyhow!("engine '{}': {}", s, e)))
        .collect::<Result<Vec<_>>>()?;
    if engines.is_empty() {
        bail!("at least one engine is required");
    }
    Ok(engines)
}

// ── Run configuration ──

#[derive(Debug, Clone)]
pub struct ProductDefaults {
    pub category_id: String,
    pub brand: String,
    pub price: f64,
    pub stock: u32,
    pub weight_kg: f64,
    pub dims_cm: (u32, u32, u32),
    pub sku_prefix: String,
    pub warranty: String,
}

/// Browser session settings shared by every engine.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub profile_dir: PathBuf,
    pub state_path: PathBuf,
    pub chrome: Option<PathBuf>,
}

/// Everything one run needs, resolved once up front.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub scrape: ScrapeRequest,
    pub session: SessionPaths,
    pub template: PathBuf,
    pub output: PathBuf,
    pub sheet: Option<String>,
    pub product: ProductDefaults,
    pub description_template: Option<String>,
    pub metadata: PathBuf,
    pub download_dir: PathBuf,
    pub animated: bool,
    pub image_ref: ImageRefMode,
    pub ffmpeg: PathBuf,
}

fn scrape_request(args: &ScrapeArgs, settings: &Settings) -> Result<ScrapeRequest> {
    Ok(ScrapeRequest {
        keyword: args.keyword.clone(),
        max_results: args.max_results,
        headless: args.headless,
        proxy: args.proxy.clone().filter(|p| !p.trim().is_empty()),
        engines: parse_engines(&settings.engines)?,
        animated: args.animated,
        timings: Timings::default(),
    })
}

fn session_paths(args: &ScrapeArgs, settings: &Settings) -> SessionPaths {
    SessionPaths {
        profile_dir: settings.profile_dir.clone(),
        state_path: settings.state_path.clone(),
        chrome: args.chrome.clone(),
    }
}

/// Settings for the extraction-only subcommand.
pub fn scrape_config(args: &ScrapeArgs, file: &Path) -> Result<(ScrapeRequest, SessionPaths)> {
    let settings = layered(file, &scrape_overrides(args))?;
    Ok((scrape_request(args, &settings)?, session_paths(args, &settings)))
}

impl RunConfig {
    pub fn load(args: &RunArgs, file: &Path) -> Result<Self> {
        let settings = layered(file, &run_overrides(args))?;
        Self::from_settings(args, settings)
    }

    fn from_settings(args: &RunArgs, settings: Settings) -> Result<Self> {
        let category_id = settings
            .category_id
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow!("a category id is required (--category-id or LISTER_CATEGORY_ID)"))?;

        let description_template = match &args.description_template {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("reading description template {}", path.display()))?,
            ),
            None => None,
        };

        Ok(RunConfig {
            scrape: scrape_request(&args.scrape, &settings)?,
            session: session_paths(&args.scrape, &settings),
            template: args.template.clone(),
            output: settings.output.clone(),
            sheet: args.sheet.clone(),
            product: ProductDefaults {
                category_id,
                brand: settings.brand.clone(),
                price: settings.price,
                stock: settings.stock,
                weight_kg: settings.weight_kg,
                dims_cm: parse_dims(&settings.dims)?,
                sku_prefix: settings.sku_prefix.clone(),
                warranty: settings.warranty.clone(),
            },
            description_template,
            metadata: settings.metadata.clone(),
            download_dir: settings.download_dir.clone(),
            animated: args.scrape.animated,
            image_ref: settings.image_ref,
            ffmpeg: settings.ffmpeg,
        })
    }
}
