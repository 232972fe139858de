use std::path::PathBuf;

use serde::Serialize;

/// Max media references carried per listing and placed per row.
pub const MAX_MEDIA: usize = 8;

/// One scraped detail page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapedListing {
    pub title: String,
    pub description: String,
    pub source_url: String,
    pub media_urls: Vec<String>,
}

/// A listing ready for the marketplace template.
#[derive(Debug, Clone)]
pub struct ProductRecord {
    pub category_id: String,
    pub name: String,
    pub description: String,
    pub sku: String,
    pub price: f64,
    pub stock: u32,
    pub weight_kg: f64,
    pub dims_cm: (u32, u32, u32),
    pub warranty: Option<String>,
    /// Image references placed into the sheet (URLs or local paths), 1..=8.
    pub images: Vec<String>,
}

/// A normalized still image written to the download directory.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub original_url: String,
    pub local_path: Option<PathBuf>,
    pub byte_size: usize,
    pub width: u32,
    pub height: u32,
}

/// Outputs of an animated-image conversion. Either side may be missing.
#[derive(Debug, Clone, Default)]
pub struct AnimatedAsset {
    pub video: Option<PathBuf>,
    pub poster: Option<PathBuf>,
}

/// One line of the metadata CSV.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataRow {
    #[serde(rename = "SKU")]
    pub sku: String,
    #[serde(rename = "Product Name")]
    pub product_name: String,
    #[serde(rename = "Source URL")]
    pub source_url: String,
    #[serde(rename = "Media URLs")]
    pub media_urls: String,
    #[serde(rename = "Video Path")]
    pub video_path: String,
    #[serde(rename = "Poster Path")]
    pub poster_path: String,
}

/// Format a run-local SKU: `MW-0001`, `MW-0002`, …
pub fn sku(prefix: &str, index: usize) -> String {
    format!("{}-{:04}", prefix, index)
}
