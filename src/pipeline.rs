//! Scrape → normalize text and media → fill the upload template → metadata.

use std::path::{Path, PathBuf};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ImageRefMode, RunConfig};
use crate::crawl::{self, gallery, SessionLauncher};
use crate::media::{AnimatedOutput, MediaNormalizer, MediaSource, NormalizedImage};
use crate::metadata::write_metadata;
use crate::models::{self, AnimatedAsset, MediaAsset, MetadataRow, ProductRecord, ScrapedListing, MAX_MEDIA};
use crate::sheet::writer::{write_listings, WriteReport};
use crate::text;

#[derive(Debug)]
pub enum RunOutcome {
    /// Nothing was scraped; no files were touched.
    NoListings,
    /// Listings were scraped but none had usable media.
    NothingUsable { dropped: usize },
    Written(RunSummary),
}

#[derive(Debug)]
pub struct RunSummary {
    pub scraped: usize,
    pub dropped: usize,
    pub images_saved: usize,
    pub videos_saved: usize,
    pub sheet: WriteReport,
    pub metadata_path: PathBuf,
}

/// A scraped listing with its media processed, before SKU assignment.
struct Prepared {
    listing: ScrapedListing,
    stills: Vec<(String, NormalizedImage)>,
    animations: Vec<(String, AnimatedOutput)>,
}

pub async fn run<L: SessionLauncher>(cfg: &RunConfig, launcher: &L) -> Result<RunOutcome> {
    info!("Scraping '{}' (max {})", cfg.scrape.keyword, cfg.scrape.max_results);
    let listings = crawl::scrape(launcher, &cfg.scrape).await;
    if listings.is_empty() {
        return Ok(RunOutcome::NoListings);
    }
    let scraped = listings.len();

    let media = MediaNormalizer::new(&cfg.ffmpeg)?;
    let prepared = prepare_media(&media, listings, cfg.animated).await?;

    let (kept, dropped): (Vec<_>, Vec<_>) = prepared
        .into_iter()
        .partition(|p| image_refs_available(p, cfg.image_ref));
    for p in &dropped {
        warn!("Dropping '{}': no usable media ({})", p.listing.title, p.listing.source_url);
    }
    if kept.is_empty() {
        return Ok(RunOutcome::NothingUsable {
            dropped: dropped.len(),
        });
    }

    if let Err(e) = std::fs::create_dir_all(&cfg.download_dir) {
        warn!("Could not create download directory {}: {}", cfg.download_dir.display(), e);
    }

    let mut records = Vec::with_capacity(kept.len());
    let mut metadata = Vec::with_capacity(kept.len());
    let mut dropped = dropped.len();
    let mut images_saved = 0;
    let mut videos_saved = 0;

    for p in &kept {
        let sku = models::sku(&cfg.product.sku_prefix, records.len() + 1);
        let assets = save_stills(&cfg.download_dir, &sku, &p.stills);
        let animated = save_animations(&cfg.download_dir, &sku, &p.animations);

        let images: Vec<String> = match cfg.image_ref {
            ImageRefMode::Url => still_urls(&p.listing),
            ImageRefMode::Path => assets
                .iter()
                .filter_map(|a| a.local_path.as_ref())
                .chain(animated.iter().filter_map(|a| a.poster.as_ref()))
                .map(|path| path.display().to_string())
                .take(MAX_MEDIA)
                .collect(),
        };
        if images.is_empty() {
            warn!("Dropping '{}': none of its media could be saved", p.listing.title);
            dropped += 1;
            continue;
        }

        images_saved += assets.iter().filter(|a| a.local_path.is_some()).count();
        videos_saved += animated.iter().filter(|a| a.video.is_some()).count();
        let record = build_record(cfg, &p.listing, &sku, images);
        metadata.push(metadata_row(&record, &p.listing, &animated));
        records.push(record);
    }
    if records.is_empty() {
        return Ok(RunOutcome::NothingUsable { dropped });
    }

    let sheet = write_listings(
        &cfg.template,
        &cfg.output,
        &records,
        cfg.sheet.as_deref(),
        &cfg.product.warranty,
    )?;
    write_metadata(&cfg.metadata, &metadata)?;
    info!("Metadata written to {}", cfg.metadata.display());

    Ok(RunOutcome::Written(RunSummary {
        scraped,
        dropped,
        images_saved,
        videos_saved,
        sheet,
        metadata_path: cfg.metadata.clone(),
    }))
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

async fn prepare_media(
    media: &MediaNormalizer,
    listings: Vec<ScrapedListing>,
    animated: bool,
) -> Result<Vec<Prepared>> {
    let pb = progress_bar(listings.len())?;
    let mut out = Vec::with_capacity(listings.len());

    for listing in listings {
        let mut stills = Vec::new();
        let mut animations = Vec::new();

        for url in &listing.media_urls {
            if gallery::is_animated(url) {
                if !animated {
                    continue;
                }
                match media.fetch(url).await {
                    Ok(bytes) => animations.push((url.clone(), media.animated_to_video(&bytes).await)),
                    Err(e) => warn!("Skipping animation {}: {}", url, e),
                }
            } else if let Some(img) = media.normalize_for_upload(MediaSource::Url(url)).await {
                stills.push((url.clone(), img));
            }
        }

        debug!(
            "{}: {} stills, {} animations from {} urls",
            listing.source_url,
            stills.len(),
            animations.len(),
            listing.media_urls.len()
        );
        out.push(Prepared {
            listing,
            stills,
            animations,
        });
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(out)
}

fn still_urls(listing: &ScrapedListing) -> Vec<String> {
    listing
        .media_urls
        .iter()
        .filter(|u| !gallery::is_animated(u))
        .take(MAX_MEDIA)
        .cloned()
        .collect()
}

fn image_refs_available(p: &Prepared, mode: ImageRefMode) -> bool {
    match mode {
        ImageRefMode::Url => !still_urls(&p.listing).is_empty(),
        ImageRefMode::Path => !p.stills.is_empty() || p.animations.iter().any(|(_, a)| a.poster.is_some()),
    }
}

/// Write normalized stills as `{sku}_{NN}.jpg`. A failed write is logged and
/// leaves that asset without a local path.
fn save_stills(dir: &Path, sku: &str, stills: &[(String, NormalizedImage)]) -> Vec<MediaAsset> {
    stills
        .iter()
        .enumerate()
        .map(|(i, (url, img))| {
            let path = dir.join(format!("{}_{:02}.jpg", sku, i + 1));
            MediaAsset {
                original_url: url.clone(),
                local_path: write_asset(&path, &img.bytes),
                byte_size: img.bytes.len(),
                width: img.width,
                height: img.height,
            }
        })
        .collect()
}

fn write_asset(path: &Path, bytes: &[u8]) -> Option<PathBuf> {
    match std::fs::write(path, bytes) {
        Ok(()) => Some(path.to_path_buf()),
        Err(e) => {
            warn!("Could not write {}: {}", path.display(), e);
            None
        }
    }
}

/// File stem of the media URL's last path segment: `…/spin.gif` → `spin`.
fn media_stem(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let stem = Path::new(last).file_stem()?.to_str()?;
    (!stem.is_empty()).then(|| stem.to_string())
}

/// Write `{stem}.mp4` and `{stem}_poster.jpg` per animation, the stem taken
/// from the source URL and falling back to `{sku}_anim_{NN}`.
fn save_animations(dir: &Path, sku: &str, animations: &[(String, AnimatedOutput)]) -> Vec<AnimatedAsset> {
    animations
        .iter()
        .enumerate()
        .map(|(i, (url, out))| {
            let stem = media_stem(url).unwrap_or_else(|| format!("{}_anim_{:02}", sku, i + 1));
            let asset = AnimatedAsset {
                video: out
                    .video
                    .as_ref()
                    .and_then(|v| write_asset(&dir.join(format!("{}.mp4", stem)), v)),
                poster: out
                    .poster
                    .as_ref()
                    .and_then(|p| write_asset(&dir.join(format!("{}_poster.jpg", stem)), &p.bytes)),
            };
            if asset.video.is_none() && asset.poster.is_none() {
                debug!("Nothing saved for animation {}", url);
            }
            asset
        })
        .collect()
}

pub fn build_record(cfg: &RunConfig, listing: &ScrapedListing, sku: &str, images: Vec<String>) -> ProductRecord {
    let p = &cfg.product;
    ProductRecord {
        category_id: p.category_id.clone(),
        name: text::seo_title(&listing.title),
        description: text::apply_description_template(&listing.description, cfg.description_template.as_deref()),
        sku: sku.to_string(),
        price: p.price,
        stock: p.stock,
        weight_kg: p.weight_kg,
        dims_cm: p.dims_cm,
        warranty: Some(p.warranty.clone()),
        images,
    }
}

fn path_or_empty(path: Option<&PathBuf>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

/// The product name matches the workbook row.
fn metadata_row(record: &ProductRecord, listing: &ScrapedListing, animated: &[AnimatedAsset]) -> MetadataRow {
    MetadataRow {
        sku: record.sku.clone(),
        product_name: record.name.clone(),
        source_url: listing.source_url.clone(),
        media_urls: listing.media_urls.join("|"),
        video_path: path_or_empty(animated.iter().find_map(|a| a.video.as_ref())),
        poster_path: path_or_empty(animated.iter().find_map(|a| a.poster.as_ref())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProductDefaults, SessionPaths};
    use crate::crawl::fake::FakeLauncher;
    use crate::crawl::page::search_url;
    use crate::crawl::{ScrapeRequest, Timings, DEFAULT_ENGINES};
    use crate::sheet::Grid;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config(dir: &Path, mode: ImageRefMode) -> RunConfig {
        RunConfig {
            scrape: ScrapeRequest {
                keyword: "winder".into(),
                max_results: 5,
                headless: true,
                proxy: None,
                engines: DEFAULT_ENGINES.to_vec(),
                animated: false,
                timings: Timings::instant(),
            },
            session: SessionPaths {
                profile_dir: dir.join("profile"),
                state_path: dir.join("state.json"),
                chrome: None,
            },
            template: dir.join("missing_template.xlsx"),
            output: dir.join("out.xlsx"),
            sheet: None,
            product: ProductDefaults {
                category_id: "100644".into(),
                brand: "No Brand".into(),
                price: 45000.0,
                stock: 20,
                weight_kg: 0.15,
                dims_cm: (10, 10, 3),
                sku_prefix: "MW".into(),
                warranty: "Tidak Ada Garansi".into(),
            },
            description_template: None,
            metadata: dir.join("meta.csv"),
            download_dir: dir.join("downloads"),
            animated: false,
            image_ref: mode,
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
        }
    }

    /// Serve one PNG over plain HTTP for every request.
    async fn image_server() -> String {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(40, 30, image::Rgb([9, 9, 9])));
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                let png = png.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = sock.read(&mut buf).await;
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        png.len()
                    );
                    let _ = sock.write_all(head.as_bytes()).await;
                    let _ = sock.write_all(&png).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn site(media_base: &str) -> HashMap<String, String> {
        let mut pages = HashMap::new();
        pages.insert(
            search_url("winder"),
            r#"<a href="/en/models/1">a</a><a href="/en/models/2">b</a>"#.to_string(),
        );
        pages.insert(
            "https://makerworld.com/en/models/1".to_string(),
            format!(
                r#"<h1>Winder</h1><meta name="description" content="Source: me&#10;Winds cables">
                   <div class="photo_show"><img src="{0}/one.png"><img src="{0}/two.jpg"></div>"#,
                media_base
            ),
        );
        // No gallery and no og:image: zero media.
        pages.insert("https://makerworld.com/en/models/2".to_string(), "<h1>Bare</h1>".to_string());
        pages
    }

    #[tokio::test]
    async fn zero_listings_leave_workbook_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), ImageRefMode::Url);
        let mut pages = HashMap::new();
        pages.insert(search_url("winder"), "<p>nothing here</p>".to_string());

        let outcome = run(&cfg, &FakeLauncher::with_pages(pages)).await.unwrap();
        assert!(matches!(outcome, RunOutcome::NoListings));
        assert!(!cfg.output.exists());
        assert!(!cfg.metadata.exists());
    }

    #[tokio::test]
    async fn url_mode_writes_rows_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), ImageRefMode::Url);
        // Unreachable media host: normalization fails, URLs are still placed.
        let launcher = FakeLauncher::with_pages(site("http://127.0.0.1:9"));

        let RunOutcome::Written(summary) = run(&cfg, &launcher).await.unwrap() else {
            panic!("expected rows to be written");
        };
        assert_eq!((summary.scraped, summary.dropped, summary.images_saved), (2, 1, 0));
        assert_eq!(summary.sheet.rows_written, 1);

        let book = umya_spreadsheet::reader::xlsx::read(&cfg.output).unwrap();
        let ws = book.get_sheet_by_name("Template").unwrap();
        assert_eq!(ws.text(2, 2), text::seo_title("Winder"));
        assert_eq!(ws.text(3, 2), text::seo_description("Winds cables"));
        assert_eq!(ws.text(6, 2), "MW-0001");
        assert_eq!(ws.text(11, 2), "http://127.0.0.1:9/one.png,http://127.0.0.1:9/two.jpg");

        let mut rdr = csv::Reader::from_path(&cfg.metadata).unwrap();
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "MW-0001");
        assert_eq!(&rows[0][1], ws.text(2, 2));
        assert_eq!(&rows[0][2], "https://makerworld.com/en/models/1");
        assert_eq!((&rows[0][4], &rows[0][5]), ("", ""));
    }

    #[tokio::test]
    async fn path_mode_saves_normalized_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), ImageRefMode::Path);
        cfg.description_template = Some("Desc:\n{{DESCRIPTION}}\nhttps://shop.example.com".into());
        let base = image_server().await;
        let launcher = FakeLauncher::with_pages(site(&base));

        let RunOutcome::Written(summary) = run(&cfg, &launcher).await.unwrap() else {
            panic!("expected rows to be written");
        };
        assert_eq!(summary.images_saved, 2);

        let first = cfg.download_dir.join("MW-0001_01.jpg");
        let second = cfg.download_dir.join("MW-0001_02.jpg");
        assert!(first.is_file() && second.is_file());
        assert_eq!(&std::fs::read(&first).unwrap()[..2], &[0xFF, 0xD8]);

        let book = umya_spreadsheet::reader::xlsx::read(&cfg.output).unwrap();
        let ws = book.get_sheet_by_name("Template").unwrap();
        assert_eq!(ws.text(3, 2), "Desc:\nWinds cables");
        assert_eq!(
            ws.text(11, 2),
            format!("{},{}", first.display(), second.display())
        );
    }

    #[tokio::test]
    async fn path_mode_drops_everything_when_media_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), ImageRefMode::Path);
        let launcher = FakeLauncher::with_pages(site("http://127.0.0.1:9"));

        let outcome = run(&cfg, &launcher).await.unwrap();
        assert!(matches!(outcome, RunOutcome::NothingUsable { dropped: 2 }));
        assert!(!cfg.output.exists());
    }

    #[tokio::test]
    async fn failed_image_write_only_loses_that_image() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), ImageRefMode::Path);
        // A directory where the first image should go makes that write fail.
        std::fs::create_dir_all(cfg.download_dir.join("MW-0001_01.jpg")).unwrap();
        let base = image_server().await;
        let launcher = FakeLauncher::with_pages(site(&base));

        let RunOutcome::Written(summary) = run(&cfg, &launcher).await.unwrap() else {
            panic!("expected rows to be written");
        };
        assert_eq!((summary.images_saved, summary.sheet.rows_written), (1, 1));

        let second = cfg.download_dir.join("MW-0001_02.jpg");
        let book = umya_spreadsheet::reader::xlsx::read(&cfg.output).unwrap();
        let ws = book.get_sheet_by_name("Template").unwrap();
        assert_eq!(ws.text(11, 2), second.display().to_string());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn animation_files_named_after_source_and_poster_counts_as_media() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), ImageRefMode::Path);
        cfg.animated = true;
        cfg.scrape.animated = true;
        cfg.ffmpeg = dir.path().join("fake-ffmpeg");
        std::fs::write(&cfg.ffmpeg, "#!/bin/sh\nfor last; do :; done\nprintf 'mp4' > \"$last\"\n").unwrap();
        std::fs::set_permissions(&cfg.ffmpeg, std::fs::Permissions::from_mode(0o755)).unwrap();

        let base = image_server().await;
        let mut pages = HashMap::new();
        pages.insert(search_url("winder"), r#"<a href="/en/models/7">a</a>"#.to_string());
        pages.insert(
            "https://makerworld.com/en/models/7".to_string(),
            format!(
                r#"<h1>Spinner</h1><div class="photo_show"><img src="{}/media/spinning-winder.gif"></div>"#,
                base
            ),
        );

        let RunOutcome::Written(summary) = run(&cfg, &FakeLauncher::with_pages(pages)).await.unwrap() else {
            panic!("a poster-only listing should be kept");
        };
        assert_eq!((summary.images_saved, summary.videos_saved), (0, 1));

        let video = cfg.download_dir.join("spinning-winder.mp4");
        let poster = cfg.download_dir.join("spinning-winder_poster.jpg");
        assert_eq!(std::fs::read(&video).unwrap(), b"mp4");
        assert!(poster.is_file());

        let book = umya_spreadsheet::reader::xlsx::read(&cfg.output).unwrap();
        let ws = book.get_sheet_by_name("Template").unwrap();
        assert_eq!(ws.text(11, 2), poster.display().to_string());

        let mut rdr = csv::Reader::from_path(&cfg.metadata).unwrap();
        let row = rdr.records().next().unwrap().unwrap();
        assert_eq!(&row[4], video.display().to_string());
        assert_eq!(&row[5], poster.display().to_string());
    }

    #[test]
    fn stem_comes_from_last_path_segment() {
        assert_eq!(
            media_stem("https://cdn.example.com/media/spinning-winder.gif?x-oss-process=image/resize,w_400"),
            Some("spinning-winder".to_string())
        );
        assert_eq!(media_stem("https://cdn.example.com/"), None);
        assert_eq!(media_stem("not a url"), None);
    }
}
