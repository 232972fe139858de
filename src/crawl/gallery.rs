use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use url::Url;

use super::page::resolve;
use crate::models::MAX_MEDIA;
use crate::sanitize::sanitize;

pub const GALLERY_CONTAINER: &str = ".photo_show";

const NOISE: &[&str] = &[
    "avatar",
    "logo",
    "icon",
    "/comment",
    "emote",
    "placeholder",
    ".svg",
    ".ico",
];
const STILL_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".avif"];
const ANIMATED_EXTENSION: &str = ".gif";

static GALLERY: LazyLock<Selector> = LazyLock::new(|| Selector::parse(GALLERY_CONTAINER).unwrap());
static IMG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());

/// Result of one best-effort thumbnail click.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ClickOutcome {
    Clicked,
    Skipped(String),
}

/// Result of one scroll step.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollOutcome {
    Scrolled,
    Skipped(String),
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct GalleryReport {
    pub clicked: usize,
    pub skipped: Vec<String>,
    pub collected: usize,
    pub used_og_image: bool,
}

impl GalleryReport {
    pub fn from_clicks(outcomes: &[ClickOutcome]) -> Self {
        let mut report = GalleryReport::default();
        for outcome in outcomes {
            match outcome {
                ClickOutcome::Clicked => report.clicked += 1,
                ClickOutcome::Skipped(reason) => report.skipped.push(reason.clone()),
            }
        }
        report
    }
}

fn first_srcset_candidate(srcset: &str) -> Option<&str> {
    srcset
        .split(',')
        .next()
        .and_then(|c| c.split_whitespace().next())
        .filter(|c| !c.is_empty())
}

fn raw_source<'a>(img: &ElementRef<'a>) -> Option<&'a str> {
    let el = img.value();
    ["src", "data-src"]
        .iter()
        .filter_map(|a| el.attr(a))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .or_else(|| el.attr("srcset").and_then(first_srcset_candidate))
}

fn is_noise(url: &str, context: &str) -> bool {
    let url = url.to_lowercase();
    let context = context.to_lowercase();
    NOISE.iter().any(|n| url.contains(n) || context.contains(n))
}

fn has_media_extension(url: &str, animated: bool) -> bool {
    let path = match Url::parse(url) {
        Ok(u) => u.path().to_lowercase(),
        Err(_) => return false,
    };
    STILL_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        || (animated && path.ends_with(ANIMATED_EXTENSION))
}

/// Images of the first gallery container only, the same ones a session clicks.
fn gallery_images(doc: &Html) -> Vec<ElementRef<'_>> {
    doc.select(&GALLERY)
        .next()
        .map(|gallery| gallery.select(&IMG).collect())
        .unwrap_or_default()
}

/// Product media inside the gallery container, in DOM order: resolved,
/// noise-filtered, sanitized, de-duplicated and capped.
pub fn extract_gallery(html: &str, page_url: &str, animated: bool) -> Vec<String> {
    let doc = Html::parse_document(html);
    let base = Url::parse(page_url).ok();
    let mut urls: Vec<String> = Vec::new();

    for img in gallery_images(&doc) {
        if urls.len() >= MAX_MEDIA {
            break;
        }
        let Some(raw) = raw_source(&img) else {
            continue;
        };
        let Some(abs) = resolve(base.as_ref(), raw) else {
            continue;
        };

        let el = img.value();
        let context = format!(
            "{} {}",
            el.attr("class").unwrap_or_default(),
            el.attr("alt").unwrap_or_default()
        );
        if is_noise(&abs, &context) || !has_media_extension(&abs, animated) {
            continue;
        }

        let clean = sanitize(&abs);
        if !urls.contains(&clean) {
            urls.push(clean);
        }
    }
    urls
}

/// Count of gallery images, used by sessions that cannot click.
pub fn gallery_image_count(html: &str) -> usize {
    gallery_images(&Html::parse_document(html)).len()
}

pub fn is_animated(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.path().to_lowercase().ends_with(ANIMATED_EXTENSION))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://makerworld.com/en/models/101-cable-winder";

    fn gallery(imgs: &str) -> String {
        format!(
            r#"<html><body><img src="/outside.jpg"><div class="photo_show">{}</div></body></html>"#,
            imgs
        )
    }

    #[test]
    fn only_first_container_counts() {
        let html = r#"<div class="photo_show"><img src="https://cdn.example.com/a.jpg"></div>
            <div class="photo_show"><img src="https://cdn.example.com/related.jpg"></div>"#;
        assert_eq!(extract_gallery(html, PAGE, false), vec!["https://cdn.example.com/a.jpg"]);
        assert_eq!(gallery_image_count(html), 1);
    }

    #[test]
    fn sources_resolved_in_dom_order() {
        let html = gallery(
            r#"<img src="//cdn.example.com/a.jpg">
               <img data-src="/img/b.png">
               <img srcset="https://cdn.example.com/c.webp 1x, https://cdn.example.com/c2.webp 2x">
               <img src="">"#,
        );
        assert_eq!(
            extract_gallery(&html, PAGE, false),
            vec![
                "https://cdn.example.com/a.jpg",
                "https://makerworld.com/img/b.png",
                "https://cdn.example.com/c.webp",
            ]
        );
    }

    #[test]
    fn noise_and_unknown_extensions_rejected() {
        let html = gallery(
            r#"<img src="https://cdn.example.com/user/avatar/1.jpg">
               <img src="https://cdn.example.com/p.jpg" class="author-logo">
               <img src="https://cdn.example.com/q.jpg" alt="Comment emote">
               <img src="https://cdn.example.com/badge.svg">
               <img src="https://cdn.example.com/noext">
               <img src="https://cdn.example.com/photo.JPEG?x=1">"#,
        );
        assert_eq!(
            extract_gallery(&html, PAGE, false),
            vec!["https://cdn.example.com/photo.JPEG?x=1"]
        );
    }

    #[test]
    fn gif_only_when_animated() {
        let html = gallery(r#"<img src="https://cdn.example.com/spin.gif"><img src="https://cdn.example.com/s.png">"#);
        assert_eq!(extract_gallery(&html, PAGE, false), vec!["https://cdn.example.com/s.png"]);
        assert_eq!(extract_gallery(&html, PAGE, true).len(), 2);
        assert!(is_animated("https://cdn.example.com/spin.gif"));
        assert!(!is_animated("https://cdn.example.com/s.png"));
    }

    #[test]
    fn sanitized_then_deduplicated_and_capped() {
        let mut imgs = String::from(
            r#"<img src="https://cdn.example.com/0.jpg?x-oss-process=image/format,webp">
               <img src="https://cdn.example.com/0.jpg">"#,
        );
        for i in 1..12 {
            imgs.push_str(&format!(r#"<img src="https://cdn.example.com/{i}.jpg">"#));
        }
        let urls = extract_gallery(&gallery(&imgs), PAGE, false);
        assert_eq!(urls.len(), MAX_MEDIA);
        assert_eq!(urls[0], "https://cdn.example.com/0.jpg");
        assert_eq!(urls[1], "https://cdn.example.com/1.jpg");
    }

    #[test]
    fn no_container_no_media() {
        assert!(extract_gallery("<img src='https://cdn.example.com/a.jpg'>", PAGE, false).is_empty());
        assert_eq!(gallery_image_count(&gallery("<img><img>")), 2);
    }

    #[test]
    fn report_tallies_clicks() {
        let report = GalleryReport::from_clicks(&[
            ClickOutcome::Clicked,
            ClickOutcome::Skipped("timeout".into()),
            ClickOutcome::Clicked,
        ]);
        assert_eq!(report.clicked, 2);
        assert_eq!(report.skipped, vec!["timeout"]);
    }
}
