//! Pure extraction from rendered page HTML.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

use crate::sanitize::sanitize;

pub const SEARCH_URL: &str = "https://makerworld.com/en/search/models?keyword=";

const CHALLENGE_MARKERS: &[&str] = &[
    "just a moment",
    "verifying you are human",
    "cloudflare",
    "cf-ray",
    "cf-chl",
];

static DETAIL_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='/models/'], a[href*='/model/']").unwrap());
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static OG_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[property='og:title']").unwrap());
static OG_IMAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[property='og:image']").unwrap());
static META_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[name='description']").unwrap());

pub fn search_url(keyword: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(keyword.as_bytes()).collect();
    format!("{}{}", SEARCH_URL, encoded)
}

/// Bot-check interstitial detection on the rendered markup.
pub fn looks_like_challenge(html: &str) -> bool {
    let lower = html.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Detail-page links in document order, absolute, de-duplicated, capped.
pub fn collect_links(html: &str, base: &str, max: usize) -> Vec<String> {
    let doc = Html::parse_document(html);
    let base = Url::parse(base).ok();
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for a in doc.select(&DETAIL_LINK) {
        if links.len() >= max {
            break;
        }
        let Some(href) = a.value().attr("href").map(str::trim).filter(|h| !h.is_empty()) else {
            continue;
        };
        let Some(abs) = resolve(base.as_ref(), href) else {
            continue;
        };
        if seen.insert(abs.clone()) {
            links.push(abs);
        }
    }
    links
}

/// Absolute form of `href`: protocol-relative becomes https, the rest is
/// joined onto `base`.
pub fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("https://{}", rest));
    }
    if let Ok(abs) = Url::parse(href) {
        return Some(abs.to_string());
    }
    base.and_then(|b| b.join(href).ok()).map(|u| u.to_string())
}

fn meta_content(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// First `h1` text, else `og:title`.
pub fn extract_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let h1 = doc
        .select(&H1)
        .next()
        .map(|h| h.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());
    h1.or_else(|| meta_content(&doc, &OG_TITLE))
}

pub fn extract_description(html: &str) -> String {
    let doc = Html::parse_document(html);
    meta_content(&doc, &META_DESCRIPTION).unwrap_or_default()
}

/// Sanitized `og:image`, used when the gallery yields nothing.
pub fn og_image(html: &str, base: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let raw = meta_content(&doc, &OG_IMAGE)?;
    resolve(Url::parse(base).ok().as_ref(), &raw).map(|u| sanitize(&u))
}
