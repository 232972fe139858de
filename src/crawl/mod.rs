//! Listing extraction across browser engines, with bot-check handling and a
//! single headless→headed escalation.

pub mod cdp;
pub mod gallery;
pub mod http;
pub mod page;
pub mod state;
pub mod stealth;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::ScrapedListing;
use gallery::{ClickOutcome, GalleryReport, ScrollOutcome, GALLERY_CONTAINER};

// ── Engines and sessions ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Chromium,
    Http,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Chromium => write!(f, "chromium"),
            Engine::Http => write!(f, "http"),
        }
    }
}

pub const DEFAULT_ENGINES: &[Engine] = &[Engine::Chromium, Engine::Http];

/// Every delay the extraction loop uses.
#[derive(Debug, Clone)]
pub struct Timings {
    pub navigation: Duration,
    pub search_idle: Duration,
    pub detail_idle: Duration,
    pub scroll_steps: u32,
    pub scroll_step_px: u32,
    pub scroll_pause: Duration,
    pub click_timeout: Duration,
    pub click_settle: Duration,
    pub cooldown: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            navigation: Duration::from_secs(120),
            search_idle: Duration::from_secs(15),
            detail_idle: Duration::from_secs(12),
            scroll_steps: 14,
            scroll_step_px: 900,
            scroll_pause: Duration::from_millis(120),
            click_timeout: Duration::from_millis(150),
            click_settle: Duration::from_millis(50),
            cooldown: Duration::from_secs(8),
        }
    }
}

#[cfg(test)]
impl Timings {
    pub fn instant() -> Self {
        Timings {
            navigation: Duration::from_secs(1),
            search_idle: Duration::ZERO,
            detail_idle: Duration::ZERO,
            scroll_pause: Duration::ZERO,
            click_timeout: Duration::ZERO,
            click_settle: Duration::ZERO,
            cooldown: Duration::ZERO,
            ..Timings::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub proxy: Option<String>,
    pub profile_dir: PathBuf,
    pub state_path: PathBuf,
    pub chrome: Option<PathBuf>,
    pub navigation_timeout: Duration,
}

/// One open page in an automation session.
#[allow(async_fn_in_trait)]
pub trait PageSession {
    async fn goto(&mut self, url: &str) -> Result<()>;
    /// Bounded wait for network quiet. Running out of time is not an error.
    async fn wait_for_idle(&mut self, timeout: Duration);
    async fn content(&mut self) -> Result<String>;
    async fn current_url(&mut self) -> Option<String>;
    async fn scroll_to_top(&mut self) -> ScrollOutcome;
    async fn scroll_by(&mut self, dy: u32) -> ScrollOutcome;
    async fn click_images(
        &mut self,
        container: &str,
        click_timeout: Duration,
        settle: Duration,
    ) -> Vec<ClickOutcome>;
    async fn save_state(&mut self) -> Result<()>;
    async fn close(self) -> Result<()>;
}

#[allow(async_fn_in_trait)]
pub trait SessionLauncher {
    type Session: PageSession;
    async fn launch(&self, engine: Engine, headless: bool, proxy: Option<&str>) -> Result<Self::Session>;
}

/// Launches real sessions sharing one profile directory and state file.
pub struct BrowserLauncher {
    pub profile_dir: PathBuf,
    pub state_path: PathBuf,
    pub chrome: Option<PathBuf>,
    pub navigation_timeout: Duration,
}

pub enum BrowserSession {
    Cdp(cdp::CdpSession),
    Http(http::HttpSession),
}

impl SessionLauncher for BrowserLauncher {
    type Session = BrowserSession;

    async fn launch(&self, engine: Engine, headless: bool, proxy: Option<&str>) -> Result<BrowserSession> {
        let opts = LaunchOptions {
            headless,
            proxy: proxy.map(str::to_string),
            profile_dir: self.profile_dir.clone(),
            state_path: self.state_path.clone(),
            chrome: self.chrome.clone(),
            navigation_timeout: self.navigation_timeout,
        };
        Ok(match engine {
            Engine::Chromium => BrowserSession::Cdp(cdp::CdpSession::launch(&opts).await?),
            Engine::Http => BrowserSession::Http(http::HttpSession::launch(&opts)?),
        })
    }
}

macro_rules! delegate {
    ($self:ident, $s:ident => $e:expr) => {
        match $self {
            BrowserSession::Cdp($s) => $e,
            BrowserSession::Http($s) => $e,
        }
    };
}

impl PageSession for BrowserSession {
    async fn goto(&mut self, url: &str) -> Result<()> {
        delegate!(self, s => s.goto(url).await)
    }

    async fn wait_for_idle(&mut self, timeout: Duration) {
        delegate!(self, s => s.wait_for_idle(timeout).await)
    }

    async fn content(&mut self) -> Result<String> {
        delegate!(self, s => s.content().await)
    }

    async fn current_url(&mut self) -> Option<String> {
        delegate!(self, s => s.current_url().await)
    }

    async fn scroll_to_top(&mut self) -> ScrollOutcome {
        delegate!(self, s => s.scroll_to_top().await)
    }

    async fn scroll_by(&mut self, dy: u32) -> ScrollOutcome {
        delegate!(self, s => s.scroll_by(dy).await)
    }

    async fn click_images(
        &mut self,
        container: &str,
        click_timeout: Duration,
        settle: Duration,
    ) -> Vec<ClickOutcome> {
        delegate!(self, s => s.click_images(container, click_timeout, settle).await)
    }

    async fn save_state(&mut self) -> Result<()> {
        delegate!(self, s => s.save_state().await)
    }

    async fn close(self) -> Result<()> {
        delegate!(self, s => s.close().await)
    }
}

// ── Orchestration ──

#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub keyword: String,
    pub max_results: usize,
    pub headless: bool,
    pub proxy: Option<String>,
    pub engines: Vec<Engine>,
    pub animated: bool,
    pub timings: Timings,
}

/// What one engine pass produced.
#[derive(Debug)]
pub enum BackendOutcome {
    Listings(Vec<ScrapedListing>),
    /// Bot check hit while escalation is still possible.
    Challenged,
}

#[derive(Debug)]
enum Attempt {
    Attempting { headless: bool },
    Success(Vec<ScrapedListing>),
    Retry,
    Failure,
}

/// Scrape `req.keyword` through the configured engines. Never fails: broken
/// items are omitted and an exhausted engine list yields an empty vec.
pub async fn scrape<L: SessionLauncher>(launcher: &L, req: &ScrapeRequest) -> Vec<ScrapedListing> {
    let mut attempt = Attempt::Attempting {
        headless: req.headless,
    };
    let mut escalated = false;

    loop {
        attempt = match attempt {
            Attempt::Attempting { headless } => run_engines(launcher, req, headless).await,
            Attempt::Retry if !escalated => {
                escalated = true;
                info!("Bot check in headless mode, restarting with a visible browser");
                Attempt::Attempting { headless: false }
            }
            Attempt::Retry => Attempt::Failure,
            Attempt::Success(listings) => return listings,
            Attempt::Failure => {
                warn!("No engine produced listings for '{}'", req.keyword);
                return Vec::new();
            }
        };
    }
}

async fn run_engines<L: SessionLauncher>(launcher: &L, req: &ScrapeRequest, headless: bool) -> Attempt {
    for &engine in &req.engines {
        match run_engine(launcher, engine, req, headless).await {
            Ok(BackendOutcome::Challenged) => return Attempt::Retry,
            Ok(BackendOutcome::Listings(listings)) if !listings.is_empty() => {
                info!("[{}] {} listings", engine, listings.len());
                return Attempt::Success(listings);
            }
            Ok(BackendOutcome::Listings(_)) => info!("[{}] no listings", engine),
            Err(e) => warn!("[{}] engine failed: {:#}", engine, e),
        }
    }
    Attempt::Failure
}

async fn run_engine<L: SessionLauncher>(
    launcher: &L,
    engine: Engine,
    req: &ScrapeRequest,
    headless: bool,
) -> Result<BackendOutcome> {
    let mut session = launcher.launch(engine, headless, req.proxy.as_deref()).await?;
    let outcome = harvest(&mut session, engine, req, headless).await;

    if outcome.is_ok() {
        if let Err(e) = session.save_state().await {
            warn!("[{}] could not persist session state: {}", engine, e);
        }
    }
    if let Err(e) = session.close().await {
        debug!("[{}] close: {}", engine, e);
    }
    outcome
}

async fn harvest<S: PageSession>(
    session: &mut S,
    engine: Engine,
    req: &ScrapeRequest,
    headless: bool,
) -> Result<BackendOutcome> {
    let search = page::search_url(&req.keyword);
    info!("[{}] open {}", engine, search);
    session.goto(&search).await?;
    session.wait_for_idle(req.timings.search_idle).await;

    let mut html = session.content().await?;
    if page::looks_like_challenge(&html) {
        warn!("[{}] bot check detected", engine);
        if headless && req.proxy.is_none() {
            return Ok(BackendOutcome::Challenged);
        }
        tokio::time::sleep(req.timings.cooldown).await;
        html = session.content().await?;
    }

    let base = session.current_url().await.unwrap_or(search);
    let links = page::collect_links(&html, &base, req.max_results);
    info!("[{}] {} detail links", engine, links.len());

    let mut listings = Vec::with_capacity(links.len());
    for link in &links {
        match scrape_detail(session, link, req).await {
            Ok(listing) => listings.push(listing),
            Err(e) => warn!("[{}] skipping {}: {:#}", engine, link, e),
        }
    }
    Ok(BackendOutcome::Listings(listings))
}

async fn scrape_detail<S: PageSession>(session: &mut S, link: &str, req: &ScrapeRequest) -> Result<ScrapedListing> {
    let t = &req.timings;
    session.goto(link).await?;
    session.wait_for_idle(t.detail_idle).await;

    let html = session.content().await?;
    let title = page::extract_title(&html).unwrap_or_else(|| link.to_string());
    let description = page::extract_description(&html);

    scroll_through(session, t).await;
    let clicks = session
        .click_images(GALLERY_CONTAINER, t.click_timeout, t.click_settle)
        .await;
    let mut report = GalleryReport::from_clicks(&clicks);

    let html = session.content().await?;
    let page_url = session.current_url().await.unwrap_or_else(|| link.to_string());
    let mut media_urls = gallery::extract_gallery(&html, &page_url, req.animated);
    if media_urls.is_empty() {
        if let Some(og) = page::og_image(&html, &page_url) {
            report.used_og_image = true;
            media_urls.push(og);
        }
    }
    report.collected = media_urls.len();
    debug!("Gallery {}: {:?}", link, report);

    Ok(ScrapedListing {
        title,
        description,
        source_url: link.to_string(),
        media_urls,
    })
}

/// Top, then fixed steps down to trigger lazy loading.
async fn scroll_through<S: PageSession>(session: &mut S, t: &Timings) {
    if let ScrollOutcome::Skipped(reason) = session.scroll_to_top().await {
        debug!("Scroll skipped: {}", reason);
        return;
    }
    for _ in 0..t.scroll_steps {
        if let ScrollOutcome::Skipped(reason) = session.scroll_by(t.scroll_step_px).await {
            debug!("Scroll skipped: {}", reason);
            return;
        }
        tokio::time::sleep(t.scroll_pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeLauncher;
    use super::*;
    use std::collections::HashMap;

    fn search() -> String {
        page::search_url("cable winder")
    }

    fn request(headless: bool) -> ScrapeRequest {
        ScrapeRequest {
            keyword: "cable winder".into(),
            max_results: 5,
            headless,
            proxy: None,
            engines: DEFAULT_ENGINES.to_vec(),
            animated: false,
            timings: Timings::instant(),
        }
    }

    fn site() -> HashMap<String, String> {
        let mut pages = HashMap::new();
        pages.insert(
            search(),
            r#"<a href="/en/models/1-winder">a</a><a href="/en/models/2-clip">b</a>"#.to_string(),
        );
        pages.insert(
            "https://makerworld.com/en/models/1-winder".to_string(),
            r#"<h1>Winder</h1><meta name="description" content="Winds cables">
               <div class="photo_show">
                 <img src="https://cdn.example.com/w1.jpg?x-oss-process=image/resize,w_800/format,webp">
                 <img src="https://cdn.example.com/avatar.jpg">
               </div>"#
                .to_string(),
        );
        pages.insert(
            "https://makerworld.com/en/models/2-clip".to_string(),
            r#"<meta property="og:title" content="Clip">
               <meta property="og:image" content="https://cdn.example.com/clip.png">"#
                .to_string(),
        );
        pages
    }

    #[tokio::test]
    async fn first_engine_with_listings_wins() {
        let launcher = FakeLauncher::with_pages(site());
        let listings = scrape(&launcher, &request(true)).await;

        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].title, "Winder");
        assert_eq!(listings[0].description, "Winds cables");
        assert_eq!(
            listings[0].media_urls,
            vec!["https://cdn.example.com/w1.jpg?x-oss-process=image/resize,w_800/format,png"]
        );
        assert_eq!(listings[1].title, "Clip");
        assert_eq!(listings[1].media_urls, vec!["https://cdn.example.com/clip.png"]);

        let log = launcher.log.borrow();
        assert_eq!(log.launches, vec![(Engine::Chromium, true)]);
        assert_eq!((log.saves, log.closes), (1, 1));
        assert_eq!(log.scrolls, 2 * 14);
    }

    #[tokio::test]
    async fn zero_links_means_empty_result() {
        let mut pages = HashMap::new();
        pages.insert(search(), "<p>no results</p>".to_string());
        let launcher = FakeLauncher::with_pages(pages);
        assert!(scrape(&launcher, &request(true)).await.is_empty());
        assert_eq!(
            launcher.log.borrow().launches,
            vec![(Engine::Chromium, true), (Engine::Http, true)]
        );
    }

    #[tokio::test]
    async fn failed_engine_falls_through() {
        let launcher = FakeLauncher {
            pages: site(),
            failing: vec![Engine::Chromium],
            ..Default::default()
        };
        let listings = scrape(&launcher, &request(true)).await;
        assert_eq!(listings.len(), 2);
        assert_eq!(
            launcher.log.borrow().launches,
            vec![(Engine::Chromium, true), (Engine::Http, true)]
        );
    }

    #[tokio::test]
    async fn headless_challenge_escalates_to_headed() {
        let launcher = FakeLauncher {
            pages: site(),
            challenge_headless: true,
            ..Default::default()
        };
        let listings = scrape(&launcher, &request(true)).await;
        assert_eq!(listings.len(), 2);

        let log = launcher.log.borrow();
        assert_eq!(log.launches, vec![(Engine::Chromium, true), (Engine::Chromium, false)]);
        // State persisted before the restart and after the headed pass.
        assert_eq!(log.saves, 2);
    }

    #[tokio::test]
    async fn escalation_happens_at_most_once() {
        let launcher = FakeLauncher {
            pages: site(),
            challenge_always: true,
            ..Default::default()
        };
        assert!(scrape(&launcher, &request(true)).await.is_empty());
        assert_eq!(
            launcher.log.borrow().launches,
            vec![(Engine::Chromium, true), (Engine::Chromium, false), (Engine::Http, false)]
        );
    }

    #[tokio::test]
    async fn proxy_disables_escalation() {
        let launcher = FakeLauncher {
            pages: site(),
            challenge_always: true,
            ..Default::default()
        };
        let mut req = request(true);
        req.proxy = Some("http://127.0.0.1:8080".into());
        assert!(scrape(&launcher, &req).await.is_empty());
        assert_eq!(
            launcher.log.borrow().launches,
            vec![(Engine::Chromium, true), (Engine::Http, true)]
        );
    }

    #[tokio::test]
    async fn broken_detail_page_is_omitted() {
        let mut pages = site();
        pages.remove("https://makerworld.com/en/models/2-clip");
        let launcher = FakeLauncher::with_pages(pages);
        let listings = scrape(&launcher, &request(false)).await;
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].source_url, "https://makerworld.com/en/models/1-winder");
    }

    #[tokio::test]
    async fn result_cap_applies() {
        let launcher = FakeLauncher::with_pages(site());
        let mut req = request(true);
        req.max_results = 1;
        assert_eq!(scrape(&launcher, &req).await.len(), 1);
    }
}
