//! Chromium engine: a persistent-profile browser driven over the DevTools
//! protocol.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{SetLocaleOverrideParams, SetTimezoneOverrideParams};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::gallery::{ClickOutcome, ScrollOutcome};
use super::state::{self, StoredCookie};
use super::stealth::{LAUNCH_ARGS, LOCALE, STEALTH_JS, TIMEZONE, WINDOW};
use super::{LaunchOptions, PageSession};

const IDLE_POLL: Duration = Duration::from_millis(250);
/// No new network resources for this long counts as idle.
const IDLE_QUIET: Duration = Duration::from_millis(500);
const RESOURCE_COUNT_JS: &str = "performance.getEntriesByType('resource').length";

pub struct CdpSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    state_path: PathBuf,
    navigation_timeout: Duration,
}

impl CdpSession {
    pub async fn launch(opts: &LaunchOptions) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(&opts.profile_dir)
            .window_size(WINDOW.0, WINDOW.1)
            .viewport(None)
            .request_timeout(opts.navigation_timeout)
            .args(LAUNCH_ARGS.iter().copied());
        if !opts.headless {
            builder = builder.with_head();
        }
        if let Some(proxy) = &opts.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        if let Some(chrome) = &opts.chrome {
            builder = builder.chrome_executable(chrome);
        }
        let config = builder.build().map_err(|e| anyhow!(e))?;

        let (browser, mut handler) = Browser::launch(config).await.context("launching chromium")?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_JS))
            .await
            .context("installing stealth patches")?;
        if let Err(e) = page.execute(SetTimezoneOverrideParams::new(TIMEZONE)).await {
            warn!("Timezone override failed: {}", e);
        }
        let locale = SetLocaleOverrideParams {
            locale: Some(LOCALE.to_string()),
        };
        if let Err(e) = page.execute(locale).await {
            warn!("Locale override failed: {}", e);
        }

        let session = CdpSession {
            browser,
            page,
            handler,
            state_path: opts.state_path.clone(),
            navigation_timeout: opts.navigation_timeout,
        };
        session.restore_cookies().await;
        Ok(session)
    }

    async fn restore_cookies(&self) {
        let cookies: Vec<CookieParam> = state::load(&self.state_path)
            .into_iter()
            .filter_map(|c| {
                CookieParam::builder()
                    .name(c.name)
                    .value(c.value)
                    .domain(c.domain)
                    .path(c.path)
                    .secure(c.secure)
                    .http_only(c.http_only)
                    .build()
                    .ok()
            })
            .collect();
        if cookies.is_empty() {
            return;
        }
        let n = cookies.len();
        match self.page.set_cookies(cookies).await {
            Ok(_) => debug!("Restored {} cookies", n),
            Err(e) => warn!("Could not restore session cookies: {}", e),
        }
    }

    async fn evaluate_unit(&self, js: &str) -> ScrollOutcome {
        match self.page.evaluate(js).await {
            Ok(_) => ScrollOutcome::Scrolled,
            Err(e) => ScrollOutcome::Skipped(e.to_string()),
        }
    }
}

impl PageSession for CdpSession {
    async fn goto(&mut self, url: &str) -> Result<()> {
        tokio::time::timeout(self.navigation_timeout, self.page.goto(url))
            .await
            .map_err(|_| anyhow!("navigation to {} timed out", url))?
            .with_context(|| format!("navigating to {}", url))?;
        Ok(())
    }

    async fn wait_for_idle(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut last: Option<u64> = None;
        let mut quiet_since = Instant::now();

        while Instant::now() < deadline {
            let count = match self.page.evaluate(RESOURCE_COUNT_JS).await {
                Ok(r) => r.into_value::<u64>().ok(),
                Err(_) => None,
            };
            if count != last {
                last = count;
                quiet_since = Instant::now();
            } else if quiet_since.elapsed() >= IDLE_QUIET {
                return;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
        debug!("Idle wait ended after {:?} without settling", timeout);
    }

    async fn content(&mut self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn current_url(&mut self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    async fn scroll_to_top(&mut self) -> ScrollOutcome {
        self.evaluate_unit("window.scrollTo(0, 0)").await
    }

    async fn scroll_by(&mut self, dy: u32) -> ScrollOutcome {
        self.evaluate_unit(&format!("window.scrollBy(0, {})", dy)).await
    }

    async fn click_images(
        &mut self,
        container: &str,
        click_timeout: Duration,
        settle: Duration,
    ) -> Vec<ClickOutcome> {
        let gallery = match self.page.find_element(container).await {
            Ok(el) => el,
            Err(_) => return Vec::new(),
        };
        let images = match gallery.find_elements("img").await {
            Ok(images) => images,
            Err(e) => {
                debug!("Gallery images not found: {}", e);
                return Vec::new();
            }
        };

        let mut outcomes = Vec::with_capacity(images.len());
        for img in &images {
            let outcome = match img.scroll_into_view().await {
                Err(e) => ClickOutcome::Skipped(format!("scroll: {}", e)),
                Ok(_) => match tokio::time::timeout(click_timeout, img.click()).await {
                    Ok(Ok(_)) => ClickOutcome::Clicked,
                    Ok(Err(e)) => ClickOutcome::Skipped(e.to_string()),
                    Err(_) => ClickOutcome::Skipped("click timed out".into()),
                },
            };
            outcomes.push(outcome);
            tokio::time::sleep(settle).await;
        }
        outcomes
    }

    async fn save_state(&mut self) -> Result<()> {
        let cookies: Vec<StoredCookie> = self
            .page
            .get_cookies()
            .await?
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect();
        state::save(&self.state_path, &cookies)
    }

    async fn close(mut self) -> Result<()> {
        let closed = self.browser.close().await;
        if closed.is_ok() {
            let _ = self.browser.wait().await;
        }
        self.handler.abort();
        closed.map(|_| ()).context("closing chromium")
    }
}
