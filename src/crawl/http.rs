//! Plain HTTP engine. No script execution, so scrolling and clicking are
//! reported as skipped and only server-rendered markup is seen.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::ACCEPT_LANGUAGE;
use tracing::{debug, warn};
use url::Url;

use super::gallery::{gallery_image_count, ClickOutcome, ScrollOutcome};
use super::state::{self, StoredCookie};
use super::stealth::USER_AGENT;
use super::{LaunchOptions, PageSession};

const NO_SCRIPT: &str = "http engine has no script runtime";
const ORIGIN: &str = "https://makerworld.com/";

pub struct HttpSession {
    client: reqwest::Client,
    jar: Arc<Jar>,
    state_path: PathBuf,
    url: Option<Url>,
    body: String,
}

impl HttpSession {
    pub fn launch(opts: &LaunchOptions) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        for cookie in state::load(&opts.state_path) {
            let host = cookie.domain.trim_start_matches('.');
            if let Ok(url) = Url::parse(&format!("https://{}/", host)) {
                jar.add_cookie_str(&cookie.to_header(), &url);
            }
        }

        let mut builder = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .user_agent(USER_AGENT)
            .timeout(opts.navigation_timeout);
        if let Some(proxy) = &opts.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str()).context("invalid proxy")?);
        }

        Ok(HttpSession {
            client: builder.build()?,
            jar,
            state_path: opts.state_path.clone(),
            url: None,
            body: String::new(),
        })
    }
}

impl PageSession for HttpSession {
    async fn goto(&mut self, url: &str) -> Result<()> {
        let resp = self
            .client
            .get(url)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .with_context(|| format!("fetching {}", url))?;
        if !resp.status().is_success() {
            // Challenge interstitials come back as 403/503 with a body worth inspecting.
            warn!("GET {} returned {}", url, resp.status());
        }
        self.url = Some(resp.url().clone());
        self.body = resp.text().await?;
        Ok(())
    }

    async fn wait_for_idle(&mut self, _timeout: Duration) {}

    async fn content(&mut self) -> Result<String> {
        Ok(self.body.clone())
    }

    async fn current_url(&mut self) -> Option<String> {
        self.url.as_ref().map(|u| u.to_string())
    }

    async fn scroll_to_top(&mut self) -> ScrollOutcome {
        ScrollOutcome::Skipped(NO_SCRIPT.into())
    }

    async fn scroll_by(&mut self, _dy: u32) -> ScrollOutcome {
        ScrollOutcome::Skipped(NO_SCRIPT.into())
    }

    async fn click_images(
        &mut self,
        _container: &str,
        _click_timeout: Duration,
        _settle: Duration,
    ) -> Vec<ClickOutcome> {
        let n = gallery_image_count(&self.body);
        vec![ClickOutcome::Skipped(NO_SCRIPT.into()); n]
    }

    async fn save_state(&mut self) -> Result<()> {
        let mut origins = vec![Url::parse(ORIGIN)?];
        if let Some(url) = &self.url {
            if url.host_str() != origins[0].host_str() {
                origins.push(url.clone());
            }
        }

        let mut cookies = Vec::new();
        for origin in &origins {
            let Some(header) = self.jar.cookies(origin) else {
                continue;
            };
            let domain = origin.host_str().unwrap_or_default().to_string();
            for pair in header.to_str().unwrap_or_default().split("; ") {
                if let Some((name, value)) = pair.split_once('=') {
                    cookies.push(StoredCookie {
                        name: name.to_string(),
                        value: value.to_string(),
                        domain: domain.clone(),
                        path: "/".to_string(),
                        secure: origin.scheme() == "https",
                        http_only: false,
                    });
                }
            }
        }
        debug!("HTTP session holds {} cookies", cookies.len());
        state::save(&self.state_path, &cookies)
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}
