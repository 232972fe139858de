//! Scripted in-memory sessions for tests: pages keyed by URL, optional bot
//! check and engines that refuse to start.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Result};

use super::gallery::{ClickOutcome, ScrollOutcome};
use super::{Engine, PageSession, SessionLauncher};

pub const CHALLENGE: &str = "<html><title>Just a moment...</title></html>";

#[derive(Default, Debug)]
pub struct Log {
    pub launches: Vec<(Engine, bool)>,
    pub saves: usize,
    pub closes: usize,
    pub scrolls: usize,
}

#[derive(Default)]
pub struct FakeLauncher {
    pub pages: HashMap<String, String>,
    pub failing: Vec<Engine>,
    pub challenge_headless: bool,
    pub challenge_always: bool,
    pub log: Rc<RefCell<Log>>,
}

impl FakeLauncher {
    pub fn with_pages(pages: HashMap<String, String>) -> Self {
        FakeLauncher {
            pages,
            ..Default::default()
        }
    }
}

pub struct FakeSession {
    pages: HashMap<String, String>,
    challenge: bool,
    current: Option<String>,
    log: Rc<RefCell<Log>>,
}

impl SessionLauncher for FakeLauncher {
    type Session = FakeSession;

    async fn launch(&self, engine: Engine, headless: bool, _proxy: Option<&str>) -> Result<FakeSession> {
        self.log.borrow_mut().launches.push((engine, headless));
        if self.failing.contains(&engine) {
            bail!("{} would not start", engine);
        }
        Ok(FakeSession {
            pages: self.pages.clone(),
            challenge: self.challenge_always || (self.challenge_headless && headless),
            current: None,
            log: Rc::clone(&self.log),
        })
    }
}

impl PageSession for FakeSession {
    async fn goto(&mut self, url: &str) -> Result<()> {
        if !self.pages.contains_key(url) {
            bail!("404 for {}", url);
        }
        self.current = Some(url.to_string());
        Ok(())
    }

    async fn wait_for_idle(&mut self, _timeout: Duration) {}

    async fn content(&mut self) -> Result<String> {
        if self.challenge {
            return Ok(CHALLENGE.to_string());
        }
        let url = self.current.as_deref().unwrap_or_default();
        Ok(self.pages.get(url).cloned().unwrap_or_default())
    }

    async fn current_url(&mut self) -> Option<String> {
        self.current.clone()
    }

    async fn scroll_to_top(&mut self) -> ScrollOutcome {
        ScrollOutcome::Scrolled
    }

    async fn scroll_by(&mut self, _dy: u32) -> ScrollOutcome {
        self.log.borrow_mut().scrolls += 1;
        ScrollOutcome::Scrolled
    }

    async fn click_images(&mut self, _c: &str, _t: Duration, _s: Duration) -> Vec<ClickOutcome> {
        vec![ClickOutcome::Clicked, ClickOutcome::Skipped("covered".into())]
    }

    async fn save_state(&mut self) -> Result<()> {
        self.log.borrow_mut().saves += 1;
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.log.borrow_mut().closes += 1;
        Ok(())
    }
}
