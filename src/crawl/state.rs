//! Session state blob: the cookie jar, stored as JSON between runs.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

fn root_path() -> String {
    "/".to_string()
}

impl StoredCookie {
    /// `Set-Cookie` style line for seeding an HTTP cookie jar.
    pub fn to_header(&self) -> String {
        let mut s = format!("{}={}; Domain={}; Path={}", self.name, self.value, self.domain, self.path);
        if self.secure {
            s.push_str("; Secure");
        }
        if self.http_only {
            s.push_str("; HttpOnly");
        }
        s
    }
}

/// Missing or unreadable state is an empty jar.
pub fn load(path: &Path) -> Vec<StoredCookie> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_str(&raw) {
        Ok(cookies) => cookies,
        Err(e) => {
            warn!("Ignoring unreadable session state {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

pub fn save(path: &Path, cookies: &[StoredCookie]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cookies)?;
    std::fs::write(path, json).with_context(|| format!("writing session state {}", path.display()))?;
    debug!("Saved {} cookies to {}", cookies.len(), path.display());
    Ok(())
}
