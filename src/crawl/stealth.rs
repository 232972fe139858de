//! Fingerprint patches and launch flags for automated browser sessions.

/// Installed before any page script runs.
pub const STEALTH_JS: &str = r#"(() => {
  Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
  const query = navigator.permissions && navigator.permissions.query;
  if (query) {
    navigator.permissions.query = (p) => p.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : query.call(navigator.permissions, p);
  }
  Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
  Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4] });
  Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 8 });
  const getParameter = WebGLRenderingContext.prototype.getParameter;
  WebGLRenderingContext.prototype.getParameter = function (p) {
    if (p === 37445) return 'Intel Inc.';
    if (p === 37446) return 'Intel Iris OpenGL Engine';
    return getParameter.call(this, p);
  };
  window.chrome = { runtime: {} };
})();"#;

pub const LAUNCH_ARGS: &[&str] = &["--no-sandbox", "--disable-blink-features=AutomationControlled", "--lang=en-US"];

pub const WINDOW: (u32, u32) = (1400, 900);
pub const TIMEZONE: &str = "Asia/Jakarta";
pub const LOCALE: &str = "en-US";

/// Desktop Chrome UA used by the plain HTTP engine.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_set_is_self_invoking() {
        assert!(STEALTH_JS.starts_with("(() => {"));
        assert!(STEALTH_JS.trim_end().ends_with("})();"));
        for needle in ["webdriver", "languages", "plugins", "hardwareConcurrency", "37445", "37446", "window.chrome", "notifications"] {
            assert!(STEALTH_JS.contains(needle), "missing {needle}");
        }
    }
}
