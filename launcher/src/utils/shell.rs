// Hand a URL to the OS default browser handler.

use anyhow::{Context, Result};
use log::info;
use url::Url;

/// Only absolute http(s) URLs are handed to the browser.
fn browser_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => anyhow::bail!("Refusing to open {} URL: {}", other, url),
    }
}

/// Open `url` without waiting for the browser to exit.
pub fn open_url(url: &str) -> Result<()> {
    let parsed = browser_url(url)?;
    info!("[PHASE: shell] [STEP: open_url] Opening {}", parsed);
    open::that_detached(parsed.as_str())
        .with_context(|| format!("Failed to open {} in the default browser", parsed))
}
