// Page-scraping bootstrapper: resolves the run-scoped context from a landing
// page and the script assets it references.

use crate::errors::CollaboratorError;
use crate::workflow::{Bootstrapper, RuntimeContext};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

/// Plain GET of a page or asset body
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, CollaboratorError>;
}

static SITE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"sitekey":"(0x4[a-zA-Z0-9_-]+)""#).expect("static regex"));
static ROUTER_STATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"next-router-state-tree":"([^"]+)""#).expect("static regex"));
static ACTION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"7f[a-fA-F0-9]{40}").expect("static regex"));
static SCRIPT_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<script\b[^>]*\bsrc="([^"]+)""#).expect("static regex"));

/// What to look for and where
#[derive(Debug, Clone)]
pub struct ScrapeRules {
    pub landing_url: String,
    /// First capture group is the site key
    pub site_key: Regex,
    /// First capture group is the router state token
    pub router_state: Regex,
    /// Whole match is the action id
    pub action_id: Regex,
    /// Only script paths containing this are fetched
    pub script_filter: String,
    pub default_site_key: String,
    pub default_router_state: String,
}

impl ScrapeRules {
    pub fn new(landing_url: impl Into<String>) -> Self {
        Self {
            landing_url: landing_url.into(),
            site_key: SITE_KEY.clone(),
            router_state: ROUTER_STATE.clone(),
            action_id: ACTION_ID.clone(),
            script_filter: "_next/static".to_string(),
            default_site_key: "0x4AAAAAAAhr9JGVDZbrZOo0".to_string(),
            default_router_state: String::new(),
        }
    }
}

pub struct PageScraper<F: PageFetcher> {
    fetcher: F,
    rules: ScrapeRules,
}

impl<F: PageFetcher> PageScraper<F> {
    pub fn new(fetcher: F, rules: ScrapeRules) -> Self {
        Self { fetcher, rules }
    }

    fn capture(pattern: &Regex, text: &str) -> Option<String> {
        pattern
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn script_urls(&self, html: &str) -> Vec<String> {
        SCRIPT_SRC
            .captures_iter(html)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|src| src.contains(&self.rules.script_filter))
            .map(|src| resolve_asset_url(&self.rules.landing_url, src))
            .collect()
    }
}

#[async_trait]
impl<F: PageFetcher> Bootstrapper for PageScraper<F> {
    async fn resolve(&self) -> Result<RuntimeContext, CollaboratorError> {
        let html = self.fetcher.fetch(&self.rules.landing_url).await?;

        let challenge_site_key = Self::capture(&self.rules.site_key, &html)
            .unwrap_or_else(|| self.rules.default_site_key.clone());
        let router_state_token = Self::capture(&self.rules.router_state, &html)
            .unwrap_or_else(|| self.rules.default_router_state.clone());

        let scripts = self.script_urls(&html);
        debug!(count = scripts.len(), "script assets to scan");

        let mut action_id = None;
        for url in &scripts {
            match self.fetcher.fetch(url).await {
                Ok(body) => {
                    if let Some(hit) = self.rules.action_id.find(&body) {
                        action_id = Some(hit.as_str().to_string());
                        break;
                    }
                }
                Err(e) => debug!(url = %url, error = %e, "script asset fetch failed"),
            }
        }

        let action_id = action_id.ok_or_else(|| {
            CollaboratorError::Parse(format!("action id not found in {} script assets", scripts.len()))
        })?;
        info!(scripts = scripts.len(), "bootstrap context scraped");

        Ok(RuntimeContext {
            challenge_site_key,
            action_id,
            router_state_token,
        })
    }
}

/// Joins a script `src` against the page it came from
pub fn resolve_asset_url(base: &str, src: &str) -> String {
    if src.starts_with("http://") || src.starts_with("https://") {
        return src.to_string();
    }

    let (scheme, rest) = base.split_once("://").unwrap_or(("https", base));
    if let Some(host_relative) = src.strip_prefix("//") {
        return format!("{scheme}://{host_relative}");
    }

    let origin_end = rest.find('/').unwrap_or(rest.len());
    let origin = format!("{scheme}://{}", &rest[..origin_end]);
    if src.starts_with('/') {
        return format!("{origin}{src}");
    }

    // relative to the base page's directory
    let path = rest[origin_end..]
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let dir = match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "/",
    };
    format!("{origin}{dir}{src}")
}
