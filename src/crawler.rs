//! Site crawler: URL discovery plus polite concurrent fetching.
//!
//! Discovery prefers `sitemap.xml` (including nested sitemap indexes, bounded
//! depth) and falls back to a breadth-first crawl from the base URL. Fetching
//! runs under a semaphore with a per-worker politeness delay, and each fetch
//! gets bounded retries before the URL is reported as failed.
//!
//! The crawler only fetches and extracts. Diffing against the store and
//! ingestion happen downstream, so a failed fetch here never causes a
//! removal there.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::CrawlConfig;
use crate::errors::EngineError;

const SITEMAP_MAX_DEPTH: usize = 3;
const USER_AGENT: &str = concat!("askbase/", env!("CARGO_PKG_VERSION"));

/// Extracted content of one successfully fetched page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub title: String,
    pub text: String,
    /// SHA-256 of the extracted text, the version identity used by the diff.
    pub content_hash: String,
}

/// Everything one crawl pass learned about the site.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub pages: HashMap<String, FetchedPage>,
    /// URLs that failed after retries. Excluded from removal detection.
    pub failed: HashSet<String>,
}

pub struct Crawler {
    client: reqwest::Client,
    config: CrawlConfig,
    exclude: Vec<Regex>,
}

impl Crawler {
    pub fn new(config: &CrawlConfig) -> Result<Self, EngineError> {
        if config.base_url.is_empty() {
            return Err(EngineError::Config("crawl.base_url is not set".to_string()));
        }

        let exclude = config
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| EngineError::Config(format!("bad exclude pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        Ok(Self {
            client,
            config: config.clone(),
            exclude,
        })
    }

    /// Run one full crawl pass over the site.
    pub async fn crawl(self: &Arc<Self>) -> Result<CrawlOutcome, EngineError> {
        let base = normalize_url(&self.config.base_url);

        if self.config.use_sitemap {
            match self.discover_from_sitemap(&base).await {
                Ok(urls) if !urls.is_empty() => {
                    debug!(count = urls.len(), "sitemap discovery succeeded");
                    return Ok(self.fetch_all(urls).await);
                }
                Ok(_) => debug!("sitemap empty, falling back to crawl"),
                Err(e) => debug!(error = %e, "sitemap unavailable, falling back to crawl"),
            }
        }

        self.breadth_first(&base).await
    }

    fn admits(&self, url: &str) -> bool {
        same_domain(url, &self.config.base_url) && !self.exclude.iter().any(|p| p.is_match(url))
    }

    // ---- sitemap discovery ----

    async fn discover_from_sitemap(&self, base: &str) -> Result<Vec<String>, EngineError> {
        let mut urls = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([(format!("{}/sitemap.xml", base), 0usize)]);

        while let Some((sitemap_url, depth)) = queue.pop_front() {
            if depth > SITEMAP_MAX_DEPTH || !seen.insert(sitemap_url.clone()) {
                continue;
            }

            let xml = self.fetch_text(&sitemap_url).await?;
            let parsed = parse_sitemap(&xml)?;

            for nested in parsed.sitemaps {
                queue.push_back((nested, depth + 1));
            }
            for url in parsed.urls {
                let url = normalize_url(&url);
                if self.admits(&url) && urls.len() < self.config.max_pages {
                    urls.push(url);
                }
            }
        }

        urls.sort();
        urls.dedup();
        Ok(urls)
    }

    async fn fetch_text(&self, url: &str) -> Result<String, EngineError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::fetch(url, e))?;

        if !response.status().is_success() {
            return Err(EngineError::fetch(url, response.status()));
        }

        response.text().await.map_err(|e| EngineError::fetch(url, e))
    }

    // ---- parallel fetch of a known URL list ----

    async fn fetch_all(self: &Arc<Self>, urls: Vec<String>) -> CrawlOutcome {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();

        for url in urls {
            let crawler = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                tokio::time::sleep(Duration::from_millis(crawler.config.delay_ms)).await;
                let result = crawler.fetch_page(&url).await;
                (url, result)
            });
        }

        let mut outcome = CrawlOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            let Ok((url, result)) = joined else { continue };
            match result {
                Ok((page, _links)) => {
                    outcome.pages.insert(url, page);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "fetch failed");
                    outcome.failed.insert(url);
                }
            }
        }
        outcome
    }

    // ---- breadth-first fallback ----

    async fn breadth_first(self: &Arc<Self>, base: &str) -> Result<CrawlOutcome, EngineError> {
        let mut outcome = CrawlOutcome::default();
        let mut visited = HashSet::from([base.to_string()]);
        let mut frontier = vec![base.to_string()];
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        for _depth in 0..=self.config.max_depth {
            if frontier.is_empty() || outcome.pages.len() >= self.config.max_pages {
                break;
            }

            let mut tasks = JoinSet::new();
            for url in frontier.drain(..) {
                let crawler = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    tokio::time::sleep(Duration::from_millis(crawler.config.delay_ms)).await;
                    let result = crawler.fetch_page(&url).await;
                    (url, result)
                });
            }

            let mut next = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                let Ok((url, result)) = joined else { continue };
                match result {
                    Ok((page, links)) => {
                        if outcome.pages.len() < self.config.max_pages {
                            outcome.pages.insert(url, page);
                        }
                        for link in links {
                            if self.admits(&link) && visited.insert(link.clone()) {
                                next.push(link);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "fetch failed");
                        outcome.failed.insert(url);
                    }
                }
            }
            frontier = next;
        }

        Ok(outcome)
    }

    // ---- single page fetch ----

    /// Fetch and extract one page, with retries. Returns the page plus any
    /// outbound links found (HTML only).
    async fn fetch_page(&self, url: &str) -> Result<(FetchedPage, Vec<String>), EngineError> {
        let mut last_err = None;

        for attempt in 0..=self.config.fetch_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
            }
            match self.fetch_page_once(url).await {
                Ok(result) => return Ok(result),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| EngineError::fetch(url, "unreachable")))
    }

    async fn fetch_page_once(&self, url: &str) -> Result<(FetchedPage, Vec<String>), EngineError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::fetch(url, e))?;

        if !response.status().is_success() {
            return Err(EngineError::fetch(url, response.status()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| EngineError::fetch(url, e))?;

        let is_pdf = content_type.contains("pdf") || url.to_lowercase().ends_with(".pdf");
        if is_pdf {
            if !self.config.ingest_pdfs {
                return Err(EngineError::fetch(url, "pdf ingestion disabled"));
            }
            let text = pdf_extract::extract_text_from_mem(&body)
                .map_err(|e| EngineError::fetch(url, e))?;
            let page = FetchedPage {
                title: title_from_url(url),
                text: text.trim().to_string(),
                content_hash: hash_text(text.trim()),
            };
            return Ok((page, Vec::new()));
        }

        let html = String::from_utf8_lossy(&body);
        let text = html2text::from_read(html.as_bytes(), 120)
            .unwrap_or_else(|_| html.to_string())
            .trim()
            .to_string();
        let title = extract_title(&html).unwrap_or_else(|| title_from_url(url));
        let links = extract_links(&html, url);

        let page = FetchedPage {
            content_hash: hash_text(&text),
            title,
            text,
        };
        Ok((page, links))
    }
}

pub fn hash_text(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

// ============ URL handling ============

/// Canonical form used as the source key: drop fragment and query, drop a
/// trailing slash (except on the bare origin).
pub fn normalize_url(url: &str) -> String {
    let url = url.split(['#', '?']).next().unwrap_or(url);
    url.trim_end_matches('/').to_string()
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split("://").nth(1)?;
    let host = rest.split('/').next()?;
    Some(host.strip_prefix("www.").unwrap_or(host))
}

/// Same registrable host, ignoring a `www.` prefix.
pub fn same_domain(url: &str, base: &str) -> bool {
    match (host_of(url), host_of(base)) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// Resolve an href against the page it appeared on. Handles absolute URLs,
/// scheme-relative, root-relative, and simple relative paths.
pub fn resolve_link(href: &str, page_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("javascript:")
    {
        return None;
    }

    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(normalize_url(href));
    }

    let scheme = page_url.split("://").next()?;
    if let Some(rest) = href.strip_prefix("//") {
        return Some(normalize_url(&format!("{}://{}", scheme, rest)));
    }

    let host = host_of(page_url)?;
    let origin = format!("{}://{}", scheme, host);
    if href.starts_with('/') {
        return Some(normalize_url(&format!("{}{}", origin, href)));
    }

    // Relative to the page's directory
    let base = normalize_url(page_url);
    let dir = match base.rfind('/') {
        Some(idx) if idx > base.find("://").map(|i| i + 2).unwrap_or(0) => &base[..idx],
        _ => base.as_str(),
    };
    Some(normalize_url(&format!("{}/{}", dir, href)))
}

// ============ HTML extraction ============

fn title_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("builtin pattern"))
}

fn href_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<a\s[^>]*href\s*=\s*["']([^"']+)["']"#).expect("builtin pattern"))
}

pub fn extract_title(html: &str) -> Option<String> {
    let captured = title_regex().captures(html)?;
    let title = captured.get(1)?.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

pub fn extract_links(html: &str, page_url: &str) -> Vec<String> {
    let mut links: Vec<String> = href_regex()
        .captures_iter(html)
        .filter_map(|c| resolve_link(c.get(1)?.as_str(), page_url))
        .collect();
    links.sort();
    links.dedup();
    links
}

fn title_from_url(url: &str) -> String {
    normalize_url(url)
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("(untitled)")
        .to_string()
}

// ============ Sitemap parsing ============

pub struct ParsedSitemap {
    pub urls: Vec<String>,
    pub sitemaps: Vec<String>,
}

/// Parse a sitemap or sitemap-index document. `<loc>` entries under
/// `<sitemap>` are nested indexes; the rest are page URLs.
pub fn parse_sitemap(xml: &str) -> Result<ParsedSitemap, EngineError> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut urls = Vec::new();
    let mut sitemaps = Vec::new();
    let mut in_sitemap_entry = false;
    let mut in_loc = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"sitemap" => in_sitemap_entry = true,
                b"loc" => in_loc = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"sitemap" => in_sitemap_entry = false,
                b"loc" => in_loc = false,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_loc => {
                let loc = t.unescape().unwrap_or_default().trim().to_string();
                if loc.is_empty() {
                    continue;
                }
                if in_sitemap_entry {
                    sitemaps.push(loc);
                } else {
                    urls.push(loc);
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(EngineError::fetch("sitemap", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(ParsedSitemap { urls, sitemaps })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://a.test/parks/?view=list#hours"),
            "https://a.test/parks"
        );
        assert_eq!(normalize_url("https://a.test/"), "https://a.test");
        assert_eq!(normalize_url("https://a.test/x/y"), "https://a.test/x/y");
    }

    #[test]
    fn test_same_domain_ignores_www() {
        assert!(same_domain("https://www.a.test/x", "https://a.test"));
        assert!(same_domain("https://a.test/x", "https://www.a.test"));
        assert!(!same_domain("https://b.test/x", "https://a.test"));
    }

    #[test]
    fn test_resolve_link_variants() {
        let page = "https://a.test/parks/pools";
        assert_eq!(
            resolve_link("/taxes", page).unwrap(),
            "https://a.test/taxes"
        );
        assert_eq!(
            resolve_link("hours.html", page).unwrap(),
            "https://a.test/parks/hours.html"
        );
        assert_eq!(
            resolve_link("https://b.test/x", page).unwrap(),
            "https://b.test/x"
        );
        assert_eq!(
            resolve_link("//a.test/y", page).unwrap(),
            "https://a.test/y"
        );
        assert!(resolve_link("#section", page).is_none());
        assert!(resolve_link("mailto:x@a.test", page).is_none());
    }

    #[test]
    fn test_extract_title() {
        let html = "<html><head><title>\n  Pool   Hours \n</title></head></html>";
        assert_eq!(extract_title(html).unwrap(), "Pool Hours");
        assert!(extract_title("<html><body>no title</body></html>").is_none());
    }

    #[test]
    fn test_extract_links_resolved_and_deduped() {
        let html = r#"<a href="/a">A</a> <a href='/b'>B</a> <a href="/a">again</a>"#;
        let links = extract_links(html, "https://a.test/page");
        assert_eq!(links, vec!["https://a.test/a", "https://a.test/b"]);
    }

    #[test]
    fn test_parse_plain_sitemap() {
        let xml = r#"<?xml version="1.0"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>https://a.test/parks</loc></url>
              <url><loc>https://a.test/taxes</loc></url>
            </urlset>"#;
        let parsed = parse_sitemap(xml).unwrap();
        assert_eq!(parsed.urls.len(), 2);
        assert!(parsed.sitemaps.is_empty());
    }

    #[test]
    fn test_parse_sitemap_index() {
        let xml = r#"<sitemapindex>
              <sitemap><loc>https://a.test/sitemap-pages.xml</loc></sitemap>
              <sitemap><loc>https://a.test/sitemap-news.xml</loc></sitemap>
            </sitemapindex>"#;
        let parsed = parse_sitemap(xml).unwrap();
        assert!(parsed.urls.is_empty());
        assert_eq!(parsed.sitemaps.len(), 2);
    }

    #[test]
    fn test_hash_text_is_stable() {
        assert_eq!(hash_text("abc"), hash_text("abc"));
        assert_ne!(hash_text("abc"), hash_text("abd"));
    }
}
