//! Web source: URL normalisation, reachability probe, and a bounded crawl.
//!
//! The crawl is breadth-first from the root page, follows only links that
//! stay under the root URL, and stops descending at `max_depth` (the root
//! page is depth 0, so `max_depth = 2` loads the root and its direct
//! children). XML documents such as feeds and sitemaps are skipped.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::WebConfig;
use crate::error::{GatewayError, IndexError};
use crate::gateway::{self, RetryPolicy};
use crate::models::SourceDocument;

const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Turn user input into an absolute http(s) URL.
///
/// Input without a scheme that looks like a host (`example.com/docs`) gets
/// `https://`; any scheme other than http or https is replaced by https.
pub fn normalize_url(input: &str) -> Result<Url, IndexError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(IndexError::InvalidUrl("Empty URL".to_string()));
    }

    let candidate = match input.split_once("://") {
        Some((scheme, rest)) if scheme == "http" || scheme == "https" => {
            format!("{}://{}", scheme, rest)
        }
        Some((_, rest)) => format!("https://{}", rest),
        None if input.contains('.') && !input.contains(' ') => format!("https://{}", input),
        None => input.to_string(),
    };

    let url = Url::parse(&candidate)
        .map_err(|_| IndexError::InvalidUrl(format!("Invalid URL: missing net location in {}", input)))?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(IndexError::InvalidUrl(format!(
            "Invalid URL: missing net location in {}",
            input
        ))),
    }
}

/// Visible text of an HTML page, one block per text node.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut blocks = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if hidden {
            continue;
        }
        let cleaned = clean_text(text);
        if !cleaned.is_empty() {
            blocks.push(cleaned);
        }
    }
    blocks.join("\n\n")
}

/// Absolute http(s) links found in `html`, fragments removed.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
        {
            continue;
        }
        if let Ok(mut url) = base.join(href) {
            if url.scheme() == "http" || url.scheme() == "https" {
                url.set_fragment(None);
                links.push(url);
            }
        }
    }
    links
}

fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let title = document.select(&selector).next()?.text().collect::<String>();
    let title = clean_text(&title);
    (!title.is_empty()).then_some(title)
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_xml(content_type: &str, body: &str) -> bool {
    (content_type.contains("xml") && !content_type.contains("html"))
        || body.trim_start().starts_with("<?xml")
}

pub struct WebCrawler {
    http: reqwest::Client,
    policy: RetryPolicy,
    timeout: Duration,
    exclude: Vec<String>,
}

impl WebCrawler {
    pub fn new(config: &WebConfig, policy: RetryPolicy) -> Result<Self, IndexError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("desk-assist/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(GatewayError::from)?;
        Ok(Self {
            http,
            policy,
            timeout: Duration::from_secs(config.timeout_secs),
            exclude: config.exclude.clone(),
        })
    }

    /// Succeeds when the page answers with a status below 400.
    pub async fn probe(&self, url: &Url) -> Result<(), IndexError> {
        let response = self
            .http
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|_| IndexError::Unreachable(url.to_string()))?;
        if response.status().as_u16() >= 400 {
            return Err(IndexError::Unreachable(url.to_string()));
        }
        Ok(())
    }

    async fn fetch_page(&self, url: &Url) -> Result<(String, String), GatewayError> {
        gateway::invoke(&self.policy, "fetch page", |_| async move {
            let response = self.http.get(url.clone()).timeout(self.timeout).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(gateway::classify_status(status, &body));
            }
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_ascii_lowercase();
            Ok((content_type, response.text().await?))
        })
        .await
    }

    /// Load every page reachable from `root` within `max_depth`.
    pub async fn crawl(&self, root: &Url, max_depth: usize) -> Result<Vec<SourceDocument>, IndexError> {
        let mut queue = VecDeque::new();
        let mut seen = HashSet::new();
        if max_depth > 0 {
            seen.insert(root.to_string());
            queue.push_back((root.clone(), 0usize));
        }

        let mut documents = Vec::new();
        while let Some((url, depth)) = queue.pop_front() {
            let (content_type, body) = match self.fetch_page(&url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(url = %url, error = %e, "skipping page");
                    continue;
                }
            };
            if is_xml(&content_type, &body) {
                debug!(url = %url, "skipping XML document");
                continue;
            }

            if depth + 1 < max_depth {
                for link in extract_links(&body, &url) {
                    if link.as_str().starts_with(root.as_str()) && seen.insert(link.to_string()) {
                        queue.push_back((link, depth + 1));
                    }
                }
            }

            let text = extract_text(&body);
            if text.is_empty() {
                continue;
            }
            let metadata = serde_json::json!({
                "kind": "web",
                "title": page_title(&body),
                "depth": depth,
            });
            documents.push(SourceDocument {
                source: url.to_string(),
                text,
                metadata_json: metadata.to_string(),
            });
        }

        let loaded = documents.len();
        documents.retain(|doc| !self.exclude.iter().any(|x| doc.source.contains(x.as_str())));
        debug!(loaded, kept = documents.len(), "crawl finished");

        if documents.is_empty() {
            return Err(IndexError::NoPages);
        }
        Ok(documents)
    }
}
