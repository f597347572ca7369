//! Next-page decisions, made against the HTML snapshot of the current page.
//!
//! The paginator never touches the browser itself: it returns a [`PageStep`]
//! that the orchestrator carries out (click a control, or load a URL).

use crate::error::CrawlError;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// How a target site exposes its result pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum PaginationScheme {
    /// Pages are addressed by a query parameter (`?thisPageNum=N`). The next
    /// page is loaded directly, but only when the current page links to it.
    QueryParam { param: String },

    /// Numbered links whose `href` contains `link_pattern` with `{page}`
    /// replaced by the page number, e.g. `fn_link_page({page})`.
    ///
    /// With `block_size` set, pages that are exact multiples of it only show
    /// numbers up to the block end; those advance through `next_selector`
    /// instead. Without it, `next_selector` is tried when the numbered link
    /// is missing.
    NumberedLinks {
        link_pattern: String,
        #[serde(default)]
        next_selector: Option<String>,
        #[serde(default)]
        block_size: Option<u32>,
    },

    /// A single forward control on every page.
    NextControl { selector: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStep {
    Click { selector: String, next_page: u32 },
    Goto { url: String, next_page: u32 },
    Exhausted { reason: String },
}

impl PageStep {
    fn exhausted(reason: impl Into<String>) -> Self {
        PageStep::Exhausted {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Paginator {
    scheme: PaginationScheme,
}

impl Paginator {
    /// Validate the scheme up front so a bad selector is a configuration
    /// error rather than a silently short crawl.
    pub fn new(scheme: PaginationScheme) -> Result<Self, CrawlError> {
        match &scheme {
            PaginationScheme::QueryParam { param } => {
                if param.trim().is_empty() {
                    return Err(CrawlError::Config("empty pagination query parameter".into()));
                }
            }
            PaginationScheme::NumberedLinks {
                link_pattern,
                next_selector,
                block_size,
            } => {
                if !link_pattern.contains("{page}") {
                    return Err(CrawlError::Config(format!(
                        "link pattern '{}' has no {{page}} placeholder",
                        link_pattern
                    )));
                }
                if *block_size == Some(0) {
                    return Err(CrawlError::Config("pagination block size must be positive".into()));
                }
                if block_size.is_some() && next_selector.is_none() {
                    return Err(CrawlError::Config(
                        "block pagination needs a next_selector".into(),
                    ));
                }
                if let Some(sel) = next_selector {
                    parse_selector(sel)?;
                }
            }
            PaginationScheme::NextControl { selector } => {
                parse_selector(selector)?;
            }
        }
        Ok(Self { scheme })
    }

    pub fn scheme(&self) -> &PaginationScheme {
        &self.scheme
    }

    pub fn next_step(&self, html: &str, current_page: u32, current_url: &str) -> PageStep {
        let next_page = current_page + 1;
        let doc = Html::parse_document(html);

        match &self.scheme {
            PaginationScheme::QueryParam { param } => {
                if !links_to_page(&doc, param, next_page) {
                    return PageStep::exhausted(format!("no link to {}={}", param, next_page));
                }
                match with_query_param(current_url, param, next_page) {
                    Some(url) => PageStep::Goto { url, next_page },
                    None => PageStep::exhausted(format!("cannot build URL from {}", current_url)),
                }
            }

            PaginationScheme::NumberedLinks {
                link_pattern,
                next_selector,
                block_size,
            } => {
                let at_block_end = block_size.is_some_and(|b| current_page % b == 0);

                if !at_block_end {
                    let selector = numbered_link_selector(link_pattern, next_page);
                    if matches_any(&doc, &selector) {
                        return PageStep::Click { selector, next_page };
                    }
                    if block_size.is_some() {
                        return PageStep::exhausted(format!("no link to page {}", next_page));
                    }
                }

                match next_selector {
                    Some(sel) if matches_any(&doc, sel) => PageStep::Click {
                        selector: sel.clone(),
                        next_page,
                    },
                    _ => PageStep::exhausted(format!("no next control after page {}", current_page)),
                }
            }

            PaginationScheme::NextControl { selector } => {
                if matches_any(&doc, selector) {
                    PageStep::Click {
                        selector: selector.clone(),
                        next_page,
                    }
                } else {
                    PageStep::exhausted("next control absent")
                }
            }
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn parse_selector(s: &str) -> Result<Selector, CrawlError> {
    Selector::parse(s).map_err(|e| CrawlError::Config(format!("selector '{}': {:?}", s, e)))
}

fn matches_any(doc: &Html, selector: &str) -> bool {
    match Selector::parse(selector) {
        Ok(sel) => doc.select(&sel).next().is_some(),
        Err(e) => {
            debug!("Unparseable selector {}: {:?}", selector, e);
            false
        }
    }
}

/// `a[href*="fn_link_page(11)"]`. The closing parenthesis in typical
/// patterns keeps page 1 from matching page 10.
pub fn numbered_link_selector(link_pattern: &str, page: u32) -> String {
    let needle = link_pattern
        .replace("{page}", &page.to_string())
        .replace('\\', "\\\\")
        .replace('"', "\\\"");
    format!("a[href*=\"{}\"]", needle)
}

fn links_to_page(doc: &Html, param: &str, page: u32) -> bool {
    let Ok(re) = Regex::new(&format!(r"[?&]{}=(\d+)", regex::escape(param))) else {
        return false;
    };
    let Ok(a_sel) = Selector::parse("a[href]") else { return false };

    doc.select(&a_sel)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| re.captures(href))
        .any(|c| c[1].parse::<u32>().ok() == Some(page))
}

/// Replace (or add) one query parameter, keeping the others in order.
pub fn with_query_param(url: &str, param: &str, page: u32) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let value = page.to_string();
    match pairs.iter_mut().find(|(k, _)| k == param) {
        Some(pair) => pair.1 = value,
        None => pairs.push((param.to_string(), value)),
    }

    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    Some(parsed.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
