//! Opening pages and driving the sites' search forms.

use super::PageDriver;
use crate::error::CrawlError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One search-form input to set before submitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub selector: String,
    /// `{today}` is replaced with the crawl date (`YYYY-MM-DD`).
    pub value: String,
    /// Fire a bubbling `change` event so the site's date pickers and
    /// validators notice the new value.
    #[serde(default)]
    pub dispatch_change: bool,
}

/// Ways to submit a search form, tried in the configured order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SubmitStrategy {
    ClickSelector { selector: String },
    ClickLinkText { text: String },
    SubmitForm {
        #[serde(default = "default_form_selector")]
        selector: String,
    },
    PressEnter { selector: String },
}

fn default_form_selector() -> String {
    "form".to_string()
}

impl SubmitStrategy {
    async fn attempt(&self, page: &mut dyn PageDriver) -> Result<(), CrawlError> {
        match self {
            SubmitStrategy::ClickSelector { selector } => page.click(selector).await,
            SubmitStrategy::ClickLinkText { text } => {
                let script = format!(
                    r#"(() => {{
                        const wanted = {text};
                        const link = Array.from(document.querySelectorAll('a'))
                            .find(a => (a.textContent || '').trim() === wanted);
                        if (!link) return false;
                        link.click();
                        return true;
                    }})()"#,
                    text = js_string(text)
                );
                expect_true(page.evaluate(&script).await?, || {
                    format!("no link with text '{}'", text)
                })
            }
            SubmitStrategy::SubmitForm { selector } => {
                let script = format!(
                    r#"(() => {{
                        const form = document.querySelector({sel});
                        if (!form) return false;
                        form.submit();
                        return true;
                    }})()"#,
                    sel = js_string(selector)
                );
                expect_true(page.evaluate(&script).await?, || {
                    format!("no form matching {}", selector)
                })
            }
            SubmitStrategy::PressEnter { selector } => page.press_key(selector, "Enter").await,
        }
    }
}

fn expect_true(
    value: serde_json::Value,
    describe: impl FnOnce() -> String,
) -> Result<(), CrawlError> {
    if value.as_bool() == Some(true) {
        Ok(())
    } else {
        Err(CrawlError::Browser(describe()))
    }
}

/// Quote a value as a JavaScript string literal.
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

pub fn resolve_value(value: &str, today: NaiveDate) -> String {
    value.replace("{today}", &today.format("%Y-%m-%d").to_string())
}

// ── Operations ────────────────────────────────────────────────────────────────

pub async fn open(page: &mut dyn PageDriver, url: &str, timeout: Duration) -> Result<(), CrawlError> {
    info!("Opening {}", url);
    page.goto(url, timeout).await
}

/// Set every field present on the page. Missing fields are skipped; the
/// number of fields actually set is returned.
pub async fn fill_search_form(
    page: &mut dyn PageDriver,
    fields: &[FormField],
    today: NaiveDate,
) -> Result<usize, CrawlError> {
    let mut filled = 0;

    for field in fields {
        let value = resolve_value(&field.value, today);
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.value = {val};
                if ({dispatch}) el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            sel = js_string(&field.selector),
            val = js_string(&value),
            dispatch = field.dispatch_change,
        );

        if page.evaluate(&script).await?.as_bool() == Some(true) {
            debug!("Set {} = {}", field.selector, value);
            filled += 1;
        } else {
            debug!("Search field {} not on page", field.selector);
        }
    }

    Ok(filled)
}

/// Try each strategy until one goes through. Returns the index of the
/// strategy that worked, or `None` when all failed; the caller carries on
/// with whatever the page already shows.
pub async fn submit_search(page: &mut dyn PageDriver, strategies: &[SubmitStrategy]) -> Option<usize> {
    for (i, strategy) in strategies.iter().enumerate() {
        match strategy.attempt(page).await {
            Ok(()) => {
                info!("Search submitted via {:?}", strategy);
                return Some(i);
            }
            Err(e) => debug!("Submit strategy {:?} failed: {}", strategy, e),
        }
    }

    warn!("All {} submit strategies failed; using default results", strategies.len());
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────
