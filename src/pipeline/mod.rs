//! Crawl run orchestrator: browser → extractor ⇄ paginator → persistence.
//!
//! ## Run states
//!
//! `Idle → Navigating → (Extracting ⇄ Paginating) → Persisting → Done`, and
//! `Failed` from anywhere before `Persisting`.
//!
//!   1. Acquire one page from the launcher, open the site's start URL and
//!      wait `settle_ms` for rendering. Sites with a search form then get it
//!      filled and submitted, followed by `results_settle_ms`.
//!   2. Extract the current page and append to the run accumulator. Stop on a
//!      page with no rows, when the paginator finds no next page, or at the
//!      site's page ceiling. Otherwise move on and wait `page_delay_ms`.
//!   3. Replace the kind's table with the accumulated set. A storage failure
//!      parks the set in the fallback cache; the run still succeeds.
//!
//! The page is always released, whatever the outcome. A navigation failure
//! part-way through discards the pages already read.

use crate::browser::{BrowserLauncher, PageDriver, navigator};
use crate::config::{AppConfig, SiteConfig};
use crate::error::CrawlError;
use crate::models::{RecordKind, RecordSet};
use crate::scraper::{
    self,
    paginator::{PageStep, Paginator},
};
use crate::storage::gateway::PersistenceGateway;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Navigating,
    Extracting { page: u32 },
    Paginating { page: u32 },
    Persisting,
    Done,
    Failed,
}

struct RunTracker {
    kind: RecordKind,
    state: RunState,
}

impl RunTracker {
    fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            state: RunState::Idle,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!("[{}] {:?} → {:?}", self.kind, self.state, next);
        self.state = next;
    }
}

#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub records: RecordSet,
    /// False when the records only made it into the fallback cache.
    pub persisted: bool,
    pub pages_visited: u32,
}

/// One crawl at a time per record kind.
#[derive(Default)]
struct RunLocks {
    companies: Mutex<()>,
    assessments: Mutex<()>,
}

impl RunLocks {
    fn get(&self, kind: RecordKind) -> &Mutex<()> {
        match kind {
            RecordKind::Companies => &self.companies,
            RecordKind::Assessments => &self.assessments,
        }
    }
}

pub struct Pipeline {
    config: AppConfig,
    launcher: Arc<dyn BrowserLauncher>,
    gateway: PersistenceGateway,
    locks: RunLocks,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        launcher: Arc<dyn BrowserLauncher>,
        gateway: PersistenceGateway,
    ) -> Self {
        Self {
            config,
            launcher,
            gateway,
            locks: RunLocks::default(),
        }
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn crawl(&self, kind: RecordKind) -> Result<CrawlReport, CrawlError> {
        let _guard = self
            .locks
            .get(kind)
            .try_lock()
            .map_err(|_| CrawlError::RunInProgress(kind))?;

        let site = self.config.site(kind);
        let paginator = Paginator::new(site.pagination.clone())?;
        let mut tracker = RunTracker::new(kind);

        let store = self.gateway.store();
        let run_id = match store.begin_run(kind) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("Run log unavailable: {}", e);
                None
            }
        };

        info!("=== Crawling {} from {} ===", kind, site.start_url);
        tracker.advance(RunState::Navigating);

        let crawled = match self.launcher.launch().await {
            Ok(mut page) => {
                let result = self
                    .crawl_pages(page.as_mut(), kind, site, &paginator, &mut tracker)
                    .await;
                page.close().await;
                result
            }
            Err(e) => Err(e),
        };

        let (records, pages_visited) = match crawled {
            Ok(done) => done,
            Err(e) => {
                tracker.advance(RunState::Failed);
                error!("{} crawl failed: {}", kind, e);
                if let Some(id) = run_id {
                    store.finish_run(id, 0, 0, false, Some(&e.to_string())).ok();
                }
                return Err(e);
            }
        };

        tracker.advance(RunState::Persisting);
        let outcome = self.gateway.replace_all(&records);

        if let Some(id) = run_id {
            store
                .finish_run(id, pages_visited, records.len(), outcome.persisted, None)
                .ok();
        }
        tracker.advance(RunState::Done);

        info!(
            "=== Done: {} {} records from {} pages (persisted: {}) ===",
            records.len(),
            kind,
            pages_visited,
            outcome.persisted
        );

        Ok(CrawlReport {
            records,
            persisted: outcome.persisted,
            pages_visited,
        })
    }

    async fn crawl_pages(
        &self,
        page: &mut dyn PageDriver,
        kind: RecordKind,
        site: &SiteConfig,
        paginator: &Paginator,
        tracker: &mut RunTracker,
    ) -> Result<(RecordSet, u32), CrawlError> {
        let timeout = Duration::from_secs(self.config.browser.timeout_secs);

        navigator::open(page, &site.start_url, timeout).await?;
        settle(site.settle_ms).await;

        if let Some(search) = &site.search {
            let today = Local::now().date_naive();
            let filled = navigator::fill_search_form(page, &search.fields, today).await?;
            debug!("{} of {} search fields set", filled, search.fields.len());
            if navigator::submit_search(page, &search.submit).await.is_some() {
                page.wait_for_navigation(timeout).await;
            }
            settle(search.results_settle_ms).await;
        }

        let mut records = RecordSet::empty(kind);
        let mut current = 1u32;
        let mut visited = 0u32;

        loop {
            tracker.advance(RunState::Extracting { page: current });
            let html = page.content().await?;
            visited += 1;

            let batch = scraper::parse_page(kind, &html, current);
            if batch.is_empty() {
                info!("Page {}: no rows, stopping", current);
                break;
            }
            info!("Page {}: {} records", current, batch.len());
            records.append(batch);

            if current >= site.max_pages {
                info!("Reached page ceiling ({})", site.max_pages);
                break;
            }

            tracker.advance(RunState::Paginating { page: current });
            let url = page.current_url().await?;
            match paginator.next_step(&html, current, &url) {
                PageStep::Exhausted { reason } => {
                    info!("Pagination ended after page {}: {}", current, reason);
                    break;
                }
                PageStep::Click { selector, next_page } => {
                    debug!("Clicking {} for page {}", selector, next_page);
                    page.click(&selector).await?;
                    page.wait_for_navigation(timeout).await;
                    current = next_page;
                }
                PageStep::Goto { url, next_page } => {
                    page.goto(&url, timeout).await?;
                    current = next_page;
                }
            }

            settle(site.page_delay_ms).await;
        }

        Ok((records, visited))
    }
}

async fn settle(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
