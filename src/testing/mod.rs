//! In-process stand-ins for the browser and the durable store.

use crate::browser::{BrowserLauncher, PageDriver};
use crate::error::{CrawlError, StorageError};
use crate::models::{AssessmentStats, RecordKind, RecordSet};
use crate::storage::gateway::{DuckDbStore, RecordStore};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── Scripted page ─────────────────────────────────────────────────────────────

/// Page whose script results and clickable selectors are set by the test.
#[derive(Default)]
pub struct ScriptedPage {
    pub clickable: HashSet<String>,
    pub clicks: Vec<String>,
    /// Popped per `evaluate` call; `null` once empty.
    pub script_results: VecDeque<serde_json::Value>,
    pub scripts: Vec<String>,
    pub visited: Vec<String>,
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<(), CrawlError> {
        self.visited.push(url.to_string());
        Ok(())
    }

    async fn content(&mut self) -> Result<String, CrawlError> {
        Ok(String::new())
    }

    async fn current_url(&mut self) -> Result<String, CrawlError> {
        Ok(self.visited.last().cloned().unwrap_or_else(|| "about:blank".into()))
    }

    async fn click(&mut self, selector: &str) -> Result<(), CrawlError> {
        if !self.clickable.contains(selector) {
            return Err(CrawlError::Browser(format!("no element {}", selector)));
        }
        self.clicks.push(selector.to_string());
        Ok(())
    }

    async fn press_key(&mut self, selector: &str, _key: &str) -> Result<(), CrawlError> {
        if self.clickable.contains(selector) {
            Ok(())
        } else {
            Err(CrawlError::Browser(format!("no element {}", selector)))
        }
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, CrawlError> {
        self.scripts.push(script.to_string());
        Ok(self.script_results.pop_front().unwrap_or(serde_json::Value::Null))
    }

    async fn wait_for_navigation(&mut self, _timeout: Duration) {}

    async fn close(&mut self) {}
}

// ── Static multi-page site ────────────────────────────────────────────────────

pub const FIXTURE_BASE: &str = "https://fixture.test/list";

/// Result pages keyed by page number. Page N lives at
/// `FIXTURE_BASE?code=x&thisPageNum=N`; unknown pages render empty.
#[derive(Default)]
pub struct FixtureSite {
    pages: BTreeMap<u32, String>,
    /// Any load of this page fails as a navigation timeout.
    pub broken_page: Option<u32>,
}

impl FixtureSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, n: u32, html: impl Into<String>) -> Self {
        self.pages.insert(n, html.into());
        self
    }

    pub fn broken_at(mut self, n: u32) -> Self {
        self.broken_page = Some(n);
        self
    }

    pub fn url_for(page: u32) -> String {
        format!("{}?code=x&thisPageNum={}", FIXTURE_BASE, page)
    }
}

#[derive(Debug, Default)]
pub struct FixtureLog {
    pub launches: usize,
    pub closes: usize,
    pub visited: Vec<u32>,
    opened_at: Option<Instant>,
    /// Time from the first page load to the first script run.
    pub first_script_delay: Option<Duration>,
}

pub struct FixturePage {
    site: Arc<FixtureSite>,
    log: Arc<Mutex<FixtureLog>>,
    current: u32,
}

impl FixturePage {
    fn enter(&mut self, page: u32, url: &str) -> Result<(), CrawlError> {
        if self.site.broken_page == Some(page) {
            return Err(CrawlError::navigation(url, "timed out"));
        }
        self.current = page;
        let mut log = self.log.lock().unwrap();
        log.opened_at.get_or_insert_with(Instant::now);
        log.visited.push(page);
        Ok(())
    }
}

fn last_number(s: &str) -> Option<u32> {
    let re = Regex::new(r"(\d+)\D*$").unwrap();
    re.captures(s)?.get(1)?.as_str().parse().ok()
}

#[async_trait]
impl PageDriver for FixturePage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<(), CrawlError> {
        let re = Regex::new(r"thisPageNum=(\d+)").unwrap();
        let page = re
            .captures(url)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(1);
        self.enter(page, url)
    }

    async fn content(&mut self) -> Result<String, CrawlError> {
        Ok(self.site.pages.get(&self.current).cloned().unwrap_or_default())
    }

    async fn current_url(&mut self) -> Result<String, CrawlError> {
        Ok(FixtureSite::url_for(self.current))
    }

    async fn click(&mut self, selector: &str) -> Result<(), CrawlError> {
        let html = self.content().await?;
        let target = {
            let doc = Html::parse_document(&html);
            let sel = Selector::parse(selector)
                .map_err(|e| CrawlError::Browser(format!("{:?}", e)))?;
            doc.select(&sel)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(last_number)
        };
        match target {
            Some(page) => self.enter(page, &FixtureSite::url_for(page)),
            None => Err(CrawlError::Browser(format!("nothing to click at {}", selector))),
        }
    }

    async fn press_key(&mut self, _selector: &str, _key: &str) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn evaluate(&mut self, _script: &str) -> Result<serde_json::Value, CrawlError> {
        let mut log = self.log.lock().unwrap();
        if log.first_script_delay.is_none() {
            log.first_script_delay = log.opened_at.map(|t| t.elapsed());
        }
        Ok(serde_json::Value::Bool(true))
    }

    async fn wait_for_navigation(&mut self, _timeout: Duration) {}

    async fn close(&mut self) {
        self.log.lock().unwrap().closes += 1;
    }
}

pub struct FixtureLauncher {
    site: Arc<FixtureSite>,
    pub log: Arc<Mutex<FixtureLog>>,
    pub fail_launch: bool,
}

impl FixtureLauncher {
    pub fn new(site: FixtureSite) -> Self {
        Self {
            site: Arc::new(site),
            log: Arc::new(Mutex::new(FixtureLog::default())),
            fail_launch: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_launch: true,
            ..Self::new(FixtureSite::new())
        }
    }

    pub fn visited(&self) -> Vec<u32> {
        self.log.lock().unwrap().visited.clone()
    }

    pub fn first_script_delay(&self) -> Option<Duration> {
        self.log.lock().unwrap().first_script_delay
    }

    pub fn launches(&self) -> usize {
        self.log.lock().unwrap().launches
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }
}

#[async_trait]
impl BrowserLauncher for FixtureLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, CrawlError> {
        if self.fail_launch {
            return Err(CrawlError::Launch("no chrome in test".into()));
        }
        self.log.lock().unwrap().launches += 1;
        Ok(Box::new(FixturePage {
            site: Arc::clone(&self.site),
            log: Arc::clone(&self.log),
            current: 0,
        }))
    }
}

// ── Page builders ─────────────────────────────────────────────────────────────

/// Company result page: a header row, rows `first_seq..first_seq+count`,
/// and `thisPageNum` links to `links`.
pub fn company_page(first_seq: u32, count: u32, links: &[u32]) -> String {
    let mut rows = String::from(
        "<tr><td>번호</td><td>회사명</td><td>대표자</td><td>등록지</td><td>부서전화</td></tr>",
    );
    for seq in first_seq..first_seq + count {
        rows.push_str(&format!(
            "<tr><td>{seq}</td><td><a href=\"#\" onclick=\"sendPage_('v', '{id}', '1')\">회사{seq}</a></td>\
             <td>대표{seq}</td><td>서울 {seq}번지</td><td>02-000-{seq:04}</td></tr>",
            seq = seq,
            id = 400 + seq,
        ));
    }
    let nav: String = links
        .iter()
        .map(|n| format!("<a href=\"?code=x&thisPageNum={n}\">{n}</a> ", n = n))
        .collect();
    format!(
        "<html><body><table class=\"list\">{}</table><div class=\"paging\">{}</div></body></html>",
        rows, nav
    )
}

/// Assessment result page `page` with one data row whose sequence number is
/// the page number, numbered links to `links`, and optionally the block
/// "다음" control pointing at `next_block`.
pub fn assessment_page(page: u32, links: &[u32], next_block: Option<u32>) -> String {
    let mut nav: String = links
        .iter()
        .map(|n| format!("<a href=\"javascript:fn_link_page({n});\">{n}</a> ", n = n))
        .collect();
    if let Some(n) = next_block {
        nav.push_str(&format!(
            "<a href=\"javascript:fn_link_page({});\" title=\"다음 페이지\">다음</a>",
            n
        ));
    }
    format!(
        "<html><body><table>\
         <tr><td>번호</td><td>사업명</td><td>기준년도</td><td>사업자</td><td>평가대행</td><td>승인관청</td><td>위치</td><td>상태</td></tr>\
         <tr><td>{p}</td><td><a href=\"javascript:fn_view('B{p}');\">약식 공동주택 {p}</a></td><td>2024</td>\
         <td>한빛건설</td><td>교통연구원</td><td>서울특별시</td><td>강남구</td><td>심의완료</td></tr>\
         </table><div class=\"paging\">{nav}</div></body></html>",
        p = page,
        nav = nav
    )
}

// ── Stores ────────────────────────────────────────────────────────────────────

/// Durable store that is never reachable.
pub struct UnreachableStore;

fn refused<T>() -> Result<T, StorageError> {
    Err(StorageError::Unavailable("connection refused".into()))
}

impl RecordStore for UnreachableStore {
    fn replace_all(&self, _records: &RecordSet) -> Result<usize, StorageError> {
        refused()
    }

    fn read_all(&self, _kind: RecordKind) -> Result<RecordSet, StorageError> {
        refused()
    }

    fn assessment_stats(&self) -> Result<AssessmentStats, StorageError> {
        refused()
    }

    fn begin_run(&self, _kind: RecordKind) -> Result<i64, StorageError> {
        refused()
    }

    fn finish_run(
        &self,
        _run_id: i64,
        _pages: u32,
        _records: usize,
        _persisted: bool,
        _error: Option<&str>,
    ) -> Result<(), StorageError> {
        refused()
    }
}

/// Store whose first `n` record reads/writes fail.
pub struct FlakyStore {
    inner: Arc<dyn RecordStore>,
    failures_left: AtomicUsize,
}

impl FlakyStore {
    /// Fresh in-memory DuckDB behind the failures.
    pub fn failing_first(n: usize) -> Self {
        Self::wrapping(Arc::new(DuckDbStore::in_memory().unwrap()), n)
    }

    pub fn wrapping(inner: Arc<dyn RecordStore>, n: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(n),
        }
    }

    fn trip(&self) -> Result<(), StorageError> {
        let tripped = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped { refused() } else { Ok(()) }
    }
}

impl RecordStore for FlakyStore {
    fn replace_all(&self, records: &RecordSet) -> Result<usize, StorageError> {
        self.trip()?;
        self.inner.replace_all(records)
    }

    fn read_all(&self, kind: RecordKind) -> Result<RecordSet, StorageError> {
        self.trip()?;
        self.inner.read_all(kind)
    }

    fn assessment_stats(&self) -> Result<AssessmentStats, StorageError> {
        self.inner.assessment_stats()
    }

    fn begin_run(&self, kind: RecordKind) -> Result<i64, StorageError> {
        self.inner.begin_run(kind)
    }

    fn finish_run(
        &self,
        run_id: i64,
        pages: u32,
        records: usize,
        persisted: bool,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        self.inner.finish_run(run_id, pages, records, persisted, error)
    }
}
