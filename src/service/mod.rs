//! Boundary operations: crawl, list, lookup and stats as JSON documents.
//!
//! Crawl failures never escape as errors here; they come back as
//! `success: false` responses.

use crate::browser::ChromeLauncher;
use crate::config::AppConfig;
use crate::models::{
    AssessmentRecord, AssessmentStats, CompanyRecord, CountBucket, CrawlResponse, ListFilters,
    ListResponse, RecordKind, RecordSet,
};
use crate::pipeline::Pipeline;
use crate::scraper::cleaner::normalise_company_name;
use crate::storage::gateway::{DuckDbStore, FallbackCache, PersistenceGateway};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct CrawlerService {
    pipeline: Pipeline,
}

impl CrawlerService {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Real browser, DuckDB at `storage.db_path`, fresh fallback cache.
    pub fn from_config(config: AppConfig) -> Self {
        let launcher = Arc::new(ChromeLauncher::new(config.browser.clone()));
        let store = Arc::new(DuckDbStore::new(
            config.storage.db_path.clone(),
            config.storage.run_migrations,
        ));
        let gateway = PersistenceGateway::new(store, Arc::new(FallbackCache::new()));
        Self::new(Pipeline::new(config, launcher, gateway))
    }

    pub async fn crawl(&self, kind: RecordKind) -> CrawlResponse {
        match self.pipeline.crawl(kind).await {
            Ok(report) => {
                let total = report.records.len();
                let message = if report.persisted {
                    format!("Crawled {} {} records", total, kind)
                } else {
                    format!(
                        "Crawled {} {} records; database unavailable, kept in memory",
                        total, kind
                    )
                };
                CrawlResponse {
                    success: true,
                    total_count: total,
                    message: Some(message),
                    error: None,
                    db_connected: report.persisted,
                    timestamp: Utc::now(),
                    records: Some(report.records),
                }
            }
            Err(e) => CrawlResponse {
                success: false,
                total_count: 0,
                message: None,
                error: Some(e.to_string()),
                db_connected: false,
                timestamp: Utc::now(),
                records: None,
            },
        }
    }

    /// Stored records, filtered. Never crawls.
    pub fn list(&self, kind: RecordKind, filters: &ListFilters) -> ListResponse {
        let (records, db_connected) = self.pipeline.gateway().read_all(kind);
        let records = filters.apply(records);
        ListResponse {
            success: true,
            total_count: records.len(),
            db_connected,
            records,
        }
    }

    /// Companies whose normalised name contains, or is contained in, the
    /// normalised `name`.
    pub fn lookup_companies(&self, name: &str) -> ListResponse {
        let wanted = normalise_company_name(name);
        let (records, db_connected) = self.pipeline.gateway().read_all(RecordKind::Companies);

        let matches: Vec<CompanyRecord> = match records {
            RecordSet::Companies(v) if !wanted.is_empty() => v
                .into_iter()
                .filter(|c| {
                    let have = normalise_company_name(&c.name);
                    !have.is_empty() && (have.contains(&wanted) || wanted.contains(&have))
                })
                .collect(),
            _ => Vec::new(),
        };
        info!("Lookup '{}': {} companies", name, matches.len());

        ListResponse {
            success: true,
            total_count: matches.len(),
            db_connected,
            records: RecordSet::Companies(matches),
        }
    }

    pub fn assessment_stats(&self) -> AssessmentStats {
        let gateway = self.pipeline.gateway();
        match gateway.store().assessment_stats() {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Stats query failed ({}); counting cached records", e);
                match gateway.read_all(RecordKind::Assessments).0 {
                    RecordSet::Assessments(v) => stats_from_records(&v),
                    RecordSet::Companies(_) => stats_from_records(&[]),
                }
            }
        }
    }

    /// Detail page link for every record, in order.
    pub fn detail_urls(&self, records: &RecordSet) -> Vec<String> {
        let base = &self.pipeline.config().site(records.kind()).detail_base_url;
        match records {
            RecordSet::Companies(v) => v.iter().map(|r| r.detail_url(base)).collect(),
            RecordSet::Assessments(v) => v.iter().map(|r| r.detail_url(base)).collect(),
        }
    }
}

fn stats_from_records(records: &[AssessmentRecord]) -> AssessmentStats {
    fn count_by<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<CountBucket> {
        let mut counts: HashMap<&str, i64> = HashMap::new();
        for k in keys {
            *counts.entry(k).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(key, count)| CountBucket {
                key: key.to_string(),
                count,
            })
            .collect()
    }

    let mut by_year = count_by(records.iter().map(|r| r.reference_year.as_str()));
    by_year.sort_by(|a, b| b.key.cmp(&a.key));

    let mut by_status = count_by(records.iter().map(|r| r.status.as_str()));
    by_status.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));

    AssessmentStats {
        total: records.len() as i64,
        by_year,
        by_status,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
