use crate::browser::navigator::{FormField, SubmitStrategy};
use crate::models::RecordKind;
use crate::scraper::paginator::PaginationScheme;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub browser: BrowserSettings,
    pub storage: StorageConfig,
    pub companies: SiteConfig,
    pub assessments: SiteConfig,
}

/// Headless browser configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserSettings {
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Chrome/Chromium binary; searched in common locations when unset.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// DevTools endpoint of an already running Chrome, e.g.
    /// `http://127.0.0.1:9222`. Takes precedence over launching.
    #[serde(default)]
    pub remote_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub args: Vec<String>,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// One target site: where to start, how to search, how to page.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    pub start_url: String,

    /// Base of the per-record detail page links.
    pub detail_base_url: String,

    /// Hard ceiling on pages per run.
    pub max_pages: u32,

    /// Pause after the first page load, for client-side rendering.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Pause after moving to another page.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    #[serde(default)]
    pub search: Option<SearchForm>,

    pub pagination: PaginationScheme,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchForm {
    #[serde(default)]
    pub fields: Vec<FormField>,

    #[serde(default)]
    pub submit: Vec<SubmitStrategy>,

    /// Pause after submitting, before the first extraction.
    #[serde(default = "default_settle_ms")]
    pub results_settle_ms: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/tia.duckdb")
}
fn default_settle_ms() -> u64 {
    3000
}
fn default_page_delay_ms() -> u64 {
    2000
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            remote_url: None,
            timeout_secs: default_timeout_secs(),
            args: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl SiteConfig {
    /// KATIA member directory: `thisPageNum` paging, 15 pages.
    pub fn katia_companies() -> Self {
        Self {
            start_url: "https://www.katia.or.kr/work/member_manage.php?search_order=&mode=&premode=&code=member_manage&category=&idx=&fk_idx=&thisPageNum=1&Dosearch=".to_string(),
            detail_base_url: "https://www.katia.or.kr/work/member_manage.php".to_string(),
            max_pages: 15,
            settle_ms: 2000,
            page_delay_ms: 1000,
            search: None,
            pagination: PaginationScheme::QueryParam {
                param: "thisPageNum".to_string(),
            },
        }
    }

    /// MOLIT traffic impact assessment search: "약식" projects since 2020,
    /// `fn_link_page(N)` paging with a "다음" control every 10th page. The
    /// ceiling spans two blocks so runs cross the block boundary.
    pub fn molit_assessments() -> Self {
        Self {
            start_url: "https://tia.molit.go.kr/search/businessSrchList.do".to_string(),
            detail_base_url: "https://tia.molit.go.kr/search/businessSrchView.do".to_string(),
            max_pages: 20,
            settle_ms: 3000,
            page_delay_ms: 3000,
            search: Some(SearchForm {
                fields: vec![
                    FormField {
                        selector: "#s_st_dt".to_string(),
                        value: "2020-01-01".to_string(),
                        dispatch_change: true,
                    },
                    FormField {
                        selector: "#s_en_dt".to_string(),
                        value: "{today}".to_string(),
                        dispatch_change: true,
                    },
                    FormField {
                        selector: "#s_bsns_nm".to_string(),
                        value: "약식".to_string(),
                        dispatch_change: false,
                    },
                ],
                submit: vec![
                    SubmitStrategy::ClickSelector {
                        selector: "a.submit-btn".to_string(),
                    },
                    SubmitStrategy::ClickLinkText {
                        text: "검색".to_string(),
                    },
                    SubmitStrategy::SubmitForm {
                        selector: "form".to_string(),
                    },
                    SubmitStrategy::PressEnter {
                        selector: "#s_bsns_nm".to_string(),
                    },
                ],
                results_settle_ms: 3000,
            }),
            pagination: PaginationScheme::NumberedLinks {
                link_pattern: "fn_link_page({page})".to_string(),
                next_selector: Some(r#"a[href*="fn_link_page"][title*="다음"]"#.to_string()),
                block_size: Some(10),
            },
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("TIA").separator("__"))
            .build()
            .context("Failed to read configuration sources")?;

        cfg.try_deserialize()
            .context("Invalid configuration (check config/*.toml and TIA__ variables)")
    }

    pub fn site(&self, kind: RecordKind) -> &SiteConfig {
        match kind {
            RecordKind::Companies => &self.companies,
            RecordKind::Assessments => &self.assessments,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            browser: BrowserSettings::default(),
            storage: StorageConfig::default(),
            companies: SiteConfig::katia_companies(),
            assessments: SiteConfig::molit_assessments(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_target_sites() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.site(RecordKind::Companies).max_pages, 15);
        assert!(cfg.site(RecordKind::Assessments).max_pages > 10);
        assert!(cfg.companies.search.is_none());
        assert_eq!(cfg.assessments.search.as_ref().map(|s| s.submit.len()), Some(4));
    }

    #[test]
    fn test_shipped_default_toml_matches_builtin_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let builtin = AppConfig::default();

        for kind in RecordKind::ALL {
            let (a, b) = (cfg.site(kind), builtin.site(kind));
            assert_eq!(a.start_url, b.start_url);
            assert_eq!(a.max_pages, b.max_pages);
            assert_eq!(a.pagination, b.pagination);
        }
        let (a, b) = (
            cfg.assessments.search.unwrap(),
            builtin.assessments.search.unwrap(),
        );
        assert_eq!(a.fields, b.fields);
        assert_eq!(a.submit, b.submit);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let toml = r#"
            [storage]
            db_path = "/tmp/other.duckdb"

            [assessments]
            start_url = "https://example.test/list"
            detail_base_url = "https://example.test/view"
            max_pages = 3

            [assessments.pagination]
            scheme = "next_control"
            selector = "a.next"
        "#;

        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.storage.db_path, PathBuf::from("/tmp/other.duckdb"));
        assert!(cfg.storage.run_migrations);
        assert_eq!(cfg.assessments.max_pages, 3);
        assert_eq!(cfg.assessments.settle_ms, 3000);
        assert_eq!(
            cfg.assessments.pagination,
            PaginationScheme::NextControl {
                selector: "a.next".into()
            }
        );
        assert_eq!(cfg.companies.max_pages, 15);
        assert!(cfg.browser.headless);
    }
}
