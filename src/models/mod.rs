use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Record kind ───────────────────────────────────────────────────────────────

/// Which source site / table a crawl run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Companies,
    Assessments,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::Companies, RecordKind::Assessments];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Companies => "companies",
            RecordKind::Assessments => "assessments",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "companies" | "company" | "katia" => Ok(RecordKind::Companies),
            "assessments" | "assessment" | "traffic" | "tia" => Ok(RecordKind::Assessments),
            other => Err(format!(
                "unknown record kind '{}' (expected 'companies' or 'assessments')",
                other
            )),
        }
    }
}

// ── KATIA member company ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompanyRecord {
    pub sequence_number: String,
    pub name: String,
    pub representative: String,
    pub address: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_link_id: Option<String>,
}

impl CompanyRecord {
    /// Link to the member detail page, or to a name search when the row
    /// carried no detail id.
    pub fn detail_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match &self.detail_link_id {
            Some(idx) => format!(
                "{}?search_order=&mode=v&premode=&code=member_manage&category=&idx={}&fk_idx=&thisPageNum=1&Dosearch=",
                base, idx
            ),
            None => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(self.name.as_bytes()).collect();
                format!(
                    "{}?code=member_manage&category=&Dosearch=company&search_order={}",
                    base, encoded
                )
            }
        }
    }
}

// ── Traffic impact assessment ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRecord {
    pub sequence_number: String,
    pub project_name: String,
    pub reference_year: String,
    pub business_owner: String,
    pub assessment_agency: String,
    pub approval_authority: String,
    pub location: String,
    /// Free text as shown by the source; see [`AssessmentRecord::status_category`].
    pub status: String,
    pub external_project_id: String,
}

impl AssessmentRecord {
    pub fn status_category(&self) -> AssessmentStatus {
        AssessmentStatus::classify(&self.status)
    }

    /// Project type inferred from keywords in the project name.
    pub fn project_type(&self) -> &'static str {
        const TYPES: [&str; 5] = ["공동주택", "지구단위계획", "도시개발", "물류창고", "주상복합"];
        TYPES
            .iter()
            .find(|t| self.project_name.contains(*t))
            .copied()
            .unwrap_or("기타")
    }

    pub fn review_type(&self) -> &'static str {
        if self.project_name.contains("약식") {
            "약식신규"
        } else if self.project_name.contains("변경심의") {
            "변경심의"
        } else if self.project_name.contains("변경신고") {
            "변경신고"
        } else {
            "신규"
        }
    }

    pub fn detail_url(&self, base_url: &str) -> String {
        format!(
            "{}?biz_id={}",
            base_url.trim_end_matches('/'),
            self.external_project_id
        )
    }
}

/// Coarse status buckets used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssessmentStatus {
    #[serde(rename = "진행중")]
    InProgress,
    #[serde(rename = "완료")]
    Completed,
    #[serde(rename = "계획")]
    Planned,
}

impl AssessmentStatus {
    pub fn classify(status: &str) -> Self {
        if status.contains("완료") {
            AssessmentStatus::Completed
        } else if status.contains("계획") {
            AssessmentStatus::Planned
        } else {
            AssessmentStatus::InProgress
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AssessmentStatus::InProgress => "진행중",
            AssessmentStatus::Completed => "완료",
            AssessmentStatus::Planned => "계획",
        }
    }
}

impl FromStr for AssessmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "진행중" | "in_progress" | "in-progress" => Ok(AssessmentStatus::InProgress),
            "완료" | "completed" => Ok(AssessmentStatus::Completed),
            "계획" | "planned" => Ok(AssessmentStatus::Planned),
            other => Err(format!("unknown assessment status '{}'", other)),
        }
    }
}

// ── Record sets ───────────────────────────────────────────────────────────────

/// A homogeneous batch of records of one kind, in crawl order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordSet {
    Companies(Vec<CompanyRecord>),
    Assessments(Vec<AssessmentRecord>),
}

impl RecordSet {
    pub fn empty(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Companies => RecordSet::Companies(Vec::new()),
            RecordKind::Assessments => RecordSet::Assessments(Vec::new()),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            RecordSet::Companies(_) => RecordKind::Companies,
            RecordSet::Assessments(_) => RecordKind::Assessments,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RecordSet::Companies(v) => v.len(),
            RecordSet::Assessments(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `other` after the current records. Mismatched kinds are
    /// ignored; callers only ever merge pages of the same run.
    pub fn append(&mut self, other: RecordSet) {
        match (self, other) {
            (RecordSet::Companies(a), RecordSet::Companies(b)) => a.extend(b),
            (RecordSet::Assessments(a), RecordSet::Assessments(b)) => a.extend(b),
            (this, other) => {
                tracing::warn!(
                    "Refusing to merge {} records into a {} set",
                    other.kind(),
                    this.kind()
                );
            }
        }
    }

    pub fn sequence_numbers(&self) -> Vec<&str> {
        match self {
            RecordSet::Companies(v) => v.iter().map(|r| r.sequence_number.as_str()).collect(),
            RecordSet::Assessments(v) => v.iter().map(|r| r.sequence_number.as_str()).collect(),
        }
    }
}

// ── Raw extraction rows ───────────────────────────────────────────────────────

/// One `<td>` as read from the page, before any positional mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCell {
    pub text: String,
    /// Text of the first anchor inside the cell, if any.
    pub anchor_text: Option<String>,
    pub href: Option<String>,
    pub onclick: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub cells: Vec<RawCell>,
}

impl RawRow {
    pub fn text(&self, idx: usize) -> &str {
        self.cells.get(idx).map(|c| c.text.as_str()).unwrap_or("")
    }
}

// ── List filters ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyFilters {
    /// Substring of name, representative or address.
    pub query: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentFilters {
    pub project_name: Option<String>,
    /// Matches the business owner or the assessment agency.
    pub company: Option<String>,
    pub location: Option<String>,
    pub status: Option<AssessmentStatus>,
    pub project_type: Option<String>,
    pub approval_authority: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListFilters {
    Companies(CompanyFilters),
    Assessments(AssessmentFilters),
}

fn contains_opt(haystack: &str, needle: &Option<String>) -> bool {
    match needle.as_deref().map(str::trim) {
        None | Some("") | Some("all") => true,
        Some(n) => haystack.contains(n),
    }
}

impl CompanyFilters {
    pub fn matches(&self, r: &CompanyRecord) -> bool {
        match self.query.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(q) => r.name.contains(q) || r.representative.contains(q) || r.address.contains(q),
        }
    }
}

impl AssessmentFilters {
    pub fn matches(&self, r: &AssessmentRecord) -> bool {
        let company_ok = match self.company.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(c) => r.business_owner.contains(c) || r.assessment_agency.contains(c),
        };
        let type_ok = match self.project_type.as_deref().map(str::trim) {
            None | Some("") | Some("all") => true,
            Some(t) => r.project_type() == t,
        };
        let year_ok = match self.year.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(y) => r.reference_year.trim() == y,
        };

        company_ok
            && type_ok
            && year_ok
            && contains_opt(&r.project_name, &self.project_name)
            && contains_opt(&r.location, &self.location)
            && contains_opt(&r.approval_authority, &self.approval_authority)
            && self.status.is_none_or(|s| r.status_category() == s)
    }
}

impl ListFilters {
    pub fn none(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Companies => ListFilters::Companies(CompanyFilters::default()),
            RecordKind::Assessments => ListFilters::Assessments(AssessmentFilters::default()),
        }
    }

    /// Keep only the records matching these filters. Filters of the other
    /// kind leave the set untouched.
    pub fn apply(&self, records: RecordSet) -> RecordSet {
        match (self, records) {
            (ListFilters::Companies(f), RecordSet::Companies(v)) => {
                RecordSet::Companies(v.into_iter().filter(|r| f.matches(r)).collect())
            }
            (ListFilters::Assessments(f), RecordSet::Assessments(v)) => {
                RecordSet::Assessments(v.into_iter().filter(|r| f.matches(r)).collect())
            }
            (_, other) => other,
        }
    }
}

// ── Boundary documents ────────────────────────────────────────────────────────

/// JSON document handed back for a crawl request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResponse {
    pub success: bool,
    pub total_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub db_connected: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<RecordSet>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub success: bool,
    pub total_count: usize,
    pub db_connected: bool,
    pub records: RecordSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountBucket {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentStats {
    pub total: i64,
    pub by_year: Vec<CountBucket>,
    pub by_status: Vec<CountBucket>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
