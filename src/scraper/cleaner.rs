use crate::models::{AssessmentRecord, CompanyRecord, RawCell, RawRow};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

pub const COMPANY_MIN_CELLS: usize = 5;
pub const ASSESSMENT_MIN_CELLS: usize = 8;

/// `javascript:sendPage_('v', '477','1')` → `477`
static COMPANY_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"sendPage_\('v',\s*'(\d+)',\s*'\d+'\)").expect("company link regex")
});

/// `javascript:fn_view('B2023-0012')` → `B2023-0012`
static PROJECT_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fn_view\('([^']+)'\)").expect("project link regex"));

static CORPORATE_MARKERS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"주식회사|\(주\)|㈜|\s+").expect("corporate marker regex")
});

// ── Parsers ───────────────────────────────────────────────────────────────────

/// The row-validity gate: the first cell must be a non-negative integer.
/// Header labels ("번호"), blanks and stray text all fail here.
pub fn parse_sequence_number(s: &str) -> Option<u64> {
    s.trim().parse().ok()
}

pub fn extract_company_link_id(cell: &RawCell) -> Option<String> {
    [cell.onclick.as_deref(), cell.href.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|attr| COMPANY_LINK_RE.captures(attr))
        .map(|c| c[1].to_string())
}

pub fn extract_project_id(cell: &RawCell) -> Option<String> {
    [cell.href.as_deref(), cell.onclick.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|attr| PROJECT_LINK_RE.captures(attr))
        .map(|c| c[1].to_string())
}

/// Id used when the project anchor carries no `fn_view(..)` call.
pub fn synthesize_project_id(page: u32, row_index: usize) -> String {
    format!("project_{}_{}", page, row_index)
}

/// Strip corporate-form markers and whitespace so "㈜ 가람" matches "가람".
pub fn normalise_company_name(s: &str) -> String {
    CORPORATE_MARKERS_RE.replace_all(s, "").trim().to_string()
}

// ── Row → CompanyRecord ───────────────────────────────────────────────────────

/// Columns: number | company name | representative | address | phone
pub fn company_from_row(row: &RawRow) -> Option<CompanyRecord> {
    if row.cells.len() < COMPANY_MIN_CELLS {
        return None;
    }
    let number = row.text(0);
    parse_sequence_number(number)?;

    Some(CompanyRecord {
        sequence_number: number.to_string(),
        name: row.text(1).to_string(),
        representative: row.text(2).to_string(),
        address: row.text(3).to_string(),
        phone: row.text(4).to_string(),
        detail_link_id: row.cells.get(1).and_then(extract_company_link_id),
    })
}

// ── Row → AssessmentRecord ────────────────────────────────────────────────────

/// Columns: number | project name (anchor) | year | owner | agency |
/// approval authority | location | status
pub fn assessment_from_row(row: &RawRow, page: u32, row_index: usize) -> Option<AssessmentRecord> {
    if row.cells.len() < ASSESSMENT_MIN_CELLS {
        return None;
    }
    let number = row.text(0);
    parse_sequence_number(number)?;

    let name_cell = &row.cells[1];
    let project_name = name_cell
        .anchor_text
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(&name_cell.text)
        .to_string();

    Some(AssessmentRecord {
        sequence_number: number.to_string(),
        project_name,
        reference_year: row.text(2).to_string(),
        business_owner: row.text(3).to_string(),
        assessment_agency: row.text(4).to_string(),
        approval_authority: row.text(5).to_string(),
        location: row.text(6).to_string(),
        status: row.text(7).to_string(),
        external_project_id: extract_project_id(name_cell)
            .unwrap_or_else(|| synthesize_project_id(page, row_index)),
    })
}

// ── Batch helpers ─────────────────────────────────────────────────────────────

pub fn clean_company_rows(rows: &[RawRow]) -> Vec<CompanyRecord> {
    let records: Vec<CompanyRecord> = rows.iter().filter_map(company_from_row).collect();
    debug!("{} of {} rows are companies", records.len(), rows.len());
    records
}

pub fn clean_assessment_rows(rows: &[RawRow], page: u32) -> Vec<AssessmentRecord> {
    let records: Vec<AssessmentRecord> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| assessment_from_row(row, page, i))
        .collect();
    debug!("{} of {} rows are assessments", records.len(), rows.len());
    records
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(text: &str) -> RawCell {
        RawCell {
            text: text.to_string(),
            ..Default::default()
        }
    }

    fn row(texts: &[&str]) -> RawRow {
        RawRow {
            cells: texts.iter().map(|t| cell(t)).collect(),
        }
    }

    #[test]
    fn test_parse_sequence_number() {
        assert_eq!(parse_sequence_number(" 42 "), Some(42));
        assert_eq!(parse_sequence_number("0"), Some(0));
        assert_eq!(parse_sequence_number("번호"), None);
        assert_eq!(parse_sequence_number(""), None);
        assert_eq!(parse_sequence_number("-3"), None);
        assert_eq!(parse_sequence_number("1.5"), None);
    }

    #[test]
    fn test_company_link_id_from_onclick() {
        let c = RawCell {
            onclick: Some("sendPage_('v','477','1')".into()),
            ..cell("가람")
        };
        assert_eq!(extract_company_link_id(&c), Some("477".into()));

        let c = RawCell {
            href: Some("javascript:sendPage_('v', '88', '2')".into()),
            ..cell("나래")
        };
        assert_eq!(extract_company_link_id(&c), Some("88".into()));

        assert_eq!(extract_company_link_id(&cell("다온")), None);
    }

    #[test]
    fn test_header_row_is_rejected() {
        let header = row(&["번호", "회사명", "대표자", "등록지", "부서전화"]);
        assert!(company_from_row(&header).is_none());

        let short = row(&["1", "가람", "김"]);
        assert!(company_from_row(&short).is_none());

        let ok = row(&["7", "가람", "김철수", "서울", "02-1234-5678"]);
        let rec = company_from_row(&ok).unwrap();
        assert_eq!(rec.sequence_number, "7");
        assert_eq!(rec.phone, "02-1234-5678");
        assert_eq!(rec.detail_link_id, None);
    }

    #[test]
    fn test_assessment_project_id_and_fallback() {
        let mut r = row(&["3", "", "2024", "한빛", "교통연", "서울시", "강남", "완료"]);
        r.cells[1] = RawCell {
            text: "역삼 공동주택".into(),
            anchor_text: Some("역삼 공동주택".into()),
            href: Some("javascript:fn_view('B2024-001')".into()),
            onclick: None,
        };
        let rec = assessment_from_row(&r, 2, 5).unwrap();
        assert_eq!(rec.external_project_id, "B2024-001");
        assert_eq!(rec.project_name, "역삼 공동주택");
        assert_eq!(rec.status, "완료");

        r.cells[1].href = None;
        let rec = assessment_from_row(&r, 2, 5).unwrap();
        assert_eq!(rec.external_project_id, "project_2_5");
    }

    #[test]
    fn test_clean_rows_only_emits_numeric_sequence_numbers() {
        let rows = vec![
            row(&["번호", "a", "b", "c", "d"]),
            row(&["1", "a", "b", "c", "d"]),
            row(&["", "a", "b", "c", "d"]),
            row(&["2", "a", "b", "c", "d"]),
        ];
        let records = clean_company_rows(&rows);
        assert_eq!(records.len(), 2);
        assert!(
            records
                .iter()
                .all(|r| parse_sequence_number(&r.sequence_number).is_some())
        );
    }

    #[test]
    fn test_normalise_company_name() {
        assert_eq!(normalise_company_name("㈜ 가람 엔지니어링"), "가람엔지니어링");
        assert_eq!(normalise_company_name("주식회사 나래"), "나래");
        assert_eq!(normalise_company_name("다온(주)"), "다온");
    }
}
