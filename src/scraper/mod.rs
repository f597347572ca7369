pub mod cleaner;
pub mod paginator;
pub mod parsers;

use crate::models::{RecordKind, RecordSet};

use self::cleaner::{clean_assessment_rows, clean_company_rows};
use self::parsers::extract_rows;

/// Extract the typed records of one result page from its HTML snapshot.
///
/// `page` is only used to synthesize assessment ids for rows whose project
/// link carries none.
pub fn parse_page(kind: RecordKind, html: &str, page: u32) -> RecordSet {
    let rows = extract_rows(html);
    match kind {
        RecordKind::Companies => RecordSet::Companies(clean_company_rows(&rows)),
        RecordKind::Assessments => RecordSet::Assessments(clean_assessment_rows(&rows, page)),
    }
}
