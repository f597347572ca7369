use crate::models::{RawCell, RawRow};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

// ── Table walk ────────────────────────────────────────────────────────────────

/// Walk every `<table>` of an HTML snapshot in document order and return
/// each of its `<tr>` rows as raw cells.
///
/// Rows of a nested table are reported under that nested table only, and a
/// row's cells are its direct `<td>` children. Rows without any `<td>`
/// (pure `<th>` header rows) are skipped; everything else is left to the
/// positional mappers in `cleaner`.
pub fn extract_rows(html: &str) -> Vec<RawRow> {
    let doc = Html::parse_document(html);

    let Ok(table_sel) = Selector::parse("table") else { return vec![] };
    let Ok(tr_sel) = Selector::parse("tr") else { return vec![] };
    let Ok(a_sel) = Selector::parse("a") else { return vec![] };

    let mut rows = Vec::new();

    for (table_idx, table) in doc.select(&table_sel).enumerate() {
        let mut in_table = 0usize;

        for tr in table.select(&tr_sel) {
            if nearest_table(tr).map(|t| t.id()) != Some(table.id()) {
                continue;
            }

            let cells: Vec<RawCell> = tr
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|el| el.value().name() == "td")
                .map(|td| read_cell(td, &a_sel))
                .collect();

            if cells.is_empty() {
                continue;
            }

            in_table += 1;
            rows.push(RawRow { cells });
        }

        debug!("table {}: {} rows with cells", table_idx, in_table);
    }

    rows
}

fn nearest_table(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "table")
}

fn read_cell(td: ElementRef<'_>, a_sel: &Selector) -> RawCell {
    let anchor = td.select(a_sel).next();

    RawCell {
        text: td.text().collect::<String>().trim().to_string(),
        anchor_text: anchor.map(|a| a.text().collect::<String>().trim().to_string()),
        href: anchor.and_then(|a| a.value().attr("href")).map(str::to_string),
        onclick: anchor
            .and_then(|a| a.value().attr("onclick"))
            .or_else(|| td.value().attr("onclick"))
            .map(str::to_string),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_rows_reads_trimmed_cells_and_links() {
        let html = r#"
            <table>
              <tr><th>번호</th><th>회사명</th></tr>
              <tr>
                <td> 1 </td>
                <td><a href="javascript:;" onclick="sendPage_('v','477','1')"> 가람 </a></td>
              </tr>
            </table>"#;

        let rows = extract_rows(html);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text(0), "1");
        assert_eq!(rows[0].cells[1].anchor_text.as_deref(), Some("가람"));
        assert_eq!(rows[0].cells[1].href.as_deref(), Some("javascript:;"));
        assert_eq!(
            rows[0].cells[1].onclick.as_deref(),
            Some("sendPage_('v','477','1')")
        );
    }

    #[test]
    fn test_extract_rows_visits_tables_in_document_order() {
        let html = r#"
            <table><tr><td>a</td></tr></table>
            <div><table><tr><td>b</td></tr><tr><td>c</td></tr></table></div>"#;

        let texts: Vec<String> = extract_rows(html)
            .iter()
            .map(|r| r.text(0).to_string())
            .collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_nested_table_rows_are_not_duplicated() {
        let html = r#"
            <table>
              <tr><td>outer</td><td><table><tr><td>inner</td></tr></table></td></tr>
            </table>"#;

        let rows = extract_rows(html);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells.len(), 2);
        assert_eq!(rows[1].text(0), "inner");
    }

    #[test]
    fn test_page_without_tables() {
        assert!(extract_rows("<p>점검 중입니다</p>").is_empty());
    }
}
