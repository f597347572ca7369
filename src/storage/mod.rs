pub mod gateway;

use crate::error::StorageError;
use crate::models::{
    AssessmentRecord, AssessmentStats, CompanyRecord, CountBucket, RecordKind, RecordSet,
};
use chrono::Utc;
use duckdb::{Connection, params};
use std::path::Path;
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_katia_companies START 1;
CREATE SEQUENCE IF NOT EXISTS seq_traffic_assessments START 1;
CREATE SEQUENCE IF NOT EXISTS seq_scrape_runs START 1;

CREATE TABLE IF NOT EXISTS katia_companies (
    id               BIGINT PRIMARY KEY DEFAULT nextval('seq_katia_companies'),
    sequence_number  VARCHAR NOT NULL,
    name             VARCHAR NOT NULL,
    representative   VARCHAR NOT NULL,
    address          VARCHAR NOT NULL,
    phone            VARCHAR NOT NULL,
    detail_link_id   VARCHAR,
    created_at       TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS traffic_assessments (
    id                   BIGINT PRIMARY KEY DEFAULT nextval('seq_traffic_assessments'),
    sequence_number      VARCHAR NOT NULL,
    project_name         VARCHAR NOT NULL,
    reference_year       VARCHAR NOT NULL,
    business_owner       VARCHAR NOT NULL,
    assessment_agency    VARCHAR NOT NULL,
    approval_authority   VARCHAR NOT NULL,
    location             VARCHAR NOT NULL,
    status               VARCHAR NOT NULL,
    external_project_id  VARCHAR NOT NULL,
    created_at           TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS scrape_runs (
    id               BIGINT PRIMARY KEY DEFAULT nextval('seq_scrape_runs'),
    kind             VARCHAR NOT NULL,
    started_at       TIMESTAMP NOT NULL,
    finished_at      TIMESTAMP,
    status           VARCHAR NOT NULL DEFAULT 'running',
    pages_visited    INTEGER DEFAULT 0,
    records_found    INTEGER DEFAULT 0,
    persisted        BOOLEAN DEFAULT FALSE,
    error_msg        VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_companies_name  ON katia_companies (name);
CREATE INDEX IF NOT EXISTS idx_assessments_year ON traffic_assessments (reference_year);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Directory {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(|source| StorageError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn run_migrations(&self) -> Result<(), StorageError> {
        debug!("Running migrations…");
        self.conn.execute_batch(DDL)?;
        self.conn.execute_batch(INDEXES)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        Ok(())
    }

    // ── Full-table replace ────────────────────────────────────────────────────

    /// Delete every row of the kind's table and insert `records`, in one
    /// transaction. Returns the number of rows written.
    pub fn replace_all(&self, records: &RecordSet) -> Result<usize, StorageError> {
        let now = Utc::now().naive_utc();
        let tx = self.conn.unchecked_transaction()?;

        match records {
            RecordSet::Companies(rows) => {
                tx.execute("DELETE FROM katia_companies", [])?;
                let mut stmt = tx.prepare(
                    r#"INSERT INTO katia_companies
                           (sequence_number, name, representative, address, phone, detail_link_id, created_at)
                       VALUES (?, ?, ?, ?, ?, ?, ?)"#,
                )?;
                for c in rows {
                    stmt.execute(params![
                        c.sequence_number,
                        c.name,
                        c.representative,
                        c.address,
                        c.phone,
                        c.detail_link_id,
                        now,
                    ])?;
                }
            }
            RecordSet::Assessments(rows) => {
                tx.execute("DELETE FROM traffic_assessments", [])?;
                let mut stmt = tx.prepare(
                    r#"INSERT INTO traffic_assessments
                           (sequence_number, project_name, reference_year, business_owner,
                            assessment_agency, approval_authority, location, status,
                            external_project_id, created_at)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                )?;
                for a in rows {
                    stmt.execute(params![
                        a.sequence_number,
                        a.project_name,
                        a.reference_year,
                        a.business_owner,
                        a.assessment_agency,
                        a.approval_authority,
                        a.location,
                        a.status,
                        a.external_project_id,
                        now,
                    ])?;
                }
            }
        }

        tx.commit()?;
        info!("Replaced {} table with {} rows", records.kind(), records.len());
        Ok(records.len())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// All rows of a kind in insertion (crawl) order.
    pub fn read_all(&self, kind: RecordKind) -> Result<RecordSet, StorageError> {
        match kind {
            RecordKind::Companies => {
                let mut stmt = self.conn.prepare(
                    r#"SELECT sequence_number, name, representative, address, phone, detail_link_id
                       FROM katia_companies ORDER BY id"#,
                )?;
                let rows = stmt
                    .query_map([], |r| {
                        Ok(CompanyRecord {
                            sequence_number: r.get(0)?,
                            name: r.get(1)?,
                            representative: r.get(2)?,
                            address: r.get(3)?,
                            phone: r.get(4)?,
                            detail_link_id: r.get(5)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(RecordSet::Companies(rows))
            }
            RecordKind::Assessments => {
                let mut stmt = self.conn.prepare(
                    r#"SELECT sequence_number, project_name, reference_year, business_owner,
                              assessment_agency, approval_authority, location, status,
                              external_project_id
                       FROM traffic_assessments ORDER BY id"#,
                )?;
                let rows = stmt
                    .query_map([], |r| {
                        Ok(AssessmentRecord {
                            sequence_number: r.get(0)?,
                            project_name: r.get(1)?,
                            reference_year: r.get(2)?,
                            business_owner: r.get(3)?,
                            assessment_agency: r.get(4)?,
                            approval_authority: r.get(5)?,
                            location: r.get(6)?,
                            status: r.get(7)?,
                            external_project_id: r.get(8)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(RecordSet::Assessments(rows))
            }
        }
    }

    pub fn count(&self, kind: RecordKind) -> Result<i64, StorageError> {
        let sql = match kind {
            RecordKind::Companies => "SELECT COUNT(*) FROM katia_companies",
            RecordKind::Assessments => "SELECT COUNT(*) FROM traffic_assessments",
        };
        Ok(self.conn.query_row(sql, [], |r| r.get(0))?)
    }

    pub fn assessment_stats(&self) -> Result<AssessmentStats, StorageError> {
        let total = self.count(RecordKind::Assessments)?;
        let by_year = self.buckets(
            r#"SELECT reference_year, COUNT(*) FROM traffic_assessments
               GROUP BY reference_year ORDER BY reference_year DESC"#,
        )?;
        let by_status = self.buckets(
            r#"SELECT status, COUNT(*) AS n FROM traffic_assessments
               GROUP BY status ORDER BY n DESC, status"#,
        )?;
        Ok(AssessmentStats {
            total,
            by_year,
            by_status,
        })
    }

    fn buckets(&self, sql: &str) -> Result<Vec<CountBucket>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |r| {
                Ok(CountBucket {
                    key: r.get(0)?,
                    count: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, kind: RecordKind) -> Result<i64, StorageError> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO scrape_runs (kind, started_at, status) VALUES (?, ?, 'running') RETURNING id",
            params![kind.as_str(), Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(
        &self,
        run_id: i64,
        pages: u32,
        records: usize,
        persisted: bool,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               pages_visited = ?, records_found = ?, persisted = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                pages as i64,
                records as i64,
                persisted,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_run_status(&self, kind: RecordKind) -> Result<Option<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status FROM scrape_runs WHERE kind = ? ORDER BY id DESC LIMIT 1")?;
        let status = stmt
            .query_map(params![kind.as_str()], |r| r.get::<_, String>(0))?
            .next()
            .transpose()?;
        Ok(status)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
