use crate::models::{AssessmentStats, CountBucket};
use std::fmt::Write;
use std::time::{Duration, Instant};
use tracing::info;

/// Logs when a CLI command starts and how long it took once dropped.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  {}…", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("⏱  {} took {:.2?}", self.label, self.elapsed());
    }
}

/// Format a count with thousands separators.
pub fn fmt_number(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Plain-text rendering of the assessment statistics for terminals.
pub fn render_stats(stats: &AssessmentStats) -> String {
    let mut out = String::new();
    let rule = "─".repeat(36);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "  Traffic impact assessments: {}", fmt_number(stats.total));
    let _ = writeln!(out, "{}", rule);
    render_buckets(&mut out, "By reference year", &stats.by_year);
    render_buckets(&mut out, "By status", &stats.by_status);
    let _ = write!(out, "{}", rule);
    out
}

fn render_buckets(out: &mut String, title: &str, buckets: &[CountBucket]) {
    let _ = writeln!(out, "  {}", title);
    if buckets.is_empty() {
        let _ = writeln!(out, "    (none)");
    }
    for b in buckets {
        let key = if b.key.trim().is_empty() { "—" } else { b.key.as_str() };
        let _ = writeln!(out, "    {:<12} {:>8}", key, fmt_number(b.count));
    }
}
