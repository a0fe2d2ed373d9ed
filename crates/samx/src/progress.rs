//! 📊 Progress: how far along is that five-million-row export, and the receipt at the end.
//!
//! [`ExportProgress`] is one bar per dataset, with a little comfy-table under
//! it (rows/s, pages, elapsed). [`summary_table`] renders the end-of-run
//! receipt the CLI prints. Both are pure presentation; nothing here decides
//! anything.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 🚰 Rows flowing out of one dataset.
pub struct ExportProgress {
    dataset: String,
    rows: u64,
    pages: u64,
    bar: ProgressBar,
    // -- (when, rows so far), last five seconds only
    samples: VecDeque<(Instant, u64)>,
    started: Instant,
}

impl std::fmt::Debug for ExportProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportProgress")
            .field("dataset", &self.dataset)
            .field("rows", &self.rows)
            .field("pages", &self.pages)
            .finish()
    }
}

impl ExportProgress {
    /// 📏 `row_ceiling` is the bar length; exports stop there even if the dataset does not.
    pub fn new(dataset: &str, row_ceiling: u64) -> Self {
        let bar = ProgressBar::new(row_ceiling);
        // -- a hardcoded template that fails to parse falls back to the plain bar
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}]")
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        let started = Instant::now();
        Self {
            dataset: dataset.to_string(),
            rows: 0,
            pages: 0,
            bar,
            samples: VecDeque::from([(started, 0)]),
            started,
        }
    }

    pub fn page(&mut self, rows_in_page: u64) {
        self.rows += rows_in_page;
        self.pages += 1;
        let rate = self.rows_per_sec();
        self.render(rate);
        self.bar.set_position(self.rows);
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn rows_per_sec(&mut self) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(when, _)) = self.samples.front() {
            if now.duration_since(when) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        self.samples.push_back((now, self.rows));
        match self.samples.front() {
            Some(&(oldest, oldest_rows)) if now.duration_since(oldest).as_secs_f64() > 0.0 => {
                self.rows.saturating_sub(oldest_rows) as f64
                    / now.duration_since(oldest).as_secs_f64()
            }
            _ => 0.0,
        }
    }

    fn render(&self, rows_per_sec: f64) {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} rows/s", format_number(rows_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} rows", format_number(self.rows)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} pages", self.pages)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} elapsed", format_duration(self.started.elapsed())))
                .set_alignment(CellAlignment::Right),
        ]);
        self.bar
            .set_message(format!("dataset: {}\n{}", self.dataset, table));
    }
}

/// 🧾 Two-column receipt: what, how many.
pub fn summary_table(rows: &[(&str, String)], warnings: &[String]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["🧾 run", ""]);
    for (what, value) in rows {
        table.add_row(vec![
            Cell::new(what),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    for warning in warnings {
        table.add_row(vec![Cell::new("⚠️ warning"), Cell::new(warning)]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_numbers_get_their_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(5_000_000), "5,000,000");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
    }

    #[test]
    fn the_one_where_pages_add_up() {
        let mut progress = ExportProgress::new("OpportunityDS", 1_000);
        progress.page(100);
        progress.page(42);
        progress.finish();
        assert_eq!(progress.rows(), 142);
        assert_eq!(progress.pages(), 2);
    }

    #[test]
    fn the_one_where_the_receipt_lists_every_warning() {
        let table = summary_table(
            &[("dashboards", "2".into()), ("datasets", "1".into())],
            &["D2 is missing".into()],
        );
        let rendered = table.to_string();
        assert!(rendered.contains("dashboards"));
        assert!(rendered.contains("D2 is missing"));
    }
}
