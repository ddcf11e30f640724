use std::fmt::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use crate::binder::{MetricBoard, TableState};
use crate::chart::{ChartBackend, ChartRegistry, ChartSpec};
use crate::dashboard::{Dashboard, RefreshOutcome};
use crate::error::RenderError;
use crate::store::EventStore;

pub const REPORT_TITLE: &str = "Social Engineering Awareness Report";
const HEADER_LINES: usize = 3;
const FOOTER_LINES: usize = 2;
const PAGE_BREAK: char = '\u{c}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    /// Total lines per page, header and footer included.
    pub page_height: usize,
    pub width: usize,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            page_height: 60,
            width: 96,
        }
    }
}

impl PageLayout {
    pub fn usable_height(&self) -> usize {
        self.page_height
            .saturating_sub(HEADER_LINES + FOOTER_LINES)
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Image,
}

/// A captured region of the dashboard, measured in lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub lines: Vec<String>,
}

impl Block {
    pub fn height(&self) -> usize {
        self.lines.len()
    }
}

pub fn report_file_name(date: NaiveDate) -> String {
    format!("awareness-report-{}.txt", date.format("%Y-%m-%d"))
}

fn metrics_block(board: &MetricBoard) -> Block {
    let mut lines = vec!["Key Metrics".to_string()];
    for (slot, value) in board.slots() {
        lines.push(format!("  {slot:<20} {value}"));
    }
    lines.push(String::new());
    Block {
        kind: BlockKind::Text,
        lines,
    }
}

fn campaign_block(board: &MetricBoard) -> Block {
    let mut lines = vec!["Campaigns".to_string()];
    match board.campaign_table() {
        TableState::Error(message) => lines.push(format!("  Error: {message}")),
        TableState::Rows(rows) if rows.is_empty() => lines.push("  No campaigns recorded.".to_string()),
        TableState::Rows(rows) => {
            lines.push(format!(
                "  {:<24} {:<9} {:<10} {:<10} {:>5} {:>6} {:>8}  Risk",
                "Name", "Type", "Start", "End", "Sent", "Click", "Report"
            ));
            for row in rows {
                let kind = row.kind.map(|k| k.to_string()).unwrap_or_else(|| "-".to_string());
                let name = if row.name.trim().is_empty() { &row.id } else { &row.name };
                lines.push(format!(
                    "  {:<24} {:<9} {:<10} {:<10} {:>5} {:>6} {:>8}  {}",
                    truncate(name, 24),
                    kind,
                    row.start,
                    row.end,
                    row.deliveries,
                    row.click_rate.whole(),
                    row.report_rate.whole(),
                    if row.at_risk { "HIGH RISK" } else { "" }
                ));
            }
        }
    }
    lines.push(String::new());
    Block {
        kind: BlockKind::Image,
        lines,
    }
}

fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

/// Text raster of a chart: one bar row per label and series.
pub fn rasterize(spec: &ChartSpec, width: usize) -> Block {
    let mut lines = vec![format!("{} ({:?})", spec.title, spec.kind)];
    if spec.is_empty() {
        lines.push("  (no data)".to_string());
    } else {
        let bar_width = width.saturating_sub(40).max(10);
        let max = spec.max_value();
        for (index, label) in spec.labels.iter().enumerate() {
            for series in &spec.series {
                let value = series.values.get(index).copied().unwrap_or(0.0);
                let filled = if max > 0.0 {
                    ((value / max) * bar_width as f64).round() as usize
                } else {
                    0
                };
                lines.push(format!(
                    "  {:<16} {:<10} {:<bar_width$} {}",
                    truncate(label, 16),
                    truncate(&series.name, 10),
                    "#".repeat(filled.min(bar_width)),
                    value
                ));
            }
        }
    }
    lines.push(String::new());
    Block {
        kind: BlockKind::Image,
        lines,
    }
}

/// Captures the presented state in reading order: metrics, campaign
/// table, then every live chart.
pub fn capture<B: ChartBackend>(board: &MetricBoard, charts: &ChartRegistry<B>, width: usize) -> Vec<Block> {
    let mut blocks = vec![metrics_block(board), campaign_block(board)];
    for (_, spec) in charts.live() {
        blocks.push(rasterize(spec, width));
    }
    blocks
}

/// Lays blocks onto pages of `usable` body lines. Text flows line by line.
/// An image that fits on a page but not in the space left starts on the
/// next page; an image taller than a page is sliced across as many pages
/// as it needs.
pub fn paginate(blocks: &[Block], usable: usize) -> Vec<Vec<String>> {
    let usable = usable.max(1);
    let mut column: Vec<String> = Vec::new();

    for block in blocks {
        let used = column.len() % usable;
        let remaining = usable - used;
        let keep_together = block.kind == BlockKind::Image && block.height() <= usable;
        if used != 0 && keep_together && block.height() > remaining {
            column.extend(std::iter::repeat(String::new()).take(remaining));
        }
        column.extend(block.lines.iter().cloned());
    }

    let total = column.len().div_ceil(usable).max(1);
    let mut pages: Vec<Vec<String>> = column.chunks(usable).map(<[String]>::to_vec).collect();
    pages.resize(total, Vec::new());
    pages
}

pub fn compose(title: &str, generated_at: DateTime<Utc>, pages: &[Vec<String>], layout: &PageLayout) -> String {
    let total = pages.len();
    let rule = "=".repeat(layout.width);
    let mut output = String::new();

    for (index, body) in pages.iter().enumerate() {
        if index > 0 {
            output.push(PAGE_BREAK);
        }
        let _ = writeln!(output, "{title}");
        let _ = writeln!(output, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(output, "{rule}");
        for line in body {
            let _ = writeln!(output, "{line}");
        }
        for _ in body.len()..layout.usable_height() {
            let _ = writeln!(output);
        }
        let _ = writeln!(output, "{rule}");
        let _ = writeln!(output, "Page {} / {}", index + 1, total);
    }

    output
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub pages: usize,
    pub refresh: RefreshOutcome,
}

/// Refreshes the dashboard, waits for it to settle, then writes the
/// paginated document into `out_dir`.
pub async fn export<S, B>(
    dashboard: &mut Dashboard<S, B>,
    now: DateTime<Utc>,
    out_dir: &Path,
    layout: &PageLayout,
) -> Result<ExportSummary, RenderError>
where
    S: EventStore,
    B: ChartBackend,
{
    let refresh = dashboard.refresh(now).await;
    if !refresh.is_clean() {
        warn!(
            fetch_failures = refresh.fetch_failures.len(),
            render_failures = refresh.render_failures.len(),
            "exporting with degraded sections"
        );
    }

    let blocks = capture(dashboard.board(), dashboard.charts(), layout.width);
    let pages = paginate(&blocks, layout.usable_height());
    let document = compose(REPORT_TITLE, now, &pages, layout);

    std::fs::create_dir_all(out_dir)?;
    let path = out_dir.join(report_file_name(now.date_naive()));
    std::fs::write(&path, document)?;
    info!(path = %path.display(), pages = pages.len(), "report exported");

    Ok(ExportSummary {
        path,
        pages: pages.len(),
        refresh,
    })
}
