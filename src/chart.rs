use std::collections::BTreeMap;

use plotters::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::aggregate::{CategoryBreakdown, Funnel, PeriodSeries};
use crate::error::RenderError;

pub const PALETTE: [&str; 5] = ["#1FB8CD", "#FFC185", "#FF6B6B", "#9F7AEA", "#34D399"];

/// Chart canvas identifiers shared with the surrounding page.
pub mod canvases {
    pub const ENGAGEMENT_TREND: &str = "engagement-trend";
    pub const CONVERSION_FUNNEL: &str = "conversion-funnel";
    pub const CLICK_HEATMAP: &str = "click-heatmap";
    pub const DEPARTMENT: &str = "department-analytics";
    pub const COMPARATIVE: &str = "comparative-analysis";
    pub const VISITOR_TREND: &str = "visitor-trend";
    pub const VISITOR_COUNTRY: &str = "visitor-country";
    pub const VISITOR_DEVICE: &str = "visitor-device";

    pub const DELIVERY: [&str; 5] = [
        ENGAGEMENT_TREND,
        CONVERSION_FUNNEL,
        CLICK_HEATMAP,
        DEPARTMENT,
        COMPARATIVE,
    ];
    pub const VISITOR: [&str; 3] = [VISITOR_TREND, VISITOR_COUNTRY, VISITOR_DEVICE];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChartKind {
    Line,
    Bar,
    HorizontalBar,
    Pie,
    Radar,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
    /// One color for the whole series, or one per label.
    pub colors: Vec<String>,
}

impl Series {
    pub fn new(name: &str, values: Vec<f64>, color: &str) -> Self {
        Self {
            name: name.to_string(),
            values,
            colors: vec![color.to_string()],
        }
    }

    pub fn multicolor(name: &str, values: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            values,
            colors: PALETTE.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn color_at(&self, index: usize) -> &str {
        if self.colors.is_empty() {
            return PALETTE[0];
        }
        &self.colors[index % self.colors.len()]
    }
}

/// Library-independent description of a chart: ordered labels plus
/// parallel value series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

impl ChartSpec {
    pub fn new(kind: ChartKind, title: &str, labels: Vec<String>) -> Self {
        Self {
            kind,
            title: title.to_string(),
            labels,
            series: Vec::new(),
        }
    }

    pub fn with_series(mut self, series: Series) -> Self {
        self.series.push(series);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() || self.series.iter().all(|s| s.values.is_empty())
    }

    pub fn max_value(&self) -> f64 {
        self.series
            .iter()
            .flat_map(|s| s.values.iter().copied())
            .filter(|v| v.is_finite())
            .fold(0.0, f64::max)
    }
}

fn counts(values: &[usize]) -> Vec<f64> {
    values.iter().map(|&v| v as f64).collect()
}

pub fn engagement_trend(monthly: &PeriodSeries) -> ChartSpec {
    ChartSpec::new(ChartKind::Line, "Monthly Engagement Trends", monthly.labels.clone())
        .with_series(Series::new("Opened", monthly.column(|t| t.opened), PALETTE[0]))
        .with_series(Series::new("Clicked", monthly.column(|t| t.clicked), PALETTE[1]))
        .with_series(Series::new("Reported", monthly.column(|t| t.reported), PALETTE[2]))
}

pub fn conversion_funnel(funnel: &Funnel) -> ChartSpec {
    let stages = funnel.stages();
    let labels = stages.iter().map(|(name, _)| name.to_string()).collect();
    let values = stages.iter().map(|&(_, value)| value as f64).collect();
    ChartSpec::new(ChartKind::HorizontalBar, "Conversion Funnel", labels)
        .with_series(Series::multicolor("Recipients", values))
}

pub fn click_heatmap(hours: &[usize; 24]) -> ChartSpec {
    let labels = (0..24).map(|hour| format!("{hour}:00")).collect();
    ChartSpec::new(ChartKind::Bar, "Click Engagement by Hour", labels)
        .with_series(Series::new("Clicks", counts(hours), PALETTE[2]))
}

pub fn department_bars(departments: &CategoryBreakdown) -> ChartSpec {
    ChartSpec::new(ChartKind::Bar, "Department Analytics", departments.labels.clone())
        .with_series(Series::new("Opened", departments.column(|t| t.opened), PALETTE[0]))
        .with_series(Series::new("Clicked", departments.column(|t| t.clicked), PALETTE[1]))
        .with_series(Series::new("Reported", departments.column(|t| t.reported), PALETTE[2]))
}

pub fn comparative_radar(departments: &CategoryBreakdown) -> ChartSpec {
    ChartSpec {
        kind: ChartKind::Radar,
        title: "Comparative Analysis".to_string(),
        ..department_bars(departments)
    }
}

pub fn visitor_trend(daily: &PeriodSeries) -> ChartSpec {
    ChartSpec::new(ChartKind::Line, "Daily Visits", daily.labels.clone())
        .with_series(Series::new("Visits", daily.column(|t| t.count), PALETTE[0]))
}

pub fn visitor_countries(countries: &CategoryBreakdown) -> ChartSpec {
    ChartSpec::new(ChartKind::Pie, "Visitors by Country", countries.labels.clone())
        .with_series(Series::multicolor("Visits", countries.column(|t| t.count)))
}

pub fn visitor_devices(devices: &CategoryBreakdown) -> ChartSpec {
    ChartSpec::new(ChartKind::Bar, "Device/Browser Breakdown", devices.labels.clone())
        .with_series(Series::new("Visits", devices.column(|t| t.count), PALETTE[2]))
}

/// A drawing surface that can host charts. Handles returned by `create`
/// stay live until passed back to `dispose`.
pub trait ChartBackend {
    type Handle;

    fn create(&mut self, slot: &str, spec: &ChartSpec) -> Result<Self::Handle, RenderError>;

    fn dispose(&mut self, handle: Self::Handle);
}

struct LiveChart<H> {
    handle: H,
    spec: ChartSpec,
}

/// Owns at most one live chart per slot. Redrawing a slot always disposes
/// the previous chart before the new one is created.
pub struct ChartRegistry<B: ChartBackend> {
    backend: B,
    live: BTreeMap<String, LiveChart<B::Handle>>,
}

impl<B: ChartBackend> ChartRegistry<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            live: BTreeMap::new(),
        }
    }

    pub fn render(&mut self, slot: &str, spec: ChartSpec) -> Result<(), RenderError> {
        self.release(slot);
        let handle = self.backend.create(slot, &spec)?;
        self.live.insert(slot.to_string(), LiveChart { handle, spec });
        Ok(())
    }

    /// Disposes the chart bound to `slot`, if any.
    pub fn release(&mut self, slot: &str) {
        if let Some(previous) = self.live.remove(slot) {
            debug!(slot, "disposing chart");
            self.backend.dispose(previous.handle);
        }
    }

    pub fn spec(&self, slot: &str) -> Option<&ChartSpec> {
        self.live.get(slot).map(|chart| &chart.spec)
    }

    pub fn live(&self) -> impl Iterator<Item = (&str, &ChartSpec)> {
        self.live
            .iter()
            .map(|(slot, chart)| (slot.as_str(), &chart.spec))
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanvasId(u64);

/// Renders charts to SVG documents held in memory.
pub struct SvgCanvas {
    size: (u32, u32),
    next_id: u64,
    documents: BTreeMap<CanvasId, (String, String)>,
}

impl SvgCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            next_id: 0,
            documents: BTreeMap::new(),
        }
    }

    /// Live documents as `(slot, svg)` pairs.
    pub fn documents(&self) -> impl Iterator<Item = (&str, &str)> {
        self.documents
            .values()
            .map(|(slot, svg)| (slot.as_str(), svg.as_str()))
    }
}

impl Default for SvgCanvas {
    fn default() -> Self {
        Self::new(800, 420)
    }
}

impl ChartBackend for SvgCanvas {
    type Handle = CanvasId;

    fn create(&mut self, slot: &str, spec: &ChartSpec) -> Result<CanvasId, RenderError> {
        let svg = draw_svg(spec, self.size).map_err(|message| RenderError::Canvas {
            slot: slot.to_string(),
            message,
        })?;
        self.next_id += 1;
        let id = CanvasId(self.next_id);
        self.documents.insert(id, (slot.to_string(), svg));
        Ok(id)
    }

    fn dispose(&mut self, handle: CanvasId) {
        self.documents.remove(&handle);
    }
}

fn hex_color(hex: &str) -> RGBColor {
    let hex = hex.trim_start_matches('#');
    if hex.len() < 6 || !hex.is_ascii() {
        return RGBColor(128, 128, 128);
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).unwrap_or(0);
    RGBColor(channel(0..2), channel(2..4), channel(4..6))
}

/// Categories sit on integer x positions; other ticks stay blank.
fn category_label(labels: &[String], x: f64) -> String {
    let index = x.round();
    if index < 0.0 || (x - index).abs() > 1e-6 {
        return String::new();
    }
    labels.get(index as usize).cloned().unwrap_or_default()
}

/// Corners of the bar for category `category` in series `index` of a group
/// of bars each `bar` wide. Horizontal bars grow along x from the category's
/// y position.
fn bar_corners(horizontal: bool, category: usize, index: usize, bar: f64, value: f64) -> [(f64, f64); 2] {
    let start = category as f64 - 0.4 + bar * index as f64;
    if horizontal {
        [(0.0, start), (value, start + bar)]
    } else {
        [(start, 0.0), (start + bar, value)]
    }
}

/// Line charts draw as lines, horizontal bar charts with categories on the
/// y axis, and every other kind as grouped vertical bars.
fn draw_svg(spec: &ChartSpec, size: (u32, u32)) -> Result<String, String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
        root.fill(&WHITE).map_err(|err| err.to_string())?;

        let horizontal = spec.kind == ChartKind::HorizontalBar;
        let slots = spec.labels.len().max(1);
        let categories = -0.5f64..(slots as f64 - 0.5);
        let values = 0f64..spec.max_value().max(1.0) * 1.1;
        let labels = &spec.labels;
        let category = |position: &f64| category_label(labels, *position);

        let (x_range, y_range) = if horizontal {
            (values, categories)
        } else {
            (categories, values)
        };
        let mut chart = ChartBuilder::on(&root)
            .caption(spec.title.as_str(), ("sans-serif", 18))
            .margin(12)
            .x_label_area_size(36)
            .y_label_area_size(if horizontal { 120 } else { 48 })
            .build_cartesian_2d(x_range, y_range)
            .map_err(|err| err.to_string())?;

        {
            let mut mesh = chart.configure_mesh();
            if horizontal {
                mesh.disable_y_mesh().y_labels(slots).y_label_formatter(&category);
            } else {
                mesh.disable_x_mesh().x_labels(slots).x_label_formatter(&category);
            }
            mesh.draw().map_err(|err| err.to_string())?;
        }

        let group = spec.series.len().max(1) as f64;
        for (index, series) in spec.series.iter().enumerate() {
            let color = hex_color(series.color_at(0));
            if spec.kind == ChartKind::Line {
                let points: Vec<(f64, f64)> = series
                    .values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i as f64, *v))
                    .collect();
                chart
                    .draw_series(LineSeries::new(points, ShapeStyle::from(&color).stroke_width(2)))
                    .map_err(|err| err.to_string())?
                    .label(series.name.as_str())
                    .legend(move |(x, y)| {
                        PathElement::new(vec![(x, y), (x + 16, y)], ShapeStyle::from(&color))
                    });
            } else {
                let bar = 0.8 / group;
                let bars = series.values.iter().enumerate().map(|(i, v)| {
                    Rectangle::new(
                        bar_corners(horizontal, i, index, bar, *v),
                        hex_color(series.color_at(i)).filled(),
                    )
                });
                chart
                    .draw_series(bars)
                    .map_err(|err| err.to_string())?
                    .label(series.name.as_str())
                    .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
            }
        }

        if !spec.series.is_empty() {
            chart
                .configure_series_labels()
                .background_style(&WHITE.mix(0.8))
                .border_style(&BLACK)
                .draw()
                .map_err(|err| err.to_string())?;
        }

        root.present().map_err(|err| err.to_string())?;
    }
    Ok(svg)
}


#[cfg(test)]
mod tests {
    use super::recording::RecordingBackend;
    use super::*;
    use crate::aggregate::{group_by_period, Period, Tally};
    use crate::models::{Delivery, Event};

    fn sample_spec() -> ChartSpec {
        ChartSpec::new(ChartKind::Bar, "Sample", vec!["a".into(), "b".into()])
            .with_series(Series::new("Hits", vec![3.0, 5.0], PALETTE[0]))
    }

    #[test]
    fn rendering_a_slot_twice_disposes_the_first_chart() {
        let mut registry = ChartRegistry::new(RecordingBackend::default());
        registry.render("funnel", sample_spec()).unwrap();
        registry.render("funnel", sample_spec()).unwrap();

        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.backend().disposed, vec![1]);
        assert_eq!(registry.backend().live_handles(), vec![2]);
    }

    #[test]
    fn failed_redraw_leaves_slot_empty_and_others_intact() {
        let mut backend = RecordingBackend::default();
        backend.fail_slots.insert("broken".to_string());
        let mut registry = ChartRegistry::new(backend);

        registry.render("ok", sample_spec()).unwrap();
        let result = registry.render("broken", sample_spec());
        assert!(matches!(result, Err(RenderError::Canvas { .. })));
        assert!(registry.spec("broken").is_none());
        assert!(registry.spec("ok").is_some());
    }

    #[test]
    fn release_disposes_without_replacement() {
        let mut registry = ChartRegistry::new(RecordingBackend::default());
        registry.render("trend", sample_spec()).unwrap();
        registry.release("trend");
        registry.release("trend");
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.backend().disposed, vec![1]);
    }

    #[test]
    fn trend_chart_follows_chronological_labels() {
        let deliveries = vec![
            Delivery {
                sent_at: Some("2026-04-02".into()),
                opened: Some(true),
                ..Delivery::default()
            },
            Delivery {
                sent_at: Some("2026-02-11".into()),
                clicked: Some(true),
                ..Delivery::default()
            },
        ];
        let monthly = group_by_period(&deliveries, |d| d.occurred_at(), Period::Month);
        let spec = engagement_trend(&monthly);
        assert_eq!(spec.labels, vec!["Feb 2026", "Apr 2026"]);
        assert_eq!(spec.series[0].values, vec![0.0, 1.0]);
        assert_eq!(spec.series[1].values, vec![1.0, 0.0]);
    }

    #[test]
    fn builders_handle_empty_data() {
        let spec = engagement_trend(&PeriodSeries::default());
        assert!(spec.is_empty());
        assert_eq!(spec.series.len(), 3);
        assert_eq!(spec.max_value(), 0.0);

        let radar = comparative_radar(&CategoryBreakdown::default());
        assert_eq!(radar.kind, ChartKind::Radar);
        assert!(radar.labels.is_empty());
    }

    #[test]
    fn funnel_and_heatmap_shapes() {
        let funnel = conversion_funnel(&Funnel {
            sent: 10,
            opened: 6,
            clicked: 3,
            credential_submitted: 1,
            reported: 2,
        });
        assert_eq!(funnel.labels.len(), 5);
        assert_eq!(funnel.series[0].values, vec![10.0, 6.0, 3.0, 1.0, 2.0]);
        assert_eq!(funnel.series[0].color_at(6), PALETTE[1]);

        let mut hours = [0usize; 24];
        hours[13] = 4;
        let heatmap = click_heatmap(&hours);
        assert_eq!(heatmap.labels[13], "13:00");
        assert_eq!(heatmap.max_value(), 4.0);
    }

    #[test]
    fn department_charts_share_labels() {
        let departments = CategoryBreakdown {
            labels: vec!["HR".into(), "IT".into()],
            totals: vec![
                Tally {
                    count: 2,
                    opened: 2,
                    clicked: 1,
                    credential_submitted: 0,
                    reported: 0,
                },
                Tally::default(),
            ],
        };
        let bars = department_bars(&departments);
        let radar = comparative_radar(&departments);
        assert_eq!(bars.labels, radar.labels);
        assert_eq!(radar.series[1].values, vec![1.0, 0.0]);
    }

    #[test]
    fn svg_canvas_draws_and_disposes() {
        let mut registry = ChartRegistry::new(SvgCanvas::new(400, 240));
        registry.render("trend", sample_spec()).unwrap();
        registry
            .render("empty", ChartSpec::new(ChartKind::Line, "Nothing yet", Vec::new()))
            .unwrap();
        registry.render("trend", sample_spec()).unwrap();

        let canvas = registry.backend();
        assert_eq!(canvas.documents().count(), 2);
        for (_, svg) in canvas.documents() {
            assert!(svg.contains("<svg"));
        }
    }

    #[test]
    fn horizontal_bars_grow_along_x() {
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;

        let [from, to] = bar_corners(false, 2, 0, 0.8, 7.0);
        assert!(close(from.0, 1.6) && close(to.0, 2.4));
        assert_eq!((from.1, to.1), (0.0, 7.0));

        let [from, to] = bar_corners(true, 2, 0, 0.8, 7.0);
        assert_eq!((from.0, to.0), (0.0, 7.0));
        assert!(close(from.1, 1.6) && close(to.1, 2.4));

        let mut registry = ChartRegistry::new(SvgCanvas::new(400, 240));
        let funnel = conversion_funnel(&Funnel {
            sent: 10,
            opened: 6,
            clicked: 3,
            credential_submitted: 1,
            reported: 2,
        });
        registry.render("funnel", funnel).unwrap();
        let (_, svg) = registry.backend().documents().next().unwrap();
        assert!(svg.contains("Conversion Funnel"));
    }

    #[test]
    fn hex_colors_parse_with_fallback() {
        assert_eq!(hex_color("#1FB8CD"), RGBColor(0x1F, 0xB8, 0xCD));
        assert_eq!(hex_color("oops"), RGBColor(128, 128, 128));
    }
}
