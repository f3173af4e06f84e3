use crate::dataset::TabularDataset;
use crate::selection::{PlotType, SelectionState};
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Fixed number of bins used for histograms
pub const HISTOGRAM_BINS: u32 = 50;

/// Chart types the builder can produce
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    /// Individual (x, y) points
    Scatter,

    /// Points sorted by x and joined by a line
    Line,

    /// One box per distinct x value, summarising the y values
    Box,

    /// x split into equal bins, bar height is the sum of y in each bin
    Histogram,
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartKind::Scatter => "Scatter plot",
            ChartKind::Line => "Line plot",
            ChartKind::Box => "Box plot",
            ChartKind::Histogram => "Histogram",
        };
        f.write_str(name)
    }
}

/// Resolved description of the chart to render
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x_column: String,
    pub y_column: String,

    /// Only set for histograms
    pub bin_count: Option<u32>,
}

/// Reasons a chart cannot be built from the current selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// No column chosen for the named axis
    Unselected(&'static str),

    /// The chosen column does not exist in the dataset
    MissingField(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Unselected(axis) => write!(f, "no column selected for the {} axis", axis),
            BuildError::MissingField(name) => write!(f, "column '{}' is not in the dataset", name),
        }
    }
}

impl Error for BuildError {}

/// Result of pressing "Create Graph"
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChartOutcome {
    /// The button has never been pressed; keep whatever is on screen
    NotTriggered,

    /// Pressed, but there is nothing to draw
    Empty,

    Produced(ChartSpec),
}

/// Builds a chart description from the selection and the dataset
///
/// `boxplot`, `scatterplot` and `lineplot` map to their chart kinds. Any other
/// plot type, including none, falls back to a histogram with
/// [`HISTOGRAM_BINS`] bins. The group-by column and aggregate function are
/// accepted as part of the selection but do not change the chart.
///
/// # Arguments
/// * `selection` - Current selector values
/// * `dataset` - The stored dataset
///
/// # Returns
/// * `Result<ChartSpec, BuildError>` - The chart to render, or why it cannot be built
///
/// # Examples
/// ```
/// use sheetplot::dataset::{CellValue, TabularDataset};
/// use sheetplot::graph::{build, ChartKind};
/// use sheetplot::selection::{PlotType, SelectionState};
///
/// let dataset = TabularDataset::new(
///     vec!["a".to_string(), "b".to_string()],
///     vec![vec![CellValue::Int(1), CellValue::Int(4)]],
/// ).unwrap();
/// let selection = SelectionState {
///     plot_type: Some(PlotType::Box),
///     x_column: Some("a".to_string()),
///     y_column: Some("b".to_string()),
///     ..Default::default()
/// };
///
/// let spec = build(&selection, &dataset).unwrap();
/// assert_eq!(spec.kind, ChartKind::Box);
/// assert_eq!(spec.bin_count, None);
/// ```
pub fn build(selection: &SelectionState, dataset: &TabularDataset) -> Result<ChartSpec, BuildError> {
    let x_column = resolve_column(selection.x_column.as_deref(), "x", dataset)?;
    let y_column = resolve_column(selection.y_column.as_deref(), "y", dataset)?;

    let (kind, bin_count) = match selection.plot_type {
        Some(PlotType::Box) => (ChartKind::Box, None),
        Some(PlotType::Scatter) => (ChartKind::Scatter, None),
        Some(PlotType::Line) => (ChartKind::Line, None),
        _ => (ChartKind::Histogram, Some(HISTOGRAM_BINS)),
    };

    Ok(ChartSpec {
        kind,
        x_column,
        y_column,
        bin_count,
    })
}

fn resolve_column(
    name: Option<&str>,
    axis: &'static str,
    dataset: &TabularDataset,
) -> Result<String, BuildError> {
    let name = name.ok_or(BuildError::Unselected(axis))?;
    if dataset.has_column(name) {
        Ok(name.to_string())
    } else {
        Err(BuildError::MissingField(name.to_string()))
    }
}

/// Handles a "Create Graph" press
///
/// # Arguments
/// * `n_clicks` - How often the button was pressed, `None` if never
/// * `selection` - Current selector values
/// * `dataset` - The stored dataset, if any
///
/// # Returns
/// * `NotTriggered` before the first press, `Empty` when there is no dataset or
///   the selection cannot be built, `Produced` otherwise
pub fn make_graph(
    n_clicks: Option<u32>,
    selection: &SelectionState,
    dataset: Option<&TabularDataset>,
) -> ChartOutcome {
    if n_clicks.is_none() {
        return ChartOutcome::NotTriggered;
    }

    let Some(dataset) = dataset else {
        return ChartOutcome::Empty;
    };

    match build(selection, dataset) {
        Ok(spec) => ChartOutcome::Produced(spec),
        Err(e) => {
            log::warn!("Not drawing a chart: {}", e);
            ChartOutcome::Empty
        }
    }
}

/// Configuration options for chart rendering
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Title displayed at the top of the graph
    pub title: String,

    /// Label for the X-axis
    pub x_label: String,

    /// Label for the Y-axis
    pub y_label: String,

    /// Width of the graph in pixels
    pub width: u32,

    /// Height of the graph in pixels
    pub height: u32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            title: "Graph".to_string(),
            x_label: "X Axis".to_string(),
            y_label: "Y Axis".to_string(),
            width: 800,
            height: 600,
        }
    }
}

impl GraphOptions {
    /// Options titled after the chart kind and labelled with the column names
    pub fn for_spec(spec: &ChartSpec) -> Self {
        Self {
            title: format!("{} of {} by {}", spec.kind, spec.y_column, spec.x_column),
            x_label: spec.x_column.clone(),
            y_label: spec.y_column.clone(),
            ..Self::default()
        }
    }
}

/// Reasons a chart could not be drawn
#[derive(Debug)]
pub enum RenderError {
    MissingField(String),

    /// None of the rows hold numbers in the required columns
    NoData,

    /// The values span more than an axis can represent
    OutOfRange,

    /// The drawing backend failed
    Draw(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::MissingField(name) => write!(f, "column '{}' is not in the dataset", name),
            RenderError::NoData => f.write_str("no numeric data to plot"),
            RenderError::OutOfRange => f.write_str("values are too far apart to plot"),
            RenderError::Draw(e) => write!(f, "failed to draw chart: {}", e),
        }
    }
}

impl Error for RenderError {}

/// Draws a chart as an SVG document
///
/// Rows whose cells are not numeric are skipped. For box plots only the y
/// value has to be numeric; the x value names the box.
///
/// # Returns
/// * The SVG markup, or `RenderError::NoData` when nothing is plottable
pub fn render_svg(
    spec: &ChartSpec,
    dataset: &TabularDataset,
    options: &GraphOptions,
) -> Result<String, RenderError> {
    let mut buffer = String::new();

    let drawn = match spec.kind {
        ChartKind::Scatter => {
            let points = numeric_pairs(dataset, &spec.x_column, &spec.y_column)?;
            check_span(points.iter().map(|p| p.0))?;
            check_span(points.iter().map(|p| p.1))?;
            draw_scatter(&points, options, &mut buffer)
        }
        ChartKind::Line => {
            let mut points = numeric_pairs(dataset, &spec.x_column, &spec.y_column)?;
            check_span(points.iter().map(|p| p.0))?;
            check_span(points.iter().map(|p| p.1))?;
            points.sort_by(|a, b| a.0.total_cmp(&b.0));
            draw_line(&points, options, &mut buffer)
        }
        ChartKind::Box => {
            let groups = grouped_values(dataset, &spec.x_column, &spec.y_column)?;
            check_span(groups.iter().flat_map(|(_, values)| values.iter().copied()))?;
            draw_box(&groups, options, &mut buffer)
        }
        ChartKind::Histogram => {
            let points = numeric_pairs(dataset, &spec.x_column, &spec.y_column)?;
            let bins = histogram_bins(&points, spec.bin_count.unwrap_or(HISTOGRAM_BINS));
            if bins.is_empty() {
                return Err(RenderError::NoData);
            }
            check_span(bins.iter().flat_map(|b| [b.start, b.end]))?;
            check_span(bins.iter().map(|b| b.total).chain(std::iter::once(0.0)))?;
            draw_histogram(&bins, options, &mut buffer)
        }
    };

    drawn.map_err(|e| RenderError::Draw(e.to_string()))?;
    Ok(buffer)
}

/// Rows where both columns hold numbers, as (x, y)
fn numeric_pairs(
    dataset: &TabularDataset,
    x_column: &str,
    y_column: &str,
) -> Result<Vec<(f64, f64)>, RenderError> {
    let xi = column_index(dataset, x_column)?;
    let yi = column_index(dataset, y_column)?;

    let points: Vec<(f64, f64)> = dataset
        .rows()
        .iter()
        .filter_map(|row| Some((row[xi].as_f64()?, row[yi].as_f64()?)))
        .collect();

    if points.is_empty() {
        return Err(RenderError::NoData);
    }
    Ok(points)
}

/// Numeric y values grouped by the text of x, groups in order of first appearance
fn grouped_values(
    dataset: &TabularDataset,
    x_column: &str,
    y_column: &str,
) -> Result<Vec<(String, Vec<f64>)>, RenderError> {
    let xi = column_index(dataset, x_column)?;
    let yi = column_index(dataset, y_column)?;

    let mut groups: Vec<(String, Vec<f64>)> = Vec::new();
    for row in dataset.rows() {
        let Some(y) = row[yi].as_f64() else {
            continue;
        };
        let key = row[xi].to_string();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(y),
            None => groups.push((key, vec![y])),
        }
    }

    if groups.is_empty() {
        return Err(RenderError::NoData);
    }
    Ok(groups)
}

fn column_index(dataset: &TabularDataset, name: &str) -> Result<usize, RenderError> {
    dataset
        .column_index(name)
        .ok_or_else(|| RenderError::MissingField(name.to_string()))
}

/// One histogram bar: lower edge, upper edge and summed height
#[derive(Clone, Debug, PartialEq)]
pub struct Bin {
    pub start: f64,
    pub end: f64,
    pub total: f64,
}

/// Splits the x range into `count` equal bins and sums y per bin
///
/// The last bin is closed on the right so the maximum lands in it. A
/// single distinct x value gets a unit-wide range centred on it. Edges are
/// interpolated between the extremes, so ranges wider than `f64::MAX` still
/// give finite bins. Returns no bins when the input is empty or not finite.
pub fn histogram_bins(points: &[(f64, f64)], count: u32) -> Vec<Bin> {
    let count = count.max(1) as usize;
    if points.is_empty() {
        return Vec::new();
    }

    let (mut lo, mut hi) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(x, _)| {
            (lo.min(x), hi.max(x))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return Vec::new();
    }
    if hi == lo {
        lo -= 0.5;
        hi += 0.5;
    }

    let n = count as f64;
    let width = hi / n - lo / n;
    if !width.is_finite() || width <= 0.0 {
        return Vec::new();
    }
    let edge = |i: usize| {
        let t = i as f64 / n;
        lo * (1.0 - t) + hi * t
    };

    let mut bins: Vec<Bin> = (0..count)
        .map(|i| Bin {
            start: edge(i),
            end: edge(i + 1),
            total: 0.0,
        })
        .collect();

    for &(x, y) in points {
        let offset = (x / width - lo / width).floor();
        let index = if offset > 0.0 { offset as usize } else { 0 };
        bins[index.min(count - 1)].total += y;
    }

    bins
}

fn padded_range(values: impl Iterator<Item = f64>) -> std::ops::Range<f64> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return 0.0..1.0;
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
    (lo - pad)..(hi + pad)
}

/// Fails when the padded axis over `values` would not have a finite length
fn check_span(values: impl Iterator<Item = f64>) -> Result<(), RenderError> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if lo <= hi && !((hi - lo) * 1.2).is_finite() {
        return Err(RenderError::OutOfRange);
    }
    Ok(())
}

fn draw_scatter(
    points: &[(f64, f64)],
    options: &GraphOptions,
    buffer: &mut String,
) -> Result<(), Box<dyn Error>> {
    let root = SVGBackend::with_string(buffer, (options.width, options.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let x_range = padded_range(points.iter().map(|p| p.0));
    let y_range = padded_range(points.iter().map(|p| p.1));

    let mut chart = ChartBuilder::on(&root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc(&options.x_label)
        .y_desc(&options.y_label)
        .draw()?;

    chart.draw_series(
        points
            .iter()
            .map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())),
    )?;

    root.present()?;
    Ok(())
}

fn draw_line(
    points: &[(f64, f64)],
    options: &GraphOptions,
    buffer: &mut String,
) -> Result<(), Box<dyn Error>> {
    let root = SVGBackend::with_string(buffer, (options.width, options.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let x_range = padded_range(points.iter().map(|p| p.0));
    let y_range = padded_range(points.iter().map(|p| p.1));

    let mut chart = ChartBuilder::on(&root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc(&options.x_label)
        .y_desc(&options.y_label)
        .draw()?;

    chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;

    root.present()?;
    Ok(())
}

fn draw_box(
    groups: &[(String, Vec<f64>)],
    options: &GraphOptions,
    buffer: &mut String,
) -> Result<(), Box<dyn Error>> {
    let root = SVGBackend::with_string(buffer, (options.width, options.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let range = padded_range(groups.iter().flat_map(|(_, values)| values.iter().copied()));
    let y_range = range.start as f32..range.end as f32;
    let labels: Vec<&str> = groups.iter().map(|(k, _)| k.as_str()).collect();

    let mut chart = ChartBuilder::on(&root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d((0..groups.len() as i32).into_segmented(), y_range)?;

    chart
        .configure_mesh()
        .x_desc(&options.x_label)
        .y_desc(&options.y_label)
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => labels
                .get(*i as usize)
                .map(|l| l.to_string())
                .unwrap_or_default(),
            SegmentValue::Last => String::new(),
        })
        .draw()?;

    chart.draw_series(groups.iter().enumerate().map(|(i, (_, values))| {
        Boxplot::new_vertical(SegmentValue::CenterOf(i as i32), &Quartiles::new(values.as_slice()))
            .style(BLUE)
    }))?;

    root.present()?;
    Ok(())
}

fn draw_histogram(
    bins: &[Bin],
    options: &GraphOptions,
    buffer: &mut String,
) -> Result<(), Box<dyn Error>> {
    let root = SVGBackend::with_string(buffer, (options.width, options.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let x_start = bins.first().map(|b| b.start).unwrap_or(0.0);
    let x_end = bins.last().map(|b| b.end).unwrap_or(1.0);
    // bars start at zero, so zero is always in view
    let y_range = padded_range(bins.iter().map(|b| b.total).chain(std::iter::once(0.0)));

    let mut chart = ChartBuilder::on(&root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x_start..x_end, y_range)?;

    chart
        .configure_mesh()
        .x_desc(&options.x_label)
        .y_desc(&options.y_label)
        .draw()?;

    chart.draw_series(
        bins.iter()
            .map(|b| Rectangle::new([(b.start, 0.0), (b.end, b.total)], BLUE.mix(0.6).filled())),
    )?;

    root.present()?;
    Ok(())
}
