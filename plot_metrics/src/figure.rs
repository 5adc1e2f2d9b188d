//! Chart descriptions returned by the calculators. Nothing here draws; the
//! binary turns a [`FigureData`] into an image and a [`DataTable`] into CSV.

use crate::models::SummaryTable;

/// How a series picks its colour and marker.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesStyle {
    /// Colour from the technology colour dictionary.
    Technology(String),
    /// Nth entry of the scenario palette, with the Nth marker.
    Scenario(usize),
    /// Fixed red used for unserved energy.
    Unserved,
    /// Palette colour without a legend-worthy identity (one line per element).
    Plain(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisFormat {
    Percent,
    Number { decimals: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarGroup {
    pub label: String,
    pub style: SeriesStyle,
    pub values: Vec<f64>,
}

/// Grouped bars: one cluster per category, one bar per group.
#[derive(Debug, Clone, PartialEq)]
pub struct BarChart {
    pub categories: Vec<String>,
    pub groups: Vec<BarGroup>,
    pub y_label: String,
    pub y_format: AxisFormat,
}

impl BarChart {
    /// Bars from a summary table whose rows are categories and columns are
    /// groups, coloured by the scenario palette.
    pub fn from_table(table: &SummaryTable, y_label: &str, y_format: AxisFormat) -> Self {
        let groups = table
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| BarGroup {
                label: column.replace('_', " "),
                style: SeriesStyle::Scenario(idx),
                values: table
                    .values
                    .iter()
                    .map(|row| if row[idx].is_nan() { 0.0 } else { row[idx] })
                    .collect(),
            })
            .collect();

        Self {
            categories: table.index.clone(),
            groups,
            y_label: y_label.to_string(),
            y_format,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScatterPoint {
    pub label: String,
    pub style: SeriesStyle,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScatterChart {
    pub points: Vec<ScatterPoint>,
    pub x_label: String,
    pub y_label: String,
}

/// One line in a panel. For time axes x is unix seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub label: String,
    pub style: SeriesStyle,
    pub points: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Panel {
    pub title: String,
    pub traces: Vec<Trace>,
    pub x_label: String,
    pub y_label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XAxis {
    Numeric,
    Time { timezone: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineChart {
    pub panels: Vec<Panel>,
    pub x_axis: XAxis,
    pub y_label: String,
    /// (rows, cols) of the panel grid.
    pub grid: (usize, usize),
    pub y_range: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramPanel {
    pub title: String,
    pub y_label: String,
    pub counts: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramChart {
    pub panels: Vec<HistogramPanel>,
    pub range: (f64, f64),
    pub x_label: String,
}

/// Counts `values` into `bins` equal-width bins over `range`, the top edge
/// inclusive. Non-finite and out-of-range values are ignored.
pub fn histogram(values: &[f64], bins: usize, range: (f64, f64)) -> Vec<usize> {
    let mut counts = vec![0; bins];
    let (lo, hi) = range;
    if bins == 0 || hi <= lo {
        return counts;
    }
    let width = (hi - lo) / bins as f64;
    for &v in values {
        if !v.is_finite() || v < lo || v > hi {
            continue;
        }
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    counts
}

#[derive(Debug, Clone, PartialEq)]
pub enum FigureData {
    Bar(BarChart),
    Scatter(ScatterChart),
    Line(LineChart),
    Histogram(HistogramChart),
}

/// Tabular companion of a figure.
#[derive(Debug, Clone, PartialEq)]
pub enum DataTable {
    Single(SummaryTable),
    /// One table per scenario, written into a sub-directory.
    Faceted(Vec<(String, SummaryTable)>),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotResult {
    pub figure: FigureData,
    pub title: String,
    pub data_table: DataTable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneOutput {
    Figure(PlotResult),
    MissingZoneData,
}

/// Outcome of one (module, method) call.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodOutput {
    Zones(Vec<(String, ZoneOutput)>),
    MissingInputData,
    UnsupportedMethod,
}

impl MethodOutput {
    pub fn zone(&self, zone: &str) -> Option<&ZoneOutput> {
        match self {
            MethodOutput::Zones(zones) => zones.iter().find(|(z, _)| z == zone).map(|(_, o)| o),
            _ => None,
        }
    }
}
