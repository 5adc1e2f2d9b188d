//! Draws [`FigureData`] with plotters. PNG goes through the bitmap backend,
//! SVG through the SVG backend; the drawing code is shared.

use crate::styles::{Marker, Styles, SCENARIO_PALETTE};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use plot_metrics::figure::{
    AxisFormat, BarChart, FigureData, HistogramChart, LineChart, Panel, ScatterChart, SeriesStyle, XAxis,
};
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;

const PANEL_SIZE: (u32, u32) = (900, 600);
const HISTOGRAM_PANEL_HEIGHT: u32 = 350;

pub fn figure_size(figure: &FigureData) -> (u32, u32) {
    match figure {
        FigureData::Line(chart) => {
            let (rows, cols) = chart.grid;
            (PANEL_SIZE.0 * cols.max(1) as u32, PANEL_SIZE.1 * rows.max(1) as u32)
        }
        FigureData::Histogram(chart) => {
            (PANEL_SIZE.0, HISTOGRAM_PANEL_HEIGHT * chart.panels.len().max(1) as u32)
        }
        _ => PANEL_SIZE,
    }
}

/// Renders `figure` to `path`; the extension picks the backend.
pub fn render(figure: &FigureData, title: &str, path: &Path, styles: &Styles) -> Result<()> {
    let size = figure_size(figure);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("svg") => {
            let root = SVGBackend::new(path, size).into_drawing_area();
            draw(&root, figure, title, styles)?;
            root.present()?;
        }
        Some("png") | Some("jpg") | Some("jpeg") | Some("bmp") => {
            let root = BitMapBackend::new(path, size).into_drawing_area();
            draw(&root, figure, title, styles)?;
            root.present()?;
        }
        other => bail!("unsupported figure format {:?} for {}", other, path.display()),
    }
    Ok(())
}

fn draw<DB>(root: &DrawingArea<DB, Shift>, figure: &FigureData, title: &str, styles: &Styles) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    match figure {
        FigureData::Bar(chart) => draw_bar(root, chart, title, styles),
        FigureData::Scatter(chart) => draw_scatter(root, chart, title, styles),
        FigureData::Line(chart) => draw_lines(root, chart, title, styles),
        FigureData::Histogram(chart) => draw_histogram(root, chart, title),
    }
}

/// Finite min/max of `values`, padded by 5%, never degenerate.
pub fn value_bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    if (hi - lo).abs() < f64::EPSILON {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

pub fn format_value(format: AxisFormat, value: f64) -> String {
    match format {
        AxisFormat::Percent => format!("{:.0}%", value * 100.0),
        AxisFormat::Number { decimals } => format!("{:.*}", decimals, value),
    }
}

pub fn format_time(unix_seconds: f64) -> String {
    DateTime::<Utc>::from_timestamp(unix_seconds as i64, 0)
        .map(|d| d.format("%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

/// Delegating wrapper so a key-pointed f64 axis satisfies `ValueFormatter<f64>`,
/// which `configure_mesh` requires and `WithKeyPoints` does not provide.
struct KeyPointAxis(plotters::coord::combinators::WithKeyPoints<RangedCoordf64>);

impl Ranged for KeyPointAxis {
    type ValueType = f64;
    type FormatOption = plotters::coord::ranged1d::NoDefaultFormatting;

    fn range(&self) -> std::ops::Range<f64> {
        self.0.range()
    }

    fn map(&self, value: &f64, limit: (i32, i32)) -> i32 {
        self.0.map(value, limit)
    }

    fn key_points<Hint: plotters::coord::ranged1d::KeyPointHint>(&self, hint: Hint) -> Vec<f64> {
        self.0.key_points(hint)
    }

    fn axis_pixel_range(&self, limit: (i32, i32)) -> std::ops::Range<i32> {
        self.0.axis_pixel_range(limit)
    }
}

impl plotters::coord::ranged1d::ValueFormatter<f64> for KeyPointAxis {
    fn format(value: &f64) -> String {
        <RangedCoordf64 as plotters::coord::ranged1d::ValueFormatter<f64>>::format(value)
    }
}

fn draw_bar<DB>(root: &DrawingArea<DB, Shift>, chart: &BarChart, title: &str, styles: &Styles) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let n = chart.categories.len().max(1);
    let (lo, hi) = value_bounds(chart.groups.iter().flat_map(|g| g.values.iter().copied()));
    let key_points: Vec<f64> = (0..n).map(|i| i as f64 + 0.5).collect();

    let mut builder = ChartBuilder::on(root);
    builder.margin(10).x_label_area_size(60).y_label_area_size(70);
    if !title.is_empty() {
        builder.caption(title, ("sans-serif", 30).into_font());
    }
    let mut ctx = builder.build_cartesian_2d(
        KeyPointAxis((0.0..n as f64).with_key_points(key_points)),
        lo.min(0.0)..hi.max(0.0),
    )?;

    let x_formatter = |x: &f64| {
        chart
            .categories
            .get(x.floor().max(0.0) as usize)
            .cloned()
            .unwrap_or_default()
    };
    let y_formatter = |y: &f64| format_value(chart.y_format, *y);
    ctx.configure_mesh()
        .disable_x_mesh()
        .y_desc(chart.y_label.as_str())
        .x_label_formatter(&x_formatter)
        .y_label_formatter(&y_formatter)
        .draw()?;

    let width = 0.8 / chart.groups.len().max(1) as f64;
    for (g, group) in chart.groups.iter().enumerate() {
        let colour = styles.colour(&group.style);
        ctx.draw_series(group.values.iter().enumerate().map(|(i, v)| {
            let x0 = i as f64 + 0.1 + g as f64 * width;
            Rectangle::new([(x0, 0.0), (x0 + width, *v)], colour.filled())
        }))?
        .label(group.label.clone())
        .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], colour.filled()));
    }

    ctx.configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    Ok(())
}

fn draw_scatter<DB>(
    root: &DrawingArea<DB, Shift>,
    chart: &ScatterChart,
    title: &str,
    styles: &Styles,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (x0, x1) = value_bounds(chart.points.iter().map(|p| p.x));
    let (y0, y1) = value_bounds(chart.points.iter().map(|p| p.y));

    let mut builder = ChartBuilder::on(root);
    builder.margin(10).x_label_area_size(40).y_label_area_size(70);
    if !title.is_empty() {
        builder.caption(title, ("sans-serif", 30).into_font());
    }
    let mut ctx = builder.build_cartesian_2d(x0..x1, y0..y1)?;
    ctx.configure_mesh()
        .x_desc(chart.x_label.as_str())
        .y_desc(chart.y_label.as_str())
        .draw()?;

    for point in &chart.points {
        let colour = styles.colour(&point.style);
        let at = (point.x, point.y);
        let label = point.label.clone();
        match styles.marker(&point.style) {
            Marker::Triangle => {
                ctx.draw_series(std::iter::once(TriangleMarker::new(at, 8, colour.filled())))?
                    .label(label)
                    .legend(move |c| TriangleMarker::new(c, 5, colour.filled()));
            }
            Marker::Circle => {
                ctx.draw_series(std::iter::once(Circle::new(at, 6, colour.filled())))?
                    .label(label)
                    .legend(move |c| Circle::new(c, 4, colour.filled()));
            }
            Marker::Cross => {
                ctx.draw_series(std::iter::once(Cross::new(at, 6, colour.stroke_width(2))))?
                    .label(label)
                    .legend(move |c| Cross::new(c, 4, colour.stroke_width(2)));
            }
            Marker::Square => {
                ctx.draw_series(std::iter::once(
                    EmptyElement::at(at) + Rectangle::new([(-5, -5), (5, 5)], colour.filled()),
                ))?
                .label(label)
                .legend(move |(x, y)| Rectangle::new([(x - 4, y - 4), (x + 4, y + 4)], colour.filled()));
            }
        }
    }

    ctx.configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    Ok(())
}

fn draw_lines<DB>(root: &DrawingArea<DB, Shift>, chart: &LineChart, title: &str, styles: &Styles) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let area = if title.is_empty() {
        root.clone()
    } else {
        root.titled(title, ("sans-serif", 30))?
    };

    // Panels share the y axis.
    let (y0, y1) = chart.y_range.unwrap_or_else(|| {
        value_bounds(
            chart
                .panels
                .iter()
                .flat_map(|p| p.traces.iter())
                .flat_map(|t| t.points.iter().map(|(_, y)| *y)),
        )
    });

    let areas = area.split_evenly(chart.grid);
    for (panel, cell) in chart.panels.iter().zip(areas.iter()) {
        draw_panel(cell, chart, panel, (y0, y1), styles)?;
    }
    Ok(())
}

fn draw_panel<DB>(
    area: &DrawingArea<DB, Shift>,
    chart: &LineChart,
    panel: &Panel,
    y_range: (f64, f64),
    styles: &Styles,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (x0, x1) = value_bounds(panel.traces.iter().flat_map(|t| t.points.iter().map(|(x, _)| *x)));

    let mut builder = ChartBuilder::on(area);
    builder.margin(10).x_label_area_size(40).y_label_area_size(70);
    if !panel.title.is_empty() {
        builder.caption(panel.title.as_str(), ("sans-serif", 20).into_font());
    }
    let mut ctx = builder.build_cartesian_2d(x0..x1, y_range.0..y_range.1)?;

    let x_desc = match (&chart.x_axis, panel.x_label.is_empty()) {
        (_, false) => panel.x_label.clone(),
        (XAxis::Time { timezone }, true) if !timezone.is_empty() => format!("Date ({})", timezone),
        (XAxis::Time { .. }, true) => "Date".to_string(),
        (XAxis::Numeric, true) => String::new(),
    };
    let y_desc = if panel.y_label.is_empty() {
        chart.y_label.clone()
    } else {
        panel.y_label.clone()
    };
    let x_formatter = |x: &f64| match chart.x_axis {
        XAxis::Time { .. } => format_time(*x),
        XAxis::Numeric => format!("{:.0}", x),
    };
    ctx.configure_mesh()
        .x_labels(6)
        .x_desc(x_desc)
        .y_desc(y_desc)
        .x_label_formatter(&x_formatter)
        .draw()?;

    let mut labelled = false;
    for trace in &panel.traces {
        let colour = styles.colour(&trace.style);
        let anno = ctx.draw_series(LineSeries::new(trace.points.iter().copied(), colour.stroke_width(2)))?;
        if !matches!(trace.style, SeriesStyle::Plain(_)) {
            labelled = true;
            anno.label(trace.label.clone())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], colour.stroke_width(2)));
        }
    }

    if labelled {
        ctx.configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }
    Ok(())
}

fn draw_histogram<DB>(root: &DrawingArea<DB, Shift>, chart: &HistogramChart, title: &str) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let area = if title.is_empty() {
        root.clone()
    } else {
        root.titled(title, ("sans-serif", 30))?
    };
    let (lo, hi) = chart.range;
    let areas = area.split_evenly((chart.panels.len().max(1), 1));

    for (idx, (panel, cell)) in chart.panels.iter().zip(areas.iter()).enumerate() {
        let bins = panel.counts.len().max(1);
        let width = (hi - lo) / bins as f64;
        let top = panel.counts.iter().copied().max().unwrap_or(0) as f64 + 1.0;
        let colour = SCENARIO_PALETTE[idx % SCENARIO_PALETTE.len()];

        let mut builder = ChartBuilder::on(cell);
        builder.margin(10).x_label_area_size(40).y_label_area_size(70);
        if !panel.title.is_empty() {
            builder.caption(panel.title.as_str(), ("sans-serif", 20).into_font());
        }
        let mut ctx = builder.build_cartesian_2d(lo..hi, 0.0..top)?;
        ctx.configure_mesh()
            .x_desc(chart.x_label.as_str())
            .y_desc(panel.y_label.as_str())
            .draw()?;
        ctx.draw_series(panel.counts.iter().enumerate().map(|(i, count)| {
            let x0 = lo + i as f64 * width;
            Rectangle::new([(x0, 0.0), (x0 + width, *count as f64)], colour.filled())
        }))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plot_metrics::figure::HistogramPanel;

    #[test]
    fn test_value_bounds() {
        assert_eq!(value_bounds(std::iter::empty()), (0.0, 1.0));
        assert_eq!(value_bounds([2.0, 2.0].into_iter()), (1.0, 3.0));
        let (lo, hi) = value_bounds([0.0, f64::NAN, 10.0].into_iter());
        assert!((lo + 0.5).abs() < 1e-9);
        assert!((hi - 10.5).abs() < 1e-9);
    }

    #[test]
    fn test_axis_formatting() {
        assert_eq!(format_value(AxisFormat::Percent, 0.126), "13%");
        assert_eq!(format_value(AxisFormat::Number { decimals: 1 }, 2.04), "2.0");
        assert_eq!(format_time(0.0), "01-01 00:00");
    }

    #[test]
    fn test_figure_size_follows_grid() {
        let line = FigureData::Line(LineChart {
            panels: vec![Panel::default(); 4],
            x_axis: XAxis::Numeric,
            y_label: String::new(),
            grid: (2, 2),
            y_range: None,
        });
        assert_eq!(figure_size(&line), (1800, 1200));
    }

    #[test]
    fn test_unsupported_format_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let figure = FigureData::Histogram(HistogramChart {
            panels: vec![HistogramPanel {
                title: "Base".into(),
                y_label: "Number of lines".into(),
                counts: vec![1, 0, 3],
            }],
            range: (0.0, 1.0),
            x_label: "Line Utilization".into(),
        });
        let path = dir.path().join("figure.tiff");
        assert!(render(&figure, "", &path, &Styles::default()).is_err());
        assert!(!path.exists());
    }
}
