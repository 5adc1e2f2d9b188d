use crate::data_loader::{DataLoader, PropertyRequest};
use crate::error::Result;
use crate::models::{DateRange, PlotContext, SummaryTable, TimeSeriesTable};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use log::{debug, warn};
use std::collections::BTreeMap;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Loads the requested properties and returns, in request order, the
/// scenarios holding every required one. Empty means nothing to plot.
pub fn request_data(loader: &mut DataLoader, requests: &[PropertyRequest]) -> Result<Vec<String>> {
    let skipped = loader.get_formatted_data(requests)?;
    let mut usable: Vec<String> = Vec::new();
    for scenario in requests.iter().flat_map(|r| r.scenarios.iter()) {
        if !skipped.contains(scenario) && !usable.contains(scenario) {
            usable.push(scenario.clone());
        }
    }
    if usable.is_empty() {
        warn!("Required data is missing for every scenario");
    }
    Ok(usable)
}

/// Cross-section of a loaded property for one aggregation unit. Absent
/// property or unit both read as "no data here".
pub fn zone_slice(
    loader: &DataLoader,
    property: &str,
    scenario: &str,
    ctx: &PlotContext,
    zone: &str,
) -> Option<TimeSeriesTable> {
    let table = match loader.require(property, scenario) {
        Ok(table) => table,
        Err(e) => {
            debug!("{}", e);
            return None;
        }
    };
    match table.xs(&ctx.agg_by, zone) {
        Ok(slice) => Some(slice),
        Err(_) => {
            warn!("No {} data in {} for {}", property, zone, scenario);
            None
        }
    }
}

/// Time-step facts of a chronological index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalStats {
    pub step_minutes: f64,
    pub intervals_per_hour: f64,
    /// Covered hours including the last step, capped at the hours of the
    /// calendar years the index touches.
    pub duration_hours: f64,
}

impl IntervalStats {
    pub fn step_hours(&self) -> f64 {
        self.step_minutes / 60.0
    }
}

pub fn interval_stats(timestamps: &[NaiveDateTime]) -> Option<IntervalStats> {
    if timestamps.len() < 2 {
        return None;
    }
    let step = timestamps[1] - timestamps[0];
    let step_minutes = step.num_seconds() as f64 / 60.0;
    if step_minutes <= 0.0 {
        return None;
    }
    let duration = timestamps[timestamps.len() - 1] - timestamps[0] + step;
    let cap = calendar_hours(timestamps[0].year(), timestamps[timestamps.len() - 1].year());
    let duration_hours = (duration.num_seconds() as f64 / 3600.0).min(cap);

    Some(IntervalStats {
        step_minutes,
        intervals_per_hour: 60.0 / step_minutes,
        duration_hours,
    })
}

/// Hours from 1 January of `first` to 1 January after `last`; leap years
/// count 8784.
fn calendar_hours(first: i32, last: i32) -> f64 {
    match (NaiveDate::from_ymd_opt(first, 1, 1), NaiveDate::from_ymd_opt(last + 1, 1, 1)) {
        (Some(start), Some(end)) => (end - start).num_hours() as f64,
        _ => 8760.0 * f64::from(last - first + 1),
    }
}

pub fn unix_seconds(ts: NaiveDateTime) -> f64 {
    ts.and_utc().timestamp() as f64
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Timestamp × technology pivot: technologies renamed through the gen-names
/// mapping, generators summed, columns in the canonical order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechFrame {
    timestamps: Vec<NaiveDateTime>,
    techs: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl TechFrame {
    pub fn from_table(table: &TimeSeriesTable, ctx: &PlotContext) -> Self {
        let Some(tech_idx) = table.level_index("tech") else {
            return Self::default();
        };

        let mut techs: Vec<String> = Vec::new();
        let mut cells: BTreeMap<NaiveDateTime, Vec<(usize, f64)>> = BTreeMap::new();
        for row in table.rows() {
            let tech = ctx.rename_tech(&row.keys[tech_idx]);
            let col = match techs.iter().position(|t| *t == tech) {
                Some(c) => c,
                None => {
                    techs.push(tech);
                    techs.len() - 1
                }
            };
            cells.entry(row.timestamp).or_default().push((col, row.value));
        }

        let mut order: Vec<usize> = (0..techs.len()).collect();
        order.sort_by_key(|&c| ctx.tech_rank(&techs[c]));
        let mut position = vec![0; techs.len()];
        for (new, &old) in order.iter().enumerate() {
            position[old] = new;
        }

        let mut timestamps = Vec::with_capacity(cells.len());
        let mut values = Vec::with_capacity(cells.len());
        for (ts, entries) in cells {
            let mut row = vec![0.0; techs.len()];
            for (col, v) in entries {
                row[position[col]] += v;
            }
            timestamps.push(ts);
            values.push(row);
        }

        Self {
            timestamps,
            techs: order.iter().map(|&c| techs[c].clone()).collect(),
            values,
        }
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn techs(&self) -> &[String] {
        &self.techs
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty() || self.techs.is_empty()
    }

    pub fn row(&self, idx: usize) -> &[f64] {
        &self.values[idx]
    }

    pub fn column(&self, tech: &str) -> Option<Vec<f64>> {
        let c = self.techs.iter().position(|t| t == tech)?;
        Some(self.values.iter().map(|row| row[c]).collect())
    }

    /// Appends a column aligned on this frame's timestamps; timestamps absent
    /// from `series` get 0.
    pub fn insert_column(&mut self, name: &str, series: &BTreeMap<NaiveDateTime, f64>) {
        self.techs.push(name.to_string());
        for (ts, row) in self.timestamps.iter().zip(self.values.iter_mut()) {
            row.push(series.get(ts).copied().unwrap_or(0.0));
        }
    }

    /// Per-timestamp sum of every column not named in `excluded`.
    pub fn row_sums_excluding(&self, excluded: &[String]) -> Vec<f64> {
        let keep: Vec<bool> = self.techs.iter().map(|t| !excluded.contains(t)).collect();
        self.values
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&keep)
                    .filter(|(_, k)| **k)
                    .map(|(v, _)| *v)
                    .sum()
            })
            .collect()
    }

    pub fn drop_zero_columns(&mut self) {
        let keep: Vec<bool> = (0..self.techs.len())
            .map(|c| self.values.iter().any(|row| row[c] != 0.0))
            .collect();
        self.techs = self
            .techs
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(t, _)| t.clone())
            .collect();
        for row in &mut self.values {
            *row = row
                .iter()
                .zip(&keep)
                .filter(|(_, k)| **k)
                .map(|(v, _)| *v)
                .collect();
        }
    }

    pub fn between(&self, range: &DateRange) -> TechFrame {
        let (timestamps, values) = self
            .timestamps
            .iter()
            .zip(&self.values)
            .filter(|(ts, _)| range.contains(**ts))
            .map(|(ts, row)| (*ts, row.clone()))
            .unzip();
        TechFrame {
            timestamps,
            techs: self.techs.clone(),
            values,
        }
    }

    pub fn max_value(&self) -> f64 {
        self.values
            .iter()
            .flatten()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn to_summary(&self) -> SummaryTable {
        let mut table = SummaryTable::new("timestamp");
        table.columns = self.techs.clone();
        table.index = self.timestamps.iter().map(|ts| format_timestamp(*ts)).collect();
        table.values = self.values.clone();
        table
    }
}

/// Inclusive window of `days_before`/`days_after` around `centre`, as a
/// half-open range.
pub fn window_around(centre: NaiveDateTime, days_before: f64, days_after: f64) -> DateRange {
    let before = chrono::Duration::seconds((days_before * 86_400.0) as i64);
    let after = chrono::Duration::seconds((days_after * 86_400.0) as i64 + 1);
    DateRange::new(Some(centre - before), Some(centre + after))
}

/// Filters a timestamp-keyed series through an optional range.
pub fn series_between(
    series: &BTreeMap<NaiveDateTime, f64>,
    range: Option<&DateRange>,
) -> BTreeMap<NaiveDateTime, f64> {
    match range {
        Some(r) => series
            .iter()
            .filter(|(ts, _)| r.contains(**ts))
            .map(|(ts, v)| (*ts, *v))
            .collect(),
        None => series.clone(),
    }
}

/// Facet-axis labels for panel `idx`: the x label on the bottom row, the y
/// label on the first column.
pub fn facet_labels(ctx: &PlotContext, idx: usize, grid: (usize, usize)) -> (String, String) {
    let (rows, cols) = grid;
    let row = idx / cols;
    let col = idx % cols;
    let x = if row + 1 == rows {
        ctx.xlabels.get(col).map(|l| l.replace('_', " ")).unwrap_or_default()
    } else {
        String::new()
    };
    let y = if col == 0 {
        ctx.ylabels.get(row).cloned().unwrap_or_default()
    } else {
        String::new()
    };
    (x, y)
}

/// Capacity-weighted mean; equal weights when the weights sum to zero.
/// Non-finite values are left out.
pub fn weighted_average(values: &[f64], weights: &[f64]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = values
        .iter()
        .zip(weights)
        .filter(|(v, _)| v.is_finite())
        .map(|(v, w)| (*v, *w))
        .collect();
    if pairs.is_empty() {
        return None;
    }
    let total_weight: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total_weight == 0.0 {
        return Some(pairs.iter().map(|(v, _)| v).sum::<f64>() / pairs.len() as f64);
    }
    Some(pairs.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight)
}
