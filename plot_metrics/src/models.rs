use crate::error::{PlotError, Result};
use crate::zone_mapper::RegionMapping;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};

/// One observation of a property: a timestamp, the string index keys in the
/// order of the owning table's levels, and the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: NaiveDateTime,
    pub keys: Vec<String>,
    pub value: f64,
}

/// Time series extract for one (scenario, property), indexed by timestamp
/// plus any number of named string levels (gen_name, tech, region, zone...).
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesTable {
    property: String,
    levels: Vec<String>,
    rows: Vec<Row>,
}

impl TimeSeriesTable {
    pub fn new(property: impl Into<String>, levels: Vec<String>) -> Self {
        Self {
            property: property.into(),
            levels,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, timestamp: NaiveDateTime, keys: Vec<String>, value: f64) {
        debug_assert_eq!(keys.len(), self.levels.len());
        self.rows.push(Row {
            timestamp,
            keys,
            value,
        });
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_level(&self, level: &str) -> bool {
        self.level_index(level).is_some()
    }

    pub fn level_index(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }

    /// Cross-section: keep the rows whose `level` equals `key` and drop that
    /// level from the index.
    pub fn xs(&self, level: &str, key: &str) -> Result<TimeSeriesTable> {
        let idx = self.level_index(level).ok_or_else(|| PlotError::KeyNotFound {
            level: level.to_string(),
            key: key.to_string(),
        })?;

        let mut levels = self.levels.clone();
        levels.remove(idx);

        let rows: Vec<Row> = self
            .rows
            .iter()
            .filter(|r| r.keys[idx] == key)
            .map(|r| {
                let mut keys = r.keys.clone();
                keys.remove(idx);
                Row {
                    timestamp: r.timestamp,
                    keys,
                    value: r.value,
                }
            })
            .collect();

        if rows.is_empty() {
            return Err(PlotError::KeyNotFound {
                level: level.to_string(),
                key: key.to_string(),
            });
        }

        Ok(TimeSeriesTable {
            property: self.property.clone(),
            levels,
            rows,
        })
    }

    pub fn filter<F>(&self, predicate: F) -> TimeSeriesTable
    where
        F: Fn(&Row) -> bool,
    {
        TimeSeriesTable {
            property: self.property.clone(),
            levels: self.levels.clone(),
            rows: self.rows.iter().filter(|r| predicate(*r)).cloned().collect(),
        }
    }

    pub fn between(&self, range: &DateRange) -> TimeSeriesTable {
        self.filter(|r| range.contains(r.timestamp))
    }

    /// Rewrites every key of `level` through `f`.
    pub fn map_level<F>(&self, level: &str, f: F) -> TimeSeriesTable
    where
        F: Fn(&str) -> String,
    {
        let mut out = self.clone();
        if let Some(idx) = self.level_index(level) {
            for row in &mut out.rows {
                row.keys[idx] = f(&row.keys[idx]);
            }
        }
        out
    }

    /// Appends `new_level`, looked up from `source_level` through `mapping`.
    /// Unmapped keys become empty strings so they never match a cross-section.
    pub fn with_mapped_level(
        &self,
        source_level: &str,
        new_level: &str,
        mapping: &HashMap<String, String>,
    ) -> TimeSeriesTable {
        let Some(idx) = self.level_index(source_level) else {
            return self.clone();
        };
        if self.has_level(new_level) {
            return self.clone();
        }

        let mut levels = self.levels.clone();
        levels.push(new_level.to_string());
        let rows = self
            .rows
            .iter()
            .map(|r| {
                let mut keys = r.keys.clone();
                keys.push(mapping.get(&r.keys[idx]).cloned().unwrap_or_default());
                Row {
                    timestamp: r.timestamp,
                    keys,
                    value: r.value,
                }
            })
            .collect();

        TimeSeriesTable {
            property: self.property.clone(),
            levels,
            rows,
        }
    }

    /// Sorted, de-duplicated timestamps.
    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        let mut ts: Vec<NaiveDateTime> = self.rows.iter().map(|r| r.timestamp).collect();
        ts.sort();
        ts.dedup();
        ts
    }

    pub fn sum(&self) -> f64 {
        self.rows.iter().map(|r| r.value).sum()
    }

    pub fn sum_by_timestamp(&self) -> BTreeMap<NaiveDateTime, f64> {
        let mut out = BTreeMap::new();
        for row in &self.rows {
            *out.entry(row.timestamp).or_insert(0.0) += row.value;
        }
        out
    }

    /// Distinct keys of `level` in first-seen order.
    pub fn unique_keys(&self, level: &str) -> Vec<String> {
        let Some(idx) = self.level_index(level) else {
            return Vec::new();
        };
        let mut seen = Vec::new();
        for row in &self.rows {
            if !seen.contains(&row.keys[idx]) {
                seen.push(row.keys[idx].clone());
            }
        }
        seen
    }

    /// Chronological (timestamp, value) series per key of `level`, with values
    /// sharing a timestamp summed.
    pub fn series_by(&self, level: &str) -> BTreeMap<String, Vec<(NaiveDateTime, f64)>> {
        let mut grouped: BTreeMap<String, BTreeMap<NaiveDateTime, f64>> = BTreeMap::new();
        if let Some(idx) = self.level_index(level) {
            for row in &self.rows {
                *grouped
                    .entry(row.keys[idx].clone())
                    .or_default()
                    .entry(row.timestamp)
                    .or_insert(0.0) += row.value;
            }
        }
        grouped
            .into_iter()
            .map(|(key, series)| (key, series.into_iter().collect()))
            .collect()
    }
}

/// Half-open timestamp window. A bound given as a bare date on the end side
/// covers that whole day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        Self { start, end }
    }

    pub fn parse(start: Option<&str>, end: Option<&str>) -> Option<Self> {
        let start = start.and_then(|s| parse_bound(s, false));
        let end = end.and_then(|s| parse_bound(s, true));
        if start.is_none() && end.is_none() {
            None
        } else {
            Some(Self { start, end })
        }
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts < e)
    }
}

fn parse_bound(value: &str, is_end: bool) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("nan") {
        return None;
    }
    if let Some(ts) = parse_timestamp(value) {
        if value.len() > 10 {
            return Some(if is_end { ts + Duration::seconds(1) } else { ts });
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            let date = if is_end { date.succ_opt()? } else { date };
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Parses the timestamp layouts written by the processing step (space or `T`
/// separated, optional fractional seconds) and bare dates.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M",
        "%m/%d/%Y %H:%M:%S",
    ] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupBy {
    #[default]
    Scenario,
    YearScenario,
}

impl GroupBy {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("Year-Scenario") => GroupBy::YearScenario,
            _ => GroupBy::Scenario,
        }
    }

    /// Bar-group label for an observation of `scenario` at `ts`.
    pub fn label(&self, ts: NaiveDateTime, scenario: &str) -> String {
        match self {
            GroupBy::Scenario => scenario.to_string(),
            GroupBy::YearScenario => format!("{}_{}", ts.year(), scenario),
        }
    }
}

/// Per-row arguments from the plot-select table.
#[derive(Debug, Clone, Default)]
pub struct PlotArgs {
    pub prop: Option<String>,
    pub days_before: f64,
    pub days_after: f64,
    pub timezone: String,
    pub date_range: Option<DateRange>,
    pub groupby: GroupBy,
    pub facet: bool,
}

impl PlotArgs {
    pub fn prop_is(&self, value: &str) -> bool {
        self.prop.as_deref().map(str::trim) == Some(value)
    }

    /// Date window applied when the row asks for a "Date Range" plot.
    pub fn requested_range(&self) -> Option<&DateRange> {
        if self.prop_is("Date Range") {
            self.date_range.as_ref()
        } else {
            None
        }
    }
}

/// Immutable run context shared by every calculator.
#[derive(Debug, Clone, Default)]
pub struct PlotContext {
    pub agg_by: String,
    pub zones: Vec<String>,
    pub scenarios: Vec<String>,
    pub ordered_gen: Vec<String>,
    pub gen_names: HashMap<String, String>,
    pub pv_gen_cat: Vec<String>,
    pub re_gen_cat: Vec<String>,
    pub vre_gen_cat: Vec<String>,
    pub thermal_gen_cat: Vec<String>,
    pub region_mapping: RegionMapping,
    pub xlabels: Vec<String>,
    pub ylabels: Vec<String>,
}

impl PlotContext {
    pub fn rename_tech(&self, tech: &str) -> String {
        self.gen_names
            .get(tech)
            .cloned()
            .unwrap_or_else(|| tech.to_string())
    }

    /// Position in the canonical ordering; unknown technologies sort last.
    pub fn tech_rank(&self, tech: &str) -> usize {
        self.ordered_gen
            .iter()
            .position(|t| t == tech)
            .unwrap_or(self.ordered_gen.len())
    }

    /// Property class for zone- or region-level extracts.
    pub fn agg_class(&self) -> &'static str {
        if self.agg_by == "zone" {
            "zone"
        } else {
            "region"
        }
    }

    /// Facet grid as (rows, cols), grown by rows when it cannot hold every
    /// panel.
    pub fn facet_grid(&self, panels: usize) -> (usize, usize) {
        let cols = self.xlabels.len().max(1);
        let mut rows = self.ylabels.len().max(1);
        while rows * cols < panels {
            rows += 1;
        }
        (rows, cols)
    }
}

/// Summary artifact handed to the renderer: labelled rows and columns of
/// scalars, NaN where a cell has no value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryTable {
    pub index_name: String,
    pub index: Vec<String>,
    pub columns: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl SummaryTable {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty() || self.columns.is_empty()
    }

    fn row_position(&mut self, row: &str) -> usize {
        match self.index.iter().position(|r| r == row) {
            Some(pos) => pos,
            None => {
                self.index.push(row.to_string());
                self.values.push(vec![f64::NAN; self.columns.len()]);
                self.index.len() - 1
            }
        }
    }

    fn column_position(&mut self, column: &str) -> usize {
        match self.columns.iter().position(|c| c == column) {
            Some(pos) => pos,
            None => {
                self.columns.push(column.to_string());
                for row in &mut self.values {
                    row.push(f64::NAN);
                }
                self.columns.len() - 1
            }
        }
    }

    pub fn set(&mut self, row: &str, column: &str, value: f64) {
        let r = self.row_position(row);
        let c = self.column_position(column);
        self.values[r][c] = value;
    }

    pub fn add_row(&mut self, row: &str) {
        self.row_position(row);
    }

    pub fn get(&self, row: &str, column: &str) -> Option<f64> {
        let r = self.index.iter().position(|x| x == row)?;
        let c = self.columns.iter().position(|x| x == column)?;
        Some(self.values[r][c])
    }

    pub fn column(&self, column: &str) -> Option<Vec<f64>> {
        let c = self.columns.iter().position(|x| x == column)?;
        Some(self.values.iter().map(|row| row[c]).collect())
    }

    pub fn fill_nan(&mut self, value: f64) {
        for v in self.values.iter_mut().flatten() {
            if v.is_nan() {
                *v = value;
            }
        }
    }

    pub fn sort_columns_by_key<K, F>(&mut self, key: F)
    where
        K: Ord,
        F: Fn(&str) -> K,
    {
        let mut order: Vec<usize> = (0..self.columns.len()).collect();
        order.sort_by_key(|&i| key(&self.columns[i]));
        self.columns = order.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.values {
            *row = order.iter().map(|&i| row[i]).collect();
        }
    }

    pub fn transpose(&self, index_name: impl Into<String>) -> SummaryTable {
        let values = (0..self.columns.len())
            .map(|c| self.values.iter().map(|row| row[c]).collect())
            .collect();
        SummaryTable {
            index_name: index_name.into(),
            index: self.columns.clone(),
            columns: self.index.clone(),
            values,
        }
    }

    pub fn max_value(&self) -> f64 {
        self.values
            .iter()
            .flatten()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn scale(&mut self, divisor: f64) {
        for v in self.values.iter_mut().flatten() {
            *v /= divisor;
        }
    }

    pub fn add_suffix(&mut self, suffix: &str) {
        for c in &mut self.columns {
            c.push_str(suffix);
        }
    }

    /// True when no cell carries a nonzero finite value.
    pub fn is_all_zero(&self) -> bool {
        self.values
            .iter()
            .flatten()
            .all(|v| !v.is_finite() || *v == 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    pub units: &'static str,
    pub divisor: f64,
}

/// Picks a display unit for capacity/energy values from their peak (in MW).
pub fn capacity_energy_unitconversion(max_value: f64) -> UnitConversion {
    if max_value < 1.0 {
        UnitConversion {
            units: "kW",
            divisor: 0.001,
        }
    } else if max_value < 1000.0 {
        UnitConversion {
            units: "MW",
            divisor: 1.0,
        }
    } else if max_value >= 1_000_000.0 {
        UnitConversion {
            units: "TW",
            divisor: 1_000_000.0,
        }
    } else {
        UnitConversion {
            units: "GW",
            divisor: 1000.0,
        }
    }
}
