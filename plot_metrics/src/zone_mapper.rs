use crate::error::{PlotError, Result};
use polars::prelude::*;
use std::collections::HashMap;
use std::path::Path;

/// Region → aggregation-unit lookup loaded from the user's region mapping
/// CSV (a `region` column plus one column per aggregation such as
/// `Interconnect` or `Country`).
#[derive(Debug, Clone, Default)]
pub struct RegionMapping {
    columns: Vec<String>,
    regions: Vec<String>,
    mappings: HashMap<String, HashMap<String, String>>,
}

impl RegionMapping {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_csv(path: &Path) -> Result<Self> {
        let df = CsvReader::from_path(path)?.has_header(true).finish()?;

        let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        if !names.iter().any(|n| n == "region") {
            return Err(PlotError::Parse {
                path: path.to_path_buf(),
                what: "a region column",
                value: names.join(","),
            });
        }

        let region_series = df.column("region")?.cast(&DataType::Utf8)?;
        let regions = region_series.utf8()?;

        let mut mapping = RegionMapping::empty();
        for column in names.iter().filter(|n| n.as_str() != "region") {
            let series = df.column(column)?.cast(&DataType::Utf8)?;
            let values = series.utf8()?;
            mapping.columns.push(column.clone());

            for idx in 0..df.height() {
                if let (Some(region), Some(value)) = (regions.get(idx), values.get(idx)) {
                    mapping.add_mapping(region.trim(), column, value.trim());
                }
            }
        }

        Ok(mapping)
    }

    pub fn add_mapping(&mut self, region: &str, column: &str, value: &str) {
        if !self.columns.iter().any(|c| c == column) {
            self.columns.push(column.to_string());
        }
        if !self.mappings.contains_key(region) {
            self.regions.push(region.to_string());
        }
        self.mappings
            .entry(region.to_string())
            .or_default()
            .insert(column.to_string(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn lookup(&self, region: &str, column: &str) -> Option<&str> {
        self.mappings
            .get(region)
            .and_then(|m| m.get(column))
            .map(String::as_str)
    }

    /// Full region → unit map for one aggregation column.
    pub fn region_to(&self, column: &str) -> HashMap<String, String> {
        self.mappings
            .iter()
            .filter_map(|(region, m)| m.get(column).map(|v| (region.clone(), v.clone())))
            .collect()
    }

    /// Distinct aggregation units reached from `regions`, in region order.
    /// Regions absent from the mapping are left out (left join semantics).
    pub fn aggregation_units(&self, regions: &[String], column: &str) -> Vec<String> {
        let mut units: Vec<String> = Vec::new();
        for region in regions {
            if let Some(unit) = self.lookup(region, column) {
                if !units.iter().any(|u| u == unit) {
                    units.push(unit.to_string());
                }
            }
        }
        units
    }
}
