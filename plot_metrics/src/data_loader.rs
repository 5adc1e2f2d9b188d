use crate::error::{PlotError, Result};
use crate::models::{parse_timestamp, TimeSeriesTable};
use crate::zone_mapper::RegionMapping;
use glob::glob;
use log::{debug, info, warn};
use polars::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Folder inside each scenario directory holding the processed extracts.
pub const PROCESSED_FOLDER: &str = "Processed_HDF5_folder";

/// One property a plot needs: whether its absence aborts the plot, the
/// property name and the scenarios it is needed for.
#[derive(Debug, Clone)]
pub struct PropertyRequest {
    pub required: bool,
    pub property: String,
    pub scenarios: Vec<String>,
}

impl PropertyRequest {
    pub fn required(property: &str, scenarios: &[String]) -> Self {
        Self {
            required: true,
            property: property.to_string(),
            scenarios: scenarios.to_vec(),
        }
    }

    pub fn optional(property: &str, scenarios: &[String]) -> Self {
        Self {
            required: false,
            property: property.to_string(),
            scenarios: scenarios.to_vec(),
        }
    }
}

/// Reads per-scenario property extracts from the processed store and keeps
/// them for the rest of the run.
pub struct DataLoader {
    solutions_folder: PathBuf,
    agg_by: String,
    region_mapping: RegionMapping,
    store: HashMap<String, HashMap<String, TimeSeriesTable>>,
}

impl DataLoader {
    pub fn new(solutions_folder: PathBuf, agg_by: &str, region_mapping: RegionMapping) -> Self {
        Self {
            solutions_folder,
            agg_by: agg_by.to_string(),
            region_mapping,
            store: HashMap::new(),
        }
    }

    pub fn scenario_folder(&self, scenario: &str) -> PathBuf {
        self.solutions_folder.join(scenario)
    }

    /// Location of an extract; parquet wins over CSV when both exist.
    pub fn property_path(&self, scenario: &str, property: &str) -> Option<PathBuf> {
        let folder = self.scenario_folder(scenario).join(PROCESSED_FOLDER);
        ["parquet", "csv"]
            .iter()
            .map(|ext| folder.join(format!("{}.{}", property, ext)))
            .find(|p| p.exists())
    }

    /// Property names with an extract on disk for `scenario`.
    pub fn available_properties(&self, scenario: &str) -> Vec<String> {
        let pattern = self
            .scenario_folder(scenario)
            .join(PROCESSED_FOLDER)
            .join("*.*");
        let Ok(paths) = glob(&pattern.to_string_lossy()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = paths
            .filter_map(|p| p.ok())
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Loads every requested (property, scenario) pair not already held and
    /// returns the scenarios lacking a required property. Those scenarios are
    /// skipped by the caller; missing optional properties are only logged.
    pub fn get_formatted_data(&mut self, requests: &[PropertyRequest]) -> Result<Vec<String>> {
        let mut skipped: Vec<String> = Vec::new();
        for request in requests {
            for scenario in &request.scenarios {
                if self.get(&request.property, scenario).is_some() {
                    continue;
                }

                let Some(path) = self.property_path(scenario, &request.property) else {
                    if request.required {
                        warn!(
                            "{} is not in the processed data for {}, skipping scenario (available: {})",
                            request.property,
                            scenario,
                            self.available_properties(scenario).join(", ")
                        );
                        if !skipped.contains(scenario) {
                            skipped.push(scenario.clone());
                        }
                    } else {
                        info!("{} not found for {}, continuing without it", request.property, scenario);
                    }
                    continue;
                };

                debug!("Loading {} for {} from {}", request.property, scenario, path.display());
                let table = read_table(&path, &request.property)?;
                let table = self.add_aggregation_level(table);
                self.store
                    .entry(request.property.clone())
                    .or_default()
                    .insert(scenario.clone(), table);
            }
        }
        Ok(skipped)
    }

    pub fn get(&self, property: &str, scenario: &str) -> Option<&TimeSeriesTable> {
        self.store.get(property).and_then(|by_scenario| by_scenario.get(scenario))
    }

    /// Like [`DataLoader::get`] but names what is missing.
    pub fn require(&self, property: &str, scenario: &str) -> Result<&TimeSeriesTable> {
        self.get(property, scenario).ok_or_else(|| PlotError::MissingProperty {
            property: property.to_string(),
            scenario: scenario.to_string(),
        })
    }

    pub fn insert(&mut self, property: &str, scenario: &str, table: TimeSeriesTable) {
        self.store
            .entry(property.to_string())
            .or_default()
            .insert(scenario.to_string(), table);
    }

    /// Line name → category from the scenario's `line_relations.csv`.
    pub fn line_relations(&self, scenario: &str) -> Result<HashMap<String, String>> {
        let path = self.scenario_folder(scenario).join("line_relations.csv");
        if !path.exists() {
            return Err(PlotError::Io {
                path,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        let df = CsvReader::from_path(&path)?.has_header(true).finish()?;
        let names_series = df.column("name")?.cast(&DataType::Utf8)?;
        let categories_series = df.column("category")?.cast(&DataType::Utf8)?;
        let names = names_series.utf8()?;
        let categories = categories_series.utf8()?;

        let mut relations = HashMap::new();
        for idx in 0..df.height() {
            if let (Some(name), Some(category)) = (names.get(idx), categories.get(idx)) {
                relations.insert(name.trim().to_string(), category.trim().to_string());
            }
        }
        Ok(relations)
    }

    /// Tables carrying a `region` level get the configured aggregation
    /// appended as an extra level so zone selection works on any key.
    fn add_aggregation_level(&self, table: TimeSeriesTable) -> TimeSeriesTable {
        if self.agg_by == "zone" || self.agg_by == "region" || self.region_mapping.is_empty() {
            return table;
        }
        if !self.region_mapping.has_column(&self.agg_by) {
            return table;
        }
        let mapping = self.region_mapping.region_to(&self.agg_by);
        table.with_mapped_level("region", &self.agg_by, &mapping)
    }
}

fn read_frame(path: &Path) -> Result<DataFrame> {
    let df = match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => {
            let file = File::open(path).map_err(|source| PlotError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            ParquetReader::new(file).finish()?
        }
        _ => CsvReader::from_path(path)?.has_header(true).finish()?,
    };
    Ok(df)
}

/// Reads one extract: a `timestamp` column, a `value` column (or `0`, the
/// name pandas gives an unnamed series) and string index columns.
pub fn read_table(path: &Path, property: &str) -> Result<TimeSeriesTable> {
    let df = read_frame(path)?;
    let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();

    let value_column = ["value", "0"]
        .iter()
        .find(|c| names.iter().any(|n| n == *c))
        .ok_or_else(|| PlotError::Parse {
            path: path.to_path_buf(),
            what: "a value column",
            value: names.join(","),
        })?;
    if !names.iter().any(|n| n == "timestamp") {
        return Err(PlotError::Parse {
            path: path.to_path_buf(),
            what: "a timestamp column",
            value: names.join(","),
        });
    }

    let levels: Vec<String> = names
        .iter()
        .filter(|n| n.as_str() != "timestamp" && n.as_str() != *value_column)
        .cloned()
        .collect();

    let timestamp_series = df.column("timestamp")?.cast(&DataType::Utf8)?;
    let timestamps = timestamp_series.utf8()?;
    let value_series = df.column(value_column)?.cast(&DataType::Float64)?;
    let values = value_series.f64()?;
    let level_series = levels
        .iter()
        .map(|l| df.column(l).and_then(|s| s.cast(&DataType::Utf8)))
        .collect::<PolarsResult<Vec<Series>>>()?;
    let level_values = level_series
        .iter()
        .map(|s| s.utf8())
        .collect::<PolarsResult<Vec<&Utf8Chunked>>>()?;

    let mut table = TimeSeriesTable::new(property, levels);
    let mut skipped = 0usize;

    for idx in 0..df.height() {
        let Some(raw_ts) = timestamps.get(idx) else {
            skipped += 1;
            continue;
        };
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| PlotError::Parse {
            path: path.to_path_buf(),
            what: "timestamp",
            value: raw_ts.to_string(),
        })?;
        let Some(value) = values.get(idx) else {
            skipped += 1;
            continue;
        };
        let keys = level_values
            .iter()
            .map(|ca| ca.get(idx).unwrap_or_default().trim().to_string())
            .collect();
        table.push(timestamp, keys, value);
    }

    if skipped > 0 {
        warn!("{}: skipped {} rows with empty timestamp or value", path.display(), skipped);
    }
    debug!("{}: {} rows, levels {:?}", property, table.len(), table.levels());
    Ok(table)
}

/// Zone and region listings for the active aggregation.
pub struct MetaData {
    regions: Vec<String>,
    zones: Vec<String>,
}

impl MetaData {
    /// Reads `<scenario>/metadata/regions.csv` and `zones.csv`; a listing
    /// whose file is absent comes from the installed-capacity extract.
    pub fn load(loader: &DataLoader, scenario: &str) -> Result<Self> {
        let folder = loader.scenario_folder(scenario).join("metadata");
        let regions = read_name_list(&folder.join("regions.csv"), "region")?;
        let zones = read_name_list(&folder.join("zones.csv"), "name")?;

        if let (Some(regions), Some(zones)) = (&regions, &zones) {
            return Ok(Self {
                regions: regions.clone(),
                zones: zones.clone(),
            });
        }

        let capacity = match loader.property_path(scenario, "generator_Installed_Capacity") {
            Some(path) => Some(read_table(&path, "generator_Installed_Capacity")?),
            None => {
                warn!("No installed capacity found for {} metadata", scenario);
                None
            }
        };
        let from_capacity = |level: &str| {
            capacity
                .as_ref()
                .map(|table| table.unique_keys(level))
                .unwrap_or_default()
        };
        Ok(Self {
            regions: regions.unwrap_or_else(|| from_capacity("region")),
            zones: zones.unwrap_or_else(|| from_capacity("zone")),
        })
    }

    pub fn from_lists(regions: Vec<String>, zones: Vec<String>) -> Self {
        Self { regions, zones }
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn zones(&self) -> &[String] {
        &self.zones
    }
}

fn read_name_list(path: &Path, column: &str) -> Result<Option<Vec<String>>> {
    if !path.exists() {
        return Ok(None);
    }
    let df = CsvReader::from_path(path)?.has_header(true).finish()?;
    let series = df.column(column)?.cast(&DataType::Utf8)?;
    let values = series.utf8()?;

    let mut names: Vec<String> = Vec::new();
    for name in values.into_iter().flatten() {
        let name = name.trim().to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(Some(names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_extract(root: &Path, scenario: &str, property: &str, body: &str) {
        let folder = root.join(scenario).join(PROCESSED_FOLDER);
        std::fs::create_dir_all(&folder).unwrap();
        let mut file = File::create(folder.join(format!("{}.csv", property))).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn test_read_table_levels_and_values() {
        let dir = tempfile::tempdir().unwrap();
        write_extract(
            dir.path(),
            "Base",
            "generator_Generation",
            "timestamp,gen_name,tech,region,zone,value\n\
             2024-01-01 00:00:00,g1,Coal,r1,North,10\n\
             2024-01-01 01:00:00,g1,Coal,r1,North,12.5\n",
        );

        let loader = DataLoader::new(dir.path().to_path_buf(), "zone", RegionMapping::empty());
        let path = loader.property_path("Base", "generator_Generation").unwrap();
        let table = read_table(&path, "generator_Generation").unwrap();

        assert_eq!(table.levels(), &["gen_name", "tech", "region", "zone"]);
        assert_eq!(table.len(), 2);
        assert!((table.sum() - 22.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_required_property() {
        let dir = tempfile::tempdir().unwrap();
        let scenarios = vec!["Base".to_string()];
        let mut loader = DataLoader::new(dir.path().to_path_buf(), "zone", RegionMapping::empty());

        let optional = [PropertyRequest::optional("generator_Pump_Load", &scenarios)];
        assert!(loader.get_formatted_data(&optional).is_ok());

        let required = [PropertyRequest::required("generator_Generation", &scenarios)];
        assert_eq!(loader.get_formatted_data(&required).unwrap(), vec!["Base".to_string()]);
        assert!(matches!(
            loader.require("generator_Generation", "Base"),
            Err(PlotError::MissingProperty { .. })
        ));
    }

    #[test]
    fn test_missing_scenario_does_not_stop_loading() {
        let dir = tempfile::tempdir().unwrap();
        write_extract(
            dir.path(),
            "Base",
            "generator_Generation",
            "timestamp,gen_name,tech,zone,value\n2024-01-01 00:00:00,g1,Coal,North,10\n",
        );
        let scenarios = vec!["High".to_string(), "Base".to_string()];
        let mut loader = DataLoader::new(dir.path().to_path_buf(), "zone", RegionMapping::empty());

        let skipped = loader
            .get_formatted_data(&[PropertyRequest::required("generator_Generation", &scenarios)])
            .unwrap();
        assert_eq!(skipped, vec!["High".to_string()]);
        assert!(loader.require("generator_Generation", "Base").is_ok());
    }

    #[test]
    fn test_aggregation_level_added_from_mapping() {
        let dir = tempfile::tempdir().unwrap();
        write_extract(
            dir.path(),
            "Base",
            "region_Load",
            "timestamp,region,value\n2024-01-01 00:00:00,r1,100\n2024-01-01 00:00:00,r2,50\n",
        );
        let mut mapping = RegionMapping::empty();
        mapping.add_mapping("r1", "Interconnect", "East");
        mapping.add_mapping("r2", "Interconnect", "East");

        let scenarios = vec!["Base".to_string()];
        let mut loader = DataLoader::new(dir.path().to_path_buf(), "Interconnect", mapping);
        loader
            .get_formatted_data(&[PropertyRequest::required("region_Load", &scenarios)])
            .unwrap();

        let load = loader.get("region_Load", "Base").unwrap();
        assert_eq!(load.xs("Interconnect", "East").unwrap().sum(), 150.0);
        assert_eq!(loader.available_properties("Base"), vec!["region_Load".to_string()]);
    }

    #[test]
    fn test_metadata_falls_back_to_capacity() {
        let dir = tempfile::tempdir().unwrap();
        write_extract(
            dir.path(),
            "Base",
            "generator_Installed_Capacity",
            "timestamp,gen_name,tech,region,zone,value\n\
             2024-01-01 00:00:00,g1,Coal,r1,North,100\n\
             2024-01-01 00:00:00,g2,PV,r2,South,50\n",
        );
        let loader = DataLoader::new(dir.path().to_path_buf(), "zone", RegionMapping::empty());
        let meta = MetaData::load(&loader, "Base").unwrap();
        assert_eq!(meta.zones(), &["North".to_string(), "South".to_string()]);
        assert_eq!(meta.regions(), &["r1".to_string(), "r2".to_string()]);
    }

    #[test]
    fn test_metadata_fills_only_the_missing_listing() {
        let dir = tempfile::tempdir().unwrap();
        write_extract(
            dir.path(),
            "Base",
            "generator_Installed_Capacity",
            "timestamp,gen_name,tech,region,zone,value\n\
             2024-01-01 00:00:00,g1,Coal,r1,North,100\n\
             2024-01-01 00:00:00,g2,PV,r2,South,50\n",
        );
        let metadata = dir.path().join("Base").join("metadata");
        std::fs::create_dir_all(&metadata).unwrap();
        std::fs::write(metadata.join("regions.csv"), "region\nr9\n").unwrap();

        let loader = DataLoader::new(dir.path().to_path_buf(), "zone", RegionMapping::empty());
        let meta = MetaData::load(&loader, "Base").unwrap();
        assert_eq!(meta.regions(), &["r9".to_string()]);
        assert_eq!(meta.zones(), &["North".to_string(), "South".to_string()]);
    }
}
