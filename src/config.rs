use anyhow::{Context, Result};
use log::{info, warn};
use plot_metrics::{DateRange, GroupBy, PlotArgs, PlotContext, RegionMapping};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// True for the spreadsheet spellings of "no value".
pub fn is_unset(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("nan") || v.eq_ignore_ascii_case("none")
}

fn clean(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !is_unset(v)).map(str::to_string)
}

fn split_list(value: Option<&str>) -> Vec<String> {
    clean(value)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct InputRow {
    #[serde(rename = "Input")]
    input: String,
    #[serde(rename = "User_defined_value", default)]
    value: Option<String>,
}

/// The `Input,User_defined_value` settings table.
#[derive(Debug, Clone)]
pub struct UserInputs {
    pub main_scenario: String,
    pub solutions_folder: PathBuf,
    pub scenarios: Vec<String>,
    pub region_mapping_file: Option<String>,
    pub gen_names_file: String,
    pub agg_by: String,
    pub zone_region_sublist: Vec<String>,
    pub facet_ylabels: Vec<String>,
    pub facet_xlabels: Vec<String>,
    pub figure_format: String,
}

impl UserInputs {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("opening user inputs {}", path.display()))?;

        let mut values = HashMap::new();
        for row in reader.deserialize::<InputRow>() {
            let row = row.with_context(|| format!("reading {}", path.display()))?;
            values.insert(row.input, row.value);
        }
        Self::from_map(&values)
    }

    fn from_map(values: &HashMap<String, Option<String>>) -> Result<Self> {
        let get = |key: &str| clean(values.get(key).and_then(|v| v.as_deref()));

        let main_scenario = get("Main_scenario_plot").context("Main_scenario_plot is not set")?;
        let solutions_folder = get("Marmot_Solutions_folder")
            .map(PathBuf::from)
            .context("Marmot_Solutions_folder is not set")?;

        let mut scenarios = split_list(values.get("Multi_scenario_plot").and_then(|v| v.as_deref()));
        if scenarios.is_empty() {
            scenarios.push(main_scenario.clone());
        }

        Ok(Self {
            main_scenario,
            solutions_folder,
            scenarios,
            region_mapping_file: get("Region_Mapping.csv_name"),
            gen_names_file: get("gen_names.csv_name").unwrap_or_else(|| "gen_names.csv".to_string()),
            agg_by: get("AGG_BY").unwrap_or_else(|| "zone".to_string()),
            zone_region_sublist: split_list(values.get("zone_region_sublist").and_then(|v| v.as_deref())),
            facet_ylabels: split_list(values.get("Facet_ylabels").and_then(|v| v.as_deref())),
            facet_xlabels: split_list(values.get("Facet_xlabels").and_then(|v| v.as_deref())),
            figure_format: get("Figure_Format")
                .map(|f| f.to_lowercase())
                .unwrap_or_else(|| "png".to_string()),
        })
    }

    /// `<Solutions>/<Main>/Figures_Output`.
    pub fn figure_folder(&self) -> PathBuf {
        self.solutions_folder.join(&self.main_scenario).join("Figures_Output")
    }
}

#[derive(Debug, Deserialize)]
struct ColourRow {
    #[serde(rename = "Generator")]
    generator: String,
    #[serde(rename = "Colour")]
    colour: String,
}

#[derive(Debug, Deserialize)]
struct GenNameRow {
    #[serde(rename = "Original")]
    original: String,
    #[serde(rename = "New")]
    new: String,
}

/// Technology lists and lookups from the mapping folder.
#[derive(Debug, Clone, Default)]
pub struct MappingTables {
    pub ordered_gen: Vec<String>,
    pub pv_gen_cat: Vec<String>,
    pub re_gen_cat: Vec<String>,
    pub vre_gen_cat: Vec<String>,
    pub thermal_gen_cat: Vec<String>,
    pub colours: HashMap<String, String>,
    pub gen_names: HashMap<String, String>,
    pub region_mapping: RegionMapping,
}

impl MappingTables {
    pub fn load(folder: &Path, inputs: &UserInputs) -> Result<Self> {
        let list = |name: &str| read_list(&folder.join(name));

        let region_mapping = match &inputs.region_mapping_file {
            Some(file) => {
                let path = folder.join(file);
                RegionMapping::from_csv(&path)
                    .with_context(|| format!("reading region mapping {}", path.display()))?
            }
            None => RegionMapping::empty(),
        };

        let tables = Self {
            ordered_gen: list("ordered_gen.csv")?,
            pv_gen_cat: list("pv_gen_cat.csv")?,
            re_gen_cat: list("re_gen_cat.csv")?,
            vre_gen_cat: list("vre_gen_cat.csv")?,
            thermal_gen_cat: list("thermal_gen_cat.csv")?,
            colours: read_colours(&folder.join("colour_dictionary.csv"))?,
            gen_names: read_gen_names(&folder.join(&inputs.gen_names_file))?,
            region_mapping,
        };
        info!(
            "Loaded {} ordered technologies and {} colours from {}",
            tables.ordered_gen.len(),
            tables.colours.len(),
            folder.display()
        );
        Ok(tables)
    }

    /// Renamed technologies that the ordering list does not know about.
    pub fn unordered_techs(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .gen_names
            .values()
            .filter(|t| !self.ordered_gen.contains(t))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    pub fn context(&self, inputs: &UserInputs, zones: Vec<String>) -> PlotContext {
        PlotContext {
            agg_by: inputs.agg_by.clone(),
            zones,
            scenarios: inputs.scenarios.clone(),
            ordered_gen: self.ordered_gen.clone(),
            gen_names: self.gen_names.clone(),
            pv_gen_cat: self.pv_gen_cat.clone(),
            re_gen_cat: self.re_gen_cat.clone(),
            vre_gen_cat: self.vre_gen_cat.clone(),
            thermal_gen_cat: self.thermal_gen_cat.clone(),
            region_mapping: self.region_mapping.clone(),
            xlabels: inputs.facet_xlabels.clone(),
            ylabels: inputs.facet_ylabels.clone(),
        }
    }

    pub fn warn_inconsistencies(&self) {
        for tech in self.unordered_techs() {
            warn!(
                "{} is in the generator name mapping but not in ordered_gen; it will be plotted last",
                tech
            );
        }
    }
}

/// First column of a single-column list file, header skipped.
pub fn read_list(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut items = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("reading {}", path.display()))?;
        if let Some(value) = record.get(0).filter(|v| !is_unset(v)) {
            items.push(value.to_string());
        }
    }
    Ok(items)
}

fn read_colours(path: &Path) -> Result<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut colours = HashMap::new();
    for row in reader.deserialize::<ColourRow>() {
        let row = row.with_context(|| format!("reading {}", path.display()))?;
        colours.insert(row.generator, row.colour);
    }
    Ok(colours)
}

fn read_gen_names(path: &Path) -> Result<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut names = HashMap::new();
    for row in reader.deserialize::<GenNameRow>() {
        let row = row.with_context(|| format!("reading {}", path.display()))?;
        names.insert(row.original, row.new);
    }
    Ok(names)
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(matches!(
        raw.as_deref().map(str::trim).map(str::to_ascii_lowercase).as_deref(),
        Some("true") | Some("1") | Some("yes")
    ))
}

/// One row of the plot-select table.
#[derive(Debug, Clone, Deserialize)]
pub struct PlotSelectRow {
    #[serde(rename = "Figure Output Name")]
    pub figure_output_name: String,
    #[serde(rename = "Plot Graph", deserialize_with = "deserialize_flag", default)]
    pub plot_graph: bool,
    #[serde(rename = "Figure Type", default)]
    pub figure_type: Option<String>,
    #[serde(rename = "Properties", default)]
    pub properties: Option<String>,
    #[serde(rename = "Day Before", default)]
    pub day_before: Option<f64>,
    #[serde(rename = "Day After", default)]
    pub day_after: Option<f64>,
    #[serde(rename = "Timezone", default)]
    pub timezone: Option<String>,
    #[serde(rename = "Start Date", default)]
    pub start_date: Option<String>,
    #[serde(rename = "End Date", default)]
    pub end_date: Option<String>,
    #[serde(rename = "Group By", default)]
    pub group_by: Option<String>,
    #[serde(rename = "Marmot Module")]
    pub module: String,
    #[serde(rename = "Method")]
    pub method: String,
}

impl PlotSelectRow {
    /// Figures whose output name mentions "Facet" are drawn one panel per
    /// scenario.
    pub fn facet(&self) -> bool {
        self.figure_output_name.contains("Facet")
    }

    pub fn to_args(&self) -> PlotArgs {
        PlotArgs {
            prop: clean(self.properties.as_deref()),
            days_before: self.day_before.filter(|d| d.is_finite()).unwrap_or(0.0),
            days_after: self.day_after.filter(|d| d.is_finite()).unwrap_or(0.0),
            timezone: clean(self.timezone.as_deref()).unwrap_or_default(),
            date_range: DateRange::parse(self.start_date.as_deref(), self.end_date.as_deref()),
            groupby: GroupBy::parse(clean(self.group_by.as_deref()).as_deref()),
            facet: self.facet(),
        }
    }
}

pub fn load_plot_select(path: &Path) -> Result<Vec<PlotSelectRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening plot select {}", path.display()))?;
    let mut rows = Vec::new();
    for (idx, row) in reader.deserialize::<PlotSelectRow>().enumerate() {
        let row = row.with_context(|| format!("row {} of {}", idx + 1, path.display()))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Rows to plot: the 1-based `row` regardless of its flag, or every row
/// flagged for plotting.
pub fn select_rows(rows: &[PlotSelectRow], row: Option<usize>) -> Result<Vec<PlotSelectRow>> {
    match row {
        Some(n) => {
            let selected = n
                .checked_sub(1)
                .and_then(|i| rows.get(i))
                .with_context(|| format!("plot select has no row {} ({} rows)", n, rows.len()))?;
            info!("Will plot row {} of plot select regardless of T/F", n);
            Ok(vec![selected.clone()])
        }
        None => Ok(rows.iter().filter(|r| r.plot_graph).cloned().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(path: &Path, body: &str) {
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn test_user_inputs_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_defined_inputs.csv");
        write(
            &path,
            "Input,User_defined_value\n\
             Main_scenario_plot,Base\n\
             Marmot_Solutions_folder,/data/solutions\n\
             Multi_scenario_plot,\"Base, High_RE\"\n\
             Region_Mapping.csv_name,nan\n\
             AGG_BY,Interconnect\n\
             zone_region_sublist,\n\
             Facet_xlabels,\"a,b\"\n",
        );

        let inputs = UserInputs::load(&path).unwrap();
        assert_eq!(inputs.scenarios, vec!["Base", "High_RE"]);
        assert_eq!(inputs.region_mapping_file, None);
        assert_eq!(inputs.agg_by, "Interconnect");
        assert!(inputs.zone_region_sublist.is_empty());
        assert_eq!(inputs.facet_xlabels.len(), 2);
        assert_eq!(inputs.figure_format, "png");
        assert_eq!(
            inputs.figure_folder(),
            PathBuf::from("/data/solutions/Base/Figures_Output")
        );
    }

    #[test]
    fn test_missing_main_scenario_is_error() {
        let values = HashMap::from([("Main_scenario_plot".to_string(), Some("nan".to_string()))]);
        assert!(UserInputs::from_map(&values).is_err());
    }

    #[test]
    fn test_plot_select_rows_and_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot_select.csv");
        write(
            &path,
            "Figure Output Name,Plot Graph,Figure Type,Properties,Day Before,Day After,Timezone,Start Date,End Date,Group By,Marmot Module,Method\n\
             Capacity_Factor,TRUE,Bar,,,,,2024-01-01,2024-01-31,Year-Scenario,capacity_factor,cf\n\
             Gen_Unstack_Facet,FALSE,Line,Peak Demand,2,3,PST,,,,generation_unstack,gen_unstack\n",
        );

        let rows = load_plot_select(&path).unwrap();
        assert_eq!(rows.len(), 2);

        let flagged = select_rows(&rows, None).unwrap();
        assert_eq!(flagged.len(), 1);
        let args = flagged[0].to_args();
        assert_eq!(args.groupby, GroupBy::YearScenario);
        assert!(args.date_range.is_some());
        assert!(!args.facet);

        let forced = select_rows(&rows, Some(2)).unwrap();
        let args = forced[0].to_args();
        assert!(args.facet);
        assert!(args.prop_is("Peak Demand"));
        assert_eq!(args.days_after, 3.0);
        assert_eq!(args.timezone, "PST");
        assert!(select_rows(&rows, Some(5)).is_err());
        assert!(select_rows(&rows, Some(0)).is_err());
    }

    #[test]
    fn test_unordered_techs_warned() {
        let tables = MappingTables {
            ordered_gen: vec!["Coal".into(), "PV".into()],
            gen_names: HashMap::from([
                ("Solar".to_string(), "PV".to_string()),
                ("Battery".to_string(), "Storage".to_string()),
            ]),
            ..Default::default()
        };
        assert_eq!(tables.unordered_techs(), vec!["Storage".to_string()]);
    }
}
