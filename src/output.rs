use anyhow::{Context, Result};
use log::debug;
use plot_metrics::{DataTable, SummaryTable};
use polars::prelude::*;
use regex::Regex;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Creates `path` and its parents; an existing directory is fine.
pub fn ensure_dir(path: &Path) -> Result<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(e).with_context(|| format!("creating output folder {}", path.display())),
    }
}

/// Zone names lose their dots and any character a file system would reject.
pub fn sanitize_zone(zone: &str) -> String {
    let dotless = zone.replace('.', "");
    match Regex::new(r#"[/\\:*?"<>|]"#) {
        Ok(unsafe_chars) => unsafe_chars.replace_all(&dotless, "_").into_owned(),
        Err(_) => dotless,
    }
}

/// Output locations for one plot-select row.
#[derive(Debug, Clone)]
pub struct FigureTarget {
    pub folder: PathBuf,
    pub figure_name: String,
    pub main_scenario: String,
    pub format: String,
}

impl FigureTarget {
    /// `<figures>/<AGG_BY>_<module>/`, created on the way.
    pub fn new(
        figure_folder: &Path,
        agg_by: &str,
        module: &str,
        figure_name: &str,
        main_scenario: &str,
        format: &str,
    ) -> Result<Self> {
        let folder = figure_folder.join(format!("{}_{}", agg_by, module));
        ensure_dir(&folder)?;
        Ok(Self {
            folder,
            figure_name: figure_name.to_string(),
            main_scenario: main_scenario.to_string(),
            format: format.to_string(),
        })
    }

    fn stem(&self, zone: &str) -> String {
        format!("{}_{}_{}", sanitize_zone(zone), self.figure_name, self.main_scenario)
    }

    pub fn figure_path(&self, zone: &str) -> PathBuf {
        self.folder.join(format!("{}.{}", self.stem(zone), self.format))
    }

    pub fn table_path(&self, zone: &str) -> PathBuf {
        self.folder.join(format!("{}.csv", self.stem(zone)))
    }

    pub fn facet_folder(&self, zone: &str) -> PathBuf {
        self.folder
            .join(format!("{}_{}_data_tables", sanitize_zone(zone), self.figure_name))
    }

    /// Writes the data table(s) for `zone`; returns the files written.
    pub fn write_data_table(&self, zone: &str, table: &DataTable) -> Result<Vec<PathBuf>> {
        match table {
            DataTable::None => Ok(Vec::new()),
            DataTable::Single(t) => {
                let path = self.table_path(zone);
                write_summary_csv(t, &path)?;
                Ok(vec![path])
            }
            DataTable::Faceted(tables) => {
                let folder = self.facet_folder(zone);
                ensure_dir(&folder)?;
                let mut written = Vec::with_capacity(tables.len());
                for (scenario, t) in tables {
                    let path = folder.join(format!("{}_{}.csv", sanitize_zone(zone), scenario));
                    write_summary_csv(t, &path)?;
                    written.push(path);
                }
                Ok(written)
            }
        }
    }
}

/// Summary table to a DataFrame with the index as the first column; NaN
/// cells become nulls.
pub fn summary_to_frame(table: &SummaryTable) -> Result<DataFrame> {
    let mut columns = Vec::with_capacity(table.columns.len() + 1);
    columns.push(Series::new(&table.index_name, table.index.clone()));
    for (idx, name) in table.columns.iter().enumerate() {
        let values: Vec<Option<f64>> = table
            .values
            .iter()
            .map(|row| row.get(idx).copied().filter(|v| !v.is_nan()))
            .collect();
        columns.push(Series::new(name, values));
    }
    DataFrame::new(columns).context("building data table")
}

pub fn write_summary_csv(table: &SummaryTable, path: &Path) -> Result<()> {
    let mut df = summary_to_frame(table)?;
    let mut file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    CsvWriter::new(&mut file)
        .has_header(true)
        .finish(&mut df)
        .with_context(|| format!("writing {}", path.display()))?;
    debug!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}
