use crate::config::{PlotSelectRow, UserInputs};
use crate::output::FigureTarget;
use crate::renderer;
use crate::styles::Styles;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use plot_metrics::{
    capacity_factor, curtailment, generation_unstack, ramping, transmission, DataLoader, MetaData,
    MethodOutput, PlotArgs, PlotContext, RegionMapping, ZoneOutput,
};

/// Zones or aggregation units to plot for `agg_by`, restricted to the
/// sublist when one is given.
pub fn resolve_zones(
    agg_by: &str,
    meta: &MetaData,
    mapping: &RegionMapping,
    sublist: &[String],
) -> Vec<String> {
    let zones = if agg_by == "zone" {
        meta.zones().to_vec()
    } else if mapping.is_empty() {
        meta.regions().to_vec()
    } else {
        mapping.aggregation_units(meta.regions(), agg_by)
    };

    if sublist.is_empty() {
        return zones;
    }
    info!("Plotting only zones/regions specified in zone_region_sublist");
    sublist
        .iter()
        .filter(|item| {
            let known = zones.contains(item);
            if !known {
                warn!("{} not found in {} list, SKIPPING", item, agg_by);
            }
            known
        })
        .cloned()
        .collect()
}

/// Runs one calculator.
pub fn run_method(
    module: &str,
    method: &str,
    loader: &mut DataLoader,
    ctx: &PlotContext,
    args: &PlotArgs,
) -> plot_metrics::Result<MethodOutput> {
    match (module, method) {
        ("capacity_factor", "cf") => capacity_factor::cf(loader, ctx, args),
        ("capacity_factor", "avg_output_when_committed") => {
            capacity_factor::avg_output_when_committed(loader, ctx, args)
        }
        ("capacity_factor", "time_at_min_gen") => capacity_factor::time_at_min_gen(loader, ctx, args),
        ("curtailment", "curt_pen") => curtailment::curt_pen(loader, ctx, args),
        ("curtailment", "curt_duration_curve") => curtailment::curt_duration_curve(loader, ctx, args),
        ("ramping", "capacity_started") => ramping::capacity_started(loader, ctx, args),
        ("ramping", "count_ramps") => ramping::count_ramps(loader, ctx, args),
        ("transmission", "net_export") => transmission::net_export(loader, ctx, args),
        ("transmission", "zone_zone_interchange") => {
            transmission::zone_zone_interchange(loader, ctx, args)
        }
        ("transmission", "line_util") => transmission::line_util(loader, ctx, args),
        ("transmission", "line_hist") => transmission::line_hist(loader, ctx, args),
        ("generation_unstack", "gen_unstack") => generation_unstack::gen_unstack(loader, ctx, args),
        _ => Ok(MethodOutput::UnsupportedMethod),
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub rows: usize,
    pub figures: usize,
    pub tables: usize,
    pub missing_zones: usize,
    pub missing_input: usize,
    pub unsupported: usize,
    pub failed: usize,
}

pub struct Orchestrator<'a> {
    inputs: &'a UserInputs,
    ctx: PlotContext,
    loader: DataLoader,
    styles: Styles,
}

impl<'a> Orchestrator<'a> {
    pub fn new(inputs: &'a UserInputs, ctx: PlotContext, loader: DataLoader, styles: Styles) -> Self {
        Self {
            inputs,
            ctx,
            loader,
            styles,
        }
    }

    /// Plots every row. Only output-folder failures abort the run.
    pub fn run(&mut self, rows: &[PlotSelectRow]) -> Result<RunSummary> {
        let mut summary = RunSummary {
            rows: rows.len(),
            ..Default::default()
        };

        let pb = ProgressBar::new(rows.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .context("progress bar template")?,
        );

        for row in rows {
            pb.set_message(row.figure_output_name.clone());
            match &row.figure_type {
                Some(kind) => info!("Plot = {} ({})", row.figure_output_name, kind),
                None => info!("Plot = {}", row.figure_output_name),
            }
            let target = FigureTarget::new(
                &self.inputs.figure_folder(),
                &self.ctx.agg_by,
                &row.module,
                &row.figure_output_name,
                &self.inputs.main_scenario,
                &self.inputs.figure_format,
            )?;
            let args = row.to_args();

            match run_method(&row.module, &row.method, &mut self.loader, &self.ctx, &args) {
                Ok(output) => self.write_outputs(row, &target, output, &mut summary),
                Err(e) => {
                    warn!("{} failed: {}", row.figure_output_name, e);
                    summary.failed += 1;
                }
            }
            pb.inc(1);
        }

        pb.finish_with_message("done");
        Ok(summary)
    }

    fn write_outputs(
        &self,
        row: &PlotSelectRow,
        target: &FigureTarget,
        output: MethodOutput,
        summary: &mut RunSummary,
    ) {
        let zones = match output {
            MethodOutput::Zones(zones) => zones,
            MethodOutput::MissingInputData => {
                warn!("{}: required input data is missing", row.figure_output_name);
                summary.missing_input += 1;
                return;
            }
            MethodOutput::UnsupportedMethod => {
                warn!(
                    "{}: no method {} in module {}",
                    row.figure_output_name, row.method, row.module
                );
                summary.unsupported += 1;
                return;
            }
        };

        for (zone, zone_output) in zones {
            let result = match zone_output {
                ZoneOutput::Figure(result) => result,
                ZoneOutput::MissingZoneData => {
                    info!("Data missing for {}", zone);
                    summary.missing_zones += 1;
                    continue;
                }
            };

            match target.write_data_table(&zone, &result.data_table) {
                Ok(written) => summary.tables += written.len(),
                Err(e) => {
                    warn!("Could not write data table for {}: {:#}", zone, e);
                    summary.failed += 1;
                }
            }

            let path = target.figure_path(&zone);
            match renderer::render(&result.figure, &result.title, &path, &self.styles) {
                Ok(()) => summary.figures += 1,
                Err(e) => {
                    warn!("Could not draw {}: {:#}", path.display(), e);
                    summary.failed += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};

    fn mapping() -> RegionMapping {
        let mut m = RegionMapping::empty();
        m.add_mapping("r1", "Interconnect", "East");
        m.add_mapping("r2", "Interconnect", "East");
        m.add_mapping("r3", "Interconnect", "West");
        m
    }

    fn meta() -> MetaData {
        MetaData::from_lists(
            vec!["r1".into(), "r2".into(), "r3".into()],
            vec!["z1".into(), "z2".into()],
        )
    }

    #[test]
    fn test_resolve_zones() {
        assert_eq!(resolve_zones("zone", &meta(), &mapping(), &[]), vec!["z1", "z2"]);
        assert_eq!(
            resolve_zones("region", &meta(), &RegionMapping::empty(), &[]),
            vec!["r1", "r2", "r3"]
        );
        assert_eq!(
            resolve_zones("Interconnect", &meta(), &mapping(), &[]),
            vec!["East", "West"]
        );
    }

    #[test]
    fn test_sublist_drops_unknown() {
        let sublist = vec!["z2".to_string(), "nowhere".to_string()];
        assert_eq!(resolve_zones("zone", &meta(), &mapping(), &sublist), vec!["z2"]);
    }

    #[test]
    fn test_unknown_method_is_unsupported() {
        let mut loader = DataLoader::new(PathBuf::new(), "zone", RegionMapping::empty());
        let out = run_method(
            "capacity_factor",
            "not_a_method",
            &mut loader,
            &PlotContext::default(),
            &PlotArgs::default(),
        )
        .unwrap();
        assert_eq!(out, MethodOutput::UnsupportedMethod);
    }

    fn write(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn row(name: &str, module: &str, method: &str) -> PlotSelectRow {
        PlotSelectRow {
            figure_output_name: name.into(),
            plot_graph: true,
            figure_type: None,
            properties: None,
            day_before: None,
            day_after: None,
            timezone: None,
            start_date: None,
            end_date: None,
            group_by: None,
            module: module.into(),
            method: method.into(),
        }
    }

    #[test]
    fn test_run_writes_tables_and_counts_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("Base").join(plot_metrics::data_loader::PROCESSED_FOLDER);
        write(
            &processed.join("generator_Generation.csv"),
            "timestamp,gen_name,tech,zone,value\n\
             2024-01-01 00:00:00,c1,Coal,Z1,50\n\
             2024-01-01 01:00:00,c1,Coal,Z1,50\n",
        );
        write(
            &processed.join("generator_Installed_Capacity.csv"),
            "timestamp,gen_name,tech,zone,value\n\
             2024-01-01 00:00:00,c1,Coal,Z1,100\n",
        );

        let inputs = UserInputs {
            main_scenario: "Base".into(),
            solutions_folder: dir.path().to_path_buf(),
            scenarios: vec!["Base".into()],
            region_mapping_file: None,
            gen_names_file: "gen_names.csv".into(),
            agg_by: "zone".into(),
            zone_region_sublist: Vec::new(),
            facet_ylabels: Vec::new(),
            facet_xlabels: Vec::new(),
            figure_format: "svg".into(),
        };
        let ctx = PlotContext {
            agg_by: "zone".into(),
            zones: vec!["Z1".into(), "Z2".into()],
            scenarios: vec!["Base".into()],
            ordered_gen: vec!["Coal".into()],
            ..Default::default()
        };
        let loader = DataLoader::new(dir.path().to_path_buf(), "zone", RegionMapping::empty());
        let mut orchestrator = Orchestrator::new(&inputs, ctx, loader, Styles::default());

        let rows = vec![
            row("Capacity_Factor", "capacity_factor", "cf"),
            row("Curtailment", "curtailment", "curt_pen"),
            row("Mystery", "capacity_factor", "mystery"),
        ];
        let summary = orchestrator.run(&rows).unwrap();

        assert_eq!(summary.rows, 3);
        assert_eq!(summary.tables, 1);
        assert_eq!(summary.missing_zones, 1);
        assert_eq!(summary.missing_input, 1);
        assert_eq!(summary.unsupported, 1);

        let table = inputs
            .figure_folder()
            .join("zone_capacity_factor/Z1_Capacity_Factor_Base.csv");
        let body = fs::read_to_string(table).unwrap();
        assert_eq!(body.lines().collect::<Vec<_>>(), vec!["Scenario,Coal", "Base,0.5"]);
    }
}
