use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;
use plot_metrics::{DataLoader, MetaData};
use std::path::PathBuf;
use std::time::Instant;

mod config;
mod orchestrator;
mod output;
mod renderer;
mod styles;

use config::{MappingTables, UserInputs};
use orchestrator::{resolve_zones, Orchestrator};
use styles::Styles;

#[derive(Parser, Debug)]
#[command(name = "prodcost_viz")]
#[command(about = "Figures and summary tables from processed production-cost model results")]
struct Args {
    /// User inputs table (Input,User_defined_value)
    #[arg(long, default_value = "user_defined_inputs.csv")]
    inputs: PathBuf,

    /// Plot selection table
    #[arg(long, default_value = "plot_select.csv")]
    plot_select: PathBuf,

    /// Folder holding the technology lists, colours and region mapping
    #[arg(long, default_value = "mapping_folder")]
    mapping_folder: PathBuf,

    /// 1-based plot-select row to plot regardless of its Plot Graph flag
    row: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let started = Instant::now();

    println!("\n📊 Production cost figures");
    println!("{}", "=".repeat(60));

    let inputs = UserInputs::load(&args.inputs)?;
    let tables = MappingTables::load(&args.mapping_folder, &inputs)?;
    tables.warn_inconsistencies();

    let rows = config::load_plot_select(&args.plot_select)?;
    let selected = config::select_rows(&rows, args.row)?;

    let loader = DataLoader::new(
        inputs.solutions_folder.clone(),
        &inputs.agg_by,
        tables.region_mapping.clone(),
    );
    let meta = MetaData::load(&loader, &inputs.main_scenario)
        .with_context(|| format!("reading metadata for {}", inputs.main_scenario))?;
    let zones = resolve_zones(
        &inputs.agg_by,
        &meta,
        &tables.region_mapping,
        &inputs.zone_region_sublist,
    );

    println!("  Main scenario: {}", inputs.main_scenario);
    println!("  Scenarios:     {}", inputs.scenarios.join(", "));
    println!("  Aggregation:   {} ({} units)", inputs.agg_by, zones.len());
    println!("  Rows selected: {} of {}", selected.len(), rows.len());
    info!("Figures go to {}", inputs.figure_folder().display());

    let ctx = tables.context(&inputs, zones);
    let styles = Styles::from_dictionary(&tables.colours);
    let mut orchestrator = Orchestrator::new(&inputs, ctx, loader, styles);
    let summary = orchestrator.run(&selected)?;

    println!("\n✅ Plotting complete in {:.1}s", started.elapsed().as_secs_f64());
    println!("{}", "=".repeat(60));
    println!("  Rows plotted:         {}", summary.rows);
    println!("  Figures written:      {}", summary.figures);
    println!("  Data tables written:  {}", summary.tables);
    println!("  Zones without data:   {}", summary.missing_zones);
    println!("  Rows missing inputs:  {}", summary.missing_input);
    println!("  Unsupported methods:  {}", summary.unsupported);
    if summary.failed > 0 {
        println!("  ⚠️  Failures:          {}", summary.failed);
    }

    Ok(())
}
