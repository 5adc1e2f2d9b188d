//! Thermal unit starts, counted as capacity brought online.

use crate::data_loader::{DataLoader, PropertyRequest};
use crate::error::Result;
use crate::figure::{AxisFormat, BarChart, DataTable, FigureData, MethodOutput, PlotResult, ZoneOutput};
use crate::models::{capacity_energy_unitconversion, PlotArgs, PlotContext, SummaryTable, TimeSeriesTable};
use crate::processing::{request_data, zone_slice};
use log::info;
use std::collections::HashMap;

const GENERATION: &str = "generator_Generation";
const CAPACITY: &str = "generator_Installed_Capacity";

/// Number of off → on transitions in a chronological output series.
pub fn count_starts(outputs: &[f64]) -> usize {
    outputs
        .windows(2)
        .filter(|pair| pair[0] == 0.0 && pair[1] != 0.0)
        .count()
}

/// Capacity started per technology: every start adds the unit's capacity.
pub fn capacity_started_by_tech(
    gen: &TimeSeriesTable,
    capacities: &HashMap<String, f64>,
    ctx: &PlotContext,
) -> Vec<(String, f64)> {
    let (Some(name_idx), Some(tech_idx)) = (gen.level_index("gen_name"), gen.level_index("tech")) else {
        return Vec::new();
    };

    let mut units: Vec<(String, String)> = Vec::new();
    let mut outputs: HashMap<String, Vec<(chrono::NaiveDateTime, f64)>> = HashMap::new();
    for row in gen.rows() {
        let tech = ctx.rename_tech(&row.keys[tech_idx]);
        if !ctx.thermal_gen_cat.contains(&tech) {
            continue;
        }
        let name = &row.keys[name_idx];
        if !outputs.contains_key(name) {
            units.push((name.clone(), tech));
        }
        outputs.entry(name.clone()).or_default().push((row.timestamp, row.value));
    }

    let mut by_tech: Vec<(String, f64)> = Vec::new();
    for (name, tech) in units {
        let mut series = outputs.remove(&name).unwrap_or_default();
        series.sort_by_key(|(ts, _)| *ts);
        let values: Vec<f64> = series.into_iter().map(|(_, v)| v).collect();
        let started = count_starts(&values) as f64 * capacities.get(&name).copied().unwrap_or(0.0);

        match by_tech.iter_mut().find(|(t, _)| *t == tech) {
            Some((_, total)) => *total += started,
            None => by_tech.push((tech, started)),
        }
    }
    by_tech.sort_by_key(|(tech, _)| ctx.tech_rank(tech));
    by_tech
}

/// Mean installed capacity per generator.
fn unit_capacities(cap: &TimeSeriesTable) -> HashMap<String, f64> {
    let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
    if let Some(idx) = cap.level_index("gen_name") {
        for row in cap.rows() {
            let entry = sums.entry(row.keys[idx].clone()).or_insert((0.0, 0));
            entry.0 += row.value;
            entry.1 += 1;
        }
    }
    sums.into_iter().map(|(k, (s, n))| (k, s / n as f64)).collect()
}

pub fn capacity_started(loader: &mut DataLoader, ctx: &PlotContext, args: &PlotArgs) -> Result<MethodOutput> {
    starts(loader, ctx, args)
}

pub fn count_ramps(loader: &mut DataLoader, ctx: &PlotContext, args: &PlotArgs) -> Result<MethodOutput> {
    starts(loader, ctx, args)
}

fn starts(loader: &mut DataLoader, ctx: &PlotContext, args: &PlotArgs) -> Result<MethodOutput> {
    let requests = [
        PropertyRequest::required(CAPACITY, &ctx.scenarios),
        PropertyRequest::required(GENERATION, &ctx.scenarios),
    ];
    let scenarios = request_data(loader, &requests)?;
    if scenarios.is_empty() {
        return Ok(MethodOutput::MissingInputData);
    }

    let mut outputs = Vec::new();
    for zone in &ctx.zones {
        info!("{} = {}", ctx.agg_by, zone);
        let mut table = SummaryTable::new("Scenario");

        for scenario in &scenarios {
            info!("Scenario = {}", scenario);
            let (Some(gen), Some(cap)) = (
                zone_slice(loader, GENERATION, scenario, ctx, zone),
                zone_slice(loader, CAPACITY, scenario, ctx, zone),
            ) else {
                continue;
            };
            let gen = match args.requested_range() {
                Some(range) => {
                    info!("Plotting specific date range: {:?} to {:?}", range.start, range.end);
                    gen.between(range)
                }
                None => gen,
            };

            let label = scenario.replace('_', " ");
            table.add_row(&label);
            for (tech, started) in capacity_started_by_tech(&gen, &unit_capacities(&cap), ctx) {
                table.set(&label, &tech, started);
            }
        }

        table.fill_nan(0.0);
        if table.is_empty() || table.is_all_zero() {
            outputs.push((zone.clone(), ZoneOutput::MissingZoneData));
            continue;
        }

        let conversion = capacity_energy_unitconversion(table.max_value());
        table.scale(conversion.divisor);

        let y_label = format!("Capacity Started ({}-starts)", conversion.units);
        let by_tech = table.transpose("tech");
        let chart = BarChart::from_table(&by_tech, &y_label, AxisFormat::Number { decimals: 1 });
        let mut data_table = by_tech;
        data_table.add_suffix(&format!(" ({}-starts)", conversion.units));

        outputs.push((
            zone.clone(),
            ZoneOutput::Figure(PlotResult {
                figure: FigureData::Bar(chart),
                title: zone.clone(),
                data_table: DataTable::Single(data_table),
            }),
        ));
    }

    Ok(MethodOutput::Zones(outputs))
}
