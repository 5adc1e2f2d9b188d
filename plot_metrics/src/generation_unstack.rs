//! Unstacked generation: one line per technology, with load context used to
//! pick the plotted window.

use crate::data_loader::{DataLoader, PropertyRequest};
use crate::error::Result;
use crate::figure::{DataTable, FigureData, LineChart, MethodOutput, Panel, PlotResult, SeriesStyle, Trace, XAxis, ZoneOutput};
use crate::models::{capacity_energy_unitconversion, DateRange, PlotArgs, PlotContext, SummaryTable, UnitConversion};
use crate::processing::{facet_labels, request_data, unix_seconds, window_around, zone_slice, TechFrame};
use chrono::NaiveDateTime;
use log::{info, warn};
use std::collections::BTreeMap;

const GENERATION: &str = "generator_Generation";
const CURTAILMENT: &str = "generator_Curtailment";
const PUMP_LOAD: &str = "generator_Pump_Load";

/// Curtailment below this (MW) is treated as solver noise.
const CURTAILMENT_FLOOR: f64 = 0.05;

/// Per-scenario frame and load context after windowing.
#[derive(Debug, Clone)]
pub struct UnstackedScenario {
    pub frame: TechFrame,
    pub unserved: BTreeMap<NaiveDateTime, f64>,
}

/// Builds one scenario's unstacked generation for `zone`, or `None` when
/// the zone has no generation or load.
pub fn unstack_scenario(
    loader: &DataLoader,
    ctx: &PlotContext,
    args: &PlotArgs,
    scenario: &str,
    zone: &str,
) -> Option<UnstackedScenario> {
    let load_property = format!("{}_Load", ctx.agg_class());
    let unserved_property = format!("{}_Unserved_Energy", ctx.agg_class());

    let gen = zone_slice(loader, GENERATION, scenario, ctx, zone)?;
    let mut frame = TechFrame::from_table(&gen, ctx);
    if frame.is_empty() {
        return None;
    }

    let curtailment_name = ctx.rename_tech("Curtailment");
    let mut re_techs = ctx.re_gen_cat.clone();
    if let Some(curt) = zone_slice(loader, CURTAILMENT, scenario, ctx, zone) {
        let curt: BTreeMap<NaiveDateTime, f64> = curt
            .sum_by_timestamp()
            .into_iter()
            .map(|(ts, v)| (ts, if v < CURTAILMENT_FLOOR { 0.0 } else { v }))
            .collect();
        frame.insert_column(&curtailment_name, &curt);
        re_techs.push(curtailment_name);
    }
    re_techs.retain(|t| frame.techs().contains(t));

    let net_load: BTreeMap<NaiveDateTime, f64> = frame
        .timestamps()
        .iter()
        .copied()
        .zip(frame.row_sums_excluding(&re_techs))
        .collect();
    frame.drop_zero_columns();

    let load = zone_slice(loader, &load_property, scenario, ctx, zone)?.sum_by_timestamp();
    let pump = zone_slice(loader, PUMP_LOAD, scenario, ctx, zone)
        .map(|p| p.sum_by_timestamp())
        .unwrap_or_default();
    let demand: BTreeMap<NaiveDateTime, f64> = if pump.values().all(|v| *v == 0.0) {
        load.clone()
    } else {
        load.iter()
            .map(|(ts, v)| (*ts, v - pump.get(ts).copied().unwrap_or(0.0)))
            .collect()
    };
    let unserved = zone_slice(loader, &unserved_property, scenario, ctx, zone)
        .map(|u| u.sum_by_timestamp())
        .unwrap_or_default();

    let window = plot_window(args, &demand, &net_load);
    let (frame, unserved) = match &window {
        Some(range) => (
            frame.between(range),
            unserved
                .into_iter()
                .filter(|(ts, _)| range.contains(*ts))
                .collect(),
        ),
        None => (frame, unserved),
    };

    Some(UnstackedScenario { frame, unserved })
}

/// Window requested by the row's `Properties`: around peak demand, around
/// minimum net load, an explicit date range, or everything.
fn plot_window(
    args: &PlotArgs,
    demand: &BTreeMap<NaiveDateTime, f64>,
    net_load: &BTreeMap<NaiveDateTime, f64>,
) -> Option<DateRange> {
    let extreme = |series: &BTreeMap<NaiveDateTime, f64>, want_max: bool| {
        series
            .iter()
            .fold(None, |best: Option<(NaiveDateTime, f64)>, (ts, v)| match best {
                Some((_, b)) if (want_max && *v <= b) || (!want_max && *v >= b) => best,
                _ => Some((*ts, *v)),
            })
            .map(|(ts, _)| ts)
    };

    if args.prop_is("Peak Demand") {
        let peak = extreme(demand, true)?;
        Some(window_around(peak, args.days_before, args.days_after))
    } else if args.prop_is("Min Net Load") {
        let min = extreme(net_load, false)?;
        Some(window_around(min, args.days_before, args.days_after))
    } else if let Some(range) = args.requested_range() {
        info!("Plotting specific date range: {:?} to {:?}", range.start, range.end);
        Some(range.clone())
    } else {
        info!("Plotting graph for entire timeperiod");
        None
    }
}

pub fn gen_unstack(loader: &mut DataLoader, ctx: &PlotContext, args: &PlotArgs) -> Result<MethodOutput> {
    let scenarios: Vec<String> = if args.facet {
        ctx.scenarios.clone()
    } else {
        ctx.scenarios.iter().take(1).cloned().collect()
    };
    let requests = [
        PropertyRequest::required(GENERATION, &scenarios),
        PropertyRequest::optional(CURTAILMENT, &scenarios),
        PropertyRequest::optional(PUMP_LOAD, &scenarios),
        PropertyRequest::required(&format!("{}_Load", ctx.agg_class()), &scenarios),
        PropertyRequest::optional(&format!("{}_Unserved_Energy", ctx.agg_class()), &scenarios),
    ];
    let scenarios = request_data(loader, &requests)?;
    if scenarios.is_empty() {
        return Ok(MethodOutput::MissingInputData);
    }

    let grid = if args.facet { ctx.facet_grid(scenarios.len()) } else { (1, 1) };

    let mut outputs = Vec::new();
    for zone in &ctx.zones {
        info!("Zone = {}", zone);
        let mut panels = Vec::new();
        let mut tables: Vec<(String, SummaryTable)> = Vec::new();
        let mut conversion: Option<UnitConversion> = None;

        for (idx, scenario) in scenarios.iter().enumerate() {
            info!("Scenario = {}", scenario);
            let (x_label, y_label) = if args.facet { facet_labels(ctx, idx, grid) } else { Default::default() };
            let mut panel = Panel {
                title: if args.facet { scenario.replace('_', " ") } else { String::new() },
                x_label,
                y_label,
                ..Default::default()
            };

            if let Some(unstacked) = unstack_scenario(loader, ctx, args, scenario, zone) {
                if !unstacked.frame.is_empty() {
                    let units = *conversion.get_or_insert_with(|| capacity_energy_unitconversion(unstacked.frame.max_value()));
                    panel.traces = traces(&unstacked, units.divisor);
                    tables.push((scenario.clone(), unstacked.frame.to_summary()));
                }
            }
            panels.push(panel);
        }

        let Some(conversion) = conversion else {
            warn!("No generation in {}", zone);
            outputs.push((zone.clone(), ZoneOutput::MissingZoneData));
            continue;
        };

        let data_table = if args.facet {
            DataTable::Faceted(tables)
        } else {
            match tables.into_iter().next() {
                Some((_, table)) => DataTable::Single(table),
                None => DataTable::None,
            }
        };

        outputs.push((
            zone.clone(),
            ZoneOutput::Figure(PlotResult {
                figure: FigureData::Line(LineChart {
                    panels,
                    x_axis: XAxis::Time {
                        timezone: args.timezone.clone(),
                    },
                    y_label: format!("Generation ({})", conversion.units),
                    grid,
                    y_range: None,
                }),
                title: zone.clone(),
                data_table,
            }),
        ));
    }

    Ok(MethodOutput::Zones(outputs))
}

fn traces(unstacked: &UnstackedScenario, divisor: f64) -> Vec<Trace> {
    let frame = &unstacked.frame;
    let mut traces: Vec<Trace> = frame
        .techs()
        .iter()
        .map(|tech| Trace {
            label: tech.clone(),
            style: SeriesStyle::Technology(tech.clone()),
            points: frame
                .timestamps()
                .iter()
                .zip(frame.column(tech).unwrap_or_default())
                .map(|(ts, v)| (unix_seconds(*ts), v / divisor))
                .collect(),
        })
        .collect();

    if unstacked.unserved.values().any(|v| *v != 0.0) {
        traces.push(Trace {
            label: "Unserved Energy".to_string(),
            style: SeriesStyle::Unserved,
            points: unstacked
                .unserved
                .iter()
                .map(|(ts, v)| (unix_seconds(*ts), v / divisor))
                .collect(),
        });
    }
    traces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeSeriesTable;
    use crate::zone_mapper::RegionMapping;
    use chrono::{Duration, NaiveDate};
    use std::path::PathBuf;

    fn ts(h: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::hours(h)
    }

    fn ctx() -> PlotContext {
        PlotContext {
            agg_by: "zone".into(),
            zones: vec!["North".into()],
            scenarios: vec!["Base".into(), "High".into()],
            ordered_gen: vec!["Coal".into(), "PV".into(), "Curtailment".into()],
            re_gen_cat: vec!["PV".into()],
            xlabels: vec!["Base".into(), "High".into()],
            ..Default::default()
        }
    }

    /// Three days of hourly data; PV peaks at noon, load peaks on day two.
    fn loader() -> DataLoader {
        let gen_levels = vec!["gen_name".to_string(), "tech".to_string(), "zone".to_string()];
        let mut loader = DataLoader::new(PathBuf::new(), "zone", RegionMapping::empty());
        for scenario in ["Base", "High"] {
            let mut gen = TimeSeriesTable::new(GENERATION, gen_levels.clone());
            let mut curt = TimeSeriesTable::new(CURTAILMENT, gen_levels.clone());
            let mut load = TimeSeriesTable::new("zone_Load", vec!["zone".into()]);
            for h in 0..72 {
                let hour = h % 24;
                let pv = if (8..16).contains(&hour) { 50.0 } else { 0.0 };
                let demand = if h == 36 { 400.0 } else { 200.0 };
                gen.push(ts(h), vec!["c1".into(), "Coal".into(), "North".into()], demand - pv);
                gen.push(ts(h), vec!["pv1".into(), "PV".into(), "North".into()], pv);
                gen.push(ts(h), vec!["w1".into(), "Wind".into(), "North".into()], 0.0);
                curt.push(ts(h), vec!["pv1".into(), "PV".into(), "North".into()], if hour == 12 { 10.0 } else { 0.01 });
                load.push(ts(h), vec!["North".into()], demand);
            }
            loader.insert(GENERATION, scenario, gen);
            loader.insert(CURTAILMENT, scenario, curt);
            loader.insert("zone_Load", scenario, load);
        }
        loader
    }

    #[test]
    fn test_unstack_inserts_curtailment_and_drops_zero_techs() {
        let loader = loader();
        let unstacked = unstack_scenario(&loader, &ctx(), &PlotArgs::default(), "Base", "North").unwrap();

        assert_eq!(
            unstacked.frame.techs(),
            &["Coal".to_string(), "PV".to_string(), "Curtailment".to_string()]
        );
        let curtailment = unstacked.frame.column("Curtailment").unwrap();
        assert_eq!(curtailment[0], 0.0);
        assert_eq!(curtailment[12], 10.0);
    }

    #[test]
    fn test_peak_demand_window() {
        let loader = loader();
        let args = PlotArgs {
            prop: Some("Peak Demand".into()),
            days_before: 0.25,
            days_after: 0.25,
            ..Default::default()
        };
        let unstacked = unstack_scenario(&loader, &ctx(), &args, "Base", "North").unwrap();
        assert_eq!(unstacked.frame.timestamps().first(), Some(&ts(30)));
        assert_eq!(unstacked.frame.timestamps().last(), Some(&ts(42)));
    }

    #[test]
    fn test_gen_unstack_facets_by_scenario() {
        let mut loader = loader();
        let args = PlotArgs {
            facet: true,
            ..Default::default()
        };
        let output = gen_unstack(&mut loader, &ctx(), &args).unwrap();
        let Some(ZoneOutput::Figure(result)) = output.zone("North") else {
            panic!("expected a figure");
        };
        let FigureData::Line(chart) = &result.figure else {
            panic!("expected a line chart");
        };
        assert_eq!(chart.grid, (1, 2));
        assert_eq!(chart.panels.len(), 2);
        assert_eq!(chart.y_label, "Generation (MW)");
        let DataTable::Faceted(tables) = &result.data_table else {
            panic!("expected faceted tables");
        };
        assert_eq!(tables.len(), 2);
    }

    #[test]
    fn test_gen_unstack_without_load_is_missing_input() {
        let mut loader = DataLoader::new(PathBuf::from("/nonexistent"), "zone", RegionMapping::empty());
        let output = gen_unstack(&mut loader, &ctx(), &PlotArgs::default()).unwrap();
        assert_eq!(output, MethodOutput::MissingInputData);
    }
}
