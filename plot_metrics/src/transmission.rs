use crate::data_loader::{DataLoader, PropertyRequest};
use crate::error::Result;
use crate::figure::{
    histogram, DataTable, FigureData, HistogramChart, HistogramPanel, LineChart, MethodOutput, Panel,
    PlotResult, SeriesStyle, Trace, XAxis, ZoneOutput,
};
use crate::models::{PlotArgs, PlotContext, SummaryTable, TimeSeriesTable};
use crate::processing::{facet_labels, format_timestamp, request_data, series_between, unix_seconds, zone_slice};
use chrono::NaiveDateTime;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const LINE_FLOW: &str = "line_Flow";
const REGION_INTERCHANGE: &str = "region_regions_Net_Interchange";

/// Key under which system-wide line plots are reported.
pub const SYSTEM: &str = "system";

pub const HISTOGRAM_BINS: usize = 20;

/// Outer join of timestamp-keyed series: one row per timestamp seen in any
/// series, NaN where a series has no value.
pub fn outer_join(series: &[(String, BTreeMap<NaiveDateTime, f64>)]) -> SummaryTable {
    let stamps: BTreeSet<NaiveDateTime> = series.iter().flat_map(|(_, s)| s.keys().copied()).collect();
    let mut table = SummaryTable::new("timestamp");
    table.columns = series.iter().map(|(name, _)| name.clone()).collect();
    for ts in stamps {
        table.index.push(format_timestamp(ts));
        table
            .values
            .push(series.iter().map(|(_, s)| s.get(&ts).copied().unwrap_or(f64::NAN)).collect());
    }
    table
}

fn time_trace(label: &str, style: SeriesStyle, series: &BTreeMap<NaiveDateTime, f64>) -> Trace {
    Trace {
        label: label.to_string(),
        style,
        points: series.iter().map(|(ts, v)| (unix_seconds(*ts), *v)).collect(),
    }
}

/// Net exports of each zone, one line per scenario.
pub fn net_export(loader: &mut DataLoader, ctx: &PlotContext, args: &PlotArgs) -> Result<MethodOutput> {
    let property = format!("{}_Net_Interchange", ctx.agg_class());
    let requests = [PropertyRequest::required(&property, &ctx.scenarios)];
    let scenarios = request_data(loader, &requests)?;
    if scenarios.is_empty() {
        return Ok(MethodOutput::MissingInputData);
    }

    let mut outputs = Vec::new();
    for zone in &ctx.zones {
        info!("{} = {}", ctx.agg_by, zone);
        let mut series: Vec<(String, BTreeMap<NaiveDateTime, f64>)> = Vec::new();

        for scenario in &scenarios {
            info!("Scenario = {}", scenario);
            let Some(interchange) = zone_slice(loader, &property, scenario, ctx, zone) else {
                continue;
            };
            let net = series_between(&interchange.sum_by_timestamp(), args.requested_range());
            if !net.is_empty() {
                series.push((scenario.clone(), net));
            }
        }

        if series.is_empty() {
            outputs.push((zone.clone(), ZoneOutput::MissingZoneData));
            continue;
        }

        let traces = series
            .iter()
            .enumerate()
            .map(|(idx, (scenario, s))| time_trace(scenario, SeriesStyle::Scenario(idx), s))
            .collect();
        let table = outer_join(&series);

        outputs.push((
            zone.clone(),
            ZoneOutput::Figure(PlotResult {
                figure: FigureData::Line(LineChart {
                    panels: vec![Panel {
                        traces,
                        x_label: format!("Date ({})", args.timezone),
                        ..Default::default()
                    }],
                    x_axis: XAxis::Time {
                        timezone: args.timezone.clone(),
                    },
                    y_label: "Net exports (MW)".to_string(),
                    grid: (1, 1),
                    y_range: None,
                }),
                title: zone.clone(),
                data_table: DataTable::Single(table),
            }),
        ));
    }

    Ok(MethodOutput::Zones(outputs))
}

/// Flows from `zone` to each neighbouring unit, with regions mapped to the
/// aggregation and neighbours that never exchange energy dropped.
pub fn neighbour_flows(
    interchange: &TimeSeriesTable,
    mapping: &HashMap<String, String>,
    zone: &str,
) -> BTreeMap<String, BTreeMap<NaiveDateTime, f64>> {
    let (Some(parent_idx), Some(child_idx)) = (interchange.level_index("parent"), interchange.level_index("child"))
    else {
        return BTreeMap::new();
    };
    let map = |region: &str| -> Option<String> {
        if mapping.is_empty() {
            Some(region.to_string())
        } else {
            mapping.get(region).cloned()
        }
    };

    let mut flows: BTreeMap<String, BTreeMap<NaiveDateTime, f64>> = BTreeMap::new();
    for row in interchange.rows() {
        let (Some(parent), Some(child)) = (map(&row.keys[parent_idx]), map(&row.keys[child_idx])) else {
            continue;
        };
        if parent != zone {
            continue;
        }
        *flows.entry(child).or_default().entry(row.timestamp).or_insert(0.0) += row.value;
    }
    flows.retain(|_, series| series.values().any(|v| *v != 0.0));
    flows
}

/// Faceted interchange between each zone and its neighbours, one panel per
/// scenario.
pub fn zone_zone_interchange(
    loader: &mut DataLoader,
    ctx: &PlotContext,
    args: &PlotArgs,
) -> Result<MethodOutput> {
    let requests = [PropertyRequest::required(REGION_INTERCHANGE, &ctx.scenarios)];
    let scenarios = request_data(loader, &requests)?;
    if scenarios.is_empty() {
        return Ok(MethodOutput::MissingInputData);
    }

    let mapping = if ctx.agg_by != "region" && ctx.region_mapping.has_column(&ctx.agg_by) {
        ctx.region_mapping.region_to(&ctx.agg_by)
    } else {
        HashMap::new()
    };
    let grid = ctx.facet_grid(scenarios.len());

    let mut outputs = Vec::new();
    for zone in &ctx.zones {
        info!("{} = {}", ctx.agg_by, zone);
        let mut panels = Vec::new();
        let mut tables = Vec::new();

        for (idx, scenario) in scenarios.iter().enumerate() {
            info!("Scenario = {}", scenario);
            let (x_label, y_label) = facet_labels(ctx, idx, grid);
            let mut panel = Panel {
                title: scenario.replace('_', " "),
                x_label,
                y_label,
                ..Default::default()
            };

            if let Some(interchange) = loader.get(REGION_INTERCHANGE, scenario) {
                let flows: Vec<(String, BTreeMap<NaiveDateTime, f64>)> = neighbour_flows(interchange, &mapping, zone)
                    .into_iter()
                    .map(|(child, s)| (child, series_between(&s, args.requested_range())))
                    .collect();
                panel.traces = flows
                    .iter()
                    .enumerate()
                    .map(|(i, (child, s))| time_trace(child, SeriesStyle::Plain(i), s))
                    .collect();
                if !flows.is_empty() {
                    tables.push((scenario.clone(), outer_join(&flows)));
                }
            }
            panels.push(panel);
        }

        if tables.is_empty() {
            outputs.push((zone.clone(), ZoneOutput::MissingZoneData));
            continue;
        }

        outputs.push((
            zone.clone(),
            ZoneOutput::Figure(PlotResult {
                figure: FigureData::Line(LineChart {
                    panels,
                    x_axis: XAxis::Time {
                        timezone: args.timezone.clone(),
                    },
                    y_label: "Flow to zone indicated in legend (MW)".to_string(),
                    grid,
                    y_range: None,
                }),
                title: zone.clone(),
                data_table: DataTable::Faceted(tables),
            }),
        ));
    }

    Ok(MethodOutput::Zones(outputs))
}

/// |flow| / max |flow| per line, chronological. Lines that never carry flow
/// are skipped.
pub fn line_utilization(flow: &TimeSeriesTable) -> BTreeMap<String, Vec<f64>> {
    let mut utilization = BTreeMap::new();
    for (line, series) in flow.series_by("line_name") {
        let max = series.iter().map(|(_, v)| v.abs()).fold(0.0, f64::max);
        if max == 0.0 {
            continue;
        }
        utilization.insert(line, series.iter().map(|(_, v)| v.abs() / max).collect());
    }
    utilization
}

/// Line category from the row's `Properties`, if one is set.
fn line_category(args: &PlotArgs) -> Option<&str> {
    args.prop
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("nan"))
}

/// Line flows for `scenario`, restricted to the requested category.
fn scenario_flows(loader: &DataLoader, scenario: &str, category: Option<&str>) -> Option<TimeSeriesTable> {
    let flow = loader.get(LINE_FLOW, scenario)?;
    let Some(category) = category else {
        return Some(flow.clone());
    };
    info!("Line category = {}", category);
    match loader.line_relations(scenario) {
        Ok(relations) => {
            let idx = flow.level_index("line_name")?;
            Some(flow.filter(|r| relations.get(&r.keys[idx]).map(String::as_str) == Some(category)))
        }
        Err(e) => {
            warn!("Cannot filter lines by category for {}: {}", scenario, e);
            None
        }
    }
}

fn category_label(category: Option<&str>) -> String {
    format!("Line category: {}", category.unwrap_or("all"))
}

/// Duration curve of every line's utilization, one panel per scenario.
pub fn line_util(loader: &mut DataLoader, ctx: &PlotContext, args: &PlotArgs) -> Result<MethodOutput> {
    let requests = [PropertyRequest::required(LINE_FLOW, &ctx.scenarios)];
    let scenarios = request_data(loader, &requests)?;
    if scenarios.is_empty() {
        return Ok(MethodOutput::MissingInputData);
    }
    info!("Line analysis done only once (not per zone).");
    let category = line_category(args);

    let mut panels = Vec::new();
    for scenario in &scenarios {
        info!("Scenario = {}", scenario);
        let Some(flow) = scenario_flows(loader, scenario, category) else {
            continue;
        };
        let traces = line_utilization(&flow)
            .into_iter()
            .enumerate()
            .map(|(idx, (line, mut util))| {
                util.sort_by(|a, b| b.total_cmp(a));
                Trace {
                    label: line,
                    style: SeriesStyle::Plain(idx),
                    points: util.into_iter().enumerate().map(|(i, u)| (i as f64, u)).collect(),
                }
            })
            .collect();
        panels.push(Panel {
            title: scenario.replace('_', " "),
            traces,
            x_label: "Intervals".to_string(),
            y_label: format!("{} Line Utilization\n{}", scenario, category_label(category)),
        });
    }

    if panels.iter().all(|p| p.traces.is_empty()) {
        return Ok(MethodOutput::Zones(vec![(SYSTEM.to_string(), ZoneOutput::MissingZoneData)]));
    }

    let rows = panels.len();
    Ok(MethodOutput::Zones(vec![(
        SYSTEM.to_string(),
        ZoneOutput::Figure(PlotResult {
            figure: FigureData::Line(LineChart {
                panels,
                x_axis: XAxis::Numeric,
                y_label: String::new(),
                grid: (rows, 1),
                y_range: Some((0.0, 1.1)),
            }),
            title: String::new(),
            data_table: DataTable::None,
        }),
    )]))
}

/// Histogram of each line's mean utilization, one panel per scenario.
pub fn line_hist(loader: &mut DataLoader, ctx: &PlotContext, args: &PlotArgs) -> Result<MethodOutput> {
    let requests = [PropertyRequest::required(LINE_FLOW, &ctx.scenarios)];
    let scenarios = request_data(loader, &requests)?;
    if scenarios.is_empty() {
        return Ok(MethodOutput::MissingInputData);
    }
    info!("Line analysis done only once (not per zone).");
    let category = line_category(args);

    let mut panels = Vec::new();
    let mut table = SummaryTable::new("line_name");
    for scenario in &scenarios {
        info!("Scenario = {}", scenario);
        let Some(flow) = scenario_flows(loader, scenario, category) else {
            continue;
        };
        let mut means = Vec::new();
        for (line, util) in line_utilization(&flow) {
            let mean = util.iter().sum::<f64>() / util.len() as f64;
            table.set(&line, scenario, mean);
            means.push(mean);
        }
        panels.push(HistogramPanel {
            title: scenario.replace('_', " "),
            y_label: format!("{} Number of lines\n{}", scenario, category_label(category)),
            counts: histogram(&means, HISTOGRAM_BINS, (0.0, 1.0)),
        });
    }

    if table.is_empty() {
        return Ok(MethodOutput::Zones(vec![(SYSTEM.to_string(), ZoneOutput::MissingZoneData)]));
    }

    Ok(MethodOutput::Zones(vec![(
        SYSTEM.to_string(),
        ZoneOutput::Figure(PlotResult {
            figure: FigureData::Histogram(HistogramChart {
                panels,
                range: (0.0, 1.0),
                x_label: "Utilization".to_string(),
            }),
            title: String::new(),
            data_table: DataTable::Single(table),
        }),
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DateRange;
    use crate::zone_mapper::RegionMapping;
    use chrono::{Duration, NaiveDate};
    use std::io::Write;
    use std::path::PathBuf;

    fn ts(h: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::hours(h)
    }

    fn ctx(scenarios: &[&str]) -> PlotContext {
        PlotContext {
            agg_by: "zone".into(),
            zones: vec!["North".into()],
            scenarios: scenarios.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_net_export_outer_join() {
        let mut loader = DataLoader::new(PathBuf::new(), "zone", RegionMapping::empty());
        let mut base = TimeSeriesTable::new("zone_Net_Interchange", vec!["zone".into()]);
        base.push(ts(0), vec!["North".into()], 10.0);
        base.push(ts(1), vec!["North".into()], -5.0);
        let mut shifted = TimeSeriesTable::new("zone_Net_Interchange", vec!["zone".into()]);
        shifted.push(ts(1), vec!["North".into()], 3.0);
        shifted.push(ts(2), vec!["North".into()], 4.0);
        loader.insert("zone_Net_Interchange", "Base", base);
        loader.insert("zone_Net_Interchange", "Shifted", shifted);

        let output = net_export(&mut loader, &ctx(&["Base", "Shifted"]), &PlotArgs::default()).unwrap();
        let Some(ZoneOutput::Figure(result)) = output.zone("North") else {
            panic!("expected a figure");
        };
        let DataTable::Single(table) = &result.data_table else {
            panic!("expected a table");
        };
        assert_eq!(table.index.len(), 3);
        assert!(table.column("Base").unwrap()[2].is_nan());
        assert!(table.column("Shifted").unwrap()[0].is_nan());
        assert_eq!(table.get("2024-01-01 01:00:00", "Shifted"), Some(3.0));
    }

    #[test]
    fn test_net_export_date_range() {
        let mut loader = DataLoader::new(PathBuf::new(), "zone", RegionMapping::empty());
        let mut base = TimeSeriesTable::new("zone_Net_Interchange", vec!["zone".into()]);
        for h in 0..5 {
            base.push(ts(h), vec!["North".into()], h as f64);
        }
        loader.insert("zone_Net_Interchange", "Base", base);
        let args = PlotArgs {
            prop: Some("Date Range".into()),
            date_range: Some(DateRange::new(Some(ts(1)), Some(ts(3)))),
            ..Default::default()
        };

        let output = net_export(&mut loader, &ctx(&["Base"]), &args).unwrap();
        let Some(ZoneOutput::Figure(result)) = output.zone("North") else {
            panic!("expected a figure");
        };
        let DataTable::Single(table) = &result.data_table else {
            panic!("expected a table");
        };
        assert_eq!(table.column("Base").unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_neighbour_flows_maps_and_drops_zero() {
        let mut interchange = TimeSeriesTable::new(REGION_INTERCHANGE, vec!["parent".into(), "child".into()]);
        interchange.push(ts(0), vec!["r1".into(), "r3".into()], 5.0);
        interchange.push(ts(0), vec!["r2".into(), "r3".into()], 2.0);
        interchange.push(ts(0), vec!["r1".into(), "r4".into()], 0.0);
        interchange.push(ts(0), vec!["r3".into(), "r1".into()], -5.0);
        let mapping = HashMap::from([
            ("r1".to_string(), "North".to_string()),
            ("r2".to_string(), "North".to_string()),
            ("r3".to_string(), "South".to_string()),
            ("r4".to_string(), "West".to_string()),
        ]);

        let flows = neighbour_flows(&interchange, &mapping, "North");
        assert_eq!(flows.keys().collect::<Vec<_>>(), vec!["South"]);
        assert_eq!(flows["South"][&ts(0)], 7.0);
    }

    #[test]
    fn test_line_utilization_skips_idle_lines() {
        let mut flow = TimeSeriesTable::new(LINE_FLOW, vec!["line_name".into()]);
        for (h, v) in [(0, 50.0), (1, -100.0), (2, 25.0)] {
            flow.push(ts(h), vec!["L1".into()], v);
            flow.push(ts(h), vec!["L2".into()], 0.0);
        }
        let util = line_utilization(&flow);
        assert_eq!(util.len(), 1);
        assert_eq!(util["L1"], vec![0.5, 1.0, 0.25]);
    }

    #[test]
    fn test_line_hist_filters_category() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Base")).unwrap();
        let mut file = std::fs::File::create(dir.path().join("Base").join("line_relations.csv")).unwrap();
        writeln!(file, "name,category").unwrap();
        writeln!(file, "L1,345kV").unwrap();
        writeln!(file, "L2,230kV").unwrap();
        drop(file);

        let mut flow = TimeSeriesTable::new(LINE_FLOW, vec!["line_name".into()]);
        for (h, v) in [(0, 100.0), (1, 100.0)] {
            flow.push(ts(h), vec!["L1".into()], v);
            flow.push(ts(h), vec!["L2".into()], v / 2.0);
        }
        let mut loader = DataLoader::new(dir.path().to_path_buf(), "zone", RegionMapping::empty());
        loader.insert(LINE_FLOW, "Base", flow);
        let args = PlotArgs {
            prop: Some("345kV".into()),
            ..Default::default()
        };

        let output = line_hist(&mut loader, &ctx(&["Base"]), &args).unwrap();
        let Some(ZoneOutput::Figure(result)) = output.zone(SYSTEM) else {
            panic!("expected a figure");
        };
        let FigureData::Histogram(chart) = &result.figure else {
            panic!("expected a histogram");
        };
        assert_eq!(chart.panels[0].counts.len(), HISTOGRAM_BINS);
        assert_eq!(chart.panels[0].counts[HISTOGRAM_BINS - 1], 1);
        let DataTable::Single(table) = &result.data_table else {
            panic!("expected a table");
        };
        assert_eq!(table.index, vec!["L1"]);
    }
}
