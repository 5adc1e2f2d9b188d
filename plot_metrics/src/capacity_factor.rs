//! Capacity factor, average output when committed and time at minimum
//! generation, per technology and scenario.

use crate::data_loader::{DataLoader, PropertyRequest};
use crate::error::Result;
use crate::figure::{AxisFormat, BarChart, DataTable, FigureData, MethodOutput, PlotResult, ZoneOutput};
use crate::models::{DateRange, PlotArgs, PlotContext, SummaryTable, TimeSeriesTable};
use crate::processing::{interval_stats, request_data, weighted_average, zone_slice, TechFrame};
use chrono::{Datelike, NaiveDateTime};
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};

const GENERATION: &str = "generator_Generation";
const CAPACITY: &str = "generator_Installed_Capacity";
const HOURS_AT_MINIMUM: &str = "generator_Hours_at_Minimum";

/// Generation ÷ (installed capacity × covered hours) for every technology.
pub fn cf(loader: &mut DataLoader, ctx: &PlotContext, args: &PlotArgs) -> Result<MethodOutput> {
    let requests = [
        PropertyRequest::required(GENERATION, &ctx.scenarios),
        PropertyRequest::required(CAPACITY, &ctx.scenarios),
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
            let Some(gen) = zone_slice(loader, GENERATION, scenario, ctx, zone) else {
                continue;
            };
            let Some(cap) = zone_slice(loader, CAPACITY, scenario, ctx, zone) else {
                continue;
            };
            let (gen, cap) = match &args.date_range {
                Some(range) => (gen.between(range), capacity_within(&cap, range)),
                None => (gen, cap),
            };
            if gen.is_empty() {
                warn!("No data in selected Date Range");
                continue;
            }

            let gen = TechFrame::from_table(&gen, ctx);
            let cap = TechFrame::from_table(&cap, ctx);
            let Some(stats) = interval_stats(gen.timestamps()) else {
                warn!("{} in {} has fewer than two intervals", scenario, zone);
                continue;
            };

            let total_gen = group_totals(&gen, scenario, args, stats.intervals_per_hour);
            let total_cap = group_means(&cap, scenario, args);

            for (group, techs) in &total_gen {
                table.add_row(group);
                for (tech, energy) in techs {
                    let capacity = total_cap
                        .get(group)
                        .and_then(|c| c.get(tech))
                        .copied()
                        .unwrap_or(f64::NAN);
                    let value = energy / (capacity * stats.duration_hours);
                    table.set(group, tech, if value.is_finite() { value } else { 0.0 });
                }
            }
        }

        table.fill_nan(0.0);
        table.sort_columns_by_key(|tech| ctx.tech_rank(tech));
        outputs.push((zone.clone(), bar_output(table, zone, "Capacity Factor", false)));
    }

    Ok(MethodOutput::Zones(outputs))
}

/// Capacity-weighted mean of each committed thermal unit's output over the
/// intervals it was online.
pub fn avg_output_when_committed(
    loader: &mut DataLoader,
    ctx: &PlotContext,
    args: &PlotArgs,
) -> Result<MethodOutput> {
    let requests = [
        PropertyRequest::required(GENERATION, &ctx.scenarios),
        PropertyRequest::required(CAPACITY, &ctx.scenarios),
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
            let Some(gen) = zone_slice(loader, GENERATION, scenario, ctx, zone) else {
                continue;
            };
            let Some(cap) = zone_slice(loader, CAPACITY, scenario, ctx, zone) else {
                continue;
            };
            let (gen, cap) = match &args.date_range {
                Some(range) => (gen.between(range), capacity_within(&cap, range)),
                None => (gen, cap),
            };
            let gen = thermal_units(&gen, ctx);
            if gen.is_empty() {
                warn!("No thermal generation for {} in {}", scenario, zone);
                continue;
            }
            let capacities = unit_capacity_by_year(&cap);

            let mut groups: Vec<String> = Vec::new();
            for unit in &gen {
                for group in unit.groups(scenario, args) {
                    if !groups.contains(&group) {
                        groups.push(group);
                    }
                }
            }

            for group in &groups {
                let mut techs: Vec<String> = gen.iter().map(|u| u.tech.clone()).collect();
                techs.sort();
                techs.dedup();

                for tech in techs {
                    let mut cfs = Vec::new();
                    let mut caps = Vec::new();
                    for unit in gen.iter().filter(|u| u.tech == tech) {
                        let points = unit.points_in_group(scenario, args, group);
                        if points.iter().all(|(_, v)| *v == 0.0) {
                            continue;
                        }
                        let stamps: Vec<NaiveDateTime> = points.iter().map(|(t, _)| *t).collect();
                        let Some(stats) = interval_stats(&stamps) else {
                            continue;
                        };
                        let Some(capacity) = capacity_for(&capacities, &unit.gen_name, stamps[0].year()) else {
                            continue;
                        };
                        let committed: f64 = points.iter().map(|(_, v)| *v).filter(|v| *v != 0.0).sum();
                        let total = committed / stats.intervals_per_hour;
                        cfs.push(total / (capacity * stats.duration_hours));
                        caps.push(capacity);
                    }
                    if let Some(value) = weighted_average(&cfs, &caps) {
                        table.set(group, &tech, value);
                    }
                }
            }
        }

        table.sort_columns_by_key(|tech| ctx.tech_rank(tech));
        outputs.push((
            zone.clone(),
            bar_output(table, zone, "Average Output When Committed", true),
        ));
    }

    Ok(MethodOutput::Zones(outputs))
}

/// Share of each unit's online hours spent at minimum generation, averaged
/// over the technology by installed capacity. VRE is excluded.
pub fn time_at_min_gen(
    loader: &mut DataLoader,
    ctx: &PlotContext,
    args: &PlotArgs,
) -> Result<MethodOutput> {
    let requests = [
        PropertyRequest::required(GENERATION, &ctx.scenarios),
        PropertyRequest::required(CAPACITY, &ctx.scenarios),
        PropertyRequest::required(HOURS_AT_MINIMUM, &ctx.scenarios),
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
            let Some(min) = zone_slice(loader, HOURS_AT_MINIMUM, scenario, ctx, zone) else {
                continue;
            };
            let Some(gen) = zone_slice(loader, GENERATION, scenario, ctx, zone) else {
                continue;
            };
            let Some(cap) = zone_slice(loader, CAPACITY, scenario, ctx, zone) else {
                continue;
            };
            let (min, gen, cap) = match &args.date_range {
                Some(range) => (min.between(range), gen.between(range), capacity_within(&cap, range)),
                None => (min, gen, cap),
            };
            if gen.is_empty() {
                warn!("No data in selected Date Range");
                continue;
            }

            let hours_at_min = per_unit_totals(&min);
            let capacities: HashMap<String, f64> = unit_capacity_by_year(&cap)
                .into_iter()
                .map(|(name, by_year)| (name, mean(by_year.values().copied())))
                .collect();

            // tech -> (fraction at minimum, capacity) per online unit
            let mut by_tech: Vec<(String, Vec<f64>, Vec<f64>)> = Vec::new();
            for unit in units_of(&gen, ctx) {
                if ctx.vre_gen_cat.contains(&unit.tech) {
                    continue;
                }
                let Some(stats) = interval_stats(&unit.timestamps()) else {
                    continue;
                };
                let online = unit.points.iter().filter(|(_, v)| *v != 0.0).count();
                let Some(at_min) = hours_at_min.get(&unit.gen_name) else {
                    continue;
                };
                if online == 0 {
                    continue;
                }
                let hours_online = online as f64 * stats.step_hours();
                let capacity = capacities.get(&unit.gen_name).copied().unwrap_or(0.0);

                match by_tech.iter_mut().find(|(t, _, _)| *t == unit.tech) {
                    Some(entry) => {
                        entry.1.push(at_min / hours_online);
                        entry.2.push(capacity);
                    }
                    None => by_tech.push((unit.tech.clone(), vec![at_min / hours_online], vec![capacity])),
                }
            }

            table.add_row(scenario);
            for (tech, fractions, weights) in by_tech {
                if let Some(value) = weighted_average(&fractions, &weights) {
                    table.set(scenario, &tech, value);
                }
            }
        }

        table.sort_columns_by_key(|tech| ctx.tech_rank(tech));
        outputs.push((
            zone.clone(),
            bar_output(table, zone, "Percentage of time online at minimum generation", true),
        ));
    }

    Ok(MethodOutput::Zones(outputs))
}

/// Bars with technologies along x and one group per scenario row. The data
/// table keeps scenarios as rows unless `tech_rows` is set.
fn bar_output(table: SummaryTable, zone: &str, y_label: &str, tech_rows: bool) -> ZoneOutput {
    if table.is_empty() || table.is_all_zero() {
        return ZoneOutput::MissingZoneData;
    }
    let by_tech = table.transpose("tech");
    let chart = BarChart::from_table(&by_tech, y_label, AxisFormat::Percent);
    let data_table = if tech_rows { by_tech } else { table };
    ZoneOutput::Figure(PlotResult {
        figure: FigureData::Bar(chart),
        title: zone.to_string(),
        data_table: DataTable::Single(data_table),
    })
}

/// Sums a frame's columns per bar group, dividing each interval by
/// `intervals_per_hour` to turn power into energy.
fn group_totals(
    frame: &TechFrame,
    scenario: &str,
    args: &PlotArgs,
    intervals_per_hour: f64,
) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut totals: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for (idx, ts) in frame.timestamps().iter().enumerate() {
        let group = totals.entry(args.groupby.label(*ts, scenario)).or_default();
        for (tech, value) in frame.techs().iter().zip(frame.row(idx)) {
            *group.entry(tech.clone()).or_insert(0.0) += value / intervals_per_hour;
        }
    }
    totals
}

/// Fleet capacity per bar group: summed over generators, averaged over the
/// timestamps capacity is reported at.
fn group_means(frame: &TechFrame, scenario: &str, args: &PlotArgs) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for ts in frame.timestamps() {
        *counts.entry(args.groupby.label(*ts, scenario)).or_insert(0) += 1;
    }
    let mut means = group_totals(frame, scenario, args, 1.0);
    for (group, techs) in &mut means {
        let n = counts.get(group).copied().unwrap_or(1) as f64;
        for value in techs.values_mut() {
            *value /= n;
        }
    }
    means
}

/// Chronological output of one generator.
#[derive(Debug, Clone)]
struct UnitSeries {
    gen_name: String,
    tech: String,
    points: Vec<(NaiveDateTime, f64)>,
}

impl UnitSeries {
    fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.points.iter().map(|(t, _)| *t).collect()
    }

    /// Bar groups this unit has observations in, in chronological order.
    fn groups(&self, scenario: &str, args: &PlotArgs) -> Vec<String> {
        let mut groups: Vec<String> = Vec::new();
        for (ts, _) in &self.points {
            let label = args.groupby.label(*ts, scenario);
            if !groups.contains(&label) {
                groups.push(label);
            }
        }
        groups
    }

    fn points_in_group(&self, scenario: &str, args: &PlotArgs, group: &str) -> Vec<(NaiveDateTime, f64)> {
        self.points
            .iter()
            .filter(|(ts, _)| args.groupby.label(*ts, scenario) == group)
            .copied()
            .collect()
    }
}

/// One series per generator, technology renamed.
fn units_of(table: &TimeSeriesTable, ctx: &PlotContext) -> Vec<UnitSeries> {
    let renamed = table.map_level("tech", |t| ctx.rename_tech(t));
    let (Some(name_idx), Some(tech_idx)) = (renamed.level_index("gen_name"), renamed.level_index("tech")) else {
        return Vec::new();
    };

    let mut units: Vec<UnitSeries> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in renamed.rows() {
        let name = &row.keys[name_idx];
        let pos = *index.entry(name.clone()).or_insert_with(|| {
            units.push(UnitSeries {
                gen_name: name.clone(),
                tech: row.keys[tech_idx].clone(),
                points: Vec::new(),
            });
            units.len() - 1
        });
        units[pos].points.push((row.timestamp, row.value));
    }
    for unit in &mut units {
        unit.points.sort_by_key(|(ts, _)| *ts);
    }
    units
}

fn thermal_units(table: &TimeSeriesTable, ctx: &PlotContext) -> Vec<UnitSeries> {
    units_of(table, ctx)
        .into_iter()
        .filter(|u| ctx.thermal_gen_cat.contains(&u.tech))
        .collect()
}

/// Mean installed capacity per generator per year.
fn unit_capacity_by_year(table: &TimeSeriesTable) -> HashMap<String, BTreeMap<i32, f64>> {
    let mut sums: HashMap<String, BTreeMap<i32, (f64, usize)>> = HashMap::new();
    if let Some(name_idx) = table.level_index("gen_name") {
        for row in table.rows() {
            let cell = sums
                .entry(row.keys[name_idx].clone())
                .or_default()
                .entry(row.timestamp.year())
                .or_insert((0.0, 0));
            cell.0 += row.value;
            cell.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(name, years)| {
            let means = years.into_iter().map(|(y, (s, n))| (y, s / n as f64)).collect();
            (name, means)
        })
        .collect()
}

/// Capacity rows inside `range`; capacity reported only outside the window
/// (annual values stamped on 1 January) is kept whole.
fn capacity_within(cap: &TimeSeriesTable, range: &DateRange) -> TimeSeriesTable {
    let inside = cap.between(range);
    if inside.is_empty() {
        cap.clone()
    } else {
        inside
    }
}

/// Capacity of `gen_name` in `year`, or its mean over every year on record.
fn capacity_for(capacities: &HashMap<String, BTreeMap<i32, f64>>, gen_name: &str, year: i32) -> Option<f64> {
    let by_year = capacities.get(gen_name)?;
    Some(
        by_year
            .get(&year)
            .copied()
            .unwrap_or_else(|| mean(by_year.values().copied())),
    )
}

fn per_unit_totals(table: &TimeSeriesTable) -> HashMap<String, f64> {
    let mut totals = HashMap::new();
    if let Some(name_idx) = table.level_index("gen_name") {
        for row in table.rows() {
            *totals.entry(row.keys[name_idx].clone()).or_insert(0.0) += row.value;
        }
    }
    totals
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone_mapper::RegionMapping;
    use chrono::{Duration, NaiveDate};
    use std::path::PathBuf;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn levels() -> Vec<String> {
        vec!["gen_name".into(), "tech".into(), "zone".into()]
    }

    fn ctx() -> PlotContext {
        PlotContext {
            agg_by: "zone".into(),
            zones: vec!["North".into()],
            scenarios: vec!["Base".into()],
            ordered_gen: vec!["Coal".into(), "Gas-CT".into(), "PV".into()],
            thermal_gen_cat: vec!["Coal".into(), "Gas-CT".into()],
            vre_gen_cat: vec!["PV".into()],
            ..Default::default()
        }
    }

    /// 48 hourly intervals: a 100 MW coal unit at 50 MW, a 10 MW PV unit
    /// alternating 0/10 and a 20 MW peaker that runs at 20 MW for 6 hours.
    fn loader() -> DataLoader {
        let mut gen = TimeSeriesTable::new(GENERATION, levels());
        let mut cap = TimeSeriesTable::new(CAPACITY, levels());
        let mut min = TimeSeriesTable::new(HOURS_AT_MINIMUM, levels());
        for h in 0..48 {
            let ts = start() + Duration::hours(h);
            gen.push(ts, vec!["c1".into(), "Coal".into(), "North".into()], 50.0);
            gen.push(ts, vec!["pv1".into(), "PV".into(), "North".into()], if h % 2 == 0 { 0.0 } else { 10.0 });
            gen.push(ts, vec!["ct1".into(), "Gas-CT".into(), "North".into()], if h < 6 { 20.0 } else { 0.0 });
        }
        cap.push(start(), vec!["c1".into(), "Coal".into(), "North".into()], 100.0);
        cap.push(start(), vec!["pv1".into(), "PV".into(), "North".into()], 10.0);
        cap.push(start(), vec!["ct1".into(), "Gas-CT".into(), "North".into()], 20.0);
        min.push(start(), vec!["c1".into(), "Coal".into(), "North".into()], 12.0);
        min.push(start(), vec!["ct1".into(), "Gas-CT".into(), "North".into()], 3.0);

        let mut loader = DataLoader::new(PathBuf::new(), "zone", RegionMapping::empty());
        loader.insert(GENERATION, "Base", gen);
        loader.insert(CAPACITY, "Base", cap);
        loader.insert(HOURS_AT_MINIMUM, "Base", min);
        loader
    }

    fn table_of(output: &MethodOutput, zone: &str) -> SummaryTable {
        match output.zone(zone) {
            Some(ZoneOutput::Figure(result)) => match &result.data_table {
                DataTable::Single(table) => table.clone(),
                other => panic!("unexpected table {:?}", other),
            },
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_cf_per_technology() {
        let output = cf(&mut loader(), &ctx(), &PlotArgs::default()).unwrap();
        let table = table_of(&output, "North");

        assert_eq!(table.columns, vec!["Coal", "Gas-CT", "PV"]);
        assert!((table.get("Base", "Coal").unwrap() - 0.5).abs() < 1e-9);
        assert!((table.get("Base", "PV").unwrap() - 0.5).abs() < 1e-9);
        assert!((table.get("Base", "Gas-CT").unwrap() - 0.125).abs() < 1e-9);
        for v in table.values.iter().flatten() {
            assert!((0.0..=1.0).contains(v));
        }
    }

    #[test]
    fn test_cf_year_scenario_groups() {
        let args = PlotArgs {
            groupby: crate::models::GroupBy::YearScenario,
            ..Default::default()
        };
        let output = cf(&mut loader(), &ctx(), &args).unwrap();
        let table = table_of(&output, "North");
        assert_eq!(table.index, vec!["2024_Base"]);
    }

    #[test]
    fn test_cf_full_leap_year_stays_within_one() {
        let mut gen = TimeSeriesTable::new(GENERATION, levels());
        let mut cap = TimeSeriesTable::new(CAPACITY, levels());
        for h in 0..8784 {
            gen.push(start() + Duration::hours(h), vec!["c1".into(), "Coal".into(), "North".into()], 100.0);
        }
        cap.push(start(), vec!["c1".into(), "Coal".into(), "North".into()], 100.0);
        let mut loader = DataLoader::new(PathBuf::new(), "zone", RegionMapping::empty());
        loader.insert(GENERATION, "Base", gen);
        loader.insert(CAPACITY, "Base", cap);

        let output = cf(&mut loader, &ctx(), &PlotArgs::default()).unwrap();
        let value = table_of(&output, "North").get("Base", "Coal").unwrap();
        assert!((0.0..=1.0).contains(&value));
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cf_plots_scenarios_that_have_extracts() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("Base").join(crate::data_loader::PROCESSED_FOLDER);
        std::fs::create_dir_all(&processed).unwrap();
        std::fs::write(
            processed.join("generator_Generation.csv"),
            "timestamp,gen_name,tech,zone,value\n\
             2024-01-01 00:00:00,c1,Coal,North,50\n\
             2024-01-01 01:00:00,c1,Coal,North,50\n",
        )
        .unwrap();
        std::fs::write(
            processed.join("generator_Installed_Capacity.csv"),
            "timestamp,gen_name,tech,zone,value\n2024-01-01 00:00:00,c1,Coal,North,100\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("High")).unwrap();

        let ctx = PlotContext {
            scenarios: vec!["Base".into(), "High".into()],
            ..ctx()
        };
        let mut loader = DataLoader::new(dir.path().to_path_buf(), "zone", RegionMapping::empty());
        let output = cf(&mut loader, &ctx, &PlotArgs::default()).unwrap();

        let table = table_of(&output, "North");
        assert_eq!(table.index, vec!["Base"]);
        assert!((table.get("Base", "Coal").unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_cf_unknown_zone_is_missing() {
        let ctx = PlotContext {
            zones: vec!["Atlantis".into()],
            ..ctx()
        };
        let output = cf(&mut loader(), &ctx, &PlotArgs::default()).unwrap();
        assert_eq!(output.zone("Atlantis"), Some(&ZoneOutput::MissingZoneData));
    }

    #[test]
    fn test_cf_missing_property_is_missing_input() {
        let mut loader = DataLoader::new(PathBuf::from("/nonexistent"), "zone", RegionMapping::empty());
        let output = cf(&mut loader, &ctx(), &PlotArgs::default()).unwrap();
        assert_eq!(output, MethodOutput::MissingInputData);
    }

    #[test]
    fn test_avg_output_when_committed_skips_offline_intervals() {
        let output = avg_output_when_committed(&mut loader(), &ctx(), &PlotArgs::default()).unwrap();
        let table = table_of(&output, "North");

        // tech rows, thermal only
        assert_eq!(table.index, vec!["Coal", "Gas-CT"]);
        assert!((table.get("Coal", "Base").unwrap() - 0.5).abs() < 1e-9);
        // 6 committed hours at full output spread over 48 covered hours
        assert!((table.get("Gas-CT", "Base").unwrap() - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_time_at_min_gen_excludes_vre() {
        let output = time_at_min_gen(&mut loader(), &ctx(), &PlotArgs::default()).unwrap();
        let table = table_of(&output, "North");

        assert_eq!(table.index, vec!["Coal", "Gas-CT"]);
        assert!((table.get("Coal", "Base").unwrap() - 0.25).abs() < 1e-9);
        assert!((table.get("Gas-CT", "Base").unwrap() - 0.5).abs() < 1e-9);
    }
}
