use crate::data_loader::{DataLoader, PropertyRequest};
use crate::error::Result;
use crate::figure::{
    DataTable, FigureData, LineChart, MethodOutput, Panel, PlotResult, ScatterChart, ScatterPoint,
    SeriesStyle, Trace, XAxis, ZoneOutput,
};
use crate::models::{PlotArgs, PlotContext, SummaryTable, TimeSeriesTable};
use crate::processing::{request_data, zone_slice};
use chrono::NaiveDateTime;
use log::{info, warn};
use std::collections::BTreeMap;

const GENERATION: &str = "generator_Generation";
const AVAILABLE: &str = "generator_Available_Capacity";
const CURTAILMENT: &str = "generator_Curtailment";
const GENERATION_COST: &str = "generator_Total_Generation_Cost";

/// Curves shorter than this peak (MW) are not worth drawing.
const MIN_CURVE_PEAK: f64 = 1.0;

/// Which technology subset a curtailment plot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurtailmentSubset {
    Pv,
    PvWind,
}

impl CurtailmentSubset {
    pub fn from_args(args: &PlotArgs) -> Self {
        match args.prop.as_deref().map(str::trim) {
            Some("PV") => CurtailmentSubset::Pv,
            Some("PV+Wind") => CurtailmentSubset::PvWind,
            other => {
                warn!("Unknown curtailment property {:?}, plotting PV", other);
                CurtailmentSubset::Pv
            }
        }
    }
}

/// Penetration and curtailment statistics for one scenario in one zone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PenetrationCurtailment {
    pub pv_penetration: f64,
    pub re_penetration: f64,
    pub vre_penetration: f64,
    pub max_pv_curtailment: f64,
    pub max_re_curtailment: f64,
    pub pv_curtailment: f64,
    pub re_curtailment: f64,
    pub pv_hours_curtailed: f64,
    pub re_hours_curtailed: f64,
    pub pv_curtailment_cf: f64,
    pub re_curtailment_cf: f64,
    pub generation_cost: Option<f64>,
}

impl PenetrationCurtailment {
    /// Statistics from zone slices of generation, available capacity and
    /// curtailment. Every ratio is 0 when its denominator is 0.
    pub fn compute(
        gen: &TimeSeriesTable,
        avail: &TimeSeriesTable,
        curt: &TimeSeriesTable,
        ctx: &PlotContext,
    ) -> Self {
        let hours = gen.timestamps().len() as f64;
        let total_gen = gen.sum();

        let pv_gen = in_techs(gen, ctx, &ctx.pv_gen_cat).sum();
        let re_gen = in_techs(gen, ctx, &ctx.re_gen_cat).sum();
        let vre_gen = in_techs(gen, ctx, &ctx.vre_gen_cat).sum();
        let pv_avail = in_techs(avail, ctx, &ctx.pv_gen_cat).sum();
        let re_avail = in_techs(avail, ctx, &ctx.re_gen_cat).sum();

        let re_curt = curt.sum_by_timestamp();
        let pv_curt = in_techs(curt, ctx, &ctx.pv_gen_cat).sum_by_timestamp();
        let total_re_curt: f64 = re_curt.values().sum();
        let total_pv_curt: f64 = pv_curt.values().sum();
        let max_re = peak(&re_curt);
        let max_pv = peak(&pv_curt);

        Self {
            pv_penetration: ratio(pv_gen, total_gen) * 100.0,
            re_penetration: ratio(re_gen, total_gen) * 100.0,
            vre_penetration: ratio(vre_gen, total_gen) * 100.0,
            max_pv_curtailment: max_pv,
            max_re_curtailment: max_re,
            pv_curtailment: ratio(total_pv_curt, pv_avail) * 100.0,
            re_curtailment: ratio(total_re_curt, re_avail) * 100.0,
            pv_hours_curtailed: ratio(hours_positive(&pv_curt), hours) * 100.0,
            re_hours_curtailed: ratio(hours_positive(&re_curt), hours) * 100.0,
            pv_curtailment_cf: ratio(ratio(total_pv_curt, max_pv), hours),
            re_curtailment_cf: ratio(ratio(total_re_curt, max_re), hours),
            generation_cost: None,
        }
    }

    fn write_row(&self, table: &mut SummaryTable, scenario: &str) {
        let cells = [
            ("% PV Penetration", self.pv_penetration),
            ("% RE Penetration", self.re_penetration),
            ("% VRE Penetration", self.vre_penetration),
            ("Max PV Curtailment [MW]", self.max_pv_curtailment),
            ("Max RE Curtailment [MW]", self.max_re_curtailment),
            ("% PV Curtailment", self.pv_curtailment),
            ("% RE Curtailment", self.re_curtailment),
            ("% PV hrs Curtailed", self.pv_hours_curtailed),
            ("% RE hrs Curtailed", self.re_hours_curtailed),
            ("PV Curtailment Capacity Factor", self.pv_curtailment_cf),
            ("RE Curtailment Capacity Factor", self.re_curtailment_cf),
        ];
        for (column, value) in cells {
            table.set(scenario, column, value);
        }
        if let Some(cost) = self.generation_cost {
            table.set(scenario, "Gen Cost", cost);
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn peak(series: &BTreeMap<NaiveDateTime, f64>) -> f64 {
    series.values().copied().fold(0.0, f64::max)
}

fn hours_positive(series: &BTreeMap<NaiveDateTime, f64>) -> f64 {
    series.values().filter(|v| **v > 0.0).count() as f64
}

/// Rows whose (renamed) technology is one of `cats`.
fn in_techs(table: &TimeSeriesTable, ctx: &PlotContext, cats: &[String]) -> TimeSeriesTable {
    let Some(idx) = table.level_index("tech") else {
        return table.filter(|_| false);
    };
    table.filter(|r| cats.contains(&ctx.rename_tech(&r.keys[idx])))
}

/// Scatter of penetration against curtailment, one point per scenario.
pub fn curt_pen(loader: &mut DataLoader, ctx: &PlotContext, args: &PlotArgs) -> Result<MethodOutput> {
    let requests = [
        PropertyRequest::required(GENERATION, &ctx.scenarios),
        PropertyRequest::required(AVAILABLE, &ctx.scenarios),
        PropertyRequest::required(CURTAILMENT, &ctx.scenarios),
        PropertyRequest::optional(GENERATION_COST, &ctx.scenarios),
    ];
    let scenarios = request_data(loader, &requests)?;
    if scenarios.is_empty() {
        return Ok(MethodOutput::MissingInputData);
    }
    let subset = CurtailmentSubset::from_args(args);

    let mut outputs = Vec::new();
    for zone in &ctx.zones {
        info!("{} = {}", ctx.agg_by, zone);
        let mut table = SummaryTable::new("Scenario");
        let mut points = Vec::new();

        for (idx, scenario) in ctx.scenarios.iter().enumerate().filter(|(_, s)| scenarios.contains(s)) {
            info!("Scenario = {}", scenario);
            let (Some(gen), Some(avail), Some(curt)) = (
                zone_slice(loader, GENERATION, scenario, ctx, zone),
                zone_slice(loader, AVAILABLE, scenario, ctx, zone),
                zone_slice(loader, CURTAILMENT, scenario, ctx, zone),
            ) else {
                continue;
            };

            let mut stats = PenetrationCurtailment::compute(&gen, &avail, &curt, ctx);
            stats.generation_cost = zone_slice(loader, GENERATION_COST, scenario, ctx, zone).map(|c| c.sum());
            stats.write_row(&mut table, scenario);

            let (x, y) = match subset {
                CurtailmentSubset::Pv => (stats.pv_penetration, stats.pv_curtailment),
                CurtailmentSubset::PvWind => (stats.re_penetration, stats.re_curtailment),
            };
            points.push(ScatterPoint {
                label: scenario.clone(),
                style: SeriesStyle::Scenario(idx),
                x,
                y,
            });
        }

        if points.is_empty() || table.is_all_zero() {
            outputs.push((zone.clone(), ZoneOutput::MissingZoneData));
            continue;
        }

        let (x_label, y_label) = match subset {
            CurtailmentSubset::Pv => ("% PV Penetration", "% PV Curtailment"),
            CurtailmentSubset::PvWind => ("% PV + Wind Penetration", "% PV + Wind Curtailment"),
        };
        outputs.push((
            zone.clone(),
            ZoneOutput::Figure(PlotResult {
                figure: FigureData::Scatter(ScatterChart {
                    points,
                    x_label: x_label.to_string(),
                    y_label: y_label.to_string(),
                }),
                title: zone.clone(),
                data_table: DataTable::Single(table),
            }),
        ));
    }

    Ok(MethodOutput::Zones(outputs))
}

/// Timestamp-summed curtailment sorted largest first.
pub fn duration_curve(series: &BTreeMap<NaiveDateTime, f64>) -> Vec<f64> {
    let mut values: Vec<f64> = series.values().copied().collect();
    values.sort_by(|a, b| b.total_cmp(a));
    values
}

/// Curtailment duration curve per scenario.
pub fn curt_duration_curve(
    loader: &mut DataLoader,
    ctx: &PlotContext,
    args: &PlotArgs,
) -> Result<MethodOutput> {
    let requests = [PropertyRequest::required(CURTAILMENT, &ctx.scenarios)];
    let scenarios = request_data(loader, &requests)?;
    if scenarios.is_empty() {
        return Ok(MethodOutput::MissingInputData);
    }
    let subset = CurtailmentSubset::from_args(args);

    let mut outputs = Vec::new();
    for zone in &ctx.zones {
        info!("{} = {}", ctx.agg_by, zone);
        let mut curves: Vec<(String, Vec<f64>)> = Vec::new();

        for scenario in &scenarios {
            info!("Scenario = {}", scenario);
            let Some(curt) = zone_slice(loader, CURTAILMENT, scenario, ctx, zone) else {
                continue;
            };
            let curt = match subset {
                CurtailmentSubset::Pv => in_techs(&curt, ctx, &ctx.pv_gen_cat),
                CurtailmentSubset::PvWind => curt,
            };
            let curve = duration_curve(&curt.sum_by_timestamp());
            if curve.iter().any(|v| *v >= MIN_CURVE_PEAK) {
                curves.push((scenario.replace('_', " "), curve));
            }
        }

        if curves.is_empty() {
            outputs.push((zone.clone(), ZoneOutput::MissingZoneData));
            continue;
        }

        let mut table = SummaryTable::new("Interval");
        let longest = curves.iter().map(|(_, c)| c.len()).max().unwrap_or(0);
        table.index = (0..longest).map(|i| i.to_string()).collect();
        table.values = vec![Vec::new(); longest];
        for (label, curve) in &curves {
            table.columns.push(label.clone());
            for (i, row) in table.values.iter_mut().enumerate() {
                row.push(curve.get(i).copied().unwrap_or(f64::NAN));
            }
        }

        let traces = curves
            .into_iter()
            .enumerate()
            .map(|(idx, (label, curve))| Trace {
                label,
                style: SeriesStyle::Scenario(idx),
                points: curve.into_iter().enumerate().map(|(i, v)| (i as f64, v)).collect(),
            })
            .collect();

        let y_label = match subset {
            CurtailmentSubset::Pv => "PV Curtailment (MW)",
            CurtailmentSubset::PvWind => "PV + Wind Curtailment (MW)",
        };
        outputs.push((
            zone.clone(),
            ZoneOutput::Figure(PlotResult {
                figure: FigureData::Line(LineChart {
                    panels: vec![Panel {
                        traces,
                        x_label: "Hours".to_string(),
                        ..Default::default()
                    }],
                    x_axis: XAxis::Numeric,
                    y_label: y_label.to_string(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone_mapper::RegionMapping;
    use chrono::{Duration, NaiveDate};
    use std::path::PathBuf;

    fn ts(h: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::hours(h)
    }

    fn ctx() -> PlotContext {
        PlotContext {
            agg_by: "zone".into(),
            zones: vec!["North".into()],
            scenarios: vec!["Base".into(), "High_RE".into()],
            pv_gen_cat: vec!["PV".into()],
            re_gen_cat: vec!["PV".into(), "Wind".into()],
            vre_gen_cat: vec!["PV".into(), "Wind".into()],
            ..Default::default()
        }
    }

    fn table(property: &str, rows: &[(i64, &str, f64)]) -> TimeSeriesTable {
        let mut t = TimeSeriesTable::new(property, vec!["gen_name".into(), "tech".into(), "zone".into()]);
        for (h, tech, v) in rows {
            t.push(ts(*h), vec![format!("{}_1", tech), tech.to_string(), "North".into()], *v);
        }
        t
    }

    #[test]
    fn test_zero_curtailment_gives_zero_percent() {
        let gen = table(GENERATION, &[(0, "PV", 40.0), (0, "Coal", 60.0), (1, "PV", 40.0), (1, "Coal", 60.0)]);
        let avail = table(AVAILABLE, &[(0, "PV", 50.0), (1, "PV", 50.0)]);
        let curt = table(CURTAILMENT, &[(0, "PV", 0.0), (1, "PV", 0.0)]);

        let stats = PenetrationCurtailment::compute(&gen, &avail, &curt, &ctx());
        assert!((stats.pv_penetration - 40.0).abs() < 1e-9);
        assert_eq!(stats.pv_curtailment, 0.0);
        assert_eq!(stats.re_curtailment, 0.0);
        assert_eq!(stats.pv_curtailment_cf, 0.0);
        assert_eq!(stats.max_re_curtailment, 0.0);
    }

    #[test]
    fn test_curtailment_statistics() {
        let gen = table(GENERATION, &[(0, "PV", 40.0), (0, "Wind", 10.0), (1, "PV", 40.0), (1, "Wind", 10.0)]);
        let avail = table(AVAILABLE, &[(0, "PV", 50.0), (0, "Wind", 10.0), (1, "PV", 50.0), (1, "Wind", 10.0)]);
        let curt = table(CURTAILMENT, &[(0, "PV", 10.0), (1, "PV", 0.0), (1, "Wind", 5.0)]);

        let stats = PenetrationCurtailment::compute(&gen, &avail, &curt, &ctx());
        assert!((stats.re_penetration - 100.0).abs() < 1e-9);
        assert!((stats.pv_curtailment - 10.0).abs() < 1e-9);
        assert!((stats.re_curtailment - 12.5).abs() < 1e-9);
        assert_eq!(stats.pv_hours_curtailed, 50.0);
        assert_eq!(stats.re_hours_curtailed, 100.0);
        assert_eq!(stats.max_re_curtailment, 10.0);
        // 15 MWh over a 10 MW peak across 2 hours
        assert!((stats.re_curtailment_cf - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_curt_pen_scatter_points() {
        let mut loader = DataLoader::new(PathBuf::new(), "zone", RegionMapping::empty());
        for scenario in ["Base", "High_RE"] {
            loader.insert(GENERATION, scenario, table(GENERATION, &[(0, "PV", 20.0), (0, "Coal", 80.0)]));
            loader.insert(AVAILABLE, scenario, table(AVAILABLE, &[(0, "PV", 25.0)]));
            loader.insert(CURTAILMENT, scenario, table(CURTAILMENT, &[(0, "PV", 5.0)]));
        }
        let args = PlotArgs {
            prop: Some("PV".into()),
            ..Default::default()
        };

        let output = curt_pen(&mut loader, &ctx(), &args).unwrap();
        let Some(ZoneOutput::Figure(result)) = output.zone("North") else {
            panic!("expected a figure");
        };
        let FigureData::Scatter(chart) = &result.figure else {
            panic!("expected a scatter");
        };
        assert_eq!(chart.points.len(), 2);
        assert!((chart.points[0].x - 20.0).abs() < 1e-9);
        assert!((chart.points[0].y - 20.0).abs() < 1e-9);
        let DataTable::Single(table) = &result.data_table else {
            panic!("expected a table");
        };
        assert!(!table.columns.contains(&"Gen Cost".to_string()));
    }

    #[test]
    fn test_curt_pen_all_zero_statistics_is_missing() {
        let mut loader = DataLoader::new(PathBuf::new(), "zone", RegionMapping::empty());
        for scenario in ["Base", "High_RE"] {
            loader.insert(GENERATION, scenario, table(GENERATION, &[(0, "PV", 0.0), (1, "PV", 0.0)]));
            loader.insert(AVAILABLE, scenario, table(AVAILABLE, &[(0, "PV", 0.0), (1, "PV", 0.0)]));
            loader.insert(CURTAILMENT, scenario, table(CURTAILMENT, &[(0, "PV", 0.0), (1, "PV", 0.0)]));
        }

        let output = curt_pen(&mut loader, &ctx(), &PlotArgs::default()).unwrap();
        assert_eq!(output.zone("North"), Some(&ZoneOutput::MissingZoneData));
    }

    #[test]
    fn test_duration_curve_drops_small_scenarios() {
        let mut loader = DataLoader::new(PathBuf::new(), "zone", RegionMapping::empty());
        loader.insert(CURTAILMENT, "Base", table(CURTAILMENT, &[(0, "PV", 0.5), (1, "PV", 0.2)]));
        loader.insert(
            CURTAILMENT,
            "High_RE",
            table(CURTAILMENT, &[(0, "PV", 3.0), (1, "PV", 8.0), (2, "Wind", 4.0)]),
        );
        let args = PlotArgs {
            prop: Some("PV+Wind".into()),
            ..Default::default()
        };

        let output = curt_duration_curve(&mut loader, &ctx(), &args).unwrap();
        let Some(ZoneOutput::Figure(result)) = output.zone("North") else {
            panic!("expected a figure");
        };
        let DataTable::Single(table) = &result.data_table else {
            panic!("expected a table");
        };
        assert_eq!(table.columns, vec!["High RE"]);
        assert_eq!(table.column("High RE").unwrap(), vec![8.0, 4.0, 3.0]);
    }
}
