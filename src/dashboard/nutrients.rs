use log::warn;

use crate::aggregate::{group, total, AggregationSpec, Reducer};
use crate::chart::{ChartKind, ChartLabels};
use crate::data::filter::Condition;
use crate::data::schema::Field;
use crate::error::Result;
use crate::metrics::{proportion, PROPORTION};
use crate::state::Session;
use crate::table::Table;

use super::{chart_section, kpi_section, Controls, Kpi, Section};

const MEASURE: &str = "Measure";
const NUTRIENT: &str = "Nutrients";

const INPUTS: &str = "Nutrient inputs";
const OUTPUTS: &str = "Nutrient outputs";
const BALANCE: &str = "Balance (inputs minus outputs)";
const BALANCE_PER_HECTARE: &str = "Balance per hectare";

const OUTPUT_CATEGORIES: [&str; 8] = [
    "Cereals",
    "Dried pulses and beans",
    "Harvested crops",
    "Harvested fodder crops",
    "Industrial crops",
    "Oil crops",
    "Other crops",
    "Forage",
];
const FERTILISERS: [&str; 2] = [
    "Organic fertilisers (excluding livestock manure)",
    "Inorganic fertilisers",
];
const LIVESTOCK: [&str; 5] = ["Cattle", "Pigs", "Poultry", "Sheep and goats", "Other livestock"];

fn measure() -> Field {
    Field::dimension(MEASURE)
}

fn nutrient() -> Field {
    Field::dimension(NUTRIENT)
}

/// Radio value ("Input" / "Output" / "Balance") to the measure it selects.
fn trend_measure(choice: &str) -> &'static str {
    match choice {
        "Output" => OUTPUTS,
        "Balance" => BALANCE,
        _ => INPUTS,
    }
}

/// Balance per hectare by ISO code over every area, regardless of the area
/// selection. Rows without an ISO code cannot be placed and are left out.
fn balance_map(session: &Session) -> Result<Table> {
    let view = session
        .view_all_entities()?
        .narrow(&Condition::equals(measure(), BALANCE_PER_HECTARE))?;
    let by_iso = group(&view, &AggregationSpec::sum(vec![Field::EntityIso]))?;
    let (located, dropped) = by_iso.drop_missing(&Field::EntityIso)?;
    if dropped > 0 {
        let unplaced: Vec<&str> = view
            .rows()
            .filter(|o| o.entity_iso.is_none())
            .map(|o| o.entity.as_str())
            .collect();
        warn!("balance map: left out rows without an ISO code for {unplaced:?}");
    }
    Ok(located)
}

pub(super) fn sections(session: &Session, controls: &Controls) -> Vec<Section> {
    let (from, to) = session.filter().time_range;
    let period = format!("{from} - {to}");
    let n_meas = controls.get("n_meas", "Input");
    let n_type = controls.get("n_type", "Nitrogen");
    let cat_type = controls.get("cat_type", "Nitrogen");
    let live_type = controls.get("live_type", "Nitrogen");

    vec![
        kpi_section("totals", "Nutrient totals", || {
            let view = session.view()?;
            let mut tiles = Vec::new();
            for (label, m) in [
                ("Nutrient Input", INPUTS),
                ("Nutrient Output", OUTPUTS),
                ("Nutrient Balance", BALANCE),
            ] {
                let rows = view.narrow(&Condition::equals(measure(), m))?;
                tiles.push(Kpi::new(label, total(&rows, Reducer::Sum, None)?));
            }
            Ok((view.len(), tiles))
        }),
        chart_section(
            "nitrogen_phosphorus",
            ChartKind::Comparison,
            ChartLabels::titled("Nitrogen/Phosphorus share of inputs, outputs and balance")
                .value(PROPORTION),
            || {
                let view = session
                    .view()?
                    .narrow(&Condition::one_of(measure(), [INPUTS, OUTPUTS, BALANCE]))?;
                let sums = group(&view, &AggregationSpec::sum(vec![measure(), nutrient()]))?;
                proportion(&sums, &[measure()], "OBS_VALUE")
            },
        ),
        chart_section(
            "trend",
            ChartKind::Trend,
            ChartLabels::titled(format!("{n_type} {n_meas} Trend in {period}"))
                .axes("Year", "Tonnes"),
            || {
                let view = session
                    .view()?
                    .narrow(&Condition::equals(measure(), trend_measure(n_meas)))?
                    .narrow(&Condition::equals(nutrient(), n_type))?;
                group(&view, &AggregationSpec::sum(vec![Field::Entity, Field::Time]))
            },
        ),
        chart_section(
            "output_categories",
            ChartKind::Comparison,
            ChartLabels::titled(format!(
                "Nutrient Output contributions across Areas in {period}"
            ))
            .axes("Area", "Tonnes"),
            || {
                let view = session
                    .view()?
                    .narrow(&Condition::one_of(measure(), OUTPUT_CATEGORIES))?
                    .narrow(&Condition::equals(nutrient(), cat_type))?;
                group(&view, &AggregationSpec::sum(vec![Field::Entity, measure()]))
            },
        ),
        chart_section(
            "fertiliser_composition",
            ChartKind::Comparison,
            ChartLabels::titled(format!(
                "Organic / Inorganic Fertilisers Proportional Composition in {period}"
            ))
            .value(PROPORTION),
            || {
                let view = session
                    .view()?
                    .narrow(&Condition::one_of(measure(), FERTILISERS))?;
                let sums = group(&view, &AggregationSpec::sum(vec![Field::Entity, measure()]))?;
                proportion(&sums, &[Field::Entity], "OBS_VALUE")
            },
        ),
        chart_section(
            "livestock",
            ChartKind::Composition,
            ChartLabels::titled(format!("Nutrient Livestock Input contribution in {period}")),
            || {
                let view = session
                    .view()?
                    .narrow(&Condition::one_of(measure(), LIVESTOCK))?
                    .narrow(&Condition::equals(nutrient(), live_type))?;
                let sums = group(&view, &AggregationSpec::sum(vec![measure()]))?;
                proportion(&sums, &[], "OBS_VALUE")
            },
        ),
        chart_section(
            "balance_map",
            ChartKind::Geographic,
            ChartLabels::titled("Choropleth Map of Nutrient Balance per hectare")
                .axes("Area", "Kilogramme"),
            || balance_map(session),
        ),
    ]
}
