use crate::aggregate::{aggregate, group, AggregationSpec};
use crate::chart::{ChartKind, ChartLabels};
use crate::data::filter::{apply, Condition, FilterSpec};
use crate::data::schema::Field;
use crate::error::Result;
use crate::metrics::{kpi_summary, proportion};
use crate::state::Session;
use crate::table::Table;

use super::{chart_section, kpi_section, Controls, Kpi, Section};

const MEASURE: &str = "MEASURE";
/// Entity names that are aggregates rather than countries.
const AGGREGATE_AREAS: [&str; 3] = ["World", "EU", "Total"];

fn measure() -> Field {
    Field::dimension(MEASURE)
}

/// Emission category radio: TOTAL excludes the LULUCF and agriculture
/// breakdowns, the others keep only their own measures.
fn category_filter(category: &str) -> Condition {
    match category {
        "LULUCF" => Condition::contains_any(measure(), ["LULUCF"]),
        "AGR" => Condition::contains_any(measure(), ["AGR"]),
        _ => Condition::contains_any(measure(), ["LULUCF", "AGR"]).negated(),
    }
}

/// One year, one measure, every country (aggregates excluded).
fn map_table(session: &Session, year: i32, gas: Option<&str>) -> Result<Table> {
    let mut spec = FilterSpec::new((year, year))
        .with_condition(Condition::contains_any(Field::Entity, AGGREGATE_AREAS).negated());
    if let Some(gas) = gas {
        spec = spec.with_dimension(MEASURE, [gas]);
    }
    let view = apply(session.dataset(), &spec)?;
    group(&view, &AggregationSpec::sum(vec![Field::Entity]))
}

pub(super) fn sections(session: &Session, controls: &Controls) -> Vec<Section> {
    let (from, to) = session.filter().time_range;
    let category = controls.get("category", "TOTAL");
    let map_year = controls
        .lookup("map_year")
        .and_then(|y| y.parse::<i32>().ok())
        .unwrap_or(to);
    let first_measure = session
        .dataset()
        .unique_values(&measure())
        .and_then(|m| m.iter().next())
        .map(String::as_str);
    let gas = controls.lookup("map_measure").or(first_measure);

    vec![
        kpi_section("kpis", "Emission KPIs", || {
            let view = session.view()?;
            let kpi = kpi_summary(&view, None)?;
            Ok((
                view.len(),
                vec![
                    Kpi::new("Total Emissions", kpi.total),
                    Kpi::new("Avg Annual Emissions", kpi.annual_mean),
                    Kpi::new("% Change", kpi.pct_change),
                ],
            ))
        }),
        chart_section(
            "measures_over_time",
            ChartKind::Trend,
            ChartLabels::titled("Greenhouse Gas Measures Over Time")
                .axes("Year", "Emissions")
                .every_value(),
            || {
                let view = session.view()?;
                let spec = AggregationSpec::sum(vec![Field::Time]).pivot_on(measure());
                Ok(aggregate(&view, &spec)?.into_table())
            },
        ),
        chart_section(
            "distribution",
            ChartKind::Composition,
            ChartLabels::titled(format!("Emission Distribution ({from}–{to}) – {category}")),
            || {
                let view = session
                    .view()?
                    .narrow(&Condition::contains_any(measure(), ["TOTGHG"]).negated())?
                    .narrow(&category_filter(category))?;
                let sums = group(&view, &AggregationSpec::sum(vec![measure()]))?;
                proportion(&sums, &[], "OBS_VALUE")
            },
        ),
        chart_section(
            "emissions_map",
            ChartKind::Geographic,
            ChartLabels::titled(format!(
                "{} Emissions by Country ({map_year})",
                gas.unwrap_or("All")
            ))
            .axes("Country", "Emissions"),
            || map_table(session, map_year, gas),
        ),
    ]
}
