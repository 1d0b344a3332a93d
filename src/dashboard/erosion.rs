use crate::aggregate::{group, total, AggregationSpec, Reducer};
use crate::chart::{ChartKind, ChartLabels};
use crate::data::filter::Condition;
use crate::data::schema::Field;
use crate::metrics::{kpi_summary, top_n};
use crate::remap::Relabel;
use crate::state::Session;

use super::{chart_section, kpi_section, Controls, Kpi, Section};

const EROSION_TYPE: &str = "Types of Erosion";
const LEVEL: &str = "EROSION_LEVEL";
/// Level code of the all-levels total row.
const TOTAL_LEVEL: &str = "_T";
/// Tolerable-erosion rows, not a severity band.
const TOLERABLE_LEVEL: &str = "TOL";

fn level() -> Field {
    Field::dimension(LEVEL)
}

fn totals_only() -> Condition {
    Condition::equals(level(), TOTAL_LEVEL)
}

pub(super) fn sections(session: &Session, controls: &Controls) -> Vec<Section> {
    let top = controls
        .get("ranking_size", "15")
        .parse::<usize>()
        .unwrap_or(15);

    vec![
        kpi_section("summary", "Erosion summary", || {
            let view = session.view()?;
            let kpi = kpi_summary(&view, None)?;
            let average = total(&view.narrow(&totals_only())?, Reducer::Mean, None)?;
            Ok((
                view.len(),
                vec![
                    Kpi::count("Countries Analyzed", kpi.entities),
                    Kpi::count(
                        "Years Covered",
                        kpi.years.map(|(a, b)| (b - a + 1) as usize).unwrap_or(0),
                    ),
                    Kpi::new("Average Total Erosion (%)", average),
                    Kpi::count("Data Points", view.len()),
                ],
            ))
        }),
        chart_section(
            "time_series",
            ChartKind::Trend,
            ChartLabels::titled("Erosion Trends Over Time").axes("Year", "Percentage of agricultural land (%)"),
            || {
                let view = session.view()?.narrow(&totals_only())?;
                group(
                    &view,
                    &AggregationSpec::sum(vec![
                        Field::Entity,
                        Field::Time,
                        Field::dimension(EROSION_TYPE),
                    ]),
                )
            },
        ),
        chart_section(
            "wind_vs_water",
            ChartKind::Comparison,
            ChartLabels::titled("Wind vs Water Erosion Comparison (Average %)"),
            || {
                let view = session.view()?.narrow(&totals_only())?;
                group(
                    &view,
                    &AggregationSpec::mean(vec![Field::Entity, Field::dimension(EROSION_TYPE)]),
                )
            },
        ),
        chart_section(
            "severity",
            ChartKind::Composition,
            ChartLabels::titled("Global Erosion Severity Distribution"),
            || {
                let view = session
                    .view()?
                    .narrow(&Condition::one_of(level(), [TOTAL_LEVEL, TOLERABLE_LEVEL]).negated())?;
                let means = group(&view, &AggregationSpec::mean(vec![level()]))?;
                let (labelled, _) = Relabel::erosion_severity().apply(&means, &level())?;
                Ok(labelled)
            },
        ),
        chart_section(
            "country_ranking",
            ChartKind::Comparison,
            ChartLabels::titled(format!("Top {top} Countries by Average Total Erosion"))
                .axes("Country", "Average percentage of agricultural land (%)"),
            || {
                let view = session.view()?.narrow(&totals_only())?;
                let means = group(&view, &AggregationSpec::mean(vec![Field::Entity]))?;
                top_n(&means, "OBS_VALUE", top)
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::dashboard::tests::outcome;
    use crate::dashboard::SectionOutcome;
    use crate::data::model::{KeyValue, Observation, PanelDataset};
    use crate::data::schema::PanelSchema;
    use crate::table::Cell;

    fn row(country: &str, year: i32, kind: &str, lvl: &str, v: Option<f64>) -> Observation {
        let mut dimensions = BTreeMap::new();
        dimensions.insert(EROSION_TYPE.to_string(), kind.to_string());
        dimensions.insert(LEVEL.to_string(), lvl.to_string());
        Observation {
            entity: country.to_string(),
            entity_iso: None,
            time: year,
            dimensions,
            values: vec![v],
        }
    }

    fn session() -> Session {
        let rows = vec![
            row("Italy", 2010, "Water", TOTAL_LEVEL, Some(20.0)),
            row("Italy", 2011, "Water", TOTAL_LEVEL, Some(30.0)),
            row("Spain", 2010, "Wind", TOTAL_LEVEL, Some(10.0)),
            row("Spain", 2010, "Wind", "LW", Some(6.0)),
            row("Italy", 2010, "Water", "SV", Some(2.0)),
            row("Italy", 2010, "Water", TOLERABLE_LEVEL, Some(90.0)),
            row("Italy", 2010, "Water", "MD", None),
        ];
        Session::new(Arc::new(PanelDataset::from_observations(
            PanelSchema::erosion(),
            rows,
        )))
    }

    #[test]
    fn ranking_and_severity() {
        let s = session();
        let sections = sections(&s, &Controls::default());

        let SectionOutcome::Chart { table, .. } = outcome(&sections, "country_ranking") else {
            panic!("expected ranking chart");
        };
        assert_eq!(table.rows()[0].key[0], KeyValue::from("Italy"));
        assert_eq!(table.rows()[0].values[0], Cell::Value(25.0));

        let SectionOutcome::Chart { table, .. } = outcome(&sections, "severity") else {
            panic!("expected severity chart");
        };
        let labels: Vec<_> = table.rows().iter().map(|r| r.key[0].to_string()).collect();
        assert_eq!(labels, vec!["Low", "Moderate", "Severe"]);
        assert_eq!(table.get(&["Moderate".into()], "OBS_VALUE"), Some(Cell::NoData));

        let SectionOutcome::Kpis { tiles } = outcome(&sections, "summary") else {
            panic!("expected tiles");
        };
        let labels: Vec<_> = tiles.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Countries Analyzed", "Years Covered", "Average Total Erosion (%)", "Data Points"]
        );
        assert_eq!(tiles[1].value, Cell::Value(2.0));
        assert_eq!(tiles[2].value, Cell::Value(20.0));
        assert_eq!(tiles[3].value, Cell::Value(7.0));
    }

    #[test]
    fn empty_selection_renders_no_data_everywhere() {
        let mut s = session();
        s.set_time_range(1990, 1995).unwrap();
        for section in sections(&s, &Controls::default()) {
            assert!(
                matches!(section.outcome, SectionOutcome::NoData { .. }),
                "{} rendered something",
                section.id
            );
        }
    }
}
