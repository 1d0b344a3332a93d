use std::collections::BTreeSet;

use crate::aggregate::{aggregate, group, Aggregated, AggregationSpec};
use crate::chart::{ChartKind, ChartLabels};
use crate::data::schema::Field;
use crate::error::{PanelError, Result};
use crate::metrics::{kpi_summary, proportion, top_n};
use crate::remap::Relabel;
use crate::state::Session;
use crate::table::{Cell, Table};

use super::{chart_section, kpi_section, Controls, Kpi, Section};

const LAND_TYPE: &str = "Types of Land";
const AREA: &str = "Actual area (ha)";

fn land_type() -> Field {
    Field::dimension(LAND_TYPE)
}

/// Mean area per (country, land type), limited to the `n` countries with
/// the largest row totals, widest first.
fn heatmap(session: &Session, n: usize) -> Result<Table> {
    let view = session.view()?;
    let spec = AggregationSpec::mean(vec![Field::Entity]).pivot_on(land_type());
    let Aggregated::Wide(wide) = aggregate(&view, &spec)? else {
        return Err(PanelError::validation("heatmap expects a pivoted aggregate"));
    };
    let leaders = top_n(&wide.row_totals(), AREA, n)?;
    let keys: Vec<_> = leaders.rows().iter().map(|r| r.key.clone()).collect();
    Ok(wide.select_rows(&keys).to_table())
}

/// Total area per country keyed by ISO-3 where known; zero-area countries
/// and EU aggregates are left off the map.
fn land_map(session: &Session) -> Result<Table> {
    let view = session.view()?;
    let sums = group(&view, &AggregationSpec::sum(vec![Field::Entity]))?;
    let area = sums.require_value(AREA)?;
    let positive: Vec<_> = sums
        .rows()
        .iter()
        .filter(|r| matches!(r.values[area], Cell::Value(v) if v > 0.0))
        .cloned()
        .collect();
    let (mapped, _) = Relabel::country_iso3().apply(&sums.with_rows(positive), &Field::Entity)?;
    Ok(mapped)
}

pub(super) fn sections(session: &Session, controls: &Controls) -> Vec<Section> {
    let heatmap_size = controls
        .get("heatmap_size", "20")
        .parse::<usize>()
        .unwrap_or(20);
    let top = controls
        .get("ranking_size", "15")
        .parse::<usize>()
        .unwrap_or(15);

    vec![
        kpi_section("summary", "Land use summary", || {
            let view = session.view()?;
            let kpi = kpi_summary(&view, None)?;
            let land_types: BTreeSet<_> = view
                .rows()
                .filter_map(|o| o.dimensions.get(LAND_TYPE))
                .collect();
            let area_mha = match kpi.total {
                Cell::Value(v) => Cell::Value(v / 1_000_000.0),
                other => other,
            };
            Ok((
                view.len(),
                vec![
                    Kpi::count("Countries Analyzed", kpi.entities),
                    Kpi::new("Total Area (Million ha)", area_mha),
                    Kpi::count("Land Types", land_types.len()),
                    Kpi::count(
                        "Years Covered",
                        kpi.years.map(|(a, b)| (b - a + 1) as usize).unwrap_or(0),
                    ),
                ],
            ))
        }),
        chart_section(
            "area_over_time",
            ChartKind::Trend,
            ChartLabels::titled("Agricultural Land Composition Over Time")
                .axes("Year", "Area (ha)")
                .every_value(),
            || {
                let view = session.view()?;
                let spec = AggregationSpec::sum(vec![Field::Time]).pivot_on(land_type());
                Ok(aggregate(&view, &spec)?.into_table())
            },
        ),
        chart_section(
            "temporal_trends",
            ChartKind::Trend,
            ChartLabels::titled("Land Use Trends by Country").axes("Year", "Area (ha)"),
            || {
                let view = session.view()?;
                group(
                    &view,
                    &AggregationSpec::sum(vec![Field::Entity, land_type(), Field::Time]),
                )
            },
        ),
        chart_section(
            "country_comparison",
            ChartKind::Comparison,
            ChartLabels::titled("Average Land Area by Country and Type").axes("Country", "Area (ha)"),
            || {
                let view = session.view()?;
                group(&view, &AggregationSpec::mean(vec![Field::Entity, land_type()]))
            },
        ),
        chart_section(
            "composition",
            ChartKind::Composition,
            ChartLabels::titled("Land Use Composition"),
            || {
                let view = session.view()?;
                let sums = group(&view, &AggregationSpec::sum(vec![land_type()]))?;
                proportion(&sums, &[], AREA)
            },
        ),
        chart_section(
            "heatmap",
            ChartKind::Comparison,
            ChartLabels::titled(format!("Land Use Heatmap (Top {heatmap_size} Countries)"))
                .every_value(),
            || heatmap(session, heatmap_size),
        ),
        chart_section(
            "land_map",
            ChartKind::Geographic,
            ChartLabels::titled("Global Agricultural Land Distribution")
                .axes("Country", "Total Area (Hectares)"),
            || land_map(session),
        ),
        chart_section(
            "top_countries",
            ChartKind::Comparison,
            ChartLabels::titled(format!("Top {top} Countries by Total Agricultural Land"))
                .axes("Country", "Total Area (ha)"),
            || {
                let view = session.view()?;
                let sums = group(&view, &AggregationSpec::sum(vec![Field::Entity]))?;
                top_n(&sums, AREA, top)
            },
        ),
    ]
}
