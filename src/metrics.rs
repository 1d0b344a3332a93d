//! Derived metrics computed from aggregated tables.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::aggregate::{group, AggregationSpec, Reducer};
use crate::data::filter::PanelView;
use crate::data::model::KeyValue;
use crate::data::schema::Field;
use crate::error::{PanelError, Result};
use crate::table::{Cell, Row, Table};

pub const PROPORTION: &str = "proportion";
pub const RANK: &str = "rank";

// ---------------------------------------------------------------------------
// proportion
// ---------------------------------------------------------------------------

/// Append a `proportion` column: each row's share of its partition total.
///
/// Rows sharing the values of `partition_keys` form a partition; no keys means
/// the whole table is one partition. A zero total yields
/// [`Cell::DivisionByZero`] for every row of that partition. Sentinel inputs
/// stay sentinels and do not count towards the total.
pub fn proportion(table: &Table, partition_keys: &[Field], value_col: &str) -> Result<Table> {
    let value_idx = table.require_value(value_col)?;
    let key_idx: Vec<usize> = partition_keys
        .iter()
        .map(|f| table.require_key(f))
        .collect::<Result<_>>()?;

    let partition_of = |row: &Row| -> Vec<KeyValue> {
        key_idx.iter().map(|&i| row.key[i].clone()).collect()
    };

    let mut totals: BTreeMap<Vec<KeyValue>, f64> = BTreeMap::new();
    for row in table.rows() {
        let total = totals.entry(partition_of(row)).or_insert(0.0);
        if let Cell::Value(v) = row.values[value_idx] {
            *total += v;
        }
    }

    let shares = table
        .rows()
        .iter()
        .map(|row| match row.values[value_idx] {
            Cell::Value(v) => {
                let total = totals.get(&partition_of(row)).copied().unwrap_or(0.0);
                if total == 0.0 {
                    Cell::DivisionByZero
                } else {
                    Cell::Value(v / total)
                }
            }
            sentinel => sentinel,
        })
        .collect();

    let mut out = table.clone();
    out.set_column(PROPORTION, shares);
    Ok(out)
}

// ---------------------------------------------------------------------------
// percent_change
// ---------------------------------------------------------------------------

/// `(last - first) / first * 100` over a time-ordered series.
///
/// Needs at least two points and a non-zero first value; otherwise
/// [`Cell::NotApplicable`].
pub fn percent_change(series: &[(i32, f64)]) -> Cell {
    let mut points: Vec<(i32, f64)> = series
        .iter()
        .copied()
        .filter(|(_, v)| v.is_finite())
        .collect();
    if points.len() < 2 {
        return Cell::NotApplicable;
    }
    points.sort_by_key(|(t, _)| *t);
    let first = points[0].1;
    let last = points[points.len() - 1].1;
    if first == 0.0 {
        return Cell::NotApplicable;
    }
    Cell::from((last - first) / first * 100.0)
}

/// Extract `(year, value)` pairs from a table keyed by time alone.
/// Sentinel cells are skipped.
pub fn time_series(table: &Table, value_col: &str) -> Result<Vec<(i32, f64)>> {
    let time_idx = table.require_key(&Field::Time)?;
    if table.key_columns().len() != 1 {
        return Err(PanelError::validation(
            "a time series must be grouped by time only",
        ));
    }
    let value_idx = table.require_value(value_col)?;
    Ok(table
        .rows()
        .iter()
        .filter_map(|r| Some((r.key[time_idx].as_year()?, r.values[value_idx].value()?)))
        .collect())
}

// ---------------------------------------------------------------------------
// top_n
// ---------------------------------------------------------------------------

/// Highest `n` rows by `rank_col`, with a 1-based `rank` column.
///
/// Sorted descending; ties go to the entity name ascending, then the full
/// key. Sentinel cells rank after every number. Idempotent for a fixed `n`.
pub fn top_n(table: &Table, rank_col: &str, n: usize) -> Result<Table> {
    let idx = table.require_value(rank_col)?;
    let entity_idx = table.key_index(&Field::Entity);

    let mut rows: Vec<Row> = table.rows().to_vec();
    rows.sort_by(|a, b| {
        rank_order(a.values[idx], b.values[idx])
            .then_with(|| match entity_idx {
                Some(e) => a.key[e].cmp(&b.key[e]),
                None => Ordering::Equal,
            })
            .then_with(|| a.key.cmp(&b.key))
    });
    rows.truncate(n);

    let ranks = (1..=rows.len()).map(|r| Cell::Value(r as f64)).collect();
    let mut out = table.with_rows(rows);
    out.set_column(RANK, ranks);
    Ok(out)
}

fn rank_order(a: Cell, b: Cell) -> Ordering {
    match (a.value(), b.value()) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// ---------------------------------------------------------------------------
// KPI summary
// ---------------------------------------------------------------------------

/// Headline numbers for a filtered view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiSummary {
    /// Sum of every non-null value.
    pub total: Cell,
    /// Mean of the per-year totals.
    pub annual_mean: Cell,
    /// Percent change between the first and last per-year totals.
    pub pct_change: Cell,
    pub entities: usize,
    pub years: Option<(i32, i32)>,
}

pub fn kpi_summary(view: &PanelView<'_>, value_column: Option<&str>) -> Result<KpiSummary> {
    let mut spec = AggregationSpec::sum(vec![Field::Time]);
    spec.value_column = value_column.map(str::to_string);
    let annual = group(view, &spec)?;
    let value_col = annual.value_columns()[0].clone();
    let series = time_series(&annual, &value_col)?;

    let totals: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    let annual_mean = match Reducer::Mean.reduce(&totals, "annual totals") {
        Ok(v) => Cell::Value(v),
        Err(_) => Cell::NoData,
    };
    let total = if view.is_empty() {
        Cell::NoData
    } else {
        Cell::Value(totals.iter().sum())
    };

    let entities: BTreeSet<&str> = view.rows().map(|o| o.entity.as_str()).collect();
    let years = match (series.first(), series.last()) {
        (Some((a, _)), Some((b, _))) => Some((*a, *b)),
        _ => None,
    };

    Ok(KpiSummary {
        total,
        annual_mean,
        pct_change: percent_change(&series),
        entities: entities.len(),
        years,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::fixtures::{dataset, obs};

    const EPS: f64 = 1e-9;

    fn close(cell: Option<Cell>, expected: f64) -> bool {
        matches!(cell, Some(Cell::Value(v)) if (v - expected).abs() < EPS)
    }

    fn entity_dim_sums() -> Table {
        let ds = dataset(vec![
            obs("A", 2015, "X", Some(10.0)),
            obs("A", 2015, "Y", Some(30.0)),
            obs("B", 2015, "X", Some(0.0)),
        ]);
        let view = PanelView::all(&ds);
        group(
            &view,
            &AggregationSpec::sum(vec![Field::Entity, Field::dimension("dim")]),
        )
        .unwrap()
    }

    #[test]
    fn proportion_end_to_end() {
        let table = proportion(&entity_dim_sums(), &[Field::Entity], "value").unwrap();
        assert!(close(table.get(&["A".into(), "X".into()], PROPORTION), 0.25));
        assert!(close(table.get(&["A".into(), "Y".into()], PROPORTION), 0.75));
        assert_eq!(
            table.get(&["B".into(), "X".into()], PROPORTION),
            Some(Cell::DivisionByZero)
        );
    }

    #[test]
    fn proportions_sum_to_one_per_partition() {
        let mut table = Table::new(
            vec![Field::Entity, Field::dimension("dim")],
            vec!["value".into()],
        );
        let values = [0.1, 0.2, 0.3, 1e6, 3.0, 7.5, 1e-3];
        for (i, v) in values.iter().enumerate() {
            let entity = if i % 2 == 0 { "A" } else { "B" };
            table.push(
                vec![entity.into(), KeyValue::Text(format!("d{i}"))],
                vec![Cell::Value(*v)],
            );
        }
        let out = proportion(&table, &[Field::Entity], "value").unwrap();
        let p = out.value_index(PROPORTION).unwrap();
        for entity in ["A", "B"] {
            let sum: f64 = out
                .rows()
                .iter()
                .filter(|r| r.key[0] == KeyValue::from(entity))
                .filter_map(|r| r.values[p].value())
                .sum();
            assert!((sum - 1.0).abs() < EPS, "{entity}: {sum}");
        }
    }

    #[test]
    fn proportion_without_partition_keys_uses_grand_total() {
        let out = proportion(&entity_dim_sums(), &[], "value").unwrap();
        assert!(close(out.get(&["A".into(), "Y".into()], PROPORTION), 0.75));
        assert!(close(out.get(&["B".into(), "X".into()], PROPORTION), 0.0));
    }

    #[test]
    fn proportion_requires_known_columns() {
        let table = entity_dim_sums();
        assert!(proportion(&table, &[Field::Time], "value").is_err());
        assert!(proportion(&table, &[Field::Entity], "area").is_err());
    }

    #[test]
    fn percent_change_cases() {
        assert_eq!(percent_change(&[(2015, 100.0), (2020, 150.0)]), Cell::Value(50.0));
        assert_eq!(percent_change(&[(2020, 150.0), (2015, 100.0)]), Cell::Value(50.0));
        assert_eq!(
            percent_change(&[(2015, 0.0), (2020, 150.0)]),
            Cell::NotApplicable
        );
        assert_eq!(percent_change(&[(2015, 100.0)]), Cell::NotApplicable);
        assert_eq!(percent_change(&[]), Cell::NotApplicable);
    }

    #[test]
    fn top_n_sorts_descending_with_entity_tiebreak() {
        let mut table = Table::new(vec![Field::Entity], vec!["value".into()]);
        for (e, v) in [("C", 5.0), ("A", 5.0), ("B", 9.0), ("D", 1.0)] {
            table.push(vec![e.into()], vec![Cell::Value(v)]);
        }
        table.push(vec!["E".into()], vec![Cell::NoData]);

        let top = top_n(&table, "value", 3).unwrap();
        let names: Vec<_> = top.rows().iter().map(|r| r.key[0].to_string()).collect();
        assert_eq!(names, vec!["B", "A", "C"]);
        assert_eq!(top.column(RANK).unwrap()[2], Cell::Value(3.0));

        let again = top_n(&top, "value", 3).unwrap();
        assert_eq!(again, top);

        let all = top_n(&table, "value", 10).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all.rows()[4].key[0], KeyValue::from("E"));
    }

    #[test]
    fn kpi_summary_over_years() {
        let ds = dataset(vec![
            obs("A", 2015, "X", Some(60.0)),
            obs("B", 2015, "X", Some(40.0)),
            obs("A", 2020, "X", Some(150.0)),
        ]);
        let kpi = kpi_summary(&PanelView::all(&ds), None).unwrap();
        assert_eq!(kpi.total, Cell::Value(250.0));
        assert_eq!(kpi.annual_mean, Cell::Value(125.0));
        assert_eq!(kpi.pct_change, Cell::Value(50.0));
        assert_eq!(kpi.entities, 2);
        assert_eq!(kpi.years, Some((2015, 2020)));
    }

    #[test]
    fn kpi_summary_of_empty_view() {
        let ds = dataset(vec![]);
        let kpi = kpi_summary(&PanelView::all(&ds), None).unwrap();
        assert_eq!(kpi.total, Cell::NoData);
        assert_eq!(kpi.annual_mean, Cell::NoData);
        assert_eq!(kpi.pct_change, Cell::NotApplicable);
        assert_eq!(kpi.years, None);
    }
}
