//! Group-by / reduce / pivot over a filtered view.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::data::filter::PanelView;
use crate::data::model::KeyValue;
use crate::data::schema::{Field, PanelSchema};
use crate::error::{PanelError, Result};
use crate::table::{Cell, PivotTable, Table};

/// How a group's non-null values collapse to one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Sum,
    Mean,
}

impl Reducer {
    /// `Sum` of nothing is 0; `Mean` of nothing is [`PanelError::EmptyGroup`].
    pub fn reduce(&self, values: &[f64], group: &str) -> Result<f64> {
        match self {
            Reducer::Sum => Ok(values.iter().sum()),
            Reducer::Mean if values.is_empty() => Err(PanelError::EmptyGroup(group.to_string())),
            Reducer::Mean => Ok(values.iter().sum::<f64>() / values.len() as f64),
        }
    }
}

/// What to group by and how to reduce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub group_by: Vec<Field>,
    /// Value column name; `None` is the schema's default value column.
    #[serde(default)]
    pub value_column: Option<String>,
    pub reducer: Reducer,
    #[serde(default)]
    pub pivot_on: Option<Field>,
}

impl AggregationSpec {
    pub fn new(group_by: Vec<Field>, reducer: Reducer) -> Self {
        AggregationSpec {
            group_by,
            value_column: None,
            reducer,
            pivot_on: None,
        }
    }

    pub fn sum(group_by: Vec<Field>) -> Self {
        Self::new(group_by, Reducer::Sum)
    }

    pub fn mean(group_by: Vec<Field>) -> Self {
        Self::new(group_by, Reducer::Mean)
    }

    #[must_use]
    pub fn value_column(mut self, column: impl Into<String>) -> Self {
        self.value_column = Some(column.into());
        self
    }

    #[must_use]
    pub fn pivot_on(mut self, field: Field) -> Self {
        self.pivot_on = Some(field);
        self
    }

    pub fn validate(&self, schema: &PanelSchema) -> Result<()> {
        if self.group_by.is_empty() {
            return Err(PanelError::validation("group_by must name at least one field"));
        }
        let mut seen = BTreeSet::new();
        for field in self.group_by.iter().chain(self.pivot_on.iter()) {
            if !seen.insert(field) {
                return Err(PanelError::validation(format!(
                    "field '{field}' appears more than once in group_by/pivot_on"
                )));
            }
            schema
                .check_field(field)
                .map_err(|e| PanelError::validation(e.to_string()))?;
        }
        if let Some(col) = &self.value_column {
            schema
                .value_index(col)
                .map_err(|e| PanelError::validation(e.to_string()))?;
        }
        Ok(())
    }

    fn resolved_value_column<'s>(&'s self, schema: &'s PanelSchema) -> &'s str {
        self.value_column
            .as_deref()
            .unwrap_or_else(|| schema.default_value_column())
    }
}

/// Aggregation output: long form, or wide when `pivot_on` was set.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregated {
    Long(Table),
    Wide(PivotTable),
}

impl Aggregated {
    /// Flatten to a [`Table`]; wide tables get one value column per pivot value.
    pub fn into_table(self) -> Table {
        match self {
            Aggregated::Long(t) => t,
            Aggregated::Wide(p) => p.to_table(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Aggregated::Long(t) => t.is_empty(),
            Aggregated::Wide(p) => p.is_empty(),
        }
    }
}

/// Group `view` and reduce, pivoting when the spec asks for it.
pub fn aggregate(view: &PanelView<'_>, spec: &AggregationSpec) -> Result<Aggregated> {
    spec.validate(view.schema())?;
    match &spec.pivot_on {
        None => Ok(Aggregated::Long(group(view, spec)?)),
        Some(pivot) => {
            let mut long_spec = spec.clone();
            long_spec.group_by.push(pivot.clone());
            long_spec.pivot_on = None;
            let long = group(view, &long_spec)?;
            Ok(Aggregated::Wide(PivotTable::from_long(&long, pivot)?))
        }
    }
}

/// Long-form grouping; `pivot_on` is ignored.
///
/// Groups come out sorted by key. A group whose rows are all null sums to 0
/// and has a `NoData` mean.
pub fn group(view: &PanelView<'_>, spec: &AggregationSpec) -> Result<Table> {
    let schema = view.schema();
    spec.validate(schema)?;
    let value_column = spec.resolved_value_column(schema);
    let value_idx = schema.value_index(value_column)?;

    let mut groups: BTreeMap<Vec<KeyValue>, Vec<f64>> = BTreeMap::new();
    for obs in view.rows() {
        let key: Vec<KeyValue> = spec.group_by.iter().map(|f| obs.key(f)).collect();
        let values = groups.entry(key).or_default();
        if let Some(v) = obs.value_at(value_idx) {
            values.push(v);
        }
    }

    let mut table = Table::new(spec.group_by.clone(), vec![value_column.to_string()]);
    for (key, values) in groups {
        let label = key
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" / ");
        let cell = match spec.reducer.reduce(&values, &label) {
            Ok(v) => Cell::Value(v),
            Err(PanelError::EmptyGroup(g)) => {
                debug!("no values to average for group {g}");
                Cell::NoData
            }
            Err(e) => return Err(e),
        };
        table.push(key, vec![cell]);
    }
    debug!(
        "grouped {} rows into {} groups by [{}]",
        view.len(),
        table.len(),
        spec.group_by
            .iter()
            .map(Field::label)
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(table)
}

/// Single-number reduction over the whole view (KPI tiles).
pub fn total(view: &PanelView<'_>, reducer: Reducer, value_column: Option<&str>) -> Result<Cell> {
    let schema = view.schema();
    let column = value_column.unwrap_or_else(|| schema.default_value_column());
    let idx = schema.value_index(column)?;
    let values: Vec<f64> = view.rows().filter_map(|o| o.value_at(idx)).collect();
    match reducer.reduce(&values, "all rows") {
        Ok(v) => Ok(Cell::Value(v)),
        Err(PanelError::EmptyGroup(_)) => Ok(Cell::NoData),
        Err(e) => Err(e),
    }
}
