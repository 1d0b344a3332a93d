//! Renderer-agnostic chart payloads.
//!
//! The builder only checks that a table carries the columns a chart kind
//! needs and lays the cells out as x values and named series. Drawing is the
//! renderer's job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::color::SeriesColors;
use crate::data::model::KeyValue;
use crate::data::schema::Field;
use crate::error::{PanelError, Result};
use crate::table::{Cell, Table};

pub const NO_DATA_NOTICE: &str = "No data for this selection";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    /// Line over time.
    Trend,
    /// Bars per category, optionally stacked by series.
    Comparison,
    /// Parts of a whole (pie / stacked share).
    Composition,
    /// Choropleth keyed by location.
    Geographic,
}

/// Titles plus which value column(s) to plot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartLabels {
    pub title: String,
    #[serde(default)]
    pub x_title: Option<String>,
    #[serde(default)]
    pub y_title: Option<String>,
    /// Value columns to plot. Empty means the table's first value column.
    /// More than one plots each column as its own series (wide tables).
    #[serde(default)]
    pub values: Vec<String>,
    /// Plot every value column of the table (pivoted tables whose columns
    /// are only known after aggregation).
    #[serde(default)]
    pub all_values: bool,
}

impl ChartLabels {
    pub fn titled(title: impl Into<String>) -> Self {
        ChartLabels {
            title: title.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn axes(mut self, x: impl Into<String>, y: impl Into<String>) -> Self {
        self.x_title = Some(x.into());
        self.y_title = Some(y.into());
        self
    }

    #[must_use]
    pub fn value(mut self, column: impl Into<String>) -> Self {
        self.values.push(column.into());
        self
    }

    #[must_use]
    pub fn every_value(mut self) -> Self {
        self.all_values = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub x: KeyValue,
    pub y: Cell,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub color: String,
    pub points: Vec<Point>,
}

/// Declarative chart input: `{x, y, series, geo_key}` plus titles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPayload {
    pub kind: ChartKind,
    pub title: String,
    pub x_title: Option<String>,
    pub y_title: Option<String>,
    /// Column supplying the x axis (or slice names, or locations).
    pub x_column: String,
    /// Distinct x values in display order.
    pub x: Vec<KeyValue>,
    /// Value column(s) on the y axis.
    pub y: Vec<String>,
    pub series: Vec<Series>,
    /// For geographic charts: the column holding location keys.
    pub geo_key: Option<String>,
    /// Set when there is nothing to draw.
    pub notice: Option<String>,
}

impl ChartPayload {
    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|s| s.points.is_empty())
    }
}

/// Map a table to a chart payload for `kind`.
///
/// Required columns: `Trend` needs a `time` key; `Comparison` and
/// `Composition` need at least one key column; `Geographic` needs an
/// `entity_iso` or `entity` key. Missing columns are [`PanelError::Schema`].
pub fn build(kind: ChartKind, table: &Table, labels: &ChartLabels) -> Result<ChartPayload> {
    let values: Vec<String> = if labels.all_values {
        table.value_columns().to_vec()
    } else if labels.values.is_empty() {
        table
            .value_columns()
            .first()
            .cloned()
            .into_iter()
            .collect()
    } else {
        labels.values.clone()
    };
    if values.is_empty() {
        return Err(PanelError::schema("table has no value column to plot"));
    }
    let value_idx: Vec<usize> = values
        .iter()
        .map(|v| table.require_value(v))
        .collect::<Result<_>>()?;

    let x_field = x_field(kind, table)?;
    let x_idx = table.require_key(&x_field)?;
    let series_idx: Vec<usize> = (0..table.key_columns().len())
        .filter(|&i| i != x_idx)
        .collect();
    if kind == ChartKind::Composition && !series_idx.is_empty() {
        // Slices are the full key, not a key plus series.
        return composition_over_full_key(table, labels, &values, &value_idx);
    }

    let mut x: Vec<KeyValue> = Vec::new();
    let mut series: BTreeMap<String, Vec<Point>> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();

    for row in table.rows() {
        let xv = row.key[x_idx].clone();
        if !x.contains(&xv) {
            x.push(xv.clone());
        }
        for (value_name, &vi) in values.iter().zip(&value_idx) {
            let mut parts: Vec<String> = series_idx.iter().map(|&i| row.key[i].to_string()).collect();
            if values.len() > 1 || parts.is_empty() {
                parts.push(value_name.clone());
            }
            let name = parts.join(" / ");
            if !series.contains_key(&name) {
                order.push(name.clone());
            }
            series.entry(name).or_default().push(Point {
                x: xv.clone(),
                y: row.values[vi],
            });
        }
    }
    if kind == ChartKind::Trend {
        x.sort();
        for points in series.values_mut() {
            points.sort_by(|a, b| a.x.cmp(&b.x));
        }
    }

    let colors = SeriesColors::new(order.iter().map(String::as_str));
    let series: Vec<Series> = order
        .into_iter()
        .map(|name| {
            let points = series.remove(&name).unwrap_or_default();
            Series {
                color: colors.color_for(&name).to_string(),
                name,
                points,
            }
        })
        .collect();

    Ok(finish(ChartPayload {
        kind,
        title: labels.title.clone(),
        x_title: labels.x_title.clone(),
        y_title: labels.y_title.clone(),
        x_column: x_field.label().to_string(),
        x,
        y: values,
        series,
        geo_key: (kind == ChartKind::Geographic).then(|| x_field.label().to_string()),
        notice: None,
    }))
}

fn x_field(kind: ChartKind, table: &Table) -> Result<Field> {
    let keys = table.key_columns();
    match kind {
        ChartKind::Trend => {
            table.require_key(&Field::Time)?;
            Ok(Field::Time)
        }
        ChartKind::Comparison | ChartKind::Composition => keys
            .iter()
            .find(|k| **k != Field::Time)
            .or_else(|| keys.first())
            .cloned()
            .ok_or_else(|| PanelError::schema(format!("{kind:?} chart needs a key column"))),
        ChartKind::Geographic => [Field::EntityIso, Field::Entity]
            .into_iter()
            .find(|f| table.key_index(f).is_some())
            .ok_or_else(|| {
                PanelError::schema("geographic chart needs an entity or entity_iso key column")
            }),
    }
}

fn composition_over_full_key(
    table: &Table,
    labels: &ChartLabels,
    values: &[String],
    value_idx: &[usize],
) -> Result<ChartPayload> {
    let x: Vec<KeyValue> = table
        .rows()
        .iter()
        .map(|r| {
            KeyValue::Text(
                r.key
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" / "),
            )
        })
        .collect();
    let colors = SeriesColors::new(values.iter().map(String::as_str));
    let series = values
        .iter()
        .zip(value_idx)
        .map(|(name, &vi)| Series {
            name: name.clone(),
            color: colors.color_for(name).to_string(),
            points: x
                .iter()
                .zip(table.rows())
                .map(|(xv, r)| Point {
                    x: xv.clone(),
                    y: r.values[vi],
                })
                .collect(),
        })
        .collect();
    let x_column = table
        .key_columns()
        .iter()
        .map(Field::label)
        .collect::<Vec<_>>()
        .join(" / ");
    Ok(finish(ChartPayload {
        kind: ChartKind::Composition,
        title: labels.title.clone(),
        x_title: labels.x_title.clone(),
        y_title: labels.y_title.clone(),
        x_column,
        x,
        y: values.to_vec(),
        series,
        geo_key: None,
        notice: None,
    }))
}

fn finish(mut payload: ChartPayload) -> ChartPayload {
    if payload.is_empty() {
        payload.notice = Some(NO_DATA_NOTICE.to_string());
    }
    payload
}

/// Compact tile formatting: `1.2K`, `3.4M`, `5.6B`.
pub fn format_compact(cell: Cell) -> String {
    let Cell::Value(num) = cell else {
        return cell.to_string();
    };
    let abs = num.abs();
    if abs >= 1_000_000_000.0 {
        format!("{:.1}B", num / 1_000_000_000.0)
    } else if abs >= 1_000_000.0 {
        format!("{:.1}M", num / 1_000_000.0)
    } else if abs >= 1_000.0 {
        format!("{:.1}K", num / 1_000.0)
    } else {
        format!("{num:.2}")
    }
}
