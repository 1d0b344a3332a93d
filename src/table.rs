use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::data::model::KeyValue;
use crate::data::schema::Field;
use crate::error::{PanelError, Result};

// ---------------------------------------------------------------------------
// Cell – a derived numeric value or a sentinel
// ---------------------------------------------------------------------------

/// A numeric cell of a derived table.
///
/// The three sentinels are distinct from every number and from each other so
/// a renderer can always tell "not observed" from "observed zero".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Value(f64),
    /// Nothing was observed for this combination.
    NoData,
    /// A proportion whose partition total is zero.
    DivisionByZero,
    /// A metric that is undefined for its input (e.g. percent change from 0).
    NotApplicable,
}

impl Cell {
    pub fn value(&self) -> Option<f64> {
        match self {
            Cell::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Cell::Value(_))
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        if v.is_finite() {
            Cell::Value(v)
        } else {
            Cell::NotApplicable
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Value(v) => write!(f, "{v}"),
            Cell::NoData => write!(f, "no data"),
            Cell::DivisionByZero | Cell::NotApplicable => write!(f, "N/A"),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Cell::Value(v) => serializer.serialize_f64(*v),
            Cell::NoData => serializer.serialize_str("no data"),
            Cell::DivisionByZero => serializer.serialize_str("N/A (division by zero)"),
            Cell::NotApplicable => serializer.serialize_str("N/A"),
        }
    }
}

// ---------------------------------------------------------------------------
// Table – long-form keyed table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub key: Vec<KeyValue>,
    pub values: Vec<Cell>,
}

/// Rows keyed by group fields, with one or more numeric columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    key_columns: Vec<Field>,
    value_columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(key_columns: Vec<Field>, value_columns: Vec<String>) -> Self {
        Table {
            key_columns,
            value_columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, key: Vec<KeyValue>, values: Vec<Cell>) {
        debug_assert_eq!(key.len(), self.key_columns.len());
        debug_assert_eq!(values.len(), self.value_columns.len());
        self.rows.push(Row { key, values });
    }

    pub fn key_columns(&self) -> &[Field] {
        &self.key_columns
    }

    pub fn value_columns(&self) -> &[String] {
        &self.value_columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn key_index(&self, field: &Field) -> Option<usize> {
        self.key_columns.iter().position(|k| k == field)
    }

    pub fn value_index(&self, name: &str) -> Option<usize> {
        self.value_columns.iter().position(|c| c == name)
    }

    pub fn require_key(&self, field: &Field) -> Result<usize> {
        self.key_index(field)
            .ok_or_else(|| PanelError::schema(format!("table has no key column '{field}'")))
    }

    pub fn require_value(&self, name: &str) -> Result<usize> {
        self.value_index(name)
            .ok_or_else(|| PanelError::schema(format!("table has no value column '{name}'")))
    }

    /// Whether `label` names a key or a value column.
    pub fn has_column(&self, label: &str) -> bool {
        self.key_columns.iter().any(|k| k.label() == label) || self.value_index(label).is_some()
    }

    /// All cells of a value column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<Cell>> {
        let idx = self.require_value(name)?;
        Ok(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Add a value column, replacing any existing column of the same name.
    pub fn set_column(&mut self, name: &str, cells: Vec<Cell>) {
        debug_assert_eq!(cells.len(), self.rows.len());
        match self.value_index(name) {
            Some(idx) => {
                for (row, cell) in self.rows.iter_mut().zip(cells) {
                    row.values[idx] = cell;
                }
            }
            None => {
                self.value_columns.push(name.to_string());
                for (row, cell) in self.rows.iter_mut().zip(cells) {
                    row.values.push(cell);
                }
            }
        }
    }

    /// Replace the rows, keeping the columns.
    pub fn with_rows(&self, rows: Vec<Row>) -> Table {
        Table {
            key_columns: self.key_columns.clone(),
            value_columns: self.value_columns.clone(),
            rows,
        }
    }

    /// Drop rows whose `field` key is [`KeyValue::Missing`]; returns the
    /// kept table and how many rows went.
    pub fn drop_missing(&self, field: &Field) -> Result<(Table, usize)> {
        let idx = self.require_key(field)?;
        let kept: Vec<Row> = self
            .rows
            .iter()
            .filter(|r| r.key[idx] != KeyValue::Missing)
            .cloned()
            .collect();
        let dropped = self.rows.len() - kept.len();
        Ok((self.with_rows(kept), dropped))
    }

    /// Cell lookup by full key.
    pub fn get(&self, key: &[KeyValue], value_column: &str) -> Option<Cell> {
        let idx = self.value_index(value_column)?;
        self.rows
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.values[idx])
    }
}

// ---------------------------------------------------------------------------
// PivotTable – wide form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotRow {
    pub key: Vec<KeyValue>,
    pub cells: Vec<Cell>,
}

/// A grouped table reshaped so each distinct value of `pivot_column` is a
/// column. Unobserved combinations hold [`Cell::NoData`], never zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotTable {
    index_columns: Vec<Field>,
    pivot_column: Field,
    value_label: String,
    pivot_values: Vec<KeyValue>,
    rows: Vec<PivotRow>,
}

impl PivotTable {
    /// Reshape `table` (long form) on one of its key columns, taking the
    /// first value column as the cell value.
    pub fn from_long(table: &Table, pivot_on: &Field) -> Result<Self> {
        let pivot_idx = table.require_key(pivot_on)?;
        let value_label = table
            .value_columns()
            .first()
            .cloned()
            .ok_or_else(|| PanelError::schema("cannot pivot a table without value columns"))?;

        let index_columns: Vec<Field> = table
            .key_columns()
            .iter()
            .filter(|k| *k != pivot_on)
            .cloned()
            .collect();

        let mut pivot_values: Vec<KeyValue> =
            table.rows().iter().map(|r| r.key[pivot_idx].clone()).collect();
        pivot_values.sort();
        pivot_values.dedup();

        let mut grid: BTreeMap<Vec<KeyValue>, Vec<Cell>> = BTreeMap::new();
        for row in table.rows() {
            let index_key: Vec<KeyValue> = row
                .key
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != pivot_idx)
                .map(|(_, k)| k.clone())
                .collect();
            let col = pivot_values
                .binary_search(&row.key[pivot_idx])
                .unwrap_or_default();
            let cells = grid
                .entry(index_key)
                .or_insert_with(|| vec![Cell::NoData; pivot_values.len()]);
            cells[col] = row.values[0];
        }

        Ok(PivotTable {
            index_columns,
            pivot_column: pivot_on.clone(),
            value_label,
            pivot_values,
            rows: grid
                .into_iter()
                .map(|(key, cells)| PivotRow { key, cells })
                .collect(),
        })
    }

    pub fn index_columns(&self) -> &[Field] {
        &self.index_columns
    }

    pub fn pivot_column(&self) -> &Field {
        &self.pivot_column
    }

    pub fn pivot_values(&self) -> &[KeyValue] {
        &self.pivot_values
    }

    pub fn rows(&self) -> &[PivotRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell for (index key, pivot value); `NoData` when never observed.
    pub fn get(&self, key: &[KeyValue], pivot_value: &KeyValue) -> Cell {
        let Ok(col) = self.pivot_values.binary_search(pivot_value) else {
            return Cell::NoData;
        };
        self.rows
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.cells[col])
            .unwrap_or(Cell::NoData)
    }

    /// Back to long form. Only observed combinations become rows, so the
    /// "no data" holes stay holes.
    pub fn unpivot(&self) -> Table {
        let mut key_columns = self.index_columns.clone();
        key_columns.push(self.pivot_column.clone());
        let mut table = Table::new(key_columns, vec![self.value_label.clone()]);
        for row in &self.rows {
            for (pv, cell) in self.pivot_values.iter().zip(&row.cells) {
                if *cell == Cell::NoData {
                    continue;
                }
                let mut key = row.key.clone();
                key.push(pv.clone());
                table.push(key, vec![*cell]);
            }
        }
        table
    }

    /// Sum of observed numeric cells per index row; `NoData` if none.
    pub fn row_totals(&self) -> Table {
        let mut table = Table::new(self.index_columns.clone(), vec![self.value_label.clone()]);
        for row in &self.rows {
            let observed: Vec<f64> = row.cells.iter().filter_map(Cell::value).collect();
            let total = if observed.is_empty() {
                Cell::NoData
            } else {
                Cell::Value(observed.iter().sum())
            };
            table.push(row.key.clone(), vec![total]);
        }
        table
    }

    /// Keep only index rows whose key is in `keys`, in the order given.
    pub fn select_rows(&self, keys: &[Vec<KeyValue>]) -> PivotTable {
        let rows = keys
            .iter()
            .filter_map(|k| self.rows.iter().find(|r| &r.key == k).cloned())
            .collect();
        PivotTable {
            rows,
            ..self.clone()
        }
    }

    /// Wide table with one value column per pivot value, for export and
    /// heatmap payloads.
    pub fn to_table(&self) -> Table {
        let columns = self.pivot_values.iter().map(|v| v.to_string()).collect();
        let mut table = Table::new(self.index_columns.clone(), columns);
        for row in &self.rows {
            table.push(row.key.clone(), row.cells.clone());
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long() -> Table {
        let mut t = Table::new(
            vec![Field::Entity, Field::dimension("dim")],
            vec!["value".into()],
        );
        t.push(vec!["A".into(), "X".into()], vec![Cell::Value(10.0)]);
        t.push(vec!["A".into(), "Y".into()], vec![Cell::Value(0.0)]);
        t.push(vec!["B".into(), "X".into()], vec![Cell::Value(4.0)]);
        t
    }

    #[test]
    fn pivot_fills_unobserved_with_no_data() {
        let wide = PivotTable::from_long(&long(), &Field::dimension("dim")).unwrap();
        assert_eq!(
            wide.pivot_values().to_vec(),
            vec![KeyValue::from("X"), KeyValue::from("Y")]
        );
        assert_eq!(wide.get(&["A".into()], &"Y".into()), Cell::Value(0.0));
        assert_eq!(wide.get(&["B".into()], &"Y".into()), Cell::NoData);
        assert_eq!(wide.get(&["C".into()], &"X".into()), Cell::NoData);
    }

    #[test]
    fn pivot_round_trip_restores_observed_cells() {
        let original = long();
        let wide = PivotTable::from_long(&original, &Field::dimension("dim")).unwrap();
        let back = wide.unpivot();
        assert_eq!(back.len(), original.len());
        for row in original.rows() {
            assert_eq!(back.get(&row.key, "value"), Some(row.values[0]));
        }
        assert_eq!(back.get(&["B".into(), "Y".into()], "value"), None);
    }

    #[test]
    fn row_totals_ignore_holes() {
        let wide = PivotTable::from_long(&long(), &Field::dimension("dim")).unwrap();
        let totals = wide.row_totals();
        assert_eq!(totals.get(&["A".into()], "value"), Some(Cell::Value(10.0)));
        assert_eq!(totals.get(&["B".into()], "value"), Some(Cell::Value(4.0)));
    }

    #[test]
    fn set_column_replaces_existing() {
        let mut t = long();
        t.set_column("rank", vec![Cell::Value(1.0); 3]);
        t.set_column("rank", vec![Cell::Value(2.0); 3]);
        assert_eq!(t.value_columns(), &["value".to_string(), "rank".to_string()]);
        assert!(t.column("rank").unwrap().iter().all(|c| *c == Cell::Value(2.0)));
        assert!(matches!(t.column("missing"), Err(PanelError::Schema(_))));
    }

    #[test]
    fn drop_missing_removes_keyless_rows() {
        let mut t = Table::new(vec![Field::EntityIso], vec!["value".into()]);
        t.push(vec![KeyValue::Missing], vec![Cell::Value(1.0)]);
        t.push(vec!["FRA".into()], vec![Cell::Value(2.0)]);
        let (kept, dropped) = t.drop_missing(&Field::EntityIso).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(kept.rows()[0].key, vec![KeyValue::from("FRA")]);
        assert!(t.drop_missing(&Field::Time).is_err());
    }

    #[test]
    fn sentinels_render_as_na() {
        assert_eq!(Cell::DivisionByZero.to_string(), "N/A");
        assert_eq!(Cell::NotApplicable.to_string(), "N/A");
        assert_eq!(Cell::from(f64::INFINITY), Cell::NotApplicable);
        assert_eq!(
            serde_json::to_string(&vec![Cell::Value(0.5), Cell::NoData]).unwrap(),
            r#"[0.5,"no data"]"#
        );
    }
}
