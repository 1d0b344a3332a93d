use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Serialize, Serializer};

use super::schema::{Field, PanelSchema};

// ---------------------------------------------------------------------------
// KeyValue – one cell of a grouping key
// ---------------------------------------------------------------------------

/// A grouping-key value: text for entities and categories, a year for time.
/// Grouped tables are kept in `BTreeMap`s so `KeyValue` must be `Ord`;
/// years order numerically rather than as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Text(String),
    Year(i32),
    /// The observation carries no value for this field (e.g. no ISO code).
    Missing,
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use KeyValue::*;
        fn discriminant(v: &KeyValue) -> u8 {
            match v {
                Missing => 0,
                Year(_) => 1,
                Text(_) => 2,
            }
        }
        match (self, other) {
            (Year(a), Year(b)) => a.cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            _ => discriminant(self).cmp(&discriminant(other)),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Text(s) => write!(f, "{s}"),
            KeyValue::Year(y) => write!(f, "{y}"),
            KeyValue::Missing => Ok(()),
        }
    }
}

impl Serialize for KeyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            KeyValue::Text(s) => serializer.serialize_str(s),
            KeyValue::Year(y) => serializer.serialize_i32(*y),
            KeyValue::Missing => serializer.serialize_none(),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        KeyValue::Text(s.to_string())
    }
}

impl From<i32> for KeyValue {
    fn from(y: i32) -> Self {
        KeyValue::Year(y)
    }
}

impl KeyValue {
    pub fn as_year(&self) -> Option<i32> {
        match self {
            KeyValue::Year(y) => Some(*y),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            KeyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Observation – one row of the panel
// ---------------------------------------------------------------------------

/// A single observation (one row of the source table).
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub entity: String,
    pub entity_iso: Option<String>,
    pub time: i32,
    /// Categorical columns: dimension name → value.
    pub dimensions: BTreeMap<String, String>,
    /// Measures aligned with `PanelSchema::value_columns`; `None` is missing.
    pub values: Vec<Option<f64>>,
}

impl Observation {
    /// Primary measure.
    pub fn value(&self) -> Option<f64> {
        self.value_at(0)
    }

    pub fn value_at(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    /// Resolve a logical field to this row's key value.
    pub fn key(&self, field: &Field) -> KeyValue {
        match field {
            Field::Entity => KeyValue::Text(self.entity.clone()),
            Field::EntityIso => self
                .entity_iso
                .as_ref()
                .map(|iso| KeyValue::Text(iso.clone()))
                .unwrap_or(KeyValue::Missing),
            Field::Time => KeyValue::Year(self.time),
            Field::Dimension(name) => self
                .dimensions
                .get(name)
                .map(|v| KeyValue::Text(v.clone()))
                .unwrap_or(KeyValue::Missing),
        }
    }

    /// Textual view of a field, used by membership filters.
    pub fn text(&self, field: &Field) -> Option<&str> {
        match field {
            Field::Entity => Some(&self.entity),
            Field::EntityIso => self.entity_iso.as_deref(),
            Field::Time => None,
            Field::Dimension(name) => self.dimensions.get(name).map(String::as_str),
        }
    }
}

// ---------------------------------------------------------------------------
// PanelDataset – the complete loaded dataset
// ---------------------------------------------------------------------------

/// The full parsed dataset with pre-computed column indices.
/// Immutable once built; share it across sessions behind an `Arc`.
#[derive(Debug, Clone)]
pub struct PanelDataset {
    schema: PanelSchema,
    observations: Vec<Observation>,
    /// For each textual field the sorted set of unique values.
    unique_values: BTreeMap<Field, BTreeSet<String>>,
    time_bounds: Option<(i32, i32)>,
}

impl PanelDataset {
    /// Build column indices from the loaded observations.
    pub fn from_observations(schema: PanelSchema, observations: Vec<Observation>) -> Self {
        let mut unique_values: BTreeMap<Field, BTreeSet<String>> = BTreeMap::new();
        let mut time_bounds: Option<(i32, i32)> = None;

        for obs in &observations {
            unique_values
                .entry(Field::Entity)
                .or_default()
                .insert(obs.entity.clone());
            if let Some(iso) = &obs.entity_iso {
                unique_values
                    .entry(Field::EntityIso)
                    .or_default()
                    .insert(iso.clone());
            }
            for (dim, val) in &obs.dimensions {
                unique_values
                    .entry(Field::Dimension(dim.clone()))
                    .or_default()
                    .insert(val.clone());
            }
            time_bounds = Some(match time_bounds {
                Some((lo, hi)) => (lo.min(obs.time), hi.max(obs.time)),
                None => (obs.time, obs.time),
            });
        }

        PanelDataset {
            schema,
            observations,
            unique_values,
            time_bounds,
        }
    }

    pub fn schema(&self) -> &PanelSchema {
        &self.schema
    }

    /// Read-only view of every observation.
    pub fn rows(&self) -> &[Observation] {
        &self.observations
    }

    /// Physical column names of the source.
    pub fn columns(&self) -> BTreeSet<String> {
        self.schema
            .required_columns()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Sorted distinct values of a textual field (entities, categories).
    pub fn unique_values(&self, field: &Field) -> Option<&BTreeSet<String>> {
        self.unique_values.get(field)
    }

    /// Inclusive (min, max) year present in the data.
    pub fn time_bounds(&self) -> Option<(i32, i32)> {
        self.time_bounds
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn indices_cover_entities_dimensions_and_years() {
        let ds = dataset(vec![
            obs("B", 2012, "Y", Some(1.0)),
            obs("A", 2010, "X", None),
            obs("A", 2015, "X", Some(2.0)),
        ]);
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.time_bounds(), Some((2010, 2015)));
        let entities: Vec<_> = ds.unique_values(&Field::Entity).unwrap().iter().collect();
        assert_eq!(entities, vec!["A", "B"]);
        assert_eq!(ds.unique_values(&Field::dimension("dim")).unwrap().len(), 2);
        assert!(ds.unique_values(&Field::EntityIso).is_none());
    }

    #[test]
    fn columns_are_the_physical_source_columns() {
        let ds = dataset(vec![obs("A", 2010, "X", Some(1.0))]);
        let cols: Vec<String> = ds.columns().into_iter().collect();
        assert_eq!(cols, vec!["dim", "entity", "time", "value"]);

        let land = PanelDataset::from_observations(PanelSchema::land_use(), Vec::new());
        assert!(land.columns().contains("Actual area (ha)"));
        assert!(land.columns().contains("OBS_VALUE"));
        assert_eq!(land.columns().len(), 5);
    }

    #[test]
    fn years_order_numerically_before_text() {
        let mut keys = vec![
            KeyValue::from("2010"),
            KeyValue::Year(2020),
            KeyValue::Year(999),
            KeyValue::Missing,
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                KeyValue::Missing,
                KeyValue::Year(999),
                KeyValue::Year(2020),
                KeyValue::from("2010"),
            ]
        );
    }

    #[test]
    fn missing_dimension_resolves_to_missing_key() {
        let row = obs("A", 2010, "X", Some(1.0));
        assert_eq!(row.key(&Field::dimension("other")), KeyValue::Missing);
        assert_eq!(row.key(&Field::Time), KeyValue::Year(2010));
        assert_eq!(row.text(&Field::Entity), Some("A"));
    }
}
