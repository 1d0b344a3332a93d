use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PanelError, Result};

// ---------------------------------------------------------------------------
// Field – a logical column addressed through the schema
// ---------------------------------------------------------------------------

/// A logical column of a panel dataset.
///
/// Downstream code never names physical CSV headers; it addresses columns by
/// role and lets the [`PanelSchema`] resolve them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Entity,
    EntityIso,
    Time,
    Dimension(String),
}

impl Field {
    pub fn dimension(name: impl Into<String>) -> Self {
        Field::Dimension(name.into())
    }

    /// Column label used in derived tables and chart payloads.
    pub fn label(&self) -> &str {
        match self {
            Field::Entity => "entity",
            Field::EntityIso => "entity_iso",
            Field::Time => "time",
            Field::Dimension(name) => name,
        }
    }

    /// Parse a label produced by [`Field::label`] (or a dimension name).
    pub fn parse(label: &str) -> Self {
        match label {
            "entity" => Field::Entity,
            "entity_iso" => Field::EntityIso,
            "time" => Field::Time,
            other => Field::Dimension(other.to_string()),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which physical column identifies an entity for membership tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKey {
    #[default]
    Name,
    Iso,
}

// ---------------------------------------------------------------------------
// PanelSchema – per-dataset column descriptor
// ---------------------------------------------------------------------------

/// Maps logical roles to the physical column names of one dataset variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSchema {
    pub name: String,
    pub entity_column: String,
    #[serde(default)]
    pub entity_iso_column: Option<String>,
    #[serde(default)]
    pub entity_key: EntityKey,
    pub time_column: String,
    /// Numeric measure columns; the first one is the default.
    pub value_columns: Vec<String>,
    #[serde(default)]
    pub dimension_columns: Vec<String>,
    /// Dimension values that mark malformed rows (dropped at load time).
    #[serde(default)]
    pub row_exclusions: BTreeMap<String, BTreeSet<String>>,
}

impl PanelSchema {
    /// OECD nutrient balance panel.
    pub fn nutrients() -> Self {
        PanelSchema {
            name: "nutrients".into(),
            entity_column: "Reference area".into(),
            entity_iso_column: Some("REF_AREA".into()),
            entity_key: EntityKey::Name,
            time_column: "TIME_PERIOD".into(),
            value_columns: vec!["OBS_VALUE".into()],
            dimension_columns: vec!["Measure".into(), "Nutrients".into()],
            row_exclusions: BTreeMap::new(),
        }
    }

    /// Soil erosion panel (wind / water, by risk level).
    pub fn erosion() -> Self {
        PanelSchema {
            name: "erosion".into(),
            entity_column: "Country".into(),
            entity_iso_column: None,
            entity_key: EntityKey::Name,
            time_column: "Time".into(),
            value_columns: vec!["OBS_VALUE".into()],
            dimension_columns: vec![
                "Types of Erosion".into(),
                "EROSION_LEVEL".into(),
                "Erosion risk level".into(),
            ],
            row_exclusions: BTreeMap::new(),
        }
    }

    /// Greenhouse gas emissions panel.
    pub fn greenhouse_gas() -> Self {
        PanelSchema {
            name: "greenhouse-gas".into(),
            entity_column: "Reference area".into(),
            entity_iso_column: None,
            entity_key: EntityKey::Name,
            time_column: "TIME_PERIOD".into(),
            value_columns: vec!["OBS_VALUE".into()],
            dimension_columns: vec!["MEASURE".into()],
            row_exclusions: BTreeMap::new(),
        }
    }

    /// Agricultural land use panel.
    pub fn land_use() -> Self {
        let mut row_exclusions = BTreeMap::new();
        // Repeated header rows and unit rows leak into the land type column.
        row_exclusions.insert(
            "Types of Land".to_string(),
            ["Types of Land", "HA"].iter().map(|s| s.to_string()).collect(),
        );
        PanelSchema {
            name: "land-use".into(),
            entity_column: "Country".into(),
            entity_iso_column: None,
            entity_key: EntityKey::Name,
            time_column: "Time".into(),
            value_columns: vec!["Actual area (ha)".into(), "OBS_VALUE".into()],
            dimension_columns: vec!["Types of Land".into()],
            row_exclusions,
        }
    }

    /// Look up a built-in schema by its variant name.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "nutrients" => Ok(Self::nutrients()),
            "erosion" => Ok(Self::erosion()),
            "greenhouse-gas" | "ghg" => Ok(Self::greenhouse_gas()),
            "land-use" | "land" => Ok(Self::land_use()),
            other => Err(PanelError::validation(format!(
                "unknown dataset variant '{other}'"
            ))),
        }
    }

    /// Load a custom schema descriptor from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PanelError::not_found(path, Some(e)))?;
        let schema: PanelSchema = serde_json::from_str(&text)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Check the descriptor itself is coherent.
    pub fn validate(&self) -> Result<()> {
        if self.value_columns.is_empty() {
            return Err(PanelError::schema(format!(
                "schema '{}' declares no value column",
                self.name
            )));
        }
        let mut seen = BTreeSet::new();
        for col in self.required_columns() {
            if !seen.insert(col) {
                return Err(PanelError::schema(format!(
                    "schema '{}' maps column '{col}' to more than one role",
                    self.name
                )));
            }
        }
        for dim in self.row_exclusions.keys() {
            if !self.dimension_columns.contains(dim) {
                return Err(PanelError::schema(format!(
                    "row exclusion on undeclared dimension '{dim}'"
                )));
            }
        }
        Ok(())
    }

    /// Physical columns that must be present in every source.
    pub fn required_columns(&self) -> Vec<&str> {
        let mut cols = vec![self.entity_column.as_str(), self.time_column.as_str()];
        if let Some(iso) = &self.entity_iso_column {
            cols.push(iso);
        }
        cols.extend(self.value_columns.iter().map(String::as_str));
        cols.extend(self.dimension_columns.iter().map(String::as_str));
        cols
    }

    /// Index of a value column by name.
    pub fn value_index(&self, column: &str) -> Result<usize> {
        self.value_columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| {
                PanelError::schema(format!(
                    "'{column}' is not a value column of '{}'",
                    self.name
                ))
            })
    }

    pub fn default_value_column(&self) -> &str {
        &self.value_columns[0]
    }

    pub fn has_dimension(&self, name: &str) -> bool {
        self.dimension_columns.iter().any(|d| d == name)
    }

    /// Ensure a field can be resolved against this schema.
    pub fn check_field(&self, field: &Field) -> Result<()> {
        match field {
            Field::Entity | Field::Time => Ok(()),
            Field::EntityIso if self.entity_iso_column.is_some() => Ok(()),
            Field::EntityIso => Err(PanelError::schema(format!(
                "schema '{}' has no ISO entity column",
                self.name
            ))),
            Field::Dimension(name) if self.has_dimension(name) => Ok(()),
            Field::Dimension(name) => Err(PanelError::schema(format!(
                "unknown dimension '{name}' for schema '{}'",
                self.name
            ))),
        }
    }

    /// The field used for entity membership tests.
    pub fn entity_field(&self) -> Field {
        match self.entity_key {
            EntityKey::Name => Field::Entity,
            EntityKey::Iso => Field::EntityIso,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for name in ["nutrients", "erosion", "greenhouse-gas", "land-use"] {
            let schema = PanelSchema::preset(name).unwrap();
            schema.validate().unwrap();
        }
        assert!(PanelSchema::preset("fisheries").is_err());
    }

    #[test]
    fn duplicate_role_is_rejected() {
        let mut schema = PanelSchema::greenhouse_gas();
        schema.dimension_columns.push("OBS_VALUE".into());
        assert!(matches!(schema.validate(), Err(PanelError::Schema(_))));
    }

    #[test]
    fn field_labels_round_trip() {
        for field in [
            Field::Entity,
            Field::EntityIso,
            Field::Time,
            Field::dimension("Measure"),
        ] {
            assert_eq!(Field::parse(field.label()), field);
        }
    }

    #[test]
    fn schema_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(
            &path,
            r#"{
                "name": "custom",
                "entity_column": "Region",
                "time_column": "Year",
                "value_columns": ["Value"],
                "dimension_columns": ["Gas"]
            }"#,
        )
        .unwrap();
        let schema = PanelSchema::from_json_file(&path).unwrap();
        assert_eq!(schema.entity_key, EntityKey::Name);
        assert_eq!(schema.required_columns(), vec!["Region", "Year", "Value", "Gas"]);
        assert!(schema.check_field(&Field::EntityIso).is_err());
    }
}
