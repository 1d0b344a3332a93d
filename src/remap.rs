use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};
use serde::Serialize;

use crate::data::model::KeyValue;
use crate::data::schema::Field;
use crate::error::Result;
use crate::table::Table;

/// What happens to labels the mapping does not mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnmappedPolicy {
    /// Keep the original label.
    Keep,
    /// Drop the row.
    Drop,
}

/// Labels touched by a remap that did not simply translate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemapReport {
    /// Labels explicitly mapped to "drop".
    pub dropped: BTreeSet<String>,
    /// Labels absent from the mapping.
    pub unmapped: BTreeSet<String>,
}

impl RemapReport {
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty() && self.unmapped.is_empty()
    }
}

/// A category relabelling: `from → Some(to)` renames, `from → None` drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relabel {
    name: String,
    mapping: BTreeMap<String, Option<String>>,
    unmapped: UnmappedPolicy,
}

impl Relabel {
    pub fn new(name: impl Into<String>, unmapped: UnmappedPolicy) -> Self {
        Relabel {
            name: name.into(),
            mapping: BTreeMap::new(),
            unmapped,
        }
    }

    #[must_use]
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.mapping.insert(from.into(), Some(to.into()));
        self
    }

    #[must_use]
    pub fn drop_label(mut self, from: impl Into<String>) -> Self {
        self.mapping.insert(from.into(), None);
        self
    }

    /// Erosion risk codes to readable severity names.
    pub fn erosion_severity() -> Self {
        Relabel::new("erosion severity", UnmappedPolicy::Drop)
            .rename("LW", "Low")
            .rename("MD", "Moderate")
            .rename("HG", "High")
            .rename("SV", "Severe")
    }

    /// Country names to ISO-3 codes for choropleths. Names the map does not
    /// know pass through; EU aggregates have no single location and drop.
    pub fn country_iso3() -> Self {
        Relabel::new("country ISO-3", UnmappedPolicy::Keep)
            .rename("United States", "USA")
            .rename("United Kingdom", "GBR")
            .rename("China (People's Republic of)", "CHN")
            .rename("Korea", "KOR")
            .rename("Türkiye", "TUR")
            .drop_label("European Union (27 countries from 01/02/2020)")
            .drop_label("European Union (28 countries)")
    }

    /// Translate one label; `None` means the row is dropped.
    pub fn translate(&self, label: &str) -> Option<String> {
        match self.mapping.get(label) {
            Some(target) => target.clone(),
            None => match self.unmapped {
                UnmappedPolicy::Keep => Some(label.to_string()),
                UnmappedPolicy::Drop => None,
            },
        }
    }

    /// Relabel one key column of `table`. Rows are renamed in place, not
    /// merged: two labels mapped to the same target stay separate rows.
    pub fn apply(&self, table: &Table, field: &Field) -> Result<(Table, RemapReport)> {
        let idx = table.require_key(field)?;
        let mut report = RemapReport::default();
        let mut rows = Vec::with_capacity(table.len());

        for row in table.rows() {
            let KeyValue::Text(label) = &row.key[idx] else {
                rows.push(row.clone());
                continue;
            };
            match self.mapping.get(label) {
                Some(None) => {
                    report.dropped.insert(label.clone());
                    continue;
                }
                None => {
                    report.unmapped.insert(label.clone());
                }
                Some(Some(_)) => {}
            }
            if let Some(new_label) = self.translate(label) {
                let mut row = row.clone();
                row.key[idx] = KeyValue::Text(new_label);
                rows.push(row);
            }
        }

        match self.unmapped {
            UnmappedPolicy::Drop if !report.unmapped.is_empty() => warn!(
                "{}: dropped {} unmapped label(s): {:?}",
                self.name,
                report.unmapped.len(),
                report.unmapped
            ),
            _ if !report.unmapped.is_empty() => debug!(
                "{}: {} label(s) passed through unmapped",
                self.name,
                report.unmapped.len()
            ),
            _ => {}
        }
        Ok((table.with_rows(rows), report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    fn by_country(names: &[&str]) -> Table {
        let mut t = Table::new(vec![Field::Entity], vec!["value".into()]);
        for n in names {
            t.push(vec![(*n).into()], vec![Cell::Value(1.0)]);
        }
        t
    }

    #[test]
    fn iso_mapping_keeps_unknown_and_drops_aggregates() {
        let table = by_country(&[
            "United States",
            "Chile",
            "European Union (28 countries)",
        ]);
        let (out, report) = Relabel::country_iso3().apply(&table, &Field::Entity).unwrap();
        let labels: Vec<_> = out.rows().iter().map(|r| r.key[0].to_string()).collect();
        assert_eq!(labels, vec!["USA", "Chile"]);
        assert!(report.dropped.contains("European Union (28 countries)"));
        assert!(report.unmapped.contains("Chile"));
        assert!(!report.is_clean());
    }

    #[test]
    fn severity_mapping_drops_unknown_codes() {
        let mut t = Table::new(vec![Field::dimension("EROSION_LEVEL")], vec!["value".into()]);
        for code in ["LW", "SV", "XX"] {
            t.push(vec![code.into()], vec![Cell::Value(1.0)]);
        }
        let (out, report) = Relabel::erosion_severity()
            .apply(&t, &Field::dimension("EROSION_LEVEL"))
            .unwrap();
        let labels: Vec<_> = out.rows().iter().map(|r| r.key[0].to_string()).collect();
        assert_eq!(labels, vec!["Low", "Severe"]);
        assert_eq!(report.unmapped.len(), 1);
    }

    #[test]
    fn remap_requires_the_key_column() {
        let table = by_country(&["Chile"]);
        assert!(Relabel::erosion_severity().apply(&table, &Field::Time).is_err());
    }
}
