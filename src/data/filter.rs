use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use super::model::{Observation, PanelDataset};
use super::schema::{Field, PanelSchema};
use crate::error::{PanelError, Result};

/// Multiselect option that stands for "every entity".
pub const ALL_ENTITIES: &str = "All areas";

// ---------------------------------------------------------------------------
// Selection types
// ---------------------------------------------------------------------------

/// Entity restriction. `All` is an explicit sentinel, never an empty set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySelection {
    All,
    Only(BTreeSet<String>),
}

impl EntitySelection {
    /// Interpret a UI multiselect: nothing picked, or the "All areas" option
    /// picked, both mean every entity.
    pub fn from_multiselect<I, S>(selected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = selected.into_iter().map(Into::into).collect();
        if set.is_empty() || set.contains(ALL_ENTITIES) {
            EntitySelection::All
        } else {
            EntitySelection::Only(set)
        }
    }

    pub fn one(entity: impl Into<String>) -> Self {
        EntitySelection::Only([entity.into()].into_iter().collect())
    }
}

/// How a textual field is matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMatch {
    OneOf(BTreeSet<String>),
    /// Substring match against any of the patterns.
    ContainsAny(Vec<String>),
}

impl TextMatch {
    fn matches(&self, text: Option<&str>) -> bool {
        match (self, text) {
            (_, None) => false,
            (TextMatch::OneOf(set), Some(t)) => set.contains(t),
            (TextMatch::ContainsAny(patterns), Some(t)) => {
                patterns.iter().any(|p| t.contains(p.as_str()))
            }
        }
    }
}

/// An extra row predicate on a textual field; `negate` turns it into an
/// exclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub field: Field,
    pub matcher: TextMatch,
    #[serde(default)]
    pub negate: bool,
}

impl Condition {
    pub fn equals(field: Field, value: impl Into<String>) -> Self {
        Self::one_of(field, [value.into()])
    }

    pub fn one_of<I, S>(field: Field, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Condition {
            field,
            matcher: TextMatch::OneOf(values.into_iter().map(Into::into).collect()),
            negate: false,
        }
    }

    pub fn contains_any<I, S>(field: Field, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Condition {
            field,
            matcher: TextMatch::ContainsAny(patterns.into_iter().map(Into::into).collect()),
            negate: false,
        }
    }

    /// Invert the predicate.
    #[must_use]
    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub fn matches(&self, obs: &Observation) -> bool {
        self.matcher.matches(obs.text(&self.field)) != self.negate
    }

    fn validate(&self, schema: &PanelSchema) -> Result<()> {
        if self.field == Field::Time {
            return Err(PanelError::validation(
                "time is filtered by range, not by text match",
            ));
        }
        schema
            .check_field(&self.field)
            .map_err(|e| PanelError::validation(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// FilterSpec – immutable selection value
// ---------------------------------------------------------------------------

/// The active filter selection. Rebuilt on every interaction.
///
/// * `entities`: `All` or an explicit set.
/// * `time_range`: inclusive `(min, max)` years.
/// * `dimension_filters`: allow-lists. A dimension absent from the map, or
///   mapped to an empty set, is unrestricted.
/// * `conditions`: further predicates (exclusions, substring matches).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub entities: EntitySelection,
    pub time_range: (i32, i32),
    #[serde(default)]
    pub dimension_filters: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl FilterSpec {
    pub fn new(time_range: (i32, i32)) -> Self {
        FilterSpec {
            entities: EntitySelection::All,
            time_range,
            dimension_filters: BTreeMap::new(),
            conditions: Vec::new(),
        }
    }

    /// Everything selected: all entities over the dataset's full year span.
    pub fn everything(dataset: &PanelDataset) -> Self {
        let bounds = dataset.time_bounds().unwrap_or((i32::MIN, i32::MAX));
        Self::new(bounds)
    }

    #[must_use]
    pub fn with_entities(mut self, entities: EntitySelection) -> Self {
        self.entities = entities;
        self
    }

    #[must_use]
    pub fn with_time_range(mut self, min: i32, max: i32) -> Self {
        self.time_range = (min, max);
        self
    }

    #[must_use]
    pub fn with_dimension<I, S>(mut self, dimension: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimension_filters.insert(
            dimension.into(),
            allowed.into_iter().map(Into::into).collect(),
        );
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Reject malformed selections before touching any data.
    pub fn validate(&self, schema: &PanelSchema) -> Result<()> {
        let (min, max) = self.time_range;
        if min > max {
            return Err(PanelError::validation(format!(
                "time range start {min} is after end {max}"
            )));
        }
        if let EntitySelection::Only(set) = &self.entities {
            if set.is_empty() {
                return Err(PanelError::validation(
                    "entity selection is empty; use EntitySelection::All for no restriction",
                ));
            }
        }
        for dim in self.dimension_filters.keys() {
            if !schema.has_dimension(dim) {
                return Err(PanelError::validation(format!(
                    "filter on unknown dimension '{dim}'"
                )));
            }
        }
        for cond in &self.conditions {
            cond.validate(schema)?;
        }
        Ok(())
    }

    /// Whether a single observation passes every filter (logical AND).
    pub fn matches(&self, obs: &Observation, entity_field: &Field) -> bool {
        if let EntitySelection::Only(set) = &self.entities {
            match obs.text(entity_field) {
                Some(e) if set.contains(e) => {}
                _ => return false,
            }
        }
        let (min, max) = self.time_range;
        if obs.time < min || obs.time > max {
            return false;
        }
        for (dim, allowed) in &self.dimension_filters {
            if allowed.is_empty() {
                continue;
            }
            match obs.dimensions.get(dim) {
                Some(v) if allowed.contains(v) => {}
                _ => return false,
            }
        }
        self.conditions.iter().all(|c| c.matches(obs))
    }
}

// ---------------------------------------------------------------------------
// FilterEngine
// ---------------------------------------------------------------------------

/// Return indices of observations that pass all active filters.
pub fn filtered_indices(dataset: &PanelDataset, spec: &FilterSpec) -> Vec<usize> {
    let entity_field = dataset.schema().entity_field();
    dataset
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, obs)| spec.matches(obs, &entity_field))
        .map(|(i, _)| i)
        .collect()
}

/// Validate `spec` and apply it. No match is an empty view, not an error.
pub fn apply<'a>(dataset: &'a PanelDataset, spec: &FilterSpec) -> Result<PanelView<'a>> {
    spec.validate(dataset.schema())?;
    let indices = filtered_indices(dataset, spec);
    debug!(
        "filter kept {} of {} observations",
        indices.len(),
        dataset.len()
    );
    Ok(PanelView { dataset, indices })
}

// ---------------------------------------------------------------------------
// PanelView – read-only filtered view
// ---------------------------------------------------------------------------

/// A filtered window onto a [`PanelDataset`]; rows keep source order.
#[derive(Debug, Clone)]
pub struct PanelView<'a> {
    dataset: &'a PanelDataset,
    indices: Vec<usize>,
}

impl<'a> PanelView<'a> {
    /// Unfiltered view of the whole dataset.
    pub fn all(dataset: &'a PanelDataset) -> Self {
        PanelView {
            dataset,
            indices: (0..dataset.len()).collect(),
        }
    }

    pub fn schema(&self) -> &'a PanelSchema {
        self.dataset.schema()
    }

    pub fn rows(&self) -> impl Iterator<Item = &'a Observation> + '_ {
        let rows = self.dataset.rows();
        self.indices.iter().map(move |&i| &rows[i])
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Keep only rows matching `condition`.
    pub fn narrow(&self, condition: &Condition) -> Result<PanelView<'a>> {
        condition.validate(self.schema())?;
        let rows = self.dataset.rows();
        let indices = self
            .indices
            .iter()
            .copied()
            .filter(|&i| condition.matches(&rows[i]))
            .collect();
        Ok(PanelView {
            dataset: self.dataset,
            indices,
        })
    }

    /// Materialise the view as a standalone dataset.
    pub fn to_dataset(&self) -> PanelDataset {
        PanelDataset::from_observations(
            self.dataset.schema().clone(),
            self.rows().cloned().collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::fixtures::{dataset, obs};

    fn decade() -> PanelDataset {
        let mut rows = Vec::new();
        for year in 2000..=2020 {
            rows.push(obs("A", year, "X", Some(year as f64)));
            rows.push(obs("B", year, "Y", Some(1.0)));
        }
        dataset(rows)
    }

    #[test]
    fn single_year_range_keeps_only_that_year() {
        let ds = decade();
        let view = apply(&ds, &FilterSpec::new((2010, 2010))).unwrap();
        assert_eq!(view.len(), 2);
        assert!(view.rows().all(|o| o.time == 2010));
    }

    #[test]
    fn out_of_range_years_give_empty_view() {
        let ds = decade();
        let view = apply(&ds, &FilterSpec::new((2030, 2035))).unwrap();
        assert!(view.is_empty());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let ds = decade();
        let err = apply(&ds, &FilterSpec::new((2015, 2010))).unwrap_err();
        assert!(matches!(err, PanelError::Validation(_)));
    }

    #[test]
    fn all_entities_is_a_no_op() {
        let ds = decade();
        let base = FilterSpec::new((2005, 2012)).with_dimension("dim", ["X", "Y"]);
        let all = apply(&ds, &base.clone().with_entities(EntitySelection::All)).unwrap();
        let only_rest = filtered_indices(&ds, &base);
        assert_eq!(all.indices(), only_rest.as_slice());
    }

    #[test]
    fn empty_dimension_set_means_unrestricted() {
        let ds = decade();
        let spec = FilterSpec::new((2000, 2020)).with_dimension("dim", Vec::<String>::new());
        assert_eq!(apply(&ds, &spec).unwrap().len(), ds.len());
    }

    #[test]
    fn filters_compose_conjunctively() {
        let ds = decade();
        let spec = FilterSpec::new((2010, 2014))
            .with_entities(EntitySelection::one("A"))
            .with_dimension("dim", ["X"]);
        let view = apply(&ds, &spec).unwrap();
        assert_eq!(view.len(), 5);

        let none = spec.with_dimension("dim", ["Y"]);
        assert!(apply(&ds, &none).unwrap().is_empty());
    }

    #[test]
    fn unknown_dimension_is_rejected() {
        let ds = decade();
        let spec = FilterSpec::new((2000, 2020)).with_dimension("colour", ["red"]);
        assert!(matches!(apply(&ds, &spec), Err(PanelError::Validation(_))));
    }

    #[test]
    fn multiselect_sentinel_and_empty_mean_all() {
        assert_eq!(
            EntitySelection::from_multiselect([ALL_ENTITIES, "France"]),
            EntitySelection::All
        );
        assert_eq!(
            EntitySelection::from_multiselect(Vec::<String>::new()),
            EntitySelection::All
        );
        let ds = decade();
        let spec = FilterSpec::new((2000, 2020))
            .with_entities(EntitySelection::Only(BTreeSet::new()));
        assert!(apply(&ds, &spec).is_err());
    }

    #[test]
    fn negated_substring_condition_excludes_aggregates() {
        let ds = dataset(vec![
            obs("France", 2015, "X", Some(1.0)),
            obs("World", 2015, "X", Some(9.0)),
            obs("EU27", 2015, "X", Some(5.0)),
        ]);
        let spec = FilterSpec::everything(&ds)
            .with_condition(Condition::contains_any(Field::Entity, ["World", "EU"]).negated());
        let view = apply(&ds, &spec).unwrap();
        let names: Vec<_> = view.rows().map(|o| o.entity.as_str()).collect();
        assert_eq!(names, vec!["France"]);
    }

    #[test]
    fn narrow_refines_an_existing_view() {
        let ds = decade();
        let view = apply(&ds, &FilterSpec::new((2000, 2004))).unwrap();
        let only_x = view
            .narrow(&Condition::equals(Field::dimension("dim"), "X"))
            .unwrap();
        assert_eq!(only_x.len(), 5);
        assert_eq!(only_x.to_dataset().len(), 5);
    }
}
