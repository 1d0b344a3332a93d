use std::collections::BTreeSet;
use std::sync::Arc;

use log::debug;

use crate::data::filter::{apply, EntitySelection, FilterSpec, PanelView};
use crate::data::model::PanelDataset;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Per-session context: the shared read-only dataset plus this session's
/// filter selection. Every pipeline stage gets its data from here.
#[derive(Debug, Clone)]
pub struct Session {
    dataset: Arc<PanelDataset>,
    filter: FilterSpec,
}

impl Session {
    /// Start a session with everything selected.
    pub fn new(dataset: Arc<PanelDataset>) -> Self {
        let filter = FilterSpec::everything(&dataset);
        Session { dataset, filter }
    }

    pub fn dataset(&self) -> &PanelDataset {
        &self.dataset
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    /// Replace the selection; a malformed spec leaves the old one in place.
    pub fn set_filter(&mut self, spec: FilterSpec) -> Result<()> {
        spec.validate(self.dataset.schema())?;
        self.filter = spec;
        Ok(())
    }

    /// The current filtered view.
    pub fn view(&self) -> Result<PanelView<'_>> {
        apply(&self.dataset, &self.filter)
    }

    /// View with the same filter except entities, which are all kept.
    pub fn view_all_entities(&self) -> Result<PanelView<'_>> {
        let spec = self.filter.clone().with_entities(EntitySelection::All);
        apply(&self.dataset, &spec)
    }

    pub fn set_time_range(&mut self, min: i32, max: i32) -> Result<()> {
        self.set_filter(self.filter.clone().with_time_range(min, max))
    }

    /// Toggle one entity in the multiselect. Emptying the selection falls
    /// back to all entities.
    pub fn toggle_entity(&mut self, entity: &str) {
        let mut selected = match &self.filter.entities {
            EntitySelection::All => BTreeSet::new(),
            EntitySelection::Only(set) => set.clone(),
        };
        if !selected.remove(entity) {
            selected.insert(entity.to_string());
        }
        self.filter.entities = EntitySelection::from_multiselect(selected);
        debug!("entity selection now {:?}", self.filter.entities);
    }

    /// Toggle a single category value in a dimension's allow-list.
    pub fn toggle_dimension_value(&mut self, dimension: &str, value: &str) -> Result<()> {
        let mut spec = self.filter.clone();
        let selected = spec
            .dimension_filters
            .entry(dimension.to_string())
            .or_default();
        if !selected.remove(value) {
            selected.insert(value.to_string());
        }
        self.set_filter(spec)
    }

    /// Lift any restriction on a dimension.
    pub fn select_all(&mut self, dimension: &str) {
        self.filter.dimension_filters.remove(dimension);
    }
}
