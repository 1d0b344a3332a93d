//! The four dashboards as lists of independently computed sections.
//!
//! Every section runs its own filter → aggregate → derive → chart pass over
//! the session's view. A section that fails records why and the rest still
//! render.

mod erosion;
mod greenhouse;
mod land;
mod nutrients;

use std::collections::BTreeMap;

use log::warn;
use serde::Serialize;

use crate::chart::{self, format_compact, ChartKind, ChartLabels, ChartPayload, NO_DATA_NOTICE};
use crate::data::schema::PanelSchema;
use crate::error::{PanelError, Result};
use crate::state::Session;
use crate::table::{Cell, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DashboardKind {
    Nutrients,
    Erosion,
    GreenhouseGas,
    LandUse,
}

impl DashboardKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "nutrients" => Ok(DashboardKind::Nutrients),
            "erosion" => Ok(DashboardKind::Erosion),
            "greenhouse-gas" | "ghg" => Ok(DashboardKind::GreenhouseGas),
            "land-use" | "land" => Ok(DashboardKind::LandUse),
            other => Err(PanelError::validation(format!("unknown dashboard '{other}'"))),
        }
    }

    /// The schema preset this dashboard reads.
    pub fn schema(&self) -> PanelSchema {
        match self {
            DashboardKind::Nutrients => PanelSchema::nutrients(),
            DashboardKind::Erosion => PanelSchema::erosion(),
            DashboardKind::GreenhouseGas => PanelSchema::greenhouse_gas(),
            DashboardKind::LandUse => PanelSchema::land_use(),
        }
    }
}

/// Per-section widget choices (radio buttons, select boxes), by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Controls(BTreeMap<String, String>);

impl Controls {
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.0.get(name).map(String::as_str).unwrap_or(default)
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Section results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpi {
    pub label: String,
    pub value: Cell,
    pub display: String,
}

impl Kpi {
    pub fn new(label: impl Into<String>, value: Cell) -> Self {
        Kpi {
            label: label.into(),
            display: format_compact(value),
            value,
        }
    }

    pub fn count(label: impl Into<String>, n: usize) -> Self {
        Kpi {
            label: label.into(),
            value: Cell::Value(n as f64),
            display: n.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SectionOutcome {
    Chart { payload: ChartPayload, table: Table },
    Kpis { tiles: Vec<Kpi> },
    NoData { message: String },
    CannotRender { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    pub outcome: SectionOutcome,
}

impl Section {
    pub fn table(&self) -> Option<&Table> {
        match &self.outcome {
            SectionOutcome::Chart { table, .. } => Some(table),
            _ => None,
        }
    }
}

/// Compute every section of `kind` for the session's current selection.
pub fn render(kind: DashboardKind, session: &Session, controls: &Controls) -> Vec<Section> {
    match kind {
        DashboardKind::Nutrients => nutrients::sections(session, controls),
        DashboardKind::Erosion => erosion::sections(session, controls),
        DashboardKind::GreenhouseGas => greenhouse::sections(session, controls),
        DashboardKind::LandUse => land::sections(session, controls),
    }
}

// ---------------------------------------------------------------------------
// Section runners
// ---------------------------------------------------------------------------

fn failed(id: &str, title: &str, err: PanelError) -> Section {
    if !err.is_local() {
        warn!("section '{id}' failed: {err}");
    }
    Section {
        id: id.to_string(),
        title: title.to_string(),
        outcome: SectionOutcome::CannotRender {
            reason: err.to_string(),
        },
    }
}

fn no_data(id: &str, title: &str) -> Section {
    Section {
        id: id.to_string(),
        title: title.to_string(),
        outcome: SectionOutcome::NoData {
            message: NO_DATA_NOTICE.to_string(),
        },
    }
}

/// Run a table-producing pipeline and chart it.
pub(crate) fn chart_section(
    id: &str,
    kind: ChartKind,
    labels: ChartLabels,
    pipeline: impl FnOnce() -> Result<Table>,
) -> Section {
    let title = labels.title.clone();
    let table = match pipeline() {
        Ok(t) => t,
        Err(e) => return failed(id, &title, e),
    };
    if table.is_empty() {
        return no_data(id, &title);
    }
    match chart::build(kind, &table, &labels) {
        Ok(payload) => Section {
            id: id.to_string(),
            title,
            outcome: SectionOutcome::Chart { payload, table },
        },
        Err(e) => failed(id, &title, e),
    }
}

/// Run a KPI pipeline. `rows` is the row count behind the tiles; zero means
/// no data rather than a row of zeros.
pub(crate) fn kpi_section(
    id: &str,
    title: &str,
    pipeline: impl FnOnce() -> Result<(usize, Vec<Kpi>)>,
) -> Section {
    match pipeline() {
        Ok((0, _)) => no_data(id, title),
        Ok((_, tiles)) => Section {
            id: id.to_string(),
            title: title.to_string(),
            outcome: SectionOutcome::Kpis { tiles },
        },
        Err(e) => failed(id, title, e),
    }
}
