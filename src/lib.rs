//! Filter, aggregate and chart-shaping pipeline for agri-environmental panel
//! data (nutrient balances, soil erosion, greenhouse gas emissions and
//! agricultural land use).
//!
//! A [`PanelDataset`] is loaded once and shared. Each [`Session`] holds a
//! [`FilterSpec`] over it; dashboard sections turn the filtered view into
//! grouped [`Table`]s, derived metrics and renderer-agnostic
//! [`ChartPayload`]s.

pub mod aggregate;
pub mod chart;
pub mod color;
pub mod dashboard;
pub mod data;
pub mod error;
pub mod export;
pub mod metrics;
pub mod remap;
pub mod state;
pub mod table;

pub use chart::{ChartKind, ChartPayload};
pub use data::filter::{EntitySelection, FilterSpec, PanelView};
pub use data::model::{KeyValue, Observation, PanelDataset};
pub use data::schema::{Field, PanelSchema};
pub use error::{PanelError, Result};
pub use state::Session;
pub use table::{Cell, PivotTable, Table};
