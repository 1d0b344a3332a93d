/// Data layer: schema, core types, loading, and filtering.
///
/// Architecture:
/// ```text
///  .csv / .parquet / .json
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  resolve columns via PanelSchema → PanelDataset
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │ PanelDataset │  Vec<Observation>, unique values, year bounds
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  FilterSpec → PanelView (row indices)
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
pub mod schema;
