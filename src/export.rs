//! Re-serialisation of derived tables and filtered views for the data
//! explorer and downloads.
//!
//! CSV writes one header row of key labels followed by value column names.
//! `NoData` cells are left empty and the other sentinels become `N/A`, so a
//! spreadsheet never reads a hole as zero. JSON keeps the sentinel strings
//! from [`Cell`]'s `Serialize` impl.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;
use serde_json::{Map, Value};

use crate::data::filter::PanelView;
use crate::error::{PanelError, Result};
use crate::table::{Cell, PivotTable, Table};

/// Output encodings supported by [`export_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        match ext.as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(PanelError::validation(format!(
                "unsupported export format '.{other}'"
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

fn csv_cell(cell: &Cell) -> String {
    match cell {
        Cell::Value(v) => v.to_string(),
        Cell::NoData => String::new(),
        Cell::DivisionByZero | Cell::NotApplicable => "N/A".to_string(),
    }
}

fn header(table: &Table) -> Vec<String> {
    table
        .key_columns()
        .iter()
        .map(|f| f.label().to_string())
        .chain(table.value_columns().iter().cloned())
        .collect()
}

pub fn write_csv<W: Write>(table: &Table, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(header(table))?;
    for row in table.rows() {
        let record: Vec<String> = row
            .key
            .iter()
            .map(ToString::to_string)
            .chain(row.values.iter().map(csv_cell))
            .collect();
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

/// One JSON object per row, keyed by column label.
pub fn to_json_records(table: &Table) -> Result<Value> {
    let labels = header(table);
    let mut records = Vec::with_capacity(table.len());
    for row in table.rows() {
        let mut record = Map::new();
        let cells = row
            .key
            .iter()
            .map(serde_json::to_value)
            .chain(row.values.iter().map(serde_json::to_value));
        for (label, cell) in labels.iter().zip(cells) {
            record.insert(label.clone(), cell?);
        }
        records.push(Value::Object(record));
    }
    Ok(Value::Array(records))
}

pub fn write_json<W: Write>(table: &Table, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, &to_json_records(table)?)?;
    Ok(())
}

/// Write `table` to `path`, choosing the format from the extension.
pub fn export_file(table: &Table, path: &Path) -> Result<()> {
    let format = ExportFormat::from_path(path)?;
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    match format {
        ExportFormat::Csv => write_csv(table, &mut writer)?,
        ExportFormat::Json => write_json(table, &mut writer)?,
    }
    writer.flush()?;
    info!("exported {} rows to {}", table.len(), path.display());
    Ok(())
}

/// Pivoted tables export in their wide shape.
pub fn export_pivot(pivot: &PivotTable, path: &Path) -> Result<()> {
    export_file(&pivot.to_table(), path)
}

/// Filtered observations under the source's own column names, so the file
/// loads back with the same schema. Missing values and ISO codes are empty.
pub fn write_view_csv<W: Write>(view: &PanelView<'_>, writer: W) -> Result<()> {
    let schema = view.schema();
    let mut out = csv::Writer::from_writer(writer);

    let mut header = vec![schema.entity_column.as_str()];
    header.extend(schema.entity_iso_column.as_deref());
    header.push(schema.time_column.as_str());
    header.extend(schema.dimension_columns.iter().map(String::as_str));
    header.extend(schema.value_columns.iter().map(String::as_str));
    out.write_record(&header)?;

    for obs in view.rows() {
        let mut record = vec![obs.entity.clone()];
        if schema.entity_iso_column.is_some() {
            record.push(obs.entity_iso.clone().unwrap_or_default());
        }
        record.push(obs.time.to_string());
        for dim in &schema.dimension_columns {
            record.push(obs.dimensions.get(dim).cloned().unwrap_or_default());
        }
        for i in 0..schema.value_columns.len() {
            record.push(obs.value_at(i).map(|v| v.to_string()).unwrap_or_default());
        }
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

/// Write the filtered observations of `view` as CSV to `path`.
pub fn export_view(view: &PanelView<'_>, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_view_csv(view, &mut writer)?;
    writer.flush()?;
    info!("exported {} filtered rows to {}", view.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::data::filter::{apply, FilterSpec};
    use crate::data::loader::load_file;
    use crate::data::model::{Observation, PanelDataset};
    use crate::data::schema::{Field, PanelSchema};

    fn table() -> Table {
        let mut t = Table::new(
            vec![Field::Entity, Field::Time],
            vec!["OBS_VALUE".into(), "proportion".into()],
        );
        t.push(
            vec!["France".into(), 2015.into()],
            vec![Cell::Value(12.5), Cell::DivisionByZero],
        );
        t.push(
            vec!["Chile".into(), 2016.into()],
            vec![Cell::NoData, Cell::Value(0.0)],
        );
        t
    }

    #[test]
    fn csv_keeps_sentinels_distinct_from_zero() {
        let mut buf = Vec::new();
        write_csv(&table(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "entity,time,OBS_VALUE,proportion");
        assert_eq!(lines[1], "France,2015,12.5,N/A");
        assert_eq!(lines[2], "Chile,2016,,0");
    }

    #[test]
    fn json_records_are_keyed_by_label() {
        let records = to_json_records(&table()).unwrap();
        assert_eq!(records[0]["entity"], "France");
        assert_eq!(records[0]["time"], 2015);
        assert_eq!(records[0]["OBS_VALUE"], 12.5);
        assert_eq!(records[1]["OBS_VALUE"], "no data");
    }

    #[test]
    fn export_file_round_trips_through_the_csv_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("section.csv");
        export_file(&table(), &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][2], "");
    }

    #[test]
    fn pivot_exports_wide_with_holes_left_empty() {
        let mut long = Table::new(
            vec![Field::Entity, Field::dimension("gas")],
            vec!["OBS_VALUE".into()],
        );
        long.push(vec!["Chile".into(), "CO2".into()], vec![Cell::Value(3.0)]);
        long.push(vec!["Peru".into(), "CH4".into()], vec![Cell::Value(1.0)]);
        let pivot = PivotTable::from_long(&long, &Field::dimension("gas")).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.csv");
        export_pivot(&pivot, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["entity,CH4,CO2", "Chile,,3", "Peru,1,"]);
    }

    #[test]
    fn filtered_view_round_trips_through_the_loader() {
        let mut dims = BTreeMap::new();
        dims.insert("Measure".to_string(), "Nutrient inputs".to_string());
        dims.insert("Nutrients".to_string(), "Nitrogen".to_string());
        let row = |area: &str, iso: Option<&str>, year: i32, v: Option<f64>| Observation {
            entity: area.to_string(),
            entity_iso: iso.map(str::to_string),
            time: year,
            dimensions: dims.clone(),
            values: vec![v],
        };
        let dataset = PanelDataset::from_observations(
            PanelSchema::nutrients(),
            vec![
                row("France", Some("FRA"), 2015, Some(300.0)),
                row("France", Some("FRA"), 2016, None),
                row("Chile", None, 2016, Some(7.5)),
                row("Chile", None, 2010, Some(1.0)),
            ],
        );
        let view = apply(&dataset, &FilterSpec::new((2015, 2016))).unwrap();

        let mut buf = Vec::new();
        write_view_csv(&view, &mut buf).unwrap();
        let mut reader = csv::Reader::from_reader(buf.as_slice());
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(
            headers,
            vec!["Reference area", "REF_AREA", "TIME_PERIOD", "Measure", "Nutrients", "OBS_VALUE"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[1][5], "");
        assert_eq!(&rows[2][1], "");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filtered.csv");
        export_view(&view, &path).unwrap();
        let reloaded = load_file(&path, &PanelSchema::nutrients()).unwrap();
        assert_eq!(reloaded.rows(), view.to_dataset().rows());
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = ExportFormat::from_path(Path::new("out.xlsx")).unwrap_err();
        assert!(matches!(err, PanelError::Validation(_)));
        let format = ExportFormat::from_path(Path::new("OUT.JSON")).unwrap();
        assert_eq!(format, ExportFormat::Json);
        assert_eq!(format.extension(), "json");
    }
}
