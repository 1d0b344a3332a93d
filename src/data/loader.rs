use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    StringArray,
};
use arrow::datatypes::DataType;
use arrow::util::display::array_value_to_string;
use log::{info, warn};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{Observation, PanelDataset};
use super::schema::PanelSchema;
use crate::error::{PanelError, Result};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a panel dataset from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – header row with the schema's physical column names
/// * `.parquet` – flat columns named like the CSV headers
/// * `.json`    – records-oriented `[{ "Country": ..., "Time": ..., ... }, ...]`
///
/// Fails with [`PanelError::NotFound`] when the file cannot be opened and with
/// [`PanelError::Schema`] when a column declared by `schema` is absent.
pub fn load_file(path: &Path, schema: &PanelSchema) -> Result<PanelDataset> {
    schema.validate()?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "csv" => load_csv(path, schema),
        "parquet" | "pq" => load_parquet(path, schema),
        "json" => load_json(path, schema),
        other => Err(PanelError::validation(format!(
            "unsupported file extension: .{other}"
        ))),
    }?;

    info!(
        "loaded {} observations from {} (schema '{}')",
        dataset.len(),
        path.display(),
        schema.name
    );
    Ok(dataset)
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| PanelError::not_found(path, Some(e)))
}

// ---------------------------------------------------------------------------
// Shared row assembly
// ---------------------------------------------------------------------------

/// A raw source cell before it is interpreted through the schema.
#[derive(Debug, Clone, PartialEq)]
enum RawCell {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
}

impl RawCell {
    fn as_text(&self) -> Option<String> {
        match self {
            RawCell::Null => None,
            RawCell::Text(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            RawCell::Int(i) => Some(i.to_string()),
            RawCell::Float(f) => Some(f.to_string()),
        }
    }

    /// Numeric coercion: anything unparseable becomes a missing value.
    fn as_value(&self) -> Option<f64> {
        let v = match self {
            RawCell::Null => return None,
            RawCell::Int(i) => *i as f64,
            RawCell::Float(f) => *f,
            RawCell::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then_some(v)
    }

    fn as_year(&self) -> Option<i32> {
        let year = match self {
            RawCell::Int(i) => i32::try_from(*i).ok()?,
            RawCell::Float(f) if f.fract() == 0.0 => *f as i32,
            RawCell::Text(s) => {
                let s = s.trim();
                match s.parse::<i32>() {
                    Ok(y) => y,
                    Err(_) => {
                        let f = s.parse::<f64>().ok()?;
                        if f.fract() != 0.0 {
                            return None;
                        }
                        f as i32
                    }
                }
            }
            _ => return None,
        };
        (1..=9999).contains(&year).then_some(year)
    }
}

/// Physical column positions resolved once per source.
#[derive(Debug)]
struct ColumnLayout {
    entity: usize,
    entity_iso: Option<usize>,
    time: usize,
    values: Vec<usize>,
    dimensions: Vec<(String, usize)>,
}

impl ColumnLayout {
    fn resolve(schema: &PanelSchema, headers: &[String]) -> Result<Self> {
        let missing: Vec<&str> = schema
            .required_columns()
            .into_iter()
            .filter(|c| !headers.iter().any(|h| h == c))
            .collect();
        if !missing.is_empty() {
            return Err(PanelError::schema(format!(
                "source is missing required column(s): {}",
                missing.join(", ")
            )));
        }
        let pos = |name: &str| headers.iter().position(|h| h == name).unwrap_or_default();
        Ok(ColumnLayout {
            entity: pos(&schema.entity_column),
            entity_iso: schema.entity_iso_column.as_deref().map(pos),
            time: pos(&schema.time_column),
            values: schema.value_columns.iter().map(|c| pos(c)).collect(),
            dimensions: schema
                .dimension_columns
                .iter()
                .map(|d| (d.clone(), pos(d)))
                .collect(),
        })
    }
}

/// Rows dropped during loading, by reason.
#[derive(Debug, Default)]
struct DropCounts {
    bad_time: usize,
    no_entity: usize,
    excluded: usize,
}

struct RowAssembler<'a> {
    schema: &'a PanelSchema,
    layout: ColumnLayout,
    dropped: DropCounts,
    rows: Vec<Observation>,
}

impl<'a> RowAssembler<'a> {
    fn new(schema: &'a PanelSchema, headers: &[String]) -> Result<Self> {
        Ok(RowAssembler {
            schema,
            layout: ColumnLayout::resolve(schema, headers)?,
            dropped: DropCounts::default(),
            rows: Vec::new(),
        })
    }

    /// Interpret one raw row; `cell(i)` returns the cell at physical column `i`.
    fn push(&mut self, cell: impl Fn(usize) -> RawCell) {
        let Some(entity) = cell(self.layout.entity).as_text() else {
            self.dropped.no_entity += 1;
            return;
        };
        let Some(time) = cell(self.layout.time).as_year() else {
            self.dropped.bad_time += 1;
            return;
        };

        let mut dimensions = BTreeMap::new();
        for (name, idx) in &self.layout.dimensions {
            let value = cell(*idx).as_text();
            if let Some(excluded) = self.schema.row_exclusions.get(name) {
                match &value {
                    Some(v) if !excluded.contains(v) => {}
                    _ => {
                        self.dropped.excluded += 1;
                        return;
                    }
                }
            }
            if let Some(v) = value {
                dimensions.insert(name.clone(), v);
            }
        }

        self.rows.push(Observation {
            entity,
            entity_iso: self.layout.entity_iso.and_then(|i| cell(i).as_text()),
            time,
            dimensions,
            values: self.layout.values.iter().map(|&i| cell(i).as_value()).collect(),
        });
    }

    fn finish(self) -> PanelDataset {
        let d = &self.dropped;
        if d.bad_time + d.no_entity + d.excluded > 0 {
            warn!(
                "dropped rows while loading '{}': {} without a valid year, {} without an entity, {} excluded",
                self.schema.name, d.bad_time, d.no_entity, d.excluded
            );
        }
        PanelDataset::from_observations(self.schema.clone(), self.rows)
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one observation per record.
/// Columns not named by the schema are ignored.
fn load_csv(path: &Path, schema: &PanelSchema) -> Result<PanelDataset> {
    let mut reader = csv::Reader::from_reader(open(path)?);
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut assembler = RowAssembler::new(schema, &headers)?;
    for result in reader.records() {
        let record = result?;
        assembler.push(|i| match record.get(i) {
            Some(s) if !s.trim().is_empty() => RawCell::Text(s.to_string()),
            _ => RawCell::Null,
        });
    }
    Ok(assembler.finish())
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON layout, one object per observation:
///
/// ```json
/// [
///   { "Country": "France", "Time": 2015, "Types of Land": "Arable land", "Actual area (ha)": 1.8e7 },
///   ...
/// ]
/// ```
fn load_json(path: &Path, schema: &PanelSchema) -> Result<PanelDataset> {
    let root: JsonValue = serde_json::from_reader(std::io::BufReader::new(open(path)?))?;
    let records = root
        .as_array()
        .ok_or_else(|| PanelError::schema("expected a top-level JSON array"))?;

    // Records may omit keys; the header set is the union over all records.
    let mut keys = BTreeSet::new();
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .ok_or_else(|| PanelError::schema(format!("row {i} is not a JSON object")))?;
        keys.extend(obj.keys().cloned());
    }
    if records.is_empty() {
        keys.extend(schema.required_columns().into_iter().map(str::to_string));
    }
    let headers: Vec<String> = keys.into_iter().collect();

    let mut assembler = RowAssembler::new(schema, &headers)?;
    for obj in records.iter().filter_map(JsonValue::as_object) {
        assembler.push(|col| {
            obj.get(&headers[col])
                .map(json_to_cell)
                .unwrap_or(RawCell::Null)
        });
    }
    Ok(assembler.finish())
}

fn json_to_cell(val: &JsonValue) -> RawCell {
    match val {
        JsonValue::String(s) => RawCell::Text(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                RawCell::Int(i)
            } else if let Some(f) = n.as_f64() {
                RawCell::Float(f)
            } else {
                RawCell::Text(n.to_string())
            }
        }
        JsonValue::Null => RawCell::Null,
        other => RawCell::Text(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file with one flat column per CSV header.
///
/// String, integer, float and dictionary-encoded columns are all read; a
/// year stored as a float is accepted when it is integral.
fn load_parquet(path: &Path, schema: &PanelSchema) -> Result<PanelDataset> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(open(path)?)?;
    let headers: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build()?;

    let mut assembler = RowAssembler::new(schema, &headers)?;
    for batch_result in reader {
        let batch = batch_result?;
        for row in 0..batch.num_rows() {
            assembler.push(|col| extract_cell(batch.column(col), row));
        }
    }
    Ok(assembler.finish())
}

// -- Parquet / Arrow helpers --

/// Extract a single cell from an Arrow column at a given row.
fn extract_cell(col: &Arc<dyn Array>, row: usize) -> RawCell {
    if col.is_null(row) {
        return RawCell::Null;
    }
    let any = col.as_any();
    let cell = match col.data_type() {
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map(|a| RawCell::Text(a.value(row).to_string())),
        DataType::LargeUtf8 => Some(RawCell::Text(col.as_string::<i64>().value(row).to_string())),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map(|a| RawCell::Int(a.value(row) as i64)),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map(|a| RawCell::Int(a.value(row))),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map(|a| RawCell::Float(a.value(row) as f64)),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map(|a| RawCell::Float(a.value(row))),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map(|a| RawCell::Text(a.value(row).to_string())),
        _ => None,
    };
    // Dictionary-encoded categoricals and other types go through Arrow's formatter.
    cell.unwrap_or_else(|| match array_value_to_string(col, row) {
        Ok(s) => RawCell::Text(s),
        Err(_) => RawCell::Null,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::data::schema::Field;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn csv_coerces_values_and_drops_bad_years() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "ghg.csv",
            "Reference area,TIME_PERIOD,MEASURE,OBS_VALUE,Unused\n\
             France,2015,CO2,10.5,x\n\
             France,2016,CO2,,x\n\
             France,n/a,CO2,3,x\n\
             Germany,2016.0,CH4,abc,x\n",
        );
        let ds = load_file(&path, &PanelSchema::greenhouse_gas()).unwrap();
        assert_eq!(ds.len(), 3);
        let rows = ds.rows();
        assert_eq!(rows[0].value(), Some(10.5));
        assert_eq!(rows[1].value(), None);
        assert_eq!(rows[2].time, 2016);
        assert_eq!(rows[2].value(), None);
        assert_eq!(ds.time_bounds(), Some((2015, 2016)));
    }

    #[test]
    fn missing_column_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "bad.csv", "Reference area,TIME_PERIOD,OBS_VALUE\nFrance,2015,1\n");
        let err = load_file(&path, &PanelSchema::greenhouse_gas()).unwrap_err();
        match err {
            PanelError::Schema(msg) => assert!(msg.contains("MEASURE")),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_source_is_not_found() {
        let err = load_file(Path::new("/no/such/panel.csv"), &PanelSchema::nutrients()).unwrap_err();
        assert!(matches!(err, PanelError::NotFound { .. }));
    }

    #[test]
    fn land_rows_with_header_junk_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "land.csv",
            "Country,Time,Types of Land,Actual area (ha),OBS_VALUE\n\
             Chile,2015,Arable land,100,1\n\
             Chile,2015,Types of Land,,\n\
             Chile,2015,HA,,\n\
             Chile,2015,,5,5\n",
        );
        let ds = load_file(&path, &PanelSchema::land_use()).unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.rows()[0].value(), Some(100.0));
        assert_eq!(ds.rows()[0].value_at(1), Some(1.0));
    }

    #[test]
    fn json_records_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "erosion.json",
            r#"[
                {"Country": "Italy", "Time": 2010, "Types of Erosion": "Water", "EROSION_LEVEL": "_T", "Erosion risk level": "Total", "OBS_VALUE": 12.5},
                {"Country": "Italy", "Time": 2011, "Types of Erosion": "Wind", "EROSION_LEVEL": "LW", "Erosion risk level": "Low", "OBS_VALUE": null}
            ]"#,
        );
        let ds = load_file(&path, &PanelSchema::erosion()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.rows()[1].value(), None);
        assert_eq!(
            ds.unique_values(&Field::dimension("EROSION_LEVEL")).unwrap().len(),
            2
        );
    }

    #[test]
    fn json_header_is_the_union_of_record_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "ghg.json",
            r#"[
                {"Reference area": "Canada", "TIME_PERIOD": 2015, "MEASURE": "CO2"},
                {"Reference area": "Canada", "TIME_PERIOD": 2016, "MEASURE": "CO2", "OBS_VALUE": 4.0}
            ]"#,
        );
        let ds = load_file(&path, &PanelSchema::greenhouse_gas()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.rows()[0].value(), None);
        assert_eq!(ds.rows()[1].value(), Some(4.0));
    }

    #[test]
    fn empty_json_array_is_an_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "empty.json", "[]");
        let ds = load_file(&path, &PanelSchema::greenhouse_gas()).unwrap();
        assert!(ds.is_empty());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "panel.xlsx", "");
        assert!(matches!(
            load_file(&path, &PanelSchema::nutrients()),
            Err(PanelError::Validation(_))
        ));
    }

    #[test]
    fn year_coercion() {
        assert_eq!(RawCell::Text("2015".into()).as_year(), Some(2015));
        assert_eq!(RawCell::Float(2015.0).as_year(), Some(2015));
        assert_eq!(RawCell::Float(2015.5).as_year(), None);
        assert_eq!(RawCell::Int(0).as_year(), None);
        assert_eq!(RawCell::Text("NaN".into()).as_value(), None);
    }
}
