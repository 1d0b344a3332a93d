use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// (area name, ISO-3, rough scale of nitrogen inputs in tonnes)
const AREAS: [(&str, &str, f64); 6] = [
    ("France", "FRA", 4_500_000.0),
    ("Germany", "DEU", 3_800_000.0),
    ("Chile", "CHL", 600_000.0),
    ("Japan", "JPN", 1_100_000.0),
    ("Korea", "KOR", 700_000.0),
    ("United States", "USA", 21_000_000.0),
];

/// Share of inputs each measure represents.
const MEASURES: [(&str, f64); 12] = [
    ("Nutrient inputs", 1.0),
    ("Nutrient outputs", 0.55),
    ("Inorganic fertilisers", 0.48),
    ("Organic fertilisers (excluding livestock manure)", 0.04),
    ("Cattle", 0.18),
    ("Pigs", 0.07),
    ("Poultry", 0.04),
    ("Sheep and goats", 0.02),
    ("Cereals", 0.22),
    ("Harvested fodder crops", 0.12),
    ("Oil crops", 0.06),
    ("Forage", 0.09),
];

/// Phosphorus flows relative to nitrogen.
const PHOSPHORUS_RATIO: f64 = 0.18;

struct Columns {
    area: Vec<String>,
    iso: Vec<String>,
    year: Vec<i64>,
    value: Vec<Option<f64>>,
    measure: Vec<String>,
    nutrient: Vec<String>,
}

fn generate(rng: &mut SimpleRng) -> Columns {
    let mut cols = Columns {
        area: Vec::new(),
        iso: Vec::new(),
        year: Vec::new(),
        value: Vec::new(),
        measure: Vec::new(),
        nutrient: Vec::new(),
    };

    let mut push = |area: &str, iso: &str, year: i64, measure: &str, nutrient: &str, v: Option<f64>| {
        cols.area.push(area.to_string());
        cols.iso.push(iso.to_string());
        cols.year.push(year);
        cols.value.push(v);
        cols.measure.push(measure.to_string());
        cols.nutrient.push(nutrient.to_string());
    };

    for &(area, iso, scale) in &AREAS {
        for year in 2000..=2020_i64 {
            let drift = 1.0 + 0.01 * (year - 2000) as f64;
            for (nutrient, ratio) in [("Nitrogen", 1.0), ("Phosphorus", PHOSPHORUS_RATIO)] {
                let base = scale * ratio * drift;
                let mut inputs = 0.0;
                let mut outputs = 0.0;
                for &(measure, share) in &MEASURES {
                    // A few holes so the "no data" paths get exercised.
                    if rng.next_f64() < 0.02 {
                        push(area, iso, year, measure, nutrient, None);
                        continue;
                    }
                    let v = (base * share * rng.gauss(1.0, 0.05)).max(0.0);
                    match measure {
                        "Nutrient inputs" => inputs = v,
                        "Nutrient outputs" => outputs = v,
                        _ => {}
                    }
                    push(area, iso, year, measure, nutrient, Some(v.round()));
                }
                let balance = inputs - outputs;
                push(
                    area,
                    iso,
                    year,
                    "Balance (inputs minus outputs)",
                    nutrient,
                    Some(balance.round()),
                );
                // Per-hectare balance assumes an area proportional to scale.
                push(
                    area,
                    iso,
                    year,
                    "Balance per hectare",
                    nutrient,
                    Some((balance / (scale / 90.0) * 1000.0).round() / 1000.0),
                );
            }
        }
    }
    cols
}

fn write_csv(cols: &Columns, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("creating CSV")?;
    writer.write_record(["Reference area", "REF_AREA", "TIME_PERIOD", "OBS_VALUE", "Measure", "Nutrients"])?;
    for i in 0..cols.area.len() {
        let value = cols.value[i].map(|v| v.to_string()).unwrap_or_default();
        let year = cols.year[i].to_string();
        writer.write_record([
            cols.area[i].as_str(),
            cols.iso[i].as_str(),
            year.as_str(),
            value.as_str(),
            cols.measure[i].as_str(),
            cols.nutrient[i].as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_parquet(cols: &Columns, path: &Path) -> Result<()> {
    let strings = |v: &[String]| StringArray::from(v.iter().map(String::as_str).collect::<Vec<_>>());

    let schema = Arc::new(Schema::new(vec![
        Field::new("Reference area", DataType::Utf8, false),
        Field::new("REF_AREA", DataType::Utf8, false),
        Field::new("TIME_PERIOD", DataType::Int64, false),
        Field::new("OBS_VALUE", DataType::Float64, true),
        Field::new("Measure", DataType::Utf8, false),
        Field::new("Nutrients", DataType::Utf8, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(strings(&cols.area)),
            Arc::new(strings(&cols.iso)),
            Arc::new(Int64Array::from(cols.year.clone())),
            Arc::new(Float64Array::from(cols.value.clone())),
            Arc::new(strings(&cols.measure)),
            Arc::new(strings(&cols.nutrient)),
        ],
    )
    .context("building RecordBatch")?;

    let file = std::fs::File::create(path).context("creating Parquet file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating writer")?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let mut rng = SimpleRng::new(42);
    let cols = generate(&mut rng);

    let csv_path = Path::new("sample_nutrients.csv");
    let parquet_path = Path::new("sample_nutrients.parquet");
    write_csv(&cols, csv_path)?;
    write_parquet(&cols, parquet_path)?;

    println!(
        "Wrote {} observations for {} areas to {} and {}",
        cols.area.len(),
        AREAS.len(),
        csv_path.display(),
        parquet_path.display()
    );
    Ok(())
}
