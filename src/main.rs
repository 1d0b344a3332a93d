use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use agri_panel::dashboard::{self, Controls, DashboardKind, Section};
use agri_panel::data::filter::Condition;
use agri_panel::data::loader;
use agri_panel::export::{self, ExportFormat};
use agri_panel::{EntitySelection, Field, PanelSchema, Session};
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

#[derive(Parser)]
#[command(about = "Render agri-environmental dashboards as chart payloads.")]
struct Args {
    /// Panel data file (.csv, .json or .parquet).
    input: PathBuf,

    /// Dashboard to render: nutrients, erosion, greenhouse-gas or land-use.
    #[arg(long, default_value = "nutrients")]
    dashboard: String,

    /// Custom schema descriptor (JSON). Defaults to the dashboard's preset.
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Entities to keep (repeatable). Omit, or pass "All areas", for all.
    #[arg(long = "entity")]
    entities: Vec<String>,

    /// First year of the range (defaults to the earliest in the data).
    #[arg(long)]
    from: Option<i32>,

    /// Last year of the range (defaults to the latest in the data).
    #[arg(long)]
    to: Option<i32>,

    /// Dimension restriction `name=value` (repeatable; values accumulate).
    #[arg(long = "dim", value_parser = parse_pair)]
    dims: Vec<(String, String)>,

    /// Drop entities whose name contains this text (repeatable).
    #[arg(long = "exclude-entity")]
    exclude_entities: Vec<String>,

    /// Section control `name=value`, e.g. `category=AGR` (repeatable).
    #[arg(long = "control", value_parser = parse_pair)]
    controls: Vec<(String, String)>,

    /// Write every charted section's table into this directory.
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Export encoding.
    #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
    format: ExportFormat,

    /// Write the filtered observations (source columns) to this CSV file.
    #[arg(long)]
    export_filtered: Option<PathBuf>,
}

fn parse_pair(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected name=value, got '{s}'")),
    }
}

fn build_session(args: &Args, schema: PanelSchema) -> Result<Session> {
    let dataset = loader::load_file(&args.input, &schema)
        .with_context(|| format!("loading {}", args.input.display()))?;
    if dataset.is_empty() {
        bail!("{} contains no usable observations", args.input.display());
    }

    let mut session = Session::new(Arc::new(dataset));
    let (min, max) = session.filter().time_range;

    let mut dims: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, value) in &args.dims {
        dims.entry(name).or_default().push(value);
    }

    let mut spec = session
        .filter()
        .clone()
        .with_entities(EntitySelection::from_multiselect(args.entities.iter().cloned()))
        .with_time_range(args.from.unwrap_or(min), args.to.unwrap_or(max));
    for (name, values) in dims {
        spec = spec.with_dimension(name, values);
    }
    if !args.exclude_entities.is_empty() {
        spec = spec.with_condition(
            Condition::contains_any(Field::Entity, args.exclude_entities.iter().cloned()).negated(),
        );
    }
    session.set_filter(spec).context("invalid selection")?;
    Ok(session)
}

fn export_sections(sections: &[Section], kind: &str, args: &Args) -> Result<()> {
    let Some(dir) = &args.export_dir else {
        return Ok(());
    };
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let ext = args.format.extension();
    for section in sections {
        if let Some(table) = section.table() {
            let path = dir.join(format!("{kind}_{}.{ext}", section.id));
            export::export_file(table, &path)
                .with_context(|| format!("exporting section '{}'", section.id))?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let kind = DashboardKind::parse(&args.dashboard)?;
    let schema = match &args.schema {
        Some(path) => PanelSchema::from_json_file(path)
            .with_context(|| format!("reading schema {}", path.display()))?,
        None => kind.schema(),
    };
    let session = build_session(&args, schema)?;

    let mut controls = Controls::default();
    for (name, value) in &args.controls {
        controls.set(name, value);
    }

    let sections = dashboard::render(kind, &session, &controls);
    info!(
        "rendered {} sections over {} rows",
        sections.len(),
        session.view()?.len()
    );

    println!("{}", serde_json::to_string_pretty(&sections)?);
    if let Some(path) = &args.export_filtered {
        export::export_view(&session.view()?, path)
            .with_context(|| format!("exporting filtered data to {}", path.display()))?;
    }
    export_sections(&sections, &args.dashboard, &args)
}
