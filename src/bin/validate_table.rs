use anyhow::Context;
use clap::Parser;
use spandex::adapters::loader::read_delimited_path;
use spandex::core::schema::{validate_table, TableData};
use spandex::utils::logger;
use spandex::{Catalog, GeoTable};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "validate_table")]
#[command(about = "Check a CSV table against a YAML column schema")]
struct Args {
    /// YAML schema file
    #[arg(short, long)]
    schema: PathBuf,

    /// Table name in the schema
    #[arg(short, long)]
    table: String,

    /// CSV file holding the table
    #[arg(short, long)]
    data: PathBuf,

    /// Tables referenced by foreign keys, as name=path.csv
    #[arg(long, value_delimiter = ',')]
    foreign: Vec<String>,

    #[arg(short, long)]
    verbose: bool,
}

fn foreign_catalog(specs: &[String]) -> anyhow::Result<Catalog> {
    let mut catalog = Catalog::new();
    for spec in specs {
        let (name, path) = spec
            .split_once('=')
            .with_context(|| format!("expected name=path.csv, got '{}'", spec))?;
        let frame = read_delimited_path(PathBuf::from(path).as_path(), b',')
            .with_context(|| format!("failed to read {}", path))?;
        catalog.insert(GeoTable::new(name, frame));
    }
    Ok(catalog)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    let foreign = foreign_catalog(&args.foreign)?;
    let failures = validate_table(TableData::Csv(&args.data), &args.table, &args.schema, Some(&foreign))
        .with_context(|| format!("could not validate {}", args.data.display()))?;

    if failures.is_empty() {
        println!("✅ {} passed all checks", args.table);
        return Ok(());
    }
    for failure in &failures {
        eprintln!("❌ {}", failure);
    }
    eprintln!("{} checks failed", failures.len());
    std::process::exit(1);
}
