use spandex::core::schema::{validate_table, yaml_to_spec, TableData};
use spandex::{Catalog, GeoTable, Table, Value};
use tempfile::TempDir;

const SCHEMA: &str = r#"
buildings:
  building_id:
    - "registered=True, is_unique=True, numeric=True"
  parcel_id:
    - "foreign_key='parcels.parcel_id'"
  year_built:
    - "numeric=True, min=1800, max=2030, missing_val_coding=0, max_portion_missing=0.5"
  building_type:
    - "registered=True"
"#;

fn parcels() -> Catalog {
    let frame = Table::from_columns(vec![("parcel_id", vec![100.into(), 101.into()])]).unwrap();
    let mut catalog = Catalog::new();
    catalog.insert(GeoTable::new("parcels", frame));
    catalog
}

#[test]
fn test_valid_csv_table_passes() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let schema = dir.path().join("schema.yaml");
    let data = dir.path().join("buildings.csv");
    std::fs::write(&schema, SCHEMA)?;
    std::fs::write(
        &data,
        "building_id,parcel_id,year_built,building_type\n1,100,1950,HS\n2,101,0,OF\n3,100,2001,HS\n",
    )?;

    let failures = validate_table(TableData::Csv(&data), "buildings", &schema, Some(&parcels()))?;
    assert!(failures.is_empty(), "{:?}", failures);
    Ok(())
}

#[test]
fn test_every_failure_is_reported() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, SCHEMA)?;

    let buildings = Table::from_columns(vec![
        ("building_id", vec![1.into(), 1.into(), 3.into()]),
        ("parcel_id", vec![100.into(), 999.into(), 101.into()]),
        ("year_built", vec![1700.into(), 0.into(), Value::Null]),
    ])?;

    let failures = validate_table(TableData::Frame(&buildings), "buildings", &schema, Some(&parcels()))?;
    let checks: Vec<(&str, &str)> = failures
        .iter()
        .map(|f| (f.column.as_str(), f.check.as_str()))
        .collect();
    assert_eq!(
        checks,
        vec![
            ("building_id", "is_unique"),
            ("parcel_id", "foreign_key"),
            ("year_built", "min"),
            ("year_built", "missing_val_coding"),
            ("year_built", "max_portion_missing"),
            ("building_type", "registered"),
        ]
    );
    Ok(())
}

#[test]
fn test_unknown_table_or_check() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, SCHEMA)?;
    assert!(yaml_to_spec(&schema, "jobs").is_err());

    std::fs::write(&schema, "jobs:\n  job_id:\n    - \"unique=True\"\n")?;
    assert!(yaml_to_spec(&schema, "jobs").is_err());
    Ok(())
}
