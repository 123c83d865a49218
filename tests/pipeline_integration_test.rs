use httpmock::prelude::*;
use spandex::adapters::store::read_manifest;
use spandex::core::pipeline::REPORT_FILE;
use spandex::domain::model::StepReport;
use spandex::{EtlEngine, LocalStorage, ProjectConfig, SpandexPipeline};
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;

fn square(x: f64, y: f64, size: f64) -> serde_json::Value {
    serde_json::json!({
        "type": "Polygon",
        "coordinates": [[[x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]]]
    })
}

fn feature(properties: serde_json::Value, geometry: serde_json::Value) -> serde_json::Value {
    serde_json::json!({"type": "Feature", "properties": properties, "geometry": geometry})
}

fn write_data(dir: &Path) -> anyhow::Result<()> {
    let zones = serde_json::json!({
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "EPSG:2227"}},
        "features": [
            feature(serde_json::json!({"zone_id": 10, "capacity": 5}), square(0.0, 0.0, 4.0)),
            feature(serde_json::json!({"zone_id": 20, "capacity": 5}), square(4.0, 4.0, 4.0)),
        ]
    });
    std::fs::write(dir.join("zones.geojson"), zones.to_string())?;

    // no crs member: the projection comes from the .prj sidecar via prj2epsg
    let parcels = serde_json::json!({
        "type": "FeatureCollection",
        "features": [
            feature(serde_json::json!({"parcel_id": 1}), square(0.0, 0.0, 1.0)),
            feature(serde_json::json!({"parcel_id": 2}), square(5.0, 5.0, 1.0)),
            feature(serde_json::json!({"parcel_id": 3}), square(0.5, 0.0, 1.0)),
        ]
    });
    std::fs::write(dir.join("parcels.geojson"), parcels.to_string())?;
    std::fs::write(dir.join("parcels.prj"), r#"PROJCS["NAD_1983_StatePlane_California_III_FIPS_0403_Feet"]"#)?;

    std::fs::write(
        dir.join("households.csv"),
        "household_id,zone_id,persons,income\n1,10,2,40\n2,10,3,60\n3,20,1,20\n4,20,4,80\n",
    )?;
    std::fs::write(
        dir.join("scale_targets.csv"),
        "column_name,target_value,target_metric,filters,clip_low,clip_high,int_result\nincome,100,mean,,,,\n",
    )?;
    std::fs::write(
        dir.join("synth_targets.csv"),
        "target_value,geo_id_col,filters,count,capacity_col,capacity_expr,stuff\n6,zone_id,,,capacity,,\n",
    )?;
    Ok(())
}

fn project_toml(data: &Path, out: &Path, endpoint: &str) -> String {
    format!(
        r#"
[project]
name = "integration"
seed = 42

[data]
directory = "{data}"

[data.tables]
zones = "zones.geojson"
parcels = "parcels.geojson"
households = "households.csv"
scale_targets = "scale_targets.csv"
synth_targets = "synth_targets.csv"

[lookup]
endpoint = "{endpoint}"

[[steps]]
op = "conform_srids"
srid = 2227

[[steps]]
op = "tag"
target = "parcels"
target_column = "zone_id"
source = "zones"
source_column = "zone_id"

[[steps]]
op = "scale_to_targets"
table = "households"
targets = "scale_targets"

[[steps]]
op = "synthesize"
table = "households"
geo_table = "zones"
targets = "synth_targets"

[[steps]]
op = "derive_column"
table = "households"
column = "households"
expr = "household_id"
groupby = "zone_id"
agg = "count"
into = "zones"

[[steps]]
op = "geometry_qa"
table = "parcels"
key = "parcel_id"

[export]
path = "{out}"
geojson = ["zones"]
"#,
        data = data.display(),
        out = out.display(),
        endpoint = endpoint,
    )
}

#[tokio::test]
async fn test_end_to_end_pipeline() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let data_dir = temp_dir.path().join("data");
    let out_dir = temp_dir.path().join("out");
    std::fs::create_dir_all(&data_dir)?;
    write_data(&data_dir)?;

    let server = MockServer::start();
    let lookup_mock = server.mock(|when, then| {
        when.method(GET).path("/search.json").query_param("mode", "wkt");
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(serde_json::json!({"exact": true, "codes": [{"code": "2227"}]}));
    });

    let config = ProjectConfig::from_toml_str(&project_toml(&data_dir, &out_dir, &server.url("/search.json")))?;
    let storage = LocalStorage::new(out_dir.clone());
    let engine = EtlEngine::new(SpandexPipeline::new(storage, config));

    let output_path = engine.run().await?;
    lookup_mock.assert();
    assert!(output_path.ends_with("spandex-export.zip"));

    let bundle = std::fs::read(out_dir.join("spandex-export.zip"))?;
    let manifest = read_manifest(&bundle)?;
    let names: Vec<&str> = manifest.tables.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"public.households"));
    assert!(names.contains(&"qa.parcels_overlapping"));
    assert_eq!(manifest.tables.len(), 9);

    let parcels = manifest.tables.iter().find(|t| t.name == "public.parcels").unwrap();
    assert_eq!(parcels.geometries[0].srid, 2227);

    let households = manifest.tables.iter().find(|t| t.name == "public.households").unwrap();
    assert_eq!(households.rows, 6);

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bundle))?;
    let mut csv = String::new();
    archive.by_name("public.households.csv")?.read_to_string(&mut csv)?;
    assert!(csv.starts_with("index,household_id,zone_id,persons,income\n0,1,10,2,80"));

    let zones: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(out_dir.join("public.zones.geojson"))?)?;
    let counts: i64 = zones["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["properties"]["households"].as_i64().unwrap())
        .sum();
    assert_eq!(counts, 6);

    let reports: Vec<StepReport> = serde_json::from_str(&std::fs::read_to_string(out_dir.join(REPORT_FILE))?)?;
    assert_eq!(reports.len(), 6);
    assert_eq!(reports[3].step, "synthesize");
    assert_eq!((reports[3].rows_before, reports[3].rows_after), (4, 6));
    Ok(())
}

#[tokio::test]
async fn test_dry_run_writes_nothing() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let data_dir = temp_dir.path().join("data");
    let out_dir = temp_dir.path().join("out");
    std::fs::create_dir_all(&data_dir)?;
    write_data(&data_dir)?;

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/search.json");
        then.status(200)
            .json_body(serde_json::json!({"exact": true, "codes": [{"code": 2227}]}));
    });

    let config = ProjectConfig::from_toml_str(&project_toml(&data_dir, &out_dir, &server.url("/search.json")))?;
    let engine = EtlEngine::new(SpandexPipeline::new(LocalStorage::new(out_dir.clone()), config));

    let reports = engine.dry_run().await?;
    assert_eq!(reports.len(), 6);
    assert!(!out_dir.exists());
    Ok(())
}

#[tokio::test]
async fn test_missing_table_fails_step() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    write_data(temp_dir.path())?;

    let config = ProjectConfig::from_toml_str(&format!(
        r#"
[project]
name = "broken"

[data]
directory = "{}"
srid = 2227

[data.tables]
zones = "zones.geojson"

[[steps]]
op = "calc_area"
table = "parcels"

[export]
path = "{}"
"#,
        temp_dir.path().display(),
        temp_dir.path().join("out").display()
    ))?;
    let engine = EtlEngine::new(SpandexPipeline::new(LocalStorage::new(temp_dir.path().join("out")), config));

    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, spandex::SpandexError::TableNotFound { ref table } if table == "public.parcels"));
    Ok(())
}
