use crate::adapters::csv::write_geo_table;
use crate::domain::geometry::{Catalog, GeoTable};
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};
use zip::write::{FileOptions, ZipWriter};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEntry {
    pub name: String,
    pub column_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryEntry {
    pub name: String,
    pub srid: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub name: String,
    pub file: String,
    pub rows: usize,
    pub columns: Vec<ColumnEntry>,
    pub geometries: Vec<GeometryEntry>,
}

/// Contents of `manifest.json` in an export bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub created_at: DateTime<Utc>,
    pub tables: Vec<TableEntry>,
}

fn table_entry(table: &GeoTable) -> Result<TableEntry> {
    let columns = table
        .frame
        .column_names()
        .iter()
        .map(|name| {
            Ok(ColumnEntry {
                name: name.clone(),
                column_type: table.frame.column_type(name)?.sql_name().to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(TableEntry {
        name: table.qualified_name(),
        file: format!("{}.csv", table.qualified_name()),
        rows: table.len(),
        columns,
        geometries: table
            .geometries
            .iter()
            .map(|g| GeometryEntry {
                name: g.name.clone(),
                srid: g.srid,
            })
            .collect(),
    })
}

/// Zip the selected tables (all when `tables` is empty) as CSV files with
/// WKT geometries, plus a manifest.
pub fn export_bundle(catalog: &Catalog, tables: &[String]) -> Result<Vec<u8>> {
    let selected: Vec<&GeoTable> = if tables.is_empty() {
        catalog.iter().collect()
    } else {
        tables
            .iter()
            .map(|name| catalog.get(name))
            .collect::<Result<Vec<_>>>()?
    };

    let mut entries = Vec::with_capacity(selected.len());
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    for table in selected {
        let entry = table_entry(table)?;
        tracing::debug!("Adding {} ({} rows) to export", entry.name, entry.rows);

        let mut buffer = Vec::new();
        write_geo_table(table, &mut buffer)?;
        zip.start_file::<_, ()>(entry.file.as_str(), FileOptions::default())?;
        zip.write_all(&buffer)?;
        entries.push(entry);
    }

    let manifest = Manifest {
        created_at: Utc::now(),
        tables: entries,
    };
    zip.start_file::<_, ()>(MANIFEST_FILE, FileOptions::default())?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

    // 完成並取回底層 Vec<u8>
    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

/// Read the manifest back out of an export bundle.
pub fn read_manifest(bundle: &[u8]) -> Result<Manifest> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bundle))?;
    let mut file = archive.by_name(MANIFEST_FILE)?;
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    Ok(serde_json::from_str(&text)?)
}
