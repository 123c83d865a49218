use crate::adapters::wkt::to_wkt;
use crate::domain::geometry::GeoTable;
use crate::domain::model::{ColumnType, Table, Value};
use crate::utils::error::Result;
use std::io::{Read, Write};

const STRIPPED: [char; 7] = ['\'', '"', '(', ')', '+', ':', ';'];

/// Make a header usable as a column name: spaces become underscores and
/// quote, bracket, plus, colon and semicolon characters are removed.
pub fn sanitize_column_name(name: &str) -> String {
    name.trim()
        .replace(' ', "_")
        .chars()
        .filter(|c| !STRIPPED.contains(c))
        .collect()
}

// Ints mixed with floats widen; any text keeps the raw cell.
fn typed_column(raw: Vec<String>) -> Vec<Value> {
    let parsed: Vec<Value> = raw.iter().map(|s| Value::parse_cell(s)).collect();
    match ColumnType::infer(&parsed) {
        ColumnType::Str => raw
            .into_iter()
            .zip(parsed)
            .map(|(s, v)| if v.is_null() { Value::Null } else { Value::Str(s) })
            .collect(),
        ColumnType::Float => parsed
            .into_iter()
            .map(|v| v.as_f64().map(Value::Float).unwrap_or(Value::Null))
            .collect(),
        _ => parsed,
    }
}

/// Read a delimited file with a header row into a table, inferring column
/// types. Blank cells are Null.
pub fn read_delimited<R: Read>(reader: R, delimiter: u8) -> Result<Table> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(reader);

    let names: Vec<String> = rdr.headers()?.iter().map(sanitize_column_name).collect();
    let mut raw: Vec<Vec<String>> = names.iter().map(|_| Vec::new()).collect();
    for record in rdr.records() {
        let record = record?;
        for (column, field) in raw.iter_mut().zip(record.iter()) {
            column.push(field.to_string());
        }
    }

    let columns = names
        .into_iter()
        .zip(raw)
        .map(|(name, cells)| (name, typed_column(cells)))
        .collect();
    Table::from_columns(columns)
}

/// Write a table as CSV with a leading `index` column of row labels.
pub fn write_table<W: Write>(table: &Table, writer: W) -> Result<()> {
    write_rows(table, &[], writer)
}

/// Write attributes and geometry columns (as WKT) of a catalog table.
pub fn write_geo_table<W: Write>(table: &GeoTable, writer: W) -> Result<()> {
    let geometries: Vec<(&str, Vec<String>)> = table
        .geometries
        .iter()
        .map(|g| {
            let cells = g
                .values
                .iter()
                .map(|v| v.as_ref().map(to_wkt).unwrap_or_default())
                .collect();
            (g.name.as_str(), cells)
        })
        .collect();
    write_rows(&table.frame, &geometries, writer)
}

fn write_rows<W: Write>(table: &Table, extra: &[(&str, Vec<String>)], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec!["index".to_string()];
    header.extend(table.column_names().iter().cloned());
    header.extend(extra.iter().map(|(name, _)| name.to_string()));
    wtr.write_record(&header)?;

    for pos in 0..table.len() {
        let mut record = vec![table.index()[pos].to_string()];
        record.extend(table.row(pos).into_iter().map(|v| v.to_string()));
        record.extend(extra.iter().map(|(_, cells)| cells[pos].clone()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}
