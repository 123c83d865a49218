//! Column checks for tables, declared in YAML:
//!
//! ```yaml
//! households:
//!   household_id:
//!     - "registered=True, is_unique=True"
//!   persons:
//!     - "numeric=True, min=1, max_portion_missing=0.05, missing_val_coding=-1"
//!   building_id:
//!     - "foreign_key='buildings.building_id'"
//! ```

use crate::adapters::loader::read_delimited_path;
use crate::domain::geometry::Catalog;
use crate::domain::model::{ColumnType, Table, Value};
use crate::utils::error::{Result, SpandexError};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Checks for one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub registered: bool,
    pub numeric: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub is_unique: bool,
    pub missing_val_coding: Option<Value>,
    pub max_portion_missing: Option<f64>,
    pub foreign_key: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registered: true,
            numeric: false,
            min: None,
            max: None,
            is_unique: false,
            missing_val_coding: None,
            max_portion_missing: None,
            foreign_key: None,
        }
    }

    fn number(key: &str, value: &Value) -> Result<f64> {
        value
            .as_f64()
            .ok_or_else(|| SpandexError::validation(format!("{} must be a number, got '{}'", key, value)))
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        match key {
            "registered" => self.registered = value.truthy(),
            "numeric" => self.numeric = value.truthy(),
            "is_unique" => self.is_unique = value.truthy(),
            "min" => self.min = Some(Self::number(key, &value)?),
            "max" => self.max = Some(Self::number(key, &value)?),
            "max_portion_missing" => self.max_portion_missing = Some(Self::number(key, &value)?),
            "missing_val_coding" => self.missing_val_coding = Some(value),
            "foreign_key" => match value {
                Value::Str(target) if target.contains('.') => self.foreign_key = Some(target),
                other => {
                    return Err(SpandexError::validation(format!(
                        "foreign_key must be 'table.column', got '{}'",
                        other
                    )))
                }
            },
            other => {
                return Err(SpandexError::validation(format!(
                    "unknown check '{}' for column {}",
                    other, self.name
                )))
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

/// One failed check.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub table: String,
    pub column: String,
    pub check: String,
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} [{}]: {}", self.table, self.column, self.check, self.message)
    }
}

/// Parse a schema literal: numbers, quoted strings, True, False,
/// None and nan.
pub fn parse_literal(raw: &str) -> Result<Value> {
    let raw = raw.trim();
    let quoted = |q: char| raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q);
    if quoted('\'') || quoted('"') {
        return Ok(Value::Str(raw[1..raw.len() - 1].to_string()));
    }
    match raw {
        "True" => return Ok(Value::Bool(true)),
        "False" => return Ok(Value::Bool(false)),
        "None" => return Ok(Value::Null),
        "nan" | "np.nan" => return Ok(Value::Float(f64::NAN)),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    raw.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| SpandexError::validation(format!("cannot parse literal '{}'", raw)))
}

/// Split `"key=value, key=value"` into parsed pairs.
pub fn parse_checks(raw: &str) -> Result<Vec<(String, Value)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| SpandexError::validation(format!("expected key=value, got '{}'", part)))?;
            Ok((key.trim().to_string(), parse_literal(value)?))
        })
        .collect()
}

fn check_strings(value: &serde_yaml::Value) -> Result<Vec<String>> {
    match value {
        serde_yaml::Value::String(s) => Ok(vec![s.clone()]),
        serde_yaml::Value::Sequence(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| SpandexError::validation("checks must be strings"))
            })
            .collect(),
        serde_yaml::Value::Null => Ok(Vec::new()),
        _ => Err(SpandexError::validation("checks must be a string or a list of strings")),
    }
}

/// Build the spec of `table_name` from YAML text.
pub fn spec_from_yaml_str(text: &str, table_name: &str) -> Result<TableSpec> {
    let doc: serde_yaml::Value = serde_yaml::from_str(text)?;
    let columns = doc
        .get(table_name)
        .and_then(serde_yaml::Value::as_mapping)
        .ok_or_else(|| SpandexError::TableNotFound {
            table: table_name.to_string(),
        })?;

    let mut spec = TableSpec {
        name: table_name.to_string(),
        columns: Vec::with_capacity(columns.len()),
    };
    for (column, checks) in columns {
        let name = column
            .as_str()
            .ok_or_else(|| SpandexError::validation("column names must be strings"))?;
        let mut column_spec = ColumnSpec::new(name);
        for raw in check_strings(checks)? {
            for (key, value) in parse_checks(&raw)? {
                column_spec.set(&key, value)?;
            }
        }
        spec.columns.push(column_spec);
    }
    Ok(spec)
}

/// Read the spec of `table_name` from a YAML file.
pub fn yaml_to_spec(path: &Path, table_name: &str) -> Result<TableSpec> {
    let text = std::fs::read_to_string(path)?;
    spec_from_yaml_str(&text, table_name)
}

fn is_missing(value: &Value, coding: Option<&Value>) -> bool {
    value.is_null() || coding.is_some_and(|c| !c.is_null() && value == c)
}

/// Run every check of one column; all failures are returned.
pub fn check_column(df: &Table, table: &str, spec: &ColumnSpec, foreign: Option<&Catalog>) -> Vec<Failure> {
    let fail = |check: &str, message: String| Failure {
        table: table.to_string(),
        column: spec.name.clone(),
        check: check.to_string(),
        message,
    };

    let Ok(values) = df.column(&spec.name) else {
        return if spec.registered {
            vec![fail("registered", "column is not present".to_string())]
        } else {
            Vec::new()
        };
    };

    let mut failures = Vec::new();
    let coding = spec.missing_val_coding.as_ref();
    let present: Vec<&Value> = values.iter().filter(|v| !is_missing(v, coding)).collect();

    if spec.numeric && !matches!(ColumnType::infer(values), ColumnType::Int | ColumnType::Float) {
        failures.push(fail("numeric", "column is not numeric".to_string()));
    }

    if let Some(min) = spec.min {
        let below = present.iter().filter(|v| v.as_f64().is_some_and(|x| x < min)).count();
        if below > 0 {
            failures.push(fail("min", format!("{} values below {}", below, min)));
        }
    }
    if let Some(max) = spec.max {
        let above = present.iter().filter(|v| v.as_f64().is_some_and(|x| x > max)).count();
        if above > 0 {
            failures.push(fail("max", format!("{} values above {}", above, max)));
        }
    }

    if spec.is_unique {
        let mut seen = HashSet::new();
        let duplicates = values.iter().filter(|v| !seen.insert(*v)).count();
        if duplicates > 0 {
            failures.push(fail("is_unique", format!("{} duplicate values", duplicates)));
        }
    }

    if let Some(code) = coding.filter(|c| !c.is_null()) {
        let nulls = values.iter().filter(|v| v.is_null()).count();
        if nulls > 0 {
            failures.push(fail(
                "missing_val_coding",
                format!("{} missing values not coded as {}", nulls, code),
            ));
        }
    }

    if let Some(limit) = spec.max_portion_missing {
        let portion = if values.is_empty() {
            0.0
        } else {
            (values.len() - present.len()) as f64 / values.len() as f64
        };
        if portion > limit {
            failures.push(fail(
                "max_portion_missing",
                format!("{:.3} of values missing, limit {}", portion, limit),
            ));
        }
    }

    if let Some(target) = &spec.foreign_key {
        failures.extend(check_foreign_key(&present, target, foreign).err().map(|m| fail("foreign_key", m)));
    }

    failures
}

fn check_foreign_key(present: &[&Value], target: &str, foreign: Option<&Catalog>) -> std::result::Result<(), String> {
    let (table, column) = target
        .rsplit_once('.')
        .ok_or_else(|| format!("bad foreign key '{}'", target))?;
    let catalog = foreign.ok_or_else(|| format!("no tables available to resolve {}", target))?;
    let keys: HashSet<&Value> = catalog
        .get(table)
        .and_then(|t| t.frame.column(column))
        .map_err(|e| e.to_string())?
        .iter()
        .collect();
    let orphans = present.iter().filter(|v| !keys.contains(*v)).count();
    if orphans > 0 {
        return Err(format!("{} values not found in {}", orphans, target));
    }
    Ok(())
}

/// Check a table against a spec.
pub fn validate_frame(df: &Table, spec: &TableSpec, foreign: Option<&Catalog>) -> Vec<Failure> {
    spec.columns
        .iter()
        .flat_map(|column| check_column(df, &spec.name, column, foreign))
        .collect()
}

/// Table to validate: in memory, or a CSV file.
pub enum TableData<'a> {
    Frame(&'a Table),
    Csv(&'a Path),
}

/// Check `data` against the `table_name` spec of a YAML schema file.
/// Returns every failure found.
pub fn validate_table(
    data: TableData<'_>,
    table_name: &str,
    schema: &Path,
    foreign: Option<&Catalog>,
) -> Result<Vec<Failure>> {
    let loaded;
    let df = match data {
        TableData::Frame(df) => df,
        TableData::Csv(path) => {
            loaded = read_delimited_path(path, b',')?;
            &loaded
        }
    };

    let spec = yaml_to_spec(schema, table_name)?;
    let failures = validate_frame(df, &spec, foreign);
    tracing::info!("found {} exceptions in {}", failures.len(), table_name);
    Ok(failures)
}
