use crate::domain::geometry::Catalog;
use crate::utils::error::{Result, SpandexError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single table cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness used for optional flags read from targets tables.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => !f.is_nan() && *f != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    /// Parse a raw text cell, e.g. from a CSV file. Blank cells are Null.
    pub fn parse_cell(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Value::Float(f);
        }
        match trimmed {
            "True" | "true" | "TRUE" => Value::Bool(true),
            "False" | "false" | "FALSE" => Value::Bool(false),
            _ => Value::Str(raw.to_string()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => {
                let bits = if f.is_nan() {
                    f64::NAN.to_bits()
                } else if *f == 0.0 {
                    0.0f64.to_bits()
                } else {
                    f.to_bits()
                };
                bits.hash(state)
            }
            Value::Str(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Storage type of a column, with the names PostgreSQL would use for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    Str,
}

impl ColumnType {
    /// Infer a column type from its cells. Ints mixed with floats widen to
    /// Float; anything else mixed falls back to Str. All-null columns are Str.
    pub fn infer(values: &[Value]) -> ColumnType {
        let mut seen: Option<ColumnType> = None;
        for value in values {
            let current = match value {
                Value::Null => continue,
                Value::Float(f) if f.is_nan() => continue,
                Value::Bool(_) => ColumnType::Bool,
                Value::Int(_) => ColumnType::Int,
                Value::Float(_) => ColumnType::Float,
                Value::Str(_) => return ColumnType::Str,
            };
            seen = Some(match (seen, current) {
                (None, c) => c,
                (Some(a), b) if a == b => a,
                (Some(ColumnType::Int), ColumnType::Float)
                | (Some(ColumnType::Float), ColumnType::Int) => ColumnType::Float,
                _ => return ColumnType::Str,
            });
        }
        seen.unwrap_or(ColumnType::Str)
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Int => "integer",
            ColumnType::Float => "numeric",
            ColumnType::Bool => "boolean",
            ColumnType::Str => "character varying",
        }
    }

    pub fn parse(name: &str) -> Result<ColumnType> {
        match name.trim().to_ascii_lowercase().as_str() {
            "int" | "int64" | "int32" | "integer" => Ok(ColumnType::Int),
            "float" | "float64" | "numeric" | "double" => Ok(ColumnType::Float),
            "bool" | "boolean" => Ok(ColumnType::Bool),
            "str" | "string" | "object" | "text" => Ok(ColumnType::Str),
            other => Err(SpandexError::validation(format!(
                "unknown column type '{}'",
                other
            ))),
        }
    }

    /// Convert a cell to this type. Nulls stay Null.
    pub fn cast(&self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let fail = || {
            SpandexError::validation(format!(
                "cannot convert {} value '{}' to {}",
                value.type_name(),
                value,
                self.sql_name()
            ))
        };
        Ok(match (self, value) {
            (ColumnType::Int, Value::Int(i)) => Value::Int(*i),
            (ColumnType::Int, Value::Float(f)) => Value::Int(f.trunc() as i64),
            (ColumnType::Int, Value::Bool(b)) => Value::Int(*b as i64),
            (ColumnType::Int, Value::Str(s)) => {
                Value::Int(s.trim().parse::<i64>().map_err(|_| fail())?)
            }
            (ColumnType::Float, v) if v.as_f64().is_some() => Value::Float(v.as_f64().unwrap_or_default()),
            (ColumnType::Float, Value::Bool(b)) => Value::Float(*b as i64 as f64),
            (ColumnType::Float, Value::Str(s)) => {
                Value::Float(s.trim().parse::<f64>().map_err(|_| fail())?)
            }
            (ColumnType::Bool, v) => Value::Bool(v.truthy()),
            (ColumnType::Str, v) => Value::Str(v.to_string()),
            _ => return Err(fail()),
        })
    }
}

/// In-memory column table with an integer row index.
///
/// Row labels are kept separately from positions: removing rows keeps the
/// remaining labels, and appended rows get fresh labels from the caller.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    index: Vec<i64>,
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
}

impl Table {
    /// Empty table with the given columns.
    pub fn new(columns: Vec<String>) -> Self {
        let data = columns.iter().map(|_| Vec::new()).collect();
        Self {
            index: Vec::new(),
            columns,
            data,
        }
    }

    /// Build from named columns with a default `0..n` index.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<Value>)>) -> Result<Self> {
        let len = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        Self::from_columns_with_index((0..len as i64).collect(), columns)
    }

    pub fn from_columns_with_index<S: Into<String>>(
        index: Vec<i64>,
        columns: Vec<(S, Vec<Value>)>,
    ) -> Result<Self> {
        let mut names = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            let name = name.into();
            if values.len() != index.len() {
                return Err(SpandexError::validation(format!(
                    "column '{}' has {} values but the index has {}",
                    name,
                    values.len(),
                    index.len()
                )));
            }
            if names.contains(&name) {
                return Err(SpandexError::validation(format!(
                    "duplicate column '{}'",
                    name
                )));
            }
            names.push(name);
            data.push(values);
        }
        Ok(Self {
            index,
            columns: names,
            data,
        })
    }

    /// Build from row-major data with a default `0..n` index.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut data: Vec<Vec<Value>> = columns.iter().map(|_| Vec::with_capacity(rows.len())).collect();
        for (pos, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(SpandexError::validation(format!(
                    "row {} has {} fields, expected {}",
                    pos,
                    row.len(),
                    columns.len()
                )));
            }
            for (col, value) in data.iter_mut().zip(row) {
                col.push(value);
            }
        }
        let index = (0..data.first().map(Vec::len).unwrap_or(0) as i64).collect();
        Ok(Self {
            index,
            columns,
            data,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[i64] {
        &self.index
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    fn column_position(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| SpandexError::column_not_found(name))
    }

    pub fn column(&self, name: &str) -> Result<&[Value]> {
        let pos = self.column_position(name)?;
        Ok(&self.data[pos])
    }

    pub fn column_mut(&mut self, name: &str) -> Result<&mut Vec<Value>> {
        let pos = self.column_position(name)?;
        Ok(&mut self.data[pos])
    }

    pub fn column_type(&self, name: &str) -> Result<ColumnType> {
        Ok(ColumnType::infer(self.column(name)?))
    }

    /// Numeric view of a column; non-numeric cells are None.
    pub fn numeric(&self, name: &str) -> Result<Vec<Option<f64>>> {
        Ok(self.column(name)?.iter().map(Value::as_f64).collect())
    }

    /// Add a column, or replace it if it already exists.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) -> Result<()> {
        if values.len() != self.len() {
            return Err(SpandexError::validation(format!(
                "column '{}' has {} values but the table has {} rows",
                name,
                values.len(),
                self.len()
            )));
        }
        match self.columns.iter().position(|c| c == name) {
            Some(pos) => self.data[pos] = values,
            None => {
                self.columns.push(name.to_string());
                self.data.push(values);
            }
        }
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<Vec<Value>> {
        let pos = self.column_position(name)?;
        self.columns.remove(pos);
        Ok(self.data.remove(pos))
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if self.has_column(to) {
            return Err(SpandexError::validation(format!(
                "column '{}' already exists",
                to
            )));
        }
        let pos = self.column_position(from)?;
        self.columns[pos] = to.to_string();
        Ok(())
    }

    /// Map from row label to position. Later duplicates win.
    pub fn label_positions(&self) -> HashMap<i64, usize> {
        self.index
            .iter()
            .enumerate()
            .map(|(pos, label)| (*label, pos))
            .collect()
    }

    pub fn position_of(&self, label: i64) -> Option<usize> {
        self.index.iter().position(|l| *l == label)
    }

    pub fn get(&self, label: i64, column: &str) -> Result<&Value> {
        let col = self.column_position(column)?;
        let pos = self
            .position_of(label)
            .ok_or_else(|| SpandexError::processing(format!("row label {} not found", label)))?;
        Ok(&self.data[col][pos])
    }

    pub fn set(&mut self, label: i64, column: &str, value: Value) -> Result<()> {
        let col = self.column_position(column)?;
        let pos = self
            .position_of(label)
            .ok_or_else(|| SpandexError::processing(format!("row label {} not found", label)))?;
        self.data[col][pos] = value;
        Ok(())
    }

    /// Cells of one row, in column order.
    pub fn row(&self, pos: usize) -> Vec<&Value> {
        self.data.iter().map(|col| &col[pos]).collect()
    }

    /// Copy of the rows at the given positions, keeping their labels.
    pub fn take(&self, positions: &[usize]) -> Table {
        Table {
            index: positions.iter().map(|p| self.index[*p]).collect(),
            columns: self.columns.clone(),
            data: self
                .data
                .iter()
                .map(|col| positions.iter().map(|p| col[*p].clone()).collect())
                .collect(),
        }
    }

    /// Rows by label, in the order given. Labels may repeat.
    pub fn loc(&self, labels: &[i64]) -> Result<Table> {
        let lookup = self.label_positions();
        let positions = labels
            .iter()
            .map(|label| {
                lookup.get(label).copied().ok_or_else(|| {
                    SpandexError::processing(format!("row label {} not found", label))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.take(&positions))
    }

    pub fn filter_mask(&self, mask: &[bool]) -> Table {
        let positions: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(pos, keep)| keep.then_some(pos))
            .collect();
        self.take(&positions)
    }

    /// Copy without the given labels.
    pub fn drop_labels(&self, labels: &HashSet<i64>) -> Table {
        let mask: Vec<bool> = self.index.iter().map(|l| !labels.contains(l)).collect();
        self.filter_mask(&mask)
    }

    pub fn max_label(&self) -> Option<i64> {
        self.index.iter().copied().max()
    }

    /// Replace the row labels.
    pub fn with_index(mut self, index: Vec<i64>) -> Result<Table> {
        if index.len() != self.len() {
            return Err(SpandexError::validation(format!(
                "new index has {} labels but the table has {} rows",
                index.len(),
                self.len()
            )));
        }
        self.index = index;
        Ok(self)
    }

    /// Relabel rows consecutively starting at `start`.
    pub fn relabel_from(self, start: i64) -> Table {
        let index = (start..start + self.len() as i64).collect();
        Table { index, ..self }
    }

    /// Append the rows of `other`. Both tables must have the same column set;
    /// `other`'s columns are matched by name.
    pub fn append(&mut self, other: Table) -> Result<()> {
        if other.columns.len() != self.columns.len()
            || other.columns.iter().any(|c| !self.has_column(c))
        {
            return Err(SpandexError::validation(format!(
                "cannot append rows with columns {:?} to table with columns {:?}",
                other.columns, self.columns
            )));
        }
        let Table {
            index,
            columns,
            data,
        } = other;
        self.index.extend(index);
        for (name, values) in columns.into_iter().zip(data) {
            let pos = self.column_position(&name)?;
            self.data[pos].extend(values);
        }
        Ok(())
    }

    /// Counts of distinct non-null values in first-seen order.
    pub fn value_counts(&self, column: &str) -> Result<Vec<(Value, usize)>> {
        let mut order: Vec<Value> = Vec::new();
        let mut counts: HashMap<Value, usize> = HashMap::new();
        for value in self.column(column)? {
            if value.is_null() {
                continue;
            }
            let entry = counts.entry(value.clone()).or_insert_with(|| {
                order.push(value.clone());
                0
            });
            *entry += 1;
        }
        Ok(order
            .into_iter()
            .map(|v| {
                let n = counts[&v];
                (v, n)
            })
            .collect())
    }

    /// Sum of the numeric cells of a column, skipping nulls.
    pub fn sum(&self, column: &str) -> Result<f64> {
        Ok(self.numeric(column)?.into_iter().flatten().sum())
    }
}

/// Outcome of one transform step, kept for the run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step: String,
    pub table: String,
    pub rows_before: usize,
    pub rows_after: usize,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransformResult {
    pub catalog: Catalog,
    pub reports: Vec<StepReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_columns(vec![
            ("thing_id", vec!["a".into(), "b".into(), "c".into(), "b".into(), "c".into()]),
            ("number", vec![1.into(), 2.into(), 3.into(), 4.into(), 5.into()]),
        ])
        .unwrap()
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(Value::parse_cell("42"), Value::Int(42));
        assert_eq!(Value::parse_cell("4.5"), Value::Float(4.5));
        assert_eq!(Value::parse_cell("True"), Value::Bool(true));
        assert_eq!(Value::parse_cell("  "), Value::Null);
        assert_eq!(Value::parse_cell("zone 1"), Value::Str("zone 1".into()));
    }

    #[test]
    fn test_infer_column_type() {
        assert_eq!(ColumnType::infer(&[1.into(), Value::Null, 2.5.into()]), ColumnType::Float);
        assert_eq!(ColumnType::infer(&[1.into(), "x".into()]), ColumnType::Str);
        assert_eq!(ColumnType::infer(&[true.into()]), ColumnType::Bool);
        assert_eq!(ColumnType::Int.sql_name(), "integer");
    }

    #[test]
    fn test_loc_and_drop_keep_labels() {
        let table = sample();
        let picked = table.loc(&[3, 1, 3]).unwrap();
        assert_eq!(picked.index(), &[3, 1, 3]);
        assert_eq!(picked.column("number").unwrap()[0], Value::Int(4));

        let dropped = table.drop_labels(&[0, 4].into_iter().collect());
        assert_eq!(dropped.index(), &[1, 2, 3]);
        assert_eq!(dropped.max_label(), Some(3));
    }

    #[test]
    fn test_append_matches_columns_by_name() {
        let mut table = sample();
        let other = Table::from_columns_with_index(
            vec![10],
            vec![("number", vec![9.into()]), ("thing_id", vec!["z".into()])],
        )
        .unwrap();
        table.append(other).unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(table.get(10, "thing_id").unwrap(), &Value::Str("z".into()));

        let wrong = Table::from_columns(vec![("other", vec![1.into()])]).unwrap();
        assert!(table.append(wrong).is_err());
    }

    #[test]
    fn test_value_counts_skips_nulls() {
        let mut table = sample();
        table.set(0, "thing_id", Value::Null).unwrap();
        let counts = table.value_counts("thing_id").unwrap();
        assert_eq!(counts, vec![(Value::from("b"), 2), (Value::from("c"), 2)]);
    }

    #[test]
    fn test_set_column_length_mismatch() {
        let mut table = sample();
        assert!(table.set_column("extra", vec![Value::Null]).is_err());
        assert!(table.column("missing").is_err());
    }
}
