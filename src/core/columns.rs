use crate::domain::model::{ColumnType, Table, Value};
use crate::utils::error::{Result, SpandexError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agg {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    Median,
}

impl FromStr for Agg {
    type Err = SpandexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Agg::Sum),
            "mean" => Ok(Agg::Mean),
            "min" => Ok(Agg::Min),
            "max" => Ok(Agg::Max),
            "count" => Ok(Agg::Count),
            "median" => Ok(Agg::Median),
            other => Err(SpandexError::validation(format!("unknown aggregation '{}'", other))),
        }
    }
}

impl Agg {
    /// Aggregate the non-null values of one group.
    pub fn apply(&self, values: &[f64]) -> Value {
        let n = values.len();
        match self {
            Agg::Count => Value::Int(n as i64),
            Agg::Sum => Value::Float(values.iter().sum()),
            _ if n == 0 => Value::Null,
            Agg::Mean => Value::Float(values.iter().sum::<f64>() / n as f64),
            Agg::Min => Value::Float(values.iter().copied().fold(f64::INFINITY, f64::min)),
            Agg::Max => Value::Float(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            Agg::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = n / 2;
                Value::Float(if n % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                })
            }
        }
    }
}

/// Post-processing applied to a computed column.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColumnOptions {
    pub fillna: Option<Value>,
    pub astype: Option<String>,
    pub agg: Option<Agg>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Derived {
    Column(Vec<Value>),
    /// One value per group key, keys sorted.
    Grouped(Vec<(Value, Value)>),
}

/// Order for group keys: numbers, then booleans, then strings.
fn key_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Int(_) | Value::Float(_) => 0,
            Value::Bool(_) => 1,
            Value::Str(_) => 2,
            Value::Null => 3,
        }
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

/// Fill missing cells, convert the type, then optionally aggregate by
/// `groups` (one key per value). Rows with a null key are left out of the
/// aggregation.
pub fn derive_column(values: Vec<Value>, opts: &ColumnOptions, groups: Option<&[Value]>) -> Result<Derived> {
    let mut out = values;

    if let Some(fill) = &opts.fillna {
        for value in out.iter_mut().filter(|v| v.is_null()) {
            *value = fill.clone();
        }
    }

    if let Some(name) = &opts.astype {
        let column_type = ColumnType::parse(name)?;
        out = out.iter().map(|v| column_type.cast(v)).collect::<Result<_>>()?;
    }

    let Some(agg) = opts.agg else {
        return Ok(Derived::Column(out));
    };
    let groups = groups.ok_or_else(|| SpandexError::validation("agg requires a groupby column"))?;
    if groups.len() != out.len() {
        return Err(SpandexError::validation(format!(
            "groupby has {} keys for {} values",
            groups.len(),
            out.len()
        )));
    }

    let mut buckets: HashMap<&Value, Vec<f64>> = HashMap::new();
    for (key, value) in groups.iter().zip(&out) {
        if key.is_null() {
            continue;
        }
        let bucket = buckets.entry(key).or_default();
        if let Some(x) = value.as_f64() {
            bucket.push(x);
        }
    }

    let mut grouped: Vec<(Value, Value)> = buckets
        .into_iter()
        .map(|(key, values)| (key.clone(), agg.apply(&values)))
        .collect();
    grouped.sort_by(|a, b| key_order(&a.0, &b.0));
    Ok(Derived::Grouped(grouped))
}

/// Broadcast grouped values onto `table` through its `key` column. Keys
/// without a group get Null.
pub fn broadcast(grouped: &[(Value, Value)], table: &Table, key: &str) -> Result<Vec<Value>> {
    let lookup: HashMap<&Value, &Value> = grouped.iter().map(|(k, v)| (k, v)).collect();
    Ok(table
        .column(key)?
        .iter()
        .map(|k| lookup.get(k).map(|v| (*v).clone()).unwrap_or_default())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fillna_and_astype() {
        let opts = ColumnOptions {
            fillna: Some(Value::Int(0)),
            astype: Some("float".into()),
            agg: None,
        };
        let derived = derive_column(vec![1.into(), Value::Null, 3.into()], &opts, None).unwrap();
        assert_eq!(
            derived,
            Derived::Column(vec![Value::Float(1.0), Value::Float(0.0), Value::Float(3.0)])
        );
    }

    #[test]
    fn test_groupby_aggregations() {
        let values: Vec<Value> = vec![1.into(), 2.into(), 6.into(), Value::Null, 5.into()];
        let groups: Vec<Value> = vec!["b".into(), "a".into(), "a".into(), "a".into(), Value::Null];

        let run = |agg: Agg| {
            let opts = ColumnOptions { agg: Some(agg), ..Default::default() };
            derive_column(values.clone(), &opts, Some(&groups)).unwrap()
        };

        assert_eq!(
            run(Agg::Sum),
            Derived::Grouped(vec![("a".into(), Value::Float(8.0)), ("b".into(), Value::Float(1.0))])
        );
        assert_eq!(
            run(Agg::Count),
            Derived::Grouped(vec![("a".into(), Value::Int(2)), ("b".into(), Value::Int(1))])
        );
        assert_eq!(
            run(Agg::Median),
            Derived::Grouped(vec![("a".into(), Value::Float(4.0)), ("b".into(), Value::Float(1.0))])
        );
    }

    #[test]
    fn test_agg_needs_groups() {
        let opts = ColumnOptions { agg: Some(Agg::Mean), ..Default::default() };
        assert!(derive_column(vec![1.into()], &opts, None).is_err());
        assert!(derive_column(vec![1.into()], &opts, Some(&[])).is_err());
        assert!("mode".parse::<Agg>().is_err());
    }

    #[test]
    fn test_broadcast() {
        let grouped = vec![(Value::Int(1), Value::Float(2.5)), (Value::Int(2), Value::Float(4.0))];
        let zones = Table::from_columns(vec![("zone_id", vec![2.into(), 3.into(), 1.into()])]).unwrap();
        assert_eq!(
            broadcast(&grouped, &zones, "zone_id").unwrap(),
            vec![Value::Float(4.0), Value::Null, Value::Float(2.5)]
        );
    }
}
