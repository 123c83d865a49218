use super::{apply_filter_query, split_filters};
use crate::domain::model::{Table, Value};
use crate::utils::error::{Result, SpandexError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How column values are aggregated for comparison with a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Mean,
    Median,
    Sum,
}

impl FromStr for Metric {
    type Err = SpandexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "mean" => Ok(Metric::Mean),
            "median" => Ok(Metric::Median),
            "sum" => Ok(Metric::Sum),
            other => Err(SpandexError::UnknownMetric(other.to_string())),
        }
    }
}

impl Metric {
    pub fn aggregate(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Metric::Sum => Some(values.iter().sum()),
            Metric::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Metric::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let mid = sorted.len() / 2;
                Some(if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                })
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleOptions {
    pub metric: Metric,
    pub clip_low: Option<f64>,
    pub clip_high: Option<f64>,
    pub int_result: bool,
}

fn multiplier(col: &[Value], target: f64, metric: Metric) -> Result<f64> {
    let values: Vec<f64> = col.iter().filter_map(Value::as_f64).collect();
    let current = metric.aggregate(&values).ok_or_else(|| {
        SpandexError::processing("cannot scale a column without numeric values")
    })?;
    if current == 0.0 {
        return Err(SpandexError::processing(format!(
            "cannot scale to target {}: current {:?} is zero",
            target, metric
        )));
    }
    Ok(target / current)
}

fn finish(value: f64, opts: &ScaleOptions) -> Value {
    let mut v = value;
    if let Some(low) = opts.clip_low {
        v = v.max(low);
    }
    if let Some(high) = opts.clip_high {
        v = v.min(high);
    }
    if opts.int_result {
        Value::Int(v.round_ties_even() as i64)
    } else {
        Value::Float(v)
    }
}

/// Scale a column so its aggregate metric matches `target`, then clip and
/// optionally round to integers. Nulls stay Null.
pub fn scale_col_to_target(col: &[Value], target: f64, opts: &ScaleOptions) -> Result<Vec<Value>> {
    let m = multiplier(col, target, opts.metric)?;
    Ok(col
        .iter()
        .map(|v| v.as_f64().map(|x| finish(x * m, opts)).unwrap_or(Value::Null))
        .collect())
}

fn write_back(df: &mut Table, column: &str, labels: &[i64], values: Vec<Value>) -> Result<()> {
    let positions = df.label_positions();
    let target = df.column_mut(column)?;
    for (label, value) in labels.iter().zip(values) {
        if let Some(pos) = positions.get(label) {
            target[*pos] = value;
        }
    }
    Ok(())
}

/// Scale `target_col` segment by segment. Each target pairs with the filter
/// at the same position; with no filters every target applies to all rows.
pub fn scale_to_targets(
    df: &Table,
    target_col: &str,
    targets: &[f64],
    filters: Option<&[Vec<String>]>,
    opts: &ScaleOptions,
) -> Result<Table> {
    if let Some(filters) = filters {
        if filters.len() != targets.len() {
            return Err(SpandexError::validation(format!(
                "{} targets but {} filters",
                targets.len(),
                filters.len()
            )));
        }
    }

    let mut labels = Vec::new();
    let mut scaled = Vec::new();
    for (i, target) in targets.iter().enumerate() {
        let no_filter: Vec<String> = Vec::new();
        let filter = filters.map(|f| &f[i]).unwrap_or(&no_filter);
        let segment = apply_filter_query(df, filter)?;
        let col = segment.column(target_col)?;
        let m = multiplier(col, *target, opts.metric)?;
        labels.extend_from_slice(segment.index());
        scaled.extend(
            col.iter()
                .map(|v| v.as_f64().map(|x| finish(x * m, opts)).unwrap_or(Value::Null)),
        );
    }

    let mut out = df.clone();
    write_back(&mut out, target_col, &labels, scaled)?;
    Ok(out)
}

/// One row of a targets table.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetsRow {
    pub column: String,
    pub target: f64,
    pub filters: Vec<String>,
    pub options: ScaleOptions,
}

impl TargetsRow {
    fn from_table_row(targets: &Table, pos: usize) -> Result<Self> {
        let cell = |name: &str| -> Value {
            targets
                .column(name)
                .map(|c| c[pos].clone())
                .unwrap_or(Value::Null)
        };
        let column = cell("column_name")
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SpandexError::validation(format!("targets row {}: column_name is required", pos)))?;
        let target = cell("target_value").as_f64().ok_or_else(|| {
            SpandexError::validation(format!("targets row {}: target_value must be numeric", pos))
        })?;
        let metric = match cell("target_metric") {
            Value::Str(s) => s.parse()?,
            v if v.is_null() => Metric::default(),
            other => return Err(SpandexError::UnknownMetric(other.to_string())),
        };
        let filters = match cell("filters") {
            Value::Str(s) => split_filters(&s),
            _ => Vec::new(),
        };
        Ok(Self {
            column,
            target,
            filters,
            options: ScaleOptions {
                metric,
                clip_low: cell("clip_low").as_f64(),
                clip_high: cell("clip_high").as_f64(),
                int_result: cell("int_result").truthy(),
            },
        })
    }

    /// Parse every row of a targets table.
    pub fn from_table(targets: &Table) -> Result<Vec<Self>> {
        (0..targets.len())
            .map(|pos| Self::from_table_row(targets, pos))
            .collect()
    }
}

/// Scale values in `df` following a targets table with the columns
/// `column_name, target_value, target_metric, filters, clip_low, clip_high,
/// int_result`. Rows apply in order; `df` is not modified.
pub fn scale_to_targets_from_table(df: &Table, targets: &Table) -> Result<Table> {
    let mut out = df.clone();
    for row in TargetsRow::from_table(targets)? {
        let segment = apply_filter_query(&out, &row.filters)?;
        let scaled = scale_col_to_target(segment.column(&row.column)?, row.target, &row.options)?;
        tracing::debug!(
            "Scaled {} rows of '{}' to {:?} {}",
            segment.len(),
            row.column,
            row.options.metric,
            row.target
        );
        write_back(&mut out, &row.column, segment.index(), scaled)?;
    }
    Ok(out)
}
