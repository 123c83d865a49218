//! Scaling agent attributes, or the number of agents, to match targets.

pub mod scaling;
pub mod synthesis;

use crate::core::expr;
use crate::domain::model::{Table, Value};
use crate::utils::error::{Result, SpandexError};

/// Split a comma separated filter cell into individual filters.
pub fn split_filters(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keep the rows matching every filter. No filters returns a copy.
pub fn apply_filter_query<S: AsRef<str>>(table: &Table, filters: &[S]) -> Result<Table> {
    let query = match filters {
        [] => return Ok(table.clone()),
        [single] => single.as_ref().to_string(),
        many => many
            .iter()
            .map(|f| format!("({})", f.as_ref()))
            .collect::<Vec<_>>()
            .join(" and "),
    };
    let mask = expr::eval_mask(table, &query)?;
    Ok(table.filter_mask(&mask))
}

/// Scale a column so its mean matches `target`.
pub fn scale_col_to_target_mean(col: &[Value], target: f64) -> Result<Vec<Value>> {
    let values: Vec<f64> = col.iter().filter_map(Value::as_f64).collect();
    if values.is_empty() {
        return Err(SpandexError::processing("cannot scale a column without numeric values"));
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let multiplier = target / mean;
    Ok(col
        .iter()
        .map(|v| v.as_f64().map(|x| Value::Float(x * multiplier)).unwrap_or(Value::Null))
        .collect())
}
