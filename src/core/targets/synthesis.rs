//! Adding and removing agent rows to meet targets while respecting the
//! capacity of the geographic containers the agents live in.

use super::{apply_filter_query, split_filters};
use crate::core::expr;
use crate::domain::model::{Table, Value};
use crate::utils::error::{Result, SpandexError};
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// Remaining room per container, in container order.
pub type Constraint = Vec<(Value, f64)>;

// Upper bound on greedy/backtracking passes in `add_rows_by_count`.
const MAX_COUNT_PASSES: usize = 100_000;

/// Where container capacities come from.
#[derive(Debug, Clone, PartialEq)]
pub enum Capacity {
    Column(String),
    Expr(String),
}

impl Capacity {
    /// `capacity_expr` wins when both are given.
    pub fn from_parts(column: Option<&str>, expr: Option<&str>) -> Result<Self> {
        match (column, expr) {
            (_, Some(e)) => Ok(Capacity::Expr(e.to_string())),
            (Some(c), None) => Ok(Capacity::Column(c.to_string())),
            (None, None) => Err(SpandexError::validation(
                "either capacity_col or capacity_expr is required",
            )),
        }
    }

    fn values(&self, geo_df: &Table) -> Result<Vec<Value>> {
        match self {
            Capacity::Column(c) => Ok(geo_df.column(c)?.to_vec()),
            Capacity::Expr(e) => expr::eval_column(geo_df, e),
        }
    }
}

/// Give rows to containers in order without exceeding their capacity.
///
/// Rows left over once every container is full are spread round-robin over
/// all containers when `stuff` is set, otherwise left unplaced (Null).
pub fn allocate_rows(rows: &mut Table, alloc_id: &str, constraint: &[(Value, f64)], stuff: bool) -> Result<()> {
    let n = rows.len();
    let column = rows.column_mut(alloc_id)?;
    let mut next = 0;

    'containers: for (id, room) in constraint {
        let mut room = *room;
        while room >= 1.0 {
            if next == n {
                break 'containers;
            }
            column[next] = id.clone();
            next += 1;
            room -= 1.0;
        }
    }

    if next < n {
        tracing::debug!("{} rows exceed container capacity (stuff: {})", n - next, stuff);
    }
    let mut cycle = constraint.iter().cycle();
    for cell in column.iter_mut().skip(next) {
        *cell = match (stuff, cycle.next()) {
            (true, Some((id, _))) => id.clone(),
            _ => Value::Null,
        };
    }
    Ok(())
}

/// Remove `num` distinct rows chosen at random.
pub fn remove_rows<R: Rng + ?Sized>(df: &Table, num: usize, rng: &mut R) -> Table {
    if num == 0 {
        return df.clone();
    }
    let picked = rand::seq::index::sample(rng, df.len(), num.min(df.len()));
    let labels: HashSet<i64> = picked.iter().map(|pos| df.index()[pos]).collect();
    df.drop_labels(&labels)
}

fn append_allocated(
    df: &Table,
    positions: &[usize],
    alloc_id: &str,
    constraint: &[(Value, f64)],
    stuff: bool,
) -> Result<Table> {
    let start = df.max_label().map(|m| m + 1).unwrap_or(0);
    let mut rows = df.take(positions).relabel_from(start);
    allocate_rows(&mut rows, alloc_id, constraint, stuff)?;
    let mut out = df.clone();
    out.append(rows)?;
    Ok(out)
}

/// Copy `num` randomly chosen rows (with replacement), give them new labels
/// after the current maximum and allocate them to containers.
pub fn add_rows<R: Rng + ?Sized>(
    df: &Table,
    num: usize,
    alloc_id: &str,
    constraint: &[(Value, f64)],
    stuff: bool,
    rng: &mut R,
) -> Result<Table> {
    if num == 0 {
        return Ok(df.clone());
    }
    if df.is_empty() {
        return Err(SpandexError::synthesis("cannot copy rows from an empty table"));
    }
    let positions: Vec<usize> = (0..num).map(|_| rng.gen_range(0..df.len())).collect();
    append_allocated(df, &positions, alloc_id, constraint, stuff)
}

// Positions with a positive `count`, largest first; ties keep table order.
fn sorted_counts(df: &Table, count: &str) -> Result<Vec<(usize, f64)>> {
    let mut counts: Vec<(usize, f64)> = df
        .numeric(count)?
        .into_iter()
        .enumerate()
        .filter_map(|(pos, v)| v.filter(|x| *x > 0.0).map(|x| (pos, x)))
        .collect();
    counts.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(counts)
}

/// Remove rows so the sum of `count` drops by `amount`, largest rows first.
pub fn remove_rows_by_count(df: &Table, amount: f64, count: &str) -> Result<Table> {
    if amount == 0.0 {
        return Ok(df.clone());
    }
    let mut amount = amount;
    let mut remove = HashSet::new();
    for (pos, value) in sorted_counts(df, count)? {
        if value <= amount {
            remove.insert(df.index()[pos]);
            amount -= value;
        }
        if amount == 0.0 {
            break;
        }
    }
    Ok(df.drop_labels(&remove))
}

/// Copy rows so the sum of `count` grows by `amount`.
///
/// Rows are picked greedily, largest first. When nothing fits the remainder
/// the last pick is undone and only smaller rows are tried; if that leaves
/// no candidates the search stops short of the target.
pub fn add_rows_by_count(
    df: &Table,
    amount: f64,
    count: &str,
    alloc_id: &str,
    constraint: &[(Value, f64)],
    stuff: bool,
) -> Result<Table> {
    if amount == 0.0 {
        return Ok(df.clone());
    }
    let original = sorted_counts(df, count)?;
    let value_at: HashMap<usize, f64> = original.iter().copied().collect();
    let mut candidates = original.clone();
    let mut picked: Vec<usize> = Vec::new();
    let mut amount = amount;
    let mut passes = 0;

    while amount >= 1.0 {
        passes += 1;
        if passes > MAX_COUNT_PASSES {
            tracing::warn!("⚠️ Gave up matching count target, {} short", amount);
            break;
        }

        candidates.retain(|(_, v)| *v <= amount);
        if candidates.is_empty() {
            let Some(last) = picked.pop() else { break };
            let v = value_at[&last];
            amount += v;
            candidates = original
                .iter()
                .copied()
                .filter(|(_, x)| *x < v && *x <= amount)
                .collect();
            if candidates.is_empty() {
                break;
            }
        }

        for (pos, v) in &candidates {
            if *v <= amount {
                picked.push(*pos);
                amount -= v;
            }
            if amount == 0.0 {
                break;
            }
        }
    }

    if amount != 0.0 {
        tracing::debug!("Count target missed by {}", amount);
    }
    append_allocated(df, &picked, alloc_id, constraint, stuff)
}

/// Add or remove rows until the row count, or the sum of `count`, equals
/// `target`.
pub fn add_or_remove_rows<R: Rng + ?Sized>(
    df: &Table,
    target: f64,
    alloc_id: &str,
    constraint: &[(Value, f64)],
    count: Option<&str>,
    stuff: bool,
    rng: &mut R,
) -> Result<Table> {
    match count {
        None => {
            let current = df.len() as f64;
            if current < target {
                tracing::debug!("adding rows based on number of rows");
                add_rows(df, (target - current).round() as usize, alloc_id, constraint, stuff, rng)
            } else if current > target {
                tracing::debug!("removing rows based on number of rows");
                Ok(remove_rows(df, (current - target).round() as usize, rng))
            } else {
                tracing::debug!("target number of rows is met");
                Ok(df.clone())
            }
        }
        Some(count) => {
            let current = df.sum(count)?;
            if current < target {
                tracing::debug!("adding rows based on total of count column");
                add_rows_by_count(df, target - current, count, alloc_id, constraint, stuff)
            } else if current > target {
                tracing::debug!("removing rows based on total of count column");
                remove_rows_by_count(df, current - target, count)
            } else {
                tracing::debug!("target total is met");
                Ok(df.clone())
            }
        }
    }
}

/// Container ids of a geography table: its `alloc_id` column when present,
/// otherwise its row labels.
fn container_ids(geo_df: &Table, alloc_id: &str) -> Vec<Value> {
    match geo_df.column(alloc_id) {
        Ok(ids) => ids.to_vec(),
        Err(_) => geo_df.index().iter().map(|l| Value::Int(*l)).collect(),
    }
}

/// Remaining capacity per container: capacity minus current occupancy.
pub fn remaining_capacity(df: &Table, alloc_id: &str, geo_df: &Table, capacity: &Capacity) -> Result<Constraint> {
    let ids = container_ids(geo_df, alloc_id);
    let sizes = capacity.values(geo_df)?;
    let occupancy: HashMap<Value, usize> = df.value_counts(alloc_id)?.into_iter().collect();

    let known: HashSet<&Value> = ids.iter().collect();
    if let Some(missing) = occupancy.keys().find(|id| !known.contains(id)) {
        return Err(SpandexError::synthesis(format!(
            "rows are assigned to non-existent containers (e.g. '{}')",
            missing
        )));
    }

    Ok(ids
        .into_iter()
        .zip(sizes)
        .map(|(id, size)| {
            let used = occupancy.get(&id).copied().unwrap_or(0) as f64;
            let room = size.as_f64().map(|s| s - used).unwrap_or(f64::NAN);
            (id, room)
        })
        .collect())
}

/// Parameters of one synthesis target.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisTarget {
    pub target: f64,
    pub alloc_id: String,
    pub capacity: Capacity,
    pub filters: Vec<String>,
    pub count: Option<String>,
    pub stuff: bool,
}

/// Add or remove rows of `df` (restricted to the filtered subset) to meet
/// one target, allocating new rows to containers in `geo_df`.
pub fn synthesize_one<R: Rng + ?Sized>(
    df: &Table,
    geo_df: &Table,
    spec: &SynthesisTarget,
    rng: &mut R,
) -> Result<Table> {
    let constraint = remaining_capacity(df, &spec.alloc_id, geo_df, &spec.capacity)?;

    let subset = apply_filter_query(df, &spec.filters)?;
    if subset.is_empty() && spec.target != 0.0 {
        return Err(SpandexError::synthesis(format!(
            "no rows to synthesize or remove (filters: {:?})",
            spec.filters
        )));
    }

    let changed = add_or_remove_rows(
        &subset,
        spec.target,
        &spec.alloc_id,
        &constraint,
        spec.count.as_deref(),
        spec.stuff,
        rng,
    )?;

    if changed.len() > subset.len() {
        // added rows sit after the subset's own rows
        let added: Vec<usize> = (subset.len()..changed.len()).collect();
        let start = df.max_label().map(|m| m + 1).unwrap_or(0);
        let new_rows = changed.take(&added).relabel_from(start);
        tracing::debug!("Synthesized {} rows", new_rows.len());
        let mut out = df.clone();
        out.append(new_rows)?;
        Ok(out)
    } else if changed.len() < subset.len() {
        let kept: HashSet<i64> = changed.index().iter().copied().collect();
        let removed: HashSet<i64> = subset
            .index()
            .iter()
            .copied()
            .filter(|l| !kept.contains(l))
            .collect();
        tracing::debug!("Removed {} rows", removed.len());
        Ok(df.drop_labels(&removed))
    } else {
        Ok(df.clone())
    }
}

impl SynthesisTarget {
    fn from_table_row(targets: &Table, pos: usize) -> Result<Self> {
        let cell = |name: &str| -> Value {
            targets
                .column(name)
                .map(|c| c[pos].clone())
                .unwrap_or(Value::Null)
        };
        let text = |name: &str| -> Option<String> {
            match cell(name) {
                Value::Str(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            }
        };

        let target = cell("target_value").as_f64().ok_or_else(|| {
            SpandexError::validation(format!("synthesis row {}: target_value must be numeric", pos))
        })?;
        let alloc_id = text("geo_id_col").ok_or_else(|| {
            SpandexError::validation(format!("synthesis row {}: geo_id_col is required", pos))
        })?;
        let capacity_col = text("capacity_col");
        let capacity_expr = text("capacity_expr");

        Ok(Self {
            target,
            alloc_id,
            capacity: Capacity::from_parts(capacity_col.as_deref(), capacity_expr.as_deref())?,
            filters: text("filters").map(|f| split_filters(&f)).unwrap_or_default(),
            count: text("count"),
            stuff: cell("stuff").truthy(),
        })
    }

    /// Parse a targets table with the columns `target_value, geo_id_col,
    /// filters, count, capacity_col, capacity_expr, stuff`.
    pub fn from_table(targets: &Table) -> Result<Vec<Self>> {
        (0..targets.len())
            .map(|pos| Self::from_table_row(targets, pos))
            .collect()
    }
}

/// Apply every row of a synthesis targets table in order.
pub fn synthesize_from_table<R: Rng + ?Sized>(
    df: &Table,
    geo_df: &Table,
    targets: &Table,
    rng: &mut R,
) -> Result<Table> {
    let mut out = df.clone();
    for spec in SynthesisTarget::from_table(targets)? {
        let before = out.len();
        out = synthesize_one(&out, geo_df, &spec, rng)?;
        tracing::info!(
            "🧮 Target {} on '{}' ({:?}): {} -> {} rows",
            spec.target,
            spec.alloc_id,
            spec.filters,
            before,
            out.len()
        );
    }
    Ok(out)
}
