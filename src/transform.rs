use crate::aes::{box_hover_text, Accessor};
use crate::data::{get_cell_value, parse_number, AesValue, Row, ValueVariant};
use crate::ir::{AggregateFn, AggregateRow, BoxSummary};
use indexmap::IndexMap;
use std::cmp::Ordering;
use tracing::debug;

/// Bucket label for null or missing categories
pub const BLANK_LABEL: &str = "[Blank]";

/// Category label of a row, or `None` when the cell is null or absent
fn category_label(row: &Row, column: &str) -> Option<String> {
    match get_cell_value(row, column, ValueVariant::DisplayValue) {
        AesValue::Undefined | AesValue::Null => None,
        value => Some(value.to_string()),
    }
}

/// Numeric value for aggregation: nulls, missing cells and non-numbers count as zero
fn aggregate_value(row: &Row, column: &str) -> f64 {
    get_cell_value(row, column, ValueVariant::Value)
        .to_f64_lenient()
        .filter(|v| !v.is_nan())
        .unwrap_or(0.0)
}

fn apply_aggregate(func: AggregateFn, values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    match func {
        AggregateFn::Count => values.len() as f64,
        AggregateFn::Sum => values.iter().sum(),
        AggregateFn::Mean => values.iter().sum::<f64>() / values.len() as f64,
        AggregateFn::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        AggregateFn::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    }
}

/// Collapse rows into one value per category (and sub-category) for bar and pie charts.
///
/// Categories keep first-seen order unless `is_numeric_pivot` is set, in which case
/// they are ordered numerically. Without a measure every aggregate is a row count.
pub fn aggregate(
    rows: &[Row],
    dimension: &str,
    sub_dimension: Option<&str>,
    measure: Option<&str>,
    aggregate_fn: AggregateFn,
    null_bucket_label: &str,
    is_numeric_pivot: bool,
) -> Vec<AggregateRow> {
    let mut groups: IndexMap<(String, Option<String>), Vec<f64>> = IndexMap::new();

    for row in rows {
        let label = category_label(row, dimension).unwrap_or_else(|| null_bucket_label.to_string());
        let sub_label = sub_dimension
            .map(|sub| category_label(row, sub).unwrap_or_else(|| null_bucket_label.to_string()));
        let value = measure.map(|m| aggregate_value(row, m)).unwrap_or(1.0);
        groups.entry((label, sub_label)).or_default().push(value);
    }

    let func = if measure.is_none() { AggregateFn::Count } else { aggregate_fn };
    let mut result: Vec<AggregateRow> = groups
        .into_iter()
        .map(|((label, sub_label), values)| AggregateRow {
            value: apply_aggregate(func, &values),
            label,
            sub_label,
        })
        .collect();

    if is_numeric_pivot {
        // stable sort keeps first-seen order among non-numeric labels
        result.sort_by(|a, b| numeric_first_cmp(&a.label, &b.label));
    }

    debug!(categories = result.len(), ?func, "aggregated rows");
    result
}

fn numeric_first_cmp(a: &str, b: &str) -> Ordering {
    match (parse_number(a), parse_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Ordering used by discrete axes: numbers ascending, then text case-insensitively
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    match numeric_first_cmp(a, b) {
        Ordering::Equal if parse_number(a).is_none() => a.to_lowercase().cmp(&b.to_lowercase()),
        other => other,
    }
}

/// Split rows into buckets keyed by the display value of a column, in first-seen order.
/// Rows with a null or missing key go to `null_bucket_label`.
pub fn partition_rows(rows: &[Row], column: &str, null_bucket_label: &str) -> IndexMap<String, Vec<Row>> {
    let mut buckets: IndexMap<String, Vec<Row>> = IndexMap::new();
    for row in rows {
        let key = category_label(row, column).unwrap_or_else(|| null_bucket_label.to_string());
        buckets.entry(key).or_default().push(row.clone());
    }
    buckets
}

/// Keep at most `max_charts` items; the second value is the truncation warning
pub fn cap_charts<T>(mut items: Vec<T>, max_charts: usize) -> (Vec<T>, Option<String>) {
    if items.len() <= max_charts {
        return (items, None);
    }
    debug!(requested = items.len(), max_charts, "truncating chart list");
    items.truncate(max_charts);
    (items, Some(format!("Only showing the first {} charts.", max_charts)))
}

/// Box plot statistics per x category, categories in natural order
pub fn compute_box_summaries(rows: &[Row], x: &Accessor, y: &Accessor) -> Vec<BoxSummary> {
    let mut groups: IndexMap<String, Vec<f64>> = IndexMap::new();
    for row in rows {
        let Some(value) = y.eval(row).to_f64_lenient() else { continue };
        groups.entry(x.eval(row).to_string()).or_default().push(value);
    }

    let mut categories: Vec<String> = groups.keys().cloned().collect();
    categories.sort_by(|a, b| natural_cmp(a, b));

    categories
        .into_iter()
        .filter_map(|category| {
            let values = groups.swap_remove(&category)?;
            summarize_box(category, values)
        })
        .collect()
}

/// Tukey box for one category: whiskers stop at the last value inside 1.5 IQR
/// of the quartiles, anything beyond is an outlier.
fn summarize_box(category: String, mut values: Vec<f64>) -> Option<BoxSummary> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let q1 = quantile(&values, 0.25);
    let median = quantile(&values, 0.5);
    let q3 = quantile(&values, 0.75);
    let reach = 1.5 * (q3 - q1);
    let inside = |v: f64| v >= q1 - reach && v <= q3 + reach;

    let mut summary = BoxSummary {
        min: values.iter().copied().find(|&v| inside(v)).unwrap_or(q1),
        max: values.iter().rev().copied().find(|&v| inside(v)).unwrap_or(q3),
        outliers: values.iter().copied().filter(|&v| !inside(v)).collect(),
        category,
        q1,
        median,
        q3,
        hover_text: String::new(),
    };
    summary.hover_text = box_hover_text(&summary);
    Some(summary)
}

/// Quantile of sorted values, interpolating between neighbouring ranks
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let Some(last) = sorted.len().checked_sub(1) else { return 0.0 };
    let pos = q * last as f64;
    let below = pos.floor() as usize;
    let frac = pos - below as f64;
    match sorted.get(below + 1) {
        Some(next) if frac > 0.0 => sorted[below] + (next - sorted[below]) * frac,
        _ => sorted[below],
    }
}
