use crate::convert::remove_numeric_conversion_config;
use crate::ir::{ChartConfig, QueryConfig};
use anyhow::{Context, Result};
use serde_json::{json, Value};

/// Reusable chart definition: `{"chartConfig": {...}, "queryConfig": {...}}`.
///
/// Conversion state is derived from the data at render time, so it is stripped.
pub fn export_script(chart_config: &ChartConfig, query_config: &QueryConfig) -> Result<Value> {
    let mut chart_config = chart_config.clone();
    remove_numeric_conversion_config(&mut chart_config);
    Ok(json!({
        "chartConfig": serde_json::to_value(&chart_config).context("Failed to serialize chart config")?,
        "queryConfig": serde_json::to_value(query_config).context("Failed to serialize query config")?,
    }))
}

pub fn render_snippet(chart_config: &ChartConfig, query_config: &QueryConfig) -> Result<String> {
    let script = export_script(chart_config, query_config)?;
    serde_json::to_string_pretty(&script).context("Failed to format script")
}
