use crate::classify::{is_date_type, is_numeric_type};
use crate::data::{parse_number, Cell, CellValue, Row};
use crate::ir::{ChartConfig, Measure, RenderType};
use tracing::debug;

/// Suffix of the synthetic column holding converted values
pub const CONVERTED_SUFFIX: &str = "_converted";

fn needs_conversion(measure: &Measure) -> bool {
    let t = measure.effective_type();
    !measure.converted && !is_numeric_type(t) && !is_date_type(t)
}

fn convert_cell(cell: Option<&Cell>) -> (CellValue, bool) {
    match cell.map(|c| &c.value) {
        None | Some(CellValue::Null) => (CellValue::Null, false),
        Some(CellValue::Number(n)) => (CellValue::Number(*n), false),
        Some(CellValue::Text(s)) => match parse_number(s) {
            Some(n) => (CellValue::Number(n), false),
            None => (CellValue::Null, true),
        },
        Some(CellValue::Bool(_)) => (CellValue::Null, true),
    }
}

/// Convert one measure's text values to numbers in place.
///
/// Returns the warning to show, if any values had to be dropped. Nothing is
/// written when no value in the column parses as a number.
pub fn convert_measure(measure: &mut Measure, rows: &mut [Row]) -> Option<String> {
    let parsed_any = rows.iter().any(|row| match row.get(&measure.name).map(|c| &c.value) {
        Some(CellValue::Number(_)) => true,
        Some(CellValue::Text(s)) => parse_number(s).is_some(),
        _ => false,
    });
    if !parsed_any {
        return None;
    }

    let converted_name = format!("{}{}", measure.name, CONVERTED_SUFFIX);
    let mut dropped = 0usize;
    for row in rows.iter_mut() {
        let (value, failed) = convert_cell(row.get(&measure.name));
        if failed {
            dropped += 1;
        }
        row.insert(converted_name.clone(), Cell::new(value));
    }

    debug!(measure = %measure.name, dropped, "converted measure values to numbers");
    measure.converted = true;
    measure.converted_name = Some(converted_name);
    measure.normalized_type = Some("float".to_string());

    if dropped > 0 {
        Some(format!(
            "The {} measure contains {} value(s) that can't be converted to a number and are not included in the plot.",
            measure.display_label(),
            dropped
        ))
    } else {
        None
    }
}

/// Coerce non-numeric y measures (and x on scatter and line plots) to numbers.
///
/// Returns the accumulated warnings.
pub fn do_value_conversion(config: &mut ChartConfig, render_type: RenderType, rows: &mut [Row]) -> Vec<String> {
    let mut warnings = Vec::new();

    for measure in config.measures.y.iter_mut() {
        if needs_conversion(measure) {
            warnings.extend(convert_measure(measure, rows));
        }
    }

    if matches!(render_type, RenderType::ScatterPlot | RenderType::LinePlot) {
        if let Some(x) = config.measures.x.as_mut() {
            if needs_conversion(x) {
                warnings.extend(convert_measure(x, rows));
            }
        }
    }

    warnings
}

fn strip_conversion(measure: &mut Measure) {
    if measure.converted {
        measure.normalized_type = None;
    }
    measure.converted = false;
    measure.converted_name = None;
}

/// Remove conversion attributes before a config is saved or exported
pub fn remove_numeric_conversion_config(config: &mut ChartConfig) {
    if let Some(x) = config.measures.x.as_mut() {
        strip_conversion(x);
    }
    for y in config.measures.y.iter_mut() {
        strip_conversion(y);
    }
}

/// Whether any measure in the config went through numeric conversion
pub fn conversion_happened(config: &ChartConfig) -> bool {
    config.measures.x.as_ref().is_some_and(|m| m.converted) || config.measures.y.iter().any(|m| m.converted)
}
