// Measure type classification and chart type inference

use crate::ir::{Measure, RenderType};
use serde::{Deserialize, Serialize};

/// Coarse type of a measure, used to pick scales and accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureKind {
    Numeric,
    Date,
    Categorical,
}

const NUMERIC_TYPES: &[&str] = &["int", "integer", "float", "double"];
const DATE_TYPES: &[&str] = &["date"];

/// Classify a declared type string (case-insensitive)
pub fn classify(type_name: &str) -> MeasureKind {
    let lower = type_name.trim().to_ascii_lowercase();
    if NUMERIC_TYPES.contains(&lower.as_str()) {
        MeasureKind::Numeric
    } else if DATE_TYPES.contains(&lower.as_str()) {
        MeasureKind::Date
    } else {
        MeasureKind::Categorical
    }
}

pub fn is_numeric_type(type_name: Option<&str>) -> bool {
    type_name.map(classify) == Some(MeasureKind::Numeric)
}

pub fn is_date_type(type_name: Option<&str>) -> bool {
    type_name.map(classify) == Some(MeasureKind::Date)
}

/// Classify a measure by its normalized type, falling back to the declared type.
/// A measure with no type at all is categorical.
pub fn classify_measure(measure: &Measure) -> MeasureKind {
    measure.effective_type().map(classify).unwrap_or(MeasureKind::Categorical)
}

/// Resolve the chart type to draw.
///
/// Pinned render types are returned as-is. `auto_plot` becomes a box plot when the x measure
/// is absent or categorical, and a scatter plot when it is numeric or a date.
pub fn get_chart_type(render_type: RenderType, x_axis_type: Option<&str>) -> RenderType {
    if render_type != RenderType::AutoPlot {
        return render_type;
    }

    match x_axis_type.map(classify) {
        Some(MeasureKind::Numeric) | Some(MeasureKind::Date) => RenderType::ScatterPlot,
        _ => RenderType::BoxPlot,
    }
}

/// The x-axis type of an optional x measure
pub fn x_axis_type(x: Option<&Measure>) -> Option<&str> {
    x.and_then(Measure::effective_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_case_insensitive() {
        assert_eq!(classify("INT"), MeasureKind::Numeric);
        assert_eq!(classify("Integer"), MeasureKind::Numeric);
        assert_eq!(classify("float"), MeasureKind::Numeric);
        assert_eq!(classify("DOUBLE"), MeasureKind::Numeric);
        assert_eq!(classify("Date"), MeasureKind::Date);
        assert_eq!(classify("string"), MeasureKind::Categorical);
        assert_eq!(classify("boolean"), MeasureKind::Categorical);
    }

    #[test]
    fn test_chart_type_inference() {
        assert_eq!(get_chart_type(RenderType::AutoPlot, None), RenderType::BoxPlot);
        assert_eq!(get_chart_type(RenderType::AutoPlot, Some("string")), RenderType::BoxPlot);
        assert_eq!(get_chart_type(RenderType::AutoPlot, Some("int")), RenderType::ScatterPlot);
        assert_eq!(get_chart_type(RenderType::AutoPlot, Some("date")), RenderType::ScatterPlot);
    }

    #[test]
    fn test_pinned_types_bypass_inference() {
        for pinned in [
            RenderType::BarChart,
            RenderType::PieChart,
            RenderType::LinePlot,
            RenderType::TimeChart,
            RenderType::BoxPlot,
        ] {
            assert_eq!(get_chart_type(pinned, Some("int")), pinned);
        }
    }

    #[test]
    fn test_classify_measure_prefers_normalized_type() {
        let m = Measure {
            name: "v".to_string(),
            measure_type: Some("string".to_string()),
            normalized_type: Some("float".to_string()),
            ..Default::default()
        };
        assert_eq!(classify_measure(&m), MeasureKind::Numeric);
    }
}
