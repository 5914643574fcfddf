use crate::data::{get_cell_value, AesValue, Row, ValueVariant};
use crate::classify::{classify_measure, MeasureKind};
use crate::ir::{BoxSummary, Channel, Measure, Measures, RenderType};
use indexmap::IndexMap;
use serde::Serialize;

/// A per-row value extractor for one visual channel.
///
/// Accessors are plain data so the validator can wrap them and the renderer
/// can inspect them after serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "args", rename_all = "snake_case")]
pub enum Accessor {
    /// Cell read with no coercion
    Raw { column: String, variant: ValueVariant },
    /// Numeric read: infinities become null, booleans become their string form
    Continuous { column: String },
    /// Categorical read: null becomes "Not in {label}"
    Discrete { column: String, label: String },
    /// Color/shape/series read: null and undefined become "n/a"
    Grouping { column: String },
    Constant(String),
    /// `label: value` pairs joined with ", \n"
    PointHover { entries: Vec<HoverEntry> },
    /// Time chart point hover
    TimeHover(TimeHover),
    /// Adds a fixed offset to every numeric value of the inner accessor
    Shifted { inner: Box<Accessor>, by: f64 },
    /// Maps a visit id to its display order
    VisitOrder { column: String, visit_map: IndexMap<String, usize> },
    /// Maps a visit id to its display name
    VisitLabel { column: String, labels: IndexMap<String, String> },
    /// Lenient numeric read of text or number cells
    ParsedNumber { column: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoverEntry {
    pub label: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeHover {
    pub subject_column: String,
    /// Shown as `label: value`; visit names are shown bare
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_label: Option<String>,
    pub interval: Box<Accessor>,
    pub series_name: String,
    pub value_column: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorHover>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorHover {
    pub label: String,
    pub column: String,
}

impl Accessor {
    pub fn continuous(column: impl Into<String>) -> Self {
        Accessor::Continuous { column: column.into() }
    }

    pub fn discrete(column: impl Into<String>, label: impl Into<String>) -> Self {
        Accessor::Discrete { column: column.into(), label: label.into() }
    }

    pub fn grouping(column: impl Into<String>) -> Self {
        Accessor::Grouping { column: column.into() }
    }

    /// Wrap this accessor so every number it yields is shifted by `by`
    pub fn shifted(self, by: f64) -> Self {
        Accessor::Shifted { inner: Box::new(self), by }
    }

    /// Column this accessor reads, if it reads exactly one
    pub fn column(&self) -> Option<&str> {
        match self {
            Accessor::Raw { column, .. }
            | Accessor::Continuous { column }
            | Accessor::Discrete { column, .. }
            | Accessor::Grouping { column }
            | Accessor::VisitOrder { column, .. }
            | Accessor::VisitLabel { column, .. }
            | Accessor::ParsedNumber { column } => Some(column),
            Accessor::Shifted { inner, .. } => inner.column(),
            Accessor::Constant(_) | Accessor::PointHover { .. } | Accessor::TimeHover(_) => None,
        }
    }

    pub fn eval(&self, row: &Row) -> AesValue {
        match self {
            Accessor::Raw { column, variant } => get_cell_value(row, column, *variant),
            Accessor::Continuous { column } => match get_cell_value(row, column, ValueVariant::Value) {
                AesValue::Number(n) if n.is_infinite() => AesValue::Null,
                AesValue::Bool(b) => AesValue::Text(b.to_string()),
                other => other,
            },
            Accessor::Discrete { column, label } => {
                match get_cell_value(row, column, ValueVariant::DisplayValue) {
                    AesValue::Null => AesValue::Text(format!("Not in {}", label)),
                    other => other,
                }
            }
            Accessor::Grouping { column } => match get_cell_value(row, column, ValueVariant::DisplayValue) {
                AesValue::Null | AesValue::Undefined => AesValue::Text("n/a".to_string()),
                other => other,
            },
            Accessor::Constant(text) => AesValue::Text(text.clone()),
            Accessor::PointHover { entries } => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|e| format!("{}: {}", e.label, get_cell_value(row, &e.column, ValueVariant::DisplayValue)))
                    .collect();
                AesValue::Text(parts.join(", \n"))
            }
            Accessor::TimeHover(hover) => AesValue::Text(hover.render(row)),
            Accessor::Shifted { inner, by } => match inner.eval(row) {
                AesValue::Number(n) => AesValue::Number(n + by),
                AesValue::Text(s) => match crate::data::parse_number(&s) {
                    Some(n) => AesValue::Number(n + by),
                    None => AesValue::Text(s),
                },
                other => other,
            },
            Accessor::VisitOrder { column, visit_map } => {
                match get_cell_value(row, column, ValueVariant::Value) {
                    AesValue::Undefined => AesValue::Undefined,
                    AesValue::Null => AesValue::Null,
                    value => match visit_map.get(&value.to_string()) {
                        Some(order) => AesValue::Number(*order as f64),
                        None => AesValue::Null,
                    },
                }
            }
            Accessor::VisitLabel { column, labels } => match get_cell_value(row, column, ValueVariant::Value) {
                AesValue::Undefined => AesValue::Undefined,
                AesValue::Null => AesValue::Null,
                value => labels.get(&value.to_string()).map(|l| AesValue::Text(l.clone())).unwrap_or(AesValue::Null),
            },
            Accessor::ParsedNumber { column } => match get_cell_value(row, column, ValueVariant::Value) {
                AesValue::Undefined => AesValue::Undefined,
                value => value.to_f64_lenient().map(AesValue::Number).unwrap_or(AesValue::Null),
            },
        }
    }

    /// Grouping accessors applied to a group of rows read the first row
    pub fn eval_rows(&self, rows: &[Row]) -> AesValue {
        rows.first().map(|r| self.eval(r)).unwrap_or(AesValue::Undefined)
    }
}

impl TimeHover {
    fn render(&self, row: &Row) -> String {
        let subject = get_cell_value(row, &self.subject_column, ValueVariant::DisplayValue);
        let interval = match &self.interval_label {
            Some(label) => format!("{}: {}", label, self.interval.eval(row)),
            None => self.interval.eval(row).to_string(),
        };
        let mut text = format!(
            " {},\n {},\n {}: {}",
            subject,
            interval,
            self.series_name,
            get_cell_value(row, &self.value_column, ValueVariant::Value),
        );
        if let Some(err) = &self.error {
            let value = match get_cell_value(row, &err.column, ValueVariant::Value) {
                v if v.is_missing() => "n/a".to_string(),
                v => v.to_string(),
            };
            text.push_str(&format!(",\n {}: {}", err.label, value));
        }
        text
    }
}

/// Channel → accessor map for one plot or layer
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Aes(pub IndexMap<Channel, Accessor>);

impl Aes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: Channel) -> Option<&Accessor> {
        self.0.get(&channel)
    }

    pub fn insert(&mut self, channel: Channel, accessor: Accessor) {
        self.0.insert(channel, accessor);
    }

    pub fn remove(&mut self, channel: Channel) -> Option<Accessor> {
        self.0.shift_remove(&channel)
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.0.contains_key(&channel)
    }

    /// Evaluate a channel, `Undefined` when the channel has no accessor
    pub fn eval(&self, channel: Channel, row: &Row) -> AesValue {
        self.get(channel).map(|a| a.eval(row)).unwrap_or(AesValue::Undefined)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Hover entries for every selected measure, de-duplicated by column name
pub fn point_hover(measures: &Measures) -> Accessor {
    let mut entries: Vec<HoverEntry> = Vec::new();
    for (_, measure) in measures.all() {
        let column = measure.column().to_string();
        if entries.iter().any(|e| e.column == column) {
            continue;
        }
        entries.push(HoverEntry { label: measure.display_label().to_string(), column });
    }
    Accessor::PointHover { entries }
}

/// Hover text for one box of a box plot
pub fn box_hover_text(summary: &BoxSummary) -> String {
    format!(
        "{}:\nMin: {}\nMax: {}\nQ1: {}\nQ2: {}\nQ3: {}",
        summary.category, summary.min, summary.max, summary.q1, summary.median, summary.q3
    )
}

/// Whether the x measure is drawn on a continuous axis. Only numeric measures on
/// point charts are; dates and categories stay discrete.
pub fn is_continuous_x(chart_type: RenderType, x: &Measure) -> bool {
    let discrete_chart = matches!(chart_type, RenderType::BoxPlot | RenderType::BarChart | RenderType::PieChart);
    !discrete_chart && classify_measure(x) == MeasureKind::Numeric
}

fn x_accessor(chart_type: RenderType, x: &Measure) -> Accessor {
    if is_continuous_x(chart_type, x) {
        Accessor::continuous(x.column())
    } else {
        Accessor::discrete(x.column(), x.display_label())
    }
}

/// Build the aesthetic map for a chart.
///
/// Charts with several y measures get their y accessors per layer, so only a
/// single y measure is mapped here.
pub fn generate_aes(chart_type: RenderType, measures: &Measures, query_name: &str) -> Aes {
    let mut aes = Aes::new();

    match &measures.x {
        None if chart_type == RenderType::BoxPlot => {
            aes.insert(Channel::X, Accessor::Constant(query_name.to_string()));
        }
        None => {}
        Some(x) => aes.insert(Channel::X, x_accessor(chart_type, x)),
    }

    if let [y] = measures.y.as_slice() {
        aes.insert(crate::ir::y_channel(y.side()), Accessor::continuous(y.column()));
    }

    match chart_type {
        RenderType::ScatterPlot | RenderType::LinePlot => {
            aes.insert(Channel::HoverText, point_hover(measures));
        }
        RenderType::BoxPlot => {
            if let Some(color) = &measures.color {
                aes.insert(Channel::OutlierColor, Accessor::grouping(&color.name));
            }
            if let Some(shape) = &measures.shape {
                aes.insert(Channel::OutlierShape, Accessor::grouping(&shape.name));
            }
            aes.insert(Channel::OutlierHoverText, point_hover(measures));
        }
        RenderType::BarChart => {
            if let Some(x_sub) = &measures.x_sub {
                let acc = match classify_measure(x_sub) {
                    MeasureKind::Numeric => Accessor::continuous(x_sub.column()),
                    _ => Accessor::discrete(x_sub.column(), x_sub.display_label()),
                };
                aes.insert(Channel::XSub, acc);
            }
        }
        _ => {}
    }

    if let Some(color) = &measures.color {
        aes.insert(Channel::Color, Accessor::grouping(&color.name));
    }
    if let Some(shape) = &measures.shape {
        aes.insert(Channel::Shape, Accessor::grouping(&shape.name));
    }
    if let Some(series) = &measures.series {
        aes.insert(Channel::Color, Accessor::grouping(&series.name));
        aes.insert(Channel::Shape, Accessor::grouping(&series.name));
        if chart_type == RenderType::LinePlot {
            aes.insert(Channel::Group, Accessor::grouping(&series.name));
            aes.insert(Channel::PathColor, Accessor::grouping(&series.name));
        }
    }

    aes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Cell;

    fn make_row(pairs: &[(&str, Cell)]) -> Row {
        pairs.iter().map(|(k, c)| (k.to_string(), c.clone())).collect()
    }

    fn make_measures(x_type: Option<&str>) -> Measures {
        Measures {
            x: x_type.map(|t| Measure::new("x", "X Label", t)),
            y: vec![Measure::new("y", "Y Label", "float")],
            ..Default::default()
        }
    }

    #[test]
    fn test_continuous_coercion() {
        let acc = Accessor::continuous("v");
        let row = make_row(&[("v", Cell::number(f64::INFINITY))]);
        assert_eq!(acc.eval(&row), AesValue::Null);
        let row = make_row(&[("v", Cell::new(crate::data::CellValue::Bool(true)))]);
        assert_eq!(acc.eval(&row), AesValue::Text("true".to_string()));
        assert_eq!(acc.eval(&Row::new()), AesValue::Undefined);
    }

    #[test]
    fn test_discrete_and_grouping_null_substitution() {
        let row = make_row(&[("c", Cell::null())]);
        assert_eq!(
            Accessor::discrete("c", "Cohort").eval(&row),
            AesValue::Text("Not in Cohort".to_string())
        );
        // undefined stays undefined for discrete reads
        assert_eq!(Accessor::discrete("missing", "M").eval(&row), AesValue::Undefined);
        assert_eq!(Accessor::grouping("c").eval(&row), AesValue::Text("n/a".to_string()));
        assert_eq!(Accessor::grouping("missing").eval(&row), AesValue::Text("n/a".to_string()));
    }

    #[test]
    fn test_shifted_keeps_null() {
        let acc = Accessor::continuous("v").shifted(1.0);
        assert_eq!(acc.eval(&make_row(&[("v", Cell::number(0.0))])), AesValue::Number(1.0));
        assert_eq!(acc.eval(&make_row(&[("v", Cell::null())])), AesValue::Null);
        assert_eq!(acc.column(), Some("v"));
    }

    #[test]
    fn test_point_hover_dedupes_columns() {
        let mut measures = make_measures(Some("int"));
        measures.color = Some(Measure::new("x", "Dup", "int"));
        let hover = point_hover(&measures);
        let row = make_row(&[("x", Cell::number(1.0)), ("y", Cell::number(2.5))]);
        assert_eq!(hover.eval(&row), AesValue::Text("X Label: 1, \nY Label: 2.5".to_string()));
    }

    #[test]
    fn test_box_plot_without_x_uses_query_name() {
        let measures = make_measures(None);
        let aes = generate_aes(RenderType::BoxPlot, &measures, "Demographics");
        assert_eq!(aes.get(Channel::X), Some(&Accessor::Constant("Demographics".to_string())));
        assert!(aes.contains(Channel::OutlierHoverText));
        assert!(aes.contains(Channel::Y));
    }

    #[test]
    fn test_scatter_numeric_x_is_continuous() {
        let aes = generate_aes(RenderType::ScatterPlot, &make_measures(Some("int")), "q");
        assert_eq!(aes.get(Channel::X), Some(&Accessor::continuous("x")));
        assert!(aes.contains(Channel::HoverText));
    }

    #[test]
    fn test_date_x_is_discrete() {
        let measures = make_measures(Some("date"));
        for chart_type in [RenderType::ScatterPlot, RenderType::LinePlot] {
            let aes = generate_aes(chart_type, &measures, "q");
            assert_eq!(aes.get(Channel::X), Some(&Accessor::discrete("x", "X Label")));
            assert!(!is_continuous_x(chart_type, measures.x.as_ref().unwrap()));
        }
    }

    #[test]
    fn test_series_overrides_color_and_shape() {
        let mut measures = make_measures(Some("date"));
        measures.color = Some(Measure::new("c", "C", "string"));
        measures.series = Some(Measure::new("s", "S", "string"));
        let aes = generate_aes(RenderType::LinePlot, &measures, "q");
        assert_eq!(aes.get(Channel::Color), Some(&Accessor::grouping("s")));
        assert_eq!(aes.get(Channel::PathColor), Some(&Accessor::grouping("s")));
    }

    #[test]
    fn test_grouping_over_rows_reads_first() {
        let rows = vec![make_row(&[("g", Cell::text("Cohort A"))]), make_row(&[("g", Cell::text("Cohort B"))])];
        assert_eq!(Accessor::grouping("g").eval_rows(&rows), AesValue::Text("Cohort A".to_string()));
        assert_eq!(Accessor::grouping("g").eval_rows(&[]), AesValue::Undefined);
    }

    #[test]
    fn test_visit_order() {
        let mut visit_map = IndexMap::new();
        visit_map.insert("10".to_string(), 1);
        visit_map.insert("20".to_string(), 2);
        let acc = Accessor::VisitOrder { column: "Visit".to_string(), visit_map };
        assert_eq!(acc.eval(&make_row(&[("Visit", Cell::number(20.0))])), AesValue::Number(2.0));
        assert_eq!(acc.eval(&make_row(&[("Visit", Cell::number(30.0))])), AesValue::Null);
    }
}
