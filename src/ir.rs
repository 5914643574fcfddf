use crate::aes::Aes;
use crate::callback::PointClickBinding;
use crate::data::Row;
use crate::scale::TickFormat;
use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Phase 1: User-authored chart configuration
// =============================================================================

/// Chart type requested by the user. `AutoPlot` is resolved by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderType {
    #[default]
    AutoPlot,
    BarChart,
    BoxPlot,
    PieChart,
    ScatterPlot,
    LinePlot,
    TimeChart,
}

impl RenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderType::AutoPlot => "auto_plot",
            RenderType::BarChart => "bar_chart",
            RenderType::BoxPlot => "box_plot",
            RenderType::PieChart => "pie_chart",
            RenderType::ScatterPlot => "scatter_plot",
            RenderType::LinePlot => "line_plot",
            RenderType::TimeChart => "time_chart",
        }
    }

    /// Bar and pie charts plot aggregated rows rather than raw rows
    pub fn is_aggregated(&self) -> bool {
        matches!(self, RenderType::BarChart | RenderType::PieChart)
    }

    /// Channels that must have a measure before the chart can render
    pub fn required_channels(&self) -> &'static [Channel] {
        match self {
            RenderType::BarChart | RenderType::PieChart => &[Channel::X],
            RenderType::BoxPlot | RenderType::AutoPlot => &[Channel::Y],
            RenderType::ScatterPlot | RenderType::LinePlot => &[Channel::X, Channel::Y],
            RenderType::TimeChart => &[Channel::Y],
        }
    }
}

impl fmt::Display for RenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto_plot" => Ok(RenderType::AutoPlot),
            "bar_chart" => Ok(RenderType::BarChart),
            "box_plot" => Ok(RenderType::BoxPlot),
            "pie_chart" => Ok(RenderType::PieChart),
            "scatter_plot" => Ok(RenderType::ScatterPlot),
            "line_plot" => Ok(RenderType::LinePlot),
            "time_chart" => Ok(RenderType::TimeChart),
            other => Err(anyhow!("Unknown render type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AxisSide {
    #[default]
    Left,
    Right,
}

/// Aggregate function applied to bar and pie chart categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFn {
    Count,
    Sum,
    Mean,
    Min,
    Max,
}

impl FromStr for AggregateFn {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COUNT" => Ok(AggregateFn::Count),
            "SUM" => Ok(AggregateFn::Sum),
            "MEAN" | "AVG" | "AVERAGE" => Ok(AggregateFn::Mean),
            "MIN" => Ok(AggregateFn::Min),
            "MAX" => Ok(AggregateFn::Max),
            other => Err(anyhow!("Unsupported aggregate '{}'", other)),
        }
    }
}

/// Saved aggregate selection: either a bare name or a `{"value": "SUM"}` object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregateSpec {
    Name(String),
    Object { value: String },
}

impl AggregateSpec {
    pub fn name(&self) -> &str {
        match self {
            AggregateSpec::Name(n) => n,
            AggregateSpec::Object { value } => value,
        }
    }

    pub fn resolve(&self) -> Result<AggregateFn> {
        self.name().parse()
    }
}

/// One plotted column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_name: Option<String>,
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub measure_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_axis: Option<AxisSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateSpec>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub converted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Measure {
    pub fn new(name: impl Into<String>, label: impl Into<String>, measure_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            measure_type: Some(measure_type.into()),
            ..Default::default()
        }
    }

    pub fn effective_type(&self) -> Option<&str> {
        self.normalized_type.as_deref().or(self.measure_type.as_deref())
    }

    /// Column to read values from: the converted column when a conversion happened
    pub fn column(&self) -> &str {
        match (&self.converted_name, self.converted) {
            (Some(name), true) => name,
            _ => &self.name,
        }
    }

    pub fn display_label(&self) -> &str {
        if self.label.is_empty() { &self.name } else { &self.label }
    }

    pub fn side(&self) -> AxisSide {
        self.y_axis.unwrap_or_default()
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<Measure>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(Box<Measure>),
        Many(Vec<Measure>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(m)) => vec![*m],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// Measures selected for each channel. `y` may hold several measures split across sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Measures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<Measure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_sub: Option<Measure>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub y: Vec<Measure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Measure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Measure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<Measure>,
}

impl Measures {
    pub fn first_y(&self) -> Option<&Measure> {
        self.y.first()
    }

    /// The measure bound to a channel. `Y` is the first left-side y measure,
    /// `YRight` the first right-side one.
    pub fn get(&self, channel: Channel) -> Option<&Measure> {
        match channel {
            Channel::X => self.x.as_ref(),
            Channel::XSub => self.x_sub.as_ref(),
            Channel::Y | Channel::YLeft => self.y.iter().find(|m| m.side() == AxisSide::Left),
            Channel::YRight => self.y.iter().find(|m| m.side() == AxisSide::Right),
            Channel::Color => self.color.as_ref(),
            Channel::Shape => self.shape.as_ref(),
            Channel::Group | Channel::PathColor => self.series.as_ref(),
            _ => None,
        }
    }

    /// Every selected measure paired with its channel, in a stable order
    pub fn all(&self) -> Vec<(Channel, &Measure)> {
        let mut out = Vec::new();
        if let Some(m) = &self.x {
            out.push((Channel::X, m));
        }
        if let Some(m) = &self.x_sub {
            out.push((Channel::XSub, m));
        }
        for m in &self.y {
            out.push((y_channel(m.side()), m));
        }
        if let Some(m) = &self.color {
            out.push((Channel::Color, m));
        }
        if let Some(m) = &self.shape {
            out.push((Channel::Shape, m));
        }
        if let Some(m) = &self.series {
            out.push((Channel::Group, m));
        }
        out
    }

    pub fn has_side(&self, side: AxisSide) -> bool {
        self.y.iter().any(|m| m.side() == side)
    }
}

/// The y channel used for a measure on the given side
pub fn y_channel(side: AxisSide) -> Channel {
    match side {
        AxisSide::Left => Channel::Y,
        AxisSide::Right => Channel::YRight,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Trans {
    #[default]
    Linear,
    Log,
}

/// How an axis range is chosen when several charts are drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RangeType {
    /// Shared across every chart in a multi-chart layout
    #[default]
    Automatic,
    AutomaticPerChart,
    Manual,
}

/// Saved per-axis user overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScaleOverride {
    #[serde(default)]
    pub trans: Option<Trans>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(rename = "type", default)]
    pub range_type: RangeType,
}

impl ScaleOverride {
    pub fn has_manual_domain(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SavedScales {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<ScaleOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<ScaleOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_right: Option<ScaleOverride>,
}

impl SavedScales {
    pub fn get(&self, channel: Channel) -> Option<&ScaleOverride> {
        match channel {
            Channel::X => self.x.as_ref(),
            Channel::Y | Channel::YLeft => self.y.as_ref(),
            Channel::YRight => self.y_right.as_ref(),
            _ => None,
        }
    }
}

/// User-authored chart labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChartLabels {
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub y_right: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PointType {
    #[default]
    Outliers,
    All,
}

/// How multiple series or subjects are split across chart panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChartLayout {
    #[default]
    Single,
    PerMeasure,
    PerSubject,
    PerGroup,
    PerDimension,
}

fn default_point_size() -> f64 { 5.0 }
fn default_line_width() -> f64 { 1.0 }
fn default_opacity() -> f64 { 0.5 }
fn default_fill_color() -> String { "3366FF".to_string() }
fn default_line_color() -> String { "000000".to_string() }
fn default_bin_threshold() -> usize { 10_000 }
fn default_pie_outer_radius() -> f64 { 80.0 }
fn default_pie_hide_percentage() -> f64 { 5.0 }
fn default_gradient_percentage() -> f64 { 95.0 }
fn default_gradient_color() -> String { "#FFFFFF".to_string() }
fn default_palette() -> String { "ColorDiscrete".to_string() }
fn default_true() -> bool { true }

/// Geometry and layout options from the chart layout dialog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeomOptions {
    #[serde(default = "default_point_size")]
    pub point_size: f64,
    #[serde(default = "default_fill_color")]
    pub point_fill_color: String,
    #[serde(default)]
    pub point_type: PointType,
    #[serde(default = "default_line_width")]
    pub line_width: f64,
    #[serde(default = "default_line_color")]
    pub line_color: String,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default = "default_fill_color")]
    pub box_fill_color: String,
    #[serde(default = "default_palette")]
    pub color_palette_scale: String,
    #[serde(default)]
    pub hide_data_points: bool,
    #[serde(default)]
    pub binned: bool,
    #[serde(default = "default_bin_threshold")]
    pub bin_threshold: usize,
    #[serde(default)]
    pub chart_layout: ChartLayout,
    #[serde(default)]
    pub margin_top: Option<f64>,
    #[serde(default)]
    pub margin_right: Option<f64>,
    #[serde(default)]
    pub margin_bottom: Option<f64>,
    #[serde(default)]
    pub margin_left: Option<f64>,
    #[serde(default = "default_true")]
    pub show_pie_labels: bool,
    #[serde(default = "default_true")]
    pub show_pie_percentages: bool,
    #[serde(default)]
    pub pie_inner_radius: f64,
    #[serde(default = "default_pie_outer_radius")]
    pub pie_outer_radius: f64,
    #[serde(default = "default_pie_hide_percentage")]
    pub pie_hide_when_less_than_percentage: f64,
    #[serde(default = "default_gradient_percentage")]
    pub gradient_percentage: f64,
    #[serde(default = "default_gradient_color")]
    pub gradient_color: String,
}

impl Default for GeomOptions {
    fn default() -> Self {
        Self {
            point_size: default_point_size(),
            point_fill_color: default_fill_color(),
            point_type: PointType::default(),
            line_width: default_line_width(),
            line_color: default_line_color(),
            opacity: default_opacity(),
            box_fill_color: default_fill_color(),
            color_palette_scale: default_palette(),
            hide_data_points: false,
            binned: false,
            bin_threshold: default_bin_threshold(),
            chart_layout: ChartLayout::Single,
            margin_top: None,
            margin_right: None,
            margin_bottom: None,
            margin_left: None,
            show_pie_labels: true,
            show_pie_percentages: true,
            pie_inner_radius: 0.0,
            pie_outer_radius: default_pie_outer_radius(),
            pie_hide_when_less_than_percentage: default_pie_hide_percentage(),
            gradient_percentage: default_gradient_percentage(),
            gradient_color: default_gradient_color(),
        }
    }
}

/// The generic chart configuration, rebuilt from panel state on every render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    #[serde(default)]
    pub render_type: RenderType,
    #[serde(default)]
    pub measures: Measures,
    #[serde(default)]
    pub scales: SavedScales,
    #[serde(default)]
    pub labels: ChartLabels,
    #[serde(default)]
    pub geom_options: GeomOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Name of a registered point-click handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_click_handler: Option<String>,
}

/// Query the chart data comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfig {
    pub schema_name: String,
    pub query_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_array: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
}

// =============================================================================
// Phase 2: Derived aesthetics and scales
// =============================================================================

/// Logical visual channel an accessor or scale is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Channel {
    X,
    XSub,
    Y,
    YLeft,
    YRight,
    Color,
    Shape,
    HoverText,
    PathColor,
    Group,
    Error,
    OutlierColor,
    OutlierShape,
    OutlierHoverText,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::X => "x",
            Channel::XSub => "xSub",
            Channel::Y => "y",
            Channel::YLeft => "yLeft",
            Channel::YRight => "yRight",
            Channel::Color => "color",
            Channel::Shape => "shape",
            Channel::HoverText => "hoverText",
            Channel::PathColor => "pathColor",
            Channel::Group => "group",
            Channel::Error => "error",
            Channel::OutlierColor => "outlierColor",
            Channel::OutlierShape => "outlierShape",
            Channel::OutlierHoverText => "outlierHoverText",
        }
    }

    /// Axis name used in user-facing messages ("x", "y")
    pub fn axis_name(&self) -> &'static str {
        match self {
            Channel::X | Channel::XSub => "x",
            Channel::Y | Channel::YLeft | Channel::YRight => "y",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleType {
    Continuous,
    Discrete,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Domain {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Domain {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min: Some(min), max: Some(max) }
    }

    pub fn unit() -> Self {
        Self::new(0.0, 1.0)
    }
}

/// Ordering for discrete scale categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Numbers ascending first, then text in natural order
    Natural,
    FirstSeen,
}

/// Axis scale handed to the renderer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleDescriptor {
    pub scale_type: ScaleType,
    pub trans: Trans,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick_format: Option<TickFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,
}

impl ScaleDescriptor {
    pub fn continuous(trans: Trans) -> Self {
        Self { scale_type: ScaleType::Continuous, trans, domain: None, tick_format: None, sort: None }
    }

    /// Discrete scales are always linear
    pub fn discrete() -> Self {
        Self {
            scale_type: ScaleType::Discrete,
            trans: Trans::Linear,
            domain: None,
            tick_format: None,
            sort: Some(SortOrder::Natural),
        }
    }

    pub fn is_continuous(&self) -> bool {
        self.scale_type == ScaleType::Continuous
    }
}

/// Scale descriptors keyed by channel
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Scales(pub IndexMap<Channel, ScaleDescriptor>);

impl Scales {
    pub fn get(&self, channel: Channel) -> Option<&ScaleDescriptor> {
        self.0.get(&channel)
    }

    pub fn get_mut(&mut self, channel: Channel) -> Option<&mut ScaleDescriptor> {
        self.0.get_mut(&channel)
    }

    pub fn insert(&mut self, channel: Channel, scale: ScaleDescriptor) {
        self.0.insert(channel, scale);
    }
}

// =============================================================================
// Phase 3: Plot configuration handed to the renderer
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geom {
    Point {
        size: f64,
        opacity: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        color: Option<String>,
        jitter: bool,
    },
    Path {
        size: f64,
        opacity: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    Boxplot {
        fill_color: String,
        line_color: String,
        line_width: f64,
        opacity: f64,
        show_outliers: bool,
    },
    Bin {
        threshold: usize,
        color: String,
    },
    ErrorBar,
    Bar {
        fill_color: String,
        line_color: String,
        line_width: f64,
        opacity: f64,
    },
}

/// One drawing layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub geom: Geom,
    pub aes: Aes,
    /// Layer-specific rows; the plot's data is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_click: Option<PointClickBinding>,
}

/// Per-category aggregate used by bar and pie charts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRow {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_label: Option<String>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PlotData {
    Rows(Vec<Row>),
    Aggregated(Vec<AggregateRow>),
}

impl PlotData {
    pub fn len(&self) -> usize {
        match self {
            PlotData::Rows(r) => r.len(),
            PlotData::Aggregated(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Margins {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bottom: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<f64>,
}

/// Resolved axis and title labels
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlotLabels {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_left: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_right: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PieOptions {
    pub show_labels: bool,
    pub show_percentages: bool,
    pub inner_radius: f64,
    pub outer_radius: f64,
    pub hide_when_less_than_percentage: f64,
    pub gradient_percentage: f64,
    pub gradient_color: String,
    pub color_palette: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BarOptions {
    /// Always includes zero
    pub value_domain: Domain,
    pub grouped: bool,
    pub show_cumulative_totals: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChartOptions {
    Pie(PieOptions),
    Bar(BarOptions),
}

/// Five-number summary for one box plot category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxSummary {
    pub category: String,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub outliers: Vec<f64>,
    pub hover_text: String,
}

/// Everything the external renderer needs to draw one chart
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotConfig {
    pub render_to: String,
    pub render_type: RenderType,
    pub width: u32,
    pub height: u32,
    pub labels: PlotLabels,
    pub layers: Vec<LayerConfig>,
    pub aes: Aes,
    pub scales: Scales,
    pub data: PlotData,
    pub margins: Margins,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ChartOptions>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub box_summaries: Vec<BoxSummary>,
    pub clip_rect: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_click_handler: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chart_config_from_saved_json() {
        let saved = json!({
            "renderType": "bar_chart",
            "measures": {
                "x": {"name": "Category", "label": "Category", "type": "string"},
                "y": {"name": "Value", "label": "Value", "type": "int", "aggregate": {"value": "MEAN"}}
            },
            "scales": {"y": {"trans": "log", "min": 1.0}},
            "geomOptions": {"pointSize": 3.0}
        });
        let config: ChartConfig = serde_json::from_value(saved).unwrap();
        assert_eq!(config.render_type, RenderType::BarChart);
        assert_eq!(config.measures.y.len(), 1);
        assert_eq!(config.measures.y[0].aggregate.as_ref().unwrap().resolve().unwrap(), AggregateFn::Mean);
        assert_eq!(config.scales.y.as_ref().unwrap().trans, Some(Trans::Log));
        assert!(config.scales.y.as_ref().unwrap().has_manual_domain());
        assert_eq!(config.geom_options.point_size, 3.0);
        assert_eq!(config.geom_options.bin_threshold, 10_000);
    }

    #[test]
    fn test_y_accepts_array() {
        let measures: Measures = serde_json::from_value(json!({
            "y": [
                {"name": "a", "yAxis": "left"},
                {"name": "b", "yAxis": "right"}
            ]
        }))
        .unwrap();
        assert_eq!(measures.y.len(), 2);
        assert_eq!(measures.get(Channel::YRight).unwrap().name, "b");
        assert!(measures.has_side(AxisSide::Right));
    }

    #[test]
    fn test_measure_column_uses_converted_name() {
        let mut m = Measure::new("v", "Value", "string");
        assert_eq!(m.column(), "v");
        m.converted = true;
        m.converted_name = Some("v_converted".to_string());
        assert_eq!(m.column(), "v_converted");
    }

    #[test]
    fn test_aggregate_names() {
        assert_eq!("sum".parse::<AggregateFn>().unwrap(), AggregateFn::Sum);
        assert_eq!("AVG".parse::<AggregateFn>().unwrap(), AggregateFn::Mean);
        assert!("median".parse::<AggregateFn>().is_err());
    }
}
