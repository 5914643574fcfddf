use crate::aes::{Accessor, Aes, ErrorHover, TimeHover};
use crate::callback::{CallbackRegistry, MeasureInfo, PointClickBinding};
use crate::data::{get_cell_value, MeasureStore, Row, ValueVariant};
use crate::ir::{
    AxisSide, Channel, ChartLayout, Domain, Geom, LayerConfig, Margins, Measure, PlotConfig, PlotData,
    PlotLabels, RangeType, RenderType, ScaleDescriptor, Scales, Trans,
};
use crate::runtime::RenderOutcome;
use crate::scale::{tick_format_for, Extent, TickFormat};
use crate::transform::cap_charts;
use crate::validate::{FatalKind, Validation};
use crate::{ChartError, RenderOptions};
use anyhow::{bail, Context, Result};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Subject id used by the aggregate (mean) rows
const AGGREGATE_SUBJECT_COLUMN: &str = "UniqueId";
const SINGLE_CHART_HEIGHT: u32 = 610;
const MULTI_CHART_HEIGHT: u32 = 380;

// =============================================================================
// Saved time chart configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeKind {
    #[default]
    Date,
    Visit,
}

fn default_interval() -> String { "Days".to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateOptions {
    /// Name of the calculated interval column (Days, Weeks, Months, ...)
    #[serde(default = "default_interval")]
    pub interval: String,
}

/// Pivot column splitting one measure into several series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub query_name: Option<String>,
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeMeasure {
    pub measure: Measure,
    #[serde(default)]
    pub time: TimeKind,
    #[serde(default)]
    pub date_options: Option<DateOptions>,
    #[serde(default)]
    pub dimension: Option<Dimension>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AxisName {
    XAxis,
    YAxis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AxisRange {
    #[serde(rename = "type", default)]
    pub range_type: RangeType,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl AxisRange {
    fn domain(&self) -> Option<Domain> {
        if self.min.is_none() && self.max.is_none() {
            return None;
        }
        Some(Domain { min: self.min, max: self.max })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeAxis {
    pub name: AxisName,
    #[serde(default)]
    pub side: Option<AxisSide>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub range: AxisRange,
    #[serde(default)]
    pub scale: Option<Trans>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ErrorBars {
    #[default]
    None,
    #[serde(rename = "SD")]
    Sd,
    #[serde(rename = "SEM")]
    Sem,
}

impl ErrorBars {
    /// Suffix of the error column next to an aggregate value column
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            ErrorBars::None => None,
            ErrorBars::Sd => Some("_STDDEV"),
            ErrorBars::Sem => Some("_STDERR"),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ErrorBars::None => "",
            ErrorBars::Sd => "SD",
            ErrorBars::Sem => "SEM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubjectSelection {
    #[default]
    Subjects,
    Groups,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGroup {
    pub label: String,
    #[serde(default)]
    pub participant_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SubjectInfo {
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub groups: Vec<SubjectGroup>,
}

fn default_subject_column() -> String { "ParticipantId".to_string() }
fn default_subject_noun() -> String { "Participant".to_string() }

/// Naming of the study's subject column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyContext {
    #[serde(default = "default_subject_column")]
    pub subject_column: String,
    #[serde(default = "default_subject_noun")]
    pub subject_noun_singular: String,
}

impl Default for StudyContext {
    fn default() -> Self {
        Self { subject_column: default_subject_column(), subject_noun_singular: default_subject_noun() }
    }
}

impl StudyContext {
    /// Column holding the visit id, as named in the column alias list
    pub fn visit_column(&self) -> String {
        format!("{}Visit/Visit", self.subject_noun_singular)
    }
}

fn default_true() -> bool { true }
fn default_time_line_width() -> f64 { 3.0 }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeChartConfig {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub measures: Vec<TimeMeasure>,
    #[serde(default)]
    pub axis: Vec<TimeAxis>,
    #[serde(default)]
    pub chart_layout: ChartLayout,
    #[serde(default)]
    pub chart_subject_selection: SubjectSelection,
    #[serde(default)]
    pub subject: SubjectInfo,
    #[serde(default = "default_true")]
    pub display_individual: bool,
    #[serde(default)]
    pub display_aggregate: bool,
    #[serde(default)]
    pub error_bars: ErrorBars,
    #[serde(default)]
    pub hide_data_points: bool,
    #[serde(default = "default_time_line_width")]
    pub line_width: f64,
    /// Name of a registered point-click handler
    #[serde(default)]
    pub point_click_fn: Option<String>,
    #[serde(default)]
    pub study: StudyContext,
}

impl TimeChartConfig {
    fn is_visit_based(&self) -> bool {
        self.measures.first().is_some_and(|m| m.time == TimeKind::Visit)
    }
}

// =============================================================================
// Series and column aliases
// =============================================================================

/// How a series finds its column in the response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AliasLookup {
    Column(String),
    Alias(String),
    Measure { measure_name: String, pivot_value: Option<String> },
}

/// Mapping from a measure (and pivot value) to the column alias used in response rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnAlias {
    #[serde(default)]
    pub column_name: Option<String>,
    #[serde(default)]
    pub measure_name: Option<String>,
    #[serde(default)]
    pub pivot_value: Option<String>,
    pub alias: String,
}

/// Resolve a lookup against the response aliases, falling back to the plain name
pub fn get_column_alias(aliases: &[ColumnAlias], lookup: &AliasLookup) -> String {
    match lookup {
        AliasLookup::Alias(alias) => alias.clone(),
        AliasLookup::Column(column) => aliases
            .iter()
            .find(|a| a.column_name.as_deref() == Some(column.as_str()))
            .map(|a| a.alias.clone())
            .unwrap_or_else(|| column.clone()),
        AliasLookup::Measure { measure_name, pivot_value } => aliases
            .iter()
            .find(|a| a.measure_name.as_deref() == Some(measure_name.as_str()) && a.pivot_value == *pivot_value)
            .map(|a| a.alias.clone())
            .unwrap_or_else(|| measure_name.clone()),
    }
}

/// One plotted line family: a measure, or one dimension value of a measure
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesEntry {
    pub schema_name: Option<String>,
    pub query_name: Option<String>,
    pub name: String,
    pub label: String,
    pub measure_index: usize,
    pub y_axis_side: AxisSide,
    pub alias_lookup: AliasLookup,
}

impl SeriesEntry {
    /// Layer name; duplicate series names are qualified by measure and pivot value
    fn layer_name(&self, qualify: bool) -> String {
        if !qualify {
            return self.name.clone();
        }
        match &self.alias_lookup {
            AliasLookup::Measure { measure_name, pivot_value: Some(pivot) } => format!("{} {}", measure_name, pivot),
            AliasLookup::Measure { measure_name, pivot_value: None } => measure_name.clone(),
            AliasLookup::Alias(alias) | AliasLookup::Column(alias) => alias.clone(),
        }
    }
}

pub fn generate_series_list(measures: &[TimeMeasure]) -> Vec<SeriesEntry> {
    let mut series = Vec::new();
    for (idx, tm) in measures.iter().enumerate() {
        let measure = &tm.measure;
        match &tm.dimension {
            Some(dim) if !dim.values.is_empty() => {
                for value in &dim.values {
                    series.push(SeriesEntry {
                        schema_name: dim.schema_name.clone(),
                        query_name: dim.query_name.clone(),
                        name: value.clone(),
                        label: value.clone(),
                        measure_index: idx,
                        y_axis_side: measure.side(),
                        alias_lookup: AliasLookup::Measure {
                            measure_name: measure.name.clone(),
                            pivot_value: Some(value.clone()),
                        },
                    });
                }
            }
            _ => series.push(SeriesEntry {
                schema_name: measure.schema_name.clone(),
                query_name: measure.query_name.clone(),
                name: measure.name.clone(),
                label: measure.display_label().to_string(),
                measure_index: idx,
                y_axis_side: measure.side(),
                alias_lookup: match &measure.alias {
                    Some(alias) => AliasLookup::Alias(alias.clone()),
                    None => AliasLookup::Measure { measure_name: measure.name.clone(), pivot_value: None },
                },
            }),
        }
    }
    series
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitInfo {
    pub display_order: usize,
    pub display_name: String,
}

/// One time chart data response (individual or aggregate)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeChartResponse {
    pub store: MeasureStore,
    pub column_aliases: Vec<ColumnAlias>,
    pub visit_map: IndexMap<String, VisitInfo>,
    /// Whether any row has a value, keyed by resolved column alias
    pub has_data: IndexMap<String, bool>,
}

impl TimeChartResponse {
    pub fn new(store: MeasureStore, column_aliases: Vec<ColumnAlias>) -> Self {
        Self { store, column_aliases, ..Default::default() }
    }

    /// Parse `{"metaData": .., "rows": .., "columnAliases": [..], "visitMap": {..}}`
    pub fn from_json(value: &Value) -> Result<Self> {
        let store = MeasureStore::from_json(value)?;
        let column_aliases = match value.get("columnAliases") {
            Some(v) => serde_json::from_value(v.clone()).context("Failed to parse columnAliases")?,
            None => Vec::new(),
        };
        let visit_map = match value.get("visitMap") {
            Some(v) => serde_json::from_value(v.clone()).context("Failed to parse visitMap")?,
            None => IndexMap::new(),
        };
        Ok(Self { store, column_aliases, visit_map, has_data: IndexMap::new() })
    }

    pub fn rows(&self) -> &[Row] {
        &self.store.rows
    }

    pub fn alias(&self, lookup: &AliasLookup) -> String {
        get_column_alias(&self.column_aliases, lookup)
    }

    pub fn series_has_data(&self, series: &SeriesEntry) -> bool {
        self.has_data.get(&self.alias(&series.alias_lookup)).copied().unwrap_or(false)
    }
}

/// Per-side y tick formatters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NumberFormats {
    pub left: Option<TickFormat>,
    pub right: Option<TickFormat>,
}

/// Processed responses for one render
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChartData {
    pub individual: Option<TimeChartResponse>,
    pub aggregate: Option<TimeChartResponse>,
    pub has_interval_data: bool,
    pub number_formats: NumberFormats,
}

impl ChartData {
    fn primary(&self) -> Option<&TimeChartResponse> {
        self.individual.as_ref().or(self.aggregate.as_ref())
    }

    pub fn visit_map(&self) -> IndexMap<String, VisitInfo> {
        self.primary().map(|r| r.visit_map.clone()).unwrap_or_default()
    }

    pub fn series_has_data(&self, series: &SeriesEntry) -> bool {
        self.individual.as_ref().is_some_and(|r| r.series_has_data(series))
            || self.aggregate.as_ref().is_some_and(|r| r.series_has_data(series))
    }
}

/// Keep only visits present in the data, renumbering display order from 1
pub fn trim_visit_map(
    visit_map: &IndexMap<String, VisitInfo>,
    visits_in_data: &IndexSet<String>,
) -> IndexMap<String, VisitInfo> {
    let mut kept: Vec<(String, VisitInfo)> = visit_map
        .iter()
        .filter(|(id, _)| visits_in_data.contains(*id))
        .map(|(id, info)| (id.clone(), info.clone()))
        .collect();
    kept.sort_by_key(|(_, info)| info.display_order);
    kept.into_iter()
        .enumerate()
        .map(|(idx, (id, mut info))| {
            info.display_order = idx + 1;
            (id, info)
        })
        .collect()
}

/// Fill in per-series data flags and trim the visit map of one response
pub fn process_response(config: &TimeChartConfig, series_list: &[SeriesEntry], response: &mut TimeChartResponse) {
    for series in series_list {
        let column = response.alias(&series.alias_lookup);
        let has_data = response
            .rows()
            .iter()
            .any(|row| !get_cell_value(row, &column, ValueVariant::Value).is_missing());
        response.has_data.insert(column, has_data);
    }

    if config.is_visit_based() {
        let visit_column = response.alias(&AliasLookup::Column(config.study.visit_column()));
        let visits_in_data: IndexSet<String> = response
            .rows()
            .iter()
            .map(|row| get_cell_value(row, &visit_column, ValueVariant::Value))
            .filter(|v| !v.is_missing())
            .map(|v| v.to_string())
            .collect();
        response.visit_map = trim_visit_map(&response.visit_map, &visits_in_data);
    }
}

fn number_format_for(
    side: AxisSide,
    series_list: &[SeriesEntry],
    response: &TimeChartResponse,
    default_number_format: Option<&str>,
) -> Option<TickFormat> {
    let series = series_list.iter().find(|s| s.y_axis_side == side)?;
    let column = response.alias(&series.alias_lookup);
    Some(tick_format_for(response.store.field(&column), default_number_format))
}

/// Combine the individual and aggregate responses into the data a render works from
pub fn build_chart_data(
    config: &TimeChartConfig,
    series_list: &[SeriesEntry],
    mut individual: Option<TimeChartResponse>,
    mut aggregate: Option<TimeChartResponse>,
    default_number_format: Option<&str>,
) -> Result<ChartData> {
    if individual.is_none() && aggregate.is_none() {
        bail!("Time chart data requires an individual or an aggregate response");
    }
    for response in individual.iter_mut().chain(aggregate.iter_mut()) {
        process_response(config, series_list, response);
    }

    let mut data = ChartData { individual, aggregate, has_interval_data: true, ..Default::default() };
    data.number_formats = data
        .primary()
        .map(|primary| NumberFormats {
            left: number_format_for(AxisSide::Left, series_list, primary, default_number_format),
            right: number_format_for(AxisSide::Right, series_list, primary, default_number_format),
        })
        .unwrap_or_default();

    if !config.is_visit_based() {
        let interval = interval_column(config);
        data.has_interval_data = data
            .individual
            .iter()
            .chain(data.aggregate.iter())
            .flat_map(|r| r.rows())
            .any(|row| !get_cell_value(row, &interval, ValueVariant::Value).is_missing());
    }
    Ok(data)
}

// =============================================================================
// Chart pieces
// =============================================================================

/// Index of the axis with this name (and side, for y axes)
pub fn get_axis_index(axes: &[TimeAxis], name: AxisName, side: Option<AxisSide>) -> Option<usize> {
    axes.iter().position(|axis| {
        axis.name == name
            && match (name, side) {
                (AxisName::YAxis, Some(side)) => axis.side.unwrap_or_default() == side,
                _ => true,
            }
    })
}

fn find_axis(axes: &[TimeAxis], name: AxisName, side: Option<AxisSide>) -> Option<&TimeAxis> {
    get_axis_index(axes, name, side).map(|idx| &axes[idx])
}

pub fn generate_labels(main_title: &str, axes: &[TimeAxis]) -> PlotLabels {
    let mut labels = PlotLabels { main: Some(main_title.to_string()), ..Default::default() };
    for axis in axes {
        let label = Some(axis.label.clone());
        match (axis.name, axis.side.unwrap_or_default()) {
            (AxisName::XAxis, _) => labels.x = label,
            (AxisName::YAxis, AxisSide::Left) => labels.y_left = label,
            (AxisName::YAxis, AxisSide::Right) => labels.y_right = label,
        }
    }
    labels
}

fn continuous_scale(axis: Option<&TimeAxis>, tick_format: Option<TickFormat>) -> ScaleDescriptor {
    let mut scale = ScaleDescriptor::continuous(axis.and_then(|a| a.scale).unwrap_or_default());
    scale.domain = axis.and_then(|a| a.range.domain());
    scale.tick_format = tick_format;
    scale
}

/// Scales for every time chart panel: x, both y sides, and a discrete shape scale.
pub fn generate_scales(
    config: &TimeChartConfig,
    tick_map: &IndexMap<String, String>,
    number_formats: &NumberFormats,
) -> Result<Scales> {
    if config.measures.is_empty() {
        bail!("There must be at least one specified measure in the chartInfo config!");
    }

    let x_format = config.is_visit_based().then(|| TickFormat::Lookup(tick_map.clone()));
    let mut scales = Scales::default();
    scales.insert(Channel::X, continuous_scale(find_axis(&config.axis, AxisName::XAxis, None), x_format));
    scales.insert(
        Channel::YLeft,
        continuous_scale(
            find_axis(&config.axis, AxisName::YAxis, Some(AxisSide::Left)),
            number_formats.left.clone(),
        ),
    );
    scales.insert(
        Channel::YRight,
        continuous_scale(
            find_axis(&config.axis, AxisName::YAxis, Some(AxisSide::Right)),
            number_formats.right.clone(),
        ),
    );
    scales.insert(Channel::Shape, ScaleDescriptor::discrete());
    Ok(scales)
}

fn interval_column(config: &TimeChartConfig) -> String {
    config
        .measures
        .first()
        .and_then(|m| m.date_options.as_ref())
        .map(|d| d.interval.clone())
        .unwrap_or_else(default_interval)
}

/// Column holding the x value: the date interval, or the visit alias
pub fn generate_interval_key(config: &TimeChartConfig, aliases: &[ColumnAlias]) -> Result<String> {
    if config.measures.is_empty() {
        bail!("There must be at least one specified measure in the chartInfo config!");
    }
    if !config.display_individual && !config.display_aggregate {
        bail!("We expect to either be displaying individual series lines or aggregate data!");
    }
    Ok(if config.is_visit_based() {
        get_column_alias(aliases, &AliasLookup::Column(config.study.visit_column()))
    } else {
        interval_column(config)
    })
}

/// Display order → visit label, for visit-based x ticks
pub fn generate_tick_map(visit_map: &IndexMap<String, VisitInfo>) -> IndexMap<String, String> {
    visit_map
        .values()
        .map(|info| (info.display_order.to_string(), info.display_name.clone()))
        .collect()
}

fn time_x_accessor(config: &TimeChartConfig, visit_map: &IndexMap<String, VisitInfo>, interval_key: &str) -> Accessor {
    if config.is_visit_based() {
        Accessor::VisitOrder {
            column: interval_key.to_string(),
            visit_map: visit_map.iter().map(|(id, info)| (id.clone(), info.display_order)).collect(),
        }
    } else {
        Accessor::continuous(interval_key)
    }
}

pub fn generate_aes(
    config: &TimeChartConfig,
    visit_map: &IndexMap<String, VisitInfo>,
    interval_key: &str,
    subject_column: &str,
) -> Aes {
    let subject = Accessor::Raw { column: subject_column.to_string(), variant: ValueVariant::Value };
    let mut aes = Aes::new();
    aes.insert(Channel::X, time_x_accessor(config, visit_map, interval_key));
    aes.insert(Channel::Color, subject.clone());
    aes.insert(Channel::Group, subject.clone());
    aes.insert(Channel::Shape, subject);
    aes
}

fn time_y_channel(side: AxisSide) -> Channel {
    match side {
        AxisSide::Left => Channel::YLeft,
        AxisSide::Right => Channel::YRight,
    }
}

/// Inputs to layer generation for one panel
pub struct LayerInputs<'a> {
    pub visit_map: &'a IndexMap<String, VisitInfo>,
    pub interval_key: &'a str,
    /// Present when the panel draws individual lines
    pub individual_aliases: Option<&'a [ColumnAlias]>,
    /// Present when the panel draws aggregate lines
    pub aggregate_aliases: Option<&'a [ColumnAlias]>,
    pub aggregate_rows: Option<&'a [Row]>,
    pub subject_column: &'a str,
}

fn interval_hover(config: &TimeChartConfig, inputs: &LayerInputs) -> (Option<String>, Accessor) {
    if config.is_visit_based() {
        let labels = inputs.visit_map.iter().map(|(id, info)| (id.clone(), info.display_name.clone())).collect();
        (None, Accessor::VisitLabel { column: inputs.interval_key.to_string(), labels })
    } else {
        let column = inputs.interval_key.to_string();
        (Some(column.clone()), Accessor::Raw { column, variant: ValueVariant::Value })
    }
}

fn point_click(
    config: &TimeChartConfig,
    series: &SeriesEntry,
    subject_key: &str,
    subject_column: &str,
    interval_key: &str,
    measure_column: &str,
) -> Option<PointClickBinding> {
    let handler = config.point_click_fn.clone()?;
    let mut column_map = IndexMap::new();
    column_map.insert(subject_key.to_string(), subject_column.to_string());
    column_map.insert("interval".to_string(), interval_key.to_string());
    column_map.insert("measure".to_string(), measure_column.to_string());
    Some(PointClickBinding {
        handler,
        column_map,
        measure_info: MeasureInfo {
            schema_name: series.schema_name.clone().unwrap_or_default(),
            query_name: series.query_name.clone().unwrap_or_default(),
            name: Some(series.name.clone()),
        },
    })
}

/// Path, error bar and point layers for every series.
///
/// Series are drawn in reverse so the first series ends up on top.
pub fn generate_layers(config: &TimeChartConfig, series_list: &[SeriesEntry], inputs: &LayerInputs) -> Vec<LayerConfig> {
    let mut seen = IndexSet::new();
    let has_duplicates = series_list.iter().any(|s| !seen.insert(s.name.as_str()));
    let named = series_list.len() > 1;
    let (interval_label, interval) = interval_hover(config, inputs);
    let mut layers = Vec::new();

    for series in series_list.iter().rev() {
        let name = series.layer_name(has_duplicates);
        let layer_name = named.then(|| name.clone());
        let channel = time_y_channel(series.y_axis_side);

        if let Some(aliases) = inputs.individual_aliases.filter(|_| config.display_individual) {
            let column = get_column_alias(aliases, &series.alias_lookup);
            let mut aes = Aes::new();
            aes.insert(channel, Accessor::ParsedNumber { column: column.clone() });
            layers.push(LayerConfig {
                name: layer_name.clone(),
                geom: Geom::Path { size: config.line_width, opacity: 1.0, color: None },
                aes: aes.clone(),
                data: None,
                point_click: None,
            });

            if !config.hide_data_points {
                aes.insert(
                    Channel::HoverText,
                    Accessor::TimeHover(TimeHover {
                        subject_column: inputs.subject_column.to_string(),
                        interval_label: interval_label.clone(),
                        interval: Box::new(interval.clone()),
                        series_name: name.clone(),
                        value_column: column.clone(),
                        error: None,
                    }),
                );
                layers.push(LayerConfig {
                    name: layer_name.clone(),
                    geom: Geom::Point { size: 5.0, opacity: 1.0, color: None, jitter: false },
                    aes,
                    data: None,
                    point_click: point_click(
                        config,
                        series,
                        "participant",
                        inputs.subject_column,
                        inputs.interval_key,
                        &column,
                    ),
                });
            }
        }

        if let Some(aliases) = inputs.aggregate_aliases.filter(|_| config.display_aggregate) {
            let column = get_column_alias(aliases, &series.alias_lookup);
            let error_column = config.error_bars.suffix().map(|suffix| format!("{}{}", column, suffix));
            let data = inputs.aggregate_rows.map(<[Row]>::to_vec);
            let group = Accessor::Raw { column: AGGREGATE_SUBJECT_COLUMN.to_string(), variant: ValueVariant::DisplayValue };

            let mut aes = Aes::new();
            aes.insert(channel, Accessor::ParsedNumber { column: column.clone() });
            aes.insert(Channel::Group, group.clone());
            aes.insert(Channel::Color, group.clone());
            aes.insert(Channel::Shape, group);
            if let Some(error_column) = &error_column {
                aes.insert(Channel::Error, Accessor::Raw { column: error_column.clone(), variant: ValueVariant::Value });
            }

            layers.push(LayerConfig {
                name: layer_name.clone(),
                geom: Geom::Path { size: config.line_width, opacity: 1.0, color: None },
                aes: aes.clone(),
                data: data.clone(),
                point_click: None,
            });
            if error_column.is_some() {
                layers.push(LayerConfig {
                    name: layer_name.clone(),
                    geom: Geom::ErrorBar,
                    aes: aes.clone(),
                    data: data.clone(),
                    point_click: None,
                });
            }
            if !config.hide_data_points {
                aes.insert(
                    Channel::HoverText,
                    Accessor::TimeHover(TimeHover {
                        subject_column: AGGREGATE_SUBJECT_COLUMN.to_string(),
                        interval_label: interval_label.clone(),
                        interval: Box::new(interval.clone()),
                        series_name: name.clone(),
                        value_column: column.clone(),
                        error: error_column.map(|column| ErrorHover { label: config.error_bars.label().to_string(), column }),
                    }),
                );
                layers.push(LayerConfig {
                    name: layer_name,
                    geom: Geom::Point { size: 5.0, opacity: 1.0, color: None, jitter: false },
                    aes,
                    data,
                    point_click: point_click(
                        config,
                        series,
                        "group",
                        AGGREGATE_SUBJECT_COLUMN,
                        inputs.interval_key,
                        &column,
                    ),
                });
            }
        }
    }
    layers
}

/// Whether any axis has a user-set bound, so points outside it must be clipped
pub fn generate_apply_clip_rect(config: &TimeChartConfig) -> bool {
    [
        find_axis(&config.axis, AxisName::XAxis, None),
        find_axis(&config.axis, AxisName::YAxis, Some(AxisSide::Left)),
        find_axis(&config.axis, AxisName::YAxis, Some(AxisSide::Right)),
    ]
    .into_iter()
    .flatten()
    .any(|axis| axis.range.min.is_some() || axis.range.max.is_some())
}

/// Share axis ranges across the panels of a multi-chart layout.
///
/// Each y side spans the union of its series, widened by the error bars of aggregate
/// rows. Only unset bounds are filled and `automatic_per_chart` axes are left alone.
pub fn generate_across_chart_axis_ranges(
    config: &mut TimeChartConfig,
    data: &ChartData,
    series_list: &[SeriesEntry],
    x: &Accessor,
) {
    if config.chart_layout == ChartLayout::Single {
        return;
    }
    let (response, aggregate_source) = match (&data.individual, &data.aggregate) {
        (Some(individual), _) => (individual, false),
        (None, Some(aggregate)) => (aggregate, true),
        (None, None) => return,
    };
    let error_suffix = if aggregate_source { config.error_bars.suffix() } else { None };
    let rows = response.rows();

    for axis in config.axis.iter_mut() {
        if axis.range.range_type == RangeType::AutomaticPerChart {
            continue;
        }
        let mut extent = Extent::default();
        match axis.name {
            AxisName::XAxis => {
                for row in rows {
                    if let Some(v) = x.eval(row).to_f64_lenient() {
                        extent.include(v);
                    }
                }
            }
            AxisName::YAxis => {
                let side = axis.side.unwrap_or_default();
                for series in series_list.iter().filter(|s| s.y_axis_side == side) {
                    let column = response.alias(&series.alias_lookup);
                    for row in rows {
                        let Some(value) = get_cell_value(row, &column, ValueVariant::Value).to_f64_lenient() else {
                            continue;
                        };
                        let error = error_suffix
                            .and_then(|suffix| {
                                get_cell_value(row, &format!("{}{}", column, suffix), ValueVariant::Value)
                                    .to_f64_lenient()
                            })
                            .unwrap_or(0.0);
                        extent.include(value - error);
                        extent.include(value + error);
                    }
                }
            }
        }
        if extent.is_empty() {
            continue;
        }
        axis.range.min.get_or_insert(extent.min);
        axis.range.max.get_or_insert(extent.max);
    }
}

/// Rows of one bucket and whether any of them carries a series value
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeriesGroup {
    pub rows: Vec<Row>,
    pub has_series_data: bool,
}

/// Bucket rows by the key accessor, flagging buckets with at least one series value
pub fn get_data_with_series_check(
    rows: &[Row],
    key: &Accessor,
    series_list: &[SeriesEntry],
    aliases: &[ColumnAlias],
) -> IndexMap<String, SeriesGroup> {
    let columns: Vec<String> = series_list.iter().map(|s| get_column_alias(aliases, &s.alias_lookup)).collect();
    let mut groups: IndexMap<String, SeriesGroup> = IndexMap::new();
    for row in rows {
        let value = key.eval(row);
        if value.is_missing() {
            continue;
        }
        let group = groups.entry(value.to_string()).or_default();
        if !group.has_series_data {
            group.has_series_data = columns
                .iter()
                .any(|c| !get_cell_value(row, c, ValueVariant::Value).is_missing());
        }
        group.rows.push(row.clone());
    }
    groups
}

/// One panel to draw
#[derive(Debug, Clone, PartialEq)]
pub struct PlotInfo {
    pub title: String,
    pub series: Vec<SeriesEntry>,
    pub individual: Option<Vec<Row>>,
    pub aggregate: Option<Vec<Row>>,
    pub height: u32,
    pub apply_clip_rect: bool,
}

fn chart_title(main: &str, sub: &str) -> String {
    if main.is_empty() { sub.to_string() } else { format!("{}: {}", main, sub) }
}

/// Split the chart into panels according to the layout.
///
/// Buckets without any series data are skipped. The second value is the
/// truncation warning when more than `max_charts` panels remain.
pub fn generate_plot_configs(
    config: &TimeChartConfig,
    data: &ChartData,
    series_list: &[SeriesEntry],
    apply_clip_rect: bool,
    max_charts: usize,
    subject_column: &str,
) -> Result<(Vec<PlotInfo>, Option<String>)> {
    let individual_rows = data.individual.as_ref().map(|r| r.rows().to_vec());
    let aggregate_rows = data.aggregate.as_ref().map(|r| r.rows().to_vec());
    let panel = |title: String, series: Vec<SeriesEntry>, individual: Option<Vec<Row>>, aggregate: Option<Vec<Row>>| {
        PlotInfo { title, series, individual, aggregate, height: MULTI_CHART_HEIGHT, apply_clip_rect }
    };

    let mut plots = Vec::new();
    match config.chart_layout {
        ChartLayout::Single => plots.push(PlotInfo {
            title: config.title.clone(),
            series: series_list.to_vec(),
            individual: individual_rows,
            aggregate: aggregate_rows,
            height: SINGLE_CHART_HEIGHT,
            apply_clip_rect,
        }),
        ChartLayout::PerSubject => {
            let Some(individual) = &data.individual else {
                bail!("One chart per {} requires individual data", config.study.subject_noun_singular.to_lowercase());
            };
            let key = Accessor::Raw { column: subject_column.to_string(), variant: ValueVariant::Value };
            let mut groups = get_data_with_series_check(individual.rows(), &key, series_list, &individual.column_aliases);
            for subject in &config.subject.values {
                match groups.shift_remove(subject) {
                    Some(group) if group.has_series_data => plots.push(panel(
                        chart_title(&config.title, subject),
                        series_list.to_vec(),
                        Some(group.rows),
                        None,
                    )),
                    _ => debug!(%subject, "skipping subject without series data"),
                }
            }
        }
        ChartLayout::PerGroup => {
            let mut aggregate_groups = match &data.aggregate {
                Some(aggregate) => {
                    let key = Accessor::Raw {
                        column: AGGREGATE_SUBJECT_COLUMN.to_string(),
                        variant: ValueVariant::DisplayValue,
                    };
                    get_data_with_series_check(aggregate.rows(), &key, series_list, &aggregate.column_aliases)
                }
                None => IndexMap::new(),
            };
            for group in &config.subject.groups {
                let individual = data.individual.as_ref().map(|response| {
                    let key = Accessor::Raw { column: subject_column.to_string(), variant: ValueVariant::Value };
                    let members: Vec<Row> = response
                        .rows()
                        .iter()
                        .filter(|row| group.participant_ids.contains(&key.eval(row).to_string()))
                        .cloned()
                        .collect();
                    let checked = get_data_with_series_check(&members, &key, series_list, &response.column_aliases);
                    let has_data = checked.values().any(|g| g.has_series_data);
                    (members, has_data)
                });
                let aggregate = aggregate_groups.shift_remove(&group.label);

                let individual_ok = individual.as_ref().is_some_and(|(_, has)| *has);
                let aggregate_ok = aggregate.as_ref().is_some_and(|g| g.has_series_data);
                if !individual_ok && !aggregate_ok {
                    debug!(group = %group.label, "skipping group without series data");
                    continue;
                }
                plots.push(panel(
                    chart_title(&config.title, &group.label),
                    series_list.to_vec(),
                    individual.map(|(rows, _)| rows),
                    aggregate.map(|g| g.rows),
                ));
            }
        }
        ChartLayout::PerDimension | ChartLayout::PerMeasure => {
            for series in series_list {
                if !data.series_has_data(series) {
                    debug!(series = %series.name, "skipping series without data");
                    continue;
                }
                plots.push(panel(
                    chart_title(&config.title, &series.label),
                    vec![series.clone()],
                    individual_rows.clone(),
                    aggregate_rows.clone(),
                ));
            }
        }
    }

    Ok(cap_charts(plots, max_charts))
}

// =============================================================================
// Validation
// =============================================================================

pub fn validate_chart_config(config: &TimeChartConfig) -> Validation {
    if config.measures.is_empty() {
        return Validation::fatal(FatalKind::InvalidConfig, "No measure selected. Please select at least one measure.");
    }
    if get_axis_index(&config.axis, AxisName::XAxis, None).is_none() {
        return Validation::fatal(FatalKind::InvalidConfig, "Could not find x-axis in chart measure information.");
    }
    match config.chart_subject_selection {
        SubjectSelection::Subjects if config.subject.values.is_empty() => {
            let noun = config.study.subject_noun_singular.to_lowercase();
            return Validation::fatal(FatalKind::InvalidConfig, format!("No {noun} selected. Please select at least one {noun}."));
        }
        SubjectSelection::Groups if config.subject.groups.is_empty() => {
            return Validation::fatal(FatalKind::InvalidConfig, "No group selected. Please select at least one group.");
        }
        _ => {}
    }
    if generate_series_list(&config.measures).is_empty() {
        return Validation::fatal(
            FatalKind::InvalidConfig,
            "No series or dimension selected. Please select at least one series/dimension value.",
        );
    }
    if !config.display_individual && !config.display_aggregate {
        return Validation::fatal(FatalKind::InvalidConfig, "Please select either \"Show Individual Lines\" or \"Show Mean\".");
    }
    Validation::ok()
}

/// Check processed data. Messages are joined one per line.
pub fn validate_chart_data(data: &ChartData, series_list: &[SeriesEntry], limit: usize) -> Validation {
    let mut messages = Vec::new();
    let mut success = true;

    let at_limit = data.individual.iter().chain(data.aggregate.iter()).any(|r| r.rows().len() == limit);
    if at_limit {
        messages.push("The data limit for plotting has been reached. Consider filtering your data.".to_string());
    }

    if !data.has_interval_data {
        success = false;
        messages.push(
            "No calculated interval values (i.e. Days, Months, etc.) for the selected 'Measure Date' and 'Interval Start Date'."
                .to_string(),
        );
    }

    let missing: Vec<&str> = series_list
        .iter()
        .filter(|s| !data.series_has_data(s))
        .map(|s| s.label.as_str())
        .collect();
    if !missing.is_empty() {
        if missing.len() == series_list.len() {
            success = false;
        }
        messages.push(format!("No data found for the following measures/dimensions: {}", missing.join(", ")));
    }

    Validation {
        success,
        message: (!messages.is_empty()).then(|| messages.join("\n")),
        kind: (!success).then_some(FatalKind::NoData),
    }
}

fn time_chart_margins(series_list: &[SeriesEntry]) -> Margins {
    let has_right = series_list.iter().any(|s| s.y_axis_side == AxisSide::Right);
    Margins {
        top: Some(75.0),
        right: Some(if has_right { 75.0 } else { 25.0 }),
        bottom: Some(50.0),
        left: Some(75.0),
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Run the time chart pipeline over already-fetched responses.
///
/// Fatal conditions come back as a [`ChartError`] inside the `anyhow::Error`.
pub fn render_time_chart(
    config: &TimeChartConfig,
    individual: Option<TimeChartResponse>,
    aggregate: Option<TimeChartResponse>,
    options: &RenderOptions,
    callbacks: &CallbackRegistry,
) -> Result<RenderOutcome> {
    if let Some(err) = ChartError::from_validation(&validate_chart_config(config)) {
        return Err(err.into());
    }

    let series_list = generate_series_list(&config.measures);
    let individual = individual.filter(|_| config.display_individual);
    let aggregate = aggregate.filter(|_| config.display_aggregate);
    let data = build_chart_data(
        config,
        &series_list,
        individual,
        aggregate,
        options.default_number_format.as_deref(),
    )
    .map_err(|err| ChartError::NoData(err.to_string()))?;

    let mut warnings = Vec::new();
    let validation = validate_chart_data(&data, &series_list, options.defaults.data_limit);
    if let Some(err) = ChartError::from_validation(&validation) {
        return Err(err.into());
    }
    warnings.extend(validation.message.iter().flat_map(|m| m.lines()).map(str::to_string));

    let primary = data.primary().map(|r| r.column_aliases.clone()).unwrap_or_default();
    let interval_key =
        generate_interval_key(config, &primary).map_err(|err| ChartError::InvalidConfig(err.to_string()))?;
    let subject_column = match &data.individual {
        Some(individual) => individual.alias(&AliasLookup::Column(config.study.subject_column.clone())),
        None => AGGREGATE_SUBJECT_COLUMN.to_string(),
    };
    let visit_map = data.visit_map();
    let tick_map = generate_tick_map(&visit_map);

    let mut config = config.clone();
    if let Some(name) = &config.point_click_fn {
        if !callbacks.contains(name) {
            warn!(handler = %name, "point click handler is not registered");
            warnings.push(format!("The point click handler {} is not registered and will be ignored.", name));
            config.point_click_fn = None;
        }
    }

    let apply_clip_rect = generate_apply_clip_rect(&config);
    let aes = generate_aes(&config, &visit_map, &interval_key, &subject_column);
    if let Some(x) = aes.get(Channel::X) {
        generate_across_chart_axis_ranges(&mut config, &data, &series_list, x);
    }
    let scales = generate_scales(&config, &tick_map, &data.number_formats)?;

    let (infos, truncated) = generate_plot_configs(
        &config,
        &data,
        &series_list,
        apply_clip_rect,
        options.defaults.max_charts,
        &subject_column,
    )?;
    if let Some(message) = truncated {
        warn!(max_charts = options.defaults.max_charts, "time chart panels truncated");
        warnings.push(message);
    }

    let multiple = infos.len() > 1;
    let mut plots = Vec::with_capacity(infos.len());
    for (idx, info) in infos.into_iter().enumerate() {
        let inputs = LayerInputs {
            visit_map: &visit_map,
            interval_key: &interval_key,
            individual_aliases: info
                .individual
                .as_ref()
                .and(data.individual.as_ref())
                .map(|r| r.column_aliases.as_slice()),
            aggregate_aliases: info
                .aggregate
                .as_ref()
                .and(data.aggregate.as_ref())
                .map(|r| r.column_aliases.as_slice()),
            aggregate_rows: info.aggregate.as_deref(),
            subject_column: &subject_column,
        };
        let layers = generate_layers(&config, &info.series, &inputs);
        plots.push(PlotConfig {
            render_to: if multiple { format!("{}-{}", options.render_to, idx) } else { options.render_to.clone() },
            render_type: RenderType::TimeChart,
            width: options.defaults.width,
            height: info.height,
            labels: generate_labels(&info.title, &config.axis),
            layers,
            aes: aes.clone(),
            scales: scales.clone(),
            data: PlotData::Rows(info.individual.unwrap_or_default()),
            margins: time_chart_margins(&info.series),
            options: None,
            box_summaries: Vec::new(),
            clip_rect: info.apply_clip_rect,
            point_click_handler: config.point_click_fn.clone(),
        });
    }

    info!(plots = plots.len(), warnings = warnings.len(), "time chart ready");
    Ok(RenderOutcome { chart_type: RenderType::TimeChart, plots, warnings })
}
