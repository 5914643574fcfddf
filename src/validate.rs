use crate::aes::{Accessor, Aes};
use crate::data::{AesValue, MeasureStore, Row};
use crate::ir::{y_channel, Channel, Measure, Measures, RenderType, Trans};
use crate::ir::Scales;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::warn;

/// Why a validation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    MissingMeasure,
    AllNull,
    NoData,
    InvalidConfig,
}

/// Outcome of one validation check.
///
/// `success == false` is fatal and `kind` says why. A successful result may still
/// carry a warning message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Validation {
    pub success: bool,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FatalKind>,
}

impl Validation {
    pub fn ok() -> Self {
        Self { success: true, message: None, kind: None }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { success: true, message: Some(message.into()), kind: None }
    }

    pub fn fatal(kind: FatalKind, message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()), kind: Some(kind) }
    }
}

#[derive(Default)]
struct ChannelScan {
    all_undefined: bool,
    all_null: bool,
    has_negative: bool,
    has_zero: bool,
}

fn scan_channel(aes: &Aes, channel: Channel, rows: &[Row]) -> ChannelScan {
    let mut scan = ChannelScan { all_undefined: true, all_null: true, ..Default::default() };
    for row in rows {
        let value = aes.eval(channel, row);
        if !value.is_undefined() {
            scan.all_undefined = false;
        }
        if !value.is_null() {
            scan.all_null = false;
        }
        match value {
            AesValue::Number(n) if n == 0.0 => scan.has_zero = true,
            v => {
                if v.to_f64_lenient().is_some_and(|n| n < 0.0) {
                    scan.has_negative = true;
                }
            }
        }
    }
    scan
}

impl ChannelScan {
    fn merge(&mut self, other: &ChannelScan) {
        self.has_negative |= other.has_negative;
        self.has_zero |= other.has_zero;
    }
}

/// How a log scale was repaired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogRepair {
    Keep,
    Revert,
    Shift,
}

/// Fatal checks on one channel's values: missing measure, then all null
fn check_presence(
    chart_type: RenderType,
    measure: &Measure,
    channel: Channel,
    scan: &ChannelScan,
    conversion_happened: bool,
) -> Option<Validation> {
    let label = measure.display_label();
    if scan.all_undefined {
        return Some(Validation::fatal(
            FatalKind::MissingMeasure,
            format!("The measure {} was not found. It may have been renamed or removed.", label),
        ));
    }

    let is_y = matches!(channel, Channel::Y | Channel::YLeft | Channel::YRight);
    let point_chart = matches!(chart_type, RenderType::ScatterPlot | RenderType::LinePlot);
    if (point_chart || is_y) && scan.all_null && !conversion_happened {
        return Some(Validation::fatal(
            FatalKind::AllNull,
            format!("All data values for {} are null. Please choose a different measure or review your data.", label),
        ));
    }
    None
}

/// Decide how a log scale survives the scanned values. Aggregated charts plot
/// aggregates rather than row values, so zeros there are left alone.
fn repair_log_scale(
    chart_type: RenderType,
    channel: Channel,
    scan: &ChannelScan,
    scales: &mut Scales,
) -> (LogRepair, Validation) {
    let axis = channel.axis_name();
    let Some(scale) = scales.get_mut(channel) else { return (LogRepair::Keep, Validation::ok()) };
    if scale.trans != Trans::Log {
        return (LogRepair::Keep, Validation::ok());
    }

    if scan.has_negative {
        warn!(%channel, "negative values on log scale, reverting to linear");
        scale.trans = Trans::Linear;
        return (
            LogRepair::Revert,
            Validation::warning(format!(
                "Unable to use a log scale on the {axis}-axis. All {axis}-axis values must be >= 0. Reverting to linear scale on {axis}-axis."
            )),
        );
    }

    if scan.has_zero && !chart_type.is_aggregated() {
        return (
            LogRepair::Shift,
            Validation::warning(format!("Some {axis}-axis values are 0. Plotting all {axis}-axis values as value+1.")),
        );
    }

    (LogRepair::Keep, Validation::ok())
}

/// Check one axis measure against the data, repairing log scales where possible.
///
/// A log scale over negative values is reverted to linear. A log scale over zeros keeps
/// its transform and the channel's accessor is shifted by one instead.
pub fn validate_axis_measure(
    chart_type: RenderType,
    measure: &Measure,
    channel: Channel,
    aes: &mut Aes,
    scales: &mut Scales,
    rows: &[Row],
    conversion_happened: bool,
) -> Validation {
    if rows.is_empty() {
        return Validation::ok();
    }

    let scan = scan_channel(aes, channel, rows);
    if let Some(fatal) = check_presence(chart_type, measure, channel, &scan, conversion_happened) {
        return fatal;
    }

    let (repair, validation) = repair_log_scale(chart_type, channel, &scan, scales);
    if repair == LogRepair::Shift {
        if let Some(acc) = aes.remove(channel) {
            aes.insert(channel, acc.shifted(1.0));
        }
    }
    validation
}

/// Check every y measure of a multi-measure chart.
///
/// Each measure gets its own presence checks. The log repair is decided once per
/// axis side over all measures drawn on it, so measures sharing a scale are
/// either all shifted or none are. The first fatal result stops the scan.
pub fn validate_y_layers(
    chart_type: RenderType,
    measures: &[Measure],
    accessors: &mut [Accessor],
    scales: &mut Scales,
    rows: &[Row],
    conversion_happened: bool,
) -> Vec<Validation> {
    if rows.is_empty() {
        return Vec::new();
    }

    let mut sides: IndexMap<Channel, ChannelScan> = IndexMap::new();
    for (measure, accessor) in measures.iter().zip(accessors.iter()) {
        let channel = y_channel(measure.side());
        let mut layer_aes = Aes::new();
        layer_aes.insert(channel, accessor.clone());
        let scan = scan_channel(&layer_aes, channel, rows);
        if let Some(fatal) = check_presence(chart_type, measure, channel, &scan, conversion_happened) {
            return vec![fatal];
        }
        sides.entry(channel).or_default().merge(&scan);
    }

    let mut results = Vec::new();
    for (channel, scan) in &sides {
        let (repair, validation) = repair_log_scale(chart_type, *channel, scan, scales);
        if repair == LogRepair::Shift {
            for (measure, accessor) in measures.iter().zip(accessors.iter_mut()) {
                if y_channel(measure.side()) == *channel {
                    *accessor = accessor.clone().shifted(1.0);
                }
            }
        }
        if validation.message.is_some() {
            results.push(validation);
        }
    }
    results
}

/// Box plots summarize a single y measure per category
pub fn validate_y_measure_count(chart_type: RenderType, measures: &Measures) -> Validation {
    if chart_type == RenderType::BoxPlot && measures.y.len() > 1 {
        return Validation::fatal(
            FatalKind::InvalidConfig,
            "Box plots support a single y-axis measure. Please remove the additional y-axis measures.",
        );
    }
    Validation::ok()
}

/// Zero-row check. The filter hint is included when the caller can still remove filters.
pub fn validate_response_has_data(store: &MeasureStore, include_filter_msg: bool) -> Validation {
    if !store.is_empty() {
        return Validation::ok();
    }
    let mut message = String::from(
        "The response returned 0 rows of data. The query may be empty or the applied filters may be too strict.",
    );
    if include_filter_msg {
        message.push_str(" Try removing or adjusting any filters if possible.");
    }
    Validation::fatal(FatalKind::NoData, message)
}

/// Result of checking saved measures against the response columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasureCheck {
    pub fatal: Option<String>,
    pub warnings: Vec<String>,
}

fn saved_channel_name(channel: Channel) -> &'static str {
    match channel {
        Channel::Group => "series",
        Channel::XSub => "xSub",
        other => other.axis_name(),
    }
}

/// Report saved measures that are no longer among the response columns.
/// Missing measures on a required channel are fatal.
pub fn validate_measures_exist(measures: &Measures, store: &MeasureStore, required: &[Channel]) -> MeasureCheck {
    let mut names: Vec<&str> = store.fields.iter().map(|f| f.name.as_str()).collect();
    if names.is_empty() {
        if let Some(first) = store.rows.first() {
            names = first.keys().map(String::as_str).collect();
        }
    }
    let mut check = MeasureCheck::default();
    if names.is_empty() {
        return check;
    }

    for (channel, measure) in measures.all() {
        if names.contains(&measure.name.as_str()) {
            continue;
        }
        let message = format!(
            "The saved {} measure, {}, is not available. It may have been renamed or removed.",
            saved_channel_name(channel),
            measure.display_label()
        );
        let is_required = required.iter().any(|r| {
            *r == channel || (*r == Channel::Y && channel == Channel::YRight)
        });
        if is_required && check.fatal.is_none() {
            check.fatal = Some(message);
        } else {
            check.warnings.push(message);
        }
    }
    check
}
