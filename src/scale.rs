use crate::aes::{is_continuous_x, Aes};
use crate::classify::is_numeric_type;
use crate::data::{FieldMeta, MeasureStore, Row};
use crate::ir::{
    y_channel, Channel, Domain, Measure, Measures, RenderType, SavedScales, ScaleDescriptor, Scales,
    Trans,
};
use crate::parser::{format_precision, number_pattern, NumberPattern};
use indexmap::IndexMap;
use serde::Serialize;

/// Rounded magnitudes with at least this many digits are shown in exponential notation
const EXPONENTIAL_DIGITS: usize = 6;

/// Tick label formatter attached to a continuous scale
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TickFormat {
    Identity,
    /// Fixed number of fraction digits
    Precision(usize),
    /// Custom display pattern from the field metadata
    Pattern(NumberPattern),
    /// Fixed labels keyed by tick value; unknown ticks render empty
    Lookup(IndexMap<String, String>),
}

impl TickFormat {
    pub fn apply(&self, value: f64) -> String {
        if let TickFormat::Lookup(labels) = self {
            return labels.get(&format!("{}", value)).cloned().unwrap_or_default();
        }
        if needs_exponential(value) {
            return to_exponential(value);
        }
        match self {
            TickFormat::Identity => format!("{}", value),
            TickFormat::Precision(digits) => format!("{:.*}", digits, value),
            TickFormat::Pattern(pattern) => pattern.format(value),
            TickFormat::Lookup(_) => String::new(),
        }
    }
}

fn needs_exponential(value: f64) -> bool {
    value.is_finite() && format!("{}", value.round().abs()).len() >= EXPONENTIAL_DIGITS
}

/// Exponential notation with an explicit exponent sign, e.g. `1.234567e+6`
pub fn to_exponential(value: f64) -> String {
    let raw = format!("{:e}", value);
    match raw.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
        _ => raw,
    }
}

/// Pick a tick formatter for a field.
///
/// A custom display pattern wins, then the precision of the numeric format string,
/// then the caller's default format, then identity.
pub fn tick_format_for(field: Option<&FieldMeta>, default_number_format: Option<&str>) -> TickFormat {
    if let Some(field) = field {
        if let Some(pattern) = field.ext_format.as_deref().and_then(number_pattern) {
            return TickFormat::Pattern(pattern);
        }
        if let Some(digits) = field.format.as_deref().and_then(format_precision) {
            return TickFormat::Precision(digits);
        }
    }
    match default_number_format.and_then(number_pattern) {
        Some(pattern) => TickFormat::Pattern(pattern),
        None => TickFormat::Identity,
    }
}

/// Running min/max over a set of values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min: f64,
    pub max: f64,
}

impl Default for Extent {
    fn default() -> Self {
        Self { min: f64::INFINITY, max: f64::NEG_INFINITY }
    }
}

impl Extent {
    pub fn include(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if value < self.min { self.min = value; }
        if value > self.max { self.max = value; }
    }

    pub fn merge(&mut self, other: &Extent) {
        if other.min < self.min { self.min = other.min; }
        if other.max > self.max { self.max = other.max; }
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn to_domain(self) -> Option<Domain> {
        if self.is_empty() { None } else { Some(Domain::new(self.min, self.max)) }
    }

    /// Extent of an accessor over rows, ignoring anything that is not a number
    pub fn of_channel(aes: &Aes, channel: Channel, rows: &[Row]) -> Extent {
        let mut extent = Extent::default();
        if let Some(acc) = aes.get(channel) {
            for row in rows {
                if let Some(v) = acc.eval(row).to_f64_lenient() {
                    extent.include(v);
                }
            }
        }
        extent
    }
}

fn saved_trans(saved: &SavedScales, channel: Channel) -> Trans {
    saved.get(channel).and_then(|s| s.trans).unwrap_or_default()
}

/// Box plot y domain: pad by a tenth of the range, keeping the lower bound
/// positive when a log transform is active.
pub fn box_plot_y_domain(extent: Extent, trans: Trans) -> Option<Domain> {
    if extent.is_empty() {
        return None;
    }
    let padding = (extent.max - extent.min) * 0.1;
    let min = if trans == Trans::Log && extent.min - padding <= 0.0 {
        extent.min
    } else {
        extent.min - padding
    };
    Some(Domain::new(min, extent.max + padding))
}

fn apply_saved_domain(scales: &mut Scales, saved: &SavedScales, channel: Channel) {
    let Some(over) = saved.get(channel) else { return };
    if !over.has_manual_domain() {
        return;
    }
    if let Some(scale) = scales.get_mut(channel) {
        scale.domain = Some(Domain { min: over.min, max: over.max });
    }
}

fn is_field_match(measure: &Measure, field: &FieldMeta) -> bool {
    field.name == measure.name || Some(field.name.as_str()) == measure.converted_name.as_deref()
}

/// Compute the scale descriptors for a chart.
pub fn generate_scales(
    chart_type: RenderType,
    measures: &Measures,
    saved: &SavedScales,
    aes: &Aes,
    store: &MeasureStore,
    default_number_format: Option<&str>,
) -> Scales {
    let mut scales = Scales::default();
    let rows = &store.rows;

    if chart_type == RenderType::BoxPlot {
        scales.insert(Channel::X, ScaleDescriptor::discrete());
        let trans = saved_trans(saved, Channel::Y);
        let mut y = ScaleDescriptor::continuous(trans);
        y.domain = box_plot_y_domain(Extent::of_channel(aes, Channel::Y, rows), trans);
        scales.insert(Channel::Y, y);
    } else {
        let continuous_x = measures.x.as_ref().is_some_and(|x| is_continuous_x(chart_type, x));
        if continuous_x {
            scales.insert(Channel::X, ScaleDescriptor::continuous(saved_trans(saved, Channel::X)));
        } else {
            scales.insert(Channel::X, ScaleDescriptor::discrete());
            if measures.x_sub.is_some() {
                scales.insert(Channel::XSub, ScaleDescriptor::discrete());
            }
        }
        scales.insert(Channel::Y, ScaleDescriptor::continuous(saved_trans(saved, Channel::Y)));
        scales.insert(Channel::YRight, ScaleDescriptor::continuous(saved_trans(saved, Channel::YRight)));
    }

    if rows.is_empty() {
        for channel in [Channel::X, Channel::Y, Channel::YRight] {
            if let Some(scale) = scales.get_mut(channel) {
                if scale.is_continuous() {
                    scale.domain = Some(Domain::unit());
                }
            }
        }
    }

    for field in &store.fields {
        let numeric_field = is_numeric_type(field.effective_type());
        if let Some(x) = &measures.x {
            if numeric_field && is_field_match(x, field) {
                if let Some(scale) = scales.get_mut(Channel::X) {
                    if scale.is_continuous() {
                        scale.tick_format = Some(tick_format_for(Some(field), default_number_format));
                    }
                }
            }
        }
        for y in &measures.y {
            if is_field_match(y, field) && (numeric_field || y.converted) {
                if let Some(scale) = scales.get_mut(y_channel(y.side())) {
                    scale.tick_format = Some(tick_format_for(Some(field), default_number_format));
                }
            }
        }
    }

    apply_saved_domain(&mut scales, saved, Channel::X);
    if !measures.y.is_empty() {
        apply_saved_domain(&mut scales, saved, Channel::Y);
        apply_saved_domain(&mut scales, saved, Channel::YRight);
    }

    scales
}
