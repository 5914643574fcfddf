// Library exports for genchart

pub mod data;
pub mod parser;

// Chart pipeline stages
pub mod classify;
pub mod ir;
pub mod aes;
pub mod convert;
pub mod scale;
pub mod transform;
pub mod validate;
pub mod compiler;
pub mod runtime;
pub mod timechart;

// Session plumbing around the pipeline
pub mod cache;
pub mod callback;
pub mod export;
pub mod session;

pub use runtime::{render_generic_chart, RenderOutcome};
pub use timechart::render_time_chart;
pub use validate::{FatalKind, Validation};

use serde::{Deserialize, Serialize};

/// Fatal chart conditions. The message is shown in place of the chart.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChartError {
    #[error("{0}")]
    MissingMeasure(String),
    #[error("{0}")]
    AllNull(String),
    #[error("{0}")]
    NoData(String),
    #[error("{0}")]
    InvalidConfig(String),
}

impl ChartError {
    /// Map a failed validation to the matching fatal error
    pub fn from_validation(validation: &Validation) -> Option<Self> {
        if validation.success {
            return None;
        }
        let message = validation.message.clone().unwrap_or_default();
        Some(match validation.kind.unwrap_or(FatalKind::InvalidConfig) {
            FatalKind::MissingMeasure => ChartError::MissingMeasure(message),
            FatalKind::AllNull => ChartError::AllNull(message),
            FatalKind::NoData => ChartError::NoData(message),
            FatalKind::InvalidConfig => ChartError::InvalidConfig(message),
        })
    }
}

/// Failure reported by the data API
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiFailure {
    #[serde(default)]
    pub exception: Option<String>,
}

impl ApiFailure {
    pub const FALLBACK_MESSAGE: &'static str = "An unexpected error occurred";

    pub fn new(exception: impl Into<String>) -> Self {
        Self { exception: Some(exception.into()) }
    }

    /// The server's exception text, or the generic fallback when there is none
    pub fn user_message(&self) -> String {
        match self.exception.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => Self::FALLBACK_MESSAGE.to_string(),
        }
    }
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.user_message())
    }
}

impl std::error::Error for ApiFailure {}

fn default_max_charts() -> usize { 30 }
fn default_debounce_ms() -> u64 { 500 }
fn default_bin_threshold() -> usize { 10_000 }
fn default_line_point_limit() -> usize { 10_000 }
fn default_data_limit() -> usize { 10_000 }
fn default_width() -> u32 { 800 }
fn default_height() -> u32 { 600 }

/// Crate-wide limits and sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDefaults {
    #[serde(default = "default_max_charts")]
    pub max_charts: usize,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_bin_threshold")]
    pub bin_threshold: usize,
    #[serde(default = "default_line_point_limit")]
    pub line_point_limit: usize,
    /// Row limit for time chart data requests
    #[serde(default = "default_data_limit")]
    pub data_limit: usize,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for ChartDefaults {
    fn default() -> Self {
        Self {
            max_charts: default_max_charts(),
            debounce_ms: default_debounce_ms(),
            bin_threshold: default_bin_threshold(),
            line_point_limit: default_line_point_limit(),
            data_limit: default_data_limit(),
            width: default_width(),
            height: default_height(),
        }
    }
}

fn default_render_to() -> String { "chart".to_string() }

/// Per-render options supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    #[serde(default = "default_render_to")]
    pub render_to: String,
    #[serde(flatten)]
    pub defaults: ChartDefaults,
    /// Formatter pattern used when a field carries no format of its own
    #[serde(default)]
    pub default_number_format: Option<String>,
    /// Whether the caller can still offer to remove filters; turns zero rows into a warning
    #[serde(default)]
    pub include_filter_msg: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            render_to: default_render_to(),
            defaults: ChartDefaults::default(),
            default_number_format: None,
            include_filter_msg: false,
        }
    }
}
