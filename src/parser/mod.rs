// Parsers for user-authored format strings

pub mod format;

// Public API re-exports
pub use format::{format_precision, number_pattern, NumberPattern};
