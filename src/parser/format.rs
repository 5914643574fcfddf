use nom::{
    bytes::complete::{take_till, take_while},
    character::complete::char,
    combinator::{opt, rest},
    sequence::preceded,
    IResult,
};
use serde::{Deserialize, Serialize};

/// Largest number of fraction digits a derived formatter will emit
pub const MAX_PRECISION: usize = 10;

/// A parsed numeric display pattern such as `"$#,##0.00"` or `"0.0%"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberPattern {
    pub prefix: String,
    pub grouping: bool,
    pub min_integer: usize,
    pub min_fraction: usize,
    pub max_fraction: usize,
    pub percent: bool,
    pub suffix: String,
}

fn is_placeholder(c: char) -> bool {
    c == '#' || c == '0' || c == ','
}

fn is_fraction_placeholder(c: char) -> bool {
    c == '#' || c == '0'
}

/// Parse a numeric display pattern: literal prefix, integer placeholders, optional
/// fraction placeholders, optional percent sign, literal suffix.
pub fn parse_number_format(input: &str) -> IResult<&str, NumberPattern> {
    let (input, prefix) = take_till(|c| is_placeholder(c) || c == '.')(input)?;
    let (input, integer) = take_while(is_placeholder)(input)?;
    let (input, fraction) = opt(preceded(char('.'), take_while(is_fraction_placeholder)))(input)?;
    let (input, percent) = opt(char('%'))(input)?;
    let (input, suffix) = rest(input)?;

    let fraction = fraction.unwrap_or("");
    if integer.is_empty() && fraction.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        )));
    }

    Ok((
        input,
        NumberPattern {
            prefix: prefix.to_string(),
            grouping: integer.contains(','),
            min_integer: integer.chars().filter(|&c| c == '0').count(),
            min_fraction: fraction.chars().filter(|&c| c == '0').count(),
            max_fraction: fraction.len().min(MAX_PRECISION),
            percent: percent.is_some(),
            suffix: suffix.to_string(),
        },
    ))
}

/// Parse a whole pattern string, returning `None` when it has no numeric placeholders
pub fn number_pattern(format: &str) -> Option<NumberPattern> {
    parse_number_format(format.trim()).ok().map(|(_, p)| p)
}

/// Digits after the decimal point in a numeric format string, capped at [`MAX_PRECISION`]
pub fn format_precision(format: &str) -> Option<usize> {
    number_pattern(format).map(|p| p.max_fraction)
}

impl NumberPattern {
    pub fn format(&self, value: f64) -> String {
        let scaled = if self.percent { value * 100.0 } else { value };
        let negative = scaled < 0.0;
        let body = format!("{:.*}", self.max_fraction, scaled.abs());

        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i.to_string(), f.to_string()),
            None => (body, String::new()),
        };

        let mut frac = frac_part;
        while frac.len() > self.min_fraction && frac.ends_with('0') {
            frac.pop();
        }

        let mut int_digits = int_part;
        if self.min_integer == 0 && int_digits == "0" && !frac.is_empty() {
            int_digits.clear();
        }
        while int_digits.len() < self.min_integer {
            int_digits.insert(0, '0');
        }
        if self.grouping {
            int_digits = group_thousands(&int_digits);
        }

        let mut out = String::new();
        if negative && scaled != 0.0 {
            out.push('-');
        }
        out.push_str(&self.prefix);
        out.push_str(&int_digits);
        if !frac.is_empty() {
            out.push('.');
            out.push_str(&frac);
        }
        if self.percent {
            out.push('%');
        }
        out.push_str(&self.suffix);
        out
    }
}

fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_precision() {
        assert_eq!(format_precision("0.00"), Some(2));
        assert_eq!(format_precision("0"), Some(0));
        assert_eq!(format_precision("#,##0.###"), Some(3));
    }

    #[test]
    fn test_precision_capped() {
        assert_eq!(format_precision("0.000000000000000"), Some(MAX_PRECISION));
    }

    #[test]
    fn test_parse_rejects_text() {
        assert_eq!(number_pattern("abc"), None);
        assert_eq!(format_precision(""), None);
    }

    #[test]
    fn test_pattern_with_prefix_and_grouping() {
        let p = number_pattern("$#,##0.00").unwrap();
        assert_eq!(p.prefix, "$");
        assert!(p.grouping);
        assert_eq!(p.format(1234567.5), "$1,234,567.50");
        assert_eq!(p.format(-12.0), "-$12.00");
    }

    #[test]
    fn test_pattern_percent() {
        let p = number_pattern("0.0%").unwrap();
        assert!(p.percent);
        assert_eq!(p.format(0.256), "25.6%");
    }

    #[test]
    fn test_optional_fraction_digits_trimmed() {
        let p = number_pattern("0.###").unwrap();
        assert_eq!(p.format(2.5), "2.5");
        assert_eq!(p.format(2.0), "2");
    }
}
