use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io::Read;

/// Raw value of a single response cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(CellValue::Null),
            Value::Bool(b) => Ok(CellValue::Bool(*b)),
            Value::Number(n) => n
                .as_f64()
                .map(CellValue::Number)
                .ok_or_else(|| anyhow!("Number '{}' is out of range", n)),
            Value::String(s) => Ok(CellValue::Text(s.clone())),
            _ => Err(anyhow!("Unsupported cell value: {}", value)),
        }
    }
}

/// One cell of a query response row: the stored value plus its formatted display value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Cell {
    pub value: CellValue,
    #[serde(rename = "displayValue", default, skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
}

impl Cell {
    pub fn new(value: CellValue) -> Self {
        Self { value, display_value: None }
    }

    pub fn number(v: f64) -> Self {
        Self::new(CellValue::Number(v))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::new(CellValue::Text(s.into()))
    }

    pub fn null() -> Self {
        Self::new(CellValue::Null)
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display_value = Some(display.into());
        self
    }
}

/// A response row keyed by column alias, in field metadata order when the response has it
pub type Row = IndexMap<String, Cell>;

/// Which half of a cell an accessor reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueVariant {
    Value,
    DisplayValue,
}

/// Value produced by reading a row. `Undefined` means the column is absent from the row,
/// which is distinct from a cell that is present but null.
#[derive(Debug, Clone, PartialEq)]
pub enum AesValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Serialize for AesValue {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AesValue::Undefined | AesValue::Null => s.serialize_none(),
            AesValue::Bool(b) => s.serialize_bool(*b),
            AesValue::Number(n) => s.serialize_f64(*n),
            AesValue::Text(t) => s.serialize_str(t),
        }
    }
}

impl AesValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, AesValue::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AesValue::Null)
    }

    /// Null or undefined
    pub fn is_missing(&self) -> bool {
        matches!(self, AesValue::Undefined | AesValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AesValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Lenient numeric read: numbers, and text that parses as a number
    pub fn to_f64_lenient(&self) -> Option<f64> {
        match self {
            AesValue::Number(n) => Some(*n),
            AesValue::Text(s) => parse_number(s),
            _ => None,
        }
    }
}

impl From<&CellValue> for AesValue {
    fn from(value: &CellValue) -> Self {
        match value {
            CellValue::Null => AesValue::Null,
            CellValue::Bool(b) => AesValue::Bool(*b),
            CellValue::Number(n) => AesValue::Number(*n),
            CellValue::Text(s) => AesValue::Text(s.clone()),
        }
    }
}

impl fmt::Display for AesValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AesValue::Undefined => write!(f, "undefined"),
            AesValue::Null => write!(f, "null"),
            AesValue::Bool(b) => write!(f, "{}", b),
            AesValue::Number(n) => write!(f, "{}", n),
            AesValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Parse a trimmed numeric string, rejecting empty input and non-finite results
pub fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Single typed accessor for row cells.
///
/// `DisplayValue` falls back to the raw value when the cell has no display value.
pub fn get_cell_value(row: &Row, column: &str, variant: ValueVariant) -> AesValue {
    match row.get(column) {
        None => AesValue::Undefined,
        Some(cell) => match variant {
            ValueVariant::Value => AesValue::from(&cell.value),
            ValueVariant::DisplayValue => match &cell.display_value {
                Some(display) => AesValue::Text(display.clone()),
                None => AesValue::from(&cell.value),
            },
        },
    }
}

/// Column metadata from the query response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FieldMeta {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub normalized_type: Option<String>,
    /// Numeric format string, e.g. "0.00"
    #[serde(default)]
    pub format: Option<String>,
    /// Custom display pattern, e.g. "#,##0.0%"
    #[serde(default)]
    pub ext_format: Option<String>,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: Some(field_type.into()),
            ..Default::default()
        }
    }

    /// The normalized type when present, else the declared type
    pub fn effective_type(&self) -> Option<&str> {
        self.normalized_type.as_deref().or(self.field_type.as_deref())
    }
}

/// The tabular response of a data query: column metadata plus rows
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct MeasureStore {
    pub fields: Vec<FieldMeta>,
    pub rows: Vec<Row>,
}

impl MeasureStore {
    pub fn new(fields: Vec<FieldMeta>, rows: Vec<Row>) -> Self {
        Self { fields, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Parse a query response.
    ///
    /// Accepts `{"metaData": {"fields": [...]}, "rows": [...]}` or a bare array of rows.
    /// Row cells may be `{"value": .., "displayValue": ..}` objects or plain scalars.
    pub fn from_json(value: &Value) -> Result<Self> {
        let (fields_json, rows_json) = match value {
            Value::Array(rows) => (None, rows),
            Value::Object(obj) => {
                let rows = obj
                    .get("rows")
                    .and_then(Value::as_array)
                    .ok_or_else(|| anyhow!("Response must contain a 'rows' array"))?;
                let fields = obj
                    .get("metaData")
                    .and_then(|m| m.get("fields"))
                    .cloned();
                (fields, rows)
            }
            _ => return Err(anyhow!("Response must be a JSON object or an array of rows")),
        };

        let mut rows = Vec::with_capacity(rows_json.len());
        for (idx, item) in rows_json.iter().enumerate() {
            let obj = item
                .as_object()
                .ok_or_else(|| anyhow!("Row {} is not an object", idx))?;
            let mut row = Row::new();
            for (key, raw) in obj {
                let cell = match raw {
                    Value::Object(cell_obj) if cell_obj.contains_key("value") => {
                        let value = CellValue::from_json(&cell_obj["value"])
                            .with_context(|| format!("Row {} column '{}'", idx, key))?;
                        let display_value = match cell_obj.get("displayValue") {
                            Some(Value::String(s)) => Some(s.clone()),
                            Some(Value::Null) | None => None,
                            Some(other) => Some(other.to_string()),
                        };
                        Cell { value, display_value }
                    }
                    scalar => Cell::new(
                        CellValue::from_json(scalar)
                            .with_context(|| format!("Row {} column '{}'", idx, key))?,
                    ),
                };
                row.insert(key.clone(), cell);
            }
            rows.push(row);
        }

        let fields: Vec<FieldMeta> = match fields_json {
            Some(f) => serde_json::from_value(f).context("Failed to parse response field metadata")?,
            None => infer_fields(&rows),
        };

        // JSON objects carry no column order; the field metadata does
        let position = |name: &str| fields.iter().position(|f| f.name == name).unwrap_or(usize::MAX);
        for row in &mut rows {
            row.sort_by(|a, _, b, _| position(a.as_str()).cmp(&position(b.as_str())));
        }

        Ok(Self { fields, rows })
    }

    /// Read a CSV table. Empty cells become nulls; numeric columns are typed "float".
    pub fn from_csv<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);

        let headers: Vec<String> = reader
            .headers()
            .context("Failed to read CSV headers")?
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.context("Failed to read CSV record")?;
            let mut row = Row::new();
            for (header, raw) in headers.iter().zip(record.iter()) {
                let value = if raw.is_empty() {
                    CellValue::Null
                } else if let Some(n) = parse_number(raw) {
                    CellValue::Number(n)
                } else {
                    CellValue::Text(raw.to_string())
                };
                row.insert(header.clone(), Cell::new(value));
            }
            rows.push(row);
        }

        let mut fields: Vec<FieldMeta> = headers
            .iter()
            .map(|h| FieldMeta::new(h.clone(), "string"))
            .collect();
        for field in &mut fields {
            field.field_type = Some(infer_column_type(&rows, &field.name).to_string());
        }

        Ok(Self { fields, rows })
    }
}

fn infer_fields(rows: &[Row]) -> Vec<FieldMeta> {
    let mut names: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }
    names
        .into_iter()
        .map(|name| {
            let field_type = infer_column_type(rows, &name);
            FieldMeta::new(name, field_type)
        })
        .collect()
}

fn infer_column_type(rows: &[Row], column: &str) -> &'static str {
    let mut saw_value = false;
    for row in rows {
        match row.get(column).map(|c| &c.value) {
            Some(CellValue::Number(_)) => saw_value = true,
            Some(CellValue::Null) | None => {}
            Some(_) => return "string",
        }
    }
    if saw_value { "float" } else { "string" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_response_shape() {
        let response = json!({
            "metaData": {"fields": [{"name": "x", "type": "string"}, {"name": "y", "type": "int"}]},
            "rows": [
                {"x": {"value": "A", "displayValue": "Alpha"}, "y": {"value": 1}},
                {"x": {"value": null}, "y": {"value": 2}}
            ]
        });
        let store = MeasureStore::from_json(&response).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.field("y").unwrap().field_type.as_deref(), Some("int"));
        assert_eq!(
            get_cell_value(&store.rows[0], "x", ValueVariant::DisplayValue),
            AesValue::Text("Alpha".to_string())
        );
        assert_eq!(get_cell_value(&store.rows[1], "x", ValueVariant::Value), AesValue::Null);
        assert_eq!(get_cell_value(&store.rows[1], "z", ValueVariant::Value), AesValue::Undefined);
    }

    #[test]
    fn test_from_json_rows_follow_field_order() {
        let response = json!({
            "metaData": {"fields": [{"name": "Visit", "type": "string"}, {"name": "Age", "type": "int"}]},
            "rows": [{"Age": {"value": 41}, "Visit": {"value": "V1"}, "Extra": {"value": 1}}]
        });
        let store = MeasureStore::from_json(&response).unwrap();
        let keys: Vec<&str> = store.rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Visit", "Age", "Extra"]);
    }

    #[test]
    fn test_from_json_flat_rows_infers_types() {
        let response = json!([{"a": 1.5, "b": "x"}, {"a": null, "b": "y"}]);
        let store = MeasureStore::from_json(&response).unwrap();
        assert_eq!(store.field("a").unwrap().field_type.as_deref(), Some("float"));
        assert_eq!(store.field("b").unwrap().field_type.as_deref(), Some("string"));
    }

    #[test]
    fn test_from_json_rejects_scalar() {
        assert!(MeasureStore::from_json(&json!(42)).is_err());
    }

    #[test]
    fn test_from_csv() {
        let csv = "cat,val\nA,1\nB,\nC,3.5\n";
        let store = MeasureStore::from_csv(csv.as_bytes()).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.field("val").unwrap().field_type.as_deref(), Some("float"));
        assert_eq!(store.field("cat").unwrap().field_type.as_deref(), Some("string"));
        assert_eq!(store.rows[1]["val"].value, CellValue::Null);
    }

    #[test]
    fn test_display_fallback_to_value() {
        let mut row = Row::new();
        row.insert("n".to_string(), Cell::number(4.0));
        assert_eq!(get_cell_value(&row, "n", ValueVariant::DisplayValue), AesValue::Number(4.0));
        assert_eq!(AesValue::Number(4.0).to_string(), "4");
    }
}
