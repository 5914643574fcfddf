use crate::data::Row;
use crate::ir::{ChartConfig, QueryConfig};
use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// Structured data handed to a point-click handler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointClickEvent {
    pub data: Row,
    /// Channel name → column alias for every selected measure
    pub column_map: IndexMap<String, String>,
    pub measure_info: MeasureInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MeasureInfo {
    pub schema_name: String,
    pub query_name: String,
    pub name: Option<String>,
}

impl PointClickEvent {
    pub fn new(config: &ChartConfig, query: &QueryConfig, data: Row) -> Self {
        let column_map = config
            .measures
            .all()
            .into_iter()
            .map(|(channel, m)| (channel.as_str().to_string(), m.name.clone()))
            .collect();
        let measure_info = MeasureInfo {
            schema_name: query.schema_name.clone(),
            query_name: query.query_name.clone(),
            name: config.measures.first_y().map(|m| m.name.clone()),
        };
        Self { data, column_map, measure_info }
    }
}

/// A named handler attached to a layer, with the column map its events carry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointClickBinding {
    pub handler: String,
    pub column_map: IndexMap<String, String>,
    pub measure_info: MeasureInfo,
}

impl PointClickBinding {
    /// Event for a clicked row
    pub fn event(&self, data: Row) -> PointClickEvent {
        PointClickEvent { data, column_map: self.column_map.clone(), measure_info: self.measure_info.clone() }
    }
}

pub type PointClickHandler = Box<dyn Fn(&PointClickEvent) + Send + Sync>;

/// Named point-click handlers. Chart configs refer to handlers by name only.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: IndexMap<String, PointClickHandler>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler with the same name
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&PointClickEvent) + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.shift_remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn dispatch(&self, name: &str, event: &PointClickEvent) -> Result<()> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| anyhow!("No point click handler registered as '{}'", name))?;
        handler(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Cell;
    use crate::ir::{Measure, Measures};
    use std::sync::{Arc, Mutex};

    fn make_event() -> PointClickEvent {
        let config = ChartConfig {
            measures: Measures {
                x: Some(Measure::new("Visit", "Visit", "string")),
                y: vec![Measure::new("Weight", "Weight", "float")],
                ..Default::default()
            },
            ..Default::default()
        };
        let query = QueryConfig {
            schema_name: "study".to_string(),
            query_name: "Physical".to_string(),
            ..Default::default()
        };
        let mut row = Row::new();
        row.insert("Weight".to_string(), Cell::number(70.0));
        PointClickEvent::new(&config, &query, row)
    }

    #[test]
    fn test_dispatch_registered_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut registry = CallbackRegistry::new();
        registry.register("log", move |event: &PointClickEvent| {
            sink.lock().unwrap().push(event.measure_info.query_name.clone());
        });

        let event = make_event();
        assert_eq!(event.column_map["x"], "Visit");
        registry.dispatch("log", &event).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["Physical".to_string()]);
    }

    #[test]
    fn test_unknown_handler_errors() {
        let registry = CallbackRegistry::new();
        assert!(registry.dispatch("missing", &make_event()).is_err());
        assert!(!registry.contains("missing"));
    }

    #[test]
    fn test_binding_builds_events() {
        let mut column_map = IndexMap::new();
        column_map.insert("participant".to_string(), "ParticipantId".to_string());
        let binding = PointClickBinding {
            handler: "show".to_string(),
            column_map,
            measure_info: MeasureInfo { schema_name: "study".to_string(), query_name: "Lab".to_string(), name: None },
        };
        let mut registry = CallbackRegistry::new();
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        registry.register("show", move |event: &PointClickEvent| {
            assert_eq!(event.column_map["participant"], "ParticipantId");
            *sink.lock().unwrap() += 1;
        });
        registry.dispatch(&binding.handler, &binding.event(Row::new())).unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_unregister() {
        let mut registry = CallbackRegistry::new();
        registry.register("a", |_: &PointClickEvent| {});
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a"]);
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
    }
}
