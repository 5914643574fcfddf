use crate::validate::{FatalKind, Validation};
use crate::{ApiFailure, ChartDefaults};
use anyhow::{bail, Result};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

/// Where a chart editing session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Configuring,
    RequestingData,
    Validating,
    Rendering,
    ErrorDisplay,
}

/// Kind of data response a refetch waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Individual,
    Aggregate,
}

/// Responses a time chart needs for its display options
pub fn expected_kinds(display_individual: bool, display_aggregate: bool) -> Vec<ResponseKind> {
    let mut kinds = Vec::new();
    if display_individual {
        kinds.push(ResponseKind::Individual);
    }
    if display_aggregate {
        kinds.push(ResponseKind::Aggregate);
    }
    kinds
}

/// Identifies the refetch a response belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RequestToken {
    pub generation: u64,
}

/// A refetch the caller must issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub token: RequestToken,
    pub kinds: Vec<ResponseKind>,
}

/// What happened to an incoming response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// Belongs to a superseded request and was dropped
    Stale,
    Waiting { remaining: usize },
    /// All responses for the current request have arrived
    Ready,
}

/// Debounced refetch and response bookkeeping for one chart.
///
/// Times are caller-supplied milliseconds so the session never reads a clock.
#[derive(Debug, Clone)]
pub struct ChartSession<T> {
    state: SessionState,
    debounce_ms: u64,
    deadline: Option<u64>,
    generation: u64,
    expected: Vec<ResponseKind>,
    received: IndexMap<ResponseKind, T>,
    error: Option<String>,
}

impl<T> ChartSession<T> {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            state: SessionState::Configuring,
            debounce_ms,
            deadline: None,
            generation: 0,
            expected: Vec::new(),
            received: IndexMap::new(),
            error: None,
        }
    }

    pub fn from_defaults(defaults: &ChartDefaults) -> Self {
        Self::new(defaults.debounce_ms)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// A measure, filter or parameter changed: push the refetch deadline out
    pub fn config_changed(&mut self, now_ms: u64) {
        self.deadline = Some(now_ms.saturating_add(self.debounce_ms));
        self.state = SessionState::Configuring;
    }

    /// Issue at most one refetch once the debounce deadline has passed
    pub fn poll(&mut self, now_ms: u64, kinds: &[ResponseKind]) -> Option<FetchRequest> {
        match self.deadline {
            Some(deadline) if now_ms >= deadline => {}
            _ => return None,
        }
        self.deadline = None;
        self.generation += 1;
        self.expected = kinds.to_vec();
        self.received.clear();
        self.error = None;
        self.state = SessionState::RequestingData;
        debug!(generation = self.generation, expected = kinds.len(), "issuing chart data request");
        Some(FetchRequest { token: RequestToken { generation: self.generation }, kinds: kinds.to_vec() })
    }

    fn is_current(&self, token: RequestToken) -> bool {
        token.generation == self.generation && self.state == SessionState::RequestingData
    }

    /// Record a response. Stale generations are dropped.
    pub fn accept(&mut self, token: RequestToken, kind: ResponseKind, data: T) -> Result<Accepted> {
        if !self.is_current(token) {
            debug!(stale = token.generation, current = self.generation, ?kind, "discarding stale response");
            return Ok(Accepted::Stale);
        }
        if !self.expected.contains(&kind) {
            bail!("Unexpected {:?} response for request {}", kind, token.generation);
        }
        self.received.insert(kind, data);
        let remaining = self.expected.iter().filter(|k| !self.received.contains_key(*k)).count();
        if remaining > 0 {
            return Ok(Accepted::Waiting { remaining });
        }
        self.state = SessionState::Validating;
        Ok(Accepted::Ready)
    }

    /// Record a failed request; returns the message to show, or `None` when stale
    pub fn fail(&mut self, token: RequestToken, failure: &ApiFailure) -> Option<String> {
        if !self.is_current(token) {
            debug!(stale = token.generation, current = self.generation, "discarding stale failure");
            return None;
        }
        let message = failure.user_message();
        self.error = Some(message.clone());
        self.received.clear();
        self.state = SessionState::ErrorDisplay;
        Some(message)
    }

    /// Hand the collected responses to validation
    pub fn take_responses(&mut self) -> Option<IndexMap<ResponseKind, T>> {
        if self.state != SessionState::Validating {
            return None;
        }
        Some(std::mem::take(&mut self.received))
    }

    /// Move on from validation: a fatal result shows the message in place of the chart
    pub fn finish_validation(&mut self, validation: &Validation) -> SessionState {
        if self.state != SessionState::Validating {
            return self.state;
        }
        if validation.success {
            self.state = SessionState::Rendering;
        } else {
            self.error = validation.message.clone();
            self.state = SessionState::ErrorDisplay;
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_session() -> ChartSession<&'static str> {
        ChartSession::from_defaults(&ChartDefaults::default())
    }

    #[test]
    fn test_debounce_coalesces_changes() {
        let mut session = make_session();
        session.config_changed(0);
        session.config_changed(300);
        assert_eq!(session.poll(700, &[ResponseKind::Individual]), None);
        let request = session.poll(800, &[ResponseKind::Individual]).unwrap();
        assert_eq!(request.token.generation, 1);
        assert_eq!(session.state(), SessionState::RequestingData);
        assert_eq!(session.poll(2000, &[ResponseKind::Individual]), None);
    }

    #[test]
    fn test_debounce_deadline_saturates_near_max_time() {
        let mut session = make_session();
        session.config_changed(u64::MAX - 10);
        assert_eq!(session.poll(u64::MAX - 1, &[ResponseKind::Individual]), None);
        assert!(session.poll(u64::MAX, &[ResponseKind::Individual]).is_some());
    }

    #[test]
    fn test_stale_responses_are_discarded() {
        let mut session = make_session();
        session.config_changed(0);
        let first = session.poll(500, &[ResponseKind::Individual]).unwrap();
        session.config_changed(600);
        let second = session.poll(1100, &[ResponseKind::Individual]).unwrap();

        assert_eq!(session.accept(first.token, ResponseKind::Individual, "old").unwrap(), Accepted::Stale);
        assert_eq!(session.accept(second.token, ResponseKind::Individual, "new").unwrap(), Accepted::Ready);
        let responses = session.take_responses().unwrap();
        assert_eq!(responses[&ResponseKind::Individual], "new");
    }

    #[test]
    fn test_waits_for_every_expected_response() {
        let mut session = make_session();
        session.config_changed(0);
        let kinds = expected_kinds(true, true);
        let request = session.poll(500, &kinds).unwrap();
        assert_eq!(
            session.accept(request.token, ResponseKind::Aggregate, "agg").unwrap(),
            Accepted::Waiting { remaining: 1 }
        );
        assert_eq!(session.take_responses(), None);
        assert_eq!(session.accept(request.token, ResponseKind::Individual, "ind").unwrap(), Accepted::Ready);
        assert_eq!(session.finish_validation(&Validation::ok()), SessionState::Rendering);
    }

    #[test]
    fn test_unexpected_kind_errors() {
        let mut session = make_session();
        session.config_changed(0);
        let request = session.poll(500, &expected_kinds(true, false)).unwrap();
        assert!(session.accept(request.token, ResponseKind::Aggregate, "agg").is_err());
    }

    #[test]
    fn test_failure_uses_fallback_message() {
        let mut session = make_session();
        session.config_changed(0);
        let request = session.poll(500, &[ResponseKind::Individual]).unwrap();
        let message = session.fail(request.token, &ApiFailure::default()).unwrap();
        assert_eq!(message, "An unexpected error occurred");
        assert_eq!(session.state(), SessionState::ErrorDisplay);
        assert_eq!(session.fail(request.token, &ApiFailure::new("late")), None);
    }

    #[test]
    fn test_fatal_validation_shows_error() {
        let mut session = make_session();
        session.config_changed(0);
        let request = session.poll(500, &[ResponseKind::Individual]).unwrap();
        session.accept(request.token, ResponseKind::Individual, "rows").unwrap();
        let state = session.finish_validation(&Validation::fatal(FatalKind::AllNull, "All data values for Y are null."));
        assert_eq!(state, SessionState::ErrorDisplay);
        assert_eq!(session.error_message(), Some("All data values for Y are null."));
    }
}
