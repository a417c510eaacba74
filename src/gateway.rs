//! Search gateway collaborator.
//!
//! The trail follower only ever talks to a `SearchGateway`. Real connectors
//! (people-search APIs, court portals, web fallbacks) live outside this
//! crate; this module provides the trait, a fixture-backed in-memory
//! gateway for tests and replays, and an explicitly owned query budget.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SourceError;
use crate::identity::PersonIdentity;
use crate::normalize::{normalize_name, normalize_phone};
use crate::record::PersonRecord;
use crate::resolver::name_similarity;

/// Query sent to a search gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl SearchQuery {
    /// Query by name only.
    #[must_use]
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: non_blank(Some(&name.into())),
            ..Self::default()
        }
    }

    /// Query built from an identity's strongest known fields.
    #[must_use]
    pub fn for_identity(identity: &PersonIdentity) -> Self {
        let name = identity.name.as_ref().map(|_| identity.canonical_name.clone());
        Self {
            name: non_blank(name.as_deref()),
            phone: identity.primary_phone().map(str::to_string),
            address: identity.primary_address().map(str::to_string),
            state: identity.states.first().cloned(),
        }
    }

    /// Returns true if the query carries no identifying field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        [&self.name, &self.phone, &self.address]
            .iter()
            .all(|f| f.as_deref().map_or(true, |v| v.trim().is_empty()))
    }

    /// Returns true if the record is plausibly the subject of this query:
    /// the names are at least `threshold` similar, or the phones match.
    #[must_use]
    pub fn matches(&self, record: &PersonRecord, threshold: f32) -> bool {
        let name_match = match (
            self.name.as_deref().and_then(normalize_name),
            record.name.as_deref().and_then(normalize_name),
        ) {
            (Some(q), Some(r)) => name_similarity(&q.full, &r.full) >= threshold,
            _ => false,
        };
        let phone_match = match (
            self.phone.as_deref().and_then(normalize_phone),
            record.phone.as_deref().and_then(normalize_phone),
        ) {
            (Some(q), Some(r)) => q == r,
            _ => false,
        };
        name_match || phone_match
    }

    /// Short human-readable label.
    #[must_use]
    pub fn label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.phone.clone())
            .or_else(|| self.address.clone())
            .unwrap_or_default()
    }
}

/// A source of person records.
///
/// Implementations must be callable from worker threads. Every failure is
/// reported as a `SourceError`; the caller decides how to degrade.
pub trait SearchGateway: Send + Sync {
    /// Gateway name, for logs.
    fn name(&self) -> &str {
        "gateway"
    }

    /// Runs one search.
    fn search(&self, query: &SearchQuery) -> Result<Vec<PersonRecord>, SourceError>;
}

impl<G: SearchGateway + ?Sized> SearchGateway for Arc<G> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<PersonRecord>, SourceError> {
        (**self).search(query)
    }
}

/// Scripted failure for a fixture response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureFailure {
    SourceUnavailable,
    RateLimited,
    Timeout,
}

impl From<FixtureFailure> for SourceError {
    fn from(failure: FixtureFailure) -> Self {
        match failure {
            FixtureFailure::SourceUnavailable => SourceError::unavailable("fixture marked unavailable"),
            FixtureFailure::RateLimited => SourceError::RateLimited { retry_after_ms: None },
            FixtureFailure::Timeout => SourceError::Timeout { duration_ms: 0 },
        }
    }
}

/// One canned gateway response, keyed by name and/or phone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub records: Vec<PersonRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FixtureFailure>,
    /// Artificial latency before answering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

/// Fixture file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureSet {
    #[serde(default)]
    pub responses: Vec<FixtureResponse>,
}

/// Gateway answering from canned responses.
///
/// Lookups go by normalized name first, then by normalized phone. Unknown
/// queries return no records. Every query is logged for inspection.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    responses: Vec<FixtureResponse>,
    by_name: HashMap<String, usize>,
    by_phone: HashMap<String, usize>,
    calls: Mutex<Vec<SearchQuery>>,
}

impl InMemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a gateway from a fixture set.
    #[must_use]
    pub fn from_fixtures(fixtures: FixtureSet) -> Self {
        let mut gateway = Self::new();
        for response in fixtures.responses {
            gateway.insert(response);
        }
        gateway
    }

    /// Parses a JSON fixture set.
    ///
    /// # Errors
    ///
    /// Returns the parse error if the JSON does not match `FixtureSet`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<FixtureSet>(json).map(Self::from_fixtures)
    }

    /// Registers a response. Later registrations for the same key win.
    pub fn insert(&mut self, response: FixtureResponse) {
        let idx = self.responses.len();
        if let Some(key) = response.name.as_deref().and_then(normalize_name) {
            self.by_name.insert(key.full, idx);
        }
        if let Some(key) = response.phone.as_deref().and_then(normalize_phone) {
            self.by_phone.insert(key, idx);
        }
        self.responses.push(response);
    }

    /// Registers records returned for a name.
    #[must_use]
    pub fn with_response(mut self, name: &str, records: Vec<PersonRecord>) -> Self {
        self.insert(FixtureResponse {
            name: Some(name.to_string()),
            records,
            ..FixtureResponse::default()
        });
        self
    }

    /// Registers a failure for a name.
    #[must_use]
    pub fn with_failure(mut self, name: &str, failure: FixtureFailure) -> Self {
        self.insert(FixtureResponse {
            name: Some(name.to_string()),
            failure: Some(failure),
            ..FixtureResponse::default()
        });
        self
    }

    /// Registers a delayed response for a name.
    #[must_use]
    pub fn with_delay(mut self, name: &str, records: Vec<PersonRecord>, delay: Duration) -> Self {
        self.insert(FixtureResponse {
            name: Some(name.to_string()),
            records,
            delay_ms: Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
            ..FixtureResponse::default()
        });
        self
    }

    /// Every query received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<SearchQuery> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of queries received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    fn lookup(&self, query: &SearchQuery) -> Option<&FixtureResponse> {
        let by_name = query
            .name
            .as_deref()
            .and_then(normalize_name)
            .and_then(|n| self.by_name.get(&n.full));
        let by_phone = || {
            query
                .phone
                .as_deref()
                .and_then(normalize_phone)
                .and_then(|p| self.by_phone.get(&p))
        };
        by_name.or_else(by_phone).and_then(|&idx| self.responses.get(idx))
    }
}

impl SearchGateway for InMemoryGateway {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<PersonRecord>, SourceError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(query.clone());
        }
        let Some(response) = self.lookup(query) else {
            debug!(query = %query.label(), "no fixture for query");
            return Ok(Vec::new());
        };
        if let Some(ms) = response.delay_ms {
            thread::sleep(Duration::from_millis(ms));
        }
        match response.failure {
            Some(failure) => Err(failure.into()),
            None => Ok(response.records.clone()),
        }
    }
}

/// A query quota with its own lifecycle (for example one per day).
///
/// Owned by whoever creates it and passed explicitly to the gateways that
/// draw from it, so independent runs never share hidden counters.
#[derive(Debug)]
pub struct QueryBudget {
    limit: u64,
    used: AtomicU64,
}

impl QueryBudget {
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    /// Takes one query from the budget. Returns false once exhausted.
    pub fn try_acquire(&self) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }

    #[must_use]
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used())
    }

    /// Starts a new quota period.
    pub fn reset(&self) {
        self.used.store(0, Ordering::Release);
    }
}

/// Gateway wrapper that answers `RateLimited` once its budget is spent.
#[derive(Debug)]
pub struct RateLimitedGateway<G> {
    inner: G,
    budget: Arc<QueryBudget>,
}

impl<G: SearchGateway> RateLimitedGateway<G> {
    #[must_use]
    pub fn new(inner: G, budget: Arc<QueryBudget>) -> Self {
        Self { inner, budget }
    }

    #[must_use]
    pub fn budget(&self) -> &QueryBudget {
        &self.budget
    }
}

impl<G: SearchGateway> SearchGateway for RateLimitedGateway<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<PersonRecord>, SourceError> {
        if !self.budget.try_acquire() {
            debug!(gateway = self.inner.name(), "query budget exhausted");
            return Err(SourceError::RateLimited { retry_after_ms: None });
        }
        self.inner.search(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::normalize::NormalizedRecord;

    #[test]
    fn test_query_is_empty() {
        assert!(SearchQuery::default().is_empty());
        assert!(SearchQuery::by_name("   ").is_empty());
        assert!(!SearchQuery::by_name("John Smith").is_empty());
        let phone_only = SearchQuery {
            phone: Some("5551234567".to_string()),
            ..SearchQuery::default()
        };
        assert!(!phone_only.is_empty());
    }

    #[test]
    fn test_query_matches_subject() {
        let query = SearchQuery::by_name("John Smith");
        assert!(query.matches(&PersonRecord::new("a").name("SMITH, JOHN"), 0.9));
        assert!(!query.matches(&PersonRecord::new("a").name("Mary Smith"), 0.9));

        let by_phone = SearchQuery {
            phone: Some("(555) 123-4567".to_string()),
            ..SearchQuery::default()
        };
        assert!(by_phone.matches(&PersonRecord::new("a").name("Whoever").phone("5551234567"), 0.9));
    }

    #[test]
    fn test_query_for_identity_uses_primary_fields() {
        let record = PersonRecord::new("a")
            .name("John Smith")
            .phone("555-123-4567")
            .address("123 Main St")
            .state("il");
        let normalized = NormalizedRecord::from_record(&record);
        let identity = PersonIdentity::new(Fingerprint::of(&normalized), record, &normalized, 0);

        let query = SearchQuery::for_identity(&identity);
        assert_eq!(query.name.as_deref(), Some("John Smith"));
        assert_eq!(query.phone.as_deref(), Some("5551234567"));
        assert_eq!(query.address.as_deref(), Some("123 Main St"));
        assert_eq!(query.state.as_deref(), Some("IL"));
    }

    #[test]
    fn test_in_memory_lookup_by_name_and_phone() {
        let mut gateway = InMemoryGateway::new().with_response(
            "John Smith",
            vec![PersonRecord::new("fixture").name("John Smith")],
        );
        gateway.insert(FixtureResponse {
            phone: Some("5550001111".to_string()),
            records: vec![PersonRecord::new("fixture").name("Phone Owner")],
            ..FixtureResponse::default()
        });

        let hits = gateway.search(&SearchQuery::by_name("john  smith")).unwrap();
        assert_eq!(hits.len(), 1);

        let by_phone = SearchQuery {
            name: Some("Nobody Known".to_string()),
            phone: Some("555-000-1111".to_string()),
            ..SearchQuery::default()
        };
        assert_eq!(gateway.search(&by_phone).unwrap()[0].name.as_deref(), Some("Phone Owner"));
        assert!(gateway.search(&SearchQuery::by_name("Unknown")).unwrap().is_empty());
        assert_eq!(gateway.call_count(), 3);
    }

    #[test]
    fn test_in_memory_failure() {
        let gateway = InMemoryGateway::new().with_failure("Ann Lee", FixtureFailure::RateLimited);
        let err = gateway.search(&SearchQuery::by_name("Ann Lee")).unwrap_err();
        assert_eq!(err.label(), "rate_limited");
    }

    #[test]
    fn test_fixture_json() {
        let json = r#"{
            "responses": [
                {"name": "John Smith", "records": [{"name": "John Smith", "source": "fx"}]},
                {"name": "Down Source", "failure": "source_unavailable"}
            ]
        }"#;
        let gateway = InMemoryGateway::from_json(json).unwrap();
        assert_eq!(gateway.search(&SearchQuery::by_name("John Smith")).unwrap().len(), 1);
        assert!(gateway.search(&SearchQuery::by_name("Down Source")).is_err());
    }

    #[test]
    fn test_query_budget_and_rate_limited_gateway() {
        let budget = Arc::new(QueryBudget::new(2));
        let gateway = RateLimitedGateway::new(InMemoryGateway::new(), Arc::clone(&budget));
        let query = SearchQuery::by_name("Ann Lee");

        assert!(gateway.search(&query).is_ok());
        assert!(gateway.search(&query).is_ok());
        let err = gateway.search(&query).unwrap_err();
        assert!(matches!(err, SourceError::RateLimited { .. }));
        assert_eq!(budget.remaining(), 0);

        budget.reset();
        assert_eq!(gateway.budget().used(), 0);
        assert!(gateway.search(&query).is_ok());
    }
}
