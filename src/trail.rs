//! Bounded iterative trail following.
//!
//! A run starts from a seed query, resolves what comes back into
//! identities, classifies every pair in the batch and then walks the
//! relationship graph level by level: the strongest unvisited neighbors of
//! the previous level are searched next, their results merged back in, and
//! so on until a bound is hit.
//!
//! State machine:
//!
//! ```text
//! Initial -> Searching(0) -> Expanding(0) -> Searching(1) -> ... -> Terminated
//! ```
//!
//! Searches within a level run on a `SearchPool`; merging happens on the
//! calling thread in ranked order, so a run is deterministic for identical
//! gateway responses.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TrailConfig;
use crate::detector::{RelationshipDetector, RuleSet};
use crate::dispatch::{CancellationToken, SearchHandle, SearchPool};
use crate::error::{ConfigError, SourceError, TrailResult, ValidationError};
use crate::gateway::{SearchGateway, SearchQuery};
use crate::graph::{GraphSnapshot, RelationshipGraph};
use crate::identity::{PersonId, PersonIdentity};
use crate::record::PersonRecord;
use crate::relationship::{RelationshipCategory, RelationshipEdge, Strength};
use crate::resolver::{IdentityResolver, ResolveOutcome};

pub const MIN_DEPTH: u32 = 1;
pub const MAX_DEPTH: u32 = 3;
pub const DEFAULT_DEPTH: u32 = 2;

pub const MIN_ASSOCIATES: usize = 5;
pub const MAX_ASSOCIATES: usize = 20;
pub const DEFAULT_ASSOCIATES: usize = 10;

/// Reason recorded for the seed search.
pub const INITIAL_SEARCH_REASON: &str = "Initial search";

const fn default_depth() -> u32 {
    DEFAULT_DEPTH
}

const fn default_associates() -> usize {
    DEFAULT_ASSOCIATES
}

/// A trail-run request.
///
/// `max_depth` and `max_associates` are clamped to `MIN_DEPTH..=MAX_DEPTH`
/// and `MIN_ASSOCIATES..=MAX_ASSOCIATES` whatever the caller asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailRequest {
    #[serde(flatten)]
    pub seed: SearchQuery,
    #[serde(default = "default_depth")]
    pub max_depth: u32,
    #[serde(default = "default_associates")]
    pub max_associates: usize,
}

impl TrailRequest {
    /// Request seeded by a name, with default bounds.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_query(SearchQuery::by_name(name))
    }

    /// Request seeded by an arbitrary query, with default bounds.
    #[must_use]
    pub fn from_query(seed: SearchQuery) -> Self {
        Self {
            seed,
            max_depth: DEFAULT_DEPTH,
            max_associates: DEFAULT_ASSOCIATES,
        }
    }

    #[must_use]
    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.seed.phone = Some(phone.into());
        self
    }

    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.seed.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.seed.state = Some(state.into());
        self
    }

    #[must_use]
    pub const fn max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    #[must_use]
    pub const fn max_associates(mut self, associates: usize) -> Self {
        self.max_associates = associates;
        self
    }

    /// Depth actually enforced.
    #[must_use]
    pub fn effective_depth(&self) -> u32 {
        self.max_depth.clamp(MIN_DEPTH, MAX_DEPTH)
    }

    /// Associates-per-level actually enforced.
    #[must_use]
    pub fn effective_associates(&self) -> usize {
        self.max_associates.clamp(MIN_ASSOCIATES, MAX_ASSOCIATES)
    }

    /// Validates the seed query.
    ///
    /// # Errors
    ///
    /// `ValidationError::EmptySeedQuery` if the seed has no name, phone or address.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.seed.is_empty() {
            return Err(ValidationError::EmptySeedQuery);
        }
        Ok(())
    }
}

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "level")]
pub enum TrailPhase {
    #[default]
    Initial,
    Searching(u32),
    Expanding(u32),
    Terminated,
}

impl fmt::Display for TrailPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Searching(level) => write!(f, "searching({level})"),
            Self::Expanding(level) => write!(f, "expanding({level})"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// An identity queued for searching and the edge that surfaced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: PersonId,
    /// Visited identity whose neighbor this is.
    pub via: PersonId,
    /// Category of the candidate relative to `via`.
    pub category: RelationshipCategory,
    pub strength: Strength,
    /// Discovery position of the candidate identity.
    pub seq: u64,
}

/// Mutable state of one run.
#[derive(Debug, Clone, Default)]
pub struct TrailRunState {
    phase: TrailPhase,
    visited: HashSet<PersonId>,
    pending: VecDeque<Candidate>,
    level: u32,
    searches: u32,
}

impl TrailRunState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn phase(&self) -> TrailPhase {
        self.phase
    }

    #[must_use]
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// Searches issued so far, seed included.
    #[must_use]
    pub const fn searches(&self) -> u32 {
        self.searches
    }

    #[must_use]
    pub fn is_visited(&self, id: PersonId) -> bool {
        self.visited.contains(&id)
    }

    /// Marks an identity visited. Returns false if it already was.
    pub fn mark_visited(&mut self, id: PersonId) -> bool {
        self.visited.insert(id)
    }

    #[must_use]
    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// How a trail step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    Completed,
    SourceUnavailable,
    RateLimited,
    Timeout,
}

impl From<&SourceError> for SearchOutcome {
    fn from(err: &SourceError) -> Self {
        match err {
            SourceError::SourceUnavailable { .. } => Self::SourceUnavailable,
            SourceError::RateLimited { .. } => Self::RateLimited,
            SourceError::Timeout { .. } => Self::Timeout,
        }
    }
}

/// One line of the search trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTrailEntry {
    pub level: u32,
    pub person_searched: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_id: Option<PersonId>,
    pub reason: String,
    /// Identities first seen in this search's results.
    pub persons_found: usize,
    pub outcome: SearchOutcome,
    pub timestamp: DateTime<Utc>,
}

impl SearchTrailEntry {
    fn new(
        level: u32,
        person_searched: impl Into<String>,
        person_id: Option<PersonId>,
        reason: impl Into<String>,
        persons_found: usize,
        outcome: SearchOutcome,
    ) -> Self {
        Self {
            level,
            person_searched: person_searched.into(),
            person_id,
            reason: reason.into(),
            persons_found,
            outcome,
            timestamp: Utc::now(),
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Every level up to `max_depth` was searched.
    MaxDepthReached,
    /// A level produced no unvisited candidates.
    NoNewCandidates,
    /// The search ceiling was hit with candidates left.
    BudgetExceeded,
    Cancelled,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxDepthReached => write!(f, "max_depth_reached"),
            Self::NoNewCandidates => write!(f, "no_new_candidates"),
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub unique_persons: usize,
    pub total_searches: u32,
    pub max_depth_reached: u32,
    pub budget_exceeded: bool,
}

/// Result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct TrailReport {
    /// Every identity discovered, in discovery order.
    pub all_persons: Vec<PersonIdentity>,
    pub total_persons_found: usize,
    pub total_searches_performed: u32,
    pub search_trail: Vec<SearchTrailEntry>,
    pub search_summary: SearchSummary,
    /// Graph nodes, edges and category counts, flattened into the report.
    #[serde(flatten)]
    pub graph: GraphSnapshot,
    /// Identity groups a transitive merge would unify. Reported, not applied.
    pub possible_duplicates: Vec<Vec<PersonId>>,
    pub termination: TerminationReason,
}

impl TrailReport {
    #[must_use]
    pub fn person(&self, id: PersonId) -> Option<&PersonIdentity> {
        self.all_persons.iter().find(|p| p.id == id)
    }

    /// First identity whose canonical name matches, ignoring case.
    #[must_use]
    pub fn person_named(&self, name: &str) -> Option<&PersonIdentity> {
        self.all_persons
            .iter()
            .find(|p| p.canonical_name.eq_ignore_ascii_case(name.trim()))
    }

    /// The edge between two identities, in either order.
    #[must_use]
    pub fn edge_between(&self, a: PersonId, b: PersonId) -> Option<&RelationshipEdge> {
        self.graph
            .edges
            .iter()
            .find(|e| (e.source == a && e.target == b) || (e.source == b && e.target == a))
    }

    /// Pretty JSON rendering.
    ///
    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Runs trails against one gateway.
pub struct TrailFollower {
    gateway: Arc<dyn SearchGateway>,
    config: TrailConfig,
    detector: RelationshipDetector,
}

impl TrailFollower {
    /// Creates a follower.
    ///
    /// # Errors
    ///
    /// `TrailError::Config` if the configuration is out of range.
    pub fn new(gateway: Arc<dyn SearchGateway>, config: TrailConfig) -> TrailResult<Self> {
        config.validate().map_err(ConfigError::Invalid)?;
        let detector = RelationshipDetector::new(RuleSet::standard(), config.corroboration_bonus);
        Ok(Self {
            gateway,
            config,
            detector,
        })
    }

    /// Replaces the detector, for example with a custom rule table.
    #[must_use]
    pub fn with_detector(mut self, detector: RelationshipDetector) -> Self {
        self.detector = detector;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &TrailConfig {
        &self.config
    }

    /// Runs a trail to completion.
    ///
    /// # Errors
    ///
    /// `TrailError::Validation` for an empty seed query, `TrailError::Internal`
    /// if the search pool cannot start. Source failures never fail the run.
    pub fn run(&self, request: &TrailRequest) -> TrailResult<TrailReport> {
        self.run_with_cancel(request, &CancellationToken::new())
    }

    /// Runs a trail that stops early, with a partial report, once `cancel` fires.
    ///
    /// # Errors
    ///
    /// As `run`.
    pub fn run_with_cancel(&self, request: &TrailRequest, cancel: &CancellationToken) -> TrailResult<TrailReport> {
        request.validate()?;
        let pool = SearchPool::start(
            Arc::clone(&self.gateway),
            self.config.workers,
            self.config.queue_capacity,
            self.config.search_timeout(),
        )?;

        info!(
            seed = %request.seed.label(),
            gateway = self.gateway.name(),
            max_depth = request.effective_depth(),
            max_associates = request.effective_associates(),
            "trail run started"
        );

        let mut run = TrailRun {
            detector: &self.detector,
            pool: &pool,
            cancel,
            seed: &request.seed,
            name_threshold: self.config.name_threshold,
            max_depth: request.effective_depth(),
            max_associates: request.effective_associates(),
            ceiling: self.config.effective_search_ceiling(),
            resolver: IdentityResolver::new(self.config.name_threshold),
            graph: RelationshipGraph::new(),
            state: TrailRunState::new(),
            trail: Vec::new(),
            budget_exceeded: false,
            max_depth_reached: 0,
        };
        let termination = run.execute();
        Ok(run.finish(termination))
    }
}

fn push_unique(ids: &mut Vec<PersonId>, id: PersonId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

struct TrailRun<'a> {
    detector: &'a RelationshipDetector,
    pool: &'a SearchPool,
    cancel: &'a CancellationToken,
    seed: &'a SearchQuery,
    name_threshold: f32,
    max_depth: u32,
    max_associates: usize,
    ceiling: u32,
    resolver: IdentityResolver,
    graph: RelationshipGraph,
    state: TrailRunState,
    trail: Vec<SearchTrailEntry>,
    budget_exceeded: bool,
    max_depth_reached: u32,
}

impl TrailRun<'_> {
    fn execute(&mut self) -> TerminationReason {
        if self.cancel.is_cancelled() {
            return TerminationReason::Cancelled;
        }
        let mut frontier = self.search_seed();

        for level in MIN_DEPTH..=self.max_depth {
            if self.cancel.is_cancelled() {
                return TerminationReason::Cancelled;
            }
            self.state.phase = TrailPhase::Expanding(level - 1);
            self.queue_candidates(&frontier);
            if self.state.pending.is_empty() {
                debug!(level, "no unvisited candidates");
                return TerminationReason::NoNewCandidates;
            }

            self.state.phase = TrailPhase::Searching(level);
            self.state.level = level;
            info!(level, candidates = self.state.pending.len(), "searching level");
            match self.search_level(level) {
                Ok(searched) => frontier = searched,
                Err(reason) => return reason,
            }
        }
        TerminationReason::MaxDepthReached
    }

    fn dispatch(&mut self, query: SearchQuery) -> Result<SearchHandle, SourceError> {
        self.state.searches += 1;
        self.pool.try_submit(query)
    }

    fn resolve(&mut self, record: PersonRecord) -> Option<ResolveOutcome> {
        match self.resolver.resolve(record) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                debug!(error = %err, "skipping record");
                None
            }
        }
    }

    /// Seed search. Returns the subject identities, now visited.
    fn search_seed(&mut self) -> Vec<PersonId> {
        self.state.phase = TrailPhase::Searching(0);
        let seed = self.seed;
        let label = seed.label();

        let records = match self.dispatch(seed.clone()).and_then(SearchHandle::wait) {
            Ok(records) => records,
            Err(err) => {
                warn!(seed = %label, error = %err, "seed search failed");
                self.trail.push(SearchTrailEntry::new(
                    0,
                    label,
                    None,
                    err.label(),
                    0,
                    SearchOutcome::from(&err),
                ));
                return Vec::new();
            }
        };

        let any_match = records.iter().any(|r| seed.matches(r, self.name_threshold));
        let mut batch = Vec::new();
        let mut subjects = Vec::new();
        let mut found = 0;
        for record in records {
            let is_subject = !any_match || seed.matches(&record, self.name_threshold);
            let Some(outcome) = self.resolve(record) else {
                continue;
            };
            if outcome.is_new() {
                found += 1;
            }
            push_unique(&mut batch, outcome.id);
            if is_subject {
                push_unique(&mut subjects, outcome.id);
            }
        }
        self.detect_batch(&batch);
        for id in &subjects {
            self.state.mark_visited(*id);
        }

        info!(
            seed = %label,
            subjects = subjects.len(),
            associates = batch.len() - subjects.len(),
            "seed search completed"
        );
        self.trail.push(SearchTrailEntry::new(
            0,
            label,
            subjects.first().copied(),
            INITIAL_SEARCH_REASON,
            found,
            SearchOutcome::Completed,
        ));
        subjects
    }

    /// Ranks the unvisited neighbors of `frontier` into the pending queue.
    ///
    /// Visited identities are dropped here and only here; nothing is marked
    /// visited between ranking and dispatch except the candidate itself.
    fn queue_candidates(&mut self, frontier: &[PersonId]) {
        let mut best: HashMap<PersonId, Candidate> = HashMap::new();
        for via in frontier {
            for neighbor in self.graph.neighbors(*via) {
                if self.state.is_visited(neighbor.id) {
                    continue;
                }
                let candidate = Candidate {
                    id: neighbor.id,
                    via: *via,
                    category: neighbor.category(),
                    strength: neighbor.strength(),
                    seq: self.resolver.get(neighbor.id).map_or(u64::MAX, |p| p.discovery_seq),
                };
                match best.entry(neighbor.id) {
                    Entry::Occupied(mut slot) => {
                        if candidate.strength.value() > slot.get().strength.value() {
                            slot.insert(candidate);
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(candidate);
                    }
                }
            }
        }

        let mut ranked: Vec<Candidate> = best.into_values().collect();
        ranked.sort_by(|a, b| {
            b.strength
                .value()
                .partial_cmp(&a.strength.value())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        ranked.truncate(self.max_associates);
        self.state.pending = ranked.into();
    }

    /// Searches the pending queue in waves no larger than the worker count,
    /// so no search sits in the queue behind another of the same wave.
    /// Returns the identities searched at this level.
    fn search_level(&mut self, level: u32) -> Result<Vec<PersonId>, TerminationReason> {
        let mut searched = Vec::new();
        let mut stop = None;

        while stop.is_none() && !self.state.pending.is_empty() {
            let mut wave = Vec::new();
            while wave.len() < self.pool.wave_size() {
                let Some(candidate) = self.state.pending.pop_front() else {
                    break;
                };
                if self.cancel.is_cancelled() {
                    stop = Some(TerminationReason::Cancelled);
                    break;
                }
                if self.state.searches >= self.ceiling {
                    self.budget_exceeded = true;
                    stop = Some(TerminationReason::BudgetExceeded);
                    break;
                }
                let Some(identity) = self.resolver.get(candidate.id) else {
                    continue;
                };
                let query = SearchQuery::for_identity(identity);
                self.state.mark_visited(candidate.id);
                let handle = self.dispatch(query);
                wave.push((candidate, handle));
            }

            if !wave.is_empty() {
                self.max_depth_reached = level;
            }
            for (candidate, handle) in wave {
                let result = handle.and_then(SearchHandle::wait);
                self.merge_result(level, &candidate, result);
                searched.push(candidate.id);
            }
        }

        match stop {
            Some(TerminationReason::BudgetExceeded) => {
                info!(searches = self.state.searches, ceiling = self.ceiling, "search ceiling reached");
                Err(TerminationReason::BudgetExceeded)
            }
            Some(reason) => Err(reason),
            None => Ok(searched),
        }
    }

    fn merge_result(&mut self, level: u32, candidate: &Candidate, result: Result<Vec<PersonRecord>, SourceError>) {
        let name = self.display_name(candidate.id);
        match result {
            Ok(records) => {
                let mut batch = vec![candidate.id];
                let mut found = 0;
                for record in records {
                    if let Some(outcome) = self.resolve(record) {
                        if outcome.is_new() {
                            found += 1;
                        }
                        push_unique(&mut batch, outcome.id);
                    }
                }
                self.detect_batch(&batch);
                debug!(level, person = %name, found, "search completed");
                let reason = self.describe(candidate);
                self.trail.push(SearchTrailEntry::new(
                    level,
                    name,
                    Some(candidate.id),
                    reason,
                    found,
                    SearchOutcome::Completed,
                ));
            }
            Err(err) => {
                warn!(level, person = %name, error = %err, "search failed; continuing");
                self.trail.push(SearchTrailEntry::new(
                    level,
                    name,
                    Some(candidate.id),
                    err.label(),
                    0,
                    SearchOutcome::from(&err),
                ));
            }
        }
    }

    /// Classifies every pair in the batch into the graph.
    fn detect_batch(&mut self, batch: &[PersonId]) {
        for id in batch {
            self.graph.add_node(*id);
        }
        for (i, a) in batch.iter().enumerate() {
            for b in &batch[i + 1..] {
                let (Some(pa), Some(pb)) = (self.resolver.get(*a), self.resolver.get(*b)) else {
                    continue;
                };
                if let Some(edge) = self.detector.detect(pa, pb) {
                    let category = edge.category;
                    let update = self.graph.add_edge(edge);
                    debug!(a = %pa.canonical_name, b = %pb.canonical_name, %category, ?update, "edge");
                }
            }
        }
    }

    fn display_name(&self, id: PersonId) -> String {
        self.resolver
            .get(id)
            .map(|p| p.canonical_name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn describe(&self, candidate: &Candidate) -> String {
        format!(
            "{} of {} ({})",
            candidate.category,
            self.display_name(candidate.via),
            candidate.strength
        )
    }

    fn finish(mut self, termination: TerminationReason) -> TrailReport {
        self.state.phase = TrailPhase::Terminated;
        let all_persons: Vec<PersonIdentity> = self.resolver.iter().cloned().collect();
        let search_summary = SearchSummary {
            unique_persons: all_persons.len(),
            total_searches: self.state.searches,
            max_depth_reached: self.max_depth_reached,
            budget_exceeded: self.budget_exceeded,
        };
        info!(
            %termination,
            persons = search_summary.unique_persons,
            searches = search_summary.total_searches,
            edges = self.graph.edge_count(),
            "trail run finished"
        );

        TrailReport {
            total_persons_found: all_persons.len(),
            total_searches_performed: self.state.searches,
            all_persons,
            search_trail: self.trail,
            search_summary,
            graph: GraphSnapshot::from(&self.graph),
            possible_duplicates: self.resolver.transitive_groups(),
            termination,
        }
    }
}
