//! # kintrail - Relationship Inference and Trail Following
//!
//! kintrail turns batches of raw, multi-source person records into a
//! deduplicated identity graph, classifies the relationships between
//! identities, and follows the strongest relationships outward through an
//! external search gateway, one bounded level at a time.
//!
//! ## Core Concepts
//!
//! - **PersonRecord**: A raw, single-source lookup result
//! - **PersonIdentity**: The merged view of one person, with a fingerprint-derived id
//! - **RelationshipEdge**: A classified, evidence-backed link between two identities
//! - **TrailReport**: Everything a run discovered, plus the ordered search trail
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use kintrail::{InMemoryGateway, PersonRecord, TrailConfig, TrailFollower, TrailRequest};
//!
//! let gateway = InMemoryGateway::new().with_response(
//!     "John Smith",
//!     vec![
//!         PersonRecord::new("people-search").name("John Smith").address("123 Main St"),
//!         PersonRecord::new("people-search").name("Mary Smith").address("123 Main Street"),
//!     ],
//! );
//!
//! let follower = TrailFollower::new(Arc::new(gateway), TrailConfig::default())?;
//! let report = follower.run(&TrailRequest::new("John Smith").max_depth(1))?;
//! assert_eq!(report.graph.edges.len(), 1);
//! # Ok::<(), kintrail::TrailError>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Records and identities
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod normalize;
pub mod record;
pub mod resolver;

// Relationships
pub mod detector;
pub mod graph;
pub mod relationship;

// Trail following
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod trail;

// Re-export primary types at crate root for convenience
pub use config::{TrailConfig, HARD_SEARCH_CEILING};
pub use detector::{detect, PairFacts, RelationshipDetector, RelationshipRule, RuleSet};
pub use dispatch::CancellationToken;
pub use error::{ConfigError, SourceError, TrailError, TrailResult, ValidationError};
pub use fingerprint::Fingerprint;
pub use gateway::{InMemoryGateway, QueryBudget, RateLimitedGateway, SearchGateway, SearchQuery};
pub use graph::{EdgeUpdate, GraphSnapshot, RelationshipGraph};
pub use identity::{IdentityConfidence, PersonId, PersonIdentity};
pub use record::{PersonRecord, RecordKind};
pub use relationship::{Indicator, RelationshipCategory, RelationshipEdge, Strength};
pub use resolver::{IdentityResolver, ResolveKind, ResolveOutcome};
pub use trail::{
    SearchOutcome, SearchSummary, SearchTrailEntry, TerminationReason, TrailFollower, TrailPhase, TrailReport,
    TrailRequest,
};
