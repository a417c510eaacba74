//! Identity resolution.
//!
//! The resolver owns every `PersonIdentity` of a run. Each incoming record
//! either routes to an existing identity or creates a new one:
//!
//! 1. A record whose fingerprint is already known joins that identity.
//! 2. Otherwise the first identity (in discovery order) whose name is at
//!    least `name_threshold` similar and which shares a phone or a
//!    building-level address absorbs it.
//! 3. Otherwise a new identity is created.
//!
//! Merges are local: absorbing a record never triggers re-comparison of
//! existing identities. `transitive_groups` reports the groups a closure
//! pass would unify without performing it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ValidationError;
use crate::fingerprint::Fingerprint;
use crate::identity::{IdentityConfidence, PersonId, PersonIdentity};
use crate::normalize::NormalizedRecord;
use crate::record::{PersonRecord, RecordKind};

/// Default minimum name similarity for attribute-backed merges.
pub const DEFAULT_NAME_THRESHOLD: f32 = 0.90;

/// Edit distance between two strings, counted in chars.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized edit-distance similarity in [0.0, 1.0].
///
/// # Examples
///
/// ```
/// use kintrail::resolver::name_similarity;
///
/// assert_eq!(name_similarity("john smith", "john smith"), 1.0);
/// assert!(name_similarity("jon smith", "john smith") >= 0.90);
/// assert!(name_similarity("mary smith", "john smith") < 0.90);
/// ```
#[must_use]
pub fn name_similarity(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let sim = 1.0 - levenshtein_distance(a, b) as f32 / max_len as f32;
    sim.clamp(0.0, 1.0)
}

/// How a record was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveKind {
    /// A new identity was created.
    Created,
    /// The record joined an existing identity.
    Merged,
    /// A near-duplicate with conflicting DOB exists; a separate identity was created.
    Ambiguous,
}

/// Result of resolving one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOutcome {
    pub id: PersonId,
    pub kind: ResolveKind,
}

impl ResolveOutcome {
    /// Returns true if the record produced a previously unknown identity.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self.kind, ResolveKind::Created | ResolveKind::Ambiguous)
    }
}

enum MergeCheck {
    Eligible,
    Conflicting,
    Ineligible,
}

/// Owns and indexes all identities of a run.
#[derive(Debug)]
pub struct IdentityResolver {
    name_threshold: f32,
    identities: HashMap<PersonId, PersonIdentity>,
    order: Vec<PersonId>,
    by_fingerprint: HashMap<Fingerprint, PersonId>,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_THRESHOLD)
    }
}

impl IdentityResolver {
    /// Creates an empty resolver with the given name threshold.
    #[must_use]
    pub fn new(name_threshold: f32) -> Self {
        Self {
            name_threshold: name_threshold.clamp(0.0, 1.0),
            identities: HashMap::new(),
            order: Vec::new(),
            by_fingerprint: HashMap::new(),
        }
    }

    /// Resolves a record into an identity, creating or merging.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyRecord` if no name, phone or address
    /// survives normalization.
    pub fn resolve(&mut self, record: PersonRecord) -> Result<ResolveOutcome, ValidationError> {
        let normalized = NormalizedRecord::from_record(&record);
        if normalized.is_empty() {
            return Err(ValidationError::EmptyRecord);
        }
        let fingerprint = Fingerprint::of(&normalized);

        if let Some(&id) = self.by_fingerprint.get(&fingerprint) {
            if let Some(identity) = self.identities.get_mut(&id) {
                identity.absorb(fingerprint, record, &normalized);
                debug!(person = %id, "record joined identity by fingerprint");
                return Ok(ResolveOutcome { id, kind: ResolveKind::Merged });
            }
        }

        let business = record.kind == RecordKind::Business;
        let mut conflicting = None;
        let mut target = None;
        for id in &self.order {
            let Some(identity) = self.identities.get(id) else {
                continue;
            };
            match self.check_merge(identity, &normalized, business) {
                MergeCheck::Eligible => {
                    target = Some(*id);
                    break;
                }
                MergeCheck::Conflicting => {
                    conflicting.get_or_insert(*id);
                }
                MergeCheck::Ineligible => {}
            }
        }

        if let Some(id) = target {
            if let Some(identity) = self.identities.get_mut(&id) {
                identity.absorb(fingerprint.clone(), record, &normalized);
                self.by_fingerprint.insert(fingerprint, id);
                debug!(person = %id, "record merged by name similarity and shared attribute");
                return Ok(ResolveOutcome { id, kind: ResolveKind::Merged });
            }
        }

        let seq = self.order.len() as u64;
        let mut identity = PersonIdentity::new(fingerprint.clone(), record, &normalized, seq);
        let kind = match conflicting {
            Some(other) => {
                identity.confidence = IdentityConfidence::Ambiguous;
                identity.possible_duplicate_of = Some(other);
                info!(
                    person = %identity.id,
                    near_duplicate = %other,
                    "conflicting DOB with near-duplicate; keeping identities separate"
                );
                ResolveKind::Ambiguous
            }
            None => {
                debug!(person = %identity.id, name = %identity.canonical_name, "identity created");
                ResolveKind::Created
            }
        };

        let id = identity.id;
        self.by_fingerprint.insert(fingerprint, id);
        self.order.push(id);
        self.identities.insert(id, identity);
        Ok(ResolveOutcome { id, kind })
    }

    fn check_merge(&self, identity: &PersonIdentity, record: &NormalizedRecord, business: bool) -> MergeCheck {
        if identity.business != business {
            return MergeCheck::Ineligible;
        }
        let (Some(existing), Some(incoming)) = (&identity.name, &record.name) else {
            return MergeCheck::Ineligible;
        };
        if existing.suffix != incoming.suffix
            || name_similarity(&existing.full, &incoming.full) < self.name_threshold
        {
            return MergeCheck::Ineligible;
        }

        let phone_overlap = record
            .phone
            .as_ref()
            .is_some_and(|p| identity.phones.contains(p));
        let address_overlap = record
            .address
            .as_ref()
            .is_some_and(|a| identity.addresses.iter().any(|b| b.building == a.building));
        if !phone_overlap && !address_overlap {
            return MergeCheck::Ineligible;
        }

        match (identity.dob, record.dob) {
            (Some(a), Some(b)) if a != b => MergeCheck::Conflicting,
            _ => MergeCheck::Eligible,
        }
    }

    fn pair_eligible(&self, a: &PersonIdentity, b: &PersonIdentity) -> bool {
        if a.business != b.business {
            return false;
        }
        let (Some(na), Some(nb)) = (&a.name, &b.name) else {
            return false;
        };
        if na.suffix != nb.suffix || name_similarity(&na.full, &nb.full) < self.name_threshold {
            return false;
        }
        if !(a.shares_phone_with(b) || a.shares_building_with(b)) {
            return false;
        }
        !matches!((a.dob, b.dob), (Some(x), Some(y)) if x != y)
    }

    /// Groups of identities a transitive closure pass would unify.
    ///
    /// Runs a union-find over all merge-eligible identity pairs. Only groups
    /// with more than one member are returned, each in discovery order.
    /// Identities are not modified.
    #[must_use]
    pub fn transitive_groups(&self) -> Vec<Vec<PersonId>> {
        let n = self.order.len();
        let mut parent: Vec<usize> = (0..n).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for i in 0..n {
            for j in (i + 1)..n {
                let (Some(a), Some(b)) = (
                    self.identities.get(&self.order[i]),
                    self.identities.get(&self.order[j]),
                ) else {
                    continue;
                };
                if self.pair_eligible(a, b) {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    if ri != rj {
                        // Earliest-discovered member stays the root.
                        parent[ri.max(rj)] = ri.min(rj);
                    }
                }
            }
        }

        let mut groups: Vec<(usize, Vec<PersonId>)> = Vec::new();
        for (i, id) in self.order.iter().enumerate() {
            let root = find(&mut parent, i);
            match groups.iter_mut().find(|(r, _)| *r == root) {
                Some((_, members)) => members.push(*id),
                None => groups.push((root, vec![*id])),
            }
        }
        groups
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(_, members)| members)
            .collect()
    }

    /// Looks up an identity by id.
    #[must_use]
    pub fn get(&self, id: PersonId) -> Option<&PersonIdentity> {
        self.identities.get(&id)
    }

    /// Returns true if the id is known.
    #[must_use]
    pub fn contains(&self, id: PersonId) -> bool {
        self.identities.contains_key(&id)
    }

    /// Identity routed to a fingerprint, if any.
    #[must_use]
    pub fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<PersonId> {
        self.by_fingerprint.get(fingerprint).copied()
    }

    /// Iterates identities in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &PersonIdentity> {
        self.order.iter().filter_map(|id| self.identities.get(id))
    }

    /// Number of identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if nothing has been resolved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The configured name threshold.
    #[must_use]
    pub const fn name_threshold(&self) -> f32 {
        self.name_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn john() -> PersonRecord {
        PersonRecord::new("a")
            .name("John Smith")
            .phone("555-123-4567")
            .address("123 Main St")
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("smith", "smyth"), 1);
    }

    #[test]
    fn test_identical_fingerprint_merges() {
        let mut resolver = IdentityResolver::default();
        let first = resolver.resolve(john()).unwrap();
        let second = resolver.resolve(john()).unwrap();

        assert_eq!(first.kind, ResolveKind::Created);
        assert_eq!(second.kind, ResolveKind::Merged);
        assert_eq!(first.id, second.id);
        assert_eq!(resolver.len(), 1);
        assert_eq!(resolver.get(first.id).unwrap().record_count(), 2);
    }

    #[test]
    fn test_similar_name_with_shared_phone_merges() {
        let mut resolver = IdentityResolver::default();
        let first = resolver.resolve(john()).unwrap();
        let variant = PersonRecord::new("b")
            .name("Jon Smith")
            .phone("(555) 123-4567")
            .employer("Acme");
        let second = resolver.resolve(variant).unwrap();

        assert_eq!(second.kind, ResolveKind::Merged);
        assert_eq!(second.id, first.id);
        let identity = resolver.get(first.id).unwrap();
        assert_eq!(identity.employers, vec!["acme"]);
        assert_eq!(identity.canonical_name, "John Smith");
    }

    #[test]
    fn test_similar_name_without_strong_overlap_stays_separate() {
        let mut resolver = IdentityResolver::default();
        let first = resolver.resolve(john()).unwrap();
        let other = resolver
            .resolve(PersonRecord::new("b").name("John Smith").address("9 Oak Ave"))
            .unwrap();
        assert_eq!(other.kind, ResolveKind::Created);
        assert_ne!(other.id, first.id);
    }

    #[test]
    fn test_conflicting_dob_is_ambiguous() {
        let mut resolver = IdentityResolver::default();
        let first = resolver.resolve(john().dob("1960-05-01")).unwrap();
        let other = resolver
            .resolve(
                PersonRecord::new("b")
                    .name("John Smith")
                    .address("123 Main Street")
                    .dob("1991-02-02"),
            )
            .unwrap();

        assert_eq!(other.kind, ResolveKind::Ambiguous);
        assert!(other.is_new());
        let identity = resolver.get(other.id).unwrap();
        assert_eq!(identity.confidence, IdentityConfidence::Ambiguous);
        assert_eq!(identity.possible_duplicate_of, Some(first.id));
    }

    #[test]
    fn test_business_records_do_not_merge_with_personal() {
        let mut resolver = IdentityResolver::default();
        let person = resolver.resolve(john()).unwrap();
        let filing = resolver
            .resolve(
                PersonRecord::new("sos")
                    .name("John Smith")
                    .phone("5551234567")
                    .listed(RecordKind::Business, "llc-77"),
            )
            .unwrap();
        assert_ne!(person.id, filing.id);
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn test_business_filing_with_identical_fields_stays_separate() {
        let mut resolver = IdentityResolver::default();
        let person = resolver
            .resolve(PersonRecord::new("people").name("John Smith").phone("5551234567"))
            .unwrap();
        let filing = resolver
            .resolve(
                PersonRecord::new("sos")
                    .name("John Smith")
                    .phone("5551234567")
                    .listed(RecordKind::Business, "llc-1"),
            )
            .unwrap();

        assert_ne!(person.id, filing.id);
        assert_eq!(filing.kind, ResolveKind::Created);
        assert_eq!(resolver.len(), 2);

        let personal = resolver.get(person.id).unwrap();
        assert!(!personal.business);
        assert!(personal.business_listings.is_empty());
        let business = resolver.get(filing.id).unwrap();
        assert!(business.business);
        assert!(business.business_listings.contains("llc-1"));
    }

    #[test]
    fn test_non_latin_name_only_record_resolves() {
        let mut resolver = IdentityResolver::default();
        let outcome = resolver.resolve(PersonRecord::new("a").name("Иван Петров")).unwrap();
        let identity = resolver.get(outcome.id).unwrap();
        assert_eq!(identity.confidence, IdentityConfidence::Sparse);
        assert_eq!(identity.canonical_name, "Иван Петров");

        let again = resolver.resolve(PersonRecord::new("b").name("ИВАН ПЕТРОВ")).unwrap();
        assert_eq!(again.id, outcome.id);
        assert_eq!(again.kind, ResolveKind::Merged);
    }

    #[test]
    fn test_empty_record_rejected() {
        let mut resolver = IdentityResolver::default();
        let err = resolver.resolve(PersonRecord::new("a").dob("1980")).unwrap_err();
        assert_eq!(err, ValidationError::EmptyRecord);
        assert!(resolver.is_empty());
    }

    #[test]
    fn test_merges_are_not_transitive() {
        let mut resolver = IdentityResolver::default();
        // A: phone P1. B: same name, phone P2 only, so it stays separate.
        let a = resolver
            .resolve(PersonRecord::new("a").name("John Smith").phone("5550000001"))
            .unwrap();
        let b = resolver
            .resolve(PersonRecord::new("b").name("John Smith").phone("5550000002"))
            .unwrap();
        assert_ne!(a.id, b.id);

        // C links P1 and P2; it joins A only.
        let c = resolver
            .resolve(
                PersonRecord::new("c")
                    .name("John Smith")
                    .phone("5550000001")
                    .address("1 Elm St"),
            )
            .unwrap();
        assert_eq!(c.id, a.id);
        let d = resolver
            .resolve(
                PersonRecord::new("d")
                    .name("John Smith")
                    .phone("5550000002")
                    .address("1 Elm St"),
            )
            .unwrap();
        assert_eq!(d.id, a.id);
        assert_eq!(resolver.len(), 2);

        // A now shares P2 with B; the closure report sees it, the index does not.
        let groups = resolver.transitive_groups();
        assert_eq!(groups, vec![vec![a.id, b.id]]);
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn test_iter_preserves_discovery_order() {
        let mut resolver = IdentityResolver::default();
        let names = ["Ann Lee", "Bo Chen", "Cy Diaz"];
        for name in names {
            resolver.resolve(PersonRecord::new("a").name(name)).unwrap();
        }
        let seen: Vec<&str> = resolver.iter().map(|p| p.canonical_name.as_str()).collect();
        assert_eq!(seen, names);
        let seqs: Vec<u64> = resolver.iter().map(|p| p.discovery_seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }
}
