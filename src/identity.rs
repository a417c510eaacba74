//! Resolved person identities.
//!
//! A `PersonIdentity` is the merged view of one real-world person built from
//! one or more raw records. Its id is derived from the fingerprint of the
//! record that created it and never changes for the lifetime of a run.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::Fingerprint;
use crate::normalize::{NormalizedAddress, NormalizedName, NormalizedRecord};
use crate::record::{PersonRecord, RecordKind};

/// Namespace for fingerprint-derived identity ids.
const PERSON_NAMESPACE: Uuid = Uuid::from_u128(0x6b69_6e74_7261_696c_8000_0000_0000_0001);

/// Stable identity identifier.
///
/// # Examples
///
/// ```
/// use kintrail::{Fingerprint, PersonId, PersonRecord};
/// use kintrail::normalize::NormalizedRecord;
///
/// let fp = Fingerprint::of(&NormalizedRecord::from_record(&PersonRecord::new("a").name("Ann Lee")));
/// assert_eq!(PersonId::from_fingerprint(&fp), PersonId::from_fingerprint(&fp));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(Uuid);

impl PersonId {
    /// Derives the id for a fingerprint (UUIDv5).
    #[must_use]
    pub fn from_fingerprint(fingerprint: &Fingerprint) -> Self {
        Self(Uuid::new_v5(&PERSON_NAMESPACE, fingerprint.as_str().as_bytes()))
    }

    /// Creates an id from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PersonId> for Uuid {
    fn from(id: PersonId) -> Self {
        id.0
    }
}

/// How much the identity itself can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityConfidence {
    /// Built from at least one record with a strong attribute.
    Standard,
    /// Built only from name-only records; the fingerprint is weak.
    Sparse,
    /// Kept apart from a near-duplicate because strong attributes conflict.
    Ambiguous,
}

impl fmt::Display for IdentityConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Sparse => write!(f, "sparse"),
            Self::Ambiguous => write!(f, "ambiguous"),
        }
    }
}

fn push_unique<T: PartialEq>(values: &mut Vec<T>, value: T) -> bool {
    if values.contains(&value) {
        return false;
    }
    values.push(value);
    true
}

/// The resolved representation of one person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonIdentity {
    pub id: PersonId,

    /// Display name, taken from the first named record.
    pub canonical_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<NormalizedName>,

    /// Observed values in first-seen order. The first entry is the primary.
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub addresses: Vec<NormalizedAddress>,
    pub raw_addresses: Vec<String>,
    pub employers: Vec<String>,
    pub states: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dob: Option<NaiveDate>,

    pub property_listings: BTreeSet<String>,
    pub business_listings: BTreeSet<String>,
    pub mention_listings: BTreeSet<String>,

    /// True if the identity came from a business filing.
    pub business: bool,

    pub confidence: IdentityConfidence,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub possible_duplicate_of: Option<PersonId>,

    pub fingerprints: Vec<Fingerprint>,
    pub records: Vec<PersonRecord>,

    /// Position in the resolver's discovery order.
    pub discovery_seq: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersonIdentity {
    /// Creates an identity from its first record.
    #[must_use]
    pub fn new(
        fingerprint: Fingerprint,
        record: PersonRecord,
        normalized: &NormalizedRecord,
        discovery_seq: u64,
    ) -> Self {
        let now = Utc::now();
        let confidence = if normalized.is_name_only() {
            IdentityConfidence::Sparse
        } else {
            IdentityConfidence::Standard
        };
        let mut identity = Self {
            id: PersonId::from_fingerprint(&fingerprint),
            canonical_name: String::new(),
            name: None,
            phones: Vec::new(),
            emails: Vec::new(),
            addresses: Vec::new(),
            raw_addresses: Vec::new(),
            employers: Vec::new(),
            states: Vec::new(),
            dob: None,
            property_listings: BTreeSet::new(),
            business_listings: BTreeSet::new(),
            mention_listings: BTreeSet::new(),
            business: normalized.business,
            confidence,
            possible_duplicate_of: None,
            fingerprints: Vec::new(),
            records: Vec::new(),
            discovery_seq,
            created_at: now,
            updated_at: now,
        };
        identity.absorb(fingerprint, record, normalized);
        identity
    }

    /// Folds another record into this identity.
    ///
    /// Attribute sets only grow; nothing previously observed is dropped.
    pub fn absorb(&mut self, fingerprint: Fingerprint, record: PersonRecord, normalized: &NormalizedRecord) {
        if self.name.is_none() {
            if let Some(name) = &normalized.name {
                self.name = Some(name.clone());
                self.canonical_name = record.name.as_deref().unwrap_or_default().trim().to_string();
            }
        }
        if self.canonical_name.is_empty() {
            self.canonical_name = normalized
                .phone
                .as_ref()
                .map(|p| format!("unknown ({p})"))
                .unwrap_or_else(|| "unknown".to_string());
        }
        if self.dob.is_none() {
            self.dob = normalized.dob;
        }
        if let Some(phone) = &normalized.phone {
            push_unique(&mut self.phones, phone.clone());
        }
        if let Some(email) = &normalized.email {
            push_unique(&mut self.emails, email.clone());
        }
        if let Some(address) = &normalized.address {
            if push_unique(&mut self.addresses, address.clone()) {
                if let Some(raw) = &record.address {
                    self.raw_addresses.push(raw.trim().to_string());
                }
            }
        }
        if let Some(employer) = &normalized.employer {
            push_unique(&mut self.employers, employer.clone());
        }
        if let Some(state) = record.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            push_unique(&mut self.states, state.to_ascii_uppercase());
        }
        if let Some(listing) = &record.listing {
            let set = match record.kind {
                RecordKind::Property => &mut self.property_listings,
                RecordKind::Business => &mut self.business_listings,
                RecordKind::Person | RecordKind::Mention => &mut self.mention_listings,
            };
            set.insert(listing.clone());
        }
        if self.confidence == IdentityConfidence::Sparse && !normalized.is_name_only() {
            self.confidence = IdentityConfidence::Standard;
        }
        push_unique(&mut self.fingerprints, fingerprint);
        self.records.push(record);
        self.updated_at = Utc::now();
    }

    /// Normalized last name, if known.
    #[must_use]
    pub fn last_name(&self) -> Option<&str> {
        self.name.as_ref().map(|n| n.last.as_str())
    }

    /// Primary phone.
    #[must_use]
    pub fn primary_phone(&self) -> Option<&str> {
        self.phones.first().map(String::as_str)
    }

    /// Primary address, as originally written.
    #[must_use]
    pub fn primary_address(&self) -> Option<&str> {
        self.raw_addresses.first().map(String::as_str)
    }

    /// Returns true if both identities share a building-level address.
    #[must_use]
    pub fn shares_building_with(&self, other: &Self) -> bool {
        self.addresses
            .iter()
            .any(|a| other.addresses.iter().any(|b| a.building == b.building))
    }

    /// Returns true if both identities share a phone.
    #[must_use]
    pub fn shares_phone_with(&self, other: &Self) -> bool {
        self.phones.iter().any(|p| other.phones.contains(p))
    }

    /// Age difference in years, if both DOBs are known. Positive when `self` is older.
    #[must_use]
    pub fn age_gap_years(&self, other: &Self) -> Option<f64> {
        let (mine, theirs) = (self.dob?, other.dob?);
        let days = (theirs - mine).num_days();
        #[allow(clippy::cast_precision_loss)]
        let years = days as f64 / 365.25;
        Some(years)
    }

    /// Number of contributing records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl PartialEq for PersonIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PersonIdentity {}

impl std::hash::Hash for PersonIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
