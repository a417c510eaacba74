//! Deterministic record fingerprints.
//!
//! A fingerprint is the BLAKE3 hash of the normalized
//! `name|phone|address|dob|domain` tuple. Missing fields are rendered as a
//! fixed placeholder rather than omitted, so records that differ only in which
//! fields are populated never collide. The domain keeps business filings and
//! personal records apart even when every other field matches.

use std::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::normalize::NormalizedRecord;

/// Placeholder for an absent field.
pub const MISSING_FIELD: &str = "\u{2205}";

const FIELD_SEPARATOR: u8 = b'|';

const PERSONAL_DOMAIN: &str = "person";
const BUSINESS_DOMAIN: &str = "business";

/// Hex-encoded BLAKE3 fingerprint of a normalized record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of a normalized record.
    ///
    /// # Examples
    ///
    /// ```
    /// use kintrail::{Fingerprint, PersonRecord};
    /// use kintrail::normalize::NormalizedRecord;
    ///
    /// let a = NormalizedRecord::from_record(&PersonRecord::new("a").name("John Smith"));
    /// let b = NormalizedRecord::from_record(&PersonRecord::new("b").name("SMITH, John"));
    /// assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    /// ```
    #[must_use]
    pub fn of(record: &NormalizedRecord) -> Self {
        let name = record.name.as_ref().map(|n| match &n.suffix {
            Some(suffix) => format!("{} {suffix}", n.full),
            None => n.full.clone(),
        });
        let dob = record.dob.map(|d| d.format("%Y-%m-%d").to_string());

        let fields = [
            name.as_deref(),
            record.phone.as_deref(),
            record.address.as_ref().map(|a| a.unit_level.as_str()),
            dob.as_deref(),
            Some(if record.business { BUSINESS_DOMAIN } else { PERSONAL_DOMAIN }),
        ];

        let mut hasher = Hasher::new();
        for (idx, field) in fields.iter().enumerate() {
            if idx > 0 {
                hasher.update(&[FIELD_SEPARATOR]);
            }
            hasher.update(field.unwrap_or(MISSING_FIELD).as_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Returns the hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{PersonRecord, RecordKind};

    fn fp(record: &PersonRecord) -> Fingerprint {
        Fingerprint::of(&NormalizedRecord::from_record(record))
    }

    #[test]
    fn test_identical_records_share_fingerprint() {
        let record = PersonRecord::new("a")
            .name("Mary Smith")
            .phone("555-123-4567")
            .address("123 Main St")
            .dob("1980-01-01");
        assert_eq!(fp(&record), fp(&record.clone()));
    }

    #[test]
    fn test_source_tag_does_not_affect_fingerprint() {
        let a = PersonRecord::new("source-a").name("Mary Smith").phone("5551234567");
        let b = PersonRecord::new("source-b").name("mary  smith").phone("(555) 123-4567");
        assert_eq!(fp(&a), fp(&b));
    }

    #[test]
    fn test_field_position_is_preserved() {
        // Same values in different slots must not collide.
        let with_phone = PersonRecord::new("a").name("Mary Smith").phone("5551234567");
        let with_dob = PersonRecord::new("a").name("Mary Smith").dob("1980-01-01");
        let name_only = PersonRecord::new("a").name("Mary Smith");
        assert_ne!(fp(&with_phone), fp(&with_dob));
        assert_ne!(fp(&with_phone), fp(&name_only));
        assert_ne!(fp(&with_dob), fp(&name_only));
    }

    #[test]
    fn test_suffix_distinguishes_generations() {
        let senior = PersonRecord::new("a").name("John Smith Sr").address("1 Elm St");
        let junior = PersonRecord::new("a").name("John Smith Jr").address("1 Elm St");
        assert_ne!(fp(&senior), fp(&junior));
    }

    #[test]
    fn test_business_domain_splits_identical_fields() {
        let person = PersonRecord::new("a").name("John Smith").phone("5551234567");
        let filing = person.clone().listed(RecordKind::Business, "llc-1");
        assert_ne!(fp(&person), fp(&filing));

        // Other listing kinds stay in the personal domain.
        let deed = person.clone().listed(RecordKind::Property, "deed-1");
        assert_eq!(fp(&person), fp(&deed));
    }

    #[test]
    fn test_fingerprint_is_hex() {
        let f = fp(&PersonRecord::new("a").name("Ann Lee"));
        assert_eq!(f.as_str().len(), 64);
        assert!(f.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
