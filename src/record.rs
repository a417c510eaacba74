//! Raw person records as returned by a single search source.
//!
//! A `PersonRecord` is created once per search hit and never mutated
//! afterwards. All interpretation happens downstream in the normalizer and
//! the identity resolver.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of document a record was extracted from.
///
/// The kind decides which relationship indicators a shared `listing` key
/// produces: co-owners on a deed, co-officers on a business filing, or
/// people named together in a mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A people-search result row.
    Person,
    /// A business filing or registry listing.
    Business,
    /// A property ownership record (deed, tax roll).
    Property,
    /// An unstructured mention (news article, web page, court docket).
    Mention,
}

impl Default for RecordKind {
    fn default() -> Self {
        Self::Person
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Person => write!(f, "person"),
            Self::Business => write!(f, "business"),
            Self::Property => write!(f, "property"),
            Self::Mention => write!(f, "mention"),
        }
    }
}

/// A raw, single-source person record.
///
/// # Examples
///
/// ```
/// use kintrail::{PersonRecord, RecordKind};
///
/// let record = PersonRecord::new("whitepages")
///     .name("John Smith")
///     .phone("(555) 123-4567")
///     .address("123 Main St, Springfield, IL");
/// assert_eq!(record.kind, RecordKind::Person);
/// assert!(record.has_identifying_field());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PersonRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employer: Option<String>,

    /// Tag of the source that produced this record.
    pub source: String,

    #[serde(default)]
    pub kind: RecordKind,

    /// Shared key of the underlying document. Records with the same listing
    /// were co-listed on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing: Option<String>,
}

impl PersonRecord {
    /// Creates an empty person-kind record attributed to `source`.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    #[must_use]
    pub fn dob(mut self, dob: impl Into<String>) -> Self {
        self.dob = Some(dob.into());
        self
    }

    #[must_use]
    pub fn employer(mut self, employer: impl Into<String>) -> Self {
        self.employer = Some(employer.into());
        self
    }

    /// Sets the document kind and the listing key it was co-listed under.
    #[must_use]
    pub fn listed(mut self, kind: RecordKind, listing: impl Into<String>) -> Self {
        self.kind = kind;
        self.listing = Some(listing.into());
        self
    }

    /// Returns true if the record carries a non-blank name, phone or address.
    #[must_use]
    pub fn has_identifying_field(&self) -> bool {
        [&self.name, &self.phone, &self.address]
            .iter()
            .any(|f| f.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_fields() {
        let record = PersonRecord::new("courts")
            .name("Jane Doe")
            .dob("1980-02-03")
            .listed(RecordKind::Mention, "docket-42");

        assert_eq!(record.source, "courts");
        assert_eq!(record.name.as_deref(), Some("Jane Doe"));
        assert_eq!(record.kind, RecordKind::Mention);
        assert_eq!(record.listing.as_deref(), Some("docket-42"));
    }

    #[test]
    fn test_identifying_field_ignores_blank_values() {
        let blank = PersonRecord::new("x").name("   ").dob("1990-01-01");
        assert!(!blank.has_identifying_field());

        let phone_only = PersonRecord::new("x").phone("555-123-4567");
        assert!(phone_only.has_identifying_field());
    }

    #[test]
    fn test_record_kind_display() {
        assert_eq!(format!("{}", RecordKind::Business), "business");
        assert_eq!(format!("{}", RecordKind::Property), "property");
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let json = r#"{"name":"John Smith","source":"fixture"}"#;
        let record: PersonRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind, RecordKind::Person);
        assert!(record.listing.is_none());
    }
}
