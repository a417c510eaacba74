//! Field canonicalization for raw person records.
//!
//! Every comparison the resolver and detector make runs on the output of
//! this module, never on raw strings. Normalization is deterministic and
//! total: malformed input yields `None`, not an error.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::record::{PersonRecord, RecordKind};

const GENERATIONAL_SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv"];

/// Street-type and directional abbreviations, expanded to their long form.
const ADDRESS_ABBREVIATIONS: &[(&str, &str)] = &[
    ("st", "street"),
    ("str", "street"),
    ("ave", "avenue"),
    ("av", "avenue"),
    ("rd", "road"),
    ("dr", "drive"),
    ("ln", "lane"),
    ("blvd", "boulevard"),
    ("ct", "court"),
    ("pl", "place"),
    ("hwy", "highway"),
    ("pkwy", "parkway"),
    ("cir", "circle"),
    ("ter", "terrace"),
    ("trl", "trail"),
    ("sq", "square"),
    ("n", "north"),
    ("s", "south"),
    ("e", "east"),
    ("w", "west"),
    ("ne", "northeast"),
    ("nw", "northwest"),
    ("se", "southeast"),
    ("sw", "southwest"),
];

fn unit_regex() -> &'static Regex {
    static UNIT: OnceLock<Regex> = OnceLock::new();
    UNIT.get_or_init(|| {
        Regex::new(r"(?:\b(?:apt|apartment|unit|suite|ste|floor|rm|room)\b\.?\s*#?|#)\s*([a-z0-9-]+)")
            .expect("unit designator pattern is valid")
    })
}

/// Letters that carry a stroke or ligature instead of a combining mark, so
/// canonical decomposition leaves them intact.
fn fold_undecomposable(c: char, out: &mut String) -> bool {
    let folded = match c {
        'æ' => "ae",
        'œ' => "oe",
        'ß' => "ss",
        'ø' => "o",
        'đ' | 'ð' => "d",
        'ł' => "l",
        'ı' => "i",
        'ħ' => "h",
        'þ' => "th",
        _ => return false,
    };
    out.push_str(folded);
    true
}

/// Lower-cases and strips diacritics.
///
/// Characters are decomposed (NFD) and combining marks dropped, so any
/// accented letter folds to its base letter. Non-Latin scripts keep their
/// letters.
#[must_use]
pub fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.nfd().flat_map(char::to_lowercase) {
        if is_combining_mark(c) || fold_undecomposable(c, &mut out) {
            continue;
        }
        out.push(c);
    }
    out
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// A canonical person name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedName {
    /// All name tokens except the suffix, space separated.
    pub full: String,
    pub first: String,
    pub last: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

/// Normalizes a person name.
///
/// "Smith, John Jr." and "John Smith Jr" normalize identically.
///
/// # Examples
///
/// ```
/// use kintrail::normalize::normalize_name;
///
/// let name = normalize_name("José  Núñez, Jr.").unwrap();
/// assert_eq!(name.full, "jose nunez");
/// assert_eq!(name.suffix.as_deref(), Some("jr"));
/// ```
#[must_use]
pub fn normalize_name(raw: &str) -> Option<NormalizedName> {
    let folded = fold(raw);

    // "Last, First" ordering, unless the part after the comma is only a suffix.
    let ordered = match folded.split_once(',') {
        Some((head, tail)) => {
            let tail_tokens = tokens(tail);
            let tail_is_suffix = !tail_tokens.is_empty()
                && tail_tokens.iter().all(|t| GENERATIONAL_SUFFIXES.contains(&t.as_str()));
            if tail_tokens.is_empty() || tail_is_suffix {
                format!("{head} {tail}")
            } else {
                format!("{tail} {head}")
            }
        }
        None => folded,
    };

    let mut parts = tokens(&ordered);
    let mut suffix = None;
    if let Some(pos) = parts
        .iter()
        .skip(1)
        .position(|t| GENERATIONAL_SUFFIXES.contains(&t.as_str()))
    {
        suffix = Some(parts.remove(pos + 1));
    }

    let first = parts.first()?.clone();
    let last = parts.last()?.clone();
    Some(NormalizedName {
        full: parts.join(" "),
        first,
        last,
        suffix,
    })
}

/// Reduces a phone number to its 10-digit canonical form.
///
/// A leading US country code is dropped; any other length is rejected.
#[must_use]
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        10 => Some(digits),
        11 if digits.starts_with('1') => Some(digits[1..].to_string()),
        _ => None,
    }
}

/// A canonical address at two granularities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedAddress {
    /// Address without unit/apartment designators. Used for "same address".
    pub building: String,
    /// Address including the unit, if any. Used for "same unit".
    pub unit_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl NormalizedAddress {
    /// Returns true if this address names a specific unit.
    #[must_use]
    pub const fn has_unit(&self) -> bool {
        self.unit.is_some()
    }
}

/// Normalizes a street address.
///
/// # Examples
///
/// ```
/// use kintrail::normalize::normalize_address;
///
/// let addr = normalize_address("123 N. Main St., Apt #4B").unwrap();
/// assert_eq!(addr.building, "123 north main street");
/// assert_eq!(addr.unit_level, "123 north main street unit 4b");
/// ```
#[must_use]
pub fn normalize_address(raw: &str) -> Option<NormalizedAddress> {
    let folded = fold(raw);

    let unit = unit_regex()
        .captures(&folded)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_matches('-').to_string())
        .filter(|u| !u.is_empty());
    let stripped = unit_regex().replace_all(&folded, " ");

    let raw_tokens = tokens(&stripped);
    let expanded: Vec<&str> = raw_tokens
        .iter()
        .map(|t| {
            ADDRESS_ABBREVIATIONS
                .iter()
                .find(|(short, _)| *short == t.as_str())
                .map_or(t.as_str(), |(_, long)| *long)
        })
        .collect();
    if expanded.is_empty() {
        return None;
    }

    let building = expanded.join(" ");
    let unit_level = match &unit {
        Some(u) => format!("{building} unit {u}"),
        None => building.clone(),
    };
    Some(NormalizedAddress {
        building,
        unit_level,
        unit,
    })
}

/// Parses a date of birth in one of the common source formats.
///
/// A bare year resolves to January 1st of that year.
#[must_use]
pub fn parse_dob(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(date);
        }
    }
    if raw.len() == 4 && raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse::<i32>().ok().and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1));
    }
    None
}

/// Lower-cases and trims an email address; rejects strings without `@`.
#[must_use]
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_ascii_lowercase();
    let (local, domain) = email.split_once('@')?;
    (!local.is_empty() && domain.contains('.')).then_some(email)
}

/// Canonical key for free-text fields like employer names.
#[must_use]
pub fn normalize_key(raw: &str) -> Option<String> {
    let joined = tokens(&fold(raw)).join(" ");
    (!joined.is_empty()).then_some(joined)
}

/// A raw record with every field canonicalized.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedRecord {
    pub name: Option<NormalizedName>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<NormalizedAddress>,
    pub dob: Option<NaiveDate>,
    pub employer: Option<String>,
    /// Business filings live in their own identity domain.
    pub business: bool,
}

impl NormalizedRecord {
    /// Normalizes every field of a raw record.
    #[must_use]
    pub fn from_record(record: &PersonRecord) -> Self {
        Self {
            name: record.name.as_deref().and_then(normalize_name),
            phone: record.phone.as_deref().and_then(normalize_phone),
            email: record.email.as_deref().and_then(normalize_email),
            address: record.address.as_deref().and_then(normalize_address),
            dob: record.dob.as_deref().and_then(parse_dob),
            employer: record.employer.as_deref().and_then(normalize_key),
            business: record.kind == RecordKind::Business,
        }
    }

    /// True when a name is the only identifying field.
    #[must_use]
    pub const fn is_name_only(&self) -> bool {
        self.name.is_some() && self.phone.is_none() && self.address.is_none()
    }

    /// True when no name, phone or address survived normalization.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.address.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_lowercase_and_diacritics() {
        let name = normalize_name("  ZOË  Brontë ").unwrap();
        assert_eq!(name.full, "zoe bronte");
        assert_eq!(name.first, "zoe");
        assert_eq!(name.last, "bronte");
        assert!(name.suffix.is_none());
    }

    #[test]
    fn test_name_decomposes_stacked_marks() {
        let name = normalize_name("Nguyễn Văn An").unwrap();
        assert_eq!(name.full, "nguyen van an");
        assert_eq!(name.first, "nguyen");
        assert_eq!(name.last, "an");

        let stroked = normalize_name("Đặng Łukasz").unwrap();
        assert_eq!(stroked.full, "dang lukasz");
    }

    #[test]
    fn test_name_comma_below() {
        // U+0219 and U+021B, not the cedilla forms.
        let name = normalize_name("\u{0218}tefan Mure\u{0219}an \u{021A}epe\u{0219}").unwrap();
        assert_eq!(name.full, "stefan muresan tepes");
    }

    #[test]
    fn test_name_non_latin_script_is_kept() {
        let name = normalize_name("Иван Петров").unwrap();
        assert_eq!(name.full, "иван петров");
        assert_eq!(name.first, "иван");
        assert_eq!(name.last, "петров");
        assert_eq!(normalize_name("ИВАН  ПЕТРОВ"), Some(name));
    }

    #[test]
    fn test_name_suffix_split() {
        let name = normalize_name("Robert Downey Jr.").unwrap();
        assert_eq!(name.full, "robert downey");
        assert_eq!(name.last, "downey");
        assert_eq!(name.suffix.as_deref(), Some("jr"));

        let third = normalize_name("William Gates III").unwrap();
        assert_eq!(third.suffix.as_deref(), Some("iii"));
        assert_eq!(third.last, "gates");
    }

    #[test]
    fn test_name_comma_order() {
        let a = normalize_name("Smith, John").unwrap();
        let b = normalize_name("John Smith").unwrap();
        assert_eq!(a, b);

        let suffixed = normalize_name("John Smith, Sr").unwrap();
        assert_eq!(suffixed.full, "john smith");
        assert_eq!(suffixed.suffix.as_deref(), Some("sr"));
    }

    #[test]
    fn test_name_blank_is_none() {
        assert!(normalize_name("   ").is_none());
        assert!(normalize_name("...").is_none());
    }

    #[test]
    fn test_phone_canonical_form() {
        assert_eq!(normalize_phone("(555) 123-4567").as_deref(), Some("5551234567"));
        assert_eq!(normalize_phone("+1 555.123.4567").as_deref(), Some("5551234567"));
        assert_eq!(normalize_phone("123-4567"), None);
        assert_eq!(normalize_phone("25551234567"), None);
    }

    #[test]
    fn test_address_abbreviation_expansion() {
        let a = normalize_address("742 Evergreen Ter").unwrap();
        let b = normalize_address("742 EVERGREEN TERRACE").unwrap();
        assert_eq!(a.building, b.building);
        assert!(!a.has_unit());
    }

    #[test]
    fn test_address_unit_variants() {
        let a = normalize_address("10 Oak Ave Apt 3").unwrap();
        let b = normalize_address("10 Oak Avenue, Unit 5").unwrap();
        assert_eq!(a.building, b.building);
        assert_ne!(a.unit_level, b.unit_level);
        assert_eq!(a.unit.as_deref(), Some("3"));

        let hash = normalize_address("10 Oak Ave #3").unwrap();
        assert_eq!(hash.unit_level, a.unit_level);
    }

    #[test]
    fn test_dob_formats() {
        let expected = NaiveDate::from_ymd_opt(1975, 4, 9);
        assert_eq!(parse_dob("1975-04-09"), expected);
        assert_eq!(parse_dob("04/09/1975"), expected);
        assert_eq!(parse_dob("1975/04/09"), expected);
        assert_eq!(parse_dob("1975"), NaiveDate::from_ymd_opt(1975, 1, 1));
        assert_eq!(parse_dob("April 1975"), None);
    }

    #[test]
    fn test_email_and_key() {
        assert_eq!(normalize_email(" John@Example.COM ").as_deref(), Some("john@example.com"));
        assert_eq!(normalize_email("not-an-email"), None);
        assert_eq!(normalize_key("Acme, Inc.").as_deref(), Some("acme inc"));
    }

    #[test]
    fn test_record_name_only() {
        let record = PersonRecord::new("x").name("John Smith").dob("1970");
        let normalized = NormalizedRecord::from_record(&record);
        assert!(normalized.is_name_only());
        assert!(!normalized.is_empty());
    }
}
