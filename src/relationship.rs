//! Relationship edges between identities.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::PersonId;

/// Relationship category of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipCategory {
    ImmediateFamily,
    PossibleSpouse,
    /// `source` is the likely parent of `target`.
    PossibleParent,
    /// `source` is the likely child of `target`.
    PossibleChild,
    PossibleSibling,
    Roommate,
    BusinessAssociate,
    CloseContact,
    PossibleFriend,
}

impl RelationshipCategory {
    /// All categories, in rule priority order.
    pub const ALL: [Self; 9] = [
        Self::ImmediateFamily,
        Self::PossibleSpouse,
        Self::PossibleParent,
        Self::PossibleChild,
        Self::PossibleSibling,
        Self::Roommate,
        Self::BusinessAssociate,
        Self::CloseContact,
        Self::PossibleFriend,
    ];

    /// Returns true for categories where argument order carries meaning.
    #[must_use]
    pub const fn is_directional(self) -> bool {
        matches!(self, Self::PossibleParent | Self::PossibleChild)
    }

    /// The category seen from the other end of the edge.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::PossibleParent => Self::PossibleChild,
            Self::PossibleChild => Self::PossibleParent,
            other => other,
        }
    }

    /// snake_case label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ImmediateFamily => "immediate_family",
            Self::PossibleSpouse => "possible_spouse",
            Self::PossibleParent => "possible_parent",
            Self::PossibleChild => "possible_child",
            Self::PossibleSibling => "possible_sibling",
            Self::Roommate => "roommate",
            Self::BusinessAssociate => "business_associate",
            Self::CloseContact => "close_contact",
            Self::PossibleFriend => "possible_friend",
        }
    }
}

impl fmt::Display for RelationshipCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Evidence tag observed for a pair of identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    SameBuilding,
    SameUnit,
    SameLastName,
    SharedProperty,
    BusinessCoListing,
    SharedEmployer,
    SharedPhone,
    SharedEmail,
    SharedMention,
    LargeAgeGap,
    SmallAgeGap,
}

impl Indicator {
    /// Indicators that raise an edge's strength when they go beyond the
    /// matched rule's defining indicators.
    pub const CORROBORATING: [Self; 6] = [
        Self::SharedPhone,
        Self::SharedEmail,
        Self::SharedProperty,
        Self::BusinessCoListing,
        Self::SharedEmployer,
        Self::SameUnit,
    ];

    /// Returns true if this indicator can corroborate an edge.
    #[must_use]
    pub fn is_corroborating(self) -> bool {
        Self::CORROBORATING.contains(&self)
    }
}

/// Edge strength, always within [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Strength(f32);

impl Strength {
    pub const ZERO: Self = Self(0.0);
    pub const MAX: Self = Self(1.0);

    /// Clamps into [0.0, 1.0]. NaN becomes 0.0.
    #[must_use]
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Returns the clamped value.
    #[must_use]
    pub const fn value(self) -> f32 {
        self.0
    }

    /// The larger of two strengths.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// A classified relationship between two identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub source: PersonId,
    pub target: PersonId,
    pub category: RelationshipCategory,
    pub strength: Strength,
    pub evidence: BTreeSet<Indicator>,
    /// True for parent/child edges.
    pub directed: bool,
}

impl RelationshipEdge {
    /// Unordered key of the pair.
    #[must_use]
    pub fn key(&self) -> (PersonId, PersonId) {
        if self.source <= self.target {
            (self.source, self.target)
        } else {
            (self.target, self.source)
        }
    }

    /// Canonical storage form: child edges are flipped into parent edges,
    /// undirected edges are ordered by id.
    #[must_use]
    pub fn canonical(mut self) -> Self {
        if self.category == RelationshipCategory::PossibleChild {
            std::mem::swap(&mut self.source, &mut self.target);
            self.category = RelationshipCategory::PossibleParent;
        } else if !self.directed && self.source > self.target {
            std::mem::swap(&mut self.source, &mut self.target);
        }
        self
    }

    /// The endpoint opposite `id`, if `id` is an endpoint.
    #[must_use]
    pub fn other(&self, id: PersonId) -> Option<PersonId> {
        if self.source == id {
            Some(self.target)
        } else if self.target == id {
            Some(self.source)
        } else {
            None
        }
    }

    /// Category of `neighbor` relative to `anchor`.
    ///
    /// For a parent edge `p -> c`, `c` is the `possible_child` of `p`.
    #[must_use]
    pub fn category_of(&self, neighbor: PersonId) -> RelationshipCategory {
        if self.directed && neighbor == self.target {
            self.category.inverse()
        } else {
            self.category
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn id(n: u128) -> PersonId {
        PersonId::from_uuid(Uuid::from_u128(n))
    }

    fn edge(source: u128, target: u128, category: RelationshipCategory) -> RelationshipEdge {
        RelationshipEdge {
            source: id(source),
            target: id(target),
            category,
            strength: Strength::new(0.5),
            evidence: BTreeSet::new(),
            directed: category.is_directional(),
        }
    }

    #[test]
    fn test_strength_is_clamped() {
        assert_eq!(Strength::new(1.7).value(), 1.0);
        assert_eq!(Strength::new(-0.2).value(), 0.0);
        assert_eq!(Strength::new(f32::NAN).value(), 0.0);
        assert_eq!(Strength::new(0.4).max(Strength::new(0.6)).value(), 0.6);
    }

    #[test]
    fn test_child_edge_canonicalizes_to_parent() {
        let child = edge(1, 2, RelationshipCategory::PossibleChild).canonical();
        assert_eq!(child.category, RelationshipCategory::PossibleParent);
        assert_eq!(child.source, id(2));
        assert_eq!(child.target, id(1));
    }

    #[test]
    fn test_undirected_edge_orders_endpoints() {
        let e = edge(9, 3, RelationshipCategory::Roommate).canonical();
        assert_eq!((e.source, e.target), (id(3), id(9)));
        assert_eq!(e.key(), edge(3, 9, RelationshipCategory::Roommate).key());
    }

    #[test]
    fn test_category_of_neighbor() {
        let e = edge(1, 2, RelationshipCategory::PossibleParent);
        assert_eq!(e.category_of(id(1)), RelationshipCategory::PossibleParent);
        assert_eq!(e.category_of(id(2)), RelationshipCategory::PossibleChild);
        assert_eq!(e.other(id(2)), Some(id(1)));
        assert_eq!(e.other(id(5)), None);
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(RelationshipCategory::ImmediateFamily.to_string(), "immediate_family");
        assert_eq!(
            serde_json::to_string(&RelationshipCategory::CloseContact).unwrap(),
            "\"close_contact\""
        );
        assert!(Indicator::SameUnit.is_corroborating());
        assert!(!Indicator::SameLastName.is_corroborating());
    }
}
