//! Relationship detection.
//!
//! Classification is driven by an ordered rule table. Each rule pairs a
//! predicate over the observed pair facts with a category and a base
//! strength; the first matching rule wins, so categories are mutually
//! exclusive per pair. The table is data (`RuleSet`), not code order, and
//! each rule can be evaluated on its own.
//!
//! Detection is pure: the same two identities always produce the same
//! edge, and swapping them only changes the direction of parent/child
//! edges.

use std::collections::BTreeSet;

use crate::identity::PersonIdentity;
use crate::relationship::{Indicator, RelationshipCategory, RelationshipEdge, Strength};

/// Default bonus per corroborating indicator.
pub const DEFAULT_CORROBORATION_BONUS: f32 = 0.10;

/// Age gap (years) at or above which a parent/child relation is considered.
pub const PARENT_MIN_GAP_YEARS: f64 = 20.0;

/// Age gap (years) at which parent strength saturates.
pub const PARENT_FULL_GAP_YEARS: f64 = 40.0;

/// Age gap (years) at or below which a sibling relation is considered.
pub const SIBLING_MAX_GAP_YEARS: f64 = 10.0;

/// Everything the rules may look at for one pair of identities.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PairFacts {
    pub indicators: BTreeSet<Indicator>,
    /// Both last names are known and they differ.
    pub different_last_name: bool,
    /// Age difference in years; positive when the first identity is older.
    pub age_gap: Option<f64>,
    /// Number of shared mention listings.
    pub shared_mentions: usize,
}

impl PairFacts {
    /// Collects the facts for `(a, b)`.
    #[must_use]
    pub fn between(a: &PersonIdentity, b: &PersonIdentity) -> Self {
        let mut indicators = BTreeSet::new();

        if a.shares_building_with(b) {
            indicators.insert(Indicator::SameBuilding);
        }
        let same_unit = a.addresses.iter().any(|x| {
            x.has_unit() && b.addresses.iter().any(|y| y.has_unit() && x.unit_level == y.unit_level)
        });
        if same_unit {
            indicators.insert(Indicator::SameUnit);
        }

        let mut different_last_name = false;
        if let (Some(la), Some(lb)) = (a.last_name(), b.last_name()) {
            if la == lb {
                indicators.insert(Indicator::SameLastName);
            } else {
                different_last_name = true;
            }
        }

        if a.property_listings.intersection(&b.property_listings).next().is_some() {
            indicators.insert(Indicator::SharedProperty);
        }
        if a.business_listings.intersection(&b.business_listings).next().is_some() {
            indicators.insert(Indicator::BusinessCoListing);
        }
        if a.employers.iter().any(|e| b.employers.contains(e)) {
            indicators.insert(Indicator::SharedEmployer);
        }
        if a.shares_phone_with(b) {
            indicators.insert(Indicator::SharedPhone);
        }
        if a.emails.iter().any(|e| b.emails.contains(e)) {
            indicators.insert(Indicator::SharedEmail);
        }
        let shared_mentions = a.mention_listings.intersection(&b.mention_listings).count();
        if shared_mentions > 0 {
            indicators.insert(Indicator::SharedMention);
        }

        let age_gap = a.age_gap_years(b);
        if let Some(gap) = age_gap {
            if gap.abs() >= PARENT_MIN_GAP_YEARS {
                indicators.insert(Indicator::LargeAgeGap);
            } else if gap.abs() <= SIBLING_MAX_GAP_YEARS {
                indicators.insert(Indicator::SmallAgeGap);
            }
        }

        Self {
            indicators,
            different_last_name,
            age_gap,
            shared_mentions,
        }
    }

    /// Returns true if the indicator was observed.
    #[must_use]
    pub fn has(&self, indicator: Indicator) -> bool {
        self.indicators.contains(&indicator)
    }

    fn abs_gap(&self) -> Option<f64> {
        self.age_gap.map(f64::abs)
    }
}

/// How a rule turns its match into a base strength.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BaseStrength {
    Fixed(f32),
    /// Linear in the age gap between `PARENT_MIN_GAP_YEARS` and
    /// `PARENT_FULL_GAP_YEARS`.
    AgeScaled { min: f32, max: f32 },
    /// `boosted` when the indicator is also present.
    WithIndicator { base: f32, indicator: Indicator, boosted: f32 },
    /// `repeated` when the pair co-occurs in two or more mentions.
    Repeated { single: f32, repeated: f32 },
}

impl BaseStrength {
    fn resolve(self, facts: &PairFacts) -> f32 {
        match self {
            Self::Fixed(v) => v,
            Self::AgeScaled { min, max } => {
                let gap = facts.abs_gap().unwrap_or(PARENT_MIN_GAP_YEARS);
                let span = PARENT_FULL_GAP_YEARS - PARENT_MIN_GAP_YEARS;
                let t = ((gap - PARENT_MIN_GAP_YEARS) / span).clamp(0.0, 1.0);
                #[allow(clippy::cast_possible_truncation)]
                let t = t as f32;
                min + (max - min) * t
            }
            Self::WithIndicator { base, indicator, boosted } => {
                if facts.has(indicator) {
                    boosted
                } else {
                    base
                }
            }
            Self::Repeated { single, repeated } => {
                if facts.shared_mentions >= 2 {
                    repeated
                } else {
                    single
                }
            }
        }
    }
}

/// One row of the priority table.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipRule {
    pub name: &'static str,
    pub category: RelationshipCategory,
    pub base: BaseStrength,
    /// Indicators that make up the rule itself; they never earn a bonus.
    pub defining: &'static [Indicator],
    pub predicate: fn(&PairFacts) -> bool,
}

impl RelationshipRule {
    /// Evaluates this rule in isolation.
    #[must_use]
    pub fn matches(&self, facts: &PairFacts) -> bool {
        (self.predicate)(facts)
    }

    /// Base strength plus the corroboration bonus, clamped to [0, 1].
    #[must_use]
    pub fn strength(&self, facts: &PairFacts, bonus: f32) -> Strength {
        let extra = facts
            .indicators
            .iter()
            .filter(|i| i.is_corroborating() && !self.defining.contains(*i))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let raw = self.base.resolve(facts) + bonus * extra as f32;
        Strength::new(raw.min(1.0))
    }
}

fn immediate_family(f: &PairFacts) -> bool {
    f.has(Indicator::SameBuilding) && f.has(Indicator::SameLastName)
}

fn possible_spouse(f: &PairFacts) -> bool {
    f.has(Indicator::SameBuilding) && f.different_last_name && f.has(Indicator::SharedProperty)
}

fn possible_parent(f: &PairFacts) -> bool {
    f.has(Indicator::SameLastName) && f.abs_gap().is_some_and(|g| g >= PARENT_MIN_GAP_YEARS)
}

fn possible_sibling(f: &PairFacts) -> bool {
    f.has(Indicator::SameLastName)
        && f.has(Indicator::SameBuilding)
        && f.abs_gap().is_some_and(|g| g <= SIBLING_MAX_GAP_YEARS)
}

fn roommate(f: &PairFacts) -> bool {
    f.has(Indicator::SameBuilding) && f.different_last_name && !f.has(Indicator::SharedProperty)
}

fn business_associate(f: &PairFacts) -> bool {
    f.has(Indicator::BusinessCoListing) || f.has(Indicator::SharedEmployer)
}

fn close_contact(f: &PairFacts) -> bool {
    f.has(Indicator::SharedPhone)
}

fn possible_friend(f: &PairFacts) -> bool {
    f.has(Indicator::SharedMention)
}

/// Version of `STANDARD_RULES`. Bump on any change to order, predicates or strengths.
pub const STANDARD_RULES_VERSION: u32 = 1;

/// The standard priority table.
pub const STANDARD_RULES: [RelationshipRule; 8] = [
    RelationshipRule {
        name: "same_building_same_surname",
        category: RelationshipCategory::ImmediateFamily,
        base: BaseStrength::Fixed(0.85),
        defining: &[Indicator::SameBuilding, Indicator::SameLastName],
        predicate: immediate_family,
    },
    RelationshipRule {
        name: "cohabiting_co_owners",
        category: RelationshipCategory::PossibleSpouse,
        base: BaseStrength::Fixed(0.75),
        defining: &[Indicator::SameBuilding, Indicator::SharedProperty],
        predicate: possible_spouse,
    },
    RelationshipRule {
        name: "same_surname_generation_gap",
        category: RelationshipCategory::PossibleParent,
        base: BaseStrength::AgeScaled { min: 0.50, max: 0.70 },
        defining: &[Indicator::SameLastName, Indicator::LargeAgeGap],
        predicate: possible_parent,
    },
    RelationshipRule {
        name: "same_surname_same_address_peers",
        category: RelationshipCategory::PossibleSibling,
        base: BaseStrength::Fixed(0.60),
        defining: &[Indicator::SameLastName, Indicator::SameBuilding, Indicator::SmallAgeGap],
        predicate: possible_sibling,
    },
    RelationshipRule {
        name: "cohabiting_unrelated",
        category: RelationshipCategory::Roommate,
        base: BaseStrength::Fixed(0.60),
        defining: &[Indicator::SameBuilding],
        predicate: roommate,
    },
    RelationshipRule {
        name: "business_co_listing",
        category: RelationshipCategory::BusinessAssociate,
        base: BaseStrength::Fixed(0.40),
        defining: &[Indicator::BusinessCoListing, Indicator::SharedEmployer],
        predicate: business_associate,
    },
    RelationshipRule {
        name: "shared_phone",
        category: RelationshipCategory::CloseContact,
        base: BaseStrength::WithIndicator {
            base: 0.60,
            indicator: Indicator::SharedEmail,
            boosted: 0.75,
        },
        defining: &[Indicator::SharedPhone, Indicator::SharedEmail],
        predicate: close_contact,
    },
    RelationshipRule {
        name: "co_mentioned",
        category: RelationshipCategory::PossibleFriend,
        base: BaseStrength::Repeated { single: 0.15, repeated: 0.20 },
        defining: &[Indicator::SharedMention],
        predicate: possible_friend,
    },
];

/// An ordered, versioned rule table.
#[derive(Debug, Clone)]
pub struct RuleSet {
    version: u32,
    rules: Vec<RelationshipRule>,
}

impl RuleSet {
    /// Creates a custom rule table; order is priority.
    #[must_use]
    pub fn new(version: u32, rules: Vec<RelationshipRule>) -> Self {
        Self { version, rules }
    }

    /// The standard table.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(STANDARD_RULES_VERSION, STANDARD_RULES.to_vec())
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// First rule matching the facts.
    #[must_use]
    pub fn first_match(&self, facts: &PairFacts) -> Option<&RelationshipRule> {
        self.rules.iter().find(|rule| rule.matches(facts))
    }

    /// Looks up a rule by name.
    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&RelationshipRule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelationshipRule> {
        self.rules.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

/// Classifies identity pairs with a rule table.
#[derive(Debug, Clone)]
pub struct RelationshipDetector {
    rules: RuleSet,
    corroboration_bonus: f32,
}

impl Default for RelationshipDetector {
    fn default() -> Self {
        Self::new(RuleSet::standard(), DEFAULT_CORROBORATION_BONUS)
    }
}

impl RelationshipDetector {
    #[must_use]
    pub fn new(rules: RuleSet, corroboration_bonus: f32) -> Self {
        Self {
            rules,
            corroboration_bonus: corroboration_bonus.clamp(0.0, 1.0),
        }
    }

    #[must_use]
    pub const fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Classifies the pair `(a, b)`.
    ///
    /// Returns `None` for a self-pair or when no rule matches. For
    /// parent/child edges `source` is `a`: the category is
    /// `PossibleParent` when `a` is older, `PossibleChild` otherwise.
    #[must_use]
    pub fn detect(&self, a: &PersonIdentity, b: &PersonIdentity) -> Option<RelationshipEdge> {
        if a.id == b.id {
            return None;
        }
        let facts = PairFacts::between(a, b);
        let rule = self.rules.first_match(&facts)?;

        let mut category = rule.category;
        if category.is_directional() {
            let a_older = facts.age_gap.is_some_and(|g| g > 0.0);
            category = if a_older {
                RelationshipCategory::PossibleParent
            } else {
                RelationshipCategory::PossibleChild
            };
        }

        Some(RelationshipEdge {
            source: a.id,
            target: b.id,
            category,
            strength: rule.strength(&facts, self.corroboration_bonus),
            evidence: facts.indicators,
            directed: category.is_directional(),
        })
    }
}

/// Classifies `(a, b)` with the standard rule table.
///
/// # Examples
///
/// ```
/// use kintrail::{detect, IdentityResolver, PersonRecord, RelationshipCategory};
///
/// let mut resolver = IdentityResolver::default();
/// let a = resolver.resolve(PersonRecord::new("x").name("Ann Lee").phone("5551112222")).unwrap();
/// let b = resolver.resolve(PersonRecord::new("x").name("Bo Chen").phone("555-111-2222")).unwrap();
///
/// let edge = detect(resolver.get(a.id).unwrap(), resolver.get(b.id).unwrap()).unwrap();
/// assert_eq!(edge.category, RelationshipCategory::CloseContact);
/// ```
#[must_use]
pub fn detect(a: &PersonIdentity, b: &PersonIdentity) -> Option<RelationshipEdge> {
    RelationshipDetector::default().detect(a, b)
}
