//! In-memory relationship graph.
//!
//! Pure storage: nodes are identity ids, edges are classified relationships.
//! All classification happens in the detector. Insertion is idempotent and
//! re-adding an edge for the same unordered pair only ever accumulates
//! evidence and raises strength.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::identity::PersonId;
use crate::relationship::{RelationshipCategory, RelationshipEdge, Strength};

type EdgeKey = (PersonId, PersonId);

/// What `add_edge` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeUpdate {
    Inserted,
    /// A stronger edge replaced the stored category and strength.
    Strengthened,
    /// Only new evidence was added.
    EvidenceMerged,
    Unchanged,
    /// Both endpoints are the same identity.
    RejectedSelfEdge,
}

/// A neighbor of a node together with the connecting edge.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor<'a> {
    pub id: PersonId,
    pub edge: &'a RelationshipEdge,
}

impl Neighbor<'_> {
    /// Category of the neighbor relative to the queried node.
    #[must_use]
    pub fn category(&self) -> RelationshipCategory {
        self.edge.category_of(self.id)
    }

    #[must_use]
    pub fn strength(&self) -> Strength {
        self.edge.strength
    }
}

/// Node and edge store.
#[derive(Debug, Default)]
pub struct RelationshipGraph {
    nodes: HashMap<PersonId, u64>,
    node_order: Vec<PersonId>,
    edges: HashMap<EdgeKey, RelationshipEdge>,
    edge_order: Vec<EdgeKey>,
    adjacency: HashMap<PersonId, Vec<EdgeKey>>,
}

impl RelationshipGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. Returns false if it was already present.
    pub fn add_node(&mut self, id: PersonId) -> bool {
        if self.nodes.contains_key(&id) {
            return false;
        }
        self.nodes.insert(id, self.node_order.len() as u64);
        self.node_order.push(id);
        true
    }

    /// Adds or merges an edge.
    ///
    /// For an already connected pair the evidence sets are unioned and the
    /// strength becomes the maximum of both; the category follows whichever
    /// edge is strictly stronger.
    pub fn add_edge(&mut self, edge: RelationshipEdge) -> EdgeUpdate {
        if edge.source == edge.target {
            return EdgeUpdate::RejectedSelfEdge;
        }
        let edge = edge.canonical();
        let key = edge.key();
        self.add_node(edge.source);
        self.add_node(edge.target);

        let Some(existing) = self.edges.get_mut(&key) else {
            for id in [key.0, key.1] {
                self.adjacency.entry(id).or_default().push(key);
            }
            self.edge_order.push(key);
            self.edges.insert(key, edge);
            return EdgeUpdate::Inserted;
        };

        let before = existing.evidence.len();
        existing.evidence.extend(edge.evidence.iter().copied());
        let evidence_grew = existing.evidence.len() > before;

        if edge.strength.value() > existing.strength.value() {
            existing.source = edge.source;
            existing.target = edge.target;
            existing.category = edge.category;
            existing.directed = edge.directed;
            existing.strength = edge.strength;
            EdgeUpdate::Strengthened
        } else if evidence_grew {
            EdgeUpdate::EvidenceMerged
        } else {
            EdgeUpdate::Unchanged
        }
    }

    /// Neighbors ordered by edge strength (descending), ties by the
    /// neighbor's discovery order.
    #[must_use]
    pub fn neighbors(&self, id: PersonId) -> Vec<Neighbor<'_>> {
        let Some(keys) = self.adjacency.get(&id) else {
            return Vec::new();
        };
        let mut out: Vec<Neighbor<'_>> = keys
            .iter()
            .filter_map(|key| self.edges.get(key))
            .filter_map(|edge| edge.other(id).map(|other| Neighbor { id: other, edge }))
            .collect();
        out.sort_by(|a, b| {
            b.edge
                .strength
                .value()
                .partial_cmp(&a.edge.strength.value())
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.discovery_seq(a.id).cmp(&self.discovery_seq(b.id)))
        });
        out
    }

    /// Number of edges per category. Parent/child edges count as `possible_parent`.
    #[must_use]
    pub fn category_counts(&self) -> BTreeMap<RelationshipCategory, usize> {
        let mut counts = BTreeMap::new();
        for edge in self.edges.values() {
            *counts.entry(edge.category).or_insert(0) += 1;
        }
        counts
    }

    /// The edge between two nodes, in either order.
    #[must_use]
    pub fn edge(&self, a: PersonId, b: PersonId) -> Option<&RelationshipEdge> {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.edges.get(&key)
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &RelationshipEdge> {
        self.edge_order.iter().filter_map(|key| self.edges.get(key))
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = PersonId> + '_ {
        self.node_order.iter().copied()
    }

    /// Position of a node in insertion order.
    #[must_use]
    pub fn discovery_seq(&self, id: PersonId) -> u64 {
        self.nodes.get(&id).copied().unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn contains(&self, id: PersonId) -> bool {
        self.nodes.contains_key(&id)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_order.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edge_order.len()
    }
}

/// Serializable copy of the graph contents.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<PersonId>,
    pub edges: Vec<RelationshipEdge>,
    pub category_counts: BTreeMap<RelationshipCategory, usize>,
}

impl From<&RelationshipGraph> for GraphSnapshot {
    fn from(graph: &RelationshipGraph) -> Self {
        Self {
            nodes: graph.nodes().collect(),
            edges: graph.edges().cloned().collect(),
            category_counts: graph.category_counts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use uuid::Uuid;

    use super::*;
    use crate::relationship::Indicator;

    fn id(n: u128) -> PersonId {
        PersonId::from_uuid(Uuid::from_u128(n))
    }

    fn edge(a: u128, b: u128, category: RelationshipCategory, strength: f32, evidence: &[Indicator]) -> RelationshipEdge {
        RelationshipEdge {
            source: id(a),
            target: id(b),
            category,
            strength: Strength::new(strength),
            evidence: evidence.iter().copied().collect::<BTreeSet<_>>(),
            directed: category.is_directional(),
        }
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let mut graph = RelationshipGraph::new();
        assert!(graph.add_node(id(1)));
        assert!(!graph.add_node(id(1)));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_self_edge_rejected() {
        let mut graph = RelationshipGraph::new();
        let update = graph.add_edge(edge(1, 1, RelationshipCategory::CloseContact, 0.6, &[]));
        assert_eq!(update, EdgeUpdate::RejectedSelfEdge);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_readding_identical_edge_is_unchanged() {
        let mut graph = RelationshipGraph::new();
        let e = edge(1, 2, RelationshipCategory::CloseContact, 0.6, &[Indicator::SharedPhone]);
        assert_eq!(graph.add_edge(e.clone()), EdgeUpdate::Inserted);
        assert_eq!(graph.add_edge(e.clone()), EdgeUpdate::Unchanged);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edge(id(2), id(1)).unwrap().strength.value(), 0.6);
    }

    #[test]
    fn test_reverse_pair_merges_evidence_and_keeps_max() {
        let mut graph = RelationshipGraph::new();
        graph.add_edge(edge(1, 2, RelationshipCategory::ImmediateFamily, 0.85, &[Indicator::SameBuilding]));

        let weaker = edge(2, 1, RelationshipCategory::CloseContact, 0.6, &[Indicator::SharedPhone]);
        assert_eq!(graph.add_edge(weaker), EdgeUpdate::EvidenceMerged);

        let stored = graph.edge(id(1), id(2)).unwrap();
        assert_eq!(stored.category, RelationshipCategory::ImmediateFamily);
        assert_eq!(stored.strength.value(), 0.85);
        assert!(stored.evidence.contains(&Indicator::SharedPhone));
        assert!(stored.evidence.contains(&Indicator::SameBuilding));

        let stronger = edge(2, 1, RelationshipCategory::ImmediateFamily, 0.95, &[]);
        assert_eq!(graph.add_edge(stronger), EdgeUpdate::Strengthened);
        assert_eq!(graph.edge(id(1), id(2)).unwrap().strength.value(), 0.95);
    }

    #[test]
    fn test_child_edge_stored_as_parent() {
        let mut graph = RelationshipGraph::new();
        graph.add_edge(edge(5, 4, RelationshipCategory::PossibleChild, 0.6, &[]));
        let stored = graph.edge(id(4), id(5)).unwrap();
        assert_eq!(stored.category, RelationshipCategory::PossibleParent);
        assert_eq!(stored.source, id(4));

        let from_parent = graph.neighbors(id(4));
        assert_eq!(from_parent[0].category(), RelationshipCategory::PossibleChild);
        let from_child = graph.neighbors(id(5));
        assert_eq!(from_child[0].category(), RelationshipCategory::PossibleParent);
    }

    #[test]
    fn test_neighbors_sorted_by_strength_then_discovery() {
        let mut graph = RelationshipGraph::new();
        for n in 1..=4 {
            graph.add_node(id(n));
        }
        graph.add_edge(edge(1, 4, RelationshipCategory::CloseContact, 0.6, &[]));
        graph.add_edge(edge(1, 3, RelationshipCategory::Roommate, 0.6, &[]));
        graph.add_edge(edge(1, 2, RelationshipCategory::BusinessAssociate, 0.4, &[]));
        graph.add_edge(edge(3, 4, RelationshipCategory::PossibleFriend, 0.15, &[]));

        let order: Vec<PersonId> = graph.neighbors(id(1)).iter().map(|n| n.id).collect();
        assert_eq!(order, vec![id(3), id(4), id(2)]);
        assert!(graph.neighbors(id(99)).is_empty());
    }

    #[test]
    fn test_category_counts() {
        let mut graph = RelationshipGraph::new();
        graph.add_edge(edge(1, 2, RelationshipCategory::CloseContact, 0.6, &[]));
        graph.add_edge(edge(1, 3, RelationshipCategory::CloseContact, 0.6, &[]));
        graph.add_edge(edge(2, 3, RelationshipCategory::PossibleChild, 0.5, &[]));

        let counts = graph.category_counts();
        assert_eq!(counts.get(&RelationshipCategory::CloseContact), Some(&2));
        assert_eq!(counts.get(&RelationshipCategory::PossibleParent), Some(&1));
        assert_eq!(counts.get(&RelationshipCategory::PossibleChild), None);

        let snapshot = GraphSnapshot::from(&graph);
        assert_eq!(snapshot.nodes.len(), 3);
        assert_eq!(snapshot.edges.len(), 3);
    }
}
