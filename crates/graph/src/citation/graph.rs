//! Citation graph representation
//!
//! Directed graph of papers indexed by canonical key. Cycles are allowed;
//! nothing here assumes a topological order.

use spillscope_common::errors::{AppError, Result};
use spillscope_common::models::{CanonicalKey, CitationEdge, PaperNode};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Result of inserting a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeInsert {
    /// Key was not present
    Inserted,
    /// An existing stub received metadata
    Resolved,
    /// Metadata or identifiers were added to a resolved node
    Merged,
    /// Nothing changed
    Unchanged,
}

/// In-memory citation graph
#[derive(Debug, Clone, Default)]
pub struct CitationGraph {
    /// All nodes, ordered by canonical key
    nodes: BTreeMap<CanonicalKey, PaperNode>,

    /// Adjacency: paper -> papers it cites
    outgoing: BTreeMap<CanonicalKey, BTreeSet<CanonicalKey>>,

    /// Reverse adjacency: paper -> papers citing it
    incoming: BTreeMap<CanonicalKey, BTreeSet<CanonicalKey>>,

    edge_count: usize,
}

impl CitationGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge a node. Re-inserting identical metadata is a no-op.
    pub fn insert_node(&mut self, node: PaperNode) -> NodeInsert {
        match self.nodes.get_mut(&node.key) {
            None => {
                self.nodes.insert(node.key.clone(), node);
                NodeInsert::Inserted
            }
            Some(existing) => {
                let was_stub = existing.is_stub();
                let before = existing.clone();
                existing.merge_from(&node);

                if was_stub && !existing.is_stub() {
                    NodeInsert::Resolved
                } else if *existing != before {
                    NodeInsert::Merged
                } else {
                    NodeInsert::Unchanged
                }
            }
        }
    }

    /// Add a citation edge, creating stubs for unknown endpoints.
    ///
    /// Returns `false` when the edge was already present.
    pub fn add_edge(&mut self, citing: &CanonicalKey, cited: &CanonicalKey) -> Result<bool> {
        if citing == cited {
            return Err(AppError::invalid_field(
                "citations",
                format!("self-citation on {}", citing),
            ));
        }

        for key in [citing, cited] {
            if !self.nodes.contains_key(key) {
                self.nodes.insert(key.clone(), PaperNode::stub(key.clone()));
            }
        }

        Ok(self.link(citing, cited))
    }

    /// Add an edge value
    pub fn insert_edge(&mut self, edge: &CitationEdge) -> Result<bool> {
        self.add_edge(&edge.citing, &edge.cited)
    }

    /// Fold the node under `from` into `into`.
    ///
    /// Metadata already on `into` wins and the rest becomes alternates.
    /// Edges move onto `into`; any that would become self-citations are
    /// dropped. Returns `false` when `from` is not in the graph.
    pub fn merge_nodes(&mut self, from: &CanonicalKey, into: &CanonicalKey) -> bool {
        if from == into {
            return false;
        }
        let Some(mut moved) = self.nodes.remove(from) else {
            return false;
        };

        let references = self.outgoing.remove(from).unwrap_or_default();
        for cited in &references {
            if let Some(citing) = self.incoming.get_mut(cited) {
                citing.remove(from);
            }
        }
        let citations = self.incoming.remove(from).unwrap_or_default();
        for citing in &citations {
            if let Some(cited) = self.outgoing.get_mut(citing) {
                cited.remove(from);
            }
        }
        self.edge_count -= references.len() + citations.len();

        moved.key = into.clone();
        moved.aliases.insert(from.clone());
        match self.nodes.get_mut(into) {
            Some(existing) => {
                existing.merge_from(&moved);
                existing.aliases.insert(from.clone());
            }
            None => {
                self.nodes.insert(into.clone(), moved);
            }
        }
        if let Some(node) = self.nodes.get_mut(into) {
            node.citation_contexts.remove(from);
            node.citation_contexts.remove(into);
        }

        for cited in &references {
            if cited != into {
                self.link(into, cited);
            }
        }
        for citing in &citations {
            if citing == into {
                continue;
            }
            self.link(citing, into);
            if let Some(node) = self.nodes.get_mut(citing) {
                if let Some(snippet) = node.citation_contexts.remove(from) {
                    node.citation_contexts.entry(into.clone()).or_insert(snippet);
                }
            }
        }
        true
    }

    fn link(&mut self, citing: &CanonicalKey, cited: &CanonicalKey) -> bool {
        let inserted = self
            .outgoing
            .entry(citing.clone())
            .or_default()
            .insert(cited.clone());
        if inserted {
            self.incoming
                .entry(cited.clone())
                .or_default()
                .insert(citing.clone());
            self.edge_count += 1;
        }
        inserted
    }

    /// Get papers cited by this paper, in key order
    pub fn get_references<'a>(
        &'a self,
        key: &CanonicalKey,
    ) -> impl Iterator<Item = &'a CanonicalKey> + 'a {
        self.outgoing.get(key).into_iter().flatten()
    }

    /// Get papers citing this paper, in key order
    pub fn get_citations<'a>(
        &'a self,
        key: &CanonicalKey,
    ) -> impl Iterator<Item = &'a CanonicalKey> + 'a {
        self.incoming.get(key).into_iter().flatten()
    }

    /// Union of references and citations, in key order
    pub fn neighbors(&self, key: &CanonicalKey) -> BTreeSet<&CanonicalKey> {
        self.get_references(key).chain(self.get_citations(key)).collect()
    }

    pub fn node(&self, key: &CanonicalKey) -> Option<&PaperNode> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &CanonicalKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn contains_edge(&self, citing: &CanonicalKey, cited: &CanonicalKey) -> bool {
        self.outgoing
            .get(citing)
            .map(|refs| refs.contains(cited))
            .unwrap_or(false)
    }

    /// Get all nodes in key order
    pub fn nodes(&self) -> impl Iterator<Item = &PaperNode> {
        self.nodes.values()
    }

    /// Get all keys in lexical order
    pub fn keys(&self) -> impl Iterator<Item = &CanonicalKey> {
        self.nodes.keys()
    }

    /// All edges ordered by (citing, cited)
    pub fn edges(&self) -> impl Iterator<Item = CitationEdge> + '_ {
        self.outgoing.iter().flat_map(|(citing, cited)| {
            cited
                .iter()
                .map(move |c| CitationEdge::new(citing.clone(), c.clone()))
        })
    }

    /// Get node count
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Nodes still waiting for metadata
    pub fn stub_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_stub()).count()
    }

    /// Get paper title
    pub fn get_title(&self, key: &CanonicalKey) -> Option<&str> {
        self.nodes.get(key).and_then(|n| n.title.as_deref())
    }

    /// Publication year, if known
    pub fn year(&self, key: &CanonicalKey) -> Option<i32> {
        self.nodes.get(key).and_then(|n| n.year)
    }

    /// Get citation count (incoming edges)
    pub fn citation_count(&self, key: &CanonicalKey) -> usize {
        self.incoming.get(key).map(|s| s.len()).unwrap_or(0)
    }

    /// Get reference count (outgoing edges)
    pub fn reference_count(&self, key: &CanonicalKey) -> usize {
        self.outgoing.get(key).map(|s| s.len()).unwrap_or(0)
    }

    /// Breadth-first traversal up to `depth` hops.
    ///
    /// Returns each reached node once with its hop distance, start excluded.
    pub fn traverse(
        &self,
        start: &CanonicalKey,
        depth: usize,
        direction: TraversalDirection,
    ) -> Vec<(CanonicalKey, usize)> {
        let mut visited: BTreeSet<&CanonicalKey> = BTreeSet::new();
        let mut result = Vec::new();
        let mut queue = VecDeque::new();

        if !self.contains(start) {
            return result;
        }
        visited.insert(start);
        queue.push_back((start, 0usize));

        while let Some((current, current_depth)) = queue.pop_front() {
            if current_depth == depth {
                continue;
            }

            let neighbors: Vec<&CanonicalKey> = match direction {
                TraversalDirection::Forward => self.get_references(current).collect(),
                TraversalDirection::Backward => self.get_citations(current).collect(),
                TraversalDirection::Both => self.neighbors(current).into_iter().collect(),
            };

            for neighbor in neighbors {
                if visited.insert(neighbor) {
                    result.push((neighbor.clone(), current_depth + 1));
                    queue.push_back((neighbor, current_depth + 1));
                }
            }
        }

        result
    }
}

/// Direction for graph traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDirection {
    /// Follow references (papers cited by this paper)
    Forward,
    /// Follow citations (papers citing this paper)
    Backward,
    /// Both directions
    Both,
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillscope_common::models::NodeResolution;

    fn key(s: &str) -> CanonicalKey {
        CanonicalKey::from_canonical(s)
    }

    fn resolved(k: &str, year: i32) -> PaperNode {
        let mut node = PaperNode::stub(key(k));
        node.resolution = NodeResolution::Resolved;
        node.title = Some(format!("Paper {}", k));
        node.year = Some(year);
        node
    }

    #[test]
    fn test_graph_construction() {
        let mut graph = CitationGraph::new();

        let a = key("doi:a");
        let b = key("doi:b");
        let c = key("doi:c");

        // A cites B, B cites C
        graph.add_edge(&a, &b).unwrap();
        graph.add_edge(&b, &c).unwrap();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.get_references(&a).collect::<Vec<_>>(), vec![&b]);
        assert_eq!(graph.get_citations(&b).collect::<Vec<_>>(), vec![&a]);
        assert_eq!(graph.get_references(&b).collect::<Vec<_>>(), vec![&c]);
    }

    #[test]
    fn test_citation_counts() {
        let mut graph = CitationGraph::new();

        let a = key("doi:a");
        let b = key("doi:b");
        let c = key("doi:c");

        // Both A and C cite B
        graph.add_edge(&a, &b).unwrap();
        graph.add_edge(&c, &b).unwrap();

        assert_eq!(graph.citation_count(&b), 2);
        assert_eq!(graph.reference_count(&a), 1);
    }

    #[test]
    fn test_duplicate_edge_collapses() {
        let mut graph = CitationGraph::new();
        let (a, b) = (key("doi:a"), key("doi:b"));

        assert!(graph.add_edge(&a, &b).unwrap());
        assert!(!graph.add_edge(&a, &b).unwrap());

        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edges().count(), 1);
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut graph = CitationGraph::new();
        let a = key("doi:a");
        assert!(matches!(
            graph.add_edge(&a, &a),
            Err(AppError::Validation { .. })
        ));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_cycles_tolerated() {
        let mut graph = CitationGraph::new();
        let (a, b, c) = (key("doi:a"), key("doi:b"), key("doi:c"));
        graph.add_edge(&a, &b).unwrap();
        graph.add_edge(&b, &c).unwrap();
        graph.add_edge(&c, &a).unwrap();

        let reached = graph.traverse(&a, 10, TraversalDirection::Forward);
        assert_eq!(reached, vec![(b, 1), (c, 2)]);
    }

    #[test]
    fn test_unknown_endpoint_becomes_stub() {
        let mut graph = CitationGraph::new();
        graph.insert_node(resolved("doi:a", 2020));
        graph.add_edge(&key("doi:a"), &key("doi:b")).unwrap();

        assert!(!graph.node(&key("doi:a")).unwrap().is_stub());
        assert!(graph.node(&key("doi:b")).unwrap().is_stub());
        assert_eq!(graph.stub_count(), 1);

        assert_eq!(graph.insert_node(resolved("doi:b", 2019)), NodeInsert::Resolved);
        assert_eq!(graph.stub_count(), 0);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_node_reinsert_is_noop() {
        let mut graph = CitationGraph::new();
        assert_eq!(graph.insert_node(resolved("doi:a", 2020)), NodeInsert::Inserted);
        assert_eq!(graph.insert_node(resolved("doi:a", 2020)), NodeInsert::Unchanged);
        assert_eq!(graph.insert_node(resolved("doi:a", 2021)), NodeInsert::Merged);
        assert_eq!(graph.node(&key("doi:a")).unwrap().year, Some(2020));
    }

    #[test]
    fn test_merge_nodes_moves_edges() {
        let mut graph = CitationGraph::new();
        let (a, b, c, z) = (key("doi:a"), key("doi:b"), key("doi:c"), key("openalex:W7"));
        graph.insert_node(resolved("doi:a", 2020));
        // C cites the paper under its OpenAlex key, which cites A and B
        graph.add_edge(&c, &z).unwrap();
        graph.add_edge(&z, &a).unwrap();
        graph.add_edge(&z, &b).unwrap();
        graph.add_edge(&a, &b).unwrap();

        assert!(graph.merge_nodes(&z, &a));

        assert!(!graph.contains(&z));
        assert!(graph.contains_edge(&c, &a));
        assert!(graph.contains_edge(&a, &b));
        // Z -> A would become a self-citation
        assert!(!graph.contains_edge(&a, &a));
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.edges().count(), 2);

        let merged = graph.node(&a).unwrap();
        assert_eq!(merged.year, Some(2020));
        assert!(merged.aliases.contains(&z));
        assert!(!graph.merge_nodes(&z, &a));
    }

    #[test]
    fn test_merge_into_unknown_key_rekeys() {
        let mut graph = CitationGraph::new();
        let (stub, best, citing) = (key("openalex:W77"), key("doi:10.1/z"), key("doi:c"));
        graph.insert_node(resolved("doi:c", 2022));
        graph.add_edge(&citing, &stub).unwrap();
        graph
            .nodes
            .get_mut(&citing)
            .unwrap()
            .citation_contexts
            .insert(stub.clone(), "building on W77".into());

        assert!(graph.merge_nodes(&stub, &best));

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.get_citations(&best).collect::<Vec<_>>(), vec![&citing]);
        let contexts = &graph.node(&citing).unwrap().citation_contexts;
        assert_eq!(contexts[&best], "building on W77");
        assert!(!contexts.contains_key(&stub));
    }

    #[test]
    fn test_traverse_both_directions() {
        let mut graph = CitationGraph::new();
        let (a, b, c) = (key("doi:a"), key("doi:b"), key("doi:c"));
        graph.add_edge(&a, &b).unwrap();
        graph.add_edge(&c, &b).unwrap();

        let reached = graph.traverse(&a, 2, TraversalDirection::Both);
        assert_eq!(reached, vec![(b, 1), (c, 2)]);
        assert!(graph.traverse(&a, 1, TraversalDirection::Backward).is_empty());
    }
}
