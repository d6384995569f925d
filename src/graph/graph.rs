use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::facts::{AtomicFact, FactTable};
use super::normalizer::clean_string;
use crate::document::ChunkStore;
use crate::{Error, Result};

/// How node keys are matched against the fact text of other nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMatching {
    /// Literal, case-sensitive substring match
    #[default]
    Exact,
    /// Keys and fact text are lowercased before matching
    CaseInsensitive,
}

/// Graph node: a canonical key with its facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: String,
    pub facts: Vec<AtomicFact>,
}

impl GraphNode {
    /// Fact texts joined with spaces, the text embedded for similarity search.
    pub fn document(&self) -> String {
        self.facts
            .iter()
            .map(|f| f.atom_fact.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Cleaned `". "` concatenation used by the edge rule.
    fn match_text(&self, matching: EdgeMatching) -> String {
        let joined = self
            .facts
            .iter()
            .map(|f| f.atom_fact.as_str())
            .collect::<Vec<_>>()
            .join(". ");
        let cleaned = clean_string(&joined);
        match matching {
            EdgeMatching::Exact => cleaned,
            EdgeMatching::CaseInsensitive => cleaned.to_lowercase(),
        }
    }
}

/// Undirected knowledge graph keyed by canonical key.
///
/// Nodes keep the order of the normalized fact table. Adjacency is stored per
/// node index, so edges are symmetric and never duplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnowledgeGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    adjacency: Vec<BTreeSet<usize>>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build nodes from the canonical table and derive co-occurrence edges.
    ///
    /// Two keys are linked when each appears inside the other's cleaned fact
    /// text. The check is a plain substring test, so short keys connect widely.
    pub fn build(table: FactTable, matching: EdgeMatching) -> Self {
        let mut graph = Self::new();
        for (key, facts) in table {
            graph.push_node(GraphNode { key, facts });
        }

        let lookups: Vec<(String, String)> = graph
            .nodes
            .iter()
            .map(|node| {
                let key = match matching {
                    EdgeMatching::Exact => node.key.clone(),
                    EdgeMatching::CaseInsensitive => node.key.to_lowercase(),
                };
                (key, node.match_text(matching))
            })
            .collect();

        for i in 0..lookups.len() {
            for j in (i + 1)..lookups.len() {
                let (key_i, text_i) = &lookups[i];
                let (key_j, text_j) = &lookups[j];
                if key_i != key_j && text_j.contains(key_i.as_str()) && text_i.contains(key_j.as_str())
                {
                    graph.link(i, j);
                }
            }
        }

        info!(
            "Built graph with {} nodes and {} edges ({:?} matching)",
            graph.len(),
            graph.edge_count(),
            matching
        );
        graph
    }

    /// Assemble a graph from stored nodes and edges.
    pub(crate) fn from_parts(nodes: Vec<GraphNode>, edges: &[(usize, usize)]) -> Result<Self> {
        let mut graph = Self::new();
        for node in nodes {
            if graph.index.contains_key(&node.key) {
                return Err(Error::GraphFormat(format!("duplicate node '{}'", node.key)));
            }
            graph.push_node(node);
        }
        for &(a, b) in edges {
            if a >= graph.len() || b >= graph.len() {
                return Err(Error::GraphFormat(format!(
                    "edge {} -- {} references a missing node",
                    a, b
                )));
            }
            if a == b {
                return Err(Error::GraphFormat(format!(
                    "self-loop on '{}'",
                    graph.nodes[a].key
                )));
            }
            graph.link(a, b);
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, key: &str) -> Option<&GraphNode> {
        self.index.get(key).map(|&idx| &self.nodes[idx])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    /// Adjacent nodes of `key`, or `None` if the key is not in the graph.
    pub fn neighbors(&self, key: &str) -> Option<Vec<&GraphNode>> {
        let idx = *self.index.get(key)?;
        Some(self.adjacency[idx].iter().map(|&n| &self.nodes[n]).collect())
    }

    pub fn has_edge(&self, a: &str, b: &str) -> bool {
        match (self.index.get(a), self.index.get(b)) {
            (Some(&ia), Some(&ib)) => self.adjacency[ia].contains(&ib),
            _ => false,
        }
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(BTreeSet::len).sum::<usize>() / 2
    }

    /// Edges as node index pairs with `a < b`.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.adjacency
            .iter()
            .enumerate()
            .flat_map(|(a, adj)| adj.iter().filter(move |&&b| a < b).map(move |&b| (a, b)))
    }

    /// Every chunk id referenced by a fact must exist in `store`.
    pub fn validate_chunks(&self, store: &ChunkStore) -> Result<()> {
        for node in &self.nodes {
            for fact in &node.facts {
                let id = fact.chunk_id as i64;
                if !store.contains(id) {
                    return Err(Error::ReferentialIntegrity(id));
                }
            }
        }
        Ok(())
    }

    fn push_node(&mut self, node: GraphNode) {
        self.index.insert(node.key.clone(), self.nodes.len());
        self.nodes.push(node);
        self.adjacency.push(BTreeSet::new());
    }

    fn link(&mut self, a: usize, b: usize) {
        self.adjacency[a].insert(b);
        self.adjacency[b].insert(a);
    }
}
