use anyhow::Result;
use async_trait::async_trait;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::profile::Profile;
use crate::retrieval::{GraphFact, KnowledgeGraphStore};

const MAX_FACTS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Scheme,
    Beneficiary,
    Sector,
    Benefit,
    Document,
    Agency,
    Region,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub relation_type: String,
}

/// Serialized form of a populated graph, as written by the population job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub entities: Vec<Entity>,
    /// `(from, relation, to)` by entity name.
    pub relations: Vec<(String, String, String)>,
}

pub struct SchemeGraph {
    graph: DiGraph<Entity, Relationship>,
    name_to_node: HashMap<String, NodeIndex>,
    max_nodes: usize,
}

impl SchemeGraph {
    pub fn new(max_nodes: usize) -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_node: HashMap::new(),
            max_nodes,
        }
    }

    pub fn from_snapshot(snapshot: GraphSnapshot, max_nodes: usize) -> Self {
        let mut graph = Self::new(max_nodes);
        for entity in snapshot.entities {
            graph.add_entity(&entity.name, entity.entity_type);
        }
        for (from, relation, to) in snapshot.relations {
            graph.add_relationship(&from, &to, &relation);
        }
        graph
    }

    /// Returns `None` when the node cap is reached.
    pub fn add_entity(&mut self, name: &str, entity_type: EntityType) -> Option<NodeIndex> {
        let key = normalize(name);
        if let Some(&idx) = self.name_to_node.get(&key) {
            return Some(idx);
        }
        if self.graph.node_count() >= self.max_nodes {
            tracing::warn!(name = %name, max_nodes = self.max_nodes, "Knowledge graph full, entity dropped");
            return None;
        }

        let idx = self.graph.add_node(Entity {
            name: name.to_string(),
            entity_type,
        });
        self.name_to_node.insert(key, idx);
        Some(idx)
    }

    pub fn add_relationship(&mut self, from: &str, to: &str, relation_type: &str) {
        let (Some(&from_idx), Some(&to_idx)) = (
            self.name_to_node.get(&normalize(from)),
            self.name_to_node.get(&normalize(to)),
        ) else {
            return;
        };

        self.graph.add_edge(
            from_idx,
            to_idx,
            Relationship {
                relation_type: relation_type.to_string(),
            },
        );
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Entities named in the question, or matching a profile attribute.
    fn seed_nodes(&self, question: &str, profile: &Profile) -> Vec<NodeIndex> {
        let padded_question = format!(" {} ", normalize(question));
        let question_words: HashSet<&str> = padded_question.split_whitespace().collect();
        let profile_terms: Vec<String> = profile.search_terms().iter().map(|t| normalize(t)).collect();

        let mut seeds = Vec::new();
        for (key, &idx) in &self.name_to_node {
            let named_in_question = padded_question.contains(&format!(" {} ", key))
                || (self.graph[idx].entity_type == EntityType::Scheme
                    && key
                        .split_whitespace()
                        .any(|w| w.len() >= 4 && question_words.contains(w)));
            let matches_profile = profile_terms
                .iter()
                .any(|t| key == t || format!(" {} ", key).contains(&format!(" {} ", t)));
            if named_in_question || matches_profile {
                seeds.push(idx);
            }
        }
        seeds.sort();
        seeds
    }

    /// Breadth-first walk from the seeds in both edge directions, collecting
    /// each traversed relation once.
    pub fn related_facts(&self, question: &str, profile: &Profile, max_hops: usize) -> Vec<GraphFact> {
        let seeds = self.seed_nodes(question, profile);
        let mut visited: HashSet<NodeIndex> = seeds.iter().copied().collect();
        let mut queue: VecDeque<(NodeIndex, usize)> = seeds.into_iter().map(|s| (s, 0)).collect();
        let mut seen_edges = HashSet::new();
        let mut facts = Vec::new();

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_hops {
                continue;
            }
            let edges = self
                .graph
                .edges_directed(node, Direction::Outgoing)
                .chain(self.graph.edges_directed(node, Direction::Incoming));
            for edge in edges {
                if seen_edges.insert(edge.id()) {
                    facts.push(GraphFact {
                        subject: self.graph[edge.source()].name.clone(),
                        relation: edge.weight().relation_type.clone(),
                        object: self.graph[edge.target()].name.clone(),
                    });
                    if facts.len() >= MAX_FACTS {
                        return facts;
                    }
                }
                let neighbor = if edge.source() == node { edge.target() } else { edge.source() };
                if visited.insert(neighbor) {
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }

        facts
    }
}

#[async_trait]
impl KnowledgeGraphStore for SchemeGraph {
    async fn query(&self, question: &str, profile: &Profile, max_hops: usize) -> Result<Vec<GraphFact>> {
        Ok(self.related_facts(question, profile, max_hops))
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
