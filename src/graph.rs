//! Similarity graphs over entity names.
//!
//! Nodes are sized by volume; edges link entities whose names are close
//! in TF-IDF space.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use stop_words::{get, LANGUAGE};
use tracing::debug;

use crate::model::Entity;

pub const BASE_SIZE: f64 = 10.0;
pub const SIZE_RANGE: f64 = 40.0;
pub const DEFAULT_THRESHOLD: f64 = 0.15;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?u)\b\w\w+\b").expect("valid token regex"));
static STOP_WORDS: Lazy<HashSet<String>> =
    Lazy::new(|| get(LANGUAGE::English).into_iter().collect());

#[derive(Debug, Clone, PartialEq)]
pub struct GraphOptions {
    /// Edges need a similarity strictly above this.
    pub threshold: f64,
    pub base_size: f64,
    pub size_range: f64,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            base_size: BASE_SIZE,
            size_range: SIZE_RANGE,
        }
    }
}

impl GraphOptions {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    pub volume: u64,
    pub size: f64,
}

/// An undirected edge between `nodes[source]` and `nodes[target]`, `source < target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum VectorizeError {
    /// Every name was reduced to nothing by tokenizing and stop word removal.
    EmptyVocabulary,
}

/// Lower-cased word tokens of at least two characters, without stop words.
fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|mat| mat.as_str().to_lowercase())
        .filter(|token| !STOP_WORDS.contains(token))
        .collect()
}

/// Unigrams plus adjacent-token bigrams.
fn extract_terms(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let mut terms = Vec::with_capacity(tokens.len() * 2);
    terms.extend(tokens.iter().cloned());
    for window in tokens.windows(2) {
        if let [first, second] = window {
            terms.push(format!("{first} {second}"));
        }
    }
    terms
}

type SparseVector = HashMap<String, f64>;

/// L2-normalized TF-IDF vectors, one per document, with smoothed IDF.
fn tfidf_vectors(documents: &[&str]) -> Result<Vec<SparseVector>, VectorizeError> {
    let terms: Vec<Vec<String>> = documents.iter().map(|doc| extract_terms(doc)).collect();

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for doc_terms in &terms {
        let seen: HashSet<&str> = doc_terms.iter().map(String::as_str).collect();
        for term in seen {
            *doc_freq.entry(term).or_insert(0) += 1;
        }
    }
    if doc_freq.is_empty() {
        return Err(VectorizeError::EmptyVocabulary);
    }

    let doc_count = documents.len() as f64;
    let idf = |term: &str| {
        let df = *doc_freq.get(term).unwrap_or(&0) as f64;
        ((1.0 + doc_count) / (1.0 + df)).ln() + 1.0
    };

    Ok(terms
        .iter()
        .map(|doc_terms| {
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for term in doc_terms {
                *counts.entry(term.as_str()).or_insert(0) += 1;
            }
            let mut vector: SparseVector = counts
                .into_iter()
                .map(|(term, count)| (term.to_string(), count as f64 * idf(term)))
                .collect();
            let norm = vector.values().map(|val| val * val).sum::<f64>().sqrt();
            if norm > 0.0 {
                for val in vector.values_mut() {
                    *val /= norm;
                }
            }
            vector
        })
        .collect())
}

fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(term, val)| large.get(term).map(|other| val * other))
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

/// Min-max scale `volume` into `[base_size, base_size + size_range]`.
fn node_size(volume: u64, min: u64, max: u64, options: &GraphOptions) -> f64 {
    let spread = (max - min).max(1) as f64;
    options.base_size + (volume - min) as f64 / spread * options.size_range
}

/// Build the similarity graph of `entities`, in input order.
pub fn build_graph(entities: &[Entity], options: &GraphOptions) -> SimilarityGraph {
    let (Some(min), Some(max)) = (
        entities.iter().map(|entity| entity.volume).min(),
        entities.iter().map(|entity| entity.volume).max(),
    ) else {
        return SimilarityGraph::default();
    };

    let nodes: Vec<GraphNode> = entities
        .iter()
        .map(|entity| GraphNode {
            id: entity.id.clone(),
            name: entity.name.clone(),
            volume: entity.volume,
            size: node_size(entity.volume, min, max, options),
        })
        .collect();
    if nodes.len() < 2 {
        return SimilarityGraph {
            nodes,
            edges: Vec::new(),
        };
    }

    let names: Vec<&str> = entities.iter().map(|entity| entity.name.as_str()).collect();
    let vectors = match tfidf_vectors(&names) {
        Ok(vectors) => vectors,
        Err(err) => {
            debug!(?err, "no edges: names could not be vectorized");
            return SimilarityGraph {
                nodes,
                edges: Vec::new(),
            };
        }
    };

    let mut edges = Vec::new();
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            let weight = cosine(&vectors[i], &vectors[j]);
            if weight > options.threshold {
                edges.push(GraphEdge {
                    source: i,
                    target: j,
                    weight,
                });
            }
        }
    }
    SimilarityGraph { nodes, edges }
}

/// Escape `"` and replace `\` with `\\`.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\"', "\\\"")
}

impl SimilarityGraph {
    /// Render as an undirected Graphviz graph.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("graph {\n");
        for node in &self.nodes {
            // writing to a String cannot fail
            let _ = writeln!(
                dot,
                "    \"{}\" [label=\"{}\",volume={},size={:.2}];",
                escape(&node.id),
                escape(&node.name),
                node.volume,
                node.size,
            );
        }
        for edge in &self.edges {
            let _ = writeln!(
                dot,
                "    \"{}\" -- \"{}\" [weight={:.3}];",
                escape(&self.nodes[edge.source].id),
                escape(&self.nodes[edge.target].id),
                edge.weight,
            );
        }
        dot.push('}');
        dot
    }
}
