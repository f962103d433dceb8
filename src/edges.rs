//! Flattens a budget tree into a deterministic source→destination edge table
//! for visualization consumers.
//!
//! Node identity in the table is the abbreviation path: each path segment
//! contributes the lowercased first letters of its words, segments joined by
//! underscores, so "Ministry of Defence" under the root becomes `r_mod`.

use std::io::Write;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::amount::INR_ONE_CRORE;
use crate::config::ParseConfig;
use crate::error::Result;
use crate::tree::BudgetNode;

static WORD_INITIALS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w").expect("word-initial pattern"));

/// Lowercased first letter of every word: "Ministry of Defence" → "mod".
pub fn key_abbrev(name: &str) -> String {
    WORD_INITIALS_RE
        .find_iter(name)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source_name: String,
    pub dest_name: String,
    pub source_abbrev: String,
    pub dest_abbrev: String,
    pub amount: f64,
}

/// Root-of-subtree edge with an empty source, used to head standalone CSVs.
pub fn root_edge(node: &BudgetNode) -> Edge {
    Edge {
        source_name: String::new(),
        dest_name: node.name.clone(),
        source_abbrev: String::new(),
        dest_abbrev: key_abbrev(&node.name),
        amount: node.total(),
    }
}

/// Pre-order edge collection under a synthetic ROOT parent.
pub fn serialize_edges(
    root: &BudgetNode,
    max_depth: Option<usize>,
    config: &ParseConfig,
) -> Vec<Edge> {
    let mut edges = Vec::new();
    let mock_root = BudgetNode::new("ROOT", 0.0);
    let mut names = vec![mock_root.name.clone()];
    let mut abbrevs = vec![key_abbrev(&mock_root.name)];

    // The mock root has exactly one child: the real root.
    if max_depth.map_or(true, |limit| names.len() < limit) {
        push_child_edge(&mock_root, root, &names, &abbrevs, &mut edges);
        names.push(root.name.clone());
        abbrevs.push(key_abbrev(&root.name));
        collect_edges(root, &mut names, &mut abbrevs, max_depth, config, &mut edges);
    }

    edges
}

/// Edge collection rooted at the node itself (no synthetic parent).
pub fn serialize_subtree_edges(
    root: &BudgetNode,
    max_depth: Option<usize>,
    config: &ParseConfig,
) -> Vec<Edge> {
    let mut edges = vec![root_edge(root)];
    let mut names = vec![root.name.clone()];
    let mut abbrevs = vec![key_abbrev(&root.name)];
    collect_edges(root, &mut names, &mut abbrevs, max_depth, config, &mut edges);
    edges
}

fn push_child_edge(
    parent: &BudgetNode,
    child: &BudgetNode,
    names: &[String],
    abbrevs: &[String],
    out: &mut Vec<Edge>,
) {
    let source_abbrev = abbrevs.join("_");
    let dest_abbrev = format!("{}_{}", source_abbrev, key_abbrev(&child.name));
    out.push(Edge {
        source_name: parent.name.clone(),
        dest_name: child.name.clone(),
        source_abbrev,
        dest_abbrev,
        amount: child.total(),
    });
}

fn collect_edges(
    node: &BudgetNode,
    names: &mut Vec<String>,
    abbrevs: &mut Vec<String>,
    max_depth: Option<usize>,
    config: &ParseConfig,
    out: &mut Vec<Edge>,
) {
    if let Some(limit) = max_depth {
        if names.len() >= limit {
            return;
        }
    }
    if node.children().is_empty() {
        return;
    }

    let unalloc_frac = if node.total_init > 0.0 {
        node.unallocated() / node.total_init
    } else {
        0.0
    };
    let unalloc_node = (unalloc_frac > config.unallocated_threshold)
        .then(|| BudgetNode::new("Unallocated", node.unallocated()));

    for child in node.children().iter().chain(unalloc_node.iter()) {
        push_child_edge(node, child, names, abbrevs, out);
        names.push(child.name.clone());
        abbrevs.push(key_abbrev(&child.name));
        collect_edges(child, names, abbrevs, max_depth, config, out);
        names.pop();
        abbrevs.pop();
    }
}

/// One row of the CSV artifact, amounts expanded to INR and USD.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeRow {
    pub id: usize,
    pub source_name: String,
    pub dest_name: String,
    pub source_abbrev: String,
    pub dest_abbrev: String,
    pub amount: f64,
    pub amount_inr: f64,
    pub amount_usd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct EdgeTable {
    pub rows: Vec<EdgeRow>,
}

impl EdgeTable {
    /// Full-tree table under a synthetic ROOT parent.
    pub fn from_tree(root: &BudgetNode, config: &ParseConfig) -> Self {
        Self::from_edges(serialize_edges(root, None, config), config)
    }

    /// Subtree table headed by the node's own root edge.
    pub fn from_subtree(root: &BudgetNode, max_depth: Option<usize>, config: &ParseConfig) -> Self {
        Self::from_edges(serialize_subtree_edges(root, max_depth, config), config)
    }

    fn from_edges(mut edges: Vec<Edge>, config: &ParseConfig) -> Self {
        edges.sort_by(|a, b| {
            (a.source_abbrev.as_str(), a.dest_abbrev.as_str())
                .cmp(&(b.source_abbrev.as_str(), b.dest_abbrev.as_str()))
        });

        let rows = edges
            .into_iter()
            .enumerate()
            .map(|(id, e)| {
                let amount_inr = e.amount * INR_ONE_CRORE;
                EdgeRow {
                    id,
                    source_name: e.source_name,
                    dest_name: e.dest_name,
                    source_abbrev: e.source_abbrev,
                    dest_abbrev: e.dest_abbrev,
                    amount: e.amount,
                    amount_inr,
                    amount_usd: amount_inr / config.usd_to_inr,
                }
            })
            .collect();

        Self { rows }
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut w = csv::Writer::from_writer(writer);
        for row in &self.rows {
            w.serialize(row)?;
        }
        w.flush()?;
        Ok(())
    }

    /// Splits the table into a deduplicated node list (dest occurrences take
    /// precedence over source occurrences) and the abbreviation-keyed links.
    pub fn nodes_and_edges(&self) -> (Vec<NodeRecord>, Vec<(String, String, f64, f64)>) {
        let mut nodes: Vec<NodeRecord> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for row in &self.rows {
            if seen.insert(row.dest_abbrev.clone()) {
                nodes.push(NodeRecord {
                    key: row.dest_abbrev.clone(),
                    name: row.dest_name.clone(),
                });
            }
        }
        for row in &self.rows {
            if seen.insert(row.source_abbrev.clone()) {
                nodes.push(NodeRecord {
                    key: row.source_abbrev.clone(),
                    name: row.source_name.clone(),
                });
            }
        }

        let links = self
            .rows
            .iter()
            .map(|r| {
                (
                    r.source_abbrev.clone(),
                    r.dest_abbrev.clone(),
                    r.amount_inr,
                    r.amount_usd,
                )
            })
            .collect();

        (nodes, links)
    }
}
