//! Budget tree: keyed, ordered nodes with declared and derived totals.
//!
//! A node's *effective* total is its declared total when one was parsed, and
//! the sum of its children's effective totals otherwise. Children stay sorted
//! non-increasing by effective total after every mutation so serialized
//! output is deterministic.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;

use log::warn;
use serde::Serialize;

use crate::amount::{format_pair, INR_ONE_CRORE};
use crate::config::ParseConfig;
use crate::error::Result;

/// Lookup key: trimmed, internal whitespace removed, lowercased. Display
/// names keep their original spacing.
pub fn sanitize_key(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetNode {
    pub name: String,
    pub key: String,
    pub total_init: f64,
    pub total_children: f64,
    children: Vec<BudgetNode>,
    #[serde(skip)]
    child_index: HashMap<String, usize>,
}

impl BudgetNode {
    pub fn new(name: &str, total_init: f64) -> Self {
        let mut display = name.trim().to_string();
        if display.contains("Demand No.") {
            // A raw three-line sheet header leaked in as a name; the third
            // line is the department, which is what the tree should show.
            warn!("\"Demand No.\" found in node name; using department line");
            if let Some(dept) = display.split('\n').nth(2) {
                display = dept.trim().to_string();
            }
        }

        Self {
            name: display,
            key: sanitize_key(name),
            total_init,
            total_children: 0.0,
            children: Vec::new(),
            child_index: HashMap::new(),
        }
    }

    /// Declared total when one was parsed, otherwise the children's sum.
    pub fn total(&self) -> f64 {
        if self.total_init > 0.0 {
            self.total_init
        } else {
            self.total_children
        }
    }

    pub fn unallocated(&self) -> f64 {
        self.total_init - self.total_children
    }

    pub fn children(&self) -> &[BudgetNode] {
        &self.children
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(BudgetNode::node_count).sum::<usize>()
    }

    pub fn get_child(&self, name: &str) -> Option<&BudgetNode> {
        let key = sanitize_key(name);
        match self.child_index.get(&key) {
            Some(&idx) => Some(&self.children[idx]),
            None => {
                warn!("Child \"{}\" not found in \"{}\"", name, self.name);
                None
            }
        }
    }

    fn get_child_mut(&mut self, name: &str) -> Option<&mut BudgetNode> {
        let key = sanitize_key(name);
        match self.child_index.get(&key).copied() {
            Some(idx) => Some(&mut self.children[idx]),
            None => None,
        }
    }

    /// Sequential child lookup along `path`. Returns `None` at the first
    /// missing segment; never panics.
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&BudgetNode> {
        let mut node = self;
        for segment in path {
            node = node.get_child(segment.as_ref())?;
        }
        Some(node)
    }

    /// Adds (or merges into) a direct child with a declared total.
    pub fn add_child(&mut self, name: &str, total: f64) {
        let key = sanitize_key(name);
        match self.child_index.get(&key) {
            Some(&idx) => {
                warn!("Child \"{}\" already exists; accumulating total", name);
                self.children[idx].total_init += total;
            }
            None => self.children.push(BudgetNode::new(name, total)),
        }
        self.refresh();
    }

    /// Attaches an already-built subtree as a child.
    pub fn add_child_node(&mut self, node: BudgetNode) {
        let existing = self.child_index.get(&node.key).copied();
        match existing {
            Some(idx) => {
                // Duplicate demand identities only occur on malformed input;
                // fold the total rather than carrying two keyed copies.
                warn!(
                    "Child \"{}\" already exists in \"{}\"; folding totals",
                    node.name, self.name
                );
                self.children[idx].total_init += node.total();
            }
            None => self.children.push(node),
        }
        self.refresh();
    }

    /// Walks/creates nodes along `path`, crediting `amount` to the terminal
    /// node. Re-inserting an existing terminal accumulates its declared total
    /// instead of duplicating the node.
    pub fn insert_path<S: AsRef<str>>(&mut self, path: &[S], amount: f64) {
        let Some(first) = path.first() else {
            warn!("Empty insertion path under \"{}\"", self.name);
            return;
        };
        let name = first.as_ref();
        let is_leaf = path.len() == 1;

        match self.get_child_mut(name) {
            Some(child) => {
                if is_leaf {
                    child.total_init += amount;
                } else {
                    child.insert_path(&path[1..], amount);
                }
            }
            None => {
                let mut child = BudgetNode::new(name, if is_leaf { amount } else { 0.0 });
                if !is_leaf {
                    child.insert_path(&path[1..], amount);
                }
                self.children.push(child);
            }
        }
        self.refresh();
    }

    /// Post-order pass: recompute children sums and raise (never lower) any
    /// declared total that falls below its children's sum.
    pub fn reconcile(&mut self) {
        for child in &mut self.children {
            child.reconcile();
        }

        self.total_children = self.children.iter().map(BudgetNode::total).sum();

        if self.total_init > 0.0
            && self.total_children > 0.0
            && self.total_init < self.total_children
        {
            warn!(
                "{}: declared total {:.2} below children's sum {:.2}; raising",
                self.name, self.total_init, self.total_children
            );
            self.total_init = self.total_children;
        }

        self.sort_children();
    }

    fn refresh(&mut self) {
        self.total_children = self.children.iter().map(BudgetNode::total).sum();
        self.sort_children();
    }

    fn sort_children(&mut self) {
        // Stable sort: equal effective totals keep insertion order.
        self.children.sort_by(|a, b| {
            b.total()
                .partial_cmp(&a.total())
                .unwrap_or(Ordering::Equal)
        });
        self.child_index = self
            .children
            .iter()
            .enumerate()
            .map(|(idx, child)| (child.key.clone(), idx))
            .collect();
    }

    /// Indented text rendering; `max_depth` limits recursion (root is depth 0).
    pub fn serialize_tree(&self, max_depth: Option<usize>, config: &ParseConfig) -> String {
        let mut out = String::new();
        self.serialize_tree_inner(0, max_depth, config, &mut out);
        out
    }

    fn serialize_tree_inner(
        &self,
        depth: usize,
        max_depth: Option<usize>,
        config: &ParseConfig,
        out: &mut String,
    ) {
        if let Some(limit) = max_depth {
            if depth > limit {
                return;
            }
        }

        let prefix = "\t".repeat(depth);
        out.push_str(&format!("{}[BudgetNode] {}\n", prefix, self.name));
        if self.total_init > 0.0 {
            out.push_str(&format!(
                "{} - [Total, Initialized] {}\n",
                prefix,
                format_pair(self.total_init)
            ));
            if self.unallocated() / self.total_init > config.unallocated_display_threshold {
                out.push_str(&format!(
                    "{} - [Unallocated] {}\n",
                    prefix,
                    format_pair(self.unallocated())
                ));
            }
        } else {
            out.push_str(&format!(
                "{} - [Total] {}\n",
                prefix,
                format_pair(self.total_children)
            ));
        }
        out.push_str(&format!("{}- {} children\n", prefix, self.children.len()));

        for child in &self.children {
            child.serialize_tree_inner(depth + 1, max_depth, config, out);
        }
    }

    /// One row per leaf: full path from this node down, padded to the tree's
    /// maximum depth, with the leaf's declared amount in crore and USD
    /// billions.
    pub fn serialize_rows(&self, config: &ParseConfig) -> Vec<LeafRow> {
        let mut raw: Vec<(Vec<String>, f64)> = Vec::new();
        self.serialize_rows_inner(&mut vec![self.name.clone()], &mut raw);

        let max_len = raw.iter().map(|(path, _)| path.len()).max().unwrap_or(0);
        raw.into_iter()
            .map(|(mut path, amount)| {
                path.resize(max_len, String::new());
                LeafRow {
                    amount_usd_billion: amount * INR_ONE_CRORE / config.usd_to_inr / 1e9,
                    amount_crore: amount,
                    path,
                }
            })
            .collect()
    }

    fn serialize_rows_inner(&self, context: &mut Vec<String>, out: &mut Vec<(Vec<String>, f64)>) {
        if self.children.is_empty() {
            out.push((context.clone(), self.total_init));
            return;
        }
        for child in &self.children {
            context.push(child.name.clone());
            child.serialize_rows_inner(context, out);
            context.pop();
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeafRow {
    pub path: Vec<String>,
    pub amount_crore: f64,
    pub amount_usd_billion: f64,
}

/// Writes leaf rows as CSV with `name0..nameN` path columns followed by the
/// two amount columns.
pub fn write_rows_csv<W: Write>(rows: &[LeafRow], writer: W) -> Result<()> {
    let mut w = csv::Writer::from_writer(writer);
    let width = rows.first().map(|r| r.path.len()).unwrap_or(0);

    let mut header: Vec<String> = (0..width).map(|i| format!("name{}", i)).collect();
    header.push("amounts_inrcr".to_string());
    header.push("amounts_usdb".to_string());
    w.write_record(&header)?;

    for row in rows {
        let mut record: Vec<String> = row.path.clone();
        record.push(format!("{}", row.amount_crore));
        record.push(format!("{}", row.amount_usd_billion));
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}
