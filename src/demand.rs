//! Parsed-sheet interchange form and multi-demand tree assembly.
//!
//! A demand sheet parses into a header triple plus a flat list of heads; that
//! form round-trips through JSON so extraction can run out of process. Trees
//! are rebuilt per demand, grouped by ministry, and rolled up into a single
//! national root for edge-table export.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::ParseConfig;
use crate::edges::{key_abbrev, EdgeTable};
use crate::error::{BudgetError, Result};
use crate::parser::BudgetHead;
use crate::tree::BudgetNode;

static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digits pattern"));

/// Replaces non-printable characters with spaces and collapses whitespace
/// runs; sheet headers arrive with stray control characters.
pub fn clean_str(s: &str) -> String {
    let replaced: String = s
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { ' ' })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One parsed demand sheet: the header triple and every emitted head.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ParsedSheet {
    /// Ministry, demand identifier, department.
    pub header: Vec<String>,
    #[serde(rename = "list_of_heads")]
    pub heads: Vec<BudgetHead>,
}

impl ParsedSheet {
    /// Builds the interchange form, normalizing the header: overlong headers
    /// fold lines 3.. into the department field, short headers are invalid,
    /// and every line is cleaned of non-printable noise.
    pub fn new(header: Vec<String>, heads: Vec<BudgetHead>) -> Result<Self> {
        let header = match header.len() {
            0..=2 => {
                return Err(BudgetError::InvalidHeader(format!(
                    "expected 3 header lines, got {}",
                    header.len()
                )))
            }
            3 => header,
            _ => {
                let mut folded = header[..2].to_vec();
                folded.push(header[2..].concat());
                folded
            }
        };
        let header = header.iter().map(|line| clean_str(line)).collect();
        Ok(Self { header, heads })
    }

    pub fn ministry(&self) -> &str {
        &self.header[0]
    }

    pub fn department(&self) -> &str {
        &self.header[2]
    }

    /// Demand number extracted from the identifier line.
    pub fn demand_no(&self) -> Option<u32> {
        DIGITS_RE
            .find(&self.header[1])
            .and_then(|m| m.as_str().parse().ok())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: ParsedSheet = serde_json::from_str(json)?;
        // Re-run header normalization on externally produced JSON.
        Self::new(raw.header, raw.heads)
    }

    pub fn schema_as_json() -> Result<String> {
        let schema = schemars::schema_for!(ParsedSheet);
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    /// Per-demand tree rooted at the full header, populated from the
    /// expenditure ("A. ") section only.
    pub fn tree(&self) -> BudgetNode {
        let root_name = self.header.join("\n");
        let mut root = BudgetNode::new(&root_name, 0.0);
        for head in &self.heads {
            let in_expenditure = head
                .path
                .first()
                .map(|p| p.starts_with("A. "))
                .unwrap_or(false);
            if in_expenditure {
                root.insert_path(&head.path[1..], head.amount);
            }
        }
        root
    }
}

/// Warns about gaps in the 1..=max demand-number sequence across a batch.
pub fn check_demand_coverage(sheets: &[ParsedSheet]) {
    let ids: Vec<u32> = sheets.iter().filter_map(ParsedSheet::demand_no).collect();
    let Some(&max) = ids.iter().max() else {
        return;
    };
    let mut complete = true;
    for id in 1..=max {
        if !ids.contains(&id) {
            warn!("Demand No. {} not found!", id);
            complete = false;
        }
    }
    if complete {
        info!("All demand ids found!");
    }
}

/// Groups demands by ministry and rolls everything up under a single
/// national root, reconciled bottom-up. Debt-repayment demands distort the
/// expenditure picture and stay out.
pub fn assemble_national_tree(sheets: &[ParsedSheet], root_name: &str) -> BudgetNode {
    let mut by_ministry: BTreeMap<String, Vec<&ParsedSheet>> = BTreeMap::new();
    for sheet in sheets {
        by_ministry
            .entry(sheet.ministry().to_string())
            .or_default()
            .push(sheet);
    }
    info!("Assembling {} ministries", by_ministry.len());

    let mut root = BudgetNode::new(root_name, 0.0);
    for (ministry, group) in by_ministry {
        let mut ministry_node = BudgetNode::new(&ministry, 0.0);
        for sheet in group {
            if sheet.department() == "Repayment of Debt" {
                info!("Skipping debt repayment demand under {}", ministry);
                continue;
            }
            ministry_node.add_child_node(sheet.tree());
        }
        root.add_child_node(ministry_node);
    }
    root.reconcile();
    root
}

/// Row of the demands directory artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandsDirEntry {
    pub demand_id: u32,
    pub ministry: String,
    pub department: String,
    pub csv_name: String,
}

/// Directory of a batch's demands, sorted by (id, ministry, department).
pub fn demands_directory(sheets: &[ParsedSheet]) -> Vec<DemandsDirEntry> {
    let mut entries: Vec<DemandsDirEntry> = sheets
        .iter()
        .filter_map(|sheet| {
            let id = sheet.demand_no()?;
            Some(DemandsDirEntry {
                demand_id: id,
                ministry: sheet.ministry().to_string(),
                department: sheet.department().to_string(),
                csv_name: format!("dno_{}.csv", id),
            })
        })
        .collect();
    entries.sort_by(|a, b| {
        (a.demand_id, &a.ministry, &a.department).cmp(&(b.demand_id, &b.ministry, &b.department))
    });
    entries
}

pub fn write_demands_directory<W: Write>(entries: &[DemandsDirEntry], writer: W) -> Result<()> {
    let mut w = csv::Writer::from_writer(writer);
    for entry in entries {
        w.serialize(entry)?;
    }
    w.flush()?;
    Ok(())
}

/// Writes the depth-limited national overview plus one full edge CSV per
/// ministry, named by abbreviation.
pub fn write_ministry_edge_csvs(
    root: &BudgetNode,
    out_dir: &Path,
    config: &ParseConfig,
) -> Result<()> {
    fs::create_dir_all(out_dir)?;

    let overview = EdgeTable::from_subtree(root, Some(2), config);
    let overview_path = out_dir.join("overview.csv");
    info!("Writing {}", overview_path.display());
    overview.write_csv(File::create(&overview_path)?)?;

    for ministry in root.children() {
        let table = EdgeTable::from_subtree(ministry, None, config);
        let path = out_dir.join(format!("{}.csv", key_abbrev(&ministry.name)));
        info!("Writing {}", path.display());
        table.write_csv(File::create(&path)?)?;
    }
    Ok(())
}
