//! # Budget Tree Builder
//!
//! A library for reconstructing multi-level hierarchical budget breakdowns
//! from semi-structured demand-for-grants spreadsheets, where hierarchy is
//! expressed only through visual conventions: indentation columns, "Total - X"
//! closing markers, ALL-CAPS group labels, and "Net" aggregate rows.
//!
//! ## Core Concepts
//!
//! - **Sheet**: an in-memory grid of {empty, text, number} cells. File
//!   loading is a caller concern.
//! - **Structure discovery**: each demand sheet carries a three-line header,
//!   an amount-column header row, and lettered (A, B, C, …) sections.
//! - **Hierarchy parsing**: a recursive descent over name columns and row
//!   ranges emits (label path, amount) heads.
//! - **Budget tree**: heads insert by path into a keyed tree with declared
//!   and derived totals, reconciled bottom-up and serialized
//!   deterministically for visualization consumers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use budget_tree_builder::*;
//!
//! let sheets: Vec<Sheet> = load_workbook_somehow();
//! let config = ParseConfig::default();
//! let parsed = parse_workbook(&sheets, &config, &AcceptNet)?;
//!
//! let root = assemble_national_tree(&parsed, "Union 2023-24");
//! println!("{}", root.serialize_tree(Some(1), &config));
//!
//! let edges = EdgeTable::from_tree(&root, &config);
//! edges.write_csv(std::io::stdout())?;
//! ```

pub mod amount;
pub mod columns;
pub mod config;
pub mod demand;
pub mod edges;
pub mod error;
pub mod grid;
pub mod parser;
pub mod structure;
pub mod tree;

pub use columns::{classify_columns, ColumnLayout};
pub use config::ParseConfig;
pub use demand::{
    assemble_national_tree, check_demand_coverage, demands_directory, write_demands_directory,
    write_ministry_edge_csvs, DemandsDirEntry, ParsedSheet,
};
pub use edges::{key_abbrev, Edge, EdgeRow, EdgeTable, NodeRecord};
pub use error::{BudgetError, Result};
pub use grid::{Cell, Sheet, SheetSlice};
pub use parser::{
    normalize_head, AcceptNet, BudgetHead, DeclineNet, HierarchyParser, NetDecision, NetMismatch,
    NetRowPolicy,
};
pub use structure::{locate_structure, RowRange, Section, SheetStructure};
pub use tree::{sanitize_key, write_rows_csv, BudgetNode, LeafRow};

use log::{debug, info, warn};

/// Parses one demand sheet: structure discovery, per-section column
/// classification, then hierarchy parsing over every section.
pub fn parse_sheet(
    sheet: &Sheet,
    config: &ParseConfig,
    policy: &dyn NetRowPolicy,
) -> Result<ParsedSheet> {
    let structure = locate_structure(sheet, config)?;
    debug!("Sheet structure: {:?}", structure);

    let mut parser = HierarchyParser::new(config, policy);
    for section in &structure.sections {
        let slice = sheet.slice(section.start, section.end);
        let layout = classify_columns(slice, config)?;
        if layout.amount_cols != structure.amount_cols {
            debug!(
                "Section {}: classified amount columns differ from header-derived ones",
                section.name
            );
        }
        parser.parse_section(slice, &layout)?;
    }

    ParsedSheet::new(structure.header, parser.into_heads())
}

/// Parses a whole workbook. Structural failures skip the offending sheet and
/// continue; a declined net-row confirmation aborts the batch.
pub fn parse_workbook(
    sheets: &[Sheet],
    config: &ParseConfig,
    policy: &dyn NetRowPolicy,
) -> Result<Vec<ParsedSheet>> {
    let mut parsed = Vec::new();
    for (idx, sheet) in sheets.iter().enumerate() {
        info!("Parsing sheet {}", idx);
        match parse_sheet(sheet, config, policy) {
            Ok(result) => parsed.push(result),
            Err(err) if err.is_structural() => {
                warn!("Cannot parse sheet {}: {}; skipping", idx, err);
            }
            Err(err) => return Err(err),
        }
    }
    info!("Parsed {} of {} sheets", parsed.len(), sheets.len());
    check_demand_coverage(&parsed);
    Ok(parsed)
}
