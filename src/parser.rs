//! Recursive-descent parser that walks a section's name columns and row
//! ranges, emitting labeled amounts.
//!
//! Hierarchy in the source sheets is purely visual: outer columns hold group
//! labels, "Total - X" rows close a group, ALL-CAPS labels open one without a
//! closing row, and "Net" rows aggregate the Gross/Recoveries component rows
//! above them. The parser turns those conventions into (path, amount) pairs.

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::columns::ColumnLayout;
use crate::config::ParseConfig;
use crate::error::{BudgetError, Result};
use crate::grid::SheetSlice;
use crate::tree::sanitize_key;

static TOTAL_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Total\s*-\s*(.+)$").expect("total-prefix pattern"));

/// One labeled amount: the label path from the section root to the leaf,
/// amount in crore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BudgetHead {
    #[serde(rename = "head")]
    pub path: Vec<String>,
    pub amount: f64,
}

/// Trims a label and canonicalizes sloppy close markers: "Total-X" and
/// "Total -X" both become "Total - X".
pub fn normalize_head(s: &str) -> String {
    let trimmed = s.trim();
    match TOTAL_PREFIX_RE.captures(trimmed) {
        Some(caps) => format!("Total - {}", caps[1].trim()),
        None => trimmed.to_string(),
    }
}

/// Structural group labels are (almost) fully capitalized; incidental text is
/// not. Labels with fewer than two letters never qualify.
pub fn is_mostly_caps(s: &str, caps_ratio: f64) -> bool {
    let letters = s.chars().filter(|c| c.is_ascii_alphabetic()).count();
    if s.trim().len() < 2 || letters < 2 {
        return false;
    }
    let upper = s.chars().filter(|c| c.is_ascii_uppercase()).count();
    upper as f64 / letters as f64 > caps_ratio
}

fn has_letter(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_alphabetic())
}

fn path_with(context: &[String], label: &str) -> Vec<String> {
    let mut path = context.to_vec();
    path.push(label.to_string());
    path
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetDecision {
    Accept,
    Decline,
}

/// Details handed to the confirmation policy when a net row disagrees with
/// its component rows beyond tolerance.
#[derive(Debug)]
pub struct NetMismatch<'a> {
    pub context: &'a [String],
    pub row: usize,
    pub net_amount: f64,
    pub component_sum: f64,
}

impl NetMismatch<'_> {
    pub fn discrepancy(&self) -> f64 {
        self.net_amount - self.component_sum
    }
}

/// Synchronous decision hook for ambiguous net rows. Injected so batch runs
/// can auto-accept or auto-decline and tests stay deterministic.
pub trait NetRowPolicy {
    fn confirm(&self, mismatch: &NetMismatch<'_>) -> NetDecision;
}

/// Accepts every mismatch, trusting the stated net amount.
pub struct AcceptNet;

impl NetRowPolicy for AcceptNet {
    fn confirm(&self, _mismatch: &NetMismatch<'_>) -> NetDecision {
        NetDecision::Accept
    }
}

/// Declines every mismatch, halting the run.
pub struct DeclineNet;

impl NetRowPolicy for DeclineNet {
    fn confirm(&self, _mismatch: &NetMismatch<'_>) -> NetDecision {
        NetDecision::Decline
    }
}

/// Open/close pairing for one column, precomputed before recursing so the
/// geometry never has to be re-derived on backtrack.
#[derive(Debug)]
struct HeadSpan {
    open: usize,
    label: String,
    /// Row of the matching "Total - X" marker, when one exists.
    close: Option<usize>,
    /// Exclusive row bound of the span's body: the close row, or the next
    /// open label, or the range end.
    end: usize,
}

fn pair_spans(labels: &[(usize, String)], range_end: usize) -> Vec<HeadSpan> {
    let opens: Vec<&(usize, String)> = labels
        .iter()
        .filter(|(_, label)| !label.starts_with("Total - "))
        .collect();

    let mut spans = Vec::with_capacity(opens.len());
    for (idx, (open, label)) in opens.iter().enumerate() {
        let close_key = sanitize_key(&format!("Total - {}", label));
        let close = labels
            .iter()
            .find(|(row, candidate)| *row > *open && sanitize_key(candidate) == close_key)
            .map(|(row, _)| *row);
        let end = match close {
            Some(close_row) => {
                debug!("Found open-close pair: {} ({} - {})", label, open, close_row);
                close_row
            }
            None => opens
                .get(idx + 1)
                .map(|(row, _)| *row)
                .unwrap_or(range_end),
        };
        spans.push(HeadSpan {
            open: *open,
            label: label.clone(),
            close,
            end,
        });
    }
    spans
}

pub struct HierarchyParser<'a> {
    config: &'a ParseConfig,
    policy: &'a dyn NetRowPolicy,
    heads: Vec<BudgetHead>,
}

impl<'a> HierarchyParser<'a> {
    pub fn new(config: &'a ParseConfig, policy: &'a dyn NetRowPolicy) -> Self {
        Self {
            config,
            policy,
            heads: Vec::new(),
        }
    }

    pub fn heads(&self) -> &[BudgetHead] {
        &self.heads
    }

    pub fn into_heads(self) -> Vec<BudgetHead> {
        self.heads
    }

    /// Parses one section region. The section's own "A. ..." label row is
    /// part of the region, so emitted paths start with it.
    pub fn parse_section(&mut self, slice: SheetSlice<'_>, layout: &ColumnLayout) -> Result<()> {
        if layout.name_cols.is_empty() {
            warn!("Region has no name columns; skipping");
            return Ok(());
        }
        self.parse_range(slice, layout, 0, &[])
    }

    fn emit(&mut self, path: Vec<String>, amount: f64) {
        if amount.abs() > self.config.min_leaf_amount {
            debug!("Adding head {:?} = {}", path, amount);
            self.heads.push(BudgetHead { path, amount });
        } else {
            debug!("Dropping sub-threshold amount {} for {:?}", amount, path);
        }
    }

    fn label_at(&self, slice: SheetSlice<'_>, row: usize, col: usize) -> Option<String> {
        slice
            .text(row, col)
            .map(normalize_head)
            .filter(|label| has_letter(label))
    }

    fn find_net_row(slice: SheetSlice<'_>, col: usize) -> Option<usize> {
        slice.rows().find(|&row| {
            slice
                .text(row, col)
                .map(|t| sanitize_key(t) == "net")
                .unwrap_or(false)
        })
    }

    fn component_sum(slice: SheetSlice<'_>, net_row: usize, layout: &ColumnLayout) -> f64 {
        slice
            .sub(slice.start(), net_row)
            .rows()
            .filter_map(|row| slice.number(row, layout.value_col()))
            .sum()
    }

    fn parse_range(
        &mut self,
        slice: SheetSlice<'_>,
        layout: &ColumnLayout,
        depth: usize,
        context: &[String],
    ) -> Result<()> {
        if slice.is_empty() {
            return Ok(());
        }
        let col = layout.name_cols[depth];
        let last_depth = depth + 1 == layout.name_cols.len();

        if slice.len() == 1 {
            let row = slice.start();
            if let Some(label) = self.label_at(slice, row, col) {
                if let Some(amount) = slice.number(row, layout.value_col()) {
                    self.emit(path_with(context, &label), amount);
                }
            } else if !last_depth {
                return self.parse_range(slice, layout, depth + 1, context);
            }
            return Ok(());
        }

        if last_depth {
            if let Some(net_row) = Self::find_net_row(slice, col) {
                return self.resolve_net(slice, net_row, layout, depth, context, None);
            }
            for row in slice.rows() {
                if let Some(label) = self.label_at(slice, row, col) {
                    if let Some(amount) = slice.number(row, layout.value_col()) {
                        self.emit(path_with(context, &label), amount);
                    }
                }
            }
            return Ok(());
        }

        let mut labels: Vec<(usize, String)> = slice
            .rows()
            .filter_map(|row| self.label_at(slice, row, col).map(|label| (row, label)))
            .collect();
        if labels.is_empty() {
            debug!("No valid heads in column {}; descending", col);
            return self.parse_range(slice, layout, depth + 1, context);
        }

        let caps: Vec<(usize, String)> = labels
            .iter()
            .filter(|(_, label)| is_mostly_caps(label, self.config.caps_ratio))
            .cloned()
            .collect();
        if !caps.is_empty() {
            labels = caps;
        }

        let spans = pair_spans(&labels, slice.end());
        let mut consumed = slice.start();

        for span in &spans {
            if span.open < consumed {
                debug!(
                    "Skipped {} at row {} (consumed to {}); must be nested",
                    span.label, span.open, consumed
                );
                continue;
            }
            if span.open > consumed {
                // Rows passed over because this span opened later re-parse at
                // the same depth.
                self.parse_range(slice.sub(consumed, span.open), layout, depth, context)?;
            }

            let path = path_with(context, &span.label);
            match span.close {
                Some(close_row) => {
                    self.parse_range(slice.sub(span.open + 1, close_row), layout, depth, &path)?;
                    if let Some(amount) = slice.number(close_row, layout.value_col()) {
                        self.emit(path, amount);
                    }
                    consumed = close_row + 1;
                }
                None if is_mostly_caps(&span.label, self.config.caps_ratio) => {
                    self.parse_range(slice.sub(span.open + 1, span.end), layout, depth, &path)?;
                    consumed = span.end;
                }
                None => {
                    let own_amount = slice.number(span.open, layout.value_col());
                    if let Some(amount) = own_amount {
                        self.emit(path.clone(), amount);
                    }
                    let remainder = slice.sub(span.open + 1, span.end);
                    if !remainder.is_empty() {
                        match self.net_region(remainder, layout, depth, own_amount) {
                            Some(net_row) => self.resolve_net(
                                remainder,
                                net_row,
                                layout,
                                depth,
                                context,
                                Some(&span.label),
                            )?,
                            None => self.parse_range(remainder, layout, depth, &path)?,
                        }
                    }
                    consumed = span.end;
                }
            }
        }

        if consumed < slice.end() && depth + 1 < layout.name_cols.len() {
            // Inner tables with no group label left at this depth.
            self.parse_range(slice.sub(consumed, slice.end()), layout, depth + 1, context)?;
        }
        Ok(())
    }

    /// Decides whether an ordinary label's remainder is a net-aggregate
    /// region, returning the net row when it is.
    fn net_region(
        &self,
        remainder: SheetSlice<'_>,
        layout: &ColumnLayout,
        depth: usize,
        own_amount: Option<f64>,
    ) -> Option<usize> {
        let marker = layout.marker_col()?;
        let net_row = Self::find_net_row(remainder, marker)?;

        // No labels in the inner name columns: nothing but components here.
        let inner_cols: Vec<usize> = layout.name_cols[depth + 1..]
            .iter()
            .copied()
            .filter(|&c| c != marker)
            .collect();
        let has_inner_labels = remainder.rows().any(|row| {
            row != net_row
                && inner_cols
                    .iter()
                    .any(|&c| self.label_at(remainder, row, c).is_some())
        });
        if !has_inner_labels {
            return Some(net_row);
        }

        // The label carried no amount of its own and the components add up to
        // the stated net: still an aggregate.
        if own_amount.is_none() {
            let sum = Self::component_sum(remainder, net_row, layout);
            let net_amount = remainder.number(net_row, layout.value_col()).unwrap_or(0.0);
            if (net_amount - sum).abs() <= self.config.net_tolerance {
                return Some(net_row);
            }
        }

        None
    }

    /// Emits the aggregate for a net-marked region, confirming through the
    /// policy when the stated amount disagrees with its components, then
    /// continues past the net row.
    fn resolve_net(
        &mut self,
        region: SheetSlice<'_>,
        net_row: usize,
        layout: &ColumnLayout,
        depth: usize,
        context: &[String],
        region_label: Option<&str>,
    ) -> Result<()> {
        let component_sum = Self::component_sum(region, net_row, layout);
        let net_amount = region.number(net_row, layout.value_col()).unwrap_or(0.0);

        let mut path = context.to_vec();
        if let Some(label) = region_label {
            if context.last().map(|l| sanitize_key(l)) != Some(sanitize_key(label)) {
                path.push(label.to_string());
            }
        }

        if (net_amount - component_sum).abs() > self.config.net_tolerance {
            warn!(
                "Net row {} states {:.2} but components sum to {:.2} at {:?}",
                net_row, net_amount, component_sum, path
            );
            let mismatch = NetMismatch {
                context: &path,
                row: net_row,
                net_amount,
                component_sum,
            };
            match self.policy.confirm(&mismatch) {
                NetDecision::Accept => self.emit(path.clone(), net_amount),
                NetDecision::Decline => {
                    return Err(BudgetError::NetMismatchDeclined {
                        context: path,
                        net_amount,
                        component_sum,
                    })
                }
            }
        } else {
            // Components are covered by the aggregate; they are dropped, not
            // separately emitted.
            self.emit(path.clone(), net_amount);
        }

        let after = region.sub(net_row + 1, region.end());
        if !after.is_empty() {
            self.parse_range(after, layout, depth, &path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Cell, Sheet};
    use std::cell::RefCell;

    /// Builds a sheet with three name columns (0..3) and twelve amount
    /// columns (3..15); each input row is (col0, col1, col2, amount-in-col-14).
    fn sheet_from(rows: &[(&str, &str, &str, Option<f64>)]) -> Sheet {
        let grid = rows
            .iter()
            .map(|(c0, c1, c2, amount)| {
                let mut row: Vec<Cell> = Vec::new();
                for text in [c0, c1, c2] {
                    row.push(if text.is_empty() {
                        Cell::Empty
                    } else {
                        (*text).into()
                    });
                }
                for _ in 0..11 {
                    row.push(Cell::Empty);
                }
                row.push(amount.map(Cell::Number).unwrap_or(Cell::Empty));
                row
            })
            .collect();
        Sheet::from_rows(grid)
    }

    fn layout3() -> ColumnLayout {
        ColumnLayout {
            name_cols: vec![0, 1, 2],
            amount_cols: (3..15).collect(),
        }
    }

    fn layout2() -> ColumnLayout {
        ColumnLayout {
            name_cols: vec![0, 1],
            amount_cols: (3..15).collect(),
        }
    }

    fn parse(
        sheet: &Sheet,
        layout: &ColumnLayout,
        policy: &dyn NetRowPolicy,
    ) -> Result<Vec<BudgetHead>> {
        let config = ParseConfig::default();
        let mut parser = HierarchyParser::new(&config, policy);
        parser.parse_section(sheet.full_slice(), layout)?;
        Ok(parser.into_heads())
    }

    #[test]
    fn test_normalize_head() {
        assert_eq!(normalize_head("ABC"), "ABC");
        assert_eq!(normalize_head("  ABC"), "ABC");
        assert_eq!(normalize_head("Total - ABC"), "Total - ABC");
        assert_eq!(normalize_head("Total-ABC"), "Total - ABC");
        assert_eq!(normalize_head("Total -ABC"), "Total - ABC");
    }

    #[test]
    fn test_is_mostly_caps() {
        assert!(is_mostly_caps("REVENUE SECTION", 0.8));
        assert!(!is_mostly_caps("Revenue Section", 0.8));
        assert!(!is_mostly_caps("A", 0.8));
        assert!(is_mostly_caps("REVENUE (a)", 0.8));
        // Exactly at the ratio does not qualify.
        assert!(!is_mostly_caps("CAPITAL (Net)", 0.8));
    }

    #[test]
    fn test_open_close_pair_emits_interior_and_aggregate() {
        let sheet = sheet_from(&[
            ("Urban Development", "", "", None),
            ("", "Housing", "", Some(60.0)),
            ("", "Roads", "", Some(40.0)),
            ("Total - Urban Development", "", "", Some(100.0)),
        ]);
        let heads = parse(&sheet, &layout2(), &AcceptNet).unwrap();

        let paths: Vec<Vec<String>> = heads.iter().map(|h| h.path.clone()).collect();
        assert!(paths.contains(&vec!["Urban Development".into(), "Housing".into()]));
        assert!(paths.contains(&vec!["Urban Development".into(), "Roads".into()]));

        let aggregate = heads
            .iter()
            .find(|h| h.path == vec!["Urban Development".to_string()])
            .unwrap();
        assert_eq!(aggregate.amount, 100.0);
    }

    #[test]
    fn test_caps_labels_take_precedence() {
        let sheet = sheet_from(&[
            ("ESTABLISHMENT", "", "", None),
            ("", "Salaries", "", Some(25.0)),
            ("stray footnote", "", "", None),
            ("", "Wages", "", Some(10.0)),
        ]);
        let heads = parse(&sheet, &layout2(), &AcceptNet).unwrap();

        // Every path sits under the capitalized group, not the footnote.
        assert!(!heads.is_empty());
        for head in &heads {
            assert_eq!(head.path[0], "ESTABLISHMENT");
        }
        assert!(heads
            .iter()
            .any(|h| h.path == vec!["ESTABLISHMENT".to_string(), "Salaries".to_string()]));
    }

    #[test]
    fn test_net_row_collapses_components() {
        let sheet = sheet_from(&[
            ("Scheme X", "", "", None),
            ("", "Gross", "", Some(100.0)),
            ("", "Recoveries", "", Some(50.0)),
            ("", "Net", "", Some(150.0)),
        ]);
        let heads = parse(&sheet, &layout2(), &AcceptNet).unwrap();

        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].path, vec!["Scheme X".to_string()]);
        assert_eq!(heads[0].amount, 150.0);
    }

    struct RecordingPolicy {
        decision: NetDecision,
        discrepancies: RefCell<Vec<f64>>,
    }

    impl NetRowPolicy for RecordingPolicy {
        fn confirm(&self, mismatch: &NetMismatch<'_>) -> NetDecision {
            self.discrepancies.borrow_mut().push(mismatch.discrepancy());
            self.decision
        }
    }

    #[test]
    fn test_net_mismatch_accepted() {
        let sheet = sheet_from(&[
            ("Scheme X", "", "", None),
            ("", "Gross", "", Some(100.0)),
            ("", "Recoveries", "", Some(50.0)),
            ("", "Net", "", Some(200.0)),
        ]);
        let policy = RecordingPolicy {
            decision: NetDecision::Accept,
            discrepancies: RefCell::new(Vec::new()),
        };
        let heads = parse(&sheet, &layout2(), &policy).unwrap();

        assert_eq!(policy.discrepancies.borrow().as_slice(), &[50.0]);
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].amount, 200.0);
    }

    #[test]
    fn test_net_mismatch_declined_aborts() {
        let sheet = sheet_from(&[
            ("Scheme X", "", "", None),
            ("", "Gross", "", Some(100.0)),
            ("", "Recoveries", "", Some(50.0)),
            ("", "Net", "", Some(200.0)),
        ]);
        let err = parse(&sheet, &layout2(), &DeclineNet).unwrap_err();
        assert!(matches!(err, BudgetError::NetMismatchDeclined { .. }));
    }

    #[test]
    fn test_rows_after_net_continue_parsing() {
        let sheet = sheet_from(&[
            ("Scheme X", "", "", None),
            ("", "Gross", "", Some(100.0)),
            ("", "Net", "", Some(100.0)),
            ("", "Follow-up Grant", "", Some(30.0)),
        ]);
        let heads = parse(&sheet, &layout2(), &AcceptNet).unwrap();

        assert!(heads
            .iter()
            .any(|h| h.path == vec!["Scheme X".to_string()] && h.amount == 100.0));
        assert!(heads.iter().any(|h| h.path
            == vec!["Scheme X".to_string(), "Follow-up Grant".to_string()]
            && h.amount == 30.0));
    }

    #[test]
    fn test_small_amounts_filtered() {
        let sheet = sheet_from(&[
            ("", "Rounding Dust", "", Some(0.05)),
            ("", "Real Item", "", Some(5.0)),
        ]);
        let heads = parse(&sheet, &layout2(), &AcceptNet).unwrap();
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].path, vec!["Real Item".to_string()]);
    }

    #[test]
    fn test_gap_before_first_label_reparsed() {
        let sheet = sheet_from(&[
            ("", "Orphan Row", "", Some(12.0)),
            ("Dept A", "", "", None),
            ("", "Child", "", Some(8.0)),
            ("Total - Dept A", "", "", Some(8.0)),
        ]);
        let heads = parse(&sheet, &layout2(), &AcceptNet).unwrap();

        assert!(heads
            .iter()
            .any(|h| h.path == vec!["Orphan Row".to_string()] && h.amount == 12.0));
        assert!(heads
            .iter()
            .any(|h| h.path == vec!["Dept A".to_string(), "Child".to_string()]));
    }

    #[test]
    fn test_ordinary_label_own_amount_and_children() {
        let sheet = sheet_from(&[
            ("Dept B", "", "", Some(50.0)),
            ("", "Sub One", "", Some(30.0)),
            ("", "Sub Two", "", Some(20.0)),
        ]);
        let heads = parse(&sheet, &layout2(), &AcceptNet).unwrap();

        assert!(heads
            .iter()
            .any(|h| h.path == vec!["Dept B".to_string()] && h.amount == 50.0));
        assert!(heads
            .iter()
            .any(|h| h.path == vec!["Dept B".to_string(), "Sub One".to_string()]));
        assert!(heads
            .iter()
            .any(|h| h.path == vec!["Dept B".to_string(), "Sub Two".to_string()]));
    }

    #[test]
    fn test_three_level_nesting() {
        let sheet = sheet_from(&[
            ("A. Revenue Expenditure", "", "", None),
            ("", "GENERAL SERVICES", "", None),
            ("", "", "Police", Some(40.0)),
            ("", "", "Courts", Some(25.0)),
        ]);
        let heads = parse(&sheet, &layout3(), &AcceptNet).unwrap();

        assert!(heads.iter().any(|h| h.path
            == vec![
                "A. Revenue Expenditure".to_string(),
                "GENERAL SERVICES".to_string(),
                "Police".to_string()
            ]
            && h.amount == 40.0));
        assert_eq!(heads.len(), 2);
    }
}
