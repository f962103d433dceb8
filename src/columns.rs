//! Splits a section's columns into hierarchy-label columns and numeric
//! measure columns by how numeric each column's populated cells are.

use log::debug;

use crate::config::ParseConfig;
use crate::error::{BudgetError, Result};
use crate::grid::SheetSlice;

/// Column split for one sheet region. `name_cols` run outer→inner; the last
/// one doubles as the Gross/Recoveries/Net marker column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    pub name_cols: Vec<usize>,
    pub amount_cols: Vec<usize>,
}

impl ColumnLayout {
    /// The measure read for every emitted leaf: the current-year total, which
    /// the source layout keeps as the last amount column.
    pub fn value_col(&self) -> usize {
        *self.amount_cols.last().expect("amount columns are never empty")
    }

    /// The innermost name column, where net-aggregate markers live.
    pub fn marker_col(&self) -> Option<usize> {
        self.name_cols.last().copied()
    }
}

/// Classifies the columns of `slice`: the `amount_column_count` most-numeric
/// columns (re-sorted into sheet order) are amounts, and every populated
/// column left of the first amount column is a name column.
pub fn classify_columns(slice: SheetSlice<'_>, config: &ParseConfig) -> Result<ColumnLayout> {
    let mut stats: Vec<(usize, f64, usize)> = Vec::new();

    for col in 0..slice.num_cols() {
        let mut non_empty = 0usize;
        let mut numeric = 0usize;
        for row in slice.rows() {
            let cell = slice.cell(row, col);
            if !cell.is_empty() {
                non_empty += 1;
                if cell.as_number().is_some() {
                    numeric += 1;
                }
            }
        }
        let fraction = if non_empty > 0 {
            numeric as f64 / non_empty as f64
        } else {
            0.0
        };
        stats.push((col, fraction, non_empty));
    }

    let mut ranked = stats.clone();
    // Stable sort: equal fractions keep sheet order.
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    if ranked.len() < config.amount_column_count {
        return Err(BudgetError::AmountColumnCount {
            expected: config.amount_column_count,
            found: ranked.len(),
        });
    }

    let mut amount_cols: Vec<usize> = ranked[..config.amount_column_count]
        .iter()
        .map(|&(col, _, _)| col)
        .collect();
    amount_cols.sort_unstable();

    let first_amount = amount_cols[0];
    let name_cols: Vec<usize> = stats
        .iter()
        .filter(|&&(col, _, non_empty)| col < first_amount && non_empty > 0)
        .map(|&(col, _, _)| col)
        .collect();

    debug!(
        "Classified columns: {} name, {} amount (value col {})",
        name_cols.len(),
        amount_cols.len(),
        amount_cols.last().unwrap()
    );

    Ok(ColumnLayout { name_cols, amount_cols })
}
