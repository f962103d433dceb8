//! Locates the fixed landmarks of a demand sheet: the three-line header, the
//! amount-column header row, the secondary (Gross/Recoveries/Receipts/Net)
//! header rows, and the lettered top-level sections.

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::ParseConfig;
use crate::error::{BudgetError, Result};
use crate::grid::Sheet;

static DEMAND_NO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Demand No\.").expect("demand pattern"));

const AMOUNT_HEADER_PREFIX: &str = "RevenueCapitalTotal";
const AMOUNT_HEADER_CELLS: [&str; 3] = ["Revenue", "Capital", "Total"];
const SECONDARY_HEADERS: [&str; 4] = ["Gross", "Recoveries", "Receipts", "Net"];

/// Half-open row interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RowRange {
    pub start: usize,
    pub end: usize,
}

/// One lettered top-level section, rows `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Section {
    pub name: char,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SheetStructure {
    /// Ministry, demand identifier, department.
    pub header: Vec<String>,
    /// Rows of the secondary column headers.
    #[serde(rename = "header_sec")]
    pub header_rows: RowRange,
    pub sections: Vec<Section>,
    /// Column indices of the twelve numeric measures, in sheet order.
    pub amount_cols: Vec<usize>,
}

impl SheetStructure {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn schema_as_json() -> Result<String> {
        let schema = schemars::schema_for!(SheetStructure);
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}

/// Concatenation of a row's text cells, used for anchor matching. Numeric and
/// empty cells contribute nothing.
fn row_text(sheet: &Sheet, row: usize) -> String {
    let mut joined = String::new();
    for col in 0..sheet.num_cols() {
        if let Some(text) = sheet.cell(row, col).as_text() {
            joined.push_str(text);
        }
    }
    joined.trim().to_string()
}

fn non_empty_rows(sheet: &Sheet) -> Vec<(usize, String)> {
    (0..sheet.num_rows())
        .filter_map(|row| {
            let text = row_text(sheet, row);
            (!text.is_empty()).then_some((row, text))
        })
        .collect()
}

/// Discovers a sheet's structure, or fails with a structural error the batch
/// caller turns into a skip.
pub fn locate_structure(sheet: &Sheet, config: &ParseConfig) -> Result<SheetStructure> {
    let rows = non_empty_rows(sheet);

    let (_, demand_line) = rows
        .iter()
        .find(|(_, text)| DEMAND_NO_RE.is_match(text))
        .ok_or_else(|| BudgetError::Structure("no \"Demand No.\" anchor".to_string()))?;
    let header: Vec<String> = demand_line.split('\n').map(|l| l.to_string()).collect();

    let budget_pos = rows
        .iter()
        .position(|(_, text)| text.contains("Budget Estimates"))
        .ok_or_else(|| BudgetError::Structure("no \"Budget Estimates\" anchor".to_string()))?;

    let amount_pos = rows
        .iter()
        .position(|(_, text)| text.starts_with(AMOUNT_HEADER_PREFIX))
        .ok_or_else(|| BudgetError::Structure("no amount header row".to_string()))?;
    if amount_pos <= budget_pos {
        return Err(BudgetError::Structure(
            "amount header row precedes \"Budget Estimates\"".to_string(),
        ));
    }
    let amount_row = rows[amount_pos].0;

    let amount_cols: Vec<usize> = (0..sheet.num_cols())
        .filter(|&col| {
            sheet
                .cell(amount_row, col)
                .as_text()
                .map(|t| AMOUNT_HEADER_CELLS.contains(&t.trim()))
                .unwrap_or(false)
        })
        .collect();
    if amount_cols.len() != config.amount_column_count {
        return Err(BudgetError::AmountColumnCount {
            expected: config.amount_column_count,
            found: amount_cols.len(),
        });
    }

    let secondary = rows
        .get(amount_pos + 1..amount_pos + 1 + SECONDARY_HEADERS.len())
        .ok_or_else(|| BudgetError::Structure("truncated secondary header rows".to_string()))?;
    for ((row, text), expected) in secondary.iter().zip(SECONDARY_HEADERS) {
        if !text.contains(expected) {
            return Err(BudgetError::Structure(format!(
                "expected \"{}\" in secondary header at row {}, found \"{}\"",
                expected, row, text
            )));
        }
    }
    let header_rows = RowRange {
        start: secondary[0].0,
        end: secondary[SECONDARY_HEADERS.len() - 1].0 + 1,
    };

    info!("Discovering sections...");
    let mut sections: Vec<Section> = Vec::new();
    for letter in 'A'..='Z' {
        let marker = format!("{}. ", letter);
        let Some(&(start, _)) = rows.iter().find(|(_, text)| text.starts_with(&marker)) else {
            break;
        };
        debug!("Found section {}", letter);
        if let Some(prev) = sections.last_mut() {
            prev.end = start;
        }
        sections.push(Section {
            name: letter,
            start,
            end: usize::MAX,
        });
    }
    if let Some(last) = sections.last_mut() {
        last.end = rows.last().map(|&(row, _)| row + 1).unwrap_or(last.start);
    }
    if sections.is_empty() {
        warn!("No lettered sections found in sheet");
    }
    info!("Found {} sections", sections.len());

    Ok(SheetStructure {
        header,
        header_rows,
        sections,
        amount_cols,
    })
}
