use thiserror::Error;

#[derive(Error, Debug)]
pub enum BudgetError {
    #[error("Structural parse failure: {0}")]
    Structure(String),

    #[error("Expected {expected} amount columns, found {found}")]
    AmountColumnCount { expected: usize, found: usize },

    #[error("Net row mismatch declined at {context:?}: net {net_amount} vs components {component_sum}")]
    NetMismatchDeclined {
        context: Vec<String>,
        net_amount: f64,
        component_sum: f64,
    },

    #[error("Invalid sheet header: {0}")]
    InvalidHeader(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BudgetError {
    /// Structural failures are recoverable at the batch level: the offending
    /// sheet is skipped and the rest of the workbook still parses.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            BudgetError::Structure(_)
                | BudgetError::AmountColumnCount { .. }
                | BudgetError::InvalidHeader(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BudgetError>;
