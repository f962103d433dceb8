use serde::{Deserialize, Serialize};

/// Tunables for structure discovery, hierarchy parsing, and serialization.
///
/// The defaults reproduce the behavior observed in the source documents; they
/// are fields rather than constants because the thresholds are heuristic and
/// vary with document vintage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseConfig {
    /// Ratio of uppercase-to-total letters above which a label is treated as
    /// a structural group header.
    pub caps_ratio: f64,
    /// Maximum difference (in crore) between a net row's stated amount and
    /// the sum of its component rows before external confirmation is needed.
    pub net_tolerance: f64,
    /// Leaves with |amount| at or below this (in crore) are dropped as
    /// rounding noise.
    pub min_leaf_amount: f64,
    /// A synthetic "Unallocated" child is materialized in edge output when
    /// unallocated / declared total exceeds this fraction.
    pub unallocated_threshold: f64,
    /// The human-readable tree rendering shows the unallocated line only
    /// above this fraction of the declared total.
    pub unallocated_display_threshold: f64,
    /// Number of numeric measure columns a demand sheet must carry.
    pub amount_column_count: usize,
    /// Fixed INR-per-USD conversion rate used for edge output.
    pub usd_to_inr: f64,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            caps_ratio: 0.8,
            net_tolerance: 1.0,
            min_leaf_amount: 0.1,
            unallocated_threshold: 0.02,
            unallocated_display_threshold: 0.01,
            amount_column_count: 12,
            usd_to_inr: 85.0,
        }
    }
}
