//! Monetary units and display formatting.
//!
//! Amounts flow through the crate in crore (1 crore = 10^7 INR), the unit the
//! source documents use. Formatting picks the closest Indian-system unit for
//! INR and the closest western unit for USD.

pub const INR_ONE_LAKH: f64 = 100_000.0;
pub const INR_ONE_CRORE: f64 = 100.0 * INR_ONE_LAKH;

/// Default conversion rate; edge output takes the configured rate instead.
pub const USD_TO_INR: f64 = 85.0;

/// Renders a crore amount as lakh, crore, or lakh-crore depending on size.
pub fn format_inr(crore: f64) -> String {
    let inr = crore * INR_ONE_CRORE;

    if inr < INR_ONE_CRORE {
        format!("₹ {:.1}L", inr / INR_ONE_LAKH)
    } else if inr < INR_ONE_CRORE * INR_ONE_LAKH {
        format!("₹ {:.1}Cr", inr / INR_ONE_CRORE)
    } else {
        format!("₹ {:.1}LCr", inr / (INR_ONE_CRORE * INR_ONE_LAKH))
    }
}

/// Renders a crore amount in USD at the given rate.
pub fn format_usd(crore: f64, usd_to_inr: f64) -> String {
    let usd = crore * INR_ONE_CRORE / usd_to_inr;

    if usd < 1e6 {
        format!("${:.1}", usd)
    } else if usd < 1e9 {
        format!("${:.1}M", usd / 1e6)
    } else {
        format!("${:.1}B", usd / 1e9)
    }
}

/// "(usd, inr)" pair used by the tree's text rendering.
pub fn format_pair(crore: f64) -> String {
    format!("({}, {})", format_usd(crore, USD_TO_INR), format_inr(crore))
}
