//! Pricing
//!
//! Maps an outcome's quoted probability and a trade size to shares or
//! proceeds. The probability is the price per share: spending `amount`
//! cash at probability `p` yields `amount / p` shares, and selling
//! `shares` back at the same `p` yields `shares * p` cash.
//!
//! There is no price-impact step. A trade never moves the probability;
//! it only changes at market creation or through an admin edit.

/// Shares received for `amount` cash at probability `p`.
///
/// Caller guarantees 0 < p < 1 and amount > 0; the settlement engine
/// validates both before calling.
pub fn shares_for_amount(p: f64, amount: f64) -> f64 {
    debug_assert!(p > 0.0 && p < 1.0);
    debug_assert!(amount > 0.0);
    amount / p
}

/// Cash proceeds for selling `shares` at probability `p`.
pub fn proceeds_for_shares(p: f64, shares: f64) -> f64 {
    debug_assert!(p > 0.0 && p < 1.0);
    debug_assert!(shares > 0.0);
    shares * p
}
