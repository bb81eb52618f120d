//! Position Accounting
//!
//! Per (user, market, outcome) aggregate of shares held, cash invested and
//! average entry price. These functions are pure; they run only inside a
//! settlement transaction, which persists or deletes the returned row.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::models::Position;

/// Share quantities within this tolerance of zero are dust: a position
/// whose remaining shares fall inside it is deleted rather than kept at
/// zero, and a sell may exceed the held shares by at most this much.
pub const SHARE_DUST: f64 = 1e-9;

/// Merge a buy into an existing position, or open a new one.
///
/// `amount` is the cash spent, `shares` the shares acquired. The average
/// price is always `invested / shares` after the merge.
pub fn apply_buy(
    existing: Option<Position>,
    user_id: Uuid,
    market_id: Uuid,
    outcome_id: Uuid,
    amount: f64,
    shares: f64,
    now: DateTime<Utc>,
) -> Position {
    match existing {
        None => Position {
            user_id,
            market_id,
            outcome_id,
            shares,
            invested: amount,
            avg_price: amount / shares,
            updated_at: now,
        },
        Some(mut pos) => {
            pos.shares += shares;
            pos.invested += amount;
            pos.avg_price = pos.invested / pos.shares;
            pos.updated_at = now;
            pos
        }
    }
}

/// Reduce a position by a sell of `shares_to_sell` shares.
///
/// The cash basis shrinks by the sold fraction, leaving the average price
/// unchanged. Returns `None` when the sale empties the position; the
/// caller must then delete the row so "has position" stays an existence
/// check. Selling more than held fails before any mutation.
pub fn apply_sell(
    mut pos: Position,
    shares_to_sell: f64,
    now: DateTime<Utc>,
) -> Result<Option<Position>> {
    if pos.shares + SHARE_DUST < shares_to_sell {
        return Err(LedgerError::InsufficientShares {
            required: shares_to_sell,
            held: pos.shares,
        });
    }

    let sold_fraction = shares_to_sell / pos.shares;
    pos.invested -= pos.invested * sold_fraction;
    pos.shares -= shares_to_sell;
    pos.updated_at = now;

    if pos.shares <= SHARE_DUST {
        return Ok(None);
    }
    pos.avg_price = pos.invested / pos.shares;
    Ok(Some(pos))
}
