//! Resolution Payout
//!
//! Declares a market's winning outcome and credits every holder of that
//! outcome one unit of currency per share, inside a single store
//! transaction. A market can never end up RESOLVED with only part of its
//! payouts applied: any failure rolls back the status flip too.

use chrono::Utc;
use rusqlite::Transaction;
use tracing::info;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::ledger::position::SHARE_DUST;
use crate::ledger::store::{self, LedgerStore};
use crate::models::{LedgerEntry, LedgerEntryKind, MarketStatus, UserRole};

/// What a completed resolution paid out.
#[derive(Debug, Clone)]
pub struct ResolutionSummary {
    pub market_id: Uuid,
    pub winning_outcome_id: Uuid,
    pub holders_paid: usize,
    pub total_paid: f64,
}

#[derive(Clone)]
pub struct ResolutionEngine {
    store: LedgerStore,
}

impl ResolutionEngine {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Resolve a market to `winning_outcome_id` and pay holders.
    ///
    /// Admin-only; the role check happens here at the boundary, not
    /// inside the settlement logic. Winning positions are credited
    /// exactly `shares` cash (1:1 per share, not shares * probability).
    /// Losing positions are left untouched; their value is implicitly
    /// zero and no write-off entry is created.
    pub async fn resolve_market(
        &self,
        market_id: Uuid,
        winning_outcome_id: Uuid,
        caller: UserRole,
    ) -> Result<ResolutionSummary> {
        if !caller.is_admin() {
            return Err(LedgerError::Unauthorized);
        }

        let summary = self
            .store
            .with_txn(|tx| resolve_in_txn(tx, market_id, winning_outcome_id))
            .await?;

        info!(
            "Market {} resolved to outcome {}: paid {} holder(s) {:.2} total",
            summary.market_id,
            summary.winning_outcome_id,
            summary.holders_paid,
            summary.total_paid
        );
        Ok(summary)
    }
}

fn resolve_in_txn(
    tx: &Transaction<'_>,
    market_id: Uuid,
    winning_outcome_id: Uuid,
) -> Result<ResolutionSummary> {
    let now = Utc::now();

    let mut market = store::get_market(tx, market_id)?;
    match market.status {
        MarketStatus::Resolved => return Err(LedgerError::AlreadyResolved),
        MarketStatus::Cancelled => return Err(LedgerError::MarketNotActive),
        MarketStatus::Active | MarketStatus::Closed => {}
    }

    let outcome = store::get_outcome(tx, winning_outcome_id)?;
    if outcome.market_id != market.id {
        return Err(LedgerError::not_found("outcome", winning_outcome_id));
    }

    market.status = MarketStatus::Resolved;
    market.resolution = Some(winning_outcome_id);
    market.resolved_at = Some(now);
    store::update_market(tx, &market, now)?;

    let mut holders_paid = 0usize;
    let mut total_paid = 0.0f64;
    for pos in store::list_positions_for_outcome(tx, market_id, winning_outcome_id)? {
        if pos.shares <= SHARE_DUST {
            continue;
        }
        let payout = pos.shares;

        let mut user = store::get_user(tx, pos.user_id)?;
        user.balance += payout;
        user.total_winnings += payout;
        store::update_user_funds(tx, &user, now)?;

        store::insert_ledger_entry(
            tx,
            &LedgerEntry {
                id: Uuid::new_v4(),
                ts: now,
                user_id: pos.user_id,
                kind: LedgerEntryKind::MarketPayout,
                amount: payout,
                market_id: Some(market_id),
                note: None,
            },
        )?;

        holders_paid += 1;
        total_paid += payout;
    }

    Ok(ResolutionSummary {
        market_id,
        winning_outcome_id,
        holders_paid,
        total_paid,
    })
}
