//! Settlement Engine
//!
//! Executes a single trade as one atomic unit against the store: balance
//! check, pricing, position update, market volume update, ledger append.
//! Any failure at any step rolls back the whole unit; no partial
//! balance/position/ledger mutation is ever observable.

use chrono::Utc;
use rusqlite::Transaction;
use tracing::info;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::ledger::position;
use crate::ledger::pricing;
use crate::ledger::store::{self, LedgerStore};
use crate::models::{Bet, BetSide, LedgerEntry, LedgerEntryKind, MarketStatus, PositionView};

/// A single buy or sell order against one outcome.
///
/// For a BUY `quantity` is the cash amount to spend; for a SELL it is the
/// number of shares to sell back at the current probability.
#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub user_id: Uuid,
    pub market_id: Uuid,
    pub outcome_id: Uuid,
    pub quantity: f64,
    pub side: BetSide,
}

#[derive(Clone)]
pub struct SettlementEngine {
    store: LedgerStore,
}

impl SettlementEngine {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Place a bet and return the immutable record of the executed trade.
    ///
    /// User balance, market and outcome state are re-read inside the
    /// transaction, so two concurrent calls can never both settle against
    /// a stale balance or probability.
    pub async fn place_bet(&self, req: &TradeRequest) -> Result<Bet> {
        if !(req.quantity.is_finite() && req.quantity > 0.0) {
            return Err(LedgerError::InvalidRequest(
                "quantity must be a positive number".to_string(),
            ));
        }

        let bet = self.store.with_txn(|tx| execute_trade(tx, req)).await?;

        info!(
            "Trade settled for user {}: {} {:.4} shares at {:.4} ({:.2} cash)",
            bet.user_id,
            bet.side.as_str(),
            bet.shares,
            bet.price,
            bet.amount
        );
        Ok(bet)
    }

    /// Current holdings for a user, marked to each outcome's probability.
    ///
    /// `current_value = shares * probability`, `pnl = current_value -
    /// invested`. Pass a market id to restrict to one market.
    pub async fn get_positions(
        &self,
        user_id: Uuid,
        market_id: Option<Uuid>,
    ) -> Result<Vec<PositionView>> {
        self.store
            .with_txn(|tx| {
                let positions = store::list_positions_for_user(tx, user_id, market_id)?;
                positions
                    .into_iter()
                    .map(|pos| {
                        let outcome = store::get_outcome(tx, pos.outcome_id)?;
                        let current_value = pos.shares * outcome.probability;
                        Ok(PositionView {
                            market_id: pos.market_id,
                            outcome_id: pos.outcome_id,
                            outcome_name: outcome.name,
                            shares: pos.shares,
                            invested: pos.invested,
                            avg_price: pos.avg_price,
                            probability: outcome.probability,
                            current_value,
                            pnl: current_value - pos.invested,
                        })
                    })
                    .collect()
            })
            .await
    }
}

/// The trade itself, inside the caller's transaction.
///
/// All reads happen here so the preconditions hold against current row
/// state, not whatever the caller saw before the lock was taken.
pub(crate) fn execute_trade(tx: &Transaction<'_>, req: &TradeRequest) -> Result<Bet> {
    let now = Utc::now();

    let mut user = store::get_user(tx, req.user_id)?;
    let mut market = store::get_market(tx, req.market_id)?;
    let outcome = store::get_outcome(tx, req.outcome_id)?;
    if outcome.market_id != market.id {
        return Err(LedgerError::not_found("outcome", req.outcome_id));
    }
    if market.status != MarketStatus::Active {
        return Err(LedgerError::MarketNotActive);
    }

    let price = outcome.probability;
    let existing = store::get_position(tx, req.user_id, req.market_id, req.outcome_id)?;

    let (amount, shares) = match req.side {
        BetSide::Buy => {
            let amount = req.quantity;
            if user.balance < amount {
                return Err(LedgerError::InsufficientBalance {
                    required: amount,
                    available: user.balance,
                });
            }
            (amount, pricing::shares_for_amount(price, amount))
        }
        BetSide::Sell => {
            let shares = req.quantity;
            let held = existing.as_ref().map(|pos| pos.shares).unwrap_or(0.0);
            if held + position::SHARE_DUST < shares {
                return Err(LedgerError::InsufficientShares {
                    required: shares,
                    held,
                });
            }
            (pricing::proceeds_for_shares(price, shares), shares)
        }
    };

    let bet = Bet {
        id: Uuid::new_v4(),
        user_id: req.user_id,
        market_id: req.market_id,
        outcome_id: req.outcome_id,
        side: req.side,
        amount,
        shares,
        price,
        created_at: now,
    };
    store::insert_bet(tx, &bet)?;

    match req.side {
        BetSide::Buy => {
            let pos = position::apply_buy(
                existing,
                req.user_id,
                req.market_id,
                req.outcome_id,
                amount,
                shares,
                now,
            );
            store::upsert_position(tx, &pos)?;
            user.balance -= amount;
            user.total_invested += amount;
        }
        BetSide::Sell => {
            // the guard above ensures a position exists
            let held = existing.ok_or(LedgerError::InsufficientShares {
                required: shares,
                held: 0.0,
            })?;
            match position::apply_sell(held, shares, now)? {
                Some(pos) => store::upsert_position(tx, &pos)?,
                None => store::delete_position(tx, req.user_id, req.market_id, req.outcome_id)?,
            }
            user.balance += amount;
        }
    }
    store::update_user_funds(tx, &user, now)?;

    market.volume += amount;
    store::update_market(tx, &market, now)?;

    let kind = match req.side {
        BetSide::Buy => LedgerEntryKind::BetPlaced,
        BetSide::Sell => LedgerEntryKind::BetSold,
    };
    store::insert_ledger_entry(
        tx,
        &LedgerEntry {
            id: Uuid::new_v4(),
            ts: now,
            user_id: req.user_id,
            kind,
            amount,
            market_id: Some(req.market_id),
            note: None,
        },
    )?;

    Ok(bet)
}
