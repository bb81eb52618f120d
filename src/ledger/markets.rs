//! Market Lifecycle
//!
//! Creation, close/cancel transitions and manual probability edits.
//! Status moves one way only: ACTIVE -> CLOSED -> RESOLVED, with
//! CANCELLED reachable from ACTIVE or CLOSED. The settlement and
//! resolution engines only ever read markets created here.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::ledger::store::{self, LedgerStore};
use crate::models::{Market, MarketDetail, MarketStatus, Outcome, UserRole};

#[derive(Clone)]
pub struct MarketService {
    store: LedgerStore,
}

impl MarketService {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Create an ACTIVE market with its outcomes.
    ///
    /// At least two outcomes with distinct names; every probability must
    /// lie in (0, 1). Probabilities need not sum to 1 — they are quotes,
    /// not a normalized distribution.
    pub async fn create_market(
        &self,
        question: &str,
        outcomes: &[(&str, f64)],
        created_by: Uuid,
    ) -> Result<MarketDetail> {
        let question = question.trim();
        if question.is_empty() {
            return Err(LedgerError::InvalidRequest("question required".to_string()));
        }
        if outcomes.len() < 2 {
            return Err(LedgerError::InvalidRequest(
                "a market needs at least two outcomes".to_string(),
            ));
        }
        for (name, probability) in outcomes {
            if name.trim().is_empty() {
                return Err(LedgerError::InvalidRequest("outcome name required".to_string()));
            }
            if !(probability.is_finite() && *probability > 0.0 && *probability < 1.0) {
                return Err(LedgerError::InvalidRequest(format!(
                    "probability for {name} must be in (0, 1)"
                )));
            }
        }
        let mut names: Vec<&str> = outcomes.iter().map(|(name, _)| name.trim()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != outcomes.len() {
            return Err(LedgerError::InvalidRequest(
                "outcome names must be unique".to_string(),
            ));
        }

        let now = Utc::now();
        let market = Market {
            id: Uuid::new_v4(),
            question: question.to_string(),
            status: MarketStatus::Active,
            volume: 0.0,
            resolution: None,
            created_by,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };
        let outcome_rows: Vec<Outcome> = outcomes
            .iter()
            .map(|(name, probability)| Outcome {
                id: Uuid::new_v4(),
                market_id: market.id,
                name: name.trim().to_string(),
                probability: *probability,
            })
            .collect();

        let detail = self
            .store
            .with_txn(|tx| {
                // creator must exist; role is recorded, not gated
                store::get_user(tx, created_by)?;
                store::insert_market(tx, &market)?;
                for outcome in &outcome_rows {
                    store::insert_outcome(tx, outcome)?;
                }
                Ok(MarketDetail {
                    market: market.clone(),
                    outcomes: outcome_rows.clone(),
                })
            })
            .await?;

        info!(
            "Market {} created with {} outcomes: {}",
            detail.market.id,
            detail.outcomes.len(),
            detail.market.question
        );
        Ok(detail)
    }

    pub async fn get_market(&self, market_id: Uuid) -> Result<MarketDetail> {
        self.store
            .with_txn(|tx| {
                let market = store::get_market(tx, market_id)?;
                let outcomes = store::list_outcomes(tx, market_id)?;
                Ok(MarketDetail { market, outcomes })
            })
            .await
    }

    /// ACTIVE -> CLOSED. Closed markets reject trades but can still be
    /// resolved.
    pub async fn close_market(&self, market_id: Uuid, caller: UserRole) -> Result<Market> {
        if !caller.is_admin() {
            return Err(LedgerError::Unauthorized);
        }
        self.store
            .with_txn(|tx| {
                let mut market = store::get_market(tx, market_id)?;
                if market.status != MarketStatus::Active {
                    return Err(LedgerError::MarketNotActive);
                }
                market.status = MarketStatus::Closed;
                store::update_market(tx, &market, Utc::now())?;
                Ok(market)
            })
            .await
    }

    /// ACTIVE or CLOSED -> CANCELLED. Terminal; no payouts are made.
    pub async fn cancel_market(&self, market_id: Uuid, caller: UserRole) -> Result<Market> {
        if !caller.is_admin() {
            return Err(LedgerError::Unauthorized);
        }
        self.store
            .with_txn(|tx| {
                let mut market = store::get_market(tx, market_id)?;
                match market.status {
                    MarketStatus::Resolved => return Err(LedgerError::AlreadyResolved),
                    MarketStatus::Cancelled => return Err(LedgerError::MarketNotActive),
                    MarketStatus::Active | MarketStatus::Closed => {}
                }
                market.status = MarketStatus::Cancelled;
                store::update_market(tx, &market, Utc::now())?;
                Ok(market)
            })
            .await
    }

    /// Manual probability edit — the only way a price ever moves.
    pub async fn set_probability(
        &self,
        outcome_id: Uuid,
        probability: f64,
        caller: UserRole,
    ) -> Result<Outcome> {
        if !caller.is_admin() {
            return Err(LedgerError::Unauthorized);
        }
        if !(probability.is_finite() && probability > 0.0 && probability < 1.0) {
            return Err(LedgerError::InvalidRequest(
                "probability must be in (0, 1)".to_string(),
            ));
        }
        self.store
            .with_txn(|tx| {
                let mut outcome = store::get_outcome(tx, outcome_id)?;
                let market = store::get_market(tx, outcome.market_id)?;
                if market.status.is_terminal() {
                    return Err(LedgerError::MarketNotActive);
                }
                store::update_outcome_probability(tx, outcome_id, probability)?;
                outcome.probability = probability;
                Ok(outcome)
            })
            .await
    }
}
