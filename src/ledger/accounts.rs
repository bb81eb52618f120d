//! User Account Management
//!
//! Handles registration, deposits, withdrawals, admin balance adjustments
//! and the user-facing activity feed. Every balance change lands together
//! with its ledger entry in one transaction.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::ledger::store::{self, LedgerStore};
use crate::models::{LedgerEntry, LedgerEntryKind, User, UserRole};

#[derive(Clone)]
pub struct AccountService {
    store: LedgerStore,
    starting_balance: f64,
}

impl AccountService {
    pub fn new(store: LedgerStore, starting_balance: f64) -> Self {
        Self {
            store,
            starting_balance,
        }
    }

    /// Register a user, granting the configured starting balance.
    pub async fn create_user(&self, username: &str, role: UserRole) -> Result<User> {
        let username = username.trim().to_lowercase();
        if username.is_empty() {
            return Err(LedgerError::InvalidRequest("username required".to_string()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: username.clone(),
            role,
            balance: self.starting_balance,
            total_invested: 0.0,
            total_winnings: 0.0,
            created_at: now,
            updated_at: now,
        };

        let created = self
            .store
            .with_txn(|tx| {
                if store::username_exists(tx, &username)? {
                    return Err(LedgerError::InvalidRequest(format!(
                        "username already taken: {username}"
                    )));
                }
                store::insert_user(tx, &user)?;
                if user.balance > 0.0 {
                    store::insert_ledger_entry(
                        tx,
                        &LedgerEntry {
                            id: Uuid::new_v4(),
                            ts: now,
                            user_id: user.id,
                            kind: LedgerEntryKind::Deposit,
                            amount: user.balance,
                            market_id: None,
                            note: Some("starting balance".to_string()),
                        },
                    )?;
                }
                Ok(user.clone())
            })
            .await?;

        info!("User {} registered as {}", created.username, created.role.as_str());
        Ok(created)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User> {
        self.store.with_txn(|tx| store::get_user(tx, user_id)).await
    }

    /// Credit a user's balance.
    pub async fn deposit(&self, user_id: Uuid, amount: f64) -> Result<User> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(LedgerError::InvalidRequest("invalid amount".to_string()));
        }
        self.store
            .with_txn(|tx| {
                let now = Utc::now();
                let mut user = store::get_user(tx, user_id)?;
                user.balance += amount;
                store::update_user_funds(tx, &user, now)?;
                store::insert_ledger_entry(
                    tx,
                    &LedgerEntry {
                        id: Uuid::new_v4(),
                        ts: now,
                        user_id,
                        kind: LedgerEntryKind::Deposit,
                        amount,
                        market_id: None,
                        note: None,
                    },
                )?;
                Ok(user)
            })
            .await
    }

    /// Debit a user's balance. Fails with `InsufficientBalance` before
    /// any write when the balance cannot cover the amount.
    pub async fn withdraw(&self, user_id: Uuid, amount: f64) -> Result<User> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(LedgerError::InvalidRequest("invalid amount".to_string()));
        }
        self.store
            .with_txn(|tx| {
                let now = Utc::now();
                let mut user = store::get_user(tx, user_id)?;
                if user.balance < amount {
                    return Err(LedgerError::InsufficientBalance {
                        required: amount,
                        available: user.balance,
                    });
                }
                user.balance -= amount;
                store::update_user_funds(tx, &user, now)?;
                store::insert_ledger_entry(
                    tx,
                    &LedgerEntry {
                        id: Uuid::new_v4(),
                        ts: now,
                        user_id,
                        kind: LedgerEntryKind::Withdrawal,
                        amount,
                        market_id: None,
                        note: None,
                    },
                )?;
                Ok(user)
            })
            .await
    }

    /// Admin-only signed balance adjustment. The resulting balance must
    /// stay non-negative.
    pub async fn admin_adjust(
        &self,
        user_id: Uuid,
        delta: f64,
        note: Option<&str>,
        caller: UserRole,
    ) -> Result<User> {
        if !caller.is_admin() {
            return Err(LedgerError::Unauthorized);
        }
        if !(delta.is_finite() && delta != 0.0) {
            return Err(LedgerError::InvalidRequest("invalid delta".to_string()));
        }
        let adjusted = self
            .store
            .with_txn(|tx| {
                let now = Utc::now();
                let mut user = store::get_user(tx, user_id)?;
                if user.balance + delta < 0.0 {
                    return Err(LedgerError::InsufficientBalance {
                        required: -delta,
                        available: user.balance,
                    });
                }
                user.balance += delta;
                store::update_user_funds(tx, &user, now)?;
                store::insert_ledger_entry(
                    tx,
                    &LedgerEntry {
                        id: Uuid::new_v4(),
                        ts: now,
                        user_id,
                        kind: LedgerEntryKind::AdminAdjustment,
                        amount: delta,
                        market_id: None,
                        note: note.map(|s| s.to_string()),
                    },
                )?;
                Ok(user)
            })
            .await?;

        info!(
            "Balance of user {} adjusted by {:+.2} to {:.2}",
            adjusted.id, delta, adjusted.balance
        );
        Ok(adjusted)
    }

    /// A user's ledger entries, newest first.
    pub async fn list_activity(&self, user_id: Uuid, limit: usize) -> Result<Vec<LedgerEntry>> {
        self.store.list_activity(user_id, limit).await
    }
}
