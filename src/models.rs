//! Core entity types for the settlement ledger.
//!
//! Every balance-affecting mutation of these types happens inside a single
//! store transaction; the structs here are plain snapshots of row state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User roles for capability checks at the core boundary
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    #[serde(rename = "admin")]
    Admin, // May resolve/cancel markets and adjust balances
    #[serde(rename = "trader")]
    Trader, // May trade
    #[serde(rename = "viewer")]
    Viewer, // Read-only access
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Trader => "trader",
            UserRole::Viewer => "viewer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "trader" => Some(UserRole::Trader),
            "viewer" => Some(UserRole::Viewer),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

/// User account with its cash balance and lifetime totals.
///
/// `balance` never goes negative: the settlement engine pre-checks every
/// debit and the store carries a CHECK constraint behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: UserRole,
    pub balance: f64,
    pub total_invested: f64,
    pub total_winnings: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Market lifecycle states. Transitions are one-directional:
/// ACTIVE -> CLOSED -> RESOLVED, with CANCELLED reachable from ACTIVE or
/// CLOSED. RESOLVED and CANCELLED are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MarketStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "RESOLVED")]
    Resolved,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl MarketStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MarketStatus::Active => "ACTIVE",
            MarketStatus::Closed => "CLOSED",
            MarketStatus::Resolved => "RESOLVED",
            MarketStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Some(MarketStatus::Active),
            "CLOSED" => Some(MarketStatus::Closed),
            "RESOLVED" => Some(MarketStatus::Resolved),
            "CANCELLED" => Some(MarketStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MarketStatus::Resolved | MarketStatus::Cancelled)
    }
}

/// A single question with two or more outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: Uuid,
    pub question: String,
    pub status: MarketStatus,
    /// Cumulative cash traded through this market (buys and sells).
    pub volume: f64,
    /// Winning outcome id once resolved.
    pub resolution: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// One answer branch of a market, e.g. "YES" or "NO".
///
/// `probability` is the current price per share, always in (0, 1). Trades
/// never move it; it is set at creation or by an admin edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: Uuid,
    pub market_id: Uuid,
    pub name: String,
    pub probability: f64,
}

/// A market together with its outcomes, as callers usually want it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDetail {
    pub market: Market,
    pub outcomes: Vec<Outcome>,
}

/// Trade direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BetSide {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl BetSide {
    pub fn as_str(&self) -> &str {
        match self {
            BetSide::Buy => "BUY",
            BetSide::Sell => "SELL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(BetSide::Buy),
            "SELL" => Some(BetSide::Sell),
            _ => None,
        }
    }
}

/// Immutable record of one executed trade. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub market_id: Uuid,
    pub outcome_id: Uuid,
    pub side: BetSide,
    /// Cash moved by the trade (spent on a buy, received on a sell).
    pub amount: f64,
    /// Shares acquired or sold.
    pub shares: f64,
    /// Outcome probability at execution time.
    pub price: f64,
    pub created_at: DateTime<Utc>,
}

/// Per (user, market, outcome) aggregate holding.
///
/// At most one row exists per triple; the row is deleted outright when the
/// shares reach zero so "has position" stays a simple existence check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub user_id: Uuid,
    pub market_id: Uuid,
    pub outcome_id: Uuid,
    pub shares: f64,
    /// Net cash basis of the holding.
    pub invested: f64,
    pub avg_price: f64,
    pub updated_at: DateTime<Utc>,
}

/// A position marked to the outcome's current probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionView {
    pub market_id: Uuid,
    pub outcome_id: Uuid,
    pub outcome_name: String,
    pub shares: f64,
    pub invested: f64,
    pub avg_price: f64,
    pub probability: f64,
    pub current_value: f64,
    pub pnl: f64,
}

/// Kinds of balance-affecting events recorded in the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LedgerEntryKind {
    #[serde(rename = "BET_PLACED")]
    BetPlaced,
    #[serde(rename = "BET_SOLD")]
    BetSold,
    #[serde(rename = "MARKET_PAYOUT")]
    MarketPayout,
    #[serde(rename = "DEPOSIT")]
    Deposit,
    #[serde(rename = "WITHDRAWAL")]
    Withdrawal,
    #[serde(rename = "ADMIN_ADJUSTMENT")]
    AdminAdjustment,
}

impl LedgerEntryKind {
    pub fn as_str(&self) -> &str {
        match self {
            LedgerEntryKind::BetPlaced => "BET_PLACED",
            LedgerEntryKind::BetSold => "BET_SOLD",
            LedgerEntryKind::MarketPayout => "MARKET_PAYOUT",
            LedgerEntryKind::Deposit => "DEPOSIT",
            LedgerEntryKind::Withdrawal => "WITHDRAWAL",
            LedgerEntryKind::AdminAdjustment => "ADMIN_ADJUSTMENT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BET_PLACED" => Some(LedgerEntryKind::BetPlaced),
            "BET_SOLD" => Some(LedgerEntryKind::BetSold),
            "MARKET_PAYOUT" => Some(LedgerEntryKind::MarketPayout),
            "DEPOSIT" => Some(LedgerEntryKind::Deposit),
            "WITHDRAWAL" => Some(LedgerEntryKind::Withdrawal),
            "ADMIN_ADJUSTMENT" => Some(LedgerEntryKind::AdminAdjustment),
            _ => None,
        }
    }
}

/// Append-only audit record of a balance-affecting event.
///
/// `amount` is the positive cash magnitude except for ADMIN_ADJUSTMENT,
/// which carries the signed delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub user_id: Uuid,
    pub kind: LedgerEntryKind,
    pub amount: f64,
    pub market_id: Option<Uuid>,
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_role_serialization() {
        let admin = UserRole::Admin;
        let json = serde_json::to_string(&admin).unwrap();
        assert_eq!(json, r#""admin""#);

        let trader: UserRole = serde_json::from_str(r#""trader""#).unwrap();
        assert_eq!(trader, UserRole::Trader);
    }

    #[test]
    fn test_market_status_string_conversion() {
        assert_eq!(MarketStatus::Active.as_str(), "ACTIVE");
        assert_eq!(MarketStatus::from_str("resolved"), Some(MarketStatus::Resolved));
        assert_eq!(MarketStatus::from_str("bogus"), None);

        assert!(MarketStatus::Resolved.is_terminal());
        assert!(MarketStatus::Cancelled.is_terminal());
        assert!(!MarketStatus::Active.is_terminal());
        assert!(!MarketStatus::Closed.is_terminal());
    }

    #[test]
    fn test_bet_side_string_conversion() {
        assert_eq!(BetSide::Buy.as_str(), "BUY");
        assert_eq!(BetSide::from_str("sell"), Some(BetSide::Sell));
        assert_eq!(BetSide::from_str(""), None);
    }

    #[test]
    fn test_ledger_entry_kind_round_trip() {
        for kind in [
            LedgerEntryKind::BetPlaced,
            LedgerEntryKind::BetSold,
            LedgerEntryKind::MarketPayout,
            LedgerEntryKind::Deposit,
            LedgerEntryKind::Withdrawal,
            LedgerEntryKind::AdminAdjustment,
        ] {
            assert_eq!(LedgerEntryKind::from_str(kind.as_str()), Some(kind));
        }
    }
}
