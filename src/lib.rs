//! Foresight Core
//!
//! Settlement and position-accounting engine for a prediction-market
//! platform. This crate is the money path: user balances, share
//! positions, atomic trade settlement and resolution payouts. The
//! surrounding web/API layer owns everything else (rendering, auth
//! sessions, comments, admin forms) and calls in through the engines
//! re-exported here.
//!
//! All shared mutable state lives in the SQLite-backed [`LedgerStore`];
//! every operation is one IMMEDIATE transaction that either commits in
//! full or leaves no trace.

pub mod error;
pub mod ledger;
pub mod models;

pub use error::{LedgerError, Result};
pub use ledger::{
    AccountService, LedgerStore, MarketService, ResolutionEngine, ResolutionSummary,
    SettlementEngine, TradeRequest,
};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub busy_timeout_ms: u64,
    /// Balance granted to every newly registered user.
    pub starting_balance: f64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./foresight.db".to_string());

        let busy_timeout_ms = std::env::var("BUSY_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .unwrap_or(5000);

        let starting_balance = std::env::var("STARTING_BALANCE")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000.0);

        Ok(Self {
            database_path,
            busy_timeout_ms,
            starting_balance,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "./foresight.db".to_string(),
            busy_timeout_ms: 5_000,
            starting_balance: 1_000.0,
        }
    }
}
