//! Ledger Module - Balances, Positions, Settlement & Resolution
//!
//! This module is the money path of the platform:
//! 1. Durable, transactional storage of balances, markets and positions
//! 2. Atomic trade settlement (pricing, position merge, balance transfer)
//! 3. Market lifecycle and resolution payout
//!
//! Architecture:
//! - All shared mutable state lives in the SQLite-backed store
//! - Each operation is one IMMEDIATE transaction; errors roll back fully
//! - The web/API layer calls these engines and owns everything else

pub mod accounts;
pub mod markets;
pub mod position;
pub mod pricing;
pub mod resolution;
pub mod settlement;
pub mod store;

pub use accounts::AccountService;
pub use markets::MarketService;
pub use position::{apply_buy, apply_sell, SHARE_DUST};
pub use pricing::{proceeds_for_shares, shares_for_amount};
pub use resolution::{ResolutionEngine, ResolutionSummary};
pub use settlement::{SettlementEngine, TradeRequest};
pub use store::LedgerStore;
