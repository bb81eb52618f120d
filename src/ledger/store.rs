//! Ledger Store
//!
//! Durable, transactional storage for users, markets, outcomes, bets,
//! positions and the append-only ledger entries.
//!
//! One SQLite connection behind a mutex serializes in-process writers;
//! IMMEDIATE transactions plus SQLite's file lock serialize everyone
//! else. A writer that cannot acquire the lock within the busy timeout
//! surfaces the retryable `Conflict` error with no partial effects.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::models::{
    Bet, LedgerEntry, LedgerEntryKind, Market, MarketStatus, Outcome, Position, User, UserRole,
};

#[derive(Clone)]
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerStore {
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        Self::open_with(db_path, 5_000)
    }

    pub fn open_with(db_path: &str, busy_timeout_ms: u64) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path).context("open ledger db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
            .context("set busy timeout")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                role TEXT NOT NULL,
                balance REAL NOT NULL DEFAULT 0.0 CHECK (balance >= 0.0),
                total_invested REAL NOT NULL DEFAULT 0.0,
                total_winnings REAL NOT NULL DEFAULT 0.0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS markets (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                status TEXT NOT NULL,
                volume REAL NOT NULL DEFAULT 0.0,
                resolution TEXT,
                created_by TEXT NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                resolved_at TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS outcomes (
                id TEXT PRIMARY KEY,
                market_id TEXT NOT NULL REFERENCES markets(id),
                name TEXT NOT NULL,
                probability REAL NOT NULL CHECK (probability > 0.0 AND probability < 1.0),
                UNIQUE (market_id, name)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS bets (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                market_id TEXT NOT NULL REFERENCES markets(id),
                outcome_id TEXT NOT NULL REFERENCES outcomes(id),
                side TEXT NOT NULL,
                amount REAL NOT NULL,
                shares REAL NOT NULL,
                price REAL NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_bets_user_ts ON bets(user_id, created_at DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_bets_market ON bets(market_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS positions (
                user_id TEXT NOT NULL REFERENCES users(id),
                market_id TEXT NOT NULL REFERENCES markets(id),
                outcome_id TEXT NOT NULL REFERENCES outcomes(id),
                shares REAL NOT NULL,
                invested REAL NOT NULL,
                avg_price REAL NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, market_id, outcome_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_positions_market_outcome ON positions(market_id, outcome_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger_entries (
                id TEXT PRIMARY KEY,
                ts TEXT NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id),
                kind TEXT NOT NULL,
                amount REAL NOT NULL,
                market_id TEXT,
                note TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ledger_user_ts ON ledger_entries(user_id, ts DESC)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside one IMMEDIATE transaction.
    ///
    /// Commits on Ok; any Err rolls back every write `f` made. This is
    /// the only way the engines touch the database, so an operation is
    /// either fully visible or not at all.
    pub async fn with_txn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(LedgerError::from)?;
        let out = f(&tx)?;
        tx.commit().map_err(LedgerError::from)?;
        Ok(out)
    }

    /// Activity feed: a user's ledger entries, newest first.
    pub async fn list_activity(&self, user_id: Uuid, limit: usize) -> Result<Vec<LedgerEntry>> {
        let limit = limit.clamp(1, 1000) as i64;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, ts, user_id, kind, amount, market_id, note \
             FROM ledger_entries WHERE user_id = ?1 ORDER BY ts DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id.to_string(), limit], entry_from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Row helpers, usable only inside a store transaction
// ---------------------------------------------------------------------------

pub(crate) fn get_user(tx: &Transaction<'_>, id: Uuid) -> Result<User> {
    let mut stmt = tx.prepare_cached(
        "SELECT id, username, role, balance, total_invested, total_winnings, created_at, updated_at \
         FROM users WHERE id = ?1",
    )?;
    stmt.query_row(params![id.to_string()], user_from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("user", id))
}

pub(crate) fn username_exists(tx: &Transaction<'_>, username: &str) -> Result<bool> {
    let mut stmt = tx.prepare_cached("SELECT 1 FROM users WHERE username = ?1")?;
    Ok(stmt.exists(params![username])?)
}

pub(crate) fn insert_user(tx: &Transaction<'_>, user: &User) -> Result<()> {
    tx.execute(
        "INSERT INTO users (id, username, role, balance, total_invested, total_winnings, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            user.id.to_string(),
            user.username,
            user.role.as_str(),
            user.balance,
            user.total_invested,
            user.total_winnings,
            user.created_at.to_rfc3339(),
            user.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Persist a user's balance and lifetime totals.
pub(crate) fn update_user_funds(
    tx: &Transaction<'_>,
    user: &User,
    now: DateTime<Utc>,
) -> Result<()> {
    tx.execute(
        "UPDATE users SET balance = ?1, total_invested = ?2, total_winnings = ?3, updated_at = ?4 \
         WHERE id = ?5",
        params![
            user.balance,
            user.total_invested,
            user.total_winnings,
            now.to_rfc3339(),
            user.id.to_string(),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_market(tx: &Transaction<'_>, id: Uuid) -> Result<Market> {
    let mut stmt = tx.prepare_cached(
        "SELECT id, question, status, volume, resolution, created_by, created_at, updated_at, resolved_at \
         FROM markets WHERE id = ?1",
    )?;
    stmt.query_row(params![id.to_string()], market_from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("market", id))
}

pub(crate) fn insert_market(tx: &Transaction<'_>, market: &Market) -> Result<()> {
    tx.execute(
        "INSERT INTO markets (id, question, status, volume, resolution, created_by, created_at, updated_at, resolved_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            market.id.to_string(),
            market.question,
            market.status.as_str(),
            market.volume,
            market.resolution.map(|id| id.to_string()),
            market.created_by.to_string(),
            market.created_at.to_rfc3339(),
            market.updated_at.to_rfc3339(),
            market.resolved_at.map(|ts| ts.to_rfc3339()),
        ],
    )?;
    Ok(())
}

/// Persist a market's status, volume and resolution fields.
pub(crate) fn update_market(
    tx: &Transaction<'_>,
    market: &Market,
    now: DateTime<Utc>,
) -> Result<()> {
    tx.execute(
        "UPDATE markets SET status = ?1, volume = ?2, resolution = ?3, updated_at = ?4, resolved_at = ?5 \
         WHERE id = ?6",
        params![
            market.status.as_str(),
            market.volume,
            market.resolution.map(|id| id.to_string()),
            now.to_rfc3339(),
            market.resolved_at.map(|ts| ts.to_rfc3339()),
            market.id.to_string(),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_outcome(tx: &Transaction<'_>, id: Uuid) -> Result<Outcome> {
    let mut stmt = tx.prepare_cached(
        "SELECT id, market_id, name, probability FROM outcomes WHERE id = ?1",
    )?;
    stmt.query_row(params![id.to_string()], outcome_from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("outcome", id))
}

pub(crate) fn list_outcomes(tx: &Transaction<'_>, market_id: Uuid) -> Result<Vec<Outcome>> {
    let mut stmt = tx.prepare_cached(
        "SELECT id, market_id, name, probability FROM outcomes WHERE market_id = ?1 ORDER BY name ASC",
    )?;
    let rows = stmt.query_map(params![market_id.to_string()], outcome_from_row)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn insert_outcome(tx: &Transaction<'_>, outcome: &Outcome) -> Result<()> {
    tx.execute(
        "INSERT INTO outcomes (id, market_id, name, probability) VALUES (?1, ?2, ?3, ?4)",
        params![
            outcome.id.to_string(),
            outcome.market_id.to_string(),
            outcome.name,
            outcome.probability,
        ],
    )?;
    Ok(())
}

pub(crate) fn update_outcome_probability(
    tx: &Transaction<'_>,
    outcome_id: Uuid,
    probability: f64,
) -> Result<()> {
    tx.execute(
        "UPDATE outcomes SET probability = ?1 WHERE id = ?2",
        params![probability, outcome_id.to_string()],
    )?;
    Ok(())
}

pub(crate) fn insert_bet(tx: &Transaction<'_>, bet: &Bet) -> Result<()> {
    tx.execute(
        "INSERT INTO bets (id, user_id, market_id, outcome_id, side, amount, shares, price, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            bet.id.to_string(),
            bet.user_id.to_string(),
            bet.market_id.to_string(),
            bet.outcome_id.to_string(),
            bet.side.as_str(),
            bet.amount,
            bet.shares,
            bet.price,
            bet.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_position(
    tx: &Transaction<'_>,
    user_id: Uuid,
    market_id: Uuid,
    outcome_id: Uuid,
) -> Result<Option<Position>> {
    let mut stmt = tx.prepare_cached(
        "SELECT user_id, market_id, outcome_id, shares, invested, avg_price, updated_at \
         FROM positions WHERE user_id = ?1 AND market_id = ?2 AND outcome_id = ?3",
    )?;
    Ok(stmt
        .query_row(
            params![
                user_id.to_string(),
                market_id.to_string(),
                outcome_id.to_string()
            ],
            position_from_row,
        )
        .optional()?)
}

pub(crate) fn upsert_position(tx: &Transaction<'_>, pos: &Position) -> Result<()> {
    tx.execute(
        "INSERT INTO positions (user_id, market_id, outcome_id, shares, invested, avg_price, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT(user_id, market_id, outcome_id) DO UPDATE SET \
            shares = excluded.shares, \
            invested = excluded.invested, \
            avg_price = excluded.avg_price, \
            updated_at = excluded.updated_at",
        params![
            pos.user_id.to_string(),
            pos.market_id.to_string(),
            pos.outcome_id.to_string(),
            pos.shares,
            pos.invested,
            pos.avg_price,
            pos.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_position(
    tx: &Transaction<'_>,
    user_id: Uuid,
    market_id: Uuid,
    outcome_id: Uuid,
) -> Result<()> {
    tx.execute(
        "DELETE FROM positions WHERE user_id = ?1 AND market_id = ?2 AND outcome_id = ?3",
        params![
            user_id.to_string(),
            market_id.to_string(),
            outcome_id.to_string()
        ],
    )?;
    Ok(())
}

/// All holdings of one outcome, for resolution payout.
pub(crate) fn list_positions_for_outcome(
    tx: &Transaction<'_>,
    market_id: Uuid,
    outcome_id: Uuid,
) -> Result<Vec<Position>> {
    let mut stmt = tx.prepare_cached(
        "SELECT user_id, market_id, outcome_id, shares, invested, avg_price, updated_at \
         FROM positions WHERE market_id = ?1 AND outcome_id = ?2 ORDER BY user_id ASC",
    )?;
    let rows = stmt.query_map(
        params![market_id.to_string(), outcome_id.to_string()],
        position_from_row,
    )?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn list_positions_for_user(
    tx: &Transaction<'_>,
    user_id: Uuid,
    market_id: Option<Uuid>,
) -> Result<Vec<Position>> {
    let mut out = Vec::new();
    if let Some(market_id) = market_id {
        let mut stmt = tx.prepare_cached(
            "SELECT user_id, market_id, outcome_id, shares, invested, avg_price, updated_at \
             FROM positions WHERE user_id = ?1 AND market_id = ?2 ORDER BY outcome_id ASC",
        )?;
        let rows = stmt.query_map(
            params![user_id.to_string(), market_id.to_string()],
            position_from_row,
        )?;
        for row in rows {
            out.push(row?);
        }
        return Ok(out);
    }

    let mut stmt = tx.prepare_cached(
        "SELECT user_id, market_id, outcome_id, shares, invested, avg_price, updated_at \
         FROM positions WHERE user_id = ?1 ORDER BY market_id ASC, outcome_id ASC",
    )?;
    let rows = stmt.query_map(params![user_id.to_string()], position_from_row)?;
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn insert_ledger_entry(tx: &Transaction<'_>, entry: &LedgerEntry) -> Result<()> {
    tx.execute(
        "INSERT INTO ledger_entries (id, ts, user_id, kind, amount, market_id, note) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id.to_string(),
            entry.ts.to_rfc3339(),
            entry.user_id.to_string(),
            entry.kind.as_str(),
            entry.amount,
            entry.market_id.map(|id| id.to_string()),
            entry.note.as_deref(),
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_col(row, 0)?,
        username: row.get(1)?,
        role: enum_col(row, 2, UserRole::from_str)?,
        balance: row.get(3)?,
        total_invested: row.get(4)?,
        total_winnings: row.get(5)?,
        created_at: ts_col(row, 6)?,
        updated_at: ts_col(row, 7)?,
    })
}

fn market_from_row(row: &Row<'_>) -> rusqlite::Result<Market> {
    Ok(Market {
        id: uuid_col(row, 0)?,
        question: row.get(1)?,
        status: enum_col(row, 2, MarketStatus::from_str)?,
        volume: row.get(3)?,
        resolution: opt_uuid_col(row, 4)?,
        created_by: uuid_col(row, 5)?,
        created_at: ts_col(row, 6)?,
        updated_at: ts_col(row, 7)?,
        resolved_at: opt_ts_col(row, 8)?,
    })
}

fn outcome_from_row(row: &Row<'_>) -> rusqlite::Result<Outcome> {
    Ok(Outcome {
        id: uuid_col(row, 0)?,
        market_id: uuid_col(row, 1)?,
        name: row.get(2)?,
        probability: row.get(3)?,
    })
}

fn position_from_row(row: &Row<'_>) -> rusqlite::Result<Position> {
    Ok(Position {
        user_id: uuid_col(row, 0)?,
        market_id: uuid_col(row, 1)?,
        outcome_id: uuid_col(row, 2)?,
        shares: row.get(3)?,
        invested: row.get(4)?,
        avg_price: row.get(5)?,
        updated_at: ts_col(row, 6)?,
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: uuid_col(row, 0)?,
        ts: ts_col(row, 1)?,
        user_id: uuid_col(row, 2)?,
        kind: enum_col(row, 3, LedgerEntryKind::from_str)?,
        amount: row.get(4)?,
        market_id: opt_uuid_col(row, 5)?,
        note: row.get(6)?,
    })
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(s) => Uuid::parse_str(&s).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        }),
    }
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}

fn enum_col<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unrecognized value: {raw}").into(),
        )
    })
}
