//! Integration tests for trade settlement
//!
//! Exercises the settlement engine end to end against a real on-disk
//! store: the buy/sell walkthrough, precondition rejections with zero
//! state change, and serialization of concurrent trades.

use foresight_core::models::{BetSide, LedgerEntryKind, UserRole};
use foresight_core::{
    AccountService, LedgerError, LedgerStore, MarketService, ResolutionEngine, SettlementEngine,
    TradeRequest,
};
use uuid::Uuid;

struct Harness {
    _dir: tempfile::TempDir,
    accounts: AccountService,
    markets: MarketService,
    settlement: SettlementEngine,
    resolution: ResolutionEngine,
}

fn harness() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let store = LedgerStore::open(path.to_str().unwrap()).unwrap();
    Harness {
        _dir: dir,
        accounts: AccountService::new(store.clone(), 0.0),
        markets: MarketService::new(store.clone()),
        settlement: SettlementEngine::new(store.clone()),
        resolution: ResolutionEngine::new(store),
    }
}

async fn trader_with(h: &Harness, name: &str, balance: f64) -> Uuid {
    let user = h.accounts.create_user(name, UserRole::Trader).await.unwrap();
    if balance > 0.0 {
        h.accounts.deposit(user.id, balance).await.unwrap();
    }
    user.id
}

/// Creates an admin plus an ACTIVE yes/no market. Returns
/// (admin, market, yes outcome, no outcome).
async fn yes_no_market(h: &Harness, p_yes: f64, p_no: f64) -> (Uuid, Uuid, Uuid, Uuid) {
    let admin = h.accounts.create_user("admin", UserRole::Admin).await.unwrap();
    let detail = h
        .markets
        .create_market("Will it rain tomorrow?", &[("YES", p_yes), ("NO", p_no)], admin.id)
        .await
        .unwrap();
    let yes = detail.outcomes.iter().find(|o| o.name == "YES").unwrap().id;
    let no = detail.outcomes.iter().find(|o| o.name == "NO").unwrap().id;
    (admin.id, detail.market.id, yes, no)
}

fn trade(user: Uuid, market: Uuid, outcome: Uuid, quantity: f64, side: BetSide) -> TradeRequest {
    TradeRequest {
        user_id: user,
        market_id: market,
        outcome_id: outcome,
        quantity,
        side,
    }
}

#[tokio::test]
async fn test_buy_sell_resolve_walkthrough() {
    let h = harness();
    let (_admin, market, yes, _no) = yes_no_market(&h, 0.5, 0.5).await;
    let alice = trader_with(&h, "alice", 100.0).await;

    // buy 40 cash at p=0.5 -> 80 shares
    let bet = h
        .settlement
        .place_bet(&trade(alice, market, yes, 40.0, BetSide::Buy))
        .await
        .unwrap();
    assert_eq!(bet.amount, 40.0);
    assert_eq!(bet.shares, 80.0);
    assert_eq!(bet.price, 0.5);

    let user = h.accounts.get_user(alice).await.unwrap();
    assert_eq!(user.balance, 60.0);
    assert_eq!(user.total_invested, 40.0);

    let views = h.settlement.get_positions(alice, Some(market)).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].shares, 80.0);
    assert_eq!(views[0].invested, 40.0);
    assert_eq!(views[0].avg_price, 0.5);

    // sell 20 shares back at p=0.5 -> 10 cash
    let bet = h
        .settlement
        .place_bet(&trade(alice, market, yes, 20.0, BetSide::Sell))
        .await
        .unwrap();
    assert_eq!(bet.amount, 10.0);
    assert_eq!(bet.shares, 20.0);

    let user = h.accounts.get_user(alice).await.unwrap();
    assert_eq!(user.balance, 70.0);

    let views = h.settlement.get_positions(alice, Some(market)).await.unwrap();
    assert_eq!(views[0].shares, 60.0);
    assert_eq!(views[0].invested, 30.0);
    assert_eq!(views[0].avg_price, 0.5);

    // volume accumulated cash from both sides of the book
    let detail = h.markets.get_market(market).await.unwrap();
    assert_eq!(detail.market.volume, 50.0);

    // resolve YES: one unit per remaining winning share
    let summary = h
        .resolution
        .resolve_market(market, yes, UserRole::Admin)
        .await
        .unwrap();
    assert_eq!(summary.holders_paid, 1);
    assert_eq!(summary.total_paid, 60.0);

    let user = h.accounts.get_user(alice).await.unwrap();
    assert_eq!(user.balance, 130.0);
    assert_eq!(user.total_winnings, 60.0);

    // the feed saw every balance-affecting event exactly once
    let feed = h.accounts.list_activity(alice, 10).await.unwrap();
    let kinds: Vec<LedgerEntryKind> = feed.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            LedgerEntryKind::MarketPayout,
            LedgerEntryKind::BetSold,
            LedgerEntryKind::BetPlaced,
            LedgerEntryKind::Deposit,
        ]
    );
}

#[tokio::test]
async fn test_sell_beyond_holdings_changes_nothing() {
    let h = harness();
    let (_admin, market, yes, _no) = yes_no_market(&h, 0.5, 0.5).await;
    let bob = trader_with(&h, "bob", 100.0).await;

    h.settlement
        .place_bet(&trade(bob, market, yes, 40.0, BetSide::Buy))
        .await
        .unwrap();

    let err = h
        .settlement
        .place_bet(&trade(bob, market, yes, 80.1, BetSide::Sell))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientShares { .. }));

    let user = h.accounts.get_user(bob).await.unwrap();
    assert_eq!(user.balance, 60.0);
    let views = h.settlement.get_positions(bob, Some(market)).await.unwrap();
    assert_eq!(views[0].shares, 80.0);
    let detail = h.markets.get_market(market).await.unwrap();
    assert_eq!(detail.market.volume, 40.0);

    // selling with no position at all is the same error
    let carol = trader_with(&h, "carol", 10.0).await;
    let err = h
        .settlement
        .place_bet(&trade(carol, market, yes, 1.0, BetSide::Sell))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientShares { held, .. } if held == 0.0
    ));
}

#[tokio::test]
async fn test_selling_everything_deletes_the_position() {
    let h = harness();
    let (_admin, market, yes, _no) = yes_no_market(&h, 0.5, 0.5).await;
    let dana = trader_with(&h, "dana", 50.0).await;

    h.settlement
        .place_bet(&trade(dana, market, yes, 50.0, BetSide::Buy))
        .await
        .unwrap();
    h.settlement
        .place_bet(&trade(dana, market, yes, 100.0, BetSide::Sell))
        .await
        .unwrap();

    let views = h.settlement.get_positions(dana, None).await.unwrap();
    assert!(views.is_empty());
    // round trip at one price is cash neutral
    assert_eq!(h.accounts.get_user(dana).await.unwrap().balance, 50.0);
}

#[tokio::test]
async fn test_trades_rejected_unless_market_active() {
    let h = harness();
    let (_admin, market, yes, _no) = yes_no_market(&h, 0.6, 0.4).await;
    let erin = trader_with(&h, "erin", 100.0).await;

    h.markets.close_market(market, UserRole::Admin).await.unwrap();
    let err = h
        .settlement
        .place_bet(&trade(erin, market, yes, 10.0, BetSide::Buy))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::MarketNotActive));

    h.markets.cancel_market(market, UserRole::Admin).await.unwrap();
    let err = h
        .settlement
        .place_bet(&trade(erin, market, yes, 10.0, BetSide::Buy))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::MarketNotActive));

    assert_eq!(h.accounts.get_user(erin).await.unwrap().balance, 100.0);
}

#[tokio::test]
async fn test_unknown_references_are_not_found() {
    let h = harness();
    let (_admin, market, yes, _no) = yes_no_market(&h, 0.5, 0.5).await;
    let frank = trader_with(&h, "frank", 100.0).await;

    let err = h
        .settlement
        .place_bet(&trade(Uuid::new_v4(), market, yes, 10.0, BetSide::Buy))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "user", .. }));

    let err = h
        .settlement
        .place_bet(&trade(frank, Uuid::new_v4(), yes, 10.0, BetSide::Buy))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "market", .. }));

    let err = h
        .settlement
        .place_bet(&trade(frank, market, Uuid::new_v4(), 10.0, BetSide::Buy))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "outcome", .. }));

    // an outcome belonging to a different market is as good as missing
    let other = h
        .markets
        .create_market("Another one?", &[("YES", 0.5), ("NO", 0.5)], frank)
        .await
        .unwrap();
    let foreign_outcome = other.outcomes[0].id;
    let err = h
        .settlement
        .place_bet(&trade(frank, market, foreign_outcome, 10.0, BetSide::Buy))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "outcome", .. }));
}

#[tokio::test]
async fn test_buy_can_spend_the_whole_balance_but_not_more() {
    let h = harness();
    let (_admin, market, yes, _no) = yes_no_market(&h, 0.25, 0.75).await;
    let gil = trader_with(&h, "gil", 100.0).await;

    h.settlement
        .place_bet(&trade(gil, market, yes, 100.0, BetSide::Buy))
        .await
        .unwrap();
    assert_eq!(h.accounts.get_user(gil).await.unwrap().balance, 0.0);

    let err = h
        .settlement
        .place_bet(&trade(gil, market, yes, 0.01, BetSide::Buy))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
}

#[tokio::test]
async fn test_concurrent_buys_serialize_to_the_sequential_result() {
    let h = harness();
    let (_admin, market, yes, _no) = yes_no_market(&h, 0.5, 0.5).await;
    let hana = trader_with(&h, "hana", 100.0).await;

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let engine = h.settlement.clone();
        let req = trade(hana, market, yes, 5.0, BetSide::Buy);
        tasks.push(tokio::spawn(async move { engine.place_bet(&req).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let user = h.accounts.get_user(hana).await.unwrap();
    assert_eq!(user.balance, 50.0);
    assert_eq!(user.total_invested, 50.0);

    let views = h.settlement.get_positions(hana, Some(market)).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].shares, 100.0);
    assert_eq!(views[0].invested, 50.0);

    let detail = h.markets.get_market(market).await.unwrap();
    assert_eq!(detail.market.volume, 50.0);

    // one ledger entry per settled trade, plus the funding deposit
    let feed = h.accounts.list_activity(hana, 100).await.unwrap();
    let placed = feed
        .iter()
        .filter(|e| e.kind == LedgerEntryKind::BetPlaced)
        .count();
    assert_eq!(placed, 10);
}

#[tokio::test]
async fn test_mark_to_market_follows_admin_price_edit() {
    let h = harness();
    let (_admin, market, yes, _no) = yes_no_market(&h, 0.5, 0.5).await;
    let ivy = trader_with(&h, "ivy", 100.0).await;

    h.settlement
        .place_bet(&trade(ivy, market, yes, 40.0, BetSide::Buy))
        .await
        .unwrap();

    h.markets
        .set_probability(yes, 0.75, UserRole::Admin)
        .await
        .unwrap();

    let views = h.settlement.get_positions(ivy, Some(market)).await.unwrap();
    let v = &views[0];
    assert_eq!(v.probability, 0.75);
    assert_eq!(v.current_value, 60.0);
    assert_eq!(v.pnl, 20.0);
    // the cost basis itself is untouched by a quote move
    assert_eq!(v.invested, 40.0);
    assert_eq!(v.avg_price, 0.5);
}
