use std::sync::{Arc, Mutex};

use safex_engine::engine::CancelRequest;
use safex_engine::revenue::FeeTier;
use safex_engine::{
    EngineConfig, EngineError, EngineEvent, MatchingEngine, MemoryLedger, OrderbookError,
    TierAccountant,
};

const E8: u128 = 100_000_000;
const E18: u128 = 1_000_000_000_000_000_000;
const FUND: u128 = 1_000_000 * E18;

/// Fee tier that charges nothing, for scenarios asserting exact amounts.
const FREE_UID: u32 = 7;
/// Fee tier with 0.1% maker / 0.2% taker numerators.
const TIERED_UID: u32 = 9;

struct Harness {
    engine: MatchingEngine,
    ledger: Arc<Mutex<MemoryLedger>>,
    accountant: Arc<Mutex<TierAccountant>>,
}

fn harness() -> Harness {
    let mut mem = MemoryLedger::new("engine", "WETH");
    for token in ["BASE", "QUOTE", "WETH"] {
        mem.register_token(token, 18);
    }
    for account in ["alice", "bob", "carol"] {
        mem.credit("BASE", account, FUND);
        mem.credit("QUOTE", account, FUND);
    }

    let mut acc = TierAccountant::new();
    for account in ["alice", "bob", "carol"] {
        acc.register(account, FREE_UID, FeeTier { maker_num: 0, taker_num: 0 });
    }
    acc.register("dave", TIERED_UID, FeeTier { maker_num: 1_000, taker_num: 2_000 });

    let ledger = Arc::new(Mutex::new(mem));
    let accountant = Arc::new(Mutex::new(acc));
    let engine = MatchingEngine::new(
        EngineConfig {
            engine_id: "engine".into(),
            fee_to: "treasury".into(),
            wrapped_native: Some("WETH".into()),
        },
        Box::new(accountant.clone()),
        Box::new(ledger.clone()),
        Box::new(ledger.clone()),
    );

    Harness { engine, ledger, accountant }
}

impl Harness {
    fn balance(&self, token: &str, account: &str) -> u128 {
        self.ledger.lock().unwrap().balance_of(token, account)
    }

    fn supply(&self, token: &str) -> u128 {
        self.ledger.lock().unwrap().total_supply(token)
    }
}

#[test]
fn place_and_match_single_level() {
    let mut h = harness();
    let price = 1000 * E8;

    let ask = h
        .engine
        .limit_sell("alice", "BASE", "QUOTE", price, 10 * E18, true, 2, FREE_UID, "alice")
        .expect("place ask");
    assert_eq!(ask.order_id, 1);
    assert_eq!(ask.make_price, price);
    assert_eq!(ask.placed, 10 * E18);
    assert_eq!(ask.matched, 0);

    let buy = h
        .engine
        .limit_buy("bob", "BASE", "QUOTE", price, 10_000 * E18, false, 2, FREE_UID, "bob")
        .expect("limit buy");
    assert_eq!(buy.matched, 10_000 * E18);
    assert_eq!(buy.placed, 0);

    assert_eq!(h.engine.mkt_price("BASE", "QUOTE").unwrap(), 100_000_000_000);
    assert_eq!(h.engine.heads("BASE", "QUOTE"), (0, 0));
    assert_eq!(h.balance("BASE", "bob"), FUND + 10 * E18);
    assert_eq!(h.balance("QUOTE", "alice"), FUND + 10_000 * E18);
}

#[test]
fn partial_fill_preserves_head() {
    let mut h = harness();
    let price = 100 * E8;

    let ask = h
        .engine
        .limit_sell("alice", "BASE", "QUOTE", price, 10 * E18, true, 2, FREE_UID, "alice")
        .unwrap();

    // 300 quote buys 3 base at 100.
    h.engine
        .limit_buy("bob", "BASE", "QUOTE", price, 300 * E18, false, 2, FREE_UID, "bob")
        .unwrap();

    let book = h.engine.registry().get("BASE", "QUOTE").unwrap();
    assert_eq!(book.order_head(false, price), Some(ask.order_id));
    assert_eq!(
        book.get_order(false, ask.order_id).unwrap().deposit_amount,
        7 * E18
    );
    assert_eq!(book.get_order_ids(false, price, 10).len(), 1);
}

#[test]
fn spread_guard_rejects_far_ask() {
    let mut h = harness();
    let price = 1000 * E8;
    h.engine
        .limit_sell("alice", "BASE", "QUOTE", price, 10 * E18, true, 2, FREE_UID, "alice")
        .unwrap();
    h.engine
        .limit_buy("bob", "BASE", "QUOTE", price, 10_000 * E18, false, 2, FREE_UID, "bob")
        .unwrap();
    h.engine.drain_events();

    let alice_base = h.balance("BASE", "alice");
    let err = h
        .engine
        .limit_sell("alice", "BASE", "QUOTE", price * 12 / 10, 10 * E18, true, 2, FREE_UID, "alice")
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::AskPriceTooHigh {
            limit: 120_000_000_000,
            lmp: 100_000_000_000,
            ceiling: 110_000_000_000,
        }
    );

    // Rejected before any movement: balances and events untouched.
    assert_eq!(h.balance("BASE", "alice"), alice_base);
    assert!(h.engine.drain_events().is_empty());
}

#[test]
fn price_time_priority_across_two_makers() {
    let mut h = harness();
    let price = 100 * E8;

    let a1 = h
        .engine
        .limit_sell("alice", "BASE", "QUOTE", price, 5 * E18, true, 5, FREE_UID, "alice")
        .unwrap();
    let a2 = h
        .engine
        .limit_sell("carol", "BASE", "QUOTE", price, 5 * E18, true, 5, FREE_UID, "carol")
        .unwrap();
    assert!(a2.order_id > a1.order_id);
    h.engine.drain_events();

    // First buy consumes 4 of alice's 5; alice stays at the head.
    h.engine
        .market_buy("bob", "BASE", "QUOTE", 400 * E18, false, 5, FREE_UID, "bob")
        .unwrap();
    let book = h.engine.registry().get("BASE", "QUOTE").unwrap();
    assert_eq!(book.order_head(false, price), Some(a1.order_id));
    assert_eq!(h.balance("QUOTE", "alice"), FUND + 400 * E18);
    assert_eq!(h.balance("QUOTE", "carol"), FUND);

    // Second buy finishes alice, then eats into carol, refunding the rest.
    h.engine
        .market_buy("bob", "BASE", "QUOTE", 800 * E18, false, 5, FREE_UID, "bob")
        .unwrap();
    assert_eq!(h.balance("QUOTE", "alice"), FUND + 500 * E18);
    assert_eq!(h.balance("QUOTE", "carol"), FUND + 500 * E18);
    assert_eq!(h.balance("BASE", "bob"), FUND + 10 * E18);
    assert_eq!(h.balance("QUOTE", "bob"), FUND - 400 * E18 - 800 * E18 + 200 * E18);

    let matched_ids: Vec<u32> = h
        .engine
        .drain_events()
        .iter()
        .filter_map(|event| match event {
            EngineEvent::OrderMatched { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(matched_ids, vec![a1.order_id, a1.order_id, a2.order_id]);
}

#[test]
fn cancel_refunds_deposit_without_reporting_anonymous() {
    let mut h = harness();
    let price = 100 * E8;

    // Anonymous deposit pays the flat 1% on the way in.
    let placed = h
        .engine
        .limit_sell("alice", "BASE", "QUOTE", price, 7 * E18, true, 2, 0, "alice")
        .unwrap();
    let fee = 7 * E18 / 100;
    assert_eq!(placed.placed, 7 * E18 - fee);
    assert_eq!(h.balance("BASE", "treasury"), fee);

    let refunded = h
        .engine
        .cancel_order("alice", "BASE", "QUOTE", false, placed.order_id, 0)
        .unwrap();
    assert_eq!(refunded, 7 * E18 - fee);
    assert_eq!(h.balance("BASE", "alice"), FUND - fee);

    let acc = h.accountant.lock().unwrap();
    assert!(acc.reports.is_empty());
    assert!(acc.refunds.is_empty());
}

#[test]
fn cancel_reports_and_refunds_fee_for_member() {
    let mut h = harness();
    let price = 100 * E8;
    h.ledger.lock().unwrap().credit("BASE", "dave", FUND);

    // 0.1% maker fee through the oracle.
    let placed = h
        .engine
        .limit_sell("dave", "BASE", "QUOTE", price, 10 * E18, true, 2, TIERED_UID, "dave")
        .unwrap();
    let fee = 10 * E18 * 1_000 / 1_000_000;
    assert_eq!(placed.placed, 10 * E18 - fee);

    let refunded = h
        .engine
        .cancel_order("dave", "BASE", "QUOTE", false, placed.order_id, TIERED_UID)
        .unwrap();
    assert_eq!(refunded, 10 * E18 - fee);

    let acc = h.accountant.lock().unwrap();
    assert_eq!(acc.reports.len(), 2);
    assert!(acc.reports[0].is_add);
    assert_eq!(acc.reports[0].amount, 10 * E18);
    assert!(!acc.reports[1].is_add);
    assert_eq!(acc.reports[1].amount, refunded);
    assert_eq!(acc.refunds.len(), 1);
    assert_eq!(acc.refunds[0].to, "dave");
    assert_eq!(acc.refunds[0].amount, refunded / 100);
}

#[test]
fn order_size_too_small_rejected() {
    let mut h = harness();
    let price = 100 * E8;
    h.engine
        .limit_sell("alice", "BASE", "QUOTE", price, 10 * E18, true, 2, FREE_UID, "alice")
        .unwrap();

    // A quote deposit worth exactly one base unit.
    let one_base_in_quote = 100;
    let err = h
        .engine
        .limit_buy("bob", "BASE", "QUOTE", price, one_base_in_quote, false, 2, FREE_UID, "bob")
        .unwrap_err();
    assert!(matches!(err, EngineError::OrderSizeTooSmall { .. }));
}

#[test]
fn best_price_first_across_levels() {
    let mut h = harness();
    h.engine
        .limit_sell("alice", "BASE", "QUOTE", 110 * E8, 5 * E18, true, 5, FREE_UID, "alice")
        .unwrap();
    h.engine
        .limit_sell("carol", "BASE", "QUOTE", 100 * E8, 5 * E18, true, 5, FREE_UID, "carol")
        .unwrap();

    let book = h.engine.registry().get("BASE", "QUOTE").unwrap();
    assert_eq!(book.get_prices(false, 3), vec![100 * E8, 110 * E8]);

    // 500 quote sweeps the cheap level, then 220 buys 2 more at 110.
    h.engine
        .limit_buy("bob", "BASE", "QUOTE", 120 * E8, 720 * E18, false, 5, FREE_UID, "bob")
        .unwrap();
    assert_eq!(h.balance("QUOTE", "carol"), FUND + 500 * E18);
    assert_eq!(h.balance("QUOTE", "alice"), FUND + 220 * E18);
    assert_eq!(h.balance("BASE", "bob"), FUND + 7 * E18);
    assert_eq!(h.engine.mkt_price("BASE", "QUOTE").unwrap(), 110 * E8);

    let book = h.engine.registry().get("BASE", "QUOTE").unwrap();
    let (bid_head, ask_head) = book.heads();
    assert_eq!(bid_head, 0);
    assert_eq!(ask_head, 110 * E8);
}

#[test]
fn residual_rests_as_maker_and_book_stays_uncrossed() {
    let mut h = harness();
    h.engine
        .limit_sell("alice", "BASE", "QUOTE", 100 * E8, 5 * E18, true, 5, FREE_UID, "alice")
        .unwrap();

    // Buys 5 base for 500 quote, rests the other 500 as a bid.
    let buy = h
        .engine
        .limit_buy("bob", "BASE", "QUOTE", 100 * E8, 1_000 * E18, true, 5, FREE_UID, "bob")
        .unwrap();
    assert_eq!(buy.matched, 500 * E18);
    assert_eq!(buy.placed, 500 * E18);
    assert_eq!(buy.make_price, 100 * E8);
    assert!(buy.order_id > 0);

    let (bid_head, ask_head) = h.engine.heads("BASE", "QUOTE");
    assert_eq!(bid_head, 100 * E8);
    assert_eq!(ask_head, 0);
}

#[test]
fn market_order_without_price_anchor_fails() {
    let mut h = harness();
    let err = h
        .engine
        .market_buy("bob", "BASE", "QUOTE", 100 * E18, false, 2, FREE_UID, "bob")
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::NoLastMatchedPrice { base: "BASE".into(), quote: "QUOTE".into() }
    );
}

#[test]
fn market_sell_rests_below_mark_price() {
    let mut h = harness();
    let price = 100 * E8;
    h.engine
        .limit_sell("alice", "BASE", "QUOTE", price, 1 * E18, true, 2, FREE_UID, "alice")
        .unwrap();
    h.engine
        .limit_buy("bob", "BASE", "QUOTE", price, 100 * E18, false, 2, FREE_UID, "bob")
        .unwrap();
    assert_eq!(h.engine.mkt_price("BASE", "QUOTE").unwrap(), price);

    // No bids to hit: the full amount rests at mp * 9/10.
    let sell = h
        .engine
        .market_sell("carol", "BASE", "QUOTE", 2 * E18, true, 2, FREE_UID, "carol")
        .unwrap();
    assert_eq!(sell.matched, 0);
    assert_eq!(sell.make_price, 90 * E8);
    assert_eq!(sell.placed, 2 * E18);
    assert_eq!(h.engine.heads("BASE", "QUOTE"), (0, 90 * E8));
}

#[test]
fn too_many_matches_rejected_before_deposit() {
    let mut h = harness();
    let err = h
        .engine
        .limit_buy("bob", "BASE", "QUOTE", 100 * E8, 100 * E18, false, 21, FREE_UID, "bob")
        .unwrap_err();
    assert_eq!(err, EngineError::TooManyMatches(21));
    assert_eq!(h.balance("QUOTE", "bob"), FUND);
    assert_eq!(h.engine.pair_count(), 0);
}

#[test]
fn match_budget_caps_consumed_orders() {
    let mut h = harness();
    let price = 100 * E8;
    for _ in 0..3 {
        h.engine
            .limit_sell("alice", "BASE", "QUOTE", price, 1 * E18, true, 5, FREE_UID, "alice")
            .unwrap();
    }

    // Budget of 2 leaves the third resting order untouched.
    let buy = h
        .engine
        .limit_buy("bob", "BASE", "QUOTE", price, 1_000 * E18, false, 2, FREE_UID, "bob")
        .unwrap();
    assert_eq!(buy.matched, 200 * E18);
    assert_eq!(h.balance("BASE", "bob"), FUND + 2 * E18);

    let book = h.engine.registry().get("BASE", "QUOTE").unwrap();
    assert_eq!(book.get_order_ids(false, price, 10).len(), 1);
}

#[test]
fn cancel_unknown_pair_is_invalid() {
    let mut h = harness();
    let err = h
        .engine
        .cancel_order("alice", "BASE", "QUOTE", false, 1, 0)
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidPair { base: "BASE".into(), quote: "QUOTE".into() }
    );
}

#[test]
fn cancel_after_full_execution_is_not_found() {
    let mut h = harness();
    let price = 100 * E8;
    let ask = h
        .engine
        .limit_sell("alice", "BASE", "QUOTE", price, 1 * E18, true, 2, FREE_UID, "alice")
        .unwrap();
    h.engine
        .limit_buy("bob", "BASE", "QUOTE", price, 100 * E18, false, 2, FREE_UID, "bob")
        .unwrap();

    let err = h
        .engine
        .cancel_order("alice", "BASE", "QUOTE", false, ask.order_id, FREE_UID)
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Orderbook(OrderbookError::OrderNotFound(ask.order_id))
    );
}

#[test]
fn bulk_cancel_settles_elements_independently() {
    let mut h = harness();
    let price = 100 * E8;
    let a = h
        .engine
        .limit_sell("alice", "BASE", "QUOTE", price, 1 * E18, true, 2, FREE_UID, "alice")
        .unwrap();
    let b = h
        .engine
        .limit_sell("alice", "BASE", "QUOTE", price, 2 * E18, true, 2, FREE_UID, "alice")
        .unwrap();

    let requests = vec![
        CancelRequest { base: "BASE".into(), quote: "QUOTE".into(), is_bid: false, order_id: a.order_id },
        CancelRequest { base: "BASE".into(), quote: "QUOTE".into(), is_bid: false, order_id: 99 },
        CancelRequest { base: "BASE".into(), quote: "QUOTE".into(), is_bid: false, order_id: b.order_id },
    ];
    let results = h.engine.cancel_orders("alice", &requests, FREE_UID).unwrap();

    assert_eq!(results[0], Ok(1 * E18));
    assert!(matches!(
        results[1],
        Err(EngineError::Orderbook(OrderbookError::OrderNotFound(99)))
    ));
    assert_eq!(results[2], Ok(2 * E18));
    assert_eq!(h.balance("BASE", "alice"), FUND);
}

#[test]
fn rematch_reenters_at_original_price() {
    let mut h = harness();
    let price = 110 * E8;
    let ask = h
        .engine
        .limit_sell("alice", "BASE", "QUOTE", price, 5 * E18, true, 2, FREE_UID, "alice")
        .unwrap();

    let result = h
        .engine
        .rematch_order("alice", "BASE", "QUOTE", false, ask.order_id, false, true, 2, FREE_UID)
        .unwrap();
    assert!(result.order_id > ask.order_id);
    assert_eq!(result.placed, 5 * E18);
    assert_eq!(result.make_price, price);

    let book = h.engine.registry().get("BASE", "QUOTE").unwrap();
    assert!(book.get_order(false, ask.order_id).is_none());
    assert_eq!(
        book.get_order(false, result.order_id).unwrap().deposit_amount,
        5 * E18
    );
}

#[test]
fn place_cancel_round_trip_restores_book() {
    let mut h = harness();
    let price = 100 * E8;
    let before = h.engine.snapshot();

    let ask = h
        .engine
        .limit_sell("alice", "BASE", "QUOTE", price, 5 * E18, true, 2, FREE_UID, "alice")
        .unwrap();
    let refunded = h
        .engine
        .cancel_order("alice", "BASE", "QUOTE", false, ask.order_id, FREE_UID)
        .unwrap();
    assert_eq!(refunded, 5 * E18);
    assert_eq!(h.balance("BASE", "alice"), FUND);

    let book = h.engine.registry().get("BASE", "QUOTE").unwrap();
    assert_eq!(book.heads(), (0, 0));
    assert!(book.get_prices(false, 10).is_empty());
    assert_eq!(book.lmp(), 0);
    // Only the id counter (and the registered pair) advanced.
    assert_eq!(before.registry.pair_count(), 0);
    assert_eq!(book.next_make_id(false), ask.order_id + 1);
}

#[test]
fn token_conservation_across_mixed_flow() {
    let mut h = harness();
    let price = 100 * E8;
    let base_supply = h.supply("BASE");
    let quote_supply = h.supply("QUOTE");

    h.engine
        .limit_sell("alice", "BASE", "QUOTE", price, 10 * E18, true, 5, 0, "alice")
        .unwrap();
    h.engine
        .limit_buy("bob", "BASE", "QUOTE", price, 300 * E18, false, 5, 0, "bob")
        .unwrap();
    let carol_ask = h
        .engine
        .limit_sell("carol", "BASE", "QUOTE", 105 * E8, 2 * E18, true, 5, 0, "carol")
        .unwrap();
    h.engine
        .cancel_order("carol", "BASE", "QUOTE", false, carol_ask.order_id, 0)
        .unwrap();

    assert_eq!(h.supply("BASE"), base_supply);
    assert_eq!(h.supply("QUOTE"), quote_supply);
}

#[test]
fn add_pair_is_idempotent() {
    let mut h = harness();
    let first = h.engine.add_pair("BASE", "QUOTE").unwrap();
    let second = h.engine.add_pair("BASE", "QUOTE").unwrap();
    assert_eq!(first, second);
    assert_eq!(h.engine.pair_count(), 1);

    let added: Vec<_> = h
        .engine
        .drain_events()
        .iter()
        .filter(|event| matches!(event, EngineEvent::PairAdded { .. }))
        .cloned()
        .collect();
    assert_eq!(added.len(), 1);
}

#[test]
fn reversed_pair_is_distinct() {
    let mut h = harness();
    let ab = h.engine.add_pair("BASE", "QUOTE").unwrap();
    let ba = h.engine.add_pair("QUOTE", "BASE").unwrap();
    assert_ne!(ab, ba);
    assert_eq!(h.engine.pair_count(), 2);
}

#[test]
fn unknown_token_cannot_form_pair() {
    let mut h = harness();
    let err = h
        .engine
        .limit_sell("alice", "MYSTERY", "QUOTE", 100 * E8, E18, true, 2, 0, "alice")
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidPair { base: "MYSTERY".into(), quote: "QUOTE".into() }
    );
}

#[test]
fn wrapped_native_flows_through_token_path() {
    let mut h = harness();
    h.ledger.lock().unwrap().credit_native("alice", 10 * E18);

    h.engine.wrap_native("alice", 10 * E18).unwrap();
    assert_eq!(h.balance("WETH", "alice"), 10 * E18);

    let ask = h
        .engine
        .limit_sell("alice", "WETH", "QUOTE", 2_000 * E8, 10 * E18, true, 2, FREE_UID, "alice")
        .unwrap();
    assert_eq!(ask.placed, 10 * E18);
    assert_eq!(h.engine.heads("WETH", "QUOTE"), (0, 2_000 * E8));
}

#[test]
fn deposit_event_precedes_match_and_place() {
    let mut h = harness();
    let price = 100 * E8;
    h.engine
        .limit_sell("alice", "BASE", "QUOTE", price, 1 * E18, true, 2, FREE_UID, "alice")
        .unwrap();
    h.engine.drain_events();

    h.engine
        .limit_buy("bob", "BASE", "QUOTE", price, 200 * E18, true, 2, FREE_UID, "bob")
        .unwrap();
    let events = h.engine.drain_events().into_vec();
    assert!(matches!(events[0], EngineEvent::OrderDeposit { .. }));
    assert!(matches!(events[1], EngineEvent::OrderMatched { .. }));
    assert!(matches!(events[2], EngineEvent::OrderPlaced { .. }));
}
