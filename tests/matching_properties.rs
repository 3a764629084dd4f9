//! Property-based checks of matching and settlement over random order flow.

use proptest::prelude::*;
use rust_decimal::Decimal;
use spot_exchange_engine::{
    AccountId, Asset, EngineError, MatchingEngine, OrderId, OrderStatus, PlaceOrderRequest,
    Quantity, Side, TradeLeg,
};
use std::collections::HashMap;

const ACCOUNTS: usize = 4;

#[derive(Debug, Clone)]
struct Intent {
    account: usize,
    side: Side,
    price: i64,
    /// Tenths of a unit
    quantity: i64,
}

fn intent() -> impl Strategy<Value = Intent> {
    (0..ACCOUNTS, any::<bool>(), 95i64..=105, 1i64..=40).prop_map(
        |(account, buy, price, quantity)| Intent {
            account,
            side: if buy { Side::Buy } else { Side::Sell },
            price,
            quantity,
        },
    )
}

fn account(index: usize) -> AccountId {
    AccountId::new(format!("trader-{}", index))
}

struct Run {
    engine: MatchingEngine,
    deposited: Decimal,
    orders: Vec<OrderId>,
    legs: Vec<TradeLeg>,
}

fn run(deposits: &[i64], intents: &[Intent]) -> Run {
    let engine = MatchingEngine::in_memory();
    let mut deposited = Decimal::ZERO;
    for (index, amount) in deposits.iter().enumerate() {
        let amount = Decimal::from(*amount);
        engine.deposit(&account(index), "SOL", amount).unwrap();
        deposited += amount;
    }

    let mut orders = Vec::new();
    let mut legs = Vec::new();
    for intent in intents {
        let request = PlaceOrderRequest::new(
            "SOL",
            intent.side,
            Decimal::from(intent.price),
            Decimal::new(intent.quantity, 1),
        );
        match engine.place_order(&account(intent.account), request) {
            Ok(outcome) => {
                orders.push(outcome.order.id);
                legs.extend(outcome.fills);
            }
            Err(EngineError::Validation(_)) => {}
            Err(err) => panic!("unexpected engine failure: {}", err),
        }
    }

    Run {
        engine,
        deposited,
        orders,
        legs,
    }
}

proptest! {
    #[test]
    fn balances_stay_non_negative_and_conserved(
        deposits in prop::collection::vec(0i64..10, ACCOUNTS),
        intents in prop::collection::vec(intent(), 1..40),
    ) {
        let run = run(&deposits, &intents);
        let asset = Asset::new("SOL");

        let mut total = Decimal::ZERO;
        for index in 0..ACCOUNTS {
            let balance = run.engine.ledger().balance(&account(index), &asset).unwrap();
            prop_assert!(balance >= Decimal::ZERO);
            total += balance;
        }
        prop_assert_eq!(total, run.deposited);
    }

    #[test]
    fn every_trade_has_two_matching_legs(
        deposits in prop::collection::vec(0i64..10, ACCOUNTS),
        intents in prop::collection::vec(intent(), 1..40),
    ) {
        let run = run(&deposits, &intents);

        let mut by_trade: HashMap<_, Vec<&TradeLeg>> = HashMap::new();
        for leg in &run.legs {
            by_trade.entry(leg.trade_id).or_default().push(leg);
        }
        for legs in by_trade.values() {
            prop_assert_eq!(legs.len(), 2);
            prop_assert_eq!(legs[0].quantity, legs[1].quantity);
            prop_assert_eq!(legs[0].price, legs[1].price);
            prop_assert_eq!(legs[0].side, legs[1].side.opposite());
            prop_assert!(legs[0].quantity.is_positive());
        }
    }

    #[test]
    fn filled_quantity_matches_recorded_legs(
        deposits in prop::collection::vec(0i64..10, ACCOUNTS),
        intents in prop::collection::vec(intent(), 1..40),
    ) {
        let run = run(&deposits, &intents);

        let mut filled: HashMap<OrderId, Quantity> = HashMap::new();
        for leg in &run.legs {
            let entry = filled.entry(leg.order_id).or_insert(Quantity::ZERO);
            *entry = *entry + leg.quantity;
        }

        for order_id in &run.orders {
            let order = run.engine.order(*order_id).unwrap().unwrap();
            let traded = filled.get(order_id).copied().unwrap_or(Quantity::ZERO);
            prop_assert_eq!(order.filled_quantity(), traded);
            prop_assert!(order.remaining_quantity >= Quantity::ZERO);
            prop_assert_eq!(
                order.status == OrderStatus::Filled,
                order.remaining_quantity.is_zero()
            );
        }

        let snapshot = run.engine.order_book("SOL").unwrap();
        for entry in snapshot.bids.iter().chain(snapshot.asks.iter()) {
            prop_assert!(entry.quantity.is_positive());
        }
    }
}
