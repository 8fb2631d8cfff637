use serde::{Deserialize, Serialize};

use safex_engine::event::amount_str;
use safex_engine::{CancelRequest, EngineError, MatchingEngine, OrderResult, Pair};

/// JSON-framed commands accepted on the order socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineCommand {
    AddPair {
        base: String,
        quote: String,
    },
    LimitBuy {
        sender: String,
        base: String,
        quote: String,
        #[serde(with = "amount_str")]
        price: u128,
        #[serde(with = "amount_str")]
        quote_amount: u128,
        is_maker: bool,
        n: u32,
        uid: u32,
        recipient: String,
    },
    LimitSell {
        sender: String,
        base: String,
        quote: String,
        #[serde(with = "amount_str")]
        price: u128,
        #[serde(with = "amount_str")]
        base_amount: u128,
        is_maker: bool,
        n: u32,
        uid: u32,
        recipient: String,
    },
    MarketBuy {
        sender: String,
        base: String,
        quote: String,
        #[serde(with = "amount_str")]
        quote_amount: u128,
        is_maker: bool,
        n: u32,
        uid: u32,
        recipient: String,
    },
    MarketSell {
        sender: String,
        base: String,
        quote: String,
        #[serde(with = "amount_str")]
        base_amount: u128,
        is_maker: bool,
        n: u32,
        uid: u32,
        recipient: String,
    },
    CancelOrder {
        sender: String,
        base: String,
        quote: String,
        is_bid: bool,
        order_id: u32,
        uid: u32,
    },
    CancelOrders {
        sender: String,
        requests: Vec<CancelRequest>,
        uid: u32,
    },
    RematchOrder {
        sender: String,
        base: String,
        quote: String,
        is_bid: bool,
        order_id: u32,
        is_market: bool,
        is_maker: bool,
        n: u32,
        uid: u32,
    },
    WrapNative {
        sender: String,
        #[serde(with = "amount_str")]
        value: u128,
    },
    MktPrice {
        base: String,
        quote: String,
    },
    Heads {
        base: String,
        quote: String,
    },
    Pairs {
        start: u64,
        end: u64,
    },
    Prices {
        base: String,
        quote: String,
        is_bid: bool,
        n: u32,
    },
    Orders {
        base: String,
        quote: String,
        is_bid: bool,
        #[serde(with = "amount_str")]
        price: u128,
        n: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    #[serde(with = "amount_str::option")]
    pub refunded: Option<u128>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderView {
    pub owner: String,
    #[serde(with = "amount_str")]
    pub price: u128,
    #[serde(with = "amount_str")]
    pub deposit_amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineResponse {
    PairAdded { id: u64 },
    Order(OrderResult),
    Canceled {
        #[serde(with = "amount_str")]
        refunded: u128,
    },
    CanceledBatch { outcomes: Vec<CancelOutcome> },
    Wrapped,
    Price {
        #[serde(with = "amount_str")]
        price: u128,
    },
    Heads {
        #[serde(with = "amount_str")]
        bid: u128,
        #[serde(with = "amount_str")]
        ask: u128,
    },
    Pairs { pairs: Vec<Pair> },
    Prices {
        #[serde(with = "amount_str::list")]
        prices: Vec<u128>,
    },
    Orders { orders: Vec<OrderView> },
    Error { message: String },
}

impl EngineResponse {
    fn from_result<T>(result: Result<T, EngineError>, ok: impl FnOnce(T) -> Self) -> Self {
        match result {
            Ok(value) => ok(value),
            Err(err) => EngineResponse::Error { message: err.to_string() },
        }
    }
}

/// Applies one command to the engine and shapes the reply.
pub fn apply(engine: &mut MatchingEngine, command: EngineCommand) -> EngineResponse {
    match command {
        EngineCommand::AddPair { base, quote } => EngineResponse::from_result(
            engine.add_pair(&base, &quote),
            |id| EngineResponse::PairAdded { id },
        ),
        EngineCommand::LimitBuy {
            sender,
            base,
            quote,
            price,
            quote_amount,
            is_maker,
            n,
            uid,
            recipient,
        } => EngineResponse::from_result(
            engine.limit_buy(
                &sender, &base, &quote, price, quote_amount, is_maker, n, uid, &recipient,
            ),
            EngineResponse::Order,
        ),
        EngineCommand::LimitSell {
            sender,
            base,
            quote,
            price,
            base_amount,
            is_maker,
            n,
            uid,
            recipient,
        } => EngineResponse::from_result(
            engine.limit_sell(
                &sender, &base, &quote, price, base_amount, is_maker, n, uid, &recipient,
            ),
            EngineResponse::Order,
        ),
        EngineCommand::MarketBuy {
            sender,
            base,
            quote,
            quote_amount,
            is_maker,
            n,
            uid,
            recipient,
        } => EngineResponse::from_result(
            engine.market_buy(&sender, &base, &quote, quote_amount, is_maker, n, uid, &recipient),
            EngineResponse::Order,
        ),
        EngineCommand::MarketSell {
            sender,
            base,
            quote,
            base_amount,
            is_maker,
            n,
            uid,
            recipient,
        } => EngineResponse::from_result(
            engine.market_sell(&sender, &base, &quote, base_amount, is_maker, n, uid, &recipient),
            EngineResponse::Order,
        ),
        EngineCommand::CancelOrder { sender, base, quote, is_bid, order_id, uid } => {
            EngineResponse::from_result(
                engine.cancel_order(&sender, &base, &quote, is_bid, order_id, uid),
                |refunded| EngineResponse::Canceled { refunded },
            )
        }
        EngineCommand::CancelOrders { sender, requests, uid } => EngineResponse::from_result(
            engine.cancel_orders(&sender, &requests, uid),
            |results| EngineResponse::CanceledBatch {
                outcomes: results
                    .into_iter()
                    .map(|result| match result {
                        Ok(refunded) => CancelOutcome { refunded: Some(refunded), error: None },
                        Err(err) => CancelOutcome { refunded: None, error: Some(err.to_string()) },
                    })
                    .collect(),
            },
        ),
        EngineCommand::RematchOrder {
            sender,
            base,
            quote,
            is_bid,
            order_id,
            is_market,
            is_maker,
            n,
            uid,
        } => EngineResponse::from_result(
            engine.rematch_order(
                &sender, &base, &quote, is_bid, order_id, is_market, is_maker, n, uid,
            ),
            EngineResponse::Order,
        ),
        EngineCommand::WrapNative { sender, value } => EngineResponse::from_result(
            engine.wrap_native(&sender, value),
            |_| EngineResponse::Wrapped,
        ),
        EngineCommand::MktPrice { base, quote } => EngineResponse::from_result(
            engine.mkt_price(&base, &quote),
            |price| EngineResponse::Price { price },
        ),
        EngineCommand::Heads { base, quote } => {
            let (bid, ask) = engine.heads(&base, &quote);
            EngineResponse::Heads { bid, ask }
        }
        EngineCommand::Pairs { start, end } => {
            EngineResponse::Pairs { pairs: engine.enumerate_pairs(start, end) }
        }
        EngineCommand::Prices { base, quote, is_bid, n } => {
            let prices = engine
                .registry()
                .get(&base, &quote)
                .map(|book| book.get_prices(is_bid, n as usize))
                .unwrap_or_default();
            EngineResponse::Prices { prices }
        }
        EngineCommand::Orders { base, quote, is_bid, price, n } => {
            let orders = engine
                .registry()
                .get(&base, &quote)
                .map(|book| book.get_orders(is_bid, price, n))
                .unwrap_or_default()
                .into_iter()
                .map(|order| OrderView {
                    owner: order.owner,
                    price: order.price,
                    deposit_amount: order.deposit_amount,
                })
                .collect();
            EngineResponse::Orders { orders }
        }
    }
}

/// Decodes a JSON frame, applies it, and encodes the reply. Malformed
/// input becomes an `Error` response rather than a dropped frame.
pub fn handle_frame(engine: &mut MatchingEngine, frame: &[u8]) -> Vec<u8> {
    let response = match serde_json::from_slice::<EngineCommand>(frame) {
        Ok(command) => apply(engine, command),
        Err(err) => EngineResponse::Error { message: format!("bad command: {err}") },
    };
    serde_json::to_vec(&response).unwrap_or_else(|_| b"{\"kind\":\"error\"}".to_vec())
}
