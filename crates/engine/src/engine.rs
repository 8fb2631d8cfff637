use serde::{Deserialize, Serialize};

use crate::event::{EngineEvent, EventQueue};
use crate::ledger::{Ledger, LedgerError, TokenInfo};
use crate::orderbook::{Orderbook, OrderbookError, Pair, TransferInstruction};
use crate::registry::{OrderbookRegistry, RegistryError};
use crate::revenue::{Accountant, RevenueError};

/// Denominator for fee numerators supplied by the accountant.
pub const FEE_DENOM: u128 = 1_000_000;
/// Cap on matched orders per public call.
pub const MAX_MATCHES: u32 = 20;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("too many matches: {0}")]
    TooManyMatches(u32),
    #[error("invalid pair: base={base}, quote={quote}")]
    InvalidPair { base: String, quote: String },
    #[error("no order made: base={base}, quote={quote}")]
    NoOrderMade { base: String, quote: String },
    #[error("order size too small: amount={amount}, min={min}")]
    OrderSizeTooSmall { amount: u128, min: u128 },
    #[error("bid price too low: limit={limit}, lmp={lmp}, floor={floor}")]
    BidPriceTooLow { limit: u128, lmp: u128, floor: u128 },
    #[error("ask price too high: limit={limit}, lmp={lmp}, ceiling={ceiling}")]
    AskPriceTooHigh { limit: u128, lmp: u128, ceiling: u128 },
    #[error("no last matched price: base={base}, quote={quote}")]
    NoLastMatchedPrice { base: String, quote: String },
    #[error("reentrant call rejected")]
    Reentrancy,
    #[error(transparent)]
    Orderbook(#[from] OrderbookError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Revenue(#[from] RevenueError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identity the engine's orderbooks authorize against, and the ledger
    /// account holding resting deposits.
    pub engine_id: String,
    /// Treasury account receiving fees.
    pub fee_to: String,
    /// Wrapped-native token id, when this deployment bridges native value.
    pub wrapped_native: Option<String>,
}

/// Outcome of a limit or market order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    /// Price the residual rested at (or would have rested at).
    #[serde(with = "crate::event::amount_str")]
    pub make_price: u128,
    /// Amount of the deposited asset consumed by matching, after fees.
    #[serde(with = "crate::event::amount_str")]
    pub matched: u128,
    /// Amount of the deposited asset resting as a maker order.
    #[serde(with = "crate::event::amount_str")]
    pub placed: u128,
    /// Id of the resting order; 0 when nothing was placed.
    pub order_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub base: String,
    pub quote: String,
    pub is_bid: bool,
    pub order_id: u32,
}

/// Serializable engine state, sufficient to rebuild the engine next to the
/// same external capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub config: EngineConfig,
    pub registry: OrderbookRegistry,
}

/// The matching engine: deposit and fee handling, the match loop, the
/// maker decision, and cancel/rematch. All public operations run strictly
/// serially; callee reentry is rejected.
pub struct MatchingEngine {
    config: EngineConfig,
    registry: OrderbookRegistry,
    accountant: Box<dyn Accountant>,
    ledger: Box<dyn Ledger>,
    tokens: Box<dyn TokenInfo>,
    events: Vec<EngineEvent>,
    entered: bool,
}

impl MatchingEngine {
    pub fn new(
        config: EngineConfig,
        accountant: Box<dyn Accountant>,
        ledger: Box<dyn Ledger>,
        tokens: Box<dyn TokenInfo>,
    ) -> Self {
        Self {
            config,
            registry: OrderbookRegistry::new(),
            accountant,
            ledger,
            tokens,
            events: Vec::new(),
            entered: false,
        }
    }

    pub fn restore(
        snapshot: EngineSnapshot,
        accountant: Box<dyn Accountant>,
        ledger: Box<dyn Ledger>,
        tokens: Box<dyn TokenInfo>,
    ) -> Self {
        Self {
            config: snapshot.config,
            registry: snapshot.registry,
            accountant,
            ledger,
            tokens,
            events: Vec::new(),
            entered: false,
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            config: self.config.clone(),
            registry: self.registry.clone(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &OrderbookRegistry {
        &self.registry
    }

    pub fn pair_count(&self) -> usize {
        self.registry.pair_count()
    }

    pub fn enumerate_pairs(&self, start: u64, end: u64) -> Vec<Pair> {
        self.registry.enumerate(start, end)
    }

    /// Drains events accumulated by successful operations.
    pub fn drain_events(&mut self) -> EventQueue {
        EventQueue(std::mem::take(&mut self.events))
    }

    /// Serializes one public operation: rejects reentry, and commits
    /// buffered events only when the operation succeeds.
    fn guarded<T>(
        &mut self,
        f: impl FnOnce(&mut Self, &mut Vec<EngineEvent>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        if self.entered {
            return Err(EngineError::Reentrancy);
        }
        self.entered = true;
        let mut fx = Vec::new();
        let out = f(self, &mut fx);
        self.entered = false;
        if out.is_ok() {
            self.events.append(&mut fx);
        }
        out
    }

    /// Registers the pair if missing; returns the existing book otherwise.
    pub fn add_pair(&mut self, base: &str, quote: &str) -> Result<u64, EngineError> {
        self.guarded(|eng, _fx| match eng.registry.id_of(base, quote) {
            Some(id) => Ok(id),
            None => eng.create_pair(base, quote),
        })
    }

    pub fn limit_buy(
        &mut self,
        sender: &str,
        base: &str,
        quote: &str,
        price: u128,
        quote_amount: u128,
        is_maker: bool,
        n: u32,
        uid: u32,
        recipient: &str,
    ) -> Result<OrderResult, EngineError> {
        self.guarded(|eng, fx| {
            eng.do_order(
                fx, sender, base, quote, price, quote_amount, true, is_maker, n, uid, recipient,
            )
        })
    }

    pub fn limit_sell(
        &mut self,
        sender: &str,
        base: &str,
        quote: &str,
        price: u128,
        base_amount: u128,
        is_maker: bool,
        n: u32,
        uid: u32,
        recipient: &str,
    ) -> Result<OrderResult, EngineError> {
        self.guarded(|eng, fx| {
            eng.do_order(
                fx, sender, base, quote, price, base_amount, false, is_maker, n, uid, recipient,
            )
        })
    }

    /// Market buy: a limit buy at the mark price plus the spread band.
    pub fn market_buy(
        &mut self,
        sender: &str,
        base: &str,
        quote: &str,
        quote_amount: u128,
        is_maker: bool,
        n: u32,
        uid: u32,
        recipient: &str,
    ) -> Result<OrderResult, EngineError> {
        self.guarded(|eng, fx| {
            let limit = eng.synthetic_limit(base, quote, true)?;
            eng.do_order(
                fx, sender, base, quote, limit, quote_amount, true, is_maker, n, uid, recipient,
            )
        })
    }

    /// Market sell: a limit sell at the mark price minus the spread band.
    pub fn market_sell(
        &mut self,
        sender: &str,
        base: &str,
        quote: &str,
        base_amount: u128,
        is_maker: bool,
        n: u32,
        uid: u32,
        recipient: &str,
    ) -> Result<OrderResult, EngineError> {
        self.guarded(|eng, fx| {
            let limit = eng.synthetic_limit(base, quote, false)?;
            eng.do_order(
                fx, sender, base, quote, limit, base_amount, false, is_maker, n, uid, recipient,
            )
        })
    }

    pub fn cancel_order(
        &mut self,
        sender: &str,
        base: &str,
        quote: &str,
        is_bid: bool,
        order_id: u32,
        uid: u32,
    ) -> Result<u128, EngineError> {
        self.guarded(|eng, fx| eng.do_cancel(fx, sender, base, quote, is_bid, order_id, uid))
    }

    /// Bulk cancel; each element settles independently and earlier
    /// successes stand regardless of later failures.
    pub fn cancel_orders(
        &mut self,
        sender: &str,
        requests: &[CancelRequest],
        uid: u32,
    ) -> Result<Vec<Result<u128, EngineError>>, EngineError> {
        self.guarded(|eng, fx| {
            Ok(requests
                .iter()
                .map(|req| {
                    eng.do_cancel(fx, sender, &req.base, &req.quote, req.is_bid, req.order_id, uid)
                })
                .collect())
        })
    }

    /// Cancels the order and re-enters the refunded amount as a fresh
    /// limit or market order, paying out to the sender.
    pub fn rematch_order(
        &mut self,
        sender: &str,
        base: &str,
        quote: &str,
        is_bid: bool,
        order_id: u32,
        is_market: bool,
        is_maker: bool,
        n: u32,
        uid: u32,
    ) -> Result<OrderResult, EngineError> {
        self.guarded(|eng, fx| {
            let price = eng
                .registry
                .get(base, quote)
                .ok_or_else(|| EngineError::InvalidPair {
                    base: base.to_string(),
                    quote: quote.to_string(),
                })?
                .get_order(is_bid, order_id)
                .ok_or(OrderbookError::OrderNotFound(order_id))?
                .price;

            let refunded = eng.do_cancel(fx, sender, base, quote, is_bid, order_id, uid)?;

            let limit = if is_market {
                eng.synthetic_limit(base, quote, is_bid)?
            } else {
                price
            };
            eng.do_order(
                fx, sender, base, quote, limit, refunded, is_bid, is_maker, n, uid, sender,
            )
        })
    }

    /// Bridges native value into the wrapped token so it can be deposited
    /// through the normal path.
    pub fn wrap_native(&mut self, sender: &str, value: u128) -> Result<(), EngineError> {
        self.guarded(|eng, _fx| {
            if eng.config.wrapped_native.is_none() {
                return Err(EngineError::Ledger(LedgerError::NativeUnsupported));
            }
            eng.ledger.wrap_native(sender, value)?;
            Ok(())
        })
    }

    /// Mark price of the pair.
    pub fn mkt_price(&self, base: &str, quote: &str) -> Result<u128, EngineError> {
        let book = self
            .registry
            .get(base, quote)
            .ok_or_else(|| EngineError::InvalidPair {
                base: base.to_string(),
                quote: quote.to_string(),
            })?;
        book.mkt_price().map_err(|_| EngineError::NoLastMatchedPrice {
            base: base.to_string(),
            quote: quote.to_string(),
        })
    }

    /// Mark-price value of `amount`; identity for a same-token pair and 0
    /// for an unknown one.
    pub fn convert(&self, base: &str, quote: &str, amount: u128, is_bid: bool) -> u128 {
        if base == quote {
            return amount;
        }
        match self.registry.get(base, quote) {
            Some(book) => book.asset_value(amount, is_bid).unwrap_or(0),
            None => 0,
        }
    }

    pub fn heads(&self, base: &str, quote: &str) -> (u128, u128) {
        self.registry
            .get(base, quote)
            .map(|book| book.heads())
            .unwrap_or((0, 0))
    }

    /// Registers a pair. The registration is durable even when the
    /// enclosing operation later fails, so its event commits immediately.
    fn create_pair(&mut self, base: &str, quote: &str) -> Result<u64, EngineError> {
        let invalid = || EngineError::InvalidPair {
            base: base.to_string(),
            quote: quote.to_string(),
        };
        let base_decimals = self.tokens.decimals(base).ok_or_else(invalid)?;
        let quote_decimals = self.tokens.decimals(quote).ok_or_else(invalid)?;

        let id = self.registry.create(
            base,
            quote,
            base_decimals,
            quote_decimals,
            self.config.engine_id.clone(),
        )?;
        self.events.push(EngineEvent::PairAdded {
            orderbook: id,
            base: base.to_string(),
            quote: quote.to_string(),
            base_decimals,
            quote_decimals,
        });
        Ok(id)
    }

    /// Limit price a market order synthesizes: mark price plus the band
    /// for buys, minus it for sells.
    fn synthetic_limit(
        &mut self,
        base: &str,
        quote: &str,
        is_bid: bool,
    ) -> Result<u128, EngineError> {
        let book_id = match self.registry.id_of(base, quote) {
            Some(id) => id,
            None => self.create_pair(base, quote)?,
        };
        let mp = self
            .registry
            .get_by_id(book_id)
            .and_then(|book| book.mkt_price().ok())
            .ok_or_else(|| EngineError::NoLastMatchedPrice {
                base: base.to_string(),
                quote: quote.to_string(),
            })?;
        Ok(if is_bid { mp * 11 / 10 } else { mp * 9 / 10 })
    }

    /// Deposit, match, then decide the residual. Everything that can fail
    /// without external effect is checked before any asset moves.
    #[allow(clippy::too_many_arguments)]
    fn do_order(
        &mut self,
        fx: &mut Vec<EngineEvent>,
        sender: &str,
        base: &str,
        quote: &str,
        limit_price: u128,
        amount: u128,
        is_bid: bool,
        is_maker: bool,
        n: u32,
        uid: u32,
        recipient: &str,
    ) -> Result<OrderResult, EngineError> {
        if n > MAX_MATCHES {
            return Err(EngineError::TooManyMatches(n));
        }

        let book_id = match self.registry.id_of(base, quote) {
            Some(id) => id,
            None => self.create_pair(base, quote)?,
        };

        {
            let book = self.registry.get_by_id(book_id).ok_or_else(|| {
                EngineError::InvalidPair {
                    base: base.to_string(),
                    quote: quote.to_string(),
                }
            })?;
            check_order_size(book, limit_price, amount, is_bid)?;
            check_spread(book.lmp(), limit_price, is_bid)?;
        }

        let give = if is_bid { quote } else { base };
        let net = self.deposit(fx, sender, give, amount, is_maker, uid)?;

        let engine_id = self.config.engine_id.clone();
        let ledger = self.ledger.as_mut();
        let book = match self.registry.get_by_id_mut(book_id) {
            Some(book) => book,
            None => {
                return Err(EngineError::InvalidPair {
                    base: base.to_string(),
                    quote: quote.to_string(),
                })
            }
        };

        let (remaining, bid_head, ask_head) =
            limit_order(book, ledger, fx, &engine_id, net, recipient, is_bid, limit_price, n)?;
        let matched = net - remaining;

        let make_price = if is_bid {
            if ask_head == 0 { limit_price } else { limit_price.min(ask_head) }
        } else if bid_head == 0 {
            limit_price
        } else {
            limit_price.max(bid_head)
        };

        let (placed, order_id) = det_make(
            book, ledger, fx, &engine_id, sender, remaining, is_bid, make_price, is_maker,
            recipient,
        )?;

        Ok(OrderResult { make_price, matched, placed, order_id })
    }

    /// Fee assessment and the deposit movement: the oracle tier when the
    /// sender is reportable under `uid`, the flat default otherwise.
    fn deposit(
        &mut self,
        fx: &mut Vec<EngineEvent>,
        sender: &str,
        give: &str,
        amount: u128,
        is_maker: bool,
        uid: u32,
    ) -> Result<u128, EngineError> {
        let fee = if uid != 0 && self.accountant.is_reportable(sender, uid) {
            let numerator = self.accountant.fee_of(uid, is_maker) as u128;
            let fee = amount * numerator / FEE_DENOM;
            self.accountant.report(uid, give, amount, true)?;
            fee
        } else {
            amount / 100
        };

        let engine_account = self.config.engine_id.clone();
        self.ledger.transfer_from(give, sender, &engine_account, amount)?;
        self.ledger.transfer(give, &self.config.fee_to, fee)?;
        fx.push(EngineEvent::OrderDeposit {
            sender: sender.to_string(),
            asset: give.to_string(),
            fee,
        });

        Ok(amount - fee)
    }

    fn do_cancel(
        &mut self,
        fx: &mut Vec<EngineEvent>,
        sender: &str,
        base: &str,
        quote: &str,
        is_bid: bool,
        order_id: u32,
        uid: u32,
    ) -> Result<u128, EngineError> {
        let book_id = self
            .registry
            .id_of(base, quote)
            .ok_or_else(|| EngineError::InvalidPair {
                base: base.to_string(),
                quote: quote.to_string(),
            })?;

        let engine_id = self.config.engine_id.clone();
        let book = self.registry.get_by_id_mut(book_id).ok_or_else(|| {
            EngineError::InvalidPair {
                base: base.to_string(),
                quote: quote.to_string(),
            }
        })?;
        let res = book.cancel(&engine_id, is_bid, order_id, sender)?;
        let pair_id = book.pair().id;

        self.ledger
            .transfer(&res.transfer.token, &res.transfer.to, res.transfer.amount)?;
        fx.push(EngineEvent::OrderCanceled {
            orderbook: pair_id,
            id: order_id,
            is_bid,
            owner: res.owner,
            amount: res.refunded,
        });

        if uid != 0 && self.accountant.is_reportable(sender, uid) {
            self.accountant
                .report(uid, &res.transfer.token, res.refunded, false)?;
            self.accountant
                .refund_fee(sender, &res.transfer.token, res.refunded / 100)?;
        }

        Ok(res.refunded)
    }
}

/// Rejects orders whose converted value is within one minimum unit.
fn check_order_size(
    book: &Orderbook,
    price: u128,
    amount: u128,
    is_bid: bool,
) -> Result<(), EngineError> {
    let converted = book.convert(price, amount, !is_bid);
    let min_required = book.convert(price, 1, is_bid);
    if converted <= min_required {
        return Err(EngineError::OrderSizeTooSmall { amount: converted, min: min_required });
    }
    Ok(())
}

/// The ±10% band around the last matched price.
fn check_spread(lmp: u128, limit_price: u128, is_bid: bool) -> Result<(), EngineError> {
    if lmp == 0 {
        return Ok(());
    }
    if is_bid {
        let floor = lmp * 9 / 10;
        if limit_price < floor {
            return Err(EngineError::BidPriceTooLow { limit: limit_price, lmp, floor });
        }
    } else {
        let ceiling = lmp * 11 / 10;
        if limit_price > ceiling {
            return Err(EngineError::AskPriceTooHigh { limit: limit_price, lmp, ceiling });
        }
    }
    Ok(())
}

/// Walks the opposite side best-price-first while the limit allows,
/// consuming up to `n` resting orders. Returns the unmatched remainder and
/// both refreshed heads.
#[allow(clippy::too_many_arguments)]
fn limit_order(
    book: &mut Orderbook,
    ledger: &mut dyn Ledger,
    fx: &mut Vec<EngineEvent>,
    engine_id: &str,
    mut remaining: u128,
    recipient: &str,
    is_bid: bool,
    limit_price: u128,
    n: u32,
) -> Result<(u128, u128, u128), EngineError> {
    let mut i = 0u32;
    let mut lmp_local = 0u128;
    let mut opposite_head = book.clear_empty_head(engine_id, !is_bid)?;

    while remaining > 0
        && opposite_head != 0
        && (if is_bid { opposite_head <= limit_price } else { opposite_head >= limit_price })
        && i < n
    {
        lmp_local = opposite_head;
        let (rem, count) = match_at(
            book, ledger, fx, engine_id, recipient, is_bid, remaining, opposite_head, i, n,
        )?;
        remaining = rem;
        i = count;
        opposite_head = if i == 0 {
            0
        } else {
            book.clear_empty_head(engine_id, !is_bid)?
        };
    }

    if lmp_local != 0 {
        book.set_lmp(engine_id, lmp_local)?;
    } else {
        book.clear_empty_head(engine_id, is_bid)?;
    }

    let bid_head = book.clear_empty_head(engine_id, true)?;
    let ask_head = book.clear_empty_head(engine_id, false)?;
    Ok((remaining, bid_head, ask_head))
}

/// Consumes resting orders FIFO at one price level until the taker is
/// filled, the level empties, or the match budget runs out. A stale null
/// head consumes one budget slot and is skipped.
#[allow(clippy::too_many_arguments)]
fn match_at(
    book: &mut Orderbook,
    ledger: &mut dyn Ledger,
    fx: &mut Vec<EngineEvent>,
    engine_id: &str,
    recipient: &str,
    is_bid: bool,
    mut remaining: u128,
    price: u128,
    mut i: u32,
    n: u32,
) -> Result<(u128, u32), EngineError> {
    while remaining > 0 && !book.is_empty(!is_bid, price) && i < n {
        let pop = book.fpop(engine_id, !is_bid, price, remaining)?;

        if remaining <= pop.required {
            book.set_lmp(engine_id, price)?;
            let exec = book.execute(engine_id, pop.order_id, !is_bid, recipient, remaining, pop.clear)?;
            apply_transfers(ledger, &exec.transfers)?;
            fx.push(EngineEvent::OrderMatched {
                orderbook: book.pair().id,
                id: pop.order_id,
                is_bid: !is_bid,
                taker: recipient.to_string(),
                maker: exec.owner,
                price,
                amount: remaining,
            });
            return Ok((0, n));
        } else if pop.required == 0 {
            i += 1;
            continue;
        } else {
            remaining -= pop.required;
            let exec = book.execute(engine_id, pop.order_id, !is_bid, recipient, pop.required, pop.clear)?;
            apply_transfers(ledger, &exec.transfers)?;
            fx.push(EngineEvent::OrderMatched {
                orderbook: book.pair().id,
                id: pop.order_id,
                is_bid: !is_bid,
                taker: recipient.to_string(),
                maker: exec.owner,
                price,
                amount: pop.required,
            });
            i += 1;
        }
    }

    Ok((remaining, i))
}

/// Residual decision: rest it as a maker order at `make_price`, or refund
/// the recipient.
#[allow(clippy::too_many_arguments)]
fn det_make(
    book: &mut Orderbook,
    ledger: &mut dyn Ledger,
    fx: &mut Vec<EngineEvent>,
    engine_id: &str,
    sender: &str,
    remaining: u128,
    is_bid: bool,
    make_price: u128,
    is_maker: bool,
    recipient: &str,
) -> Result<(u128, u32), EngineError> {
    if remaining == 0 {
        return Ok((0, 0));
    }

    if is_maker {
        if make_price == 0 {
            return Err(EngineError::NoOrderMade {
                base: book.pair().base.clone(),
                quote: book.pair().quote.clone(),
            });
        }
        let id = if is_bid {
            book.place_bid(engine_id, sender, make_price, remaining)?
        } else {
            book.place_ask(engine_id, sender, make_price, remaining)?
        };
        fx.push(EngineEvent::OrderPlaced {
            orderbook: book.pair().id,
            id,
            owner: sender.to_string(),
            is_bid,
            price: make_price,
            amount: remaining,
        });
        Ok((remaining, id))
    } else {
        let give = if is_bid {
            book.pair().quote.clone()
        } else {
            book.pair().base.clone()
        };
        ledger.transfer(&give, recipient, remaining)?;
        Ok((0, 0))
    }
}

fn apply_transfers(
    ledger: &mut dyn Ledger,
    transfers: &[TransferInstruction],
) -> Result<(), EngineError> {
    for t in transfers {
        ledger.transfer(&t.token, &t.to, t.amount)?;
    }
    Ok(())
}
