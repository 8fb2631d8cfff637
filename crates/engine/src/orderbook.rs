use serde::{Deserialize, Serialize};

use crate::order_queue::{Order, OrderQueue, OrderQueueError};
use crate::price_list::{PriceList, PriceListError};
use crate::PRICE_SCALE;

/// Identity of one trading pair. `engine` is the id of the owning matching
/// engine; every mutation checks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub id: u64,
    pub base: String,
    pub quote: String,
    pub engine: String,
}

/// A pending asset movement for the engine to apply against the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInstruction {
    pub token: String,
    pub to: String,
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FPopResult {
    pub order_id: u32,
    pub required: u128,
    pub clear: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub owner: String,
    pub price: u128,
    /// Counter-asset paid to the recipient, then the taker's asset paid to
    /// the resting owner, in that order.
    pub transfers: Vec<TransferInstruction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelResult {
    pub refunded: u128,
    pub price: u128,
    pub owner: String,
    pub transfer: TransferInstruction,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderbookError {
    #[error(transparent)]
    PriceList(#[from] PriceListError),
    #[error(transparent)]
    OrderQueue(#[from] OrderQueueError),
    #[error("invalid decimals: base={base}, quote={quote}")]
    InvalidDecimals { base: u8, quote: u8 },
    #[error("invalid access: sender={sender}, expected={expected}")]
    InvalidAccess { sender: String, expected: String },
    #[error("unauthorized: sender={sender}, owner={owner}")]
    Unauthorized { sender: String, owner: String },
    #[error("order not found: {0}")]
    OrderNotFound(u32),
    #[error("price is zero")]
    PriceIsZero,
}

/// One central limit order book: the sorted price lists, the two FIFO order
/// stores, and the decimal normalization recorded at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orderbook {
    pair: Pair,
    /// `10^|dec(base) - dec(quote)|`.
    dec_diff: u128,
    base_dec_ge_quote: bool,
    prices: PriceList,
    bids: OrderQueue,
    asks: OrderQueue,
}

impl Orderbook {
    pub fn new(
        pair: Pair,
        base_decimals: u8,
        quote_decimals: u8,
    ) -> Result<Self, OrderbookError> {
        if base_decimals > 18 || quote_decimals > 18 {
            return Err(OrderbookError::InvalidDecimals {
                base: base_decimals,
                quote: quote_decimals,
            });
        }

        let (diff, base_dec_ge_quote) = absdiff(base_decimals, quote_decimals);
        Ok(Self {
            pair,
            dec_diff: 10u128.pow(diff as u32),
            base_dec_ge_quote,
            prices: PriceList::new(),
            bids: OrderQueue::new(),
            asks: OrderQueue::new(),
        })
    }

    fn ensure_engine(&self, caller: &str) -> Result<(), OrderbookError> {
        if caller != self.pair.engine {
            return Err(OrderbookError::InvalidAccess {
                sender: caller.to_string(),
                expected: self.pair.engine.clone(),
            });
        }
        Ok(())
    }

    fn queue(&self, is_bid: bool) -> &OrderQueue {
        if is_bid { &self.bids } else { &self.asks }
    }

    fn queue_mut(&mut self, is_bid: bool) -> &mut OrderQueue {
        if is_bid { &mut self.bids } else { &mut self.asks }
    }

    /// The asset a resting order on the given side deposited.
    fn deposit_asset(&self, is_bid: bool) -> &str {
        if is_bid { &self.pair.quote } else { &self.pair.base }
    }

    pub fn place_ask(
        &mut self,
        caller: &str,
        owner: impl Into<String>,
        price: u128,
        amount: u128,
    ) -> Result<u32, OrderbookError> {
        self.ensure_engine(caller)?;
        self.clear_empty_head_inner(false);

        let id = self.asks.create_order(owner, price, amount)?;
        if self.asks.is_empty(price) {
            self.prices.insert(false, price)?;
        }
        self.asks.insert_id(price, id, amount)?;
        Ok(id)
    }

    pub fn place_bid(
        &mut self,
        caller: &str,
        owner: impl Into<String>,
        price: u128,
        amount: u128,
    ) -> Result<u32, OrderbookError> {
        self.ensure_engine(caller)?;
        self.clear_empty_head_inner(true);

        let id = self.bids.create_order(owner, price, amount)?;
        if self.bids.is_empty(price) {
            self.prices.insert(true, price)?;
        }
        self.bids.insert_id(price, id, amount)?;
        Ok(id)
    }

    /// Cancels an order after verifying the requester owns it. Returns the
    /// refund movement for the engine to apply.
    pub fn cancel(
        &mut self,
        caller: &str,
        is_bid: bool,
        order_id: u32,
        requester: &str,
    ) -> Result<CancelResult, OrderbookError> {
        self.ensure_engine(caller)?;

        let order = self
            .queue(is_bid)
            .get_order(order_id)
            .cloned()
            .ok_or(OrderbookError::OrderNotFound(order_id))?;
        if order.owner != requester {
            return Err(OrderbookError::Unauthorized {
                sender: requester.to_string(),
                owner: order.owner,
            });
        }

        let emptied = self.queue_mut(is_bid).delete_order(order_id)?;
        if let Some(price) = emptied {
            self.prices.delete(is_bid, price)?;
        }

        let token = self.deposit_asset(is_bid).to_string();
        Ok(CancelResult {
            refunded: order.deposit_amount,
            price: order.price,
            owner: order.owner.clone(),
            transfer: TransferInstruction {
                token,
                to: order.owner,
                amount: order.deposit_amount,
            },
        })
    }

    /// Front-pop probe at a price level on the given side: the head order
    /// id, the amount of the taker's asset needed to consume it entirely,
    /// and whether this pop cleared the order out of its queue. The head is
    /// popped only when `remaining` can fully consume it.
    pub fn fpop(
        &mut self,
        caller: &str,
        is_bid: bool,
        price: u128,
        remaining: u128,
    ) -> Result<FPopResult, OrderbookError> {
        self.ensure_engine(caller)?;

        let order_id = match self.queue(is_bid).head(price) {
            Some(id) => id,
            None => {
                return Ok(FPopResult { order_id: 0, required: 0, clear: false });
            }
        };

        let deposit = self
            .queue(is_bid)
            .get_order(order_id)
            .ok_or(OrderbookError::OrderNotFound(order_id))?
            .deposit_amount;
        let required = self.convert(price, deposit, !is_bid);

        if required <= remaining {
            let queue = self.queue_mut(is_bid);
            queue.pop_front(price);
            if queue.is_empty(price) {
                self.prices.delete(is_bid, price)?;
            }
            return Ok(FPopResult { order_id, required, clear: true });
        }

        Ok(FPopResult { order_id, required, clear: false })
    }

    /// Settles `amount` of the taker's asset against the resting order on
    /// the `is_bid` side. Decrements the resting deposit by the converted
    /// amount and returns the two asset movements: counter-asset to the
    /// recipient, taker's asset to the resting owner.
    pub fn execute(
        &mut self,
        caller: &str,
        order_id: u32,
        is_bid: bool,
        recipient: &str,
        amount: u128,
        clear: bool,
    ) -> Result<ExecutionResult, OrderbookError> {
        self.ensure_engine(caller)?;

        let order = self
            .queue(is_bid)
            .get_order(order_id)
            .cloned()
            .ok_or(OrderbookError::OrderNotFound(order_id))?;

        let converted = self.convert(order.price, amount, is_bid);
        let dust = self.convert(order.price, 1, is_bid);

        let (paid, emptied) =
            self.queue_mut(is_bid)
                .decrease_order(order_id, converted, dust, clear)?;
        if let Some(price) = emptied {
            self.prices.delete(is_bid, price)?;
        }

        let (counter_asset, taker_asset) = if is_bid {
            (self.pair.quote.clone(), self.pair.base.clone())
        } else {
            (self.pair.base.clone(), self.pair.quote.clone())
        };

        Ok(ExecutionResult {
            owner: order.owner.clone(),
            price: order.price,
            transfers: vec![
                TransferInstruction {
                    token: counter_asset,
                    to: recipient.to_string(),
                    amount: paid,
                },
                TransferInstruction {
                    token: taker_asset,
                    to: order.owner,
                    amount,
                },
            ],
        })
    }

    pub fn set_lmp(&mut self, caller: &str, price: u128) -> Result<(), OrderbookError> {
        self.ensure_engine(caller)?;
        if price == 0 {
            return Err(OrderbookError::PriceIsZero);
        }
        self.prices.set_lmp(price);
        Ok(())
    }

    /// Pops price-list heads whose queues hold no live order; returns the
    /// resulting head (0 when the side is empty).
    pub fn clear_empty_head(&mut self, caller: &str, is_bid: bool) -> Result<u128, OrderbookError> {
        self.ensure_engine(caller)?;
        Ok(self.clear_empty_head_inner(is_bid))
    }

    fn clear_empty_head_inner(&mut self, is_bid: bool) -> u128 {
        let mut head = self.prices.head(is_bid);

        loop {
            if head == 0 {
                break;
            }
            if self.queue(is_bid).head(head).is_some() {
                break;
            }
            head = self.prices.clear_head(is_bid);
        }

        head
    }

    /// Decimal-normalized fixed-point conversion at `price`. With the flag
    /// set the amount is taken in base and priced into quote; unset, in
    /// quote and priced into base. Integer truncation throughout.
    pub fn convert(&self, price: u128, amount: u128, base_to_quote: bool) -> u128 {
        if price == 0 {
            return 0;
        }

        if base_to_quote {
            if self.base_dec_ge_quote {
                ((amount * price) / PRICE_SCALE) / self.dec_diff
            } else {
                ((amount * price) / PRICE_SCALE) * self.dec_diff
            }
        } else if self.base_dec_ge_quote {
            ((amount * PRICE_SCALE) / price) * self.dec_diff
        } else {
            ((amount * PRICE_SCALE) / price) / self.dec_diff
        }
    }

    /// Converts `amount` at the mark price.
    pub fn asset_value(&self, amount: u128, is_bid: bool) -> Result<u128, OrderbookError> {
        let price = self.prices.mkt_price()?;
        Ok(self.convert(price, amount, is_bid))
    }

    pub fn mkt_price(&self) -> Result<u128, OrderbookError> {
        Ok(self.prices.mkt_price()?)
    }

    pub fn pair(&self) -> &Pair {
        &self.pair
    }

    /// Display name, `base/quote`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.pair.base, self.pair.quote)
    }

    pub fn lmp(&self) -> u128 {
        self.prices.lmp()
    }

    pub fn heads(&self) -> (u128, u128) {
        self.prices.heads()
    }

    pub fn bid_head(&self) -> u128 {
        self.prices.bid_head()
    }

    pub fn ask_head(&self) -> u128 {
        self.prices.ask_head()
    }

    pub fn is_empty(&self, is_bid: bool, price: u128) -> bool {
        self.queue(is_bid).is_empty(price)
    }

    pub fn order_head(&self, is_bid: bool, price: u128) -> Option<u32> {
        self.queue(is_bid).head(price)
    }

    pub fn get_order(&self, is_bid: bool, order_id: u32) -> Option<&Order> {
        self.queue(is_bid).get_order(order_id)
    }

    pub fn next_make_id(&self, is_bid: bool) -> u32 {
        self.queue(is_bid).next_make_id()
    }

    pub fn get_prices(&self, is_bid: bool, n: usize) -> Vec<u128> {
        self.prices.get_prices(is_bid, n)
    }

    pub fn get_prices_paginated(&self, is_bid: bool, start: usize, end: usize) -> Vec<u128> {
        self.prices.get_prices_paginated(is_bid, start, end)
    }

    pub fn next_price(&self, is_bid: bool, price: u128) -> Option<u128> {
        self.prices.next(is_bid, price)
    }

    pub fn get_order_ids(&self, is_bid: bool, price: u128, n: u32) -> Vec<u32> {
        self.queue(is_bid).get_order_ids(price, n)
    }

    pub fn get_orders(&self, is_bid: bool, price: u128, n: u32) -> Vec<Order> {
        self.queue(is_bid).get_orders(price, n)
    }

    pub fn get_orders_paginated(
        &self,
        is_bid: bool,
        price: u128,
        start: u32,
        end: u32,
    ) -> Vec<Order> {
        self.queue(is_bid).get_orders_paginated(price, start, end)
    }

    pub fn next_order(&self, is_bid: bool, order_id: u32) -> Option<u32> {
        self.queue(is_bid).next(order_id)
    }
}

fn absdiff(a: u8, b: u8) -> (u8, bool) {
    if a > b { (a - b, true) } else { (b - a, false) }
}
