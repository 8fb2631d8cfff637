use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// A resting order. The side is implied by which queue holds it; `price`
/// doubles as the sidecar that locates the order without a queue scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub owner: String,
    pub price: u128,
    pub deposit_amount: u128,
}

impl Order {
    pub fn new(owner: impl Into<String>, price: u128, deposit_amount: u128) -> Self {
        Self {
            owner: owner.into(),
            price,
            deposit_amount,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderQueueError {
    #[error("order id is zero")]
    OrderIdIsZero,
    #[error("price is zero")]
    PriceIsZero,
    #[error("order does not exist: {0}")]
    OrderDoesNotExist(u32),
    #[error("order id space exhausted")]
    OrderIdExhausted,
}

/// Intrusive FIFO node. `0` is the null link; order id 0 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
struct OrderNode {
    prev: u32,
    next: u32,
}

/// Per-side order storage: an `id -> Order` index plus one FIFO linked
/// list per price level (append at tail, consume at head). Ids are
/// assigned monotonically and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrderQueue {
    /// Order details keyed by id.
    orders: HashMap<u32, Order>,
    /// Linkage of live queued orders keyed by id.
    nodes: HashMap<u32, OrderNode>,
    /// Mapping price -> head of the FIFO at that level.
    head: BTreeMap<u128, u32>,
    /// Mapping price -> tail of the FIFO at that level.
    tail: BTreeMap<u128, u32>,
    /// Sequential counter for new order ids.
    count: u32,
}

impl OrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_price(price: u128) -> Result<(), OrderQueueError> {
        if price == 0 {
            Err(OrderQueueError::PriceIsZero)
        } else {
            Ok(())
        }
    }

    /// Creates a new order record, assigning the next id. The order is not
    /// linked into its price level until `insert_id`.
    pub fn create_order(
        &mut self,
        owner: impl Into<String>,
        price: u128,
        deposit_amount: u128,
    ) -> Result<u32, OrderQueueError> {
        Self::ensure_price(price)?;

        self.count = self
            .count
            .checked_add(1)
            .ok_or(OrderQueueError::OrderIdExhausted)?;
        self.orders
            .insert(self.count, Order::new(owner, price, deposit_amount));
        Ok(self.count)
    }

    /// Appends an order id at the tail of its price level (arrival FIFO).
    /// A zero amount is a silent no-op.
    pub fn insert_id(&mut self, price: u128, id: u32, amount: u128) -> Result<(), OrderQueueError> {
        Self::ensure_price(price)?;
        if id == 0 {
            return Err(OrderQueueError::OrderIdIsZero);
        }
        if amount == 0 {
            return Ok(());
        }
        if !self.orders.contains_key(&id) {
            return Err(OrderQueueError::OrderDoesNotExist(id));
        }

        match self.tail.get(&price).copied() {
            Some(tail_id) => {
                self.nodes.insert(id, OrderNode { prev: tail_id, next: 0 });
                if let Some(tail_node) = self.nodes.get_mut(&tail_id) {
                    tail_node.next = id;
                }
                self.tail.insert(price, id);
            }
            None => {
                self.nodes.insert(id, OrderNode { prev: 0, next: 0 });
                self.head.insert(price, id);
                self.tail.insert(price, id);
            }
        }

        Ok(())
    }

    /// Removes and returns the head order id at the given price level. The
    /// order record itself stays until `decrease_order`/`delete_order`
    /// settles it.
    pub fn pop_front(&mut self, price: u128) -> Option<u32> {
        let head_id = self.head.get(&price).copied()?;
        let next = self.nodes.remove(&head_id).map(|n| n.next).unwrap_or(0);

        if next == 0 {
            self.head.remove(&price);
            self.tail.remove(&price);
        } else {
            if let Some(next_node) = self.nodes.get_mut(&next) {
                next_node.prev = 0;
            }
            self.head.insert(price, next);
        }

        Some(head_id)
    }

    /// Decreases an order's deposit by `amount`. When the remainder falls
    /// to the dust threshold or `clear` is set, the whole deposit is paid
    /// out and the order is deleted.
    ///
    /// Returns `(amount_paid, emptied_price)` where `emptied_price` is
    /// `Some` when the deletion left the price level empty.
    pub fn decrease_order(
        &mut self,
        id: u32,
        amount: u128,
        dust: u128,
        clear: bool,
    ) -> Result<(u128, Option<u128>), OrderQueueError> {
        if id == 0 {
            return Err(OrderQueueError::OrderIdIsZero);
        }

        let (amount_paid, should_delete) = match self.orders.get_mut(&id) {
            Some(order) => {
                let original = order.deposit_amount;
                let paid = amount.min(original);
                let decreased = original - paid;

                if clear || decreased <= dust {
                    (original, true)
                } else {
                    order.deposit_amount = decreased;
                    (paid, false)
                }
            }
            None => return Ok((0, None)),
        };

        if should_delete {
            let emptied = self.delete_order(id)?;
            Ok((amount_paid, emptied))
        } else {
            Ok((amount_paid, None))
        }
    }

    /// Deletes an order, unlinking it from its price level. Returns the
    /// price when the level became empty. An order already unlinked by
    /// `pop_front` is simply dropped from the index.
    pub fn delete_order(&mut self, id: u32) -> Result<Option<u128>, OrderQueueError> {
        let price = self
            .orders
            .get(&id)
            .ok_or(OrderQueueError::OrderDoesNotExist(id))?
            .price;

        let node = match self.nodes.remove(&id) {
            Some(node) => node,
            None => {
                // Popped earlier; only the record remains.
                self.orders.remove(&id);
                return Ok(None);
            }
        };

        let mut emptied = None;
        match (node.prev, node.next) {
            (0, 0) => {
                self.head.remove(&price);
                self.tail.remove(&price);
                emptied = Some(price);
            }
            (0, next) => {
                if let Some(next_node) = self.nodes.get_mut(&next) {
                    next_node.prev = 0;
                }
                self.head.insert(price, next);
            }
            (prev, 0) => {
                if let Some(prev_node) = self.nodes.get_mut(&prev) {
                    prev_node.next = 0;
                }
                self.tail.insert(price, prev);
            }
            (prev, next) => {
                if let Some(prev_node) = self.nodes.get_mut(&prev) {
                    prev_node.next = next;
                }
                if let Some(next_node) = self.nodes.get_mut(&next) {
                    next_node.prev = prev;
                }
            }
        }

        self.orders.remove(&id);
        Ok(emptied)
    }

    pub fn head(&self, price: u128) -> Option<u32> {
        self.head.get(&price).copied()
    }

    pub fn is_empty(&self, price: u128) -> bool {
        self.head.get(&price).is_none()
    }

    pub fn next(&self, id: u32) -> Option<u32> {
        self.nodes.get(&id).map(|n| n.next).filter(|next| *next != 0)
    }

    pub fn get_order(&self, id: u32) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// The id the next `create_order` would assign.
    pub fn next_make_id(&self) -> u32 {
        self.count.saturating_add(1)
    }

    /// Collects up to `n` order ids from the front of the price level.
    pub fn get_order_ids(&self, price: u128, n: u32) -> Vec<u32> {
        let mut result = Vec::with_capacity(n as usize);
        let mut current = self.head.get(&price).copied().unwrap_or(0);

        while current != 0 && (result.len() as u32) < n {
            result.push(current);
            current = self.nodes.get(&current).map(|node| node.next).unwrap_or(0);
        }

        result
    }

    /// Collects up to `n` orders from the front of the price level.
    pub fn get_orders(&self, price: u128, n: u32) -> Vec<Order> {
        self.get_order_ids(price, n)
            .into_iter()
            .filter_map(|id| self.orders.get(&id).cloned())
            .collect()
    }

    /// Collects orders within the `[start, end)` window of the price level.
    pub fn get_orders_paginated(&self, price: u128, start: u32, end: u32) -> Vec<Order> {
        if start >= end {
            return Vec::new();
        }

        let mut index = 0;
        let mut current = self.head.get(&price).copied().unwrap_or(0);
        let mut result = Vec::with_capacity((end - start) as usize);

        while current != 0 && index < start {
            current = self.nodes.get(&current).map(|node| node.next).unwrap_or(0);
            index += 1;
        }

        while current != 0 && index < end {
            if let Some(order) = self.orders.get(&current) {
                result.push(order.clone());
            }
            current = self.nodes.get(&current).map(|node| node.next).unwrap_or(0);
            index += 1;
        }

        result
    }
}
