use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PriceListError {
    #[error("price must be non-zero")]
    ZeroPrice,
    #[error(
        "no market price: bid_head={bid_head}, ask_head={ask_head}, last_matched_price={lmp}"
    )]
    NoMarketPrice { bid_head: u128, ask_head: u128, lmp: u128 },
}

/// Intrusive node of a sorted price linked list. `0` is the null link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PriceNode {
    pub prev: u128,
    pub next: u128,
}

/// Sorted doubly-linked price lists for one orderbook: bids descending,
/// asks ascending. Heads are the best prices on each side; `0` means the
/// side is empty. Also anchors the last matched price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PriceList {
    bid_nodes: BTreeMap<u128, PriceNode>,
    ask_nodes: BTreeMap<u128, PriceNode>,
    bid_head: u128,
    ask_head: u128,
    last_matched_price: u128,
}

impl PriceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lmp(&mut self, lmp: u128) {
        self.last_matched_price = lmp;
    }

    pub fn lmp(&self) -> u128 {
        self.last_matched_price
    }

    pub fn heads(&self) -> (u128, u128) {
        (self.bid_head, self.ask_head)
    }

    pub fn bid_head(&self) -> u128 {
        self.bid_head
    }

    pub fn ask_head(&self) -> u128 {
        self.ask_head
    }

    pub fn head(&self, is_bid: bool) -> u128 {
        if is_bid { self.bid_head } else { self.ask_head }
    }

    /// Mark price: the last matched price when one exists, otherwise the
    /// best available head.
    pub fn mkt_price(&self) -> Result<u128, PriceListError> {
        match (self.last_matched_price, self.bid_head, self.ask_head) {
            (0, 0, 0) => Err(PriceListError::NoMarketPrice {
                bid_head: 0,
                ask_head: 0,
                lmp: 0,
            }),
            (lmp, _, _) if lmp != 0 => Ok(lmp),
            (_, bid, _) if bid != 0 => Ok(bid),
            (_, _, ask) => Ok(ask),
        }
    }

    pub fn contains(&self, is_bid: bool, price: u128) -> bool {
        if is_bid {
            self.bid_nodes.contains_key(&price)
        } else {
            self.ask_nodes.contains_key(&price)
        }
    }

    /// Neighbor toward the tail, or `None` past the end.
    pub fn next(&self, is_bid: bool, price: u128) -> Option<u128> {
        let nodes = if is_bid { &self.bid_nodes } else { &self.ask_nodes };
        nodes.get(&price).map(|n| n.next).filter(|next| *next != 0)
    }

    /// Inserts `price` into the side's sorted list. Idempotent: an already
    /// listed price is a no-op. Walks from the head, so activity clustered
    /// near the top of book stays cheap.
    pub fn insert(&mut self, is_bid: bool, price: u128) -> Result<(), PriceListError> {
        if price == 0 {
            return Err(PriceListError::ZeroPrice);
        }

        if is_bid {
            self.insert_bid(price);
        } else {
            self.insert_ask(price);
        }
        Ok(())
    }

    fn insert_bid(&mut self, price: u128) {
        if self.bid_head == 0 || price > self.bid_head {
            let old_head = self.bid_head;
            if old_head != 0 {
                if let Some(node) = self.bid_nodes.get_mut(&old_head) {
                    node.prev = price;
                }
            }
            self.bid_nodes.insert(price, PriceNode { prev: 0, next: old_head });
            self.bid_head = price;
            return;
        }

        // Descending order: walk until the next price is below the new one.
        let mut current = self.bid_head;
        loop {
            if current == price {
                return;
            }
            let next = self.bid_nodes.get(&current).map(|n| n.next).unwrap_or(0);
            if next != 0 && next > price {
                current = next;
                continue;
            }
            if next == price {
                return;
            }
            self.link_after(true, current, price, next);
            return;
        }
    }

    fn insert_ask(&mut self, price: u128) {
        if self.ask_head == 0 || price < self.ask_head {
            let old_head = self.ask_head;
            if old_head != 0 {
                if let Some(node) = self.ask_nodes.get_mut(&old_head) {
                    node.prev = price;
                }
            }
            self.ask_nodes.insert(price, PriceNode { prev: 0, next: old_head });
            self.ask_head = price;
            return;
        }

        // Ascending order: walk until the next price is above the new one.
        let mut current = self.ask_head;
        loop {
            if current == price {
                return;
            }
            let next = self.ask_nodes.get(&current).map(|n| n.next).unwrap_or(0);
            if next != 0 && next < price {
                current = next;
                continue;
            }
            if next == price {
                return;
            }
            self.link_after(false, current, price, next);
            return;
        }
    }

    fn link_after(&mut self, is_bid: bool, current: u128, price: u128, next: u128) {
        let nodes = if is_bid { &mut self.bid_nodes } else { &mut self.ask_nodes };
        if let Some(node) = nodes.get_mut(&current) {
            node.next = price;
        }
        if next != 0 {
            if let Some(node) = nodes.get_mut(&next) {
                node.prev = price;
            }
        }
        nodes.insert(price, PriceNode { prev: current, next });
    }

    /// Pops the head of the side and returns the new head (0 when the list
    /// runs empty).
    pub fn clear_head(&mut self, is_bid: bool) -> u128 {
        let head = if is_bid { self.bid_head } else { self.ask_head };
        if head == 0 {
            return 0;
        }

        let nodes = if is_bid { &mut self.bid_nodes } else { &mut self.ask_nodes };
        let next = nodes.remove(&head).map(|n| n.next).unwrap_or(0);
        if next != 0 {
            if let Some(node) = nodes.get_mut(&next) {
                node.prev = 0;
            }
        }

        if is_bid {
            self.bid_head = next;
            self.bid_head
        } else {
            self.ask_head = next;
            self.ask_head
        }
    }

    /// Unlinks `price` from the side's list. Returns whether the price was
    /// present; a missing price is not an error.
    pub fn delete(&mut self, is_bid: bool, price: u128) -> Result<bool, PriceListError> {
        if price == 0 {
            return Err(PriceListError::ZeroPrice);
        }

        let nodes = if is_bid { &mut self.bid_nodes } else { &mut self.ask_nodes };
        let node = match nodes.remove(&price) {
            Some(node) => node,
            None => return Ok(false),
        };

        if node.prev != 0 {
            if let Some(prev) = nodes.get_mut(&node.prev) {
                prev.next = node.next;
            }
        } else if is_bid {
            self.bid_head = node.next;
        } else {
            self.ask_head = node.next;
        }

        if node.next != 0 {
            let nodes = if is_bid { &mut self.bid_nodes } else { &mut self.ask_nodes };
            if let Some(next) = nodes.get_mut(&node.next) {
                next.prev = node.prev;
            }
        }

        Ok(true)
    }

    /// Collects up to `n` prices from the head of the side.
    pub fn get_prices(&self, is_bid: bool, n: usize) -> Vec<u128> {
        let mut prices = Vec::with_capacity(n);
        let nodes = if is_bid { &self.bid_nodes } else { &self.ask_nodes };
        let mut current = self.head(is_bid);

        while current != 0 && prices.len() < n {
            prices.push(current);
            current = nodes.get(&current).map(|node| node.next).unwrap_or(0);
        }

        prices
    }

    /// Collects prices within the `[start, end)` window from the head.
    pub fn get_prices_paginated(&self, is_bid: bool, start: usize, end: usize) -> Vec<u128> {
        if start >= end {
            return Vec::new();
        }

        let nodes = if is_bid { &self.bid_nodes } else { &self.ask_nodes };
        let mut current = self.head(is_bid);
        let mut index = 0;

        while current != 0 && index < start {
            current = nodes.get(&current).map(|node| node.next).unwrap_or(0);
            index += 1;
        }

        let mut result = Vec::with_capacity(end - start);
        while current != 0 && index < end {
            result.push(current);
            current = nodes.get(&current).map(|node| node.next).unwrap_or(0);
            index += 1;
        }

        result
    }

    pub fn len(&self, is_bid: bool) -> usize {
        if is_bid { self.bid_nodes.len() } else { self.ask_nodes.len() }
    }

    pub fn is_empty(&self, is_bid: bool) -> bool {
        self.head(is_bid) == 0
    }
}
