use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::orderbook::{Orderbook, OrderbookError, Pair};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("pair exists: base={base}, quote={quote}")]
    PairExists { base: String, quote: String },
    #[error(transparent)]
    Orderbook(#[from] OrderbookError),
}

/// Append-only store of orderbooks with a `(base, quote) -> id` mapping.
/// `(A, B)` and `(B, A)` are distinct pairs; nothing here ever swaps them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrderbookRegistry {
    books: Vec<Orderbook>,
    ids: HashMap<(String, String), u64>,
}

impl OrderbookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the orderbook for `(base, quote)`, assigning the next id.
    pub fn create(
        &mut self,
        base: impl Into<String>,
        quote: impl Into<String>,
        base_decimals: u8,
        quote_decimals: u8,
        engine: impl Into<String>,
    ) -> Result<u64, RegistryError> {
        let base = base.into();
        let quote = quote.into();
        if self.ids.contains_key(&(base.clone(), quote.clone())) {
            return Err(RegistryError::PairExists { base, quote });
        }

        let id = self.books.len() as u64;
        let pair = Pair {
            id,
            base: base.clone(),
            quote: quote.clone(),
            engine: engine.into(),
        };
        let book = Orderbook::new(pair, base_decimals, quote_decimals)?;
        self.books.push(book);
        self.ids.insert((base, quote), id);
        Ok(id)
    }

    pub fn id_of(&self, base: &str, quote: &str) -> Option<u64> {
        self.ids.get(&(base.to_string(), quote.to_string())).copied()
    }

    pub fn get(&self, base: &str, quote: &str) -> Option<&Orderbook> {
        self.id_of(base, quote).and_then(|id| self.get_by_id(id))
    }

    pub fn get_mut(&mut self, base: &str, quote: &str) -> Option<&mut Orderbook> {
        let id = self.id_of(base, quote)?;
        self.get_by_id_mut(id)
    }

    pub fn get_by_id(&self, id: u64) -> Option<&Orderbook> {
        self.books.get(id as usize)
    }

    pub fn get_by_id_mut(&mut self, id: u64) -> Option<&mut Orderbook> {
        self.books.get_mut(id as usize)
    }

    /// Pairs within the `[start, end)` id window.
    pub fn enumerate(&self, start: u64, end: u64) -> Vec<Pair> {
        if start >= end {
            return Vec::new();
        }
        self.books
            .iter()
            .skip(start as usize)
            .take((end - start) as usize)
            .map(|book| book.pair().clone())
            .collect()
    }

    pub fn pair_count(&self) -> usize {
        self.books.len()
    }

    pub fn has_pair(&self, base: &str, quote: &str) -> bool {
        self.id_of(base, quote).is_some()
    }
}
