use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient balance: token={token}, account={account}, have={have}, need={need}")]
    InsufficientBalance {
        token: String,
        account: String,
        have: u128,
        need: u128,
    },
    #[error("native value not supported by this deployment")]
    NativeUnsupported,
}

/// Fungible balance movement capability the engine settles against.
/// `transfer` spends from the engine's own holdings; `transfer_from` pulls
/// a third party's balance.
pub trait Ledger: Send {
    fn transfer(&mut self, token: &str, to: &str, amount: u128) -> Result<(), LedgerError>;

    fn transfer_from(
        &mut self,
        token: &str,
        from: &str,
        to: &str,
        amount: u128,
    ) -> Result<(), LedgerError>;

    /// Bridges `value` of the caller's native balance into the wrapped
    /// token so it can flow through the normal token path.
    fn wrap_native(&mut self, owner: &str, value: u128) -> Result<(), LedgerError>;
}

/// Token metadata lookups.
pub trait TokenInfo: Send {
    /// Native precision of the token; `None` for unknown tokens.
    fn decimals(&self, token: &str) -> Option<u8>;

    fn symbol(&self, token: &str) -> String {
        token.to_string()
    }
}

/// In-memory balance book: `(token, account) -> balance` plus a native
/// balance table for wrapping. The `vault` account is the engine's own
/// holding, spent by `transfer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLedger {
    vault: String,
    wrapped_native: String,
    balances: HashMap<(String, String), u128>,
    native: HashMap<String, u128>,
    decimals: HashMap<String, u8>,
}

impl MemoryLedger {
    pub fn new(vault: impl Into<String>, wrapped_native: impl Into<String>) -> Self {
        Self {
            vault: vault.into(),
            wrapped_native: wrapped_native.into(),
            balances: HashMap::new(),
            native: HashMap::new(),
            decimals: HashMap::new(),
        }
    }

    pub fn register_token(&mut self, token: impl Into<String>, decimals: u8) {
        self.decimals.insert(token.into(), decimals);
    }

    pub fn credit(&mut self, token: impl Into<String>, account: impl Into<String>, amount: u128) {
        let entry = self
            .balances
            .entry((token.into(), account.into()))
            .or_insert(0);
        *entry += amount;
    }

    pub fn credit_native(&mut self, account: impl Into<String>, amount: u128) {
        *self.native.entry(account.into()).or_insert(0) += amount;
    }

    pub fn balance_of(&self, token: &str, account: &str) -> u128 {
        self.balances
            .get(&(token.to_string(), account.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn native_balance_of(&self, account: &str) -> u128 {
        self.native.get(account).copied().unwrap_or(0)
    }

    /// Total of one token across all accounts, for conservation checks.
    pub fn total_supply(&self, token: &str) -> u128 {
        self.balances
            .iter()
            .filter(|((t, _), _)| t == token)
            .map(|(_, amount)| amount)
            .sum()
    }

    fn debit(&mut self, token: &str, account: &str, amount: u128) -> Result<(), LedgerError> {
        let key = (token.to_string(), account.to_string());
        let have = self.balances.get(&key).copied().unwrap_or(0);
        if have < amount {
            return Err(LedgerError::InsufficientBalance {
                token: token.to_string(),
                account: account.to_string(),
                have,
                need: amount,
            });
        }
        self.balances.insert(key, have - amount);
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    fn transfer(&mut self, token: &str, to: &str, amount: u128) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        let vault = self.vault.clone();
        self.debit(token, &vault, amount)?;
        self.credit(token, to, amount);
        Ok(())
    }

    fn transfer_from(
        &mut self,
        token: &str,
        from: &str,
        to: &str,
        amount: u128,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        self.debit(token, from, amount)?;
        self.credit(token, to, amount);
        Ok(())
    }

    fn wrap_native(&mut self, owner: &str, value: u128) -> Result<(), LedgerError> {
        let have = self.native.get(owner).copied().unwrap_or(0);
        if have < value {
            return Err(LedgerError::InsufficientBalance {
                token: "native".to_string(),
                account: owner.to_string(),
                have,
                need: value,
            });
        }
        self.native.insert(owner.to_string(), have - value);
        let wrapped = self.wrapped_native.clone();
        self.credit(wrapped, owner, value);
        Ok(())
    }
}

impl TokenInfo for MemoryLedger {
    fn decimals(&self, token: &str) -> Option<u8> {
        self.decimals.get(token).copied()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Shared handles, so a caller can keep inspecting balances after handing
// the capability to the engine.
impl<T: Ledger> Ledger for Arc<Mutex<T>> {
    fn transfer(&mut self, token: &str, to: &str, amount: u128) -> Result<(), LedgerError> {
        lock(self).transfer(token, to, amount)
    }

    fn transfer_from(
        &mut self,
        token: &str,
        from: &str,
        to: &str,
        amount: u128,
    ) -> Result<(), LedgerError> {
        lock(self).transfer_from(token, from, to, amount)
    }

    fn wrap_native(&mut self, owner: &str, value: u128) -> Result<(), LedgerError> {
        lock(self).wrap_native(owner, value)
    }
}

impl<T: TokenInfo> TokenInfo for Arc<Mutex<T>> {
    fn decimals(&self, token: &str) -> Option<u8> {
        lock(self).decimals(token)
    }

    fn symbol(&self, token: &str) -> String {
        lock(self).symbol(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_from_moves_balances() {
        let mut ledger = MemoryLedger::new("engine", "WETH");
        ledger.credit("TKN", "alice", 100);

        ledger.transfer_from("TKN", "alice", "engine", 60).unwrap();
        assert_eq!(ledger.balance_of("TKN", "alice"), 40);
        assert_eq!(ledger.balance_of("TKN", "engine"), 60);
    }

    #[test]
    fn transfer_spends_the_vault() {
        let mut ledger = MemoryLedger::new("engine", "WETH");
        ledger.credit("TKN", "engine", 50);
        ledger.transfer("TKN", "bob", 20).unwrap();
        assert_eq!(ledger.balance_of("TKN", "engine"), 30);
        assert_eq!(ledger.balance_of("TKN", "bob"), 20);
    }

    #[test]
    fn overdraft_rejected() {
        let mut ledger = MemoryLedger::new("engine", "WETH");
        ledger.credit("TKN", "alice", 10);
        let err = ledger.transfer_from("TKN", "alice", "engine", 11).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    }

    #[test]
    fn wrap_native_credits_wrapped_token() {
        let mut ledger = MemoryLedger::new("engine", "WETH");
        ledger.credit_native("alice", 5);
        ledger.wrap_native("alice", 3).unwrap();
        assert_eq!(ledger.native_balance_of("alice"), 2);
        assert_eq!(ledger.balance_of("WETH", "alice"), 3);
    }

    #[test]
    fn conservation_across_moves() {
        let mut ledger = MemoryLedger::new("engine", "WETH");
        ledger.credit("TKN", "alice", 100);
        ledger.transfer_from("TKN", "alice", "engine", 70).unwrap();
        ledger.transfer("TKN", "bob", 30).unwrap();
        assert_eq!(ledger.total_supply("TKN"), 100);
    }
}
