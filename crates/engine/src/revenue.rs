use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RevenueError {
    #[error("fee tier missing for uid {0}")]
    TierMissing(u32),
}

/// Boundary to the external revenue accountant: fee tier lookups, volume
/// reports and fee refunds on cancel. Numerators are against a denominator
/// of 1,000,000.
pub trait Accountant: Send {
    fn is_reportable(&self, sender: &str, uid: u32) -> bool;

    fn fee_of(&self, uid: u32, is_maker: bool) -> u32;

    fn report(
        &mut self,
        uid: u32,
        token: &str,
        amount: u128,
        is_add: bool,
    ) -> Result<(), RevenueError>;

    fn refund_fee(&mut self, to: &str, token: &str, amount: u128) -> Result<(), RevenueError>;
}

/// Accountant for anonymous-only deployments: nothing is reportable, so
/// every order pays the flat default fee.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAccountant;

impl Accountant for NullAccountant {
    fn is_reportable(&self, _sender: &str, _uid: u32) -> bool {
        false
    }

    fn fee_of(&self, _uid: u32, _is_maker: bool) -> u32 {
        0
    }

    fn report(
        &mut self,
        _uid: u32,
        _token: &str,
        _amount: u128,
        _is_add: bool,
    ) -> Result<(), RevenueError> {
        Ok(())
    }

    fn refund_fee(&mut self, _to: &str, _token: &str, _amount: u128) -> Result<(), RevenueError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    pub maker_num: u32,
    pub taker_num: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub uid: u32,
    pub token: String,
    pub amount: u128,
    pub is_add: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundEntry {
    pub to: String,
    pub token: String,
    pub amount: u128,
}

/// Tier-table accountant that records every report and refund, used by the
/// runtime's standalone mode and by tests asserting reporter traffic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierAccountant {
    tiers: HashMap<u32, FeeTier>,
    members: HashMap<String, u32>,
    pub reports: Vec<ReportEntry>,
    pub refunds: Vec<RefundEntry>,
}

impl TierAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sender` under `uid` with the given fee numerators.
    pub fn register(&mut self, sender: impl Into<String>, uid: u32, tier: FeeTier) {
        self.members.insert(sender.into(), uid);
        self.tiers.insert(uid, tier);
    }
}

impl Accountant for TierAccountant {
    fn is_reportable(&self, sender: &str, uid: u32) -> bool {
        uid != 0 && self.members.get(sender) == Some(&uid)
    }

    fn fee_of(&self, uid: u32, is_maker: bool) -> u32 {
        match self.tiers.get(&uid) {
            Some(tier) if is_maker => tier.maker_num,
            Some(tier) => tier.taker_num,
            None => 0,
        }
    }

    fn report(
        &mut self,
        uid: u32,
        token: &str,
        amount: u128,
        is_add: bool,
    ) -> Result<(), RevenueError> {
        if !self.tiers.contains_key(&uid) {
            return Err(RevenueError::TierMissing(uid));
        }
        self.reports.push(ReportEntry {
            uid,
            token: token.to_string(),
            amount,
            is_add,
        });
        Ok(())
    }

    fn refund_fee(&mut self, to: &str, token: &str, amount: u128) -> Result<(), RevenueError> {
        self.refunds.push(RefundEntry {
            to: to.to_string(),
            token: token.to_string(),
            amount,
        });
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T: Accountant> Accountant for Arc<Mutex<T>> {
    fn is_reportable(&self, sender: &str, uid: u32) -> bool {
        lock(self).is_reportable(sender, uid)
    }

    fn fee_of(&self, uid: u32, is_maker: bool) -> u32 {
        lock(self).fee_of(uid, is_maker)
    }

    fn report(
        &mut self,
        uid: u32,
        token: &str,
        amount: u128,
        is_add: bool,
    ) -> Result<(), RevenueError> {
        lock(self).report(uid, token, amount, is_add)
    }

    fn refund_fee(&mut self, to: &str, token: &str, amount: u128) -> Result<(), RevenueError> {
        lock(self).refund_fee(to, token, amount)
    }
}
