pub mod engine;
pub mod event;
pub mod ledger;
pub mod order_queue;
pub mod orderbook;
pub mod price_list;
pub mod registry;
pub mod revenue;

pub use engine::{
    CancelRequest, EngineConfig, EngineError, EngineSnapshot, MatchingEngine, OrderResult,
    FEE_DENOM, MAX_MATCHES,
};
pub use event::{EngineEvent, EventQueue};
pub use ledger::{Ledger, LedgerError, MemoryLedger, TokenInfo};
pub use order_queue::{Order, OrderQueue, OrderQueueError};
pub use orderbook::{Orderbook, OrderbookError, Pair, TransferInstruction};
pub use price_list::{PriceList, PriceListError};
pub use registry::{OrderbookRegistry, RegistryError};
pub use revenue::{Accountant, NullAccountant, TierAccountant};

/// Price fixed-point scale: prices carry 8 implied decimals.
pub const PRICE_SCALE: u128 = 100_000_000;
