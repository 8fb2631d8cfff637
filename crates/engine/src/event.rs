use std::fmt;

use serde::{Deserialize, Serialize};

/// Decimal-string codecs for amounts and prices on the JSON wire, where a
/// raw `u128` would overflow the 53/64-bit numbers most consumers parse.
pub mod amount_str {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<u128>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.collect_str(value),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u128>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|raw| raw.parse().map_err(serde::de::Error::custom))
                .transpose()
        }
    }

    pub mod list {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            values: &[u128],
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(values.iter().map(|value| value.to_string()))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<u128>, D::Error> {
            let raw = Vec::<String>::deserialize(deserializer)?;
            raw.into_iter()
                .map(|raw| raw.parse().map_err(serde::de::Error::custom))
                .collect()
        }
    }
}

/// Observable engine events. Field order is part of the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    PairAdded {
        orderbook: u64,
        base: String,
        quote: String,
        base_decimals: u8,
        quote_decimals: u8,
    },
    OrderDeposit {
        sender: String,
        asset: String,
        #[serde(with = "amount_str")]
        fee: u128,
    },
    OrderPlaced {
        orderbook: u64,
        id: u32,
        owner: String,
        is_bid: bool,
        #[serde(with = "amount_str")]
        price: u128,
        #[serde(with = "amount_str")]
        amount: u128,
    },
    OrderMatched {
        orderbook: u64,
        id: u32,
        is_bid: bool,
        taker: String,
        maker: String,
        #[serde(with = "amount_str")]
        price: u128,
        #[serde(with = "amount_str")]
        amount: u128,
    },
    OrderCanceled {
        orderbook: u64,
        id: u32,
        is_bid: bool,
        owner: String,
        #[serde(with = "amount_str")]
        amount: u128,
    },
}

/// A drained batch of events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct EventQueue(pub Vec<EngineEvent>);

impl EventQueue {
    pub fn new() -> Self {
        EventQueue(Vec::new())
    }

    pub fn into_vec(self) -> Vec<EngineEvent> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<EngineEvent>> for EventQueue {
    fn from(events: Vec<EngineEvent>) -> Self {
        EventQueue(events)
    }
}

impl From<EventQueue> for Vec<EngineEvent> {
    fn from(queue: EventQueue) -> Self {
        queue.0
    }
}

impl fmt::Display for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, event) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", event)?;
        }
        write!(f, "]")
    }
}

impl std::ops::Deref for EventQueue {
    type Target = Vec<EngineEvent>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for EventQueue {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
