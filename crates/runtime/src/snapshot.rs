use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rust_rocksdb::{DB, Options};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use safex_engine::{EngineSnapshot, MatchingEngine, MemoryLedger};

const STATE_KEY: &[u8] = b"state/v1";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rust_rocksdb::Error),
    #[error("snapshot codec error: {0}")]
    Codec(#[from] postcard::Error),
}

/// Everything the standalone server needs to resume: the engine's book
/// state and the in-memory balance book it settles against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    pub engine: EngineSnapshot,
    pub ledger: MemoryLedger,
}

/// RocksDB-backed store holding the postcard-encoded runtime snapshot.
pub struct SnapshotStore {
    db: DB,
}

impl SnapshotStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path)?;
        Ok(Self { db })
    }

    pub fn save(&self, snapshot: &RuntimeSnapshot) -> Result<(), SnapshotError> {
        let encoded = postcard::to_allocvec(snapshot)?;
        self.db.put(STATE_KEY, encoded)?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<RuntimeSnapshot>, SnapshotError> {
        match self.db.get(STATE_KEY)? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Persists the current engine and ledger state.
pub fn save_state(
    store: &SnapshotStore,
    engine: &Mutex<MatchingEngine>,
    ledger: &Mutex<MemoryLedger>,
) -> Result<(), SnapshotError> {
    let state = {
        let engine = engine.lock().unwrap_or_else(|e| e.into_inner());
        let ledger = ledger.lock().unwrap_or_else(|e| e.into_inner());
        RuntimeSnapshot {
            engine: engine.snapshot(),
            ledger: ledger.clone(),
        }
    };
    store.save(&state)
}

/// Snapshot cadence from `SNAPSHOT_INTERVAL_SECONDS` (default one minute).
pub fn get_snapshot_interval() -> Duration {
    let secs = std::env::var("SNAPSHOT_INTERVAL_SECONDS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(60);
    Duration::from_secs(secs)
}

/// Saves the runtime state on a fixed interval until shutdown. The
/// shutdown path still writes a final snapshot of its own, so a crash
/// loses at most one interval of book changes.
pub fn spawn_snapshot_thread(
    store: Arc<SnapshotStore>,
    engine: Arc<Mutex<MatchingEngine>>,
    ledger: Arc<Mutex<MemoryLedger>>,
    interval: Duration,
    shutdown_flag: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        println!("Snapshot thread started ({}s interval)", interval.as_secs());
        let mut last_save = Instant::now();
        loop {
            if shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            thread::sleep(Duration::from_millis(200));
            if last_save.elapsed() < interval {
                continue;
            }

            if let Err(e) = save_state(&store, &engine, &ledger) {
                eprintln!("Periodic snapshot failed: {}", e);
            }
            last_save = Instant::now();
        }
        println!("Snapshot thread stopped");
    })
}
