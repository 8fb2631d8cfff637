use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use anyhow::Context as AnyhowContext;
use zmq::Context;

use safex_engine::{EngineConfig, EngineEvent, MatchingEngine, MemoryLedger, TierAccountant};
use safex_runtime::{api, metrics, network, snapshot, version};

fn main() -> anyhow::Result<()> {
    println!("SAFEX order server {} starting...", version());

    let context = Context::new();
    let (event_port, order_port) = network::get_ports()?;
    let gateway = Arc::new(network::OrderGateway::bind(&context, event_port, order_port)?);
    println!("Gateway bound - Events: {}, Orders: {}", event_port, order_port);

    let snapshot_path =
        std::env::var("SNAPSHOT_PATH").unwrap_or_else(|_| "./data/safex.db".to_string());
    let store = Arc::new(
        snapshot::SnapshotStore::open(&snapshot_path)
            .with_context(|| format!("failed to open snapshot store at {snapshot_path}"))?,
    );

    let engine_id = std::env::var("ENGINE_ID").unwrap_or_else(|_| "safex-engine".to_string());
    let fee_to = std::env::var("FEE_TO").unwrap_or_else(|_| "treasury".to_string());

    let restored = match store.load() {
        Ok(restored) => restored,
        Err(e) => {
            eprintln!("Warning: failed to load snapshot ({}), starting fresh", e);
            None
        }
    };

    let accountant = Arc::new(Mutex::new(TierAccountant::new()));
    let (ledger, engine) = match restored {
        Some(state) => {
            println!(
                "Snapshot loaded: {} pairs",
                state.engine.registry.pair_count()
            );
            let ledger = Arc::new(Mutex::new(state.ledger));
            let engine = MatchingEngine::restore(
                state.engine,
                Box::new(accountant.clone()),
                Box::new(ledger.clone()),
                Box::new(ledger.clone()),
            );
            (ledger, engine)
        }
        None => {
            let mut fresh = MemoryLedger::new(&engine_id, "WETH");
            fresh.register_token("WETH", 18);
            let ledger = Arc::new(Mutex::new(fresh));
            let engine = MatchingEngine::new(
                EngineConfig {
                    engine_id: engine_id.clone(),
                    fee_to,
                    wrapped_native: Some("WETH".into()),
                },
                Box::new(accountant.clone()),
                Box::new(ledger.clone()),
                Box::new(ledger.clone()),
            );
            (ledger, engine)
        }
    };
    let engine = Arc::new(Mutex::new(engine));

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>();

    let event_thread =
        network::spawn_event_publisher(gateway.clone(), event_rx, shutdown_flag.clone());

    let metrics_registry = Arc::new(metrics::Metrics::new()?);
    let metrics_thread = metrics::spawn_metrics_thread(
        metrics_registry.clone(),
        metrics::get_metrics_port(),
        shutdown_flag.clone(),
    );

    let snapshot_thread = snapshot::spawn_snapshot_thread(
        store.clone(),
        engine.clone(),
        ledger.clone(),
        snapshot::get_snapshot_interval(),
        shutdown_flag.clone(),
    );

    let shutdown_trigger = shutdown_flag.clone();
    ctrlc::set_handler(move || {
        println!("Ctrl+C received. Initiating shutdown...");
        shutdown_trigger.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl+C handler")?;

    println!("Order server listening on tcp://*:{order_port}");
    run_command_loop(&gateway, &engine, &metrics_registry, &event_tx, &shutdown_flag)?;

    // Final snapshot before the threads wind down.
    match snapshot::save_state(&store, &engine, &ledger) {
        Ok(()) => println!("Snapshot saved to {snapshot_path}"),
        Err(e) => eprintln!("Warning: failed to save snapshot: {}", e),
    }

    event_thread
        .join()
        .expect("event publisher thread panicked unexpectedly");
    metrics_thread
        .join()
        .expect("metrics thread panicked unexpectedly");
    snapshot_thread
        .join()
        .expect("snapshot thread panicked unexpectedly");

    Ok(())
}

/// Command loop: one order command in, one reply out, strictly serial
/// against the engine. Events drained after each command feed the PUB
/// stream and the metrics counters.
fn run_command_loop(
    gateway: &network::OrderGateway,
    engine: &Arc<Mutex<MatchingEngine>>,
    metrics_registry: &metrics::Metrics,
    event_tx: &mpsc::Sender<EngineEvent>,
    shutdown_flag: &AtomicBool,
) -> anyhow::Result<()> {
    loop {
        if shutdown_flag.load(Ordering::Relaxed) {
            println!("Shutdown signal received. Stopping command loop.");
            break;
        }

        let command = match gateway
            .recv_command(100)
            .context("failed to receive order command")?
        {
            Some(command) => command,
            None => continue,
        };

        let started = Instant::now();
        let (reply, events) = {
            let mut engine = engine.lock().unwrap_or_else(|e| e.into_inner());
            let reply = api::handle_frame(&mut engine, &command.payload);
            (reply, engine.drain_events())
        };
        metrics_registry
            .command_duration
            .observe(started.elapsed().as_secs_f64());

        for event in events.into_vec() {
            metrics_registry.observe_event(&event);
            let _ = event_tx.send(event);
        }

        gateway
            .send_reply(command, reply)
            .context("failed to send reply")?;
    }

    Ok(())
}
