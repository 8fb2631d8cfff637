use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use prometheus::{Encoder, Registry, TextEncoder};

use safex_engine::EngineEvent;

/// Prometheus metrics registry for the order server.
pub struct Metrics {
    pub registry: Registry,
    pub pairs_added: prometheus::IntCounter,
    pub orders_deposited: prometheus::IntCounter,
    pub orders_placed: prometheus::IntCounter,
    pub orders_matched: prometheus::IntCounter,
    pub orders_canceled: prometheus::IntCounter,
    pub fees_collected: prometheus::IntCounter,
    pub pair_count: prometheus::IntGauge,
    pub command_duration: prometheus::Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let pairs_added = prometheus::IntCounter::new(
            "safex_pairs_added_total",
            "Total number of trading pairs registered",
        )?;
        let orders_deposited = prometheus::IntCounter::new(
            "safex_orders_deposited_total",
            "Total number of order deposits",
        )?;
        let orders_placed = prometheus::IntCounter::new(
            "safex_orders_placed_total",
            "Total number of maker orders placed",
        )?;
        let orders_matched = prometheus::IntCounter::new(
            "safex_orders_matched_total",
            "Total number of order matches",
        )?;
        let orders_canceled = prometheus::IntCounter::new(
            "safex_orders_canceled_total",
            "Total number of orders canceled",
        )?;
        let fees_collected = prometheus::IntCounter::new(
            "safex_fees_collected_total",
            "Total number of non-zero fee collections",
        )?;
        let pair_count =
            prometheus::IntGauge::new("safex_pair_count", "Number of registered pairs")?;
        let command_duration = prometheus::Histogram::with_opts(prometheus::HistogramOpts::new(
            "safex_command_duration_seconds",
            "Command processing duration",
        ))?;

        registry.register(Box::new(pairs_added.clone()))?;
        registry.register(Box::new(orders_deposited.clone()))?;
        registry.register(Box::new(orders_placed.clone()))?;
        registry.register(Box::new(orders_matched.clone()))?;
        registry.register(Box::new(orders_canceled.clone()))?;
        registry.register(Box::new(fees_collected.clone()))?;
        registry.register(Box::new(pair_count.clone()))?;
        registry.register(Box::new(command_duration.clone()))?;

        Ok(Self {
            registry,
            pairs_added,
            orders_deposited,
            orders_placed,
            orders_matched,
            orders_canceled,
            fees_collected,
            pair_count,
            command_duration,
        })
    }

    pub fn observe_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::PairAdded { .. } => {
                self.pairs_added.inc();
                self.pair_count.inc();
            }
            EngineEvent::OrderDeposit { fee, .. } => {
                self.orders_deposited.inc();
                if *fee > 0 {
                    self.fees_collected.inc();
                }
            }
            EngineEvent::OrderPlaced { .. } => self.orders_placed.inc(),
            EngineEvent::OrderMatched { .. } => self.orders_matched.inc(),
            EngineEvent::OrderCanceled { .. } => self.orders_canceled.inc(),
        }
    }

    pub fn render(&self) -> anyhow::Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

pub fn get_metrics_port() -> u16 {
    std::env::var("METRICS_PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(9187)
}

/// Serves `/metrics` over plain TCP until shutdown.
pub fn spawn_metrics_thread(
    metrics: Arc<Metrics>,
    port: u16,
    shutdown_flag: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let listener = match TcpListener::bind(("0.0.0.0", port)) {
            Ok(listener) => listener,
            Err(e) => {
                eprintln!("Failed to bind metrics port {}: {}", port, e);
                return;
            }
        };
        if listener.set_nonblocking(true).is_err() {
            eprintln!("Failed to set metrics listener non-blocking");
            return;
        }
        println!("Metrics endpoint listening on :{}", port);

        loop {
            if shutdown_flag.load(Ordering::Relaxed) {
                break;
            }
            match listener.accept() {
                Ok((mut stream, _)) => {
                    let mut request = [0u8; 1024];
                    let _ = stream.read(&mut request);
                    if let Ok(body) = metrics.render() {
                        let header = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n",
                            body.len()
                        );
                        let _ = stream.write_all(header.as_bytes());
                        let _ = stream.write_all(&body);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    eprintln!("Metrics accept error: {}", e);
                    break;
                }
            }
        }
        println!("Metrics thread stopped");
    })
}
