use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use zmq::{Context, PUB, ROUTER, Socket};

use safex_engine::EngineEvent;

/// An order command pulled off the ROUTER socket: the routing envelope to
/// echo back with the reply, and the JSON payload.
#[derive(Debug)]
pub struct InboundCommand {
    envelope: Vec<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// The exchange's network face: a ROUTER socket serving order commands
/// and a PUB socket streaming engine events to subscribers.
pub struct OrderGateway {
    event_pub: Socket,
    command_router: Socket,
}

// `zmq::Socket` wraps a raw pointer and is not `Send`/`Sync` on its own.
// Each socket here is confined to one thread (the command loop owns the
// ROUTER side, the event publisher owns the PUB side), so sharing the
// gateway behind an `Arc` is sound; declare it so `thread::spawn` accepts
// the handle.
unsafe impl Send for OrderGateway {}
unsafe impl Sync for OrderGateway {}

impl OrderGateway {
    pub fn bind(context: &Context, event_port: u16, order_port: u16) -> Result<Self> {
        let event_pub = context.socket(PUB)?;
        event_pub.bind(&format!("tcp://*:{}", event_port))?;

        let command_router = context.socket(ROUTER)?;
        command_router.bind(&format!("tcp://*:{}", order_port))?;

        Ok(Self { event_pub, command_router })
    }

    /// Waits up to `timeout_ms` for the next order command. `None` when
    /// the socket stayed idle.
    pub fn recv_command(&self, timeout_ms: i64) -> Result<Option<InboundCommand>> {
        let mut poll_items = [self.command_router.as_poll_item(zmq::POLLIN)];
        zmq::poll(&mut poll_items, timeout_ms)?;
        if !poll_items[0].is_readable() {
            return Ok(None);
        }

        let mut frames = self.command_router.recv_multipart(0)?;
        let payload = match frames.pop() {
            Some(payload) => payload,
            None => return Ok(None),
        };
        Ok(Some(InboundCommand { envelope: frames, payload }))
    }

    /// Sends `reply` back along the command's routing envelope.
    pub fn send_reply(&self, command: InboundCommand, reply: Vec<u8>) -> Result<()> {
        let mut frames = command.envelope;
        frames.push(reply);
        self.command_router.send_multipart(frames, 0)?;
        Ok(())
    }

    /// Serializes one engine event and pushes it to subscribers. Amounts
    /// ride as decimal strings (see the event codec).
    pub fn publish_event(&self, event: &EngineEvent) -> Result<()> {
        let encoded = serde_json::to_vec(event)?;
        self.event_pub.send(&encoded, 0)?;
        Ok(())
    }
}

/// Ports from the environment: `EVENT_PORT` and `ORDER_PORT`.
pub fn get_ports() -> Result<(u16, u16)> {
    let event_port = std::env::var("EVENT_PORT")
        .unwrap_or_else(|_| "5557".to_string())
        .parse::<u16>()?;
    let order_port = std::env::var("ORDER_PORT")
        .unwrap_or_else(|_| "5558".to_string())
        .parse::<u16>()?;
    Ok((event_port, order_port))
}

/// Forwards drained engine events to subscribers until shutdown.
pub fn spawn_event_publisher(
    gateway: Arc<OrderGateway>,
    event_rx: mpsc::Receiver<EngineEvent>,
    shutdown_flag: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        println!("Event publisher started");
        loop {
            if shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            match event_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    if let Err(e) = gateway.publish_event(&event) {
                        eprintln!("Dropping event after publish failure: {}", e);
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    continue;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    println!("Event channel closed, stopping publisher");
                    break;
                }
            }
        }
        println!("Event publisher stopped");
    })
}
