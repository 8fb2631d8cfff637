pub mod api;
pub mod metrics;
pub mod network;
pub mod snapshot;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
