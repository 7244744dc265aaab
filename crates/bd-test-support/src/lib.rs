//! Shared test utilities for the daemon's integration suites.
//!
//! Gives `services/brickd`'s `tests/*.rs` files a plain-TCP client that
//! speaks the wire protocol directly, packet-builder helpers for constructing
//! fixtures without hand-rolling byte arrays, and a throwaway TOML config
//! file writer. Nothing here touches the reactor or any stack — those are
//! exercised through the real daemon binary or the per-crate mock backends.

mod config_fixture;
mod null_backends;
mod packet_builder;
mod tcp_client;

pub use config_fixture::write_config_fixture;
pub use null_backends::{NullSpiBackend, NullUsbBackend};
pub use packet_builder::{callback_bytes, request_bytes, response_bytes};
pub use tcp_client::TestTcpClient;
