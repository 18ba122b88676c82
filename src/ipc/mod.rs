//! Request/response IPC between short-lived clients and the daemon.
//!
//! Clients connect to a Unix socket, send one newline-terminated JSON
//! request and read one JSON response.  See [`protocol`] for the wire
//! format, [`server`] for the daemon side and [`client`] for the caller
//! side.

pub mod client;
pub mod paths;
pub mod protocol;
pub mod server;
