/*!
# Battery Kernel - Ingestion télémétrie et détection hors-ligne

Library side of the kernel binary: the rate-limited ingestion gate, the
liveness monitor, the stores and the HTTP surface. `main.rs` only wires them.
*/

pub mod config;
pub mod error;
pub mod http;
pub mod ingest;
pub mod limiter;
pub mod models;
pub mod monitor;
pub mod store;
pub mod summary;
