//! Library surface for the `worker-ai-server` binary: everything the
//! binary, and end-to-end tests under `tests/`, need to drive a server
//! or a single connection without going through a subprocess.

pub mod config;
pub mod connection;
pub mod error_map;
pub mod heartbeat;
pub mod model_loader;
pub mod server;
pub mod visualizer;
