//! HTTP and WebSocket surface (feature `server`)

mod api;

pub use api::{router, run_server, AppState};
