//! Core connection machinery: requests, per-address connections, and the
//! shared pool that multiplexes them.
pub mod backend;
pub mod pool;
pub mod request;

pub use backend::{BackendConn, ConnState};
pub use pool::{SharedBackendConn, SharedBackendConnPool};
pub use request::{Batch, Request};
