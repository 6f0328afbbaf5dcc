//! Puente - backend connection pool for sharded RESP cache proxies
//!
//! The proxy process keeps one long-lived, pipelined, auto-reconnecting
//! connection grid per backend address and routes individual requests onto
//! it while preserving per-connection response ordering:
//!
//! 1. [`BackendConn`]: one logical connection to an `(address, database)`
//!    pair, with an input queue, a writer/reader session pair, retry with
//!    exponential backoff, and a liveness state machine.
//! 2. [`SharedBackendConn`]: a refcounted `database x parallel` grid of
//!    connections to one address, with per-request slot selection.
//! 3. [`SharedBackendConnPool`]: the address-keyed registry with
//!    retain/release lifecycle and keep-alive broadcast.
//!
//! Requests flow as `pool.retain(addr)` ->
//! `entry.backend_conn(db, seed, must)` -> `conn.push_back(request)`; the
//! submitter then waits on the request (or its batch) for exactly one
//! completion, either a decoded response frame or a connection error.
pub mod config;
pub mod core;
pub mod error;
pub mod resp;
pub mod utils;

pub use crate::config::BackendConfig;
pub use crate::core::backend::{BackendConn, ConnState};
pub use crate::core::pool::{SharedBackendConn, SharedBackendConnPool};
pub use crate::core::request::{Batch, Reply, Request};
pub use crate::error::{BackendError, ConfigError};
pub use crate::resp::{RespError, RespValue};
