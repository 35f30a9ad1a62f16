//! # blop-server
//!
//! Axum HTTP + `WebSocket` server with a concurrent session registry.
//!
//! - `WebSocket` gateway: one read loop per session, read deadlines, ping coalescing
//! - Broadcast fan-out: every data frame is echoed to all registered sessions,
//!   one isolated delivery task per recipient
//! - HTTP endpoints: health check, Prometheus metrics
//! - Shutdown via `CancellationToken` plus a close-every-socket pass

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod limit;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
