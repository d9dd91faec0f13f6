//! # beacon-server
//!
//! Axum `WebSocket` endpoint and system-event broadcasting.
//!
//! - Connection registry with a principal bound to every entry
//! - Ping/pong keepalive monitor with an optional dead-man timer
//! - Per-subscriber visibility filtering and event processing
//! - Best-effort fan-out that never reports failure to emitters
//! - Health, Prometheus metrics and an authenticated HTTP emit endpoint
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod metrics;
pub mod processing;
pub mod server;
pub mod shutdown;
pub mod visibility;
pub mod websocket;
