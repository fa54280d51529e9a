//! Syncwave Server - Real-time webhook to WebSocket bridge.
//!
//! This crate provides the server component of Syncwave, responsible for:
//! - Receiving signed webhook events from the backend
//! - Admitting live WebSocket clients via an external identity authority
//! - Broadcasting events to room-scoped subscribers
//! - Keeping a bounded operational log with a live tail
//!
//! # Architecture
//!
//! The server sits between a backend that emits webhooks and browser clients
//! holding WebSocket connections. Events are verified, stamped, and fanned
//! out in real time without persistent storage.

pub mod config;
pub mod error;
pub mod identity;
pub mod logs;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod signature;
pub mod types;
