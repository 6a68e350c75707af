//! The `bs` gateway binary's application library.
//!
//! HTTP surface (health + admin API), WebSocket upgrade handling, and
//! the database health monitor. Kept as a library so integration tests
//! can build the full router the same way `main.rs` does.

pub mod config;
pub mod error;
pub mod health;
pub mod response;
pub mod routes;
pub mod state;
pub mod ws;
