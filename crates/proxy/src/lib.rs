//! The proxy engine: one bot client fanned out to many framework
//! targets.
//!
//! A [`manager::GatewayManager`] owns the route table and the registry
//! of live [`connection::ProxyConnection`]s. Each connection forwards
//! its client's event stream to every enabled target, routes API
//! responses back to the target that asked, translates for Sakoya
//! targets, persists traffic, and keeps dropped target links alive
//! through a cancellable reconnect loop.

pub mod auth;
pub mod client;
pub mod connection;
pub mod echo;
pub mod events;
pub mod manager;
pub mod reconnect;
pub mod route_map;
pub mod sakoya_link;

pub use connection::{ClientFrame, ProxyConnection, ProxyContext};
pub use manager::GatewayManager;
