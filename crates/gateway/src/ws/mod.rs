//! WebSocket side of the gateway: upgrade handling and the bridge
//! between a client socket and its proxy connection.

mod handler;

pub use handler::ws_handler;
