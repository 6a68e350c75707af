pub mod auth;
pub mod message;

pub use auth::AuthStatus;
pub use message::{Direction, MessageRecord, NewMessage};
