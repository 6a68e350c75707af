//! OneBot v11 frame models.
//!
//! OneBot traffic is JSON with three frame shapes: *events* pushed by
//! the bot client (`post_type` field), *API calls* sent toward the
//! client (`action` field), and *API responses* correlating back to a
//! call by its `echo`. Events are open-ended, so they stay as
//! [`serde_json::Value`] with typed accessors; calls and responses are
//! small fixed structs.

pub mod event;
pub mod segment;

pub use event::{classify, ApiCall, ApiResponse, EventView, FrameKind};
pub use segment::{render_raw_message, MessageSegment};
