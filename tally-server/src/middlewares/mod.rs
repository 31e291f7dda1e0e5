//! Middlewares for the HTTP server.
//!
//! This module exposes tower [layers](tower::Layer) and axum middleware functions. Most of them
//! are registered as a layer on the [`Router`](axum::Router) in `make_app`.

mod handle_panic;
mod normalize_path;
mod signature;
mod sync_save;
mod trace;

pub use self::handle_panic::*;
pub use self::normalize_path::*;
pub use self::signature::*;
pub use self::sync_save::*;
pub use self::trace::*;
