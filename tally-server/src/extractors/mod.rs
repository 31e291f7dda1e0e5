//! Extractors for types from the incoming request.

mod content_type;

pub use self::content_type::*;
