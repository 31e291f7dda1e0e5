/// The value of the `Server` response header.
pub const SERVER: &str = concat!("tally/", env!("CARGO_PKG_VERSION"));

/// Only compress responses of at least this size, in bytes.
pub const COMPRESSION_MIN_SIZE: u16 = 32;
