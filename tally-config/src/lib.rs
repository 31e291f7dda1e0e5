//! Configuration for the Tally server and agent.
//!
//! The configuration is read from an optional `config.yml` in a config folder and can be
//! overridden from the command line and the environment via [`OverridableConfig`].
#![warn(missing_docs)]

mod config;

pub use crate::config::*;
