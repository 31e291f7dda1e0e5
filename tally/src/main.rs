//! The Tally binary.
//!
//! Runs either the ingest server or the collecting agent:
//!
//! ```text
//! tally [--config DIR] server [-a ADDR] [-i SECS] [-f PATH] [-r BOOL] [-d DSN] [-k KEY]
//! tally [--config DIR] agent  [-a ADDR] [-p SECS] [-r SECS] [-k KEY]
//! ```
//!
//! Every flag can also be set through an environment variable, which takes precedence over the
//! command line. Both take precedence over the `config.yml` in the config folder.

mod cli;
mod cliapp;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            tally_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
