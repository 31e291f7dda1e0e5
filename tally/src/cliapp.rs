//! Definition of the command line app.

use std::path::PathBuf;

use clap::builder::ValueParser;
use clap::{Arg, Command};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Tally ships runtime metrics from collecting agents to a central server.";

/// A flag of a subcommand together with the environment variable overriding it.
pub struct Flag {
    pub id: &'static str,
    pub short: char,
    pub env: &'static str,
    pub value_name: &'static str,
    pub help: &'static str,
}

pub const SERVER_FLAGS: &[Flag] = &[
    Flag {
        id: "address",
        short: 'a',
        env: "ADDRESS",
        value_name: "ADDR",
        help: "The address to bind the HTTP server to [default: localhost:8080]",
    },
    Flag {
        id: "store_interval",
        short: 'i',
        env: "STORE_INTERVAL",
        value_name: "SECS",
        help: "Seconds between snapshots, 0 saves after every update [default: 300]",
    },
    Flag {
        id: "file_storage_path",
        short: 'f',
        env: "FILE_STORAGE_PATH",
        value_name: "PATH",
        help: "Path of the snapshot file, empty to disable snapshots [default: metrics.json]",
    },
    Flag {
        id: "restore",
        short: 'r',
        env: "RESTORE",
        value_name: "BOOL",
        help: "Restore metrics from the snapshot file on start [default: true]",
    },
    Flag {
        id: "database_dsn",
        short: 'd',
        env: "DATABASE_DSN",
        value_name: "DSN",
        help: "Connection string of the SQL database, empty to keep metrics in memory",
    },
    Flag {
        id: "key",
        short: 'k',
        env: "KEY",
        value_name: "KEY",
        help: "Shared key for payload signatures, empty to disable",
    },
];

pub const AGENT_FLAGS: &[Flag] = &[
    Flag {
        id: "address",
        short: 'a',
        env: "ADDRESS",
        value_name: "ADDR",
        help: "The address of the server to report to [default: localhost:8080]",
    },
    Flag {
        id: "poll_interval",
        short: 'p',
        env: "POLL_INTERVAL",
        value_name: "SECS",
        help: "Seconds between two samples [default: 2]",
    },
    Flag {
        id: "report_interval",
        short: 'r',
        env: "REPORT_INTERVAL",
        value_name: "SECS",
        help: "Seconds between two reports [default: 10]",
    },
    Flag {
        id: "key",
        short: 'k',
        env: "KEY",
        value_name: "KEY",
        help: "Shared key for payload signatures, empty to disable",
    },
];

fn flag_args(flags: &'static [Flag]) -> impl Iterator<Item = Arg> {
    flags.iter().map(|flag| {
        Arg::new(flag.id)
            .short(flag.short)
            .value_name(flag.value_name)
            .help(format!("{} [env: {}]", flag.help, flag.env))
    })
}

pub fn make_app() -> Command {
    Command::new("tally")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("DIR")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(ValueParser::path_buf())
                .help("The path to the config folder."),
        )
        .arg(
            Arg::new("log_level")
                .value_name("LEVEL")
                .long("log-level")
                .global(true)
                .help("The log level, one of error, warn, info, debug or trace."),
        )
        .subcommand(
            Command::new("server")
                .about("Run the metrics server")
                .after_help(
                    "This runs the server in the foreground until it receives Ctrl-C or \
                     SIGTERM. Environment variables take precedence over flags, and both \
                     take precedence over the config file.",
                )
                .args(flag_args(SERVER_FLAGS)),
        )
        .subcommand(
            Command::new("agent")
                .about("Run the collecting agent")
                .after_help(
                    "This samples runtime statistics and reports them to the server until \
                     it receives Ctrl-C or SIGTERM. Pending metrics are sent once more \
                     before exiting.",
                )
                .args(flag_args(AGENT_FLAGS)),
        )
}

/// Returns the config folder argument, if set.
pub fn config_path(matches: &clap::ArgMatches) -> Option<&PathBuf> {
    matches.get_one::<PathBuf>("config")
}
