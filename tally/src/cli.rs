use std::env;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use tally_common::CancellationToken;
use tally_config::{Config, OverridableConfig};

use crate::cliapp::{self, AGENT_FLAGS, Flag, SERVER_FLAGS};
use crate::setup;

/// The service started by a subcommand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Service {
    Server,
    Agent,
}

impl Service {
    pub fn name(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Agent => "agent",
        }
    }
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = cliapp::make_app();
    let matches = app.get_matches();

    let mut config = match cliapp::config_path(&matches) {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    let (service, sub_matches) = match matches.subcommand() {
        Some(("server", sub_matches)) => (Service::Server, sub_matches),
        Some(("agent", sub_matches)) => (Service::Agent, sub_matches),
        _ => bail!("unknown subcommand"),
    };

    let overrides = collect_overrides(service, sub_matches, |name| env::var(name).ok());
    config.apply_override(overrides)?;

    run(config, service)
}

/// Resolves a flag, preferring the environment over the command line.
fn resolve(
    matches: &ArgMatches,
    flags: &[Flag],
    id: &str,
    env: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let flag = flags.iter().find(|flag| flag.id == id)?;
    env(flag.env).or_else(|| matches.get_one::<String>(id).cloned())
}

/// Gathers config overrides of a subcommand from its flags and the environment.
pub fn collect_overrides(
    service: Service,
    matches: &ArgMatches,
    env: impl Fn(&str) -> Option<String>,
) -> OverridableConfig {
    let log_level = matches.get_one::<String>("log_level").cloned();

    match service {
        Service::Server => {
            let get = |id: &str| resolve(matches, SERVER_FLAGS, id, &env);
            OverridableConfig {
                server_address: get("address"),
                store_interval: get("store_interval"),
                file_storage_path: get("file_storage_path"),
                restore: get("restore"),
                database_dsn: get("database_dsn"),
                key: get("key"),
                log_level,
                ..Default::default()
            }
        }
        Service::Agent => {
            let get = |id: &str| resolve(matches, AGENT_FLAGS, id, &env);
            OverridableConfig {
                agent_address: get("address"),
                poll_interval: get("poll_interval"),
                report_interval: get("report_interval"),
                key: get("key"),
                log_level,
                ..Default::default()
            }
        }
    }
}

/// Sets up logging and runs the service until a shutdown signal arrives.
pub fn run(config: Config, service: Service) -> Result<()> {
    tally_log::init(config.logging());
    setup::dump_spawn_infos(&config, service);
    setup::check_config(&config, service)?;

    let config = Arc::new(config);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tally")
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(async move {
        let shutdown = CancellationToken::new();
        setup::spawn_signal_handlers(shutdown.clone());

        match service {
            Service::Server => tally_server::run(config, shutdown).await?,
            Service::Agent => tally_agent::run(config, shutdown).await?,
        }

        tally_log::info!("{} stopped", service.name());
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use similar_asserts::assert_eq;

    use super::*;

    fn overrides(args: &[&str], env: &[(&str, &str)]) -> OverridableConfig {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();

        let matches = cliapp::make_app().try_get_matches_from(args).unwrap();
        let (name, sub_matches) = matches.subcommand().unwrap();
        let service = match name {
            "server" => Service::Server,
            _ => Service::Agent,
        };

        collect_overrides(service, sub_matches, |name| env.get(name).cloned())
    }

    #[test]
    fn test_server_flags() {
        let overrides = overrides(
            &[
                "tally", "server", "-a", ":9090", "-i", "0", "-f", "", "-r", "false", "-k", "abc",
            ],
            &[],
        );

        assert_eq!(overrides.server_address.as_deref(), Some(":9090"));
        assert_eq!(overrides.store_interval.as_deref(), Some("0"));
        assert_eq!(overrides.file_storage_path.as_deref(), Some(""));
        assert_eq!(overrides.restore.as_deref(), Some("false"));
        assert_eq!(overrides.database_dsn, None);
        assert_eq!(overrides.key.as_deref(), Some("abc"));
        assert_eq!(overrides.agent_address, None);
    }

    #[test]
    fn test_environment_wins_over_flags() {
        let overrides = overrides(
            &["tally", "agent", "-a", "localhost:1", "-p", "5"],
            &[("ADDRESS", "localhost:2"), ("REPORT_INTERVAL", "20")],
        );

        assert_eq!(overrides.agent_address.as_deref(), Some("localhost:2"));
        assert_eq!(overrides.poll_interval.as_deref(), Some("5"));
        assert_eq!(overrides.report_interval.as_deref(), Some("20"));
        assert_eq!(overrides.server_address, None);
    }

    #[test]
    fn test_overrides_apply_to_defaults() {
        let overrides = overrides(
            &["tally", "--log-level", "debug", "server", "-i", "0"],
            &[("DATABASE_DSN", "postgres://localhost/metrics")],
        );

        let mut config = Config::default();
        config.apply_override(overrides).unwrap();

        assert!(config.sync_save());
        assert_eq!(
            config.storage_backend(),
            tally_config::StorageBackend::Sql("postgres://localhost/metrics".to_owned())
        );
    }

    #[test]
    fn test_agent_rejects_server_flags() {
        let result = cliapp::make_app().try_get_matches_from(["tally", "agent", "-d", "dsn"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_app_definition() {
        cliapp::make_app().debug_assert();
    }
}
