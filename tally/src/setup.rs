use anyhow::Result;
use tally_common::CancellationToken;
use tally_config::{Config, StorageBackend};

use crate::cli::Service;

/// Validates settings that cannot be checked while parsing the config.
pub fn check_config(config: &Config, service: Service) -> Result<()> {
    if service == Service::Server {
        let address = config.listen_addr();
        if !address.contains(':') {
            anyhow::bail!("the server address {address:?} does not contain a port");
        }

        if config.storage_backend() == StorageBackend::Memory
            && config.restore()
            && config.snapshot_path().is_none()
        {
            tally_log::warn!("restore is enabled, but no snapshot file is configured");
        }
    }

    if service == Service::Agent && config.report_interval() < config.poll_interval() {
        tally_log::warn!("the report interval is shorter than the poll interval");
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config, service: Service) {
    if config.path().as_os_str().is_empty() {
        tally_log::info!("launching tally {} without config folder", service.name());
    } else {
        tally_log::info!(
            "launching tally {} from config folder {}",
            service.name(),
            config.path().display()
        );
    }

    match service {
        Service::Server => {
            tally_log::info!("  address: {}", config.listen_addr());
            match config.storage_backend() {
                StorageBackend::Memory => tally_log::info!("  storage: memory"),
                StorageBackend::Sql(_) => tally_log::info!("  storage: sql"),
            }
            match config.store_interval() {
                Some(interval) => tally_log::info!("  store interval: {interval:?}"),
                None => tally_log::info!("  store interval: synchronous"),
            }
            match config.snapshot_path() {
                Some(path) => tally_log::info!("  snapshot file: {}", path.display()),
                None => tally_log::info!("  snapshot file: -"),
            }
        }
        Service::Agent => {
            tally_log::info!("  server address: {}", config.agent_address());
            tally_log::info!("  poll interval: {:?}", config.poll_interval());
            tally_log::info!("  report interval: {:?}", config.report_interval());
        }
    }

    match config.signing_key() {
        Some(_) => tally_log::info!("  signing: enabled"),
        None => tally_log::info!("  signing: disabled"),
    }
    tally_log::info!("  log level: {}", config.logging().level);
}

/// Cancels `shutdown` once the process receives Ctrl-C or SIGTERM.
pub fn spawn_signal_handlers(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(error) => {
            tally_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to register SIGTERM handler"
            );
            ctrl_c(tokio::signal::ctrl_c()).await;
            tally_log::info!("received Ctrl-C, shutting down");
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c(tokio::signal::ctrl_c()) => tally_log::info!("received Ctrl-C, shutting down"),
        _ = sigterm.recv() => tally_log::info!("received SIGTERM, shutting down"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c(tokio::signal::ctrl_c()).await;
    tally_log::info!("received Ctrl-C, shutting down");
}

/// Waits for Ctrl-C. If the handler cannot be registered, logs the error and never returns.
async fn ctrl_c(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(error) = signal.await {
        tally_log::error!(
            error = &error as &dyn std::error::Error,
            "failed to register Ctrl-C handler"
        );
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_failed_ctrl_c_registration_does_not_shut_down() {
        let failed = async { Err(std::io::Error::other("no signal support")) };
        let result = tokio::time::timeout(Duration::from_millis(50), ctrl_c(failed)).await;
        assert!(result.is_err());

        let received = async { Ok(()) };
        tokio::time::timeout(Duration::from_millis(50), ctrl_c(received))
            .await
            .unwrap();
    }

    #[test]
    fn test_address_without_port() {
        let config = Config::from_json_value(serde_json::json!({
            "server": {"address": "localhost"}
        }))
        .unwrap();

        assert!(check_config(&config, Service::Server).is_err());
        assert!(check_config(&config, Service::Agent).is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(check_config(&Config::default(), Service::Server).is_ok());
    }
}
