use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tally_log::LogConfig;

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: None,
        }
    }

    #[inline]
    fn wrap<E>(cause: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: Some(Box::new(cause)),
        }
    }

    #[inline]
    fn for_field<E>(cause: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(cause, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => self.kind.fmt(f),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn Error + 'static))
    }
}

/// Error returned for boolean overrides that are neither true nor false.
#[derive(Debug, thiserror::Error)]
#[error("expected a boolean, got {0:?}")]
struct ParseBoolError(String);

/// Parses booleans the way most shells and CI systems spell them.
fn parse_bool(value: &str) -> Result<bool, ParseBoolError> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(ParseBoolError(other.to_owned())),
    }
}

enum ConfigFormat {
    Yaml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
        }
    }
}

trait ConfigObject: DeserializeOwned {
    /// The format in which to serialize this configuration.
    fn format() -> ConfigFormat;

    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.{}", Self::name(), Self::format().extension()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::from_reader(io::BufReader::new(f))
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path)),
        }
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The address the server binds to.
    pub server_address: Option<String>,
    /// Seconds between snapshots of the in-memory store. `0` saves after every update.
    pub store_interval: Option<String>,
    /// Path of the snapshot file. An empty string disables snapshots.
    pub file_storage_path: Option<String>,
    /// "true" if the in-memory store is restored from the snapshot on start.
    pub restore: Option<String>,
    /// Connection string of the SQL database. An empty string selects the in-memory store.
    pub database_dsn: Option<String>,
    /// The address of the server the agent reports to.
    pub agent_address: Option<String>,
    /// Seconds between two samples on the agent.
    pub poll_interval: Option<String>,
    /// Seconds between two reports on the agent.
    pub report_interval: Option<String>,
    /// The shared secret for signing payloads.
    pub key: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
}

/// The storage backend selected by the configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    /// Volatile maps, optionally snapshotted to a file.
    Memory,
    /// SQL database reachable via the given DSN.
    Sql(String),
}

fn default_address() -> String {
    "localhost:8080".to_owned()
}

/// Server configuration.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Server {
    /// The `host:port` the HTTP server binds to.
    address: String,
    /// Seconds between snapshots. `0` saves synchronously after each update.
    store_interval: u64,
    /// Path of the snapshot file.
    file_storage_path: String,
    /// Restore the in-memory store from the snapshot on start.
    restore: bool,
    /// DSN of the SQL database.
    database_dsn: String,
}

impl Default for Server {
    fn default() -> Self {
        Server {
            address: default_address(),
            store_interval: 300,
            file_storage_path: "metrics.json".to_owned(),
            restore: true,
            database_dsn: String::new(),
        }
    }
}

/// Agent configuration.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Agent {
    /// The `host:port` of the server to report to.
    address: String,
    /// Seconds between two samples.
    poll_interval: u64,
    /// Seconds between two reports.
    report_interval: u64,
}

impl Default for Agent {
    fn default() -> Self {
        Agent {
            address: default_address(),
            poll_interval: 2,
            report_interval: 10,
        }
    }
}

/// Shared-secret integrity settings.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
struct Auth {
    /// HMAC-SHA256 key. Empty disables signing and verification.
    key: String,
}

/// Outbound HTTP settings of the agent.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Http {
    /// Timeout for establishing connections, in seconds.
    connection_timeout: u64,
    /// Timeout for an entire request, in seconds.
    timeout: u64,
}

impl Default for Http {
    fn default() -> Self {
        Http {
            connection_timeout: 3,
            timeout: 10,
        }
    }
}

/// The delay schedule between attempts of retried operations.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Retry {
    /// Delays in milliseconds. The number of entries is the number of retries.
    delays: Vec<u64>,
}

impl Default for Retry {
    fn default() -> Self {
        Retry {
            delays: vec![1000, 3000, 5000],
        }
    }
}

/// Resource limits.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Limits {
    /// The maximum accepted request body size in bytes, after decompression.
    max_body_size: usize,
    /// Seconds to wait for in-flight work on shutdown.
    shutdown_timeout: u64,
    /// Seconds to wait for a database connection from the pool.
    db_acquire_timeout: u64,
    /// The maximum number of pooled database connections.
    db_max_connections: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_body_size: 10 * 1024 * 1024,
            shutdown_timeout: 10,
            db_acquire_timeout: 5,
            db_max_connections: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    server: Server,
    #[serde(default)]
    agent: Agent,
    #[serde(default)]
    auth: Auth,
    #[serde(default)]
    http: Http,
    #[serde(default)]
    retry: Retry,
    #[serde(default)]
    limits: Limits,
    #[serde(default)]
    logging: LogConfig,
}

impl ConfigObject for ConfigValues {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
#[derive(Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        Ok(Config {
            values: ConfigValues::load(&path)?,
            path,
        })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let server = &mut self.values.server;

        if let Some(address) = overrides.server_address {
            server.address = address;
        }

        if let Some(store_interval) = overrides.store_interval {
            server.store_interval = store_interval
                .trim()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "store_interval"))?;
        }

        if let Some(path) = overrides.file_storage_path {
            server.file_storage_path = path;
        }

        if let Some(restore) = overrides.restore {
            server.restore =
                parse_bool(restore.trim()).map_err(|err| ConfigError::for_field(err, "restore"))?;
        }

        if let Some(dsn) = overrides.database_dsn {
            server.database_dsn = dsn;
        }

        let agent = &mut self.values.agent;

        if let Some(address) = overrides.agent_address {
            agent.address = address;
        }

        if let Some(poll_interval) = overrides.poll_interval {
            agent.poll_interval = poll_interval
                .trim()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "poll_interval"))?;
        }

        if let Some(report_interval) = overrides.report_interval {
            agent.report_interval = report_interval
                .trim()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "report_interval"))?;
        }

        if let Some(key) = overrides.key {
            self.values.auth.key = key;
        }

        if let Some(level) = overrides.log_level {
            self.values.logging.level = level
                .parse()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        if self.values.agent.poll_interval == 0 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("poll_interval"));
        }

        if self.values.agent.report_interval == 0 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("report_interval"));
        }

        Ok(self)
    }

    /// Returns the path to the config folder, empty if running on defaults.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the `host:port` the HTTP server binds to.
    pub fn listen_addr(&self) -> &str {
        &self.values.server.address
    }

    /// Returns the interval between periodic snapshots.
    ///
    /// `None` if snapshots are written synchronously after each update.
    pub fn store_interval(&self) -> Option<Duration> {
        match self.values.server.store_interval {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Returns `true` if the in-memory store is saved after every mutating request.
    pub fn sync_save(&self) -> bool {
        self.values.server.store_interval == 0
    }

    /// Returns the path of the snapshot file, if snapshots are enabled.
    pub fn snapshot_path(&self) -> Option<&Path> {
        let path = self.values.server.file_storage_path.as_str();
        (!path.is_empty()).then(|| Path::new(path))
    }

    /// Returns `true` if the in-memory store is restored from the snapshot on start.
    pub fn restore(&self) -> bool {
        self.values.server.restore
    }

    /// Returns the storage backend of the server.
    pub fn storage_backend(&self) -> StorageBackend {
        match self.values.server.database_dsn.trim() {
            "" => StorageBackend::Memory,
            dsn => StorageBackend::Sql(dsn.to_owned()),
        }
    }

    /// Returns the `host:port` the agent reports to.
    pub fn agent_address(&self) -> &str {
        &self.values.agent.address
    }

    /// Returns the interval between two samples on the agent.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.values.agent.poll_interval)
    }

    /// Returns the interval between two reports on the agent.
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.values.agent.report_interval)
    }

    /// Returns the shared secret used for payload signatures.
    pub fn signing_key(&self) -> Option<&str> {
        let key = self.values.auth.key.as_str();
        (!key.is_empty()).then_some(key)
    }

    /// Returns the connect timeout for outbound requests.
    pub fn http_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.values.http.connection_timeout)
    }

    /// Returns the total timeout for outbound requests.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.values.http.timeout)
    }

    /// Returns the delays between attempts of retried operations.
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.values
            .retry
            .delays
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    /// Returns the maximum accepted size of a request body.
    pub fn max_body_size(&self) -> usize {
        self.values.limits.max_body_size
    }

    /// Returns the time to wait for in-flight work during shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.limits.shutdown_timeout)
    }

    /// Returns the time to wait for a pooled database connection.
    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.values.limits.db_acquire_timeout)
    }

    /// Returns the maximum number of pooled database connections.
    pub fn db_max_connections(&self) -> u32 {
        self.values.limits.db_max_connections
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.listen_addr(), "localhost:8080");
        assert_eq!(config.agent_address(), "localhost:8080");
        assert_eq!(config.store_interval(), Some(Duration::from_secs(300)));
        assert_eq!(config.snapshot_path(), Some(Path::new("metrics.json")));
        assert!(config.restore());
        assert_eq!(config.storage_backend(), StorageBackend::Memory);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.report_interval(), Duration::from_secs(10));
        assert_eq!(config.signing_key(), None);
        assert_eq!(
            config.retry_delays(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5)
            ]
        );
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                server_address: Some("0.0.0.0:9090".to_owned()),
                store_interval: Some("0".to_owned()),
                file_storage_path: Some(String::new()),
                restore: Some("false".to_owned()),
                database_dsn: Some("postgres://localhost/metrics".to_owned()),
                key: Some("secret".to_owned()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.listen_addr(), "0.0.0.0:9090");
        assert_eq!(config.store_interval(), None);
        assert!(config.sync_save());
        assert_eq!(config.snapshot_path(), None);
        assert!(!config.restore());
        assert_eq!(
            config.storage_backend(),
            StorageBackend::Sql("postgres://localhost/metrics".to_owned())
        );
        assert_eq!(config.signing_key(), Some("secret"));
    }

    #[test]
    fn test_invalid_override_names_field() {
        let mut config = Config::default();
        let error = config
            .apply_override(OverridableConfig {
                poll_interval: Some("soon".to_owned()),
                ..Default::default()
            })
            .unwrap_err();

        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        assert_eq!(error.to_string(), "invalid config value (field poll_interval)");
        assert!(error.source().is_some());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = Config::default();
        let error = config
            .apply_override(OverridableConfig {
                poll_interval: Some("0".to_owned()),
                ..Default::default()
            })
            .unwrap_err();

        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
    }

    #[test]
    fn test_bad_restore_value() {
        let mut config = Config::default();
        let error = config
            .apply_override(OverridableConfig {
                restore: Some("maybe".to_owned()),
                ..Default::default()
            })
            .unwrap_err();

        assert_eq!(error.to_string(), "invalid config value (field restore)");
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("config.yml")).unwrap();
        writeln!(
            file,
            "server:\n  address: 127.0.0.1:3000\n  store_interval: 30\nagent:\n  report_interval: 4\nauth:\n  key: abc"
        )
        .unwrap();

        let config = Config::from_path(dir.path()).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:3000");
        assert_eq!(config.store_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.report_interval(), Duration::from_secs(4));
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.signing_key(), Some("abc"));
    }

    #[test]
    fn test_from_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let error = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::CouldNotOpenFile);
    }

    #[test]
    fn test_from_json_value() {
        let config = Config::from_json_value(serde_json::json!({
            "retry": {"delays": [10, 20]},
            "logging": {"level": "debug"},
        }))
        .unwrap();

        assert_eq!(
            config.retry_delays(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
        assert_eq!(config.logging().level, tally_log::LogLevel::Debug);
    }
}
