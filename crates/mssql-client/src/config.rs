//! Client configuration.

use std::time::Duration;

use mssql_auth::Credentials;
use mssql_tls::TlsConfig;
use mssql_types::DateTimePolicy;
use tds_protocol::{EncryptionLevel, IsolationLevel, MAX_PACKET_SIZE, MIN_PACKET_SIZE, TdsVersion};

use crate::error::{Error, Result};

/// Port used when neither a port nor an instance name is given.
pub const DEFAULT_PORT: u16 = 1433;

/// Routing redirect handling.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RedirectConfig {
    /// Maximum number of redirects followed during one connect (default: 2).
    pub max_redirects: u8,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self { max_redirects: 2 }
    }
}

impl RedirectConfig {
    /// Create a new redirect configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of redirect attempts.
    #[must_use]
    pub fn max_redirects(mut self, max: u8) -> Self {
        self.max_redirects = max;
        self
    }
}

/// Timers applied by the connection.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct TimeoutConfig {
    /// Whole connect: TCP, TLS and login (default: 15s).
    pub connect_timeout: Duration,
    /// Per request; `None` waits forever (default: 15s).
    pub request_timeout: Option<Duration>,
    /// Wait for the server to acknowledge a cancel (default: 5s).
    pub cancel_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            request_timeout: Some(Duration::from_secs(15)),
            cancel_timeout: Duration::from_secs(5),
        }
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the cancel timeout.
    #[must_use]
    pub fn cancel_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_timeout = timeout;
        self
    }
}

/// Retry policy for transient login errors.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 3).
    pub max_retries: u32,
    /// Pause between attempts (default: 500ms).
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            interval: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of retries.
    #[must_use]
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the pause between attempts.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Never retry.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            interval: Duration::ZERO,
        }
    }

    /// Whether another attempt is allowed after `attempt` failed ones.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

/// Session settings applied right after login and after every reset.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SessionOptions {
    /// Default isolation level (default: read committed).
    pub isolation_level: IsolationLevel,
    /// `SET TEXTSIZE` (default: 2147483647).
    pub text_size: i32,
    /// `SET LANGUAGE` (default: `us_english`).
    pub language: String,
    /// `SET DATEFIRST`, 1 to 7 (default: 7).
    pub date_first: u8,
    /// `SET DATEFORMAT` (default: `mdy`).
    pub date_format: String,
    /// `SET ANSI_NULLS` (default: on).
    pub ansi_nulls: bool,
    /// `SET ANSI_NULL_DFLT_ON` (default: on).
    pub ansi_null_default: bool,
    /// `SET ANSI_PADDING` (default: on).
    pub ansi_padding: bool,
    /// `SET ANSI_WARNINGS` (default: on).
    pub ansi_warnings: bool,
    /// `SET ARITHABORT` (default: on).
    pub arith_abort: bool,
    /// `SET CONCAT_NULL_YIELDS_NULL` (default: on).
    pub concat_null_yields_null: bool,
    /// `SET QUOTED_IDENTIFIER` (default: on).
    pub quoted_identifier: bool,
    /// `SET CURSOR_CLOSE_ON_COMMIT`, left alone when `None`.
    pub cursor_close_on_commit: Option<bool>,
    /// `SET IMPLICIT_TRANSACTIONS`, left alone when `None` (default: off).
    pub implicit_transactions: Option<bool>,
    /// `SET XACT_ABORT`, left alone when `None`.
    pub xact_abort: Option<bool>,
}

const DATE_FORMATS: [&str; 6] = ["mdy", "dmy", "ymd", "ydm", "myd", "dym"];

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::ReadCommitted,
            text_size: i32::MAX,
            language: "us_english".to_string(),
            date_first: 7,
            date_format: "mdy".to_string(),
            ansi_nulls: true,
            ansi_null_default: true,
            ansi_padding: true,
            ansi_warnings: true,
            arith_abort: true,
            concat_null_yields_null: true,
            quoted_identifier: true,
            cursor_close_on_commit: None,
            implicit_transactions: Some(false),
            xact_abort: None,
        }
    }
}

impl SessionOptions {
    /// Create session options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default isolation level.
    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Set the session language.
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the first day of the week.
    #[must_use]
    pub fn date_first(mut self, day: u8) -> Self {
        self.date_first = day;
        self
    }

    /// Set the date format.
    #[must_use]
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    /// Set `XACT_ABORT`.
    #[must_use]
    pub fn xact_abort(mut self, on: Option<bool>) -> Self {
        self.xact_abort = on;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(1..=7).contains(&self.date_first) {
            return Err(Error::Config(format!("datefirst must be 1 to 7, got {}", self.date_first)));
        }
        if !DATE_FORMATS.contains(&self.date_format.to_ascii_lowercase().as_str()) {
            return Err(Error::Config(format!("invalid date format: {}", self.date_format)));
        }
        if self.language.trim().is_empty() {
            return Err(Error::Config("language must not be empty".into()));
        }
        Ok(())
    }

    /// The batch sent after login and after every reset.
    #[must_use]
    pub fn initial_sql(&self) -> String {
        fn on_off(on: bool) -> &'static str {
            if on { "on" } else { "off" }
        }

        let mut lines = vec![
            format!("set textsize {}", self.text_size),
            format!("set quoted_identifier {}", on_off(self.quoted_identifier)),
            format!("set arithabort {}", on_off(self.arith_abort)),
            format!("set ansi_null_dflt_on {}", on_off(self.ansi_null_default)),
            format!("set ansi_nulls {}", on_off(self.ansi_nulls)),
            format!("set ansi_padding {}", on_off(self.ansi_padding)),
            format!("set ansi_warnings {}", on_off(self.ansi_warnings)),
            format!("set concat_null_yields_null {}", on_off(self.concat_null_yields_null)),
        ];
        if let Some(on) = self.cursor_close_on_commit {
            lines.push(format!("set cursor_close_on_commit {}", on_off(on)));
        }
        lines.push(format!("set datefirst {}", self.date_first));
        lines.push(format!("set dateformat {}", self.date_format.to_ascii_lowercase()));
        if let Some(on) = self.implicit_transactions {
            lines.push(format!("set implicit_transactions {}", on_off(on)));
        }
        lines.push(format!("set language N'{}'", self.language.replace('\'', "''")));
        lines.push(format!(
            "set transaction isolation level {}",
            self.isolation_level.as_sql().to_ascii_lowercase()
        ));
        if let Some(on) = self.xact_abort {
            lines.push(format!("set xact_abort {}", on_off(on)));
        }
        lines.join("\n")
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Server hostname or IP address.
    pub host: String,

    /// Server port; mutually exclusive with `instance`.
    pub port: Option<u16>,

    /// Named instance, resolved through SQL Browser.
    pub instance: Option<String>,

    /// Database name.
    pub database: Option<String>,

    /// Authentication credentials.
    pub credentials: Credentials,

    /// Application name (shown in SQL Server management tools).
    pub application_name: String,

    /// Client machine name sent in LOGIN7.
    pub workstation_id: Option<String>,

    /// Requested TDS packet size.
    pub packet_size: u16,

    /// Requested TDS protocol version.
    pub tds_version: TdsVersion,

    /// Encryption level offered in pre-login.
    ///
    /// `Off` still encrypts the login packet when the server supports it;
    /// `NotSupported` never uses TLS.
    pub encrypt: EncryptionLevel,

    /// Accept any server certificate.
    pub trust_server_certificate: bool,

    /// TLS settings; `trust_server_certificate` above takes precedence.
    pub tls: TlsConfig,

    /// Connection timers.
    pub timeouts: TimeoutConfig,

    /// Retry policy for transient login errors.
    pub retry: RetryPolicy,

    /// Routing redirect handling.
    pub redirect: RedirectConfig,

    /// Session settings.
    pub session: SessionOptions,

    /// How zone-aware instants map to the server's wall clock.
    pub datetime_policy: DateTimePolicy,

    /// Ask for a read-only replica (`ApplicationIntent=ReadOnly`).
    pub read_only_intent: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            instance: None,
            database: None,
            credentials: Credentials::sql_server("", ""),
            application_name: "mssql-client".to_string(),
            workstation_id: None,
            packet_size: 4096,
            tds_version: TdsVersion::V7_4,
            encrypt: EncryptionLevel::On,
            trust_server_certificate: false,
            tls: TlsConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
            redirect: RedirectConfig::default(),
            session: SessionOptions::default(),
            datetime_policy: DateTimePolicy::Utc,
            read_only_intent: false,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::Config(format!("invalid boolean for {key}: {value}"))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid {key}: {value}")))
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string into configuration.
    ///
    /// Supports ADO.NET-style connection strings:
    /// ```text
    /// Server=localhost\SQLEXPRESS;Database=mydb;User Id=sa;Password=secret;
    /// ```
    ///
    /// Keys are case-insensitive; unknown keys are ignored.
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut username = String::new();
        let mut password = String::new();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" | "address" | "addr" => {
                    let value = value.strip_prefix("tcp:").unwrap_or(value);
                    let (rest, port) = match value.split_once(',') {
                        Some((rest, port)) => (rest, Some(parse_num::<u16>("port", port.trim())?)),
                        None => (value, None),
                    };
                    let (host, instance) = match rest.split_once('\\') {
                        Some((host, instance)) => (host, Some(instance.to_string())),
                        None => (rest, None),
                    };
                    config.host = match host {
                        "." | "(local)" => "localhost".to_string(),
                        other => other.to_string(),
                    };
                    config.port = port;
                    config.instance = instance;
                }
                "database" | "initial catalog" => {
                    config.database = Some(value.to_string());
                }
                "user id" | "uid" | "user" => username = value.to_string(),
                "password" | "pwd" => password = value.to_string(),
                "application name" | "app" => {
                    config.application_name = value.to_string();
                }
                "workstation id" | "wsid" => {
                    config.workstation_id = Some(value.to_string());
                }
                "connect timeout" | "connection timeout" | "timeout" => {
                    config.timeouts.connect_timeout = Duration::from_secs(parse_num("connect timeout", value)?);
                }
                "command timeout" => {
                    let secs: u64 = parse_num("command timeout", value)?;
                    config.timeouts.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "cancel timeout" => {
                    config.timeouts.cancel_timeout = Duration::from_secs(parse_num("cancel timeout", value)?);
                }
                "connectretrycount" | "connect retry count" => {
                    config.retry.max_retries = parse_num("connect retry count", value)?;
                }
                "connectretryinterval" | "connect retry interval" => {
                    config.retry.interval = Duration::from_secs(parse_num("connect retry interval", value)?);
                }
                "trustservercertificate" | "trust server certificate" => {
                    config.trust_server_certificate = parse_bool(&key, value)?;
                }
                "encrypt" => {
                    config.encrypt = match value.to_ascii_lowercase().as_str() {
                        "no_tls" | "notsupported" => EncryptionLevel::NotSupported,
                        "mandatory" | "required" => EncryptionLevel::Required,
                        _ if parse_bool(&key, value)? => EncryptionLevel::On,
                        _ => EncryptionLevel::Off,
                    };
                }
                "packet size" => {
                    config.packet_size = parse_num("packet size", value)?;
                }
                "language" | "current language" => {
                    config.session.language = value.to_string();
                }
                "applicationintent" | "application intent" => {
                    config.read_only_intent = match value.to_ascii_lowercase().as_str() {
                        "readonly" => true,
                        "readwrite" => false,
                        _ => {
                            return Err(Error::Config(format!("invalid application intent: {value}")));
                        }
                    };
                }
                "useutc" | "use utc" => {
                    config.datetime_policy = if parse_bool(&key, value)? {
                        DateTimePolicy::Utc
                    } else {
                        DateTimePolicy::Local
                    };
                }
                "tdsversion" | "tds version" => {
                    config.tds_version = TdsVersion::parse(value).ok_or_else(|| {
                        Error::Config(format!(
                            "invalid TDS version: {value}. Supported values: 7.1, 7.2, 7.3A, 7.3B, 7.4"
                        ))
                    })?;
                }
                "multipleactiveresultsets" | "multiple active result sets" | "mars" => {
                    tracing::debug!("ignoring MultipleActiveResultSets, one request at a time is supported");
                }
                _ => {
                    tracing::debug!(key = key, "ignoring unknown connection string option");
                }
            }
        }

        if !username.is_empty() || !password.is_empty() {
            config.credentials = Credentials::sql_server(username, password);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for contradictions and out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.port.is_some() && self.instance.is_some() {
            return Err(Error::Config("port and instance name are mutually exclusive".into()));
        }
        if self.instance.as_deref().is_some_and(|i| i.trim().is_empty()) {
            return Err(Error::Config("instance name must not be empty".into()));
        }
        let size = usize::from(self.packet_size);
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            return Err(Error::Config(format!(
                "packet size must be {MIN_PACKET_SIZE} to {MAX_PACKET_SIZE}, got {size}"
            )));
        }
        if self.timeouts.connect_timeout.is_zero() {
            return Err(Error::Config("connect timeout must be positive".into()));
        }
        self.session.validate()
    }

    /// Port to connect to when no instance lookup is needed.
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// The same configuration pointed at a routing target.
    pub(crate) fn redirected(&self, host: &str, port: u16) -> Self {
        let mut config = self.clone();
        config.host = host.to_string();
        config.port = Some(port);
        config.instance = None;
        config
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Connect to a named instance.
    #[must_use]
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set the database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the workstation id.
    #[must_use]
    pub fn workstation_id(mut self, id: impl Into<String>) -> Self {
        self.workstation_id = Some(id.into());
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn packet_size(mut self, size: u16) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the requested TDS version.
    #[must_use]
    pub fn tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set the offered encryption level.
    #[must_use]
    pub fn encrypt(mut self, level: EncryptionLevel) -> Self {
        self.encrypt = level;
        self
    }

    /// Accept any server certificate.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Set TLS options.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set the timers.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect_timeout = timeout;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeouts.request_timeout = timeout;
        self
    }

    /// Set the login retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set redirect handling.
    #[must_use]
    pub fn redirect(mut self, redirect: RedirectConfig) -> Self {
        self.redirect = redirect;
        self
    }

    /// Set session options.
    #[must_use]
    pub fn session(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }

    /// Set the date/time policy.
    #[must_use]
    pub fn datetime_policy(mut self, policy: DateTimePolicy) -> Self {
        self.datetime_policy = policy;
        self
    }

    /// Ask for a read-only replica.
    #[must_use]
    pub fn read_only_intent(mut self, read_only: bool) -> Self {
        self.read_only_intent = read_only;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_parsing() {
        let config =
            Config::from_connection_string("Server=localhost;Database=test;User Id=sa;Password=secret;").unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.database, Some("test".to_string()));
        assert!(matches!(
            &config.credentials,
            Credentials::SqlServer { username, password } if username == "sa" && password == "secret"
        ));
    }

    #[test]
    fn test_connection_string_with_port() {
        let config = Config::from_connection_string("Server=tcp:db.local,1434;Database=test;").unwrap();

        assert_eq!(config.host, "db.local");
        assert_eq!(config.port, Some(1434));
        assert_eq!(config.port_or_default(), 1434);
    }

    #[test]
    fn test_connection_string_with_instance() {
        let config = Config::from_connection_string("Server=.\\SQLEXPRESS;Database=test;").unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.instance, Some("SQLEXPRESS".to_string()));
        assert_eq!(config.port, None);
    }

    #[test]
    fn test_instance_and_port_conflict() {
        let err = Config::from_connection_string("Server=host\\INST,1500").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_connection_string_timeouts_and_retry() {
        let config = Config::from_connection_string(
            "Server=h;Connect Timeout=30;Command Timeout=0;Cancel Timeout=2;ConnectRetryCount=5;ConnectRetryInterval=2",
        )
        .unwrap();
        assert_eq!(config.timeouts.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.timeouts.request_timeout, None);
        assert_eq!(config.timeouts.cancel_timeout, Duration::from_secs(2));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.interval, Duration::from_secs(2));
    }

    #[test]
    fn test_connection_string_session_and_intent() {
        let config = Config::from_connection_string(
            "Server=h;Language=Deutsch;ApplicationIntent=ReadOnly;UseUTC=false;Workstation ID=box;MultipleActiveResultSets=true",
        )
        .unwrap();
        assert_eq!(config.session.language, "Deutsch");
        assert!(config.read_only_intent);
        assert_eq!(config.datetime_policy, DateTimePolicy::Local);
        assert_eq!(config.workstation_id.as_deref(), Some("box"));
    }

    #[test]
    fn test_connection_string_encrypt_values() {
        let parse = |v: &str| Config::from_connection_string(&format!("Server=h;Encrypt={v}")).map(|c| c.encrypt);
        assert_eq!(parse("true").unwrap(), EncryptionLevel::On);
        assert_eq!(parse("no").unwrap(), EncryptionLevel::Off);
        assert_eq!(parse("no_tls").unwrap(), EncryptionLevel::NotSupported);
        assert!(parse("maybe").is_err());
    }

    #[test]
    fn test_connection_string_rejects_bad_values() {
        assert!(Config::from_connection_string("Server=h;Packet Size=100").is_err());
        assert!(Config::from_connection_string("Server=h;Packet Size=abc").is_err());
        assert!(Config::from_connection_string("Server=h;ApplicationIntent=sideways").is_err());
        assert!(Config::from_connection_string("Server=h;TDS Version=9.9").is_err());
        assert!(Config::from_connection_string("novalue").is_err());
    }

    #[test]
    fn test_connection_string_ignores_unknown_keys() {
        let config = Config::from_connection_string("Server=h;Pooling=true;").unwrap();
        assert_eq!(config.host, "h");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.packet_size, 4096);
        assert_eq!(config.tds_version, TdsVersion::V7_4);
        assert_eq!(config.timeouts.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.timeouts.request_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.timeouts.cancel_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.interval, Duration::from_millis(500));
        assert_eq!(config.redirect.max_redirects, 2);
        assert_eq!(config.session.text_size, 2_147_483_647);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_validation() {
        let bad_day = Config::new().session(SessionOptions::new().date_first(8));
        assert!(bad_day.validate().is_err());
        let bad_format = Config::new().session(SessionOptions::new().date_format("abc"));
        assert!(bad_format.validate().is_err());
    }

    #[test]
    fn test_initial_sql() {
        let sql = SessionOptions::new()
            .language("O'Brien")
            .isolation_level(IsolationLevel::Snapshot)
            .initial_sql();
        assert!(sql.starts_with("set textsize 2147483647\n"));
        assert!(sql.contains("set datefirst 7\nset dateformat mdy"));
        assert!(sql.contains("set language N'O''Brien'"));
        assert!(sql.contains("set implicit_transactions off"));
        assert!(!sql.contains("cursor_close_on_commit"));
        assert!(sql.ends_with("set transaction isolation level snapshot"));
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::new().max_retries(2);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn test_redirected_drops_instance() {
        let config = Config::new().instance("A").redirected("node2", 11000);
        assert_eq!(config.host, "node2");
        assert_eq!(config.port, Some(11000));
        assert_eq!(config.instance, None);
    }
}
