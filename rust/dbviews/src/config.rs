use crate::{
    auth::Credentials,
    notify::WebhookConfig,
    time::{DateFormat, OutputDateFormat, PARAMETER_FORMAT},
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub max_pool_size: u32,
    pub connect_timeout: Duration,
    pub pg_ssl_root_cert: Option<String>,
    pub pg_ssl_cert: Option<String>,
    pub pg_ssl_key: Option<String>,
    pub views_path: PathBuf,
    /// Always set from the environment; `None` only for embedded use.
    pub credentials: Option<Credentials>,
    pub allowed_origins: Option<Vec<String>>,
    pub sql_date_format: DateFormat,
    pub output_date_format: OutputDateFormat,
    pub max_rows: Option<u64>,
    pub request_timeout: Duration,
    pub max_concurrent_queries: usize,
    pub notify: Option<WebhookConfig>,
    pub notify_cooldown: Duration,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    views_listen_addr: Option<String>,
    #[serde(default)]
    views_listen_host: Option<String>,
    #[serde(default)]
    views_listen_port: Option<u16>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    views_database_url: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    views_max_pool_size: u32,
    #[serde(default = "default_connect_timeout_secs")]
    views_db_connect_timeout_secs: u64,
    #[serde(default)]
    pgsslrootcert: Option<String>,
    #[serde(default)]
    pgsslcert: Option<String>,
    #[serde(default)]
    pgsslkey: Option<String>,
    #[serde(default = "default_views_path")]
    views_config_path: String,
    #[serde(default)]
    views_username: Option<String>,
    #[serde(default)]
    views_password: Option<String>,
    #[serde(default)]
    views_allowed_origins: Option<String>,
    #[serde(default = "default_sql_date_format")]
    views_sql_date_format: String,
    #[serde(default)]
    views_output_date_format: Option<String>,
    #[serde(default)]
    views_max_rows: Option<u64>,
    #[serde(default = "default_timeout_secs")]
    views_request_timeout_secs: u64,
    #[serde(default)]
    views_max_concurrent_queries: Option<usize>,
    #[serde(default)]
    views_notify_url: Option<String>,
    #[serde(default)]
    views_notify_recipients: Option<String>,
    #[serde(default)]
    views_notify_sender: Option<String>,
    #[serde(default = "default_notify_timeout_ms")]
    views_notify_timeout_ms: u64,
    #[serde(default = "default_notify_cooldown_secs")]
    views_notify_cooldown_secs: u64,
}

const fn default_pool_size() -> u32 {
    10
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_views_path() -> String {
    "views_config.json".to_string()
}

fn default_sql_date_format() -> String {
    PARAMETER_FORMAT.to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_notify_timeout_ms() -> u64 {
    5000
}

const fn default_notify_cooldown_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse VIEWS_* environment variables")?;

        let listen_addr = resolve_addr(
            raw.views_listen_addr,
            raw.views_listen_host,
            raw.views_listen_port.or(raw.port),
        )?;

        let database_url = raw
            .views_database_url
            .or(raw.database_url)
            .or_else(|| env::var("DATABASE_URL").ok())
            .context("VIEWS_DATABASE_URL or DATABASE_URL must be set")?;

        let credentials = Some(required_credentials(
            raw.views_username,
            raw.views_password,
        )?);

        let sql_date_format = DateFormat::new(raw.views_sql_date_format)
            .context("invalid VIEWS_SQL_DATE_FORMAT")?;
        let output_date_format = match raw.views_output_date_format {
            Some(pattern) => OutputDateFormat::Pattern(
                DateFormat::new(pattern).context("invalid VIEWS_OUTPUT_DATE_FORMAT")?,
            ),
            None => OutputDateFormat::Iso8601,
        };

        let notify = raw.views_notify_url.map(|url| WebhookConfig {
            url,
            recipients: raw
                .views_notify_recipients
                .as_deref()
                .and_then(split_csv)
                .unwrap_or_default(),
            sender: raw.views_notify_sender,
            timeout: Duration::from_millis(raw.views_notify_timeout_ms.max(1)),
        });

        let max_pool_size = raw.views_max_pool_size.max(1);

        Ok(Self {
            listen_addr,
            database_url,
            max_pool_size,
            connect_timeout: Duration::from_secs(raw.views_db_connect_timeout_secs.max(1)),
            pg_ssl_root_cert: raw.pgsslrootcert,
            pg_ssl_cert: raw.pgsslcert,
            pg_ssl_key: raw.pgsslkey,
            views_path: PathBuf::from(raw.views_config_path),
            credentials,
            allowed_origins: raw.views_allowed_origins.as_deref().and_then(split_csv),
            sql_date_format,
            output_date_format,
            max_rows: raw.views_max_rows.filter(|rows| *rows > 0),
            request_timeout: Duration::from_secs(raw.views_request_timeout_secs.max(1)),
            max_concurrent_queries: raw
                .views_max_concurrent_queries
                .unwrap_or(max_pool_size as usize)
                .max(1),
            notify,
            notify_cooldown: Duration::from_secs(raw.views_notify_cooldown_secs),
        })
    }

    /// Defaults for embedding the service, e.g. in tests.
    pub fn embedded(database_url: String) -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url,
            max_pool_size: 4,
            connect_timeout: Duration::from_secs(default_connect_timeout_secs()),
            pg_ssl_root_cert: None,
            pg_ssl_cert: None,
            pg_ssl_key: None,
            views_path: PathBuf::from(default_views_path()),
            credentials: None,
            allowed_origins: None,
            sql_date_format: DateFormat::default(),
            output_date_format: OutputDateFormat::Iso8601,
            max_rows: None,
            request_timeout: Duration::from_secs(default_timeout_secs()),
            max_concurrent_queries: 4,
            notify: None,
            notify_cooldown: Duration::from_secs(default_notify_cooldown_secs()),
        }
    }
}

fn required_credentials(
    username: Option<String>,
    password: Option<String>,
) -> Result<Credentials> {
    let username = username
        .filter(|value| !value.is_empty())
        .context("VIEWS_USERNAME must be set")?;
    let password = password
        .filter(|value| !value.is_empty())
        .context("VIEWS_PASSWORD must be set")?;
    Ok(Credentials::new(username, password))
}

fn split_csv(csv: &str) -> Option<Vec<String>> {
    let entries: Vec<_> = csv
        .split(',')
        .filter_map(|part| {
            let entry = part.trim();
            if entry.is_empty() {
                None
            } else {
                Some(entry.to_string())
            }
        })
        .collect();
    if entries.is_empty() {
        None
    } else {
        Some(entries)
    }
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid VIEWS_LISTEN_ADDR value")?
            .next()
            .context("VIEWS_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(8080);
    let combined = format!("{}:{}", host, port);
    combined
        .to_socket_addrs()
        .context("invalid listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_origin_list() {
        assert_eq!(
            split_csv(" https://a.example , ,https://b.example"),
            Some(vec![
                "https://a.example".to_string(),
                "https://b.example".to_string()
            ])
        );
        assert_eq!(split_csv(" , "), None);
    }

    #[test]
    fn resolves_listen_address() {
        let addr = resolve_addr(None, Some("127.0.0.1".into()), Some(9000)).unwrap();
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 9000)));

        let addr = resolve_addr(Some("127.0.0.1:7000".into()), None, Some(9000)).unwrap();
        assert_eq!(addr.port(), 7000);

        let addr = resolve_addr(None, None, None).unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn credentials_are_mandatory() {
        let credentials =
            required_credentials(Some("report".into()), Some("s3cret".into())).unwrap();
        assert_eq!(credentials, Credentials::new("report", "s3cret"));

        for (username, password, missing) in [
            (None, None, "VIEWS_USERNAME"),
            (Some("report"), None, "VIEWS_PASSWORD"),
            (None, Some("s3cret"), "VIEWS_USERNAME"),
            (Some("report"), Some(""), "VIEWS_PASSWORD"),
        ] {
            let err = required_credentials(
                username.map(str::to_string),
                password.map(str::to_string),
            )
            .unwrap_err();
            assert!(err.to_string().contains(missing), "{err}");
        }
    }

    #[test]
    fn embedded_defaults() {
        let config = AppConfig::embedded("postgres://unused/db".into());
        assert!(config.credentials.is_none());
        assert_eq!(config.sql_date_format.pattern(), PARAMETER_FORMAT);
        assert_eq!(config.output_date_format, OutputDateFormat::Iso8601);
    }
}
