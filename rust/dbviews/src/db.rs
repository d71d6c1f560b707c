use crate::config::AppConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bb8::{ManageConnection, Pool};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::certs;
use std::fs::File;
use std::io::BufReader;
use std::time::Duration;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{error, info};

pub type PgPool = Pool<PgConnectionManager>;

pub async fn connect_pool(config: &AppConfig) -> Result<PgPool> {
    let pool = Pool::builder()
        .max_size(config.max_pool_size)
        .connection_timeout(config.connect_timeout)
        .build(PgConnectionManager::from_config(config)?)
        .await
        .context("failed to build PostgreSQL connection pool")?;

    // One-time connectivity check; an outage here is reported, not fatal.
    match pool.get().await {
        Ok(_) => info!("database connectivity check succeeded"),
        Err(err) => error!(error = ?err, "initial database connectivity check failed"),
    }

    Ok(pool)
}

/// Builds the pool without opening any connection.
pub fn lazy_pool(config: &AppConfig) -> Result<PgPool> {
    Ok(Pool::builder()
        .max_size(config.max_pool_size)
        .connection_timeout(config.connect_timeout)
        .build_unchecked(PgConnectionManager::from_config(config)?))
}

#[derive(Clone)]
pub struct PgConnectionManager {
    config: PgConfig,
    tls: PgTls,
}

#[derive(Clone)]
enum PgTls {
    None,
    Rustls(MakeRustlsConnect),
}

impl PgConnectionManager {
    fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            &config.database_url,
            config.request_timeout,
            config.pg_ssl_root_cert.as_deref(),
            config.pg_ssl_cert.as_deref(),
            config.pg_ssl_key.as_deref(),
        )
    }

    fn new(
        database_url: &str,
        statement_timeout: Duration,
        root_cert: Option<&str>,
        client_cert: Option<&str>,
        client_key: Option<&str>,
    ) -> Result<Self> {
        let mut config = database_url
            .parse::<PgConfig>()
            .context("invalid DATABASE_URL")?;
        let options = session_options(config.get_options(), statement_timeout);
        config.options(&options);
        let tls = if let Some(path) = root_cert {
            PgTls::Rustls(build_tls_connector(path, client_cert, client_key)?)
        } else {
            PgTls::None
        };
        Ok(Self { config, tls })
    }
}

/// Server-side limits for every session: bounded statements, read-only transactions.
fn session_options(existing: Option<&str>, statement_timeout: Duration) -> String {
    let limits = format!(
        "-c statement_timeout={} -c default_transaction_read_only=on",
        statement_timeout.as_millis()
    );
    match existing.map(str::trim).filter(|opts| !opts.is_empty()) {
        Some(opts) => format!("{opts} {limits}"),
        None => limits,
    }
}

#[async_trait]
impl ManageConnection for PgConnectionManager {
    type Connection = Client;
    type Error = tokio_postgres::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let config = self.config.clone();
        let client = match &self.tls {
            PgTls::None => {
                let (client, connection) = config.connect(NoTls).await?;
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        error!(error = %err, "database connection terminated");
                    }
                });
                client
            }
            PgTls::Rustls(connector) => {
                let (client, connection) = config.connect(connector.clone()).await?;
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        error!(error = %err, "database connection terminated");
                    }
                });
                client
            }
        };
        Ok(client)
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_closed()
    }
}

fn build_tls_connector(
    root_cert: &str,
    client_cert: Option<&str>,
    client_key: Option<&str>,
) -> Result<MakeRustlsConnect> {
    let mut reader = BufReader::new(File::open(root_cert).context("failed to open PGSSLROOTCERT")?);
    let mut root_store = RootCertStore::empty();
    for cert in certs(&mut reader) {
        let cert = cert.context("failed to parse PGSSLROOTCERT")?;
        root_store
            .add(cert)
            .map_err(|_| anyhow::anyhow!("invalid certificate in PGSSLROOTCERT"))?;
    }

    Ok(MakeRustlsConnect::new(build_client_config(
        root_store,
        root_cert,
        client_cert,
        client_key,
    )?))
}

fn build_client_config(
    root_store: RootCertStore,
    root_cert: &str,
    client_cert: Option<&str>,
    client_key: Option<&str>,
) -> Result<ClientConfig> {
    let builder = ClientConfig::builder().with_root_certificates(root_store);

    match (client_cert, client_key) {
        (None, None) => Ok(builder.with_no_client_auth()),
        (Some(cert), Some(key)) => {
            let certs = load_client_certs(cert)?;
            let key = load_client_key(key)?;
            builder
                .with_client_auth_cert(certs, key)
                .with_context(|| format!("failed to build client TLS config for {root_cert}"))
        }
        _ => anyhow::bail!("PGSSLCERT and PGSSLKEY must both be set (or neither)"),
    }
}

fn load_client_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open PGSSLCERT file '{path}'"))?,
    );

    let mut chain = Vec::new();
    for cert in certs(&mut reader) {
        chain.push(cert.context("failed to parse PGSSLCERT")?);
    }

    if chain.is_empty() {
        anyhow::bail!("PGSSLCERT contained no certificates");
    }

    Ok(chain)
}

fn load_client_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open PGSSLKEY file '{path}'"))?,
    );

    let key = rustls_pemfile::private_key(&mut reader)
        .context("failed to parse PGSSLKEY")?
        .context("PGSSLKEY contained no private keys")?;

    Ok(key)
}
