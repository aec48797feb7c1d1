// ABOUTME: ConnectionProvider resolves role names to ConnectionHandles; handles open Postgres sessions
// ABOUTME: Role registry is fixed at start-up; TLS follows sslmode with an opt-in self-signed override

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::{Client, NoTls};

use super::reader::CursorReader;
use super::writer::{table_exists, TableWriter};
use crate::config::{ConnectionConfig, Env, Role, SslMode};
use crate::endpoint::{BatchReader, BatchWriter, Endpoint};
use crate::error::{Result, TransferError};
use crate::query::{Query, TableRef};
use crate::utils::retry_with_backoff;

/// TLS settings shared by every connection of the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsPolicy {
    /// Accept invalid or self-signed server certificates (testing only).
    pub allow_self_signed_certs: bool,
}

/// Open one session to `config`, honoring its sslmode.
///
/// `prefer` tries TLS first and falls back to plaintext if the handshake fails.
pub async fn connect(config: &ConnectionConfig, tls: TlsPolicy) -> Result<Client> {
    match config.ssl_mode {
        SslMode::Disable => connect_without_tls(config).await,
        SslMode::Require => connect_with_tls(config, tls).await,
        SslMode::Prefer => match connect_with_tls(config, tls).await {
            Ok(client) => Ok(client),
            Err(TransferError::Configuration(msg)) => Err(TransferError::Configuration(msg)),
            Err(e) => {
                tracing::warn!(
                    "TLS connection to {} failed ({}), retrying without TLS",
                    config.descriptor(),
                    e
                );
                connect_without_tls(config).await
            }
        },
    }
}

/// [`connect`] with up to 3 retries and exponential backoff starting at 1s.
pub async fn connect_with_retry(config: &ConnectionConfig, tls: TlsPolicy) -> Result<Client> {
    retry_with_backoff(|| connect(config, tls), 3, Duration::from_secs(1)).await
}

async fn connect_with_tls(config: &ConnectionConfig, tls: TlsPolicy) -> Result<Client> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(tls.allow_self_signed_certs)
        .build()
        .map_err(|e| TransferError::config(format!("Failed to build TLS connector: {}", e)))?;

    let (client, connection) = config
        .to_pg_config()
        .connect(MakeTlsConnector::new(connector))
        .await
        .map_err(|e| connect_error(config, e))?;

    let descriptor = config.descriptor();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error on {}: {}", descriptor, e);
        }
    });

    Ok(client)
}

async fn connect_without_tls(config: &ConnectionConfig) -> Result<Client> {
    let (client, connection) = config
        .to_pg_config()
        .connect(NoTls)
        .await
        .map_err(|e| connect_error(config, e))?;

    let descriptor = config.descriptor();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error on {}: {}", descriptor, e);
        }
    });

    Ok(client)
}

fn connect_error(config: &ConnectionConfig, e: tokio_postgres::Error) -> TransferError {
    TransferError::transport(
        format!(
            "Failed to connect to {} database {}",
            config.role,
            config.descriptor()
        ),
        e,
    )
}

type Constructor = fn(&Env) -> Result<ConnectionConfig>;

fn source_config(env: &Env) -> Result<ConnectionConfig> {
    ConnectionConfig::from_env(Role::Source, env)
}

fn target_config(env: &Env) -> Result<ConnectionConfig> {
    ConnectionConfig::from_env(Role::Target, env)
}

/// Maps role names to connection constructors.
///
/// The registry is closed when the provider is built; resolving reads only the
/// environment snapshot taken at that point and opens no connection.
pub struct ConnectionProvider {
    registry: BTreeMap<&'static str, Constructor>,
    env: Env,
    tls: TlsPolicy,
}

impl ConnectionProvider {
    pub fn new(env: Env, tls: TlsPolicy) -> Self {
        let mut registry: BTreeMap<&'static str, Constructor> = BTreeMap::new();
        registry.insert(Role::Source.as_str(), source_config);
        registry.insert(Role::Target.as_str(), target_config);
        Self { registry, env, tls }
    }

    pub fn from_process_env(tls: TlsPolicy) -> Self {
        Self::new(Env::from_process(), tls)
    }

    pub fn roles(&self) -> Vec<&'static str> {
        self.registry.keys().copied().collect()
    }

    /// Resolve a role name (case-insensitive) to a handle.
    pub fn resolve(&self, role: &str) -> Result<ConnectionHandle> {
        let constructor = self
            .registry
            .get(role.trim().to_ascii_lowercase().as_str())
            .ok_or_else(|| TransferError::UnknownRole {
                role: role.to_string(),
                known: self.roles().join(", "),
            })?;

        Ok(ConnectionHandle {
            config: constructor(&self.env)?,
            tls: self.tls,
        })
    }
}

/// A resolved database location. Cheap to clone; each use opens fresh sessions.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    config: ConnectionConfig,
    tls: TlsPolicy,
}

impl ConnectionHandle {
    pub fn new(config: ConnectionConfig, tls: TlsPolicy) -> Self {
        Self { config, tls }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connection descriptor without credentials.
    pub fn descriptor(&self) -> String {
        self.config.descriptor()
    }

    /// Open a new session.
    pub async fn connect(&self) -> Result<Client> {
        connect_with_retry(&self.config, self.tls).await
    }
}

#[async_trait]
impl Endpoint for ConnectionHandle {
    fn describe(&self) -> String {
        format!("{} ({})", self.config.role, self.descriptor())
    }

    async fn open_reader(
        &self,
        query: &Query,
        batch_size: usize,
        max_batch_bytes: Option<usize>,
    ) -> Result<Box<dyn BatchReader>> {
        let client = self.connect().await?;
        let reader = CursorReader::open(client, query, batch_size, max_batch_bytes).await?;
        Ok(Box::new(reader))
    }

    async fn open_writer(&self) -> Result<Box<dyn BatchWriter>> {
        let client = self.connect().await?;
        Ok(Box::new(TableWriter::new(client)))
    }

    async fn execute(&self, query: &Query) -> Result<u64> {
        let client = self.connect().await?;
        client
            .execute(query.sql().as_str(), &[])
            .await
            .map_err(|e| {
                TransferError::from_postgres(
                    e,
                    format!("Failed to execute statement on {}", query.table),
                    &query.table.schema,
                    &query.table.name,
                    0,
                )
            })
    }

    async fn truncate(&self, table: &TableRef) -> Result<()> {
        let client = self.connect().await?;
        client
            .batch_execute(&format!("TRUNCATE TABLE {}", table.quoted()))
            .await
            .map_err(|e| {
                TransferError::from_postgres(
                    e,
                    format!("Failed to truncate {}", table),
                    &table.schema,
                    &table.name,
                    0,
                )
            })
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let client = self.connect().await?;
        table_exists(&client, table).await
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        let client = self.connect().await?;
        let row = client
            .query_one(query.sql().as_str(), &[])
            .await
            .map_err(|e| {
                TransferError::from_postgres(
                    e,
                    format!("Failed to count rows in {}", query.table),
                    &query.table.schema,
                    &query.table.name,
                    0,
                )
            })?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }
}
