//! The store adapter: a thin client for the ClickHouse HTTP interface.

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use derive_more::Debug;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use tracing::{debug, error};
use url::Url;

use primitives::{BlockRef, BLOCKS_TABLE};

use crate::error::StoreError;

/// The three operations the framework needs from the columnar store.
///
/// `StoreClient` is the production implementation; tests substitute
/// in-memory fakes. Implementations must tolerate concurrent in-flight
/// calls, since per-table flushes share one handle.
#[async_trait]
pub trait Store: Send + Sync {
    /// Execute a SELECT-style statement and return one decoded JSON object
    /// per result row.
    async fn query_rows(&self, sql: &str) -> Result<Vec<serde_json::Value>, StoreError>;

    /// Execute a DDL/DELETE-style statement returning no rows.
    async fn command(&self, sql: &str) -> Result<(), StoreError>;

    /// Bulk-insert `JSONEachRow` lines into a table of the configured
    /// database.
    async fn insert(&self, table: &str, body: Bytes) -> Result<(), StoreError>;
}

/// Decode raw result rows into a typed row struct.
pub fn decode_rows<T: DeserializeOwned>(
    rows: Vec<serde_json::Value>,
) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|source| StoreError::Decode { source }))
        .collect()
}

/// Read the head cursor: the highest durable row of the `blocks` table.
pub async fn latest_block_ref(
    store: &dyn Store,
    database: &str,
) -> Result<Option<BlockRef>, StoreError> {
    let sql = format!(
        "SELECT number, hash FROM {database}.{BLOCKS_TABLE} ORDER BY number DESC LIMIT 1"
    );
    let rows = decode_rows::<BlockRef>(store.query_rows(&sql).await?)?;
    Ok(rows.into_iter().next())
}

/// ClickHouse HTTP client
#[derive(Clone, Debug)]
pub struct StoreClient {
    /// Underlying HTTP client
    #[debug(skip)]
    http: HttpClient,
    /// Store endpoint
    url: Url,
    /// Target database name
    database: String,
    /// Username
    username: String,
    /// Password
    password: String,
}

impl StoreClient {
    /// Create a new store client for the given endpoint and database.
    pub fn new(url: Url, database: String, username: String, password: String) -> Self {
        Self { http: HttpClient::new(), url, database, username, password }
    }

    /// The target database this client writes to.
    pub fn database(&self) -> &str {
        &self.database
    }

    fn request(&self) -> reqwest::RequestBuilder {
        self.http
            .post(self.url.clone())
            .header("X-ClickHouse-User", &self.username)
            .header("X-ClickHouse-Key", &self.password)
            .query(&[("database", self.database.as_str())])
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<String, StoreError> {
        let response = request.send().await.map_err(|source| StoreError::Transport { source })?;
        let status = response.status();
        let text = response.text().await.map_err(|source| StoreError::Transport { source })?;
        if !status.is_success() {
            return Err(StoreError::Server {
                status: status.as_u16(),
                message: text.trim().to_owned(),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl Store for StoreClient {
    async fn query_rows(&self, sql: &str) -> Result<Vec<serde_json::Value>, StoreError> {
        let start = Instant::now();
        let result = self.execute(self.request().body(format!("{sql} FORMAT JSONEachRow"))).await;
        let duration_ms = start.elapsed().as_millis();

        let text = match result {
            Ok(text) => {
                debug!(query = sql, duration_ms, "store query executed");
                text
            }
            Err(e) => {
                error!(query = sql, duration_ms, error = %e, "store query failed");
                return Err(e);
            }
        };

        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|source| StoreError::Decode { source }))
            .collect()
    }

    async fn command(&self, sql: &str) -> Result<(), StoreError> {
        let start = Instant::now();
        let result = self.execute(self.request().body(sql.to_owned())).await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(_) => {
                debug!(query = sql, duration_ms, "store command executed");
                Ok(())
            }
            Err(e) => {
                error!(query = sql, duration_ms, error = %e, "store command failed");
                Err(e)
            }
        }
    }

    async fn insert(&self, table: &str, body: Bytes) -> Result<(), StoreError> {
        let statement = format!("INSERT INTO {}.{table} FORMAT JSONEachRow", self.database);
        let start = Instant::now();
        let bytes = body.len();
        let result = self.execute(self.request().query(&[("query", &statement)]).body(body)).await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(_) => {
                debug!(table, bytes, duration_ms, "store insert executed");
                Ok(())
            }
            Err(e) => {
                error!(table, bytes, duration_ms, error = %e, "store insert failed");
                Err(e)
            }
        }
    }
}
