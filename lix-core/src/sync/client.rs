//! HTTP client for a lix server

use reqwest::StatusCode;

use super::protocol::{NewLixResponse, QueryRequest, QueryResponse, SqlRow, execute_query};
use super::retry::{RetryConfig, with_retry};
use super::{displaced_rows, select_all, upsert_rows};
use crate::config::SyncConfig;
use crate::error::{LixError, Result};
use crate::lix::Lix;

/// Pushes and pulls table rows of one lix
#[derive(Debug, Clone)]
pub struct SyncClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
    batch_size: usize,
}

impl SyncClient {
    /// Create a client for the server in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LixError::Configuration`] for an empty server url and
    /// [`LixError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let base_url = config.server_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(LixError::Configuration("sync.server_url is empty".to_string()));
        }
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url,
            retry: RetryConfig::from(config),
            batch_size: config.batch_size.max(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload the whole store and return the id the server registered it under
    pub async fn register(&self, lix: &Lix) -> Result<String> {
        let blob = lix.to_blob().await?;
        let url = format!("{}/lsp/new", self.base_url);

        let (http, url, blob) = (&self.http, &url, &blob);
        let response: NewLixResponse = with_retry(&self.retry, move || async move {
            tracing::debug!(url = %url, bytes = blob.len(), "Registering lix");
            let response = http
                .post(url)
                .header("Content-Type", "application/octet-stream")
                .body(blob.clone())
                .send()
                .await?;
            let response = check_status(response, None).await?;
            Ok(response.json::<NewLixResponse>().await?)
        })
        .await?;

        tracing::info!(id = %response.id, "Registered lix on server");
        Ok(response.id)
    }

    /// Run one statement against the remote lix `id`
    pub async fn query(&self, id: &str, request: &QueryRequest) -> Result<QueryResponse> {
        let url = format!("{}/lsp/lix/{}/query", self.base_url, id);
        let (http, url) = (&self.http, &url);
        with_retry(&self.retry, move || async move {
            tracing::debug!(url = %url, sql = %request.sql, params = request.params.len(), "Sync query");
            let response = http.post(url).json(request).send().await?;
            let response = check_status(response, Some(id)).await?;
            Ok(response.json::<QueryResponse>().await?)
        })
        .await
    }

    /// Copy every row of `tables` to the remote lix. Returns the number of rows sent.
    ///
    /// # Errors
    ///
    /// Returns [`LixError::InvalidTable`] before any request if a table is not
    /// replicated.
    pub async fn push_rows_to_server(&self, lix: &Lix, id: &str, tables: &[&str]) -> Result<usize> {
        let selects = tables
            .iter()
            .map(|table| select_all(table).map(|request| (*table, request)))
            .collect::<Result<Vec<_>>>()?;
        lix.settled().await?;

        let mut sent = 0;
        for (table, select) in selects {
            let rows = lix
                .db
                .read(move |conn| execute_query(conn, &select))
                .await?
                .rows;

            for chunk in rows.chunks(self.batch_size) {
                self.query(id, &upsert_rows(table, chunk)?).await?;
            }
            tracing::debug!(table, rows = rows.len(), "Pushed table");
            sent += rows.len();
        }

        tracing::info!(id, tables = tables.len(), rows = sent, "Pushed rows to server");
        Ok(sent)
    }

    /// Copy every row of `tables` from the remote lix into `lix`, replacing
    /// rows with the same key. Returns the number of rows received.
    pub async fn pull_rows_from_server(&self, lix: &Lix, id: &str, tables: &[&str]) -> Result<usize> {
        let selects = tables
            .iter()
            .map(|table| select_all(table).map(|request| (*table, request)))
            .collect::<Result<Vec<_>>>()?;

        let mut pulled: Vec<(&str, Vec<SqlRow>)> = Vec::with_capacity(selects.len());
        for (table, select) in &selects {
            let rows = self.query(id, select).await?.rows;
            tracing::debug!(table, rows = rows.len(), "Pulled table");
            pulled.push((*table, rows));
        }

        lix.settled().await?;
        let batch_size = self.batch_size;
        let received = lix
            .db
            .transaction(move |tx| {
                let mut received = 0;
                for (table, rows) in &pulled {
                    let displaced = displaced_rows(tx, table, rows)?;
                    if displaced > 0 {
                        tracing::warn!(table, rows = displaced, "Pulled rows replace local rows with another id");
                    }
                    for chunk in rows.chunks(batch_size) {
                        execute_query(tx, &upsert_rows(table, chunk)?)?;
                    }
                    received += rows.len();
                }
                Ok(received)
            })
            .await?;

        tracing::info!(id, tables = tables.len(), rows = received, "Pulled rows from server");
        Ok(received)
    }
}

/// Map non-success responses to errors, keeping the body as message
async fn check_status(response: reqwest::Response, id: Option<&str>) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(match (status, id) {
        (StatusCode::NOT_FOUND, Some(id)) => LixError::LixNotFound(id.to_string()),
        (StatusCode::CONFLICT, _) => LixError::LixAlreadyExists(message),
        _ => LixError::Server {
            status: status.as_u16(),
            message,
        },
    })
}
