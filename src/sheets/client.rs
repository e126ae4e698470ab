//! Google Sheets v4 REST client.
//!
//! Authenticates with a bearer token supplied from outside; obtaining or
//! refreshing that token is not this client's job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::IngestConfig;
use crate::error::{ConfigError, DestinationError};
use crate::pipeline::types::Row;
use crate::sheets::{Destination, SheetHandle};

/// Longest error body carried into an error message.
const MAX_ERROR_DETAIL: usize = 300;

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Sheets-backed [`Destination`].
pub struct SheetsClient {
    http: reqwest::Client,
    api_base: Url,
    token: SecretString,
    spreadsheet_id: String,
    sheet_name: String,
    include_filter_match: bool,
    timeout: Duration,
}

impl SheetsClient {
    pub fn new(config: &IngestConfig, token: SecretString) -> Result<Self, ConfigError> {
        let api_base = Url::parse(&config.sheets.api_base).map_err(|e| ConfigError::InvalidValue {
            key: "sheets.api_base".into(),
            message: e.to_string(),
        })?;
        if api_base.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                key: "sheets.api_base".into(),
                message: "must be an http(s) URL".into(),
            });
        }

        let timeout = config.network_timeout();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "sheets".into(),
                message: format!("HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            api_base,
            token,
            spreadsheet_id: config.destination_id.clone(),
            sheet_name: config.sheet_name.clone(),
            include_filter_match: config.include_filter_match,
            timeout,
        })
    }

    /// `{api_base}/spreadsheets/{segments...}`
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("spreadsheets");
            for segment in segments {
                path.push(segment);
            }
        }
        url
    }

    /// Send with auth and a hard timeout, mapping non-2xx to errors.
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
        context: &str,
    ) -> Result<reqwest::Response, DestinationError> {
        debug!(%method, url = %url, context, "Sheets request");
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(self.token.expose_secret());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Err(_) => return Err(DestinationError::Timeout(self.timeout)),
            Ok(Err(e)) if e.is_timeout() => return Err(DestinationError::Timeout(self.timeout)),
            Ok(Err(e)) => return Err(DestinationError::Unavailable(format!("{context}: {e}"))),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, context, &body))
    }

    async fn sheet_titles(&self) -> Result<Vec<String>, DestinationError> {
        let mut url = self.url(&[&self.spreadsheet_id]);
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");
        let response = self
            .send(Method::GET, url, None, "read spreadsheet metadata")
            .await?;
        let meta: SpreadsheetMeta = response.json().await.map_err(|e| {
            DestinationError::Unavailable(format!("unreadable spreadsheet metadata: {e}"))
        })?;
        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    async fn add_sheet(&self) -> Result<(), DestinationError> {
        let url = self.url(&[&format!("{}:batchUpdate", self.spreadsheet_id)]);
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": self.sheet_name } } }]
        });
        self.send(Method::POST, url, Some(body), "create sheet")
            .await?;
        Ok(())
    }

    async fn write_headers(&self) -> Result<(), DestinationError> {
        let range = a1_range(&self.sheet_name, "A1");
        let mut url = self.url(&[&self.spreadsheet_id, "values", &range]);
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = json!({
            "range": range,
            "values": [Row::headers(self.include_filter_match)],
        });
        self.send(Method::PUT, url, Some(body), "write header row")
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Destination for SheetsClient {
    async fn ensure_destination(&self) -> Result<SheetHandle, DestinationError> {
        let titles = self.sheet_titles().await?;
        if titles.iter().any(|t| t == &self.sheet_name) {
            debug!(sheet = %self.sheet_name, "Using existing sheet");
        } else {
            self.add_sheet().await?;
            self.write_headers().await?;
            info!(
                spreadsheet = %self.spreadsheet_id,
                sheet = %self.sheet_name,
                "Created sheet with header row"
            );
        }
        Ok(SheetHandle {
            spreadsheet_id: self.spreadsheet_id.clone(),
            sheet_name: self.sheet_name.clone(),
        })
    }

    async fn append_row(&self, handle: &SheetHandle, row: &Row) -> Result<(), DestinationError> {
        let range = a1_range(&handle.sheet_name, "A1");
        let mut url = self.url(&[
            &handle.spreadsheet_id,
            "values",
            &format!("{range}:append"),
        ]);
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = json!({ "values": [row.cells()] });
        self.send(Method::POST, url, Some(body), "append row").await?;
        Ok(())
    }
}

/// `'Sheet Name'!A1`, with embedded quotes doubled.
pub fn a1_range(sheet_name: &str, cell: &str) -> String {
    format!("'{}'!{cell}", sheet_name.replace('\'', "''"))
}

/// Map a non-success HTTP status onto the destination error taxonomy.
pub fn status_error(status: StatusCode, context: &str, body: &str) -> DestinationError {
    let detail = error_detail(body);
    match status.as_u16() {
        400 => DestinationError::Rejected(format!("{context}: {detail}")),
        401 | 403 => DestinationError::Auth {
            status: status.as_u16(),
        },
        404 => DestinationError::NotFound(format!("{context}: {detail}")),
        code => DestinationError::Unavailable(format!("{context}: HTTP {code} {detail}")),
    }
}

/// The API's error message if the body has one, else the raw body, shortened.
fn error_detail(body: &str) -> String {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    crate::pipeline::types::truncate_chars(&message, MAX_ERROR_DETAIL)
}
