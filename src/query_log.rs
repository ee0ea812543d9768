use crate::lookup::Query;
use crate::models::{QueryLogConfig, QueryLogMode};
use anyhow::{anyhow, Result};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Environment variable holding the bearer token for the sheet service.
pub const TOKEN_ENV: &str = "SHEET_LOG_TOKEN";

const NEW_WORKSHEET_ROWS: u32 = 100;
const NEW_WORKSHEET_COLS: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum QueryLogError {
    #[error("invalid sheet endpoint '{endpoint}': {reason}")]
    Endpoint { endpoint: String, reason: String },
    #[error("sheet request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sheet service answered {status} while trying to {action}")]
    Status {
        action: &'static str,
        status: StatusCode,
    },
    #[error("failed to append to query log file: {0}")]
    File(#[from] csv::Error),
    #[error("query log file is not writable: {0}")]
    Io(#[from] std::io::Error),
    #[error("query log task did not finish: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One logged query: `[timestamp, rank, category, gender, entry channel]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryLogEntry {
    pub timestamp: String,
    pub rank: u32,
    pub category: String,
    pub gender: String,
    pub entry_channel: String,
}

impl QueryLogEntry {
    pub fn from_query(query: &Query) -> Self {
        Self {
            timestamp: query.submitted_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            rank: query.rank,
            category: query.category.clone(),
            gender: query.gender.clone(),
            entry_channel: query.entry_channel.clone(),
        }
    }

    pub fn to_row(&self) -> [String; 5] {
        [
            self.timestamp.clone(),
            self.rank.to_string(),
            self.category.clone(),
            self.gender.clone(),
            self.entry_channel.clone(),
        ]
    }
}

#[derive(Debug)]
pub enum QueryLogSink {
    Sheet(SheetLogClient),
    File(PathBuf),
    Disabled,
}

impl QueryLogSink {
    pub fn from_config(config: &QueryLogConfig) -> Result<Self> {
        match config.mode {
            QueryLogMode::Sheet => {
                let endpoint = config
                    .endpoint
                    .clone()
                    .ok_or_else(|| anyhow!("query_log.endpoint is required when mode = \"sheet\""))?;
                let token = std::env::var(TOKEN_ENV).ok();
                if token.is_none() {
                    tracing::warn!("{} is not set; sheet requests will be unauthenticated", TOKEN_ENV);
                }
                Ok(Self::Sheet(SheetLogClient::new(
                    endpoint,
                    config.spreadsheet.clone(),
                    config.worksheet.clone(),
                    token,
                    Duration::from_secs(config.timeout_secs),
                )))
            }
            QueryLogMode::File => Ok(Self::File(PathBuf::from(&config.file_path))),
            QueryLogMode::Disabled => Ok(Self::Disabled),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            QueryLogSink::Sheet(client) => {
                format!("sheet '{}' / '{}'", client.spreadsheet, client.worksheet)
            }
            QueryLogSink::File(path) => format!("file {}", path.display()),
            QueryLogSink::Disabled => "disabled".to_string(),
        }
    }

    /// Appends one row. A single attempt; callers decide what a failure means.
    pub async fn append(&self, entry: &QueryLogEntry) -> Result<(), QueryLogError> {
        match self {
            QueryLogSink::Sheet(client) => client.append(entry).await,
            QueryLogSink::File(path) => {
                let (path, entry) = (path.clone(), entry.clone());
                tokio::task::spawn_blocking(move || append_to_file(&path, &entry)).await?
            }
            QueryLogSink::Disabled => Ok(()),
        }
    }
}

fn append_to_file(path: &Path, entry: &QueryLogEntry) -> Result<(), QueryLogError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer.write_record(entry.to_row())?;
    writer.flush()?;
    Ok(())
}

/// Runs the append on its own task so the response that triggered it is
/// already complete whatever happens here.
pub fn spawn_append(sink: Arc<QueryLogSink>, entry: QueryLogEntry) -> JoinHandle<Result<(), QueryLogError>> {
    tokio::spawn(async move {
        let result = sink.append(&entry).await;
        match &result {
            Ok(()) => tracing::debug!(rank = entry.rank, "query logged"),
            Err(err) => tracing::warn!(rank = entry.rank, error = %err, "query was not logged"),
        }
        result
    })
}

/// Waits for a spawned append and folds task failures into the log error.
pub async fn await_append(handle: JoinHandle<Result<(), QueryLogError>>) -> Result<(), QueryLogError> {
    handle.await?
}

/// Client for a JSON spreadsheet service addressed by spreadsheet name and
/// worksheet title.
#[derive(Debug)]
pub struct SheetLogClient {
    client: reqwest::Client,
    endpoint: String,
    spreadsheet: String,
    worksheet: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct NewWorksheet<'a> {
    title: &'a str,
    rows: u32,
    cols: u32,
}

#[derive(Serialize)]
struct AppendRow {
    values: [String; 5],
}

impl SheetLogClient {
    pub fn new(
        endpoint: String,
        spreadsheet: String,
        worksheet: String,
        token: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            spreadsheet,
            worksheet,
            token,
            timeout,
        }
    }

    pub async fn append(&self, entry: &QueryLogEntry) -> Result<(), QueryLogError> {
        self.ensure_worksheet().await?;

        let url = self.url(&["worksheets", self.worksheet.as_str(), "rows"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(&AppendRow {
                values: entry.to_row(),
            })
            .send()
            .await?;
        expect_success("append the query row", response.status())
    }

    /// Creates the worksheet the first time it is needed.
    async fn ensure_worksheet(&self) -> Result<(), QueryLogError> {
        let url = self.url(&["worksheets", self.worksheet.as_str()])?;
        let response = self.authorize(self.client.get(url)).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            return expect_success("look up the worksheet", response.status());
        }

        tracing::info!(worksheet = %self.worksheet, "creating query log worksheet");
        let url = self.url(&["worksheets"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(&NewWorksheet {
                title: &self.worksheet,
                rows: NEW_WORKSHEET_ROWS,
                cols: NEW_WORKSHEET_COLS,
            })
            .send()
            .await?;
        expect_success("create the worksheet", response.status())
    }

    fn url(&self, tail: &[&str]) -> Result<Url, QueryLogError> {
        let endpoint_error = |reason: String| QueryLogError::Endpoint {
            endpoint: self.endpoint.clone(),
            reason,
        };
        let mut url = Url::parse(&self.endpoint).map_err(|err| endpoint_error(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| endpoint_error("cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(["spreadsheets", self.spreadsheet.as_str()])
            .extend(tail);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(self.timeout);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn expect_success(action: &'static str, status: StatusCode) -> Result<(), QueryLogError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(QueryLogError::Status { action, status })
    }
}
