//! The remote document store, as seen by the sync engine.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::error::NetworkError;
use crate::store::{MutationLogEntry, Operation, RemoteRecord};

/// One journaled mutation as sent to the remote. `sequence_id` lets the
/// remote drop a replayed item it already applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushItem {
  pub sequence_id: i64,
  pub id: String,
  pub operation: Operation,
  pub payload: Value,
}

impl From<&MutationLogEntry> for PushItem {
  fn from(entry: &MutationLogEntry) -> Self {
    Self {
      sequence_id: entry.sequence_id,
      id: entry.entity_id.clone(),
      operation: entry.operation,
      payload: entry.snapshot.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
  Accepted,
  /// Ids the remote refused; the whole batch counts as failed
  Partial { failed: Vec<String> },
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
  /// Records of `entity_type` written strictly after `since` (everything when `None`).
  async fn pull_since(
    &self,
    entity_type: &str,
    since: Option<DateTime<Utc>>,
  ) -> Result<Vec<RemoteRecord>, NetworkError>;

  async fn push_batch(
    &self,
    entity_type: &str,
    items: &[PushItem],
  ) -> Result<PushOutcome, NetworkError>;
}

#[derive(Serialize)]
struct PushRequest<'a> {
  items: &'a [PushItem],
}

#[derive(Deserialize, Default)]
struct PushResponse {
  #[serde(default)]
  failed: Vec<String>,
}

/// JSON-over-HTTP adapter.
///
/// - `GET {base}/{entity_type}?since=<rfc3339>` returns an array of records
/// - `POST {base}/{entity_type}/batch` takes `{"items": [...]}` and answers
///   `{"failed": [ids]}`
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl HttpRemote {
  pub fn new(base: &str, timeout: Duration, token: Option<String>) -> Result<Self, NetworkError> {
    let mut base =
      Url::parse(base).map_err(|e| NetworkError::Unreachable(format!("invalid url {base}: {e}")))?;
    // Url::join replaces the last segment unless the path ends with a slash.
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .gzip(true)
      .build()?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  fn endpoint(&self, path: &str) -> Result<Url, NetworkError> {
    self
      .base
      .join(path)
      .map_err(|e| NetworkError::Unreachable(format!("invalid endpoint {path}: {e}")))
  }

  fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, NetworkError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let message = response.text().await.unwrap_or_default();
  Err(NetworkError::Server {
    status: status.as_u16(),
    message,
  })
}

#[async_trait]
impl RemoteStore for HttpRemote {
  async fn pull_since(
    &self,
    entity_type: &str,
    since: Option<DateTime<Utc>>,
  ) -> Result<Vec<RemoteRecord>, NetworkError> {
    let mut url = self.endpoint(entity_type)?;
    if let Some(since) = since {
      url
        .query_pairs_mut()
        .append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Millis, true));
    }

    let response = self.authorize(self.client.get(url)).send().await?;
    let records = check_status(response).await?.json().await?;
    Ok(records)
  }

  async fn push_batch(
    &self,
    entity_type: &str,
    items: &[PushItem],
  ) -> Result<PushOutcome, NetworkError> {
    let url = self.endpoint(&format!("{entity_type}/batch"))?;
    let response = self
      .authorize(self.client.post(url))
      .json(&PushRequest { items })
      .send()
      .await?;

    let body: PushResponse = check_status(response).await?.json().await?;
    if body.failed.is_empty() {
      Ok(PushOutcome::Accepted)
    } else {
      Ok(PushOutcome::Partial {
        failed: body.failed,
      })
    }
  }
}
