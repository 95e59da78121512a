use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::error::NetworkError;

/// Downloads image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
  async fn fetch(&self, url: &Url) -> Result<Vec<u8>, NetworkError>;
}

pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .gzip(true)
      .build()?;
    Ok(Self { client })
  }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
  async fn fetch(&self, url: &Url) -> Result<Vec<u8>, NetworkError> {
    let response = self.client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(NetworkError::Server {
        status: status.as_u16(),
        message: status.canonical_reason().unwrap_or_default().to_string(),
      });
    }
    Ok(response.bytes().await?.to_vec())
  }
}
