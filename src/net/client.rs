use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use thiserror::Error;

use super::types::{Request, Response};

/// Failure to get any response at all.
///
/// An HTTP error status is not a `NetworkError`: the request reached the
/// origin and the response is returned as-is.
#[derive(Error, Debug)]
pub enum NetworkError {
  #[error("origin unreachable: {0}")]
  Unreachable(String),

  #[error("request timed out: {0}")]
  Timeout(String),

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl From<reqwest::Error> for NetworkError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      NetworkError::Timeout(e.to_string())
    } else if e.is_builder() {
      NetworkError::InvalidRequest(e.to_string())
    } else {
      NetworkError::Unreachable(e.to_string())
    }
  }
}

/// Something that can deliver a request to the origin.
#[allow(async_fn_in_trait)]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// HTTP client wrapper
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("formsync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder.send().await?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();
    let body = response.bytes().await?.to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
