//! Networking (HTTP, filesystem, Data URIs) for Domreel asset capture.
//!
//! Provides an implementation of the [`domreel_traits::net::NetProvider`]
//! trait backed by reqwest on a tokio runtime, with a semaphore bounding the
//! number of in-flight fetches (default 6).

use std::sync::Arc;

use data_url::DataUrl;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use domreel_traits::net::{BoxedHandler, Bytes, NetProvider, Request};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:60.0) Gecko/20100101 Firefox/81.0";

/// Default cap on concurrently running fetches.
pub const DEFAULT_CONCURRENCY: usize = 6;

pub struct Provider {
    rt: Handle,
    client: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl Provider {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_concurrency(DEFAULT_CONCURRENCY)
    }

    pub fn with_concurrency(max_in_flight: usize) -> Self {
        Self {
            rt: Handle::current(),
            client: reqwest::Client::new(),
            permits: Arc::new(Semaphore::new(max_in_flight)),
        }
    }

    pub fn shared() -> Arc<dyn NetProvider> {
        Arc::new(Self::new())
    }

    async fn fetch_inner(
        client: reqwest::Client,
        request: Request,
    ) -> Result<(String, Bytes), ProviderError> {
        Ok(match request.url.scheme() {
            "data" => {
                let data_url = DataUrl::process(request.url.as_str())?;
                let decoded = data_url.decode_to_vec()?;
                (request.url.to_string(), Bytes::from(decoded.0))
            }
            "file" => {
                let file_content = std::fs::read(request.url.path())?;
                (request.url.to_string(), Bytes::from(file_content))
            }
            _ => {
                let response = client
                    .request(request.method, request.url)
                    .headers(request.headers)
                    .header("User-Agent", USER_AGENT)
                    .send()
                    .await?;
                (response.url().to_string(), response.bytes().await?)
            }
        })
    }
}

impl NetProvider for Provider {
    fn fetch(&self, _doc_id: usize, request: Request, handler: BoxedHandler) {
        let client = self.client.clone();
        let permits = self.permits.clone();

        self.rt.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    handler.fail(Some("fetch pool closed".to_string()));
                    return;
                }
            };
            let url = request.url.to_string();
            match Self::fetch_inner(client, request).await {
                Ok((resolved_url, bytes)) => handler.bytes(resolved_url, bytes),
                Err(e) => {
                    tracing::warn!("error fetching {url}: {e}");
                    handler.fail(Some(e.to_string()));
                }
            }
        });
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid data url: {0:?}")]
    DataUrl(data_url::DataUrlError),
    #[error("invalid base64 in data url: {0:?}")]
    DataUrlBase64(data_url::forgiving_base64::InvalidBase64),
    #[error("request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl From<data_url::DataUrlError> for ProviderError {
    fn from(value: data_url::DataUrlError) -> Self {
        Self::DataUrl(value)
    }
}

impl From<data_url::forgiving_base64::InvalidBase64> for ProviderError {
    fn from(value: data_url::forgiving_base64::InvalidBase64) -> Self {
        Self::DataUrlBase64(value)
    }
}
