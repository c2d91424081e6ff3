//! Single-attempt byte fetching.
//!
//! [`Transport`] is the seam between the engine and the network. It performs
//! exactly one request per call; retries, timeouts and integrity checks are
//! layered on top by [`crate::fetcher::Fetcher`].

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, RANGE};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{HlsDownloadError, TransportError};
use crate::segment::ByteRange;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub uri: String,
    pub byte_range: Option<ByteRange>,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub body: Bytes,
    /// Length announced by the server, when it sent one.
    pub content_length: Option<u64>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError>;
}

/// Create a reqwest Client from the session configuration
pub fn create_client(config: &SessionConfig) -> Result<Client, HlsDownloadError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.concurrency.max(1))
        .user_agent(&config.user_agent)
        .redirect(reqwest::redirect::Policy::limited(10));

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        client_builder = client_builder.proxy(proxy_config.to_reqwest()?);
        info!(
            proxy = %proxy_config,
            authenticated = proxy_config.credentials().is_some(),
            "Using explicitly configured proxy for downloads"
        );
    } else if config.use_system_proxy {
        debug!("Using system proxy settings for downloads");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for downloads");
    }

    client_builder
        .build()
        .map_err(|e| HlsDownloadError::Client(e.to_string()))
}

/// HTTP(S) transport backed by reqwest; also serves `file://` URIs from disk.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, HlsDownloadError> {
        Ok(Self::new(create_client(config)?))
    }

    async fn fetch_http(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let mut request_builder = self
            .client
            .get(&request.uri)
            .headers(request.headers.clone());
        if let Some(range) = &request.byte_range {
            request_builder = request_builder.header(RANGE, range.to_header_value());
        }

        let response = request_builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        let body = response.bytes().await?;

        debug!(uri = %request.uri, bytes = body.len(), "Fetched resource");
        Ok(FetchResponse {
            body,
            content_length,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        if request.uri.starts_with("file://") {
            return read_local(request).await;
        }
        self.fetch_http(request).await
    }
}

/// Reads a `file://` resource, honouring the requested byte range.
pub async fn read_local(request: &FetchRequest) -> Result<FetchResponse, TransportError> {
    let path = url::Url::parse(&request.uri)
        .ok()
        .and_then(|url| url.to_file_path().ok())
        .ok_or_else(|| TransportError::InvalidUri(request.uri.clone()))?;

    let data = Bytes::from(tokio::fs::read(&path).await?);
    let body = match &request.byte_range {
        Some(range) => {
            let start = range.offset as usize;
            let end = start.saturating_add(range.length as usize);
            if end > data.len() {
                return Err(TransportError::Status { status: 416 });
            }
            data.slice(start..end)
        }
        None => data,
    };

    Ok(FetchResponse {
        content_length: Some(body.len() as u64),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_request(path: &std::path::Path, byte_range: Option<ByteRange>) -> FetchRequest {
        FetchRequest {
            uri: url::Url::from_file_path(path).unwrap().to_string(),
            byte_range,
            headers: HeaderMap::new(),
        }
    }

    #[tokio::test]
    async fn test_read_local_whole_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();

        let response = read_local(&file_request(file.path(), None)).await.unwrap();
        assert_eq!(&response.body[..], b"0123456789");
        assert_eq!(response.content_length, Some(10));
    }

    #[tokio::test]
    async fn test_read_local_byte_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();

        let request = file_request(file.path(), Some(ByteRange::new(3, 4)));
        let response = read_local(&request).await.unwrap();
        assert_eq!(&response.body[..], b"3456");

        let request = file_request(file.path(), Some(ByteRange::new(8, 4)));
        let err = read_local(&request).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_read_local_missing_file_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let request = file_request(&dir.path().join("missing.ts"), None);
        let err = read_local(&request).await.unwrap_err();
        assert!(matches!(err, TransportError::Io { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_http_transport_serves_file_uris() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"segment").unwrap();

        let transport = HttpTransport::from_config(&SessionConfig::default()).unwrap();
        let response = transport
            .fetch(&file_request(file.path(), None))
            .await
            .unwrap();
        assert_eq!(&response.body[..], b"segment");
    }
}
