//! In-memory transport and crypto helpers shared by the unit tests.

use std::collections::HashMap;
use std::time::Duration;

use aes::Aes128;
use async_trait::async_trait;
use bytes::Bytes;
use cbc::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use parking_lot::Mutex;
use reqwest::header::HeaderMap;

use crate::error::TransportError;
use crate::transport::{FetchRequest, FetchResponse, Transport};

#[derive(Debug, Clone)]
struct MockResource {
    body: Bytes,
    /// Number of leading calls answered with 503.
    failures: usize,
    /// Number of leading calls answered with half the body.
    truncated: usize,
    send_length: bool,
}

/// A scripted [`Transport`]. Unknown URIs answer 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    resources: Mutex<HashMap<String, MockResource>>,
    calls: Mutex<HashMap<String, usize>>,
    headers: Mutex<HashMap<String, HeaderMap>>,
    delay: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn insert(&self, uri: &str, resource: MockResource) {
        self.resources.lock().insert(uri.to_string(), resource);
    }

    pub fn add(&self, uri: &str, body: impl AsRef<[u8]>) {
        self.add_failing(uri, body, 0);
    }

    pub fn add_failing(&self, uri: &str, body: impl AsRef<[u8]>, failures: usize) {
        self.insert(
            uri,
            MockResource {
                body: Bytes::copy_from_slice(body.as_ref()),
                failures,
                truncated: 0,
                send_length: true,
            },
        );
    }

    pub fn add_always_failing(&self, uri: &str) {
        self.add_failing(uri, b"", usize::MAX);
    }

    pub fn add_without_length(&self, uri: &str, body: impl AsRef<[u8]>) {
        self.insert(
            uri,
            MockResource {
                body: Bytes::copy_from_slice(body.as_ref()),
                failures: 0,
                truncated: 0,
                send_length: false,
            },
        );
    }

    pub fn add_truncated(&self, uri: &str, body: impl AsRef<[u8]>, times: usize) {
        self.insert(
            uri,
            MockResource {
                body: Bytes::copy_from_slice(body.as_ref()),
                failures: 0,
                truncated: times,
                send_length: true,
            },
        );
    }

    pub fn calls(&self, uri: &str) -> usize {
        self.calls.lock().get(uri).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn last_headers(&self, uri: &str) -> Option<HeaderMap> {
        self.headers.lock().get(uri).cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(request.uri.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.headers
            .lock()
            .insert(request.uri.clone(), request.headers.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let resource = self.resources.lock().get(&request.uri).cloned();
        let Some(resource) = resource else {
            return Err(TransportError::Status { status: 404 });
        };
        if call <= resource.failures {
            return Err(TransportError::Status { status: 503 });
        }

        let full = match &request.byte_range {
            Some(range) => {
                let start = range.offset as usize;
                let end = start + range.length as usize;
                resource.body.slice(start..end.min(resource.body.len()))
            }
            None => resource.body.clone(),
        };
        let content_length = resource.send_length.then_some(full.len() as u64);
        let body = if call <= resource.truncated {
            full.slice(..full.len() / 2)
        } else {
            full
        };

        Ok(FetchResponse {
            body,
            content_length,
        })
    }
}

pub fn aes128_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    cbc::Encryptor::<Aes128>::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}
