// Key resolution and per-segment AES-128-CBC decryption.

use std::sync::Arc;

use aes::Aes128;
use bytes::Bytes;
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use moka::future::Cache;
use tracing::debug;

use crate::error::{HlsDownloadError, TransportError};
use crate::fetcher::Fetcher;
use crate::segment::{Iv, Segment, resolve_uri};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

const KEY_LEN: usize = 16;

/// Decryption parameters for exactly one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherContext {
    /// Unencrypted segment; data passes through untouched.
    Identity,
    Aes128Cbc { key: [u8; 16], iv: [u8; 16] },
}

impl CipherContext {
    pub fn aes128(key: [u8; 16], iv: Iv) -> Self {
        CipherContext::Aes128Cbc { key, iv: iv.0 }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, CipherContext::Identity)
    }

    /// Decrypts a whole segment and strips the PKCS#7 padding.
    pub fn decrypt(&self, ciphertext: Bytes) -> Result<Bytes, String> {
        match self {
            CipherContext::Identity => Ok(ciphertext),
            CipherContext::Aes128Cbc { key, iv } => {
                let plaintext = Aes128CbcDec::new(key.into(), iv.into())
                    .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
                    .map_err(|e| {
                        format!(
                            "AES-128-CBC decryption of {} bytes failed: {e}",
                            ciphertext.len()
                        )
                    })?;
                Ok(Bytes::from(plaintext))
            }
        }
    }
}

/// Session-scoped key store.
///
/// Each key URI is fetched at most once. Concurrent lookups of a URI that is
/// still in flight wait on the same fetch rather than issuing their own.
pub struct KeyCache {
    fetcher: Arc<Fetcher>,
    base_uri: Option<String>,
    keys: Cache<String, [u8; KEY_LEN]>,
}

impl KeyCache {
    pub fn new(fetcher: Arc<Fetcher>, base_uri: Option<String>) -> Self {
        Self {
            fetcher,
            base_uri,
            keys: Cache::builder().build(),
        }
    }

    /// Returns the 16 key bytes behind `key_uri`, fetching them on first use.
    pub async fn resolve_key(
        &self,
        segment: &Segment,
        key_uri: &str,
    ) -> Result<[u8; KEY_LEN], HlsDownloadError> {
        let uri = resolve_uri(self.base_uri.as_deref(), key_uri)?;
        let label = segment.label();

        self.keys
            .try_get_with(uri.clone(), async {
                debug!(uri = %uri, "Fetching decryption key");
                let response = self
                    .fetcher
                    .fetch_validated(&label, &uri, None, validate_key)
                    .await?;
                let mut key = [0u8; KEY_LEN];
                key.copy_from_slice(&response.body);
                Ok::<_, TransportError>(key)
            })
            .await
            .map_err(|source: Arc<TransportError>| HlsDownloadError::KeyFetch {
                index: segment.index,
                uri: uri.clone(),
                source: (*source).clone(),
            })
    }

    /// Builds the cipher context for `segment`, resolving its key if needed.
    pub async fn build_cipher(&self, segment: &Segment) -> Result<CipherContext, HlsDownloadError> {
        let Some(key_ref) = &segment.key else {
            return Ok(CipherContext::Identity);
        };
        let key = self.resolve_key(segment, &key_ref.uri).await?;
        let iv = key_ref.iv.unwrap_or_else(|| Iv::derived(segment.index));
        Ok(CipherContext::aes128(key, iv))
    }
}

fn validate_key(response: &crate::transport::FetchResponse) -> Result<(), TransportError> {
    if response.body.len() != KEY_LEN {
        return Err(TransportError::InvalidBody(format!(
            "key is {} bytes, expected {KEY_LEN}",
            response.body.len()
        )));
    }
    Ok(())
}
