//! Parsed playlist model consumed by the engine.
//!
//! Producing these values (parsing `.m3u8` text) happens outside the engine;
//! the session only needs the ordered segment list, the optional init segment
//! and the media sequence of the first entry.

use crate::error::HlsDownloadError;

/// A byte range inside the resource addressed by a segment URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Value for an HTTP `Range` header, e.g. `bytes=100-199`.
    pub fn to_header_value(&self) -> String {
        let end = (self.offset + self.length).saturating_sub(1);
        format!("bytes={}-{}", self.offset, end)
    }
}

/// 16-byte AES initialization vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv(pub [u8; 16]);

impl Iv {
    /// Builds an IV from four 32-bit words, each written big-endian.
    pub fn from_words(words: [u32; 4]) -> Self {
        let mut iv = [0u8; 16];
        for (chunk, word) in iv.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        Self(iv)
    }

    /// IV used when a key carries none: big-endian `[0, 0, 0, index + 1]`.
    pub fn derived(segment_index: usize) -> Self {
        Self::from_words([0, 0, 0, (segment_index as u32).wrapping_add(1)])
    }

    /// Parses the `0x`-prefixed hex notation used by `EXT-X-KEY:IV=`.
    pub fn from_hex(value: &str) -> Result<Self, HlsDownloadError> {
        let trimmed = value
            .trim_start_matches("0x")
            .trim_start_matches("0X");
        let mut iv = [0u8; 16];
        hex::decode_to_slice(trimmed, &mut iv).map_err(|e| {
            HlsDownloadError::Config(format!("Failed to parse IV '{value}': {e}"))
        })?;
        Ok(Self(iv))
    }
}

impl From<[u8; 16]> for Iv {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

/// Reference to an AES-128 key used by one or more segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
    pub uri: String,
    pub iv: Option<Iv>,
}

impl KeyRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            iv: None,
        }
    }

    pub fn with_iv(mut self, iv: impl Into<Iv>) -> Self {
        self.iv = Some(iv.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position in the playlist; defines where the bytes land in the output.
    pub index: usize,
    pub uri: String,
    pub byte_range: Option<ByteRange>,
    pub key: Option<KeyRef>,
    pub is_init_segment: bool,
}

impl Segment {
    pub fn new(index: usize, uri: impl Into<String>) -> Self {
        Self {
            index,
            uri: uri.into(),
            byte_range: None,
            key: None,
            is_init_segment: false,
        }
    }

    /// An initialization (`EXT-X-MAP`) segment. It always derives its IV as index 0.
    pub fn init(uri: impl Into<String>) -> Self {
        Self {
            is_init_segment: true,
            ..Self::new(0, uri)
        }
    }

    pub fn with_byte_range(mut self, range: ByteRange) -> Self {
        self.byte_range = Some(range);
        self
    }

    pub fn with_key(mut self, key: KeyRef) -> Self {
        self.key = Some(key);
        self
    }

    /// Short label used in logs and events.
    pub fn label(&self) -> String {
        if self.is_init_segment {
            "init".to_string()
        } else {
            (self.index + 1).to_string()
        }
    }
}

/// The already-parsed media playlist handed to a session.
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    /// `EXT-X-MEDIA-SEQUENCE` of the first segment.
    pub media_sequence: u64,
    pub segments: Vec<Segment>,
    pub init_segment: Option<Segment>,
}

impl Playlist {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            media_sequence: 0,
            segments,
            init_segment: None,
        }
    }

    pub fn with_media_sequence(mut self, media_sequence: u64) -> Self {
        self.media_sequence = media_sequence;
        self
    }

    pub fn with_init_segment(mut self, init: Segment) -> Self {
        self.init_segment = Some(init);
        self
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Resolves a segment or key URI against the playlist base.
///
/// Absolute `http(s)` URIs are used unchanged. Everything else is appended to
/// `base` verbatim, without path normalization, since playlists pre-form their
/// relative URIs for exactly this concatenation.
pub fn resolve_uri(base: Option<&str>, uri: &str) -> Result<String, HlsDownloadError> {
    if is_http_uri(uri) {
        return Ok(uri.to_string());
    }
    match base {
        Some(base) if !base.is_empty() => Ok(format!("{base}{uri}")),
        _ => Err(HlsDownloadError::InvalidUri {
            uri: uri.to_string(),
            reason: "no base URI and not an http(s) URI".to_string(),
        }),
    }
}

fn is_http_uri(uri: &str) -> bool {
    let prefix = uri.get(..6).unwrap_or(uri).to_ascii_lowercase();
    prefix.starts_with("http:") || prefix.starts_with("https:")
}
