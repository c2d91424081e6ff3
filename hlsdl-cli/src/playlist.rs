//! Loads an `.m3u8` media playlist and turns it into the engine's segment list.

use std::path::Path;

use hlsdl_engine::{ByteRange, Iv, KeyRef, Playlist, Segment};
use m3u8_rs::{KeyMethod, MediaPlaylist, MediaSegment, parse_playlist_res};
use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, info};
use url::Url;

use crate::error::AppError;

/// Reads the playlist from disk or over HTTP and returns it with the base
/// URI relative entries are resolved against. `headers` go out with the
/// playlist request the same way they go out with segment requests.
pub async fn load_playlist(
    location: &str,
    client: &Client,
    headers: &HeaderMap,
) -> Result<(Playlist, String), AppError> {
    let raw = if is_remote(location) {
        info!(url = %location, "Fetching playlist");
        let response = client
            .get(location)
            .headers(headers.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Playlist(format!(
                "Failed to fetch playlist {location}: HTTP {}",
                response.status()
            )));
        }
        response.bytes().await?.to_vec()
    } else {
        info!(path = %location, "Reading playlist");
        tokio::fs::read(location).await?
    };

    let media = parse_media_playlist(&raw)?;
    let playlist = to_engine_playlist(&media)?;
    debug!(
        segments = playlist.len(),
        media_sequence = playlist.media_sequence,
        has_init = playlist.init_segment.is_some(),
        "Playlist parsed"
    );
    Ok((playlist, derive_base(location)?))
}

fn is_remote(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub fn parse_media_playlist(raw: &[u8]) -> Result<MediaPlaylist, AppError> {
    match parse_playlist_res(raw) {
        Ok(m3u8_rs::Playlist::MediaPlaylist(pl)) => Ok(pl),
        Ok(m3u8_rs::Playlist::MasterPlaylist(_)) => Err(AppError::Playlist(
            "Expected a media playlist but got a master playlist; pass one of its variant URLs"
                .to_string(),
        )),
        Err(e) => Err(AppError::Playlist(format!("Failed to parse playlist: {e}"))),
    }
}

/// Directory of the playlist, with a trailing slash, as a URI prefix.
pub fn derive_base(location: &str) -> Result<String, AppError> {
    if is_remote(location) {
        let url = Url::parse(location)
            .map_err(|e| AppError::InvalidInput(format!("Invalid playlist URL {location}: {e}")))?;
        let base = url
            .join(".")
            .map_err(|e| AppError::InvalidInput(format!("Failed to determine base URL: {e}")))?;
        return Ok(base.to_string());
    }

    let path = std::path::absolute(Path::new(location))?;
    let dir = path.parent().unwrap_or(Path::new("/"));
    Url::from_directory_path(dir)
        .map(|u| u.to_string())
        .map_err(|_| AppError::InvalidInput(format!("Cannot build a file URI for {}", dir.display())))
}

/// Converts a parsed media playlist into engine segments.
///
/// `EXT-X-KEY` applies to every following segment until the next key tag.
/// The init segment comes from the first segment's `EXT-X-MAP` and shares
/// that segment's key.
pub fn to_engine_playlist(media: &MediaPlaylist) -> Result<Playlist, AppError> {
    let mut current_key: Option<KeyRef> = None;
    let mut last_range_end: Option<(String, u64)> = None;
    let mut segments = Vec::with_capacity(media.segments.len());
    let mut init = None;

    for (index, entry) in media.segments.iter().enumerate() {
        if let Some(key) = &entry.key {
            current_key = convert_key(key)?;
        } else if clears_key(entry) {
            current_key = None;
        }

        let mut segment = Segment::new(index, entry.uri.clone());
        if let Some(range) = &entry.byte_range {
            let offset = match range.offset {
                Some(offset) => offset,
                None => match &last_range_end {
                    Some((uri, end)) if *uri == entry.uri => *end,
                    _ => 0,
                },
            };
            last_range_end = Some((entry.uri.clone(), offset + range.length));
            segment = segment.with_byte_range(ByteRange::new(offset, range.length));
        }
        if let Some(key) = &current_key {
            segment = segment.with_key(key.clone());
        }

        if index == 0 {
            if let Some(map) = &entry.map {
                let mut init_segment = Segment::init(map.uri.clone());
                if let Some(range) = &map.byte_range {
                    init_segment = init_segment
                        .with_byte_range(ByteRange::new(range.offset.unwrap_or(0), range.length));
                }
                if let Some(key) = &current_key {
                    init_segment = init_segment.with_key(key.clone());
                }
                init = Some(init_segment);
            }
        }

        segments.push(segment);
    }

    let mut playlist = Playlist::new(segments).with_media_sequence(media.media_sequence);
    if let Some(init) = init {
        playlist = playlist.with_init_segment(init);
    }
    Ok(playlist)
}

/// m3u8-rs refuses `METHOD=NONE` without an IV and leaves the tag among the
/// segment's unknown tags.
fn clears_key(entry: &MediaSegment) -> bool {
    entry.unknown_tags.iter().any(|tag| {
        tag.tag == "X-KEY"
            && tag
                .rest
                .as_deref()
                .is_some_and(|rest| rest.to_ascii_uppercase().contains("METHOD=NONE"))
    })
}

fn convert_key(key: &m3u8_rs::Key) -> Result<Option<KeyRef>, AppError> {
    match &key.method {
        KeyMethod::None => Ok(None),
        KeyMethod::AES128 => {
            let uri = key
                .uri
                .as_deref()
                .ok_or_else(|| AppError::Playlist("AES-128 key without a URI".to_string()))?;
            let mut key_ref = KeyRef::new(uri);
            if let Some(iv) = &key.iv {
                key_ref = key_ref.with_iv(Iv::from_hex(iv)?);
            }
            Ok(Some(key_ref))
        }
        other => Err(AppError::Playlist(format!(
            "Unsupported encryption method: {other:?}"
        ))),
    }
}
