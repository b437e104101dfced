use std::path::PathBuf;

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use courier_types::models::MessageType;

use crate::error::ChatError;

/// 50 MB default cap on a decoded media payload
pub const DEFAULT_MAX_MEDIA_BYTES: usize = 50 * 1024 * 1024;

/// MIME type <-> file extension for everything the store accepts.
const MEDIA_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("video/mp4", "mp4"),
    ("video/webm", "webm"),
    ("video/quicktime", "mov"),
    ("audio/mpeg", "mp3"),
    ("audio/ogg", "ogg"),
    ("audio/wav", "wav"),
    ("audio/mp4", "m4a"),
    ("audio/webm", "weba"),
    ("application/octet-stream", "bin"),
];

/// Content-addressed blob store for message media.
///
/// Each blob lives at `{dir}/{sha256}.{ext}` and is served back under
/// `{public_url}/media/{sha256}.{ext}`. Identical uploads share one file.
pub struct MediaStore {
    dir: PathBuf,
    public_url: String,
    max_bytes: usize,
}

impl MediaStore {
    pub async fn new(dir: PathBuf, public_url: &str, max_bytes: usize) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_url: public_url.trim_end_matches('/').to_string(),
            max_bytes,
        })
    }

    /// Decode a base64 (or `data:<mime>;base64,`) payload and store it.
    /// Returns the media reference to persist with the message.
    pub async fn ingest(&self, encoded: &str, kind: MessageType) -> Result<String, ChatError> {
        let (mime, payload) = split_data_url(encoded)?;
        let ext = mime
            .and_then(extension_for_mime)
            .unwrap_or_else(|| kind.default_extension());

        // base64 expands by 4/3; reject obviously oversized input before decoding
        if payload.len() / 4 * 3 > self.max_bytes + 3 {
            return Err(ChatError::MediaIngestion("payload too large".into()));
        }

        let payload = payload.to_string();
        let (bytes, digest) = tokio::task::spawn_blocking(move || {
            let cleaned: String = payload.split_whitespace().collect();
            let bytes = B64
                .decode(cleaned.as_bytes())
                .map_err(|e| ChatError::MediaIngestion(format!("invalid base64: {}", e)))?;
            let digest = hex::encode(Sha256::digest(&bytes));
            Ok::<_, ChatError>((bytes, digest))
        })
        .await??;

        if bytes.is_empty() {
            return Err(ChatError::MediaIngestion("empty payload".into()));
        }
        if bytes.len() > self.max_bytes {
            return Err(ChatError::MediaIngestion("payload too large".into()));
        }

        let reference = format!("{}.{}", digest, ext);
        let path = self.dir.join(&reference);
        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!("media {} already stored", reference);
            return Ok(reference);
        }

        // Write under a temp name first so a half-written file is never served.
        let tmp = self.dir.join(format!("{}.part", reference));
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| ChatError::MediaIngestion(format!("write failed: {}", e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| ChatError::MediaIngestion(format!("write failed: {}", e)))?;

        info!("stored media {} ({} bytes)", reference, bytes.len());
        Ok(reference)
    }

    pub fn url_for(&self, reference: &str) -> String {
        format!("{}/media/{}", self.public_url, reference)
    }

    /// Read a stored blob. `None` for references that are malformed or absent.
    pub async fn read(&self, reference: &str) -> Result<Option<(Vec<u8>, &'static str)>> {
        let Some(content_type) = validate_reference(reference) else {
            return Ok(None);
        };

        match fs::read(self.dir.join(reference)).await {
            Ok(bytes) => Ok(Some((bytes, content_type))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Split an optional data-URL prefix off a base64 payload.
fn split_data_url(encoded: &str) -> Result<(Option<&str>, &str), ChatError> {
    let Some(rest) = encoded.strip_prefix("data:") else {
        return Ok((None, encoded));
    };

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ChatError::MediaIngestion("malformed data URL".into()))?;

    let mut parts = header.split(';');
    let mime = parts.next().filter(|m| !m.is_empty());
    if !parts.any(|p| p == "base64") {
        return Err(ChatError::MediaIngestion("data URL must be base64".into()));
    }

    Ok((mime, payload))
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    MEDIA_TYPES
        .iter()
        .find(|(m, _)| m.eq_ignore_ascii_case(mime))
        .map(|(_, ext)| *ext)
}

/// Accept only `{64 hex}.{known ext}`; returns the content type.
fn validate_reference(reference: &str) -> Option<&'static str> {
    let (stem, ext) = reference.split_once('.')?;
    if stem.len() != 64 || !stem.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        return None;
    }
    MEDIA_TYPES
        .iter()
        .find(|(_, e)| *e == ext)
        .map(|(mime, _)| *mime)
}
