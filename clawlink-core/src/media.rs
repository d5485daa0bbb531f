// ABOUTME: Media helpers shared by connectors: image payloads, upload persistence, outbound file lookup
// ABOUTME: Uploads land in fresh clawlink_-prefixed temp directories under a sanitized file name

use crate::error::DeliveryError;
use crate::paths::expand_tilde;
use crate::traits::{FileUpload, ImageContent, DEFAULT_IMAGE_PROMPT};
use base64::Engine;
use std::path::{Path, PathBuf};

pub const UPLOAD_DIR_PREFIX: &str = "clawlink_";
const FALLBACK_FILE_NAME: &str = "file";

/// Identify common image formats by their magic bytes, defaulting to JPEG
pub fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Best-guess MIME type for a path from its extension
pub fn mime_for_path(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(data.trim())
}

/// Build the multimodal image unit; an empty caption falls back to the default prompt
pub fn image_from_bytes(bytes: &[u8], caption: Option<&str>) -> ImageContent {
    let prompt = caption
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_IMAGE_PROMPT)
        .to_string();

    ImageContent {
        mime_type: sniff_image_mime(bytes).to_string(),
        data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        prompt,
    }
}

/// Reduce a sender-supplied name to a bare file name so it cannot escape the upload dir
pub fn sanitize_filename(name: &str) -> String {
    let name = name.replace('\\', "/");
    Path::new(&name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::trim)
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .unwrap_or(FALLBACK_FILE_NAME)
        .to_string()
}

/// Write an uploaded file into a fresh temp directory that outlives this process
pub fn save_upload(
    filename: &str,
    bytes: &[u8],
    caption: Option<&str>,
) -> std::io::Result<FileUpload> {
    let dir = tempfile::Builder::new()
        .prefix(UPLOAD_DIR_PREFIX)
        .tempdir()?
        .keep();
    let path = dir.join(sanitize_filename(filename));
    std::fs::write(&path, bytes)?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Saved inbound upload");

    Ok(FileUpload {
        path,
        caption: caption
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
    })
}

/// Resolve an outbound file path (tilde, relative) to an existing absolute file
pub fn resolve_outbound_path(path: &str) -> Result<PathBuf, DeliveryError> {
    let expanded = PathBuf::from(expand_tilde(path.trim()));
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };

    if !absolute.is_file() {
        return Err(DeliveryError::FileNotFound(absolute));
    }
    Ok(absolute)
}

/// User-visible reply for a missing outbound file
pub fn file_not_found_reply(path: &Path) -> String {
    format!("❌ File not found: {}", path.display())
}
