//! Raw input acquisition: read a local file into an [`UploadedFile`],
//! base64 for images and UTF-8 text for everything else.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use shared::chat::UploadedFile;

/// MIME type guessed from the file extension. Only the handful of types
/// the app cares about; everything else falls back to octet-stream and
/// gets rejected where it matters.
fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "lua" => "application/x-lua",
        "txt" | "md" | "log" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Read `path` into an upload: images become base64, text files are read
/// as UTF-8.
pub fn read_file(path: &Path) -> Result<UploadedFile> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("not a file: {}", path.display()))?
        .to_string_lossy()
        .to_string();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let mime_type = mime_for_extension(&ext).to_string();

    let content = if mime_type.starts_with("image/") {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        base64::engine::general_purpose::STANDARD.encode(bytes)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading {} as UTF-8 text", path.display()))?
    };

    Ok(UploadedFile {
        name,
        mime_type,
        content,
    })
}

/// Whether a file may be loaded into the file editor. Only plain text
/// and Lua sources qualify.
pub fn editor_acceptable(file: &UploadedFile) -> bool {
    file.mime_type == "text/plain"
        || file.mime_type == "application/x-lua"
        || file.name.ends_with(".lua")
}
