use std::fs::{self, OpenOptions};
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Url;
use tempfile::{Builder, NamedTempFile};

use crate::domain::{VariantKind, WorkItem};
use crate::error::HarvestError;

// Byte limits, so names stay under the 255-byte filename cap of common
// filesystems even with multi-byte variant tags.
const MAX_BASE_BYTES: usize = 200;
const KEEP_PREFIX_BYTES: usize = 150;
const KEEP_SUFFIX_BYTES: usize = 42;
const SIDECAR_EXTENSION: &str = ".txt";
const URL_DIGEST_CHARS: usize = 8;
const DEFAULT_EXTENSION: &str = ".jpg";

/// Where artifacts and their sidecars live under the destination root.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: Utf8PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    /// Creates the root and proves it is writable by creating a scratch file.
    pub fn ensure_root(&self) -> Result<(), HarvestError> {
        let destination = |err: io::Error| HarvestError::Destination {
            path: self.root.clone(),
            message: err.to_string(),
        };
        fs::create_dir_all(self.root.as_std_path()).map_err(destination)?;
        Builder::new()
            .prefix(".image-harvest-probe")
            .tempfile_in(self.root.as_std_path())
            .map_err(destination)?;
        Ok(())
    }

    /// Extension-less name shared by an artifact, its sidecar and its temp file.
    pub fn base_name(
        item_id: i64,
        variant_kind: &VariantKind,
        width: Option<u32>,
        height: Option<u32>,
        url: &str,
    ) -> String {
        let digest = format!("{:x}", md5::compute(url.as_bytes()));
        let base = format!(
            "{item_id}_{variant_kind}_{}x{}_{}",
            width.unwrap_or(0),
            height.unwrap_or(0),
            &digest[..URL_DIGEST_CHARS]
        );
        truncate_middle(sanitize(&base))
    }

    pub fn artifact_path(&self, base: &str, extension: &str) -> Utf8PathBuf {
        self.root.join(format!("{base}{extension}"))
    }

    pub fn sidecar_path(&self, base: &str) -> Utf8PathBuf {
        self.root.join(format!("{base}{SIDECAR_EXTENSION}"))
    }

    /// Named temp file in the root, removed on drop unless persisted.
    pub fn temp_file(&self, base: &str) -> io::Result<NamedTempFile> {
        Builder::new()
            .prefix(&format!(".{base}."))
            .suffix(".part")
            .tempfile_in(self.root.as_std_path())
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, '.' | '_' | '-' | ' ') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn truncate_middle(value: String) -> String {
    if value.len() <= MAX_BASE_BYTES {
        return value;
    }
    let mut head = KEEP_PREFIX_BYTES;
    while !value.is_char_boundary(head) {
        head -= 1;
    }
    let mut tail = value.len() - KEEP_SUFFIX_BYTES;
    while !value.is_char_boundary(tail) {
        tail += 1;
    }
    format!("{}_{}", &value[..head], &value[tail..])
}

/// File extension (with the dot) for a fetched body.
pub fn extension_for(url: &str, content_type: Option<&str>) -> String {
    content_type
        .and_then(extension_for_mime)
        .map(str::to_string)
        .or_else(|| extension_from_url(url))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    let ext = match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/bmp" | "image/x-ms-bmp" => ".bmp",
        "image/tiff" => ".tiff",
        "image/svg+xml" => ".svg",
        "image/x-icon" | "image/vnd.microsoft.icon" => ".ico",
        "image/avif" => ".avif",
        "image/heic" => ".heic",
        "image/heif" => ".heif",
        "text/html" => ".html",
        _ => return None,
    };
    Some(ext)
}

fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let name = parsed.path_segments()?.next_back()?;
    let dot = name.rfind('.')?;
    if dot == 0 {
        return None;
    }
    let suffix = name[dot..].to_lowercase();
    let len = suffix.chars().count();
    // `.txt` belongs to the sidecar.
    ((2..=5).contains(&len) && suffix != SIDECAR_EXTENSION).then_some(suffix)
}

/// Writes the plain-text metadata file next to an artifact. An existing
/// sidecar is left alone; write failures are logged, never propagated.
pub fn write_sidecar(path: &Utf8Path, item: &WorkItem) {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path.as_std_path());
    let mut file = match file {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return,
        Err(err) => {
            tracing::warn!(item_id = item.item_id, %path, error = %err, "sidecar not written");
            return;
        }
    };
    let content = sidecar_content(item);
    if let Err(err) = file.write_all(content.as_bytes()) {
        tracing::warn!(item_id = item.item_id, %path, error = %err, "sidecar write failed");
    }
}

fn sidecar_content(item: &WorkItem) -> String {
    let dim = |value: Option<u32>| value.map(|v| v.to_string()).unwrap_or_default();
    format!(
        "url: {}\norigin_url: {}\nimage_id: {}\nvariant_type: {}\nwidth: {}\nheight: {}\n",
        item.primary_url.as_deref().unwrap_or(""),
        item.fallback_url.as_deref().unwrap_or(""),
        item.parent_id,
        item.variant_kind,
        dim(item.width),
        dim(item.height),
    )
}
