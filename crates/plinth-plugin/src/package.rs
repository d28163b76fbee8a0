// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin package reading: gzip tar extraction, root discovery, and
//! path containment helpers shared by the validator, loader, and lifecycle.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use plinth_config::model::PluginsConfig;
use plinth_core::manifest::MANIFEST_FILE;
use plinth_core::{PlinthError, PluginManifest};
use tracing::{debug, warn};

/// Most entries a package may contain.
const MAX_ENTRIES: usize = 10_000;

/// Unpacked size may not exceed this multiple of the archive limit.
const MAX_EXPANSION: u64 = 8;

/// Size limits applied while reading packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageLimits {
    pub max_archive_bytes: u64,
    pub max_manifest_bytes: u64,
}

impl Default for PackageLimits {
    fn default() -> Self {
        PackageLimits::from(&PluginsConfig::default())
    }
}

impl From<&PluginsConfig> for PackageLimits {
    fn from(config: &PluginsConfig) -> Self {
        Self {
            max_archive_bytes: config.max_archive_bytes,
            max_manifest_bytes: config.max_manifest_bytes,
        }
    }
}

/// Why a package could not be unpacked.
#[derive(Debug)]
pub enum UnpackError {
    /// The archive file itself could not be read.
    Io(std::io::Error),
    /// The archive content is malformed, unsafe, or has no manifest.
    Malformed(String),
}

impl From<UnpackError> for PlinthError {
    fn from(err: UnpackError) -> Self {
        match err {
            UnpackError::Io(e) => PlinthError::Io(e),
            UnpackError::Malformed(msg) => PlinthError::validation(msg),
        }
    }
}

/// Reads `archive` and unpacks it into `dest`, returning the plugin root.
///
/// The root is `dest` itself when `plugin.json` sits at the top of the
/// archive, or the single top-level directory that contains it.
pub async fn unpack_archive(
    archive: &Path,
    dest: &Path,
    limits: PackageLimits,
) -> Result<PathBuf, UnpackError> {
    let meta = tokio::fs::metadata(archive).await.map_err(UnpackError::Io)?;
    if meta.len() > limits.max_archive_bytes {
        return Err(UnpackError::Malformed(format!(
            "archive is {} bytes, limit is {}",
            meta.len(),
            limits.max_archive_bytes
        )));
    }
    let bytes = tokio::fs::read(archive).await.map_err(UnpackError::Io)?;
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let files = unpack_bytes(&bytes, &dest, limits.max_archive_bytes * MAX_EXPANSION)?;
        debug!(files, dest = %dest.display(), "package unpacked");
        locate_root(&dest)
            .map_err(|e| UnpackError::Malformed(format!("failed to scan package: {e}")))?
            .ok_or_else(|| UnpackError::Malformed(format!("package has no {MANIFEST_FILE}")))
    })
    .await
    .map_err(|e| UnpackError::Malformed(format!("extraction task failed: {e}")))?
}

/// Unpacks gzip tar bytes into `dest`.
///
/// Symlinks and hard links are skipped. Entries with absolute or parent
/// components are rejected, as is anything resolving outside `dest`.
pub fn unpack_bytes(bytes: &[u8], dest: &Path, max_unpacked: u64) -> Result<usize, UnpackError> {
    let malformed = |e: std::io::Error| UnpackError::Malformed(format!("invalid archive: {e}"));

    std::fs::create_dir_all(dest).map_err(UnpackError::Io)?;
    let canonical_dest = std::fs::canonicalize(dest).map_err(UnpackError::Io)?;

    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    let mut files = 0usize;
    let mut unpacked = 0u64;

    for (index, entry) in archive.entries().map_err(malformed)?.enumerate() {
        if index >= MAX_ENTRIES {
            return Err(UnpackError::Malformed(format!(
                "archive has more than {MAX_ENTRIES} entries"
            )));
        }
        let mut entry = entry.map_err(malformed)?;
        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            warn!("skipping symlink/hardlink package entry");
            continue;
        }

        let path = entry.path().map_err(malformed)?.into_owned();
        let Some(relative) = sanitize_entry_path(&path)? else {
            continue;
        };

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(malformed)?;
            let canonical_parent = std::fs::canonicalize(parent).map_err(malformed)?;
            if !canonical_parent.starts_with(&canonical_dest) {
                return Err(UnpackError::Malformed(
                    "archive entry escaped the extraction directory".to_string(),
                ));
            }
        }

        if kind.is_dir() {
            std::fs::create_dir_all(&target).map_err(malformed)?;
            continue;
        }

        unpacked += entry.header().size().map_err(malformed)?;
        if unpacked > max_unpacked {
            return Err(UnpackError::Malformed(format!(
                "archive expands beyond {max_unpacked} bytes"
            )));
        }
        entry.unpack(&target).map_err(malformed)?;
        files += 1;
    }

    Ok(files)
}

fn sanitize_entry_path(path: &Path) -> Result<Option<PathBuf>, UnpackError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(UnpackError::Malformed(format!(
                    "archive contains unsafe path: {}",
                    path.display()
                )));
            }
        }
    }
    Ok((!clean.as_os_str().is_empty()).then_some(clean))
}

/// Finds the directory holding `plugin.json` within an unpacked package.
pub fn locate_root(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    if dir.join(MANIFEST_FILE).is_file() {
        return Ok(Some(dir.to_path_buf()));
    }
    let mut children = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'));
    match (children.next(), children.next()) {
        (Some(only), None) if only.path().join(MANIFEST_FILE).is_file() => Ok(Some(only.path())),
        _ => Ok(None),
    }
}

/// Reads `plugin.json` as raw JSON, enforcing the size limit.
///
/// `Ok(Err(..))` means the file exists but is unusable; `Err(..)` is an I/O fault.
pub fn read_manifest_value(
    root: &Path,
    max_bytes: u64,
) -> std::io::Result<Result<serde_json::Value, String>> {
    let file = std::fs::File::open(root.join(MANIFEST_FILE))?;
    let mut raw = Vec::new();
    file.take(max_bytes + 1).read_to_end(&mut raw)?;
    if raw.len() as u64 > max_bytes {
        return Ok(Err(format!(
            "{MANIFEST_FILE} exceeds {max_bytes} bytes"
        )));
    }
    Ok(serde_json::from_slice(&raw).map_err(|e| format!("{MANIFEST_FILE} is not valid JSON: {e}")))
}

/// Reads and deserializes the typed manifest of an installed plugin.
pub async fn read_manifest(root: &Path) -> Result<PluginManifest, PlinthError> {
    let path = root.join(MANIFEST_FILE);
    let raw = tokio::fs::read(&path).await?;
    serde_json::from_slice(&raw).map_err(|e| {
        PlinthError::validation(format!("{} is invalid: {e}", path.display()))
    })
}

/// Splits a module reference `path#export` into its parts.
pub fn split_reference(reference: &str) -> (&str, Option<&str>) {
    match reference.split_once('#') {
        Some((path, export)) if !export.is_empty() => (path, Some(export)),
        Some((path, _)) => (path, None),
        None => (reference, None),
    }
}

/// Resolves a manifest-relative path, refusing anything that leaves `root`.
pub fn resolve_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = relative.strip_prefix("./").unwrap_or(relative);
    let rel = Path::new(relative);
    if relative.is_empty() {
        return None;
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return None,
        }
    }
    Some(root.join(rel))
}

/// Recursively copies a directory tree. Symlinks are not followed.
pub async fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || copy_dir_blocking(&src, &dst))
        .await
        .map_err(std::io::Error::other)?
}

fn copy_dir_blocking(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let mut copied = 0;
    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        std::fs::create_dir_all(&to)?;
        for entry in std::fs::read_dir(&from)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let target = to.join(entry.file_name());
            if file_type.is_dir() {
                stack.push((entry.path(), target));
            } else if file_type.is_file() {
                copied += std::fs::copy(entry.path(), target)?;
            }
        }
    }
    Ok(copied)
}
