//! File-system side of a transfer: what to send, where received files land,
//! and the formatting used when reporting them.

use std::path::{Component, Path, PathBuf};

use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::TransferError;
use crate::protocol::CHUNK_SIZE;

// ── Sending ──

/// One file queued for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEntry {
    /// Canonical local path.
    pub path: PathBuf,
    /// Name announced to the receiver, `/`-separated.
    pub wire_name: String,
}

/// Expand the user's selection into the flat, ordered list of files to send.
///
/// Directories are walked recursively in name order. When every input sits in
/// the same parent directory the wire names keep their path below that parent
/// so the receiver can rebuild the tree; otherwise only base names are sent.
pub fn plan_send(inputs: &[PathBuf]) -> Result<Vec<SendEntry>, TransferError> {
    if inputs.is_empty() {
        return Err(TransferError::NoFiles);
    }

    let mut roots = Vec::with_capacity(inputs.len());
    for input in inputs {
        let canonical = input.canonicalize().map_err(|e| TransferError::InvalidPath {
            path: input.clone(),
            reason: e.to_string(),
        })?;
        roots.push(canonical);
    }

    let shared_parent = {
        let first = roots[0].parent();
        if roots.iter().all(|r| r.parent() == first) {
            first.map(Path::to_path_buf)
        } else {
            None
        }
    };

    let mut entries = Vec::new();
    for root in &roots {
        for path in expand(root)? {
            let wire_name = match &shared_parent {
                Some(parent) => wire_name_below(&path, parent)?,
                None => base_name(&path)?,
            };
            entries.push(SendEntry { path, wire_name });
        }
    }

    debug!(files = entries.len(), shared_parent = ?shared_parent, "send plan ready");
    Ok(entries)
}

fn expand(root: &Path) -> Result<Vec<PathBuf>, TransferError> {
    if !root.is_dir() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| TransferError::InvalidPath {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn wire_name_below(path: &Path, parent: &Path) -> Result<String, TransferError> {
    let relative = path.strip_prefix(parent).map_err(|_| TransferError::InvalidPath {
        path: path.to_path_buf(),
        reason: format!("not below {}", parent.display()),
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(utf8(part, path)?),
            _ => {
                return Err(TransferError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "unexpected path component".into(),
                });
            }
        }
    }
    Ok(parts.join("/"))
}

fn base_name(path: &Path) -> Result<String, TransferError> {
    let name = path.file_name().ok_or_else(|| TransferError::InvalidPath {
        path: path.to_path_buf(),
        reason: "has no file name".into(),
    })?;
    utf8(name, path)
}

fn utf8(part: &std::ffi::OsStr, path: &Path) -> Result<String, TransferError> {
    part.to_str()
        .map(str::to_owned)
        .ok_or_else(|| TransferError::InvalidPath {
            path: path.to_path_buf(),
            reason: "name is not valid UTF-8".into(),
        })
}

// ── Receiving ──

/// Turn a name received from the peer into a relative path that cannot
/// escape the destination directory.
pub fn sanitize_wire_name(name: &str) -> Result<PathBuf, TransferError> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(TransferError::Protocol(format!("absolute filename {:?}", name)));
    }

    let mut path = PathBuf::new();
    for (i, part) in normalized.split('/').enumerate() {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(TransferError::Protocol(format!(
                    "filename {:?} leaves the destination",
                    name
                )));
            }
            drive if i == 0 && is_drive_prefix(drive) => {
                return Err(TransferError::Protocol(format!("absolute filename {:?}", name)));
            }
            part => path.push(part),
        }
    }

    if path.as_os_str().is_empty() {
        return Err(TransferError::Protocol(format!("empty filename {:?}", name)));
    }
    Ok(path)
}

fn is_drive_prefix(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Fail early if received files would have nowhere to go.
pub fn check_receive_target(target: &Path) -> Result<(), TransferError> {
    if target.exists() {
        return Ok(());
    }
    match target.parent() {
        Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => Ok(()),
        _ => Err(TransferError::InvalidPath {
            path: target.to_path_buf(),
            reason: "destination folder does not exist".into(),
        }),
    }
}

/// Where an incoming file will be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub path: PathBuf,
    /// The target was a file path but the batch has several files, so the
    /// file went to the target's parent directory instead.
    pub redirected: bool,
    /// An existing file had the same name; `path` carries the session prefix.
    pub renamed: bool,
}

/// Destination naming policy.
///
/// * `target` is a directory: the file lands at `target/<wire name>`.
/// * `target` is not a directory and the batch holds one file: the file is
///   written to `target` itself.
/// * `target` is not a directory and the batch holds several files: they land
///   in `target`'s parent directory, so a multi-file receive always ends up in
///   a directory.
///
/// Existing files are never overwritten. A clash is resolved by prefixing the
/// file name with `<ssid>_`, then `<ssid>_2_`, `<ssid>_3_`, ... until free.
pub fn resolve_destination(target: &Path, wire: &Path, total_files: u64, ssid: &str) -> Destination {
    let (candidate, redirected) = if target.is_dir() {
        (target.join(wire), false)
    } else if total_files <= 1 {
        (target.to_path_buf(), false)
    } else {
        let parent = target.parent().unwrap_or(Path::new(""));
        (parent.join(wire), true)
    };

    if !candidate.exists() {
        return Destination {
            path: candidate,
            redirected,
            renamed: false,
        };
    }

    let dir = candidate.parent().unwrap_or(Path::new("")).to_path_buf();
    let name = candidate
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut path = dir.join(format!("{}_{}", ssid, name));
    let mut n = 2u64;
    while path.exists() {
        path = dir.join(format!("{}_{}_{}", ssid, n, name));
        n += 1;
    }

    Destination {
        path,
        redirected,
        renamed: true,
    }
}

// ── Reporting ──

/// MD5 of a file as lowercase hex. Checks for cancellation once per chunk.
pub async fn hash_file(path: &Path, cancel: &CancellationToken) -> Result<String, TransferError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| TransferError::io(format!("error opening {}", path.display()), e))?;

    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled { during: "hashing" });
        }
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| TransferError::io(format!("error hashing {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Decimal units, two places: `999 bytes`, `198.21KB`, `48.73MB`, `8.27GB`.
pub fn make_size_readable(size: u64) -> String {
    const KB: f64 = 1000.0;
    const MB: f64 = KB * 1000.0;
    const GB: f64 = MB * 1000.0;

    let size = size as f64;
    if size < KB {
        format!("{} bytes", size)
    } else if size < MB {
        format!("{:.2}KB", size / KB)
    } else if size < GB {
        format!("{:.2}MB", size / MB)
    } else {
        format!("{:.2}GB", size / GB)
    }
}

pub fn format_time(seconds: f64) -> String {
    if seconds > 60.0 {
        let minutes = seconds as u64 / 60;
        format!("{} minutes {:.2} seconds", minutes, seconds % 60.0)
    } else {
        format!("{:.2} seconds", seconds)
    }
}
