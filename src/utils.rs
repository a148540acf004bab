//! Utility functions for sysdelta
//!
//! ## Categories of Utilities
//!
//! ### File Metadata
//! - Cheap stat-level metadata ([`FileMetadata`]) with cross-platform mode bits
//! - Textual inode mode (`u=rw-,g=r--,o=r--`)
//! - Binary content sniffing
//!
//! ### Formatting
//! - Human-readable byte sizes
//! - Timestamp conversion at storage precision

use chrono::{DateTime, SubsecRound, Utc};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::time::SystemTime;

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;
const S_ISUID: u32 = 0o4000;
const S_ISGID: u32 = 0o2000;
const S_ISVTX: u32 = 0o1000;

/// Stat-level metadata of a file
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,
    /// Full `st_mode` (type and permission bits)
    pub mode: u32,
    /// Last modification time
    pub mtime: DateTime<Utc>,
    /// Last status change time (modification time where unavailable)
    pub ctime: DateTime<Utc>,
    /// Owner user id (unix only)
    pub uid: Option<u32>,
    /// Owner group id (unix only)
    pub gid: Option<u32>,
}

/// Read metadata of `path`, following symlinks
pub fn get_file_metadata(path: &Path) -> std::io::Result<FileMetadata> {
    let metadata = fs::metadata(path)?;
    let mtime = system_time_to_utc(metadata.modified()?);

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let ctime = DateTime::from_timestamp(metadata.ctime(), metadata.ctime_nsec() as u32)
            .map(|t| t.trunc_subsecs(6))
            .unwrap_or(mtime);
        Ok(FileMetadata {
            size: metadata.len(),
            mode: metadata.mode(),
            mtime,
            ctime,
            uid: Some(metadata.uid()),
            gid: Some(metadata.gid()),
        })
    }

    #[cfg(not(unix))]
    {
        let mut mode = if metadata.is_dir() { S_IFDIR | 0o755 } else { 0o100644 };
        if metadata.permissions().readonly() {
            mode &= !0o222;
        }
        Ok(FileMetadata {
            size: metadata.len(),
            mode,
            mtime,
            ctime: mtime,
            uid: None,
            gid: None,
        })
    }
}

/// Convert a `SystemTime` to UTC at microsecond precision
pub fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time).trunc_subsecs(6)
}

/// Textual representation of an inode mode
///
/// File type and special bits come first as space separated words, then the
/// permission triplets: a regular file with mode `0644` renders as
/// `u=rw-,g=r--,o=r--`, a setuid executable as `setuid u=rwx,g=r-x,o=r-x`.
pub fn mode_repr(mode: u32) -> String {
    let mut out = String::new();

    let kind = match mode & S_IFMT {
        S_IFBLK => Some("blk"),
        S_IFCHR => Some("chr"),
        S_IFDIR => Some("dir"),
        S_IFIFO => Some("fifo"),
        S_IFLNK => Some("sym"),
        S_IFSOCK => Some("sock"),
        _ => None,
    };
    if let Some(kind) = kind {
        out.push_str(kind);
        out.push(' ');
    }
    for (bit, name) in [(S_ISUID, "setuid"), (S_ISGID, "setgid"), (S_ISVTX, "sticky")] {
        if mode & bit != 0 {
            out.push_str(name);
            out.push(' ');
        }
    }

    for (i, who) in ["u", "g", "o"].iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let bits = (mode >> (6 - 3 * i)) & 0o7;
        out.push_str(who);
        out.push('=');
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// Whether the file at `path` looks binary (NUL byte in the first 8KB)
pub fn is_binary_file(path: &Path) -> std::io::Result<bool> {
    let mut head = Vec::with_capacity(8192);
    File::open(path)?.take(8192).read_to_end(&mut head)?;
    Ok(crate::diff::is_binary_content(&head))
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
