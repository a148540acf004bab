//! Bounded-window content hashing
//!
//! SHA-256 digests over an exact byte range of a seekable source, read in
//! fixed 1 MiB chunks so memory use does not depend on the input size.
//!
//! [`sample_digest`] is the cheap variant for very large inputs: instead of
//! reading everything it digests a deterministic pseudo-random walk over
//! `sample_size` chunks, each step seeded with the previous step's digest.
//!
//! Every function here restores the caller's stream position before
//! returning, so a shared reader can be hashed without disturbing it.
//!
//! ```rust
//! use std::io::Cursor;
//! use sysdelta::hasher::{digest, to_hex};
//!
//! let mut src = Cursor::new(b"hello world".to_vec());
//! let whole = digest(&mut src, 0, None).unwrap();
//! let world = digest(&mut src, 6, Some(5)).unwrap();
//! assert_ne!(whole, world);
//! assert_eq!(to_hex(&world).len(), 64);
//! ```

use crate::error::{MonitorError, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Read size used while hashing
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// A SHA-256 digest
pub type Digest256 = [u8; 32];

/// Digest `[offset, offset + length)` of `source`
///
/// `length = None` hashes to the end of the source.
///
/// # Errors
///
/// [`MonitorError::Bounds`] if the window does not fit inside the source.
pub fn digest<R: Read + Seek>(source: &mut R, offset: u64, length: Option<u64>) -> Result<Digest256> {
    digest_seeded(source, offset, length, &[])
}

/// Like [`digest`], feeding `seed` to the hasher before the content
pub fn digest_seeded<R: Read + Seek>(
    source: &mut R,
    offset: u64,
    length: Option<u64>,
    seed: &[u8],
) -> Result<Digest256> {
    with_restored_position(source, |src, size| {
        let length = check_window(size, offset, length)?;
        hash_window(src, offset, length, seed)
    })
}

/// Digest of a file's full content
pub fn digest_file(path: &Path) -> Result<Digest256> {
    let mut file = File::open(path)?;
    digest(&mut file, 0, None)
}

/// Sampled digest over `sample_count` chunks of `sample_size` bytes
///
/// The source is partitioned into `size / sample_size` full chunks plus one
/// trailing remainder chunk (possibly empty). Each round picks the chunk at
/// index `seed mod pool_len` (the seed read as a big-endian integer), digests
/// it seeded with `seed`, uses that digest as the next seed and removes the
/// chunk from the pool, refilling the pool once it runs dry. The digest of
/// the last sampled chunk is returned.
///
/// # Errors
///
/// [`MonitorError::InvalidArgument`] if `sample_size` or `sample_count` is zero.
pub fn sample_digest<R: Read + Seek>(
    source: &mut R,
    sample_size: u64,
    sample_count: usize,
    seed: &[u8],
) -> Result<Digest256> {
    if sample_size == 0 {
        return Err(MonitorError::invalid_argument("sample_size must be positive"));
    }
    if sample_count == 0 {
        return Err(MonitorError::invalid_argument("sample_count must be positive"));
    }

    with_restored_position(source, |src, size| {
        let full = size / sample_size;
        let chunks: Vec<(u64, u64)> = (0..full)
            .map(|i| (i * sample_size, sample_size))
            .chain(std::iter::once((full * sample_size, size % sample_size)))
            .collect();

        let mut pool: Vec<(u64, u64)> = Vec::new();
        let mut seed = seed.to_vec();
        let mut last = [0u8; 32];

        for _ in 0..sample_count {
            if pool.is_empty() {
                pool = chunks.clone();
            }
            let idx = seed_index(&seed, pool.len());
            let (offset, length) = pool.remove(idx);
            last = hash_window(src, offset, length, &seed)?;
            seed = last.to_vec();
        }
        Ok(last)
    })
}

/// Sampled digest of a file
pub fn sample_digest_file(path: &Path, sample_size: u64, sample_count: usize, seed: &[u8]) -> Result<Digest256> {
    let mut file = File::open(path)?;
    sample_digest(&mut file, sample_size, sample_count, seed)
}

/// Lowercase hex encoding of a digest
pub fn to_hex(digest: &Digest256) -> String {
    hex::encode(digest)
}

/// Run `f` with the source size, restoring the original position afterwards
fn with_restored_position<R, T, F>(source: &mut R, f: F) -> Result<T>
where
    R: Read + Seek,
    F: FnOnce(&mut R, u64) -> Result<T>,
{
    let position = source.stream_position()?;
    let size = source.seek(SeekFrom::End(0))?;
    let result = f(source, size);
    source.seek(SeekFrom::Start(position))?;
    result
}

fn check_window(size: u64, offset: u64, length: Option<u64>) -> Result<u64> {
    let length = match length {
        Some(len) => len,
        None => size.checked_sub(offset).ok_or(MonitorError::Bounds { size, offset, length: 0 })?,
    };
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(length),
        _ => Err(MonitorError::Bounds { size, offset, length }),
    }
}

fn hash_window<R: Read + Seek>(src: &mut R, offset: u64, length: u64, seed: &[u8]) -> Result<Digest256> {
    let mut hasher = Sha256::new();
    hasher.update(seed);

    src.seek(SeekFrom::Start(offset))?;
    let mut remaining = length;
    let mut buffer = vec![0u8; CHUNK_SIZE.min(length as usize).max(1)];
    while remaining > 0 {
        let want = buffer.len().min(remaining as usize);
        let n = src.read(&mut buffer[..want])?;
        if n == 0 {
            // Source shrank while hashing
            return Err(MonitorError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("source ended {} bytes early", remaining),
            )));
        }
        hasher.update(&buffer[..n]);
        remaining -= n as u64;
    }

    Ok(hasher.finalize().into())
}

/// `seed` as a big-endian integer, reduced modulo `len`
fn seed_index(seed: &[u8], len: usize) -> usize {
    let modulus = len as u128;
    seed.iter()
        .fold(0u128, |acc, &b| (acc * 256 + u128::from(b)) % modulus) as usize
}
