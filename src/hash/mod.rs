//! Change-detection fingerprints
//!
//! Each file's fingerprint is the first 16 bytes of
//! `BLAKE3(path bytes ‖ size_le ‖ mtime_le)`. The hash deliberately covers
//! metadata rather than file contents: "changed" means the `(path, size,
//! mtime)` triple changed, which is the cost/precision trade-off this tool
//! makes. Do not substitute a content hash.

use crate::cache::FileRecord;
use crate::error::{Result, SyncError};
use rayon::prelude::*;

/// Compute the 16-byte fingerprint for one `(path, size, mtime)` triple.
pub fn fingerprint(path: &str, size: u64, mtime: u64) -> [u8; 16] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_bytes());
    hasher.update(&size.to_le_bytes());
    hasher.update(&mtime.to_le_bytes());

    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest.as_bytes()[..16]);
    out
}

/// Fill in the fingerprint of every record in place.
///
/// Work is split into `ceil(n / threads)` contiguous chunks, one chunk per
/// worker, and all workers are joined before returning.
pub fn hash_records(records: &mut [FileRecord], threads: usize) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let threads = threads.max(1);
    let chunk_size = records.len().div_ceil(threads);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| SyncError::ThreadPool(e.to_string()))?;

    tracing::info!(
        "hashing {} files across {} threads",
        records.len(),
        threads
    );

    pool.install(|| {
        records.par_chunks_mut(chunk_size).for_each(|chunk| {
            for record in chunk {
                record.hash = fingerprint(&record.path, record.size, record.mtime);
            }
        });
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint("/data/file.txt", 100, 12345);
        let b = fingerprint("/data/file.txt", 100, 12345);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_covers_every_field() {
        let base = fingerprint("/data/file.txt", 100, 12345);
        assert_ne!(base, fingerprint("/data/other.txt", 100, 12345));
        assert_ne!(base, fingerprint("/data/file.txt", 101, 12345));
        assert_ne!(base, fingerprint("/data/file.txt", 100, 12346));
    }

    #[test]
    fn test_fingerprint_matches_truncated_blake3() {
        let path = "/data/file.txt";
        let (size, mtime) = (77u64, 88u64);

        let mut buf = Vec::new();
        buf.extend_from_slice(path.as_bytes());
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&mtime.to_le_bytes());
        let expected = blake3::hash(&buf);

        assert_eq!(fingerprint(path, size, mtime)[..], expected.as_bytes()[..16]);
    }

    #[test]
    fn test_hash_records_fills_all_entries() {
        let mut records: Vec<FileRecord> = (0..37)
            .map(|i| FileRecord::new(format!("/data/{i}"), i, i * 10))
            .collect();

        hash_records(&mut records, 4).unwrap();

        for record in &records {
            assert_eq!(
                record.hash,
                fingerprint(&record.path, record.size, record.mtime)
            );
        }
    }

    #[test]
    fn test_hash_records_parallel_matches_serial() {
        let make = || -> Vec<FileRecord> {
            (0..16)
                .map(|i| FileRecord::new(format!("/data/{i}"), i, i))
                .collect()
        };

        let mut serial = make();
        let mut parallel = make();
        hash_records(&mut serial, 1).unwrap();
        hash_records(&mut parallel, 8).unwrap();

        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_hash_records_empty_is_ok() {
        let mut records: Vec<FileRecord> = Vec::new();
        hash_records(&mut records, 4).unwrap();
    }
}
