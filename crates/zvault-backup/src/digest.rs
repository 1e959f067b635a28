//! Streaming digest engine.
//!
//! Computes a digest of a live byte stream that is bit-comparable to
//! the remote store's fingerprint, in one of two shapes:
//!
//! - whole-object: one running MD5 over the stream, read in 1 MiB
//!   blocks, hex-encoded;
//! - multipart: one complete MD5 per chunk-sized block, then MD5 over
//!   the concatenated raw block digests, formatted `<hex>-<blocks>` —
//!   the store's documented multipart fingerprint construction.
//!
//! The stream is consumed incrementally and fully drained before the
//! producer's exit status is checked; a nonzero exit aborts the run.

use md5::{Digest, Md5};
use tracing::debug;

use crate::error::BackupResult;
use crate::source::ByteStream;

/// Read block size for whole-object digests.
const WHOLE_READ_BLOCK: usize = 1024 * 1024;

/// Digest shape, selected from the remote fingerprint's form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestMode {
    /// Single running digest over the whole stream.
    Whole,
    /// Per-chunk digests of `chunk_bytes`-sized blocks, combined.
    Multipart {
        /// Chunk size in bytes, from [`crate::fingerprint::infer_chunk_size_mb`].
        chunk_bytes: u64,
    },
}

/// Digests a stream to completion and verifies the producer exited
/// cleanly. The producer's exit status is only read after EOF, so
/// buffered output is never left behind.
pub async fn digest_stream(mut stream: ByteStream, mode: DigestMode) -> BackupResult<String> {
    let digest = match mode {
        DigestMode::Whole => whole_digest(&mut stream).await?,
        DigestMode::Multipart { chunk_bytes } => {
            multipart_digest(&mut stream, chunk_bytes as usize).await?
        }
    };
    stream.finish().await?;
    Ok(digest)
}

async fn whole_digest(stream: &mut ByteStream) -> BackupResult<String> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; WHOLE_READ_BLOCK];
    let mut total = 0u64;
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    debug!(bytes = total, "whole-object digest complete");
    Ok(hex::encode(hasher.finalize()))
}

async fn multipart_digest(stream: &mut ByteStream, chunk_bytes: usize) -> BackupResult<String> {
    let mut chunk = vec![0u8; chunk_bytes];
    let mut combined = Md5::new();
    let mut parts = 0u32;
    loop {
        let filled = fill_chunk(stream, &mut chunk).await?;
        if filled == 0 {
            break;
        }
        // Each part is hashed alone; only the raw part digests feed the
        // final hash.
        combined.update(Md5::digest(&chunk[..filled]));
        parts += 1;
    }
    debug!(parts = parts, chunk_bytes = chunk_bytes, "multipart digest complete");
    Ok(format!("{}-{}", hex::encode(combined.finalize()), parts))
}

/// Reads until `buf` is full or the stream ends; a short fill marks the
/// final chunk.
async fn fill_chunk(stream: &mut ByteStream, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackupError;
    use std::io::Cursor;

    fn reader(data: &[u8]) -> ByteStream {
        ByteStream::from_reader(Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn test_whole_digest_known_vector() {
        let digest = digest_stream(reader(b"hello world"), DigestMode::Whole)
            .await
            .unwrap();
        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc0");
    }

    #[tokio::test]
    async fn test_whole_digest_empty_stream() {
        let digest = digest_stream(reader(b""), DigestMode::Whole).await.unwrap();
        assert_eq!(digest, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn test_multipart_digest_matches_manual_construction() {
        let data = b"abcde";
        let digest = digest_stream(reader(data), DigestMode::Multipart { chunk_bytes: 2 })
            .await
            .unwrap();

        let mut combined = Md5::new();
        combined.update(Md5::digest(b"ab"));
        combined.update(Md5::digest(b"cd"));
        combined.update(Md5::digest(b"e"));
        let expected = format!("{}-3", hex::encode(combined.finalize()));
        assert_eq!(digest, expected);
    }

    #[tokio::test]
    async fn test_multipart_differs_from_whole() {
        let data = vec![7u8; 4096];
        let whole = digest_stream(reader(&data), DigestMode::Whole).await.unwrap();
        let multi = digest_stream(reader(&data), DigestMode::Multipart { chunk_bytes: 1024 })
            .await
            .unwrap();
        assert_ne!(whole, multi);
        assert!(multi.ends_with("-4"));
    }

    #[tokio::test]
    async fn test_multipart_single_short_chunk() {
        let digest = digest_stream(reader(b"tiny"), DigestMode::Multipart { chunk_bytes: 1024 })
            .await
            .unwrap();

        let mut combined = Md5::new();
        combined.update(Md5::digest(b"tiny"));
        assert_eq!(digest, format!("{}-1", hex::encode(combined.finalize())));
    }

    #[tokio::test]
    async fn test_multipart_exact_chunk_boundary() {
        let data = vec![1u8; 2048];
        let digest = digest_stream(reader(&data), DigestMode::Multipart { chunk_bytes: 1024 })
            .await
            .unwrap();
        assert!(digest.ends_with("-2"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_fatal() {
        let stream = ByteStream::failing(Cursor::new(b"bytes".to_vec()), "zfs send tank@d", 2);
        let err = digest_stream(stream, DigestMode::Whole).await.unwrap_err();
        assert!(matches!(err, BackupError::StreamCommand { code: 2, .. }));
    }
}
