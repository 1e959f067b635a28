//! Remote fingerprint parsing and multipart chunk-size inference.
//!
//! The object store reports one opaque fingerprint per object. For
//! objects uploaded in a single request it is a plain MD5 hex digest;
//! for multipart uploads it is `<hex digest>-<part count>`, the digest
//! of the concatenated per-part digests. The store never reveals the
//! chunk size it used, but it is recoverable from the size/part-count
//! ratio.

use std::fmt;

/// Bytes per MiB, the unit the store sizes its chunks in.
const MIB: u64 = 1024 * 1024;

/// A parsed remote content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    /// Whole-object digest from a single-request upload.
    Whole(String),
    /// Multipart digest-of-digests with its declared part count.
    Multipart {
        /// Hex digest of the concatenated raw per-part digests.
        digest: String,
        /// Number of parts the object was uploaded in.
        parts: u32,
    },
}

impl Fingerprint {
    /// Parses a raw fingerprint string. A trailing `-<integer>` after
    /// the final dash marks a multipart fingerprint; anything else is a
    /// whole-object digest. Total over all inputs.
    pub fn parse(raw: &str) -> Self {
        if let Some((digest, suffix)) = raw.rsplit_once('-') {
            if !digest.is_empty() {
                if let Ok(parts) = suffix.parse::<u32>() {
                    return Fingerprint::Multipart {
                        digest: digest.to_string(),
                        parts,
                    };
                }
            }
        }
        Fingerprint::Whole(raw.to_string())
    }

    /// Returns true for the multipart form.
    pub fn is_multipart(&self) -> bool {
        matches!(self, Fingerprint::Multipart { .. })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Whole(digest) => write!(f, "{}", digest),
            Fingerprint::Multipart { digest, parts } => write!(f, "{}-{}", digest, parts),
        }
    }
}

/// Infers the chunk size (in MiB) a multipart upload used, from the
/// object size and the fingerprint's declared part count.
///
/// The reconstructed size is `ceil(size_mb / parts)`, rounded up so the
/// boundaries are never smaller than what could have produced `parts`
/// parts, and floored at `default_mb` since the store never chunks
/// below its configured threshold.
pub fn infer_chunk_size_mb(size_bytes: u64, parts: u32, default_mb: u64) -> u64 {
    debug_assert!(parts > 0);
    let divisor = u64::from(parts.max(1)) * MIB;
    let inferred = size_bytes.div_ceil(divisor);
    inferred.max(default_mb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole() {
        let fp = Fingerprint::parse("9e107d9d372bb6826bd81d3542a419d6");
        assert_eq!(
            fp,
            Fingerprint::Whole("9e107d9d372bb6826bd81d3542a419d6".to_string())
        );
        assert!(!fp.is_multipart());
    }

    #[test]
    fn test_parse_multipart() {
        let fp = Fingerprint::parse("d41d8cd98f00b204e9800998ecf8427e-40");
        assert_eq!(
            fp,
            Fingerprint::Multipart {
                digest: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
                parts: 40,
            }
        );
        assert!(fp.is_multipart());
    }

    #[test]
    fn test_parse_non_numeric_suffix_is_whole() {
        let fp = Fingerprint::parse("abc-def");
        assert_eq!(fp, Fingerprint::Whole("abc-def".to_string()));
    }

    #[test]
    fn test_display_round_trip() {
        for raw in ["9e107d9d372bb6826bd81d3542a419d6", "abcdef0123456789-12"] {
            assert_eq!(Fingerprint::parse(raw).to_string(), raw);
        }
    }

    #[test]
    fn test_infer_chunk_size_floored_at_default() {
        // 10000 MiB in 40 parts -> 250 MiB, below the 256 MiB default.
        let size = 10_000 * 1024 * 1024;
        assert_eq!(infer_chunk_size_mb(size, 40, 256), 256);
    }

    #[test]
    fn test_infer_chunk_size_above_default() {
        let size = 10_000 * 1024 * 1024;
        assert_eq!(infer_chunk_size_mb(size, 40, 64), 250);
    }

    #[test]
    fn test_infer_chunk_size_rounds_up() {
        // 1001 MiB in 4 parts: 250.25 rounds up to 251.
        let size = 1001 * 1024 * 1024;
        assert_eq!(infer_chunk_size_mb(size, 4, 64), 251);
    }

    #[test]
    fn test_infer_chunk_size_single_part() {
        let size = 300 * 1024 * 1024;
        assert_eq!(infer_chunk_size_mb(size, 1, 256), 300);
    }
}
