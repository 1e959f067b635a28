//! Consistency orchestrator.
//!
//! Drives the listing -> matching -> digesting -> classification ->
//! tagging loop over every remote object and aggregates a pass/fail
//! verdict for the run. Objects already carrying the verified tag are
//! trusted without recomputation; confirmed digests write the tag back
//! so repeat runs stay cheap.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::digest::{digest_stream, DigestMode};
use crate::error::{BackupError, BackupResult};
use crate::fingerprint::{infer_chunk_size_mb, Fingerprint};
use crate::lineage::{LineageBuilder, SnapshotNode};
use crate::naming::decode_key;
use crate::source::SnapshotSource;
use crate::store::{ObjectKind, ObjectStore};

/// Tag marking a past successful digest comparison.
pub const VERIFIED_TAG: &str = "zvault_confirmed";

/// What to do when a remote object has no matching lineage entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnmatchedPolicy {
    /// Count the object as a failure and keep scanning.
    #[default]
    CountAsFailure,
    /// Stop the whole scan: local state is untrustworthy once a gap
    /// appears.
    Abort,
}

/// Configuration for one verification run.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Root dataset path whose lineage is authoritative.
    pub pool: String,
    /// Store key prefix to scan.
    pub prefix: String,
    /// The store's configured multipart chunk threshold in MiB.
    pub default_chunk_mb: u64,
    /// Mismatches with `estimate / remote size` above this ratio are
    /// downgraded to warnings.
    pub size_warn_ratio: f64,
    /// Policy for remote objects with no lineage match.
    pub unmatched: UnmatchedPolicy,
}

impl VerifyConfig {
    /// Defaults for a pool: no prefix, 256 MiB chunks, 0.95 warning
    /// ratio, unmatched objects counted as failures.
    pub fn new(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            prefix: String::new(),
            default_chunk_mb: 256,
            size_warn_ratio: 0.95,
            unmatched: UnmatchedPolicy::default(),
        }
    }
}

/// Outcome of checking one remote object.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Trusted via the verified tag; no digest computed.
    ConfirmedByTag {
        /// The pre-existing tag value.
        tag: String,
    },
    /// Locally computed digest matched the remote fingerprint exactly.
    ConfirmedComputed {
        /// The matching digest.
        digest: String,
    },
    /// Digest mismatch, but the size estimate says the data is likely
    /// intact (checksum divergence from a non-deterministic stream
    /// encoding detail).
    SizeWarning {
        /// Locally computed digest.
        local: String,
        /// Remote fingerprint.
        remote: String,
        /// `estimate / remote size`.
        ratio: f64,
    },
    /// Digest mismatch outside the size tolerance. Counted as failure.
    Mismatch {
        /// Locally computed digest.
        local: String,
        /// Remote fingerprint.
        remote: String,
    },
    /// No lineage entry for this object. Counted as failure.
    Unmatched,
}

/// Per-object result within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectOutcome {
    /// Remote object key.
    pub key: String,
    /// Decoded snapshot identifier.
    pub snapshot: String,
    /// Classification.
    pub verdict: Verdict,
}

/// Aggregate result of a verification run.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// Per-object outcomes, in scan order (placeholders excluded).
    pub outcomes: Vec<ObjectOutcome>,
    /// Number of objects classified as failures.
    pub failures: u64,
}

impl VerifyReport {
    /// True when no object failed. Warnings do not fail a run.
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// Verifies that remote objects are byte-identical to their local
/// snapshots, without downloading them.
pub struct Verifier<'a> {
    source: &'a dyn SnapshotSource,
    store: &'a dyn ObjectStore,
    config: VerifyConfig,
}

impl<'a> Verifier<'a> {
    /// Creates a verifier over the given collaborators.
    pub fn new(
        source: &'a dyn SnapshotSource,
        store: &'a dyn ObjectStore,
        config: VerifyConfig,
    ) -> Self {
        Self { source, store, config }
    }

    /// Runs the full scan. Returns `Err` only for fatal conditions
    /// (failed stream command, or an unmatched object under
    /// [`UnmatchedPolicy::Abort`]); per-object failures accumulate in
    /// the report instead.
    pub async fn run(&self) -> BackupResult<VerifyReport> {
        let lineage = LineageBuilder::new(self.config.pool.as_str())
            .build(self.source)
            .await?;
        let by_name: HashMap<&str, &SnapshotNode> =
            lineage.iter().map(|n| (n.name.as_str(), n)).collect();

        let mut report = VerifyReport::default();
        for key in self.store.list(&self.config.prefix).await? {
            let info = self.store.info(&key).await?;
            if info.kind == ObjectKind::Placeholder {
                debug!(key = %key, "skipping path placeholder");
                continue;
            }
            // listing keys carry the scan prefix; only the remainder is
            // an encoded snapshot identifier
            let encoded = key
                .strip_prefix(self.config.prefix.as_str())
                .unwrap_or(key.as_str());
            let snapshot = decode_key(encoded);

            let tags = self.store.get_tags(&key).await?;
            if let Some(tag) = tags.get(VERIFIED_TAG) {
                info!(snapshot = %snapshot, "OK (store tag set)");
                report.outcomes.push(ObjectOutcome {
                    key,
                    snapshot,
                    verdict: Verdict::ConfirmedByTag { tag: tag.clone() },
                });
                continue;
            }

            let node = match by_name.get(snapshot.as_str()) {
                Some(node) => *node,
                None => match self.config.unmatched {
                    UnmatchedPolicy::Abort => {
                        return Err(BackupError::UnknownObject { key, snapshot })
                    }
                    UnmatchedPolicy::CountAsFailure => {
                        warn!(snapshot = %snapshot, key = %key, "no lineage entry for remote object");
                        report.failures += 1;
                        report.outcomes.push(ObjectOutcome {
                            key,
                            snapshot,
                            verdict: Verdict::Unmatched,
                        });
                        continue;
                    }
                },
            };

            let fingerprint = Fingerprint::parse(&info.fingerprint);
            let mode = match &fingerprint {
                Fingerprint::Multipart { parts, .. } => {
                    let chunk_mb =
                        infer_chunk_size_mb(info.size, *parts, self.config.default_chunk_mb);
                    debug!(snapshot = %snapshot, chunk_mb = chunk_mb, parts = parts, "multipart fingerprint");
                    DigestMode::Multipart { chunk_bytes: chunk_mb * 1024 * 1024 }
                }
                Fingerprint::Whole(_) => DigestMode::Whole,
            };

            let stream = self.source.open_stream(node)?;
            let local = digest_stream(stream, mode).await?;

            let verdict = if local == info.fingerprint {
                let mut tags = HashMap::new();
                tags.insert(VERIFIED_TAG.to_string(), "true".to_string());
                self.store.put_tags(&key, tags).await?;
                info!(snapshot = %snapshot, "OK (computed)");
                Verdict::ConfirmedComputed { digest: local }
            } else {
                let estimate = self.source.estimate_size(node).await?;
                let ratio = estimate as f64 / info.size as f64;
                if ratio > self.config.size_warn_ratio {
                    warn!(
                        snapshot = %snapshot,
                        local = %local,
                        remote = %info.fingerprint,
                        ratio = ratio,
                        "checksum mismatch within size estimate, treating as warning"
                    );
                    Verdict::SizeWarning { local, remote: info.fingerprint, ratio }
                } else {
                    warn!(
                        snapshot = %snapshot,
                        local = %local,
                        remote = %info.fingerprint,
                        "FAILURE: checksum mismatch"
                    );
                    report.failures += 1;
                    Verdict::Mismatch { local, remote: info.fingerprint }
                }
            };
            report.outcomes.push(ObjectOutcome { key, snapshot, verdict });
        }

        info!(
            objects = report.outcomes.len(),
            failures = report.failures,
            "verification scan complete"
        );
        Ok(report)
    }
}
