//! Snapshot lineage reconstruction.
//!
//! Converts the flat, creation-ordered snapshot listing into a list of
//! nodes with parent links and full/incremental classification. The
//! listing order is load-bearing: an incremental's parent is the
//! immediately preceding accepted entry of the same dataset, so the
//! first accepted entry of a dataset must be a full baseline.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::error::{BackupError, BackupResult};
use crate::source::SnapshotSource;

/// One snapshot in the reconstructed lineage.
///
/// Rebuilt from the live listing on every run; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotNode {
    /// Full identifier, `<dataset>@<label>`.
    pub name: String,
    /// Parent snapshot identifier; `None` marks a full baseline.
    pub parent: Option<String>,
    /// False once the age cutoff excludes this node from upload
    /// candidacy. Ineligible nodes still link as parents.
    pub eligible: bool,
    /// Creation time, filled in lazily when an age cutoff is applied.
    pub creation: Option<SystemTime>,
}

impl SnapshotNode {
    /// Returns true if this snapshot depends on a parent.
    pub fn is_incremental(&self) -> bool {
        self.parent.is_some()
    }

    /// The dataset path portion of the identifier.
    pub fn dataset(&self) -> &str {
        self.name.split_once('@').map(|(d, _)| d).unwrap_or(&self.name)
    }

    /// The label portion of the identifier.
    pub fn label(&self) -> &str {
        self.name.split_once('@').map(|(_, l)| l).unwrap_or("")
    }
}

/// Retention class derived from a snapshot label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetentionClass {
    /// Standalone baseline, no parent.
    Full,
    /// Delta against the preceding accepted snapshot.
    Incremental,
    /// Never backed up (hourly churn).
    Excluded,
    /// System-internal snapshot tooling, silently skipped.
    Noise,
    /// Unknown label, skipped with a warning.
    Unrecognized,
}

fn classify(label: &str) -> RetentionClass {
    if label.contains("hourly") {
        RetentionClass::Excluded
    } else if label.contains("monthly") || label.contains("yearly") {
        RetentionClass::Full
    } else if label.contains("daily") {
        RetentionClass::Incremental
    } else if label.starts_with("zfs-auto-snap") || label.starts_with("syncoid_") {
        RetentionClass::Noise
    } else {
        RetentionClass::Unrecognized
    }
}

/// Builds the authoritative local lineage for one root dataset path.
#[derive(Debug, Clone, Default)]
pub struct LineageBuilder {
    pool: String,
    max_age: Option<Duration>,
    parent_overrides: HashMap<String, String>,
}

impl LineageBuilder {
    /// Creates a builder scoped to the given root dataset path.
    pub fn new(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            max_age: None,
            parent_overrides: HashMap::new(),
        }
    }

    /// Excludes snapshots older than `max_age` from upload candidacy.
    /// They still participate in parent-chain linkage.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Overrides positional parent inference for specific snapshots.
    /// Keys are child identifiers, values their parent identifiers.
    pub fn with_parent_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.parent_overrides = overrides;
        self
    }

    /// Lists snapshots from the source and links them, applying the age
    /// cutoff (if configured) against the current time.
    pub async fn build(&self, source: &dyn SnapshotSource) -> BackupResult<Vec<SnapshotNode>> {
        self.build_at(source, SystemTime::now()).await
    }

    /// As [`build`](Self::build), with an explicit notion of "now".
    pub async fn build_at(
        &self,
        source: &dyn SnapshotSource,
        now: SystemTime,
    ) -> BackupResult<Vec<SnapshotNode>> {
        let names = source.list_snapshots().await?;
        let mut nodes = self.link(&names)?;
        if let Some(max_age) = self.max_age {
            for node in &mut nodes {
                // Creation times are read lazily, and only when a
                // cutoff is actually configured.
                let creation = source.creation_time(&node.name).await?;
                node.creation = Some(creation);
                let age = now.duration_since(creation).unwrap_or(Duration::ZERO);
                node.eligible = age <= max_age;
            }
        }
        Ok(nodes)
    }

    /// Links an already-obtained listing into lineage nodes.
    ///
    /// The listing must be in creation order; parent selection for
    /// incrementals is sequential adjacency within the same dataset.
    pub fn link(&self, names: &[String]) -> BackupResult<Vec<SnapshotNode>> {
        let mut nodes: Vec<SnapshotNode> = Vec::new();
        let mut last_accepted: HashMap<String, String> = HashMap::new();

        for name in names {
            if !self.in_pool(name) {
                continue;
            }
            let (dataset, label) = match name.split_once('@') {
                Some(parts) => parts,
                None => {
                    warn!(snapshot = %name, "snapshot name has no label boundary, skipping");
                    continue;
                }
            };
            let parent = match classify(label) {
                RetentionClass::Full => None,
                RetentionClass::Incremental => {
                    let parent = self
                        .parent_overrides
                        .get(name)
                        .cloned()
                        .or_else(|| last_accepted.get(dataset).cloned());
                    match parent {
                        Some(p) => Some(p),
                        None => {
                            return Err(BackupError::OrphanIncremental {
                                snapshot: name.clone(),
                            })
                        }
                    }
                }
                RetentionClass::Excluded => continue,
                RetentionClass::Noise => {
                    debug!(snapshot = %name, "skipping system-internal snapshot");
                    continue;
                }
                RetentionClass::Unrecognized => {
                    warn!(snapshot = %name, "unrecognized snapshot label, skipping");
                    continue;
                }
            };
            last_accepted.insert(dataset.to_string(), name.clone());
            nodes.push(SnapshotNode {
                name: name.clone(),
                parent,
                eligible: true,
                creation: None,
            });
        }
        Ok(nodes)
    }

    fn in_pool(&self, name: &str) -> bool {
        let dataset = name.split_once('@').map(|(d, _)| d).unwrap_or(name);
        dataset == self.pool || dataset.starts_with(&format!("{}/", self.pool))
    }
}
