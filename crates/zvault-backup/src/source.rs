//! Snapshot source capability interface.
//!
//! Abstracts the snapshot-producing subsystem behind "open a readable
//! byte stream for node N, optionally in estimate-only mode", so the
//! digest engine and lineage builder are testable without invoking real
//! external tools. The real implementation lives in [`crate::zfs`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;

use crate::error::{BackupError, BackupResult};
use crate::lineage::SnapshotNode;

/// Boxed future type for capability trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A live byte stream tied to its producer's completion.
///
/// A finished subprocess with unread buffered output must be fully
/// drained before its exit code is trusted, so the reader and the exit
/// status travel together: consume with [`read`](Self::read) until EOF,
/// then call [`finish`](Self::finish) to surface the producer's status.
pub struct ByteStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    child: Option<(Child, String)>,
    forced_failure: Option<(String, i32)>,
}

impl ByteStream {
    /// Wraps a plain reader with an always-successful completion.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            child: None,
            forced_failure: None,
        }
    }

    /// Takes ownership of a spawned child's stdout. The command string
    /// is kept for error reporting.
    pub fn from_child(mut child: Child, command: impl Into<String>) -> BackupResult<Self> {
        let command = command.into();
        let stdout = child.stdout.take().ok_or_else(|| BackupError::Source {
            reason: format!("no stdout pipe for command: {}", command),
        })?;
        Ok(Self {
            reader: Box::new(stdout),
            child: Some((child, command)),
            forced_failure: None,
        })
    }

    /// Test helper: a stream whose producer reports a nonzero exit
    /// code after the bytes are drained.
    pub fn failing(
        reader: impl AsyncRead + Send + Unpin + 'static,
        command: impl Into<String>,
        code: i32,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            child: None,
            forced_failure: Some((command.into(), code)),
        }
    }

    /// Reads the next chunk of the stream; 0 means EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf).await
    }

    /// Waits for the producer and surfaces a nonzero exit as
    /// [`BackupError::StreamCommand`]. Call only after draining to EOF.
    pub async fn finish(self) -> BackupResult<()> {
        if let Some((command, code)) = self.forced_failure {
            return Err(BackupError::StreamCommand { command, code });
        }
        if let Some((mut child, command)) = self.child {
            let status = child.wait().await?;
            if !status.success() {
                return Err(BackupError::StreamCommand {
                    command,
                    code: status.code().unwrap_or(-1),
                });
            }
        }
        Ok(())
    }
}

/// Capability interface over the snapshot-producing subsystem.
pub trait SnapshotSource: Send + Sync {
    /// Lists all snapshot identifiers, in creation order.
    fn list_snapshots(&self) -> BoxFuture<'_, BackupResult<Vec<String>>>;

    /// Opens the serialized snapshot byte stream for a node.
    fn open_stream(&self, node: &SnapshotNode) -> BackupResult<ByteStream>;

    /// Estimated serialized size in bytes (dry-run mode).
    fn estimate_size<'a>(&'a self, node: &'a SnapshotNode) -> BoxFuture<'a, BackupResult<u64>>;

    /// Creation time of a snapshot.
    fn creation_time<'a>(&'a self, name: &'a str) -> BoxFuture<'a, BackupResult<SystemTime>>;
}

/// In-memory snapshot source for tests.
#[derive(Default)]
pub struct MockSource {
    listing: Vec<String>,
    streams: HashMap<String, Vec<u8>>,
    estimates: HashMap<String, u64>,
    creations: HashMap<String, SystemTime>,
    failing: HashMap<String, i32>,
    streams_opened: AtomicU64,
}

impl MockSource {
    /// Creates an empty mock source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the snapshot listing, in order.
    pub fn with_listing(mut self, names: &[&str]) -> Self {
        self.listing = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Sets the stream content for a snapshot.
    pub fn with_stream(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.streams.insert(name.to_string(), data.into());
        self
    }

    /// Sets the dry-run size estimate for a snapshot.
    pub fn with_estimate(mut self, name: &str, size: u64) -> Self {
        self.estimates.insert(name.to_string(), size);
        self
    }

    /// Sets the creation time for a snapshot.
    pub fn with_creation(mut self, name: &str, when: SystemTime) -> Self {
        self.creations.insert(name.to_string(), when);
        self
    }

    /// Marks a snapshot's stream command as exiting with `code`.
    pub fn with_failing_stream(mut self, name: &str, code: i32) -> Self {
        self.failing.insert(name.to_string(), code);
        self
    }

    /// Number of streams opened so far.
    pub fn streams_opened(&self) -> u64 {
        self.streams_opened.load(Ordering::Relaxed)
    }
}

impl SnapshotSource for MockSource {
    fn list_snapshots(&self) -> BoxFuture<'_, BackupResult<Vec<String>>> {
        let listing = self.listing.clone();
        Box::pin(async move { Ok(listing) })
    }

    fn open_stream(&self, node: &SnapshotNode) -> BackupResult<ByteStream> {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
        let data = self.streams.get(&node.name).cloned().unwrap_or_default();
        let reader = std::io::Cursor::new(data);
        match self.failing.get(&node.name) {
            Some(&code) => Ok(ByteStream::failing(reader, format!("mock send {}", node.name), code)),
            None => Ok(ByteStream::from_reader(reader)),
        }
    }

    fn estimate_size<'a>(&'a self, node: &'a SnapshotNode) -> BoxFuture<'a, BackupResult<u64>> {
        Box::pin(async move {
            if let Some(&size) = self.estimates.get(&node.name) {
                return Ok(size);
            }
            match self.streams.get(&node.name) {
                Some(data) => Ok(data.len() as u64),
                None => Err(BackupError::Source {
                    reason: format!("no estimate for {}", node.name),
                }),
            }
        })
    }

    fn creation_time<'a>(&'a self, name: &'a str) -> BoxFuture<'a, BackupResult<SystemTime>> {
        Box::pin(async move {
            self.creations
                .get(name)
                .copied()
                .ok_or_else(|| BackupError::Source {
                    reason: format!("no creation time for {}", name),
                })
        })
    }
}
