//! ZFS-backed snapshot source.
//!
//! Shells out to `zfs list`, `zfs send` and `zfs get`. Send streams are
//! raw (`-w`); incrementals add `-i <parent>`. Size estimates come from
//! the dry-run form (`-nvP`), whose last output line carries the byte
//! estimate as its final tab-separated field.

use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::process::Command;
use tracing::debug;

use crate::error::{BackupError, BackupResult};
use crate::lineage::SnapshotNode;
use crate::source::{BoxFuture, ByteStream, SnapshotSource};

/// Snapshot source driving the `zfs` command-line tools.
#[derive(Debug, Clone, Default)]
pub struct ZfsSource {
    use_sudo: bool,
}

impl ZfsSource {
    /// Creates a source running `zfs` directly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes every command with `sudo`.
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    fn prefix(&self) -> &'static str {
        if self.use_sudo {
            "sudo "
        } else {
            ""
        }
    }

    /// The shell command emitting a node's serialized stream, or its
    /// dry-run variant reporting a size estimate.
    pub fn send_command(&self, node: &SnapshotNode, dryrun: bool) -> String {
        let flags = if dryrun { "-nvPw" } else { "-w" };
        match &node.parent {
            Some(parent) => format!(
                "{}zfs send {} -i {} {}",
                self.prefix(),
                flags,
                parent,
                node.name
            ),
            None => format!("{}zfs send {} {}", self.prefix(), flags, node.name),
        }
    }

    async fn run(&self, command: &str) -> BackupResult<String> {
        debug!(command = %command, "running zfs command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(BackupError::Source {
                reason: format!(
                    "command failed ({}): {}",
                    command,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Extracts the byte estimate from dry-run send output: the final
/// tab-separated field of the last non-empty line.
pub(crate) fn parse_estimate(output: &str) -> BackupResult<u64> {
    let last = output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .last()
        .ok_or_else(|| BackupError::Source {
            reason: "empty dry-run output".to_string(),
        })?;
    let field = last.rsplit('\t').next().unwrap_or("").trim();
    field.parse().map_err(|_| BackupError::Source {
        reason: format!("unparseable size estimate: {:?}", last),
    })
}

/// Parses the epoch-seconds output of `zfs get -Hp creation`.
pub(crate) fn parse_creation(output: &str) -> BackupResult<SystemTime> {
    let secs: u64 = output.trim().parse().map_err(|_| BackupError::Source {
        reason: format!("unparseable creation time: {:?}", output.trim()),
    })?;
    Ok(UNIX_EPOCH + Duration::from_secs(secs))
}

impl SnapshotSource for ZfsSource {
    fn list_snapshots(&self) -> BoxFuture<'_, BackupResult<Vec<String>>> {
        Box::pin(async move {
            let out = self
                .run(&format!("{}zfs list -t snapshot -H -o name", self.prefix()))
                .await?;
            Ok(out.lines().filter(|l| !l.is_empty()).map(String::from).collect())
        })
    }

    fn open_stream(&self, node: &SnapshotNode) -> BackupResult<ByteStream> {
        let command = self.send_command(node, false);
        debug!(command = %command, "spawning snapshot stream");
        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()?;
        ByteStream::from_child(child, command)
    }

    fn estimate_size<'a>(&'a self, node: &'a SnapshotNode) -> BoxFuture<'a, BackupResult<u64>> {
        Box::pin(async move {
            let out = self.run(&self.send_command(node, true)).await?;
            parse_estimate(&out)
        })
    }

    fn creation_time<'a>(&'a self, name: &'a str) -> BoxFuture<'a, BackupResult<SystemTime>> {
        Box::pin(async move {
            let out = self
                .run(&format!("{}zfs get -Hp -o value creation {}", self.prefix(), name))
                .await?;
            parse_creation(&out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, parent: Option<&str>) -> SnapshotNode {
        SnapshotNode {
            name: name.to_string(),
            parent: parent.map(String::from),
            eligible: true,
            creation: None,
        }
    }

    #[test]
    fn test_full_send_command() {
        let source = ZfsSource::new();
        assert_eq!(
            source.send_command(&node("tank@monthly-1", None), false),
            "zfs send -w tank@monthly-1"
        );
    }

    #[test]
    fn test_incremental_send_command() {
        let source = ZfsSource::new();
        assert_eq!(
            source.send_command(&node("tank@daily-2", Some("tank@daily-1")), false),
            "zfs send -w -i tank@daily-1 tank@daily-2"
        );
    }

    #[test]
    fn test_dryrun_send_command_with_sudo() {
        let source = ZfsSource::new().with_sudo(true);
        assert_eq!(
            source.send_command(&node("tank@monthly-1", None), true),
            "sudo zfs send -nvPw tank@monthly-1"
        );
    }

    #[test]
    fn test_parse_estimate_last_line_last_field() {
        let output = "full\ttank@monthly-1\t1234\nsize\t567890\n";
        assert_eq!(parse_estimate(output).unwrap(), 567890);
    }

    #[test]
    fn test_parse_estimate_ignores_trailing_blank_lines() {
        let output = "size\t42\n\n";
        assert_eq!(parse_estimate(output).unwrap(), 42);
    }

    #[test]
    fn test_parse_estimate_rejects_garbage() {
        assert!(parse_estimate("no tabs here").is_err());
        assert!(parse_estimate("").is_err());
    }

    #[test]
    fn test_parse_creation() {
        let when = parse_creation("1700000000\n").unwrap();
        assert_eq!(when, UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        assert!(parse_creation("-").is_err());
    }
}
