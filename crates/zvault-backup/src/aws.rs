//! Object store backend driving the AWS command-line tools.
//!
//! Metadata operations go through `aws s3api` with JSON output; uploads
//! pipe the snapshot stream into `aws s3 cp -` so nothing is ever
//! buffered on disk. Tag writes merge with the existing tag set, since
//! `put-object-tagging` replaces it wholesale.

use std::collections::HashMap;
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use crate::error::{BackupError, BackupResult};
use crate::source::{BoxFuture, ByteStream};
use crate::store::{ObjectInfo, ObjectKind, ObjectStore};

/// Object store backed by the `aws` CLI.
#[derive(Debug, Clone)]
pub struct AwsCliStore {
    bucket: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListingPage {
    #[serde(default)]
    contents: Vec<ListingEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListingEntry {
    key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HeadObject {
    content_length: u64,
    e_tag: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tagging {
    #[serde(default)]
    tag_set: Vec<TagEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagEntry {
    key: String,
    value: String,
}

impl AwsCliStore {
    /// Creates a store for one bucket.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self { bucket: bucket.into() }
    }

    async fn s3api(&self, op: &str, args: &[&str]) -> BackupResult<String> {
        let mut cmd = Command::new("aws");
        cmd.arg("s3api")
            .arg(op)
            .arg("--bucket")
            .arg(&self.bucket)
            .args(args)
            .arg("--output")
            .arg("json")
            .stdin(Stdio::null());
        debug!(op = %op, "running aws s3api");
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(BackupError::Store {
                op: op.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn parse_listing(json: &str) -> BackupResult<Vec<String>> {
    if json.trim().is_empty() {
        // head/list with no matches can emit nothing at all
        return Ok(Vec::new());
    }
    let page: ListingPage = serde_json::from_str(json).map_err(|e| BackupError::Store {
        op: "list-objects-v2".to_string(),
        reason: e.to_string(),
    })?;
    Ok(page.contents.into_iter().map(|e| e.key).collect())
}

fn parse_head(key: &str, json: &str) -> BackupResult<ObjectInfo> {
    let head: HeadObject = serde_json::from_str(json).map_err(|e| BackupError::Store {
        op: "head-object".to_string(),
        reason: e.to_string(),
    })?;
    let kind = if key.ends_with('/') {
        ObjectKind::Placeholder
    } else {
        ObjectKind::Object
    };
    Ok(ObjectInfo {
        key: key.to_string(),
        size: head.content_length,
        // the store wraps the fingerprint in literal quotes
        fingerprint: head.e_tag.trim_matches('"').to_string(),
        kind,
    })
}

fn parse_tagging(json: &str) -> BackupResult<HashMap<String, String>> {
    let tagging: Tagging = serde_json::from_str(json).map_err(|e| BackupError::Store {
        op: "get-object-tagging".to_string(),
        reason: e.to_string(),
    })?;
    Ok(tagging.tag_set.into_iter().map(|t| (t.key, t.value)).collect())
}

fn tagging_json(tags: &HashMap<String, String>) -> String {
    let mut entries: Vec<_> = tags.iter().collect();
    entries.sort();
    let set: Vec<serde_json::Value> = entries
        .into_iter()
        .map(|(k, v)| serde_json::json!({ "Key": k, "Value": v }))
        .collect();
    serde_json::json!({ "TagSet": set }).to_string()
}

fn metadata_arg(metadata: &HashMap<String, String>) -> String {
    let mut entries: Vec<_> = metadata.iter().collect();
    entries.sort();
    entries
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Pipes `stream` into the child's stdin. Stderr is drained on a
/// separate task the whole time: the child must never stall on a full
/// stderr pipe while we are still writing its stdin.
async fn pipe_upload(mut cmd: Command, mut stream: ByteStream) -> BackupResult<()> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdin = child.stdin.take().ok_or_else(|| BackupError::Store {
        op: "put".to_string(),
        reason: "no stdin pipe for upload command".to_string(),
    })?;
    let mut stderr = child.stderr.take().ok_or_else(|| BackupError::Store {
        op: "put".to_string(),
        reason: "no stderr pipe for upload command".to_string(),
    })?;
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    });

    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdin.write_all(&buf[..n]).await?;
    }
    drop(stdin);

    // stream producer first: a broken upload must not mask a failed
    // snapshot send
    stream.finish().await?;

    let status = child.wait().await?;
    let stderr_buf = stderr_task.await.unwrap_or_default();
    if !status.success() {
        return Err(BackupError::Store {
            op: "put".to_string(),
            reason: String::from_utf8_lossy(&stderr_buf).trim().to_string(),
        });
    }
    Ok(())
}

impl ObjectStore for AwsCliStore {
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, BackupResult<Vec<String>>> {
        Box::pin(async move {
            let json = self
                .s3api("list-objects-v2", &["--prefix", prefix])
                .await?;
            parse_listing(&json)
        })
    }

    fn info<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackupResult<ObjectInfo>> {
        Box::pin(async move {
            let json = self.s3api("head-object", &["--key", key]).await?;
            parse_head(key, &json)
        })
    }

    fn get_tags<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, BackupResult<HashMap<String, String>>> {
        Box::pin(async move {
            let json = self.s3api("get-object-tagging", &["--key", key]).await?;
            parse_tagging(&json)
        })
    }

    fn put_tags<'a>(
        &'a self,
        key: &'a str,
        tags: HashMap<String, String>,
    ) -> BoxFuture<'a, BackupResult<()>> {
        Box::pin(async move {
            // put-object-tagging replaces the whole set, so merge first
            let mut merged = self.get_tags(key).await?;
            merged.extend(tags);
            let json = tagging_json(&merged);
            self.s3api("put-object-tagging", &["--key", key, "--tagging", json.as_str()])
                .await?;
            Ok(())
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        stream: ByteStream,
        size_hint: u64,
        storage_class: Option<&'a str>,
        metadata: HashMap<String, String>,
    ) -> BoxFuture<'a, BackupResult<()>> {
        Box::pin(async move {
            let target = format!("s3://{}/{}", self.bucket, key);
            let size_arg = size_hint.to_string();
            let mut cmd = Command::new("aws");
            cmd.arg("s3")
                .arg("cp")
                .arg("-")
                .arg(&target)
                .arg("--expected-size")
                .arg(&size_arg);
            if let Some(class) = storage_class {
                cmd.arg("--storage-class").arg(class);
            }
            if !metadata.is_empty() {
                cmd.arg("--metadata").arg(metadata_arg(&metadata));
            }
            debug!(target = %target, size_hint = size_hint, "uploading via aws s3 cp");
            pipe_upload(cmd, stream).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let json = r#"{"Contents": [{"Key": "a", "Size": 1}, {"Key": "b", "Size": 2}]}"#;
        assert_eq!(parse_listing(json).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_parse_listing_empty() {
        assert!(parse_listing("{}").unwrap().is_empty());
        assert!(parse_listing("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_head_strips_quotes() {
        let json = r#"{"ContentLength": 4096, "ETag": "\"abc123-4\""}"#;
        let info = parse_head("tank_AT_daily-1", json).unwrap();
        assert_eq!(info.size, 4096);
        assert_eq!(info.fingerprint, "abc123-4");
        assert_eq!(info.kind, ObjectKind::Object);
    }

    #[test]
    fn test_parse_head_placeholder() {
        let json = r#"{"ContentLength": 0, "ETag": "\"x\""}"#;
        let info = parse_head("backups/", json).unwrap();
        assert_eq!(info.kind, ObjectKind::Placeholder);
    }

    #[test]
    fn test_parse_tagging() {
        let json = r#"{"TagSet": [{"Key": "zvault_confirmed", "Value": "true"}]}"#;
        let tags = parse_tagging(json).unwrap();
        assert_eq!(tags.get("zvault_confirmed").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_tagging_json_stable_order() {
        let mut tags = HashMap::new();
        tags.insert("b".to_string(), "2".to_string());
        tags.insert("a".to_string(), "1".to_string());
        assert_eq!(
            tagging_json(&tags),
            r#"{"TagSet":[{"Key":"a","Value":"1"},{"Key":"b","Value":"2"}]}"#
        );
    }

    #[test]
    fn test_metadata_arg() {
        let mut metadata = HashMap::new();
        metadata.insert("parent".to_string(), "tank@monthly-1".to_string());
        assert_eq!(metadata_arg(&metadata), "parent=tank@monthly-1");
    }

    #[tokio::test]
    async fn test_pipe_upload_drains_noisy_stderr() {
        // 1 MiB of stderr before stdin is touched wedges both sides
        // unless stderr is drained concurrently
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("head -c 1048576 /dev/zero >&2; cat > /dev/null");
        let stream = ByteStream::from_reader(std::io::Cursor::new(vec![0u8; 4 * 1024 * 1024]));
        pipe_upload(cmd, stream).await.unwrap();
    }

    #[tokio::test]
    async fn test_pipe_upload_surfaces_stderr_on_failure() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("cat > /dev/null; echo boom >&2; exit 3");
        let stream = ByteStream::from_reader(std::io::Cursor::new(b"payload".to_vec()));
        let err = pipe_upload(cmd, stream).await.unwrap_err();
        match err {
            BackupError::Store { op, reason } => {
                assert_eq!(op, "put");
                assert_eq!(reason, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
