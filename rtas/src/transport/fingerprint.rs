//! Remote file fingerprints, used to decide whether a fetch is stale.
//!
//! Fingerprints are SHA-256 digests computed on the host with `sha256sum`
//! and remembered per (host, path).

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use super::{shell_quote, Transport};
use crate::errors::{ActionError, RtasError};

/// One persisted fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintEntry {
    /// The host identifier.
    pub host: String,
    /// The remote path.
    pub path: String,
    /// Hex SHA-256 digest.
    pub digest: String,
}

/// Tracks the last seen fingerprint of remote files.
#[derive(Debug, Default)]
pub struct FingerprintTracker {
    entries: RwLock<BTreeMap<(String, String), String>>,
}

impl FingerprintTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the current digests of `paths` on the transport's host.
    pub async fn current(
        transport: &dyn Transport,
        paths: &[String],
    ) -> Result<BTreeMap<String, String>, ActionError> {
        if paths.is_empty() {
            return Ok(BTreeMap::new());
        }

        let quoted: Vec<String> = paths.iter().map(|p| shell_quote(p)).collect();
        let command = format!("sha256sum -- {}", quoted.join(" "));
        let stdout = transport.run(&command).await?.into_result(&command)?;

        let digests = stdout.lines().filter_map(parse_checksum_line).collect();
        Ok(digests)
    }

    /// Returns true if every path's digest equals the recorded one.
    ///
    /// A path with no recorded digest counts as changed.
    pub async fn unchanged(
        &self,
        transport: &dyn Transport,
        paths: &[String],
    ) -> Result<bool, ActionError> {
        let current = Self::current(transport, paths).await?;
        let entries = self.entries.read();
        let host = transport.host();

        Ok(paths.iter().all(|path| {
            let recorded = entries.get(&(host.to_string(), path.clone()));
            recorded.is_some() && recorded == current.get(path)
        }))
    }

    /// Records the current digests of `paths`.
    pub async fn record(
        &self,
        transport: &dyn Transport,
        paths: &[String],
    ) -> Result<(), ActionError> {
        let current = Self::current(transport, paths).await?;
        let host = transport.host().to_string();
        let mut entries = self.entries.write();
        for (path, digest) in current {
            debug!(host = %host, path = %path, digest = %digest, "recorded fingerprint");
            entries.insert((host.clone(), path), digest);
        }
        Ok(())
    }

    /// Returns the recorded digest of a path.
    #[must_use]
    pub fn get(&self, host: &str, path: &str) -> Option<String> {
        self.entries
            .read()
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }

    /// Forgets every recorded digest.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Returns the number of recorded digests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Loads recorded digests from a JSON file. A missing file yields an empty tracker.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RtasError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)?;
        let list: Vec<FingerprintEntry> =
            serde_json::from_str(&raw).map_err(|e| RtasError::Config(e.to_string()))?;
        let entries = list
            .into_iter()
            .map(|e| ((e.host, e.path), e.digest))
            .collect();
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    /// Saves recorded digests to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RtasError> {
        let list: Vec<FingerprintEntry> = self
            .entries
            .read()
            .iter()
            .map(|((host, path), digest)| FingerprintEntry {
                host: host.clone(),
                path: path.clone(),
                digest: digest.clone(),
            })
            .collect();
        let json = serde_json::to_string_pretty(&list)
            .map_err(|e| RtasError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Parses one `sha256sum` output line into `(path, digest)`.
///
/// Lines are `<digest>  <path>` or `<digest> *<path>`. When the path holds a
/// backslash, newline or carriage return, the line starts with `\\` and
/// those characters are escaped in the path.
fn parse_checksum_line(line: &str) -> Option<(String, String)> {
    let (escaped, line) = match line.strip_prefix('\\') {
        Some(rest) => (true, rest),
        None => (false, line),
    };
    let (digest, rest) = line.split_once(' ')?;
    let mut chars = rest.chars();
    if !matches!(chars.next(), Some(' ' | '*')) || digest.is_empty() {
        return None;
    }
    let raw = chars.as_str();
    let path = if escaped { unescape_path(raw)? } else { raw.to_string() };
    Some((path, digest.to_string()))
}

fn unescape_path(raw: &str) -> Option<String> {
    let mut path = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            path.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => path.push('\\'),
            'n' => path.push('\n'),
            'r' => path.push('\r'),
            _ => return None,
        }
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryTransport;
    use crate::transport::CommandOutput;
    use pretty_assertions::assert_eq;

    fn paths(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| (*p).to_string()).collect()
    }

    #[tokio::test]
    async fn test_unrecorded_is_changed() {
        let transport = InMemoryTransport::new("h1", "root").with_remote_file("/data/a", b"one");
        let tracker = FingerprintTracker::new();

        assert!(!tracker.unchanged(&transport, &paths(&["/data/a"])).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_then_unchanged_then_modified() {
        let transport = InMemoryTransport::new("h1", "root").with_remote_file("/data/a", b"one");
        let tracker = FingerprintTracker::new();
        let files = paths(&["/data/a"]);

        tracker.record(&transport, &files).await.unwrap();
        assert_eq!(tracker.len(), 1);
        assert!(tracker.unchanged(&transport, &files).await.unwrap());

        transport.write_remote_file("/data/a", b"two");
        assert!(!tracker.unchanged(&transport, &files).await.unwrap());
    }

    #[test]
    fn test_parse_checksum_line() {
        let digest = "ab".repeat(32);
        assert_eq!(
            parse_checksum_line(&format!("{digest}  /data/a")),
            Some(("/data/a".to_string(), digest.clone()))
        );
        assert_eq!(
            parse_checksum_line(&format!("{digest} *  leading space")),
            Some(("  leading space".to_string(), digest.clone()))
        );
        assert_eq!(
            parse_checksum_line(&format!(r"\{digest}  /data/back\\slash\nnext\r")),
            Some(("/data/back\\slash\nnext\r".to_string(), digest.clone()))
        );
        assert_eq!(parse_checksum_line(&format!(r"\{digest}  /data/bad\q")), None);
        assert_eq!(parse_checksum_line("sha256sum: /x: Is a directory"), None);
    }

    #[tokio::test]
    async fn test_escaped_paths_are_tracked_by_real_name() {
        let odd = "/data/two\nlines";
        let plain = "/data/plain";
        let command = format!("sha256sum -- {} {}", shell_quote(odd), shell_quote(plain));
        let one = "11".repeat(32);
        let two = "22".repeat(32);
        let transport = InMemoryTransport::new("h1", "root").with_command(
            &command,
            CommandOutput::success(format!("\\{one}  /data/two\\nlines\n{two}  {plain}\n")),
        );
        let tracker = FingerprintTracker::new();
        let files = paths(&[odd, plain]);

        tracker.record(&transport, &files).await.unwrap();
        assert_eq!(tracker.get("h1", odd), Some(one));
        assert_eq!(tracker.get("h1", plain), Some(two));
        assert!(tracker.unchanged(&transport, &files).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_remote_file_is_error() {
        let transport = InMemoryTransport::new("h1", "root");
        let tracker = FingerprintTracker::new();
        let result = tracker.unchanged(&transport, &paths(&["/nope"])).await;
        assert!(matches!(result, Err(ActionError::RemoteCommand(_))));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let transport = InMemoryTransport::new("h1", "root").with_remote_file("/data/a", b"one");
        let tracker = FingerprintTracker::new();
        tracker.record(&transport, &paths(&["/data/a"])).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("fingerprints.json");
        tracker.save(&file).unwrap();

        let loaded = FingerprintTracker::load(&file).unwrap();
        assert_eq!(loaded.get("h1", "/data/a"), tracker.get("h1", "/data/a"));
        assert!(FingerprintTracker::load(dir.path().join("absent.json"))
            .unwrap()
            .is_empty());
    }
}
