//! Static source loading from declarative cluster files.
//!
//! Each configured directory is scanned for `*.json` entries; the file
//! base name is the cluster name. Individual file failures are
//! non-fatal and only logged: a broken file must never stop a reload.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;
use tracing::{debug, info};

use super::{Provenance, SourceRecord};
use crate::decode::decode_cluster;

/// Recognized cluster file extension.
pub const CLUSTER_FILE_EXT: &str = "json";

/// Load every cluster file under the configured directories, in
/// configured order. Records later in the result replace earlier
/// same-named records during the merge.
pub async fn load_dirs(dirs: &[PathBuf]) -> Vec<SourceRecord> {
    let mut records = Vec::new();
    for dir in dirs {
        load_dir(dir, &mut records).await;
    }
    records
}

async fn load_dir(dir: &Path, records: &mut Vec<SourceRecord>) {
    info!(path = %dir.display(), "loading clusters");

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) => {
            debug!(path = %dir.display(), error = %err, "could not list source directory");
            return;
        }
    };

    // Deterministic load order within a directory.
    let mut paths = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        paths.push(entry.path());
    }
    paths.sort();

    for path in paths {
        let Some(name) = cluster_name(&path) else {
            continue;
        };
        debug!(cluster = %name, path = %path.display(), "loading cluster file");

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "skipping unreadable cluster file");
                continue;
            }
        };
        let value: Value = match serde_json::from_slice(&raw) {
            Ok(value) => value,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "skipping undecodable cluster file");
                continue;
            }
        };

        let (cluster, warnings) = decode_cluster(&name, &value);
        records.push(SourceRecord {
            name,
            cluster,
            provenance: Provenance::Directory(dir.to_path_buf()),
            warnings,
        });
    }
}

/// Cluster name for a directory entry: the base name with the
/// recognized extension stripped, `None` for anything else.
fn cluster_name(path: &Path) -> Option<String> {
    if path.extension().and_then(OsStr::to_str) != Some(CLUSTER_FILE_EXT) {
        return None;
    }
    path.file_stem()
        .and_then(OsStr::to_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[tokio::test]
    async fn test_loads_cluster_files_only() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "web.json", r#"{"hosts": ["h1", "h2"]}"#);
        write(dir.path(), "db.json", r#"{"hosts": ["d1"]}"#);
        write(dir.path(), "notes.txt", "not a cluster");

        let records = load_dirs(&[dir.path().to_path_buf()]).await;
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["db", "web"]);
        assert_eq!(records[1].cluster["hosts"], vec!["h1", "h2"]);
        assert!(
            records
                .iter()
                .all(|r| r.provenance == Provenance::Directory(dir.path().to_path_buf()))
        );
    }

    #[tokio::test]
    async fn test_broken_file_skipped_without_record() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "ok.json", r#"{"hosts": ["h1"]}"#);
        write(dir.path(), "broken.json", "{not json");

        let records = load_dirs(&[dir.path().to_path_buf()]).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "ok");
    }

    #[tokio::test]
    async fn test_missing_directory_is_non_fatal() {
        let records = load_dirs(&[PathBuf::from("/nonexistent/clusters")]).await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_directories_load_in_configured_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write(first.path(), "web.json", r#"{"hosts": ["old"]}"#);
        write(second.path(), "web.json", r#"{"hosts": ["new"]}"#);

        let records =
            load_dirs(&[first.path().to_path_buf(), second.path().to_path_buf()]).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cluster["hosts"], vec!["old"]);
        assert_eq!(records[1].cluster["hosts"], vec!["new"]);
    }
}
