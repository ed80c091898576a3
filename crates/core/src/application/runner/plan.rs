// Transfer plan: which files a job moves, and where
use crate::domain::{SyncJob, TransferDirection};
use crate::port::{
    FileCandidate, FileFilter, RemoteEntry, TransferClient, TransferError, TransferErrorKind,
    TransferResult,
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One file of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanItem {
    pub source: String,
    pub destination: String,
    pub relative_path: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct TransferPlan {
    pub items: Vec<PlanItem>,
    /// Relative paths rejected by the file filter
    pub filtered: Vec<String>,
    /// False when the job source is a single file
    pub source_is_dir: bool,
}

impl TransferPlan {
    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.size).sum()
    }
}

/// Join an endpoint directory and a `/`-separated relative path
pub fn join_remote(dir: &str, relative: &str) -> String {
    if dir.is_empty() {
        return relative.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), relative.trim_start_matches('/'))
}

fn relative_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn walk_error(err: walkdir::Error) -> TransferError {
    let message = err.to_string();
    match err.into_io_error() {
        Some(io) => TransferError::from(io).context(message),
        None => TransferError::new(TransferErrorKind::TransientIo, message),
    }
}

/// Files under a local root (the root itself if it is a file).
///
/// Returns `(root_is_dir, entries)`; symlinks are not followed.
pub fn list_local_files(root: &Path, recursive: bool) -> TransferResult<(bool, Vec<RemoteEntry>)> {
    let metadata =
        std::fs::metadata(root).map_err(|e| TransferError::from(e).context(root.display()))?;
    if metadata.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let entry = RemoteEntry {
            path: root.to_string_lossy().to_string(),
            relative_path: name,
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        };
        return Ok((false, vec![entry]));
    }

    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut entries = Vec::new();
    for result in walker {
        let entry = result.map_err(walk_error)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry.metadata().map_err(walk_error)?;
        let relative = match entry.path().strip_prefix(root) {
            Ok(rel) => relative_string(rel),
            Err(_) => continue,
        };
        entries.push(RemoteEntry {
            path: entry.path().to_string_lossy().to_string(),
            relative_path: relative,
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    Ok((true, entries))
}

/// `list_local_files` off the async runtime
pub async fn list_local_files_async(
    root: PathBuf,
    recursive: bool,
) -> TransferResult<(bool, Vec<RemoteEntry>)> {
    tokio::task::spawn_blocking(move || list_local_files(&root, recursive))
        .await
        .map_err(|e| {
            TransferError::new(
                TransferErrorKind::TransientIo,
                format!("listing task failed: {}", e),
            )
        })?
}

/// Enumerate a job's source and map every file to its destination
pub async fn build_plan(
    job: &SyncJob,
    client: &dyn TransferClient,
    filter: &dyn FileFilter,
) -> TransferResult<TransferPlan> {
    let (source_is_dir, entries) = match job.direction {
        TransferDirection::Upload => {
            list_local_files_async(PathBuf::from(&job.source_path), job.recursive).await?
        }
        TransferDirection::Download => {
            let entries = client.list_files(&job.source_path, job.recursive).await?;
            let single_file = entries.len() == 1
                && entries[0].path.trim_end_matches('/') == job.source_path.trim_end_matches('/');
            (!single_file, entries)
        }
    };

    let mut plan = TransferPlan {
        source_is_dir,
        ..Default::default()
    };
    for entry in entries {
        let candidate = FileCandidate {
            path: &entry.path,
            relative_path: &entry.relative_path,
            size: entry.size,
            modified: entry.modified,
        };
        if !filter.accept(&candidate) {
            plan.filtered.push(entry.relative_path);
            continue;
        }

        let destination = if !source_is_dir {
            job.destination_path.clone()
        } else {
            match job.direction {
                TransferDirection::Upload => join_remote(&job.destination_path, &entry.relative_path),
                TransferDirection::Download => Path::new(&job.destination_path)
                    .join(&entry.relative_path)
                    .to_string_lossy()
                    .to_string(),
            }
        };
        plan.items.push(PlanItem {
            source: entry.path,
            destination,
            relative_path: entry.relative_path,
            size: entry.size,
            modified: entry.modified,
        });
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::transfer_client::mocks::{MockTransferClient, MockTransferState};
    use crate::port::{AcceptAll, FnFilter};
    use std::sync::{Arc, Mutex};

    fn mock_client() -> MockTransferClient {
        MockTransferClient::new(Arc::new(Mutex::new(MockTransferState::default())))
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/up/", "a/b.txt"), "/up/a/b.txt");
        assert_eq!(join_remote("/up", "b.txt"), "/up/b.txt");
        assert_eq!(join_remote("", "b.txt"), "b.txt");
    }

    #[tokio::test]
    async fn test_upload_plan_for_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"aa").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"bbb").unwrap();

        let job = SyncJob::new_test("j", dir.path().to_str().unwrap(), "/remote");
        let plan = build_plan(&job, &mock_client(), &AcceptAll).await.unwrap();

        assert!(plan.source_is_dir);
        let dests: Vec<&str> = plan.items.iter().map(|i| i.destination.as_str()).collect();
        assert_eq!(dests, vec!["/remote/a.txt", "/remote/sub/b.txt"]);
        assert_eq!(plan.total_bytes(), 5);
    }

    #[tokio::test]
    async fn test_non_recursive_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("skip.tmp"), b"t").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();

        let mut job = SyncJob::new_test("j", dir.path().to_str().unwrap(), "/remote");
        job.recursive = false;
        let filter = FnFilter(|c: &FileCandidate<'_>| !c.relative_path.ends_with(".tmp"));
        let plan = build_plan(&job, &mock_client(), &filter).await.unwrap();

        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].relative_path, "a.txt");
        assert_eq!(plan.filtered, vec!["skip.tmp".to_string()]);
    }

    #[tokio::test]
    async fn test_single_file_maps_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("one.bin");
        std::fs::write(&file, b"1234").unwrap();

        let job = SyncJob::new_test("j", file.to_str().unwrap(), "/remote/renamed.bin");
        let plan = build_plan(&job, &mock_client(), &AcceptAll).await.unwrap();
        assert!(!plan.source_is_dir);
        assert_eq!(plan.items[0].destination, "/remote/renamed.bin");
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let job = SyncJob::new_test("j", "/definitely/not/here", "/remote");
        let err = build_plan(&job, &mock_client(), &AcceptAll).await.unwrap_err();
        assert_eq!(err.kind, TransferErrorKind::NotFound);
    }
}
