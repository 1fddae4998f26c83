//! Merges verified segment files into the destination.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use super::error::TransferError;
use super::planner::TransferPlan;
use super::resume::ResumeStore;

/// Verifies every segment file, then concatenates them into `destination`.
///
/// Nothing is written unless every part exists with its planned size. Output
/// goes to `<destination>.merging` first and is renamed into place, so the
/// destination is never partial. Resume state is cleared afterwards.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// - [`TransferError::MissingSegment`] / [`TransferError::Corruption`] when a
///   part fails verification; all part files are left untouched.
/// - [`TransferError::Io`] when reading parts or writing the output fails.
#[instrument(skip(plan, store), fields(destination = %destination.display(), segments = plan.segments.len()))]
pub async fn merge_segments(
    plan: &TransferPlan,
    store: &ResumeStore,
    destination: &Path,
) -> Result<u64, TransferError> {
    verify_segments(plan, store).await?;

    let staging = staging_path(destination);
    let written = match concatenate(plan, store, &staging).await {
        Ok(written) => written,
        Err(e) => {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }
    };
    tokio::fs::rename(&staging, destination)
        .await
        .map_err(|e| TransferError::io(destination, e))?;

    if let Err(e) = store.clear().await {
        warn!(error = %e, "merged, but resume state could not be cleared");
    }
    info!(bytes = written, "segments merged");
    Ok(written)
}

async fn verify_segments(plan: &TransferPlan, store: &ResumeStore) -> Result<(), TransferError> {
    for segment in &plan.segments {
        let path = store.segment_path(segment.index);
        let actual = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::missing_segment(segment.index, path));
            }
            Err(e) => return Err(TransferError::io(path, e)),
        };
        match segment.len {
            Some(expected) if actual != expected => {
                return Err(TransferError::corruption(
                    segment.index,
                    path,
                    expected,
                    actual,
                ));
            }
            _ => {}
        }
        debug!(segment = segment.index, bytes = actual, "segment verified");
    }
    Ok(())
}

async fn concatenate(
    plan: &TransferPlan,
    store: &ResumeStore,
    staging: &Path,
) -> Result<u64, TransferError> {
    let mut output = File::create(staging)
        .await
        .map_err(|e| TransferError::io(staging, e))?;
    let mut written = 0u64;

    for segment in &plan.segments {
        let path = store.segment_path(segment.index);
        let mut part = File::open(&path)
            .await
            .map_err(|e| TransferError::io(&path, e))?;
        written += tokio::io::copy(&mut part, &mut output)
            .await
            .map_err(|e| TransferError::io(staging, e))?;
    }

    output
        .flush()
        .await
        .map_err(|e| TransferError::io(staging, e))?;
    output
        .sync_all()
        .await
        .map_err(|e| TransferError::io(staging, e))?;
    Ok(written)
}

fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".merging");
    PathBuf::from(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::download::planner::TransferPlan;
    use crate::download::probe::ProbeResult;

    fn plan(total: u64, workers: usize) -> TransferPlan {
        TransferPlan::new(
            ProbeResult {
                total_size: Some(total),
                accepts_ranges: true,
            },
            workers,
        )
    }

    fn write_parts(store: &ResumeStore, parts: &[&[u8]]) {
        std::fs::create_dir_all(store.parts_dir()).unwrap();
        for (index, bytes) in parts.iter().enumerate() {
            std::fs::write(store.segment_path(index), bytes).unwrap();
        }
    }

    #[tokio::test]
    async fn test_merge_concatenates_in_index_order() {
        let dir = TempDir::new().unwrap();
        let store = ResumeStore::at(dir.path(), "out.bin");
        write_parts(&store, &[b"abc", b"def", b"ghij"]);
        let destination = dir.path().join("out.bin");

        let written = merge_segments(&plan(10, 3), &store, &destination)
            .await
            .unwrap();

        assert_eq!(written, 10);
        assert_eq!(std::fs::read(&destination).unwrap(), b"abcdefghij");
        assert!(!store.parts_dir().exists(), "parts are cleared after merge");
        assert!(!staging_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_merge_rejects_truncated_part() {
        let dir = TempDir::new().unwrap();
        let store = ResumeStore::at(dir.path(), "out.bin");
        write_parts(&store, &[b"abc", b"de", b"ghij"]);
        let destination = dir.path().join("out.bin");

        let error = merge_segments(&plan(10, 3), &store, &destination)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            TransferError::Corruption {
                index: 1,
                expected_bytes: 3,
                actual_bytes: 2,
                ..
            }
        ));
        assert!(!destination.exists());
        assert_eq!(std::fs::read(store.segment_path(1)).unwrap(), b"de");
    }

    #[tokio::test]
    async fn test_merge_rejects_missing_part() {
        let dir = TempDir::new().unwrap();
        let store = ResumeStore::at(dir.path(), "out.bin");
        write_parts(&store, &[b"abcde"]);

        let error = merge_segments(&plan(10, 2), &store, &dir.path().join("out.bin"))
            .await
            .unwrap_err();
        assert!(matches!(error, TransferError::MissingSegment { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_merge_unknown_length_skips_size_check() {
        let dir = TempDir::new().unwrap();
        let store = ResumeStore::at(dir.path(), "stream.bin");
        write_parts(&store, &[b"whatever arrived"]);
        let single = TransferPlan::new(
            ProbeResult {
                total_size: None,
                accepts_ranges: false,
            },
            4,
        );

        let destination = dir.path().join("stream.bin");
        merge_segments(&single, &store, &destination).await.unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"whatever arrived");
    }

    #[test]
    fn test_staging_path_appends_suffix() {
        assert_eq!(
            staging_path(Path::new("/data/a.iso")),
            PathBuf::from("/data/a.iso.merging")
        );
    }
}
