use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::locks::KeyedLocks;
use crate::{MediaError, MediaResult};

/// How a placement finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// Same-device rename
    Renamed,
    /// Cross-device copy into a sibling temp file, then rename
    Copied,
    /// Staging file already consumed and destination present
    AlreadyPlaced,
}

/// Acknowledgement of a finished placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementAck {
    pub destination: PathBuf,
    pub size_bytes: u64,
    pub outcome: PlacementOutcome,
}

/// Moves assembled files into their final object-store path.
///
/// A destination is either absent or complete: the cross-device fallback
/// never writes to the final path directly. Placements into the same
/// destination run one at a time.
pub struct PlacementService {
    locks: KeyedLocks<PathBuf>,
}

impl PlacementService {
    pub fn new() -> Self {
        Self {
            locks: KeyedLocks::new(),
        }
    }

    #[instrument(skip(self), fields(staging = %staging.display(), destination = %destination.display()))]
    pub async fn place(&self, staging: &Path, destination: &Path) -> MediaResult<PlacementAck> {
        let _guard = self.locks.lock(destination.to_path_buf()).await;
        let fail = |source: std::io::Error| MediaError::PlacementFailed {
            staging: staging.to_path_buf(),
            destination: destination.to_path_buf(),
            source,
        };

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.map_err(fail)?;
        }

        match fs::rename(staging, destination).await {
            Ok(()) => {
                let size_bytes = fs::metadata(destination).await.map_err(fail)?.len();
                debug!(size_bytes, "Placed by rename");
                Ok(PlacementAck {
                    destination: destination.to_path_buf(),
                    size_bytes,
                    outcome: PlacementOutcome::Renamed,
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // retry after success: staging consumed, destination already in place
                match fs::metadata(destination).await {
                    Ok(meta) if meta.is_file() => Ok(PlacementAck {
                        destination: destination.to_path_buf(),
                        size_bytes: meta.len(),
                        outcome: PlacementOutcome::AlreadyPlaced,
                    }),
                    _ => Err(fail(e)),
                }
            }
            Err(e) if is_cross_device(&e) => {
                debug!("Cross-device placement, falling back to copy");
                copy_then_swap(staging, destination).await.map_err(fail)
            }
            Err(e) => Err(fail(e)),
        }
    }
}

impl Default for PlacementService {
    fn default() -> Self {
        Self::new()
    }
}

fn is_cross_device(e: &std::io::Error) -> bool {
    const EXDEV: i32 = 18;
    e.kind() == ErrorKind::CrossesDevices || e.raw_os_error() == Some(EXDEV)
}

/// Copy `staging` into a hidden sibling of `destination`, rename it over the
/// destination, then delete `staging`. On copy failure the sibling is
/// removed and `staging` is left untouched.
pub(crate) async fn copy_then_swap(staging: &Path, destination: &Path) -> std::io::Result<PlacementAck> {
    let temp = temp_sibling(destination)?;

    let copied = async {
        let size_bytes = fs::copy(staging, &temp).await?;
        fs::File::open(&temp).await?.sync_all().await?;
        fs::rename(&temp, destination).await?;
        Ok::<u64, std::io::Error>(size_bytes)
    }
    .await;

    let size_bytes = match copied {
        Ok(size) => size,
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(temp = %temp.display(), error = %cleanup, "Failed to remove partial copy");
                }
            }
            return Err(e);
        }
    };

    fs::remove_file(staging).await?;

    Ok(PlacementAck {
        destination: destination.to_path_buf(),
        size_bytes,
        outcome: PlacementOutcome::Copied,
    })
}

fn temp_sibling(destination: &Path) -> std::io::Result<PathBuf> {
    let name = destination
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "destination has no file name"))?;
    let dir = destination.parent().unwrap_or_else(|| Path::new(""));
    Ok(dir.join(format!(".{}.{}.partial", name, Uuid::new_v4().simple())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn rename_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("s.upload");
        tokio::fs::write(&staging, b"payload").await.unwrap();
        let dest = dir.path().join("store/project/owner/file.bin");

        let ack = PlacementService::new().place(&staging, &dest).await.unwrap();
        assert_eq!(ack.outcome, PlacementOutcome::Renamed);
        assert_eq!(ack.size_bytes, 7);
        assert!(!staging.exists());
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn second_placement_is_a_clean_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("s.upload");
        tokio::fs::write(&staging, b"payload").await.unwrap();
        let dest = dir.path().join("out/file.bin");
        let service = PlacementService::new();

        service.place(&staging, &dest).await.unwrap();
        let again = service.place(&staging, &dest).await.unwrap();
        assert_eq!(again.outcome, PlacementOutcome::AlreadyPlaced);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn missing_staging_without_destination_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = PlacementService::new()
            .place(&dir.path().join("nope"), &dir.path().join("out/file.bin"))
            .await;
        assert!(matches!(result, Err(MediaError::PlacementFailed { .. })));
    }

    #[tokio::test]
    async fn copy_fallback_swaps_in_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("s.upload");
        tokio::fs::write(&staging, b"new content").await.unwrap();
        let dest = dir.path().join("file.bin");
        tokio::fs::write(&dest, b"old").await.unwrap();

        let ack = copy_then_swap(&staging, &dest).await.unwrap();
        assert_eq!(ack.outcome, PlacementOutcome::Copied);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"new content");
        assert!(!staging.exists());

        let mut leftovers = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = leftovers.next_entry().await.unwrap() {
            assert!(!entry.file_name().to_string_lossy().ends_with(".partial"));
        }
    }

    #[tokio::test]
    async fn failed_copy_keeps_staging_and_leaves_no_partial() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let result = copy_then_swap(&dir.path().join("missing.upload"), &dest).await;
        assert!(result.is_err());
        assert!(!dest.exists());
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_placements_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(PlacementService::new());
        let dest = dir.path().join("shared/target.bin");
        let mut tasks = Vec::new();

        for writer in 0u8..16 {
            let staging = dir.path().join(format!("w{}.upload", writer));
            tokio::fs::write(&staging, vec![writer; 256 * 1024]).await.unwrap();
            let service = service.clone();
            let dest = dest.clone();
            tasks.push(tokio::spawn(async move {
                if writer % 2 == 0 {
                    service.place(&staging, &dest).await.map(|_| ())
                } else {
                    let _guard = service.locks.lock(dest.clone()).await;
                    copy_then_swap(&staging, &dest).await.map(|_| ()).map_err(MediaError::from)
                }
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let bytes = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(bytes.len(), 256 * 1024);
        assert!(bytes.iter().all(|b| *b == bytes[0]));
    }
}
