use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::range::ByteWindow;
use crate::store::StoredItem;
use crate::{ByteStream, MediaError, MediaResult, VersionSelector};

const READ_CHUNK: usize = 64 * 1024;

/// Where a version of an item lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalSource {
    pub path: PathBuf,
    pub exists: bool,
    /// Size in bytes; 0 when the file is missing
    pub size: u64,
}

/// Maps a logical version of an item to a file
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionResolver;

impl VersionResolver {
    pub fn new() -> Self {
        Self
    }

    /// `Full` is always the primary file. `Preview` fails with
    /// `NoPreviewAvailable` until an artifact has been recorded.
    pub async fn resolve(&self, item: &StoredItem, version: VersionSelector) -> MediaResult<PhysicalSource> {
        let path = match version {
            VersionSelector::Full => item.primary_path.clone(),
            VersionSelector::Preview => item
                .preview()
                .cloned()
                .ok_or_else(|| MediaError::no_preview(item.item_id))?,
        };
        stat(path).await
    }
}

async fn stat(path: PathBuf) -> MediaResult<PhysicalSource> {
    match fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Ok(PhysicalSource {
            size: meta.len(),
            exists: true,
            path,
        }),
        Ok(_) => Ok(PhysicalSource {
            path,
            exists: false,
            size: 0,
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(PhysicalSource {
            path,
            exists: false,
            size: 0,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Stream exactly the bytes of `window` from `path`.
///
/// The file is opened lazily on first poll. A file that ends before the
/// window does yields an `UnexpectedEof` error instead of a short body.
pub fn read_window(path: &Path, window: ByteWindow) -> ByteStream {
    let path = path.to_path_buf();
    let stream = async_stream::try_stream! {
        let mut file = fs::File::open(&path).await?;
        file.seek(SeekFrom::Start(window.start)).await?;

        let mut remaining = window.byte_len();
        let mut buf = vec![0u8; READ_CHUNK];
        while remaining > 0 {
            let want = remaining.min(READ_CHUNK as u64) as usize;
            let n = match file.read(&mut buf[..want]).await? {
                0 => Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("{} ended {} bytes early", path.display(), remaining),
                ))?,
                n => n,
            };
            remaining -= n as u64;
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    };
    Box::pin(stream)
}
