//! Derived preview artifacts.
//!
//! Images become a resized raster, videos a short looping animation. Both
//! land in a `thumbnails/` directory beside the source. Encoders write to a
//! hidden temporary sibling that is renamed over the final artifact, so a
//! preview can be regenerated at any time and readers never see a partial one.

mod raster;
mod video;

pub use self::raster::ImagePreviewEncoder;
pub use self::video::VideoPreviewEncoder;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::PreviewRules;
use crate::layout::StoreLayout;
use crate::locks::KeyedLocks;
use crate::store::{MetadataStore, StoredItem};
use crate::{ArtifactError, ItemId, MediaError, MediaKind};

/// Pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Fit `width x height` into a box whose longer side is `longest`,
/// keeping the aspect ratio. The shorter side is rounded to the nearest
/// integer and never drops below one. Zero-sized input has no box.
pub fn bounding_box(width: u32, height: u32, longest: u32) -> Option<Dimensions> {
    if width == 0 || height == 0 || longest == 0 {
        return None;
    }
    let scale = |short: u32, long: u32| {
        ((longest as f64) * (short as f64) / (long as f64)).round().max(1.0) as u32
    };
    Some(if height < width {
        Dimensions::new(longest, scale(height, width))
    } else {
        Dimensions::new(scale(width, height), longest)
    })
}

/// Turns one source file into one preview artifact
#[async_trait]
pub trait PreviewEncoder: Send + Sync {
    /// Extension appended to the source file name for the artifact
    fn extension(&self) -> &'static str;

    /// Encode `source` into `target`; returns the artifact's dimensions
    async fn encode(&self, source: &Path, target: &Path) -> Result<Dimensions, ArtifactError>;
}

/// Generates previews for stored items and records them in the metadata store.
///
/// Generation for one item is serialized; different items encode in
/// parallel. Calling it again for the same item overwrites the artifact.
pub struct ArtifactGenerator {
    encoders: HashMap<MediaKind, Arc<dyn PreviewEncoder>>,
    metadata: Arc<dyn MetadataStore>,
    locks: KeyedLocks<ItemId>,
}

impl ArtifactGenerator {
    /// Generator with the stock image and video encoders
    pub fn new(rules: &PreviewRules, metadata: Arc<dyn MetadataStore>) -> Self {
        Self::without_encoders(metadata)
            .with_encoder(MediaKind::Image, ImagePreviewEncoder::new(rules))
            .with_encoder(MediaKind::Video, VideoPreviewEncoder::new(rules))
    }

    /// Generator that produces nothing until encoders are registered
    pub fn without_encoders(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            encoders: HashMap::new(),
            metadata,
            locks: KeyedLocks::new(),
        }
    }

    /// Register (or replace) the encoder for a media kind
    pub fn with_encoder<E: PreviewEncoder + 'static>(mut self, kind: MediaKind, encoder: E) -> Self {
        self.encoders.insert(kind, Arc::new(encoder));
        self
    }

    pub fn supports(&self, kind: MediaKind) -> bool {
        self.encoders.contains_key(&kind)
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Generate the preview for `item` and point its record at it.
    /// Returns `None` for media kinds without an encoder.
    #[instrument(skip(self, item), fields(item_id = %item.item_id, kind = ?item.kind))]
    pub async fn generate_preview(&self, item: &StoredItem) -> Result<Option<PathBuf>, ArtifactError> {
        let Some(encoder) = self.encoders.get(&item.kind) else {
            debug!("No preview encoder for this media kind");
            return Ok(None);
        };

        let _guard = self.locks.lock(item.item_id).await;

        let target = StoreLayout::preview_path(&item.primary_path, encoder.extension())
            .map_err(|e| ArtifactError::permanent(e.to_string()))?;
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).await?;
        }

        let temp = temp_artifact(&target, encoder.extension());
        let dims = match encoder.encode(&item.primary_path, &temp).await {
            Ok(dims) => dims,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        match self.metadata.set_preview(item.item_id, Some(target.clone())).await {
            Ok(()) => {}
            Err(MediaError::ItemNotFound { .. }) => {
                debug!("Item removed during encoding, discarding its preview");
                let _ = fs::remove_file(&target).await;
                return Err(ArtifactError::permanent(format!("item {} was removed", item.item_id)));
            }
            Err(e) => return Err(ArtifactError::retryable(e.to_string())),
        }

        info!(
            preview = %target.display(),
            width = dims.width,
            height = dims.height,
            "Preview generated"
        );
        Ok(Some(target))
    }
}

fn temp_artifact(target: &Path, extension: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = target.parent().unwrap_or_else(|| Path::new(""));
    dir.join(format!(".{}.{}.partial.{}", name, Uuid::new_v4().simple(), extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ItemDraft, MemoryMetadataStore};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn bounding_box_landscape_portrait_square() {
        assert_eq!(bounding_box(1920, 1080, 320), Some(Dimensions::new(320, 180)));
        assert_eq!(bounding_box(1080, 1920, 320), Some(Dimensions::new(180, 320)));
        assert_eq!(bounding_box(500, 500, 320), Some(Dimensions::new(320, 320)));
        assert_eq!(bounding_box(10_000, 3, 320), Some(Dimensions::new(320, 1)));
        assert_eq!(bounding_box(0, 10, 320), None);
    }

    proptest! {
        #[test]
        fn bounding_box_keeps_longest_side_and_ratio(w in 1u32..20_000, h in 1u32..20_000) {
            let dims = bounding_box(w, h, 320).unwrap();
            prop_assert_eq!(dims.width.max(dims.height), 320);

            // shorter side within one unit of the exact proportional value
            let (long, short, new_short) = if h < w {
                (w as f64, h as f64, dims.height as f64)
            } else {
                (h as f64, w as f64, dims.width as f64)
            };
            prop_assert!((new_short - 320.0 * short / long).abs() <= 1.0);
        }
    }

    /// Writes a fixed payload and counts invocations
    struct StubEncoder {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl PreviewEncoder for StubEncoder {
        fn extension(&self) -> &'static str {
            "gif"
        }

        async fn encode(&self, _source: &Path, target: &Path) -> Result<Dimensions, ArtifactError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                tokio::fs::write(target, b"half").await?;
                return Err(ArtifactError::retryable("encoder crashed"));
            }
            tokio::fs::write(target, format!("preview-{}", call)).await?;
            Ok(Dimensions::new(180, 101))
        }
    }

    /// Deletes the item's record while "encoding"
    struct RemovingEncoder {
        store: MemoryMetadataStore,
        item_id: ItemId,
    }

    #[async_trait]
    impl PreviewEncoder for RemovingEncoder {
        fn extension(&self) -> &'static str {
            "gif"
        }

        async fn encode(&self, _source: &Path, target: &Path) -> Result<Dimensions, ArtifactError> {
            self.store.delete(self.item_id).await.unwrap();
            tokio::fs::write(target, b"GIF89a").await?;
            Ok(Dimensions::new(180, 101))
        }
    }

    async fn stored_video(dir: &Path, store: &MemoryMetadataStore) -> StoredItem {
        let primary = dir.join("p/o/clip.mp4");
        tokio::fs::create_dir_all(primary.parent().unwrap()).await.unwrap();
        tokio::fs::write(&primary, b"not really a video").await.unwrap();
        store.create(ItemDraft::new("p", "o", primary)).await.unwrap()
    }

    #[tokio::test]
    async fn generation_is_idempotent_and_writes_back_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMetadataStore::new();
        let item = stored_video(dir.path(), &store).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = ArtifactGenerator::without_encoders(Arc::new(store.clone()))
            .with_encoder(MediaKind::Video, StubEncoder { calls: calls.clone(), fail: false });

        let first = generator.generate_preview(&item).await.unwrap().unwrap();
        let second = generator.generate_preview(&item).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("p/o/thumbnails/clip.mp4.gif"));
        assert_eq!(tokio::fs::read_to_string(&first).await.unwrap(), "preview-1");

        let recorded = store.get(item.item_id).await.unwrap().unwrap();
        assert_eq!(recorded.preview_path, Some(first));
    }

    #[tokio::test]
    async fn failure_leaves_no_preview_and_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMetadataStore::new();
        let item = stored_video(dir.path(), &store).await;
        let generator = ArtifactGenerator::without_encoders(Arc::new(store.clone())).with_encoder(
            MediaKind::Video,
            StubEncoder { calls: Arc::new(AtomicUsize::new(0)), fail: true },
        );

        let err = generator.generate_preview(&item).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.get(item.item_id).await.unwrap().unwrap().preview_path.is_none());

        let mut entries = tokio::fs::read_dir(dir.path().join("p/o/thumbnails")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn preview_of_a_removed_item_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMetadataStore::new();
        let item = stored_video(dir.path(), &store).await;
        let generator = ArtifactGenerator::without_encoders(Arc::new(store.clone())).with_encoder(
            MediaKind::Video,
            RemovingEncoder { store: store.clone(), item_id: item.item_id },
        );

        let err = generator.generate_preview(&item).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(!dir.path().join("p/o/thumbnails/clip.mp4.gif").exists());

        let mut entries = tokio::fs::read_dir(dir.path().join("p/o/thumbnails")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unsupported_kind_produces_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMetadataStore::new();
        let primary = dir.path().join("p/o/song.mp3");
        let item = store.create(ItemDraft::new("p", "o", primary)).await.unwrap();
        let generator = ArtifactGenerator::new(&PreviewRules::default(), Arc::new(store.clone()));

        assert!(!generator.supports(MediaKind::Audio));
        assert_eq!(generator.generate_preview(&item).await.unwrap(), None);
        assert!(!dir.path().join("p/o/thumbnails").exists());
    }
}
